//! # WebSocket Voice Session Handler
//!
//! Clients connect to `/ws` (optionally `/ws?token=...`) and hold one voice
//! conversation per connection.
//!
//! ## WebSocket Protocol:
//! 1. **Connection**: the token is checked and a session slot reserved; a full
//!    server answers HTTP 503, a bad token gets close code 1008 `invalid token`
//! 2. **Streaming**: binary frames carry raw microphone samples; text frames carry
//!    `audio_chunk` / `text_message` JSON or base64 samples (see [`crate::protocol`])
//! 3. **Replies**: JSON events and binary audio frames, in pipeline order
//! 4. **Heartbeat**: the server pings; a silent client is dropped after the timeout
//!
//! The actor is only the transport. Decoded input is handed to the session task,
//! and the session writes back through [`SocketSink`].

use crate::error::{AppError, MalformedInput, TransportError};
use crate::protocol::{ClientInput, ClientSink, OutboundFrame};
use crate::session::{Session, SessionDeps, SessionHandle, SessionSettings};
use crate::state::AppState;
use actix::prelude::*;
use actix_web::{web, HttpRequest, HttpResponse};
use actix_web_actors::ws;
use async_trait::async_trait;
use serde::Deserialize;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, error, info, warn};
use uuid::Uuid;

/// Frame produced by the session, written to the socket by the actor.
#[derive(Message)]
#[rtype(result = "()")]
struct Outbound(OutboundFrame);

/// Session-side handle for writing to one connection.
///
/// Each `send` waits for the actor to accept the frame, so frames reach the
/// socket in the order the session produced them.
pub struct SocketSink {
    addr: Addr<VoiceSocket>,
}

#[async_trait]
impl ClientSink for SocketSink {
    async fn send(&self, frame: OutboundFrame) -> Result<(), TransportError> {
        self.addr
            .send(Outbound(frame))
            .await
            .map_err(|e| TransportError::Closed(e.to_string()))
    }
}

/// One connected client.
pub struct VoiceSocket {
    session_id: Uuid,
    state: AppState,
    session: Option<SessionHandle>,
    settings: SessionSettings,
    last_heartbeat: Instant,
}

impl VoiceSocket {
    pub fn new(session_id: Uuid, state: AppState) -> Self {
        let settings = state.session_settings();
        Self {
            session_id,
            state,
            session: None,
            settings,
            last_heartbeat: Instant::now(),
        }
    }

    fn forward(
        &mut self,
        decoded: Result<ClientInput, MalformedInput>,
        ctx: &mut ws::WebsocketContext<Self>,
    ) {
        let input = match decoded {
            Ok(input) => input,
            Err(err) => {
                warn!(session_id = %self.session_id, "Dropping malformed frame: {}", err);
                self.state.record(|m| m.malformed_frames += 1);
                return;
            }
        };

        let accepted = self
            .session
            .as_ref()
            .map(|session| session.submit(input))
            .unwrap_or(false);
        if !accepted {
            error!(session_id = %self.session_id, "Session loop is gone, closing connection");
            ctx.stop();
        }
    }
}

impl Actor for VoiceSocket {
    type Context = ws::WebsocketContext<Self>;

    fn started(&mut self, ctx: &mut Self::Context) {
        info!(session_id = %self.session_id, "WebSocket connection started");

        let deps = SessionDeps {
            vad: self.state.vad.clone(),
            collaborators: self.state.collaborators.clone(),
            settings: self.settings.clone(),
            metrics: self.state.metrics.clone(),
        };
        let sink = Arc::new(SocketSink {
            addr: ctx.address(),
        });
        self.session = Some(Session::spawn(self.session_id, deps, sink));

        let interval = Duration::from_secs(self.state.config.session.heartbeat_interval_secs);
        let timeout = Duration::from_secs(self.state.config.session.client_timeout_secs);
        ctx.run_interval(interval, move |act, ctx| {
            if Instant::now().duration_since(act.last_heartbeat) > timeout {
                warn!(session_id = %act.session_id, "WebSocket heartbeat timeout, closing connection");
                ctx.stop();
            } else {
                ctx.ping(b"");
            }
        });
    }

    fn stopped(&mut self, _ctx: &mut Self::Context) {
        let (duration_secs, peer) = self
            .state
            .registry
            .remove(&self.session_id)
            .map(|entry| ((chrono::Utc::now() - entry.opened_at).num_seconds(), entry.peer))
            .unwrap_or((0, None));
        let active_sessions = self.state.registry.active_count();

        // Closing cancels a pending finalize and skips queued turns; an
        // in-flight reply is left to finish on its own.
        if let Some(session) = self.session.take() {
            actix::spawn(async move {
                let session_id = session.id();
                let summary = session.close().await;
                info!(
                    %session_id,
                    peer = peer.as_deref().unwrap_or("unknown"),
                    duration_secs,
                    active_sessions,
                    windows = summary.windows,
                    utterances = summary.utterances,
                    text_messages = summary.text_messages,
                    "WebSocket connection stopped"
                );
            });
        }
    }
}

impl StreamHandler<Result<ws::Message, ws::ProtocolError>> for VoiceSocket {
    fn handle(&mut self, msg: Result<ws::Message, ws::ProtocolError>, ctx: &mut Self::Context) {
        match msg {
            Ok(ws::Message::Binary(data)) => {
                self.last_heartbeat = Instant::now();
                let decoded = ClientInput::from_binary(&data, self.settings.encoding);
                self.forward(decoded, ctx);
            }
            Ok(ws::Message::Text(text)) => {
                self.last_heartbeat = Instant::now();
                let decoded = ClientInput::from_text(&text, self.settings.encoding);
                self.forward(decoded, ctx);
            }
            Ok(ws::Message::Ping(data)) => {
                self.last_heartbeat = Instant::now();
                ctx.pong(&data);
            }
            Ok(ws::Message::Pong(_)) => {
                self.last_heartbeat = Instant::now();
            }
            Ok(ws::Message::Close(reason)) => {
                info!(session_id = %self.session_id, "WebSocket closed by client: {:?}", reason);
                ctx.close(reason);
                ctx.stop();
            }
            Ok(ws::Message::Continuation(_)) => {
                warn!(session_id = %self.session_id, "Received unexpected continuation frame");
            }
            Ok(ws::Message::Nop) => {}
            Err(err) => {
                error!(session_id = %self.session_id, "WebSocket protocol error: {}", err);
                ctx.stop();
            }
        }
    }
}

impl Handler<Outbound> for VoiceSocket {
    type Result = ();

    fn handle(&mut self, msg: Outbound, ctx: &mut Self::Context) {
        match msg.0 {
            OutboundFrame::Event(event) => match serde_json::to_string(&event) {
                Ok(json) => ctx.text(json),
                Err(err) => error!("Failed to serialize server event: {}", err),
            },
            OutboundFrame::Audio(bytes) => ctx.binary(bytes),
        }
    }
}

/// Closes the connection right after the upgrade with a policy violation.
struct RejectedSocket;

impl Actor for RejectedSocket {
    type Context = ws::WebsocketContext<Self>;

    fn started(&mut self, ctx: &mut Self::Context) {
        ctx.close(Some(ws::CloseReason {
            code: ws::CloseCode::Policy,
            description: Some("invalid token".to_string()),
        }));
        ctx.stop();
    }
}

impl StreamHandler<Result<ws::Message, ws::ProtocolError>> for RejectedSocket {
    fn handle(&mut self, _msg: Result<ws::Message, ws::ProtocolError>, ctx: &mut Self::Context) {
        ctx.stop();
    }
}

#[derive(Debug, Deserialize)]
pub struct ConnectQuery {
    token: Option<String>,
}

fn token_accepted(expected: Option<&str>, presented: Option<&str>) -> bool {
    match expected {
        None => true,
        Some(expected) => presented == Some(expected),
    }
}

/// WebSocket endpoint handler.
///
/// ## HTTP to WebSocket Upgrade:
/// Admission (token, session limit) happens here, before the upgrade; the
/// conversation itself is handled by the [`VoiceSocket`] actor.
pub async fn voice_websocket(
    req: HttpRequest,
    stream: web::Payload,
    query: web::Query<ConnectQuery>,
    state: web::Data<AppState>,
) -> Result<HttpResponse, actix_web::Error> {
    let peer = req.connection_info().peer_addr().map(str::to_string);
    debug!("New WebSocket connection request from: {:?}", peer);

    let expected = state.config.session.access_token.as_deref();
    if !token_accepted(expected, query.token.as_deref()) {
        warn!("Rejecting WebSocket connection from {:?}: invalid token", peer);
        state.record(|m| m.sessions_rejected += 1);
        return ws::start(RejectedSocket, &req, stream);
    }

    let session_id = state.registry.register(peer).map_err(|err: AppError| {
        warn!("Refusing WebSocket connection: {}", err);
        state.record(|m| m.sessions_rejected += 1);
        err
    })?;

    let socket = VoiceSocket::new(session_id, state.get_ref().clone());
    match ws::start(socket, &req, stream) {
        Ok(response) => {
            state.record(|m| m.sessions_opened += 1);
            Ok(response)
        }
        Err(err) => {
            state.registry.remove(&session_id);
            Err(err)
        }
    }
}
