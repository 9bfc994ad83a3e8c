//! Per-session turn worker.
//!
//! User turns are handled one at a time, in arrival order: transcription (for
//! spoken turns), then one full pipeline run. This is what keeps a session to
//! at most one active pipeline.

use crate::pipeline::{Pipeline, PipelineReport};
use crate::protocol::{ClientSink, OutboundFrame, ServerEvent};
use crate::error::UpstreamService;
use crate::services::{with_idle_timeout, Collaborators};
use crate::session::history::{ConversationHistory, ConversationTurn, Role};
use crate::session::SessionSettings;
use crate::state::{record, AppMetrics};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, RwLock};
use std::time::Instant;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};
use uuid::Uuid;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TurnRequest {
    /// Finalized utterance as a WAV payload.
    Utterance(Vec<u8>),
    /// Typed text; skips transcription and is not echoed back.
    Text(String),
}

pub struct TurnWorker {
    pub(crate) session_id: Uuid,
    pub(crate) collaborators: Collaborators,
    pub(crate) history: ConversationHistory,
    pub(crate) sink: Arc<dyn ClientSink>,
    pub(crate) settings: SessionSettings,
    pub(crate) metrics: Arc<RwLock<AppMetrics>>,
    /// Set when the connection is gone; queued turns are then skipped.
    pub(crate) closing: Arc<AtomicBool>,
}

impl TurnWorker {
    pub async fn run(self, mut requests: mpsc::UnboundedReceiver<TurnRequest>) {
        let mut turn = 0u64;
        while let Some(request) = requests.recv().await {
            if self.closing.load(Ordering::Acquire) {
                debug!(session_id = %self.session_id, "Session closed, skipping queued turns");
                break;
            }
            turn += 1;
            self.handle(turn, request).await;
        }
    }

    async fn handle(&self, turn: u64, request: TurnRequest) {
        let text = match request {
            TurnRequest::Utterance(wav) => match self.transcribe(turn, wav).await {
                Some(text) => text,
                None => return,
            },
            TurnRequest::Text(text) => text.trim().to_string(),
        };
        if text.is_empty() {
            return;
        }

        self.collaborators.conversation_log.append(Role::User, &text);
        self.history.append(ConversationTurn::new(Role::User, text));

        let started = Instant::now();
        let pipeline = Pipeline::new(
            self.collaborators.clone(),
            self.history.clone(),
            self.sink.clone(),
            self.settings.fallback_reply.clone(),
            self.settings.segment_channel_capacity,
            self.settings.upstream_idle_timeout,
        );
        let report = pipeline.run().await;
        self.finish_turn(turn, &report, started);
    }

    /// Transcribe a spoken turn. Failures and empty transcripts drop the turn.
    async fn transcribe(&self, turn: u64, wav: Vec<u8>) -> Option<String> {
        let request = self.collaborators.transcriber.transcribe(wav);
        let result = with_idle_timeout(
            self.settings.upstream_idle_timeout,
            UpstreamService::Transcription,
            request,
        )
        .await
        .and_then(|result| result);
        let text = match result {
            Ok(text) => text.trim().to_string(),
            Err(e) => {
                warn!(session_id = %self.session_id, turn, "Dropping utterance: {}", e);
                return None;
            }
        };
        if text.is_empty() {
            debug!(session_id = %self.session_id, turn, "Empty transcript, nothing to answer");
            return None;
        }

        info!(session_id = %self.session_id, turn, "User said: {}", text);
        let event = OutboundFrame::Event(ServerEvent::UserTranscript { data: text.clone() });
        if let Err(e) = self.sink.send(event).await {
            debug!(session_id = %self.session_id, "Transcript not delivered: {}", e);
        }
        Some(text)
    }

    fn finish_turn(&self, turn: u64, report: &PipelineReport, started: Instant) {
        let succeeded = report.succeeded();
        record(&self.metrics, |m| {
            if succeeded {
                m.turns_completed += 1;
            } else {
                m.turns_failed += 1;
            }
        });

        info!(
            session_id = %self.session_id,
            turn,
            segments = report.sentences_spoken,
            elapsed_ms = started.elapsed().as_millis() as u64,
            succeeded,
            "Turn finished"
        );
    }
}
