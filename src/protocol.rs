//! # Session Wire Protocol
//!
//! Every inbound websocket frame is decoded once, here, into a [`ClientInput`].
//! Everything behind this boundary works with typed values only.
//!
//! ## Client → Server:
//! - **Binary frame**: raw little-endian samples in the configured encoding
//! - **`{"type": "audio_chunk", "data": "<base64 samples>"}`**
//! - **`{"type": "text_message", "data": "<text>"}`**: skips VAD and transcription
//! - **Any other text frame**: treated as base64 raw samples
//!
//! ## Server → Client:
//! - **`{"type": "user_transcript", "data": "..."}`**: once per transcribed utterance
//! - **`{"type": "ai_text_chunk", "data": "..."}`**: one per language-model delta
//! - **`{"type": "tts_start"}` / `{"type": "tts_end"}`**: bracket one reply's audio
//! - **Binary frames**: synthesized audio, in sentence order

use crate::audio::framer::decode_samples;
use crate::audio::SampleEncoding;
use crate::error::{MalformedInput, TransportError};
use actix_web::web::Bytes;
use async_trait::async_trait;
use base64::Engine;
use serde::{Deserialize, Serialize};

/// Tagged JSON messages a client may send.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ClientMessage {
    AudioChunk { data: String },
    TextMessage { data: String },
}

/// A decoded inbound frame.
#[derive(Debug, Clone, PartialEq)]
pub enum ClientInput {
    Audio(Vec<f32>),
    Text(String),
}

impl ClientInput {
    pub fn from_binary(data: &[u8], encoding: SampleEncoding) -> Result<Self, MalformedInput> {
        decode_samples(data, encoding).map(ClientInput::Audio)
    }

    pub fn from_text(text: &str, encoding: SampleEncoding) -> Result<Self, MalformedInput> {
        let trimmed = text.trim();
        if trimmed.is_empty() {
            return Err(MalformedInput::Empty);
        }

        if trimmed.starts_with('{') {
            let message: ClientMessage = serde_json::from_str(trimmed)
                .map_err(|e| MalformedInput::InvalidJson(e.to_string()))?;
            return match message {
                ClientMessage::AudioChunk { data } => decode_base64_samples(&data, encoding),
                ClientMessage::TextMessage { data } => Ok(ClientInput::Text(data)),
            };
        }

        decode_base64_samples(trimmed, encoding)
    }
}

fn decode_base64_samples(data: &str, encoding: SampleEncoding) -> Result<ClientInput, MalformedInput> {
    let bytes = base64::engine::general_purpose::STANDARD
        .decode(data.trim())
        .map_err(|e| MalformedInput::InvalidBase64(e.to_string()))?;
    ClientInput::from_binary(&bytes, encoding)
}

/// Tagged JSON events sent to the client.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ServerEvent {
    UserTranscript { data: String },
    AiTextChunk { data: String },
    TtsStart,
    TtsEnd,
}

/// One outbound websocket frame.
#[derive(Debug, Clone, PartialEq)]
pub enum OutboundFrame {
    Event(ServerEvent),
    Audio(Bytes),
}

/// Where a session writes its outbound frames.
///
/// Sends resolve once the frame is handed to the connection, so awaiting each
/// send keeps frames in call order.
#[async_trait]
pub trait ClientSink: Send + Sync {
    async fn send(&self, frame: OutboundFrame) -> Result<(), TransportError>;
}
