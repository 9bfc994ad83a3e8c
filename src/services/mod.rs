//! # External Collaborators
//!
//! The session core only talks to the outside world through the traits below.
//! Default implementations call hosted HTTP APIs:
//!
//! - **Transcription**: multipart WAV upload ([`transcription::SarvamTranscriber`])
//! - **Language model**: OpenAI-compatible streaming chat ([`language_model::ChatCompletionsModel`])
//! - **Synthesis**: streaming text-to-speech ([`synthesis::ElevenLabsSynthesizer`])
//! - **Conversation log**: daily CSV files ([`conversation_log::CsvConversationLog`])
//!
//! Streams are finite and not restartable; any item may be an error, after which
//! the stream should be treated as finished.

pub mod conversation_log;
pub mod language_model;
pub mod synthesis;
pub mod transcription;

use crate::config::{AppConfig, ServiceCredentials};
use crate::error::{UpstreamError, UpstreamService};
use crate::session::history::{ConversationTurn, Role};
use actix_web::web::Bytes;
use async_trait::async_trait;
use futures_util::stream::BoxStream;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

pub type TextDeltaStream = BoxStream<'static, Result<String, UpstreamError>>;
pub type AudioChunkStream = BoxStream<'static, Result<Bytes, UpstreamError>>;

#[async_trait]
pub trait Transcriber: Send + Sync {
    /// Transcribe one WAV payload. An empty string means nothing was heard.
    async fn transcribe(&self, wav: Vec<u8>) -> Result<String, UpstreamError>;
}

#[async_trait]
pub trait LanguageModel: Send + Sync {
    /// Stream the assistant reply to the full conversation so far.
    async fn stream_reply(&self, history: Vec<ConversationTurn>) -> Result<TextDeltaStream, UpstreamError>;
}

#[async_trait]
pub trait SpeechSynthesizer: Send + Sync {
    async fn synthesize(&self, text: &str) -> Result<AudioChunkStream, UpstreamError>;
}

/// Fire-and-forget sink for finished turns. Implementations swallow their own failures.
pub trait ConversationLogger: Send + Sync {
    fn append(&self, speaker: Role, text: &str);
}

/// The collaborator set handed to every session.
#[derive(Clone)]
pub struct Collaborators {
    pub transcriber: Arc<dyn Transcriber>,
    pub language_model: Arc<dyn LanguageModel>,
    pub synthesizer: Arc<dyn SpeechSynthesizer>,
    pub conversation_log: Arc<dyn ConversationLogger>,
}

impl Collaborators {
    /// Build the HTTP-backed collaborators from configuration and credentials.
    pub fn from_config(config: &AppConfig, credentials: &ServiceCredentials) -> anyhow::Result<Self> {
        let client = reqwest::Client::builder()
            .connect_timeout(Duration::from_secs(config.services.connect_timeout_secs))
            .build()?;
        let services = &config.services;

        let conversation_log: Arc<dyn ConversationLogger> = match &config.logging.conversation_log_dir {
            Some(dir) => Arc::new(conversation_log::CsvConversationLog::new(dir)),
            None => Arc::new(conversation_log::NullConversationLog),
        };

        Ok(Self {
            transcriber: Arc::new(transcription::SarvamTranscriber::new(
                client.clone(),
                services.transcription_url.clone(),
                credentials.transcription_key.clone(),
                services.transcription_model.clone(),
                services.transcription_language.clone(),
            )),
            language_model: Arc::new(language_model::ChatCompletionsModel::new(
                client.clone(),
                services.chat_url.clone(),
                credentials.chat_key.clone(),
                services.chat_model.clone(),
            )),
            synthesizer: Arc::new(synthesis::ElevenLabsSynthesizer::new(
                client,
                services.tts_url.clone(),
                credentials.tts_key.clone(),
                services.tts_voice_id.clone(),
                services.tts_model_id.clone(),
            )),
            conversation_log,
        })
    }
}

/// Await one step of an upstream call (the call itself or the next stream item).
/// A step that takes longer than `limit` fails as an [`UpstreamError`].
pub(crate) async fn with_idle_timeout<F>(
    limit: Duration,
    service: UpstreamService,
    step: F,
) -> Result<F::Output, UpstreamError>
where
    F: Future,
{
    tokio::time::timeout(limit, step)
        .await
        .map_err(|_| UpstreamError::new(service, format!("no data for {}ms", limit.as_millis())))
}

/// Turn a non-success response into an error carrying the body text.
pub(crate) async fn check_status(
    response: reqwest::Response,
    service: UpstreamService,
) -> Result<reqwest::Response, UpstreamError> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }
    let body = response
        .text()
        .await
        .unwrap_or_else(|_| "Unknown error".to_string());
    Err(UpstreamError::new(service, format!("HTTP {}: {}", status, body)))
}
