//! Streaming text-to-speech (ElevenLabs-style `POST {base}/{voice_id}/stream`).
//!
//! The response body is encoded audio; each network chunk is forwarded as-is.

use crate::error::{UpstreamError, UpstreamService};
use crate::services::{check_status, AudioChunkStream, SpeechSynthesizer};
use async_trait::async_trait;
use futures_util::StreamExt;
use serde::Serialize;
use tracing::debug;

#[derive(Debug, Serialize)]
struct SynthesisRequest<'a> {
    text: &'a str,
    model_id: &'a str,
}

pub struct ElevenLabsSynthesizer {
    client: reqwest::Client,
    base_url: String,
    api_key: String,
    voice_id: String,
    model_id: String,
}

impl ElevenLabsSynthesizer {
    pub fn new(
        client: reqwest::Client,
        base_url: String,
        api_key: String,
        voice_id: String,
        model_id: String,
    ) -> Self {
        Self {
            client,
            base_url,
            api_key,
            voice_id,
            model_id,
        }
    }

    fn stream_url(&self) -> String {
        format!("{}/{}/stream", self.base_url.trim_end_matches('/'), self.voice_id)
    }
}

#[async_trait]
impl SpeechSynthesizer for ElevenLabsSynthesizer {
    async fn synthesize(&self, text: &str) -> Result<AudioChunkStream, UpstreamError> {
        let request = SynthesisRequest {
            text,
            model_id: &self.model_id,
        };

        let response = self
            .client
            .post(self.stream_url())
            .header("xi-api-key", &self.api_key)
            .json(&request)
            .send()
            .await
            .map_err(|e| UpstreamError::new(UpstreamService::Synthesis, e))?;
        let response = check_status(response, UpstreamService::Synthesis).await?;

        debug!(chars = text.len(), voice = %self.voice_id, "Synthesis stream established");
        Ok(response
            .bytes_stream()
            .map(|chunk| chunk.map_err(|e| UpstreamError::new(UpstreamService::Synthesis, e)))
            .boxed())
    }
}
