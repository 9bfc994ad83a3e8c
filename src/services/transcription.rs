//! Speech-to-text over a multipart upload API (Sarvam-style).

use crate::error::{UpstreamError, UpstreamService};
use crate::services::{check_status, Transcriber};
use async_trait::async_trait;
use reqwest::multipart::{Form, Part};
use serde::Deserialize;
use tracing::debug;

#[derive(Debug, Deserialize)]
struct TranscriptionResponse {
    #[serde(default)]
    transcript: String,
}

pub struct SarvamTranscriber {
    client: reqwest::Client,
    url: String,
    api_key: String,
    model: String,
    language_code: String,
}

impl SarvamTranscriber {
    pub fn new(
        client: reqwest::Client,
        url: String,
        api_key: String,
        model: String,
        language_code: String,
    ) -> Self {
        Self {
            client,
            url,
            api_key,
            model,
            language_code,
        }
    }
}

#[async_trait]
impl Transcriber for SarvamTranscriber {
    async fn transcribe(&self, wav: Vec<u8>) -> Result<String, UpstreamError> {
        let upstream = |e: reqwest::Error| UpstreamError::new(UpstreamService::Transcription, e);

        let payload_len = wav.len();
        let file = Part::bytes(wav)
            .file_name("utterance.wav")
            .mime_str("audio/wav")
            .map_err(upstream)?;
        let form = Form::new()
            .part("file", file)
            .text("model", self.model.clone())
            .text("language_code", self.language_code.clone());

        let response = self
            .client
            .post(&self.url)
            .header("api-subscription-key", &self.api_key)
            .multipart(form)
            .send()
            .await
            .map_err(upstream)?;
        let response = check_status(response, UpstreamService::Transcription).await?;

        let body: TranscriptionResponse = response.json().await.map_err(upstream)?;
        debug!(bytes = payload_len, chars = body.transcript.len(), "Transcription received");
        Ok(body.transcript.trim().to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_transcript_field_means_silence() {
        let body: TranscriptionResponse =
            serde_json::from_str(r#"{"request_id":"abc","language_code":"en-IN"}"#).unwrap();
        assert!(body.transcript.is_empty());

        let body: TranscriptionResponse =
            serde_json::from_str(r#"{"transcript":"hello world"}"#).unwrap();
        assert_eq!(body.transcript, "hello world");
    }
}
