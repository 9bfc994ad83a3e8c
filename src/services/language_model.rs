//! Streaming chat completions (OpenAI-compatible, e.g. Mistral).
//!
//! The response is a server-sent event stream:
//!
//! ```text
//! data: {"choices":[{"delta":{"content":"Hel"}}]}
//! data: {"choices":[{"delta":{"content":"lo"}}]}
//! data: [DONE]
//! ```
//!
//! Lines are parsed as they complete; a network chunk may end mid-line.

use crate::error::{UpstreamError, UpstreamService};
use crate::services::{check_status, LanguageModel, TextDeltaStream};
use crate::session::history::ConversationTurn;
use actix_web::web::Bytes;
use async_trait::async_trait;
use futures_util::stream::{self, BoxStream, Stream, StreamExt};
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::fmt;
use tracing::{debug, info};

#[derive(Debug, Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: &'a [ConversationTurn],
    stream: bool,
}

#[derive(Debug, Deserialize)]
struct StreamChunk {
    #[serde(default)]
    choices: Vec<StreamChoice>,
}

#[derive(Debug, Deserialize)]
struct StreamChoice {
    #[serde(default)]
    delta: Delta,
}

#[derive(Debug, Default, Deserialize)]
struct Delta {
    content: Option<String>,
}

/// One parsed server-sent event line.
#[derive(Debug, PartialEq, Eq)]
pub enum SseLine {
    Delta(String),
    Done,
    /// Blank lines, comments, role-only deltas and unparseable chunks.
    Skip,
}

pub fn parse_sse_line(line: &str) -> SseLine {
    let line = line.trim();
    let data = match line.strip_prefix("data:") {
        Some(data) => data.trim_start(),
        None => return SseLine::Skip,
    };
    if data == "[DONE]" {
        return SseLine::Done;
    }

    match serde_json::from_str::<StreamChunk>(data) {
        Ok(chunk) => match chunk.choices.into_iter().next().and_then(|c| c.delta.content) {
            Some(content) if !content.is_empty() => SseLine::Delta(content),
            _ => SseLine::Skip,
        },
        Err(e) => {
            debug!("Failed to parse SSE chunk: {} - data: {}", e, data);
            SseLine::Skip
        }
    }
}

struct SseState<E> {
    body: BoxStream<'static, Result<Bytes, E>>,
    buffer: Vec<u8>,
    pending: VecDeque<String>,
    done: bool,
}

impl<E> SseState<E> {
    fn feed(&mut self, bytes: &[u8]) {
        if self.done {
            return;
        }
        self.buffer.extend_from_slice(bytes);
        while let Some(pos) = self.buffer.iter().position(|b| *b == b'\n') {
            let line: Vec<u8> = self.buffer.drain(..=pos).collect();
            if self.handle_line(&line) {
                return;
            }
        }
    }

    fn flush(&mut self) {
        if !self.done && !self.buffer.is_empty() {
            let line = std::mem::take(&mut self.buffer);
            self.handle_line(&line);
        }
        self.done = true;
    }

    /// Returns true once the stream signalled completion.
    fn handle_line(&mut self, line: &[u8]) -> bool {
        match parse_sse_line(&String::from_utf8_lossy(line)) {
            SseLine::Delta(delta) => self.pending.push_back(delta),
            SseLine::Done => {
                self.done = true;
                self.buffer.clear();
                return true;
            }
            SseLine::Skip => {}
        }
        false
    }
}

/// Turn a raw SSE byte stream into a stream of text deltas.
pub fn delta_stream<S, E>(body: S) -> TextDeltaStream
where
    S: Stream<Item = Result<Bytes, E>> + Send + 'static,
    E: fmt::Display + Send + 'static,
{
    let state = SseState {
        body: body.boxed(),
        buffer: Vec::new(),
        pending: VecDeque::new(),
        done: false,
    };

    stream::unfold(state, |mut state| async move {
        loop {
            if let Some(delta) = state.pending.pop_front() {
                return Some((Ok(delta), state));
            }
            if state.done {
                return None;
            }
            match state.body.next().await {
                Some(Ok(bytes)) => state.feed(&bytes),
                Some(Err(e)) => {
                    state.done = true;
                    let err = UpstreamError::new(UpstreamService::LanguageModel, e);
                    return Some((Err(err), state));
                }
                None => state.flush(),
            }
        }
    })
    .boxed()
}

pub struct ChatCompletionsModel {
    client: reqwest::Client,
    url: String,
    api_key: String,
    model: String,
}

impl ChatCompletionsModel {
    pub fn new(client: reqwest::Client, url: String, api_key: String, model: String) -> Self {
        Self {
            client,
            url,
            api_key,
            model,
        }
    }
}

#[async_trait]
impl LanguageModel for ChatCompletionsModel {
    async fn stream_reply(&self, history: Vec<ConversationTurn>) -> Result<TextDeltaStream, UpstreamError> {
        let request = ChatRequest {
            model: &self.model,
            messages: &history,
            stream: true,
        };

        let response = self
            .client
            .post(&self.url)
            .bearer_auth(&self.api_key)
            .json(&request)
            .send()
            .await
            .map_err(|e| UpstreamError::new(UpstreamService::LanguageModel, e))?;
        let response = check_status(response, UpstreamService::LanguageModel).await?;

        info!(model = %self.model, turns = history.len(), "Chat stream established");
        Ok(delta_stream(response.bytes_stream()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn chunked(parts: &[&'static str]) -> TextDeltaStream {
        let items: Vec<Result<Bytes, std::io::Error>> =
            parts.iter().map(|p| Ok(Bytes::from_static(p.as_bytes()))).collect();
        delta_stream(stream::iter(items))
    }

    #[test]
    fn parses_sse_lines() {
        assert_eq!(
            parse_sse_line(r#"data: {"choices":[{"delta":{"content":"Hi"}}]}"#),
            SseLine::Delta("Hi".to_string())
        );
        assert_eq!(parse_sse_line("data: [DONE]"), SseLine::Done);
        assert_eq!(parse_sse_line(""), SseLine::Skip);
        assert_eq!(parse_sse_line(": keep-alive"), SseLine::Skip);
        assert_eq!(
            parse_sse_line(r#"data: {"choices":[{"delta":{"role":"assistant"}}]}"#),
            SseLine::Skip
        );
        assert_eq!(parse_sse_line("data: {broken"), SseLine::Skip);
    }

    #[tokio::test]
    async fn lines_split_across_chunks_are_reassembled() {
        let deltas: Vec<String> = chunked(&[
            "data: {\"choices\":[{\"delta\":{\"con",
            "tent\":\"Hel\"}}]}\n\ndata: {\"choices\":[{\"delta\":{\"content\":\"lo.\"}}]}\n",
            "data: [DONE]\n\ndata: {\"choices\":[{\"delta\":{\"content\":\"ignored\"}}]}\n",
        ])
        .map(|r| r.unwrap())
        .collect()
        .await;

        assert_eq!(deltas, vec!["Hel", "lo."]);
    }

    #[tokio::test]
    async fn trailing_line_without_newline_is_flushed() {
        let deltas: Vec<String> = chunked(&["data: {\"choices\":[{\"delta\":{\"content\":\"end\"}}]}"])
            .map(|r| r.unwrap())
            .collect()
            .await;
        assert_eq!(deltas, vec!["end"]);
    }

    #[tokio::test]
    async fn transport_error_ends_stream_with_error() {
        let items: Vec<Result<Bytes, std::io::Error>> = vec![
            Ok(Bytes::from_static(b"data: {\"choices\":[{\"delta\":{\"content\":\"a\"}}]}\n")),
            Err(std::io::Error::new(std::io::ErrorKind::ConnectionReset, "reset")),
        ];
        let results: Vec<_> = delta_stream(stream::iter(items)).collect().await;

        assert_eq!(results.len(), 2);
        assert_eq!(results[0], Ok("a".to_string()));
        assert_eq!(results[1].as_ref().map_err(|e| e.service), Err(UpstreamService::LanguageModel));
    }
}
