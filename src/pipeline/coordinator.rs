//! Producer/consumer coordination for one reply.
//!
//! ## Guarantees:
//! - `ai_text_chunk` events go out in token order, unbuffered
//! - audio for sentence *i* is sent in full before any audio of sentence *i+1*
//! - `tts_end` is the last frame of the pipeline, whatever failed
//! - the consumer always sees `TextSegment::End`; a failed language model is
//!   replaced by one fallback sentence
//! - every wait on an upstream service is bounded by the idle timeout, so a
//!   stalled stream fails the same way a broken one does
//!
//! Producer and consumer are two futures joined with `tokio::join!` on the
//! caller's task; neither outlives [`Pipeline::run`].

use crate::error::{UpstreamError, UpstreamService};
use crate::pipeline::sentence::SentenceSegmenter;
use crate::protocol::{ClientSink, OutboundFrame, ServerEvent};
use crate::services::{with_idle_timeout, Collaborators};
use crate::session::history::{ConversationHistory, ConversationTurn, Role};
use futures_util::StreamExt;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tracing::{debug, error, warn};

/// Unit of work on the sentence channel.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TextSegment {
    Sentence(String),
    /// Terminal sentinel; nothing follows it.
    End,
}

#[derive(Debug)]
enum ConsumerOutcome {
    Finished { sentences: usize },
    Aborted { sentences: usize, reason: String },
}

/// What happened during one pipeline run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PipelineReport {
    /// Full assistant reply, `None` when the language model failed.
    pub reply: Option<String>,
    pub sentences_spoken: usize,
    /// Why the consumer stopped early, if it did.
    pub consumer_error: Option<String>,
}

impl PipelineReport {
    pub fn succeeded(&self) -> bool {
        self.reply.is_some() && self.consumer_error.is_none()
    }
}

pub struct Pipeline {
    collaborators: Collaborators,
    history: ConversationHistory,
    sink: Arc<dyn ClientSink>,
    fallback_reply: String,
    channel_capacity: usize,
    idle_timeout: Duration,
}

impl Pipeline {
    pub fn new(
        collaborators: Collaborators,
        history: ConversationHistory,
        sink: Arc<dyn ClientSink>,
        fallback_reply: String,
        channel_capacity: usize,
        idle_timeout: Duration,
    ) -> Self {
        Self {
            collaborators,
            history,
            sink,
            fallback_reply,
            channel_capacity: channel_capacity.max(1),
            idle_timeout,
        }
    }

    /// Generate and speak the reply to the current history.
    pub async fn run(&self) -> PipelineReport {
        let (tx, rx) = mpsc::channel(self.channel_capacity);

        let (reply, consumed) = tokio::join!(self.produce(tx), self.consume(rx));

        let (sentences_spoken, consumer_error) = match consumed {
            ConsumerOutcome::Finished { sentences } => (sentences, None),
            ConsumerOutcome::Aborted { sentences, reason } => {
                // Sent only now so that no producer text chunk can follow it.
                self.emit(OutboundFrame::Event(ServerEvent::TtsEnd)).await;
                (sentences, Some(reason))
            }
        };

        PipelineReport {
            reply,
            sentences_spoken,
            consumer_error,
        }
    }

    async fn produce(&self, tx: mpsc::Sender<TextSegment>) -> Option<String> {
        let mut segmenter = SentenceSegmenter::new();
        let mut reply = String::new();

        let streamed = self.stream_reply(&mut segmenter, &mut reply, &tx).await;

        if let Some(rest) = segmenter.finish() {
            push(&tx, TextSegment::Sentence(rest)).await;
        }
        if let Err(e) = &streamed {
            error!("Language model failed, speaking fallback reply: {}", e);
            push(&tx, TextSegment::Sentence(self.fallback_reply.clone())).await;
        }
        push(&tx, TextSegment::End).await;

        streamed.ok()?;
        self.history
            .append(ConversationTurn::new(Role::Assistant, reply.clone()));
        self.collaborators
            .conversation_log
            .append(Role::Assistant, &reply);
        Some(reply)
    }

    async fn stream_reply(
        &self,
        segmenter: &mut SentenceSegmenter,
        reply: &mut String,
        tx: &mpsc::Sender<TextSegment>,
    ) -> Result<(), UpstreamError> {
        let service = UpstreamService::LanguageModel;
        let request = self.collaborators.language_model.stream_reply(self.history.snapshot());
        let mut deltas = with_idle_timeout(self.idle_timeout, service, request).await??;

        while let Some(delta) = with_idle_timeout(self.idle_timeout, service, deltas.next()).await? {
            let delta = delta?;
            reply.push_str(&delta);
            self.emit(OutboundFrame::Event(ServerEvent::AiTextChunk {
                data: delta.clone(),
            }))
            .await;
            for sentence in segmenter.push(&delta) {
                push(tx, TextSegment::Sentence(sentence)).await;
            }
        }
        Ok(())
    }

    async fn consume(&self, mut rx: mpsc::Receiver<TextSegment>) -> ConsumerOutcome {
        let mut sentences = 0;

        if let Err(e) = self
            .sink
            .send(OutboundFrame::Event(ServerEvent::TtsStart))
            .await
        {
            return ConsumerOutcome::Aborted {
                sentences,
                reason: e.to_string(),
            };
        }

        while let Some(segment) = rx.recv().await {
            let text = match segment {
                TextSegment::End => break,
                TextSegment::Sentence(text) => text,
            };

            if let Err(reason) = self.speak(&text).await {
                warn!(sentence = sentences, "Speech output aborted: {}", reason);
                return ConsumerOutcome::Aborted { sentences, reason };
            }
            sentences += 1;
        }

        self.emit(OutboundFrame::Event(ServerEvent::TtsEnd)).await;
        ConsumerOutcome::Finished { sentences }
    }

    /// Synthesize one sentence and send every audio chunk before returning.
    async fn speak(&self, text: &str) -> Result<(), String> {
        let service = UpstreamService::Synthesis;
        let request = self.collaborators.synthesizer.synthesize(text);
        let mut chunks = with_idle_timeout(self.idle_timeout, service, request)
            .await
            .and_then(|result| result)
            .map_err(|e| e.to_string())?;

        let mut sent = 0usize;
        while let Some(chunk) = with_idle_timeout(self.idle_timeout, service, chunks.next())
            .await
            .map_err(|e| e.to_string())?
        {
            let chunk = chunk.map_err(|e| e.to_string())?;
            self.sink
                .send(OutboundFrame::Audio(chunk))
                .await
                .map_err(|e| e.to_string())?;
            sent += 1;
        }
        debug!(chunks = sent, chars = text.len(), "Sentence spoken");
        Ok(())
    }

    async fn emit(&self, frame: OutboundFrame) {
        if let Err(e) = self.sink.send(frame).await {
            debug!("Dropping outbound frame: {}", e);
        }
    }
}

// A closed channel means the consumer already gave up; nothing left to deliver.
async fn push(tx: &mpsc::Sender<TextSegment>, segment: TextSegment) {
    let _ = tx.send(segment).await;
}
