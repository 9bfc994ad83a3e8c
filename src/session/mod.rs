//! # Session Manager
//!
//! One session per connection. A session owns its conversation history, VAD
//! state, the pending finalize timer and the turn worker that runs pipelines.
//!
//! ## Tasks per session:
//! - **Session loop**: handles inbound input and timer expiries sequentially,
//!   so VAD state is never touched concurrently
//! - **Finalize timer**: at most one; sleeps out the pause threshold and posts
//!   `FinalizeDue(ticket)` back to the loop. The loop re-validates the ticket
//!   against the segmenter, so a timer that lost a race with barge-in is a no-op.
//! - **Turn worker**: transcription and pipelines, one turn at a time
//!
//! ## Lifecycle:
//! 1. **Spawned** on connect: empty history (plus system prompt), `Idle` VAD
//! 2. **Running**: audio goes Framer → VAD → Segmenter; text goes straight to the worker
//! 3. **Closed** when the handle is dropped: the timer is cancelled, queued
//!    turns are skipped and an in-flight pipeline is left to finish on its own

pub mod history;
pub mod registry;
pub mod worker;

use crate::audio::assembler::UtteranceAssembler;
use crate::audio::framer::AudioFramer;
use crate::audio::segmenter::{FinalizeTicket, SegmenterAction, VadSegmenter};
use crate::audio::vad::{VadModel, VadStream};
use crate::audio::SampleEncoding;
use crate::config::AppConfig;
use crate::protocol::{ClientInput, ClientSink};
use crate::services::Collaborators;
use crate::state::{record, AppMetrics};
use history::ConversationHistory;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, RwLock};
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};
use uuid::Uuid;
use worker::{TurnRequest, TurnWorker};

/// Per-session tunables, taken from [`AppConfig`].
#[derive(Debug, Clone)]
pub struct SessionSettings {
    pub sample_rate: u32,
    pub window_samples: usize,
    pub encoding: SampleEncoding,
    pub pause_threshold: Duration,
    pub system_prompt: Option<String>,
    pub fallback_reply: String,
    pub segment_channel_capacity: usize,
    pub upstream_idle_timeout: Duration,
}

impl SessionSettings {
    pub fn from_config(config: &AppConfig) -> Self {
        Self {
            sample_rate: config.audio.sample_rate,
            window_samples: config.audio.window_samples,
            encoding: config.audio.encoding,
            pause_threshold: config.pause_threshold(),
            system_prompt: config.assistant.system_prompt.clone(),
            fallback_reply: config.assistant.fallback_reply.clone(),
            segment_channel_capacity: config.session.segment_channel_capacity,
            upstream_idle_timeout: config.upstream_idle_timeout(),
        }
    }
}

/// Shared dependencies injected into every session.
#[derive(Clone)]
pub struct SessionDeps {
    pub vad: Arc<dyn VadModel>,
    pub collaborators: Collaborators,
    pub settings: SessionSettings,
    pub metrics: Arc<RwLock<AppMetrics>>,
}

#[derive(Debug)]
enum SessionInput {
    Client(ClientInput),
    FinalizeDue(FinalizeTicket),
}

/// What a session did, reported when it closes.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SessionSummary {
    pub windows: u64,
    pub utterances: u64,
    pub text_messages: u64,
}

/// Owner's side of a running session. Dropping it closes the session.
pub struct SessionHandle {
    id: Uuid,
    input: mpsc::UnboundedSender<SessionInput>,
    task: JoinHandle<SessionSummary>,
}

impl SessionHandle {
    pub fn id(&self) -> Uuid {
        self.id
    }

    /// Queue one decoded client frame. Returns false once the session has stopped.
    pub fn submit(&self, input: ClientInput) -> bool {
        self.input.send(SessionInput::Client(input)).is_ok()
    }

    /// Close the session and wait for its loop to wind down.
    pub async fn close(self) -> SessionSummary {
        drop(self.input);
        self.task.await.unwrap_or_default()
    }
}

pub struct Session {
    id: Uuid,
    settings: SessionSettings,
    framer: AudioFramer,
    vad: Box<dyn VadStream>,
    segmenter: VadSegmenter,
    assembler: UtteranceAssembler,
    timer: Option<JoinHandle<()>>,
    // Weak so that pending timers do not keep the loop alive after disconnect.
    timer_tx: mpsc::WeakUnboundedSender<SessionInput>,
    turns: mpsc::UnboundedSender<TurnRequest>,
    closing: Arc<AtomicBool>,
    metrics: Arc<RwLock<AppMetrics>>,
    summary: SessionSummary,
}

impl Session {
    /// Start the session loop and its turn worker on the current runtime.
    pub fn spawn(id: Uuid, deps: SessionDeps, sink: Arc<dyn ClientSink>) -> SessionHandle {
        let (input_tx, input_rx) = mpsc::unbounded_channel();
        let (turn_tx, turn_rx) = mpsc::unbounded_channel();
        let closing = Arc::new(AtomicBool::new(false));

        let worker = TurnWorker {
            session_id: id,
            collaborators: deps.collaborators.clone(),
            history: ConversationHistory::new(deps.settings.system_prompt.as_deref()),
            sink,
            settings: deps.settings.clone(),
            metrics: deps.metrics.clone(),
            closing: closing.clone(),
        };
        tokio::spawn(worker.run(turn_rx));

        let session = Session {
            id,
            framer: AudioFramer::new(deps.settings.window_samples),
            vad: deps.vad.open_stream(),
            segmenter: VadSegmenter::new(),
            assembler: UtteranceAssembler::new(deps.settings.sample_rate),
            settings: deps.settings,
            timer: None,
            timer_tx: input_tx.downgrade(),
            turns: turn_tx,
            closing,
            metrics: deps.metrics,
            summary: SessionSummary::default(),
        };
        let task = tokio::spawn(session.run(input_rx));

        SessionHandle {
            id,
            input: input_tx,
            task,
        }
    }

    async fn run(mut self, mut input: mpsc::UnboundedReceiver<SessionInput>) -> SessionSummary {
        info!(session_id = %self.id, "Session started");

        while let Some(message) = input.recv().await {
            match message {
                SessionInput::Client(ClientInput::Audio(samples)) => self.on_audio(&samples),
                SessionInput::Client(ClientInput::Text(text)) => self.on_text(text),
                SessionInput::FinalizeDue(ticket) => self.on_finalize_due(ticket),
            }
        }

        self.shutdown();
        self.summary
    }

    fn on_audio(&mut self, samples: &[f32]) {
        for window in self.framer.push(samples) {
            self.summary.windows += 1;
            let event = self.vad.score(&window);
            if let Some(event) = event {
                debug!(session_id = %self.id, ?event, window = self.summary.windows, "Speech boundary");
            }

            match self.segmenter.push(window, event) {
                SegmenterAction::None => {}
                SegmenterAction::ArmFinalize(ticket) => self.arm_finalize(ticket),
                SegmenterAction::CancelFinalize => {
                    debug!(session_id = %self.id, "Speech resumed before endpoint, finalize cancelled");
                    self.cancel_finalize();
                }
            }
        }
    }

    fn on_text(&mut self, text: String) {
        let text = text.trim();
        if text.is_empty() {
            debug!(session_id = %self.id, "Ignoring empty text message");
            return;
        }
        self.summary.text_messages += 1;
        self.queue_turn(TurnRequest::Text(text.to_string()));
    }

    fn on_finalize_due(&mut self, ticket: FinalizeTicket) {
        let Some(utterance) = self.segmenter.finalize(ticket) else {
            debug!(session_id = %self.id, ?ticket, "Stale finalize ignored");
            return;
        };
        self.timer = None;

        let windows = utterance.windows.len();
        match self.assembler.finalize(utterance) {
            Ok(Some(wav)) => {
                self.summary.utterances += 1;
                record(&self.metrics, |m| m.utterances += 1);
                info!(session_id = %self.id, windows, bytes = wav.len(), "Utterance finalized");
                self.queue_turn(TurnRequest::Utterance(wav));
            }
            Ok(None) => {}
            Err(e) => warn!(session_id = %self.id, "Failed to encode utterance: {}", e),
        }
    }

    fn queue_turn(&self, request: TurnRequest) {
        if self.turns.send(request).is_err() {
            warn!(session_id = %self.id, "Turn worker has stopped, dropping turn");
        }
    }

    fn arm_finalize(&mut self, ticket: FinalizeTicket) {
        self.cancel_finalize();

        let tx = self.timer_tx.clone();
        let delay = self.settings.pause_threshold;
        self.timer = Some(tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            if let Some(tx) = tx.upgrade() {
                let _ = tx.send(SessionInput::FinalizeDue(ticket));
            }
        }));
    }

    fn cancel_finalize(&mut self) {
        if let Some(timer) = self.timer.take() {
            timer.abort();
        }
    }

    fn shutdown(&mut self) {
        self.cancel_finalize();
        self.closing.store(true, Ordering::Release);
        self.segmenter.reset();
        self.vad.reset();
        self.framer.reset();
        debug!(session_id = %self.id, "Session loop stopped");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audio::vad::VadEvent;
    use crate::audio::AudioWindow;
    use crate::error::{UpstreamError, UpstreamService};
    use crate::pipeline::coordinator::tests::{EchoSynth, MemoryLog, RecordingSink, Script, ScriptedModel};
    use crate::protocol::{OutboundFrame, ServerEvent};
    use crate::services::Transcriber;
    use crate::session::history::Role;
    use async_trait::async_trait;
    use std::collections::HashMap;
    use std::io::Cursor;
    use std::sync::Mutex;
    use tokio::time::Instant;

    const WINDOW: usize = 512;
    const WINDOW_MS: u64 = 32;

    /// Emits scripted events by window index.
    struct ScriptedVad {
        events: HashMap<usize, VadEvent>,
    }

    impl VadModel for ScriptedVad {
        fn open_stream(&self) -> Box<dyn VadStream> {
            Box::new(ScriptedVadStream {
                events: self.events.clone(),
                index: 0,
            })
        }
    }

    struct ScriptedVadStream {
        events: HashMap<usize, VadEvent>,
        index: usize,
    }

    impl VadStream for ScriptedVadStream {
        fn score(&mut self, _window: &AudioWindow) -> Option<VadEvent> {
            let event = self.events.get(&self.index).copied();
            self.index += 1;
            event
        }

        fn reset(&mut self) {
            self.index = 0;
        }
    }

    struct RecordingTranscriber {
        calls: Mutex<Vec<(Instant, Vec<u8>)>>,
        reply: Result<String, UpstreamError>,
    }

    impl RecordingTranscriber {
        fn replying(reply: Result<String, UpstreamError>) -> Self {
            Self {
                calls: Mutex::new(Vec::new()),
                reply,
            }
        }
    }

    #[async_trait]
    impl Transcriber for RecordingTranscriber {
        async fn transcribe(&self, wav: Vec<u8>) -> Result<String, UpstreamError> {
            self.calls.lock().unwrap().push((Instant::now(), wav));
            self.reply.clone()
        }
    }

    struct Fixture {
        handle: SessionHandle,
        sink: Arc<RecordingSink>,
        transcriber: Arc<RecordingTranscriber>,
        model: Arc<ScriptedModel>,
        log: Arc<MemoryLog>,
        metrics: Arc<RwLock<AppMetrics>>,
    }

    fn fixture(events: &[(usize, VadEvent)], transcript: Result<String, UpstreamError>) -> Fixture {
        fixture_with_model(events, transcript, Script::Deltas(vec!["Hi. ", "Nice to meet you."]))
    }

    fn fixture_with_model(
        events: &[(usize, VadEvent)],
        transcript: Result<String, UpstreamError>,
        script: Script,
    ) -> Fixture {
        let sink = Arc::new(RecordingSink::default());
        let transcriber = Arc::new(RecordingTranscriber::replying(transcript));
        let model = Arc::new(ScriptedModel::new(script));
        let log = Arc::new(MemoryLog::default());
        let metrics = Arc::new(RwLock::new(AppMetrics::default()));

        let deps = SessionDeps {
            vad: Arc::new(ScriptedVad {
                events: events.iter().copied().collect(),
            }),
            collaborators: Collaborators {
                transcriber: transcriber.clone(),
                language_model: model.clone(),
                synthesizer: Arc::new(EchoSynth::default()),
                conversation_log: log.clone(),
            },
            settings: SessionSettings {
                sample_rate: 16000,
                window_samples: WINDOW,
                encoding: SampleEncoding::F32Le,
                pause_threshold: Duration::from_millis(800),
                system_prompt: None,
                fallback_reply: "Sorry.".to_string(),
                segment_channel_capacity: 8,
                upstream_idle_timeout: Duration::from_secs(20),
            },
            metrics: metrics.clone(),
        };

        Fixture {
            handle: Session::spawn(Uuid::new_v4(), deps, sink.clone()),
            sink,
            transcriber,
            model,
            log,
            metrics,
        }
    }

    /// Submit `count` windows in real time, one every 32ms.
    async fn stream_windows(handle: &SessionHandle, count: usize) {
        for _ in 0..count {
            assert!(handle.submit(ClientInput::Audio(vec![0.1; WINDOW])));
            tokio::time::sleep(Duration::from_millis(WINDOW_MS)).await;
        }
    }

    fn transcripts(frames: &[OutboundFrame]) -> Vec<String> {
        frames
            .iter()
            .filter_map(|f| match f {
                OutboundFrame::Event(ServerEvent::UserTranscript { data }) => Some(data.clone()),
                _ => None,
            })
            .collect()
    }

    fn wav_samples(wav: &[u8]) -> usize {
        match wav::read(&mut Cursor::new(wav.to_vec())).unwrap().1 {
            wav::BitDepth::Sixteen(samples) => samples.len(),
            other => panic!("unexpected bit depth: {:?}", other),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn one_second_of_speech_then_silence_yields_one_turn() {
        // Speech from t=0 to t=1.0s (windows 0..=31), then one second of silence.
        let f = fixture(
            &[(0, VadEvent::Start), (31, VadEvent::End)],
            Ok("hello there".to_string()),
        );
        let start = Instant::now();

        stream_windows(&f.handle, 62).await;
        tokio::time::sleep(Duration::from_secs(2)).await;

        let calls = f.transcriber.calls.lock().unwrap().clone();
        assert_eq!(calls.len(), 1);
        let at = calls[0].0 - start;
        assert!(
            at >= Duration::from_millis(1750) && at <= Duration::from_millis(1850),
            "utterance finalized at {:?}",
            at
        );
        assert_eq!(wav_samples(&calls[0].1), 32 * WINDOW);

        let frames = f.sink.frames();
        assert_eq!(transcripts(&frames), vec!["hello there"]);
        assert_eq!(frames.last(), Some(&OutboundFrame::Event(ServerEvent::TtsEnd)));
        assert_eq!(
            frames
                .iter()
                .filter(|fr| **fr == OutboundFrame::Event(ServerEvent::TtsStart))
                .count(),
            1
        );

        let history_seen = f.model.calls.lock().unwrap().clone();
        assert_eq!(history_seen.len(), 1);
        assert_eq!(history_seen[0].last().map(|t| t.text.as_str()), Some("hello there"));
        assert_eq!(
            *f.log.rows.lock().unwrap(),
            vec![
                (Role::User, "hello there".to_string()),
                (Role::Assistant, "Hi. Nice to meet you.".to_string())
            ]
        );

        let metrics = f.metrics.read().unwrap().clone();
        assert_eq!(metrics.utterances, 1);
        assert_eq!(metrics.turns_completed, 1);

        let summary = f.handle.close().await;
        assert_eq!(summary.windows, 62);
        assert_eq!(summary.utterances, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn barge_in_within_pause_merges_into_one_utterance() {
        // End at window 10, speech resumes 9 windows (~0.3s) later, final end at 30.
        let f = fixture(
            &[
                (0, VadEvent::Start),
                (10, VadEvent::End),
                (19, VadEvent::Start),
                (30, VadEvent::End),
            ],
            Ok("one long thought".to_string()),
        );

        stream_windows(&f.handle, 31).await;
        // Past the first endpoint's would-be deadline (t=1.12s), before the second's.
        tokio::time::sleep(Duration::from_millis(200)).await;
        assert!(f.transcriber.calls.lock().unwrap().is_empty());

        tokio::time::sleep(Duration::from_secs(2)).await;

        let calls = f.transcriber.calls.lock().unwrap().clone();
        assert_eq!(calls.len(), 1);
        // Windows 0..=10 and 19..=30; the pause in between is not captured.
        assert_eq!(wav_samples(&calls[0].1), 23 * WINDOW);
        assert_eq!(transcripts(&f.sink.frames()), vec!["one long thought"]);
    }

    #[tokio::test(start_paused = true)]
    async fn failed_transcription_drops_the_utterance() {
        let f = fixture(
            &[(0, VadEvent::Start), (5, VadEvent::End)],
            Err(UpstreamError::new(UpstreamService::Transcription, "timeout")),
        );

        stream_windows(&f.handle, 6).await;
        tokio::time::sleep(Duration::from_secs(2)).await;

        assert_eq!(f.transcriber.calls.lock().unwrap().len(), 1);
        assert!(f.sink.frames().is_empty());
        assert!(f.model.calls.lock().unwrap().is_empty());
        assert!(f.log.rows.lock().unwrap().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn empty_transcript_is_not_answered() {
        let f = fixture(&[(0, VadEvent::Start), (5, VadEvent::End)], Ok("   ".to_string()));

        stream_windows(&f.handle, 6).await;
        tokio::time::sleep(Duration::from_secs(2)).await;

        assert!(f.sink.frames().is_empty());
        assert!(f.model.calls.lock().unwrap().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn text_messages_skip_transcription_and_are_not_echoed() {
        let f = fixture(&[], Ok("unused".to_string()));

        assert!(f.handle.submit(ClientInput::Text("  what's up  ".to_string())));
        assert!(f.handle.submit(ClientInput::Text("   ".to_string())));
        tokio::time::sleep(Duration::from_secs(1)).await;

        assert!(f.transcriber.calls.lock().unwrap().is_empty());
        let frames = f.sink.frames();
        assert!(transcripts(&frames).is_empty());
        assert_eq!(frames.last(), Some(&OutboundFrame::Event(ServerEvent::TtsEnd)));

        let calls = f.model.calls.lock().unwrap().clone();
        assert_eq!(calls.len(), 1);
        assert_eq!(calls[0].last().map(|t| t.text.as_str()), Some("what's up"));
        assert_eq!(calls[0].last().map(|t| t.role), Some(Role::User));

        let summary = f.handle.close().await;
        assert_eq!(summary.text_messages, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn turns_run_one_after_another() {
        let f = fixture(&[], Ok("unused".to_string()));

        f.handle.submit(ClientInput::Text("first".to_string()));
        f.handle.submit(ClientInput::Text("second".to_string()));
        tokio::time::sleep(Duration::from_secs(1)).await;

        let calls = f.model.calls.lock().unwrap().clone();
        assert_eq!(calls.len(), 2);
        // The second reply sees the first exchange in full.
        let second: Vec<&str> = calls[1].iter().map(|t| t.text.as_str()).collect();
        assert_eq!(second, vec!["first", "Hi. Nice to meet you.", "second"]);

        let frames = f.sink.frames();
        let brackets: Vec<&OutboundFrame> = frames
            .iter()
            .filter(|fr| {
                matches!(
                    fr,
                    OutboundFrame::Event(ServerEvent::TtsStart) | OutboundFrame::Event(ServerEvent::TtsEnd)
                )
            })
            .collect();
        assert_eq!(
            brackets,
            vec![
                &OutboundFrame::Event(ServerEvent::TtsStart),
                &OutboundFrame::Event(ServerEvent::TtsEnd),
                &OutboundFrame::Event(ServerEvent::TtsStart),
                &OutboundFrame::Event(ServerEvent::TtsEnd),
            ]
        );
    }

    #[tokio::test(start_paused = true)]
    async fn stalled_model_does_not_block_later_turns() {
        let f = fixture_with_model(
            &[],
            Ok("unused".to_string()),
            Script::DeltasThenStall(vec!["Thinking"]),
        );

        f.handle.submit(ClientInput::Text("first".to_string()));
        f.handle.submit(ClientInput::Text("second".to_string()));
        tokio::time::sleep(Duration::from_secs(120)).await;

        assert_eq!(f.model.calls.lock().unwrap().len(), 2);
        let tts_ends = f
            .sink
            .frames()
            .iter()
            .filter(|fr| **fr == OutboundFrame::Event(ServerEvent::TtsEnd))
            .count();
        assert_eq!(tts_ends, 2);

        let metrics = f.metrics.read().unwrap().clone();
        assert_eq!(metrics.turns_failed, 2);
    }

    #[tokio::test(start_paused = true)]
    async fn closing_cancels_pending_finalize() {
        let f = fixture(&[(0, VadEvent::Start), (3, VadEvent::End)], Ok("late".to_string()));

        stream_windows(&f.handle, 4).await;
        let transcriber = f.transcriber.clone();
        let summary = f.handle.close().await;
        assert_eq!(summary.utterances, 0);

        tokio::time::sleep(Duration::from_secs(2)).await;
        assert!(transcriber.calls.lock().unwrap().is_empty());
    }
}
