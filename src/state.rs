//! # Application State Management
//!
//! Shared state handed to every HTTP handler and websocket connection through
//! `web::Data<AppState>`.
//!
//! ## Arc<RwLock<T>> Pattern
//! - **Arc**: every worker thread and session holds a reference to the same data
//! - **RwLock**: many readers or one writer at a time
//!
//! Nothing here is shared *between sessions* except read-only values (config,
//! the VAD model, the collaborator clients) and the counters below.

use crate::audio::vad::VadModel;
use crate::config::AppConfig;
use crate::services::Collaborators;
use crate::session::registry::SessionRegistry;
use crate::session::SessionSettings;
use std::sync::{Arc, RwLock};
use std::time::Instant;

/// Cloned cheaply into each handler; all fields are shared handles.
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<AppConfig>,

    /// Counters updated by sessions and turn workers.
    pub metrics: Arc<RwLock<AppMetrics>>,

    /// Live sessions and the concurrency limit.
    pub registry: Arc<SessionRegistry>,

    /// The one voice-activity model every session reads from.
    pub vad: Arc<dyn VadModel>,

    pub collaborators: Collaborators,

    pub start_time: Instant,
}

/// Counters collected across all sessions since server start.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct AppMetrics {
    pub sessions_opened: u64,
    pub sessions_rejected: u64,
    /// Utterances handed to transcription.
    pub utterances: u64,
    pub turns_completed: u64,
    pub turns_failed: u64,
    /// Inbound frames dropped as malformed.
    pub malformed_frames: u64,
}

impl AppState {
    pub fn new(config: AppConfig, vad: Arc<dyn VadModel>, collaborators: Collaborators) -> Self {
        let registry = SessionRegistry::new(config.session.max_concurrent_sessions);
        Self {
            config: Arc::new(config),
            metrics: Arc::new(RwLock::new(AppMetrics::default())),
            registry: Arc::new(registry),
            vad,
            collaborators,
            start_time: Instant::now(),
        }
    }

    pub fn session_settings(&self) -> SessionSettings {
        SessionSettings::from_config(&self.config)
    }

    /// Apply `update` to the counters under the write lock.
    pub fn record(&self, update: impl FnOnce(&mut AppMetrics)) {
        record(&self.metrics, update);
    }

    /// Get a snapshot of current metrics.
    ///
    /// Clones so the lock is not held while the response is serialized.
    pub fn get_metrics_snapshot(&self) -> AppMetrics {
        self.metrics
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }

    pub fn get_uptime_seconds(&self) -> u64 {
        self.start_time.elapsed().as_secs()
    }
}

/// Counter update usable from code that only holds the metrics handle.
pub fn record(metrics: &RwLock<AppMetrics>, update: impl FnOnce(&mut AppMetrics)) {
    let mut metrics = metrics.write().unwrap_or_else(|e| e.into_inner());
    update(&mut metrics);
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::audio::vad::EnergyVad;
    use crate::pipeline::coordinator::tests::{EchoSynth, MemoryLog, Script, ScriptedModel, UnusedTranscriber};

    pub(crate) fn test_state(config: AppConfig) -> AppState {
        let collaborators = Collaborators {
            transcriber: Arc::new(UnusedTranscriber),
            language_model: Arc::new(ScriptedModel::new(Script::Deltas(vec!["Hi."]))),
            synthesizer: Arc::new(EchoSynth::default()),
            conversation_log: Arc::new(MemoryLog::default()),
        };
        AppState::new(config, Arc::new(EnergyVad::new(0.01, 100, 16000)), collaborators)
    }

    #[test]
    fn records_counters() {
        let state = test_state(AppConfig::default());
        state.record(|m| m.turns_completed += 2);
        state.record(|m| m.malformed_frames += 1);

        let snapshot = state.get_metrics_snapshot();
        assert_eq!(snapshot.turns_completed, 2);
        assert_eq!(snapshot.malformed_frames, 1);
        assert_eq!(state.registry.capacity(), 10);
    }
}
