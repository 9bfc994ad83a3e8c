//! # Voice Activity Detection
//!
//! The scoring model is a black box behind two traits:
//!
//! - [`VadModel`]: one instance shared read-only by every session (`Arc<dyn VadModel>`),
//!   injected into sessions at construction.
//! - [`VadStream`]: the running state of one session's detector, opened from the model.
//!   It is fed windows in capture order and reports speech `Start` / `End` events,
//!   the same contract as an iterator-style neural detector.
//!
//! [`EnergyVad`] is the built-in model: a window is *voiced* when its RMS exceeds
//! the threshold.

use crate::audio::AudioWindow;

/// Speech boundary reported by a [`VadStream`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VadEvent {
    Start,
    End,
}

/// Shared, read-only voice-activity model.
pub trait VadModel: Send + Sync {
    /// Open per-session detector state.
    fn open_stream(&self) -> Box<dyn VadStream>;
}

/// Per-session running state of a detector.
pub trait VadStream: Send {
    /// Score the next window. `None` means no boundary at this window.
    fn score(&mut self, window: &AudioWindow) -> Option<VadEvent>;

    fn reset(&mut self);
}

/// Energy-threshold detector parameters.
#[derive(Debug, Clone)]
pub struct EnergyVad {
    /// RMS amplitude above which a window is voiced.
    rms_threshold: f32,
    /// Unvoiced run, in samples, that ends a speech span.
    min_silence_samples: usize,
}

impl EnergyVad {
    /// `rms_threshold` should be in `[0.0, 1.0]`; `0.01` suits a quiet room.
    pub fn new(rms_threshold: f32, min_silence_ms: u32, sample_rate: u32) -> Self {
        let min_silence_samples = (sample_rate as u64 * min_silence_ms as u64 / 1000) as usize;
        Self {
            rms_threshold,
            min_silence_samples,
        }
    }
}

impl VadModel for EnergyVad {
    fn open_stream(&self) -> Box<dyn VadStream> {
        Box::new(EnergyVadStream {
            params: self.clone(),
            triggered: false,
            silent_samples: 0,
        })
    }
}

struct EnergyVadStream {
    params: EnergyVad,
    triggered: bool,
    silent_samples: usize,
}

impl VadStream for EnergyVadStream {
    fn score(&mut self, window: &AudioWindow) -> Option<VadEvent> {
        let voiced = window.rms() > self.params.rms_threshold;

        if voiced {
            self.silent_samples = 0;
            if !self.triggered {
                self.triggered = true;
                return Some(VadEvent::Start);
            }
            return None;
        }

        if self.triggered {
            self.silent_samples += window.len();
            if self.silent_samples >= self.params.min_silence_samples {
                self.triggered = false;
                self.silent_samples = 0;
                return Some(VadEvent::End);
            }
        }
        None
    }

    fn reset(&mut self) {
        self.triggered = false;
        self.silent_samples = 0;
    }
}
