//! # Audio Input Path
//!
//! Turns the raw microphone stream of one session into finished utterances.
//!
//! ## Key Components:
//! - **Framer**: decodes inbound payloads and cuts them into fixed-size windows
//! - **VAD**: the voice-activity seam (shared model, per-session stream state)
//! - **Segmenter**: Idle / Speaking / PendingEnd state machine with debounced endpointing
//! - **Assembler**: turns a finalized window buffer into a WAV payload for transcription
//!
//! ## Audio Format:
//! - **Sample Rate**: 16kHz by default (configurable)
//! - **Channels**: Mono
//! - **Encoding**: little-endian `f32` (default) or `i16` samples
//! - **Window**: 512 samples (32ms at 16kHz)

pub mod assembler;
pub mod framer;
pub mod segmenter;
pub mod vad;

use serde::{Deserialize, Serialize};
use std::sync::Arc;

/// Immutable fixed-length run of samples in `[-1.0, 1.0]`; the unit of VAD evaluation.
///
/// Backed by `Arc<[f32]>` so handing a window to the VAD and to the utterance
/// buffer does not copy the samples.
#[derive(Debug, Clone, PartialEq)]
pub struct AudioWindow(Arc<[f32]>);

impl AudioWindow {
    pub fn new(samples: Vec<f32>) -> Self {
        Self(samples.into())
    }

    pub fn samples(&self) -> &[f32] {
        &self.0
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    #[cfg(test)]
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Root-mean-square level of the window.
    pub fn rms(&self) -> f32 {
        if self.0.is_empty() {
            return 0.0;
        }
        let sum_sq: f32 = self.0.iter().map(|s| s * s).sum();
        (sum_sq / self.0.len() as f32).sqrt()
    }
}

/// Raw sample encoding of binary and base64 audio payloads.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SampleEncoding {
    /// 32-bit float, little-endian (what a browser `Float32Array` buffer holds).
    F32Le,
    /// 16-bit signed PCM, little-endian.
    S16Le,
}

impl SampleEncoding {
    /// Bytes per sample.
    pub fn width(&self) -> usize {
        match self {
            SampleEncoding::F32Le => 4,
            SampleEncoding::S16Le => 2,
        }
    }
}
