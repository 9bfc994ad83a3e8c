//! # VAD Segmenter
//!
//! State machine over framer output that turns detector events into utterances.
//!
//! ## States:
//! - **Idle**: no speech; windows are dropped
//! - **Speaking**: every window is appended, whatever its own label, until `End`
//! - **PendingEnd**: speech ended, waiting out the pause threshold
//!
//! The segmenter owns no timer. On `Speaking → PendingEnd` it hands back a
//! [`FinalizeTicket`]; the session schedules a timer and later calls
//! [`VadSegmenter::finalize`] with that ticket. Every `Start` during
//! `PendingEnd` bumps the epoch, so a timer that fires after a barge-in carries
//! a stale ticket and is rejected here even if its cancellation lost the race.

use crate::audio::vad::VadEvent;
use crate::audio::AudioWindow;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SegmenterState {
    Idle,
    Speaking,
    PendingEnd,
}

/// Identifies one armed finalize timer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct FinalizeTicket(u64);

/// What the caller must do with the finalize timer after a window.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SegmenterAction {
    None,
    /// Start the finalize timer for this ticket.
    ArmFinalize(FinalizeTicket),
    /// A pending finalize was aborted by barge-in; cancel the timer.
    CancelFinalize,
}

/// Windows captured for one speech run, in capture order.
#[derive(Debug, Clone, Default)]
pub struct Utterance {
    pub windows: Vec<AudioWindow>,
}

impl Utterance {
    pub fn sample_count(&self) -> usize {
        self.windows.iter().map(AudioWindow::len).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.windows.is_empty()
    }
}

#[derive(Debug)]
pub struct VadSegmenter {
    state: SegmenterState,
    buffer: Vec<AudioWindow>,
    epoch: u64,
    armed: Option<FinalizeTicket>,
}

impl Default for VadSegmenter {
    fn default() -> Self {
        Self::new()
    }
}

impl VadSegmenter {
    pub fn new() -> Self {
        Self {
            state: SegmenterState::Idle,
            buffer: Vec::new(),
            epoch: 0,
            armed: None,
        }
    }

    #[cfg(test)]
    pub fn state(&self) -> SegmenterState {
        self.state
    }

    /// Windows in the current utterance buffer.
    #[cfg(test)]
    pub fn buffered_windows(&self) -> usize {
        self.buffer.len()
    }

    /// Feed one window together with the detector's verdict for it.
    pub fn push(&mut self, window: AudioWindow, event: Option<VadEvent>) -> SegmenterAction {
        match (self.state, event) {
            (SegmenterState::Idle, Some(VadEvent::Start)) => {
                self.buffer.clear();
                self.buffer.push(window);
                self.state = SegmenterState::Speaking;
                SegmenterAction::None
            }
            (SegmenterState::Idle, _) => SegmenterAction::None,

            (SegmenterState::Speaking, Some(VadEvent::End)) => {
                self.buffer.push(window);
                self.state = SegmenterState::PendingEnd;
                let ticket = self.next_ticket();
                self.armed = Some(ticket);
                SegmenterAction::ArmFinalize(ticket)
            }
            (SegmenterState::Speaking, _) => {
                self.buffer.push(window);
                SegmenterAction::None
            }

            // Barge-in: the pause was mid-thought, keep accumulating the same buffer.
            (SegmenterState::PendingEnd, Some(VadEvent::Start)) => {
                self.next_ticket();
                self.armed = None;
                self.buffer.push(window);
                self.state = SegmenterState::Speaking;
                SegmenterAction::CancelFinalize
            }
            // Trailing silence is not part of the utterance.
            (SegmenterState::PendingEnd, _) => SegmenterAction::None,
        }
    }

    /// Called when the finalize timer for `ticket` fires.
    ///
    /// Re-validates before acting: returns `None` unless the segmenter is still
    /// in `PendingEnd` with this exact ticket armed. An empty buffer also yields
    /// `None`. On success the segmenter is back to `Idle` with an empty buffer.
    pub fn finalize(&mut self, ticket: FinalizeTicket) -> Option<Utterance> {
        if self.state != SegmenterState::PendingEnd || self.armed != Some(ticket) {
            return None;
        }

        self.armed = None;
        self.state = SegmenterState::Idle;
        let windows = std::mem::take(&mut self.buffer);
        if windows.is_empty() {
            return None;
        }
        Some(Utterance { windows })
    }

    pub fn reset(&mut self) {
        self.next_ticket();
        self.armed = None;
        self.buffer.clear();
        self.state = SegmenterState::Idle;
    }

    fn next_ticket(&mut self) -> FinalizeTicket {
        self.epoch += 1;
        FinalizeTicket(self.epoch)
    }
}
