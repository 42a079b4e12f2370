//! Voice-activity endpointing.
//!
//! The [`Endpointer`] trait is the seam between the frame cadence and the
//! turn pipeline: swap in [`energy::EnergyEndpointer`] (default) or any
//! future neural endpointer without touching the orchestrator.

pub mod energy;

pub use energy::EnergyEndpointer;

use crate::audio::frame::{AudioBuffer, AudioFrame};

/// Utterance boundary events produced per frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VadEvent {
    /// Nothing changed.
    None,
    /// Speech energy crossed the start threshold for long enough.
    SpeechStart,
    /// Cumulative in-speech silence crossed the end-of-utterance limit.
    SpeechEnd,
}

/// Converts a continuous frame stream into utterance boundaries.
///
/// Implementations never fail: malformed frames yield RMS 0 and behave as
/// silence.
pub trait Endpointer: Send + 'static {
    /// Classify one frame, accumulating audio into the current segment
    /// while speech is active.
    fn process(&mut self, frame: &AudioFrame) -> VadEvent;

    /// Read-only view of the accumulated segment.
    fn current_segment(&self) -> &AudioBuffer;

    /// Atomically take ownership of the accumulated segment and reset it.
    fn finalize_segment(&mut self) -> AudioBuffer;

    /// Drop the segment and return to silence.
    fn reset(&mut self);

    /// True while the detector is inside an active speech region.
    fn is_in_speech(&self) -> bool;
}
