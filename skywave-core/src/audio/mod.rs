//! Audio I/O for the half-duplex channel.
//!
//! # Design constraints
//!
//! The cpal callbacks run on OS audio threads at elevated priority. The
//! capture callback does its mixdown and rate conversion into reused
//! buffers and hands completed 20 ms frames to a bounded crossbeam queue;
//! when the pipeline falls behind, the **oldest** frame is dropped so the
//! endpointer always sees the freshest audio. The playback callback pops
//! from a mutex-guarded queue with a short critical section.
//!
//! # Threading note
//!
//! `cpal::Stream` is `!Send` on most platforms (COM on Windows, CoreAudio
//! on macOS). Capture and playback are therefore created and dropped on the
//! pipeline thread, inside `spawn_blocking`.

pub mod capture;
pub mod device;
pub mod frame;
pub mod output;
pub mod resample;

use crossbeam_channel::{Receiver, Sender, TryRecvError, TrySendError};
use tracing::trace;

use frame::AudioFrame;

/// Frame span produced by the capture assembler (ms).
pub const FRAME_MS: u64 = 20;

/// Bounded frame queue between the capture callback and the pipeline.
pub const FRAME_QUEUE_CAPACITY: usize = 100;

/// Producer half of the frame queue; overflow drops the oldest frame.
///
/// Holds a receiver clone so the capture callback can evict without
/// blocking — crossbeam channels are MPMC, so popping from the producer
/// side is safe.
pub struct FrameProducer {
    tx: Sender<AudioFrame>,
    rx: Receiver<AudioFrame>,
}

impl FrameProducer {
    /// Enqueue a frame, evicting the oldest one when the queue is full.
    /// Returns `true` when an old frame was dropped.
    pub fn push(&self, frame: AudioFrame) -> bool {
        let mut dropped = false;
        if self.tx.is_full() {
            match self.rx.try_recv() {
                Ok(_) => {
                    dropped = true;
                    trace!("frame queue full: dropped oldest frame");
                }
                Err(TryRecvError::Empty | TryRecvError::Disconnected) => {}
            }
        }
        match self.tx.try_send(frame) {
            Ok(()) => {}
            Err(TrySendError::Full(_)) => {
                // Raced with another eviction cycle; dropping the incoming
                // frame keeps the callback wait-free.
                dropped = true;
            }
            Err(TrySendError::Disconnected(_)) => {}
        }
        dropped
    }
}

/// Create a matched producer/consumer pair for capture frames.
pub fn frame_queue() -> (FrameProducer, Receiver<AudioFrame>) {
    let (tx, rx) = crossbeam_channel::bounded(FRAME_QUEUE_CAPACITY);
    (
        FrameProducer {
            tx,
            rx: rx.clone(),
        },
        rx,
    )
}
