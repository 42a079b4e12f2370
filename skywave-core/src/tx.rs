//! Half-duplex transmit controller.
//!
//! Owns the playback queue handle shared with the output callback. A
//! transmission is one contiguous run of samples; `transmit_append` extends
//! the in-flight run (streaming synthesis), `stop` aborts it. Completion is
//! observed by the orchestrator through [`TxController::poll_complete`],
//! which consumes the flag exactly once per transmission.

use tracing::{debug, info, warn};

use crate::audio::frame::AudioBuffer;
use crate::audio::output::SharedPlayback;
use crate::audio::resample::convert_buffer_i16;

pub struct TxController {
    playback: SharedPlayback,
    /// Rate the output device runs at; buffers are converted on hand-off.
    output_rate: u32,
    /// Hard cap per transmission (ms); 0 disables truncation.
    max_transmit_ms: u64,
}

impl TxController {
    pub fn new(playback: SharedPlayback, output_rate: u32, max_transmit_ms: u64) -> Self {
        Self {
            playback,
            output_rate,
            max_transmit_ms,
        }
    }

    /// Begin transmitting `buffer`, truncated to `max_transmit_ms` when a
    /// cap is configured. Replaces any queued audio.
    pub fn transmit(&self, mut buffer: AudioBuffer) {
        if buffer.is_empty() {
            debug!("transmit called with empty buffer; nothing to send");
            return;
        }
        if self.max_transmit_ms > 0 && buffer.duration_ms() > self.max_transmit_ms {
            warn!(
                duration_ms = buffer.duration_ms(),
                cap_ms = self.max_transmit_ms,
                "transmission truncated to cap"
            );
            buffer.truncate_ms(self.max_transmit_ms);
        }

        let samples = convert_buffer_i16(&buffer.samples, buffer.sample_rate, self.output_rate);
        info!(
            duration_ms = buffer.duration_ms(),
            samples = samples.len(),
            "transmission begins"
        );

        let mut state = self.playback.lock();
        state.queue.clear();
        state.queue.extend(samples);
        state.active = true;
        state.complete = false;
        state.error = None;
    }

    /// Extend the in-flight transmission. Starts a new one when idle.
    pub fn transmit_append(&self, buffer: AudioBuffer) {
        if buffer.is_empty() {
            return;
        }
        let samples = convert_buffer_i16(&buffer.samples, buffer.sample_rate, self.output_rate);

        let mut state = self.playback.lock();
        if !state.active {
            drop(state);
            self.transmit(buffer);
            return;
        }
        debug!(samples = samples.len(), "transmission extended");
        state.queue.extend(samples);
    }

    /// Abort playback immediately.
    pub fn stop(&self) {
        let mut state = self.playback.lock();
        state.queue.clear();
        if state.active {
            state.active = false;
            state.complete = true;
        }
    }

    /// True while queued audio has not drained.
    pub fn is_transmitting(&self) -> bool {
        self.playback.lock().active
    }

    /// Consume the completion flag. Returns any playback error alongside;
    /// errors still count as completion so the turn always closes.
    pub fn poll_complete(&self) -> Option<Option<String>> {
        let mut state = self.playback.lock();
        if state.complete {
            state.complete = false;
            Some(state.error.take())
        } else {
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audio::output::{fill_i16, shared_playback};

    const RATE: u32 = 16_000;

    fn drain(playback: &SharedPlayback, frames: usize) -> Vec<i16> {
        let mut out = vec![0i16; frames];
        let mut state = playback.lock();
        fill_i16(&mut state, &mut out, 1);
        out
    }

    #[test]
    fn transmit_queues_and_completes_on_drain() {
        let playback = shared_playback();
        let tx = TxController::new(playback.clone(), RATE, 0);

        tx.transmit(AudioBuffer::from_samples(vec![7; 100], RATE));
        assert!(tx.is_transmitting());
        assert!(tx.poll_complete().is_none());

        let out = drain(&playback, 100);
        assert_eq!(out, vec![7; 100]);
        assert!(!tx.is_transmitting());
        assert_eq!(tx.poll_complete(), Some(None));
        // The flag is consumed exactly once.
        assert!(tx.poll_complete().is_none());
    }

    #[test]
    fn transmit_truncates_to_cap() {
        let playback = shared_playback();
        // 100 ms cap at 16 kHz = 1600 samples.
        let tx = TxController::new(playback.clone(), RATE, 100);
        tx.transmit(AudioBuffer::from_samples(vec![1; 16_000], RATE));
        assert_eq!(playback.lock().queue.len(), 1600);
    }

    #[test]
    fn zero_cap_disables_truncation() {
        let playback = shared_playback();
        let tx = TxController::new(playback.clone(), RATE, 0);
        tx.transmit(AudioBuffer::from_samples(vec![1; 16_000], RATE));
        assert_eq!(playback.lock().queue.len(), 16_000);
    }

    #[test]
    fn append_extends_active_transmission() {
        let playback = shared_playback();
        let tx = TxController::new(playback.clone(), RATE, 0);
        tx.transmit(AudioBuffer::from_samples(vec![1; 10], RATE));
        tx.transmit_append(AudioBuffer::from_samples(vec![2; 10], RATE));
        assert_eq!(playback.lock().queue.len(), 20);

        // Draining the whole run completes once.
        drain(&playback, 20);
        assert_eq!(tx.poll_complete(), Some(None));
    }

    #[test]
    fn append_when_idle_starts_a_transmission() {
        let playback = shared_playback();
        let tx = TxController::new(playback.clone(), RATE, 0);
        tx.transmit_append(AudioBuffer::from_samples(vec![3; 10], RATE));
        assert!(tx.is_transmitting());
    }

    #[test]
    fn stop_aborts_and_reports_complete() {
        let playback = shared_playback();
        let tx = TxController::new(playback.clone(), RATE, 0);
        tx.transmit(AudioBuffer::from_samples(vec![1; 100], RATE));
        tx.stop();
        assert!(!tx.is_transmitting());
        assert_eq!(tx.poll_complete(), Some(None));
        assert!(playback.lock().queue.is_empty());
    }

    #[test]
    fn empty_buffer_is_a_no_op() {
        let playback = shared_playback();
        let tx = TxController::new(playback.clone(), RATE, 0);
        tx.transmit(AudioBuffer::new(RATE));
        assert!(!tx.is_transmitting());
        assert!(tx.poll_complete().is_none());
    }

    #[test]
    fn buffers_are_converted_to_the_output_rate() {
        let playback = shared_playback();
        let tx = TxController::new(playback.clone(), 48_000, 0);
        // One second at 16 kHz becomes ~one second at 48 kHz.
        tx.transmit(AudioBuffer::from_samples(vec![5; 16_000], RATE));
        assert_eq!(playback.lock().queue.len(), 48_000);
    }
}
