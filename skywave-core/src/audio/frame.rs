//! Typed audio containers passed between the capture thread, the endpointer
//! and the transmit controller.

/// One fixed span of mono PCM captured from the receiver chain.
///
/// Frames are immutable once produced by the capture callback. The sample
/// rate is the system rate carried by the pipeline configuration; frames do
/// not repeat it per instance.
#[derive(Debug, Clone)]
pub struct AudioFrame {
    /// Mono signed 16-bit samples.
    pub samples: Vec<i16>,
}

impl AudioFrame {
    pub fn new(samples: Vec<i16>) -> Self {
        Self { samples }
    }

    /// Root-mean-square level of the frame, normalized to [0.0, 1.0].
    ///
    /// An empty frame has RMS 0 and behaves as silence everywhere.
    pub fn rms(&self) -> f32 {
        rms_i16(&self.samples)
    }

    pub fn len(&self) -> usize {
        self.samples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }
}

/// An owned, resizable run of mono PCM: an utterance, a synthesized
/// response, or a tone.
///
/// Exclusively owned by whichever component is operating on it; ownership
/// transfers explicitly (endpointer → STT → TX).
#[derive(Debug, Clone, Default)]
pub struct AudioBuffer {
    /// Mono signed 16-bit samples.
    pub samples: Vec<i16>,
    /// Sample rate in Hz (e.g. 16000).
    pub sample_rate: u32,
}

impl AudioBuffer {
    pub fn new(sample_rate: u32) -> Self {
        Self {
            samples: Vec::new(),
            sample_rate,
        }
    }

    pub fn from_samples(samples: Vec<i16>, sample_rate: u32) -> Self {
        Self {
            samples,
            sample_rate,
        }
    }

    /// Append one frame's samples.
    pub fn push_frame(&mut self, frame: &AudioFrame) {
        self.samples.extend_from_slice(&frame.samples);
    }

    /// Append another buffer's samples. The caller is responsible for rate
    /// agreement; buffers at mismatched rates must be resampled first.
    pub fn extend(&mut self, other: &AudioBuffer) {
        self.samples.extend_from_slice(&other.samples);
    }

    pub fn len(&self) -> usize {
        self.samples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    /// Duration in milliseconds at this buffer's sample rate.
    pub fn duration_ms(&self) -> u64 {
        if self.sample_rate == 0 {
            return 0;
        }
        (self.samples.len() as u64 * 1000) / self.sample_rate as u64
    }

    /// Truncate to at most `ms` milliseconds of audio.
    pub fn truncate_ms(&mut self, ms: u64) {
        let max_samples = (self.sample_rate as u64 * ms / 1000) as usize;
        if self.samples.len() > max_samples {
            self.samples.truncate(max_samples);
        }
    }

    /// Take ownership of the samples, leaving this buffer empty.
    pub fn take(&mut self) -> AudioBuffer {
        AudioBuffer {
            samples: std::mem::take(&mut self.samples),
            sample_rate: self.sample_rate,
        }
    }
}

/// Root-mean-square of i16 samples, normalized to [0.0, 1.0].
pub fn rms_i16(samples: &[i16]) -> f32 {
    if samples.is_empty() {
        return 0.0;
    }
    let sum_sq: f64 = samples
        .iter()
        .map(|&s| {
            let x = s as f64 / 32768.0;
            x * x
        })
        .sum();
    (sum_sq / samples.len() as f64).sqrt() as f32
}
