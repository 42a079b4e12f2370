//! Receiver-side audio capture via cpal.
//!
//! The input callback mixes to mono, converts to the system rate and cuts
//! the stream into fixed [`FRAME_MS`] frames for the pipeline. It never
//! blocks: the frame queue evicts its oldest entry on overflow.

use std::sync::{
    atomic::{AtomicBool, Ordering},
    Arc,
};

#[cfg(feature = "audio-cpal")]
use cpal::{
    traits::{DeviceTrait, StreamTrait},
    SampleFormat, SampleRate, Stream, StreamConfig,
};
use tracing::{error, info, warn};

use super::{frame::AudioFrame, resample::RateConverter, FrameProducer, FRAME_MS};
use crate::config::AudioConfig;
use crate::error::Result;
#[cfg(feature = "audio-cpal")]
use crate::error::SkywaveError;

/// Input samples accumulated before each rate-conversion call.
const CONVERT_CHUNK: usize = 960;

/// Turns raw interleaved device samples into system-rate mono frames.
///
/// Lives inside the capture callback; all buffers are reused across calls.
struct FrameAssembler {
    converter: RateConverter,
    mix_buf: Vec<f32>,
    pending: Vec<i16>,
    frame_len: usize,
    producer: FrameProducer,
    dropped_frames: u64,
}

impl FrameAssembler {
    fn new(device_rate: u32, system_rate: u32, producer: FrameProducer) -> Result<Self> {
        Ok(Self {
            converter: RateConverter::new(device_rate, system_rate, CONVERT_CHUNK)?,
            mix_buf: Vec::new(),
            pending: Vec::new(),
            frame_len: (system_rate as u64 * FRAME_MS / 1000) as usize,
            producer,
            dropped_frames: 0,
        })
    }

    /// Ingest one callback's worth of interleaved f32 samples.
    fn ingest(&mut self, data: &[f32], channels: usize) {
        if channels <= 1 {
            self.mix_buf.clear();
            self.mix_buf.extend_from_slice(data);
        } else {
            let frames = data.len() / channels;
            self.mix_buf.resize(frames, 0.0);
            for f in 0..frames {
                let base = f * channels;
                let mut sum = 0f32;
                for c in 0..channels {
                    sum += data[base + c];
                }
                self.mix_buf[f] = sum / channels as f32;
            }
        }

        let converted = self.converter.process(&self.mix_buf);
        for sample in converted {
            self.pending
                .push((sample.clamp(-1.0, 1.0) * 32767.0) as i16);
            if self.pending.len() == self.frame_len {
                let frame = AudioFrame::new(std::mem::take(&mut self.pending));
                if self.producer.push(frame) {
                    self.dropped_frames += 1;
                    if self.dropped_frames % 50 == 1 {
                        warn!(
                            dropped = self.dropped_frames,
                            "pipeline behind: capture frames dropped"
                        );
                    }
                }
                self.pending = Vec::with_capacity(self.frame_len);
            }
        }
    }
}

/// Handle to an active capture stream.
///
/// **Not `Send`** — `cpal::Stream` is bound to its creation thread on
/// Windows/macOS. Create and drop this type on the pipeline thread.
pub struct AudioCapture {
    #[cfg(feature = "audio-cpal")]
    _stream: Stream,
    running: Arc<AtomicBool>,
    /// Capture rate reported by the device (Hz), before conversion.
    pub device_rate: u32,
}

impl AudioCapture {
    /// Open the configured (or default) input device and feed system-rate
    /// frames into `producer`.
    ///
    /// # Errors
    /// `SkywaveError::NoDefaultInputDevice` when no input exists, or
    /// `SkywaveError::AudioStream` when cpal fails to build the stream.
    #[cfg(feature = "audio-cpal")]
    pub fn open(
        audio: &AudioConfig,
        producer: FrameProducer,
        running: Arc<AtomicBool>,
    ) -> Result<Self> {
        let device = super::device::select_input(audio.input_device.as_deref())?;
        let device_name = device.name().unwrap_or_else(|_| "unknown".into());

        let supported = device
            .default_input_config()
            .map_err(|e| SkywaveError::AudioDevice(e.to_string()))?;
        let device_rate = audio
            .input_sample_rate
            .unwrap_or_else(|| supported.sample_rate().0);
        let channels = supported.channels();

        info!(
            device = device_name.as_str(),
            device_rate,
            channels,
            system_rate = audio.sample_rate,
            "opening input device"
        );

        let config = StreamConfig {
            channels,
            sample_rate: SampleRate(device_rate),
            buffer_size: cpal::BufferSize::Default,
        };

        let mut assembler = FrameAssembler::new(device_rate, audio.sample_rate, producer)?;
        let ch = channels as usize;

        let stream = match supported.sample_format() {
            SampleFormat::F32 => {
                let running = Arc::clone(&running);
                device.build_input_stream(
                    &config,
                    move |data: &[f32], _info| {
                        if !running.load(Ordering::Relaxed) {
                            return;
                        }
                        assembler.ingest(data, ch);
                    },
                    |err| error!("capture stream error: {err}"),
                    None,
                )
            }
            SampleFormat::I16 => {
                let running = Arc::clone(&running);
                let mut scratch: Vec<f32> = Vec::new();
                device.build_input_stream(
                    &config,
                    move |data: &[i16], _info| {
                        if !running.load(Ordering::Relaxed) {
                            return;
                        }
                        scratch.clear();
                        scratch.extend(data.iter().map(|&s| s as f32 / 32768.0));
                        assembler.ingest(&scratch, ch);
                    },
                    |err| error!("capture stream error: {err}"),
                    None,
                )
            }
            SampleFormat::U16 => {
                let running = Arc::clone(&running);
                let mut scratch: Vec<f32> = Vec::new();
                device.build_input_stream(
                    &config,
                    move |data: &[u16], _info| {
                        if !running.load(Ordering::Relaxed) {
                            return;
                        }
                        scratch.clear();
                        scratch.extend(
                            data.iter()
                                .map(|&s| (s as f32 - 32768.0) / 32768.0),
                        );
                        assembler.ingest(&scratch, ch);
                    },
                    |err| error!("capture stream error: {err}"),
                    None,
                )
            }
            fmt => {
                return Err(SkywaveError::AudioStream(format!(
                    "unsupported capture sample format: {fmt:?}"
                )))
            }
        }
        .map_err(|e| SkywaveError::AudioStream(e.to_string()))?;

        stream
            .play()
            .map_err(|e| SkywaveError::AudioStream(e.to_string()))?;

        Ok(Self {
            _stream: stream,
            running,
            device_rate,
        })
    }

    /// Stop: signal the callback to no-op on its next invocation.
    pub fn stop(&self) {
        self.running.store(false, Ordering::Release);
    }
}

/// Stub when the `audio-cpal` feature is disabled.
#[cfg(not(feature = "audio-cpal"))]
impl AudioCapture {
    pub fn open(
        _audio: &AudioConfig,
        _producer: FrameProducer,
        _running: Arc<AtomicBool>,
    ) -> Result<Self> {
        Err(crate::error::SkywaveError::AudioStream(
            "compiled without audio-cpal feature".into(),
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audio::frame_queue;

    #[test]
    fn assembler_cuts_fixed_frames() {
        let (producer, rx) = frame_queue();
        let mut assembler = FrameAssembler::new(16_000, 16_000, producer).unwrap();

        // 50 ms of mono audio at the system rate = 2 complete 20 ms frames.
        assembler.ingest(&vec![0.5f32; 800], 1);

        let first = rx.try_recv().unwrap();
        let second = rx.try_recv().unwrap();
        assert_eq!(first.len(), 320);
        assert_eq!(second.len(), 320);
        assert!(rx.try_recv().is_err(), "remainder stays pending");

        // The next 160 samples complete the third frame.
        assembler.ingest(&vec![0.5f32; 160], 1);
        assert_eq!(rx.try_recv().unwrap().len(), 320);
    }

    #[test]
    fn assembler_mixes_stereo_to_mono() {
        let (producer, rx) = frame_queue();
        let mut assembler = FrameAssembler::new(16_000, 16_000, producer).unwrap();

        // L = +0.5, R = -0.5 → mono 0.
        let interleaved: Vec<f32> = (0..640)
            .map(|i| if i % 2 == 0 { 0.5 } else { -0.5 })
            .collect();
        assembler.ingest(&interleaved, 2);

        let frame = rx.try_recv().unwrap();
        assert_eq!(frame.len(), 320);
        assert!(frame.rms() < 1e-3);
    }

    #[test]
    fn assembler_downsamples_device_rate() {
        let (producer, rx) = frame_queue();
        let mut assembler = FrameAssembler::new(48_000, 16_000, producer).unwrap();

        // 60 ms at 48 kHz = 2880 input samples ≈ 960 system samples = 3 frames.
        assembler.ingest(&vec![0.2f32; 2880], 1);
        let mut frames = 0;
        while rx.try_recv().is_ok() {
            frames += 1;
        }
        assert!((2..=3).contains(&frames), "got {frames} frames");
    }
}
