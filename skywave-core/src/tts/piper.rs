//! Piper synthesizer process management.
//!
//! A persistent worker is launched at startup with `--json-input` and
//! `--output-raw`: one JSON line per phrase on stdin, raw s16le PCM at the
//! voice's native rate on stdout. The response stream has no framing, so a
//! reader thread chunks stdout into a channel and synthesis completes when
//! the stream goes quiet. When the worker is gone, a per-call subprocess
//! is used instead.

use std::io::{Read, Write};
use std::process::{Child, ChildStdin, Command, Stdio};
use std::thread::JoinHandle;
use std::time::Duration;

use crossbeam_channel::{unbounded, Receiver, RecvTimeoutError};
use serde::Serialize;
use tracing::{debug, info, warn};

use crate::config::TtsConfig;
use crate::error::{Result, SkywaveError};

/// Wait for the first audio of a phrase (model load, long phrases).
const FIRST_CHUNK_TIMEOUT: Duration = Duration::from_secs(10);
/// Stream-quiet gap that marks the end of one phrase.
const CHUNK_GAP_TIMEOUT: Duration = Duration::from_millis(300);

#[derive(Serialize)]
struct SynthRequest<'a> {
    text: &'a str,
}

#[derive(Debug)]
pub struct PiperWorker {
    child: Child,
    stdin: ChildStdin,
    audio_rx: Receiver<Vec<u8>>,
    reader: Option<JoinHandle<()>>,
}

impl PiperWorker {
    /// Launch the persistent worker.
    ///
    /// # Errors
    /// `SkywaveError::Tts` when the binary or voice cannot be started.
    pub fn spawn(config: &TtsConfig) -> Result<Self> {
        let mut command = Command::new(&config.piper_path);
        command
            .arg("--model")
            .arg(&config.voice_path)
            .arg("--output-raw")
            .arg("--json-input")
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::null());
        if let Some(espeak) = &config.espeak_data_path {
            command.arg("--espeak_data").arg(espeak);
        }

        let mut child = command
            .spawn()
            .map_err(|e| SkywaveError::Tts(format!("spawn piper: {e}")))?;
        let stdin = child
            .stdin
            .take()
            .ok_or_else(|| SkywaveError::Tts("piper stdin unavailable".into()))?;
        let mut stdout = child
            .stdout
            .take()
            .ok_or_else(|| SkywaveError::Tts("piper stdout unavailable".into()))?;

        let (audio_tx, audio_rx) = unbounded();
        let reader = std::thread::Builder::new()
            .name("piper-reader".into())
            .spawn(move || {
                let mut chunk = [0u8; 4096];
                loop {
                    match stdout.read(&mut chunk) {
                        Ok(0) => break,
                        Ok(n) => {
                            if audio_tx.send(chunk[..n].to_vec()).is_err() {
                                break;
                            }
                        }
                        Err(e) => {
                            warn!("piper stdout read error: {e}");
                            break;
                        }
                    }
                }
                debug!("piper reader thread exiting");
            })
            .map_err(|e| SkywaveError::Tts(format!("spawn piper reader: {e}")))?;

        info!(
            piper = %config.piper_path.display(),
            voice = %config.voice_path.display(),
            "persistent synthesizer started"
        );

        Ok(Self {
            child,
            stdin,
            audio_rx,
            reader: Some(reader),
        })
    }

    /// True while the worker process has not exited.
    pub fn is_alive(&mut self) -> bool {
        matches!(self.child.try_wait(), Ok(None))
    }

    /// Synthesize one phrase to raw samples at the voice's native rate.
    pub fn synthesize(&mut self, text: &str) -> Result<Vec<i16>> {
        let request = serde_json::to_string(&SynthRequest { text })
            .map_err(|e| SkywaveError::Tts(format!("encode request: {e}")))?;
        self.stdin
            .write_all(request.as_bytes())
            .and_then(|_| self.stdin.write_all(b"\n"))
            .and_then(|_| self.stdin.flush())
            .map_err(|e| SkywaveError::Tts(format!("write to piper: {e}")))?;

        let mut pcm: Vec<u8> = Vec::new();
        // First chunk may take a while; after that, a quiet gap ends the phrase.
        match self.audio_rx.recv_timeout(FIRST_CHUNK_TIMEOUT) {
            Ok(chunk) => pcm.extend_from_slice(&chunk),
            Err(RecvTimeoutError::Timeout) => {
                return Err(SkywaveError::Tts("synthesizer produced no audio".into()))
            }
            Err(RecvTimeoutError::Disconnected) => {
                return Err(SkywaveError::Tts("synthesizer stream closed".into()))
            }
        }
        loop {
            match self.audio_rx.recv_timeout(CHUNK_GAP_TIMEOUT) {
                Ok(chunk) => pcm.extend_from_slice(&chunk),
                Err(RecvTimeoutError::Timeout) => break,
                Err(RecvTimeoutError::Disconnected) => break,
            }
        }

        Ok(bytes_to_samples(&pcm))
    }

    /// Close stdin, wait for the process, join the reader.
    pub fn shutdown(mut self) {
        drop(self.stdin);
        let _ = self.child.wait();
        if let Some(reader) = self.reader.take() {
            let _ = reader.join();
        }
    }
}

/// One-shot subprocess fallback: phrase on stdin, raw PCM collected from a
/// finished process.
pub fn synth_oneshot(config: &TtsConfig, text: &str) -> Result<Vec<i16>> {
    let mut command = Command::new(&config.piper_path);
    command
        .arg("--model")
        .arg(&config.voice_path)
        .arg("--output-raw")
        .stdin(Stdio::piped())
        .stdout(Stdio::piped())
        .stderr(Stdio::null());
    if let Some(espeak) = &config.espeak_data_path {
        command.arg("--espeak_data").arg(espeak);
    }

    let mut child = command
        .spawn()
        .map_err(|e| SkywaveError::Tts(format!("spawn piper (one-shot): {e}")))?;
    {
        let stdin = child
            .stdin
            .as_mut()
            .ok_or_else(|| SkywaveError::Tts("piper stdin unavailable".into()))?;
        stdin
            .write_all(text.as_bytes())
            .and_then(|_| stdin.write_all(b"\n"))
            .map_err(|e| SkywaveError::Tts(format!("write to piper: {e}")))?;
    }

    let output = child
        .wait_with_output()
        .map_err(|e| SkywaveError::Tts(format!("wait for piper: {e}")))?;
    if !output.status.success() {
        return Err(SkywaveError::Tts(format!(
            "piper exited with {}",
            output.status
        )));
    }

    Ok(bytes_to_samples(&output.stdout))
}

/// Interpret little-endian s16 bytes; a trailing odd byte is dropped.
fn bytes_to_samples(bytes: &[u8]) -> Vec<i16> {
    bytes
        .chunks_exact(2)
        .map(|pair| i16::from_le_bytes([pair[0], pair[1]]))
        .collect()
}
