//! `VoiceAgent` — top-level lifecycle controller.
//!
//! ## Lifecycle
//!
//! ```text
//! VoiceAgent::build(config)
//!     └─► start()        → audio open, pipeline spawned on a blocking thread
//!         └─► wait()     → resolves when the pipeline loop exits
//!             stop()     → running=false; streams and workers shut down
//! ```
//!
//! ## Threading
//!
//! `cpal::Stream` is `!Send` on Windows/macOS (COM / CoreAudio thread
//! affinity). Capture and playback are therefore created *inside* the
//! `spawn_blocking` closure so they never cross a thread boundary. A sync
//! channel propagates open-device errors back to the `start()` caller.

pub mod pipeline;

use std::sync::{
    atomic::{AtomicBool, Ordering},
    Arc,
};

use tracing::{info, warn};

use crate::{
    audio::{capture::AudioCapture, frame_queue, output::shared_playback, output::AudioOutput},
    config::AgentConfig,
    error::{Result, SkywaveError},
    llm::{
        summarizer::{summary_request_prompt, Summarizer},
        ChatModel, GenerateRequest, LlmClient,
    },
    memory::ConversationMemory,
    phrases::{phrase, PhraseKey},
    router::Router,
    session::SessionRecorder,
    stt::{stub::StubTranscriber, whisper::WhisperCli, SpeechToText},
    tools::{executor::ToolExecutor, ToolRegistry},
    tts::{Synthesizer, TtsEngine},
    tx::TxController,
    vad::EnergyEndpointer,
};

pub use pipeline::{PipelineContext, VAD_GUARD_PERIOD_MS};

/// Summary calls are cheap and low-priority; cap them separately.
const SUMMARY_MAX_TOKENS: u32 = 160;

pub struct VoiceAgent {
    config: AgentConfig,
    tools: ToolRegistry,
    running: Arc<AtomicBool>,
    done_rx: Option<std::sync::mpsc::Receiver<()>>,
}

impl VoiceAgent {
    /// Create an agent. Call `start()` to open audio and begin listening.
    pub fn new(config: AgentConfig, tools: ToolRegistry) -> Self {
        Self {
            config,
            tools,
            running: Arc::new(AtomicBool::new(false)),
            done_rx: None,
        }
    }

    /// Open the audio devices and launch the pipeline.
    ///
    /// Blocks until both devices are confirmed open (or failed), then
    /// returns while the pipeline keeps running on a blocking thread.
    ///
    /// # Errors
    /// Device and configuration failures at boot are fatal.
    pub fn start(&mut self) -> Result<()> {
        if self.running.swap(true, Ordering::SeqCst) {
            return Err(SkywaveError::Other(anyhow::anyhow!("agent already running")));
        }

        let config = self.config.clone();
        let tools = self.tools.clone();
        let running = Arc::clone(&self.running);

        // STT backend: external recognizer when a model is configured,
        // stub otherwise so a bare machine still completes turns.
        let stt: Box<dyn SpeechToText> = if config.stt.model_path.is_some() {
            Box::new(WhisperCli::new(config.stt.clone())?)
        } else {
            warn!("no stt.model_path configured; using stub transcriber");
            Box::new(StubTranscriber::new())
        };

        let llm = LlmClient::new(config.llm.clone());

        let summarizer = if config.memory.enabled {
            let client = llm.clone();
            Some(Summarizer::spawn(
                Box::new(move |dialogue| {
                    let prompt = summary_request_prompt(dialogue);
                    let request = GenerateRequest {
                        user_prompt: &prompt,
                        max_tokens: Some(SUMMARY_MAX_TOKENS),
                        ..Default::default()
                    };
                    client.generate(&request).map(|outcome| outcome.content)
                }),
                config.transcript_gate.clone(),
                config.stt.blank_sentinel.clone(),
            ))
        } else {
            None
        };

        let recorder = if config.session.enabled {
            match SessionRecorder::create(&config.session.log_dir, config.audio.sample_rate) {
                Ok(recorder) => Some(recorder),
                Err(e) => {
                    warn!(error = %e, "session recording disabled");
                    None
                }
            }
        } else {
            None
        };

        let memory = ConversationMemory::new(
            config.llm.system_prompt.clone(),
            config.memory.max_messages,
            config.memory.max_tokens,
        );

        let executor = ToolExecutor::new(
            config.tools.max_concurrent,
            std::time::Duration::from_millis(config.tools.timeout_ms),
        );

        let (producer, frames) = frame_queue();
        let playback = shared_playback();

        // Sync channel: the pipeline thread reports device-open success or
        // failure back to this call.
        let (open_tx, open_rx) = std::sync::mpsc::channel::<Result<()>>();
        let (done_tx, done_rx) = std::sync::mpsc::channel::<()>();
        self.done_rx = Some(done_rx);

        tokio::task::spawn_blocking(move || {
            // Devices must be opened on THIS thread — cpal::Stream is !Send.
            let capture =
                match AudioCapture::open(&config.audio, producer, Arc::clone(&running)) {
                    Ok(c) => c,
                    Err(e) => {
                        let _ = open_tx.send(Err(e));
                        running.store(false, Ordering::SeqCst);
                        return;
                    }
                };
            let output = match AudioOutput::open(&config.audio, playback.clone()) {
                Ok(o) => o,
                Err(e) => {
                    let _ = open_tx.send(Err(e));
                    running.store(false, Ordering::SeqCst);
                    return;
                }
            };
            let _ = open_tx.send(Ok(()));

            // Blocking HTTP must stay off the async threads.
            if config.llm.warmup_translation_model && config.llm.response_language != "en" {
                llm.warm_up_translator(&config.llm.response_language);
            }

            let tx = TxController::new(playback, output.device_rate, config.tx.max_transmit_ms);

            let mut tts = TtsEngine::new(config.tts.clone(), config.audio.sample_rate);
            // Warm the cache for the phrases every failure path reaches for.
            let language = config.llm.response_language.clone();
            for key in [
                PhraseKey::StandBy,
                PhraseKey::ServerOffline,
                PhraseKey::ErrorStandBy,
                PhraseKey::SayAgain,
            ] {
                tts.preload_phrase(phrase(key, &language));
            }

            let endpointer = EnergyEndpointer::new(config.vad.clone(), config.audio.sample_rate);
            let router = Router::new(config.router.clone());

            pipeline::run(PipelineContext {
                endpointer: Box::new(endpointer),
                stt,
                router,
                chat: Box::new(llm),
                tts: Box::new(tts),
                tx,
                tools,
                executor,
                memory,
                summarizer,
                recorder,
                frames,
                running,
                config,
            });

            // Streams drop here, on the thread that created them.
            capture.stop();
            drop(capture);
            drop(output);
            let _ = done_tx.send(());
        });

        match open_rx.recv() {
            Ok(Ok(())) => {
                info!("agent started — listening");
                Ok(())
            }
            Ok(Err(e)) => {
                self.running.store(false, Ordering::SeqCst);
                Err(e)
            }
            Err(_) => {
                self.running.store(false, Ordering::SeqCst);
                Err(SkywaveError::Other(anyhow::anyhow!(
                    "pipeline task died before confirming device open"
                )))
            }
        }
    }

    /// Request shutdown. The pipeline notices within one frame timeout.
    pub fn stop(&self) {
        if self.running.swap(false, Ordering::SeqCst) {
            info!("agent stop requested");
        }
    }

    /// Block until the pipeline thread has exited. Call after `stop()`.
    pub fn wait(&mut self) {
        if let Some(done_rx) = self.done_rx.take() {
            let _ = done_rx.recv();
        }
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }
}
