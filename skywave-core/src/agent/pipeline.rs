//! The turn pipeline — one blocking loop at the audio frame cadence.
//!
//! ## Per frame
//!
//! ```text
//! 1. Read one frame (timeout → retry)
//! 2. Session recorder (always, guard included)
//! 3. Transmitting + playback drained → settle, arm guard, re-listen
//! 4. WaitingForChannelClear + channel quiet → release pending response
//! 5. IdleListening inside the guard window → drop frame without VAD
//! 6. Endpointer: SpeechStart / SpeechEnd / None
//! ```
//!
//! ## Per turn (SpeechEnd)
//!
//! finalize → min-speech check → STT → transcript gate → wake word →
//! router → plan (fast path, or ack + clarifier + LLM tool loop) →
//! hygiene + "over." → synthesis → TX → guard.
//!
//! The whole loop runs on one `spawn_blocking` thread; LLM and tool calls
//! block it by design (half-duplex — there is nothing to listen to while
//! we think). Failures inside a turn become radio phrases, never panics.

use std::sync::{
    atomic::{AtomicBool, Ordering},
    Arc,
};
use std::time::{Duration, Instant};

use crossbeam_channel::Receiver;
use tracing::{debug, info, info_span, warn};

use crate::{
    audio::frame::{AudioBuffer, AudioFrame},
    config::{AgentConfig, BlankBehavior},
    llm::{
        clarifier::{self, Clarification},
        hygiene,
        summarizer::{Summarizer, SUMMARY_MIN_MESSAGES},
        ChatModel, GenerateRequest, MAX_TOOL_ITERATIONS,
    },
    memory::{ConversationMemory, ConversationMessage},
    phrases::{self, PhraseKey},
    router::{Plan, Router},
    session::SessionRecorder,
    stt::{gate_transcript, SpeechToText, Transcript},
    tools::{executor::ToolExecutor, ToolOutcome, ToolRegistry},
    tts::Synthesizer,
    turn::{SpeechEndDisposition, TurnEvent, TurnState, TurnStateMachine},
    tx::TxController,
    vad::{Endpointer, VadEvent},
};

/// VAD events stay suppressed this long after the guard timer arms.
pub const VAD_GUARD_PERIOD_MS: u64 = 500;

/// Sleep between frames so the loop tracks the audio cadence.
const FRAME_PACING: Duration = Duration::from_millis(1);

/// Frame read timeout before the retry path.
const FRAME_READ_TIMEOUT: Duration = Duration::from_millis(100);

/// Poll interval while draining an acknowledgement transmission.
const ACK_DRAIN_POLL: Duration = Duration::from_millis(10);

/// Progress log cadence while receiving speech (frames).
const RECEIVE_LOG_EVERY: u64 = 50;

/// Command phrase that must appear in wake-word mode.
const WAKE_PHRASE: &str = "hey memo";

/// Everything the loop needs, passed as one struct so the spawn closure
/// stays tidy.
pub struct PipelineContext {
    pub config: AgentConfig,
    pub endpointer: Box<dyn Endpointer>,
    pub stt: Box<dyn SpeechToText>,
    pub router: Router,
    pub chat: Box<dyn ChatModel>,
    pub tts: Box<dyn Synthesizer>,
    pub tx: TxController,
    pub tools: ToolRegistry,
    pub executor: ToolExecutor,
    pub memory: ConversationMemory,
    pub summarizer: Option<Summarizer>,
    pub recorder: Option<SessionRecorder>,
    pub frames: Receiver<AudioFrame>,
    pub running: Arc<AtomicBool>,
}

struct Loop {
    ctx: PipelineContext,
    turns: TurnStateMachine,
    guard_armed_at: Option<Instant>,
    pending_tx: Option<AudioBuffer>,
    last_speech_end: Option<Instant>,
    receive_frames: u64,
    turn_seq: u64,
}

/// Run the pipeline until `ctx.running` goes false.
pub fn run(ctx: PipelineContext) {
    info!("pipeline started");
    let mut state = Loop {
        ctx,
        turns: TurnStateMachine::new(),
        guard_armed_at: None,
        pending_tx: None,
        last_speech_end: None,
        receive_frames: 0,
        turn_seq: 0,
    };

    while state.ctx.running.load(Ordering::Relaxed) {
        let frame = match state.ctx.frames.recv_timeout(FRAME_READ_TIMEOUT) {
            Ok(frame) => frame,
            Err(_) => continue,
        };
        state.handle_frame(frame);
        std::thread::sleep(FRAME_PACING);
    }

    state.shutdown();
    info!("pipeline stopped");
}

impl Loop {
    fn handle_frame(&mut self, frame: AudioFrame) {
        if let Some(recorder) = self.ctx.recorder.as_mut() {
            recorder.append_frame(&frame);
        }

        match self.turns.state() {
            TurnState::Transmitting => self.poll_transmission(),
            TurnState::WaitingForChannelClear => self.monitor_channel(&frame),
            TurnState::IdleListening if self.in_guard_window() => {
                // Keep the queue drained but emit no events.
            }
            _ => self.listen(&frame),
        }
    }

    // ── Transmit side ────────────────────────────────────────────────────

    fn poll_transmission(&mut self) {
        let Some(error) = self.ctx.tx.poll_complete() else {
            return;
        };
        if let Some(message) = error {
            warn!(error = message.as_str(), "transmission ended with playback error");
        }

        // Let the analog chain settle before re-opening the receiver.
        std::thread::sleep(Duration::from_millis(self.ctx.config.tx.standby_delay_ms));

        if let Some(transition) = self.turns.apply(TurnEvent::PlaybackComplete) {
            if transition.arms_guard() {
                self.arm_guard();
            }
        }
        self.flush_capture();
        self.ctx.endpointer.reset();
        self.record_event("playback_complete", serde_json::json!({}), None);
    }

    fn arm_guard(&mut self) {
        self.guard_armed_at = Some(Instant::now());
        debug!(guard_ms = VAD_GUARD_PERIOD_MS, "guard timer armed");
    }

    fn in_guard_window(&self) -> bool {
        self.guard_armed_at
            .map(|t| t.elapsed() < Duration::from_millis(VAD_GUARD_PERIOD_MS))
            .unwrap_or(false)
    }

    fn flush_capture(&self) {
        while self.ctx.frames.try_recv().is_ok() {}
    }

    // ── Channel-clear discipline ─────────────────────────────────────────

    fn monitor_channel(&mut self, frame: &AudioFrame) {
        match self.ctx.endpointer.process(frame) {
            VadEvent::SpeechStart => {
                debug!("channel busy again while waiting to transmit");
                self.turns.apply(TurnEvent::SpeechStart { emergency: false });
                return;
            }
            VadEvent::SpeechEnd => {
                self.last_speech_end = Some(Instant::now());
            }
            VadEvent::None => {}
        }

        if self.ctx.endpointer.is_in_speech() {
            return;
        }
        let quiet_long_enough = self
            .last_speech_end
            .map(|t| {
                t.elapsed() >= Duration::from_millis(self.ctx.config.tx.channel_clear_silence_ms)
            })
            .unwrap_or(true);
        if !quiet_long_enough {
            return;
        }

        // The pending buffer is consumed exactly once.
        if let Some(response) = self.pending_tx.take() {
            info!("channel clear; releasing pending response");
            self.ctx.tx.transmit(response);
            self.turns.apply(TurnEvent::ChannelClear);
        } else {
            warn!("channel clear with no pending response; recovering");
            self.turns.recover_to_idle();
        }
    }

    // ── Receive side ─────────────────────────────────────────────────────

    fn listen(&mut self, frame: &AudioFrame) {
        match self.ctx.endpointer.process(frame) {
            VadEvent::SpeechStart => {
                if self
                    .turns
                    .apply(TurnEvent::SpeechStart { emergency: false })
                    .is_some()
                {
                    self.receive_frames = 0;
                    self.record_event("speech_start", serde_json::json!({}), None);
                }
            }
            VadEvent::SpeechEnd => {
                self.last_speech_end = Some(Instant::now());
                if self.turns.state() == TurnState::ReceivingSpeech {
                    self.run_turn();
                }
            }
            VadEvent::None => {
                if self.turns.state() == TurnState::ReceivingSpeech {
                    self.receive_frames += 1;
                    if self.receive_frames % RECEIVE_LOG_EVERY == 0 {
                        debug!(
                            segment_ms = self.ctx.endpointer.current_segment().duration_ms(),
                            "still receiving"
                        );
                    }
                }
            }
        }
    }

    // ── Turn execution ───────────────────────────────────────────────────

    fn run_turn(&mut self) {
        self.turn_seq += 1;
        let span = info_span!("turn", seq = self.turn_seq);
        let _enter = span.enter();

        // A prepared response outranks whatever was just said: wait for the
        // channel and send it.
        if self.pending_tx.is_some() {
            debug!("speech ended with a response pending; awaiting channel clear");
            self.ctx.endpointer.reset();
            self.turns
                .apply(TurnEvent::SpeechEnd(SpeechEndDisposition::ResponsePending));
            return;
        }

        let segment = self.ctx.endpointer.finalize_segment();
        if segment.duration_ms() < self.ctx.config.vad.min_speech_ms {
            debug!(
                segment_ms = segment.duration_ms(),
                min_ms = self.ctx.config.vad.min_speech_ms,
                "segment too short; discarded"
            );
            self.record_event(
                "utterance_discarded",
                serde_json::json!({"duration_ms": segment.duration_ms()}),
                None,
            );
            self.turns
                .apply(TurnEvent::SpeechEnd(SpeechEndDisposition::Dropped));
            return;
        }

        let stt_started = Instant::now();
        let transcript = match self.ctx.stt.transcribe(&segment) {
            Ok(t) => t,
            Err(e) => {
                warn!(error = %e, "transcription failed");
                self.turns
                    .apply(TurnEvent::SpeechEnd(SpeechEndDisposition::Process));
                let text = phrases::for_error(&e, &self.ctx.config.llm.response_language);
                self.speak_final(hygiene::ensure_over(text));
                return;
            }
        };
        info!(
            text = transcript.text.as_str(),
            confidence = transcript.confidence,
            latency_ms = stt_started.elapsed().as_millis() as u64,
            "transcribed"
        );
        let audio_path = self
            .ctx
            .recorder
            .as_mut()
            .and_then(|r| r.record_utterance(&segment));
        self.record_event(
            "transcript",
            serde_json::json!({
                "text": transcript.text,
                "token_count": transcript.token_count,
                "confidence": transcript.confidence,
            }),
            audio_path,
        );

        if gate_transcript(
            &transcript,
            &self.ctx.config.transcript_gate,
            &self.ctx.config.stt.blank_sentinel,
        )
        .is_err()
        {
            self.handle_blank_turn();
            return;
        }

        let transcript = match self.apply_wake_word(transcript) {
            Some(t) => t,
            None => {
                debug!("wake phrase absent; turn dropped");
                self.turns
                    .apply(TurnEvent::SpeechEnd(SpeechEndDisposition::Dropped));
                return;
            }
        };

        let plan = self.ctx.router.decide(&transcript, &self.ctx.memory);
        info!(needs_llm = plan.needs_llm(), ?plan, "routed");
        self.record_event(
            "plan",
            serde_json::json!({"needs_llm": plan.needs_llm()}),
            None,
        );

        self.turns
            .apply(TurnEvent::SpeechEnd(SpeechEndDisposition::Process));
        self.execute_plan(plan, &transcript);
    }

    /// Gate failed: perform the configured blank behavior.
    fn handle_blank_turn(&mut self) {
        self.record_event("transcript_gate_rejected", serde_json::json!({}), None);
        match self.ctx.config.transcript_blank_behavior.behavior {
            BlankBehavior::None => {
                self.turns
                    .apply(TurnEvent::SpeechEnd(SpeechEndDisposition::Dropped));
            }
            BlankBehavior::SayAgain => {
                let phrase = self
                    .ctx
                    .config
                    .transcript_blank_behavior
                    .say_again_phrase
                    .clone();
                self.turns
                    .apply(TurnEvent::SpeechEnd(SpeechEndDisposition::Process));
                self.speak_final(hygiene::ensure_over(&phrase));
            }
            BlankBehavior::Beep => {
                self.turns
                    .apply(TurnEvent::SpeechEnd(SpeechEndDisposition::Process));
                let tone = self.ctx.tts.preroll_buffer();
                self.transmit_response(tone, "beep");
            }
        }
    }

    /// Wake-word mode: require the phrase, strip it before routing.
    fn apply_wake_word(&self, transcript: Transcript) -> Option<Transcript> {
        if !self.ctx.config.wake_word.enabled {
            return Some(transcript);
        }
        let lowered = transcript.text.to_lowercase();
        let position = lowered.find(WAKE_PHRASE)?;
        // Slice the original when lowercasing was 1:1 on byte length;
        // otherwise the lowered text is close enough for routing.
        let end = position + WAKE_PHRASE.len();
        let source = if transcript.text.len() == lowered.len()
            && transcript.text.is_char_boundary(position)
            && transcript.text.is_char_boundary(end)
        {
            transcript.text.as_str()
        } else {
            lowered.as_str()
        };
        let mut stripped = String::new();
        stripped.push_str(&source[..position]);
        stripped.push_str(&source[end..]);
        let stripped = stripped.trim().trim_start_matches(',').trim().to_string();
        if stripped.is_empty() {
            return None;
        }
        Some(Transcript {
            text: stripped,
            ..transcript
        })
    }

    fn execute_plan(&mut self, plan: Plan, transcript: &Transcript) {
        match plan {
            Plan::NoOp => {
                self.turns.recover_to_idle();
            }
            Plan::Speak { answer_text } => {
                let spoken = hygiene::ensure_over(&answer_text);
                self.remember_exchange(&transcript.text, &spoken);
                self.speak_final(spoken);
            }
            Plan::Fallback { fallback_text } => {
                self.speak_final(hygiene::ensure_over(&fallback_text));
            }
            Plan::SpeakAckThenAnswer { ack_text, prompt } => {
                if let Some(ack) = ack_text {
                    self.transmit_ack(&hygiene::ensure_over(&ack));
                }
                let spoken = self.llm_answer(&prompt);
                self.remember_exchange(&prompt, &spoken);
                self.speak_final(spoken);
            }
        }
    }

    /// Transmit the acknowledgement and drain it inline, without leaving
    /// `Thinking` — the guard arms once, after the real answer.
    fn transmit_ack(&mut self, text: &str) {
        let audio = self.synthesize(text);
        if audio.is_empty() {
            return;
        }
        self.record_event("ack", serde_json::json!({"text": text}), None);
        self.ctx.tx.transmit(audio);
        while self.ctx.tx.is_transmitting() && self.ctx.running.load(Ordering::Relaxed) {
            std::thread::sleep(ACK_DRAIN_POLL);
        }
        // Consume the completion so the main loop does not treat it as the
        // end of the turn.
        let _ = self.ctx.tx.poll_complete();
    }

    /// The LLM path: clarifier, bounded history with summary prefix, tool
    /// loop, hygiene, translation. Never fails — errors come back as
    /// phrases.
    fn llm_answer(&mut self, prompt: &str) -> String {
        let language = self.ctx.config.llm.response_language.clone();

        // Clarifier pre-pass.
        let mut prompt = prompt.to_string();
        let proxy = Transcript::new(prompt.clone(), prompt.split_whitespace().count(), 1.0);
        if clarifier::should_clarify(
            &self.ctx.config.clarifier,
            &self.ctx.memory,
            &proxy,
            &self.ctx.config.stt.blank_sentinel,
        ) {
            match clarifier::clarify(
                self.ctx.chat.as_ref(),
                &self.ctx.config.clarifier,
                &self.ctx.memory,
                &proxy,
            ) {
                Clarification::Rewritten(rewritten) => prompt = rewritten,
                Clarification::Unknown => {
                    return hygiene::ensure_over(&self.ctx.config.router.repair_phrase);
                }
                Clarification::Skipped => {}
            }
        }

        // Bounded history, with the background summary as a recap at the
        // front when one exists.
        let mut history = self
            .ctx
            .memory
            .recent_turns(self.ctx.config.llm.context_max_turns_to_send);
        if let Some(summary) = self
            .ctx
            .summarizer
            .as_ref()
            .and_then(Summarizer::current_summary)
        {
            history.insert(
                0,
                ConversationMessage::user(format!("Conversation summary: {summary}")),
            );
        }

        let definitions = if self.ctx.tools.is_empty() {
            Vec::new()
        } else {
            self.ctx.tools.definitions()
        };

        // Tool loop.
        let mut user_prompt = prompt.clone();
        let mut answer: Option<String> = None;
        for iteration in 0..MAX_TOOL_ITERATIONS {
            let request = GenerateRequest {
                user_prompt: &user_prompt,
                tools: &definitions,
                history: &history,
                ..Default::default()
            };
            let outcome = match self.ctx.chat.generate(&request) {
                Ok(outcome) => outcome,
                Err(e) => {
                    warn!(error = %e, "generation failed");
                    return hygiene::ensure_over(phrases::for_error(&e, &language));
                }
            };

            if outcome.is_truncated() {
                warn!(stop_reason = outcome.stop_reason.as_str(), "response truncated");
                return hygiene::ensure_over(&self.ctx.config.llm.truncation.fallback_phrase);
            }

            if outcome.tool_calls.is_empty() {
                if !outcome.content.trim().is_empty() {
                    answer = Some(outcome.content);
                }
                break;
            }

            debug!(
                iteration,
                calls = outcome.tool_calls.len(),
                "executing tool calls"
            );
            // Move the user message into the history so follow-up requests
            // carry the full exchange in order.
            if !user_prompt.is_empty() {
                history.push(ConversationMessage::user(user_prompt.clone()));
                user_prompt = String::new();
            }
            history.push(ConversationMessage::assistant_tool_calls(
                outcome.tool_calls.clone(),
            ));
            for call in outcome.tool_calls {
                let result = match self.ctx.tools.get(&call.name) {
                    Some(tool) => self.ctx.executor.execute_sync(tool, call.clone()),
                    None => ToolOutcome::err(format!("unknown tool '{}'", call.name)),
                };
                self.record_event(
                    "tool_call",
                    serde_json::json!({"name": call.name, "success": result.success}),
                    None,
                );
                history.push(ConversationMessage::tool(
                    call.id,
                    result.into_message_content(),
                ));
            }
        }

        let Some(answer) = answer else {
            warn!("tool loop exhausted without an answer");
            return hygiene::ensure_over(phrases::phrase(PhraseKey::StandBy, &language));
        };

        let mut cleaned = hygiene::clean_response(&answer);
        if language != "en" {
            match self.ctx.chat.translate(&cleaned, &language) {
                Ok(translated) => cleaned = hygiene::clean_response(&translated),
                Err(e) => {
                    warn!(error = %e, "translation failed");
                    return hygiene::ensure_over(phrases::for_error(&e, &language));
                }
            }
        }
        hygiene::ensure_over(&cleaned)
    }

    fn remember_exchange(&mut self, user_text: &str, spoken: &str) {
        if !self.ctx.config.memory.enabled {
            return;
        }
        self.ctx.memory.push(ConversationMessage::user(user_text));
        self.ctx.memory.push(ConversationMessage::assistant(spoken));

        if self.ctx.memory.len() >= SUMMARY_MIN_MESSAGES {
            if let Some(summarizer) = self.ctx.summarizer.as_ref() {
                summarizer.submit_snapshot(self.ctx.memory.view());
            }
        }
    }

    fn synthesize(&mut self, text: &str) -> AudioBuffer {
        if self.ctx.config.tx.enable_start_chirp {
            self.ctx.tts.synth_vox(text)
        } else {
            self.ctx.tts.synth(text)
        }
    }

    /// Synthesize and transmit the turn's final response.
    fn speak_final(&mut self, text: String) {
        let audio = self.synthesize(&text);
        if audio.is_empty() {
            warn!("synthesis produced no audio; suppressing transmission");
            self.turns.recover_to_idle();
            self.ctx.endpointer.reset();
            return;
        }
        self.record_event("response", serde_json::json!({"text": text}), None);
        self.transmit_response(audio, "response");
    }

    fn transmit_response(&mut self, mut audio: AudioBuffer, kind: &str) {
        if self.ctx.config.tx.enable_end_chirp {
            audio.extend(&self.ctx.tts.end_tone_buffer());
        }
        let tts_path = self
            .ctx
            .recorder
            .as_mut()
            .and_then(|r| r.record_tts(&audio));
        self.record_event(
            "tx_begin",
            serde_json::json!({"kind": kind, "duration_ms": audio.duration_ms()}),
            tts_path,
        );

        let channel_busy = self.ctx.endpointer.is_in_speech();
        if channel_busy {
            debug!("channel busy at response-ready; holding transmission");
            self.pending_tx = Some(audio);
            self.turns
                .apply(TurnEvent::ResponseReady { channel_busy: true });
        } else {
            self.ctx.tx.transmit(audio);
            self.turns
                .apply(TurnEvent::ResponseReady { channel_busy: false });
        }
    }

    fn record_event(
        &mut self,
        event_type: &str,
        data: serde_json::Value,
        audio_path: Option<String>,
    ) {
        if let Some(recorder) = self.ctx.recorder.as_mut() {
            recorder.log_event(event_type, data, audio_path);
        }
    }

    fn shutdown(mut self) {
        self.ctx.tx.stop();
        self.ctx.tts.shutdown_worker();
        if let Some(mut summarizer) = self.ctx.summarizer.take() {
            summarizer.shutdown();
        }
        self.ctx.executor.shutdown();
        if let Some(mut recorder) = self.ctx.recorder.take() {
            recorder.finalize();
        }
    }
}
