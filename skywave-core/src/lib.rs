//! # skywave-core
//!
//! Push-to-talk voice agent engine for half-duplex radio channels.
//!
//! ## Architecture
//!
//! ```text
//! Receiver → AudioCapture → frame queue → pipeline (spawn_blocking)
//!                                             │
//!                                       VAD endpointer
//!                                             │ SpeechEnd
//!                                   STT → gate → router
//!                                             │
//!                        fast path ◄──────────┴──────────► LLM + tools
//!                                             │
//!                                      TTS (piper worker)
//!                                             │
//!                             TX controller → playback → guard period
//! ```
//!
//! The turn state machine ([`turn::TurnStateMachine`]) is the single source
//! of truth; the guard period after each transmission keeps the agent from
//! answering its own audio. Background workers: the persistent synthesizer
//! process, the conversation summarizer, and the bounded tool executor.

#![forbid(unsafe_code)]
#![warn(clippy::all)]

pub mod agent;
pub mod audio;
pub mod config;
pub mod error;
pub mod llm;
pub mod memory;
pub mod phrases;
pub mod router;
pub mod session;
pub mod stt;
pub mod tools;
pub mod tts;
pub mod turn;
pub mod tx;
pub mod vad;

// Convenience re-exports for downstream crates
pub use agent::{PipelineContext, VoiceAgent, VAD_GUARD_PERIOD_MS};
pub use config::AgentConfig;
pub use error::{Result, SkywaveError};
pub use memory::{ConversationMemory, ConversationMessage, Role};
pub use router::{Plan, Router};
pub use stt::{SpeechToText, Transcript};
pub use tools::{Tool, ToolCall, ToolDefinition, ToolRegistry};
pub use turn::{TurnState, TurnStateMachine};
