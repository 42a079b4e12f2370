//! Background conversation summarizer.
//!
//! One worker thread waits on a depth-1 snapshot queue; a newer snapshot
//! replaces an unprocessed one (latest wins). The worker drops low-signal
//! snapshots, formats the dialogue as `role: content` lines without the
//! system message, asks the model for a compact recap and publishes it
//! under a mutex for prompt assembly. Shutdown is explicit and joined,
//! never detached.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;

use crossbeam_channel::{bounded, Receiver, Sender, TrySendError};
use parking_lot::Mutex;
use tracing::{debug, info, warn};

use crate::config::GateConfig;
use crate::memory::{ConversationMessage, Role};
use crate::stt::{gate_transcript, Transcript};

/// Memory size at which the orchestrator starts submitting snapshots.
pub const SUMMARY_MIN_MESSAGES: usize = 4;

enum Job {
    Snapshot(Vec<ConversationMessage>),
    Shutdown,
}

/// Produces a summary string from formatted dialogue. Production passes a
/// closure over [`super::LlmClient`]; tests pass canned functions.
pub type SummaryFn = dyn Fn(&str) -> crate::error::Result<String> + Send + 'static;

pub struct Summarizer {
    job_tx: Sender<Job>,
    /// Receiver clone used to evict a stale snapshot (crossbeam is MPMC).
    job_rx: Receiver<Job>,
    worker: Option<JoinHandle<()>>,
    summary: Arc<Mutex<Option<String>>>,
    shutting_down: AtomicBool,
}

impl Summarizer {
    /// Spawn the worker. `gate`/`blank_sentinel` filter snapshots whose
    /// last user message carries no signal worth summarizing.
    pub fn spawn(
        summarize: Box<SummaryFn>,
        gate: GateConfig,
        blank_sentinel: String,
    ) -> Self {
        let (job_tx, job_rx) = bounded::<Job>(1);
        let worker_rx = job_rx.clone();
        let summary: Arc<Mutex<Option<String>>> = Arc::new(Mutex::new(None));
        let published = Arc::clone(&summary);

        let worker = std::thread::Builder::new()
            .name("summarizer".into())
            .spawn(move || {
                while let Ok(job) = worker_rx.recv() {
                    let snapshot = match job {
                        Job::Snapshot(s) => s,
                        Job::Shutdown => break,
                    };

                    if !snapshot_has_signal(&snapshot, &gate, &blank_sentinel) {
                        debug!("skipping low-signal snapshot");
                        continue;
                    }

                    let dialogue = format_dialogue(&snapshot);
                    match summarize(&dialogue) {
                        Ok(text) => {
                            let text = text.trim().to_string();
                            if !text.is_empty() {
                                debug!(chars = text.len(), "summary updated");
                                *published.lock() = Some(text);
                            }
                        }
                        Err(e) => warn!(error = %e, "summarization failed"),
                    }
                }
                info!("summarizer worker exiting");
            })
            .expect("spawn summarizer worker");

        Self {
            job_tx,
            job_rx,
            worker: Some(worker),
            summary,
            shutting_down: AtomicBool::new(false),
        }
    }

    /// Queue a history snapshot; an unprocessed older snapshot is replaced
    /// (latest wins).
    pub fn submit_snapshot(&self, snapshot: Vec<ConversationMessage>) {
        if self.shutting_down.load(Ordering::Acquire) {
            return;
        }
        match self.job_tx.try_send(Job::Snapshot(snapshot)) {
            Ok(()) => {}
            Err(TrySendError::Full(job)) => {
                let _ = self.job_rx.try_recv();
                let _ = self.job_tx.try_send(job);
            }
            Err(TrySendError::Disconnected(_)) => {}
        }
    }

    /// Most recently published summary, if any.
    pub fn current_summary(&self) -> Option<String> {
        self.summary.lock().clone()
    }

    /// Unblock the queue and join the worker.
    pub fn shutdown(&mut self) {
        self.shutting_down.store(true, Ordering::Release);
        let _ = self.job_tx.send(Job::Shutdown);
        if let Some(worker) = self.worker.take() {
            let _ = worker.join();
        }
    }
}

impl Drop for Summarizer {
    fn drop(&mut self) {
        if self.worker.is_some() {
            self.shutdown();
        }
    }
}

/// The prompt the production closure should use.
pub fn summary_request_prompt(dialogue: &str) -> String {
    format!(
        "Summarize this radio conversation in at most three short \
         sentences, keeping call signs, frequencies and requests:\n\n{dialogue}"
    )
}

fn snapshot_has_signal(
    snapshot: &[ConversationMessage],
    gate: &GateConfig,
    blank_sentinel: &str,
) -> bool {
    let Some(last_user) = snapshot.iter().rev().find(|m| m.role == Role::User) else {
        return false;
    };
    let proxy = Transcript::new(
        last_user.content.clone(),
        last_user.content.split_whitespace().count(),
        1.0,
    );
    gate_transcript(&proxy, gate, blank_sentinel).is_ok()
}

/// `role: content` lines, system dropped.
fn format_dialogue(snapshot: &[ConversationMessage]) -> String {
    snapshot
        .iter()
        .filter(|m| m.role != Role::System)
        .map(|m| {
            let role = match m.role {
                Role::User => "user",
                Role::Assistant => "assistant",
                Role::Tool => "tool",
                Role::System => unreachable!(),
            };
            format!("{role}: {}", m.content)
        })
        .collect::<Vec<_>>()
        .join("\n")
}
