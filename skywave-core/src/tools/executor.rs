//! Bounded tool execution pool.
//!
//! `max_concurrent` worker threads pop submissions FIFO from one crossbeam
//! queue. Each call runs under `catch_unwind` with a per-call deadline; a
//! call that outlives its deadline yields `Error: timeout` while the
//! straggler finishes in the background. Completions travel back as
//! messages on the sink the submitter supplied — no stored callbacks.

use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::{
    atomic::{AtomicUsize, Ordering},
    Arc,
};
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

use crossbeam_channel::{bounded, unbounded, Receiver, RecvTimeoutError, Sender};
use tracing::{debug, warn};

use super::{Tool, ToolCall, ToolOutcome};

/// Margin added to the sync wrapper's latch wait so the worker-side
/// deadline always fires first.
const SYNC_LATCH_MARGIN: Duration = Duration::from_millis(500);

struct Task {
    tool: Arc<dyn Tool>,
    call: ToolCall,
    timeout: Duration,
    completion: Sender<(ToolCall, ToolOutcome)>,
}

pub struct ToolExecutor {
    task_tx: Sender<Task>,
    workers: Vec<JoinHandle<()>>,
    /// Submitted but not yet completed (queued + running).
    pending: Arc<AtomicUsize>,
    default_timeout: Duration,
}

impl ToolExecutor {
    pub fn new(max_concurrent: usize, default_timeout: Duration) -> Self {
        let (task_tx, task_rx) = unbounded::<Task>();
        let pending = Arc::new(AtomicUsize::new(0));

        let workers = (0..max_concurrent.max(1))
            .map(|worker_id| {
                let task_rx: Receiver<Task> = task_rx.clone();
                let pending = Arc::clone(&pending);
                std::thread::Builder::new()
                    .name(format!("tool-worker-{worker_id}"))
                    .spawn(move || {
                        while let Ok(task) = task_rx.recv() {
                            let outcome = run_with_deadline(&task);
                            let _ = task.completion.send((task.call, outcome));
                            pending.fetch_sub(1, Ordering::AcqRel);
                        }
                    })
                    .expect("spawn tool worker")
            })
            .collect();

        Self {
            task_tx,
            workers,
            pending,
            default_timeout,
        }
    }

    /// Queue a call; the outcome arrives on `completion`.
    pub fn submit(
        &self,
        tool: Arc<dyn Tool>,
        call: ToolCall,
        completion: Sender<(ToolCall, ToolOutcome)>,
    ) {
        self.pending.fetch_add(1, Ordering::AcqRel);
        let task = Task {
            tool,
            call,
            timeout: self.default_timeout,
            completion,
        };
        if self.task_tx.send(task).is_err() {
            self.pending.fetch_sub(1, Ordering::AcqRel);
            warn!("tool executor is shut down; submission dropped");
        }
    }

    /// Synchronous variant: submit and block on a completion latch.
    pub fn execute_sync(&self, tool: Arc<dyn Tool>, call: ToolCall) -> ToolOutcome {
        let (done_tx, done_rx) = bounded(1);
        let name = call.name.clone();
        self.submit(tool, call, done_tx);
        match done_rx.recv_timeout(self.default_timeout + SYNC_LATCH_MARGIN) {
            Ok((_, outcome)) => outcome,
            Err(_) => {
                warn!(tool = name.as_str(), "tool completion latch timed out");
                ToolOutcome::err("timeout")
            }
        }
    }

    /// True iff the queue is empty and no worker is running a call.
    pub fn is_idle(&self) -> bool {
        self.pending.load(Ordering::Acquire) == 0
    }

    /// Poll until idle or `timeout` elapses. Returns whether idle.
    pub fn wait_for_completion(&self, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        while !self.is_idle() {
            if Instant::now() >= deadline {
                return false;
            }
            std::thread::sleep(Duration::from_millis(5));
        }
        true
    }

    /// Close the queue and join every worker.
    pub fn shutdown(self) {
        drop(self.task_tx);
        for worker in self.workers {
            let _ = worker.join();
        }
    }
}

fn run_with_deadline(task: &Task) -> ToolOutcome {
    let tool = Arc::clone(&task.tool);
    let arguments = task.call.arguments.clone();
    let name = task.call.name.clone();

    let (tx, rx) = bounded(1);
    let runner = std::thread::Builder::new()
        .name(format!("tool-call-{name}"))
        .spawn(move || {
            let outcome = match catch_unwind(AssertUnwindSafe(|| tool.execute(&arguments))) {
                Ok(outcome) => outcome,
                Err(_) => ToolOutcome::err("tool panicked"),
            };
            let _ = tx.send(outcome);
        });

    let runner = match runner {
        Ok(handle) => handle,
        Err(e) => return ToolOutcome::err(format!("spawn failed: {e}")),
    };

    match rx.recv_timeout(task.timeout) {
        Ok(outcome) => {
            let _ = runner.join();
            debug!(tool = name.as_str(), success = outcome.success, "tool call finished");
            outcome
        }
        Err(RecvTimeoutError::Timeout) => {
            warn!(tool = name.as_str(), timeout_ms = task.timeout.as_millis() as u64, "tool call timed out");
            ToolOutcome::err("timeout")
        }
        Err(RecvTimeoutError::Disconnected) => ToolOutcome::err("tool runner died"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tools::ToolDefinition;

    struct SleepyTool {
        sleep: Duration,
        reply: &'static str,
    }

    impl Tool for SleepyTool {
        fn definition(&self) -> ToolDefinition {
            ToolDefinition {
                name: "sleepy".into(),
                description: "sleeps then replies".into(),
                parameters: serde_json::json!({"type": "object"}),
            }
        }

        fn execute(&self, _arguments: &serde_json::Value) -> ToolOutcome {
            std::thread::sleep(self.sleep);
            ToolOutcome::ok(self.reply)
        }
    }

    struct PanickyTool;

    impl Tool for PanickyTool {
        fn definition(&self) -> ToolDefinition {
            ToolDefinition {
                name: "panicky".into(),
                description: "always panics".into(),
                parameters: serde_json::json!({"type": "object"}),
            }
        }

        fn execute(&self, _arguments: &serde_json::Value) -> ToolOutcome {
            panic!("intentional test panic");
        }
    }

    fn call(name: &str) -> ToolCall {
        ToolCall {
            id: "call-1".into(),
            name: name.into(),
            arguments: serde_json::Value::Null,
        }
    }

    #[test]
    fn sync_execution_returns_outcome() {
        let executor = ToolExecutor::new(2, Duration::from_secs(2));
        let outcome = executor.execute_sync(
            Arc::new(SleepyTool {
                sleep: Duration::from_millis(5),
                reply: "done",
            }),
            call("sleepy"),
        );
        assert!(outcome.success);
        assert_eq!(outcome.content, "done");
        executor.shutdown();
    }

    #[test]
    fn timeout_yields_error_timeout() {
        let executor = ToolExecutor::new(1, Duration::from_millis(50));
        let outcome = executor.execute_sync(
            Arc::new(SleepyTool {
                sleep: Duration::from_secs(5),
                reply: "late",
            }),
            call("sleepy"),
        );
        assert!(!outcome.success);
        assert_eq!(outcome.into_message_content(), "Error: timeout");
    }

    #[test]
    fn panic_is_captured_as_error() {
        let executor = ToolExecutor::new(1, Duration::from_secs(1));
        let outcome = executor.execute_sync(Arc::new(PanickyTool), call("panicky"));
        assert!(!outcome.success);
        assert_eq!(outcome.error.as_deref(), Some("tool panicked"));
        executor.shutdown();
    }

    #[test]
    fn async_submissions_are_fifo_per_worker() {
        let executor = ToolExecutor::new(1, Duration::from_secs(2));
        let (done_tx, done_rx) = bounded(8);
        for reply in ["first", "second", "third"] {
            executor.submit(
                Arc::new(SleepyTool {
                    sleep: Duration::from_millis(1),
                    reply,
                }),
                call("sleepy"),
                done_tx.clone(),
            );
        }
        let replies: Vec<String> = (0..3)
            .map(|_| done_rx.recv_timeout(Duration::from_secs(2)).unwrap().1.content)
            .collect();
        assert_eq!(replies, vec!["first", "second", "third"]);
        executor.shutdown();
    }

    #[test]
    fn idle_tracking_and_wait_for_completion() {
        let executor = ToolExecutor::new(2, Duration::from_secs(2));
        assert!(executor.is_idle());

        let (done_tx, _done_rx) = bounded(4);
        executor.submit(
            Arc::new(SleepyTool {
                sleep: Duration::from_millis(50),
                reply: "x",
            }),
            call("sleepy"),
            done_tx,
        );
        assert!(!executor.is_idle());
        assert!(executor.wait_for_completion(Duration::from_secs(2)));
        assert!(executor.is_idle());
        executor.shutdown();
    }
}
