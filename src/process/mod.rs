//! Supervision of external executables across process boundaries.
//!
//! [`ProcessWaiter`] polls the OS process table for a named executable and
//! waits for it to appear (optionally with a window) or to disappear, with a
//! hard deadline and optional escalation to a forced kill.
//!
//! Every wait runs on its own watcher thread. The watcher reports its single
//! outcome through a one-slot channel which the caller reads with a deadline
//! slightly past the wait's own timeout. A watcher wedged inside the process
//! table is left detached and the wait reports `Timeout`; a panic during
//! inspection becomes a process-control error.

pub mod table;


use std::sync::mpsc::{self, RecvTimeoutError};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use crate::error::UpdateError;

pub use table::{ProcessTable, SystemProcessTable};

/// Interval between process table polls.
pub const POLL_INTERVAL: Duration = Duration::from_millis(100);

/// Polls a watcher may overrun its timeout by before it is abandoned.
const GRACE_POLLS: u32 = 2;

/// Terminal outcome of a supervised wait.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WaitResult {
    /// The process was seen; for exit waits it then exited on its own.
    Found(u32),
    /// The process was not running when the exit wait started.
    NotFound,
    /// The deadline passed first.
    Timeout,
    /// The process was force-killed after the kill deadline and has exited.
    Terminated,
}

#[derive(Debug, Clone, Copy)]
enum WaitMode {
    Spawn { with_window: bool },
    Exit { kill_timeout: Option<Duration> },
}

struct WaitJob {
    name: String,
    mode: WaitMode,
    timeout: Option<Duration>,
    poll_interval: Duration,
}

impl WaitJob {
    fn run(&self, table: &dyn ProcessTable) -> WaitResult {
        let start = Instant::now();
        let mut outcome = WaitResult::NotFound;

        loop {
            let elapsed = start.elapsed();
            if self.timeout.is_some_and(|t| elapsed >= t) {
                return WaitResult::Timeout;
            }

            match (table.find_by_name(&self.name), self.mode) {
                (Some(pid), WaitMode::Spawn { with_window }) => {
                    if !with_window || table.has_window(pid) {
                        return WaitResult::Found(pid);
                    }
                }
                (Some(pid), WaitMode::Exit { kill_timeout }) => {
                    if kill_timeout.is_some_and(|k| elapsed >= k) {
                        if outcome != WaitResult::Terminated {
                            tracing::warn!(process = %self.name, pid, "kill deadline reached, terminating");
                        }
                        outcome = WaitResult::Terminated;
                        if let Err(e) = table.kill(pid) {
                            tracing::warn!(process = %self.name, pid, "kill failed: {e:#}");
                        }
                    } else {
                        outcome = WaitResult::Found(pid);
                    }
                }
                (None, WaitMode::Exit { .. }) => return outcome,
                (None, WaitMode::Spawn { .. }) => {}
            }

            thread::sleep(self.poll_interval);
        }
    }
}

/// Blocking waits on named processes.
///
/// Call from a background worker thread; each wait blocks for up to its timeout.
#[derive(Clone)]
pub struct ProcessWaiter {
    table: Arc<dyn ProcessTable>,
    poll_interval: Duration,
}

impl Default for ProcessWaiter {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for ProcessWaiter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProcessWaiter")
            .field("poll_interval", &self.poll_interval)
            .finish_non_exhaustive()
    }
}

impl ProcessWaiter {
    /// Waiter backed by the real OS process table.
    pub fn new() -> Self {
        Self::with_table(Arc::new(SystemProcessTable))
    }

    pub fn with_table(table: Arc<dyn ProcessTable>) -> Self {
        Self {
            table,
            poll_interval: POLL_INTERVAL,
        }
    }

    pub fn with_poll_interval(mut self, poll_interval: Duration) -> Self {
        self.poll_interval = poll_interval;
        self
    }

    /// Wait until a process called `name` exists.
    ///
    /// With `with_window`, the process must also own a window. `timeout = None`
    /// waits forever. Returns `Found(pid)` or `Timeout`.
    pub fn wait_for_process(
        &self,
        name: &str,
        timeout: Option<Duration>,
        with_window: bool,
    ) -> Result<WaitResult, UpdateError> {
        self.supervise(WaitJob {
            name: name.to_string(),
            mode: WaitMode::Spawn { with_window },
            timeout,
            poll_interval: self.poll_interval,
        })
    }

    /// Wait until no process called `name` exists.
    ///
    /// Returns `NotFound` when it was never running and `Found(pid)` when it
    /// exited on its own. Once `kill_timeout` elapses the process is killed on
    /// every poll and the wait returns `Terminated` after it is gone. `timeout`
    /// bounds the whole wait, kill included, and yields `Timeout`.
    pub fn wait_for_process_exit(
        &self,
        name: &str,
        timeout: Option<Duration>,
        kill_timeout: Option<Duration>,
    ) -> Result<WaitResult, UpdateError> {
        self.supervise(WaitJob {
            name: name.to_string(),
            mode: WaitMode::Exit { kill_timeout },
            timeout,
            poll_interval: self.poll_interval,
        })
    }

    fn supervise(&self, job: WaitJob) -> Result<WaitResult, UpdateError> {
        let name = job.name.clone();
        let timeout = job.timeout;
        let table = Arc::clone(&self.table);
        let (tx, rx) = mpsc::sync_channel::<WaitResult>(1);

        tracing::debug!(
            process = %name,
            mode = ?job.mode,
            timeout = ?timeout,
            "waiting for process"
        );

        let handle = thread::Builder::new()
            .name(format!("wait-{name}"))
            .spawn(move || {
                let result = job.run(table.as_ref());
                let _ = tx.send(result);
            })
            .map_err(|e| {
                UpdateError::process_control(
                    &name,
                    format!("Failed to start process watcher for {name}: {e}"),
                )
            })?;

        let received = match timeout {
            Some(timeout) => rx.recv_timeout(timeout + self.poll_interval * GRACE_POLLS),
            None => rx.recv().map_err(|_| RecvTimeoutError::Disconnected),
        };
        match received {
            Ok(result) => {
                if handle.join().is_err() {
                    tracing::warn!(process = %name, "process watcher panicked after reporting");
                }
                tracing::debug!(process = %name, ?result, "process wait finished");
                Ok(result)
            }
            Err(RecvTimeoutError::Timeout) => {
                tracing::warn!(process = %name, "process watcher is unresponsive, abandoning it");
                Ok(WaitResult::Timeout)
            }
            Err(RecvTimeoutError::Disconnected) => {
                let _ = handle.join();
                Err(UpdateError::process_control(
                    &name,
                    format!("Process watcher for {name} crashed before reporting a result"),
                ))
            }
        }
    }
}
