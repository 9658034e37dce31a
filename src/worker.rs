//! Background update runs.
//!
//! [`UpdateWorker`] runs [`UpdateOrchestrator::update_packages`] on its own
//! thread so the caller's thread stays responsive, and refuses to start a
//! second run while one is active.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::{self, Receiver};
use std::sync::{Arc, Mutex};
use std::thread::{self, JoinHandle};

use crate::error::UpdateError;
use crate::orchestrator::{UpdateOptions, UpdateOrchestrator, UpdateOutcome};

pub type RunResult = Result<UpdateOutcome, UpdateError>;

/// Clears the running flag when the worker thread ends, panics included.
struct RunningGuard(Arc<AtomicBool>);

impl Drop for RunningGuard {
    fn drop(&mut self) {
        self.0.store(false, Ordering::SeqCst);
    }
}

#[derive(Debug)]
pub struct UpdateWorker {
    orchestrator: Arc<Mutex<UpdateOrchestrator>>,
    running: Arc<AtomicBool>,
    handle: Option<JoinHandle<()>>,
}

impl UpdateWorker {
    pub fn new(orchestrator: UpdateOrchestrator) -> Self {
        Self {
            orchestrator: Arc::new(Mutex::new(orchestrator)),
            running: Arc::new(AtomicBool::new(false)),
            handle: None,
        }
    }

    /// Shared orchestrator; lock it only between runs.
    pub fn orchestrator(&self) -> Arc<Mutex<UpdateOrchestrator>> {
        Arc::clone(&self.orchestrator)
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    /// Start an update run; the receiver yields its single result.
    pub fn start(&mut self, options: UpdateOptions) -> Result<Receiver<RunResult>, UpdateError> {
        if self.running.swap(true, Ordering::SeqCst) {
            return Err(UpdateError::Busy);
        }
        // The previous run has finished; reap its thread.
        if let Some(handle) = self.handle.take() {
            let _ = handle.join();
        }

        let (tx, rx) = mpsc::channel();
        let guard = RunningGuard(Arc::clone(&self.running));
        let orchestrator = Arc::clone(&self.orchestrator);

        let handle = thread::Builder::new()
            .name("update-worker".to_string())
            .spawn(move || {
                let _guard = guard;
                let result = match orchestrator.lock() {
                    Ok(mut orchestrator) => orchestrator.update_packages(&options),
                    Err(_) => Err(UpdateError::State(
                        "update state is unusable after a crashed run".into(),
                    )),
                };
                if let Err(e) = &result {
                    tracing::warn!("update run failed: {e}");
                }
                let _ = tx.send(result);
            })
            .map_err(|e| {
                self.running.store(false, Ordering::SeqCst);
                UpdateError::State(Box::new(e))
            })?;

        self.handle = Some(handle);
        Ok(rx)
    }

    /// Block until the current run, if any, has finished.
    pub fn join(&mut self) {
        if let Some(handle) = self.handle.take() {
            if handle.join().is_err() {
                tracing::warn!("update worker thread panicked");
            }
        }
    }
}

impl Drop for UpdateWorker {
    fn drop(&mut self) {
        self.join();
    }
}
