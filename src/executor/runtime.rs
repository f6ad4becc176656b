//! Tokio-backed executor for custom thread-mode

use super::{Executor, Task};
use crate::error::{EventError, Result};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::runtime::Handle;

/// Runs tasks on a tokio runtime's blocking thread pool
///
/// Subscriber bodies are synchronous, so they go through `spawn_blocking`
/// and never stall the runtime's async workers.
#[derive(Debug, Clone)]
pub struct TokioExecutor {
    handle: Handle,
}

impl TokioExecutor {
    /// Wrap a runtime handle
    pub fn new(handle: Handle) -> Self {
        Self { handle }
    }

    /// Use the runtime the caller is running in
    pub fn current() -> Result<Self> {
        Handle::try_current()
            .map(Self::new)
            .map_err(|e| EventError::Config(format!("No tokio runtime available: {}", e)))
    }
}

impl Executor for TokioExecutor {
    /// Spawn `task` on the blocking pool
    ///
    /// A runtime that has shut down cancels the task while spawning; that
    /// is reported as `EventError::Rejected`.
    fn execute(&self, task: Task) -> Result<()> {
        let started = Arc::new(AtomicBool::new(false));
        let flag = started.clone();
        let join = self.handle.spawn_blocking(move || {
            flag.store(true, Ordering::Release);
            task();
        });

        // Finished without ever starting: cancelled by a stopped runtime
        if join.is_finished() && !started.load(Ordering::Acquire) {
            return Err(EventError::Rejected {
                executor: "tokio".to_string(),
                reason: "runtime is shut down".to_string(),
            });
        }
        Ok(())
    }
}
