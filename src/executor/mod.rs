//! Executors for async and custom thread-modes
//!
//! `ThreadMode::Async` subscribers run on the bus's [`WorkerPool`].
//! `ThreadMode::Custom` subscribers run on an externally owned [`Executor`]
//! looked up by name through an [`ExecutorResolver`] once, at registration.

mod pool;
mod runtime;

pub use pool::WorkerPool;
pub use runtime::TokioExecutor;

use crate::error::Result;
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

/// A zero-argument unit of work
pub type Task = Box<dyn FnOnce() + Send + 'static>;

/// Accepts tasks for execution
///
/// Submission semantics (queueing, threads, ordering) belong to the
/// implementation. Returning an error means the task was not accepted and
/// will not run.
pub trait Executor: Send + Sync {
    /// Submit a task
    fn execute(&self, task: Task) -> Result<()>;
}

/// Executor-resolution collaborator for custom thread-mode
pub trait ExecutorResolver: Send + Sync {
    /// Executor registered under `name`
    fn resolve(&self, name: &str) -> Option<Arc<dyn Executor>>;
}

/// Runs every task on the submitting thread
#[derive(Debug, Clone, Copy, Default)]
pub struct InlineExecutor;

impl Executor for InlineExecutor {
    fn execute(&self, task: Task) -> Result<()> {
        task();
        Ok(())
    }
}

/// Name → executor table
#[derive(Clone, Default)]
pub struct NamedExecutors {
    executors: HashMap<String, Arc<dyn Executor>>,
}

impl NamedExecutors {
    /// Create an empty table
    pub fn new() -> Self {
        Self::default()
    }

    /// Add an executor (builder style)
    pub fn with(mut self, name: impl Into<String>, executor: Arc<dyn Executor>) -> Self {
        self.insert(name, executor);
        self
    }

    /// Add or replace an executor
    pub fn insert(&mut self, name: impl Into<String>, executor: Arc<dyn Executor>) {
        self.executors.insert(name.into(), executor);
    }

    /// Number of named executors
    pub fn len(&self) -> usize {
        self.executors.len()
    }

    /// Whether the table is empty
    pub fn is_empty(&self) -> bool {
        self.executors.is_empty()
    }
}

impl ExecutorResolver for NamedExecutors {
    fn resolve(&self, name: &str) -> Option<Arc<dyn Executor>> {
        self.executors.get(name).cloned()
    }
}

impl fmt::Debug for NamedExecutors {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut names: Vec<_> = self.executors.keys().collect();
        names.sort();
        f.debug_struct("NamedExecutors").field("names", &names).finish()
    }
}
