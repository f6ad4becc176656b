//! Error types for a3s-bus
//!
//! Two separate taxonomies live here. `EventError` is returned to the
//! caller of a bus operation: misuse (duplicate registration, unknown
//! listener, bad descriptors) and infrastructure refusals (a task submitted
//! after shutdown). `InvocationError` describes a subscriber failure; it is
//! never returned to the poster and only reaches the `ExceptionHandler`.

use thiserror::Error;

/// Errors reported at the call site of a bus operation
#[derive(Debug, Error)]
pub enum EventError {
    /// The same call target of the same listener instance is already bound to the event type
    #[error("Listener {listener} already registered '{target}' for event type {event_type}")]
    DuplicateRegistration {
        listener: String,
        target: String,
        event_type: String,
    },

    /// Unregistering a listener that has no recorded subscriptions
    #[error("Missing event subscriber: is {0} registered?")]
    UnknownListener(String),

    /// A custom thread-mode names an executor the resolver does not know
    #[error("No executor named '{0}' is available for custom thread-mode")]
    UnknownExecutor(String),

    /// Call-site precondition violated
    #[error("Precondition failed: {0}")]
    Precondition(String),

    /// An executor refused a task (e.g. the worker pool is shut down)
    #[error("Task rejected by executor '{executor}': {reason}")]
    Rejected { executor: String, reason: String },

    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),

    /// Serialization/deserialization failure
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// Failure of a single subscriber invocation
#[derive(Debug, Error)]
pub enum InvocationError {
    /// The bound call target refused the value it was handed
    #[error("Method '{target}' rejected argument: expected {expected}, got {actual}")]
    ArgumentRejected {
        target: String,
        expected: &'static str,
        actual: &'static str,
    },

    /// The call target is no longer reachable
    #[error("Method '{target}' became inaccessible: {reason}")]
    AccessDenied { target: String, reason: String },

    /// The subscriber body itself failed
    #[error("Method '{target}' failed: {source}")]
    Propagated {
        target: String,
        #[source]
        source: Box<dyn std::error::Error + Send + Sync + 'static>,
    },
}

impl InvocationError {
    /// Name of the call target that failed
    pub fn target(&self) -> &str {
        match self {
            Self::ArgumentRejected { target, .. }
            | Self::AccessDenied { target, .. }
            | Self::Propagated { target, .. } => target,
        }
    }
}

/// Result type alias for bus operations
pub type Result<T> = std::result::Result<T, EventError>;
