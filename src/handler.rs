//! Subscriber exception handling
//!
//! Every failure of a subscriber invocation, in any thread-mode, is routed to
//! the bus's [`ExceptionHandler`] together with the context it occurred in.
//! A handler that itself fails (returns an error or panics) is logged and
//! otherwise ignored.

use crate::error::InvocationError;
use crate::subscriber::ListenerRef;
use crate::types::{Event, EventType};

/// Where a subscriber failure happened
#[derive(Debug, Clone, Copy)]
pub struct SubscriberExceptionContext<'a> {
    /// Identifier of the bus that dispatched the event
    pub bus: &'a str,

    /// The event being delivered
    pub event: &'a dyn Event,

    /// Listener owning the failed call target
    pub listener: ListenerRef,

    /// Name of the failed call target
    pub target: &'a str,

    /// Event type the call target is bound to
    pub event_type: EventType,
}

/// Sink for subscriber failures
pub trait ExceptionHandler: Send + Sync {
    /// Handle a failed invocation
    fn handle(
        &self,
        error: &InvocationError,
        context: &SubscriberExceptionContext<'_>,
    ) -> anyhow::Result<()>;
}

/// Default handler: logs the failure at error level
#[derive(Debug, Clone, Copy, Default)]
pub struct LoggingHandler;

impl ExceptionHandler for LoggingHandler {
    fn handle(
        &self,
        error: &InvocationError,
        context: &SubscriberExceptionContext<'_>,
    ) -> anyhow::Result<()> {
        tracing::error!(
            bus = %context.bus,
            listener = %context.listener,
            target = %context.target,
            event_type = %context.event_type,
            event = ?context.event,
            error = %error,
            "Exception thrown by subscriber method {}({}) on subscriber {} when dispatching event: {:?}",
            context.target,
            context.event_type,
            context.listener,
            context.event,
        );
        Ok(())
    }
}

/// Handler backed by a closure, see [`handler_fn`]
#[derive(Clone, Copy)]
pub struct FnHandler<F>(F);

/// Wrap a closure as an [`ExceptionHandler`]
///
/// ```rust
/// use a3s_bus::handler::handler_fn;
///
/// let handler = handler_fn(|error, context| {
///     eprintln!("{} failed on {}: {}", context.target, context.bus, error);
///     Ok(())
/// });
/// # let _ = handler;
/// ```
pub fn handler_fn<F>(f: F) -> FnHandler<F>
where
    F: Fn(&InvocationError, &SubscriberExceptionContext<'_>) -> anyhow::Result<()> + Send + Sync,
{
    FnHandler(f)
}

impl<F> ExceptionHandler for FnHandler<F>
where
    F: Fn(&InvocationError, &SubscriberExceptionContext<'_>) -> anyhow::Result<()> + Send + Sync,
{
    fn handle(
        &self,
        error: &InvocationError,
        context: &SubscriberExceptionContext<'_>,
    ) -> anyhow::Result<()> {
        (self.0)(error, context)
    }
}
