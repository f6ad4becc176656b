//! Event bus façade
//!
//! `EventBus` ties the registry, the dispatcher and the worker pool together
//! behind the four lifecycle operations: register, unregister, post and
//! shutdown.

use crate::config::EventBusConfig;
use crate::dispatch::Dispatcher;
use crate::error::Result;
use crate::executor::{ExecutorResolver, NamedExecutors, WorkerPool};
use crate::handler::{ExceptionHandler, LoggingHandler};
use crate::hierarchy::TypeHierarchy;
use crate::registry::SubscriberRegistry;
use crate::subscriber::{Listener, ListenerRef, SubscriberDescriptor, SubscriberMethod};
use crate::types::{DeadEvent, Event};
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

/// In-process publish/subscribe event bus
///
/// Subscribers are matched by the runtime type of the posted value and its
/// declared supertypes. Thread-safe: share it behind an `Arc`.
///
/// ```rust
/// use a3s_bus::{EventBus, EventBusConfig, HandlerResult, Listener, SubscriberMethod};
/// use std::sync::Arc;
///
/// struct Greeter;
///
/// impl Greeter {
///     fn on_name(&self, name: &String) -> HandlerResult {
///         println!("hello {name}");
///         Ok(())
///     }
/// }
///
/// impl Listener for Greeter {
///     fn subscriber_methods(&self) -> Vec<SubscriberMethod<Self>> {
///         vec![SubscriberMethod::new("on_name", Self::on_name)]
///     }
/// }
///
/// # fn main() -> a3s_bus::Result<()> {
/// let bus = EventBus::new(EventBusConfig::named("greetings"))?;
/// let greeter = Arc::new(Greeter);
/// bus.register(&greeter)?;
/// bus.post("world".to_string())?;
/// bus.unregister(&greeter)?;
/// bus.shutdown();
/// # Ok(())
/// # }
/// ```
pub struct EventBus {
    identifier: Arc<str>,
    registry: SubscriberRegistry,
    dispatcher: Dispatcher,
    pool: Arc<WorkerPool>,
}

impl EventBus {
    /// Create a bus that logs subscriber failures
    pub fn new(config: EventBusConfig) -> Result<Self> {
        Self::builder().config(config).build()
    }

    /// Create a bus with a custom exception handler
    pub fn with_handler(
        config: EventBusConfig,
        handler: impl ExceptionHandler + 'static,
    ) -> Result<Self> {
        Self::builder()
            .config(config)
            .exception_handler(handler)
            .build()
    }

    /// Start building a bus
    pub fn builder() -> EventBusBuilder {
        EventBusBuilder::default()
    }

    /// Bus identifier
    pub fn identifier(&self) -> &str {
        &self.identifier
    }

    /// Register every subscriber method `listener` declares
    pub fn register<L: Listener>(&self, listener: &Arc<L>) -> Result<()> {
        let methods = listener.subscriber_methods();
        self.register_methods(listener, methods)
    }

    /// Register an explicit table of subscriber methods for `listener`
    pub fn register_methods<L: Send + Sync + 'static>(
        &self,
        listener: &Arc<L>,
        methods: Vec<SubscriberMethod<L>>,
    ) -> Result<()> {
        let descriptors = methods
            .into_iter()
            .map(|method| method.bind(listener))
            .collect();
        self.register_descriptors(ListenerRef::of(listener), descriptors)
    }

    /// Register descriptors produced by an external discovery mechanism
    ///
    /// Every descriptor must be bound to `listener`.
    pub fn register_descriptors(
        &self,
        listener: ListenerRef,
        descriptors: Vec<SubscriberDescriptor>,
    ) -> Result<()> {
        self.registry.register(listener, descriptors)
    }

    /// Remove every subscriber of `listener`
    ///
    /// Once this returns, no later post reaches the listener, including
    /// posts racing on other threads.
    pub fn unregister<L: Send + Sync + 'static>(&self, listener: &Arc<L>) -> Result<()> {
        self.registry.unregister(ListenerRef::of(listener))
    }

    /// Post an event to every eligible subscriber
    ///
    /// Returns once every subscriber has been handed the event: direct
    /// subscribers have run, async and custom ones have been submitted.
    /// Subscriber failures go to the exception handler, never to the caller.
    pub fn post<E: Event>(&self, event: E) -> Result<()> {
        self.post_shared(Arc::new(event))
    }

    /// Post an already shared event
    pub fn post_shared(&self, event: Arc<dyn Event>) -> Result<()> {
        let snapshot = self.registry.lookup(&*event);
        if !snapshot.is_empty() {
            return self.dispatcher.dispatch(&event, &snapshot);
        }

        let value: &dyn Event = &*event;
        if value.is::<DeadEvent>() {
            tracing::debug!(bus = %self.identifier, "Dead event has no subscribers, dropped");
            return Ok(());
        }

        tracing::debug!(
            bus = %self.identifier,
            event_type = %value.event_type(),
            "No subscribers for event, posting dead event"
        );
        self.post(DeadEvent::new(&*self.identifier, event))
    }

    /// Stop accepting async submissions and let the worker pool drain
    ///
    /// Returns `false` if the bus was already shut down. Direct subscribers
    /// keep working after shutdown.
    pub fn shutdown(&self) -> bool {
        let stopped = self.pool.shutdown();
        if stopped {
            tracing::info!(bus = %self.identifier, "Event bus shut down");
        }
        stopped
    }

    /// Whether `shutdown` has been called
    pub fn is_shutdown(&self) -> bool {
        self.pool.is_shutdown()
    }

    /// Wait for queued async deliveries to finish after `shutdown`
    pub fn await_termination(&self, timeout: Duration) -> bool {
        self.pool.await_termination(timeout)
    }

    /// The subscriber registry, for introspection
    pub fn registry(&self) -> &SubscriberRegistry {
        &self.registry
    }
}

impl fmt::Display for EventBus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "EventBus({})", self.identifier)
    }
}

impl fmt::Debug for EventBus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EventBus")
            .field("identifier", &self.identifier)
            .field("listeners", &self.registry.listener_count())
            .field("pool", &self.pool.name())
            .field("shutdown", &self.is_shutdown())
            .finish()
    }
}

impl Drop for EventBus {
    fn drop(&mut self) {
        if !self.pool.is_shutdown() {
            self.shutdown();
        }
    }
}

/// Builder for [`EventBus`]
#[derive(Default)]
pub struct EventBusBuilder {
    config: EventBusConfig,
    handler: Option<Arc<dyn ExceptionHandler>>,
    executors: Option<Arc<dyn ExecutorResolver>>,
    hierarchy: Option<Arc<TypeHierarchy>>,
}

impl EventBusBuilder {
    /// Replace the whole configuration
    pub fn config(mut self, config: EventBusConfig) -> Self {
        self.config = config;
        self
    }

    /// Set the bus identifier
    pub fn identifier(mut self, identifier: impl Into<String>) -> Self {
        self.config.identifier = identifier.into();
        self
    }

    /// Handler for subscriber failures (default: [`LoggingHandler`])
    pub fn exception_handler(mut self, handler: impl ExceptionHandler + 'static) -> Self {
        self.handler = Some(Arc::new(handler));
        self
    }

    /// Resolver for custom thread-mode executors (default: none available)
    pub fn executors(mut self, executors: impl ExecutorResolver + 'static) -> Self {
        self.executors = Some(Arc::new(executors));
        self
    }

    /// Share a type hierarchy cache with other buses
    pub fn type_hierarchy(mut self, hierarchy: Arc<TypeHierarchy>) -> Self {
        self.hierarchy = Some(hierarchy);
        self
    }

    /// Validate the configuration and start the worker pool
    pub fn build(self) -> Result<EventBus> {
        self.config.validate()?;

        let identifier: Arc<str> = Arc::from(self.config.identifier.as_str());
        let pool = Arc::new(WorkerPool::new(&self.config.pool)?);
        let handler: Arc<dyn ExceptionHandler> = match self.handler {
            Some(handler) => handler,
            None => Arc::new(LoggingHandler),
        };
        let executors: Arc<dyn ExecutorResolver> = match self.executors {
            Some(executors) => executors,
            None => Arc::new(NamedExecutors::new()),
        };
        let hierarchy = self.hierarchy.unwrap_or_default();

        tracing::info!(
            bus = %identifier,
            pool = %pool.name(),
            core_workers = self.config.pool.core_workers,
            max_workers = self.config.pool.max_workers,
            "Event bus started"
        );

        Ok(EventBus {
            registry: SubscriberRegistry::new(hierarchy, executors),
            dispatcher: Dispatcher::new(identifier.clone(), handler, pool.clone()),
            identifier,
            pool,
        })
    }
}
