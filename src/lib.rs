//! # a3s-bus
//!
//! In-process typed publish/subscribe event dispatch for the A3S ecosystem.
//!
//! ## Overview
//!
//! `a3s-bus` delivers events posted by any thread to the subscribers
//! registered for the event's runtime type or any of its declared
//! supertypes. Subscribers run in descending priority order, either on the
//! posting thread, on the bus's bounded worker pool, or on a named executor
//! supplied by the application.
//!
//! ## Quick Start
//!
//! ```rust
//! use a3s_bus::{EventBus, EventBusConfig, HandlerResult, Listener, SubscriberMethod, ThreadMode};
//! use std::sync::Arc;
//!
//! #[derive(Debug)]
//! struct LoginEvent {
//!     id: u64,
//!     name: String,
//! }
//! impl a3s_bus::Event for LoginEvent {}
//!
//! struct Audit;
//!
//! impl Audit {
//!     fn on_login(&self, event: &LoginEvent) -> HandlerResult {
//!         println!("login {} ({})", event.name, event.id);
//!         Ok(())
//!     }
//! }
//!
//! impl Listener for Audit {
//!     fn subscriber_methods(&self) -> Vec<SubscriberMethod<Self>> {
//!         vec![SubscriberMethod::new("on_login", Self::on_login)
//!             .priority(10)
//!             .thread_mode(ThreadMode::Async)]
//!     }
//! }
//!
//! # fn main() -> a3s_bus::Result<()> {
//! let bus = EventBus::new(EventBusConfig::named("auth"))?;
//! let audit = Arc::new(Audit);
//! bus.register(&audit)?;
//!
//! bus.post(LoginEvent { id: 1, name: "A".to_string() })?;
//!
//! bus.shutdown();
//! bus.await_termination(std::time::Duration::from_secs(5));
//! # Ok(())
//! # }
//! ```
//!
//! ## Thread modes
//!
//! - **Direct**: invoked on the posting thread before `post` returns
//! - **Async**: submitted to the bus's bounded worker pool
//! - **Custom**: submitted to a named [`Executor`] resolved at registration
//!
//! ## Architecture
//!
//! - **EventBus**: register / unregister / post / shutdown façade
//! - **SubscriberRegistry**: priority-ordered copy-on-write subscriber lists
//! - **TypeHierarchy**: cached supertype chains per concrete event type
//! - **ExceptionHandler**: sink for every subscriber failure
//! - **DeadEvent**: wraps events that found no subscriber

pub mod bus;
pub mod config;
mod dispatch;
pub mod error;
pub mod executor;
pub mod handler;
pub mod hierarchy;
pub mod registry;
pub mod subscriber;
pub mod types;

// Re-export core types
pub use bus::{EventBus, EventBusBuilder};
pub use config::{EventBusConfig, PoolConfig};
pub use error::{EventError, InvocationError, Result};
pub use executor::{
    Executor, ExecutorResolver, InlineExecutor, NamedExecutors, Task, TokioExecutor, WorkerPool,
};
pub use handler::{handler_fn, ExceptionHandler, LoggingHandler, SubscriberExceptionContext};
pub use hierarchy::TypeHierarchy;
pub use registry::{Snapshot, SubscriberRegistry};
pub use subscriber::{
    HandlerResult, Listener, ListenerId, ListenerRef, Subscriber, SubscriberDescriptor,
    SubscriberMethod,
};
pub use types::{AsAny, DeadEvent, Event, EventType, ThreadMode};
