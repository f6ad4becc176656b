//! Subscriber descriptors and bindings
//!
//! Discovery of subscriber methods is a collaborator concern: a listener
//! either implements [`Listener`] or hands an explicit table of
//! [`SubscriberMethod`]s to the bus. Either way the methods are bound to the
//! listener instance once, producing [`SubscriberDescriptor`]s, and the
//! registry turns each descriptor into an immutable [`Subscriber`] binding.

use crate::error::InvocationError;
use crate::executor::Executor;
use crate::types::{Event, EventType, ThreadMode};
use std::any::Any;
use std::fmt;
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};

/// Return type of subscriber bodies
pub type HandlerResult = anyhow::Result<()>;

type MethodFn<L> = dyn Fn(&L, &dyn Event) -> Result<(), InvocationError> + Send + Sync;

/// Bound call target: the listener and method captured once, invoked per delivery
pub(crate) type CallTarget = Arc<dyn Fn(&dyn Event) -> Result<(), InvocationError> + Send + Sync>;

/// Discovery collaborator: a listener that can enumerate its subscriber methods
///
/// ```rust
/// use a3s_bus::{HandlerResult, Listener, SubscriberMethod, ThreadMode};
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
///         vec![SubscriberMethod::new("on_name", Self::on_name)
///             .priority(10)
///             .thread_mode(ThreadMode::Async)]
///     }
/// }
/// ```
pub trait Listener: Send + Sync + 'static {
    /// Subscriber methods declared by this listener, in declaration order
    fn subscriber_methods(&self) -> Vec<SubscriberMethod<Self>>
    where
        Self: Sized;
}

/// An unbound subscriber method of listener type `L`
pub struct SubscriberMethod<L> {
    name: &'static str,
    event_type: EventType,
    thread_mode: ThreadMode,
    priority: i32,
    executor: Option<String>,
    call: Arc<MethodFn<L>>,
}

impl<L: Send + Sync + 'static> SubscriberMethod<L> {
    /// Declare a method handling events of type `E`
    ///
    /// Defaults: `ThreadMode::Direct`, priority 0, no executor.
    pub fn new<E, F>(name: &'static str, handler: F) -> Self
    where
        E: Event,
        F: Fn(&L, &E) -> HandlerResult + Send + Sync + 'static,
    {
        let call = move |listener: &L, event: &dyn Event| -> Result<(), InvocationError> {
            let typed = event.downcast_ref::<E>().ok_or_else(|| {
                InvocationError::ArgumentRejected {
                    target: name.to_string(),
                    expected: std::any::type_name::<E>(),
                    actual: event.type_name(),
                }
            })?;
            handler(listener, typed).map_err(|e| InvocationError::Propagated {
                target: name.to_string(),
                source: e.into(),
            })
        };

        Self {
            name,
            event_type: EventType::of::<E>(),
            thread_mode: ThreadMode::Direct,
            priority: 0,
            executor: None,
            call: Arc::new(call),
        }
    }

    /// Set the priority; higher runs first
    pub fn priority(mut self, priority: i32) -> Self {
        self.priority = priority;
        self
    }

    /// Set the thread-mode
    pub fn thread_mode(mut self, mode: ThreadMode) -> Self {
        self.thread_mode = mode;
        self
    }

    /// Run on the named executor (`ThreadMode::Custom`)
    pub fn custom(mut self, executor: impl Into<String>) -> Self {
        self.thread_mode = ThreadMode::Custom;
        self.executor = Some(executor.into());
        self
    }

    /// Method name
    pub fn name(&self) -> &'static str {
        self.name
    }

    /// Event type the method listens for
    pub fn event_type(&self) -> EventType {
        self.event_type
    }

    /// Bind this method to a listener instance
    ///
    /// The descriptor holds the listener weakly: if the last strong
    /// reference is dropped while still registered, deliveries fail with
    /// `InvocationError::AccessDenied`.
    pub fn bind(self, listener: &Arc<L>) -> SubscriberDescriptor {
        let weak: Weak<L> = Arc::downgrade(listener);
        let call = self.call;
        let name = self.name;

        let target: CallTarget = Arc::new(move |event: &dyn Event| -> Result<(), InvocationError> {
            let listener = weak.upgrade().ok_or_else(|| InvocationError::AccessDenied {
                target: name.to_string(),
                reason: "listener was dropped while still registered".to_string(),
            })?;
            call(&*listener, event)
        });

        SubscriberDescriptor {
            listener: ListenerRef::of(listener),
            name: self.name,
            event_type: self.event_type,
            thread_mode: self.thread_mode,
            priority: self.priority,
            executor: self.executor,
            target,
        }
    }
}

impl<L> fmt::Debug for SubscriberMethod<L> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SubscriberMethod")
            .field("name", &self.name)
            .field("event_type", &self.event_type)
            .field("thread_mode", &self.thread_mode)
            .field("priority", &self.priority)
            .field("executor", &self.executor)
            .finish()
    }
}

/// Identity of a listener instance (its allocation address)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ListenerId(usize);

/// Listener identity plus its type name for diagnostics
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ListenerRef {
    id: ListenerId,
    type_name: &'static str,
}

impl ListenerRef {
    /// Reference identity of `listener`
    ///
    /// Two distinct instances of the same type get distinct identities,
    /// even when they compare equal by value.
    pub fn of<L: Any + Send + Sync>(listener: &Arc<L>) -> Self {
        Self {
            id: ListenerId(Arc::as_ptr(listener) as *const () as usize),
            type_name: std::any::type_name::<L>(),
        }
    }

    /// Identity key
    pub fn id(&self) -> ListenerId {
        self.id
    }

    /// Listener type name
    pub fn type_name(&self) -> &'static str {
        self.type_name
    }
}

impl fmt::Display for ListenerRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}@{:#x}", self.type_name, self.id.0)
    }
}

/// A subscriber method bound to one listener instance
///
/// This is the shape the registry consumes; it carries everything needed to
/// build a [`Subscriber`] binding.
pub struct SubscriberDescriptor {
    pub(crate) listener: ListenerRef,
    pub(crate) name: &'static str,
    pub(crate) event_type: EventType,
    pub(crate) thread_mode: ThreadMode,
    pub(crate) priority: i32,
    pub(crate) executor: Option<String>,
    pub(crate) target: CallTarget,
}

impl SubscriberDescriptor {
    /// Listener this descriptor is bound to
    pub fn listener(&self) -> ListenerRef {
        self.listener
    }

    /// Call target name
    pub fn name(&self) -> &'static str {
        self.name
    }

    /// Event type this descriptor listens for
    pub fn event_type(&self) -> EventType {
        self.event_type
    }

    /// Thread-mode
    pub fn thread_mode(&self) -> ThreadMode {
        self.thread_mode
    }

    /// Priority
    pub fn priority(&self) -> i32 {
        self.priority
    }

    /// Executor name, for custom thread-mode
    pub fn executor(&self) -> Option<&str> {
        self.executor.as_deref()
    }
}

impl fmt::Debug for SubscriberDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SubscriberDescriptor")
            .field("listener", &self.listener)
            .field("name", &self.name)
            .field("event_type", &self.event_type)
            .field("thread_mode", &self.thread_mode)
            .field("priority", &self.priority)
            .field("executor", &self.executor)
            .finish()
    }
}

/// Registered subscriber binding
///
/// Immutable for its lifetime except for the `active` flag, which the
/// registry clears on unregistration. Deliveries that captured the binding
/// before that point check the flag and skip it.
pub struct Subscriber {
    listener: ListenerRef,
    name: &'static str,
    event_type: EventType,
    thread_mode: ThreadMode,
    priority: i32,
    executor: Option<(String, Arc<dyn Executor>)>,
    target: CallTarget,
    active: AtomicBool,
}

impl Subscriber {
    pub(crate) fn new(
        descriptor: SubscriberDescriptor,
        executor: Option<(String, Arc<dyn Executor>)>,
    ) -> Self {
        Self {
            listener: descriptor.listener,
            name: descriptor.name,
            event_type: descriptor.event_type,
            thread_mode: descriptor.thread_mode,
            priority: descriptor.priority,
            executor,
            target: descriptor.target,
            active: AtomicBool::new(true),
        }
    }

    /// Listener this binding belongs to
    pub fn listener(&self) -> ListenerRef {
        self.listener
    }

    /// Call target name
    pub fn name(&self) -> &'static str {
        self.name
    }

    /// Event type the binding listens for
    pub fn event_type(&self) -> EventType {
        self.event_type
    }

    /// Thread-mode
    pub fn thread_mode(&self) -> ThreadMode {
        self.thread_mode
    }

    /// Priority
    pub fn priority(&self) -> i32 {
        self.priority
    }

    /// Name of the resolved custom executor
    pub fn executor_name(&self) -> Option<&str> {
        self.executor.as_ref().map(|(name, _)| name.as_str())
    }

    pub(crate) fn executor(&self) -> Option<&Arc<dyn Executor>> {
        self.executor.as_ref().map(|(_, executor)| executor)
    }

    /// Whether the binding is still registered
    pub fn is_active(&self) -> bool {
        self.active.load(Ordering::Acquire)
    }

    pub(crate) fn deactivate(&self) {
        self.active.store(false, Ordering::Release);
    }

    /// Same listener instance and same call target
    pub(crate) fn same_target(&self, listener: ListenerRef, name: &str) -> bool {
        self.listener.id == listener.id && self.name == name
    }

    /// Invoke the call target with `event`
    ///
    /// `event` may be any subtype of the bound event type; the matching
    /// supertype view is handed to the target. Panics in the subscriber body
    /// are caught and reported as `InvocationError::Propagated`.
    pub fn invoke(&self, event: &dyn Event) -> Result<(), InvocationError> {
        let view = event
            .view_as(self.event_type)
            .ok_or_else(|| InvocationError::ArgumentRejected {
                target: self.name.to_string(),
                expected: self.event_type.name(),
                actual: event.type_name(),
            })?;

        match panic::catch_unwind(AssertUnwindSafe(|| (self.target)(view))) {
            Ok(result) => result,
            Err(payload) => Err(InvocationError::Propagated {
                target: self.name.to_string(),
                source: anyhow::anyhow!("subscriber panicked: {}", panic_message(&*payload)).into(),
            }),
        }
    }
}

impl fmt::Debug for Subscriber {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Subscriber")
            .field("listener", &self.listener)
            .field("name", &self.name)
            .field("event_type", &self.event_type)
            .field("thread_mode", &self.thread_mode)
            .field("priority", &self.priority)
            .field("executor", &self.executor_name())
            .field("active", &self.is_active())
            .finish()
    }
}

/// Best-effort text of a panic payload
pub(crate) fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&'static str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "non-string panic payload".to_string()
    }
}
