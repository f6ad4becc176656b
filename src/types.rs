//! Core event types for the a3s-bus dispatch engine
//!
//! Any `'static + Send + Sync + Debug` value can be posted once it implements
//! [`Event`]. Subscribers are matched by runtime type, never by payload.

use std::any::{Any, TypeId};
use std::fmt;
use std::hash::{Hash, Hasher};
use std::sync::Arc;

/// Type-erasure helper implemented for every sized `Any + Send + Sync` type
pub trait AsAny: Any + Send + Sync {
    /// View as `&dyn Any` for downcasting
    fn as_any(&self) -> &dyn Any;

    /// Fully qualified type name of the concrete value
    fn type_name(&self) -> &'static str;
}

impl<T: Any + Send + Sync> AsAny for T {
    fn as_any(&self) -> &dyn Any {
        self
    }

    fn type_name(&self) -> &'static str {
        std::any::type_name::<T>()
    }
}

/// A value that can be posted on an [`EventBus`](crate::EventBus)
///
/// An event may declare a supertype by returning the parent value it
/// embeds. Subscribers bound to the parent type then receive that view of
/// every child event. The chain is walked once per concrete type and cached,
/// so `supertype` must return the same kind of value for every instance.
///
/// ```rust
/// use a3s_bus::Event;
///
/// #[derive(Debug)]
/// struct AuditEvent { actor: String }
/// impl Event for AuditEvent {}
///
/// #[derive(Debug)]
/// struct LoginEvent { audit: AuditEvent, id: u64 }
/// impl Event for LoginEvent {
///     fn supertype(&self) -> Option<&dyn Event> {
///         Some(&self.audit)
///     }
/// }
/// ```
pub trait Event: AsAny + fmt::Debug {
    /// Parent view of this event, if its type has one
    fn supertype(&self) -> Option<&dyn Event> {
        None
    }
}

impl dyn Event {
    /// Runtime type of this event
    pub fn event_type(&self) -> EventType {
        EventType {
            id: self.as_any().type_id(),
            name: self.type_name(),
        }
    }

    /// Whether the concrete type is `T`
    pub fn is<T: Event>(&self) -> bool {
        self.as_any().is::<T>()
    }

    /// Downcast to the concrete type
    pub fn downcast_ref<T: Event>(&self) -> Option<&T> {
        self.as_any().downcast_ref::<T>()
    }

    /// Walk the supertype chain until a view of `event_type` is found
    pub fn view_as(&self, event_type: EventType) -> Option<&dyn Event> {
        let mut current: Option<&dyn Event> = Some(self);
        while let Some(event) = current {
            if event.event_type() == event_type {
                return Some(event);
            }
            current = event.supertype();
        }
        None
    }
}

/// Runtime type identifier used as the subscription key
#[derive(Clone, Copy)]
pub struct EventType {
    id: TypeId,
    name: &'static str,
}

impl EventType {
    /// Event type of `E`
    pub fn of<E: Event>() -> Self {
        Self {
            id: TypeId::of::<E>(),
            name: std::any::type_name::<E>(),
        }
    }

    /// Underlying `TypeId`
    pub fn id(&self) -> TypeId {
        self.id
    }

    /// Type name, for diagnostics only
    pub fn name(&self) -> &'static str {
        self.name
    }
}

impl PartialEq for EventType {
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id
    }
}

impl Eq for EventType {}

impl Hash for EventType {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.id.hash(state);
    }
}

impl fmt::Debug for EventType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name)
    }
}

impl fmt::Display for EventType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name)
    }
}

/// Execution policy for a subscriber
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
pub enum ThreadMode {
    /// Invoked on the posting thread, in snapshot order
    #[default]
    Direct,
    /// Submitted to the bus's shared bounded worker pool
    Async,
    /// Submitted to a named executor resolved at registration
    Custom,
}

/// Wraps an event that was posted but had no subscribers
///
/// Subscribing to `DeadEvent` is useful for detecting misconfigured event
/// routing. A `DeadEvent` that itself finds no subscribers is dropped.
#[derive(Debug, Clone)]
pub struct DeadEvent {
    /// Identifier of the bus the event was posted on
    pub source: String,

    /// The undelivered event
    pub event: Arc<dyn Event>,
}

impl DeadEvent {
    /// Wrap an undelivered event
    pub fn new(source: impl Into<String>, event: Arc<dyn Event>) -> Self {
        Self {
            source: source.into(),
            event,
        }
    }
}

impl Event for DeadEvent {}

macro_rules! impl_event {
    ($($ty:ty),* $(,)?) => {
        $(impl Event for $ty {})*
    };
}

impl_event!(
    String,
    &'static str,
    bool,
    char,
    i8,
    i16,
    i32,
    i64,
    i128,
    isize,
    u8,
    u16,
    u32,
    u64,
    u128,
    usize,
    f32,
    f64,
);

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Debug)]
    struct Base {
        origin: &'static str,
    }
    impl Event for Base {}

    #[derive(Debug)]
    struct Middle {
        base: Base,
    }
    impl Event for Middle {
        fn supertype(&self) -> Option<&dyn Event> {
            Some(&self.base)
        }
    }

    #[derive(Debug)]
    struct Leaf {
        middle: Middle,
    }
    impl Event for Leaf {
        fn supertype(&self) -> Option<&dyn Event> {
            Some(&self.middle)
        }
    }

    fn leaf() -> Leaf {
        Leaf {
            middle: Middle {
                base: Base { origin: "test" },
            },
        }
    }

    #[test]
    fn test_event_type_of_dyn_matches_static() {
        let event: &dyn Event = &42u64;
        assert_eq!(event.event_type(), EventType::of::<u64>());
        assert_ne!(event.event_type(), EventType::of::<u32>());
        assert!(EventType::of::<String>().name().ends_with("String"));
    }

    #[test]
    fn test_downcast() {
        let event: &dyn Event = &String::from("hello");
        assert!(event.is::<String>());
        assert_eq!(event.downcast_ref::<String>().map(String::as_str), Some("hello"));
        assert!(event.downcast_ref::<&'static str>().is_none());
    }

    #[test]
    fn test_view_as_walks_supertypes() {
        let event = leaf();
        let event: &dyn Event = &event;

        let base = event.view_as(EventType::of::<Base>()).unwrap();
        assert_eq!(base.downcast_ref::<Base>().unwrap().origin, "test");
        assert!(event.view_as(EventType::of::<Middle>()).is_some());
        assert!(event.view_as(EventType::of::<Leaf>()).is_some());
        assert!(event.view_as(EventType::of::<String>()).is_none());
    }

    #[test]
    fn test_dead_event_is_event() {
        let dead = DeadEvent::new("default", Arc::new(7i32));
        let event: &dyn Event = &dead;
        assert!(event.is::<DeadEvent>());
        assert_eq!(dead.source, "default");
        assert!(dead.event.is::<i32>());
    }

    #[test]
    fn test_default_thread_mode() {
        assert_eq!(ThreadMode::default(), ThreadMode::Direct);
    }
}
