//! Subscriber registry
//!
//! Maps each event type to its priority-ordered subscriber list. Lists are
//! copy-on-write: mutation builds a new list and swaps it in, so `lookup`
//! only ever clones `Arc`s and never takes the mutation lock.

use crate::error::{EventError, Result};
use crate::executor::{Executor, ExecutorResolver};
use crate::hierarchy::TypeHierarchy;
use crate::subscriber::{ListenerId, ListenerRef, Subscriber, SubscriberDescriptor};
use crate::types::{Event, EventType, ThreadMode};
use dashmap::DashMap;
use parking_lot::Mutex;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;

type SubscriberList = Arc<[Arc<Subscriber>]>;

/// Immutable, point-in-time list of subscribers eligible for one event
pub type Snapshot = Vec<Arc<Subscriber>>;

/// Registry of subscribers for one bus
pub struct SubscriberRegistry {
    /// event type → subscribers, descending priority, FIFO within a priority
    subscriptions: DashMap<EventType, SubscriberList>,

    /// listener → event types it subscribed to; its lock serializes all mutation
    types_by_listener: Mutex<HashMap<ListenerId, HashSet<EventType>>>,

    hierarchy: Arc<TypeHierarchy>,
    executors: Arc<dyn ExecutorResolver>,
}

impl SubscriberRegistry {
    /// Create an empty registry
    pub fn new(hierarchy: Arc<TypeHierarchy>, executors: Arc<dyn ExecutorResolver>) -> Self {
        Self {
            subscriptions: DashMap::new(),
            types_by_listener: Mutex::new(HashMap::new()),
            hierarchy,
            executors,
        }
    }

    /// Register the descriptors of one listener
    ///
    /// All-or-nothing: if any descriptor is invalid or already registered,
    /// nothing is inserted and the existing registrations stay intact.
    pub fn register(
        &self,
        listener: ListenerRef,
        descriptors: Vec<SubscriberDescriptor>,
    ) -> Result<()> {
        let mut types_by_listener = self.types_by_listener.lock();

        let mut bindings = Vec::with_capacity(descriptors.len());
        for descriptor in descriptors {
            if descriptor.listener.id() != listener.id() {
                return Err(EventError::Precondition(format!(
                    "Descriptor '{}' is bound to {}, not {}",
                    descriptor.name, descriptor.listener, listener
                )));
            }
            self.check_duplicate(listener, &descriptor, &bindings)?;
            let executor = self.resolve_executor(&descriptor)?;
            bindings.push(Arc::new(Subscriber::new(descriptor, executor)));
        }

        if bindings.is_empty() {
            return Ok(());
        }

        let count = bindings.len();
        let types = types_by_listener.entry(listener.id()).or_default();
        for binding in bindings {
            let event_type = binding.event_type();
            let current = self.current(event_type);
            self.subscriptions
                .insert(event_type, insert_by_priority(&current, binding));
            types.insert(event_type);
        }

        tracing::debug!(listener = %listener, subscribers = count, "Listener registered");
        Ok(())
    }

    /// Remove every binding of `listener`
    ///
    /// Bindings are deactivated before removal, so deliveries that already
    /// hold them in a snapshot skip them.
    pub fn unregister(&self, listener: ListenerRef) -> Result<()> {
        let mut types_by_listener = self.types_by_listener.lock();
        let types = types_by_listener
            .remove(&listener.id())
            .ok_or_else(|| EventError::UnknownListener(listener.to_string()))?;

        for event_type in &types {
            let current = self.current(*event_type);
            let mut remaining = Vec::with_capacity(current.len());
            for subscriber in current.iter() {
                if subscriber.listener().id() == listener.id() {
                    subscriber.deactivate();
                } else {
                    remaining.push(subscriber.clone());
                }
            }

            if remaining.is_empty() {
                self.subscriptions.remove(event_type);
            } else {
                self.subscriptions.insert(*event_type, remaining.into());
            }
        }

        tracing::debug!(listener = %listener, event_types = types.len(), "Listener unregistered");
        Ok(())
    }

    /// Snapshot of every subscriber eligible for `event`
    ///
    /// Concatenates the lists of each type in the event's chain, most
    /// specific type first.
    pub fn lookup(&self, event: &dyn Event) -> Snapshot {
        let chain = self.hierarchy.resolve(event);
        let mut snapshot = Vec::new();
        for event_type in chain.iter() {
            if let Some(list) = self.subscriptions.get(event_type) {
                snapshot.extend(list.value().iter().cloned());
            }
        }
        snapshot
    }

    /// Subscribers bound directly to `event_type`
    pub fn subscriber_count(&self, event_type: EventType) -> usize {
        self.subscriptions
            .get(&event_type)
            .map(|list| list.value().len())
            .unwrap_or(0)
    }

    /// Listeners with at least one binding
    pub fn listener_count(&self) -> usize {
        self.types_by_listener.lock().len()
    }

    /// Whether `listener` has any binding
    pub fn is_registered(&self, listener: ListenerRef) -> bool {
        self.types_by_listener.lock().contains_key(&listener.id())
    }

    /// The type hierarchy resolver used by `lookup`
    pub fn hierarchy(&self) -> &Arc<TypeHierarchy> {
        &self.hierarchy
    }

    fn current(&self, event_type: EventType) -> SubscriberList {
        // Clone out so the shard lock is released before any insert
        self.subscriptions
            .get(&event_type)
            .map(|list| list.value().clone())
            .unwrap_or_else(|| Arc::from(Vec::new()))
    }

    fn check_duplicate(
        &self,
        listener: ListenerRef,
        descriptor: &SubscriberDescriptor,
        pending: &[Arc<Subscriber>],
    ) -> Result<()> {
        let existing = self.current(descriptor.event_type);
        let duplicate = existing
            .iter()
            .chain(pending.iter().filter(|s| s.event_type() == descriptor.event_type))
            .any(|s| s.same_target(listener, descriptor.name));

        if duplicate {
            return Err(EventError::DuplicateRegistration {
                listener: listener.to_string(),
                target: descriptor.name.to_string(),
                event_type: descriptor.event_type.to_string(),
            });
        }
        Ok(())
    }

    fn resolve_executor(
        &self,
        descriptor: &SubscriberDescriptor,
    ) -> Result<Option<(String, Arc<dyn Executor>)>> {
        match (descriptor.thread_mode, descriptor.executor.as_deref()) {
            (ThreadMode::Custom, Some(name)) => {
                let executor = self
                    .executors
                    .resolve(name)
                    .ok_or_else(|| EventError::UnknownExecutor(name.to_string()))?;
                Ok(Some((name.to_string(), executor)))
            }
            (ThreadMode::Custom, None) => Err(EventError::Precondition(format!(
                "Custom thread-mode on '{}' requires an executor name",
                descriptor.name
            ))),
            (_, Some(name)) => Err(EventError::Precondition(format!(
                "Executor '{}' given for '{}' but thread-mode is {:?}",
                name, descriptor.name, descriptor.thread_mode
            ))),
            (_, None) => Ok(None),
        }
    }
}

/// Insert before the first entry with strictly lower priority
fn insert_by_priority(list: &[Arc<Subscriber>], subscriber: Arc<Subscriber>) -> SubscriberList {
    let position = list
        .iter()
        .position(|s| s.priority() < subscriber.priority())
        .unwrap_or(list.len());

    let mut updated = Vec::with_capacity(list.len() + 1);
    updated.extend_from_slice(&list[..position]);
    updated.push(subscriber);
    updated.extend_from_slice(&list[position..]);
    updated.into()
}
