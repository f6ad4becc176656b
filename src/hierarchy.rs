//! Type hierarchy resolution
//!
//! Flattens an event's runtime type into its delivery-eligible chain: the
//! concrete type first, then each supertype outward. Only supertypes that an
//! event exposes through [`Event::supertype`] take part; traits an event
//! type implements are never part of the chain.

use crate::types::{Event, EventType};
use dashmap::DashMap;
use std::any::TypeId;
use std::sync::Arc;

/// Append-only cache of flattened type chains, keyed by concrete type
///
/// Entries are never evicted: the number of event types is bounded by the
/// program. Can be shared between buses through an `Arc`.
#[derive(Debug, Default)]
pub struct TypeHierarchy {
    chains: DashMap<TypeId, Arc<[EventType]>>,
}

impl TypeHierarchy {
    /// Create an empty resolver
    pub fn new() -> Self {
        Self::default()
    }

    /// Eligible type chain for the runtime type of `event`
    pub fn resolve(&self, event: &dyn Event) -> Arc<[EventType]> {
        let id = event.event_type().id();
        if let Some(chain) = self.chains.get(&id) {
            return chain.value().clone();
        }

        let chain = flatten(event);
        self.chains.entry(id).or_insert(chain).value().clone()
    }

    /// Number of cached chains
    pub fn len(&self) -> usize {
        self.chains.len()
    }

    /// Whether nothing has been resolved yet
    pub fn is_empty(&self) -> bool {
        self.chains.is_empty()
    }
}

fn flatten(event: &dyn Event) -> Arc<[EventType]> {
    let mut chain: Vec<EventType> = Vec::with_capacity(4);
    let mut current = Some(event);

    while let Some(event) = current {
        let event_type = event.event_type();
        if chain.contains(&event_type) {
            tracing::warn!(
                event_type = %chain[0],
                repeated = %event_type,
                "Supertype cycle in event hierarchy, chain truncated"
            );
            break;
        }
        chain.push(event_type);
        current = event.supertype();
    }

    chain.into()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Debug)]
    struct Shape;
    impl Event for Shape {}

    #[derive(Debug)]
    struct Polygon {
        shape: Shape,
    }
    impl Event for Polygon {
        fn supertype(&self) -> Option<&dyn Event> {
            Some(&self.shape)
        }
    }

    #[derive(Debug)]
    struct Square {
        polygon: Polygon,
    }
    impl Event for Square {
        fn supertype(&self) -> Option<&dyn Event> {
            Some(&self.polygon)
        }
    }

    /// Claims to be its own parent
    #[derive(Debug)]
    struct Looping;
    impl Event for Looping {
        fn supertype(&self) -> Option<&dyn Event> {
            Some(self)
        }
    }

    fn square() -> Square {
        Square {
            polygon: Polygon { shape: Shape },
        }
    }

    #[test]
    fn test_chain_most_specific_first() {
        let hierarchy = TypeHierarchy::new();
        let chain = hierarchy.resolve(&square());

        assert_eq!(
            &chain[..],
            &[
                EventType::of::<Square>(),
                EventType::of::<Polygon>(),
                EventType::of::<Shape>(),
            ]
        );
    }

    #[test]
    fn test_plain_type_chain_is_itself() {
        let hierarchy = TypeHierarchy::new();
        let chain = hierarchy.resolve(&"hello");
        assert_eq!(&chain[..], &[EventType::of::<&'static str>()]);
    }

    #[test]
    fn test_chain_cached_per_type() {
        let hierarchy = TypeHierarchy::new();
        assert!(hierarchy.is_empty());

        let first = hierarchy.resolve(&square());
        let second = hierarchy.resolve(&square());
        assert!(Arc::ptr_eq(&first, &second));
        assert_eq!(hierarchy.len(), 1);

        hierarchy.resolve(&Shape);
        assert_eq!(hierarchy.len(), 2);
    }

    #[test]
    fn test_cycle_is_truncated() {
        let hierarchy = TypeHierarchy::new();
        let chain = hierarchy.resolve(&Looping);
        assert_eq!(&chain[..], &[EventType::of::<Looping>()]);
    }

    #[test]
    fn test_concurrent_resolve_agrees() {
        let hierarchy = Arc::new(TypeHierarchy::new());
        let handles: Vec<_> = (0..8)
            .map(|_| {
                let hierarchy = hierarchy.clone();
                std::thread::spawn(move || hierarchy.resolve(&square()))
            })
            .collect();

        let chains: Vec<_> = handles.into_iter().map(|h| h.join().unwrap()).collect();
        for chain in &chains {
            assert!(Arc::ptr_eq(chain, &chains[0]));
        }
        assert_eq!(hierarchy.len(), 1);
    }
}
