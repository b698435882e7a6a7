//! Ordered set of registered handlers
//!
//! Keyed by handler identity, so registering the same `Arc` twice is a
//! no-op. Order of first registration is preserved and is the order in
//! which a run binds handlers.

use std::fmt;
use std::sync::Arc;

use crate::events::{HandlerId, SignalingHandler};

#[derive(Default, Clone)]
pub struct HandlerRegistry {
    handlers: Vec<(HandlerId, Arc<dyn SignalingHandler>)>,
}

impl HandlerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns `false` if the handler was already registered
    pub fn add(&mut self, handler: Arc<dyn SignalingHandler>) -> bool {
        let id = HandlerId::of(&handler);
        if self.contains_id(id) {
            return false;
        }
        self.handlers.push((id, handler));
        true
    }

    /// Returns `false` if the handler was not registered
    pub fn remove(&mut self, handler: &Arc<dyn SignalingHandler>) -> bool {
        let id = HandlerId::of(handler);
        let before = self.handlers.len();
        self.handlers.retain(|(existing, _)| *existing != id);
        self.handlers.len() != before
    }

    pub fn contains(&self, handler: &Arc<dyn SignalingHandler>) -> bool {
        self.contains_id(HandlerId::of(handler))
    }

    fn contains_id(&self, id: HandlerId) -> bool {
        self.handlers.iter().any(|(existing, _)| *existing == id)
    }

    pub fn len(&self) -> usize {
        self.handlers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.handlers.is_empty()
    }

    /// Handlers in registration order
    pub fn snapshot(&self) -> Vec<Arc<dyn SignalingHandler>> {
        self.handlers.iter().map(|(_, handler)| handler.clone()).collect()
    }
}

impl fmt::Debug for HandlerRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_list()
            .entries(self.handlers.iter().map(|(id, _)| id))
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::session::SignalingSession;
    use async_trait::async_trait;
    use proptest::prelude::*;
    use std::collections::HashSet;

    struct NoopHandler;

    #[async_trait]
    impl SignalingHandler for NoopHandler {
        fn bind(&self, _session: Option<Arc<SignalingSession>>) {}
    }

    fn handler() -> Arc<dyn SignalingHandler> {
        Arc::new(NoopHandler)
    }

    #[test]
    fn test_add_is_idempotent_and_ordered() {
        let mut registry = HandlerRegistry::new();
        let a = handler();
        let b = handler();

        assert!(registry.add(a.clone()));
        assert!(registry.add(b.clone()));
        assert!(!registry.add(a.clone()));

        let ids: Vec<HandlerId> = registry.snapshot().iter().map(HandlerId::of).collect();
        assert_eq!(ids, vec![HandlerId::of(&a), HandlerId::of(&b)]);
    }

    #[test]
    fn test_remove_unregistered_is_tolerated() {
        let mut registry = HandlerRegistry::new();
        assert!(!registry.remove(&handler()));
        assert!(registry.is_empty());
    }

    proptest! {
        #[test]
        fn registry_matches_added_and_not_removed(ops in prop::collection::vec((any::<bool>(), 0usize..4), 0..64)) {
            let pool: Vec<Arc<dyn SignalingHandler>> = (0..4).map(|_| handler()).collect();
            let mut registry = HandlerRegistry::new();
            let mut expected = HashSet::new();

            for (add, index) in ops {
                let h = &pool[index];
                if add {
                    registry.add(h.clone());
                    expected.insert(HandlerId::of(h));
                } else {
                    registry.remove(h);
                    expected.remove(&HandlerId::of(h));
                }
            }

            let actual: Vec<HandlerId> = registry.snapshot().iter().map(HandlerId::of).collect();
            let unique: HashSet<HandlerId> = actual.iter().copied().collect();
            prop_assert_eq!(actual.len(), unique.len(), "no duplicates");
            prop_assert_eq!(unique, expected);
        }
    }
}
