//! Concurrent cache of per-conversation chains.

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::RwLock;

use crate::chain::Chain;
use crate::ConversationId;

/// A chain shared between the cache and its callers. The outer `Arc`
/// lets callers drop the cache lock before touching the chain; the
/// inner lock serializes writers while generation takes shared reads.
pub type SharedChain = Arc<RwLock<Chain>>;

/// Maps conversation ids to their chains, creating empty chains of the
/// configured order on first use.
///
/// Lock discipline: lookups take the map read lock; create/replace/evict
/// take the write lock only for the map mutation itself. The map lock is
/// never held across training or generation.
pub struct ChainCache {
    order: usize,
    chains: RwLock<HashMap<ConversationId, SharedChain>>,
}

impl ChainCache {
    pub fn new(order: usize) -> Self {
        Self {
            order,
            chains: RwLock::new(HashMap::new()),
        }
    }

    pub fn order(&self) -> usize {
        self.order
    }

    /// Non-creating lookup.
    pub fn get(&self, id: ConversationId) -> Option<SharedChain> {
        self.chains.read().get(&id).cloned()
    }

    /// Returns the chain for `id`, atomically inserting an empty one of
    /// the configured order if none exists. Race-safe: two concurrent
    /// callers for the same id observe the same chain.
    pub fn get_or_create(&self, id: ConversationId) -> SharedChain {
        if let Some(chain) = self.chains.read().get(&id) {
            return chain.clone();
        }
        self.chains
            .write()
            .entry(id)
            .or_insert_with(|| Arc::new(RwLock::new(Chain::new(self.order))))
            .clone()
    }

    /// Replace the chain for `id` wholesale. Readers holding the old
    /// `Arc` finish against the old chain; new lookups see the new one.
    pub fn insert(&self, id: ConversationId, chain: Chain) {
        self.chains
            .write()
            .insert(id, Arc::new(RwLock::new(chain)));
    }

    /// Removes the chain if present; subsequent `get` reports absent.
    pub fn evict(&self, id: ConversationId) -> bool {
        self.chains.write().remove(&id).is_some()
    }

    /// Number of cached chains.
    pub fn len(&self) -> usize {
        self.chains.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.chains.read().is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn get_or_create_returns_same_chain() {
        let cache = ChainCache::new(2);
        let a = cache.get_or_create(1);
        let b = cache.get_or_create(1);
        assert!(Arc::ptr_eq(&a, &b));
        assert_eq!(cache.len(), 1);
    }

    #[test]
    fn get_does_not_create() {
        let cache = ChainCache::new(2);
        assert!(cache.get(1).is_none());
        assert!(cache.is_empty());
    }

    #[test]
    fn evict_removes() {
        let cache = ChainCache::new(2);
        cache.get_or_create(1);
        assert!(cache.evict(1));
        assert!(cache.get(1).is_none());
        // idempotent
        assert!(!cache.evict(1));
    }

    #[test]
    fn insert_replaces() {
        let cache = ChainCache::new(2);
        let old = cache.get_or_create(1);
        old.write().add(&["a", "b", "c"]);

        cache.insert(1, Chain::new(2));
        let fresh = cache.get(1).unwrap();
        assert!(!Arc::ptr_eq(&old, &fresh));
        assert!(fresh.read().is_empty());
        // the old handle still works for readers that grabbed it earlier
        assert!(!old.read().is_empty());
    }

    #[test]
    fn concurrent_get_or_create_single_chain() {
        let cache = Arc::new(ChainCache::new(2));
        let handles: Vec<_> = (0..8)
            .map(|_| {
                let cache = cache.clone();
                std::thread::spawn(move || {
                    for id in 0..32_i64 {
                        cache.get_or_create(id);
                    }
                })
            })
            .collect();
        for h in handles {
            h.join().unwrap();
        }
        assert_eq!(cache.len(), 32);
    }
}
