//! Handle registries for sessions and processes.
//!
//! Entries are weak: a session or process lives exactly as long as some
//! token (or caller) holds its `Arc`, and the registry forgets it after
//! the last handle drops.

use dashmap::DashMap;
use std::hash::Hash;
use std::sync::{Arc, Weak};
use tracing::debug;

pub struct Registry<K, V> {
    kind: &'static str,
    entries: DashMap<K, Weak<V>>,
}

impl<K, V> Registry<K, V>
where
    K: Eq + Hash + Clone + std::fmt::Debug,
{
    pub fn new(kind: &'static str) -> Self {
        Self {
            kind,
            entries: DashMap::new(),
        }
    }

    pub fn get(&self, key: &K) -> Option<Arc<V>> {
        self.entries.get(key).and_then(|entry| entry.upgrade())
    }

    /// Live entry for `key`, creating it with `create` when there is none
    /// or when `reuse` rejects the live one.
    pub fn get_or_insert_with(
        &self,
        key: K,
        reuse: impl FnOnce(&V) -> bool,
        create: impl FnOnce() -> V,
    ) -> Arc<V> {
        let mut entry = self.entries.entry(key.clone()).or_insert_with(Weak::new);
        if let Some(live) = entry.upgrade() {
            if reuse(&live) {
                return live;
            }
            debug!(kind = self.kind, ?key, "replacing stale entry");
        }
        let value = Arc::new(create());
        *entry = Arc::downgrade(&value);
        value
    }

    /// Drop entries whose last handle is gone.
    pub fn prune(&self) -> usize {
        let before = self.entries.len();
        self.entries.retain(|_, entry| entry.strong_count() > 0);
        let evicted = before - self.entries.len();
        if evicted > 0 {
            debug!(kind = self.kind, evicted, "registry pruned");
        }
        evicted
    }

    /// Live entries, after pruning.
    pub fn len(&self) -> usize {
        self.prune();
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
