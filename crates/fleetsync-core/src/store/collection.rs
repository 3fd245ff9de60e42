// ── Generic reactive collection ──
//
// Concurrent storage keyed by device id with push-based change
// notification via `watch` channels.

use std::collections::HashSet;
use std::sync::Arc;

use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use tokio::sync::watch;

/// A concurrent, reactive collection for a single entity type.
///
/// Every mutation bumps a version counter and rebuilds the snapshot
/// that subscribers receive.
pub(crate) struct Collection<T: Send + Sync + 'static> {
    by_key: DashMap<String, Arc<T>>,
    version: watch::Sender<u64>,
    snapshot: watch::Sender<Arc<Vec<Arc<T>>>>,
}

impl<T: Send + Sync + 'static> Collection<T> {
    pub(crate) fn new() -> Self {
        let (version, _) = watch::channel(0u64);
        let (snapshot, _) = watch::channel(Arc::new(Vec::new()));

        Self {
            by_key: DashMap::new(),
            version,
            snapshot,
        }
    }

    /// Insert or overwrite. Returns `true` if the key was new.
    pub(crate) fn upsert(&self, key: String, entity: T) -> bool {
        let is_new = self.by_key.insert(key, Arc::new(entity)).is_none();
        self.publish();
        is_new
    }

    /// Insert `entity` unless the stored value should be kept.
    ///
    /// `replaces(new, old)` decides; the check and the write happen under
    /// the same shard lock. Returns `true` if `entity` was stored.
    pub(crate) fn upsert_if(
        &self,
        key: String,
        entity: T,
        replaces: impl FnOnce(&T, &T) -> bool,
    ) -> bool {
        let stored = match self.by_key.entry(key) {
            Entry::Occupied(mut slot) => {
                if replaces(&entity, slot.get()) {
                    slot.insert(Arc::new(entity));
                    true
                } else {
                    false
                }
            }
            Entry::Vacant(slot) => {
                slot.insert(Arc::new(entity));
                true
            }
        };
        if stored {
            self.publish();
        }
        stored
    }

    /// Make the collection hold exactly `entries`.
    pub(crate) fn replace_all(&self, entries: impl IntoIterator<Item = (String, T)>) {
        let mut keep = HashSet::new();
        for (key, entity) in entries {
            keep.insert(key.clone());
            self.by_key.insert(key, Arc::new(entity));
        }
        self.by_key.retain(|key, _| keep.contains(key));
        self.publish();
    }

    pub(crate) fn remove(&self, key: &str) -> Option<Arc<T>> {
        let removed = self.by_key.remove(key).map(|(_, v)| v);
        if removed.is_some() {
            self.publish();
        }
        removed
    }

    pub(crate) fn get(&self, key: &str) -> Option<Arc<T>> {
        self.by_key.get(key).map(|r| Arc::clone(r.value()))
    }

    /// Current snapshot (cheap `Arc` clone).
    pub(crate) fn snapshot(&self) -> Arc<Vec<Arc<T>>> {
        self.snapshot.borrow().clone()
    }

    pub(crate) fn subscribe(&self) -> watch::Receiver<Arc<Vec<Arc<T>>>> {
        self.snapshot.subscribe()
    }

    pub(crate) fn clear(&self) {
        self.by_key.clear();
        self.publish();
    }

    pub(crate) fn len(&self) -> usize {
        self.by_key.len()
    }

    pub(crate) fn is_empty(&self) -> bool {
        self.by_key.is_empty()
    }

    pub(crate) fn version(&self) -> u64 {
        *self.version.borrow()
    }

    // ── Private helpers ──────────────────────────────────────────────

    fn publish(&self) {
        let mut values: Vec<(String, Arc<T>)> = self
            .by_key
            .iter()
            .map(|r| (r.key().clone(), Arc::clone(r.value())))
            .collect();
        values.sort_by(|a, b| a.0.cmp(&b.0));
        let values: Vec<Arc<T>> = values.into_iter().map(|(_, v)| v).collect();
        // `send_modify` updates unconditionally, even with zero receivers.
        self.snapshot.send_modify(|snap| *snap = Arc::new(values));
        self.version.send_modify(|v| *v += 1);
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn upsert_reports_new_keys() {
        let col: Collection<String> = Collection::new();
        assert!(col.upsert("A".into(), "one".into()));
        assert!(!col.upsert("A".into(), "two".into()));
        assert_eq!(*col.get("A").unwrap(), "two");
        assert_eq!(col.version(), 2);
    }

    #[test]
    fn upsert_if_keeps_existing_when_rejected() {
        let col: Collection<u32> = Collection::new();
        assert!(col.upsert_if("A".into(), 200, |new, old| new >= old));
        assert!(!col.upsert_if("A".into(), 100, |new, old| new >= old));
        assert_eq!(*col.get("A").unwrap(), 200);
        assert_eq!(col.version(), 1);
    }

    #[test]
    fn replace_all_drops_missing_keys() {
        let col: Collection<&'static str> = Collection::new();
        col.upsert("A".into(), "a");
        col.upsert("B".into(), "b");

        col.replace_all([("B".to_string(), "b2"), ("C".to_string(), "c")]);

        assert!(col.get("A").is_none());
        assert_eq!(*col.get("B").unwrap(), "b2");
        assert_eq!(col.len(), 2);
    }

    #[test]
    fn snapshot_is_sorted_by_key() {
        let col: Collection<&'static str> = Collection::new();
        col.upsert("b".into(), "second");
        col.upsert("a".into(), "first");

        let snap = col.snapshot();
        let values: Vec<_> = snap.iter().map(|v| **v).collect();
        assert_eq!(values, vec!["first", "second"]);
    }

    #[test]
    fn remove_and_clear() {
        let col: Collection<u8> = Collection::new();
        col.upsert("A".into(), 1);
        assert_eq!(*col.remove("A").unwrap(), 1);
        assert!(col.remove("A").is_none());

        col.upsert("B".into(), 2);
        col.clear();
        assert!(col.is_empty());
        assert!(col.snapshot().is_empty());
    }
}
