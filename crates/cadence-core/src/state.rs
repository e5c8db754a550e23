use std::sync::{Arc, RwLock, RwLockReadGuard, RwLockWriteGuard};

use serde_json::{Map, Value};

/// Session-scoped key/value state shared by reference across every node of a run.
///
/// Clones share the same map. Parallel children writing the same key race
/// with last-writer-wins semantics; use [`SessionState::update`] when a
/// read-modify-write must be atomic.
#[derive(Debug, Clone, Default)]
pub struct SessionState {
    inner: Arc<RwLock<Map<String, Value>>>,
}

impl SessionState {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_map(map: Map<String, Value>) -> Self {
        Self {
            inner: Arc::new(RwLock::new(map)),
        }
    }

    // A panicking executor must not make the state unreadable for the rest of the run.
    fn read(&self) -> RwLockReadGuard<'_, Map<String, Value>> {
        self.inner.read().unwrap_or_else(|e| e.into_inner())
    }

    fn write(&self) -> RwLockWriteGuard<'_, Map<String, Value>> {
        self.inner.write().unwrap_or_else(|e| e.into_inner())
    }

    pub fn get(&self, key: &str) -> Option<Value> {
        self.read().get(key).cloned()
    }

    pub fn get_str(&self, key: &str) -> Option<String> {
        self.read()
            .get(key)
            .and_then(|v| v.as_str())
            .map(str::to_string)
    }

    pub fn set(&self, key: impl Into<String>, value: Value) {
        self.write().insert(key.into(), value);
    }

    pub fn remove(&self, key: &str) -> Option<Value> {
        self.write().remove(key)
    }

    pub fn contains_key(&self, key: &str) -> bool {
        self.read().contains_key(key)
    }

    pub fn len(&self) -> usize {
        self.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.read().is_empty()
    }

    /// Run `f` with the write lock held.
    pub fn update<R>(&self, f: impl FnOnce(&mut Map<String, Value>) -> R) -> R {
        f(&mut self.write())
    }

    /// Point-in-time copy of the map.
    pub fn snapshot(&self) -> Map<String, Value> {
        self.read().clone()
    }

    /// Replace the whole map.
    pub fn replace(&self, map: Map<String, Value>) {
        *self.write() = map;
    }

    /// A detached copy that no longer shares storage with `self`.
    pub fn fork(&self) -> Self {
        Self::from_map(self.snapshot())
    }

    /// Apply the keys `changed` set or removed relative to `base`.
    ///
    /// Keys written here by someone else since `base` was taken are kept,
    /// so two forks of the same state can both be merged back.
    pub fn merge_changes(&self, base: &Map<String, Value>, changed: &Map<String, Value>) {
        self.update(|map| {
            for (key, value) in changed {
                if base.get(key) != Some(value) {
                    map.insert(key.clone(), value.clone());
                }
            }
            for key in base.keys() {
                if !changed.contains_key(key) {
                    map.remove(key);
                }
            }
        });
    }
}
