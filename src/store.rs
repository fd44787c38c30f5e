//! Ephemeral per-tick scratch store.
//!
//! The scheduler builds a fresh [`ScratchStore`] at the start of every tick and
//! drops it at the end. Anything the payload (or machinery running on its
//! behalf) writes here never reaches the persisted segment; persistence only
//! happens through an explicit flush.

use serde_json::Value;
use std::collections::BTreeMap;

/// Key-value scratch space that lives for a single tick.
#[derive(Debug, Default, Clone)]
pub struct ScratchStore {
    entries: BTreeMap<String, Value>,
}

impl ScratchStore {
    /// Create an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Look up a value.
    #[must_use]
    pub fn get(&self, key: &str) -> Option<&Value> {
        self.entries.get(key)
    }

    /// Insert or replace a value, returning the previous one.
    pub fn set(&mut self, key: impl Into<String>, value: Value) -> Option<Value> {
        self.entries.insert(key.into(), value)
    }

    /// Remove a value.
    pub fn remove(&mut self, key: &str) -> Option<Value> {
        self.entries.remove(key)
    }

    /// Drop every entry.
    pub fn clear(&mut self) {
        self.entries.clear();
    }

    /// Number of entries.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether the store is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Serialize the whole store, e.g. to hand to an explicit flush.
    #[must_use]
    pub fn snapshot(&self) -> Vec<u8> {
        // A map of strings to JSON values always serializes.
        serde_json::to_vec(&self.entries).unwrap_or_default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_set_get_remove() {
        let mut store = ScratchStore::new();
        assert!(store.is_empty());
        assert!(store.set("path", json!([1, 2, 3])).is_none());
        assert_eq!(store.get("path"), Some(&json!([1, 2, 3])));
        assert_eq!(store.len(), 1);
        assert_eq!(store.remove("path"), Some(json!([1, 2, 3])));
        assert!(store.is_empty());
    }

    #[test]
    fn test_snapshot_is_json_object() {
        let mut store = ScratchStore::new();
        store.set("a", json!(1));
        let parsed: Value = serde_json::from_slice(&store.snapshot()).unwrap();
        assert_eq!(parsed, json!({"a": 1}));
    }
}
