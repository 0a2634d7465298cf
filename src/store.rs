//! Committed (and, on the leader, uncommitted) log entries projected onto a
//! key-value map. Only the leader ever queries this directly; followers
//! redirect every client request instead of serving reads.

use std::collections::HashMap;

use crate::codec::Entry;

/// A mapping from key to value, built by replaying entries in log order.
/// A later write to the same key always wins, matching the original log's
/// last-write-wins semantics.
#[derive(Debug, Clone, Default)]
pub struct KvStore {
    map: HashMap<String, String>,
}

impl KvStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build a store by replaying a sequence of entries, e.g. a leader's
    /// `log_entries` followed by its `uncommitted_entries` at election time.
    pub fn from_entries<'a>(entries: impl IntoIterator<Item = &'a Entry>) -> Self {
        let mut store = Self::new();
        for entry in entries {
            store.put(entry.key.clone(), entry.value.clone());
        }
        store
    }

    /// `None` for a missing key (callers decide whether that means `fail`
    /// or an empty-string read).
    pub fn get(&self, key: &str) -> Option<&String> {
        self.map.get(key)
    }

    pub fn put(&mut self, key: String, value: String) {
        self.map.insert(key, value);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_key_is_none() {
        let store = KvStore::new();
        assert_eq!(store.get("missing"), None);
    }

    #[test]
    fn later_entry_overwrites_earlier_one() {
        let entries = vec![
            Entry {
                term: 1,
                key: "x".into(),
                value: "first".into(),
            },
            Entry {
                term: 2,
                key: "x".into(),
                value: "second".into(),
            },
        ];
        let store = KvStore::from_entries(&entries);
        assert_eq!(store.get("x"), Some(&"second".to_string()));
    }
}
