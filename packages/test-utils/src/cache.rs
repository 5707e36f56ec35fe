//! Mock cache store for testing resolvers
//!
//! Provides a [`MockCacheStore`] holding values in memory and recording
//! every lookup and write, so tests can assert what a resolver asked for
//! and what it stored.
//!
//! # Lock Poisoning Recovery
//!
//! Locks are acquired with `unwrap_or_else(|e| e.into_inner())`. A test
//! that panics while holding a lock does not poison later tests.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, RwLock};

/// In-memory keyed store with call recording
///
/// Clones share the same underlying store and call log.
///
/// # Example
///
/// ```rust
/// use std::collections::HashMap;
/// use beatsync_test_utils::MockCacheStore;
///
/// let store = MockCacheStore::new();
/// store.insert("a", 1);
///
/// let found = store.resolve(&["a".to_string(), "b".to_string()]);
/// assert_eq!(found, HashMap::from([("a".to_string(), 1)]));
/// assert_eq!(store.resolve_calls(), vec![vec!["a".to_string(), "b".to_string()]]);
/// ```
pub struct MockCacheStore<T> {
    entries: Arc<RwLock<HashMap<String, T>>>,
    resolve_calls: Arc<RwLock<Vec<Vec<String>>>>,
    store_calls: Arc<RwLock<Vec<Vec<String>>>>,
    fail_resolve: Arc<AtomicBool>,
    fail_store: Arc<AtomicBool>,
}

impl<T: Clone> MockCacheStore<T> {
    /// Create an empty store
    pub fn new() -> Self {
        Self {
            entries: Arc::new(RwLock::new(HashMap::new())),
            resolve_calls: Arc::new(RwLock::new(Vec::new())),
            store_calls: Arc::new(RwLock::new(Vec::new())),
            fail_resolve: Arc::new(AtomicBool::new(false)),
            fail_store: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Seed a value without recording a store call
    pub fn insert(&self, key: &str, value: T) {
        let mut entries = self.entries.write().unwrap_or_else(|e| e.into_inner());
        entries.insert(key.to_string(), value);
    }

    pub fn get(&self, key: &str) -> Option<T> {
        let entries = self.entries.read().unwrap_or_else(|e| e.into_inner());
        entries.get(key).cloned()
    }

    pub fn contains(&self, key: &str) -> bool {
        let entries = self.entries.read().unwrap_or_else(|e| e.into_inner());
        entries.contains_key(key)
    }

    /// Look up every key, recording the call; missing keys are absent
    pub fn resolve(&self, keys: &[String]) -> HashMap<String, T> {
        self.resolve_calls
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .push(keys.to_vec());

        let entries = self.entries.read().unwrap_or_else(|e| e.into_inner());
        keys.iter()
            .filter_map(|key| entries.get(key).map(|value| (key.clone(), value.clone())))
            .collect()
    }

    /// Store every entry, recording the call with its keys sorted
    pub fn store(&self, values: &HashMap<String, T>) {
        let mut keys: Vec<String> = values.keys().cloned().collect();
        keys.sort();
        self.store_calls
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .push(keys);

        let mut entries = self.entries.write().unwrap_or_else(|e| e.into_inner());
        entries.extend(values.iter().map(|(key, value)| (key.clone(), value.clone())));
    }

    /// Keys passed to every [`resolve`](Self::resolve) call so far
    pub fn resolve_calls(&self) -> Vec<Vec<String>> {
        self.resolve_calls
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }

    /// Sorted keys passed to every [`store`](Self::store) call so far
    pub fn store_calls(&self) -> Vec<Vec<String>> {
        self.store_calls
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }

    /// Make the cache wrapper under test report lookups as failed
    pub fn set_fail_resolve(&self, fail: bool) {
        self.fail_resolve.store(fail, Ordering::SeqCst);
    }

    /// Make the cache wrapper under test report writes as failed
    pub fn set_fail_store(&self, fail: bool) {
        self.fail_store.store(fail, Ordering::SeqCst);
    }

    pub fn should_fail_resolve(&self) -> bool {
        self.fail_resolve.load(Ordering::SeqCst)
    }

    pub fn should_fail_store(&self) -> bool {
        self.fail_store.load(Ordering::SeqCst)
    }

    pub fn len(&self) -> usize {
        self.entries.read().unwrap_or_else(|e| e.into_inner()).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl<T: Clone> Default for MockCacheStore<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> Clone for MockCacheStore<T> {
    fn clone(&self) -> Self {
        Self {
            entries: self.entries.clone(),
            resolve_calls: self.resolve_calls.clone(),
            store_calls: self.store_calls.clone(),
            fail_resolve: self.fail_resolve.clone(),
            fail_store: self.fail_store.clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn keys(keys: &[&str]) -> Vec<String> {
        keys.iter().map(|k| k.to_string()).collect()
    }

    #[test]
    fn test_resolve_returns_only_hits() {
        let store = MockCacheStore::new();
        store.insert("a", "A".to_string());

        let found = store.resolve(&keys(&["a", "b"]));
        assert_eq!(found.len(), 1);
        assert_eq!(found["a"], "A");
    }

    #[test]
    fn test_store_records_sorted_keys() {
        let store = MockCacheStore::new();
        store.store(&HashMap::from([
            ("b".to_string(), 2),
            ("a".to_string(), 1),
        ]));

        assert_eq!(store.store_calls(), vec![keys(&["a", "b"])]);
        assert_eq!(store.get("b"), Some(2));
        assert_eq!(store.len(), 2);
    }

    #[test]
    fn test_seeding_is_not_recorded() {
        let store = MockCacheStore::new();
        store.insert("a", 1);
        assert!(store.store_calls().is_empty());
        assert!(store.resolve_calls().is_empty());
        assert!(store.contains("a"));
    }

    #[test]
    fn test_clones_share_state() {
        let store = MockCacheStore::new();
        let other = store.clone();
        other.insert("a", 1);
        other.set_fail_store(true);

        assert!(store.contains("a"));
        assert!(store.should_fail_store());
        assert!(!store.should_fail_resolve());
    }
}
