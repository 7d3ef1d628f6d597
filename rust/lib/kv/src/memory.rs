use std::collections::BTreeMap;
use std::sync::{PoisonError, RwLock};
use std::time::{Duration, Instant};

use tracing::debug;

use crate::error::KVError;
use crate::pattern::{glob_match, literal_prefix};
use crate::traits::KVStore;

struct Entry {
    value: Vec<u8>,
    expires_at: Option<Instant>,
}

impl Entry {
    fn is_live(&self, now: Instant) -> bool {
        self.expires_at.is_none_or(|at| now < at)
    }
}

/// MemoryStore is an in-process KVStore with lazy TTL expiry.
///
/// Expired entries are dropped when a write lock is already held (`set_ex`,
/// `delete`, `delete_pattern`, `purge_expired`); reads just skip them.
#[derive(Default)]
pub struct MemoryStore {
    entries: RwLock<BTreeMap<String, Entry>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of stored entries, including expired ones not yet purged.
    pub fn len(&self) -> usize {
        self.entries
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Drop every expired entry. Returns how many were removed.
    pub fn purge_expired(&self) -> usize {
        let now = Instant::now();
        let mut entries = self.entries.write().unwrap_or_else(PoisonError::into_inner);
        let before = entries.len();
        entries.retain(|_, entry| entry.is_live(now));
        let removed = before - entries.len();
        debug!("memory kv purged {} expired entries", removed);
        removed
    }
}

impl KVStore for MemoryStore {
    fn get(&self, key: &str) -> Result<Option<Vec<u8>>, KVError> {
        let entries = self.entries.read().unwrap_or_else(PoisonError::into_inner);
        let now = Instant::now();
        Ok(entries
            .get(key)
            .filter(|entry| entry.is_live(now))
            .map(|entry| entry.value.clone()))
    }

    fn set_ex(&self, key: &str, value: &[u8], ttl: Option<Duration>) -> Result<(), KVError> {
        let now = Instant::now();
        let entry = Entry {
            value: value.to_vec(),
            expires_at: ttl.map(|ttl| now + ttl),
        };
        let mut entries = self.entries.write().unwrap_or_else(PoisonError::into_inner);
        entries.insert(key.to_string(), entry);
        Ok(())
    }

    fn delete(&self, key: &str) -> Result<(), KVError> {
        let mut entries = self.entries.write().unwrap_or_else(PoisonError::into_inner);
        entries.remove(key);
        Ok(())
    }

    fn scan(&self, prefix: &str) -> Result<Vec<(String, Vec<u8>)>, KVError> {
        let entries = self.entries.read().unwrap_or_else(PoisonError::into_inner);
        let now = Instant::now();
        let mut results = Vec::new();
        for (key, entry) in entries.range(prefix.to_string()..) {
            if !key.starts_with(prefix) {
                break;
            }
            if entry.is_live(now) {
                results.push((key.clone(), entry.value.clone()));
            }
        }
        Ok(results)
    }

    fn delete_pattern(&self, pattern: &str) -> Result<usize, KVError> {
        let prefix = literal_prefix(pattern);
        let now = Instant::now();
        let mut entries = self.entries.write().unwrap_or_else(PoisonError::into_inner);

        let doomed: Vec<String> = entries
            .range(prefix.to_string()..)
            .take_while(|(key, _)| key.starts_with(prefix))
            .filter(|(key, _)| glob_match(pattern, key))
            .map(|(key, _)| key.clone())
            .collect();

        let mut removed = 0;
        for key in &doomed {
            if let Some(entry) = entries.remove(key)
                && entry.is_live(now)
            {
                removed += 1;
            }
        }
        debug!("memory kv delete_pattern {}: {} removed", pattern, removed);
        Ok(removed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn set_get_delete() {
        let store = MemoryStore::new();
        store.set("k1", b"v1").unwrap();
        assert_eq!(store.get("k1").unwrap(), Some(b"v1".to_vec()));

        store.delete("k1").unwrap();
        assert_eq!(store.get("k1").unwrap(), None);

        // Deleting again is fine.
        store.delete("k1").unwrap();
    }

    #[test]
    fn last_write_wins() {
        let store = MemoryStore::new();
        store.set("k", b"first").unwrap();
        store.set("k", b"second").unwrap();
        assert_eq!(store.get("k").unwrap(), Some(b"second".to_vec()));
    }

    #[test]
    fn expired_entries_are_invisible() {
        let store = MemoryStore::new();
        store.set_ex("short", b"v", Some(Duration::ZERO)).unwrap();
        store.set_ex("long", b"v", Some(Duration::from_secs(3600))).unwrap();

        assert_eq!(store.get("short").unwrap(), None);
        assert_eq!(store.get("long").unwrap(), Some(b"v".to_vec()));

        let scanned = store.scan("").unwrap();
        assert_eq!(scanned.len(), 1);
        assert_eq!(scanned[0].0, "long");

        assert_eq!(store.purge_expired(), 1);
        assert_eq!(store.len(), 1);
    }

    #[test]
    fn scan_is_prefix_bounded() {
        let store = MemoryStore::new();
        store.set("USER_PERM_TREE_a_1", b"1").unwrap();
        store.set("USER_PERM_TREE_a_2", b"2").unwrap();
        store.set("USER_PERM_TREE_b_1", b"3").unwrap();

        let keys: Vec<String> = store
            .scan("USER_PERM_TREE_a_")
            .unwrap()
            .into_iter()
            .map(|(k, _)| k)
            .collect();
        assert_eq!(keys, vec!["USER_PERM_TREE_a_1", "USER_PERM_TREE_a_2"]);
    }

    #[test]
    fn delete_pattern_removes_only_matches() {
        let store = MemoryStore::new();
        store.set("USER_PERM_TREE_org1_u1_None", b"1").unwrap();
        store.set("USER_PERM_TREE_org1_u2_None", b"2").unwrap();
        store.set("USER_PERM_TREE_org2_u1_None", b"3").unwrap();
        store.set("USER_TREE_EXPIRED_AT", b"0").unwrap();

        let removed = store.delete_pattern("USER_PERM_TREE_org1_*").unwrap();
        assert_eq!(removed, 2);
        assert!(store.get("USER_PERM_TREE_org2_u1_None").unwrap().is_some());

        let removed = store.delete_pattern("USER_PERM_TREE_*").unwrap();
        assert_eq!(removed, 1);
        assert!(store.get("USER_TREE_EXPIRED_AT").unwrap().is_some());
    }
}
