use std::path::Path;
use std::sync::Arc;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use redb::{Database, ReadableTable, TableDefinition};
use tracing::debug;

use crate::error::KVError;
use crate::pattern::{glob_match, literal_prefix};
use crate::traits::KVStore;

const TABLE: TableDefinition<&str, &[u8]> = TableDefinition::new("kv");

/// Width of the expiry header stored in front of every value.
const HEADER_LEN: usize = 8;

/// RedbStore is a KVStore implementation backed by redb, a pure-Rust embedded
/// key-value database. It lets several resolver processes on one host share
/// a cache file.
///
/// Each stored value is prefixed with an 8-byte big-endian expiry timestamp in
/// milliseconds since the Unix epoch; `0` means the entry never expires.
pub struct RedbStore {
    db: Arc<Database>,
}

impl RedbStore {
    /// Open or create a redb database at the given path.
    pub fn open(path: &Path) -> Result<Self, KVError> {
        let db = Database::create(path).map_err(|e| KVError::Unavailable(e.to_string()))?;

        // Ensure the table exists by doing a write transaction.
        let write_txn = db
            .begin_write()
            .map_err(|e| KVError::Storage(e.to_string()))?;
        {
            let _table = write_txn
                .open_table(TABLE)
                .map_err(|e| KVError::Storage(e.to_string()))?;
        }
        write_txn
            .commit()
            .map_err(|e| KVError::Storage(e.to_string()))?;

        Ok(Self { db: Arc::new(db) })
    }

    /// Remove every expired entry. Returns how many were removed.
    pub fn purge_expired(&self) -> Result<usize, KVError> {
        let now = now_millis();
        let write_txn = self
            .db
            .begin_write()
            .map_err(|e| KVError::Storage(e.to_string()))?;
        let removed = {
            let mut table = write_txn
                .open_table(TABLE)
                .map_err(|e| KVError::Storage(e.to_string()))?;
            let mut expired = Vec::new();
            for entry in table.iter().map_err(|e| KVError::Storage(e.to_string()))? {
                let entry = entry.map_err(|e| KVError::Storage(e.to_string()))?;
                let (expires_at, _) = decode(entry.1.value())?;
                if is_expired(expires_at, now) {
                    expired.push(entry.0.value().to_string());
                }
            }
            for key in &expired {
                table
                    .remove(key.as_str())
                    .map_err(|e| KVError::Storage(e.to_string()))?;
            }
            expired.len()
        };
        write_txn
            .commit()
            .map_err(|e| KVError::Storage(e.to_string()))?;
        debug!("redb kv purged {} expired entries", removed);
        Ok(removed)
    }
}

impl KVStore for RedbStore {
    fn get(&self, key: &str) -> Result<Option<Vec<u8>>, KVError> {
        let read_txn = self
            .db
            .begin_read()
            .map_err(|e| KVError::Storage(e.to_string()))?;
        let table = read_txn
            .open_table(TABLE)
            .map_err(|e| KVError::Storage(e.to_string()))?;

        match table.get(key) {
            Ok(Some(val)) => {
                let (expires_at, payload) = decode(val.value())?;
                if is_expired(expires_at, now_millis()) {
                    Ok(None)
                } else {
                    Ok(Some(payload.to_vec()))
                }
            }
            Ok(None) => Ok(None),
            Err(e) => Err(KVError::Storage(e.to_string())),
        }
    }

    fn set_ex(&self, key: &str, value: &[u8], ttl: Option<Duration>) -> Result<(), KVError> {
        let expires_at = match ttl {
            // Clamp to 1 so a zero TTL never turns into "no expiry".
            Some(ttl) => (now_millis() + ttl.as_millis() as u64).max(1),
            None => 0,
        };
        let encoded = encode(expires_at, value);

        let write_txn = self
            .db
            .begin_write()
            .map_err(|e| KVError::Storage(e.to_string()))?;
        {
            let mut table = write_txn
                .open_table(TABLE)
                .map_err(|e| KVError::Storage(e.to_string()))?;
            table
                .insert(key, encoded.as_slice())
                .map_err(|e| KVError::Storage(e.to_string()))?;
        }
        write_txn
            .commit()
            .map_err(|e| KVError::Storage(e.to_string()))?;
        Ok(())
    }

    fn delete(&self, key: &str) -> Result<(), KVError> {
        let write_txn = self
            .db
            .begin_write()
            .map_err(|e| KVError::Storage(e.to_string()))?;
        {
            let mut table = write_txn
                .open_table(TABLE)
                .map_err(|e| KVError::Storage(e.to_string()))?;
            table
                .remove(key)
                .map_err(|e| KVError::Storage(e.to_string()))?;
        }
        write_txn
            .commit()
            .map_err(|e| KVError::Storage(e.to_string()))?;
        Ok(())
    }

    fn scan(&self, prefix: &str) -> Result<Vec<(String, Vec<u8>)>, KVError> {
        let read_txn = self
            .db
            .begin_read()
            .map_err(|e| KVError::Storage(e.to_string()))?;
        let table = read_txn
            .open_table(TABLE)
            .map_err(|e| KVError::Storage(e.to_string()))?;

        let now = now_millis();
        let mut results = Vec::new();
        let iter = table
            .range(prefix..)
            .map_err(|e| KVError::Storage(e.to_string()))?;

        for entry in iter {
            let entry = entry.map_err(|e| KVError::Storage(e.to_string()))?;
            let key = entry.0.value().to_string();
            if !key.starts_with(prefix) {
                break;
            }
            let (expires_at, payload) = decode(entry.1.value())?;
            if !is_expired(expires_at, now) {
                results.push((key, payload.to_vec()));
            }
        }

        Ok(results)
    }

    fn delete_pattern(&self, pattern: &str) -> Result<usize, KVError> {
        let prefix = literal_prefix(pattern);
        let now = now_millis();

        let write_txn = self
            .db
            .begin_write()
            .map_err(|e| KVError::Storage(e.to_string()))?;
        let removed = {
            let mut table = write_txn
                .open_table(TABLE)
                .map_err(|e| KVError::Storage(e.to_string()))?;

            // Collect first: the table cannot be mutated while a range borrows it.
            let mut doomed = Vec::new();
            for entry in table
                .range(prefix..)
                .map_err(|e| KVError::Storage(e.to_string()))?
            {
                let entry = entry.map_err(|e| KVError::Storage(e.to_string()))?;
                let key = entry.0.value().to_string();
                if !key.starts_with(prefix) {
                    break;
                }
                if glob_match(pattern, &key) {
                    let (expires_at, _) = decode(entry.1.value())?;
                    doomed.push((key, !is_expired(expires_at, now)));
                }
            }

            let mut live = 0;
            for (key, is_live) in &doomed {
                table
                    .remove(key.as_str())
                    .map_err(|e| KVError::Storage(e.to_string()))?;
                if *is_live {
                    live += 1;
                }
            }
            live
        };
        write_txn
            .commit()
            .map_err(|e| KVError::Storage(e.to_string()))?;
        debug!("redb kv delete_pattern {}: {} removed", pattern, removed);
        Ok(removed)
    }
}

fn now_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}

fn is_expired(expires_at: u64, now: u64) -> bool {
    expires_at != 0 && expires_at <= now
}

fn encode(expires_at: u64, value: &[u8]) -> Vec<u8> {
    let mut buf = Vec::with_capacity(HEADER_LEN + value.len());
    buf.extend_from_slice(&expires_at.to_be_bytes());
    buf.extend_from_slice(value);
    buf
}

fn decode(raw: &[u8]) -> Result<(u64, &[u8]), KVError> {
    if raw.len() < HEADER_LEN {
        return Err(KVError::Serialization(format!(
            "value shorter than expiry header: {} bytes",
            raw.len()
        )));
    }
    let (header, payload) = raw.split_at(HEADER_LEN);
    let mut expiry = [0u8; HEADER_LEN];
    expiry.copy_from_slice(header);
    Ok((u64::from_be_bytes(expiry), payload))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn open_store() -> (RedbStore, tempfile::TempDir) {
        let dir = tempfile::tempdir().unwrap();
        let store = RedbStore::open(&dir.path().join("cache.redb")).unwrap();
        (store, dir)
    }

    #[test]
    fn set_get_delete() {
        let (store, _dir) = open_store();
        store.set("k1", b"hello").unwrap();
        assert_eq!(store.get("k1").unwrap(), Some(b"hello".to_vec()));

        store.delete("k1").unwrap();
        assert_eq!(store.get("k1").unwrap(), None);
        store.delete("k1").unwrap();
    }

    #[test]
    fn ttl_expiry() {
        let (store, _dir) = open_store();
        store.set_ex("gone", b"v", Some(Duration::ZERO)).unwrap();
        store.set_ex("kept", b"v", Some(Duration::from_secs(3600))).unwrap();

        assert_eq!(store.get("gone").unwrap(), None);
        assert_eq!(store.get("kept").unwrap(), Some(b"v".to_vec()));
        assert_eq!(store.scan("").unwrap().len(), 1);

        assert_eq!(store.purge_expired().unwrap(), 1);
    }

    #[test]
    fn empty_value_round_trips() {
        let (store, _dir) = open_store();
        store.set("empty", b"").unwrap();
        assert_eq!(store.get("empty").unwrap(), Some(Vec::new()));
    }

    #[test]
    fn delete_pattern_scoped_by_tenant() {
        let (store, _dir) = open_store();
        store.set("USER_PERM_TREE_org1_u1_None", b"1").unwrap();
        store.set("USER_PERM_TREE_org1_u2_f1", b"2").unwrap();
        store.set("USER_PERM_TREE_org2_u1_None", b"3").unwrap();

        assert_eq!(store.delete_pattern("USER_PERM_TREE_org1_*").unwrap(), 2);
        let left = store.scan("USER_PERM_TREE_").unwrap();
        assert_eq!(left.len(), 1);
        assert_eq!(left[0].0, "USER_PERM_TREE_org2_u1_None");
    }

    #[test]
    fn reopen_keeps_data() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("persist.redb");
        {
            let store = RedbStore::open(&path).unwrap();
            store.set("k", b"v").unwrap();
        }
        let store = RedbStore::open(&path).unwrap();
        assert_eq!(store.get("k").unwrap(), Some(b"v".to_vec()));
    }
}
