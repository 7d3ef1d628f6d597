use std::time::Duration;

use crate::error::KVError;

/// KVStore is a byte-oriented key-value interface with per-key expiry and
/// pattern deletes, the shape of a shared remote cache.
///
/// Keys follow an underscore-namespaced convention such as
/// `USER_PERM_TREE_{tenant}_{subject}_{filter}`. Implementations must be safe
/// to share across threads: `set` is last-write-wins and `delete` of a missing
/// key is not an error.
pub trait KVStore: Send + Sync {
    /// Get the value for a key. Returns None if the key does not exist or has expired.
    fn get(&self, key: &str) -> Result<Option<Vec<u8>>, KVError>;

    /// Set a key-value pair that never expires.
    fn set(&self, key: &str, value: &[u8]) -> Result<(), KVError> {
        self.set_ex(key, value, None)
    }

    /// Set a key-value pair that expires after `ttl` (None = never).
    fn set_ex(&self, key: &str, value: &[u8], ttl: Option<Duration>) -> Result<(), KVError>;

    /// Delete a key. Deleting a missing key succeeds.
    fn delete(&self, key: &str) -> Result<(), KVError>;

    /// Scan all live keys matching a prefix. Returns sorted (key, value) pairs.
    fn scan(&self, prefix: &str) -> Result<Vec<(String, Vec<u8>)>, KVError>;

    /// Delete every key matching a glob pattern (`*` matches any run of
    /// characters). Returns the number of keys removed.
    fn delete_pattern(&self, pattern: &str) -> Result<usize, KVError>;
}
