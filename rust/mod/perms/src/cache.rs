//! Resolution cache: computed user trees stored in a shared KV backend.
//!
//! Keys follow `USER_PERM_TREE_{tenant}_{subject}_{filter}`, with `_`, `*`
//! and `%` percent-escaped in the tenant, so one tenant (or every tenant) can
//! be cleared with a single pattern delete. Backend failures never fail a
//! resolution: reads degrade to a miss and writes are logged and dropped.

use std::borrow::Cow;
use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use bastion_kv::KVStore;
use chrono::Utc;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::config::PermsConfig;
use crate::error::{PermsError, PermsResult};
use crate::tree::UserTree;

const KEY_PREFIX: &str = "USER_PERM_TREE_";
const EXPIRED_AT_KEY: &str = "USER_TREE_EXPIRED_AT";

/// How a single resolution uses the cache.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case", try_from = "String")]
pub enum CachePolicy {
    /// Never read or write the cache.
    #[default]
    Bypass,
    /// Serve a cached tree if present, otherwise build and store it.
    ReadThrough,
    /// Evict, rebuild and store.
    ForceRefresh,
}

impl CachePolicy {
    pub fn as_str(self) -> &'static str {
        match self {
            CachePolicy::Bypass => "bypass",
            CachePolicy::ReadThrough => "read-through",
            CachePolicy::ForceRefresh => "force-refresh",
        }
    }
}

impl fmt::Display for CachePolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for CachePolicy {
    type Err = PermsError;

    /// Accepts the names and the numeric codes `0`, `1` and `2`.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "0" | "bypass" => Ok(CachePolicy::Bypass),
            "1" | "read-through" | "read_through" => Ok(CachePolicy::ReadThrough),
            "2" | "force-refresh" | "force_refresh" => Ok(CachePolicy::ForceRefresh),
            other => Err(PermsError::Config(format!("unknown cache policy: {other}"))),
        }
    }
}

impl TryFrom<String> for CachePolicy {
    type Error = PermsError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

/// Cache key of one resolution.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CacheKey {
    tenant: String,
    subject: Option<String>,
    filter: Option<String>,
}

impl CacheKey {
    pub fn new(tenant: &str, subject: Option<&str>, filter: Option<&str>) -> Self {
        Self {
            tenant: tenant.to_string(),
            subject: subject.map(str::to_string),
            filter: filter.map(str::to_string),
        }
    }

    pub fn tenant(&self) -> &str {
        &self.tenant
    }

    /// Pattern matching every key of `tenant`.
    pub fn tenant_pattern(tenant: &str) -> String {
        format!("{KEY_PREFIX}{}_*", escape_tenant(tenant))
    }

    /// Pattern matching every key of every tenant.
    pub fn global_pattern() -> String {
        format!("{KEY_PREFIX}*")
    }
}

impl fmt::Display for CacheKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}{}_{}_{}",
            KEY_PREFIX,
            escape_tenant(&self.tenant),
            self.subject.as_deref().unwrap_or("none"),
            self.filter.as_deref().unwrap_or("None")
        )
    }
}

/// Percent-encode `_`, `*` and `%` in a tenant id. The tenant segment then
/// never contains the field separator, so `org1_*` cannot reach `org1_x`.
fn escape_tenant(tenant: &str) -> Cow<'_, str> {
    if !tenant.contains(['_', '*', '%']) {
        return Cow::Borrowed(tenant);
    }
    let mut out = String::with_capacity(tenant.len() + 8);
    for c in tenant.chars() {
        match c {
            '%' => out.push_str("%25"),
            '*' => out.push_str("%2A"),
            '_' => out.push_str("%5F"),
            c => out.push(c),
        }
    }
    Cow::Owned(out)
}

/// Shared cache of computed user trees.
pub struct ResolutionCache {
    kv: Arc<dyn KVStore>,
    ttl: Duration,
    debounce: Duration,
    in_flight: Mutex<HashMap<String, Arc<Mutex<()>>>>,
}

impl ResolutionCache {
    pub fn new(kv: Arc<dyn KVStore>, ttl: Duration, debounce: Duration) -> Self {
        Self {
            kv,
            ttl,
            debounce,
            in_flight: Mutex::new(HashMap::new()),
        }
    }

    pub fn from_config(kv: Arc<dyn KVStore>, config: &PermsConfig) -> Self {
        Self::new(kv, config.cache_ttl(), config.expire_debounce())
    }

    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    /// Cached tree for `key`. Backend and decode failures count as a miss.
    pub fn get(&self, key: &CacheKey) -> Option<UserTree> {
        let key = key.to_string();
        let data = match self.kv.get(&key) {
            Ok(Some(data)) => data,
            Ok(None) => return None,
            Err(e) => {
                warn!("{}", PermsError::CacheUnavailable(e));
                return None;
            }
        };
        match UserTree::from_bytes(&data) {
            Ok(tree) => {
                debug!("cache hit: {}", key);
                Some(tree)
            }
            Err(e) => {
                warn!("dropping unreadable cache entry {}: {}", key, e);
                if let Err(e) = self.kv.delete(&key) {
                    warn!("{}", PermsError::CacheUnavailable(e));
                }
                None
            }
        }
    }

    /// Store `tree` under `key` for `ttl`, or for the configured TTL when `None`.
    pub fn put(&self, key: &CacheKey, tree: &UserTree, ttl: Option<Duration>) {
        let data = match tree.to_bytes() {
            Ok(data) => data,
            Err(e) => {
                warn!("not caching {}: {}", key, e);
                return;
            }
        };
        if let Err(e) = self.kv.set_ex(&key.to_string(), &data, Some(ttl.unwrap_or(self.ttl))) {
            warn!("{}", PermsError::CacheUnavailable(e));
        }
    }

    pub fn invalidate(&self, key: &CacheKey) {
        if let Err(e) = self.kv.delete(&key.to_string()) {
            warn!("{}", PermsError::CacheUnavailable(e));
        }
    }

    /// Drop every cached tree of `tenant`, or of all tenants when `None`.
    ///
    /// Calls for the same scope closer together than the debounce window
    /// are no-ops. Returns whether the bulk delete ran.
    pub fn invalidate_all(&self, tenant: Option<&str>) -> bool {
        let marker = match tenant {
            Some(t) => format!("{EXPIRED_AT_KEY}_{}", escape_tenant(t)),
            None => EXPIRED_AT_KEY.to_string(),
        };
        let now = Utc::now().timestamp_millis();
        match self.last_expired_at(&marker) {
            Some(last) if now - last < self.debounce.as_millis() as i64 => {
                debug!("skipping bulk expiry of {}: last one {}ms ago", marker, now - last);
                return false;
            }
            _ => {}
        }

        let pattern = match tenant {
            Some(t) => CacheKey::tenant_pattern(t),
            None => CacheKey::global_pattern(),
        };
        match self.kv.delete_pattern(&pattern) {
            Ok(removed) => info!("expired {} cached user trees ({})", removed, pattern),
            Err(e) => {
                warn!("{}", PermsError::CacheUnavailable(e));
                return false;
            }
        }
        if let Err(e) = self
            .kv
            .set_ex(&marker, now.to_string().as_bytes(), Some(self.debounce))
        {
            warn!("{}", PermsError::CacheUnavailable(e));
        }
        true
    }

    /// Drop every cached tree of `tenant` now, ignoring the debounce window.
    pub fn purge_tenant(&self, tenant: &str) -> PermsResult<usize> {
        let removed = self.kv.delete_pattern(&CacheKey::tenant_pattern(tenant))?;
        info!("purged {} cached user trees of tenant {}", removed, tenant);
        Ok(removed)
    }

    fn last_expired_at(&self, marker: &str) -> Option<i64> {
        match self.kv.get(marker) {
            Ok(Some(raw)) => std::str::from_utf8(&raw).ok()?.parse().ok(),
            Ok(None) => None,
            Err(e) => {
                warn!("{}", PermsError::CacheUnavailable(e));
                None
            }
        }
    }

    /// Run `f` while holding the in-flight slot of `key`. Concurrent callers
    /// for the same key run one after another.
    pub fn single_flight<T>(&self, key: &CacheKey, f: impl FnOnce() -> T) -> T {
        let key = key.to_string();
        let slot = {
            let mut in_flight = self.in_flight.lock().unwrap_or_else(PoisonError::into_inner);
            in_flight
                .entry(key.clone())
                .or_insert_with(|| Arc::new(Mutex::new(())))
                .clone()
        };

        let result = {
            let _guard = slot.lock().unwrap_or_else(PoisonError::into_inner);
            f()
        };

        let mut in_flight = self.in_flight.lock().unwrap_or_else(PoisonError::into_inner);
        // Only the map and this caller hold the slot: nobody is waiting.
        if Arc::strong_count(&slot) == 2 {
            in_flight.remove(&key);
        }
        // Release under the map lock so the next finisher sees an exact count.
        drop(slot);
        drop(in_flight);
        result
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::thread;

    use bastion_kv::{KVError, MemoryStore};

    use super::*;

    /// MemoryStore that counts bulk deletes.
    #[derive(Default)]
    struct CountingKv {
        inner: MemoryStore,
        pattern_deletes: AtomicUsize,
    }

    impl KVStore for CountingKv {
        fn get(&self, key: &str) -> Result<Option<Vec<u8>>, KVError> {
            self.inner.get(key)
        }
        fn set_ex(&self, key: &str, value: &[u8], ttl: Option<Duration>) -> Result<(), KVError> {
            self.inner.set_ex(key, value, ttl)
        }
        fn delete(&self, key: &str) -> Result<(), KVError> {
            self.inner.delete(key)
        }
        fn scan(&self, prefix: &str) -> Result<Vec<(String, Vec<u8>)>, KVError> {
            self.inner.scan(prefix)
        }
        fn delete_pattern(&self, pattern: &str) -> Result<usize, KVError> {
            self.pattern_deletes.fetch_add(1, Ordering::SeqCst);
            self.inner.delete_pattern(pattern)
        }
    }

    struct DownKv;

    impl KVStore for DownKv {
        fn get(&self, _: &str) -> Result<Option<Vec<u8>>, KVError> {
            Err(KVError::Unavailable("down".into()))
        }
        fn set_ex(&self, _: &str, _: &[u8], _: Option<Duration>) -> Result<(), KVError> {
            Err(KVError::Unavailable("down".into()))
        }
        fn delete(&self, _: &str) -> Result<(), KVError> {
            Err(KVError::Unavailable("down".into()))
        }
        fn scan(&self, _: &str) -> Result<Vec<(String, Vec<u8>)>, KVError> {
            Err(KVError::Unavailable("down".into()))
        }
        fn delete_pattern(&self, _: &str) -> Result<usize, KVError> {
            Err(KVError::Unavailable("down".into()))
        }
    }

    fn tree() -> UserTree {
        let mut tree = UserTree::new("", "Default");
        tree.create_node("1", "Prod", "").unwrap();
        tree.set_assets("1", ["a1".to_string()].into()).unwrap();
        tree
    }

    fn cache(kv: Arc<dyn KVStore>) -> ResolutionCache {
        ResolutionCache::new(kv, Duration::from_secs(3600), Duration::from_secs(60))
    }

    #[test]
    fn key_format() {
        assert_eq!(
            CacheKey::new("org1", Some("u1"), None).to_string(),
            "USER_PERM_TREE_org1_u1_None"
        );
        assert_eq!(
            CacheKey::new("org1", None, Some("f9")).to_string(),
            "USER_PERM_TREE_org1_none_f9"
        );
        assert_eq!(CacheKey::tenant_pattern("org1"), "USER_PERM_TREE_org1_*");
        assert_eq!(CacheKey::global_pattern(), "USER_PERM_TREE_*");
    }

    #[test]
    fn tenant_segment_is_escaped() {
        assert_eq!(
            CacheKey::new("org1_x", Some("u_1"), None).to_string(),
            "USER_PERM_TREE_org1%5Fx_u_1_None"
        );
        assert_eq!(CacheKey::tenant_pattern("a*%"), "USER_PERM_TREE_a%2A%25_*");
    }

    #[test]
    fn tenant_prefix_does_not_leak_into_other_tenants() {
        let kv = Arc::new(MemoryStore::new());
        let cache = cache(kv.clone());
        let short = CacheKey::new("org1", Some("U"), None);
        let long = CacheKey::new("org1_x", Some("U"), None);
        cache.put(&short, &tree(), None);
        cache.put(&long, &tree(), None);

        assert_eq!(cache.purge_tenant("org1").unwrap(), 1);
        assert!(cache.get(&short).is_none());
        assert!(cache.get(&long).is_some());

        assert!(cache.invalidate_all(Some("org1_x")));
        assert!(cache.get(&long).is_none());
    }

    #[test]
    fn policy_parsing() {
        assert_eq!("0".parse::<CachePolicy>().unwrap(), CachePolicy::Bypass);
        assert_eq!("1".parse::<CachePolicy>().unwrap(), CachePolicy::ReadThrough);
        assert_eq!("force-refresh".parse::<CachePolicy>().unwrap(), CachePolicy::ForceRefresh);
        assert!("3".parse::<CachePolicy>().is_err());
        assert_eq!(CachePolicy::default(), CachePolicy::Bypass);

        let json = serde_json::to_string(&CachePolicy::ReadThrough).unwrap();
        assert_eq!(json, "\"read-through\"");
        let back: CachePolicy = serde_json::from_str("\"2\"").unwrap();
        assert_eq!(back, CachePolicy::ForceRefresh);
    }

    #[test]
    fn put_get_invalidate() {
        let cache = cache(Arc::new(MemoryStore::new()));
        let key = CacheKey::new("org1", Some("u1"), None);
        assert!(cache.get(&key).is_none());

        cache.put(&key, &tree(), None);
        assert_eq!(cache.get(&key), Some(tree()));

        cache.invalidate(&key);
        assert!(cache.get(&key).is_none());
    }

    #[test]
    fn corrupt_entry_is_a_miss_and_removed() {
        let kv = Arc::new(MemoryStore::new());
        let cache = cache(kv.clone());
        let key = CacheKey::new("org1", Some("u1"), None);
        kv.set(&key.to_string(), b"not a tree").unwrap();

        assert!(cache.get(&key).is_none());
        assert!(kv.get(&key.to_string()).unwrap().is_none());
    }

    #[test]
    fn unavailable_backend_degrades_to_miss() {
        let cache = cache(Arc::new(DownKv));
        let key = CacheKey::new("org1", Some("u1"), None);
        cache.put(&key, &tree(), None);
        assert!(cache.get(&key).is_none());
        assert!(!cache.invalidate_all(None));
        assert!(cache.purge_tenant("org1").is_err());
    }

    #[test]
    fn invalidate_all_is_debounced() {
        let kv = Arc::new(CountingKv::default());
        let cache = cache(kv.clone());
        cache.put(&CacheKey::new("org1", Some("u1"), None), &tree(), None);

        assert!(cache.invalidate_all(None));
        assert!(!cache.invalidate_all(None));
        assert_eq!(kv.pattern_deletes.load(Ordering::SeqCst), 1);
        assert!(cache.get(&CacheKey::new("org1", Some("u1"), None)).is_none());
    }

    #[test]
    fn tenant_scope_has_its_own_window() {
        let kv = Arc::new(CountingKv::default());
        let cache = cache(kv.clone());
        let a = CacheKey::new("org1", Some("u1"), None);
        let b = CacheKey::new("org2", Some("u1"), None);
        cache.put(&a, &tree(), None);
        cache.put(&b, &tree(), None);

        assert!(cache.invalidate_all(Some("org1")));
        assert!(cache.get(&a).is_none());
        assert!(cache.get(&b).is_some());

        assert!(!cache.invalidate_all(Some("org1")));
        assert!(cache.invalidate_all(Some("org2")));
        assert_eq!(kv.pattern_deletes.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn zero_debounce_never_skips() {
        let kv = Arc::new(CountingKv::default());
        let cache = ResolutionCache::new(kv.clone(), Duration::from_secs(60), Duration::ZERO);
        assert!(cache.invalidate_all(None));
        assert!(cache.invalidate_all(None));
        assert_eq!(kv.pattern_deletes.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn purge_tenant_ignores_window() {
        let cache = cache(Arc::new(MemoryStore::new()));
        cache.put(&CacheKey::new("org1", Some("u1"), None), &tree(), None);
        cache.put(&CacheKey::new("org1", Some("u2"), None), &tree(), None);
        assert!(cache.invalidate_all(Some("org1")));
        cache.put(&CacheKey::new("org1", Some("u3"), None), &tree(), None);
        assert_eq!(cache.purge_tenant("org1").unwrap(), 1);
    }

    #[test]
    fn single_flight_serializes_same_key() {
        let cache = Arc::new(cache(Arc::new(MemoryStore::new())));
        let active = Arc::new(AtomicUsize::new(0));
        let overlaps = Arc::new(AtomicUsize::new(0));

        let handles: Vec<_> = (0..8)
            .map(|_| {
                let cache = cache.clone();
                let active = active.clone();
                let overlaps = overlaps.clone();
                thread::spawn(move || {
                    let key = CacheKey::new("org1", Some("u1"), None);
                    cache.single_flight(&key, || {
                        if active.fetch_add(1, Ordering::SeqCst) > 0 {
                            overlaps.fetch_add(1, Ordering::SeqCst);
                        }
                        thread::sleep(Duration::from_millis(5));
                        active.fetch_sub(1, Ordering::SeqCst);
                    })
                })
            })
            .collect();
        for h in handles {
            h.join().unwrap();
        }

        assert_eq!(overlaps.load(Ordering::SeqCst), 0);
        assert!(cache.in_flight.lock().unwrap().is_empty());
    }
}
