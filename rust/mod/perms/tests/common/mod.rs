#![allow(dead_code)]

use std::collections::BTreeSet;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use bastion_perms::{
    Actions, Asset, CatalogTree, GrantRule, GrantRuleStore, MemoryRuleStore, Node, PermsConfig,
    PermsResult, SystemUser,
};

/// Rule store that counts how often it is queried.
#[derive(Default)]
pub struct CountingStore {
    pub inner: MemoryRuleStore,
    calls: AtomicUsize,
}

impl CountingStore {
    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    fn hit(&self) {
        self.calls.fetch_add(1, Ordering::SeqCst);
    }
}

impl GrantRuleStore for CountingStore {
    fn user_rules(
        &self,
        user_id: &str,
        group_ids: &[String],
        include_groups: bool,
    ) -> PermsResult<Vec<GrantRule>> {
        self.hit();
        self.inner.user_rules(user_id, group_ids, include_groups)
    }

    fn user_group_rules(&self, group_id: &str) -> PermsResult<Vec<GrantRule>> {
        self.hit();
        self.inner.user_group_rules(group_id)
    }

    fn node_rules(&self, node_key: &str) -> PermsResult<Vec<GrantRule>> {
        self.hit();
        self.inner.node_rules(node_key)
    }

    fn asset_rules(
        &self,
        asset_id: &str,
        node_keys: &BTreeSet<String>,
    ) -> PermsResult<Vec<GrantRule>> {
        self.hit();
        self.inner.asset_rules(asset_id, node_keys)
    }

    fn system_user_rules(&self, system_user_id: &str) -> PermsResult<Vec<GrantRule>> {
        self.hit();
        self.inner.system_user_rules(system_user_id)
    }

    fn system_users(&self, ids: &BTreeSet<String>) -> PermsResult<Vec<SystemUser>> {
        self.inner.system_users(ids)
    }
}

pub fn asset(id: &str, nodes: &[&str]) -> Asset {
    let mut a = Asset::new(id, format!("host-{id}"), "10.0.0.1");
    a.nodes = nodes.iter().map(|s| s.to_string()).collect();
    a
}

/// ```text
/// root
/// ├── 1 (A)
/// │   ├── 1:2 (B)      X
/// │   │   └── 1:2:5 (E) W
/// │   └── 1:4 (D)      Z
/// └── 3 (C)            Y, V (inactive)
/// ```
pub fn catalog() -> CatalogTree {
    let mut inactive = asset("V", &["3"]);
    inactive.is_active = false;
    CatalogTree::new(
        "Default",
        vec![
            Node::new("node-a", "1", "A"),
            Node::new("node-b", "1:2", "B"),
            Node::new("node-e", "1:2:5", "E"),
            Node::new("node-d", "1:4", "D"),
            Node::new("node-c", "3", "C"),
        ],
        vec![
            asset("X", &["1:2"]),
            asset("W", &["1:2:5"]),
            asset("Z", &["1:4"]),
            asset("Y", &["3"]),
            inactive,
        ],
    )
    .unwrap()
}

pub fn node_grant(id: &str, user: &str, keys: &[&str]) -> GrantRule {
    let mut r = GrantRule::new(id, id);
    r.users.insert(user.to_string());
    r.nodes = keys.iter().map(|s| s.to_string()).collect();
    r.system_users.insert("su-ssh".to_string());
    r.actions = Actions::CONNECT;
    r
}

pub fn asset_grant(id: &str, user: &str, assets: &[&str]) -> GrantRule {
    let mut r = GrantRule::new(id, id);
    r.users.insert(user.to_string());
    r.assets = assets.iter().map(|s| s.to_string()).collect();
    r.system_users.insert("su-ssh".to_string());
    r.actions = Actions::CONNECT;
    r
}

pub fn store_with(rules: Vec<GrantRule>) -> Arc<CountingStore> {
    let store = CountingStore::default();
    store
        .inner
        .upsert_system_user(SystemUser::new("su-ssh", "ops", "ops", "ssh"));
    for rule in rules {
        store.inner.upsert_rule(rule);
    }
    Arc::new(store)
}

pub fn config() -> PermsConfig {
    PermsConfig::default()
}
