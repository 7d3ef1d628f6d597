//! Grant rule and favorites sources.
//!
//! Rule administration lives elsewhere; the resolver only queries. Every
//! query returns rules that are valid right now.

use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::sync::{PoisonError, RwLock};

use chrono::Utc;

use crate::error::PermsResult;
use crate::model::{GrantRule, SystemUser};

/// Query side of the grant rule store. One query per subject kind.
pub trait GrantRuleStore: Send + Sync {
    /// Rules bound to the user, plus those bound to `group_ids` when
    /// `include_groups` is set.
    fn user_rules(
        &self,
        user_id: &str,
        group_ids: &[String],
        include_groups: bool,
    ) -> PermsResult<Vec<GrantRule>>;

    fn user_group_rules(&self, group_id: &str) -> PermsResult<Vec<GrantRule>>;

    /// Rules granting exactly this node key.
    fn node_rules(&self, node_key: &str) -> PermsResult<Vec<GrantRule>>;

    /// Rules granting the asset directly or any of `node_keys`.
    fn asset_rules(&self, asset_id: &str, node_keys: &BTreeSet<String>)
    -> PermsResult<Vec<GrantRule>>;

    fn system_user_rules(&self, system_user_id: &str) -> PermsResult<Vec<GrantRule>>;

    /// Look up system users by id. Unknown ids are skipped.
    fn system_users(&self, ids: &BTreeSet<String>) -> PermsResult<Vec<SystemUser>>;
}

/// Source of a user's favorited asset ids.
pub trait FavoritesProvider: Send + Sync {
    fn favorite_asset_ids(&self, user_id: &str) -> PermsResult<BTreeSet<String>>;
}

/// In-memory rule store.
#[derive(Default)]
pub struct MemoryRuleStore {
    rules: RwLock<BTreeMap<String, GrantRule>>,
    system_users: RwLock<BTreeMap<String, SystemUser>>,
}

impl MemoryRuleStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert or replace a rule by id.
    pub fn upsert_rule(&self, rule: GrantRule) {
        self.rules
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(rule.id.clone(), rule);
    }

    pub fn remove_rule(&self, id: &str) -> Option<GrantRule> {
        self.rules
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(id)
    }

    pub fn upsert_system_user(&self, system_user: SystemUser) {
        self.system_users
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(system_user.id.clone(), system_user);
    }

    fn select<F>(&self, pred: F) -> PermsResult<Vec<GrantRule>>
    where
        F: Fn(&GrantRule) -> bool,
    {
        let now = Utc::now();
        let rules = self.rules.read().unwrap_or_else(PoisonError::into_inner);
        Ok(rules
            .values()
            .filter(|r| r.is_valid(now) && pred(r))
            .cloned()
            .collect())
    }
}

impl GrantRuleStore for MemoryRuleStore {
    fn user_rules(
        &self,
        user_id: &str,
        group_ids: &[String],
        include_groups: bool,
    ) -> PermsResult<Vec<GrantRule>> {
        self.select(|r| {
            r.users.contains(user_id)
                || (include_groups && group_ids.iter().any(|g| r.user_groups.contains(g)))
        })
    }

    fn user_group_rules(&self, group_id: &str) -> PermsResult<Vec<GrantRule>> {
        self.select(|r| r.user_groups.contains(group_id))
    }

    fn node_rules(&self, node_key: &str) -> PermsResult<Vec<GrantRule>> {
        self.select(|r| r.nodes.contains(node_key))
    }

    fn asset_rules(
        &self,
        asset_id: &str,
        node_keys: &BTreeSet<String>,
    ) -> PermsResult<Vec<GrantRule>> {
        self.select(|r| r.assets.contains(asset_id) || !r.nodes.is_disjoint(node_keys))
    }

    fn system_user_rules(&self, system_user_id: &str) -> PermsResult<Vec<GrantRule>> {
        self.select(|r| r.system_users.contains(system_user_id))
    }

    fn system_users(&self, ids: &BTreeSet<String>) -> PermsResult<Vec<SystemUser>> {
        let system_users = self
            .system_users
            .read()
            .unwrap_or_else(PoisonError::into_inner);
        Ok(ids
            .iter()
            .filter_map(|id| system_users.get(id).cloned())
            .collect())
    }
}

/// In-memory favorites, keyed by user id.
#[derive(Default)]
pub struct MemoryFavorites {
    favorites: RwLock<HashMap<String, BTreeSet<String>>>,
}

impl MemoryFavorites {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(&self, user_id: &str, asset_id: &str) {
        self.favorites
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .entry(user_id.to_string())
            .or_default()
            .insert(asset_id.to_string());
    }

    pub fn remove(&self, user_id: &str, asset_id: &str) {
        if let Some(set) = self
            .favorites
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .get_mut(user_id)
        {
            set.remove(asset_id);
        }
    }
}

impl FavoritesProvider for MemoryFavorites {
    fn favorite_asset_ids(&self, user_id: &str) -> PermsResult<BTreeSet<String>> {
        Ok(self
            .favorites
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(user_id)
            .cloned()
            .unwrap_or_default())
    }
}
