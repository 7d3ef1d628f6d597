use std::cell::OnceCell;
use std::collections::BTreeSet;
use std::sync::Arc;

use crate::cache::CachePolicy;
use crate::catalog::AssetCatalog;
use crate::error::PermsResult;
use crate::model::{Asset, GrantRule, RuleFilter, Subject, SystemUser, clean_children_keys};
use crate::service::PermissionResolver;
use crate::tree::UserTree;

/// Request-scoped view of one subject's permissions.
///
/// Pins the catalog snapshot current at creation and memoizes the rule set
/// and the user tree for the lifetime of the request.
pub struct SubjectPermissions<'r> {
    pub(crate) resolver: &'r PermissionResolver,
    pub(crate) subject: Option<Subject>,
    pub(crate) catalog: Arc<dyn AssetCatalog>,
    policy: CachePolicy,
    filter: Option<RuleFilter>,
    rules: OnceCell<Vec<GrantRule>>,
    tree: OnceCell<Arc<UserTree>>,
}

impl<'r> SubjectPermissions<'r> {
    pub(crate) fn new(
        resolver: &'r PermissionResolver,
        subject: Option<Subject>,
        policy: CachePolicy,
    ) -> Self {
        Self {
            resolver,
            subject,
            catalog: resolver.catalog(),
            policy,
            filter: None,
            rules: OnceCell::new(),
            tree: OnceCell::new(),
        }
    }

    pub fn with_policy(mut self, policy: CachePolicy) -> Self {
        self.policy = policy;
        self.tree = OnceCell::new();
        self
    }

    pub fn subject(&self) -> Option<&Subject> {
        self.subject.as_ref()
    }

    pub fn catalog(&self) -> &dyn AssetCatalog {
        self.catalog.as_ref()
    }

    /// Grant rules of the subject, after any filter.
    pub fn rules(&self) -> PermsResult<&[GrantRule]> {
        if let Some(rules) = self.rules.get() {
            return Ok(rules);
        }
        let rules = self.resolver.rules_in(
            self.catalog.as_ref(),
            self.subject.as_ref(),
            self.filter.as_ref(),
        )?;
        Ok(self.rules.get_or_init(|| rules))
    }

    /// Narrow the subject's rules with `filter`, replacing any earlier
    /// filter. The tree of a filter without an id is never cached.
    pub fn filter_rules(&mut self, filter: RuleFilter) -> PermsResult<()> {
        let narrowed = self.resolver.rules_in(
            self.catalog.as_ref(),
            self.subject.as_ref(),
            Some(&filter),
        )?;
        self.filter = Some(filter);
        self.rules = OnceCell::from(narrowed);
        self.tree = OnceCell::new();
        Ok(())
    }

    pub fn user_tree(&self) -> PermsResult<Arc<UserTree>> {
        if let Some(tree) = self.tree.get() {
            return Ok(tree.clone());
        }
        let tree = self.resolver.resolve_in(
            &self.catalog,
            self.subject.as_ref(),
            self.filter.as_ref(),
            self.policy,
            || self.rules().map(<[GrantRule]>::to_vec),
        )?;
        Ok(self.tree.get_or_init(|| tree).clone())
    }

    /// Identifiers of every node in the user tree, preorder.
    pub fn nodes(&self) -> PermsResult<Vec<String>> {
        Ok(self.user_tree()?.identifiers())
    }

    /// Active assets under `key`: direct ones, or the whole subtree when `deep`.
    pub fn node_assets(&self, key: &str, deep: bool) -> PermsResult<Vec<Asset>> {
        let tree = self.user_tree()?;
        let ids = if deep {
            tree.all_assets(key)
        } else {
            tree.assets(key)
        };
        Ok(ids.map(|ids| self.active_assets(ids)).unwrap_or_default())
    }

    /// Granted node keys without redundant descendants, and directly granted asset ids.
    pub fn nodes_and_assets(&self) -> PermsResult<(Vec<String>, BTreeSet<String>)> {
        let rules = self.rules()?;
        let node_keys = clean_children_keys(
            rules
                .iter()
                .flat_map(|r| r.nodes.iter().map(String::as_str)),
        );
        let asset_ids = rules.iter().flat_map(|r| r.assets.iter().cloned()).collect();
        Ok((node_keys, asset_ids))
    }

    /// Every active asset the subject may reach, whatever the tree layout.
    pub fn assets(&self) -> PermsResult<Vec<Asset>> {
        let (node_keys, mut ids) = self.nodes_and_assets()?;
        for key in &node_keys {
            ids.extend(self.catalog.all_assets(key));
        }
        Ok(self.active_assets(&ids))
    }

    /// System users referenced by any of the subject's rules.
    pub fn system_users(&self) -> PermsResult<Vec<SystemUser>> {
        let ids: BTreeSet<String> = self
            .rules()?
            .iter()
            .flat_map(|r| r.system_users.iter().cloned())
            .collect();
        if ids.is_empty() {
            return Ok(Vec::new());
        }
        self.resolver.store.system_users(&ids)
    }

    fn active_assets(&self, ids: &BTreeSet<String>) -> Vec<Asset> {
        ids.iter()
            .filter_map(|id| self.catalog.asset(id))
            .filter(|a| a.is_active)
            .cloned()
            .collect()
    }
}
