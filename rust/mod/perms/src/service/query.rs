use std::collections::BTreeSet;

use crate::catalog::AssetCatalog;
use crate::config::PermsConfig;
use crate::error::{PermsError, PermsResult};
use crate::model::{GrantRule, Subject, SubjectKind};
use crate::store::GrantRuleStore;

/// What a rule query may look at.
pub struct QueryContext<'a> {
    pub catalog: &'a dyn AssetCatalog,
    pub store: &'a dyn GrantRuleStore,
    pub config: &'a PermsConfig,
}

/// Fetches the grant rules that apply to one subject.
pub type RuleQuery = fn(&QueryContext<'_>, &Subject) -> PermsResult<Vec<GrantRule>>;

/// Rule queries indexed by [`SubjectKind`].
#[derive(Clone)]
pub struct QueryTable {
    entries: [Option<RuleQuery>; SubjectKind::COUNT],
}

impl QueryTable {
    /// A table with no queries. Every lookup fails.
    pub fn empty() -> Self {
        Self {
            entries: [None; SubjectKind::COUNT],
        }
    }

    /// One query per subject kind, backed by the rule store.
    pub fn standard() -> Self {
        let mut table = Self::empty();
        table.register(SubjectKind::User, user_rules);
        table.register(SubjectKind::UserGroup, user_group_rules);
        table.register(SubjectKind::Node, node_rules);
        table.register(SubjectKind::Asset, asset_rules);
        table.register(SubjectKind::SystemUser, system_user_rules);
        table
    }

    /// Install `query` for `kind`, returning the one it replaces.
    pub fn register(&mut self, kind: SubjectKind, query: RuleQuery) -> Option<RuleQuery> {
        self.entries[kind.index()].replace(query)
    }

    pub fn unregister(&mut self, kind: SubjectKind) -> Option<RuleQuery> {
        self.entries[kind.index()].take()
    }

    pub fn get(&self, kind: SubjectKind) -> PermsResult<RuleQuery> {
        self.entries[kind.index()]
            .ok_or_else(|| PermsError::UnknownSubjectKind(kind.to_string()))
    }
}

impl Default for QueryTable {
    fn default() -> Self {
        Self::standard()
    }
}

fn mismatch(expected: SubjectKind, subject: &Subject) -> PermsError {
    PermsError::UnknownSubjectKind(format!(
        "{} query called with {} subject",
        expected,
        subject.kind()
    ))
}

fn user_rules(ctx: &QueryContext<'_>, subject: &Subject) -> PermsResult<Vec<GrantRule>> {
    let Subject::User { id, group_ids } = subject else {
        return Err(mismatch(SubjectKind::User, subject));
    };
    ctx.store
        .user_rules(id, group_ids, ctx.config.include_group_rules)
}

fn user_group_rules(ctx: &QueryContext<'_>, subject: &Subject) -> PermsResult<Vec<GrantRule>> {
    let Subject::UserGroup { id } = subject else {
        return Err(mismatch(SubjectKind::UserGroup, subject));
    };
    ctx.store.user_group_rules(id)
}

fn node_rules(ctx: &QueryContext<'_>, subject: &Subject) -> PermsResult<Vec<GrantRule>> {
    let Subject::Node { key, .. } = subject else {
        return Err(mismatch(SubjectKind::Node, subject));
    };
    ctx.store.node_rules(key)
}

/// Rules on the asset itself or on any node above it.
fn asset_rules(ctx: &QueryContext<'_>, subject: &Subject) -> PermsResult<Vec<GrantRule>> {
    let Subject::Asset { id } = subject else {
        return Err(mismatch(SubjectKind::Asset, subject));
    };
    let closure = asset_node_closure(ctx.catalog, id);
    ctx.store.asset_rules(id, &closure)
}

fn system_user_rules(ctx: &QueryContext<'_>, subject: &Subject) -> PermsResult<Vec<GrantRule>> {
    let Subject::SystemUser { id } = subject else {
        return Err(mismatch(SubjectKind::SystemUser, subject));
    };
    ctx.store.system_user_rules(id)
}

/// Keys of the asset's nodes and all their ancestors.
pub fn asset_node_closure(catalog: &dyn AssetCatalog, asset_id: &str) -> BTreeSet<String> {
    let Some(asset) = catalog.asset(asset_id) else {
        return BTreeSet::new();
    };
    asset
        .nodes
        .iter()
        .flat_map(|key| catalog.ancestors(key, true))
        .map(|node| node.key.clone())
        .collect()
}
