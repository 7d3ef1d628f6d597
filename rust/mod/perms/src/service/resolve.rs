use std::collections::BTreeSet;
use std::sync::Arc;
use std::time::Instant;

use tracing::{debug, warn};

use crate::cache::{CacheKey, CachePolicy};
use crate::catalog::AssetCatalog;
use crate::error::PermsResult;
use crate::merge::TreeBuilder;
use crate::model::{GrantRule, RuleFilter, Subject};
use crate::service::{PermissionResolver, QueryContext, SubjectPermissions};
use crate::tree::UserTree;

impl PermissionResolver {
    /// Open a request-scoped session for `subject`.
    pub fn session(&self, subject: Option<Subject>) -> SubjectPermissions<'_> {
        SubjectPermissions::new(self, subject, self.config.default_cache_policy)
    }

    /// Grant rules applying to `subject`, narrowed by `filter`.
    ///
    /// No subject means no rules.
    pub fn rules(
        &self,
        subject: Option<&Subject>,
        filter: Option<&RuleFilter>,
    ) -> PermsResult<Vec<GrantRule>> {
        let catalog = self.catalog();
        self.rules_in(catalog.as_ref(), subject, filter)
    }

    pub(crate) fn rules_in(
        &self,
        catalog: &dyn AssetCatalog,
        subject: Option<&Subject>,
        filter: Option<&RuleFilter>,
    ) -> PermsResult<Vec<GrantRule>> {
        let Some(subject) = subject else {
            return Ok(Vec::new());
        };
        let query = self.queries.get(subject.kind())?;
        let ctx = QueryContext {
            catalog,
            store: self.store.as_ref(),
            config: &self.config,
        };
        let rules = query(&ctx, subject)?;
        Ok(match filter {
            Some(filter) => filter.apply(rules),
            None => rules,
        })
    }

    /// Compute the authorized tree of `subject`.
    pub fn resolve(
        &self,
        subject: Option<&Subject>,
        filter: Option<&RuleFilter>,
        policy: CachePolicy,
    ) -> PermsResult<Arc<UserTree>> {
        let catalog = self.catalog();
        self.resolve_in(&catalog, subject, filter, policy, || {
            self.rules_in(catalog.as_ref(), subject, filter)
        })
    }

    /// Policy actually applied: only users with a cacheable filter (or none)
    /// use the cache, and only when a cache is configured and enabled.
    pub fn effective_policy(
        &self,
        subject: Option<&Subject>,
        filter: Option<&RuleFilter>,
        requested: CachePolicy,
    ) -> CachePolicy {
        let cacheable = self.cache.is_some()
            && self.config.cache_enabled
            && subject.is_some_and(Subject::is_user)
            && filter.is_none_or(|f| f.id.is_some());
        if cacheable {
            requested
        } else {
            CachePolicy::Bypass
        }
    }

    pub(crate) fn resolve_in<F>(
        &self,
        catalog: &Arc<dyn AssetCatalog>,
        subject: Option<&Subject>,
        filter: Option<&RuleFilter>,
        policy: CachePolicy,
        rules: F,
    ) -> PermsResult<Arc<UserTree>>
    where
        F: FnOnce() -> PermsResult<Vec<GrantRule>>,
    {
        let start = Instant::now();
        let policy = self.effective_policy(subject, filter, policy);
        let cache = match (&self.cache, policy) {
            (Some(cache), CachePolicy::ReadThrough | CachePolicy::ForceRefresh) => cache,
            _ => {
                let tree = self.build(catalog.as_ref(), subject, &rules()?)?;
                debug!("resolved {:?} without cache in {:?}", subject_id(subject), start.elapsed());
                return Ok(Arc::new(tree));
            }
        };

        let key = CacheKey::new(
            &self.tenant,
            subject.map(Subject::id),
            filter.and_then(|f| f.id.as_deref()),
        );
        if policy == CachePolicy::ReadThrough
            && let Some(tree) = cache.get(&key)
        {
            return Ok(Arc::new(tree));
        }

        let tree = cache.single_flight(&key, || -> PermsResult<UserTree> {
            match policy {
                // Someone else may have filled the slot while we waited.
                CachePolicy::ReadThrough => {
                    if let Some(tree) = cache.get(&key) {
                        return Ok(tree);
                    }
                }
                _ => cache.invalidate(&key),
            }
            let tree = self.build(catalog.as_ref(), subject, &rules()?)?;
            cache.put(&key, &tree, None);
            Ok(tree)
        })?;
        debug!("resolved {} ({}) in {:?}", key, policy, start.elapsed());
        Ok(Arc::new(tree))
    }

    fn build(
        &self,
        catalog: &dyn AssetCatalog,
        subject: Option<&Subject>,
        rules: &[GrantRule],
    ) -> PermsResult<UserTree> {
        let favorites = match subject {
            Some(Subject::User { id, .. }) => Some(self.favorite_asset_ids(id)),
            _ => None,
        };
        TreeBuilder::new(catalog)
            .ungroup_single_assets(self.config.single_asset_to_ungroup_node)
            .build(rules, favorites.as_ref())
    }

    fn favorite_asset_ids(&self, user_id: &str) -> BTreeSet<String> {
        let Some(provider) = &self.favorites else {
            return BTreeSet::new();
        };
        provider.favorite_asset_ids(user_id).unwrap_or_else(|e| {
            warn!("favorites of {} unavailable: {}", user_id, e);
            BTreeSet::new()
        })
    }
}

fn subject_id(subject: Option<&Subject>) -> Option<&str> {
    subject.map(Subject::id)
}
