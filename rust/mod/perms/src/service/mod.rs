pub mod query;
pub mod resolve;
pub mod session;
pub mod accounts;

use std::sync::{Arc, PoisonError, RwLock};

use tracing::{info, warn};

use crate::cache::ResolutionCache;
use crate::catalog::AssetCatalog;
use crate::config::PermsConfig;
use crate::model::SubjectKind;
use crate::store::{FavoritesProvider, GrantRuleStore};

pub use query::{QueryContext, QueryTable, RuleQuery};
pub use session::SubjectPermissions;

/// Resolves what a subject may reach inside one tenant.
///
/// Long-lived and shared between request handlers. The catalog snapshot can
/// be swapped at any time; trees already handed out keep the snapshot they
/// were built from.
pub struct PermissionResolver {
    pub(crate) tenant: String,
    pub(crate) catalog: RwLock<Arc<dyn AssetCatalog>>,
    pub(crate) store: Arc<dyn GrantRuleStore>,
    pub(crate) favorites: Option<Arc<dyn FavoritesProvider>>,
    pub(crate) cache: Option<Arc<ResolutionCache>>,
    pub(crate) config: PermsConfig,
    pub(crate) queries: QueryTable,
}

impl PermissionResolver {
    /// Create a resolver with the standard query table and no cache.
    pub fn new(
        tenant: impl Into<String>,
        catalog: Arc<dyn AssetCatalog>,
        store: Arc<dyn GrantRuleStore>,
        config: PermsConfig,
    ) -> Self {
        Self {
            tenant: tenant.into(),
            catalog: RwLock::new(catalog),
            store,
            favorites: None,
            cache: None,
            config,
            queries: QueryTable::standard(),
        }
    }

    pub fn with_cache(mut self, cache: Arc<ResolutionCache>) -> Self {
        self.cache = Some(cache);
        self
    }

    pub fn with_favorites(mut self, favorites: Arc<dyn FavoritesProvider>) -> Self {
        self.favorites = Some(favorites);
        self
    }

    pub fn with_queries(mut self, queries: QueryTable) -> Self {
        self.queries = queries;
        self
    }

    /// Register (or replace) the rule query for one subject kind.
    pub fn register_query(&mut self, kind: SubjectKind, query: RuleQuery) -> Option<RuleQuery> {
        self.queries.register(kind, query)
    }

    pub fn tenant(&self) -> &str {
        &self.tenant
    }

    pub fn config(&self) -> &PermsConfig {
        &self.config
    }

    pub fn cache(&self) -> Option<&Arc<ResolutionCache>> {
        self.cache.as_ref()
    }

    /// Current catalog snapshot.
    pub fn catalog(&self) -> Arc<dyn AssetCatalog> {
        self.catalog
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Grant rules changed somewhere: expire cached trees of every tenant.
    pub fn rules_changed(&self) -> bool {
        match &self.cache {
            Some(cache) => cache.invalidate_all(None),
            None => false,
        }
    }

    /// The caller switched tenants: expire this tenant's cached trees.
    pub fn tenant_changed(&self) -> bool {
        match &self.cache {
            Some(cache) => cache.invalidate_all(Some(&self.tenant)),
            None => false,
        }
    }

    /// Swap in a new catalog snapshot and drop this tenant's cached trees.
    pub fn replace_catalog(&self, catalog: Arc<dyn AssetCatalog>) {
        *self.catalog.write().unwrap_or_else(PoisonError::into_inner) = catalog;
        info!("catalog replaced for tenant {}", self.tenant);
        if let Some(cache) = &self.cache
            && let Err(e) = cache.purge_tenant(&self.tenant)
        {
            warn!("{}", e);
        }
    }
}
