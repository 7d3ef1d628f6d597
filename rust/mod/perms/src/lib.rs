//! Perms module: permission tree resolution for a bastion host.
//!
//! Given a subject, computes the pruned tree of catalog nodes and assets the
//! subject may reach, plus the system users and actions allowed on each
//! asset, and keeps those trees in a shared cache.
//!
//! # Pieces
//!
//! - **Catalog**: the full node hierarchy with attached assets (read-only)
//! - **Rule store**: grant rules binding subjects to nodes, assets, system users and actions
//! - **Merge engine**: folds rules into a [`UserTree`]
//! - **Resolution cache**: TTL'd trees keyed by tenant, subject and filter
//! - **Resolver**: dispatch by subject kind, cache policy, invalidation hooks
//! - **View adapter**: display records for tree widgets
//!
//! # Usage
//!
//! ```ignore
//! use bastion_perms::{CachePolicy, PermissionResolver, PermsConfig, ResolutionCache, Subject};
//!
//! let config = PermsConfig::load(Path::new("perms.toml"))?;
//! let cache = Arc::new(ResolutionCache::from_config(kv, &config));
//! let resolver = PermissionResolver::new("org1", catalog, store, config).with_cache(cache);
//!
//! let tree = resolver.resolve(Some(&Subject::user("u1")), None, CachePolicy::ReadThrough)?;
//! let accounts = resolver.session(Some(Subject::user("u1"))).accounts_and_actions_for("a1")?;
//! ```

pub mod cache;
pub mod catalog;
pub mod config;
pub mod error;
pub mod merge;
pub mod model;
pub mod service;
pub mod store;
pub mod tree;
pub mod view;

pub use cache::{CacheKey, CachePolicy, ResolutionCache};
pub use catalog::{AssetCatalog, CatalogTree};
pub use config::PermsConfig;
pub use error::{PermsError, PermsResult};
pub use merge::TreeBuilder;
pub use model::{Actions, Asset, GrantRule, Node, RuleFilter, Subject, SubjectKind, SystemUser};
pub use service::{PermissionResolver, QueryTable, RuleQuery, SubjectPermissions};
pub use store::{FavoritesProvider, GrantRuleStore, MemoryFavorites, MemoryRuleStore};
pub use tree::{TreeNode, UserTree};
pub use view::{TreeNodeView, asset_view, node_view, user_tree_views};
