use std::collections::{BTreeMap, BTreeSet, HashMap};

use tracing::warn;

use crate::error::{PermsError, PermsResult};
use crate::model::{Actions, Subject};
use crate::service::query::asset_node_closure;
use crate::service::{PermissionResolver, SubjectPermissions};

impl SubjectPermissions<'_> {
    /// System users the subject may use on `asset_id`, with the union of the
    /// actions granted for each.
    ///
    /// Only rules on the asset itself or on one of its nodes (or their
    /// ancestors) count, and only system users whose protocol the asset
    /// speaks. An unknown asset yields an empty mapping.
    pub fn accounts_and_actions_for(&self, asset_id: &str) -> PermsResult<BTreeMap<String, Actions>> {
        let Some(asset) = self.catalog.asset(asset_id) else {
            warn!(
                "{}",
                PermsError::CatalogInconsistency(format!("asset {asset_id} not in catalog"))
            );
            return Ok(BTreeMap::new());
        };

        let closure = asset_node_closure(self.catalog.as_ref(), asset_id);
        let rules: Vec<_> = self
            .rules()?
            .iter()
            .filter(|r| r.assets.contains(asset_id) || !r.nodes.is_disjoint(&closure))
            .filter(|r| !r.actions.is_empty())
            .collect();
        if rules.is_empty() {
            return Ok(BTreeMap::new());
        }

        let ids: BTreeSet<String> = rules
            .iter()
            .flat_map(|r| r.system_users.iter().cloned())
            .collect();
        let protocols: HashMap<String, String> = self
            .resolver
            .store
            .system_users(&ids)?
            .into_iter()
            .map(|su| (su.id, su.protocol))
            .collect();

        let mut accounts: BTreeMap<String, Actions> = BTreeMap::new();
        for rule in rules {
            for id in &rule.system_users {
                let Some(protocol) = protocols.get(id) else {
                    continue;
                };
                if !asset.has_protocol(protocol) {
                    continue;
                }
                *accounts.entry(id.clone()).or_default() |= rule.actions;
            }
        }
        Ok(accounts)
    }
}

impl PermissionResolver {
    /// Shorthand for a one-off session's [`SubjectPermissions::accounts_and_actions_for`].
    pub fn accounts_and_actions(
        &self,
        subject: &Subject,
        asset_id: &str,
    ) -> PermsResult<BTreeMap<String, Actions>> {
        self.session(Some(subject.clone()))
            .accounts_and_actions_for(asset_id)
    }
}
