//! Folding grant rules into a [`UserTree`].
//!
//! The build runs six steps in a fixed order; each step relies on what the
//! previous ones established:
//!
//! 1. seed the root from the catalog root;
//! 2. graft every directly granted node with its whole subtree, shortest key
//!    first, hanging it under its catalog parent or under the root;
//! 3. copy each grafted node's direct asset set from the catalog;
//! 4. place individually granted assets, either in the ungrouped bucket or
//!    in a copy of their own catalog node;
//! 5. splice the missing catalog ancestors between the root and its children;
//! 6. for users, add the favorites node, restricted to assets already present.

use std::collections::{BTreeMap, BTreeSet};
use std::time::Instant;

use tracing::{debug, warn};

use crate::catalog::AssetCatalog;
use crate::error::{PermsError, PermsResult};
use crate::model::{
    FAVORITE_KEY, FAVORITE_VALUE, GrantRule, ROOT_KEY, UNGROUPED_KEY, UNGROUPED_VALUE,
    is_synthetic_key,
};
use crate::tree::UserTree;

/// Builds user trees against one catalog snapshot.
pub struct TreeBuilder<'a> {
    catalog: &'a dyn AssetCatalog,
    ungroup_single_assets: bool,
}

impl<'a> TreeBuilder<'a> {
    pub fn new(catalog: &'a dyn AssetCatalog) -> Self {
        Self {
            catalog,
            ungroup_single_assets: false,
        }
    }

    /// Route individually granted assets to the synthetic ungrouped node.
    pub fn ungroup_single_assets(mut self, enabled: bool) -> Self {
        self.ungroup_single_assets = enabled;
        self
    }

    /// Build the tree for `rules`. `favorites` is `Some` only for user subjects.
    pub fn build(
        &self,
        rules: &[GrantRule],
        favorites: Option<&BTreeSet<String>>,
    ) -> PermsResult<UserTree> {
        let start = Instant::now();
        let root = self.catalog.root();
        let mut tree = UserTree::new(&root.key, &root.value);

        self.graft_nodes(&mut tree, rules)?;
        self.fill_node_assets(&mut tree)?;
        self.graft_single_assets(&mut tree, rules)?;
        self.splice_ancestors(&mut tree)?;
        if let Some(favorites) = favorites {
            self.add_favorites(&mut tree, favorites)?;
        }

        debug!(
            "built user tree: {} rules, {} nodes in {:?}",
            rules.len(),
            tree.len(),
            start.elapsed()
        );
        Ok(tree)
    }

    fn graft_nodes(&self, tree: &mut UserTree, rules: &[GrantRule]) -> PermsResult<()> {
        let start = Instant::now();
        let mut keys: Vec<&str> = rules
            .iter()
            .flat_map(|r| r.nodes.iter().map(String::as_str))
            .collect::<BTreeSet<_>>()
            .into_iter()
            .collect();
        keys.sort_by_key(|k| (k.len(), *k));

        let mut grafted = 0;
        for key in keys {
            if tree.contains(key) {
                continue;
            }
            let subtree = self.catalog.subtree(key);
            if subtree.is_empty() {
                warn!(
                    "{}",
                    PermsError::CatalogInconsistency(format!("granted node {key:?} not in catalog"))
                );
                continue;
            }
            let parent = self
                .catalog
                .parent(key)
                .map(|p| p.key.as_str())
                .filter(|p| tree.contains(p))
                .unwrap_or(tree.root())
                .to_string();

            // Preorder: every node after the first finds its parent already copied.
            for (i, node) in subtree.iter().enumerate() {
                let node_parent = if i == 0 {
                    parent.as_str()
                } else {
                    self.catalog
                        .parent(&node.key)
                        .map(|p| p.key.as_str())
                        .unwrap_or(ROOT_KEY)
                };
                tree.create_node(&node.key, &node.value, node_parent)?;
            }
            grafted += 1;
        }
        debug!("grafted {} granted nodes in {:?}", grafted, start.elapsed());
        Ok(())
    }

    fn fill_node_assets(&self, tree: &mut UserTree) -> PermsResult<()> {
        for id in tree.identifiers() {
            tree.set_assets(&id, self.catalog.assets(&id))?;
        }
        Ok(())
    }

    fn graft_single_assets(&self, tree: &mut UserTree, rules: &[GrantRule]) -> PermsResult<()> {
        let start = Instant::now();
        let mut by_node: BTreeMap<String, BTreeSet<String>> = BTreeMap::new();
        let mut nodeless: BTreeSet<String> = BTreeSet::new();

        for asset_id in rules.iter().flat_map(|r| r.assets.iter()) {
            let Some(asset) = self.catalog.asset(asset_id) else {
                warn!(
                    "{}",
                    PermsError::CatalogInconsistency(format!("granted asset {asset_id} not in catalog"))
                );
                continue;
            };
            if asset.nodes.is_empty() {
                nodeless.insert(asset_id.clone());
            }
            for key in &asset.nodes {
                by_node
                    .entry(key.clone())
                    .or_default()
                    .insert(asset_id.clone());
            }
        }
        by_node.retain(|key, _| !tree.contains(key));

        if self.ungroup_single_assets {
            let mut assets: BTreeSet<String> = by_node.into_values().flatten().collect();
            assets.extend(nodeless);
            if assets.is_empty() {
                return Ok(());
            }
            let root = tree.root().to_string();
            tree.create_node(UNGROUPED_KEY, UNGROUPED_VALUE, &root)?;
            if let Some(existing) = tree.assets(UNGROUPED_KEY) {
                assets.extend(existing.iter().cloned());
            }
            let count = assets.len();
            tree.set_assets(UNGROUPED_KEY, assets)?;
            debug!("ungrouped {} single assets in {:?}", count, start.elapsed());
            return Ok(());
        }

        if !nodeless.is_empty() {
            debug!("skipping {} granted assets without a node", nodeless.len());
        }

        let mut keys: Vec<(String, BTreeSet<String>)> = by_node.into_iter().collect();
        keys.sort_by(|(a, _), (b, _)| (a.len(), a).cmp(&(b.len(), b)));
        for (key, assets) in keys {
            let Some(node) = self.catalog.node_by_key(&key) else {
                continue;
            };
            let parent = self
                .catalog
                .parent(&key)
                .map(|p| p.key.as_str())
                .filter(|p| tree.contains(p))
                .unwrap_or(tree.root())
                .to_string();
            tree.create_node(&node.key, &node.value, &parent)?;
            tree.set_assets(&key, assets)?;
        }
        debug!("placed single assets in {:?}", start.elapsed());
        Ok(())
    }

    fn splice_ancestors(&self, tree: &mut UserTree) -> PermsResult<()> {
        let start = Instant::now();
        let root = tree.root().to_string();
        let top: Vec<String> = tree
            .children(&root)
            .iter()
            .map(|n| n.identifier().to_string())
            .collect();

        for child in top {
            if is_synthetic_key(&child) {
                continue;
            }
            let ancestors = self.catalog.ancestors(&child, false);
            if ancestors.is_empty() {
                continue;
            }
            // Nearest first: everything before the first present ancestor is missing.
            let present = ancestors.iter().position(|a| tree.contains(&a.key));
            let (missing, mut parent) = match present {
                Some(i) => (&ancestors[..i], ancestors[i].key.clone()),
                None => (&ancestors[..], root.clone()),
            };
            for ancestor in missing.iter().rev() {
                tree.create_node(&ancestor.key, &ancestor.value, &parent)?;
                parent = ancestor.key.clone();
            }
            tree.move_node(&child, &parent)?;
        }
        debug!("spliced ancestors in {:?}", start.elapsed());
        Ok(())
    }

    fn add_favorites(&self, tree: &mut UserTree, favorites: &BTreeSet<String>) -> PermsResult<()> {
        let root = tree.root().to_string();
        tree.create_node(FAVORITE_KEY, FAVORITE_VALUE, &root)?;
        let visible: BTreeSet<String> = tree
            .all_assets(&root)
            .map(|all| {
                all.iter()
                    .filter(|id| favorites.contains(*id))
                    .filter(|id| self.catalog.asset(id).is_some_and(|a| a.is_active))
                    .cloned()
                    .collect()
            })
            .unwrap_or_default();
        tree.set_assets(FAVORITE_KEY, visible)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::CatalogTree;
    use crate::model::{Asset, Node};

    fn asset(id: &str, nodes: &[&str]) -> Asset {
        let mut a = Asset::new(id, id, "10.0.0.1");
        a.nodes = nodes.iter().map(|s| s.to_string()).collect();
        a
    }

    fn catalog() -> CatalogTree {
        CatalogTree::new(
            "Default",
            vec![
                Node::new("n1", "1", "Prod"),
                Node::new("n2", "1:2", "Web"),
                Node::new("n3", "1:2:3", "Edge"),
                Node::new("n4", "1:4", "DB"),
                Node::new("n5", "5", "Lab"),
            ],
            vec![
                asset("web", &["1:2"]),
                asset("edge", &["1:2:3"]),
                asset("db", &["1:4"]),
                asset("lab", &["5"]),
                asset("loose", &[]),
            ],
        )
        .unwrap()
    }

    fn grant_nodes(keys: &[&str]) -> GrantRule {
        let mut r = GrantRule::new("nodes", "nodes");
        r.nodes = keys.iter().map(|s| s.to_string()).collect();
        r
    }

    fn grant_assets(ids: &[&str]) -> GrantRule {
        let mut r = GrantRule::new("assets", "assets");
        r.assets = ids.iter().map(|s| s.to_string()).collect();
        r
    }

    #[test]
    fn node_grant_brings_subtree_and_ancestors() {
        let catalog = catalog();
        let tree = TreeBuilder::new(&catalog)
            .build(&[grant_nodes(&["1:2"])], None)
            .unwrap();

        assert_eq!(tree.identifiers(), vec!["", "1", "1:2", "1:2:3"]);
        assert_eq!(tree.parent("1:2").unwrap().identifier(), "1");
        assert!(tree.assets("1").unwrap().is_empty());
        assert_eq!(tree.all_assets("1").unwrap().len(), 2);
        assert!(!tree.contains("1:4"));
    }

    #[test]
    fn overlapping_grants_are_merged() {
        let catalog = catalog();
        let tree = TreeBuilder::new(&catalog)
            .build(&[grant_nodes(&["1:2:3", "1"])], None)
            .unwrap();
        assert_eq!(tree.identifiers(), vec!["", "1", "1:2", "1:2:3", "1:4"]);
        assert_eq!(tree.all_assets("").unwrap().len(), 3);
    }

    #[test]
    fn missing_granted_node_is_skipped() {
        let catalog = catalog();
        let tree = TreeBuilder::new(&catalog)
            .build(&[grant_nodes(&["9", "5"])], None)
            .unwrap();
        assert_eq!(tree.identifiers(), vec!["", "5"]);
    }

    #[test]
    fn single_asset_copies_its_node_only() {
        let catalog = catalog();
        let tree = TreeBuilder::new(&catalog)
            .build(&[grant_assets(&["web"])], None)
            .unwrap();
        assert_eq!(tree.identifiers(), vec!["", "1", "1:2"]);
        assert_eq!(tree.assets("1:2").unwrap().len(), 1);
        assert!(!tree.contains("1:2:3"));
    }

    #[test]
    fn single_asset_in_granted_node_adds_nothing() {
        let catalog = catalog();
        let tree = TreeBuilder::new(&catalog)
            .build(&[grant_nodes(&["1:2"]), grant_assets(&["edge"])], None)
            .unwrap();
        assert_eq!(tree.identifiers(), vec!["", "1", "1:2", "1:2:3"]);
    }

    #[test]
    fn ungrouped_bucket_collects_single_assets() {
        let catalog = catalog();
        let tree = TreeBuilder::new(&catalog)
            .ungroup_single_assets(true)
            .build(&[grant_assets(&["db", "loose", "ghost"])], None)
            .unwrap();
        assert_eq!(tree.identifiers(), vec!["", UNGROUPED_KEY]);
        let bucket = tree.assets(UNGROUPED_KEY).unwrap();
        assert!(bucket.contains("db") && bucket.contains("loose"));
        assert_eq!(bucket.len(), 2);
    }

    #[test]
    fn favorites_only_surface_authorized_assets() {
        let catalog = catalog();
        let favorites = BTreeSet::from(["web".to_string(), "lab".to_string()]);
        let tree = TreeBuilder::new(&catalog)
            .build(&[grant_nodes(&["1:2"])], Some(&favorites))
            .unwrap();
        assert_eq!(
            tree.assets(FAVORITE_KEY).unwrap(),
            &BTreeSet::from(["web".to_string()])
        );
    }

    #[test]
    fn no_rules_gives_bare_root() {
        let catalog = catalog();
        let tree = TreeBuilder::new(&catalog).build(&[], None).unwrap();
        assert_eq!(tree.len(), 1);
        assert_eq!(tree.root_node().tag(), "Default");
    }
}
