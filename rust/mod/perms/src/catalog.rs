//! Asset catalog: the full, unfiltered node hierarchy with the assets
//! attached to each node.
//!
//! The resolver only ever reads a catalog. A new snapshot replaces the old
//! one wholesale (see `PermissionResolver::replace_catalog`).

use std::collections::{BTreeMap, BTreeSet, HashMap};

use tracing::warn;

use crate::error::{PermsError, PermsResult};
use crate::model::{Asset, Node, ROOT_KEY};

/// Read-only view of the asset catalog.
///
/// Keys are node keys; the root is addressed by [`ROOT_KEY`].
pub trait AssetCatalog: Send + Sync {
    fn root(&self) -> &Node;

    fn node_by_key(&self, key: &str) -> Option<&Node>;

    fn contains_node(&self, key: &str) -> bool {
        self.node_by_key(key).is_some()
    }

    /// Parent of `key`. `None` for the root and for unknown keys.
    fn parent(&self, key: &str) -> Option<&Node>;

    /// Ancestors of `key`, nearest first. The root is never included.
    fn ancestors(&self, key: &str, with_self: bool) -> Vec<&Node>;

    fn children(&self, key: &str) -> Vec<&Node>;

    /// The node and all its descendants in preorder. Empty for unknown keys.
    fn subtree(&self, key: &str) -> Vec<&Node>;

    /// Ids of the assets attached directly to `key`.
    fn assets(&self, key: &str) -> BTreeSet<String>;

    /// Ids of every asset anywhere in the subtree of `key`.
    fn all_assets(&self, key: &str) -> BTreeSet<String> {
        self.subtree(key)
            .into_iter()
            .flat_map(|node| self.assets(&node.key))
            .collect()
    }

    fn asset(&self, id: &str) -> Option<&Asset>;
}

struct Entry {
    node: Node,
    parent: Option<String>,
    children: Vec<String>,
    assets: BTreeSet<String>,
}

/// In-memory catalog snapshot.
///
/// Parent links come from the key path: a node hangs under its nearest
/// existing key prefix, or under the root when none exists.
pub struct CatalogTree {
    entries: BTreeMap<String, Entry>,
    assets: HashMap<String, Asset>,
}

impl CatalogTree {
    /// Build a catalog from flat node and asset lists.
    ///
    /// Fails on duplicate node keys. Asset memberships pointing at unknown
    /// nodes are dropped with a warning.
    pub fn new(root_value: &str, nodes: Vec<Node>, assets: Vec<Asset>) -> PermsResult<Self> {
        let mut entries = BTreeMap::new();
        entries.insert(
            ROOT_KEY.to_string(),
            Entry {
                node: Node::new(ROOT_KEY, ROOT_KEY, root_value),
                parent: None,
                children: Vec::new(),
                assets: BTreeSet::new(),
            },
        );

        for node in nodes {
            if entries.contains_key(&node.key) {
                return Err(PermsError::CatalogInconsistency(format!(
                    "duplicate node key {:?}",
                    node.key
                )));
            }
            entries.insert(
                node.key.clone(),
                Entry {
                    node,
                    parent: None,
                    children: Vec::new(),
                    assets: BTreeSet::new(),
                },
            );
        }

        // Link parents. BTreeMap order puts every key after its prefixes.
        let keys: Vec<String> = entries.keys().filter(|k| !k.is_empty()).cloned().collect();
        for key in &keys {
            let parent = nearest_existing_parent(&entries, key);
            if let Some(entry) = entries.get_mut(key) {
                entry.parent = Some(parent.clone());
            }
            if let Some(entry) = entries.get_mut(&parent) {
                entry.children.push(key.clone());
            }
        }

        let mut by_id = HashMap::with_capacity(assets.len());
        for mut asset in assets {
            asset.nodes.retain(|key| {
                let known = !key.is_empty() && entries.contains_key(key);
                if !known {
                    warn!("asset {} references unknown node {:?}", asset.id, key);
                }
                known
            });
            for key in &asset.nodes {
                if let Some(entry) = entries.get_mut(key) {
                    entry.assets.insert(asset.id.clone());
                }
            }
            by_id.insert(asset.id.clone(), asset);
        }

        let mut catalog = Self {
            entries,
            assets: by_id,
        };
        catalog.count_assets();
        Ok(catalog)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.len() <= 1
    }

    /// Fill `assets_amount`: distinct assets in each node's subtree.
    fn count_assets(&mut self) {
        let mut amounts: HashMap<String, usize> = HashMap::new();
        for asset in self.assets.values() {
            let mut covered = BTreeSet::new();
            for key in &asset.nodes {
                let mut cursor = Some(key.clone());
                while let Some(k) = cursor {
                    if !covered.insert(k.clone()) {
                        break;
                    }
                    cursor = self.entries.get(&k).and_then(|e| e.parent.clone());
                }
            }
            for key in covered {
                *amounts.entry(key).or_default() += 1;
            }
        }
        for (key, entry) in self.entries.iter_mut() {
            entry.node.assets_amount = amounts.get(key).copied().unwrap_or(0);
        }
    }
}

fn nearest_existing_parent(entries: &BTreeMap<String, Entry>, key: &str) -> String {
    crate::model::ancestor_keys(key, false)
        .into_iter()
        .rev()
        .find(|k| entries.contains_key(k))
        .unwrap_or_else(|| ROOT_KEY.to_string())
}

impl AssetCatalog for CatalogTree {
    fn root(&self) -> &Node {
        // The root entry is inserted by the constructor and never removed.
        &self.entries[ROOT_KEY].node
    }

    fn node_by_key(&self, key: &str) -> Option<&Node> {
        self.entries.get(key).map(|e| &e.node)
    }

    fn parent(&self, key: &str) -> Option<&Node> {
        let parent = self.entries.get(key)?.parent.as_ref()?;
        self.node_by_key(parent)
    }

    fn ancestors(&self, key: &str, with_self: bool) -> Vec<&Node> {
        let mut out = Vec::new();
        let Some(entry) = self.entries.get(key) else {
            return out;
        };
        if with_self && !entry.node.is_root() {
            out.push(&entry.node);
        }
        let mut cursor = entry.parent.as_deref();
        while let Some(k) = cursor {
            let Some(e) = self.entries.get(k) else { break };
            if e.node.is_root() {
                break;
            }
            out.push(&e.node);
            cursor = e.parent.as_deref();
        }
        out
    }

    fn children(&self, key: &str) -> Vec<&Node> {
        self.entries
            .get(key)
            .map(|e| {
                e.children
                    .iter()
                    .filter_map(|k| self.node_by_key(k))
                    .collect()
            })
            .unwrap_or_default()
    }

    fn subtree(&self, key: &str) -> Vec<&Node> {
        let mut out = Vec::new();
        let mut stack: Vec<&str> = match self.entries.get_key_value(key) {
            Some((k, _)) => vec![k.as_str()],
            None => return out,
        };
        while let Some(k) = stack.pop() {
            let Some(entry) = self.entries.get(k) else { continue };
            out.push(&entry.node);
            stack.extend(entry.children.iter().rev().map(String::as_str));
        }
        out
    }

    fn assets(&self, key: &str) -> BTreeSet<String> {
        self.entries
            .get(key)
            .map(|e| e.assets.clone())
            .unwrap_or_default()
    }

    fn asset(&self, id: &str) -> Option<&Asset> {
        self.assets.get(id)
    }
}
