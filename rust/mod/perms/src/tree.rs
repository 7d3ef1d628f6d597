//! Per-subject authorized tree.
//!
//! Nodes live in an arena addressed by identifier (a catalog key or a
//! synthetic key). The tree is only mutated while it is being built and is
//! shared read-only afterwards.

use std::collections::{BTreeMap, BTreeSet, HashSet};
use std::sync::OnceLock;

use serde::{Deserialize, Serialize};

use crate::error::{PermsError, PermsResult};

/// Current cache payload schema.
pub const SNAPSHOT_VERSION: u32 = 1;

#[derive(Debug, Clone)]
pub struct TreeNode {
    identifier: String,
    tag: String,
    parent: Option<String>,
    children: Vec<String>,
    assets: BTreeSet<String>,
    /// Memoized union of `assets` over the subtree. Reset whenever an asset
    /// set in the subtree changes.
    all_assets: OnceLock<BTreeSet<String>>,
}

impl TreeNode {
    fn new(identifier: &str, tag: &str, parent: Option<&str>) -> Self {
        Self {
            identifier: identifier.to_string(),
            tag: tag.to_string(),
            parent: parent.map(str::to_string),
            children: Vec::new(),
            assets: BTreeSet::new(),
            all_assets: OnceLock::new(),
        }
    }

    pub fn identifier(&self) -> &str {
        &self.identifier
    }

    pub fn tag(&self) -> &str {
        &self.tag
    }

    pub fn parent(&self) -> Option<&str> {
        self.parent.as_deref()
    }

    pub fn children(&self) -> &[String] {
        &self.children
    }

    pub fn assets(&self) -> &BTreeSet<String> {
        &self.assets
    }
}

impl PartialEq for TreeNode {
    fn eq(&self, other: &Self) -> bool {
        self.identifier == other.identifier
            && self.tag == other.tag
            && self.parent == other.parent
            && self.children == other.children
            && self.assets == other.assets
    }
}

impl Eq for TreeNode {}

/// A pruned, per-subject view of the catalog.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UserTree {
    root: String,
    nodes: BTreeMap<String, TreeNode>,
}

impl UserTree {
    pub fn new(root_identifier: &str, root_tag: &str) -> Self {
        let mut nodes = BTreeMap::new();
        nodes.insert(
            root_identifier.to_string(),
            TreeNode::new(root_identifier, root_tag, None),
        );
        Self {
            root: root_identifier.to_string(),
            nodes,
        }
    }

    pub fn root(&self) -> &str {
        &self.root
    }

    pub fn root_node(&self) -> &TreeNode {
        &self.nodes[&self.root]
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.len() <= 1
    }

    pub fn contains(&self, identifier: &str) -> bool {
        self.nodes.contains_key(identifier)
    }

    pub fn get(&self, identifier: &str) -> Option<&TreeNode> {
        self.nodes.get(identifier)
    }

    pub fn parent(&self, identifier: &str) -> Option<&TreeNode> {
        let parent = self.nodes.get(identifier)?.parent.as_deref()?;
        self.nodes.get(parent)
    }

    pub fn children(&self, identifier: &str) -> Vec<&TreeNode> {
        self.nodes
            .get(identifier)
            .map(|n| n.children.iter().filter_map(|c| self.nodes.get(c)).collect())
            .unwrap_or_default()
    }

    /// Assets attached directly to the node.
    pub fn assets(&self, identifier: &str) -> Option<&BTreeSet<String>> {
        self.nodes.get(identifier).map(|n| &n.assets)
    }

    /// Assets anywhere in the node's subtree.
    pub fn all_assets(&self, identifier: &str) -> Option<&BTreeSet<String>> {
        let node = self.nodes.get(identifier)?;
        Some(node.all_assets.get_or_init(|| {
            let mut all = node.assets.clone();
            for child in &node.children {
                if let Some(assets) = self.all_assets(child) {
                    all.extend(assets.iter().cloned());
                }
            }
            all
        }))
    }

    /// Nodes in preorder, root first, children in insertion order.
    pub fn iter(&self) -> impl Iterator<Item = &TreeNode> + '_ {
        let mut stack = vec![self.root.as_str()];
        std::iter::from_fn(move || {
            while let Some(id) = stack.pop() {
                if let Some(node) = self.nodes.get(id) {
                    stack.extend(node.children.iter().rev().map(String::as_str));
                    return Some(node);
                }
            }
            None
        })
    }

    pub fn identifiers(&self) -> Vec<String> {
        self.iter().map(|n| n.identifier.clone()).collect()
    }

    /// Add a node under `parent`. An existing node is never overwritten;
    /// returns whether the node was created.
    pub fn create_node(&mut self, identifier: &str, tag: &str, parent: &str) -> PermsResult<bool> {
        if self.nodes.contains_key(identifier) {
            return Ok(false);
        }
        let Some(parent_node) = self.nodes.get_mut(parent) else {
            return Err(PermsError::CatalogInconsistency(format!(
                "parent {parent:?} of {identifier:?} not in tree"
            )));
        };
        parent_node.children.push(identifier.to_string());
        self.nodes.insert(
            identifier.to_string(),
            TreeNode::new(identifier, tag, Some(parent)),
        );
        Ok(true)
    }

    /// Re-parent a node. Moving the root, or moving a node below itself, is rejected.
    pub fn move_node(&mut self, identifier: &str, new_parent: &str) -> PermsResult<()> {
        if identifier == self.root {
            return Err(PermsError::CatalogInconsistency("cannot move root".into()));
        }
        if !self.nodes.contains_key(new_parent) {
            return Err(PermsError::CatalogInconsistency(format!(
                "target parent {new_parent:?} not in tree"
            )));
        }
        if self.is_in_subtree(new_parent, identifier) {
            return Err(PermsError::CatalogInconsistency(format!(
                "cannot move {identifier:?} below itself"
            )));
        }
        let old_parent = match self.nodes.get(identifier) {
            Some(node) => node.parent.clone(),
            None => {
                return Err(PermsError::CatalogInconsistency(format!(
                    "node {identifier:?} not in tree"
                )));
            }
        };
        if old_parent.as_deref() == Some(new_parent) {
            return Ok(());
        }

        if let Some(old) = &old_parent {
            if let Some(node) = self.nodes.get_mut(old) {
                node.children.retain(|c| c != identifier);
            }
            self.reset_memo_upwards(old);
        }
        if let Some(node) = self.nodes.get_mut(new_parent) {
            node.children.push(identifier.to_string());
        }
        if let Some(node) = self.nodes.get_mut(identifier) {
            node.parent = Some(new_parent.to_string());
        }
        self.reset_memo_upwards(new_parent);
        Ok(())
    }

    /// Replace the node's direct asset set.
    pub fn set_assets(&mut self, identifier: &str, assets: BTreeSet<String>) -> PermsResult<()> {
        let Some(node) = self.nodes.get_mut(identifier) else {
            return Err(PermsError::CatalogInconsistency(format!(
                "node {identifier:?} not in tree"
            )));
        };
        node.assets = assets;
        self.reset_memo_upwards(identifier);
        Ok(())
    }

    fn is_in_subtree(&self, identifier: &str, ancestor: &str) -> bool {
        let mut cursor = Some(identifier);
        while let Some(id) = cursor {
            if id == ancestor {
                return true;
            }
            cursor = self.nodes.get(id).and_then(|n| n.parent.as_deref());
        }
        false
    }

    fn reset_memo_upwards(&mut self, identifier: &str) {
        let mut cursor = Some(identifier.to_string());
        while let Some(id) = cursor {
            let Some(node) = self.nodes.get_mut(&id) else { break };
            node.all_assets.take();
            cursor = node.parent.clone();
        }
    }

    /// Encode as a versioned JSON snapshot.
    pub fn to_bytes(&self) -> PermsResult<Vec<u8>> {
        let mut index: BTreeMap<&str, u32> = BTreeMap::new();
        let mut nodes = Vec::with_capacity(self.nodes.len());
        for (i, node) in self.iter().enumerate() {
            index.insert(node.identifier.as_str(), i as u32);
            nodes.push(SnapshotNode {
                id: node.identifier.clone(),
                tag: node.tag.clone(),
                parent: node.parent.as_deref().and_then(|p| index.get(p).copied()),
                assets: node.assets.iter().cloned().collect(),
            });
        }
        let snapshot = TreeSnapshot {
            version: SNAPSHOT_VERSION,
            nodes,
        };
        serde_json::to_vec(&snapshot).map_err(|e| PermsError::Serialization(e.to_string()))
    }

    /// Decode a snapshot written by [`UserTree::to_bytes`].
    ///
    /// Rejects unknown versions, a missing or duplicated root, forward or
    /// out-of-range parent indices and duplicate identifiers.
    pub fn from_bytes(data: &[u8]) -> PermsResult<Self> {
        let snapshot: TreeSnapshot =
            serde_json::from_slice(data).map_err(|e| PermsError::Serialization(e.to_string()))?;
        if snapshot.version != SNAPSHOT_VERSION {
            return Err(PermsError::Serialization(format!(
                "unsupported snapshot version {}",
                snapshot.version
            )));
        }

        let mut entries = snapshot.nodes.into_iter().enumerate();
        let root = match entries.next() {
            Some((_, node)) if node.parent.is_none() => node,
            _ => return Err(PermsError::Serialization("snapshot has no root".into())),
        };

        let mut ids: Vec<String> = vec![root.id.clone()];
        let mut seen: HashSet<String> = HashSet::from([root.id.clone()]);
        let mut tree = UserTree::new(&root.id, &root.tag);
        tree.set_assets(&root.id, root.assets.into_iter().collect())?;

        for (i, node) in entries {
            let parent = match node.parent {
                Some(p) if (p as usize) < i => &ids[p as usize],
                _ => {
                    return Err(PermsError::Serialization(format!(
                        "node {} has invalid parent index",
                        node.id
                    )));
                }
            };
            if !seen.insert(node.id.clone()) {
                return Err(PermsError::Serialization(format!(
                    "duplicate node {}",
                    node.id
                )));
            }
            tree.create_node(&node.id, &node.tag, parent)?;
            tree.set_assets(&node.id, node.assets.into_iter().collect())?;
            ids.push(node.id);
        }
        Ok(tree)
    }
}

#[derive(Serialize, Deserialize)]
struct TreeSnapshot {
    version: u32,
    nodes: Vec<SnapshotNode>,
}

#[derive(Serialize, Deserialize)]
struct SnapshotNode {
    id: String,
    tag: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    parent: Option<u32>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    assets: Vec<String>,
}
