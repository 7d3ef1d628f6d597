use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};

/// Key of the catalog root. Every other key is a non-empty path.
pub const ROOT_KEY: &str = "";

/// Separator between path segments of a node key (`"1:2:7"`).
pub const KEY_SEPARATOR: char = ':';

/// Synthetic bucket for individually granted assets.
pub const UNGROUPED_KEY: &str = "-10";
pub const UNGROUPED_VALUE: &str = "Ungrouped";

/// Synthetic node surfacing a user's favorited assets.
pub const FAVORITE_KEY: &str = "-11";
pub const FAVORITE_VALUE: &str = "Favorite";

/// A group in the asset hierarchy.
///
/// The key encodes the full path, so the ancestor chain of a node can be
/// derived from its key alone.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Node {
    pub id: String,

    /// Colon-separated path, e.g. `"1:2"` is a child of `"1"`.
    pub key: String,

    /// Display name.
    pub value: String,

    /// Number of distinct assets in this node's subtree. Filled in by the catalog.
    #[serde(default)]
    pub assets_amount: usize,
}

impl Node {
    pub fn new(id: impl Into<String>, key: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            key: key.into(),
            value: value.into(),
            assets_amount: 0,
        }
    }

    pub fn is_root(&self) -> bool {
        self.key == ROOT_KEY
    }

    pub fn parent_key(&self) -> &str {
        parent_key(&self.key)
    }
}

/// Key of the parent of `key`. Top-level keys and the root map to [`ROOT_KEY`].
pub fn parent_key(key: &str) -> &str {
    match key.rfind(KEY_SEPARATOR) {
        Some(pos) => &key[..pos],
        None => ROOT_KEY,
    }
}

/// All ancestor keys of `key`, shallowest first, without the root.
pub fn ancestor_keys(key: &str, with_self: bool) -> Vec<String> {
    if key == ROOT_KEY {
        return Vec::new();
    }
    let mut keys: Vec<String> = key
        .match_indices(KEY_SEPARATOR)
        .map(|(pos, _)| key[..pos].to_string())
        .collect();
    if with_self {
        keys.push(key.to_string());
    }
    keys
}

/// Whether `key` is `ancestor` itself or lies below it.
pub fn is_descendant_or_self(key: &str, ancestor: &str) -> bool {
    if ancestor == ROOT_KEY {
        return true;
    }
    key == ancestor
        || (key.starts_with(ancestor) && key[ancestor.len()..].starts_with(KEY_SEPARATOR))
}

/// Synthetic and leaf-marker identifiers: purely numeric ids and keys with a
/// leading `-`. They have no catalog ancestors.
pub fn is_synthetic_key(key: &str) -> bool {
    key.starts_with('-') || (!key.is_empty() && key.bytes().all(|b| b.is_ascii_digit()))
}

/// Drop every key that has an ancestor (or a duplicate) in the same set.
pub fn clean_children_keys<'a, I>(keys: I) -> Vec<String>
where
    I: IntoIterator<Item = &'a str>,
{
    let sorted: BTreeSet<&str> = keys.into_iter().collect();
    let mut kept: Vec<String> = Vec::new();
    for key in sorted {
        if key == ROOT_KEY {
            return vec![ROOT_KEY.to_string()];
        }
        if !kept.iter().any(|k| is_descendant_or_self(key, k)) {
            kept.push(key.to_string());
        }
    }
    kept
}
