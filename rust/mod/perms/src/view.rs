//! Flattening user trees into display records for tree widgets.

use serde::Serialize;

use crate::catalog::AssetCatalog;
use crate::model::{Asset, KEY_SEPARATOR, Node, Protocol, is_synthetic_key};
use crate::tree::UserTree;

/// One row of a tree widget, either a node or an asset.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TreeNodeView {
    pub id: String,
    pub name: String,
    pub title: String,
    #[serde(rename = "pId")]
    pub p_id: String,
    #[serde(rename = "isParent")]
    pub is_parent: bool,
    pub open: bool,
    #[serde(rename = "iconSkin", skip_serializing_if = "Option::is_none")]
    pub icon_skin: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub nocheck: Option<bool>,
    pub meta: ViewMeta,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum ViewMeta {
    Node { node: NodeMeta },
    Asset { asset: AssetMeta },
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct NodeMeta {
    pub id: String,
    pub key: String,
    pub value: String,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AssetMeta {
    pub id: String,
    pub hostname: String,
    pub ip: String,
    pub protocols: Vec<Protocol>,
    pub platform: String,
    pub domain: Option<String>,
    pub org_id: String,
}

/// Display record of a node. `open` marks top-level nodes.
pub fn node_view(node: &Node, open: bool) -> TreeNodeView {
    let name = format!("{} ({})", node.value, node.assets_amount);
    TreeNodeView {
        id: node.key.clone(),
        title: name.clone(),
        name,
        p_id: node.parent_key().to_string(),
        is_parent: true,
        open,
        icon_skin: None,
        nocheck: None,
        meta: ViewMeta::Node {
            node: NodeMeta {
                id: node.id.clone(),
                key: node.key.clone(),
                value: node.value.clone(),
            },
        },
    }
}

/// Display record of an asset under `parent` (the root when `None`).
pub fn asset_view(parent: Option<&str>, asset: &Asset) -> TreeNodeView {
    let icon_skin = match asset.platform_base().to_ascii_lowercase().as_str() {
        "windows" => "windows",
        "linux" => "linux",
        _ => "file",
    };
    TreeNodeView {
        id: asset.id.clone(),
        name: asset.hostname.clone(),
        title: asset.ip.clone(),
        p_id: parent.unwrap_or_default().to_string(),
        is_parent: false,
        open: false,
        icon_skin: Some(icon_skin.to_string()),
        nocheck: Some(!asset.has_protocol("ssh")),
        meta: ViewMeta::Asset {
            asset: AssetMeta {
                id: asset.id.clone(),
                hostname: asset.hostname.clone(),
                ip: asset.ip.clone(),
                protocols: asset.protocols.clone(),
                platform: asset.platform_base().to_string(),
                domain: asset.domain.clone(),
                org_id: asset.org_id.clone(),
            },
        },
    }
}

/// Every node of `tree` below the root, each followed by its direct active
/// assets. Counts are the active assets the subject may reach below each
/// node, not the full catalog.
pub fn user_tree_views(tree: &UserTree, catalog: &dyn AssetCatalog) -> Vec<TreeNodeView> {
    let mut views = Vec::new();
    for node in tree.iter().skip(1) {
        let identifier = node.identifier();
        let id = catalog
            .node_by_key(identifier)
            .map(|n| n.id.clone())
            .unwrap_or_else(|| identifier.to_string());
        let display = Node {
            id,
            key: identifier.to_string(),
            value: node.tag().to_string(),
            assets_amount: tree.all_assets(identifier).map_or(0, |ids| {
                ids.iter()
                    .filter(|id| catalog.asset(id).is_some_and(|a| a.is_active))
                    .count()
            }),
        };
        let top = !identifier.contains(KEY_SEPARATOR) || is_synthetic_key(identifier);
        let mut view = node_view(&display, top && node.parent() == Some(tree.root()));
        view.p_id = node.parent().unwrap_or_default().to_string();
        views.push(view);

        for asset_id in node.assets() {
            if let Some(asset) = catalog.asset(asset_id).filter(|a| a.is_active) {
                views.push(asset_view(Some(identifier), asset));
            }
        }
    }
    views
}
