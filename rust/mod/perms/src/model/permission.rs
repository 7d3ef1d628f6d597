use std::collections::BTreeSet;

use bitflags::bitflags;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

bitflags! {
    /// Actions a grant allows on its targets.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
    pub struct Actions: u8 {
        const CONNECT = 0b0000_0001;
        const UPLOAD = 0b0000_0010;
        const DOWNLOAD = 0b0000_0100;
        const UPDOWNLOAD = Self::UPLOAD.bits() | Self::DOWNLOAD.bits();
        const CLIPBOARD_COPY = 0b0000_1000;
        const CLIPBOARD_PASTE = 0b0001_0000;
        const CLIPBOARD_COPY_PASTE = Self::CLIPBOARD_COPY.bits() | Self::CLIPBOARD_PASTE.bits();
        const ALL = 0b1111_1111;
    }
}

impl Actions {
    /// Look up an action by its configuration name (`connect`, `upload_file`, ...).
    /// Case-insensitive, unlike the generated `from_name`.
    pub fn from_config_name(name: &str) -> Option<Self> {
        let action = match name.trim().to_ascii_lowercase().as_str() {
            "all" => Self::ALL,
            "connect" => Self::CONNECT,
            "upload_file" | "upload" => Self::UPLOAD,
            "download_file" | "download" => Self::DOWNLOAD,
            "updownload" => Self::UPDOWNLOAD,
            "clipboard_copy" => Self::CLIPBOARD_COPY,
            "clipboard_paste" => Self::CLIPBOARD_PASTE,
            "clipboard_copy_paste" => Self::CLIPBOARD_COPY_PASTE,
            _ => return None,
        };
        Some(action)
    }

    /// Union of the named actions. Unknown names are ignored.
    pub fn from_names<'a, I>(names: I) -> Self
    where
        I: IntoIterator<Item = &'a str>,
    {
        names
            .into_iter()
            .filter_map(Self::from_config_name)
            .fold(Self::empty(), |acc, a| acc | a)
    }
}

/// A persisted binding of subjects to targets, system users and actions.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GrantRule {
    pub id: String,
    pub name: String,

    /// User ids bound by this rule.
    #[serde(default)]
    pub users: BTreeSet<String>,

    /// User group ids bound by this rule.
    #[serde(default)]
    pub user_groups: BTreeSet<String>,

    /// Granted node keys. Each grant covers the node's whole subtree.
    #[serde(default)]
    pub nodes: BTreeSet<String>,

    /// Individually granted asset ids.
    #[serde(default)]
    pub assets: BTreeSet<String>,

    #[serde(default)]
    pub system_users: BTreeSet<String>,

    #[serde(default)]
    pub actions: Actions,

    #[serde(default = "default_active")]
    pub is_active: bool,

    pub date_start: DateTime<Utc>,
    pub date_expired: DateTime<Utc>,
}

fn default_active() -> bool {
    true
}

impl GrantRule {
    /// A rule that is active from now on for a hundred years.
    pub fn new(id: impl Into<String>, name: impl Into<String>) -> Self {
        let now = Utc::now();
        Self {
            id: id.into(),
            name: name.into(),
            users: BTreeSet::new(),
            user_groups: BTreeSet::new(),
            nodes: BTreeSet::new(),
            assets: BTreeSet::new(),
            system_users: BTreeSet::new(),
            actions: Actions::ALL,
            is_active: true,
            date_start: now - chrono::Duration::seconds(1),
            date_expired: now + chrono::Duration::days(365 * 100),
        }
    }

    /// Active and inside its validity window.
    pub fn is_valid(&self, now: DateTime<Utc>) -> bool {
        self.is_active && self.date_start <= now && now < self.date_expired
    }
}

/// Optional narrowing of a subject's rule set.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RuleFilter {
    /// Signature of this filter in cache keys. A filter without an id is
    /// never cached.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,

    /// Keep only rules granting this system user.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub system_user: Option<String>,

    /// Keep only rules that include all of these actions.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub actions: Option<Actions>,

    /// Keep only these rules.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rule_ids: Option<BTreeSet<String>>,
}

impl RuleFilter {
    pub fn with_id(id: impl Into<String>) -> Self {
        Self {
            id: Some(id.into()),
            ..Self::default()
        }
    }

    pub fn matches(&self, rule: &GrantRule) -> bool {
        if let Some(system_user) = &self.system_user
            && !rule.system_users.contains(system_user)
        {
            return false;
        }
        if let Some(actions) = self.actions
            && !rule.actions.contains(actions)
        {
            return false;
        }
        if let Some(ids) = &self.rule_ids
            && !ids.contains(&rule.id)
        {
            return false;
        }
        true
    }

    pub fn apply(&self, rules: Vec<GrantRule>) -> Vec<GrantRule> {
        rules.into_iter().filter(|r| self.matches(r)).collect()
    }
}
