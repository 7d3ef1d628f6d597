use std::fmt;

use serde::{Deserialize, Serialize};

/// Entity whose access is being resolved.
///
/// Users and groups are the forward lookup. Nodes, assets and system users
/// are reverse lookups ("who can reach me").
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Subject {
    User {
        id: String,
        #[serde(default)]
        group_ids: Vec<String>,
    },
    UserGroup {
        id: String,
    },
    Node {
        id: String,
        key: String,
    },
    Asset {
        id: String,
    },
    SystemUser {
        id: String,
    },
}

impl Subject {
    pub fn user(id: impl Into<String>) -> Self {
        Subject::User {
            id: id.into(),
            group_ids: Vec::new(),
        }
    }

    pub fn kind(&self) -> SubjectKind {
        match self {
            Subject::User { .. } => SubjectKind::User,
            Subject::UserGroup { .. } => SubjectKind::UserGroup,
            Subject::Node { .. } => SubjectKind::Node,
            Subject::Asset { .. } => SubjectKind::Asset,
            Subject::SystemUser { .. } => SubjectKind::SystemUser,
        }
    }

    pub fn id(&self) -> &str {
        match self {
            Subject::User { id, .. }
            | Subject::UserGroup { id }
            | Subject::Node { id, .. }
            | Subject::Asset { id }
            | Subject::SystemUser { id } => id,
        }
    }

    pub fn is_user(&self) -> bool {
        matches!(self, Subject::User { .. })
    }
}

/// Tag of a [`Subject`]. Indexes the resolver's query table.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum SubjectKind {
    User,
    UserGroup,
    Node,
    Asset,
    SystemUser,
}

impl SubjectKind {
    pub const COUNT: usize = 5;

    pub const ALL: [SubjectKind; Self::COUNT] = [
        SubjectKind::User,
        SubjectKind::UserGroup,
        SubjectKind::Node,
        SubjectKind::Asset,
        SubjectKind::SystemUser,
    ];

    pub fn index(self) -> usize {
        self as usize
    }

    pub fn as_str(self) -> &'static str {
        match self {
            SubjectKind::User => "User",
            SubjectKind::UserGroup => "UserGroup",
            SubjectKind::Node => "Node",
            SubjectKind::Asset => "Asset",
            SubjectKind::SystemUser => "SystemUser",
        }
    }
}

impl fmt::Display for SubjectKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
