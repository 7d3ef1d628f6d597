use serde::{Deserialize, Serialize};

/// How credentials are supplied when logging in with a system user.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LoginMode {
    #[default]
    Auto,
    Manual,
}

/// A credential / login profile usable against assets that speak its protocol.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SystemUser {
    pub id: String,
    pub name: String,
    pub username: String,

    /// Protocol name, e.g. `ssh` or `rdp`.
    pub protocol: String,

    /// Lower wins when several system users qualify (1..=100).
    #[serde(default = "default_priority")]
    pub priority: u8,

    #[serde(default)]
    pub login_mode: LoginMode,
}

fn default_priority() -> u8 {
    20
}

impl SystemUser {
    pub fn new(
        id: impl Into<String>,
        name: impl Into<String>,
        username: impl Into<String>,
        protocol: impl Into<String>,
    ) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            username: username.into(),
            protocol: protocol.into(),
            priority: default_priority(),
            login_mode: LoginMode::Auto,
        }
    }
}
