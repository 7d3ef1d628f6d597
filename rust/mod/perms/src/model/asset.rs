use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::PermsError;

/// A reachable protocol on an asset, written `name/port` (e.g. `ssh/22`).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Protocol {
    pub name: String,
    pub port: u16,
}

impl Protocol {
    pub fn new(name: impl Into<String>, port: u16) -> Self {
        Self {
            name: name.into(),
            port,
        }
    }
}

impl fmt::Display for Protocol {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.name, self.port)
    }
}

impl FromStr for Protocol {
    type Err = PermsError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (name, port) = s
            .split_once('/')
            .ok_or_else(|| PermsError::Serialization(format!("protocol without port: {s}")))?;
        let port = port
            .trim()
            .parse::<u16>()
            .map_err(|e| PermsError::Serialization(format!("protocol {s}: {e}")))?;
        Ok(Self::new(name.trim().to_lowercase(), port))
    }
}

/// A manageable host. Read-only to the resolver.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Asset {
    pub id: String,
    pub hostname: String,
    pub ip: String,

    /// Platform name as configured (`Linux`, `Windows2016`, ...).
    pub platform: String,

    #[serde(default)]
    pub protocols: Vec<Protocol>,

    /// Owning gateway domain, if any.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub domain: Option<String>,

    /// Keys of the nodes this asset belongs to.
    #[serde(default)]
    pub nodes: Vec<String>,

    #[serde(default = "default_true")]
    pub is_active: bool,

    #[serde(default)]
    pub org_id: String,

    #[serde(default)]
    pub comment: String,
}

fn default_true() -> bool {
    true
}

impl Asset {
    pub fn new(id: impl Into<String>, hostname: impl Into<String>, ip: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            hostname: hostname.into(),
            ip: ip.into(),
            platform: "Linux".to_string(),
            protocols: vec![Protocol::new("ssh", 22)],
            domain: None,
            nodes: Vec::new(),
            is_active: true,
            org_id: String::new(),
            comment: String::new(),
        }
    }

    pub fn has_protocol(&self, name: &str) -> bool {
        self.protocols.iter().any(|p| p.name.eq_ignore_ascii_case(name))
    }

    pub fn protocol_names(&self) -> Vec<&str> {
        self.protocols.iter().map(|p| p.name.as_str()).collect()
    }

    /// Platform family used for display: `Windows`, `Linux` or the platform itself.
    pub fn platform_base(&self) -> &str {
        let lower = self.platform.to_ascii_lowercase();
        if lower.starts_with("windows") {
            "Windows"
        } else if ["linux", "unix", "macos", "bsd", "aix"]
            .iter()
            .any(|p| lower.starts_with(p))
        {
            "Linux"
        } else {
            &self.platform
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_protocol() {
        let p: Protocol = "SSH/22".parse().unwrap();
        assert_eq!(p, Protocol::new("ssh", 22));
        assert_eq!(p.to_string(), "ssh/22");

        assert!("ssh".parse::<Protocol>().is_err());
        assert!("rdp/xyz".parse::<Protocol>().is_err());
    }

    #[test]
    fn protocol_lookup_is_case_insensitive() {
        let mut asset = Asset::new("a1", "web-01", "10.0.0.1");
        asset.protocols.push(Protocol::new("rdp", 3389));
        assert!(asset.has_protocol("SSH"));
        assert!(asset.has_protocol("rdp"));
        assert!(!asset.has_protocol("vnc"));
        assert_eq!(asset.protocol_names(), vec!["ssh", "rdp"]);
    }

    #[test]
    fn platform_family() {
        let mut asset = Asset::new("a1", "win", "10.0.0.2");
        asset.platform = "Windows2016".into();
        assert_eq!(asset.platform_base(), "Windows");
        asset.platform = "MacOS".into();
        assert_eq!(asset.platform_base(), "Linux");
        asset.platform = "Other".into();
        assert_eq!(asset.platform_base(), "Other");
    }

    #[test]
    fn deserialize_with_defaults() {
        let asset: Asset = serde_json::from_str(
            r#"{"id":"a1","hostname":"db","ip":"10.0.0.3","platform":"Linux"}"#,
        )
        .unwrap();
        assert!(asset.is_active);
        assert!(asset.protocols.is_empty());
        assert!(asset.nodes.is_empty());
    }
}
