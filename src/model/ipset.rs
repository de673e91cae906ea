use serde::{Deserialize, Serialize};

use crate::error::{FirewallError, Result};

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum IpSetType {
    Ipv4Addr,
    Ipv6Addr,
    InetService,
    Dns,
    Dynamic,
}

impl IpSetType {
    /// The nft element type declared for the set. `dns`/`dynamic` map to
    /// `ipv4_addr` with a `timeout` flag at element granularity.
    pub fn nft_type(self) -> &'static str {
        match self {
            IpSetType::Ipv4Addr | IpSetType::Dns | IpSetType::Dynamic => "ipv4_addr",
            IpSetType::Ipv6Addr => "ipv6_addr",
            IpSetType::InetService => "inet_service",
        }
    }

    pub fn is_dynamic_family(self) -> bool {
        matches!(self, IpSetType::Dns | IpSetType::Dynamic)
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum ApplyTo {
    Input,
    Forward,
    Both,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum SetAction {
    Accept,
    Drop,
    Reject,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct IPSet {
    pub name: String,
    #[serde(rename = "type")]
    pub set_type: Option<IpSetType>,
    #[serde(default)]
    pub entries: Vec<String>,
    #[serde(default)]
    pub size: Option<u32>,
    #[serde(default)]
    pub managed_list: Option<String>,
    #[serde(default)]
    pub url: Option<String>,
    #[serde(default)]
    pub auto_update: bool,
    #[serde(default)]
    pub refresh_hours: Option<u32>,
    #[serde(default)]
    pub action: Option<SetAction>,
    #[serde(default)]
    pub apply_to: Option<ApplyTo>,
    #[serde(default)]
    pub match_on_source: bool,
    #[serde(default)]
    pub match_on_dest: bool,
}

impl Default for IpSetType {
    fn default() -> Self {
        IpSetType::Ipv4Addr
    }
}

impl IPSet {
    pub fn set_type(&self) -> IpSetType {
        self.set_type.unwrap_or_default()
    }

    pub fn is_dynamic_only(&self) -> bool {
        self.set_type() == IpSetType::Dynamic
            && self.entries.is_empty()
            && self.managed_list.is_none()
            && self.url.is_none()
    }

    /// Invariant 3: at most one of {entries, managed_list, url}, unless
    /// the set is declared purely dynamic.
    pub fn validate_source_exclusivity(&self) -> Result<()> {
        let sources = [
            !self.entries.is_empty(),
            self.managed_list.is_some(),
            self.url.is_some(),
        ];
        let set_count = sources.iter().filter(|b| **b).count();
        if set_count > 1 {
            return Err(FirewallError::IpSetSourceConflict(self.name.clone()));
        }
        if set_count == 0 && !self.is_dynamic_only() {
            return Err(FirewallError::IpSetSourceConflict(self.name.clone()));
        }
        Ok(())
    }

    pub fn apply_to(&self) -> ApplyTo {
        self.apply_to.unwrap_or(ApplyTo::Both)
    }
}

/// Persisted metadata for a managed/URL-backed set (C5), one record per
/// set name in the `ipset_metadata` bucket.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub enum IpSetSourceKind {
    Manual,
    Managed,
    Url,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct IpSetMetadata {
    pub name: String,
    pub set_type: IpSetType,
    pub source: IpSetSourceKind,
    pub source_url: Option<String>,
    pub last_update: chrono::DateTime<chrono::Utc>,
    pub next_update: Option<chrono::DateTime<chrono::Utc>>,
    pub entries_count: usize,
    pub etag: Option<String>,
    pub checksum: Option<String>,
}
