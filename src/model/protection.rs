use serde::{Deserialize, Serialize};
use std::fmt;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum RateUnit {
    Second,
    Minute,
    Hour,
}

impl fmt::Display for RateUnit {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let token = match self {
            RateUnit::Second => "second",
            RateUnit::Minute => "minute",
            RateUnit::Hour => "hour",
        };
        write!(f, "{token}")
    }
}

/// The concrete shape of the `rate`/`burst` tokens spec.md passes through
/// as strings (e.g. `"10/minute"`); renders to the exact nft token.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub struct ProtectionRate {
    pub rate: u32,
    pub per: RateUnit,
}

impl fmt::Display for ProtectionRate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.rate, self.per)
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct Protection {
    /// `"*"` means all interfaces.
    pub interface: String,
    #[serde(default = "default_true")]
    pub enabled: bool,
    #[serde(default)]
    pub invalid_packets: bool,
    #[serde(default)]
    pub anti_spoofing: bool,
    #[serde(default)]
    pub bogon_filtering: bool,
    #[serde(default)]
    pub syn_flood_protection: bool,
    #[serde(default)]
    pub syn_flood_rate: Option<ProtectionRate>,
    #[serde(default)]
    pub syn_flood_burst: Option<u32>,
    #[serde(default)]
    pub icmp_rate_limit: bool,
    #[serde(default)]
    pub icmp_rate: Option<ProtectionRate>,
}

fn default_true() -> bool {
    true
}

impl Protection {
    pub fn applies_to_all(&self) -> bool {
        self.interface == "*"
    }
}
