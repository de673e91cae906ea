use serde::{Deserialize, Serialize};

/// The concrete shape of a custom mark rule, grounded in spec.md §8
/// scenario 3 (`src=192.168.1.100, mark=0x10` → `ip saddr 192.168.1.100
/// meta mark set 0x10`).
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct MarkRule {
    #[serde(default)]
    pub src_ip: Option<String>,
    #[serde(default)]
    pub dest_ip: Option<String>,
    #[serde(default)]
    pub interface: Option<String>,
    pub mark: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub enum VpnKind {
    WireGuard,
    Tailscale,
    Other,
}

/// A VPN peer/tunnel interface; only the fields the filter/mangle
/// compilers touch are modeled here (VPN tunnel setup itself is an
/// external collaborator per spec.md §1).
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct VpnPeer {
    pub name: String,
    pub interface: String,
    pub kind: VpnKind,
    #[serde(default)]
    pub management_access: bool,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct DnsConfig {
    #[serde(default)]
    pub egress_filter: bool,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct FeatureFlags {
    #[serde(default)]
    pub enable_flow_offload: bool,
    #[serde(default)]
    pub mss_clamping: bool,
    #[serde(default)]
    pub integrity_monitoring: bool,
    #[serde(default)]
    pub rule_learning: bool,
    /// Sandbox redirection toggle (Open Question in spec.md §9): a
    /// single configurable switch defaulting to off.
    #[serde(default)]
    pub sandbox_mode: bool,
}

/// Learning-engine dispatch mode, consulted by filter-table step 19.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
pub enum LearningMode {
    #[default]
    Off,
    Inline,
    Passive,
}
