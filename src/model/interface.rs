use serde::{Deserialize, Serialize};

use super::zone::ManagementBits;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Interface {
    pub name: String,
    #[serde(default)]
    pub zone: Option<String>,
    #[serde(default)]
    pub ipv4: Vec<String>,
    #[serde(default)]
    pub ipv6: Vec<String>,
    #[serde(default)]
    pub mtu: Option<u16>,
    #[serde(default)]
    pub gateway: Option<String>,
    #[serde(default)]
    pub dhcp: bool,
    /// Routing-table id; non-zero triggers the mangle table per spec.md §4.7.
    #[serde(default)]
    pub table: u32,
    #[serde(default)]
    pub management: Option<ManagementBits>,
    #[serde(default)]
    pub disabled: bool,
    #[serde(default)]
    pub webui_port: Option<u16>,
    /// Legacy flag; superseded by `management` when present (Open Question,
    /// see DESIGN.md).
    #[serde(default)]
    pub access_web_ui: bool,
}

impl Interface {
    /// Resolves the effective management bitset per the legacy-precedence
    /// Open Question: a structured `management` block fully overrides the
    /// legacy flag; otherwise the legacy flag enables `web` and `api`.
    pub fn effective_management(&self) -> ManagementBits {
        if let Some(mgmt) = self.management {
            mgmt
        } else if self.access_web_ui {
            ManagementBits {
                web: true,
                api: true,
                ..ManagementBits::default()
            }
        } else {
            ManagementBits::default()
        }
    }
}
