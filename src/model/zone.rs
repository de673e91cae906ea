use serde::{Deserialize, Serialize};

use crate::ident::Cidr;

/// A single packet selector usable in a zone's `matches` list.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ZoneSelector {
    Interface(String),
    SrcCidr(String),
    DstCidr(String),
    Protocol(String),
    Mac(String),
    Mark(u32),
    Dscp(u8),
    Tos(u8),
    OutInterface(String),
}

/// Management-plane access bitset: which control-plane services are
/// reachable when traffic arrives through a zone/interface.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct ManagementBits {
    #[serde(default)]
    pub ssh: bool,
    #[serde(default)]
    pub web: bool,
    #[serde(default)]
    pub webui: bool,
    #[serde(default)]
    pub api: bool,
    #[serde(default)]
    pub icmp: bool,
    #[serde(default)]
    pub snmp: bool,
    #[serde(default)]
    pub syslog: bool,
}

impl ManagementBits {
    pub fn is_empty(&self) -> bool {
        *self == ManagementBits::default()
    }

    /// TCP ports implied by the set management bits (ssh=22, web=80,
    /// webui/api handled separately since their ports are configurable).
    pub fn tcp_ports(&self, webui_port: Option<u16>) -> Vec<u16> {
        let mut ports = Vec::new();
        if self.ssh {
            ports.push(22);
        }
        if self.web {
            ports.push(80);
            ports.push(443);
        }
        if self.webui {
            ports.push(webui_port.unwrap_or(8443));
        }
        if self.api {
            ports.push(8080);
        }
        if self.snmp {
            ports.push(161);
        }
        if self.syslog {
            ports.push(514);
        }
        ports
    }
}

/// Service-plane bitset: which locally-hosted services a zone/interface
/// may reach the router for.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct ServiceBits {
    #[serde(default)]
    pub dhcp: bool,
    #[serde(default)]
    pub dns: bool,
    #[serde(default)]
    pub ntp: bool,
    #[serde(default)]
    pub custom_ports: Vec<u16>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct Zone {
    pub name: String,
    #[serde(default)]
    pub matches: Vec<ZoneSelector>,
    #[serde(default)]
    pub management: ManagementBits,
    #[serde(default)]
    pub services: ServiceBits,
    #[serde(default)]
    pub external: bool,
    #[serde(default)]
    pub color: Option<String>,
    #[serde(default)]
    pub networks: Vec<String>,
}

impl Zone {
    pub fn networks_parsed(&self) -> Vec<Cidr> {
        self.networks
            .iter()
            .filter_map(|n| Cidr::parse(n).ok())
            .collect()
    }
}
