//! The declarative network-policy data model (spec.md §3).

pub mod interface;
pub mod ipset;
pub mod mark;
pub mod nat;
pub mod policy;
pub mod protection;
pub mod zone;

pub use interface::Interface;
pub use ipset::{ApplyTo, IPSet, IpSetMetadata, IpSetSourceKind, IpSetType, SetAction};
pub use mark::{DnsConfig, FeatureFlags, LearningMode, MarkRule, VpnKind, VpnPeer};
pub use nat::{NATRule, NatType};
pub use policy::{Action, ConnState, Counter, Policy, PolicyRule, Schedule, ScheduledRule, Weekday};
pub use protection::{Protection, ProtectionRate, RateUnit};
pub use zone::{ManagementBits, ServiceBits, Zone, ZoneSelector};

use serde::{Deserialize, Serialize};

/// The immutable input snapshot the Manager (C8) receives whole and
/// compiles from. Everything named in spec.md §3's `Config` field list
/// is present; fields explicitly out of scope at the core (VPN tunnel
/// setup, DHCP/DNS/NTP/UPnP/Web servers themselves, replication) are
/// modeled only to the extent the compiler touches them.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct Config {
    /// Bumped by callers that persist configs; unused by the core beyond
    /// round-tripping, see SPEC_FULL.md §3.
    #[serde(default)]
    pub schema_version: u32,

    #[serde(default)]
    pub zones: Vec<Zone>,
    #[serde(default)]
    pub interfaces: Vec<Interface>,
    #[serde(default)]
    pub policies: Vec<Policy>,
    #[serde(default)]
    pub nat: Vec<NATRule>,
    #[serde(default)]
    pub ip_sets: Vec<IPSet>,
    #[serde(default)]
    pub protections: Vec<Protection>,
    #[serde(default)]
    pub mark_rules: Vec<MarkRule>,
    #[serde(default)]
    pub vpn_peers: Vec<VpnPeer>,
    #[serde(default)]
    pub dns: DnsConfig,
    #[serde(default)]
    pub features: FeatureFlags,
    #[serde(default)]
    pub learning_mode: LearningMode,
}

impl Config {
    pub fn zone(&self, name: &str) -> Option<&Zone> {
        let canon = crate::ident::canonicalize_zone(name);
        self.zones
            .iter()
            .find(|z| crate::ident::canonicalize_zone(&z.name) == canon)
    }

    pub fn ip_set(&self, name: &str) -> Option<&IPSet> {
        self.ip_sets.iter().find(|s| s.name == name)
    }

    pub fn interfaces_in_zone<'a>(&'a self, zone_name: &'a str) -> impl Iterator<Item = &'a Interface> {
        let canon = crate::ident::canonicalize_zone(zone_name);
        self.interfaces.iter().filter(move |iface| {
            iface
                .zone
                .as_deref()
                .map(crate::ident::canonicalize_zone)
                .as_deref()
                == Some(canon.as_str())
        })
    }
}
