//! Identifier validation, quoting, and network-address classification (C1).
//!
//! Grounded in the textual-script contract of spec.md §6: every name that
//! ends up inside an `add ...` statement must either already be a bare
//! identifier or be quoted the way the target engine expects.

use ipnet::{IpNet, Ipv4Net};
use std::net::IpAddr;
use std::str::FromStr;
use std::sync::LazyLock;

use crate::error::{FirewallError, Result};

/// `^[A-Za-z0-9_.\-]+$`
pub fn is_identifier(s: &str) -> bool {
    !s.is_empty()
        && s.chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '.' || c == '-')
}

pub fn validate_identifier(s: &str) -> Result<()> {
    if is_identifier(s) {
        Ok(())
    } else {
        Err(FirewallError::InvalidIdentifier(s.to_string()))
    }
}

/// Renders `s` verbatim if it is a bare identifier, otherwise as a
/// double-quoted string with embedded quotes escaped.
pub fn quote(s: &str) -> String {
    if is_identifier(s) {
        s.to_string()
    } else {
        force_quote(s)
    }
}

/// Always renders `s` as a double-quoted string with embedded quotes
/// escaped. Required for elements inside a concatenated or set-typed
/// value, which must be quoted regardless of whether they'd otherwise
/// pass as a bare identifier.
pub fn force_quote(s: &str) -> String {
    let escaped = s.replace('\\', "\\\\").replace('"', "\\\"");
    format!("\"{escaped}\"")
}

/// A parsed CIDR or bare address, carrying the base address and prefix
/// length (prefix length is the address width when a bare address was
/// given).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Cidr {
    net: IpNet,
}

impl Cidr {
    pub fn parse(s: &str) -> Result<Self> {
        let net = if s.contains('/') {
            IpNet::from_str(s)
        } else {
            IpAddr::from_str(s).map(IpNet::from)
        };
        net.map(|net| Cidr { net })
            .map_err(|_| FirewallError::InvalidCidr(s.to_string()))
    }

    pub fn is_ipv6(&self) -> bool {
        matches!(self.net, IpNet::V6(_))
    }

    pub fn addr(&self) -> IpAddr {
        self.net.addr()
    }

    pub fn prefix_len(&self) -> u8 {
        self.net.prefix_len()
    }

    /// Renders the nft-compatible token: a bare address if the prefix
    /// covers the whole address width, else `addr/len`.
    pub fn render(&self) -> String {
        if self.prefix_len() == self.net.max_prefix_len() {
            self.net.addr().to_string()
        } else {
            self.net.to_string()
        }
    }

    pub fn as_ipnet(&self) -> IpNet {
        self.net
    }
}

/// Detects IPv6 CIDRs/addresses by colon presence, as spec.md §4.4
/// mandates (rather than attempting a full parse at every call site).
pub fn looks_ipv6(s: &str) -> bool {
    s.contains(':')
}

static RFC1918_NETS: LazyLock<[Ipv4Net; 3]> = LazyLock::new(|| {
    [
        Ipv4Net::from_str("10.0.0.0/8").unwrap(),
        Ipv4Net::from_str("172.16.0.0/12").unwrap(),
        Ipv4Net::from_str("192.168.0.0/16").unwrap(),
    ]
});

/// RFC1918 bogon/private ranges: `10/8`, `172.16/12`, `192.168/16`.
pub fn is_rfc1918(cidr: &Cidr) -> bool {
    match cidr.net {
        IpNet::V4(v4) => RFC1918_NETS.iter().any(|net| net.contains(&v4.addr())),
        IpNet::V6(_) => false,
    }
}

static BOGON_NETS: LazyLock<Vec<Ipv4Net>> = LazyLock::new(|| {
    [
        "0.0.0.0/8",
        "127.0.0.0/8",
        "169.254.0.0/16",
        "192.0.0.0/24",
        "192.0.2.0/24",
        "198.51.100.0/24",
        "203.0.113.0/24",
        "224.0.0.0/4",
        "240.0.0.0/4",
    ]
    .iter()
    .map(|s| Ipv4Net::from_str(s).unwrap())
    .collect()
});

/// The bogon list: `0/8, 127/8, 169.254/16, 192.0.0/24, 192.0.2/24,
/// 198.51.100/24, 203.0.113/24, 224/4, 240/4`.
pub fn bogon_nets() -> &'static [Ipv4Net] {
    &BOGON_NETS
}

pub fn is_bogon(cidr: &Cidr) -> bool {
    match cidr.net {
        IpNet::V4(v4) => BOGON_NETS.iter().any(|net| net.contains(&v4.addr())),
        IpNet::V6(_) => false,
    }
}

/// The reserved firewall-self token every router-addressed policy
/// canonicalizes to.
pub const FIREWALL_SELF: &str = "firewall";

const BRAND: &str = "flywall";

/// Lower-cases `zone` and maps `{firewall, router, self, <brand>}` to the
/// single reserved firewall-self token.
pub fn canonicalize_zone(zone: &str) -> String {
    let lower = zone.to_ascii_lowercase();
    match lower.as_str() {
        "firewall" | "router" | "self" => FIREWALL_SELF.to_string(),
        other if other == BRAND => FIREWALL_SELF.to_string(),
        _ => lower,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn identifier_accepts_allowed_charset() {
        assert!(is_identifier("lan_wan-01.v2"));
        assert!(!is_identifier("bad;set"));
        assert!(!is_identifier(""));
    }

    #[test]
    fn quote_passes_through_identifiers() {
        assert_eq!(quote("eth0"), "eth0");
        assert_eq!(quote("a b"), "\"a b\"");
        assert_eq!(force_quote("eth0"), "\"eth0\"");
    }

    #[test]
    fn quote_escapes_embedded_quotes() {
        assert_eq!(force_quote("a\"b"), "\"a\\\"b\"");
    }

    #[test]
    fn cidr_parses_bare_and_slash_forms() {
        let a = Cidr::parse("192.168.1.1").unwrap();
        assert_eq!(a.render(), "192.168.1.1");
        let b = Cidr::parse("192.168.1.0/24").unwrap();
        assert_eq!(b.render(), "192.168.1.0/24");
        assert!(Cidr::parse("not-an-ip").is_err());
    }

    #[test]
    fn rfc1918_and_bogon_classification() {
        let priv_a = Cidr::parse("10.1.2.3").unwrap();
        assert!(is_rfc1918(&priv_a));
        let pub_a = Cidr::parse("8.8.8.8").unwrap();
        assert!(!is_rfc1918(&pub_a));

        let bogon = Cidr::parse("127.0.0.1").unwrap();
        assert!(is_bogon(&bogon));
        assert!(!is_bogon(&pub_a));
    }

    #[test]
    fn zone_canonicalization_resolves_aliases() {
        assert_eq!(canonicalize_zone("Firewall"), FIREWALL_SELF);
        assert_eq!(canonicalize_zone("ROUTER"), FIREWALL_SELF);
        assert_eq!(canonicalize_zone("self"), FIREWALL_SELF);
        assert_eq!(canonicalize_zone("LAN"), "lan");
    }
}
