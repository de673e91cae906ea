//! Mangle table assembly (C7, spec.md §4.7). Built only when at least
//! one interface carries a non-zero routing-table id, a VPN peer is
//! configured, or custom mark-rules exist.

use crate::error::Result;
use crate::ident::force_quote;
use crate::model::{Config, VpnKind};
use crate::script_builder::ScriptBuilder;

const FAMILY: &str = "inet";
const TABLE: &str = "flywall_mangle";

pub fn is_needed(cfg: &Config) -> bool {
    cfg.interfaces.iter().any(|i| i.table != 0) || !cfg.vpn_peers.is_empty() || !cfg.mark_rules.is_empty()
}

pub fn compile_mangle_table(cfg: &Config) -> Result<Option<String>> {
    if !is_needed(cfg) {
        return Ok(None);
    }

    let mut b = ScriptBuilder::new(FAMILY, TABLE);
    b.add_table(Some("policy-routing marks"));
    b.add_chain("prerouting", Some("filter"), Some("prerouting"), Some(-150), Some("accept"), None);
    b.add_chain("output", Some("filter"), Some("output"), Some(-150), Some("accept"), None);

    // (a) restore meta mark from ct mark for established/related packets.
    for chain in ["prerouting", "output"] {
        b.add_rule(chain, "ct state established,related meta mark set ct mark", Some("mark-restore"));
    }

    // (b) reserved per-ingress-interface numbering.
    let mut physical_idx: u32 = 1;
    for iface in cfg.interfaces.iter().filter(|i| i.table != 0) {
        let mark = 0x0100 + physical_idx;
        physical_idx += 1;
        b.add_rule(
            "prerouting",
            &format!(
                "iifname {} meta mark set 0x{mark:04x} ct mark set meta mark",
                force_quote(&iface.name)
            ),
            Some(&format!("route-mark:{}", iface.name)),
        );
    }

    let mut wg_idx: u32 = 1;
    let mut ts_idx: u32 = 1;
    for peer in &cfg.vpn_peers {
        let mark = match peer.kind {
            VpnKind::WireGuard => {
                let m = 0x0200 + wg_idx;
                wg_idx += 1;
                m
            }
            VpnKind::Tailscale => {
                let m = 0x0220 + ts_idx;
                ts_idx += 1;
                m
            }
            VpnKind::Other => continue,
        };
        b.add_rule(
            "prerouting",
            &format!(
                "iifname {} meta mark set 0x{mark:04x} ct mark set meta mark",
                force_quote(&peer.interface)
            ),
            Some(&format!("vpn-mark:{}", peer.name)),
        );
    }

    // (c) custom mark rules.
    for rule in &cfg.mark_rules {
        let mut m = Vec::new();
        if let Some(src) = &rule.src_ip {
            m.push(format!("ip saddr {src}"));
        }
        if let Some(dst) = &rule.dest_ip {
            m.push(format!("ip daddr {dst}"));
        }
        if let Some(iface) = &rule.interface {
            m.push(format!("iifname {}", force_quote(iface)));
        }
        let prefix = if m.is_empty() { String::new() } else { format!("{} ", m.join(" ")) };
        b.add_rule(
            "prerouting",
            &format!("{prefix}meta mark set 0x{:x}", rule.mark),
            Some("custom-mark"),
        );
    }

    Ok(Some(b.build()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{Interface, MarkRule};

    #[test]
    fn not_needed_when_no_routing_vpn_or_marks() {
        let cfg = Config::default();
        assert!(!is_needed(&cfg));
        assert!(compile_mangle_table(&cfg).unwrap().is_none());
    }

    #[test]
    fn needed_when_interface_has_routing_table() {
        let mut cfg = Config::default();
        cfg.interfaces.push(Interface {
            name: "eth1".into(),
            zone: None,
            ipv4: vec![],
            ipv6: vec![],
            mtu: None,
            gateway: None,
            dhcp: false,
            table: 100,
            management: None,
            disabled: false,
            webui_port: None,
            access_web_ui: false,
        });
        assert!(is_needed(&cfg));
        let script = compile_mangle_table(&cfg).unwrap().unwrap();
        assert!(script.contains("0x0101"));
    }

    #[test]
    fn needed_when_mark_rules_present() {
        let mut cfg = Config::default();
        cfg.mark_rules.push(MarkRule {
            src_ip: Some("192.168.1.100".into()),
            dest_ip: None,
            interface: None,
            mark: 0x10,
        });
        let script = compile_mangle_table(&cfg).unwrap().unwrap();
        assert!(script.contains("ip saddr 192.168.1.100 meta mark set 0x10"));
    }
}
