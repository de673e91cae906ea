//! NAT table assembly (C7, spec.md §4.7).

use std::collections::BTreeSet;

use crate::error::Result;
use crate::ident::force_quote;
use crate::model::{Config, NATRule, NatType};
use crate::script_builder::ScriptBuilder;

const FAMILY: &str = "inet";
const TABLE: &str = "flywall_nat";

pub fn compile_nat_table(cfg: &Config) -> Result<String> {
    let mut b = ScriptBuilder::new(FAMILY, TABLE);
    b.add_table(Some("NAT rules"));
    b.add_chain("prerouting", Some("nat"), Some("prerouting"), Some(-100), Some("accept"), None);
    b.add_chain("postrouting", Some("nat"), Some("postrouting"), Some(100), Some("accept"), None);

    let mut masqueraded_out: BTreeSet<String> = BTreeSet::new();

    for rule in &cfg.nat {
        let base_match = render_match(rule);
        match rule.kind() {
            NatType::Dnat => {
                let Some(to_ip) = &rule.to_ip else { continue };
                let target = match rule.to_port {
                    Some(p) => format!("{to_ip}:{p}"),
                    None => to_ip.clone(),
                };
                b.add_rule(
                    "prerouting",
                    &format!("{base_match}dnat to {target}"),
                    rule.description.as_deref(),
                );

                if rule.hairpin {
                    add_hairpin(&mut b, rule, &target, &mut masqueraded_out);
                }
            }
            NatType::Snat => {
                let Some(snat_ip) = &rule.snat_ip else { continue };
                b.add_rule(
                    "postrouting",
                    &format!("{base_match}snat to {snat_ip}"),
                    rule.description.as_deref(),
                );
            }
            NatType::Masquerade => {
                let out_iface = rule.out_interface.clone().unwrap_or_default();
                if masqueraded_out.insert(out_iface.clone()) {
                    b.add_rule(
                        "postrouting",
                        &format!("{base_match}masquerade"),
                        rule.description.as_deref(),
                    );
                }
            }
        }
    }

    Ok(b.build())
}

fn add_hairpin(b: &mut ScriptBuilder, rule: &NATRule, target: &str, masqueraded_out: &mut BTreeSet<String>) {
    if let Some(in_iface) = &rule.in_interface {
        let mut m = format!("iifname != {} ", force_quote(in_iface));
        if let Some(dest) = &rule.dest_ip {
            m.push_str(&format!("ip daddr {dest} "));
        }
        if let Some(port) = rule.dest_port {
            let proto = rule.protocol.as_deref().unwrap_or("tcp");
            m.push_str(&format!("{proto} dport {port} "));
        }
        b.add_rule(
            "prerouting",
            &format!("{m}dnat to {target}"),
            rule.description.as_deref().map(|d| format!("hairpin:{d}")).as_deref(),
        );

        let key = format!("hairpin:{in_iface}");
        if masqueraded_out.insert(key) {
            b.add_rule(
                "postrouting",
                &format!("oifname {} masquerade", force_quote(in_iface)),
                Some("hairpin-masquerade"),
            );
        }
    }
}

fn render_match(rule: &NATRule) -> String {
    let mut parts = Vec::new();
    if let Some(iface) = &rule.in_interface {
        parts.push(format!("iifname {}", force_quote(iface)));
    }
    if let Some(iface) = &rule.out_interface {
        parts.push(format!("oifname {}", force_quote(iface)));
    }
    if let Some(proto) = &rule.protocol {
        parts.push(format!("meta l4proto {proto}"));
    }
    if let Some(src) = &rule.src_ip {
        parts.push(format!("ip saddr {src}"));
    }
    if let Some(dst) = &rule.dest_ip {
        parts.push(format!("ip daddr {dst}"));
    }
    if let Some(port) = rule.dest_port {
        let proto = rule.protocol.as_deref().unwrap_or("tcp");
        parts.push(format!("{proto} dport {port}"));
    }
    if parts.is_empty() {
        String::new()
    } else {
        format!("{} ", parts.join(" "))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::NATRule;

    #[test]
    fn masquerade_deduplicates_per_out_interface() {
        let mut cfg = Config::default();
        cfg.nat = vec![
            NATRule {
                kind: Some(NatType::Masquerade),
                out_interface: Some("eth0".into()),
                ..Default::default()
            },
            NATRule {
                kind: Some(NatType::Masquerade),
                out_interface: Some("eth0".into()),
                ..Default::default()
            },
        ];
        let script = compile_nat_table(&cfg).unwrap();
        assert_eq!(script.matches("masquerade").count(), 1);
    }

    #[test]
    fn dnat_rule_renders_destination_and_port() {
        let mut cfg = Config::default();
        cfg.nat = vec![NATRule {
            kind: Some(NatType::Dnat),
            in_interface: Some("wan0".into()),
            dest_port: Some(8080),
            to_ip: Some("192.168.1.10".into()),
            to_port: Some(80),
            protocol: Some("tcp".into()),
            ..Default::default()
        }];
        let script = compile_nat_table(&cfg).unwrap();
        assert!(script.contains("dnat to 192.168.1.10:80"));
    }
}
