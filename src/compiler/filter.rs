//! Filter table assembly (C7, spec.md §4.7 steps 1-19).

use std::collections::{BTreeMap, BTreeSet};

use chrono::{DateTime, Utc};

use crate::error::{FirewallError, Result};
use crate::ident::{bogon_nets, canonicalize_zone, force_quote, validate_identifier, FIREWALL_SELF};
use crate::model::{Action, Config, IpSetType, LearningMode, PolicyRule};
use crate::optimizer::{optimize_rules, OptLevel};
use crate::rule_expr::compile_rule;
use crate::script_builder::ScriptBuilder;

const FAMILY: &str = "inet";
const TABLE: &str = "flywall";

pub struct FilterCompileInputs<'a> {
    pub cfg: &'a Config,
    pub apply_count: u64,
    pub config_hash: &'a str,
    pub now: DateTime<Utc>,
    pub opt_level: OptLevel,
}

pub fn compile_filter_table(inputs: &FilterCompileInputs) -> Result<String> {
    let cfg = inputs.cfg;
    let mut b = ScriptBuilder::new(FAMILY, TABLE);

    // 1. table with metadata comment.
    b.add_table(Some(&format!(
        "apply_count={} config_hash={}",
        inputs.apply_count, inputs.config_hash
    )));

    // 2. flowtable, if flow offload is enabled.
    if cfg.features.enable_flow_offload {
        let devices: Vec<&str> = cfg.interfaces.iter().map(|i| i.name.as_str()).collect();
        b.add_flowtable("ft_fastpath", &devices, Some("fast-path offload"));
    }

    // 3. protection chain at prerouting, very negative priority.
    add_protection_chain(&mut b, cfg);

    // 4. geoip sets, scanned from every enabled rule.
    let countries = collect_country_codes(cfg);
    for cc in &countries {
        b.add_set(
            format!("geoip_country_{}", cc.to_ascii_lowercase()),
            "ipv4_addr",
            Some(&format!("geoip country {cc}")),
            None,
            &["interval"],
        );
    }

    // 5. IPSets.
    for set in &cfg.ip_sets {
        set.validate_source_exclusivity()?;
        let interval = set.entries.iter().any(|e| e.contains('/') || e.contains('-'));
        let mut flags: Vec<&str> = Vec::new();
        if interval {
            flags.push("interval");
        }
        b.add_set(
            &set.name,
            set.set_type().nft_type(),
            Some(&format!("[ipset:{}]", set.name)),
            set.size,
            &flags,
        );
        if !set.set_type().is_dynamic_family() {
            b.add_set_elements(&set.name, &set.entries);
        }
    }

    // 6. DNS egress-filter allowlists.
    if cfg.dns.egress_filter {
        b.add_set("dns_allowed_v4", "ipv4_addr", Some("DNS-discovered egress allowlist"), None, &["timeout"]);
        b.add_set("dns_allowed_v6", "ipv6_addr", Some("DNS-discovered egress allowlist"), None, &["timeout"]);
    }

    // 7. ad-hoc blocked_ips set.
    b.add_set("blocked_ips", "ipv4_addr", Some("ad-hoc blocklist"), None, &["interval"]);

    // 8. base chains + mark_prerouting placeholder.
    b.add_chain("input", Some("filter"), Some("input"), Some(0), Some("drop"), None);
    b.add_chain("forward", Some("filter"), Some("forward"), Some(0), Some("drop"), None);
    b.add_chain("output", Some("filter"), Some("output"), Some(0), Some("drop"), None);
    b.add_chain(
        "mark_prerouting",
        Some("filter"),
        Some("prerouting"),
        Some(-150),
        Some("accept"),
        Some("mark placeholder, mirrored by the mangle table when present"),
    );

    // 9. stats chain.
    add_stats_chain(&mut b);

    // 10. base rules per chain.
    add_base_rules(&mut b);

    // 11. VPN lockout-protection, precedes any drop dispatch.
    for peer in &cfg.vpn_peers {
        if !peer.management_access {
            continue;
        }
        let iface = force_quote(&peer.interface);
        b.add_rule("input", &format!("iifname {iface} accept"), Some(&format!("vpn-lockout:{}", peer.name)));
        b.add_rule("output", &format!("oifname {iface} accept"), Some(&format!("vpn-lockout:{}", peer.name)));
        b.add_rule("forward", &format!("iifname {iface} accept"), Some(&format!("vpn-lockout:{}", peer.name)));
    }

    // 12. optional MSS clamping / flowtable fast-path in forward.
    if cfg.features.mss_clamping {
        b.add_rule(
            "forward",
            "tcp flags syn tcp option maxseg size set rt mtu",
            Some("mss-clamp"),
        );
    }
    if cfg.features.enable_flow_offload {
        b.add_rule("forward", "ip protocol { tcp, udp } flow add @ft_fastpath", Some("flow-offload"));
    }

    // 13. ICMP / ICMPv6 / IPv6 ND.
    b.add_rule("input", "meta l4proto icmp accept", Some("icmp"));
    b.add_rule(
        "input",
        "meta l4proto icmpv6 icmpv6 type { nd-neighbor-solicit, nd-neighbor-advert, nd-router-solicit, nd-router-advert } accept",
        Some("icmpv6-nd"),
    );

    // 14. service allowlists, consolidated into at most 3 rules.
    add_service_allowlists(&mut b, cfg);

    // 15. per-IPSet autoblock rules.
    for set in &cfg.ip_sets {
        let Some(action) = set.action else { continue };
        add_ipset_autoblock_rules(&mut b, set, action, &set.apply_to());
    }

    // 16-17. policy aggregation, compiled rules, terminal rule.
    let aggregated = aggregate_policies(cfg)?;
    for policy in &aggregated {
        let chain_name = format!("policy_{}_{}", policy.from, policy.to);
        validate_identifier(&chain_name)?;
        b.add_chain(&chain_name, None, None, None, None, None);

        let (optimized, synthesized_sets) = optimize_rules(&policy.rules, inputs.opt_level, &chain_name);
        for set in &synthesized_sets {
            b.add_set(&set.name, "ipv4_addr", Some("optimizer-synthesized"), None, &["interval"]);
            b.add_set_elements(&set.name, &set.elements);
        }
        for rule in optimized.iter().filter(|r| !r.disabled) {
            let expr = compile_rule(rule, inputs.now)?;
            b.add_rule(&chain_name, &expr, None);
        }

        let terminal = match policy.action {
            Action::Accept => "counter accept".to_string(),
            Action::Drop => "limit rate 10/minute log group 0 prefix \"DROP_RULE: \" counter drop".to_string(),
            Action::Reject => "limit rate 10/minute log group 0 prefix \"DROP_RULE: \" counter reject".to_string(),
        };
        b.add_rule(&chain_name, &terminal, Some(&format!("policy-terminal:{chain_name}")));
    }

    // 18. verdict-map dispatch.
    add_verdict_maps(&mut b, cfg, &aggregated)?;

    // 19. learning-mode terminal rules.
    add_learning_terminal(&mut b, cfg.learning_mode);

    Ok(b.build())
}

fn add_protection_chain(b: &mut ScriptBuilder, cfg: &Config) {
    b.add_chain(
        "protection",
        Some("filter"),
        Some("prerouting"),
        Some(-300),
        Some("accept"),
        Some("anti-spoofing, bogon, and flood protections"),
    );

    for p in &cfg.protections {
        if !p.enabled {
            continue;
        }
        let iface_match = if p.applies_to_all() {
            String::new()
        } else {
            format!("iifname {} ", force_quote(&p.interface))
        };

        if p.invalid_packets {
            b.add_rule("protection", &format!("{iface_match}ct state invalid drop"), Some("invalid-drop"));
        }
        if p.anti_spoofing {
            b.add_rule(
                "protection",
                &format!("{iface_match}ip saddr {{ 10.0.0.0/8, 172.16.0.0/12, 192.168.0.0/16 }} ip saddr != {{ 10.0.0.0/8, 172.16.0.0/12, 192.168.0.0/16 }} drop"),
                Some("anti-spoofing"),
            );
        }
        if p.bogon_filtering {
            let nets: Vec<String> = bogon_nets().iter().map(|n| n.to_string()).collect();
            b.add_rule(
                "protection",
                &format!("{iface_match}ip saddr {{ {} }} drop", nets.join(", ")),
                Some("bogon-filter"),
            );
        }
        if p.syn_flood_protection {
            let rate = p.syn_flood_rate.map(|r| r.to_string()).unwrap_or_else(|| "20/second".to_string());
            let burst = p.syn_flood_burst.map(|b| format!(" burst {b} packets")).unwrap_or_default();
            b.add_rule(
                "protection",
                &format!("{iface_match}tcp flags & (fin|syn|rst|ack) == syn limit rate {rate}{burst}"),
                Some("syn-flood-allow"),
            );
            b.add_rule(
                "protection",
                &format!("{iface_match}tcp flags & (fin|syn|rst|ack) == syn limit rate {DROP_LOG_RATE} log group 0 prefix \"SYNFLOOD: \" drop"),
                Some("syn-flood-drop"),
            );
        }
        if p.icmp_rate_limit {
            let rate = p.icmp_rate.map(|r| r.to_string()).unwrap_or_else(|| "10/second".to_string());
            b.add_rule("protection", &format!("{iface_match}meta l4proto icmp limit rate {rate} accept"), Some("icmp-rate-allow"));
            b.add_rule(
                "protection",
                &format!("{iface_match}meta l4proto icmp limit rate {DROP_LOG_RATE} log group 0 prefix \"ICMPFLOOD: \" drop"),
                Some("icmp-rate-drop"),
            );
        }
    }
}

const DROP_LOG_RATE: &str = "10/minute";

fn add_stats_chain(b: &mut ScriptBuilder) {
    b.add_chain("flywall_stats", None, None, None, None, Some("per-protocol packet counters"));
    b.add_counter("flywall_syn", None);
    b.add_counter("flywall_rst", None);
    b.add_counter("flywall_fin", None);
    b.add_counter("flywall_udp", None);
    b.add_counter("flywall_icmp", None);
    b.add_rule("flywall_stats", "tcp flags & (fin|syn|rst|ack) == syn counter name flywall_syn", None);
    b.add_rule("flywall_stats", "tcp flags & (fin|syn|rst|ack) == rst counter name flywall_rst", None);
    b.add_rule("flywall_stats", "tcp flags & (fin|syn|rst|ack) == fin counter name flywall_fin", None);
    b.add_rule("flywall_stats", "meta l4proto udp counter name flywall_udp", None);
    b.add_rule("flywall_stats", "meta l4proto icmp counter name flywall_icmp", None);
}

fn add_base_rules(b: &mut ScriptBuilder) {
    for chain in ["input", "forward", "output"] {
        b.add_rule(chain, "iifname \"lo\" accept", Some("loopback"));
    }
    for chain in ["input", "forward"] {
        b.add_rule(chain, "jump flywall_stats", Some("stats"));
        b.add_rule(chain, "ip saddr @blocked_ips drop", Some("blocked-ips"));
        b.add_rule(chain, "ct state established,related accept", Some("established"));
        b.add_rule(
            chain,
            &format!("ct state invalid limit rate {DROP_LOG_RATE} log group 0 prefix \"INVALID: \" drop"),
            Some("invalid-drop"),
        );
        b.add_rule(chain, "ct state new log group 1", Some("new-conn-discovery"));
    }
}

fn add_service_allowlists(b: &mut ScriptBuilder, cfg: &Config) {
    let mut tcp_elems: BTreeSet<(String, u16)> = BTreeSet::new();
    let mut udp_elems: BTreeSet<(String, u16)> = BTreeSet::new();
    let mut icmp_ifaces: BTreeSet<String> = BTreeSet::new();

    for iface in &cfg.interfaces {
        if iface.disabled {
            continue;
        }
        let mgmt = iface.effective_management();
        for port in mgmt.tcp_ports(iface.webui_port) {
            tcp_elems.insert((iface.name.clone(), port));
        }
        if mgmt.icmp {
            icmp_ifaces.insert(iface.name.clone());
        }

        let services = iface.zone.as_deref().and_then(|z| cfg.zone(z)).map(|z| &z.services);
        if let Some(services) = services {
            if services.dhcp {
                udp_elems.insert((iface.name.clone(), 67));
                udp_elems.insert((iface.name.clone(), 68));
            }
            if services.dns {
                udp_elems.insert((iface.name.clone(), 53));
            }
            if services.ntp {
                udp_elems.insert((iface.name.clone(), 123));
            }
            for port in &services.custom_ports {
                udp_elems.insert((iface.name.clone(), *port));
            }
        }
    }

    if !tcp_elems.is_empty() {
        let elems: Vec<String> = tcp_elems
            .iter()
            .map(|(iface, port)| format!("{} . {port}", force_quote(iface)))
            .collect();
        b.add_rule("input", &format!("iifname . tcp dport {{ {} }} accept", elems.join(", ")), Some("mgmt-tcp-allow"));
    }
    if !udp_elems.is_empty() {
        let elems: Vec<String> = udp_elems
            .iter()
            .map(|(iface, port)| format!("{} . {port}", force_quote(iface)))
            .collect();
        b.add_rule("input", &format!("iifname . udp dport {{ {} }} accept", elems.join(", ")), Some("svc-udp-allow"));
    }
    if !icmp_ifaces.is_empty() {
        let elems: Vec<String> = icmp_ifaces.iter().map(|i| force_quote(i)).collect();
        b.add_rule(
            "input",
            &format!("iifname {{ {} }} meta l4proto icmp accept", elems.join(", ")),
            Some("mgmt-icmp-allow"),
        );
    }
}

fn add_ipset_autoblock_rules(
    b: &mut ScriptBuilder,
    set: &crate::model::IPSet,
    action: crate::model::SetAction,
    apply_to: &crate::model::ApplyTo,
) {
    let family = if set.set_type() == IpSetType::Ipv6Addr { "ip6" } else { "ip" };
    let verb = match action {
        crate::model::SetAction::Accept => "accept",
        crate::model::SetAction::Drop => "drop",
        crate::model::SetAction::Reject => "reject",
    };

    let mut matches = Vec::new();
    if set.match_on_source || (!set.match_on_source && !set.match_on_dest) {
        matches.push(format!("{family} saddr @{}", set.name));
    }
    if set.match_on_dest {
        matches.push(format!("{family} daddr @{}", set.name));
    }

    let chains: &[&str] = match apply_to {
        crate::model::ApplyTo::Input => &["input"],
        crate::model::ApplyTo::Forward => &["forward"],
        crate::model::ApplyTo::Both => &["input", "forward"],
    };

    for chain in chains {
        for m in &matches {
            b.add_rule(chain, &format!("{m} {verb}"), Some(&format!("ipset-autoblock:{}", set.name)));
        }
    }
}

struct AggregatedPolicy {
    from: String,
    to: String,
    action: Action,
    rules: Vec<PolicyRule>,
}

fn aggregate_policies(cfg: &Config) -> Result<Vec<AggregatedPolicy>> {
    let mut groups: BTreeMap<(String, String), (Action, Vec<PolicyRule>, bool)> = BTreeMap::new();

    for policy in cfg.policies.iter().filter(|p| !p.disabled) {
        validate_zone_ref(cfg, &policy.from)?;
        validate_zone_ref(cfg, &policy.to)?;
        let key = (canonicalize_zone(&policy.from), canonicalize_zone(&policy.to));
        let entry = groups.entry(key).or_insert((Action::Accept, Vec::new(), false));
        entry.1.extend(policy.rules.clone());
        entry.0 = policy.action;
        entry.2 = true;
    }

    for zone in &cfg.zones {
        let key = (FIREWALL_SELF.to_string(), canonicalize_zone(&zone.name));
        groups.entry(key).or_insert((Action::Accept, Vec::new(), true));
    }

    Ok(groups
        .into_iter()
        .map(|((from, to), (action, rules, _))| AggregatedPolicy { from, to, action, rules })
        .collect())
}

fn validate_zone_ref(cfg: &Config, zone: &str) -> Result<()> {
    let canon = canonicalize_zone(zone);
    if canon == FIREWALL_SELF || cfg.zone(zone).is_some() {
        Ok(())
    } else {
        Err(FirewallError::UnknownZone(zone.to_string()))
    }
}

fn add_verdict_maps(b: &mut ScriptBuilder, cfg: &Config, aggregated: &[AggregatedPolicy]) -> Result<()> {
    let mut input_vmap: BTreeMap<String, String> = BTreeMap::new();
    let mut output_vmap: BTreeMap<String, String> = BTreeMap::new();
    let mut forward_vmap: BTreeMap<(String, String), String> = BTreeMap::new();

    for policy in aggregated {
        let chain = format!("policy_{}_{}", policy.from, policy.to);
        for dst_iface in cfg.interfaces_in_zone(&policy.to) {
            if policy.from == FIREWALL_SELF {
                output_vmap.entry(dst_iface.name.clone()).or_insert_with(|| chain.clone());
            }
        }
        for src_iface in cfg.interfaces_in_zone(&policy.from) {
            if policy.to == FIREWALL_SELF {
                input_vmap.entry(src_iface.name.clone()).or_insert_with(|| chain.clone());
            }
            for dst_iface in cfg.interfaces_in_zone(&policy.to) {
                forward_vmap
                    .entry((src_iface.name.clone(), dst_iface.name.clone()))
                    .or_insert_with(|| chain.clone());
            }
        }
    }

    if !input_vmap.is_empty() {
        let elems: Vec<(String, String)> = input_vmap
            .into_iter()
            .map(|(k, v)| (k, format!("jump {v}")))
            .collect();
        b.add_map("input_vmap", "ifname", "verdict", Some("input dispatch"), &[], &elems);
        b.add_rule("input", "iifname vmap @input_vmap", Some("input-dispatch"));
    }
    if !output_vmap.is_empty() {
        let elems: Vec<(String, String)> = output_vmap
            .into_iter()
            .map(|(k, v)| (k, format!("jump {v}")))
            .collect();
        b.add_map("output_vmap", "ifname", "verdict", Some("output dispatch"), &[], &elems);
        b.add_rule("output", "oifname vmap @output_vmap", Some("output-dispatch"));
    }
    if !forward_vmap.is_empty() {
        let elems: Vec<(String, String)> = forward_vmap
            .into_iter()
            .map(|((src, dst), v)| (format!("{} . {}", force_quote(&src), force_quote(&dst)), format!("jump {v}")))
            .collect();
        b.add_map("forward_vmap", "ifname . ifname", "verdict", Some("forward dispatch"), &[], &elems);
        b.add_rule("forward", "meta iifname . meta oifname vmap @forward_vmap", Some("forward-dispatch"));
    }

    Ok(())
}

fn add_learning_terminal(b: &mut ScriptBuilder, mode: LearningMode) {
    match mode {
        LearningMode::Inline => {
            for chain in ["input", "forward"] {
                b.add_rule(chain, "ct mark 0x0001 accept", Some("offload-fastpath"));
                b.add_rule(chain, "queue num 0 bypass", Some("learning-inline"));
            }
        }
        LearningMode::Off | LearningMode::Passive => {
            for chain in ["input", "forward"] {
                b.add_rule(
                    chain,
                    &format!("limit rate {DROP_LOG_RATE} log group 1 prefix \"NFLOG: \" drop"),
                    Some("default-terminal"),
                );
            }
        }
    }
}

fn collect_country_codes(cfg: &Config) -> BTreeSet<String> {
    let mut out = BTreeSet::new();
    for policy in &cfg.policies {
        for rule in &policy.rules {
            if let Some(cc) = &rule.source_country {
                out.insert(cc.to_ascii_uppercase());
            }
            if let Some(cc) = &rule.dest_country {
                out.insert(cc.to_ascii_uppercase());
            }
        }
    }
    out
}
