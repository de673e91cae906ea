//! Rule Expression Compiler (C3): lowers a `PolicyRule` into a matcher
//! string followed by a verdict (spec.md §4.4).

use chrono::{DateTime, Utc};

use crate::error::{FirewallError, Result};
use crate::ident::{is_identifier, looks_ipv6, quote};
use crate::model::{ConnState, PolicyRule};
use crate::schedule::compile_schedule;

const DEFAULT_LOG_PREFIX: &str = "LOG: ";
const DROP_LOG_PREFIX: &str = "DROP_RULE: ";
const DROP_LOG_RATE: &str = "10/minute";

/// Compiles one rule into a complete `add rule` expression body (no
/// leading `add rule <family> <table> <chain>`, the caller/`ScriptBuilder`
/// supplies that).
pub fn compile_rule(rule: &PolicyRule, now: DateTime<Utc>) -> Result<String> {
    let mut parts: Vec<String> = Vec::new();

    if let Some(proto) = &rule.protocol {
        if proto != "any" {
            parts.push(format!("meta l4proto {proto}"));
        }
    }

    if let Some(src) = &rule.src_ip {
        parts.push(render_addr_match("saddr", src));
    }
    if let Some(dst) = &rule.dest_ip {
        parts.push(render_addr_match("daddr", dst));
    }

    if let Some(set) = &rule.src_ipset {
        validate_set_ref(set)?;
        parts.push(format!("ip saddr @{set}"));
    }
    if let Some(set) = &rule.dest_ipset {
        validate_set_ref(set)?;
        parts.push(format!("ip daddr @{set}"));
    }

    if let Some(cc) = &rule.source_country {
        parts.push(format!("ip saddr @geoip_country_{}", cc.to_ascii_lowercase()));
    }
    if let Some(cc) = &rule.dest_country {
        parts.push(format!("ip daddr @geoip_country_{}", cc.to_ascii_lowercase()));
    }

    if !rule.conn_state.is_empty() {
        parts.push(render_conn_state(&rule.conn_state)?);
    }

    let port_proto = match rule.protocol.as_deref() {
        Some(p) if p != "any" => p,
        _ => "tcp",
    };

    if let Some(port) = rule.src_port {
        parts.push(format!("{port_proto} sport {port}"));
    } else if !rule.src_ports.is_empty() {
        parts.push(format!("{port_proto} sport {{ {} }}", join_ports(&rule.src_ports)));
    }

    if let Some(port) = rule.dest_port {
        parts.push(format!("{port_proto} dport {port}"));
    } else if !rule.dest_ports.is_empty() {
        parts.push(format!("{port_proto} dport {{ {} }}", join_ports(&rule.dest_ports)));
    }

    if rule.schedule.is_set() {
        let expr = compile_schedule(
            rule.schedule.timezone.as_deref().unwrap_or("UTC"),
            rule.schedule.time_start.as_deref().unwrap_or("00:00"),
            rule.schedule.time_end.as_deref().unwrap_or("00:00"),
            &rule.schedule.days,
            now,
        )?;
        parts.push(format!("meta day . meta hour {{ {expr} }}"));
    }

    if let Some(limit) = &rule.limit {
        parts.push(format!("limit rate {limit}"));
    }

    if rule.log {
        let prefix = rule.log_prefix.as_deref().unwrap_or(DEFAULT_LOG_PREFIX);
        parts.push(format!("log group 0 prefix {}", crate::ident::force_quote(prefix)));
    }

    if matches!(rule.action, crate::model::Action::Drop | crate::model::Action::Reject) {
        parts.push(format!(
            "limit rate {DROP_LOG_RATE} log group 0 prefix {}",
            crate::ident::force_quote(DROP_LOG_PREFIX)
        ));
    }
    match rule.counter.as_ref().and_then(|c| c.name.as_deref()) {
        Some(name) => parts.push(format!("counter name {}", quote(name))),
        None => parts.push("counter".to_string()),
    }
    parts.push(rule.action.verb().to_string());

    if let Some(ident) = rule.id.as_deref().or(rule.name.as_deref()) {
        parts.push(format!("comment {}", crate::ident::force_quote(&format!("rule:{ident}"))));
    }

    Ok(parts.join(" "))
}

fn render_addr_match(direction: &str, addr: &str) -> String {
    if let Some(name) = addr.strip_prefix('@') {
        format!("ip {direction} @{name}")
    } else if looks_ipv6(addr) {
        format!("ip6 {direction} {addr}")
    } else {
        format!("ip {direction} {addr}")
    }
}

fn validate_set_ref(name: &str) -> Result<()> {
    if is_identifier(name) {
        Ok(())
    } else {
        Err(FirewallError::InvalidIdentifier(name.to_string()))
    }
}

fn render_conn_state(states: &[String]) -> Result<String> {
    let mut tokens = Vec::with_capacity(states.len());
    for s in states {
        let cs = ConnState::parse(s).ok_or_else(|| FirewallError::InvalidConnState(s.clone()))?;
        tokens.push(cs.token());
    }
    Ok(format!("ct state {}", tokens.join(",")))
}

fn join_ports(ports: &[u16]) -> String {
    ports
        .iter()
        .map(|p| p.to_string())
        .collect::<Vec<_>>()
        .join(", ")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{Action, Counter};

    fn base_rule() -> PolicyRule {
        PolicyRule::default()
    }

    #[test]
    fn protocol_and_ports_lower_correctly() {
        let mut r = base_rule();
        r.protocol = Some("tcp".into());
        r.dest_port = Some(443);
        r.action = Action::Accept;
        let out = compile_rule(&r, Utc::now()).unwrap();
        assert_eq!(out, "meta l4proto tcp tcp dport 443 counter accept");
    }

    #[test]
    fn any_protocol_defaults_port_match_to_tcp() {
        let mut r = base_rule();
        r.dest_port = Some(22);
        let out = compile_rule(&r, Utc::now()).unwrap();
        assert_eq!(out, "tcp dport 22 counter accept");
    }

    #[test]
    fn drop_action_prepends_rate_limited_log() {
        let mut r = base_rule();
        r.action = Action::Drop;
        let out = compile_rule(&r, Utc::now()).unwrap();
        assert_eq!(out, "limit rate 10/minute log group 0 prefix \"DROP_RULE: \" counter drop");
    }

    #[test]
    fn named_counter_and_identity_comment_appended_last() {
        let mut r = base_rule();
        r.id = Some("rule-42".into());
        r.counter = Some(Counter { name: Some("hits".into()) });
        let out = compile_rule(&r, Utc::now()).unwrap();
        assert_eq!(out, "counter name hits accept comment \"rule:rule-42\"");
    }

    #[test]
    fn invalid_conn_state_token_errors() {
        let mut r = base_rule();
        r.conn_state = vec!["bogus".into()];
        let err = compile_rule(&r, Utc::now());
        assert!(matches!(err, Err(FirewallError::InvalidConnState(_))));
    }

    #[test]
    fn multi_port_lists_render_as_braced_set() {
        let mut r = base_rule();
        r.protocol = Some("udp".into());
        r.dest_ports = vec![53, 67, 68];
        let out = compile_rule(&r, Utc::now()).unwrap();
        assert_eq!(out, "meta l4proto udp udp dport { 53, 67, 68 } counter accept");
    }

    #[test]
    fn geo_source_references_declared_set_name() {
        let mut r = base_rule();
        r.source_country = Some("US".into());
        let out = compile_rule(&r, Utc::now()).unwrap();
        assert_eq!(out, "ip saddr @geoip_country_us counter accept");
    }
}
