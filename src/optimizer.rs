//! Rule Optimiser (C10): groups same-chain rules differing only in
//! `saddr` into a synthesized set when the group is large enough and
//! carries no advanced matchers (spec.md §4.2).

use std::collections::BTreeMap;
use std::net::Ipv4Addr;
use std::str::FromStr;

use crate::model::PolicyRule;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum OptLevel {
    Disabled,
    Grouping,
    MergeAdjacent,
}

impl OptLevel {
    pub fn from_u8(n: u8) -> Self {
        match n {
            0 => OptLevel::Disabled,
            1 => OptLevel::Grouping,
            _ => OptLevel::MergeAdjacent,
        }
    }
}

/// A set the optimiser wants declared and populated ahead of the rule
/// that references it.
pub struct SynthesizedSet {
    pub name: String,
    pub elements: Vec<String>,
}

/// Rules eligible for set-folding carry only `action`/`protocol`/
/// `dest_port`/`src_ip` plus optional counter/log — anything else is an
/// "advanced matcher" that disqualifies the whole group.
fn is_poolable(rule: &PolicyRule) -> bool {
    rule.src_ip.is_some()
        && rule.dest_ip.is_none()
        && rule.src_ipset.is_none()
        && rule.dest_ipset.is_none()
        && rule.source_country.is_none()
        && rule.dest_country.is_none()
        && rule.conn_state.is_empty()
        && rule.src_port.is_none()
        && rule.src_ports.is_empty()
        && rule.dest_ports.is_empty()
        && rule.tcp_flags.is_none()
        && !rule.schedule.is_set()
        && rule.limit.is_none()
        && !rule.disabled
}

#[derive(PartialEq, Eq, PartialOrd, Ord)]
struct GroupKey {
    action: &'static str,
    protocol: Option<String>,
    dest_port: Option<u16>,
}

fn group_key(rule: &PolicyRule) -> GroupKey {
    GroupKey {
        action: rule.action.verb(),
        protocol: rule.protocol.clone(),
        dest_port: rule.dest_port,
    }
}

/// Replaces poolable rule runs of 3+ unique source IPs with one
/// `opt_src_N`-backed rule each; non-poolable or small groups pass
/// through unchanged, in original order. Returns the rewritten rule list
/// alongside the sets that must be declared/populated before it.
pub fn optimize_rules(
    rules: &[PolicyRule],
    level: OptLevel,
    set_name_seed: &str,
) -> (Vec<PolicyRule>, Vec<SynthesizedSet>) {
    if level == OptLevel::Disabled {
        return (rules.to_vec(), Vec::new());
    }

    let mut groups: BTreeMap<GroupKey, Vec<usize>> = BTreeMap::new();
    for (i, rule) in rules.iter().enumerate() {
        if is_poolable(rule) {
            groups.entry(group_key(rule)).or_default().push(i);
        }
    }

    let mut folded_indices = std::collections::HashSet::new();
    let mut sets = Vec::new();
    let mut replacements: BTreeMap<usize, PolicyRule> = BTreeMap::new();

    for (n, (key, idxs)) in groups.into_iter().enumerate() {
        let mut addrs: Vec<String> = idxs
            .iter()
            .filter_map(|&i| rules[i].src_ip.clone())
            .collect();
        addrs.sort();
        addrs.dedup();
        if addrs.len() < 3 {
            continue;
        }

        let elements = if level == OptLevel::MergeAdjacent {
            merge_adjacent_ipv4(&addrs)
        } else {
            addrs.clone()
        };

        let set_name = format!("opt_src_{set_name_seed}_{n}");
        sets.push(SynthesizedSet {
            name: set_name.clone(),
            elements,
        });

        let first = idxs[0];
        let mut synthesized = rules[first].clone();
        synthesized.src_ip = None;
        synthesized.src_ipset = Some(set_name);
        synthesized.protocol = key.protocol;
        synthesized.dest_port = key.dest_port;
        replacements.insert(first, synthesized);

        for &i in &idxs {
            folded_indices.insert(i);
        }
        folded_indices.remove(&first);
    }

    let mut out = Vec::with_capacity(rules.len());
    for (i, rule) in rules.iter().enumerate() {
        if let Some(replacement) = replacements.remove(&i) {
            out.push(replacement);
        } else if folded_indices.contains(&i) {
            continue;
        } else {
            out.push(rule.clone());
        }
    }
    (out, sets)
}

/// Summarizes a sorted, deduplicated list of dotted-quad addresses into
/// the smallest set of CIDRs covering exactly those addresses, merging
/// power-of-two-aligned adjacent pairs bottom-up. Addresses that cannot
/// be paired are emitted as bare `/32`s.
fn merge_adjacent_ipv4(addrs: &[String]) -> Vec<String> {
    let mut nums: Vec<(u32, u8)> = addrs
        .iter()
        .filter_map(|a| Ipv4Addr::from_str(a).ok())
        .map(|a| (u32::from(a), 32u8))
        .collect();
    nums.sort_unstable();

    loop {
        let mut merged = Vec::with_capacity(nums.len());
        let mut i = 0;
        let mut changed = false;
        while i < nums.len() {
            if i + 1 < nums.len() {
                let (a, pa) = nums[i];
                let (b, pb) = nums[i + 1];
                if pa == pb && pa > 0 {
                    let block = 1u32 << (32 - pa);
                    if a % (block * 2) == 0 && b == a + block {
                        merged.push((a, pa - 1));
                        i += 2;
                        changed = true;
                        continue;
                    }
                }
            }
            merged.push(nums[i]);
            i += 1;
        }
        nums = merged;
        if !changed {
            break;
        }
    }

    nums.iter()
        .map(|(addr, prefix)| {
            let ip = Ipv4Addr::from(*addr);
            if *prefix == 32 {
                ip.to_string()
            } else {
                format!("{ip}/{prefix}")
            }
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::Action;

    fn rule_with_src(ip: &str) -> PolicyRule {
        let mut r = PolicyRule::default();
        r.src_ip = Some(ip.to_string());
        r.action = Action::Drop;
        r
    }

    #[test]
    fn folds_three_or_more_unique_sources_into_one_set_rule() {
        let rules = vec![
            rule_with_src("1.1.1.1"),
            rule_with_src("2.2.2.2"),
            rule_with_src("3.3.3.3"),
        ];
        let (out, sets) = optimize_rules(&rules, OptLevel::Grouping, "input");
        assert_eq!(out.len(), 1);
        assert_eq!(sets.len(), 1);
        assert_eq!(out[0].src_ipset.as_deref(), Some(sets[0].name.as_str()));
        assert_eq!(sets[0].elements.len(), 3);
    }

    #[test]
    fn leaves_groups_of_two_or_fewer_untouched() {
        let rules = vec![rule_with_src("1.1.1.1"), rule_with_src("2.2.2.2")];
        let (out, sets) = optimize_rules(&rules, OptLevel::Grouping, "input");
        assert_eq!(out.len(), 2);
        assert!(sets.is_empty());
    }

    #[test]
    fn advanced_matcher_disqualifies_pooling() {
        let mut r = rule_with_src("1.1.1.1");
        r.dest_ip = Some("10.0.0.1".into());
        let rules = vec![r, rule_with_src("2.2.2.2"), rule_with_src("3.3.3.3")];
        let (out, sets) = optimize_rules(&rules, OptLevel::Grouping, "input");
        assert_eq!(out.len(), 3);
        assert!(sets.is_empty());
    }

    #[test]
    fn disabled_level_is_a_no_op() {
        let rules = vec![
            rule_with_src("1.1.1.1"),
            rule_with_src("2.2.2.2"),
            rule_with_src("3.3.3.3"),
        ];
        let (out, sets) = optimize_rules(&rules, OptLevel::Disabled, "input");
        assert_eq!(out.len(), 3);
        assert!(sets.is_empty());
    }

    #[test]
    fn level_2_merges_power_of_two_aligned_pairs() {
        let addrs = vec!["10.0.0.0".to_string(), "10.0.0.1".to_string(), "10.0.0.5".to_string()];
        let merged = merge_adjacent_ipv4(&addrs);
        assert!(merged.contains(&"10.0.0.0/31".to_string()));
        assert!(merged.contains(&"10.0.0.5".to_string()));
    }
}
