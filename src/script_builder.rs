//! Script Builder (C2): an append-only collector of nft object
//! declarations that serializes to one totally-ordered textual script
//! (spec.md §4.2, §6).

use std::fmt;

use crate::ident::{force_quote, quote};

const ELEMENTS_PER_SET_STATEMENT: usize = 100;

#[derive(Debug, Clone)]
struct TableDecl {
    family: String,
    name: String,
    comment: Option<String>,
}

#[derive(Debug, Clone)]
pub struct ChainSpec {
    pub name: String,
    pub base_type: Option<String>,
    pub hook: Option<String>,
    pub priority: Option<i32>,
    pub policy: Option<String>,
    pub comment: Option<String>,
}

#[derive(Debug, Clone)]
struct SetDecl {
    name: String,
    set_type: String,
    comment: Option<String>,
    size: Option<u32>,
    flags: Vec<String>,
}

#[derive(Debug, Clone)]
struct MapDecl {
    name: String,
    key_type: String,
    value_type: String,
    comment: Option<String>,
    flags: Vec<String>,
    elements: Vec<(String, String)>,
}

#[derive(Debug, Clone)]
struct FlowtableDecl {
    name: String,
    devices: Vec<String>,
    comment: Option<String>,
}

#[derive(Debug, Clone)]
struct RuleLine {
    chain: String,
    text: String,
}

/// Builds one table's worth of script (`family`/`table` are fixed at
/// construction since every object within a table shares them).
pub struct ScriptBuilder {
    family: String,
    table: String,
    table_comment: Option<String>,
    sets: Vec<SetDecl>,
    counters: Vec<(String, Option<String>)>,
    flowtables: Vec<FlowtableDecl>,
    chains: Vec<ChainSpec>,
    maps: Vec<MapDecl>,
    rules: Vec<RuleLine>,
    set_elements: Vec<(String, Vec<String>)>,
}

impl ScriptBuilder {
    pub fn new(family: impl Into<String>, table: impl Into<String>) -> Self {
        Self {
            family: family.into(),
            table: table.into(),
            table_comment: None,
            sets: Vec::new(),
            counters: Vec::new(),
            flowtables: Vec::new(),
            chains: Vec::new(),
            maps: Vec::new(),
            rules: Vec::new(),
            set_elements: Vec::new(),
        }
    }

    pub fn table(&self) -> &str {
        &self.table
    }

    pub fn add_table(&mut self, comment: Option<&str>) -> &mut Self {
        self.table_comment = comment.map(str::to_string);
        self
    }

    pub fn add_chain(
        &mut self,
        name: impl Into<String>,
        base_type: Option<&str>,
        hook: Option<&str>,
        priority: Option<i32>,
        policy: Option<&str>,
        comment: Option<&str>,
    ) -> &mut Self {
        self.chains.push(ChainSpec {
            name: name.into(),
            base_type: base_type.map(str::to_string),
            hook: hook.map(str::to_string),
            priority,
            policy: policy.map(str::to_string),
            comment: comment.map(str::to_string),
        });
        self
    }

    pub fn has_chain(&self, name: &str) -> bool {
        self.chains.iter().any(|c| c.name == name)
    }

    /// If `expr` already contains a `comment "…"` token, `comment` is
    /// ignored (the expression already carries its own).
    pub fn add_rule(&mut self, chain: impl Into<String>, expr: &str, comment: Option<&str>) -> &mut Self {
        let chain = chain.into();
        let text = if expr.contains("comment \"") {
            expr.to_string()
        } else if let Some(c) = comment {
            format!("{expr} comment {}", force_quote(c))
        } else {
            expr.to_string()
        };
        self.rules.push(RuleLine { chain, text });
        self
    }

    pub fn add_set(
        &mut self,
        name: impl Into<String>,
        set_type: impl Into<String>,
        comment: Option<&str>,
        size: Option<u32>,
        flags: &[&str],
    ) -> &mut Self {
        self.sets.push(SetDecl {
            name: name.into(),
            set_type: set_type.into(),
            comment: comment.map(str::to_string),
            size,
            flags: flags.iter().map(|s| s.to_string()).collect(),
        });
        self
    }

    pub fn has_set(&self, name: &str) -> bool {
        self.sets.iter().any(|s| s.name == name)
    }

    /// Batches additions into groups of at most 100 elements per
    /// statement (spec.md §4.2).
    pub fn add_set_elements(&mut self, name: impl Into<String>, elements: &[String]) -> &mut Self {
        let name = name.into();
        for chunk in elements.chunks(ELEMENTS_PER_SET_STATEMENT) {
            self.set_elements
                .push((name.clone(), chunk.iter().cloned().collect()));
        }
        self
    }

    pub fn add_map(
        &mut self,
        name: impl Into<String>,
        key_type: impl Into<String>,
        value_type: impl Into<String>,
        comment: Option<&str>,
        flags: &[&str],
        elements: &[(String, String)],
    ) -> &mut Self {
        self.maps.push(MapDecl {
            name: name.into(),
            key_type: key_type.into(),
            value_type: value_type.into(),
            comment: comment.map(str::to_string),
            flags: flags.iter().map(|s| s.to_string()).collect(),
            elements: elements.to_vec(),
        });
        self
    }

    pub fn add_counter(&mut self, name: impl Into<String>, comment: Option<&str>) -> &mut Self {
        self.counters.push((name.into(), comment.map(str::to_string)));
        self
    }

    pub fn has_counter(&self, name: &str) -> bool {
        self.counters.iter().any(|(n, _)| n == name)
    }

    pub fn add_flowtable(
        &mut self,
        name: impl Into<String>,
        devices: &[&str],
        comment: Option<&str>,
    ) -> &mut Self {
        self.flowtables.push(FlowtableDecl {
            name: name.into(),
            devices: devices.iter().map(|d| d.to_string()).collect(),
            comment: comment.map(str::to_string),
        });
        self
    }

    /// Serializes to one textual script in the order spec.md §4.2
    /// mandates: tables, sets, counters, flowtables, chains, per-chain
    /// flushes, maps, rules-per-chain (insertion order), free lines.
    pub fn build(&self) -> String {
        let mut out = String::new();
        let family = &self.family;
        let table = &self.table;

        out.push_str(&format!("add table {family} {table}"));
        if let Some(c) = &self.table_comment {
            out.push_str(&format!(" {{ comment {}; }}", force_quote(c)));
        }
        out.push('\n');

        for set in &self.sets {
            out.push_str(&render_set(family, table, set));
        }

        for (name, comment) in &self.counters {
            out.push_str(&format!("add counter {family} {table} {}\n", quote(name)));
            let _ = comment;
        }

        for ft in &self.flowtables {
            out.push_str(&render_flowtable(family, table, ft));
        }

        for chain in &self.chains {
            out.push_str(&render_chain(family, table, chain));
        }

        for chain in &self.chains {
            out.push_str(&format!(
                "flush chain {family} {table} {}\n",
                quote(&chain.name)
            ));
        }

        for map in &self.maps {
            out.push_str(&render_map(family, table, map));
        }

        for chain in &self.chains {
            for rule in self.rules.iter().filter(|r| r.chain == chain.name) {
                out.push_str(&format!(
                    "add rule {family} {table} {} {}\n",
                    quote(&chain.name),
                    rule.text
                ));
            }
        }

        for (name, elements) in &self.set_elements {
            let rendered: Vec<String> = elements.iter().map(|e| force_quote_if_needed(e)).collect();
            out.push_str(&format!(
                "add element {family} {table} {} {{ {} }}\n",
                quote(name),
                rendered.join(", ")
            ));
        }

        out
    }
}

/// Set elements are rendered verbatim when they are already a valid nft
/// token (CIDR, bare address, `name . value` concatenation); free-text
/// values are force-quoted.
fn force_quote_if_needed(e: &str) -> String {
    if e.chars()
        .all(|c| c.is_ascii_alphanumeric() || "./:-_@ ".contains(c))
    {
        e.to_string()
    } else {
        force_quote(e)
    }
}

fn render_set(family: &str, table: &str, set: &SetDecl) -> String {
    let mut body = format!("type {};", set.set_type);
    if !set.flags.is_empty() {
        body.push_str(&format!(" flags {};", set.flags.join(",")));
    }
    if let Some(size) = set.size {
        body.push_str(&format!(" size {size};"));
    }
    if let Some(c) = &set.comment {
        body.push_str(&format!(" comment {};", force_quote(c)));
    }
    format!(
        "add set {family} {table} {} {{ {body} }}\n",
        quote(&set.name)
    )
}

fn render_map(family: &str, table: &str, map: &MapDecl) -> String {
    let mut body = format!("type {} : {};", map.key_type, map.value_type);
    if !map.flags.is_empty() {
        body.push_str(&format!(" flags {};", map.flags.join(",")));
    }
    if let Some(c) = &map.comment {
        body.push_str(&format!(" comment {};", force_quote(c)));
    }
    if !map.elements.is_empty() {
        let elems: Vec<String> = map
            .elements
            .iter()
            .map(|(k, v)| format!("{}:{}", quote(k), quote(v)))
            .collect();
        body.push_str(&format!(" elements = {{ {} }};", elems.join(", ")));
    }
    format!(
        "add map {family} {table} {} {{ {body} }}\n",
        quote(&map.name)
    )
}

fn render_chain(family: &str, table: &str, chain: &ChainSpec) -> String {
    let name = quote(&chain.name);
    if let Some(base_type) = &chain.base_type {
        let hook = chain.hook.as_deref().unwrap_or("input");
        let priority = chain.priority.unwrap_or(0);
        let policy = chain.policy.as_deref().unwrap_or("accept");
        let comment = chain
            .comment
            .as_ref()
            .map(|c| format!(" comment {};", force_quote(c)))
            .unwrap_or_default();
        format!(
            "add chain {family} {table} {name} {{ type {base_type} hook {hook} priority {priority}; policy {policy};{comment} }}\n"
        )
    } else {
        let comment = chain
            .comment
            .as_ref()
            .map(|c| format!(" comment {};", force_quote(c)))
            .unwrap_or_default();
        format!("add chain {family} {table} {name} {{{comment} }}\n")
    }
}

fn render_flowtable(family: &str, table: &str, ft: &FlowtableDecl) -> String {
    let devices: Vec<String> = ft.devices.iter().map(|d| force_quote(d)).collect();
    let comment = ft
        .comment
        .as_ref()
        .map(|c| format!(" comment {};", force_quote(c)))
        .unwrap_or_default();
    format!(
        "add flowtable {family} {table} {} {{ hook ingress priority 0; devices = {{ {} }};{comment} }}\n",
        quote(&ft.name),
        devices.join(", ")
    )
}

impl fmt::Display for ScriptBuilder {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.build())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn declarations_precede_rules_that_reference_them() {
        let mut b = ScriptBuilder::new("inet", "flywall");
        b.add_table(None);
        b.add_chain("input", Some("filter"), Some("input"), Some(0), Some("drop"), None);
        b.add_set("blocked_ips", "ipv4_addr", None, None, &[]);
        b.add_rule("input", "ip saddr @blocked_ips drop", None);
        let script = b.build();

        let set_pos = script.find("add set").unwrap();
        let rule_pos = script.find("add rule").unwrap();
        assert!(set_pos < rule_pos);
    }

    #[test]
    fn per_chain_flush_emitted_once_in_insertion_order() {
        let mut b = ScriptBuilder::new("inet", "flywall");
        b.add_table(None);
        b.add_chain("input", None, None, None, None, None);
        b.add_chain("forward", None, None, None, None, None);
        let script = b.build();
        let flushes: Vec<&str> = script.lines().filter(|l| l.starts_with("flush chain")).collect();
        assert_eq!(flushes, vec![
            "flush chain inet flywall input",
            "flush chain inet flywall forward",
        ]);
    }

    #[test]
    fn set_elements_batch_at_100() {
        let mut b = ScriptBuilder::new("inet", "flywall");
        b.add_table(None);
        let elements: Vec<String> = (0..250).map(|i| format!("10.0.{}.0/24", i % 256)).collect();
        b.add_set_elements("s", &elements);
        let script = b.build();
        let lines: Vec<&str> = script.lines().filter(|l| l.starts_with("add element")).collect();
        assert_eq!(lines.len(), 3);
    }

    #[test]
    fn inline_comment_in_expr_suppresses_the_comment_argument() {
        let mut b = ScriptBuilder::new("inet", "flywall");
        b.add_table(None);
        b.add_chain("input", None, None, None, None, None);
        b.add_rule("input", "accept comment \"rule:x\"", Some("ignored"));
        let script = b.build();
        assert!(script.contains("accept comment \"rule:x\""));
        assert!(!script.contains("ignored"));
    }

    #[test]
    fn chain_without_base_type_is_regular() {
        let mut b = ScriptBuilder::new("inet", "flywall");
        b.add_table(None);
        b.add_chain("policy_lan_wan", None, None, None, None, None);
        let script = b.build();
        assert!(script.contains("add chain inet flywall policy_lan_wan {  }")
            || script.contains("add chain inet flywall policy_lan_wan { }"));
    }
}
