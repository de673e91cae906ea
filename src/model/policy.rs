use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum Action {
    #[default]
    Accept,
    Drop,
    Reject,
}

impl Action {
    pub fn verb(self) -> &'static str {
        match self {
            Action::Accept => "accept",
            Action::Drop => "drop",
            Action::Reject => "reject",
        }
    }
}

/// `{new,established,related,invalid,untracked}`, the closed set spec.md
/// §4.4 validates `conn_state` tokens against.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum ConnState {
    New,
    Established,
    Related,
    Invalid,
    Untracked,
}

impl ConnState {
    pub fn parse(token: &str) -> Option<Self> {
        match token.trim().to_ascii_lowercase().as_str() {
            "new" => Some(ConnState::New),
            "established" => Some(ConnState::Established),
            "related" => Some(ConnState::Related),
            "invalid" => Some(ConnState::Invalid),
            "untracked" => Some(ConnState::Untracked),
            _ => None,
        }
    }

    pub fn token(self) -> &'static str {
        match self {
            ConnState::New => "new",
            ConnState::Established => "established",
            ConnState::Related => "related",
            ConnState::Invalid => "invalid",
            ConnState::Untracked => "untracked",
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum Weekday {
    Mon,
    Tue,
    Wed,
    Thu,
    Fri,
    Sat,
    Sun,
}

impl Weekday {
    /// `0=Sun..6=Sat`, matching `chrono::Weekday::num_days_from_sunday`.
    pub fn num_days_from_sunday(self) -> u32 {
        match self {
            Weekday::Sun => 0,
            Weekday::Mon => 1,
            Weekday::Tue => 2,
            Weekday::Wed => 3,
            Weekday::Thu => 4,
            Weekday::Fri => 5,
            Weekday::Sat => 6,
        }
    }

    pub fn from_chrono(w: chrono::Weekday) -> Self {
        match w {
            chrono::Weekday::Mon => Weekday::Mon,
            chrono::Weekday::Tue => Weekday::Tue,
            chrono::Weekday::Wed => Weekday::Wed,
            chrono::Weekday::Thu => Weekday::Thu,
            chrono::Weekday::Fri => Weekday::Fri,
            chrono::Weekday::Sat => Weekday::Sat,
            chrono::Weekday::Sun => Weekday::Sun,
        }
    }

    pub fn to_chrono(self) -> chrono::Weekday {
        match self {
            Weekday::Mon => chrono::Weekday::Mon,
            Weekday::Tue => chrono::Weekday::Tue,
            Weekday::Wed => chrono::Weekday::Wed,
            Weekday::Thu => chrono::Weekday::Thu,
            Weekday::Fri => chrono::Weekday::Fri,
            Weekday::Sat => chrono::Weekday::Sat,
            Weekday::Sun => chrono::Weekday::Sun,
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct Counter {
    /// `None` => bare `counter`; `Some(name)` => `counter name <name>`.
    pub name: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct Schedule {
    pub time_start: Option<String>,
    pub time_end: Option<String>,
    #[serde(default)]
    pub days: Vec<Weekday>,
    pub timezone: Option<String>,
}

impl Schedule {
    pub fn is_set(&self) -> bool {
        self.time_start.is_some() || self.time_end.is_some() || !self.days.is_empty()
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct PolicyRule {
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub id: Option<String>,
    #[serde(default)]
    pub protocol: Option<String>,
    #[serde(default)]
    pub src_ip: Option<String>,
    #[serde(default)]
    pub dest_ip: Option<String>,
    #[serde(default)]
    pub src_ipset: Option<String>,
    #[serde(default)]
    pub dest_ipset: Option<String>,
    #[serde(default)]
    pub source_country: Option<String>,
    #[serde(default)]
    pub dest_country: Option<String>,
    #[serde(default)]
    pub conn_state: Vec<String>,
    #[serde(default)]
    pub src_port: Option<u16>,
    #[serde(default)]
    pub dest_port: Option<u16>,
    #[serde(default)]
    pub src_ports: Vec<u16>,
    #[serde(default)]
    pub dest_ports: Vec<u16>,
    #[serde(default)]
    pub tcp_flags: Option<String>,
    #[serde(default, flatten)]
    pub schedule: Schedule,
    #[serde(default)]
    pub limit: Option<String>,
    #[serde(default)]
    pub log: bool,
    #[serde(default)]
    pub log_prefix: Option<String>,
    #[serde(default)]
    pub counter: Option<Counter>,
    #[serde(default)]
    pub action: Action,
    #[serde(default)]
    pub disabled: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Policy {
    pub from: String,
    pub to: String,
    #[serde(default)]
    pub action: Action,
    #[serde(default)]
    pub rules: Vec<PolicyRule>,
    #[serde(default)]
    pub disabled: bool,
    #[serde(default)]
    pub masquerade: Option<bool>,
    /// Optional explicit name scheduled-rule overlays address this policy
    /// by; defaults to `<from>_<to>` (canonicalized) when unset.
    #[serde(default)]
    pub name: Option<String>,
}

impl Policy {
    pub fn effective_name(&self) -> String {
        self.name.clone().unwrap_or_else(|| {
            format!(
                "{}_{}",
                crate::ident::canonicalize_zone(&self.from),
                crate::ident::canonicalize_zone(&self.to)
            )
        })
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ScheduledRule {
    pub name: String,
    pub policy_name: String,
    pub rule: PolicyRule,
    #[serde(default)]
    pub active: bool,
}
