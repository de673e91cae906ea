use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum NatType {
    Dnat,
    Snat,
    Masquerade,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct NATRule {
    #[serde(rename = "type")]
    pub kind: Option<NatType>,
    #[serde(default)]
    pub in_interface: Option<String>,
    #[serde(default)]
    pub out_interface: Option<String>,
    #[serde(default)]
    pub protocol: Option<String>,
    #[serde(default)]
    pub src_ip: Option<String>,
    #[serde(default)]
    pub dest_ip: Option<String>,
    #[serde(default)]
    pub dest_port: Option<u16>,
    #[serde(default)]
    pub to_ip: Option<String>,
    #[serde(default)]
    pub to_port: Option<u16>,
    #[serde(default)]
    pub snat_ip: Option<String>,
    #[serde(default)]
    pub mark: Option<u32>,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub hairpin: bool,
}

impl NATRule {
    pub fn kind(&self) -> NatType {
        self.kind.unwrap_or(NatType::Masquerade)
    }
}
