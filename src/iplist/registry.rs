//! The default + user-supplied managed-list registry (spec.md §4.6).

use std::collections::HashMap;
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::Result;

const DEFAULT_REGISTRY_JSON: &str = include_str!("../../assets/ip_list_registry.json");

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ListEntry {
    pub url: String,
    pub description: String,
    pub category: String,
}

#[derive(Debug, Clone, Default)]
pub struct Registry {
    entries: HashMap<String, ListEntry>,
}

impl Registry {
    /// Loads the bundled default registry.
    pub fn load_default() -> Self {
        let entries: HashMap<String, ListEntry> =
            serde_json::from_str(DEFAULT_REGISTRY_JSON).expect("embedded registry JSON is well-formed");
        Self { entries }
    }

    /// Merges a user-supplied registry file on top; user entries win on
    /// name collision.
    pub fn merge_user_file(&mut self, path: &Path) -> Result<()> {
        let raw = std::fs::read_to_string(path)?;
        let user: HashMap<String, ListEntry> = serde_json::from_str(&raw)?;
        self.entries.extend(user);
        Ok(())
    }

    pub fn get(&self, name: &str) -> Option<&ListEntry> {
        self.entries.get(name)
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.entries.keys().map(String::as_str)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_registry_loads_and_contains_known_entries() {
        let reg = Registry::load_default();
        assert!(reg.get("firehol_level1").is_some());
        assert!(reg.get("spamhaus_drop").is_some());
    }

    #[test]
    fn user_registry_overrides_default_entry_by_name() {
        let mut reg = Registry::load_default();
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("user.json");
        std::fs::write(
            &path,
            r#"{"firehol_level1": {"url": "https://example.test/custom.txt", "description": "custom", "category": "custom"}}"#,
        )
        .unwrap();
        reg.merge_user_file(&path).unwrap();
        assert_eq!(reg.get("firehol_level1").unwrap().url, "https://example.test/custom.txt");
    }
}
