//! IP-Set Manager (C6): creation, differential update, and enumeration
//! of live nft sets (spec.md §4.5).

use std::collections::HashSet;
use std::sync::Arc;

use crate::engine::NftEngine;
use crate::error::Result;
use crate::ident::quote;
use crate::model::IpSetType;
use crate::script_builder::ScriptBuilder;

const ADD_BATCH: usize = 500;

pub struct IpSetManager {
    engine: Arc<dyn NftEngine>,
    family: String,
    table: String,
}

impl IpSetManager {
    pub fn new(engine: Arc<dyn NftEngine>, family: impl Into<String>, table: impl Into<String>) -> Self {
        Self {
            engine,
            family: family.into(),
            table: table.into(),
        }
    }

    pub async fn create_set(&self, name: &str, set_type: IpSetType, interval: bool) -> Result<()> {
        let mut b = ScriptBuilder::new(&self.family, &self.table);
        b.add_table(None);
        let flags: &[&str] = if interval { &["interval"] } else { &[] };
        b.add_set(name, set_type.nft_type(), None, None, flags);
        self.engine.apply(&b.build()).await
    }

    pub async fn delete_set(&self, name: &str) -> Result<()> {
        let script = format!("delete set {} {} {}\n", self.family, self.table, quote(name));
        self.engine.apply(&script).await
    }

    pub async fn flush_set(&self, name: &str) -> Result<()> {
        let script = format!("flush set {} {} {}\n", self.family, self.table, quote(name));
        self.engine.apply(&script).await
    }

    pub async fn add_elements(&self, name: &str, elements: &[String]) -> Result<()> {
        if elements.is_empty() {
            return Ok(());
        }
        let mut b = ScriptBuilder::new(&self.family, &self.table);
        b.add_table(None);
        b.add_set_elements(name, elements);
        self.engine.apply(&b.build()).await
    }

    pub async fn remove_elements(&self, name: &str, elements: &[String]) -> Result<()> {
        if elements.is_empty() {
            return Ok(());
        }
        let mut script = String::new();
        for chunk in elements.chunks(ADD_BATCH) {
            script.push_str(&format!(
                "delete element {} {} {} {{ {} }}\n",
                self.family,
                self.table,
                quote(name),
                chunk.join(", ")
            ));
        }
        self.engine.apply(&script).await
    }

    pub async fn check_element(&self, name: &str, element: &str) -> Result<bool> {
        let current = self.get_set_elements(name).await?;
        Ok(current.contains(&element.to_string()))
    }

    pub async fn get_set_elements(&self, name: &str) -> Result<Vec<String>> {
        match self.engine.list_set(&self.family, &self.table, name).await? {
            Some(json) => Ok(parse_set_elements(&json)),
            None => Ok(Vec::new()),
        }
    }

    /// Differential update per spec.md §4.5: deletions first (to avoid
    /// transient over-capacity), then additions, batched, submitted as a
    /// single transaction. No empty-set window exists even when the set
    /// is being populated for the first time.
    pub async fn atomic_ipset_update(&self, name: &str, set_type: IpSetType, desired: &[String]) -> Result<()> {
        let existing = self.engine.list_set(&self.family, &self.table, name).await?;
        let current: HashSet<String> = match &existing {
            Some(json) => parse_set_elements(json).into_iter().collect(),
            None => HashSet::new(),
        };
        let desired_set: HashSet<String> = desired.iter().cloned().collect();

        let to_delete: Vec<String> = current.difference(&desired_set).cloned().collect();
        let to_add: Vec<String> = desired_set.difference(&current).cloned().collect();

        if to_delete.is_empty() && to_add.is_empty() && existing.is_some() {
            return Ok(());
        }

        let mut b = ScriptBuilder::new(&self.family, &self.table);
        b.add_table(None);
        if existing.is_none() {
            let interval = desired.iter().any(|e| e.contains('/') || e.contains('-'));
            let flags: &[&str] = if interval { &["interval"] } else { &[] };
            b.add_set(name, set_type.nft_type(), None, None, flags);
        }

        let mut script = b.build();
        for chunk in to_delete.chunks(ADD_BATCH) {
            script.push_str(&format!(
                "delete element {} {} {} {{ {} }}\n",
                self.family,
                self.table,
                quote(name),
                chunk.join(", ")
            ));
        }
        for chunk in to_add.chunks(ADD_BATCH) {
            script.push_str(&format!(
                "add element {} {} {} {{ {} }}\n",
                self.family,
                self.table,
                quote(name),
                chunk.join(", ")
            ));
        }

        self.engine.apply(&script).await
    }
}

/// Extracts the `elements` array out of `nft -j list set` JSON without
/// pulling in a full nftables schema model (the core deliberately
/// avoids the structured/JSON dialect for anything beyond this read).
fn parse_set_elements(json: &str) -> Vec<String> {
    let Ok(value) = serde_json::from_str::<serde_json::Value>(json) else {
        return Vec::new();
    };
    let mut out = Vec::new();
    if let Some(nftables) = value.get("nftables").and_then(|v| v.as_array()) {
        for entry in nftables {
            if let Some(set) = entry.get("set") {
                if let Some(elem) = set.get("elem").and_then(|v| v.as_array()) {
                    for e in elem {
                        if let Some(s) = e.as_str() {
                            out.push(s.to_string());
                        } else if let Some(obj) = e.get("elem") {
                            if let Some(val) = obj.get("val").and_then(|v| v.as_str()) {
                                out.push(val.to_string());
                            }
                        }
                    }
                }
            }
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use std::sync::Mutex;

    struct FakeEngine {
        sets: Mutex<std::collections::HashMap<String, Vec<String>>>,
        applied: Mutex<Vec<String>>,
    }

    impl FakeEngine {
        fn new() -> Self {
            Self {
                sets: Mutex::new(std::collections::HashMap::new()),
                applied: Mutex::new(Vec::new()),
            }
        }
    }

    #[async_trait]
    impl NftEngine for FakeEngine {
        async fn check(&self, _script: &str) -> Result<()> {
            Ok(())
        }
        async fn apply(&self, script: &str) -> Result<()> {
            self.applied.lock().unwrap().push(script.to_string());
            Ok(())
        }
        async fn list_ruleset(&self) -> Result<String> {
            Ok(String::new())
        }
        async fn flush_ruleset(&self) -> Result<()> {
            Ok(())
        }
        async fn list_set(&self, _family: &str, _table: &str, name: &str) -> Result<Option<String>> {
            Ok(self.sets.lock().unwrap().get(name).map(|elems| {
                format!(
                    "{{\"nftables\":[{{\"set\":{{\"elem\":{}}}}}]}}",
                    serde_json::to_string(elems).unwrap()
                )
            }))
        }
    }

    #[tokio::test]
    async fn first_population_creates_set_with_no_empty_window() {
        let engine = Arc::new(FakeEngine::new());
        let mgr = IpSetManager::new(engine.clone(), "inet", "flywall");
        mgr.atomic_ipset_update("blocked", IpSetType::Ipv4Addr, &["1.1.1.1".to_string()])
            .await
            .unwrap();
        let applied = engine.applied.lock().unwrap();
        assert_eq!(applied.len(), 1);
        assert!(applied[0].contains("add set"));
        assert!(applied[0].contains("add element"));
    }

    #[tokio::test]
    async fn unchanged_desired_set_is_a_no_op() {
        let engine = Arc::new(FakeEngine::new());
        engine
            .sets
            .lock()
            .unwrap()
            .insert("blocked".to_string(), vec!["1.1.1.1".to_string()]);
        let mgr = IpSetManager::new(engine.clone(), "inet", "flywall");
        mgr.atomic_ipset_update("blocked", IpSetType::Ipv4Addr, &["1.1.1.1".to_string()])
            .await
            .unwrap();
        assert!(engine.applied.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn differential_emits_deletes_before_adds() {
        let engine = Arc::new(FakeEngine::new());
        engine.sets.lock().unwrap().insert(
            "blocked".to_string(),
            vec!["1.1.1.1".to_string(), "2.2.2.2".to_string()],
        );
        let mgr = IpSetManager::new(engine.clone(), "inet", "flywall");
        mgr.atomic_ipset_update("blocked", IpSetType::Ipv4Addr, &["3.3.3.3".to_string()])
            .await
            .unwrap();
        let applied = engine.applied.lock().unwrap();
        let script = &applied[0];
        let del_pos = script.find("delete element").unwrap();
        let add_pos = script.find("add element").unwrap();
        assert!(del_pos < add_pos);
    }
}
