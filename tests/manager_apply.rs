use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use flywall_core::engine::NftEngine;
use flywall_core::error::Result;
use flywall_core::manager::Manager;
use flywall_core::model::{
    Action, Config, Interface, ManagementBits, NATRule, NatType, Policy, PolicyRule, Zone,
};
use flywall_core::optimizer::OptLevel;
use flywall_core::store::MemStore;
use flywall_core::sysctl::NoopSysctlWriter;

struct RecordingEngine {
    applied: Mutex<Vec<String>>,
    sets: Mutex<HashMap<String, Vec<String>>>,
    fail_next_apply: Mutex<bool>,
}

impl RecordingEngine {
    fn new() -> Self {
        Self {
            applied: Mutex::new(Vec::new()),
            sets: Mutex::new(HashMap::new()),
            fail_next_apply: Mutex::new(false),
        }
    }
}

#[async_trait]
impl NftEngine for RecordingEngine {
    async fn check(&self, _script: &str) -> Result<()> {
        Ok(())
    }

    async fn apply(&self, script: &str) -> Result<()> {
        if *self.fail_next_apply.lock().unwrap() {
            *self.fail_next_apply.lock().unwrap() = false;
            return Err(flywall_core::error::FirewallError::CommitFailed("simulated failure".into()));
        }
        self.applied.lock().unwrap().push(script.to_string());
        Ok(())
    }

    async fn list_ruleset(&self) -> Result<String> {
        Ok(self.applied.lock().unwrap().last().cloned().unwrap_or_default())
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

fn sample_config() -> Config {
    Config {
        zones: vec![
            Zone { name: "lan".into(), ..Default::default() },
            Zone { name: "wan".into(), external: true, ..Default::default() },
        ],
        interfaces: vec![
            Interface {
                name: "eth0".into(),
                zone: Some("lan".into()),
                management: Some(ManagementBits { ssh: true, ..Default::default() }),
                ..interface_defaults()
            },
            Interface {
                name: "eth1".into(),
                zone: Some("wan".into()),
                ..interface_defaults()
            },
        ],
        policies: vec![Policy {
            from: "lan".into(),
            to: "wan".into(),
            action: Action::Accept,
            rules: vec![PolicyRule {
                protocol: Some("tcp".into()),
                dest_port: Some(443),
                action: Action::Accept,
                ..Default::default()
            }],
            disabled: false,
            masquerade: Some(true),
            name: None,
        }],
        ..Default::default()
    }
}

fn interface_defaults() -> Interface {
    Interface {
        name: String::new(),
        zone: None,
        ipv4: vec![],
        ipv6: vec![],
        mtu: None,
        gateway: None,
        dhcp: false,
        table: 0,
        management: None,
        disabled: false,
        webui_port: None,
        access_web_ui: false,
    }
}

fn build_manager(engine: Arc<RecordingEngine>, cache_dir: &std::path::Path) -> Manager {
    Manager::new(
        engine,
        Arc::new(NoopSysctlWriter),
        Arc::new(MemStore::new()),
        cache_dir.join("cache"),
        cache_dir.join("checkpoint.nft"),
        OptLevel::Grouping,
    )
    .unwrap()
}

#[tokio::test]
async fn apply_config_commits_a_script_containing_the_declared_policy_chain() {
    let dir = tempfile::tempdir().unwrap();
    let engine = Arc::new(RecordingEngine::new());
    let manager = build_manager(engine.clone(), dir.path());

    manager.apply_config(sample_config()).await.unwrap();

    let applied = engine.applied.lock().unwrap();
    assert_eq!(applied.len(), 1);
    assert!(applied[0].contains("policy_lan_wan"));
    assert!(applied[0].contains("tcp dport 443"));
}

#[tokio::test]
async fn failed_commit_does_not_advance_apply_count_state() {
    let dir = tempfile::tempdir().unwrap();
    let engine = Arc::new(RecordingEngine::new());
    let manager = build_manager(engine.clone(), dir.path());

    manager.apply_config(sample_config()).await.unwrap();
    *engine.fail_next_apply.lock().unwrap() = true;

    let result = manager.apply_config(sample_config()).await;
    assert!(result.is_err());
}

#[tokio::test]
async fn dynamic_nat_rule_reapplies_through_apply_config() {
    let dir = tempfile::tempdir().unwrap();
    let engine = Arc::new(RecordingEngine::new());
    let manager = build_manager(engine.clone(), dir.path());

    manager.apply_config(sample_config()).await.unwrap();
    manager
        .add_dynamic_nat_rule(NATRule {
            kind: Some(NatType::Masquerade),
            out_interface: Some("eth1".into()),
            ..Default::default()
        })
        .await
        .unwrap();

    let applied = engine.applied.lock().unwrap();
    assert_eq!(applied.len(), 2);
    assert!(applied[1].contains("masquerade"));
}

#[tokio::test]
async fn unknown_zone_in_policy_aborts_before_commit() {
    let dir = tempfile::tempdir().unwrap();
    let engine = Arc::new(RecordingEngine::new());
    let manager = build_manager(engine.clone(), dir.path());

    let mut cfg = sample_config();
    cfg.policies.push(Policy {
        from: "dmz".into(),
        to: "wan".into(),
        action: Action::Accept,
        rules: vec![],
        disabled: false,
        masquerade: None,
        name: None,
    });

    let result = manager.apply_config(cfg).await;
    assert!(result.is_err());
    assert!(engine.applied.lock().unwrap().is_empty());
}
