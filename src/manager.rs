//! Manager (C8): the orchestrator holding base/effective config,
//! dynamic overlays, and safe-mode state behind a single read-write
//! lock (spec.md §4.8, §5).

use std::collections::BTreeMap;
use std::net::IpAddr;
use std::path::PathBuf;
use std::sync::Arc;

use chrono::Utc;
use sha2::{Digest, Sha256};
use tokio::sync::RwLock;

use crate::applier::{AtomicApplier, RollbackManager};
use crate::compiler::compile_config;
use crate::engine::NftEngine;
use crate::error::{FirewallError, Result};
use crate::iplist::IpListManager;
use crate::ipset_manager::IpSetManager;
use crate::log_warn;
use crate::model::{Config, IpSetMetadata, IpSetSourceKind, NATRule, ScheduledRule};
use crate::optimizer::OptLevel;
use crate::store::Store;
use crate::sysctl::SysctlWriter;

const MAX_TOTAL_IPSET_ELEMENTS: usize = 500_000;
const MIN_AUTHORIZE_TTL: u64 = 60;

struct ManagerState {
    base: Config,
    dynamic_nat: Vec<NATRule>,
    scheduled_rules: BTreeMap<String, ScheduledRule>,
    apply_count: u64,
    expected_gen_id: Option<String>,
    safe_mode_script: Option<String>,
    in_safe_mode: bool,
}

pub struct Manager {
    state: RwLock<ManagerState>,
    applier: Arc<AtomicApplier>,
    rollback: RollbackManager,
    ipset_mgr: IpSetManager,
    iplist_mgr: IpListManager,
    sysctl: Arc<dyn SysctlWriter>,
    store: Arc<dyn Store>,
    opt_level: OptLevel,
    integrity_monitoring_default: bool,
}

impl Manager {
    pub fn new(
        engine: Arc<dyn NftEngine>,
        sysctl: Arc<dyn SysctlWriter>,
        store: Arc<dyn Store>,
        cache_dir: PathBuf,
        checkpoint_path: PathBuf,
        opt_level: OptLevel,
    ) -> Result<Self> {
        let applier = Arc::new(AtomicApplier::new(engine.clone()));
        let rollback = RollbackManager::new(applier.clone(), checkpoint_path);
        let ipset_mgr = IpSetManager::new(engine, "inet", "flywall");
        let iplist_mgr = IpListManager::new(cache_dir, None)?;

        Ok(Self {
            state: RwLock::new(ManagerState {
                base: Config::default(),
                dynamic_nat: Vec::new(),
                scheduled_rules: BTreeMap::new(),
                apply_count: 0,
                expected_gen_id: None,
                safe_mode_script: None,
                in_safe_mode: false,
            }),
            applier,
            rollback,
            ipset_mgr,
            iplist_mgr,
            sysctl,
            store,
            opt_level,
            integrity_monitoring_default: false,
        })
    }

    /// Builds the effective config, validates it, compiles the three
    /// table scripts, dry-runs, and commits atomically.
    pub async fn apply_config(&self, cfg: Config) -> Result<()> {
        let mut guard = self.state.write().await;
        guard.base = cfg;

        let mut effective = build_effective_config(&guard)?;
        let total_elements = self.resolve_ipsets(&mut effective).await?;
        if total_elements > MAX_TOTAL_IPSET_ELEMENTS {
            return Err(FirewallError::IpSetCapExceeded {
                found: total_elements,
                limit: MAX_TOTAL_IPSET_ELEMENTS,
            });
        }

        let config_hash = hash_config(&effective);
        let apply_count = guard.apply_count + 1;
        let output = compile_config(&effective, apply_count, &config_hash, Utc::now(), self.opt_level)?;
        let combined = output.combined();

        self.applier.validate(&combined).await?;

        let applier = self.applier.clone();
        let script = combined.clone();
        self.rollback
            .safe_apply(move || {
                let applier = applier.clone();
                let script = script.clone();
                async move { applier.apply(&script).await }
            })
            .await?;

        guard.apply_count = apply_count;
        if self.integrity_monitoring_default || effective.features.integrity_monitoring {
            guard.expected_gen_id = Some(config_hash);
        }

        let interfaces_needing_mgmt: Vec<String> = effective
            .interfaces
            .iter()
            .filter(|i| !i.effective_management().is_empty())
            .map(|i| i.name.clone())
            .collect();
        drop(guard);

        for iface in interfaces_needing_mgmt {
            if let Err(e) = self.sysctl.set_route_localnet(&iface, true).await {
                log_warn!("failed to set route_localnet for '{iface}': {e}");
            }
        }

        Ok(())
    }

    pub async fn add_dynamic_nat_rule(&self, rule: NATRule) -> Result<()> {
        let base = {
            let mut guard = self.state.write().await;
            guard.dynamic_nat.push(rule);
            guard.base.clone()
        };
        self.apply_config(base).await
    }

    pub async fn remove_dynamic_nat_rule<F>(&self, predicate: F) -> Result<()>
    where
        F: Fn(&NATRule) -> bool,
    {
        let base = {
            let mut guard = self.state.write().await;
            guard.dynamic_nat.retain(|r| !predicate(r));
            guard.base.clone()
        };
        self.apply_config(base).await
    }

    pub async fn apply_scheduled_rule(&self, rule: ScheduledRule, enabled: bool) -> Result<()> {
        let base = {
            let mut guard = self.state.write().await;
            let mut rule = rule;
            rule.active = enabled;
            guard.scheduled_rules.insert(rule.name.clone(), rule);
            guard.base.clone()
        };
        self.apply_config(base).await
    }

    /// Classifies zones as WAN vs trusted and composes a minimal script
    /// denying forwarding on WAN while allowing LAN management.
    pub async fn pre_render_safe_mode(&self, cfg: &Config) -> Result<()> {
        let mut b = crate::script_builder::ScriptBuilder::new("inet", "flywall_safemode");
        b.add_table(Some("safe-mode fallback ruleset"));
        b.add_chain("input", Some("filter"), Some("input"), Some(0), Some("drop"), None);
        b.add_chain("forward", Some("filter"), Some("forward"), Some(0), Some("drop"), None);
        b.add_chain("output", Some("filter"), Some("output"), Some(0), Some("accept"), None);
        b.add_rule("input", "iifname \"lo\" accept", None);
        b.add_rule("input", "ct state established,related accept", None);

        for zone in &cfg.zones {
            let is_wan = zone.external || zone.name.to_ascii_lowercase().contains("wan");
            if is_wan {
                continue;
            }
            for iface in cfg.interfaces_in_zone(&zone.name) {
                if iface.effective_management().is_empty() {
                    continue;
                }
                b.add_rule(
                    "input",
                    &format!("iifname {} accept", crate::ident::force_quote(&iface.name)),
                    Some("safe-mode-lan-management"),
                );
            }
        }

        let script = b.build();
        let mut guard = self.state.write().await;
        guard.safe_mode_script = Some(script);
        Ok(())
    }

    pub async fn apply_safe_mode(&self) -> Result<()> {
        let mut guard = self.state.write().await;
        let Some(script) = guard.safe_mode_script.clone() else {
            return Err(FirewallError::NoCheckpoint);
        };
        self.applier.apply(&script).await?;
        guard.in_safe_mode = true;
        Ok(())
    }

    pub async fn exit_safe_mode(&self) -> Result<()> {
        let base = {
            let mut guard = self.state.write().await;
            guard.in_safe_mode = false;
            guard.base.clone()
        };
        self.apply_config(base).await
    }

    /// Adds `ip` to the egress DNS allowlist matching its family; tolerates
    /// the set being absent (DNS egress filtering disabled).
    pub async fn authorize_ip(&self, ip: IpAddr, ttl_secs: u64) -> Result<()> {
        let ttl = ttl_secs.max(MIN_AUTHORIZE_TTL);
        let set_name = if ip.is_ipv6() { "dns_allowed_v6" } else { "dns_allowed_v4" };
        let element = format!("{ip} timeout {ttl}s");
        match self.ipset_mgr.add_elements(set_name, &[element]).await {
            Ok(()) => Ok(()),
            Err(e) => {
                log_warn!("authorize_ip: set '{set_name}' unavailable: {e}");
                Ok(())
            }
        }
    }

    /// Downloads managed/URL-backed set sources (soft-failing per
    /// spec.md §4.10) and records metadata, returning the total resolved
    /// element count across all sets.
    async fn resolve_ipsets(&self, cfg: &mut Config) -> Result<usize> {
        let mut total = 0usize;
        for set in &mut cfg.ip_sets {
            let mut resolved = set.entries.clone();
            let source = if let Some(list_name) = &set.managed_list {
                match self.iplist_mgr.download_list(list_name).await {
                    Ok(entries) => {
                        resolved.extend(entries);
                        Some(IpSetSourceKind::Managed)
                    }
                    Err(e) => {
                        log_warn!("managed list '{list_name}' for set '{}' failed: {e}", set.name);
                        None
                    }
                }
            } else if let Some(url) = &set.url {
                match self.iplist_mgr.download_from_url(url).await {
                    Ok(entries) => {
                        resolved.extend(entries);
                        Some(IpSetSourceKind::Url)
                    }
                    Err(e) => {
                        log_warn!("url list '{url}' for set '{}' failed: {e}", set.name);
                        None
                    }
                }
            } else if !set.entries.is_empty() {
                Some(IpSetSourceKind::Manual)
            } else {
                None
            };

            resolved.sort();
            resolved.dedup();
            total += resolved.len();

            if let Some(source) = source {
                let meta = IpSetMetadata {
                    name: set.name.clone(),
                    set_type: set.set_type(),
                    source,
                    source_url: set.url.clone(),
                    last_update: Utc::now(),
                    next_update: set.refresh_hours.map(|h| Utc::now() + chrono::Duration::hours(h as i64)),
                    entries_count: resolved.len(),
                    etag: None,
                    checksum: None,
                };
                if let Err(e) = self.store.put_ipset_metadata(meta).await {
                    log_warn!("failed to persist ipset metadata for '{}': {e}", set.name);
                }
            }

            set.entries = resolved;
        }
        Ok(total)
    }
}

/// Deep-copies the base config and layers dynamic NAT + scheduled-rule
/// overlays on top, injecting scheduled rules in sorted-name order for
/// deterministic output (spec.md §5).
fn build_effective_config(state: &ManagerState) -> Result<Config> {
    let mut effective = state.base.clone();
    effective.nat.extend(state.dynamic_nat.iter().cloned());

    for scheduled in state.scheduled_rules.values() {
        if !scheduled.active {
            continue;
        }
        let target = effective
            .policies
            .iter_mut()
            .find(|p| p.effective_name() == scheduled.policy_name);
        match target {
            Some(policy) => policy.rules.push(scheduled.rule.clone()),
            None => return Err(FirewallError::ScheduledRuleUnknownPolicy(scheduled.name.clone())),
        }
    }

    Ok(effective)
}

fn hash_config(cfg: &Config) -> String {
    let json = serde_json::to_vec(cfg).unwrap_or_default();
    let mut hasher = Sha256::new();
    hasher.update(&json);
    format!("{:x}", hasher.finalize())[..16].to_string()
}
