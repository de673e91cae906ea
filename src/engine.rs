//! The external kernel-facing loader boundary: everything that feeds a
//! textual nft-compatible script to the engine process goes through this
//! one trait, so the Atomic Applier (C9) and the IP-Set Manager (C6)
//! share a single commit path (spec.md §4.5, §4.9).

use async_trait::async_trait;
use tokio::io::AsyncWriteExt;
use tokio::process::Command;

use crate::error::{FirewallError, Result};

#[async_trait]
pub trait NftEngine: Send + Sync {
    /// Check-only (dry-run) load; never mutates the live ruleset.
    async fn check(&self, script: &str) -> Result<()>;

    /// Commits `script` as a single transaction.
    async fn apply(&self, script: &str) -> Result<()>;

    /// Serializes the entire live ruleset (used by `backup`).
    async fn list_ruleset(&self) -> Result<String>;

    /// Flushes the whole ruleset before a `restore` replay.
    async fn flush_ruleset(&self) -> Result<()>;

    /// Lists one set's current elements in nft's native syntax, used by
    /// `atomic_ipset_update` to compute a differential.
    async fn list_set(&self, family: &str, table: &str, name: &str) -> Result<Option<String>>;
}

/// Drives the real `nft` binary via stdin-piped scripts.
pub struct NftProcessEngine {
    binary: String,
}

impl NftProcessEngine {
    pub fn new() -> Self {
        Self { binary: "nft".to_string() }
    }

    pub fn with_binary(binary: impl Into<String>) -> Self {
        Self { binary: binary.into() }
    }

    async fn run_script(&self, args: &[&str], script: &str) -> Result<()> {
        let mut child = Command::new(&self.binary)
            .args(args)
            .stdin(std::process::Stdio::piped())
            .stdout(std::process::Stdio::piped())
            .stderr(std::process::Stdio::piped())
            .spawn()
            .map_err(|e| FirewallError::CommitFailed(format!("failed to spawn {}: {e}", self.binary)))?;

        if let Some(mut stdin) = child.stdin.take() {
            stdin
                .write_all(script.as_bytes())
                .await
                .map_err(|e| FirewallError::CommitFailed(e.to_string()))?;
        }

        let output = child
            .wait_with_output()
            .await
            .map_err(|e| FirewallError::CommitFailed(e.to_string()))?;

        if output.status.success() {
            Ok(())
        } else {
            let combined = format!(
                "{}{}",
                String::from_utf8_lossy(&output.stdout),
                String::from_utf8_lossy(&output.stderr)
            );
            Err(FirewallError::CommitFailed(combined))
        }
    }
}

impl Default for NftProcessEngine {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl NftEngine for NftProcessEngine {
    async fn check(&self, script: &str) -> Result<()> {
        self.run_script(&["-c", "-f", "-"], script)
            .await
            .map_err(|e| FirewallError::ValidationEngine(e.to_string()))
    }

    async fn apply(&self, script: &str) -> Result<()> {
        self.run_script(&["-f", "-"], script).await
    }

    async fn list_ruleset(&self) -> Result<String> {
        let output = Command::new(&self.binary)
            .args(["list", "ruleset"])
            .output()
            .await
            .map_err(|e| FirewallError::CommitFailed(e.to_string()))?;
        if output.status.success() {
            Ok(String::from_utf8_lossy(&output.stdout).to_string())
        } else {
            Err(FirewallError::CommitFailed(
                String::from_utf8_lossy(&output.stderr).to_string(),
            ))
        }
    }

    async fn flush_ruleset(&self) -> Result<()> {
        self.apply("flush ruleset\n").await
    }

    async fn list_set(&self, family: &str, table: &str, name: &str) -> Result<Option<String>> {
        let output = Command::new(&self.binary)
            .args(["-j", "list", "set", family, table, name])
            .output()
            .await
            .map_err(|e| FirewallError::CommitFailed(e.to_string()))?;
        if output.status.success() {
            Ok(Some(String::from_utf8_lossy(&output.stdout).to_string()))
        } else {
            let stderr = String::from_utf8_lossy(&output.stderr);
            if stderr.contains("No such file or directory") {
                Ok(None)
            } else {
                Err(FirewallError::CommitFailed(stderr.to_string()))
            }
        }
    }
}
