//! `route_localnet` sysctl helper invoked by the Manager after a
//! successful `ApplyConfig`, for every interface requiring management
//! access (spec.md §4.8).

use async_trait::async_trait;
use tokio::process::Command;

use crate::error::{FirewallError, Result};

#[async_trait]
pub trait SysctlWriter: Send + Sync {
    async fn set_route_localnet(&self, interface: &str, enabled: bool) -> Result<()>;
}

pub struct ProcSysctlWriter;

#[async_trait]
impl SysctlWriter for ProcSysctlWriter {
    async fn set_route_localnet(&self, interface: &str, enabled: bool) -> Result<()> {
        let key = format!("net.ipv4.conf.{interface}.route_localnet={}", enabled as u8);
        let output = Command::new("sysctl")
            .args(["-w", &key])
            .output()
            .await
            .map_err(|e| FirewallError::CommitFailed(format!("failed to spawn sysctl: {e}")))?;
        if output.status.success() {
            Ok(())
        } else {
            Err(FirewallError::CommitFailed(String::from_utf8_lossy(&output.stderr).to_string()))
        }
    }
}

/// No-op double for tests and for hosts where the caller manages
/// `route_localnet` itself.
pub struct NoopSysctlWriter;

#[async_trait]
impl SysctlWriter for NoopSysctlWriter {
    async fn set_route_localnet(&self, _interface: &str, _enabled: bool) -> Result<()> {
        Ok(())
    }
}
