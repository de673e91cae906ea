//! Atomic Applier (C9): validate/apply/backup/restore plus the
//! rollback-on-failure wrapper `SafeApply` (spec.md §4.9).

use std::future::Future;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use tokio::sync::Mutex;

use crate::engine::NftEngine;
use crate::error::{FirewallError, Result};

pub struct AtomicApplier {
    engine: Arc<dyn NftEngine>,
}

impl AtomicApplier {
    pub fn new(engine: Arc<dyn NftEngine>) -> Self {
        Self { engine }
    }

    /// Never mutates the live ruleset.
    pub async fn validate(&self, script: &str) -> Result<()> {
        self.engine.check(script).await
    }

    /// Commits as a single transaction.
    pub async fn apply(&self, script: &str) -> Result<()> {
        self.engine.apply(script).await
    }

    pub async fn backup(&self, path: &Path) -> Result<()> {
        let ruleset = self.engine.list_ruleset().await?;
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(path, ruleset)?;
        Ok(())
    }

    pub async fn restore(&self, path: &Path) -> Result<()> {
        let ruleset = std::fs::read_to_string(path)?;
        self.engine.flush_ruleset().await?;
        self.engine.apply(&ruleset).await
    }
}

/// Holds the checkpoint path and whether a checkpoint currently exists.
/// `SafeApply` saves a checkpoint, runs the caller's commit closure, and
/// restores on failure — if restore also fails, both errors surface.
pub struct RollbackManager {
    applier: Arc<AtomicApplier>,
    checkpoint_path: PathBuf,
    has_backup: Mutex<bool>,
}

impl RollbackManager {
    pub fn new(applier: Arc<AtomicApplier>, checkpoint_path: impl Into<PathBuf>) -> Self {
        Self {
            applier,
            checkpoint_path: checkpoint_path.into(),
            has_backup: Mutex::new(false),
        }
    }

    pub async fn safe_apply<F, Fut>(&self, commit: F) -> Result<()>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<()>>,
    {
        self.applier.backup(&self.checkpoint_path).await?;
        *self.has_backup.lock().await = true;

        match commit().await {
            Ok(()) => {
                *self.has_backup.lock().await = false;
                Ok(())
            }
            Err(commit_err) => {
                let had_backup = *self.has_backup.lock().await;
                if !had_backup {
                    return Err(commit_err);
                }
                match self.applier.restore(&self.checkpoint_path).await {
                    Ok(()) => {
                        *self.has_backup.lock().await = false;
                        Err(commit_err)
                    }
                    Err(restore_err) => Err(FirewallError::RollbackFailed {
                        commit_err: commit_err.to_string(),
                        restore_err: restore_err.to_string(),
                    }),
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::FirewallError;
    use async_trait::async_trait;
    use std::sync::Mutex as StdMutex;

    struct FakeEngine {
        ruleset: StdMutex<String>,
        fail_apply: StdMutex<bool>,
    }

    #[async_trait]
    impl NftEngine for FakeEngine {
        async fn check(&self, _script: &str) -> Result<()> {
            Ok(())
        }
        async fn apply(&self, script: &str) -> Result<()> {
            if *self.fail_apply.lock().unwrap() {
                return Err(FirewallError::CommitFailed("boom".into()));
            }
            *self.ruleset.lock().unwrap() = script.to_string();
            Ok(())
        }
        async fn list_ruleset(&self) -> Result<String> {
            Ok(self.ruleset.lock().unwrap().clone())
        }
        async fn flush_ruleset(&self) -> Result<()> {
            Ok(())
        }
        async fn list_set(&self, _family: &str, _table: &str, _name: &str) -> Result<Option<String>> {
            Ok(None)
        }
    }

    #[tokio::test]
    async fn safe_apply_rolls_back_on_commit_failure() {
        let engine = Arc::new(FakeEngine {
            ruleset: StdMutex::new("table inet flywall {}\n".into()),
            fail_apply: StdMutex::new(false),
        });
        let applier = Arc::new(AtomicApplier::new(engine.clone()));
        let dir = tempfile::tempdir().unwrap();
        let checkpoint = dir.path().join("checkpoint.nft");
        let rollback = RollbackManager::new(applier.clone(), checkpoint);

        *engine.fail_apply.lock().unwrap() = true;
        let result = rollback
            .safe_apply(|| async { applier.apply("add table inet broken {}\n").await })
            .await;
        assert!(result.is_err());
        assert!(matches!(result, Err(FirewallError::CommitFailed(_))));
    }

    #[tokio::test]
    async fn safe_apply_clears_checkpoint_on_success() {
        let engine = Arc::new(FakeEngine {
            ruleset: StdMutex::new("table inet flywall {}\n".into()),
            fail_apply: StdMutex::new(false),
        });
        let applier = Arc::new(AtomicApplier::new(engine.clone()));
        let dir = tempfile::tempdir().unwrap();
        let checkpoint = dir.path().join("checkpoint.nft");
        let rollback = RollbackManager::new(applier.clone(), checkpoint);

        let result = rollback
            .safe_apply(|| async { applier.apply("add table inet flywall {}\n").await })
            .await;
        assert!(result.is_ok());
    }
}
