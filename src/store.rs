//! Persisted state abstraction: the `ipset_metadata` bucket survives
//! restarts behind a simple key/value `Store` (spec.md §6).

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use async_trait::async_trait;

use crate::error::Result;
use crate::model::IpSetMetadata;

#[async_trait]
pub trait Store: Send + Sync {
    async fn get_ipset_metadata(&self, name: &str) -> Result<Option<IpSetMetadata>>;
    async fn put_ipset_metadata(&self, meta: IpSetMetadata) -> Result<()>;
    async fn list_ipset_metadata(&self) -> Result<Vec<IpSetMetadata>>;
}

/// One JSON file holding the whole `name -> IPSetMetadata` map, rewritten
/// atomically (write-temp, then rename) on every update.
pub struct FileStore {
    path: PathBuf,
    lock: Mutex<()>,
}

impl FileStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into(), lock: Mutex::new(()) }
    }

    fn read_all(&self) -> Result<HashMap<String, IpSetMetadata>> {
        match std::fs::read_to_string(&self.path) {
            Ok(raw) => Ok(serde_json::from_str(&raw).unwrap_or_default()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(HashMap::new()),
            Err(e) => Err(e.into()),
        }
    }

    fn write_all(&self, map: &HashMap<String, IpSetMetadata>) -> Result<()> {
        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let tmp = self.path.with_extension("tmp");
        std::fs::write(&tmp, serde_json::to_vec_pretty(map)?)?;
        std::fs::rename(&tmp, &self.path)?;
        Ok(())
    }
}

#[async_trait]
impl Store for FileStore {
    async fn get_ipset_metadata(&self, name: &str) -> Result<Option<IpSetMetadata>> {
        let _guard = self.lock.lock().unwrap();
        Ok(self.read_all()?.get(name).cloned())
    }

    async fn put_ipset_metadata(&self, meta: IpSetMetadata) -> Result<()> {
        let _guard = self.lock.lock().unwrap();
        let mut map = self.read_all()?;
        map.insert(meta.name.clone(), meta);
        self.write_all(&map)
    }

    async fn list_ipset_metadata(&self) -> Result<Vec<IpSetMetadata>> {
        let _guard = self.lock.lock().unwrap();
        Ok(self.read_all()?.into_values().collect())
    }
}

/// In-memory double for tests.
#[derive(Default)]
pub struct MemStore {
    entries: Mutex<HashMap<String, IpSetMetadata>>,
}

impl MemStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl Store for MemStore {
    async fn get_ipset_metadata(&self, name: &str) -> Result<Option<IpSetMetadata>> {
        Ok(self.entries.lock().unwrap().get(name).cloned())
    }

    async fn put_ipset_metadata(&self, meta: IpSetMetadata) -> Result<()> {
        self.entries.lock().unwrap().insert(meta.name.clone(), meta);
        Ok(())
    }

    async fn list_ipset_metadata(&self) -> Result<Vec<IpSetMetadata>> {
        Ok(self.entries.lock().unwrap().values().cloned().collect())
    }
}

pub fn default_checkpoint_path() -> PathBuf {
    Path::new("/tmp/firewall_rollback.nft").to_path_buf()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{IpSetSourceKind, IpSetType};

    fn sample_meta(name: &str) -> IpSetMetadata {
        IpSetMetadata {
            name: name.to_string(),
            set_type: IpSetType::Ipv4Addr,
            source: IpSetSourceKind::Manual,
            source_url: None,
            last_update: chrono::Utc::now(),
            next_update: None,
            entries_count: 0,
            etag: None,
            checksum: None,
        }
    }

    #[tokio::test]
    async fn file_store_round_trips_across_instances() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("ipset_metadata.json");

        let store = FileStore::new(&path);
        store.put_ipset_metadata(sample_meta("blocked")).await.unwrap();

        let reopened = FileStore::new(&path);
        let got = reopened.get_ipset_metadata("blocked").await.unwrap();
        assert!(got.is_some());
        assert_eq!(got.unwrap().name, "blocked");
    }

    #[tokio::test]
    async fn mem_store_lists_all_entries() {
        let store = MemStore::new();
        store.put_ipset_metadata(sample_meta("a")).await.unwrap();
        store.put_ipset_metadata(sample_meta("b")).await.unwrap();
        let all = store.list_ipset_metadata().await.unwrap();
        assert_eq!(all.len(), 2);
    }
}
