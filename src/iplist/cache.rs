//! Disk cache for downloaded IP lists, keyed by `sha256(url)` (spec.md
//! §4.6, §6).

use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::error::Result;

pub const DEFAULT_TTL_HOURS: i64 = 24;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CacheMeta {
    pub cached_at: DateTime<Utc>,
    pub etag: Option<String>,
    pub size: usize,
    pub checksum: String,
}

pub fn cache_key(url: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(url.as_bytes());
    format!("{:x}", hasher.finalize())
}

fn paths(dir: &Path, url: &str) -> (PathBuf, PathBuf) {
    let key = cache_key(url);
    (dir.join(format!("{key}.txt")), dir.join(format!("{key}.meta")))
}

/// Returns cached list contents if present and not past `ttl_hours`.
/// Any read/parse error is treated as a cache miss, per spec.md §4.10.
pub fn read_cached(dir: &Path, url: &str, ttl_hours: i64) -> Option<(Vec<u8>, CacheMeta)> {
    let (txt_path, meta_path) = paths(dir, url);
    let meta_raw = std::fs::read_to_string(&meta_path).ok()?;
    let meta: CacheMeta = serde_json::from_str(&meta_raw).ok()?;
    let age = Utc::now().signed_duration_since(meta.cached_at);
    if age.num_hours() >= ttl_hours {
        return None;
    }
    let bytes = std::fs::read(&txt_path).ok()?;
    Some((bytes, meta))
}

/// Writes the raw bytes before the metadata, so a reader never observes
/// metadata for content that is not yet on disk.
pub fn write_cache(dir: &Path, url: &str, raw: &[u8], etag: Option<String>) -> Result<CacheMeta> {
    std::fs::create_dir_all(dir)?;
    let (txt_path, meta_path) = paths(dir, url);

    let mut checksum_hasher = Sha256::new();
    checksum_hasher.update(raw);
    let checksum = format!("{:x}", checksum_hasher.finalize());

    let txt_tmp = txt_path.with_extension("txt.tmp");
    std::fs::write(&txt_tmp, raw)?;
    std::fs::rename(&txt_tmp, &txt_path)?;

    let meta = CacheMeta {
        cached_at: Utc::now(),
        etag,
        size: raw.len(),
        checksum,
    };
    let meta_tmp = meta_path.with_extension("meta.tmp");
    std::fs::write(&meta_tmp, serde_json::to_vec_pretty(&meta)?)?;
    std::fs::rename(&meta_tmp, &meta_path)?;

    Ok(meta)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn write_then_read_round_trips_within_ttl() {
        let dir = tempfile::tempdir().unwrap();
        let url = "https://example.test/list.txt";
        write_cache(dir.path(), url, b"1.2.3.4\n5.6.7.8\n", Some("abc".into())).unwrap();
        let (bytes, meta) = read_cached(dir.path(), url, DEFAULT_TTL_HOURS).unwrap();
        assert_eq!(bytes, b"1.2.3.4\n5.6.7.8\n");
        assert_eq!(meta.etag.as_deref(), Some("abc"));
    }

    #[test]
    fn expired_entry_is_treated_as_a_miss() {
        let dir = tempfile::tempdir().unwrap();
        let url = "https://example.test/list.txt";
        write_cache(dir.path(), url, b"1.2.3.4\n", None).unwrap();
        assert!(read_cached(dir.path(), url, 0).is_none());
    }

    #[test]
    fn missing_cache_is_a_miss_not_an_error() {
        let dir = tempfile::tempdir().unwrap();
        assert!(read_cached(dir.path(), "https://nope.test/x", DEFAULT_TTL_HOURS).is_none());
    }
}
