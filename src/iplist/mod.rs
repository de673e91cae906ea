//! IP-List Manager (C5): registry-resolved and ad-hoc HTTP downloads of
//! reputation/blocklist feeds, disk-cached by URL hash (spec.md §4.6).

pub mod cache;
pub mod registry;

use std::io::Read;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::RwLock;

use crate::error::{FirewallError, Result};
use crate::log_warn;
pub use registry::{ListEntry, Registry};

const DOWNLOAD_TIMEOUT: Duration = Duration::from_secs(60);
const MAX_DOWNLOAD_BYTES: usize = 10 * 1024 * 1024;

/// `$XDG_CACHE_HOME/flywall/ip_lists` (or the platform equivalent),
/// falling back to a relative path when no cache directory is resolvable.
pub fn default_cache_dir() -> PathBuf {
    dirs::cache_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("flywall")
        .join("ip_lists")
}

pub struct IpListManager {
    cache_dir: PathBuf,
    registry: Arc<RwLock<Registry>>,
    client: reqwest::Client,
    ttl_hours: i64,
}

impl IpListManager {
    pub fn new(cache_dir: impl Into<PathBuf>, user_registry_path: Option<&Path>) -> Result<Self> {
        let mut registry = Registry::load_default();
        if let Some(path) = user_registry_path {
            registry.merge_user_file(path)?;
        }
        let client = reqwest::Client::builder()
            .timeout(DOWNLOAD_TIMEOUT)
            .build()?;
        Ok(Self {
            cache_dir: cache_dir.into(),
            registry: Arc::new(RwLock::new(registry)),
            client,
            ttl_hours: cache::DEFAULT_TTL_HOURS,
        })
    }

    /// Resolves `name` through the registry and downloads (or serves
    /// from cache). Failures are reported but treated as soft by C8 —
    /// here they surface as `Err` for the caller to decide.
    pub async fn download_list(&self, name: &str) -> Result<Vec<String>> {
        let url = {
            let registry = self.registry.read().await;
            registry
                .get(name)
                .map(|entry| entry.url.clone())
                .ok_or_else(|| FirewallError::UnknownManagedList(name.to_string()))?
        };
        self.download_from_url(&url).await
    }

    pub async fn download_from_url(&self, url: &str) -> Result<Vec<String>> {
        if let Some((bytes, _meta)) = cache::read_cached(&self.cache_dir, url, self.ttl_hours) {
            let text = decode_payload(url, &bytes)?;
            return Ok(parse_ip_list(&text));
        }

        match self.fetch(url).await {
            Ok((raw, etag)) => {
                let text = decode_payload(url, &raw)?;
                let parsed = parse_ip_list(&text);
                if let Err(e) = cache::write_cache(&self.cache_dir, url, &raw, etag) {
                    log_warn!("failed to write IP list cache for '{url}': {e}");
                }
                Ok(parsed)
            }
            Err(e) => {
                log_warn!("download failed for '{url}': {e}");
                Err(e)
            }
        }
    }

    async fn fetch(&self, url: &str) -> Result<(Vec<u8>, Option<String>)> {
        let response = self
            .client
            .get(url)
            .send()
            .await
            .map_err(|e| FirewallError::Download(url.to_string(), e.to_string()))?;

        if !response.status().is_success() {
            return Err(FirewallError::Download(
                url.to_string(),
                format!("HTTP {}", response.status()),
            ));
        }

        let etag = response
            .headers()
            .get(reqwest::header::ETAG)
            .and_then(|v| v.to_str().ok())
            .map(str::to_string);

        let bytes = response
            .bytes()
            .await
            .map_err(|e| FirewallError::Download(url.to_string(), e.to_string()))?;

        if bytes.len() > MAX_DOWNLOAD_BYTES {
            return Err(FirewallError::Download(
                url.to_string(),
                format!("payload exceeds {MAX_DOWNLOAD_BYTES} byte cap"),
            ));
        }

        Ok((bytes.to_vec(), etag))
    }
}

/// Transparent gzip decoding, triggered by a `.gz` URL suffix (since the
/// cache stores raw bytes without the response headers that would
/// otherwise indicate `Content-Encoding: gzip`).
fn decode_payload(url: &str, raw: &[u8]) -> Result<String> {
    if url.ends_with(".gz") {
        let mut decoder = flate2::read::GzDecoder::new(raw);
        let mut out = String::new();
        decoder
            .read_to_string(&mut out)
            .map_err(|e| FirewallError::Download(url.to_string(), format!("gzip decode failed: {e}")))?;
        Ok(out)
    } else {
        Ok(String::from_utf8_lossy(raw).to_string())
    }
}

/// Strips comments (`#...`), blank lines, and surrounding whitespace.
pub fn parse_ip_list(raw: &str) -> Vec<String> {
    raw.lines()
        .map(|line| line.split('#').next().unwrap_or("").trim())
        .filter(|line| !line.is_empty())
        .map(str::to_string)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_strips_comments_blank_lines_and_whitespace() {
        let raw = "  1.2.3.4  \n# comment\n\n5.6.7.8 # trailing comment\n";
        assert_eq!(parse_ip_list(raw), vec!["1.2.3.4", "5.6.7.8"]);
    }

    #[tokio::test]
    async fn unknown_managed_list_name_errors() {
        let dir = tempfile::tempdir().unwrap();
        let mgr = IpListManager::new(dir.path(), None).unwrap();
        let err = mgr.download_list("not_a_real_list").await;
        assert!(matches!(err, Err(FirewallError::UnknownManagedList(_))));
    }

    #[tokio::test]
    async fn cached_payload_is_served_without_network_access() {
        let dir = tempfile::tempdir().unwrap();
        let url = "https://example.test/list.txt";
        cache::write_cache(dir.path(), url, b"9.9.9.9\n", None).unwrap();
        let mgr = IpListManager::new(dir.path(), None).unwrap();
        let entries = mgr.download_from_url(url).await.unwrap();
        assert_eq!(entries, vec!["9.9.9.9"]);
    }
}
