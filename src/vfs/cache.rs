//! Local content cache for the virtual drive.
//!
//! Files at or below the configured threshold are fully materialized into
//! one cache file per remote node (named by node id); larger files are
//! streamed from the remote on every read. The staging directory holds
//! written-but-not-yet-uploaded content for the write path.

use crate::mega_service::client::StorageClient;
use crate::mega_service::models::MegaNode;
use anyhow::{Context, Result};
use log::{debug, info, warn};
use std::collections::HashMap;
use std::fs::OpenOptions;
use std::io::{Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

pub struct CacheManager {
    cache_dir: PathBuf,
    staging_dir: PathBuf,
    threshold: u64,
    /// Per-node guards so concurrent first readers of the same node do
    /// not download twice.
    inflight: Mutex<HashMap<String, Arc<tokio::sync::Mutex<()>>>>,
}

impl CacheManager {
    pub fn new(cache_dir: PathBuf, staging_dir: PathBuf, threshold: u64) -> Result<Self> {
        std::fs::create_dir_all(&cache_dir).context("Failed to create cache directory")?;
        std::fs::create_dir_all(&staging_dir).context("Failed to create staging directory")?;
        Ok(Self {
            cache_dir,
            staging_dir,
            threshold,
            inflight: Mutex::new(HashMap::new()),
        })
    }

    pub fn threshold(&self) -> u64 {
        self.threshold
    }

    /// Local cache file for a remote node; existence alone means "fully
    /// cached".
    pub fn cache_path(&self, node_id: &str) -> PathBuf {
        self.cache_dir.join(node_id)
    }

    pub fn is_cached(&self, node_id: &str) -> bool {
        let path = self.cache_path(node_id);
        path.exists() && path.is_file()
    }

    /// Obtain the full content of a file node, either from the local
    /// cache (downloading once if absent) or streamed live when the node
    /// exceeds the threshold.
    pub async fn content(&self, client: &dyn StorageClient, node: &MegaNode) -> Result<Vec<u8>> {
        if node.size > self.threshold {
            debug!("Streaming {} ({} bytes > threshold)", node.id, node.size);
            return client.download(node).await;
        }

        let guard = self.inflight_guard(&node.id);
        let _locked = guard.lock().await;

        let path = self.cache_path(&node.id);
        if !path.exists() {
            debug!("Cache miss for {}, downloading", node.id);
            client
                .download_to_path(node, &path)
                .await
                .with_context(|| format!("Failed to cache node {}", node.id))?;
        }
        tokio::fs::read(&path)
            .await
            .with_context(|| format!("Failed to read cache file {}", path.display()))
    }

    fn inflight_guard(&self, node_id: &str) -> Arc<tokio::sync::Mutex<()>> {
        let mut inflight = self.inflight.lock().unwrap();
        inflight
            .entry(node_id.to_string())
            .or_insert_with(|| Arc::new(tokio::sync::Mutex::new(())))
            .clone()
    }

    /// Staging file for a virtual path with pending written content.
    /// Virtual paths are case-insensitive, so the key folds case.
    pub fn staging_path(&self, path_key: &str) -> PathBuf {
        // Virtual path separators cannot appear in a single file name;
        // escape the escape character first so keys stay injective.
        let sanitized = path_key
            .trim_matches('/')
            .to_lowercase()
            .replace('%', "%25")
            .replace('/', "%2F");
        self.staging_dir.join(sanitized)
    }

    pub fn has_staged(&self, path_key: &str) -> bool {
        self.staging_path(path_key).is_file()
    }

    pub fn staged_size(&self, path_key: &str) -> Option<u64> {
        std::fs::metadata(self.staging_path(path_key)).ok().map(|m| m.len())
    }

    /// Create an empty staging file for a newly created virtual file.
    pub fn create_staged(&self, path_key: &str) -> Result<()> {
        let path = self.staging_path(path_key);
        std::fs::write(&path, b"")
            .with_context(|| format!("Failed to create staging file {}", path.display()))
    }

    /// Write a byte range into the staging file at the given offset,
    /// creating it if needed.
    pub fn write_staged(&self, path_key: &str, offset: u64, data: &[u8]) -> Result<usize> {
        let path = self.staging_path(path_key);
        let mut file = OpenOptions::new()
            .create(true)
            .write(true)
            .open(&path)
            .with_context(|| format!("Failed to open staging file {}", path.display()))?;
        file.seek(SeekFrom::Start(offset))?;
        file.write_all(data)?;
        Ok(data.len())
    }

    /// Truncate or extend the staging file to the given length.
    pub fn truncate_staged(&self, path_key: &str, len: u64) -> Result<()> {
        let path = self.staging_path(path_key);
        let file = OpenOptions::new()
            .create(true)
            .write(true)
            .open(&path)
            .with_context(|| format!("Failed to open staging file {}", path.display()))?;
        file.set_len(len)?;
        Ok(())
    }

    /// Full staged content of a path, if any writes are pending.
    pub fn staged_content(&self, path_key: &str) -> Result<Option<Vec<u8>>> {
        let path = self.staging_path(path_key);
        if !path.is_file() {
            return Ok(None);
        }
        Ok(Some(std::fs::read(&path).with_context(|| {
            format!("Failed to read staging file {}", path.display())
        })?))
    }

    /// Drop the staged content once it has been committed remotely.
    pub fn clear_staged(&self, path_key: &str) -> Result<()> {
        let path = self.staging_path(path_key);
        if path.is_file() {
            std::fs::remove_file(&path)
                .with_context(|| format!("Failed to remove staging file {}", path.display()))?;
        }
        Ok(())
    }

    /// Rename a pending staging entry, keeping staged writes attached to
    /// a file that moves before its first upload.
    pub fn rename_staged(&self, old_key: &str, new_key: &str) -> Result<()> {
        let from = self.staging_path(old_key);
        if from.is_file() {
            std::fs::rename(from, self.staging_path(new_key))
                .context("Failed to rename staging file")?;
        }
        Ok(())
    }

    /// Drop a node's cached content, used after its remote content
    /// changed.
    pub fn evict(&self, node_id: &str) {
        let path = self.cache_path(node_id);
        if path.is_file() {
            if let Err(e) = std::fs::remove_file(&path) {
                warn!("Failed to evict cache file {}: {}", path.display(), e);
            }
        }
    }

    /// Wholesale deletion of cached and staged content at unmount.
    pub fn purge(&self) -> Result<()> {
        info!("Purging cache at {}", self.cache_dir.display());
        remove_dir_contents(&self.cache_dir)?;
        remove_dir_contents(&self.staging_dir)?;
        Ok(())
    }
}

fn remove_dir_contents(dir: &Path) -> Result<()> {
    if !dir.exists() {
        return Ok(());
    }
    for entry in std::fs::read_dir(dir).context("Failed to read cache directory")? {
        let entry = entry?;
        let path = entry.path();
        if path.is_dir() {
            std::fs::remove_dir_all(&path)?;
        } else {
            std::fs::remove_file(&path)?;
        }
    }
    Ok(())
}
