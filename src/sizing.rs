//! Memoized size computation for bulk model storage.
//!
//! Recursively sizing tens of gigabytes of model weights on every cleanup
//! invocation would dominate runtime, so the result is cached in a JSON file
//! and revalidated on every read: the entry survives only while the explicit
//! invalidation marker is absent (or older), no tracked directory has been
//! modified since, and the entry is younger than the TTL. Anything else
//! forces a synchronous recompute. A corrupt or unreadable cache file is a
//! recompute, never an error.

use std::path::{Path, PathBuf};
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use tracing::{debug, warn};
use walkdir::WalkDir;

const BYTES_PER_GB: f64 = 1024.0 * 1024.0 * 1024.0;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SizeCacheEntry {
    pub path_set_hash: String,
    pub total_bytes: u64,
    pub computed_at: DateTime<Utc>,
}

pub struct SizeCache {
    cache_path: PathBuf,
    marker_path: PathBuf,
    ttl: Duration,
}

impl SizeCache {
    pub fn new(cache_path: impl Into<PathBuf>, ttl: Duration) -> Self {
        let cache_path = cache_path.into();
        let marker_path = cache_path.with_extension("invalidate");
        Self {
            cache_path,
            marker_path,
            ttl,
        }
    }

    /// Total size of the tracked directories in gigabytes.
    pub fn get_size_gb(&self, tracked: &[PathBuf]) -> f64 {
        self.get_size_bytes(tracked) as f64 / BYTES_PER_GB
    }

    pub fn get_size_bytes(&self, tracked: &[PathBuf]) -> u64 {
        let hash = hash_path_set(tracked);
        if let Some(entry) = self.read_entry() {
            if self.entry_valid(&entry, &hash, tracked) {
                debug!(
                    bytes = entry.total_bytes,
                    "size cache hit (computed {})", entry.computed_at
                );
                return entry.total_bytes;
            }
        }
        self.recompute(tracked, hash)
    }

    /// External invalidation hook: touch the marker so the next read
    /// recomputes without waiting for TTL expiry. Used when a download
    /// completes into a tracked directory.
    pub fn invalidate(&self) {
        if let Some(parent) = self.marker_path.parent() {
            let _ = std::fs::create_dir_all(parent);
        }
        if let Err(e) = std::fs::write(&self.marker_path, Utc::now().to_rfc3339()) {
            warn!("failed to write size-cache invalidation marker: {e}");
        }
    }

    fn read_entry(&self) -> Option<SizeCacheEntry> {
        let content = std::fs::read_to_string(&self.cache_path).ok()?;
        match serde_json::from_str(&content) {
            Ok(entry) => Some(entry),
            Err(e) => {
                warn!("size cache at {} is corrupt ({e}), recomputing", self.cache_path.display());
                None
            }
        }
    }

    fn entry_valid(&self, entry: &SizeCacheEntry, hash: &str, tracked: &[PathBuf]) -> bool {
        if entry.path_set_hash != hash {
            return false;
        }

        let age = Utc::now().signed_duration_since(entry.computed_at);
        if age < chrono::Duration::zero() {
            return false;
        }
        if let Ok(ttl) = chrono::Duration::from_std(self.ttl) {
            if age > ttl {
                return false;
            }
        }

        if let Some(marker_mtime) = mtime_utc(&self.marker_path) {
            if marker_mtime >= entry.computed_at {
                return false;
            }
        }

        for dir in tracked {
            if let Some(mtime) = mtime_utc(dir) {
                if mtime > entry.computed_at {
                    return false;
                }
            }
        }

        true
    }

    fn recompute(&self, tracked: &[PathBuf], hash: String) -> u64 {
        let total_bytes: u64 = tracked.iter().map(|dir| dir_size(dir)).sum();
        let entry = SizeCacheEntry {
            path_set_hash: hash,
            total_bytes,
            computed_at: Utc::now(),
        };

        if let Some(parent) = self.cache_path.parent() {
            let _ = std::fs::create_dir_all(parent);
        }
        match serde_json::to_string_pretty(&entry) {
            Ok(json) => {
                if let Err(e) = std::fs::write(&self.cache_path, json) {
                    warn!("failed to persist size cache: {e}");
                }
            }
            Err(e) => warn!("failed to serialize size cache entry: {e}"),
        }
        let _ = std::fs::remove_file(&self.marker_path);

        debug!(bytes = total_bytes, dirs = tracked.len(), "size cache recomputed");
        total_bytes
    }
}

/// Recursive size of a directory tree. Unreadable entries are skipped, not
/// errors; a missing directory is zero.
pub fn dir_size(path: &Path) -> u64 {
    WalkDir::new(path)
        .into_iter()
        .filter_map(|entry| entry.ok())
        .filter_map(|entry| entry.metadata().ok())
        .filter(|meta| meta.is_file())
        .map(|meta| meta.len())
        .sum()
}

/// Human-readable byte count for report lines.
pub fn format_bytes(bytes: u64) -> String {
    if bytes < 1024 {
        format!("{} B", bytes)
    } else if bytes < 1024 * 1024 {
        format!("{:.2} KB", bytes as f64 / 1024.0)
    } else if bytes < 1024 * 1024 * 1024 {
        format!("{:.2} MB", bytes as f64 / (1024.0 * 1024.0))
    } else {
        format!("{:.2} GB", bytes as f64 / BYTES_PER_GB)
    }
}

fn hash_path_set(tracked: &[PathBuf]) -> String {
    let mut sorted: Vec<_> = tracked.iter().collect();
    sorted.sort();
    let mut hasher = Sha256::new();
    for path in sorted {
        hasher.update(path.to_string_lossy().as_bytes());
        hasher.update([0u8]);
    }
    format!("{:x}", hasher.finalize())
}

fn mtime_utc(path: &Path) -> Option<DateTime<Utc>> {
    let modified = std::fs::metadata(path).ok()?.modified().ok()?;
    Some(modified.into())
}
