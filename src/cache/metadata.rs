//! Cache Metadata Store
//!
//! Durable mapping from cache key to entry metadata, kept as a single
//! pretty-printed JSON file inside the cache root. Loading fails soft: a
//! missing, unreadable, or corrupt file means the cache starts cold rather
//! than crashing the app.

use std::collections::HashMap;
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::time::{SystemTime, UNIX_EPOCH};

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

/// Metadata filename inside the cache root
pub const METADATA_FILE: &str = "image_cache_metadata.json";

/// Current unix time in milliseconds
pub(crate) fn now_ms() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as u64
}

/// One cached image: the original source plus on-disk artifacts.
///
/// Disk field names (`uri`, `localPath`, `thumbnailPath`, `size`,
/// `lastAccessed`, `createdAt`) and epoch-millisecond timestamps match the
/// format the mobile app has always written, so an existing metadata file
/// stays readable.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CacheEntry {
    /// Original remote or local identifier
    pub uri: String,
    /// Path to the full-size cached artifact
    pub local_path: PathBuf,
    /// Path to the derived thumbnail, present only if one was ever requested
    #[serde(skip_serializing_if = "Option::is_none")]
    pub thumbnail_path: Option<PathBuf>,
    /// Size of the full-size artifact in bytes (thumbnails are not budgeted)
    pub size: u64,
    /// Last cache-hit time, epoch milliseconds
    pub last_accessed: u64,
    /// First-cached time, epoch milliseconds; TTL is measured from here
    pub created_at: u64,
}

impl CacheEntry {
    /// Age of this entry in milliseconds as of `now`
    pub fn age_ms(&self, now: u64) -> u64 {
        now.saturating_sub(self.created_at)
    }
}

/// Durable key -> CacheEntry mapping
///
/// Single-process, single-writer. Callers hold the in-memory map; this type
/// only knows how to read and atomically rewrite the file.
pub struct CacheMetadataStore {
    path: PathBuf,
}

impl CacheMetadataStore {
    /// Create a store rooted at `cache_root`
    pub fn new(cache_root: &Path) -> Self {
        Self {
            path: cache_root.join(METADATA_FILE),
        }
    }

    /// Path to the metadata file
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Load the metadata map, failing soft to empty on any error
    pub fn load(&self) -> HashMap<String, CacheEntry> {
        let contents = match fs::read_to_string(&self.path) {
            Ok(c) => c,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                debug!(path = %self.path.display(), "No metadata file, starting cold");
                return HashMap::new();
            }
            Err(e) => {
                warn!(path = %self.path.display(), error = %e, "Failed to read cache metadata");
                return HashMap::new();
            }
        };

        match serde_json::from_str::<HashMap<String, CacheEntry>>(&contents) {
            Ok(map) => {
                debug!(entries = map.len(), "Loaded cache metadata");
                map
            }
            Err(e) => {
                warn!(path = %self.path.display(), error = %e, "Corrupt cache metadata, resetting");
                HashMap::new()
            }
        }
    }

    /// Atomically overwrite the metadata file with the given map
    pub fn save(&self, entries: &HashMap<String, CacheEntry>) -> Result<()> {
        let json = serde_json::to_string_pretty(entries)
            .context("Failed to serialize cache metadata")?;

        let parent = self
            .path
            .parent()
            .context("Metadata path has no parent directory")?;
        let mut tmp = tempfile::NamedTempFile::new_in(parent)
            .context("Failed to create temp file for metadata")?;
        tmp.write_all(json.as_bytes())
            .context("Failed to write cache metadata")?;
        tmp.persist(&self.path)
            .with_context(|| format!("Failed to persist metadata file: {:?}", self.path))?;

        Ok(())
    }

    /// Delete the metadata file if present
    pub fn remove(&self) -> Result<()> {
        match fs::remove_file(&self.path) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e).with_context(|| format!("Failed to remove metadata: {:?}", self.path)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn entry(uri: &str, size: u64) -> CacheEntry {
        CacheEntry {
            uri: uri.to_string(),
            local_path: PathBuf::from(format!("/cache/images/{}.jpg", size)),
            thumbnail_path: None,
            size,
            last_accessed: now_ms(),
            created_at: now_ms(),
        }
    }

    #[test]
    fn test_missing_file_loads_empty() {
        let dir = tempfile::tempdir().unwrap();
        let store = CacheMetadataStore::new(dir.path());
        assert!(store.load().is_empty());
    }

    #[test]
    fn test_save_load_roundtrip() {
        let dir = tempfile::tempdir().unwrap();
        let store = CacheMetadataStore::new(dir.path());

        let mut map = HashMap::new();
        map.insert("obv.jpg".to_string(), entry("https://x/obv.jpg", 1024));
        map.insert("rev.jpg".to_string(), entry("https://x/rev.jpg", 2048));
        store.save(&map).unwrap();

        let loaded = store.load();
        assert_eq!(loaded.len(), 2);
        assert_eq!(loaded["obv.jpg"].size, 1024);
        assert_eq!(loaded["rev.jpg"].uri, "https://x/rev.jpg");
    }

    #[test]
    fn test_corrupt_file_loads_empty() {
        let dir = tempfile::tempdir().unwrap();
        let store = CacheMetadataStore::new(dir.path());
        fs::write(store.path(), "{not valid json").unwrap();

        assert!(store.load().is_empty());
    }

    #[test]
    fn test_disk_format_field_names() {
        let dir = tempfile::tempdir().unwrap();
        let store = CacheMetadataStore::new(dir.path());

        let mut map = HashMap::new();
        let mut e = entry("https://x/obv.jpg", 7);
        e.thumbnail_path = Some(PathBuf::from("/cache/thumbnails/thumb_obv.jpg"));
        map.insert("obv.jpg".to_string(), e);
        store.save(&map).unwrap();

        let raw = fs::read_to_string(store.path()).unwrap();
        for field in ["\"uri\"", "\"localPath\"", "\"thumbnailPath\"", "\"size\"", "\"lastAccessed\"", "\"createdAt\""] {
            assert!(raw.contains(field), "missing field {}", field);
        }
        // Pretty-printed for debuggability
        assert!(raw.contains('\n'));
    }

    #[test]
    fn test_absent_thumbnail_omitted_on_disk() {
        let dir = tempfile::tempdir().unwrap();
        let store = CacheMetadataStore::new(dir.path());

        let mut map = HashMap::new();
        map.insert("obv.jpg".to_string(), entry("https://x/obv.jpg", 7));
        store.save(&map).unwrap();

        let raw = fs::read_to_string(store.path()).unwrap();
        assert!(!raw.contains("thumbnailPath"));
    }

    #[test]
    fn test_remove_is_idempotent() {
        let dir = tempfile::tempdir().unwrap();
        let store = CacheMetadataStore::new(dir.path());
        store.save(&HashMap::new()).unwrap();

        store.remove().unwrap();
        store.remove().unwrap();
        assert!(!store.path().exists());
    }
}
