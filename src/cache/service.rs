//! Image Cache Service
//!
//! The disk cache engine: serves displayable paths for coin photos, fetching
//! and caching on miss, deriving thumbnails lazily, and reclaiming space by
//! age and size. Constructed once at startup and shared via `Arc`; no error
//! from this module ever reaches the UI as a crash — the worst outcome is an
//! unoptimized image load straight from the source URI.

use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use anyhow::{Context, Result};
use tracing::{debug, info, warn};

use crate::cache::metadata::{now_ms, CacheEntry, CacheMetadataStore};
use crate::fetch::Fetcher;
use crate::key::cache_key;

/// Default maximum cache size: 100 MB
const DEFAULT_MAX_CACHE_SIZE: u64 = 100 * 1024 * 1024;

/// Default entry time-to-live: 7 days, measured from creation
const DEFAULT_MAX_ENTRY_AGE: Duration = Duration::from_secs(7 * 24 * 60 * 60);

/// Default thumbnail bounding box
const DEFAULT_THUMBNAIL_DIMENSIONS: (u32, u32) = (150, 150);

/// Subdirectory for full-size artifacts
const IMAGES_DIR: &str = "images";

/// Subdirectory for derived thumbnails
const THUMBNAILS_DIR: &str = "thumbnails";

/// Cache configuration
#[derive(Debug, Clone)]
pub struct CacheConfig {
    /// Root directory holding artifact dirs and the metadata file
    pub cache_root: PathBuf,
    /// Size budget over full-size artifacts (thumbnails are not counted)
    pub max_cache_size_bytes: u64,
    /// TTL measured from `created_at`; access does not refresh it
    pub max_entry_age: Duration,
    /// Bounding box for derived thumbnails
    pub thumbnail_dimensions: (u32, u32),
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            cache_root: dirs::cache_dir()
                .unwrap_or_else(|| PathBuf::from("/tmp"))
                .join("coinshelf"),
            max_cache_size_bytes: DEFAULT_MAX_CACHE_SIZE,
            max_entry_age: DEFAULT_MAX_ENTRY_AGE,
            thumbnail_dimensions: DEFAULT_THUMBNAIL_DIMENSIONS,
        }
    }
}

/// Read-only snapshot of cache contents
#[derive(Debug, Clone, PartialEq)]
pub struct CacheStats {
    pub total_entries: usize,
    pub total_size_mb: f64,
    pub oldest_age_ms: u64,
    pub newest_age_ms: u64,
}

/// Disk-backed image cache for coin photos
///
/// Concurrent misses for the same URI are not deduplicated: both callers
/// fetch, both write, and the map converges to one valid entry. Wasted
/// bandwidth, never corruption.
pub struct ImageCacheService {
    config: CacheConfig,
    images_dir: PathBuf,
    thumbnails_dir: PathBuf,
    store: CacheMetadataStore,
    fetcher: Fetcher,
    entries: Mutex<HashMap<String, CacheEntry>>,
}

impl ImageCacheService {
    /// Bootstrap the cache: create artifact directories, load metadata, and
    /// run one reclamation pass.
    ///
    /// The service is constructed exactly once and injected wherever it is
    /// needed, so repeated initialization cannot race.
    pub async fn initialize(config: CacheConfig) -> Result<Arc<Self>> {
        let images_dir = config.cache_root.join(IMAGES_DIR);
        let thumbnails_dir = config.cache_root.join(THUMBNAILS_DIR);

        fs::create_dir_all(&images_dir)
            .with_context(|| format!("Failed to create image cache dir: {:?}", images_dir))?;
        fs::create_dir_all(&thumbnails_dir)
            .with_context(|| format!("Failed to create thumbnail dir: {:?}", thumbnails_dir))?;

        let store = CacheMetadataStore::new(&config.cache_root);
        let entries = store.load();

        let service = Arc::new(Self {
            images_dir,
            thumbnails_dir,
            store,
            fetcher: Fetcher::new().context("Failed to build HTTP client")?,
            entries: Mutex::new(entries),
            config,
        });

        service.run_reclamation()?;

        info!(
            cache_root = %service.config.cache_root.display(),
            entries = service.entries.lock().unwrap().len(),
            max_size_mb = service.config.max_cache_size_bytes / (1024 * 1024),
            "Image cache initialized"
        );

        Ok(service)
    }

    /// Primary read path: return a displayable path for `source_uri`.
    ///
    /// Hits update the access time and return the cached artifact (thumbnail
    /// when requested, derived lazily if the entry has none yet). Misses
    /// download the source. If the download fails the original URI is
    /// returned unchanged so the caller can still try to render it directly.
    pub async fn get_optimized_image(&self, source_uri: &str, use_thumbnail: bool) -> String {
        if source_uri.is_empty() {
            return String::new();
        }

        let key = cache_key(source_uri);

        if let Some(entry) = self.valid_entry(&key) {
            debug!(key = %key, "Image cache HIT");
            self.touch(&key);

            if use_thumbnail {
                if let Some(thumb) = self.ensure_thumbnail(&key, &entry).await {
                    return thumb.display().to_string();
                }
                // Thumbnail unavailable; full-size still serves
            }
            return entry.local_path.display().to_string();
        }

        debug!(key = %key, uri = source_uri, "Image cache MISS, fetching");
        self.fetch_and_cache(source_uri, &key, use_thumbnail).await
    }

    /// Best-effort warm of a list of sources using thumbnails.
    ///
    /// Items are fetched concurrently; per-item failures are logged and
    /// swallowed so one bad URI never aborts the batch.
    pub async fn preload_images(self: Arc<Self>, source_uris: &[String]) {
        let mut handles = Vec::with_capacity(source_uris.len());
        for uri in source_uris {
            if uri.is_empty() {
                continue;
            }
            let cache = Arc::clone(&self);
            let uri = uri.clone();
            handles.push(tokio::spawn(async move {
                cache.get_optimized_image(&uri, true).await;
            }));
        }
        for handle in handles {
            if let Err(e) = handle.await {
                warn!(error = %e, "Preload task panicked");
            }
        }
    }

    /// Best-effort dimension probe. Local sources are read in place; remote
    /// sources are probed from the cached artifact (fetching on miss).
    /// Returns `None` on any failure rather than raising.
    pub async fn get_image_dimensions(&self, source_uri: &str) -> Option<(u32, u32)> {
        if source_uri.is_empty() {
            return None;
        }

        let local = source_uri.strip_prefix("file://").unwrap_or(source_uri);
        let probe_target = if Path::new(local).exists() {
            local.to_string()
        } else {
            let cached = self.get_optimized_image(source_uri, false).await;
            if cached == source_uri {
                return None;
            }
            cached
        };

        match Fetcher::probe_dimensions(Path::new(&probe_target)) {
            Ok(dims) => Some(dims),
            Err(e) => {
                warn!(uri = source_uri, error = %e, "Failed to probe image dimensions");
                None
            }
        }
    }

    /// Delete both artifact directories and the metadata file, then
    /// re-bootstrap empty directories.
    ///
    /// Safe to call while fetches are in flight: an in-flight operation may
    /// recreate an entry afterwards, which is acceptable.
    pub fn clear_cache(&self) -> Result<()> {
        self.entries.lock().unwrap().clear();

        for dir in [&self.images_dir, &self.thumbnails_dir] {
            match fs::remove_dir_all(dir) {
                Ok(()) => {}
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
                Err(e) => return Err(e).with_context(|| format!("Failed to remove {:?}", dir)),
            }
            fs::create_dir_all(dir).with_context(|| format!("Failed to recreate {:?}", dir))?;
        }
        self.store.remove()?;

        info!("Image cache cleared");
        Ok(())
    }

    /// Current cache statistics, derived purely from metadata
    pub fn cache_stats(&self) -> CacheStats {
        let entries = self.entries.lock().unwrap();
        let now = now_ms();

        let mut total_size: u64 = 0;
        let mut oldest_age: u64 = 0;
        let mut newest_age: u64 = u64::MAX;
        for entry in entries.values() {
            total_size += entry.size;
            let age = entry.age_ms(now);
            oldest_age = oldest_age.max(age);
            newest_age = newest_age.min(age);
        }

        CacheStats {
            total_entries: entries.len(),
            total_size_mb: total_size as f64 / 1024.0 / 1024.0,
            oldest_age_ms: oldest_age,
            newest_age_ms: if newest_age == u64::MAX { 0 } else { newest_age },
        }
    }

    /// Combined age- and size-based eviction sweep.
    ///
    /// Expired entries go first; if the remaining total still exceeds the
    /// budget, live entries are evicted oldest-created first until it fits.
    /// Victim order is creation age, not access recency — a long-standing
    /// behavior kept as-is rather than silently upgraded to LRU. A failed
    /// file delete is logged and skipped; the entry leaves the metadata
    /// regardless, which keeps metadata the source of truth for later runs.
    /// Metadata is persisted once after the whole pass.
    pub fn run_reclamation(&self) -> Result<()> {
        let now = now_ms();
        let max_age_ms = self.max_age_ms();
        let budget = self.config.max_cache_size_bytes;

        {
            let mut entries = self.entries.lock().unwrap();

            let expired: Vec<String> = entries
                .iter()
                .filter(|(_, e)| e.age_ms(now) > max_age_ms)
                .map(|(k, _)| k.clone())
                .collect();
            for key in &expired {
                if let Some(entry) = entries.remove(key) {
                    debug!(key = %key, age_ms = entry.age_ms(now), "Reclaiming expired entry");
                    delete_entry_files(&entry);
                }
            }

            let mut total: u64 = entries.values().map(|e| e.size).sum();
            if total > budget {
                info!(
                    total_mb = total / (1024 * 1024),
                    budget_mb = budget / (1024 * 1024),
                    "Cache over size budget, evicting oldest entries"
                );

                let mut by_creation: Vec<(String, u64, u64)> = entries
                    .iter()
                    .map(|(k, e)| (k.clone(), e.created_at, e.size))
                    .collect();
                by_creation.sort_by_key(|(_, created_at, _)| *created_at);

                for (key, _, size) in by_creation {
                    if total <= budget {
                        break;
                    }
                    if let Some(entry) = entries.remove(&key) {
                        debug!(key = %key, size = size, "Evicted cache entry");
                        delete_entry_files(&entry);
                        total -= size;
                    }
                }
            }
        }

        self.persist();
        Ok(())
    }

    /// Cache root directory
    pub fn cache_root(&self) -> &Path {
        &self.config.cache_root
    }

    fn max_age_ms(&self) -> u64 {
        self.config.max_entry_age.as_millis() as u64
    }

    /// Look up an entry and check validity: within TTL and full-size file
    /// present on disk. Invalid entries (expired, or externally deleted) are
    /// purged so the caller falls through to a fresh fetch.
    fn valid_entry(&self, key: &str) -> Option<CacheEntry> {
        let entry = {
            let mut entries = self.entries.lock().unwrap();
            let entry = entries.get(key)?.clone();
            let expired = entry.age_ms(now_ms()) > self.max_age_ms();
            if !expired && entry.local_path.exists() {
                return Some(entry);
            }
            entries.remove(key);
            debug!(key = %key, expired = expired, "Purging invalid cache entry");
            entry
        };
        delete_entry_files(&entry);
        self.persist();
        None
    }

    /// Update an entry's access time and persist
    fn touch(&self, key: &str) {
        {
            let mut entries = self.entries.lock().unwrap();
            if let Some(entry) = entries.get_mut(key) {
                entry.last_accessed = now_ms();
            }
        }
        self.persist();
    }

    /// Download a source into the cache, optionally deriving a thumbnail,
    /// and record the entry. Returns the path to serve, or the original URI
    /// when the download fails.
    async fn fetch_and_cache(&self, source_uri: &str, key: &str, want_thumbnail: bool) -> String {
        let local_path = self.images_dir.join(format!("{}.jpg", key));

        let size = match self.fetcher.download(source_uri, &local_path).await {
            Ok(size) => size,
            Err(e) => {
                warn!(
                    uri = source_uri,
                    error = %e,
                    retryable = e.is_retryable(),
                    "Image download failed, serving original URI"
                );
                return source_uri.to_string();
            }
        };

        let now = now_ms();
        let mut entry = CacheEntry {
            uri: source_uri.to_string(),
            local_path: local_path.clone(),
            thumbnail_path: None,
            size,
            last_accessed: now,
            created_at: now,
        };

        let mut result = local_path.display().to_string();
        if want_thumbnail {
            if let Some(thumb) = self.derive_thumbnail(key, &local_path).await {
                result = thumb.display().to_string();
                entry.thumbnail_path = Some(thumb);
            }
        }

        self.entries.lock().unwrap().insert(key.to_string(), entry);
        self.persist();

        debug!(uri = source_uri, key = %key, size = size, "Cached image");
        result
    }

    /// Return the entry's thumbnail path, deriving and recording one if the
    /// entry has none (or its file vanished). `None` means derivation failed
    /// and the caller should serve the full-size path.
    async fn ensure_thumbnail(&self, key: &str, entry: &CacheEntry) -> Option<PathBuf> {
        if let Some(thumb) = &entry.thumbnail_path {
            if thumb.exists() {
                return Some(thumb.clone());
            }
        }

        let thumb = self.derive_thumbnail(key, &entry.local_path).await?;
        {
            let mut entries = self.entries.lock().unwrap();
            if let Some(e) = entries.get_mut(key) {
                e.thumbnail_path = Some(thumb.clone());
            }
        }
        self.persist();
        Some(thumb)
    }

    /// Run the decode/resize off the async runtime
    async fn derive_thumbnail(&self, key: &str, src: &Path) -> Option<PathBuf> {
        let dest = self.thumbnails_dir.join(format!("thumb_{}.jpg", key));
        let src = src.to_path_buf();
        let out = dest.clone();
        let dims = self.config.thumbnail_dimensions;

        let result =
            tokio::task::spawn_blocking(move || Fetcher::make_thumbnail(&src, &out, dims)).await;

        match result {
            Ok(Ok(())) => Some(dest),
            Ok(Err(e)) => {
                warn!(key = %key, error = %e, "Thumbnail derivation failed, using full-size");
                None
            }
            Err(e) => {
                warn!(key = %key, error = %e, "Thumbnail task panicked");
                None
            }
        }
    }

    /// Flush the in-memory map to disk. Best-effort: a failed write is
    /// logged and the cache keeps serving from memory.
    fn persist(&self) {
        let snapshot = self.entries.lock().unwrap().clone();
        if let Err(e) = self.store.save(&snapshot) {
            warn!(error = %e, "Failed to persist cache metadata");
        }
    }
}

/// Best-effort removal of an entry's artifacts (full-size and thumbnail)
fn delete_entry_files(entry: &CacheEntry) {
    let mut targets = vec![entry.local_path.clone()];
    if let Some(thumb) = &entry.thumbnail_path {
        targets.push(thumb.clone());
    }
    for path in targets {
        match fs::remove_file(&path) {
            Ok(()) => {}
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => warn!(path = %path.display(), error = %e, "Failed to delete cached file"),
        }
    }
}
