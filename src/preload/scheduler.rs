//! Preload Scheduler
//!
//! Warms the image cache ahead of user need so scrolling a collection stays
//! smooth. Sources are dispatched in bounded batches with settle-all
//! semantics; low-priority work is paced with artificial delays so it never
//! competes with on-screen loads. Priority tiers are configuration presets
//! on one scheduler type, not subclasses.

use std::collections::HashSet;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::time::sleep;
use tracing::{debug, warn};

use crate::cache::ImageCacheService;

/// How often a gated scheduler re-checks whether it may start its next batch
const GATE_POLL_INTERVAL: Duration = Duration::from_millis(25);

/// Scheduling priority for a preload tier
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PreloadPriority {
    /// On-screen content: no pacing delays
    High,
    /// General background warming
    Normal,
    /// Off-screen lookahead: staggered starts and inter-batch pauses
    Low,
}

/// Tier configuration: priority, concurrency bound, pacing
#[derive(Debug, Clone, Copy)]
pub struct PreloadConfig {
    pub priority: PreloadPriority,
    /// Items dispatched concurrently per batch
    pub batch_size: usize,
    /// Pacing unit for `Low` priority: item `i` in a batch starts after
    /// `i * inter_item_delay`, and batches are separated by one more delay
    pub inter_item_delay: Duration,
}

impl PreloadConfig {
    /// On-screen items: maximum concurrency, no delays
    pub fn visible() -> Self {
        Self {
            priority: PreloadPriority::High,
            batch_size: 10,
            inter_item_delay: Duration::ZERO,
        }
    }

    /// Collection-list warming
    pub fn collection() -> Self {
        Self {
            priority: PreloadPriority::Normal,
            batch_size: 3,
            inter_item_delay: Duration::from_millis(50),
        }
    }

    /// Off-screen lookahead: small batches, heavy pacing
    pub fn upcoming() -> Self {
        Self {
            priority: PreloadPriority::Low,
            batch_size: 5,
            inter_item_delay: Duration::from_millis(200),
        }
    }
}

impl Default for PreloadConfig {
    fn default() -> Self {
        Self {
            priority: PreloadPriority::Normal,
            batch_size: 5,
            inter_item_delay: Duration::from_millis(100),
        }
    }
}

/// Progress snapshot for UI feedback
#[derive(Debug, Clone, PartialEq)]
pub struct PreloadProgress {
    pub completed: usize,
    pub total: usize,
    pub in_flight: bool,
    /// `completed / total`; 1.0 when nothing has been requested
    pub progress: f64,
}

/// Drives bounded-concurrency, priority-aware warming of an image cache.
///
/// A scheduler remembers every URI it has been asked to preload, so repeated
/// calls with overlapping lists do no duplicate work. There is no failure
/// state: per-item errors are absorbed by the cache's own fallback behavior,
/// and a superseded invocation simply lets its in-flight items finish.
pub struct PreloadScheduler {
    cache: Arc<ImageCacheService>,
    config: PreloadConfig,
    /// URIs already requested in this scheduler's lifetime
    requested: Mutex<HashSet<String>>,
    completed: AtomicUsize,
    total: AtomicUsize,
    /// Number of `preload` invocations currently running
    active: AtomicUsize,
}

impl PreloadScheduler {
    pub fn new(cache: Arc<ImageCacheService>, config: PreloadConfig) -> Self {
        Self {
            cache,
            config,
            requested: Mutex::new(HashSet::new()),
            completed: AtomicUsize::new(0),
            total: AtomicUsize::new(0),
            active: AtomicUsize::new(0),
        }
    }

    /// Warm the cache for `source_uris`, skipping anything already requested
    pub async fn preload(&self, source_uris: &[String]) {
        self.preload_when(source_uris, || true).await;
    }

    /// Like [`preload`](Self::preload), but each batch waits for `gate` to
    /// return `true` before starting. An already-started batch always runs
    /// to completion even if the gate closes mid-batch (soft preemption).
    pub async fn preload_when(&self, source_uris: &[String], gate: impl Fn() -> bool) {
        let fresh: Vec<String> = {
            let mut requested = self.requested.lock().unwrap();
            let mut fresh = Vec::new();
            for uri in source_uris {
                if uri.is_empty() || requested.contains(uri) {
                    continue;
                }
                requested.insert(uri.clone());
                fresh.push(uri.clone());
            }
            fresh
        };
        if fresh.is_empty() {
            return;
        }

        self.total.fetch_add(fresh.len(), Ordering::SeqCst);
        self.active.fetch_add(1, Ordering::SeqCst);

        debug!(
            items = fresh.len(),
            batch_size = self.config.batch_size,
            priority = ?self.config.priority,
            "Preload run starting"
        );

        let batch_size = self.config.batch_size.max(1);
        let mut batches = fresh.chunks(batch_size).peekable();
        while let Some(batch) = batches.next() {
            while !gate() {
                sleep(GATE_POLL_INTERVAL).await;
            }

            let mut handles = Vec::with_capacity(batch.len());
            for (index, uri) in batch.iter().enumerate() {
                let cache = Arc::clone(&self.cache);
                let uri = uri.clone();
                let stagger = if self.config.priority == PreloadPriority::Low {
                    self.config.inter_item_delay * index as u32
                } else {
                    Duration::ZERO
                };
                handles.push(tokio::spawn(async move {
                    if !stagger.is_zero() {
                        sleep(stagger).await;
                    }
                    cache.get_optimized_image(&uri, true).await;
                }));
            }

            // Settle-all: one item's failure never cancels its siblings, and
            // every outcome counts toward progress
            for handle in handles {
                if let Err(e) = handle.await {
                    warn!(error = %e, "Preload item panicked");
                }
                self.completed.fetch_add(1, Ordering::SeqCst);
            }

            if self.config.priority == PreloadPriority::Low && batches.peek().is_some() {
                sleep(self.config.inter_item_delay).await;
            }
        }

        self.active.fetch_sub(1, Ordering::SeqCst);
        debug!(completed = self.completed.load(Ordering::SeqCst), "Preload run finished");
    }

    /// Whether any preload invocation is currently running
    pub fn is_preloading(&self) -> bool {
        self.active.load(Ordering::SeqCst) > 0
    }

    /// Current progress snapshot
    pub fn progress(&self) -> PreloadProgress {
        let completed = self.completed.load(Ordering::SeqCst);
        let total = self.total.load(Ordering::SeqCst);
        PreloadProgress {
            completed,
            total,
            in_flight: self.is_preloading(),
            progress: if total > 0 {
                completed as f64 / total as f64
            } else {
                1.0
            },
        }
    }

    /// Forget everything requested so far and zero the counters
    pub fn reset(&self) {
        self.requested.lock().unwrap().clear();
        self.completed.store(0, Ordering::SeqCst);
        self.total.store(0, Ordering::SeqCst);
    }
}

/// Two-tier viewport warming: on-screen items first, lookahead second.
///
/// The `visible` tier runs at high priority with no pacing; the `upcoming`
/// tier runs at low priority and each of its batches is gated on the visible
/// tier being idle. Visible work therefore always preempts upcoming work at
/// batch boundaries — that ordering is a contract of this type.
pub struct ViewportPreloader {
    visible: Arc<PreloadScheduler>,
    upcoming: Arc<PreloadScheduler>,
}

impl ViewportPreloader {
    pub fn new(cache: Arc<ImageCacheService>) -> Self {
        Self {
            visible: Arc::new(PreloadScheduler::new(
                Arc::clone(&cache),
                PreloadConfig::visible(),
            )),
            upcoming: Arc::new(PreloadScheduler::new(cache, PreloadConfig::upcoming())),
        }
    }

    /// Warm visible items, then lookahead items gated on visible idleness
    pub async fn preload(&self, visible_uris: &[String], upcoming_uris: &[String]) {
        self.visible.preload(visible_uris).await;

        let visible = Arc::clone(&self.visible);
        self.upcoming
            .preload_when(upcoming_uris, move || !visible.is_preloading())
            .await;
    }

    /// The high-priority tier, for warming newly visible items directly
    pub fn visible(&self) -> &Arc<PreloadScheduler> {
        &self.visible
    }

    /// The low-priority lookahead tier
    pub fn upcoming(&self) -> &Arc<PreloadScheduler> {
        &self.upcoming
    }

    /// Average of both tiers' progress, for a single UI progress bar
    pub fn total_progress(&self) -> f64 {
        (self.visible.progress().progress + self.upcoming.progress().progress) / 2.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::CacheConfig;
    use std::fs;
    use std::path::Path;
    use std::sync::atomic::AtomicBool;
    use tokio::time::Instant;

    async fn test_cache(dir: &Path) -> Arc<ImageCacheService> {
        ImageCacheService::initialize(CacheConfig {
            cache_root: dir.join("cache"),
            ..CacheConfig::default()
        })
        .await
        .unwrap()
    }

    fn sources(dir: &Path, names: &[&str]) -> Vec<String> {
        names
            .iter()
            .map(|name| {
                let path = dir.join(name);
                fs::write(&path, b"coin scan").unwrap();
                path.display().to_string()
            })
            .collect()
    }

    #[tokio::test]
    async fn test_preload_idempotent_across_overlapping_lists() {
        let dir = tempfile::tempdir().unwrap();
        let cache = test_cache(dir.path()).await;
        let uris = sources(dir.path(), &["a.jpg", "b.jpg", "c.jpg"]);

        let scheduler = PreloadScheduler::new(Arc::clone(&cache), PreloadConfig::default());
        scheduler.preload(&uris[0..2]).await; // a, b
        scheduler.preload(&uris[1..3]).await; // b, c — b must be skipped

        let progress = scheduler.progress();
        assert_eq!(progress.total, 3);
        assert_eq!(progress.completed, 3);
        assert_eq!(progress.progress, 1.0);
        assert_eq!(cache.cache_stats().total_entries, 3);
    }

    #[tokio::test]
    async fn test_empty_uris_filtered_out() {
        let dir = tempfile::tempdir().unwrap();
        let cache = test_cache(dir.path()).await;
        let mut uris = sources(dir.path(), &["a.jpg"]);
        uris.push(String::new());

        let scheduler = PreloadScheduler::new(cache, PreloadConfig::default());
        scheduler.preload(&uris).await;
        assert_eq!(scheduler.progress().total, 1);
    }

    #[tokio::test]
    async fn test_failures_still_count_toward_progress() {
        let dir = tempfile::tempdir().unwrap();
        let cache = test_cache(dir.path()).await;
        let missing = vec![
            dir.path().join("gone1.jpg").display().to_string(),
            dir.path().join("gone2.jpg").display().to_string(),
        ];

        let scheduler = PreloadScheduler::new(Arc::clone(&cache), PreloadConfig::default());
        scheduler.preload(&missing).await;

        let progress = scheduler.progress();
        assert_eq!(progress.completed, 2);
        assert_eq!(progress.progress, 1.0);
        assert!(!progress.in_flight);
        assert_eq!(cache.cache_stats().total_entries, 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_low_priority_pacing() {
        let dir = tempfile::tempdir().unwrap();
        let cache = test_cache(dir.path()).await;
        // Nonexistent sources fail instantly, leaving only the pacing delays
        let uris: Vec<String> = (0..4)
            .map(|i| dir.path().join(format!("gone{}.jpg", i)).display().to_string())
            .collect();

        let scheduler = PreloadScheduler::new(
            cache,
            PreloadConfig {
                priority: PreloadPriority::Low,
                batch_size: 2,
                inter_item_delay: Duration::from_millis(100),
            },
        );

        let started = Instant::now();
        scheduler.preload(&uris).await;
        let elapsed = started.elapsed();

        // Batch 1: second item staggered 100ms; 100ms between batches;
        // batch 2: second item staggered another 100ms. Two batches total.
        assert!(elapsed >= Duration::from_millis(300), "elapsed {:?}", elapsed);
        assert_eq!(scheduler.progress().completed, 4);
    }

    #[tokio::test(start_paused = true)]
    async fn test_high_priority_skips_delays() {
        let dir = tempfile::tempdir().unwrap();
        let cache = test_cache(dir.path()).await;
        let uris: Vec<String> = (0..4)
            .map(|i| dir.path().join(format!("gone{}.jpg", i)).display().to_string())
            .collect();

        let scheduler = PreloadScheduler::new(
            cache,
            PreloadConfig {
                priority: PreloadPriority::High,
                batch_size: 2,
                inter_item_delay: Duration::from_millis(100),
            },
        );

        let started = Instant::now();
        scheduler.preload(&uris).await;
        assert!(started.elapsed() < Duration::from_millis(100));
    }

    #[tokio::test(start_paused = true)]
    async fn test_gate_blocks_batch_start() {
        let dir = tempfile::tempdir().unwrap();
        let cache = test_cache(dir.path()).await;
        let uris = sources(dir.path(), &["a.jpg"]);

        let scheduler = Arc::new(PreloadScheduler::new(cache, PreloadConfig::upcoming()));
        let open = Arc::new(AtomicBool::new(false));

        let task = {
            let scheduler = Arc::clone(&scheduler);
            let open = Arc::clone(&open);
            tokio::spawn(async move {
                scheduler
                    .preload_when(&uris, move || open.load(Ordering::SeqCst))
                    .await;
            })
        };

        // Give the run a chance to reach the gate; nothing may complete
        for _ in 0..20 {
            tokio::task::yield_now().await;
        }
        assert_eq!(scheduler.progress().completed, 0);
        assert!(scheduler.is_preloading());

        open.store(true, Ordering::SeqCst);
        task.await.unwrap();
        assert_eq!(scheduler.progress().completed, 1);
        assert!(!scheduler.is_preloading());
    }

    #[tokio::test]
    async fn test_reset_allows_rewarming() {
        let dir = tempfile::tempdir().unwrap();
        let cache = test_cache(dir.path()).await;
        let uris = sources(dir.path(), &["a.jpg"]);

        let scheduler = PreloadScheduler::new(cache, PreloadConfig::default());
        scheduler.preload(&uris).await;
        assert_eq!(scheduler.progress().total, 1);

        scheduler.reset();
        let progress = scheduler.progress();
        assert_eq!(progress.total, 0);
        assert_eq!(progress.completed, 0);

        // Same URI is fetched again after a reset
        scheduler.preload(&uris).await;
        assert_eq!(scheduler.progress().completed, 1);
    }

    #[tokio::test]
    async fn test_viewport_preloader_orders_tiers() {
        let dir = tempfile::tempdir().unwrap();
        let cache = test_cache(dir.path()).await;
        let visible = sources(dir.path(), &["v1.jpg", "v2.jpg"]);
        let upcoming = sources(dir.path(), &["u1.jpg"]);

        let preloader = ViewportPreloader::new(Arc::clone(&cache));
        preloader.preload(&visible, &upcoming).await;

        assert_eq!(preloader.visible().progress().completed, 2);
        assert_eq!(preloader.upcoming().progress().completed, 1);
        assert_eq!(preloader.total_progress(), 1.0);
        assert_eq!(cache.cache_stats().total_entries, 3);
    }

    #[tokio::test]
    async fn test_fresh_scheduler_reports_complete_progress() {
        let dir = tempfile::tempdir().unwrap();
        let cache = test_cache(dir.path()).await;
        let scheduler = PreloadScheduler::new(cache, PreloadConfig::visible());

        let progress = scheduler.progress();
        assert_eq!(progress.total, 0);
        assert_eq!(progress.progress, 1.0);
        assert!(!progress.in_flight);
    }
}
