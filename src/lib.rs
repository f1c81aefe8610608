//! CoinShelf image cache
//!
//! Disk-backed, size- and age-bounded cache for coin photographs, paired with
//! a priority-tiered preload scheduler that keeps collection scrolling smooth.
//! The UI layer consumes [`ImageCacheService`] for displayable paths and a
//! [`PreloadScheduler`] (or [`ViewportPreloader`]) for background warming;
//! nothing else reaches into cache internals.

pub mod cache;
pub mod fetch;
pub mod key;
pub mod preload;

pub use cache::{CacheConfig, CacheEntry, CacheMetadataStore, CacheStats, ImageCacheService};
pub use fetch::{FetchError, Fetcher};
pub use key::cache_key;
pub use preload::{
    PreloadConfig, PreloadPriority, PreloadProgress, PreloadScheduler, ViewportPreloader,
};
