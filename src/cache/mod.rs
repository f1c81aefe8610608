//! Disk-backed image cache
//!
//! Durable metadata plus the cache engine: lookup, fetch-on-miss, thumbnail
//! derivation, and combined age/size reclamation.

pub mod metadata;
pub mod service;

pub use metadata::{CacheEntry, CacheMetadataStore};
pub use service::{CacheConfig, CacheStats, ImageCacheService};
