//! # Cache Module
//!
//! Bounded in-memory caches shared by every guild.
//!
//! - [`lru_cache::LRUCache`]: generic LRU with optional per-entry TTL and
//!   hit/miss/eviction metrics.
//! - [`VideoInfoCache`]: extraction results keyed by video id. Entries expire
//!   with the stream URL they carry, so a hit is always playable.
//!
//! Nothing here is persisted; the caches are rebuilt on every start.

pub mod lru_cache;

use crate::sources::VideoInfo;
use lru_cache::LRUCache;
use std::time::Duration;
use tracing::{debug, info};

/// Snapshot reported by `/stats`
#[derive(Debug, Clone, PartialEq)]
pub struct CacheStats {
    pub size: usize,
    pub max_size: usize,
    pub hits: u64,
    pub misses: u64,
    pub total_requests: u64,
    /// Percentage (0-100)
    pub hit_rate: f64,
}

/// Extraction results keyed by video id.
#[derive(Debug, Clone)]
pub struct VideoInfoCache {
    inner: LRUCache<String, VideoInfo>,
}

impl VideoInfoCache {
    pub fn new(max_size: usize, ttl: Duration) -> Self {
        Self {
            inner: LRUCache::with_ttl(max_size, Some(ttl)),
        }
    }

    pub fn get(&self, video_id: &str) -> Option<VideoInfo> {
        let hit = self.inner.get(&video_id.to_string());
        if hit.is_some() {
            debug!("✅ Cache hit para: {}", video_id);
        }
        hit
    }

    pub fn insert(&self, info: VideoInfo) {
        if info.id.is_empty() {
            return;
        }
        debug!("💾 Cached: {}", info.id);
        self.inner.insert(info.id.clone(), info);
    }

    pub fn stats(&self) -> CacheStats {
        let metrics = self.inner.metrics();
        CacheStats {
            size: self.inner.len(),
            max_size: self.inner.capacity(),
            hits: metrics.hits,
            misses: metrics.misses,
            total_requests: metrics.total_requests(),
            hit_rate: metrics.hit_rate() * 100.0,
        }
    }

    /// Removes expired entries; called from the periodic sweep.
    pub fn cleanup_old_entries(&self) {
        let removed = self.inner.cleanup_expired();
        if removed > 0 {
            info!("🧹 Cache cleanup: removed {} expired entries", removed);
        }
    }
}
