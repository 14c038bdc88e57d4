//! Metrics collection for the caching executor
//!
//! This module provides thread-safe metrics collection using atomic operations.
//! It tracks how requests were answered (hit, miss, validated, module response)
//! and how many bytes moved between the backend, the store and the client.

use std::sync::atomic::{AtomicU64, Ordering};

/// Metrics collector for the caching executor
///
/// All operations are thread-safe using atomic operations.
#[derive(Debug, Default)]
pub struct CacheMetrics {
    // Request statistics
    total_requests: AtomicU64,
    module_responses: AtomicU64,

    // Cache statistics
    cache_hits: AtomicU64,
    cache_misses: AtomicU64,
    cache_updates: AtomicU64,
    cache_failures: AtomicU64,

    // Backend statistics
    backend_calls: AtomicU64,
    entries_committed: AtomicU64,
    oversized_responses: AtomicU64,

    // Byte statistics
    bytes_from_backend: AtomicU64,
    bytes_from_cache: AtomicU64,
}

/// Snapshot of metrics at a point in time
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MetricsSnapshot {
    pub total_requests: u64,
    pub module_responses: u64,
    pub cache_hits: u64,
    pub cache_misses: u64,
    pub cache_updates: u64,
    pub cache_failures: u64,
    pub backend_calls: u64,
    pub entries_committed: u64,
    pub oversized_responses: u64,
    pub bytes_from_backend: u64,
    pub bytes_from_cache: u64,
}

impl CacheMetrics {
    /// Create a new metrics collector
    pub fn new() -> Self {
        Self::default()
    }

    /// Record an incoming request
    pub fn record_request(&self) {
        self.total_requests.fetch_add(1, Ordering::Relaxed);
    }

    /// Record a response generated by the cache module itself (501, 504, 400)
    pub fn record_module_response(&self) {
        self.module_responses.fetch_add(1, Ordering::Relaxed);
    }

    /// Record a cache hit
    pub fn record_cache_hit(&self) {
        self.cache_hits.fetch_add(1, Ordering::Relaxed);
    }

    /// Record a cache miss
    pub fn record_cache_miss(&self) {
        self.cache_misses.fetch_add(1, Ordering::Relaxed);
    }

    /// Record an entry refreshed through revalidation
    pub fn record_cache_update(&self) {
        self.cache_updates.fetch_add(1, Ordering::Relaxed);
    }

    /// Record a failure to read a cached entry
    pub fn record_cache_failure(&self) {
        self.cache_failures.fetch_add(1, Ordering::Relaxed);
    }

    /// Record a call forwarded to the backend
    pub fn record_backend_call(&self) {
        self.backend_calls.fetch_add(1, Ordering::Relaxed);
    }

    /// Record a backend response committed to the store
    pub fn record_entry_committed(&self) {
        self.entries_committed.fetch_add(1, Ordering::Relaxed);
    }

    /// Record a backend response whose body outgrew the object size limit
    pub fn record_oversized_response(&self) {
        self.oversized_responses.fetch_add(1, Ordering::Relaxed);
    }

    /// Record bytes buffered from the backend
    pub fn record_bytes_from_backend(&self, bytes: u64) {
        self.bytes_from_backend.fetch_add(bytes, Ordering::Relaxed);
    }

    /// Record bytes served out of the store
    pub fn record_bytes_from_cache(&self, bytes: u64) {
        self.bytes_from_cache.fetch_add(bytes, Ordering::Relaxed);
    }

    /// Get a snapshot of current metrics
    ///
    /// Due to the concurrent nature of the system, the snapshot may not be
    /// perfectly consistent across all fields.
    pub fn get_stats(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            total_requests: self.total_requests.load(Ordering::Relaxed),
            module_responses: self.module_responses.load(Ordering::Relaxed),
            cache_hits: self.cache_hits.load(Ordering::Relaxed),
            cache_misses: self.cache_misses.load(Ordering::Relaxed),
            cache_updates: self.cache_updates.load(Ordering::Relaxed),
            cache_failures: self.cache_failures.load(Ordering::Relaxed),
            backend_calls: self.backend_calls.load(Ordering::Relaxed),
            entries_committed: self.entries_committed.load(Ordering::Relaxed),
            oversized_responses: self.oversized_responses.load(Ordering::Relaxed),
            bytes_from_backend: self.bytes_from_backend.load(Ordering::Relaxed),
            bytes_from_cache: self.bytes_from_cache.load(Ordering::Relaxed),
        }
    }

    /// Reset all metrics to zero
    ///
    /// This is primarily useful for testing.
    pub fn reset(&self) {
        self.total_requests.store(0, Ordering::Relaxed);
        self.module_responses.store(0, Ordering::Relaxed);
        self.cache_hits.store(0, Ordering::Relaxed);
        self.cache_misses.store(0, Ordering::Relaxed);
        self.cache_updates.store(0, Ordering::Relaxed);
        self.cache_failures.store(0, Ordering::Relaxed);
        self.backend_calls.store(0, Ordering::Relaxed);
        self.entries_committed.store(0, Ordering::Relaxed);
        self.oversized_responses.store(0, Ordering::Relaxed);
        self.bytes_from_backend.store(0, Ordering::Relaxed);
        self.bytes_from_cache.store(0, Ordering::Relaxed);
    }
}

impl MetricsSnapshot {
    /// Calculate cache hit rate as a percentage (0.0 to 100.0)
    pub fn cache_hit_rate(&self) -> f64 {
        let total = self.cache_hits + self.cache_misses;
        if total == 0 {
            0.0
        } else {
            (self.cache_hits as f64 / total as f64) * 100.0
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::thread;

    #[test]
    fn test_record_cache_operations() {
        let metrics = CacheMetrics::new();

        metrics.record_cache_hit();
        metrics.record_cache_hit();
        metrics.record_cache_miss();
        metrics.record_cache_failure();
        metrics.record_cache_update();

        let stats = metrics.get_stats();
        assert_eq!(stats.cache_hits, 2);
        assert_eq!(stats.cache_misses, 1);
        assert_eq!(stats.cache_failures, 1);
        assert_eq!(stats.cache_updates, 1);
    }

    #[test]
    fn test_cache_hit_rate() {
        let metrics = CacheMetrics::new();
        assert_eq!(metrics.get_stats().cache_hit_rate(), 0.0);

        metrics.record_cache_hit();
        metrics.record_cache_hit();
        metrics.record_cache_hit();
        metrics.record_cache_miss();

        assert_eq!(metrics.get_stats().cache_hit_rate(), 75.0);
    }

    #[test]
    fn test_reset() {
        let metrics = CacheMetrics::new();
        metrics.record_request();
        metrics.record_backend_call();
        metrics.record_bytes_from_backend(512);

        metrics.reset();

        let stats = metrics.get_stats();
        assert_eq!(stats.total_requests, 0);
        assert_eq!(stats.backend_calls, 0);
        assert_eq!(stats.bytes_from_backend, 0);
    }

    #[test]
    fn test_concurrent_recording() {
        let metrics = Arc::new(CacheMetrics::new());
        let mut handles = vec![];

        for _ in 0..8 {
            let metrics = Arc::clone(&metrics);
            handles.push(thread::spawn(move || {
                for _ in 0..1000 {
                    metrics.record_request();
                    metrics.record_bytes_from_cache(2);
                }
            }));
        }

        for handle in handles {
            handle.join().unwrap();
        }

        let stats = metrics.get_stats();
        assert_eq!(stats.total_requests, 8000);
        assert_eq!(stats.bytes_from_cache, 16000);
    }
}
