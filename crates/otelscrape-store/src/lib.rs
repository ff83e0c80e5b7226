//! The contract §4.3 describes, plus two backends: an embedded relational
//! store (sqlite, via `rusqlite`) and a remote key-value store
//! (valkey/redis). Both are reached behind blocking-safe I/O wrapped in
//! `tokio::task::spawn_blocking` (sqlite) or a native async client (redis),
//! the same separation `tokf-cli`'s `tracking`/`history` modules keep
//! between pure computation and rusqlite I/O.

pub mod sqlite;
#[cfg(feature = "valkey")]
pub mod valkey;

use async_trait::async_trait;

/// Shared contract both backends implement. All methods are fallible with
/// `otelscrape_common::ScrapeError` carrying `ErrorKind::Store`.
#[async_trait]
pub trait FingerprintStore: Send + Sync {
    async fn load_last_success(&self, source: &str) -> Result<Option<i64>, otelscrape_common::ScrapeError>;

    async fn save_last_success(&self, source: &str, end: i64) -> Result<(), otelscrape_common::ScrapeError>;

    async fn seen(&self, source: &str, digest: &str) -> Result<bool, otelscrape_common::ScrapeError>;

    /// Upsert `digests` with `expires_at = now + ttl_seconds`. Must not be
    /// called with more than 10_000 digests per invocation (backpressure
    /// cap from the concurrency design).
    async fn insert_many(
        &self,
        source: &str,
        digests: &[String],
        ttl_seconds: u64,
    ) -> Result<(), otelscrape_common::ScrapeError>;

    /// Evict oldest entries (by `created_at`, not `expires_at`) until the
    /// source has at most `max_entries`.
    async fn enforce_cap(&self, source: &str, max_entries: usize) -> Result<(), otelscrape_common::ScrapeError>;

    /// Remove all expired entries across all sources. Returns the count
    /// removed, for the `scraper_cleanup_items_total` self-telemetry metric.
    async fn gc_expired(&self) -> Result<u64, otelscrape_common::ScrapeError>;

    /// Remove every key whose source is absent from `live_sources`.
    async fn gc_orphans(&self, live_sources: &[String]) -> Result<u64, otelscrape_common::ScrapeError>;
}

/// Unix-epoch seconds "now", used throughout the store so tests can stub it
/// by constructing records directly rather than needing to mock the clock.
pub fn now_unix() -> i64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| i64::try_from(d.as_secs()).unwrap_or(i64::MAX))
        .unwrap_or(0)
}
