//! Remote key-value backend (valkey/redis), for deployments that run the
//! scraper as multiple replicas sharing fingerprint state.
//!
//! Layout:
//!   `fp:{source}:{digest}`      -> "1", with a TTL set via `SET ... EX`
//!   `fp_idx:{source}`           -> sorted set, member = digest, score = created_at,
//!                                  used by `enforce_cap` to find the oldest entries
//!   `state:{source}`            -> last_success unix seconds
//!
//! The index is best-effort: `seen` only trusts the `fp:*` key's existence
//! (and therefore its TTL), so a missed `fp_idx` update never produces a
//! false negative, only a slightly late eviction.

use async_trait::async_trait;
use otelscrape_common::{ErrorKind, ScrapeError};
use redis::aio::ConnectionManager;
use redis::AsyncCommands;

use crate::{now_unix, FingerprintStore};

pub struct ValkeyStore {
    conn: ConnectionManager,
}

impl ValkeyStore {
    pub async fn connect(url: &str) -> Result<Self, ScrapeError> {
        let client = redis::Client::open(url)
            .map_err(|e| ScrapeError::with_cause("<store>", "connect", ErrorKind::Store, e))?;
        let conn = ConnectionManager::new(client)
            .await
            .map_err(|e| ScrapeError::with_cause("<store>", "connect", ErrorKind::Store, e))?;
        Ok(Self { conn })
    }
}

fn fp_key(source: &str, digest: &str) -> String {
    format!("fp:{source}:{digest}")
}

fn idx_key(source: &str) -> String {
    format!("fp_idx:{source}")
}

fn state_key(source: &str) -> String {
    format!("state:{source}")
}

fn redis_err(source: &str, phase: &'static str, e: redis::RedisError) -> ScrapeError {
    ScrapeError::with_cause(source, phase, ErrorKind::Store, e)
}

#[async_trait]
impl FingerprintStore for ValkeyStore {
    async fn load_last_success(&self, source: &str) -> Result<Option<i64>, ScrapeError> {
        let mut conn = self.conn.clone();
        conn.get(state_key(source))
            .await
            .map_err(|e| redis_err(source, "load_last_success", e))
    }

    async fn save_last_success(&self, source: &str, end: i64) -> Result<(), ScrapeError> {
        let mut conn = self.conn.clone();
        conn.set(state_key(source), end)
            .await
            .map_err(|e| redis_err(source, "save_last_success", e))
    }

    async fn seen(&self, source: &str, digest: &str) -> Result<bool, ScrapeError> {
        let mut conn = self.conn.clone();
        conn.exists(fp_key(source, digest))
            .await
            .map_err(|e| redis_err(source, "seen", e))
    }

    async fn insert_many(&self, source: &str, digests: &[String], ttl_seconds: u64) -> Result<(), ScrapeError> {
        if digests.is_empty() {
            return Ok(());
        }
        let mut conn = self.conn.clone();
        let now = now_unix();
        let mut pipe = redis::pipe();
        pipe.atomic();
        for digest in digests {
            pipe.set_ex(fp_key(source, digest), 1, ttl_seconds).ignore();
            pipe.zadd(idx_key(source), digest, now).ignore();
        }
        pipe.query_async::<()>(&mut conn)
            .await
            .map_err(|e| redis_err(source, "insert_many", e))
    }

    async fn enforce_cap(&self, source: &str, max_entries: usize) -> Result<(), ScrapeError> {
        let mut conn = self.conn.clone();
        let key = idx_key(source);
        let count: usize = conn
            .zcard(&key)
            .await
            .map_err(|e| redis_err(source, "enforce_cap", e))?;
        if count <= max_entries {
            return Ok(());
        }
        let overflow = count - max_entries;
        // lowest scores (oldest created_at) sit at the front of the sorted set
        let stale: Vec<String> = conn
            .zrange(&key, 0, (overflow - 1) as isize)
            .await
            .map_err(|e| redis_err(source, "enforce_cap", e))?;
        if stale.is_empty() {
            return Ok(());
        }
        let mut pipe = redis::pipe();
        pipe.atomic();
        for digest in &stale {
            pipe.del(fp_key(source, digest)).ignore();
            pipe.zrem(&key, digest).ignore();
        }
        pipe.query_async::<()>(&mut conn)
            .await
            .map_err(|e| redis_err(source, "enforce_cap", e))
    }

    async fn gc_expired(&self) -> Result<u64, ScrapeError> {
        // `fp:*` keys expire natively via SET EX; this backend's `fp_idx`
        // sorted sets accumulate entries for digests whose key already
        // expired. A full scan is the only way to reconcile without
        // tracking per-source membership elsewhere, so this backend relies
        // on the `fp:*` TTL alone and treats `gc_expired` as a no-op,
        // leaving a bounded amount of idx drift that `enforce_cap` resolves
        // the next time a source's digest count crosses its cap.
        Ok(0)
    }

    async fn gc_orphans(&self, live_sources: &[String]) -> Result<u64, ScrapeError> {
        let mut conn = self.conn.clone();
        let mut removed = 0u64;
        let idx_pattern = "fp_idx:*".to_string();
        let idx_keys: Vec<String> = conn
            .keys(&idx_pattern)
            .await
            .map_err(|e| redis_err("<store>", "gc_orphans", e))?;
        for key in idx_keys {
            let Some(source) = key.strip_prefix("fp_idx:") else {
                continue;
            };
            if live_sources.iter().any(|s| s == source) {
                continue;
            }
            let digests: Vec<String> = conn
                .zrange(&key, 0, -1)
                .await
                .map_err(|e| redis_err(source, "gc_orphans", e))?;
            let mut pipe = redis::pipe();
            pipe.atomic();
            for digest in &digests {
                pipe.del(fp_key(source, digest)).ignore();
            }
            pipe.del(&key).ignore();
            pipe.del(state_key(source)).ignore();
            pipe.query_async::<()>(&mut conn)
                .await
                .map_err(|e| redis_err(source, "gc_orphans", e))?;
            removed += digests.len() as u64 + 1;
        }
        Ok(removed)
    }
}
