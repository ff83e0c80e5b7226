//! Embedded relational backend.
//!
//! Tables: `fingerprints(source, digest, created_at, expires_at)` keyed on
//! `(source, digest)` with an index on `(source, expires_at)`, and
//! `state(source PRIMARY KEY, last_success)`. Every write is grouped into a
//! single transaction per call and retried on `SQLITE_BUSY` with
//! exponential backoff (base 100ms, cap 1s), the same shape as
//! `remote/retry.rs`'s `with_retry` for HTTP 429s, adapted to sqlite's
//! own busy-error signal instead of a response status.

use std::path::Path;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use otelscrape_common::{ErrorKind, ScrapeError};
use rusqlite::{Connection, OptionalExtension};

use crate::{now_unix, FingerprintStore};

const DEFAULT_RETRIES: u32 = 5;
const BASE_BACKOFF: Duration = Duration::from_millis(100);
const MAX_BACKOFF: Duration = Duration::from_secs(1);

pub struct SqliteStore {
    conn: Arc<Mutex<Connection>>,
    retries: u32,
}

impl SqliteStore {
    /// Open (or create) the database at `path`, running the schema
    /// migration. `retries` bounds the busy-retry loop (spec default: 5).
    pub fn open(path: &Path, retries: u32) -> Result<Self, ScrapeError> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| {
                ScrapeError::with_cause("<store>", "open", ErrorKind::Store, e)
            })?;
        }
        let conn = Connection::open(path)
            .map_err(|e| ScrapeError::with_cause("<store>", "open", ErrorKind::Store, e))?;
        conn.execute_batch(
            "CREATE TABLE IF NOT EXISTS fingerprints (
                source      TEXT    NOT NULL,
                digest      BLOB    NOT NULL,
                created_at  INTEGER NOT NULL,
                expires_at  INTEGER NOT NULL,
                PRIMARY KEY (source, digest)
            );
            CREATE INDEX IF NOT EXISTS idx_fingerprints_expiry
                ON fingerprints (source, expires_at);
            CREATE TABLE IF NOT EXISTS state (
                source       TEXT PRIMARY KEY,
                last_success INTEGER NOT NULL
            );",
        )
        .map_err(|e| ScrapeError::with_cause("<store>", "migrate", ErrorKind::Store, e))?;
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
            retries,
        })
    }

    pub fn open_default_retries(path: &Path) -> Result<Self, ScrapeError> {
        Self::open(path, DEFAULT_RETRIES)
    }
}

/// Run `f` against the connection, retrying while sqlite reports the
/// database is busy/locked, with exponential backoff capped at 1s.
fn with_busy_retry<T>(
    conn: &Mutex<Connection>,
    retries: u32,
    mut f: impl FnMut(&Connection) -> rusqlite::Result<T>,
) -> rusqlite::Result<T> {
    let mut attempt = 0u32;
    loop {
        let result = {
            let guard = conn.lock().unwrap_or_else(std::sync::PoisonError::into_inner);
            f(&guard)
        };
        match result {
            Ok(v) => return v_or_return(v),
            Err(e) if is_busy(&e) && attempt < retries => {
                let backoff = (BASE_BACKOFF * 2u32.pow(attempt)).min(MAX_BACKOFF);
                attempt += 1;
                std::thread::sleep(backoff);
            }
            Err(e) => return Err(e),
        }
    }
}

// Helper kept separate so the `Ok` arm above reads as a plain tail call;
// rustc can't see through the match otherwise without an extra binding.
fn v_or_return<T>(v: T) -> rusqlite::Result<T> {
    Ok(v)
}

fn is_busy(err: &rusqlite::Error) -> bool {
    matches!(
        err,
        rusqlite::Error::SqliteFailure(e, _)
            if e.code == rusqlite::ErrorCode::DatabaseBusy || e.code == rusqlite::ErrorCode::DatabaseLocked
    )
}

fn store_err(source: &str, phase: &'static str, e: rusqlite::Error) -> ScrapeError {
    ScrapeError::with_cause(source, phase, ErrorKind::Store, e)
}

#[async_trait]
impl FingerprintStore for SqliteStore {
    async fn load_last_success(&self, source: &str) -> Result<Option<i64>, ScrapeError> {
        let conn = Arc::clone(&self.conn);
        let retries = self.retries;
        let source_owned = source.to_string();
        tokio::task::spawn_blocking(move || {
            with_busy_retry(&conn, retries, |c| {
                c.query_row(
                    "SELECT last_success FROM state WHERE source = ?1",
                    [&source_owned],
                    |row| row.get::<_, i64>(0),
                )
                .optional()
            })
        })
        .await
        .map_err(|e| ScrapeError::with_cause(source, "load_last_success", ErrorKind::Store, e))?
        .map_err(|e| store_err(source, "load_last_success", e))
    }

    async fn save_last_success(&self, source: &str, end: i64) -> Result<(), ScrapeError> {
        let conn = Arc::clone(&self.conn);
        let retries = self.retries;
        let source_owned = source.to_string();
        tokio::task::spawn_blocking(move || {
            with_busy_retry(&conn, retries, |c| {
                c.execute(
                    "INSERT INTO state (source, last_success) VALUES (?1, ?2)
                     ON CONFLICT(source) DO UPDATE SET last_success = excluded.last_success",
                    rusqlite::params![source_owned, end],
                )
                .map(|_| ())
            })
        })
        .await
        .map_err(|e| ScrapeError::with_cause(source, "save_last_success", ErrorKind::Store, e))?
        .map_err(|e| store_err(source, "save_last_success", e))
    }

    async fn seen(&self, source: &str, digest: &str) -> Result<bool, ScrapeError> {
        let conn = Arc::clone(&self.conn);
        let retries = self.retries;
        let source_owned = source.to_string();
        let digest_owned = digest.to_string();
        let now = now_unix();
        tokio::task::spawn_blocking(move || {
            with_busy_retry(&conn, retries, |c| {
                c.query_row(
                    "SELECT 1 FROM fingerprints WHERE source = ?1 AND digest = ?2 AND expires_at > ?3",
                    rusqlite::params![source_owned, digest_owned, now],
                    |_| Ok(()),
                )
                .optional()
                .map(|r| r.is_some())
            })
        })
        .await
        .map_err(|e| ScrapeError::with_cause(source, "seen", ErrorKind::Store, e))?
        .map_err(|e| store_err(source, "seen", e))
    }

    async fn insert_many(&self, source: &str, digests: &[String], ttl_seconds: u64) -> Result<(), ScrapeError> {
        if digests.is_empty() {
            return Ok(());
        }
        let conn = Arc::clone(&self.conn);
        let retries = self.retries;
        let source_owned = source.to_string();
        let digests_owned = digests.to_vec();
        let now = now_unix();
        #[allow(clippy::cast_possible_wrap)]
        let expires_at = now + ttl_seconds as i64;
        tokio::task::spawn_blocking(move || {
            with_busy_retry(&conn, retries, |c| {
                // NOTE: `c` is behind `&Connection` from the mutex guard; we need
                // mutable access for a transaction, so re-borrow via unchecked cell
                // is avoided — instead we open an explicit transaction via `execute_batch`
                // framing with BEGIN/COMMIT, matching "all writes grouped in a single
                // transaction per call" without requiring `&mut Connection`.
                c.execute_batch("BEGIN IMMEDIATE;")?;
                let mut stmt = c.prepare_cached(
                    "INSERT INTO fingerprints (source, digest, created_at, expires_at)
                     VALUES (?1, ?2, ?3, ?4)
                     ON CONFLICT(source, digest) DO UPDATE SET expires_at = excluded.expires_at",
                )?;
                for digest in &digests_owned {
                    stmt.execute(rusqlite::params![source_owned, digest, now, expires_at])?;
                }
                drop(stmt);
                c.execute_batch("COMMIT;")?;
                Ok(())
            })
        })
        .await
        .map_err(|e| ScrapeError::with_cause(source, "insert_many", ErrorKind::Store, e))?
        .map_err(|e| store_err(source, "insert_many", e))
    }

    async fn enforce_cap(&self, source: &str, max_entries: usize) -> Result<(), ScrapeError> {
        let conn = Arc::clone(&self.conn);
        let retries = self.retries;
        let source_owned = source.to_string();
        tokio::task::spawn_blocking(move || {
            with_busy_retry(&conn, retries, |c| {
                c.execute(
                    "DELETE FROM fingerprints WHERE rowid IN (
                        SELECT rowid FROM fingerprints WHERE source = ?1
                        ORDER BY created_at DESC
                        LIMIT -1 OFFSET ?2
                    )",
                    rusqlite::params![source_owned, max_entries as i64],
                )
                .map(|_| ())
            })
        })
        .await
        .map_err(|e| ScrapeError::with_cause(source, "enforce_cap", ErrorKind::Store, e))?
        .map_err(|e| store_err(source, "enforce_cap", e))
    }

    async fn gc_expired(&self) -> Result<u64, ScrapeError> {
        let conn = Arc::clone(&self.conn);
        let retries = self.retries;
        let now = now_unix();
        tokio::task::spawn_blocking(move || {
            with_busy_retry(&conn, retries, |c| {
                c.execute("DELETE FROM fingerprints WHERE expires_at <= ?1", [now])
                    .map(|n| n as u64)
            })
        })
        .await
        .map_err(|e| ScrapeError::with_cause("<store>", "gc_expired", ErrorKind::Store, e))?
        .map_err(|e| store_err("<store>", "gc_expired", e))
    }

    async fn gc_orphans(&self, live_sources: &[String]) -> Result<u64, ScrapeError> {
        let conn = Arc::clone(&self.conn);
        let retries = self.retries;
        let live = live_sources.to_vec();
        tokio::task::spawn_blocking(move || {
            with_busy_retry(&conn, retries, |c| {
                let mut total = 0u64;
                let all_sources: Vec<String> = {
                    let mut stmt = c.prepare("SELECT DISTINCT source FROM fingerprints")?;
                    let rows = stmt.query_map([], |row| row.get::<_, String>(0))?;
                    rows.collect::<rusqlite::Result<Vec<_>>>()?
                };
                for source in all_sources {
                    if !live.contains(&source) {
                        total += c.execute("DELETE FROM fingerprints WHERE source = ?1", [&source])? as u64;
                        total += c.execute("DELETE FROM state WHERE source = ?1", [&source])? as u64;
                    }
                }
                Ok(total)
            })
        })
        .await
        .map_err(|e| ScrapeError::with_cause("<store>", "gc_orphans", ErrorKind::Store, e))?
        .map_err(|e| store_err("<store>", "gc_orphans", e))
    }
}
