//! Background fingerprint-store maintenance (§4.3's `gc_expired`/
//! `gc_orphans`), driven by `fingerprintStore.cleanupIntervalSeconds`.
//! Runs as its own ticker, independent of any source's scrape cadence,
//! the same shape as `ticker::spawn` but with no per-source state.

use std::sync::Arc;
use std::time::Duration;

use otelscrape_common::config::StoreBackend;
use otelscrape_store::FingerprintStore;
use otelscrape_telemetry::SelfTelemetry;
use tokio::sync::Notify;

fn backend_label(backend: StoreBackend) -> &'static str {
    match backend {
        StoreBackend::Sqlite => "sqlite",
        StoreBackend::Valkey => "valkey",
        StoreBackend::Redis => "redis",
    }
}

/// Spawn the cleanup loop. `live_sources` is the full configured source
/// list at startup — this binary has no dynamic source reload, so it never
/// changes for the life of the process.
pub fn spawn(
    store: Arc<dyn FingerprintStore + Send + Sync>,
    self_telemetry: Option<Arc<SelfTelemetry>>,
    backend: StoreBackend,
    interval_secs: u64,
    live_sources: Vec<String>,
    shutdown: Arc<Notify>,
) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        let backend = backend_label(backend);
        let mut interval = tokio::time::interval(Duration::from_secs(interval_secs.max(1)));
        interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        interval.tick().await; // first tick fires immediately; skip it, run on cadence only

        loop {
            tokio::select! {
                _ = interval.tick() => {
                    run_once(store.as_ref(), self_telemetry.as_deref(), backend, &live_sources).await;
                }
                () = shutdown.notified() => break,
            }
        }
    })
}

async fn run_once(store: &(dyn FingerprintStore + Send + Sync), self_telemetry: Option<&SelfTelemetry>, backend: &str, live_sources: &[String]) {
    run_job(store, self_telemetry, "gc_expired", backend, |s| Box::pin(s.gc_expired())).await;
    run_job(store, self_telemetry, "gc_orphans", backend, |s| Box::pin(s.gc_orphans(live_sources))).await;
}

async fn run_job<'a, F>(store: &'a (dyn FingerprintStore + Send + Sync), self_telemetry: Option<&SelfTelemetry>, job: &'static str, backend: &str, f: F)
where
    F: FnOnce(&'a (dyn FingerprintStore + Send + Sync)) -> std::pin::Pin<Box<dyn std::future::Future<Output = Result<u64, otelscrape_common::ScrapeError>> + Send + 'a>>,
{
    let started = std::time::Instant::now();
    match f(store).await {
        Ok(removed) => {
            tracing::info!(job, backend, removed, "cleanup job completed");
            if let Some(st) = self_telemetry {
                st.record_cleanup(job, backend, started.elapsed().as_secs_f64(), removed, otelscrape_store::now_unix() as f64);
            }
        }
        Err(e) => {
            tracing::error!(job, backend, phase = e.phase, error_kind = %e.kind, message = %e.message, "cleanup job failed");
        }
    }
}
