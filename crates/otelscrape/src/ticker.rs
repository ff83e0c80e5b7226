//! Minimal built-in ticker (§6.9): the scheduler is out of scope for this
//! system, but the binary must still run end to end, so each source gets a
//! `tokio::time::interval(frequency)` loop that calls `ScraperEngine::tick`.
//! Deliberately dumb — it does not implement overlap bookkeeping itself
//! (that lives in the engine, §4.6/§8 invariant 5) and is easily swapped
//! for a real scheduler later.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use otelscrape_common::config::SourceConfig;
use otelscrape_common::time::Frequency;
use otelscrape_engine::ScraperEngine;
use tokio::sync::Notify;
use tokio::time::MissedTickBehavior;

const FALLBACK_PERIOD: Duration = Duration::from_secs(60);

/// Spawn this source's ticker task. The returned handle completes once
/// `shutdown` is notified (or the task panics).
pub fn spawn(engine: Arc<ScraperEngine>, source: SourceConfig, shutdown: Arc<Notify>) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        let Some(frequency) = Frequency::parse(&source.frequency) else {
            tracing::error!(source = %source.name, "invalid frequency string; this source's ticker will not run");
            return;
        };
        let period = frequency.to_duration().to_std().unwrap_or(FALLBACK_PERIOD);
        let mut interval = tokio::time::interval(period);
        interval.set_missed_tick_behavior(MissedTickBehavior::Delay);

        if source.run_first_scrape {
            run_tick(&engine, &source).await;
        }

        loop {
            tokio::select! {
                _ = interval.tick() => {
                    tokio::select! {
                        () = run_tick(&engine, &source) => {}
                        () = shutdown.notified() => {
                            tracing::info!(source = %source.name, "tick cancelled by shutdown signal");
                            break;
                        }
                    }
                }
                () = shutdown.notified() => {
                    break;
                }
            }
        }
        tracing::info!(source = %source.name, "ticker stopped");
    })
}

async fn run_tick(engine: &ScraperEngine, source: &SourceConfig) {
    let now = Utc::now();
    let _outcome = engine.tick(source, now).await;
}
