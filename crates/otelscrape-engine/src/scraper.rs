//! The Scraper Engine (§4.6): for one tick, asks the Window Planner for
//! work units, fans them out concurrently under the per-source semaphore,
//! and feeds each unit's records through the Record Pipeline and Telemetry
//! Mapper. Grounded on `tokf-server`'s request-handling shape (one
//! `tracing::info_span!` per unit of work, structured error fields logged
//! at the boundary) generalized from one HTTP handler to many concurrent
//! scrape units.

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use otelscrape_common::config::{HttpMethod, SourceConfig};
use otelscrape_common::{path, ErrorKind, Record, ScrapeError};
use otelscrape_filter::PipelineStats;
use otelscrape_http::auth::SharedAuthenticator;
use otelscrape_http::{Authenticator, HttpClient, RequestSpec};
use otelscrape_store::FingerprintStore;
use otelscrape_telemetry::{SelfTelemetry, TelemetryMapper};
use tokio::sync::Semaphore;
use tracing::Instrument as _;

use crate::window::{self, WorkUnit};

/// Outcome of one work unit within a tick.
pub enum UnitOutcome {
    Succeeded { stats: PipelineStats, emitted: usize },
    Failed(ScrapeError),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TickStatus {
    Success,
    PartialFailure,
    Skipped,
}

pub struct TickOutcome {
    pub status: TickStatus,
    pub unit_outcomes: Vec<UnitOutcome>,
}

/// Per-source resources built once at startup (§4.6 step 1's semaphore,
/// this source's authenticator, and the OTLP mapper whose resource carries
/// `service.name = source.name`, per §6).
struct SourceHandle {
    semaphore: Arc<Semaphore>,
    /// Counts concurrently in-flight ticks for this source, not a bool,
    /// so `allowOverlapScans = true` correctly allows more than one.
    in_flight: Arc<AtomicUsize>,
    auth: SharedAuthenticator,
    mapper: Arc<TelemetryMapper>,
}

/// `api_type` is currently always `rest`; kept as a constant rather than a
/// config field since every source in this system is HTTP/JSON.
const API_TYPE: &str = "rest";

pub struct ScraperEngine {
    http: Arc<HttpClient>,
    store: Arc<dyn FingerprintStore + Send + Sync>,
    self_telemetry: Option<Arc<SelfTelemetry>>,
    default_time_format: String,
    default_ttl: u64,
    default_max_entries: usize,
    default_allow_overlap: bool,
    sources: HashMap<String, SourceHandle>,
}

impl ScraperEngine {
    pub fn new(
        http: Arc<HttpClient>,
        store: Arc<dyn FingerprintStore + Send + Sync>,
        self_telemetry: Option<Arc<SelfTelemetry>>,
        default_time_format: impl Into<String>,
        default_ttl: u64,
        default_max_entries: usize,
        default_allow_overlap: bool,
    ) -> Self {
        Self {
            http,
            store,
            self_telemetry,
            default_time_format: default_time_format.into(),
            default_ttl,
            default_max_entries,
            default_allow_overlap,
            sources: HashMap::new(),
        }
    }

    /// Register one configured source with the mapper that owns its
    /// per-source OTLP resource. Must be called once per source before the
    /// first `tick` for it.
    pub fn register_source(&mut self, source: &SourceConfig, mapper: Arc<TelemetryMapper>) {
        self.sources.insert(
            source.name.clone(),
            SourceHandle {
                semaphore: Arc::new(Semaphore::new(source.max_concurrency.max(1))),
                in_flight: Arc::new(AtomicUsize::new(0)),
                auth: Arc::new(Authenticator::new(source.name.clone(), source.auth.clone())),
                mapper,
            },
        );
    }

    /// Run one tick for `source`. `now` is supplied by the caller (the
    /// ticker) rather than read from the clock here, so window math stays
    /// deterministic under test.
    pub async fn tick(&self, source: &SourceConfig, now: DateTime<Utc>) -> TickOutcome {
        let span = tracing::info_span!("scrape", source = %source.name);
        self.tick_inner(source, now).instrument(span).await
    }

    async fn tick_inner(&self, source: &SourceConfig, now: DateTime<Utc>) -> TickOutcome {
        let Some(handle) = self.sources.get(&source.name) else {
            tracing::error!(source = %source.name, phase = "tick", error_kind = %ErrorKind::Config, message = "source not registered with the engine");
            return TickOutcome { status: TickStatus::Skipped, unit_outcomes: Vec::new() };
        };

        // Reserve this tick's in-flight slot atomically before any `await`
        // point: checking `in_flight > 0` and then incrementing as two
        // separate steps would let two ticks that both observe "idle" slip
        // past the admission check together, violating §8 invariant 5. When
        // overlap is disallowed, the reservation *is* the admission check
        // (compare-and-swap 0 -> 1); when it's allowed, every tick reserves
        // unconditionally and the count just tracks fan-in for telemetry.
        let allow_overlap = source.allow_overlap_scans.unwrap_or(self.default_allow_overlap);
        let admitted = if allow_overlap {
            handle.in_flight.fetch_add(1, Ordering::SeqCst);
            true
        } else {
            handle.in_flight.compare_exchange(0, 1, Ordering::SeqCst, Ordering::SeqCst).is_ok()
        };
        if !admitted {
            self.record_self_telemetry(&source.name, "skipped", 0.0, 0);
            return TickOutcome { status: TickStatus::Skipped, unit_outcomes: Vec::new() };
        }
        let _guard = InFlightGuard(Arc::clone(&handle.in_flight));

        let last_success = match self.store.load_last_success(&source.name).await {
            Ok(secs) => secs.and_then(|s| DateTime::<Utc>::from_timestamp(s, 0)),
            Err(e) => {
                tracing::error!(source = %source.name, phase = e.phase, error_kind = %e.kind, message = %e.message, "failed to load last-success state; treating as unset");
                None
            }
        };

        // Admission was already decided above (and the slot already
        // reserved), so `window::plan` is asked not to re-skip on its own
        // in-flight check; it still owns every other planning decision.
        let plan = window::plan(source, &self.default_time_format, last_success, now, false, allow_overlap);

        let started = std::time::Instant::now();
        let mut join_set = tokio::task::JoinSet::new();
        for unit in plan.units {
            let http = Arc::clone(&self.http);
            let auth = Arc::clone(&handle.auth);
            let semaphore = Arc::clone(&handle.semaphore);
            let mapper = Arc::clone(&handle.mapper);
            let store = Arc::clone(&self.store);
            let source = source.clone();
            let default_ttl = self.default_ttl;
            let default_max_entries = self.default_max_entries;
            join_set.spawn(async move {
                run_unit(&http, &auth, &semaphore, &mapper, store.as_ref(), &source, unit, default_ttl, default_max_entries).await
            });
        }

        let mut unit_outcomes = Vec::new();
        while let Some(joined) = join_set.join_next().await {
            match joined {
                Ok(outcome) => unit_outcomes.push(outcome),
                Err(e) => unit_outcomes.push(UnitOutcome::Failed(ScrapeError::new(&source.name, "tick", ErrorKind::Network, format!("unit task panicked: {e}")))),
            }
        }

        let all_succeeded = unit_outcomes.iter().all(|o| matches!(o, UnitOutcome::Succeeded { .. }));
        let emitted: usize = unit_outcomes
            .iter()
            .filter_map(|o| match o {
                UnitOutcome::Succeeded { emitted, .. } => Some(*emitted),
                UnitOutcome::Failed(_) => None,
            })
            .sum();
        let dedupe_hits: u64 = sum_stat(&unit_outcomes, |s| s.dedupe_hits);
        let dedupe_misses: u64 = sum_stat(&unit_outcomes, |s| s.dedupe_misses);

        for outcome in &unit_outcomes {
            if let UnitOutcome::Failed(e) = outcome {
                tracing::error!(source = %source.name, phase = e.phase, error_kind = %e.kind, message = %e.message, "scrape unit failed");
            }
        }

        if all_succeeded {
            if let Some(advance_to) = plan.advance_to {
                if let Err(e) = self.store.save_last_success(&source.name, advance_to.timestamp()).await {
                    tracing::error!(source = %source.name, phase = e.phase, error_kind = %e.kind, message = %e.message, "failed to persist last-success state");
                }
            }
        }

        if let Some(st) = &self.self_telemetry {
            st.record_dedupe(&source.name, dedupe_hits, dedupe_misses);
        }
        let status_label = if all_succeeded { "success" } else { "failure" };
        self.record_self_telemetry(&source.name, status_label, started.elapsed().as_secs_f64(), emitted as u64);

        TickOutcome {
            status: if all_succeeded { TickStatus::Success } else { TickStatus::PartialFailure },
            unit_outcomes,
        }
    }

    fn record_self_telemetry(&self, source: &str, status: &str, duration_secs: f64, record_count: u64) {
        if let Some(st) = &self.self_telemetry {
            st.record_scrape(source, status, API_TYPE, duration_secs, record_count, otelscrape_store::now_unix() as f64);
        }
    }
}

fn sum_stat(outcomes: &[UnitOutcome], f: impl Fn(&PipelineStats) -> usize) -> u64 {
    outcomes
        .iter()
        .filter_map(|o| match o {
            UnitOutcome::Succeeded { stats, .. } => Some(f(stats) as u64),
            UnitOutcome::Failed(_) => None,
        })
        .sum()
}

/// Decrements the in-flight counter on every exit path, including
/// cancellation (the `JoinSet`/tick future being dropped mid-run).
struct InFlightGuard(Arc<AtomicUsize>);

impl Drop for InFlightGuard {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::SeqCst);
    }
}

#[allow(clippy::too_many_arguments)]
async fn run_unit(
    http: &HttpClient,
    auth: &Authenticator,
    semaphore: &Semaphore,
    mapper: &TelemetryMapper,
    store: &(dyn FingerprintStore + Send + Sync),
    source: &SourceConfig,
    unit: WorkUnit,
    default_ttl: u64,
    default_max_entries: usize,
) -> UnitOutcome {
    let _permit = match semaphore.acquire().await {
        Ok(permit) => permit,
        Err(e) => return UnitOutcome::Failed(ScrapeError::with_cause(&source.name, "acquire", ErrorKind::Network, e)),
    };

    let url = format!("{}{}", source.base_url, source.endpoint);

    // §4.6 step 3.1: query always carries the time keys plus `extraArgs`,
    // regardless of method; POST additionally carries `extraArgs` as the body.
    let mut query = unit.time_query.encoded.clone();
    for (key, value) in &source.extra_args {
        query.push((key.clone(), json_scalar_to_query_string(value)));
    }

    let body = matches!(source.method, HttpMethod::Post)
        .then(|| serde_json::Value::Object(source.extra_args.clone().into_iter().collect()));

    let spec = RequestSpec {
        source: &source.name,
        method: source.method,
        url,
        headers: &source.extra_headers,
        query: &query,
        raw_query: &unit.time_query.raw,
        body: body.as_ref(),
        body_type: source.body_type,
    };

    let (status, bytes) = match http.request(spec, Some(auth)).await {
        Ok(ok) => ok,
        Err(e) => return UnitOutcome::Failed(e),
    };

    if !status.is_success() {
        return UnitOutcome::Failed(ScrapeError::new(
            &source.name,
            "response",
            ErrorKind::Response,
            format!("unexpected status {status}"),
        ));
    }

    let body: serde_json::Value = match serde_json::from_slice(&bytes) {
        Ok(v) => v,
        Err(e) => return UnitOutcome::Failed(ScrapeError::with_cause(&source.name, "parse", ErrorKind::Response, e)),
    };

    let records = extract_records(source.data_key.as_deref(), &body);

    let outcome = match otelscrape_filter::run(
        &source.name,
        records,
        &source.filters,
        source.max_records_per_scrape,
        &source.delta_detection,
        Some(store),
        default_ttl,
        default_max_entries,
    )
    .await
    {
        Ok(o) => o,
        Err(e) => return UnitOutcome::Failed(e),
    };

    for record in &outcome.records {
        mapper.emit_record(
            &source.name,
            record,
            &source.attributes,
            &source.gauge_readings,
            &source.counter_readings,
            &source.histogram_readings,
            &source.log_severity,
            source.emit_logs,
        );
    }

    UnitOutcome::Succeeded { stats: outcome.stats, emitted: outcome.records.len() }
}

/// §3: "If `dataKey` is unset, the response itself is the record sequence
/// (scalar or sequence)." §4.6 step 3.4: an absent `dataKey` *path* (the
/// key is configured but doesn't resolve against this response) yields an
/// empty sequence rather than a unit failure.
fn extract_records(data_key: Option<&str>, response: &Record) -> Vec<Record> {
    match data_key {
        None => match response {
            serde_json::Value::Array(items) => items.clone(),
            other => vec![other.clone()],
        },
        Some(key) => path::extract(key, response).map(path::Resolved::into_vec).unwrap_or_default(),
    }
}

fn json_scalar_to_query_string(value: &serde_json::Value) -> String {
    match value {
        serde_json::Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}
