//! Process entry point: parse the CLI, load and validate configuration,
//! build the store/HTTP client/engine, register every source, spawn one
//! ticker per source, and shut down gracefully on signal.
//!
//! Exit codes (§6.10): `0` graceful shutdown, `1` config/validation error,
//! `2` unrecoverable runtime error. Computed once and applied at the
//! bottom of `main`, the same shape as `tokf-cli`'s `main.rs`.

mod cleanup;
mod cli;
mod shutdown;
mod ticker;

use std::sync::Arc;
use std::time::Duration;

use clap::Parser;
use otelscrape::config_loader;
use otelscrape_common::config::{Config, SourceConfig, StoreBackend};
use otelscrape_common::digest;
use otelscrape_engine::ScraperEngine;
use otelscrape_http::HttpClient;
use otelscrape_store::sqlite::SqliteStore;
#[cfg(feature = "valkey")]
use otelscrape_store::valkey::ValkeyStore;
use otelscrape_store::FingerprintStore;
use otelscrape_telemetry::{otlp, SelfTelemetry, TelemetryMapper};
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

const SELF_TELEMETRY_SERVICE_NAME: &str = "otelscrape.self";
const GRACE_PERIOD: Duration = Duration::from_secs(30);

const EXIT_OK: i32 = 0;
const EXIT_CONFIG_ERROR: i32 = 1;
const EXIT_RUNTIME_ERROR: i32 = 2;

#[tokio::main]
async fn main() {
    let cli = cli::Cli::parse();

    let config = match config_loader::load(&cli.config) {
        Ok(config) => config,
        Err(e) => {
            eprintln!("config error: {e}");
            std::process::exit(EXIT_CONFIG_ERROR);
        }
    };

    init_tracing(&config.scraper.log_level);

    let exit_code = run(config).await;
    std::process::exit(exit_code);
}

fn init_tracing(log_level: &str) {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(format!("otelscrape={log_level}")));
    tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer())
        .init();
}

async fn run(config: Config) -> i32 {
    if config.scraper.enable_admin_api {
        tracing::warn!("scraper.enableAdminApi is set but the admin HTTP surface is not implemented by this build; ignoring");
    }

    let store = match build_store(&config).await {
        Ok(store) => store,
        Err(e) => {
            tracing::error!(phase = e.phase, error_kind = %e.kind, message = %e.message, "failed to open fingerprint store");
            return EXIT_RUNTIME_ERROR;
        }
    };

    let http = match HttpClient::new(config.scraper.enforce_tls, config.scraper.max_global_concurrency) {
        Ok(client) => Arc::new(client),
        Err(e) => {
            tracing::error!(phase = e.phase, error_kind = %e.kind, message = %e.message, "failed to build HTTP client");
            return EXIT_RUNTIME_ERROR;
        }
    };

    let mut self_meter_provider = None;
    let self_telemetry = if config.scraper.enable_self_telemetry {
        match otlp::build_meter_provider(
            &config.scraper.otel_collector_endpoint,
            config.scraper.otel_transport,
            SELF_TELEMETRY_SERVICE_NAME,
        ) {
            Ok(provider) => {
                let telemetry = Arc::new(SelfTelemetry::from_provider(&provider));
                self_meter_provider = Some(provider);
                Some(telemetry)
            }
            Err(e) => {
                tracing::error!(phase = e.phase, error_kind = %e.kind, message = %e.message, "failed to build self-telemetry meter provider; continuing without it");
                None
            }
        }
    } else {
        None
    };

    let store_for_cleanup = Arc::clone(&store);
    let self_telemetry_for_cleanup = self_telemetry.clone();

    let mut engine = ScraperEngine::new(
        Arc::clone(&http),
        store,
        self_telemetry,
        config.scraper.default_time_format.clone(),
        config.scraper.fingerprint_store.default_ttl_seconds,
        config.scraper.fingerprint_store.max_entries_per_source,
        config.scraper.allow_overlap_scans,
    );

    let mut source_providers = Vec::new();
    for source in &config.sources {
        match build_source_mapper(&config, source) {
            Ok((mapper, providers)) => {
                engine.register_source(source, Arc::new(mapper));
                source_providers.push(providers);
                log_config_hash(source);
            }
            Err(e) => {
                tracing::error!(source = %source.name, phase = e.phase, error_kind = %e.kind, message = %e.message, "failed to set up telemetry for source; skipping it");
            }
        }
    }

    let engine = Arc::new(engine);
    let shutdown_notify = Arc::new(tokio::sync::Notify::new());

    let mut handles: Vec<tokio::task::JoinHandle<()>> = config
        .sources
        .iter()
        .cloned()
        .map(|source| ticker::spawn(Arc::clone(&engine), source, Arc::clone(&shutdown_notify)))
        .collect();

    let live_sources: Vec<String> = config.sources.iter().map(|s| s.name.clone()).collect();
    handles.push(cleanup::spawn(
        store_for_cleanup,
        self_telemetry_for_cleanup,
        config.scraper.fingerprint_store.backend,
        config.scraper.fingerprint_store.cleanup_interval_seconds,
        live_sources,
        Arc::clone(&shutdown_notify),
    ));

    shutdown::wait_for_shutdown().await;
    shutdown_notify.notify_waiters();

    if config.scraper.terminate_gracefully {
        let drain = async {
            for handle in handles {
                let _ = handle.await;
            }
        };
        if tokio::time::timeout(GRACE_PERIOD, drain).await.is_err() {
            tracing::warn!("graceful-shutdown drain timeout after {}s; exiting now", GRACE_PERIOD.as_secs());
        }
    } else {
        for handle in &handles {
            handle.abort();
        }
    }

    if let Some(provider) = &self_meter_provider {
        otlp::shutdown_meter_provider(provider);
    }
    for (meter_provider, logger_provider) in &source_providers {
        otlp::shutdown_meter_provider(meter_provider);
        otlp::shutdown_logger_provider(logger_provider);
    }

    tracing::info!("shutdown complete");
    EXIT_OK
}

async fn build_store(config: &Config) -> Result<Arc<dyn FingerprintStore + Send + Sync>, otelscrape_common::ScrapeError> {
    let fp = &config.scraper.fingerprint_store;
    match fp.backend {
        StoreBackend::Sqlite => {
            let sqlite = fp.sqlite.as_ref().ok_or_else(|| otelscrape_common::ScrapeError::config("<config>", "sqlite store selected without fingerprintStore.sqlite"))?;
            let store = SqliteStore::open(std::path::Path::new(&sqlite.path), fp.lock_retries)?;
            Ok(Arc::new(store))
        }
        #[cfg(feature = "valkey")]
        StoreBackend::Valkey | StoreBackend::Redis => {
            let valkey = fp.valkey.as_ref().ok_or_else(|| otelscrape_common::ScrapeError::config("<config>", "valkey/redis store selected without fingerprintStore.valkey"))?;
            let scheme = if valkey.ssl { "rediss" } else { "redis" };
            let auth = valkey.password.as_deref().map(|p| format!(":{p}@")).unwrap_or_default();
            let url = format!("{scheme}://{auth}{}:{}/{}", valkey.host, valkey.port, valkey.db);
            let store = ValkeyStore::connect(&url).await?;
            Ok(Arc::new(store))
        }
        #[cfg(not(feature = "valkey"))]
        StoreBackend::Valkey | StoreBackend::Redis => Err(otelscrape_common::ScrapeError::config(
            "<config>",
            "valkey/redis backend selected but this build was compiled without the `valkey` feature",
        )),
    }
}

type SourceProviders = (opentelemetry_sdk::metrics::SdkMeterProvider, opentelemetry_sdk::logs::SdkLoggerProvider);

fn build_source_mapper(config: &Config, source: &SourceConfig) -> Result<(TelemetryMapper, SourceProviders), otelscrape_common::ScrapeError> {
    if config.scraper.dry_run {
        // Dry-run mapper needs no live providers; callers still expect a
        // (meter, logger) pair to shut down on exit, so build throwaway
        // no-op providers rather than threading an Option through the loop.
        let meter_provider = opentelemetry_sdk::metrics::SdkMeterProvider::builder().build();
        let logger_provider = opentelemetry_sdk::logs::SdkLoggerProvider::builder().build();
        return Ok((TelemetryMapper::dry_run(), (meter_provider, logger_provider)));
    }

    let meter_provider = otlp::build_meter_provider(&config.scraper.otel_collector_endpoint, config.scraper.otel_transport, &source.name)?;
    let logger_provider = otlp::build_logger_provider(&config.scraper.otel_collector_endpoint, config.scraper.otel_transport, &source.name)?;
    let mapper = TelemetryMapper::from_providers(&meter_provider, &logger_provider, "otelscrape.source");
    Ok((mapper, (meter_provider, logger_provider)))
}

fn log_config_hash(source: &SourceConfig) {
    let value = serde_json::to_value(source).unwrap_or(serde_json::Value::Null);
    let hash = digest::full_record_digest(&value);
    tracing::info!(source = %source.name, config_hash = %hash, "registered source");
}
