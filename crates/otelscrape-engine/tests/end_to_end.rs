//! End-to-end exercises of `ScraperEngine::tick` against a mock HTTP server:
//! an instant no-auth default-increment scrape, and overlap prevention when
//! a slow tick is still in flight.
#![allow(clippy::unwrap_used, clippy::expect_used)]

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use otelscrape_common::config::{
    AttributeSpec, AuthConfig, BodyType, CounterSpec, DeltaDetectionConfig, FilterConfig, HttpMethod, ScrapeMode, SourceConfig,
};
use otelscrape_engine::{ScraperEngine, TickStatus, UnitOutcome};
use otelscrape_http::HttpClient;
use otelscrape_store::sqlite::SqliteStore;
use otelscrape_telemetry::TelemetryMapper;
use wiremock::matchers::method;
use wiremock::{Mock, MockServer, ResponseTemplate};

fn instant_source(name: &str, base_url: &str) -> SourceConfig {
    SourceConfig {
        name: name.to_string(),
        base_url: base_url.to_string(),
        endpoint: "/posts".to_string(),
        method: HttpMethod::Get,
        frequency: "5min".to_string(),
        auth: AuthConfig::default(),
        mode: ScrapeMode::Instant,
        time_format: None,
        range_keys: None,
        parallel_window: None,
        max_concurrency: 4,
        allow_overlap_scans: None,
        extra_headers: HashMap::new(),
        extra_args: HashMap::new(),
        body_type: BodyType::Json,
        data_key: None,
        filters: FilterConfig::default(),
        max_records_per_scrape: usize::MAX,
        delta_detection: DeltaDetectionConfig::default(),
        attributes: vec![
            AttributeSpec { name: "user_id".to_string(), data_key: "userId".to_string(), as_metric: None },
            AttributeSpec { name: "post_id".to_string(), data_key: "id".to_string(), as_metric: None },
        ],
        gauge_readings: Vec::new(),
        counter_readings: vec![CounterSpec { name: "posts".to_string(), fixed_value: None, value_key: None, data_key: None }],
        histogram_readings: Vec::new(),
        log_severity: Vec::new(),
        emit_logs: false,
        run_first_scrape: false,
        first_scrape_start: None,
    }
}

async fn build_engine(allow_overlap: bool, store_path: &std::path::Path) -> ScraperEngine {
    let http = Arc::new(HttpClient::new(false, 8).unwrap());
    let store = Arc::new(SqliteStore::open_default_retries(store_path).unwrap());
    ScraperEngine::new(http, store, None, "%Y-%m-%dT%H:%M:%SZ", 3600, 10_000, allow_overlap)
}

#[tokio::test]
async fn instant_scrape_emits_one_record_per_array_element() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!([
            {"id": 1, "userId": 7},
            {"id": 2, "userId": 7},
        ])))
        .expect(1)
        .mount(&server)
        .await;

    let dir = tempfile::TempDir::new().unwrap();
    let mut engine = build_engine(false, &dir.path().join("fp.db")).await;
    let source = instant_source("demo", &server.uri());
    engine.register_source(&source, Arc::new(TelemetryMapper::dry_run()));

    let outcome = engine.tick(&source, Utc::now()).await;
    assert_eq!(outcome.status, TickStatus::Success);
    assert_eq!(outcome.unit_outcomes.len(), 1);
    match &outcome.unit_outcomes[0] {
        UnitOutcome::Succeeded { emitted, .. } => assert_eq!(*emitted, 2),
        UnitOutcome::Failed(e) => panic!("expected success, got {e}"),
    }
}

#[tokio::test]
async fn concurrent_tick_is_skipped_when_overlap_not_allowed() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(200).set_delay(Duration::from_millis(80)).set_body_json(serde_json::json!([])))
        .expect(1)
        .mount(&server)
        .await;

    let dir = tempfile::TempDir::new().unwrap();
    let mut engine = build_engine(false, &dir.path().join("fp.db")).await;
    let source = instant_source("demo", &server.uri());
    engine.register_source(&source, Arc::new(TelemetryMapper::dry_run()));
    let now = Utc::now();

    let first = engine.tick(&source, now);
    let second = async {
        tokio::time::sleep(Duration::from_millis(20)).await;
        engine.tick(&source, now).await
    };

    let (first_outcome, second_outcome) = tokio::join!(first, second);

    assert_eq!(first_outcome.status, TickStatus::Success);
    assert_eq!(second_outcome.status, TickStatus::Skipped);
    assert!(second_outcome.unit_outcomes.is_empty());
}
