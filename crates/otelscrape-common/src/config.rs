//! Configuration tree: `scraper` (global) + `sources` (list).
//!
//! Deserialized from TOML with `#[serde(default)]` on every optional field,
//! the same convention `tokf-cli`'s `config/types.rs` uses for its own
//! nested, mostly-optional config shapes. `${ENV_VAR}` placeholders inside
//! string fields are resolved by the loader (see `otelscrape` binary
//! crate), not by serde — this module only describes shape.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct Config {
    pub scraper: ScraperConfig,
    #[serde(default)]
    pub sources: Vec<SourceConfig>,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ScraperConfig {
    pub otel_collector_endpoint: String,
    #[serde(default = "default_transport")]
    pub otel_transport: OtelTransport,
    #[serde(default)]
    pub enforce_tls: bool,
    #[serde(default = "default_service_name")]
    pub service_name: String,
    #[serde(default = "default_log_level")]
    pub log_level: String,
    #[serde(default)]
    pub dry_run: bool,
    #[serde(default = "default_true")]
    pub enable_self_telemetry: bool,
    #[serde(default)]
    pub enable_admin_api: bool,
    #[serde(default)]
    pub service_port: Option<u16>,
    #[serde(default)]
    pub admin_secret_env: Option<String>,
    #[serde(default = "default_true")]
    pub terminate_gracefully: bool,
    #[serde(default = "default_time_format")]
    pub default_time_format: String,
    #[serde(default)]
    pub allow_overlap_scans: bool,
    #[serde(default = "default_global_concurrency")]
    pub max_global_concurrency: usize,
    #[serde(default = "default_source_concurrency")]
    pub default_source_concurrency: usize,
    pub fingerprint_store: FingerprintStoreConfig,
}

fn default_transport() -> OtelTransport {
    OtelTransport::Grpc
}
fn default_service_name() -> String {
    "otelscrape".to_string()
}
fn default_log_level() -> String {
    "info".to_string()
}
fn default_true() -> bool {
    true
}
fn default_time_format() -> String {
    "%Y-%m-%dT%H:%M:%SZ".to_string()
}
const fn default_global_concurrency() -> usize {
    32
}
const fn default_source_concurrency() -> usize {
    4
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum OtelTransport {
    Grpc,
    Http,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct FingerprintStoreConfig {
    pub backend: StoreBackend,
    #[serde(default = "default_max_entries")]
    pub max_entries_per_source: usize,
    #[serde(default = "default_ttl")]
    pub default_ttl_seconds: u64,
    #[serde(default = "default_cleanup_interval")]
    pub cleanup_interval_seconds: u64,
    #[serde(default = "default_lock_retries")]
    pub lock_retries: u32,
    #[serde(default = "default_lock_backoff")]
    pub lock_backoff_seconds: f64,
    #[serde(default)]
    pub sqlite: Option<SqliteConfig>,
    #[serde(default)]
    pub valkey: Option<ValkeyConfig>,
}

fn default_max_entries() -> usize {
    10_000
}
fn default_ttl() -> u64 {
    86_400
}
fn default_cleanup_interval() -> u64 {
    300
}
fn default_lock_retries() -> u32 {
    5
}
fn default_lock_backoff() -> f64 {
    0.1
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum StoreBackend {
    Sqlite,
    Valkey,
    Redis,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct SqliteConfig {
    pub path: String,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ValkeyConfig {
    pub host: String,
    #[serde(default = "default_valkey_port")]
    pub port: u16,
    #[serde(default)]
    pub db: u32,
    #[serde(default)]
    pub password: Option<String>,
    #[serde(default)]
    pub ssl: bool,
}

const fn default_valkey_port() -> u16 {
    6379
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct SourceConfig {
    pub name: String,
    pub base_url: String,
    pub endpoint: String,
    #[serde(default = "default_method")]
    pub method: HttpMethod,
    pub frequency: String,
    #[serde(default)]
    pub auth: AuthConfig,
    #[serde(default = "default_scrape_mode")]
    pub mode: ScrapeMode,
    #[serde(default)]
    pub time_format: Option<String>,
    #[serde(default)]
    pub range_keys: Option<RangeKeys>,
    #[serde(default)]
    pub parallel_window: Option<ParallelWindow>,
    #[serde(default = "default_source_concurrency")]
    pub max_concurrency: usize,
    #[serde(default)]
    pub allow_overlap_scans: Option<bool>,
    #[serde(default)]
    pub extra_headers: HashMap<String, String>,
    #[serde(default)]
    pub extra_args: HashMap<String, serde_json::Value>,
    #[serde(default = "default_body_type")]
    pub body_type: BodyType,
    #[serde(default)]
    pub data_key: Option<String>,
    #[serde(default)]
    pub filters: FilterConfig,
    #[serde(default = "default_max_records")]
    pub max_records_per_scrape: usize,
    #[serde(default)]
    pub delta_detection: DeltaDetectionConfig,
    #[serde(default)]
    pub attributes: Vec<AttributeSpec>,
    #[serde(default)]
    pub gauge_readings: Vec<GaugeSpec>,
    #[serde(default)]
    pub counter_readings: Vec<CounterSpec>,
    #[serde(default)]
    pub histogram_readings: Vec<HistogramSpec>,
    #[serde(default)]
    pub log_severity: Vec<SeverityRule>,
    #[serde(default)]
    pub emit_logs: bool,
    #[serde(default)]
    pub run_first_scrape: bool,
    #[serde(default)]
    pub first_scrape_start: Option<String>,
}

fn default_method() -> HttpMethod {
    HttpMethod::Get
}
fn default_scrape_mode() -> ScrapeMode {
    ScrapeMode::Instant
}
fn default_body_type() -> BodyType {
    BodyType::Json
}
const fn default_max_records() -> usize {
    usize::MAX
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum HttpMethod {
    Get,
    Post,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ScrapeMode {
    Instant,
    Range,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum BodyType {
    Raw,
    Json,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum RangeKeys {
    Explicit {
        start_key: String,
        end_key: String,
        #[serde(default)]
        url_encode_time_keys: bool,
    },
    Relative {
        unit: String,
        /// Either a literal integer-as-string or the sentinel `"from-config"`,
        /// meaning "derive from `frequency`".
        value: String,
        #[serde(default)]
        take_negative: bool,
    },
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ParallelWindow {
    pub unit: String,
    pub value: u64,
}

#[derive(Debug, Clone, Default, Deserialize, Serialize)]
#[serde(default)]
pub struct AuthConfig {
    pub strategy: AuthStrategy,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum AuthStrategy {
    None,
    Basic {
        username_env: String,
        password_env: String,
    },
    HeaderApiKey {
        header_name: String,
        value_env: String,
    },
    OauthStatic {
        token_env: String,
    },
    OauthRuntime {
        get_token_endpoint: String,
        #[serde(default = "default_method")]
        method: HttpMethod,
        #[serde(default)]
        headers: HashMap<String, String>,
        #[serde(default)]
        body: HashMap<String, String>,
        token_key: String,
    },
    AzureAd {
        tenant_token_endpoint: String,
        client_id_env: String,
        client_secret_env: String,
        resource: String,
    },
}

impl Default for AuthStrategy {
    fn default() -> Self {
        Self::None
    }
}

#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct FilterConfig {
    #[serde(default)]
    pub drop: Vec<PredicateRule>,
    #[serde(default)]
    pub keep: Vec<PredicateRule>,
}

/// One rule: `drop` rules are an `any` list (dropped if any predicate
/// matches); `keep` rules are an `all` list (kept only if all predicates
/// match, and only when at least one keep rule matches overall).
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct PredicateRule {
    pub predicates: Vec<Predicate>,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct Predicate {
    pub field: String,
    pub match_type: MatchType,
    pub value: PredicateValue,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum MatchType {
    Equals,
    NotEquals,
    In,
    Regex,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(untagged)]
pub enum PredicateValue {
    Scalar(serde_json::Value),
    List(Vec<serde_json::Value>),
}

#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct DeltaDetectionConfig {
    #[serde(default)]
    pub enabled: bool,
    #[serde(default)]
    pub fingerprint_mode: FingerprintMode,
    #[serde(default)]
    pub fingerprint_keys: Vec<String>,
    #[serde(default)]
    pub ttl_seconds: Option<u64>,
    #[serde(default)]
    pub max_entries: Option<usize>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum FingerprintMode {
    #[default]
    FullRecord,
    Keys,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct AttributeSpec {
    pub name: String,
    pub data_key: String,
    #[serde(default)]
    pub as_metric: Option<AsMetric>,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct AsMetric {
    #[serde(default)]
    pub metric_name: Option<String>,
    #[serde(default)]
    pub value_mapping: HashMap<String, f64>,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct GaugeSpec {
    pub name: String,
    #[serde(default)]
    pub fixed_value: Option<f64>,
    #[serde(default)]
    pub data_key: Option<String>,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct CounterSpec {
    pub name: String,
    #[serde(default)]
    pub fixed_value: Option<f64>,
    #[serde(default)]
    pub value_key: Option<String>,
    #[serde(default)]
    pub data_key: Option<String>,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct HistogramSpec {
    pub name: String,
    #[serde(default)]
    pub fixed_value: Option<f64>,
    #[serde(default)]
    pub data_key: Option<String>,
    pub buckets: Vec<f64>,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct SeverityRule {
    pub field: String,
    pub match_type: MatchType,
    pub value: PredicateValue,
    pub severity: LogSeverity,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum LogSeverity {
    Error,
    Warning,
    Info,
    Debug,
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    #[test]
    fn parses_minimal_config() {
        let toml_str = r#"
[scraper]
otel_collector_endpoint = "http://localhost:4317"
[scraper.fingerprint_store]
backend = "sqlite"
[scraper.fingerprint_store.sqlite]
path = "/tmp/otelscrape.db"

[[sources]]
name = "demo"
base_url = "https://example.com"
endpoint = "/posts"
frequency = "5min"
"#;
        let cfg: Config = toml::from_str(toml_str).expect("valid config");
        assert_eq!(cfg.scraper.service_name, "otelscrape");
        assert_eq!(cfg.sources.len(), 1);
        assert_eq!(cfg.sources[0].mode, ScrapeMode::Instant);
        assert_eq!(cfg.sources[0].max_records_per_scrape, usize::MAX);
    }

    #[test]
    fn auth_strategy_tagged_union_roundtrips() {
        let toml_str = r#"
strategy = { type = "basic", username_env = "U", password_env = "P" }
"#;
        let auth: AuthConfig = toml::from_str(toml_str).unwrap();
        match auth.strategy {
            AuthStrategy::Basic { username_env, password_env } => {
                assert_eq!(username_env, "U");
                assert_eq!(password_env, "P");
            }
            _ => panic!("expected Basic"),
        }
    }

    #[test]
    fn range_keys_relative_variant() {
        let toml_str = r#"
kind = "relative"
unit = "hours"
value = "from-config"
take_negative = true
"#;
        let rk: RangeKeys = toml::from_str(toml_str).unwrap();
        match rk {
            RangeKeys::Relative { unit, value, take_negative } => {
                assert_eq!(unit, "hours");
                assert_eq!(value, "from-config");
                assert!(take_negative);
            }
            RangeKeys::Explicit { .. } => panic!("expected Relative"),
        }
    }
}
