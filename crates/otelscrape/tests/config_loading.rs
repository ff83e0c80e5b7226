//! Exercises the configuration loader (§4.9) end to end against real files
//! on disk: `${ENV_VAR}` resolution and the fatal-on-unset-var / fatal-on-
//! semantic-contradiction paths, complementing the unit-level tests that
//! already live next to `load` itself.
#![allow(clippy::unwrap_used, clippy::expect_used)]

use std::io::Write;

use otelscrape::config_loader;

fn write_config(contents: &str) -> (tempfile::TempDir, std::path::PathBuf) {
    let dir = tempfile::TempDir::new().unwrap();
    let path = dir.path().join("scraper.toml");
    let mut file = std::fs::File::create(&path).unwrap();
    file.write_all(contents.as_bytes()).unwrap();
    (dir, path)
}

#[test]
fn load_resolves_env_var_placeholders() {
    // SAFETY: test-only, single-threaded within this process's test harness slot.
    unsafe { std::env::set_var("OTELSCRAPE_IT_TOKEN", "tok-abc123") };
    let (_dir, path) = write_config(
        r#"
[scraper]
otel_collector_endpoint = "http://localhost:4317"
[scraper.fingerprint_store]
backend = "sqlite"
[scraper.fingerprint_store.sqlite]
path = "/tmp/otelscrape-it.db"

[[sources]]
name = "demo"
base_url = "https://example.com"
endpoint = "/posts"
frequency = "5min"
extra_headers = { Authorization = "Bearer ${OTELSCRAPE_IT_TOKEN}" }
"#,
    );

    let config = config_loader::load(&path).unwrap();
    assert_eq!(config.sources[0].extra_headers.get("Authorization").unwrap(), "Bearer tok-abc123");
    unsafe { std::env::remove_var("OTELSCRAPE_IT_TOKEN") };
}

#[test]
fn load_fails_fatally_on_unresolved_env_var() {
    // SAFETY: test-only, single-threaded within this process's test harness slot.
    unsafe { std::env::remove_var("OTELSCRAPE_IT_MISSING") };
    let (_dir, path) = write_config(
        r#"
[scraper]
otel_collector_endpoint = "http://localhost:4317"
[scraper.fingerprint_store]
backend = "sqlite"
[scraper.fingerprint_store.sqlite]
path = "/tmp/otelscrape-it.db"

[[sources]]
name = "demo"
base_url = "https://example.com"
endpoint = "/posts"
frequency = "5min"
extra_headers = { Authorization = "Bearer ${OTELSCRAPE_IT_MISSING}" }
"#,
    );

    let err = config_loader::load(&path).unwrap_err();
    assert!(err.message.contains("OTELSCRAPE_IT_MISSING"));
}

#[test]
fn load_fails_on_missing_file() {
    let result = config_loader::load(std::path::Path::new("/nonexistent/scraper.toml"));
    assert!(result.is_err());
}

#[test]
fn load_rejects_sqlite_backend_without_sqlite_table() {
    let (_dir, path) = write_config(
        r#"
[scraper]
otel_collector_endpoint = "http://localhost:4317"
[scraper.fingerprint_store]
backend = "sqlite"

[[sources]]
name = "demo"
base_url = "https://example.com"
endpoint = "/posts"
frequency = "5min"
"#,
    );

    let err = config_loader::load(&path).unwrap_err();
    assert!(err.message.contains("sqlite"));
}
