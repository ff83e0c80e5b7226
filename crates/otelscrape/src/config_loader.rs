//! Configuration loader (§4.9): parse `scraper.toml`, eagerly resolve every
//! `${ENV_VAR}` placeholder, then validate the semantic contradictions the
//! type system can't catch. Grounded on `tokf-cli`'s `config/types.rs`
//! (serde-derived, mostly-optional structs) and `tokf-common`'s validation
//! feature, which keeps pure parsing and validating-parsing as separate
//! steps the way this loader keeps `toml::from_str` and `validate` separate.

use std::path::Path;

use otelscrape_common::config::{Config, FingerprintMode, ScrapeMode, StoreBackend};
use otelscrape_common::{ErrorKind, ScrapeError};

/// Load and validate the scraper configuration at `path`. Every failure
/// mode here is `ErrorKind::Config`, fatal at startup per §7.
pub fn load(path: &Path) -> Result<Config, ScrapeError> {
    let raw = std::fs::read_to_string(path)
        .map_err(|e| ScrapeError::with_cause("<config>", "load", ErrorKind::Config, e))?;
    let mut value: toml::Value =
        toml::from_str(&raw).map_err(|e| ScrapeError::with_cause("<config>", "parse", ErrorKind::Config, e))?;
    resolve_env_vars(&mut value)?;

    // Round-trip through a string rather than a direct `Value -> Config`
    // conversion: this keeps the resolved document going through the exact
    // same `toml::from_str` path the type definitions' own tests exercise.
    let resolved = toml::to_string(&value).map_err(|e| ScrapeError::with_cause("<config>", "parse", ErrorKind::Config, e))?;
    let config: Config =
        toml::from_str(&resolved).map_err(|e| ScrapeError::with_cause("<config>", "parse", ErrorKind::Config, e))?;

    validate(&config)?;
    Ok(config)
}

fn resolve_env_vars(value: &mut toml::Value) -> Result<(), ScrapeError> {
    match value {
        toml::Value::String(s) => {
            *s = resolve_string(s)?;
            Ok(())
        }
        toml::Value::Array(items) => items.iter_mut().try_for_each(resolve_env_vars),
        toml::Value::Table(map) => map.values_mut().try_for_each(resolve_env_vars),
        _ => Ok(()),
    }
}

/// Replace every `${NAME}` occurrence in `input` with the named
/// environment variable's value. An unresolved name is a fatal config
/// error, never a silent empty string.
fn resolve_string(input: &str) -> Result<String, ScrapeError> {
    let mut output = String::with_capacity(input.len());
    let mut rest = input;
    while let Some(start) = rest.find("${") {
        let Some(end_rel) = rest[start + 2..].find('}') else {
            output.push_str(rest);
            return Ok(output);
        };
        let end = start + 2 + end_rel;
        output.push_str(&rest[..start]);
        let var_name = &rest[start + 2..end];
        let resolved = std::env::var(var_name).map_err(|_| {
            ScrapeError::config("<config>", format!("environment variable `{var_name}` referenced in config is not set"))
        })?;
        output.push_str(&resolved);
        rest = &rest[end + 1..];
    }
    output.push_str(rest);
    Ok(output)
}

/// Semantic checks that can't be expressed as serde schema: the mode/range
/// contradiction and the dedup-keys-without-keys contradiction from §7,
/// plus the histogram bucket-ordering requirement from §8.
fn validate(config: &Config) -> Result<(), ScrapeError> {
    let fp = &config.scraper.fingerprint_store;
    match fp.backend {
        StoreBackend::Sqlite if fp.sqlite.is_none() => {
            return Err(ScrapeError::config("<config>", "fingerprintStore.backend = sqlite requires fingerprintStore.sqlite.path"));
        }
        StoreBackend::Valkey | StoreBackend::Redis if fp.valkey.is_none() => {
            return Err(ScrapeError::config("<config>", "fingerprintStore.backend = valkey/redis requires fingerprintStore.valkey"));
        }
        _ => {}
    }

    for source in &config.sources {
        if matches!(source.mode, ScrapeMode::Range) && source.range_keys.is_none() {
            return Err(ScrapeError::config(&source.name, "mode = range requires rangeKeys"));
        }
        if source.delta_detection.enabled
            && matches!(source.delta_detection.fingerprint_mode, FingerprintMode::Keys)
            && source.delta_detection.fingerprint_keys.is_empty()
        {
            return Err(ScrapeError::config(&source.name, "deltaDetection.fingerprintMode = keys requires fingerprintKeys"));
        }
        for histogram in &source.histogram_readings {
            if !histogram.buckets.windows(2).all(|w| w[0] < w[1]) {
                return Err(ScrapeError::config(
                    &source.name,
                    format!("histogram `{}` bucket boundaries must be strictly ascending", histogram.name),
                ));
            }
        }
    }
    Ok(())
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    #[test]
    fn resolve_string_substitutes_known_var() {
        // SAFETY: test-only, single-threaded within this process's test harness slot.
        unsafe { std::env::set_var("OTELSCRAPE_TEST_TOKEN", "secret123") };
        let resolved = resolve_string("Bearer ${OTELSCRAPE_TEST_TOKEN}").unwrap();
        assert_eq!(resolved, "Bearer secret123");
        unsafe { std::env::remove_var("OTELSCRAPE_TEST_TOKEN") };
    }

    #[test]
    fn resolve_string_errors_on_unset_var() {
        // SAFETY: test-only, single-threaded within this process's test harness slot.
        unsafe { std::env::remove_var("OTELSCRAPE_TEST_MISSING") };
        let result = resolve_string("${OTELSCRAPE_TEST_MISSING}");
        assert!(result.is_err());
    }

    #[test]
    fn resolve_string_is_transparent_without_placeholders() {
        assert_eq!(resolve_string("plain-value").unwrap(), "plain-value");
    }

    #[test]
    fn validate_rejects_range_mode_without_range_keys() {
        let toml_str = r#"
[scraper]
otel_collector_endpoint = "http://localhost:4317"
[scraper.fingerprint_store]
backend = "sqlite"
[scraper.fingerprint_store.sqlite]
path = "/tmp/otelscrape-test.db"

[[sources]]
name = "demo"
base_url = "https://example.com"
endpoint = "/posts"
frequency = "5min"
mode = "range"
"#;
        let config: Config = toml::from_str(toml_str).unwrap();
        assert!(validate(&config).is_err());
    }
}
