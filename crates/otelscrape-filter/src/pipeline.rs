//! The record pipeline (§4.7), applied in fixed order: drop, keep, cap,
//! dedup. Mirrors `tokf-cli`'s filter stage ordering (`skip` then `keep`
//! then chunking) generalized from text lines to JSON records.

use std::collections::HashSet;

use otelscrape_common::config::{DeltaDetectionConfig, FilterConfig, FingerprintMode};
use otelscrape_common::{digest, path, Record, ScrapeError};
use otelscrape_store::FingerprintStore;

use crate::predicate::matches;

/// Backpressure cap from §5: a fingerprint insert batch must not exceed
/// 10_000 digests per store transaction.
const MAX_INSERT_BATCH: usize = 10_000;

/// Self-telemetry-relevant counts produced by one pipeline run.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct PipelineStats {
    pub input_records: usize,
    pub dropped_by_rules: usize,
    pub capped: usize,
    pub dedupe_hits: usize,
    pub dedupe_misses: usize,
}

pub struct PipelineOutcome {
    pub records: Vec<Record>,
    pub stats: PipelineStats,
}

/// Run the four stages against one unit's extracted records.
///
/// `default_ttl`/`default_max_entries` are the store-wide fallbacks used
/// when a source's `deltaDetection` does not override them.
pub async fn run(
    source: &str,
    mut records: Vec<Record>,
    filters: &FilterConfig,
    max_records_per_scrape: usize,
    delta: &DeltaDetectionConfig,
    store: Option<&(dyn FingerprintStore + Send + Sync)>,
    default_ttl: u64,
    default_max_entries: usize,
) -> Result<PipelineOutcome, ScrapeError> {
    let input_records = records.len();

    records.retain(|r| !is_dropped(filters, r));
    let after_drop = records.len();

    if !filters.keep.is_empty() {
        records.retain(|r| is_kept(filters, r));
    }
    let dropped_by_rules = input_records - records.len();
    let _ = after_drop; // drop-stage count folded into the combined rules count per §4.8 self-telemetry shape

    let capped = records.len().saturating_sub(max_records_per_scrape);
    records.truncate(max_records_per_scrape);

    let mut dedupe_hits = 0usize;
    let mut dedupe_misses = 0usize;

    if delta.enabled {
        let Some(store) = store else {
            return Err(ScrapeError::store(source, "dedup", "deltaDetection.enabled but no fingerprint store configured"));
        };
        let ttl = delta.ttl_seconds.unwrap_or(default_ttl);
        let max_entries = delta.max_entries.unwrap_or(default_max_entries);

        let mut surviving = Vec::with_capacity(records.len());
        let mut fresh_digests = Vec::new();
        let mut seen_this_batch: HashSet<String> = HashSet::new();

        for record in records {
            let digest = compute_digest(delta, &record);
            if seen_this_batch.contains(&digest) || store.seen(source, &digest).await? {
                dedupe_hits += 1;
                continue;
            }
            dedupe_misses += 1;
            seen_this_batch.insert(digest.clone());
            fresh_digests.push(digest);
            surviving.push(record);
        }

        // §5 backpressure: a single store transaction must not carry more
        // than 10_000 digests, so a scrape that produced more fresh records
        // than that in one unit inserts them in bounded chunks rather than
        // one oversized call.
        for chunk in fresh_digests.chunks(MAX_INSERT_BATCH) {
            store.insert_many(source, chunk, ttl).await?;
        }
        if !fresh_digests.is_empty() {
            store.enforce_cap(source, max_entries).await?;
        }
        records = surviving;
    }

    tracing::debug!(
        source,
        input_records,
        dropped_by_rules,
        capped,
        dedupe_hits,
        dedupe_misses,
        surviving = records.len(),
        "record pipeline run complete"
    );

    Ok(PipelineOutcome {
        records,
        stats: PipelineStats {
            input_records,
            dropped_by_rules,
            capped,
            dedupe_hits,
            dedupe_misses,
        },
    })
}

fn is_dropped(filters: &FilterConfig, record: &Record) -> bool {
    filters.drop.iter().any(|rule| rule.predicates.iter().any(|p| matches(p, record)))
}

fn is_kept(filters: &FilterConfig, record: &Record) -> bool {
    filters.keep.iter().any(|rule| rule.predicates.iter().all(|p| matches(p, record)))
}

fn compute_digest(delta: &DeltaDetectionConfig, record: &Record) -> String {
    match delta.fingerprint_mode {
        FingerprintMode::FullRecord => digest::full_record_digest(record),
        FingerprintMode::Keys => {
            let pairs: Vec<(&str, Option<serde_json::Value>)> = delta
                .fingerprint_keys
                .iter()
                .map(|key| (key.as_str(), path::extract(key, record).and_then(|r| r.as_single().cloned())))
                .collect();
            digest::keyed_digest(pairs.iter().map(|(k, v)| (*k, v.as_ref())))
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use otelscrape_common::config::{MatchType, Predicate, PredicateRule, PredicateValue};
    use otelscrape_store::sqlite::SqliteStore;
    use serde_json::json;

    fn predicate(field: &str, match_type: MatchType, value: serde_json::Value) -> Predicate {
        Predicate {
            field: field.to_string(),
            match_type,
            value: PredicateValue::Scalar(value),
        }
    }

    #[tokio::test]
    async fn drop_then_keep_scenario() {
        let records = vec![json!({"s": "ok"}), json!({"s": "fail"}), json!({"s": "skip"})];
        let filters = FilterConfig {
            drop: vec![PredicateRule {
                predicates: vec![predicate("s", MatchType::Equals, json!("skip"))],
            }],
            keep: vec![PredicateRule {
                predicates: vec![Predicate {
                    field: "s".to_string(),
                    match_type: MatchType::In,
                    value: PredicateValue::List(vec![json!("ok"), json!("fail")]),
                }],
            }],
        };
        let delta = DeltaDetectionConfig::default();
        let outcome = run("demo", records, &filters, usize::MAX, &delta, None, 3600, 10_000)
            .await
            .unwrap();
        assert_eq!(outcome.records.len(), 2);
        assert_eq!(outcome.stats.dropped_by_rules, 1);
    }

    #[tokio::test]
    async fn per_scrape_cap_truncates_in_order() {
        let records = vec![json!({"id": 1}), json!({"id": 2}), json!({"id": 3})];
        let filters = FilterConfig::default();
        let delta = DeltaDetectionConfig::default();
        let outcome = run("demo", records, &filters, 2, &delta, None, 3600, 10_000).await.unwrap();
        assert_eq!(outcome.records, vec![json!({"id": 1}), json!({"id": 2})]);
        assert_eq!(outcome.stats.capped, 1);
    }

    #[tokio::test]
    async fn zero_cap_suppresses_all_emissions() {
        let records = vec![json!({"id": 1})];
        let filters = FilterConfig::default();
        let delta = DeltaDetectionConfig::default();
        let outcome = run("demo", records, &filters, 0, &delta, None, 3600, 10_000).await.unwrap();
        assert!(outcome.records.is_empty());
    }

    #[tokio::test]
    async fn dedup_on_keys_is_idempotent_across_scrapes() {
        let dir = tempfile::TempDir::new().unwrap();
        let store = SqliteStore::open_default_retries(&dir.path().join("fp.db")).unwrap();
        let filters = FilterConfig::default();
        let delta = DeltaDetectionConfig {
            enabled: true,
            fingerprint_mode: FingerprintMode::Keys,
            fingerprint_keys: vec!["id".to_string()],
            ttl_seconds: None,
            max_entries: None,
        };

        let first = run(
            "demo",
            vec![json!({"id": "A", "status": "ok"})],
            &filters,
            usize::MAX,
            &delta,
            Some(&store),
            3600,
            10_000,
        )
        .await
        .unwrap();
        assert_eq!(first.records.len(), 1);
        assert_eq!(first.stats.dedupe_misses, 1);

        let second = run(
            "demo",
            vec![json!({"id": "A", "status": "ok"})],
            &filters,
            usize::MAX,
            &delta,
            Some(&store),
            3600,
            10_000,
        )
        .await
        .unwrap();
        assert!(second.records.is_empty());
        assert_eq!(second.stats.dedupe_hits, 1);
    }

    #[tokio::test]
    async fn dedup_within_one_batch_counts_duplicates_as_hits() {
        let dir = tempfile::TempDir::new().unwrap();
        let store = SqliteStore::open_default_retries(&dir.path().join("fp.db")).unwrap();
        let filters = FilterConfig::default();
        let delta = DeltaDetectionConfig {
            enabled: true,
            fingerprint_mode: FingerprintMode::FullRecord,
            fingerprint_keys: vec![],
            ttl_seconds: None,
            max_entries: None,
        };
        let records = vec![json!({"id": "A"}), json!({"id": "A"})];
        let outcome = run("demo", records, &filters, usize::MAX, &delta, Some(&store), 3600, 10_000)
            .await
            .unwrap();
        assert_eq!(outcome.records.len(), 1);
        assert_eq!(outcome.stats.dedupe_hits, 1);
        assert_eq!(outcome.stats.dedupe_misses, 1);
    }
}
