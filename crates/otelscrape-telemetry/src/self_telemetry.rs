//! Self-telemetry instrument registry (§6.8): the scraper's own operational
//! metrics, grounded on `src/telemetry/otel.rs::OtelReporter` — one struct
//! holding every instrument, built once from a `Meter` and fed on each
//! scrape/cleanup completion.

use opentelemetry::metrics::{Counter, Gauge, Histogram, Meter, MeterProvider as _};
use opentelemetry::KeyValue;
use opentelemetry_sdk::metrics::SdkMeterProvider;

pub struct SelfTelemetry {
    scrape_total: Counter<u64>,
    scrape_duration: Histogram<f64>,
    last_scrape_timestamp: Gauge<f64>,
    last_scrape_records: Gauge<f64>,
    dedupe_hits: Counter<u64>,
    dedupe_misses: Counter<u64>,
    dedupe_total: Counter<u64>,
    dedupe_hit_rate: Gauge<f64>,
    cleanup_duration: Histogram<f64>,
    cleanup_items: Counter<u64>,
    cleanup_last_timestamp: Gauge<f64>,
    cleanup_last_items: Gauge<f64>,
}

impl SelfTelemetry {
    pub fn from_provider(provider: &SdkMeterProvider) -> Self {
        let meter: Meter = provider.meter("otelscrape.self");

        Self {
            scrape_total: meter
                .u64_counter("scraper.scrape_total")
                .with_description("Number of scrape attempts per source")
                .build(),
            scrape_duration: meter
                .f64_histogram("scraper.scrape_duration_seconds")
                .with_unit("s")
                .with_description("Wall-clock duration of a scrape, per source")
                .build(),
            last_scrape_timestamp: meter
                .f64_gauge("scraper.last_scrape_timestamp")
                .with_description("Unix timestamp of the last scrape attempt, per source")
                .build(),
            last_scrape_records: meter
                .f64_gauge("scraper.last_scrape_records")
                .with_description("Number of records emitted by the last scrape, per source")
                .build(),
            dedupe_hits: meter
                .u64_counter("scraper.dedupe_hits_total")
                .with_description("Records dropped because their fingerprint was already seen")
                .build(),
            dedupe_misses: meter
                .u64_counter("scraper.dedupe_misses_total")
                .with_description("Records that passed fingerprint dedup as new")
                .build(),
            dedupe_total: meter
                .u64_counter("scraper.dedupe_total")
                .with_description("Records evaluated for fingerprint dedup")
                .build(),
            dedupe_hit_rate: meter
                .f64_gauge("scraper.dedupe_hit_rate")
                .with_description("Dedup hit ratio for the last scrape, per source")
                .build(),
            cleanup_duration: meter
                .f64_histogram("scraper.cleanup_duration_seconds")
                .with_unit("s")
                .with_description("Wall-clock duration of a fingerprint store cleanup job")
                .build(),
            cleanup_items: meter
                .u64_counter("scraper.cleanup_items_total")
                .with_description("Fingerprint rows removed by cleanup jobs")
                .build(),
            cleanup_last_timestamp: meter
                .f64_gauge("scraper.cleanup_last_timestamp")
                .with_description("Unix timestamp of the last cleanup run, per job/backend")
                .build(),
            cleanup_last_items: meter
                .f64_gauge("scraper.cleanup_last_items")
                .with_description("Items removed by the last cleanup run, per job/backend")
                .build(),
        }
    }

    #[allow(clippy::cast_precision_loss)]
    pub fn record_scrape(&self, source: &str, status: &str, api_type: &str, duration_secs: f64, record_count: u64, now_unix: f64) {
        let attrs = [
            KeyValue::new("source", source.to_string()),
            KeyValue::new("status", status.to_string()),
            KeyValue::new("api_type", api_type.to_string()),
        ];
        self.scrape_total.add(1, &attrs);
        self.scrape_duration.record(duration_secs, &attrs);

        let source_attrs = [KeyValue::new("source", source.to_string())];
        self.last_scrape_timestamp.record(now_unix, &source_attrs);
        self.last_scrape_records.record(record_count as f64, &source_attrs);
    }

    #[allow(clippy::cast_precision_loss)]
    pub fn record_dedupe(&self, source: &str, hits: u64, misses: u64) {
        let attrs = [KeyValue::new("source", source.to_string())];
        self.dedupe_hits.add(hits, &attrs);
        self.dedupe_misses.add(misses, &attrs);
        let total = hits + misses;
        self.dedupe_total.add(total, &attrs);

        let hit_rate = if total == 0 { 0.0 } else { hits as f64 / total as f64 };
        self.dedupe_hit_rate.record(hit_rate, &attrs);
    }

    #[allow(clippy::cast_precision_loss)]
    pub fn record_cleanup(&self, job: &str, backend: &str, duration_secs: f64, items_removed: u64, now_unix: f64) {
        let attrs = [KeyValue::new("job", job.to_string()), KeyValue::new("backend", backend.to_string())];
        self.cleanup_duration.record(duration_secs, &attrs);
        self.cleanup_items.add(items_removed, &attrs);
        self.cleanup_last_timestamp.record(now_unix, &attrs);
        self.cleanup_last_items.record(items_removed as f64, &attrs);
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use opentelemetry_sdk::metrics::{ManualReader, SdkMeterProvider, Temporality};

    fn make_telemetry() -> SelfTelemetry {
        let reader = ManualReader::builder().with_temporality(Temporality::Delta).build();
        let provider = SdkMeterProvider::builder().with_reader(reader).build();
        SelfTelemetry::from_provider(&provider)
    }

    #[test]
    fn record_scrape_does_not_panic() {
        let telemetry = make_telemetry();
        telemetry.record_scrape("demo", "success", "rest", 0.5, 10, 1_700_000_000.0);
    }

    #[test]
    fn record_dedupe_hit_rate_handles_zero_total() {
        let telemetry = make_telemetry();
        // Must not divide by zero when a source produced no records to dedup.
        telemetry.record_dedupe("demo", 0, 0);
    }

    #[test]
    fn record_cleanup_does_not_panic() {
        let telemetry = make_telemetry();
        telemetry.record_cleanup("sqlite-gc", "sqlite", 0.02, 17, 1_700_000_000.0);
    }
}
