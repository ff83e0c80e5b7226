//! Per-record OTLP mapping (§4.8): attributes → labels, gauges, counters,
//! histograms, and optional log records. Instruments are created once per
//! metric name and cached, since the OTel SDK aggregates additively across
//! repeated `add`/`record` calls against the same instrument rather than
//! per call site.

use std::collections::HashMap;
use std::sync::Mutex;

use opentelemetry::logs::{AnyValue, LogRecord as _, Logger as _, Severity};
use opentelemetry::metrics::{Counter, Gauge, Histogram, Meter, MeterProvider as _};
use opentelemetry::{KeyValue, Value};
use opentelemetry_sdk::logs::{SdkLogger, SdkLoggerProvider};
use opentelemetry_sdk::metrics::SdkMeterProvider;
use otelscrape_common::config::{
    AttributeSpec, CounterSpec, GaugeSpec, HistogramSpec, LogSeverity, Predicate, SeverityRule,
};
use otelscrape_common::{digest, path, Record};
use otelscrape_filter::predicate;

/// Where mapped telemetry goes: a live OTLP pipeline, or a dry-run mode
/// that logs structured lines to stderr instead of exporting over the
/// network (§6: "the same payloads are written to standard error ...
/// and no network export occurs").
pub enum Sink {
    Otlp { meter: Meter, logger: SdkLogger },
    DryRun,
}

pub struct TelemetryMapper {
    sink: Sink,
    counters: Mutex<HashMap<String, Counter<f64>>>,
    gauges: Mutex<HashMap<String, Gauge<f64>>>,
    histograms: Mutex<HashMap<String, (Vec<f64>, Histogram<f64>)>>,
}

impl TelemetryMapper {
    pub fn from_providers(meter_provider: &SdkMeterProvider, logger_provider: &SdkLoggerProvider, meter_name: &'static str) -> Self {
        Self {
            sink: Sink::Otlp {
                meter: meter_provider.meter(meter_name),
                logger: logger_provider.logger(meter_name),
            },
            counters: Mutex::new(HashMap::new()),
            gauges: Mutex::new(HashMap::new()),
            histograms: Mutex::new(HashMap::new()),
        }
    }

    pub fn dry_run() -> Self {
        Self {
            sink: Sink::DryRun,
            counters: Mutex::new(HashMap::new()),
            gauges: Mutex::new(HashMap::new()),
            histograms: Mutex::new(HashMap::new()),
        }
    }

    /// Map one surviving record through attributes, gauges, counters,
    /// histograms, and (if enabled) a log record.
    #[allow(clippy::too_many_arguments)]
    pub fn emit_record(
        &self,
        source: &str,
        record: &Record,
        attributes: &[AttributeSpec],
        gauges: &[GaugeSpec],
        counters: &[CounterSpec],
        histograms: &[HistogramSpec],
        log_severity: &[SeverityRule],
        emit_logs: bool,
    ) {
        let labels = resolve_attributes(attributes, record);
        let kvs: Vec<KeyValue> = labels.iter().map(|(k, v)| KeyValue::new(k.clone(), json_to_otel_value(v))).collect();

        for spec in attributes {
            let Some(as_metric) = &spec.as_metric else { continue };
            let Some(raw) = path::extract(&spec.data_key, record).and_then(|r| r.as_single().cloned()) else {
                continue;
            };
            let value = numeric_or_mapped(&raw, &as_metric.value_mapping);
            let Some(value) = value else {
                tracing::debug!(source, field = %spec.data_key, raw = %raw, "attribute value did not resolve to a number or a mapped value; skipping asMetric");
                continue;
            };
            let name = as_metric.metric_name.clone().unwrap_or_else(|| spec.name.clone());
            self.add_counter(&name, value, &kvs);
        }

        for spec in gauges {
            let value = spec.fixed_value.or_else(|| spec.data_key.as_deref().and_then(|k| path::extract_f64(k, record)));
            if let Some(value) = value {
                self.record_gauge(&spec.name, value, &kvs);
            }
        }

        for spec in counters {
            let value = spec
                .fixed_value
                .or_else(|| spec.value_key.as_deref().and_then(|k| path::extract_f64(k, record)))
                .or_else(|| spec.data_key.as_deref().and_then(|k| path::extract_f64(k, record)))
                .unwrap_or(1.0);
            self.add_counter(&spec.name, value, &kvs);
        }

        for spec in histograms {
            let value = spec.fixed_value.or_else(|| spec.data_key.as_deref().and_then(|k| path::extract_f64(k, record)));
            if let Some(value) = value {
                self.record_histogram(&spec.name, &spec.buckets, value, &kvs);
            }
        }

        if emit_logs {
            self.emit_log(source, record, log_severity, &labels);
        }
    }

    fn add_counter(&self, name: &str, value: f64, kvs: &[KeyValue]) {
        match &self.sink {
            Sink::Otlp { meter, .. } => {
                let mut cache = self.counters.lock().unwrap_or_else(std::sync::PoisonError::into_inner);
                let counter = cache.entry(name.to_string()).or_insert_with(|| meter.f64_counter(name.to_string()).build());
                counter.add(value, kvs);
            }
            Sink::DryRun => {
                eprintln!("{}", dry_run_line("counter", name, value, kvs));
            }
        }
    }

    fn record_gauge(&self, name: &str, value: f64, kvs: &[KeyValue]) {
        match &self.sink {
            Sink::Otlp { meter, .. } => {
                let mut cache = self.gauges.lock().unwrap_or_else(std::sync::PoisonError::into_inner);
                let gauge = cache.entry(name.to_string()).or_insert_with(|| meter.f64_gauge(name.to_string()).build());
                gauge.record(value, kvs);
            }
            Sink::DryRun => {
                eprintln!("{}", dry_run_line("gauge", name, value, kvs));
            }
        }
    }

    fn record_histogram(&self, name: &str, buckets: &[f64], value: f64, kvs: &[KeyValue]) {
        match &self.sink {
            Sink::Otlp { meter, .. } => {
                let mut cache = self.histograms.lock().unwrap_or_else(std::sync::PoisonError::into_inner);
                let (_, histogram) = cache
                    .entry(name.to_string())
                    .or_insert_with(|| (buckets.to_vec(), meter.f64_histogram(name.to_string()).with_boundaries(buckets.to_vec()).build()));
                histogram.record(value, kvs);
            }
            Sink::DryRun => {
                eprintln!("{}", dry_run_line("histogram", name, value, kvs));
            }
        }
    }

    fn emit_log(&self, source: &str, record: &Record, rules: &[SeverityRule], labels: &[(String, serde_json::Value)]) {
        let severity = resolve_severity(rules, record);
        let body = digest::canonical_json(record);

        match &self.sink {
            Sink::Otlp { logger, .. } => {
                let mut log_record = logger.create_log_record();
                log_record.set_body(AnyValue::from(body.clone()));
                log_record.set_severity_number(severity_number(severity));
                log_record.set_severity_text(severity_text(severity));
                for (k, v) in labels {
                    log_record.add_attribute(k.clone(), json_to_any_value(v));
                }
                logger.emit(log_record);
            }
            Sink::DryRun => {
                eprintln!("{{\"source\":\"{source}\",\"severity\":\"{}\",\"body\":{body}}}", severity_text(severity));
            }
        }
    }
}

fn resolve_attributes(specs: &[AttributeSpec], record: &Record) -> Vec<(String, serde_json::Value)> {
    specs
        .iter()
        .filter_map(|spec| {
            path::extract(&spec.data_key, record)
                .and_then(|r| r.as_single().cloned())
                .map(|v| (spec.name.clone(), v))
        })
        .collect()
}

fn numeric_or_mapped(value: &serde_json::Value, mapping: &HashMap<String, f64>) -> Option<f64> {
    match value {
        serde_json::Value::Number(n) => n.as_f64(),
        serde_json::Value::String(s) => mapping.get(s).copied().or_else(|| s.parse().ok()),
        _ => None,
    }
}

fn json_to_otel_value(value: &serde_json::Value) -> Value {
    match value {
        serde_json::Value::String(s) => Value::String(s.clone().into()),
        serde_json::Value::Bool(b) => Value::Bool(*b),
        serde_json::Value::Number(n) => {
            if let Some(i) = n.as_i64() {
                Value::I64(i)
            } else {
                Value::F64(n.as_f64().unwrap_or(0.0))
            }
        }
        other => Value::String(other.to_string().into()),
    }
}

fn json_to_any_value(value: &serde_json::Value) -> AnyValue {
    match value {
        serde_json::Value::String(s) => AnyValue::String(s.clone().into()),
        serde_json::Value::Bool(b) => AnyValue::Boolean(*b),
        serde_json::Value::Number(n) => {
            if let Some(i) = n.as_i64() {
                AnyValue::Int(i)
            } else {
                AnyValue::Double(n.as_f64().unwrap_or(0.0))
            }
        }
        other => AnyValue::String(other.to_string().into()),
    }
}

/// Evaluate `log_severity` in literal rule order; the first rule whose
/// predicate matches wins (no implicit error > warning > info ranking).
fn resolve_severity(rules: &[SeverityRule], record: &Record) -> LogSeverity {
    for rule in rules {
        let predicate = Predicate {
            field: rule.field.clone(),
            match_type: rule.match_type,
            value: rule.value.clone(),
        };
        if predicate::matches(&predicate, record) {
            return rule.severity;
        }
    }
    LogSeverity::Info
}

fn severity_number(severity: LogSeverity) -> Severity {
    match severity {
        LogSeverity::Error => Severity::Error,
        LogSeverity::Warning => Severity::Warn,
        LogSeverity::Info => Severity::Info,
        LogSeverity::Debug => Severity::Debug,
    }
}

fn severity_text(severity: LogSeverity) -> &'static str {
    match severity {
        LogSeverity::Error => "ERROR",
        LogSeverity::Warning => "WARN",
        LogSeverity::Info => "INFO",
        LogSeverity::Debug => "DEBUG",
    }
}

fn dry_run_line(kind: &str, name: &str, value: f64, kvs: &[KeyValue]) -> String {
    let attrs: Vec<String> = kvs.iter().map(|kv| format!("{}={}", kv.key, kv.value)).collect();
    format!("{{\"type\":\"{kind}\",\"name\":\"{name}\",\"value\":{value},\"attrs\":[{}]}}", attrs.join(","))
}
