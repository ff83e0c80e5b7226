//! OTLP meter/logger provider construction, grounded on
//! `src/telemetry/otel.rs::build_provider`: one `PeriodicReader` wrapping a
//! transport-selected exporter, with `service.name` (and `service.version`)
//! as resource attributes. Transport (gRPC vs. HTTP/protobuf) is picked at
//! runtime from `scraper.otelTransport` rather than a cargo feature, so both
//! exporter builders are always compiled in.

use std::time::Duration;

use opentelemetry::KeyValue;
use opentelemetry_otlp::{LogExporter, MetricExporter, WithExportConfig};
use opentelemetry_sdk::logs::SdkLoggerProvider;
use opentelemetry_sdk::metrics::{PeriodicReader, SdkMeterProvider, Temporality};
use opentelemetry_sdk::Resource;
use otelscrape_common::config::OtelTransport;
use otelscrape_common::{ErrorKind, ScrapeError};

const EXPORT_TIMEOUT_SECS: u64 = 5;

fn resource(service_name: &str) -> Resource {
    Resource::builder()
        .with_attribute(KeyValue::new("service.name", service_name.to_string()))
        .with_attribute(KeyValue::new("service.version", env!("CARGO_PKG_VERSION")))
        .build()
}

/// Build the metrics provider for one resource (a source, or the global
/// self-telemetry service name). `endpoint` is the collector address;
/// `transport` picks gRPC (port 4317) vs. HTTP/protobuf (port 4318).
pub fn build_meter_provider(
    endpoint: &str,
    transport: OtelTransport,
    service_name: &str,
) -> Result<SdkMeterProvider, ScrapeError> {
    let exporter = build_metric_exporter(endpoint, transport)?;
    let reader = PeriodicReader::builder(exporter).build();
    Ok(SdkMeterProvider::builder()
        .with_reader(reader)
        .with_resource(resource(service_name))
        .build())
}

pub fn build_logger_provider(
    endpoint: &str,
    transport: OtelTransport,
    service_name: &str,
) -> Result<SdkLoggerProvider, ScrapeError> {
    let exporter = build_log_exporter(endpoint, transport)?;
    Ok(SdkLoggerProvider::builder()
        .with_batch_exporter(exporter)
        .with_resource(resource(service_name))
        .build())
}

fn build_metric_exporter(endpoint: &str, transport: OtelTransport) -> Result<MetricExporter, ScrapeError> {
    let builder = MetricExporter::builder().with_temporality(Temporality::Delta);
    let result = match transport {
        OtelTransport::Grpc => builder
            .with_tonic()
            .with_endpoint(endpoint)
            .with_timeout(Duration::from_secs(EXPORT_TIMEOUT_SECS))
            .build(),
        OtelTransport::Http => builder
            .with_http()
            .with_endpoint(endpoint)
            .with_timeout(Duration::from_secs(EXPORT_TIMEOUT_SECS))
            .build(),
    };
    result.map_err(|e| ScrapeError::with_cause("<telemetry>", "init", ErrorKind::Emission, e))
}

fn build_log_exporter(endpoint: &str, transport: OtelTransport) -> Result<LogExporter, ScrapeError> {
    let builder = LogExporter::builder();
    let result = match transport {
        OtelTransport::Grpc => builder
            .with_tonic()
            .with_endpoint(endpoint)
            .with_timeout(Duration::from_secs(EXPORT_TIMEOUT_SECS))
            .build(),
        OtelTransport::Http => builder
            .with_http()
            .with_endpoint(endpoint)
            .with_timeout(Duration::from_secs(EXPORT_TIMEOUT_SECS))
            .build(),
    };
    result.map_err(|e| ScrapeError::with_cause("<telemetry>", "init", ErrorKind::Emission, e))
}

/// Bounded best-effort flush on shutdown, the same shape as
/// `OtelReporter::shutdown`: give the exporter a grace window on a side
/// thread rather than blocking the async shutdown path indefinitely.
pub fn shutdown_meter_provider(provider: &SdkMeterProvider) -> bool {
    let provider = provider.clone();
    let (tx, rx) = std::sync::mpsc::channel::<()>();
    std::thread::spawn(move || {
        let _ = provider.shutdown();
        let _ = tx.send(());
    });
    rx.recv_timeout(Duration::from_millis(500)).is_ok()
}

pub fn shutdown_logger_provider(provider: &SdkLoggerProvider) -> bool {
    let provider = provider.clone();
    let (tx, rx) = std::sync::mpsc::channel::<()>();
    std::thread::spawn(move || {
        let _ = provider.shutdown();
        let _ = tx.send(());
    });
    rx.recv_timeout(Duration::from_millis(500)).is_ok()
}
