pub mod mapper;
pub mod otlp;
pub mod self_telemetry;

pub use mapper::{Sink, TelemetryMapper};
pub use self_telemetry::SelfTelemetry;
