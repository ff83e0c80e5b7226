use std::fmt;

/// The six error kinds from the error-handling design: each maps to one
/// propagation rule (fatal at startup, per-scrape, or per-unit).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    Config,
    Auth,
    Network,
    Response,
    Store,
    Emission,
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Config => "config",
            Self::Auth => "auth",
            Self::Network => "network",
            Self::Response => "response",
            Self::Store => "store",
            Self::Emission => "emission",
        };
        f.write_str(s)
    }
}

/// A scrape-pipeline error, carrying the `{source, phase, error_kind,
/// message}` fields the error-handling design requires on every
/// structured log line.
#[derive(Debug, thiserror::Error)]
#[error("[{source_name}] {phase}: {kind} error: {message}")]
pub struct ScrapeError {
    pub source_name: String,
    pub phase: &'static str,
    pub kind: ErrorKind,
    pub message: String,
    #[source]
    pub cause: Option<Box<dyn std::error::Error + Send + Sync + 'static>>,
}

impl ScrapeError {
    pub fn new(source_name: impl Into<String>, phase: &'static str, kind: ErrorKind, message: impl Into<String>) -> Self {
        Self {
            source_name: source_name.into(),
            phase,
            kind,
            message: message.into(),
            cause: None,
        }
    }

    pub fn with_cause(
        source_name: impl Into<String>,
        phase: &'static str,
        kind: ErrorKind,
        cause: impl std::error::Error + Send + Sync + 'static,
    ) -> Self {
        Self {
            source_name: source_name.into(),
            phase,
            kind,
            message: cause.to_string(),
            cause: Some(Box::new(cause)),
        }
    }

    pub fn config(source_name: impl Into<String>, message: impl Into<String>) -> Self {
        Self::new(source_name, "config", ErrorKind::Config, message)
    }

    pub fn store(source_name: impl Into<String>, phase: &'static str, message: impl Into<String>) -> Self {
        Self::new(source_name, phase, ErrorKind::Store, message)
    }
}
