pub mod config;
pub mod digest;
pub mod error;
pub mod path;
pub mod time;

pub use error::{ErrorKind, ScrapeError};

/// One extracted record: a JSON value (object, scalar, or array element)
/// pulled from a response body at `dataKey`.
pub type Record = serde_json::Value;
