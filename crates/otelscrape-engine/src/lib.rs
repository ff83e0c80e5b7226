//! Window planning and tick orchestration (§4.5/§4.6): the two pieces that
//! sit between the scheduler and the HTTP client/record pipeline/telemetry
//! mapper built in the sibling crates.

pub mod scraper;
pub mod window;

pub use scraper::{ScraperEngine, TickOutcome, TickStatus, UnitOutcome};
pub use window::{plan, Plan, TimeQuery, WorkUnit};
