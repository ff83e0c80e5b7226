//! Command-line surface (§6.10), grounded on `tokf-cli`'s `Cli` — a single
//! derive-based struct with a global flag carrying an `env` fallback, the
//! same shape as `--preserve-color`/`TOKF_PRESERVE_COLOR`.

use std::path::PathBuf;

use clap::Parser;

#[derive(Parser, Debug)]
#[command(name = "otelscrape", version, about = "Configuration-driven bridge from HTTP/JSON APIs to OTLP metrics and logs")]
pub struct Cli {
    /// Path to the scraper configuration TOML file
    #[arg(long, env = "SCRAPER_CONFIG")]
    pub config: PathBuf,
}
