use clap::{Parser, Subcommand};
use chrono::NaiveDate;

use crate::domain::RunMode;

/// Exit code for configuration failures
pub const EXIT_MISCONFIGURATION: i32 = 3;

#[derive(Parser)]
#[command(name = "sharpline")]
#[command(version = "0.1.0")]
#[command(about = "MLB betting-line pipeline with sharp-action detection", long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,

    /// Config file path
    #[arg(short, long, default_value = "config/default.toml")]
    pub config: String,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Run the pipeline for a window
    Run {
        /// Zones to execute: full, raw, staging, curated, pair
        #[arg(short, long, default_value = "full")]
        mode: String,
        /// Window start date (default: today)
        #[arg(long)]
        from: Option<NaiveDate>,
        /// Window end date (default: same as start)
        #[arg(long)]
        to: Option<NaiveDate>,
    },
    /// Show recent pipeline runs
    Status,
    /// Show collector health and database status
    Health,
    /// Trigger recovery for one collector
    Recover {
        /// Collector source tag (e.g. odds_api)
        collector: String,
    },
    /// Import schedule outcomes for a date range
    ResolveOutcomes {
        #[arg(long)]
        from: NaiveDate,
        #[arg(long)]
        to: NaiveDate,
    },
    /// Apply database migrations and bootstrap reference data
    Migrate,
}

/// Parse the CLI mode string; `None` means misconfiguration.
pub fn parse_mode(raw: &str) -> Option<RunMode> {
    match raw {
        "full" => Some(RunMode::Full),
        "raw" | "raw_only" => Some(RunMode::RawOnly),
        "staging" | "staging_only" => Some(RunMode::StagingOnly),
        "curated" | "curated_only" => Some(RunMode::CuratedOnly),
        "pair" => Some(RunMode::Pair),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_mode_aliases() {
        assert_eq!(parse_mode("full"), Some(RunMode::Full));
        assert_eq!(parse_mode("raw"), Some(RunMode::RawOnly));
        assert_eq!(parse_mode("raw_only"), Some(RunMode::RawOnly));
        assert_eq!(parse_mode("pair"), Some(RunMode::Pair));
        assert_eq!(parse_mode("everything"), None);
    }
}
