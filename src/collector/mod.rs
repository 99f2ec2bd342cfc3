//! Source collectors
//!
//! One collector per external source, all speaking the same contract:
//! `collect` a window into raw records, `probe` for reachability. Collectors
//! emit external identifiers verbatim; canonical resolution happens in
//! staging. Payload parsing is exposed per source so the staging zone can
//! re-parse raw payloads during replays.

use async_trait::async_trait;

use crate::domain::{CollectionWindow, CollectorBatch, HealthProbe, ProvisionalLine};
use crate::error::{Result, SharplineError};
use crate::shutdown::ShutdownToken;

pub mod client;
pub mod league_schedule;
pub mod odds_comparison;
pub mod odds_provider;
pub mod percentages_provider;
pub mod splits_provider;

pub use client::SourceClient;
pub use league_schedule::LeagueScheduleCollector;
pub use odds_comparison::OddsComparisonCollector;
pub use odds_provider::OddsProviderCollector;
pub use percentages_provider::PercentagesCollector;
pub use splits_provider::SplitsCollector;

/// Source tags, also the keys of `collectors` in configuration
pub const SOURCE_ODDS_API: &str = "odds_api";
pub const SOURCE_BETSPLITS: &str = "betsplits";
pub const SOURCE_WAGERPCT: &str = "wagerpct";
pub const SOURCE_MLB_STATS: &str = "mlb_stats";
pub const SOURCE_LINECOMPARE: &str = "linecompare";

/// The collector contract
#[async_trait]
pub trait Collector: Send + Sync {
    /// Source tag this collector writes on its records.
    fn source(&self) -> &'static str;

    /// Fetch one window's worth of raw records.
    async fn collect(
        &self,
        window: CollectionWindow,
        shutdown: ShutdownToken,
    ) -> Result<CollectorBatch>;

    /// Lightweight reachability probe, used by recovery.
    async fn probe(&self) -> Result<HealthProbe>;
}

/// Re-parse a stored raw payload for its provisional lines.
///
/// The schedule source produces games rather than lines, so its payloads
/// parse to an empty line set here.
pub fn parse_source_payload(
    source: &str,
    payload: &serde_json::Value,
) -> Result<Vec<ProvisionalLine>> {
    match source {
        SOURCE_ODDS_API => odds_provider::parse_payload(payload),
        SOURCE_BETSPLITS => splits_provider::parse_payload(payload),
        SOURCE_WAGERPCT => percentages_provider::parse_payload(payload),
        SOURCE_LINECOMPARE => odds_comparison::parse_payload(payload),
        SOURCE_MLB_STATS => Ok(Vec::new()),
        other => Err(SharplineError::Parse(format!(
            "unknown source tag: {}",
            other
        ))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_unknown_source_rejected() {
        let payload = serde_json::json!({});
        assert!(parse_source_payload("espn", &payload).is_err());
    }

    #[test]
    fn test_schedule_source_yields_no_lines() {
        let payload = serde_json::json!({"dates": []});
        let lines = parse_source_payload(SOURCE_MLB_STATS, &payload).unwrap();
        assert!(lines.is_empty());
    }
}
