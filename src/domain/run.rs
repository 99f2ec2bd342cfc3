//! Pipeline runs and per-zone metrics

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use uuid::Uuid;

use super::line::DataQuality;
use crate::error::RejectReason;

/// Which zones a run executes
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunMode {
    Full,
    RawOnly,
    StagingOnly,
    CuratedOnly,
    /// The staging → curated pair, skipping collection
    Pair,
}

impl RunMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            RunMode::Full => "full",
            RunMode::RawOnly => "raw_only",
            RunMode::StagingOnly => "staging_only",
            RunMode::CuratedOnly => "curated_only",
            RunMode::Pair => "pair",
        }
    }

    pub fn runs_raw(&self) -> bool {
        matches!(self, RunMode::Full | RunMode::RawOnly)
    }

    pub fn runs_staging(&self) -> bool {
        matches!(self, RunMode::Full | RunMode::StagingOnly | RunMode::Pair)
    }

    pub fn runs_curated(&self) -> bool {
        matches!(self, RunMode::Full | RunMode::CuratedOnly | RunMode::Pair)
    }
}

impl std::fmt::Display for RunMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Date window a run operates over
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct CollectionWindow {
    pub start: NaiveDate,
    pub end: NaiveDate,
}

impl CollectionWindow {
    pub fn single_day(date: NaiveDate) -> Self {
        Self {
            start: date,
            end: date,
        }
    }

    pub fn today() -> Self {
        Self::single_day(Utc::now().date_naive())
    }

    pub fn contains(&self, date: NaiveDate) -> bool {
        date >= self.start && date <= self.end
    }
}

/// Terminal status of a pipeline run
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunStatus {
    Succeeded,
    Partial,
    Failed,
}

impl RunStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            RunStatus::Succeeded => "succeeded",
            RunStatus::Partial => "partial",
            RunStatus::Failed => "failed",
        }
    }

    /// CLI exit code contract: 0 success, 1 partial, 2 failed
    pub fn exit_code(&self) -> i32 {
        match self {
            RunStatus::Succeeded => 0,
            RunStatus::Partial => 1,
            RunStatus::Failed => 2,
        }
    }
}

impl std::fmt::Display for RunStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Pipeline zone names
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Zone {
    Raw,
    Staging,
    Curated,
}

impl Zone {
    pub fn as_str(&self) -> &'static str {
        match self {
            Zone::Raw => "raw",
            Zone::Staging => "staging",
            Zone::Curated => "curated",
        }
    }
}

impl std::fmt::Display for Zone {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Counters one zone produces for a run
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ZoneMetrics {
    pub records_in: u64,
    pub records_out: u64,
    pub errors: u64,
    pub quarantined: u64,
    pub rejected: HashMap<String, u64>,
    pub quality: HashMap<String, u64>,
}

impl ZoneMetrics {
    pub fn record_rejection(&mut self, reason: RejectReason) {
        *self.rejected.entry(reason.as_str().to_string()).or_insert(0) += 1;
        self.errors += 1;
    }

    pub fn record_quality(&mut self, quality: DataQuality) {
        *self.quality.entry(quality.as_str().to_string()).or_insert(0) += 1;
    }

    /// Errors as a fraction of input; empty input is not an error.
    pub fn error_rate(&self) -> f64 {
        if self.records_in == 0 {
            0.0
        } else {
            self.errors as f64 / self.records_in as f64
        }
    }
}

/// One orchestrated pipeline execution
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PipelineRun {
    pub run_id: Uuid,
    pub mode: RunMode,
    pub window: CollectionWindow,
    pub started_at: DateTime<Utc>,
    pub finished_at: Option<DateTime<Utc>>,
    pub zone_metrics: HashMap<String, ZoneMetrics>,
    pub status: RunStatus,
}

impl PipelineRun {
    pub fn begin(mode: RunMode, window: CollectionWindow) -> Self {
        Self {
            run_id: Uuid::new_v4(),
            mode,
            window,
            started_at: Utc::now(),
            finished_at: None,
            zone_metrics: HashMap::new(),
            status: RunStatus::Failed,
        }
    }

    pub fn metrics_for(&self, zone: Zone) -> Option<&ZoneMetrics> {
        self.zone_metrics.get(zone.as_str())
    }

    /// One-line summary for logs and the CLI
    pub fn summary(&self) -> String {
        let mut parts: Vec<String> = Vec::new();
        for zone in [Zone::Raw, Zone::Staging, Zone::Curated] {
            if let Some(m) = self.metrics_for(zone) {
                parts.push(format!(
                    "{}: {}/{} out ({} errors)",
                    zone, m.records_out, m.records_in, m.errors
                ));
            }
        }
        format!(
            "run {} [{}] {} | {}",
            self.run_id,
            self.mode,
            self.status,
            parts.join(" | ")
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_mode_zone_selection() {
        assert!(RunMode::Full.runs_raw());
        assert!(RunMode::Full.runs_curated());
        assert!(!RunMode::Pair.runs_raw());
        assert!(RunMode::Pair.runs_staging());
        assert!(RunMode::Pair.runs_curated());
        assert!(!RunMode::StagingOnly.runs_curated());
    }

    #[test]
    fn test_error_rate_empty_input() {
        let metrics = ZoneMetrics::default();
        assert_eq!(metrics.error_rate(), 0.0);
    }

    #[test]
    fn test_error_rate_counts_rejections() {
        let mut metrics = ZoneMetrics {
            records_in: 100,
            ..Default::default()
        };
        metrics.record_rejection(RejectReason::InvalidOdds);
        metrics.record_rejection(RejectReason::Duplicate);
        assert_eq!(metrics.errors, 2);
        assert!((metrics.error_rate() - 0.02).abs() < f64::EPSILON);
    }

    #[test]
    fn test_exit_codes() {
        assert_eq!(RunStatus::Succeeded.exit_code(), 0);
        assert_eq!(RunStatus::Partial.exit_code(), 1);
        assert_eq!(RunStatus::Failed.exit_code(), 2);
    }
}
