//! Raw-zone capture records
//!
//! A `RawRecord` is the immutable envelope around one payload from one
//! source. The payload is stored verbatim so the raw zone is recoverable from
//! source replays alone.

use chrono::{DateTime, NaiveDate, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::line::{MarketQuote, VolumeSplits};

/// Parse outcome recorded alongside each raw capture
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "status", content = "reason")]
pub enum ParseStatus {
    Ok,
    Invalid(String),
}

impl ParseStatus {
    pub fn is_ok(&self) -> bool {
        matches!(self, ParseStatus::Ok)
    }
}

/// Immutable capture of one payload from one source
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RawRecord {
    pub source: String,
    /// Source-specific external id, verbatim
    pub external_id: String,
    /// When the collector fetched the payload (UTC, microsecond precision)
    pub fetched_at: DateTime<Utc>,
    /// Quote timestamp carried by the payload; part of the idempotency key
    pub odds_timestamp: DateTime<Utc>,
    pub payload: serde_json::Value,
    pub batch_id: Uuid,
    pub parse_status: ParseStatus,
}

impl RawRecord {
    /// Idempotency key for raw ingestion
    pub fn idempotency_key(&self) -> (String, String, DateTime<Utc>) {
        (
            self.source.clone(),
            self.external_id.clone(),
            self.odds_timestamp,
        )
    }
}

/// A provisional line parsed from a raw payload.
///
/// Collectors emit external identifiers verbatim; canonical resolution
/// happens in staging via the identity resolver.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProvisionalLine {
    pub source: String,
    pub external_game_id: String,
    /// Identity tuple fields when the payload carries them
    pub game_date: Option<NaiveDate>,
    pub home_team: Option<String>,
    pub away_team: Option<String>,
    /// External sportsbook id or name, verbatim
    pub external_sportsbook: String,
    pub quote: MarketQuote,
    pub splits: VolumeSplits,
    pub odds_timestamp: DateTime<Utc>,
}

/// A schedule entry from the official league source
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScheduleEntry {
    pub league_game_id: i64,
    pub game_date: NaiveDate,
    pub home_team: String,
    pub away_team: String,
    pub scheduled_utc: Option<DateTime<Utc>>,
    pub status: String,
    pub home_score: Option<i32>,
    pub away_score: Option<i32>,
}

/// Everything one collector sweep produced
#[derive(Debug, Clone, Default)]
pub struct CollectorBatch {
    pub raw_records: Vec<RawRecord>,
    /// Schedule entries ride alongside raw records for the schedule source
    pub schedule: Vec<ScheduleEntry>,
}

impl CollectorBatch {
    pub fn is_empty(&self) -> bool {
        self.raw_records.is_empty() && self.schedule.is_empty()
    }

    pub fn len(&self) -> usize {
        self.raw_records.len() + self.schedule.len()
    }
}

/// Round a spread/total line to the nearest half point.
pub fn round_half_point(line: Decimal) -> Decimal {
    let doubled = line * Decimal::TWO;
    doubled.round() / Decimal::TWO
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn test_half_point_rounding() {
        assert_eq!(round_half_point(dec!(8.5)), dec!(8.5));
        assert_eq!(round_half_point(dec!(8.4)), dec!(8.5));
        assert_eq!(round_half_point(dec!(8.76)), dec!(9.0));
        assert_eq!(round_half_point(dec!(-1.3)), dec!(-1.5));
        assert_eq!(round_half_point(dec!(0.0)), dec!(0.0));
    }

    #[test]
    fn test_parse_status() {
        assert!(ParseStatus::Ok.is_ok());
        assert!(!ParseStatus::Invalid("missing key".into()).is_ok());
    }
}
