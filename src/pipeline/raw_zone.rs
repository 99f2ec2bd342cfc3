//! Raw zone
//!
//! Durably stores exactly what collectors produced. Records are append-only:
//! in-batch duplicates are dropped here, cross-batch duplicates die on the
//! idempotency key at insert time. Structural validation flags records that
//! must never propagate downstream without discarding the capture.

use chrono::Utc;
use std::collections::HashSet;
use tracing::debug;

use crate::domain::{ParseStatus, RawRecord, ZoneMetrics, AMERICAN_ODDS_BOUND};

/// Result of preparing one raw batch for persistence
#[derive(Debug, Default)]
pub struct RawIngestResult {
    /// Records to persist, valid and invalid alike
    pub records: Vec<RawRecord>,
    pub duplicates: u64,
    pub invalid: u64,
    pub metrics: ZoneMetrics,
}

/// Structural validation: required keys, parseable timestamps, odds sanity.
pub fn validate(record: &RawRecord) -> Result<(), String> {
    if record.source.is_empty() {
        return Err("missing source tag".into());
    }
    if record.external_id.is_empty() {
        return Err("missing external id".into());
    }
    if record.payload.is_null() {
        return Err("null payload".into());
    }
    if record.odds_timestamp > Utc::now() + chrono::Duration::hours(24) {
        return Err("odds timestamp unreasonably far in the future".into());
    }
    if let Some(bad) = first_out_of_range_price(&record.payload) {
        return Err(format!("price out of sanity range: {}", bad));
    }
    Ok(())
}

/// Walk the payload for price-like fields outside the accepted range.
fn first_out_of_range_price(value: &serde_json::Value) -> Option<i64> {
    match value {
        serde_json::Value::Object(map) => {
            for (key, child) in map {
                if key.contains("price") {
                    if let Some(price) = child.as_i64() {
                        if price.abs() > AMERICAN_ODDS_BOUND as i64 {
                            return Some(price);
                        }
                    }
                }
                if let Some(bad) = first_out_of_range_price(child) {
                    return Some(bad);
                }
            }
            None
        }
        serde_json::Value::Array(items) => items.iter().find_map(first_out_of_range_price),
        _ => None,
    }
}

/// Prepare a batch: drop in-batch duplicates, flag invalid records.
///
/// Invalid records keep their capture (flagged) so the raw zone stays a
/// faithful replay log; only the flag stops downstream propagation.
pub fn prepare_batch(records: Vec<RawRecord>) -> RawIngestResult {
    let mut result = RawIngestResult::default();
    result.metrics.records_in = records.len() as u64;

    let mut seen: HashSet<(String, String, i64)> = HashSet::new();
    for mut record in records {
        let key = (
            record.source.clone(),
            record.external_id.clone(),
            record.odds_timestamp.timestamp_micros(),
        );
        if !seen.insert(key) {
            result.duplicates += 1;
            debug!(
                source = %record.source,
                external_id = %record.external_id,
                "dropping in-batch duplicate raw record"
            );
            continue;
        }

        if record.parse_status.is_ok() {
            if let Err(reason) = validate(&record) {
                record.parse_status = ParseStatus::Invalid(reason);
            }
        }
        if !record.parse_status.is_ok() {
            result.invalid += 1;
            result.metrics.errors += 1;
        }
        result.records.push(record);
    }

    result.metrics.records_out = result
        .records
        .iter()
        .filter(|r| r.parse_status.is_ok())
        .count() as u64;
    result
}
