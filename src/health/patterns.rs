//! Periodic failure-pattern detection
//!
//! Some upstreams fail on a schedule: nightly maintenance windows, hourly
//! quota resets, cron-driven cache rebuilds. The scanner bins the failure
//! timeline and looks for autocorrelation peaks.

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

/// A detected periodic failure pattern
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FailurePattern {
    pub collector: String,
    pub period_secs: u64,
    /// Normalized autocorrelation at the peak lag, [0, 1]
    pub confidence: f64,
    pub detected_at: DateTime<Utc>,
}

/// Bin width for the failure timeline
const BIN_SECS: i64 = 60;

/// Minimum number of failures before a pattern is even considered
const MIN_FAILURES: usize = 4;

/// Bin attempt outcomes into a 0/1 failure indicator series.
fn failure_series(
    attempts: &[(DateTime<Utc>, bool)],
    now: DateTime<Utc>,
    lookback: Duration,
) -> Vec<f64> {
    let start = now - lookback;
    let bins = (lookback.num_seconds() / BIN_SECS).max(1) as usize;
    let mut series = vec![0.0; bins];

    for (at, success) in attempts {
        if *success || *at < start || *at > now {
            continue;
        }
        let offset = (*at - start).num_seconds() / BIN_SECS;
        let index = (offset as usize).min(bins - 1);
        series[index] = 1.0;
    }
    series
}

/// Normalized autocorrelation of a series at a given lag.
fn autocorrelation(series: &[f64], lag: usize) -> f64 {
    let n = series.len();
    if lag == 0 || lag >= n {
        return 0.0;
    }
    let mean = series.iter().sum::<f64>() / n as f64;
    let variance: f64 = series.iter().map(|v| (v - mean).powi(2)).sum();
    if variance <= f64::EPSILON {
        return 0.0;
    }
    let covariance: f64 = (0..n - lag)
        .map(|i| (series[i] - mean) * (series[i + lag] - mean))
        .sum();
    covariance / variance
}

/// Scan one collector's attempt history for a periodic failure pattern.
///
/// Returns the strongest lag whose autocorrelation clears `min_confidence`.
pub fn detect_pattern(
    collector: &str,
    attempts: &[(DateTime<Utc>, bool)],
    lookback: Duration,
    min_confidence: f64,
) -> Option<FailurePattern> {
    let now = Utc::now();
    let failures = attempts.iter().filter(|(_, success)| !success).count();
    if failures < MIN_FAILURES {
        return None;
    }

    let series = failure_series(attempts, now, lookback);
    let max_lag = series.len() / 2;
    if max_lag < 2 {
        return None;
    }

    let mut best: Option<(usize, f64)> = None;
    for lag in 2..=max_lag {
        let corr = autocorrelation(&series, lag);
        match best {
            Some((_, best_corr)) if best_corr >= corr => {}
            _ => best = Some((lag, corr)),
        }
    }

    let (lag, confidence) = best?;
    if confidence < min_confidence {
        return None;
    }

    Some(FailurePattern {
        collector: collector.to_string(),
        period_secs: (lag as i64 * BIN_SECS) as u64,
        confidence,
        detected_at: now,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn attempts_with_period(period_mins: i64, count: usize) -> Vec<(DateTime<Utc>, bool)> {
        let now = Utc::now();
        let mut attempts = Vec::new();
        // A success every minute, a failure every `period_mins`
        for i in 0..count as i64 {
            let at = now - Duration::minutes(i);
            let failed = i % period_mins == 0;
            attempts.push((at, !failed));
        }
        attempts
    }

    #[test]
    fn test_detects_periodic_failures() {
        let attempts = attempts_with_period(10, 120);
        let pattern = detect_pattern("odds_api", &attempts, Duration::hours(2), 0.5);
        let pattern = pattern.expect("expected a pattern");
        // Period within one bin of the planted 10 minutes
        assert!(
            (pattern.period_secs as i64 - 600).abs() <= BIN_SECS,
            "got period {}",
            pattern.period_secs
        );
        assert!(pattern.confidence >= 0.5);
    }

    #[test]
    fn test_no_pattern_for_sparse_failures() {
        let now = Utc::now();
        let attempts: Vec<_> = (0..100)
            .map(|i| (now - Duration::minutes(i), i != 3))
            .collect();
        assert!(detect_pattern("odds_api", &attempts, Duration::hours(2), 0.70).is_none());
    }

    #[test]
    fn test_no_pattern_for_random_noise() {
        let now = Utc::now();
        // Failures at irregular prime offsets
        let fail_at = [3i64, 7, 19, 41, 67, 89];
        let attempts: Vec<_> = (0..120)
            .map(|i| (now - Duration::minutes(i), !fail_at.contains(&i)))
            .collect();
        let pattern = detect_pattern("odds_api", &attempts, Duration::hours(2), 0.70);
        assert!(pattern.is_none(), "noise produced {:?}", pattern);
    }

    #[test]
    fn test_autocorrelation_of_constant_series_is_zero() {
        let series = vec![0.0; 60];
        assert_eq!(autocorrelation(&series, 5), 0.0);
    }
}
