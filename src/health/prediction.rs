//! Failure-probability prediction
//!
//! A cheap leading indicator computed on a timer: blends the recent failure
//! rate, the latency trend, and circuit-breaker history into a probability
//! that the next sweep fails. High values trigger a predicted_failure alert
//! before the breaker ever trips.

use chrono::{DateTime, Duration, Utc};

/// Weight on the recent failure rate
const W_FAILURE_RATE: f64 = 0.5;
/// Weight on the latency trend slope
const W_LATENCY_TREND: f64 = 0.3;
/// Weight on circuit-breaker history
const W_BREAKER: f64 = 0.2;

/// Inputs to the prediction, assembled by the tracker
#[derive(Debug, Clone, Default)]
pub struct PredictionInputs {
    /// (timestamp, success, response_ms) most recent attempts, oldest first
    pub attempts: Vec<(DateTime<Utc>, bool, u64)>,
    /// Times the breaker has tripped over its lifetime
    pub breaker_trips: u64,
    /// Whether the breaker is currently open or half-open
    pub breaker_unsettled: bool,
}

/// Failure rate over the trailing window.
fn recent_failure_rate(inputs: &PredictionInputs, window: Duration) -> f64 {
    let cutoff = Utc::now() - window;
    let recent: Vec<_> = inputs
        .attempts
        .iter()
        .filter(|(at, _, _)| *at >= cutoff)
        .collect();
    if recent.is_empty() {
        return 0.0;
    }
    let failures = recent.iter().filter(|(_, success, _)| !success).count();
    failures as f64 / recent.len() as f64
}

/// Least-squares slope of response time against attempt index, normalized to
/// a [0, 1] contribution. A flat or improving trend contributes 0.
fn latency_trend_score(inputs: &PredictionInputs) -> f64 {
    let latencies: Vec<f64> = inputs
        .attempts
        .iter()
        .map(|(_, _, ms)| *ms as f64)
        .collect();
    let n = latencies.len();
    if n < 4 {
        return 0.0;
    }

    let mean_x = (n as f64 - 1.0) / 2.0;
    let mean_y = latencies.iter().sum::<f64>() / n as f64;
    if mean_y <= f64::EPSILON {
        return 0.0;
    }

    let mut num = 0.0;
    let mut den = 0.0;
    for (i, y) in latencies.iter().enumerate() {
        let dx = i as f64 - mean_x;
        num += dx * (y - mean_y);
        den += dx * dx;
    }
    if den <= f64::EPSILON {
        return 0.0;
    }

    // Slope in ms per attempt, scaled by the mean latency so a feed that
    // doubles over the window scores near 1.
    let slope = num / den;
    let normalized = slope * n as f64 / mean_y;
    normalized.clamp(0.0, 1.0)
}

/// Circuit-breaker history contribution.
fn breaker_score(inputs: &PredictionInputs) -> f64 {
    if inputs.breaker_unsettled {
        return 1.0;
    }
    // Saturates after a handful of lifetime trips
    (inputs.breaker_trips as f64 / 5.0).clamp(0.0, 1.0)
}

/// Compute the failure probability in [0, 1].
pub fn failure_probability(inputs: &PredictionInputs) -> f64 {
    let rate = recent_failure_rate(inputs, Duration::minutes(5));
    let trend = latency_trend_score(inputs);
    let breaker = breaker_score(inputs);

    (W_FAILURE_RATE * rate + W_LATENCY_TREND * trend + W_BREAKER * breaker).clamp(0.0, 1.0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    fn attempts(outcomes: &[(bool, u64)]) -> Vec<(DateTime<Utc>, bool, u64)> {
        let now = Utc::now();
        outcomes
            .iter()
            .enumerate()
            .map(|(i, (success, ms))| {
                let at = now - Duration::seconds((outcomes.len() - i) as i64 * 10);
                (at, *success, *ms)
            })
            .collect()
    }

    #[test]
    fn test_healthy_collector_scores_low() {
        let inputs = PredictionInputs {
            attempts: attempts(&[(true, 100); 20]),
            breaker_trips: 0,
            breaker_unsettled: false,
        };
        assert_relative_eq!(failure_probability(&inputs), 0.0);
    }

    #[test]
    fn test_all_failures_scores_above_alert_threshold() {
        let inputs = PredictionInputs {
            attempts: attempts(&[(false, 100); 20]),
            breaker_trips: 10,
            breaker_unsettled: true,
        };
        // 0.5 * 1.0 + 0.3 * 0.0 + 0.2 * 1.0 = 0.7; rising latency not needed
        let p = failure_probability(&inputs);
        assert!(p >= 0.7, "got {}", p);
    }

    #[test]
    fn test_latency_ramp_raises_score() {
        let ramp: Vec<(bool, u64)> = (0..20).map(|i| (true, 100 + i * 60)).collect();
        let inputs = PredictionInputs {
            attempts: attempts(&ramp),
            breaker_trips: 0,
            breaker_unsettled: false,
        };
        let p = failure_probability(&inputs);
        assert!(p > 0.2, "got {}", p);

        let flat = PredictionInputs {
            attempts: attempts(&[(true, 100); 20]),
            ..Default::default()
        };
        assert!(p > failure_probability(&flat));
    }

    #[test]
    fn test_open_breaker_dominates_breaker_term() {
        let inputs = PredictionInputs {
            attempts: attempts(&[(true, 100); 10]),
            breaker_trips: 0,
            breaker_unsettled: true,
        };
        assert_relative_eq!(failure_probability(&inputs), 0.2);
    }

    #[test]
    fn test_probability_clamped() {
        let inputs = PredictionInputs {
            attempts: attempts(&[(false, 100); 50]),
            breaker_trips: 100,
            breaker_unsettled: true,
        };
        assert!(failure_probability(&inputs) <= 1.0);
    }
}
