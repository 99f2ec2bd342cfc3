//! Collection attempts and per-collector health state

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Outcome of one fetch by one collector
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AttemptOutcome {
    Ok,
    NetworkError,
    ParseError,
    RateLimited,
    Timeout,
    CircuitOpen,
}

impl AttemptOutcome {
    pub fn as_str(&self) -> &'static str {
        match self {
            AttemptOutcome::Ok => "ok",
            AttemptOutcome::NetworkError => "network_error",
            AttemptOutcome::ParseError => "parse_error",
            AttemptOutcome::RateLimited => "rate_limited",
            AttemptOutcome::Timeout => "timeout",
            AttemptOutcome::CircuitOpen => "circuit_open",
        }
    }

    pub fn is_success(&self) -> bool {
        matches!(self, AttemptOutcome::Ok)
    }

    /// Failures that count toward circuit-breaker trips. Rate limiting is a
    /// cooldown signal, not a failure; circuit_open never reached the network.
    pub fn is_breaker_failure(&self) -> bool {
        matches!(
            self,
            AttemptOutcome::NetworkError | AttemptOutcome::ParseError | AttemptOutcome::Timeout
        )
    }
}

impl std::fmt::Display for AttemptOutcome {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// One fetch by one collector, success or failure
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CollectionAttempt {
    pub collector: String,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub outcome: AttemptOutcome,
    pub record_count: u32,
    pub response_ms: u64,
    pub error: Option<String>,
}

impl CollectionAttempt {
    pub fn success(collector: &str, started_at: DateTime<Utc>, record_count: u32) -> Self {
        let finished_at = Utc::now();
        Self {
            collector: collector.to_string(),
            started_at,
            finished_at,
            outcome: AttemptOutcome::Ok,
            record_count,
            response_ms: (finished_at - started_at).num_milliseconds().max(0) as u64,
            error: None,
        }
    }

    pub fn failure(
        collector: &str,
        started_at: DateTime<Utc>,
        outcome: AttemptOutcome,
        error: &str,
    ) -> Self {
        let finished_at = Utc::now();
        Self {
            collector: collector.to_string(),
            started_at,
            finished_at,
            outcome,
            record_count: 0,
            response_ms: (finished_at - started_at).num_milliseconds().max(0) as u64,
            error: Some(error.to_string()),
        }
    }
}

/// Result of a lightweight collector health probe
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthProbe {
    pub collector: String,
    pub reachable: bool,
    pub response_ms: u64,
    pub checked_at: DateTime<Utc>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_outcome_classification() {
        assert!(AttemptOutcome::Ok.is_success());
        assert!(AttemptOutcome::NetworkError.is_breaker_failure());
        assert!(AttemptOutcome::Timeout.is_breaker_failure());
        assert!(!AttemptOutcome::RateLimited.is_breaker_failure());
        assert!(!AttemptOutcome::CircuitOpen.is_breaker_failure());
    }

    #[test]
    fn test_attempt_constructors() {
        let started = Utc::now();
        let ok = CollectionAttempt::success("odds_api", started, 42);
        assert_eq!(ok.outcome, AttemptOutcome::Ok);
        assert_eq!(ok.record_count, 42);
        assert!(ok.error.is_none());

        let failed =
            CollectionAttempt::failure("odds_api", started, AttemptOutcome::Timeout, "30s elapsed");
        assert_eq!(failed.record_count, 0);
        assert_eq!(failed.error.as_deref(), Some("30s elapsed"));
    }
}
