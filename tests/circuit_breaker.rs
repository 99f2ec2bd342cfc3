//! Circuit-breaker lifecycle against a dead endpoint.

use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::mpsc;

use sharpline::collector::SourceClient;
use sharpline::config::CollectorConfig;
use sharpline::domain::AttemptOutcome;
use sharpline::health::{CircuitBreakerConfig, CircuitState, CollectorCircuitBreaker};
use sharpline::shutdown::ShutdownController;
use sharpline::SharplineError;
use tokio_test::{assert_err, assert_ok};

fn dead_endpoint_config() -> CollectorConfig {
    CollectorConfig {
        base_url: "http://127.0.0.1:1".into(), // connection refused immediately
        retry_max_attempts: 1,
        retry_backoff_s: 0,
        timeout_s: 1,
        ..Default::default()
    }
}

fn breaker(cooldown_secs: u64) -> Arc<CollectorCircuitBreaker> {
    Arc::new(CollectorCircuitBreaker::new(
        "odds_api",
        CircuitBreakerConfig {
            failure_threshold: 5,
            cooldown_secs,
            ..Default::default()
        },
    ))
}

#[tokio::test]
async fn five_consecutive_failures_open_the_circuit() {
    let breaker = breaker(3600);
    let (tx, mut rx) = mpsc::unbounded_channel();
    let client = SourceClient::new("odds_api", dead_endpoint_config(), breaker.clone(), tx).unwrap();
    let controller = ShutdownController::new();

    for attempt in 0..5 {
        let mut token = controller.token();
        let result = client
            .get_json("http://127.0.0.1:1/odds", &[], &mut token)
            .await;
        assert!(result.is_err(), "attempt {} unexpectedly succeeded", attempt);
        assert_eq!(
            breaker.state().await,
            if attempt < 4 {
                CircuitState::Closed
            } else {
                CircuitState::Open
            },
            "wrong state after failure {}",
            attempt + 1
        );
    }

    // Attempts during cooldown short-circuit without network I/O
    let mut token = controller.token();
    let started = Instant::now();
    let result = client
        .get_json("http://127.0.0.1:1/odds", &[], &mut token)
        .await;
    assert!(matches!(result, Err(SharplineError::CircuitOpen(_))));
    assert!(started.elapsed() < Duration::from_millis(200));

    // The short-circuited call was reported as circuit_open
    let mut outcomes = Vec::new();
    while let Ok(attempt) = rx.try_recv() {
        outcomes.push(attempt.outcome);
    }
    assert_eq!(outcomes.last(), Some(&AttemptOutcome::CircuitOpen));
    assert_eq!(
        outcomes
            .iter()
            .filter(|o| **o == AttemptOutcome::NetworkError)
            .count(),
        5
    );
}

#[tokio::test]
async fn successful_probe_after_cooldown_closes_the_circuit() {
    let breaker = breaker(0); // cooldown elapses immediately
    for _ in 0..5 {
        breaker.record_failure("connection refused").await;
    }
    assert_eq!(breaker.state().await, CircuitState::Open);

    // Cooldown over: exactly one probe is admitted
    assert_ok!(breaker.acquire().await);
    assert_eq!(breaker.state().await, CircuitState::HalfOpen);
    assert_err!(breaker.acquire().await, "second probe admitted");

    breaker.record_success().await;
    assert_eq!(breaker.state().await, CircuitState::Closed);
    assert_ok!(breaker.acquire().await);
}

#[tokio::test]
async fn failed_probe_returns_to_open() {
    let breaker = breaker(0);
    for _ in 0..5 {
        breaker.record_failure("down").await;
    }

    assert!(breaker.acquire().await.is_ok());
    assert_eq!(breaker.state().await, CircuitState::HalfOpen);

    breaker.record_failure("still down").await;
    let stats = breaker.stats().await;
    assert_eq!(stats.state, CircuitState::Open);
    assert!(stats.last_trip_reason.unwrap().contains("probe"));

    // Cooldown is zero, so the next acquire becomes a fresh single probe
    assert!(breaker.acquire().await.is_ok());
    assert_eq!(breaker.state().await, CircuitState::HalfOpen);
    assert!(breaker.acquire().await.is_err());
}
