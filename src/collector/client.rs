//! Shared fetch machinery for collectors
//!
//! Every collector funnels its HTTP traffic through a `SourceClient`, which
//! enforces the declared rate budget (per-second token bucket with a burst
//! cap, plus an hourly quota), retries transient failures with jittered
//! exponential backoff, honours Retry-After cooldowns, consults the circuit
//! breaker before any network I/O, and reports every attempt to the health
//! tracker.

use chrono::{DateTime, Utc};
use governor::clock::DefaultClock;
use governor::state::{InMemoryState, NotKeyed};
use governor::{Quota, RateLimiter};
use rand::Rng;
use reqwest::StatusCode;
use std::num::NonZeroU32;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, RwLock};
use tracing::{debug, warn};

use crate::config::CollectorConfig;
use crate::domain::{AttemptOutcome, CollectionAttempt, HealthProbe};
use crate::error::{Result, SharplineError};
use crate::health::CollectorCircuitBreaker;
use crate::shutdown::ShutdownToken;

type DirectRateLimiter = RateLimiter<NotKeyed, InMemoryState, DefaultClock>;

/// HTTP client wrapper shared by all collectors for one source
pub struct SourceClient {
    source: String,
    config: CollectorConfig,
    http: reqwest::Client,
    per_second: DirectRateLimiter,
    per_hour: DirectRateLimiter,
    breaker: Arc<CollectorCircuitBreaker>,
    attempts: mpsc::UnboundedSender<CollectionAttempt>,
    /// Server-directed cooldown from a Retry-After hint
    cooldown_until: RwLock<Option<DateTime<Utc>>>,
}

impl SourceClient {
    pub fn new(
        source: &str,
        config: CollectorConfig,
        breaker: Arc<CollectorCircuitBreaker>,
        attempts: mpsc::UnboundedSender<CollectionAttempt>,
    ) -> Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_s))
            .connect_timeout(Duration::from_secs(10))
            .user_agent("sharpline/0.1")
            .build()?;

        let rps = NonZeroU32::new(config.rate_limit_rps.max(1))
            .unwrap_or_else(|| NonZeroU32::new(1).unwrap());
        let rph = NonZeroU32::new(config.rate_limit_rph.max(1))
            .unwrap_or_else(|| NonZeroU32::new(1).unwrap());

        Ok(Self {
            source: source.to_string(),
            http,
            per_second: RateLimiter::direct(Quota::per_second(rps).allow_burst(rps)),
            per_hour: RateLimiter::direct(Quota::per_hour(rph)),
            breaker,
            attempts,
            cooldown_until: RwLock::new(None),
            config,
        })
    }

    pub fn source(&self) -> &str {
        &self.source
    }

    pub fn base_url(&self) -> &str {
        &self.config.base_url
    }

    pub fn api_key(&self) -> Option<&str> {
        self.config.api_key.as_deref()
    }

    /// Report a successful sweep after parsing, with the record count.
    pub fn report_success(&self, started_at: DateTime<Utc>, record_count: u32) {
        let _ = self
            .attempts
            .send(CollectionAttempt::success(&self.source, started_at, record_count));
    }

    /// Report a sweep that fetched but failed to parse.
    pub fn report_parse_error(&self, started_at: DateTime<Utc>, error: &str) {
        let _ = self.attempts.send(CollectionAttempt::failure(
            &self.source,
            started_at,
            AttemptOutcome::ParseError,
            error,
        ));
    }

    fn report_failure(&self, started_at: DateTime<Utc>, outcome: AttemptOutcome, error: &str) {
        let _ = self.attempts.send(CollectionAttempt::failure(
            &self.source,
            started_at,
            outcome,
            error,
        ));
    }

    /// GET a JSON document with the full fetch contract applied.
    ///
    /// On failure the attempt has already been reported; callers only report
    /// the success (with its record count) or a parse error.
    pub async fn get_json(
        &self,
        url: &str,
        query: &[(&str, String)],
        shutdown: &mut ShutdownToken,
    ) -> Result<serde_json::Value> {
        let started_at = Utc::now();

        // Server-directed cooldown from an earlier 429
        if let Some(until) = *self.cooldown_until.read().await {
            let now = Utc::now();
            if now < until {
                let secs = (until - now).num_seconds().max(0) as u64;
                self.report_failure(started_at, AttemptOutcome::RateLimited, "cooldown active");
                return Err(SharplineError::RateLimited {
                    source_tag: self.source.clone(),
                    retry_after_secs: secs,
                });
            }
        }

        // Circuit breaker gate, before any network I/O
        if let Err(retry_in) = self.breaker.acquire().await {
            self.report_failure(
                started_at,
                AttemptOutcome::CircuitOpen,
                &format!("circuit open, retry in {}s", retry_in),
            );
            return Err(SharplineError::CircuitOpen(self.source.clone()));
        }

        let result = self.fetch_with_retries(url, query, started_at, shutdown).await;
        match &result {
            Ok(_) => self.breaker.record_success().await,
            Err(SharplineError::Cancelled) | Err(SharplineError::RateLimited { .. }) => {
                // Neither counts as a breaker failure; just free the probe slot
                self.breaker.release_probe();
            }
            Err(e) => self.breaker.record_failure(&e.to_string()).await,
        }
        result
    }

    async fn fetch_with_retries(
        &self,
        url: &str,
        query: &[(&str, String)],
        started_at: DateTime<Utc>,
        shutdown: &mut ShutdownToken,
    ) -> Result<serde_json::Value> {
        let mut last_error = SharplineError::TransientIo("no attempts made".into());

        for attempt in 0..self.config.retry_max_attempts {
            if attempt > 0 {
                let delay = self.backoff_delay(attempt);
                tokio::select! {
                    _ = tokio::time::sleep(delay) => {}
                    _ = shutdown.cancelled() => return Err(SharplineError::Cancelled),
                }
            }

            // Token buckets: per-second burst first, then the hourly budget
            tokio::select! {
                _ = self.per_second.until_ready() => {}
                _ = shutdown.cancelled() => return Err(SharplineError::Cancelled),
            }
            tokio::select! {
                _ = self.per_hour.until_ready() => {}
                _ = shutdown.cancelled() => return Err(SharplineError::Cancelled),
            }

            let request = self.http.get(url).query(query).send();
            let response = tokio::select! {
                response = request => response,
                _ = shutdown.cancelled() => return Err(SharplineError::Cancelled),
            };

            match response {
                Ok(response) => {
                    let status = response.status();

                    if status == StatusCode::TOO_MANY_REQUESTS {
                        let retry_after = retry_after_secs(&response).unwrap_or(60);
                        *self.cooldown_until.write().await =
                            Some(Utc::now() + chrono::Duration::seconds(retry_after as i64));
                        warn!(
                            source = %self.source,
                            retry_after,
                            "rate limited by server, cooling down"
                        );
                        self.report_failure(
                            started_at,
                            AttemptOutcome::RateLimited,
                            &format!("429, retry after {}s", retry_after),
                        );
                        return Err(SharplineError::RateLimited {
                            source_tag: self.source.clone(),
                            retry_after_secs: retry_after,
                        });
                    }

                    if status.is_server_error() {
                        last_error =
                            SharplineError::TransientIo(format!("server returned {}", status));
                        debug!(source = %self.source, %status, attempt, "retrying after 5xx");
                        continue;
                    }

                    if !status.is_success() {
                        let error = SharplineError::TransientIo(format!(
                            "unexpected status {} from {}",
                            status, self.source
                        ));
                        self.report_failure(
                            started_at,
                            AttemptOutcome::NetworkError,
                            &error.to_string(),
                        );
                        return Err(error);
                    }

                    match response.json::<serde_json::Value>().await {
                        Ok(value) => return Ok(value),
                        Err(e) => {
                            let error = SharplineError::Parse(format!("invalid JSON body: {}", e));
                            self.report_failure(
                                started_at,
                                AttemptOutcome::ParseError,
                                &error.to_string(),
                            );
                            return Err(error);
                        }
                    }
                }
                Err(e) if e.is_timeout() => {
                    last_error = SharplineError::Timeout {
                        elapsed_ms: self.config.timeout_s * 1000,
                    };
                    debug!(source = %self.source, attempt, "retrying after timeout");
                }
                Err(e) => {
                    last_error = SharplineError::TransientIo(e.to_string());
                    debug!(source = %self.source, attempt, error = %e, "retrying after network error");
                }
            }
        }

        let outcome = match &last_error {
            SharplineError::Timeout { .. } => AttemptOutcome::Timeout,
            _ => AttemptOutcome::NetworkError,
        };
        self.report_failure(started_at, outcome, &last_error.to_string());
        Err(last_error)
    }

    /// Exponential backoff with jitter.
    fn backoff_delay(&self, attempt: u32) -> Duration {
        let base = self
            .config
            .retry_backoff_s
            .saturating_mul(2u64.saturating_pow(attempt.saturating_sub(1)));
        let jitter_ms = rand::thread_rng().gen_range(0..500);
        Duration::from_secs(base) + Duration::from_millis(jitter_ms)
    }

    /// Probe the base URL for reachability, outside the rate budget.
    pub async fn probe(&self) -> Result<HealthProbe> {
        let started = std::time::Instant::now();
        let reachable = match self.http.get(&self.config.base_url).send().await {
            Ok(response) => !response.status().is_server_error(),
            Err(_) => false,
        };
        Ok(HealthProbe {
            collector: self.source.clone(),
            reachable,
            response_ms: started.elapsed().as_millis() as u64,
            checked_at: Utc::now(),
        })
    }
}

fn retry_after_secs(response: &reqwest::Response) -> Option<u64> {
    response
        .headers()
        .get(reqwest::header::RETRY_AFTER)?
        .to_str()
        .ok()?
        .parse()
        .ok()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::health::CircuitBreakerConfig;

    fn client_with(config: CollectorConfig) -> (SourceClient, mpsc::UnboundedReceiver<CollectionAttempt>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let breaker = Arc::new(CollectorCircuitBreaker::new(
            "odds_api",
            CircuitBreakerConfig::default(),
        ));
        let client = SourceClient::new("odds_api", config, breaker, tx).unwrap();
        (client, rx)
    }

    #[tokio::test]
    async fn test_circuit_open_short_circuits_without_io() {
        let config = CollectorConfig {
            base_url: "http://127.0.0.1:1".into(), // nothing listens here
            ..Default::default()
        };
        let (client, mut rx) = client_with(config);
        client
            .breaker
            .trip(crate::health::TripReason::Manual("test".into()))
            .await;

        let controller = crate::shutdown::ShutdownController::new();
        let mut token = controller.token();
        let started = std::time::Instant::now();
        let result = client.get_json("http://127.0.0.1:1/odds", &[], &mut token).await;

        assert!(matches!(result, Err(SharplineError::CircuitOpen(_))));
        // No network round trip happened
        assert!(started.elapsed() < Duration::from_millis(500));

        let attempt = rx.recv().await.unwrap();
        assert_eq!(attempt.outcome, AttemptOutcome::CircuitOpen);
    }

    #[tokio::test]
    async fn test_network_failure_reports_and_trips_after_retries() {
        let config = CollectorConfig {
            base_url: "http://127.0.0.1:1".into(),
            retry_max_attempts: 2,
            retry_backoff_s: 0,
            timeout_s: 1,
            ..Default::default()
        };
        let (client, mut rx) = client_with(config);
        let controller = crate::shutdown::ShutdownController::new();
        let mut token = controller.token();

        let result = client.get_json("http://127.0.0.1:1/odds", &[], &mut token).await;
        assert!(result.is_err());

        let attempt = rx.recv().await.unwrap();
        assert_eq!(attempt.outcome, AttemptOutcome::NetworkError);
        assert_eq!(client.breaker.stats().await.consecutive_failures, 1);
    }

    #[tokio::test]
    async fn test_cancellation_stops_fetch() {
        let config = CollectorConfig {
            base_url: "http://127.0.0.1:1".into(),
            retry_max_attempts: 10,
            retry_backoff_s: 30, // long backoff the cancellation must cut through
            ..Default::default()
        };
        let (client, _rx) = client_with(config);
        let controller = crate::shutdown::ShutdownController::new();
        let mut token = controller.token();
        controller.request();

        // First attempt fails fast (connection refused), then cancellation
        // interrupts the backoff sleep.
        let started = std::time::Instant::now();
        let result = client.get_json("http://127.0.0.1:1/odds", &[], &mut token).await;
        assert!(result.is_err());
        assert!(started.elapsed() < Duration::from_secs(5));
    }

    #[tokio::test]
    async fn test_rate_limiter_paces_requests() {
        // 2 rps with burst 2: the 5th immediate acquire waits ~1.5s total
        let limiter: DirectRateLimiter = RateLimiter::direct(
            Quota::per_second(NonZeroU32::new(2).unwrap()).allow_burst(NonZeroU32::new(2).unwrap()),
        );
        let started = std::time::Instant::now();
        for _ in 0..5 {
            limiter.until_ready().await;
        }
        let elapsed = started.elapsed();
        assert!(elapsed >= Duration::from_millis(1400), "too fast: {:?}", elapsed);
        assert!(elapsed <= Duration::from_millis(2100), "too slow: {:?}", elapsed);
    }
}
