//! Per-collector circuit breaker
//!
//! Guards each source against hammering a failing endpoint. Trips on a run
//! of consecutive failures or a sustained failure rate, cools down, then
//! admits exactly one probe in half-open before deciding.

use chrono::{DateTime, Utc};
use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicU32, AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::{debug, info, warn};

/// Circuit breaker states
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CircuitState {
    /// Normal operation - requests allowed
    Closed,
    /// Failure threshold exceeded - requests short-circuit
    Open,
    /// Cooldown elapsed - a single probe is allowed through
    HalfOpen,
}

impl std::fmt::Display for CircuitState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            CircuitState::Closed => write!(f, "closed"),
            CircuitState::Open => write!(f, "open"),
            CircuitState::HalfOpen => write!(f, "half_open"),
        }
    }
}

/// Configuration for a collector circuit breaker
#[derive(Debug, Clone)]
pub struct CircuitBreakerConfig {
    /// Consecutive failures that trip the circuit (default: 5)
    pub failure_threshold: u32,
    /// Cooldown before half-open (default: 60s)
    pub cooldown_secs: u64,
    /// Backoff ceiling after repeated half-open failures (default: 900s)
    pub max_cooldown_secs: u64,
    /// Sustained failure rate that also trips the circuit (default: 0.5)
    pub failure_rate_threshold: f64,
    /// Window for the failure-rate check (default: 300s)
    pub rate_window_secs: u64,
    /// Minimum attempts in the window before the rate check applies
    pub min_rate_samples: usize,
}

impl Default for CircuitBreakerConfig {
    fn default() -> Self {
        Self {
            failure_threshold: 5,
            cooldown_secs: 60,
            max_cooldown_secs: 900,
            failure_rate_threshold: 0.5,
            rate_window_secs: 300,
            min_rate_samples: 10,
        }
    }
}

/// Why the circuit opened
#[derive(Debug, Clone)]
pub enum TripReason {
    ConsecutiveFailures(u32),
    FailureRate(f64),
    ProbeFailed,
    Manual(String),
}

impl std::fmt::Display for TripReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TripReason::ConsecutiveFailures(n) => write!(f, "{} consecutive failures", n),
            TripReason::FailureRate(rate) => write!(f, "failure rate {:.0}%", rate * 100.0),
            TripReason::ProbeFailed => write!(f, "half-open probe failed"),
            TripReason::Manual(reason) => write!(f, "manual: {}", reason),
        }
    }
}

/// Snapshot for monitoring
#[derive(Debug, Clone)]
pub struct CircuitBreakerStats {
    pub state: CircuitState,
    pub consecutive_failures: u32,
    pub opened_at: Option<DateTime<Utc>>,
    pub current_cooldown_secs: u64,
    pub last_trip_reason: Option<String>,
    pub total_trips: u64,
}

/// Circuit breaker guarding one collector
pub struct CollectorCircuitBreaker {
    name: String,
    config: CircuitBreakerConfig,
    state: Arc<RwLock<CircuitState>>,
    consecutive_failures: AtomicU32,
    /// (timestamp, success) outcomes inside the rate window
    recent: Arc<RwLock<VecDeque<(DateTime<Utc>, bool)>>>,
    opened_at: Arc<RwLock<Option<DateTime<Utc>>>>,
    last_trip_reason: Arc<RwLock<Option<TripReason>>>,
    current_cooldown_secs: AtomicU64,
    probe_in_flight: AtomicBool,
    total_trips: AtomicU64,
}

impl CollectorCircuitBreaker {
    pub fn new(name: &str, config: CircuitBreakerConfig) -> Self {
        let cooldown = config.cooldown_secs;
        Self {
            name: name.to_string(),
            config,
            state: Arc::new(RwLock::new(CircuitState::Closed)),
            consecutive_failures: AtomicU32::new(0),
            recent: Arc::new(RwLock::new(VecDeque::new())),
            opened_at: Arc::new(RwLock::new(None)),
            last_trip_reason: Arc::new(RwLock::new(None)),
            current_cooldown_secs: AtomicU64::new(cooldown),
            probe_in_flight: AtomicBool::new(false),
            total_trips: AtomicU64::new(0),
        }
    }

    pub fn with_defaults(name: &str) -> Self {
        Self::new(name, CircuitBreakerConfig::default())
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub async fn state(&self) -> CircuitState {
        *self.state.read().await
    }

    /// Ask permission to make a request.
    ///
    /// Returns `Ok(())` when the call may proceed (possibly as the single
    /// half-open probe) and `Err(retry_in_secs)` when the circuit is open.
    pub async fn acquire(&self) -> std::result::Result<(), u64> {
        let state = self.state().await;

        match state {
            CircuitState::Closed => Ok(()),
            CircuitState::Open => {
                if self.cooldown_elapsed().await {
                    self.transition_to_half_open().await;
                    self.claim_probe().await
                } else {
                    Err(self.time_until_half_open().await)
                }
            }
            CircuitState::HalfOpen => self.claim_probe().await,
        }
    }

    async fn claim_probe(&self) -> std::result::Result<(), u64> {
        if self.probe_in_flight.swap(true, Ordering::SeqCst) {
            // Another probe is already out; only one is ever admitted
            Err(self.time_until_half_open().await.max(1))
        } else {
            debug!("{}: admitting half-open probe", self.name);
            Ok(())
        }
    }

    /// Record a successful request.
    pub async fn record_success(&self) {
        self.consecutive_failures.store(0, Ordering::SeqCst);
        self.push_outcome(true).await;

        let state = self.state().await;
        if state == CircuitState::HalfOpen {
            self.close().await;
        }
        self.probe_in_flight.store(false, Ordering::SeqCst);
    }

    /// Record a failed request.
    pub async fn record_failure(&self, reason: &str) {
        let failures = self.consecutive_failures.fetch_add(1, Ordering::SeqCst) + 1;
        self.push_outcome(false).await;

        let state = self.state().await;
        if state == CircuitState::HalfOpen {
            // Probe failed: back to open with doubled cooldown
            let doubled = (self.current_cooldown_secs.load(Ordering::SeqCst) * 2)
                .min(self.config.max_cooldown_secs);
            self.current_cooldown_secs.store(doubled, Ordering::SeqCst);
            self.probe_in_flight.store(false, Ordering::SeqCst);
            self.trip(TripReason::ProbeFailed).await;
            return;
        }

        warn!("{}: failure #{}: {}", self.name, failures, reason);

        if failures >= self.config.failure_threshold {
            self.trip(TripReason::ConsecutiveFailures(failures)).await;
            return;
        }

        if let Some(rate) = self.window_failure_rate().await {
            if rate > self.config.failure_rate_threshold {
                self.trip(TripReason::FailureRate(rate)).await;
            }
        }
    }

    async fn push_outcome(&self, success: bool) {
        let now = Utc::now();
        let cutoff = now - chrono::Duration::seconds(self.config.rate_window_secs as i64);
        let mut recent = self.recent.write().await;
        recent.push_back((now, success));
        while recent.front().map(|(t, _)| *t < cutoff).unwrap_or(false) {
            recent.pop_front();
        }
    }

    /// Failure rate over the window, when enough samples exist.
    async fn window_failure_rate(&self) -> Option<f64> {
        let recent = self.recent.read().await;
        if recent.len() < self.config.min_rate_samples {
            return None;
        }
        let failures = recent.iter().filter(|(_, success)| !success).count();
        Some(failures as f64 / recent.len() as f64)
    }

    /// Trip the circuit open.
    pub async fn trip(&self, reason: TripReason) {
        let mut state = self.state.write().await;
        if *state != CircuitState::Open {
            *state = CircuitState::Open;
            *self.opened_at.write().await = Some(Utc::now());
            *self.last_trip_reason.write().await = Some(reason.clone());
            self.total_trips.fetch_add(1, Ordering::SeqCst);
            warn!("{}: circuit OPEN ({})", self.name, reason);
        } else {
            *self.opened_at.write().await = Some(Utc::now());
            *self.last_trip_reason.write().await = Some(reason);
        }
    }

    /// Release a claimed probe without recording an outcome (used when a
    /// request ends in cancellation or a server cooldown).
    pub fn release_probe(&self) {
        self.probe_in_flight.store(false, Ordering::SeqCst);
    }

    async fn transition_to_half_open(&self) {
        let mut state = self.state.write().await;
        if *state == CircuitState::Open {
            *state = CircuitState::HalfOpen;
            info!("{}: circuit HALF-OPEN", self.name);
        }
    }

    /// Close the circuit and reset backoff.
    pub async fn close(&self) {
        let mut state = self.state.write().await;
        *state = CircuitState::Closed;
        self.consecutive_failures.store(0, Ordering::SeqCst);
        *self.opened_at.write().await = None;
        self.current_cooldown_secs
            .store(self.config.cooldown_secs, Ordering::SeqCst);
        self.probe_in_flight.store(false, Ordering::SeqCst);
        info!("{}: circuit CLOSED", self.name);
    }

    async fn cooldown_elapsed(&self) -> bool {
        if let Some(opened_at) = *self.opened_at.read().await {
            let elapsed = Utc::now().signed_duration_since(opened_at).num_seconds();
            elapsed >= self.current_cooldown_secs.load(Ordering::SeqCst) as i64
        } else {
            true
        }
    }

    /// Seconds until the next half-open transition.
    pub async fn time_until_half_open(&self) -> u64 {
        if let Some(opened_at) = *self.opened_at.read().await {
            let elapsed = Utc::now()
                .signed_duration_since(opened_at)
                .num_seconds()
                .max(0) as u64;
            self.current_cooldown_secs
                .load(Ordering::SeqCst)
                .saturating_sub(elapsed)
        } else {
            0
        }
    }

    pub async fn stats(&self) -> CircuitBreakerStats {
        CircuitBreakerStats {
            state: self.state().await,
            consecutive_failures: self.consecutive_failures.load(Ordering::SeqCst),
            opened_at: *self.opened_at.read().await,
            current_cooldown_secs: self.current_cooldown_secs.load(Ordering::SeqCst),
            last_trip_reason: self
                .last_trip_reason
                .read()
                .await
                .as_ref()
                .map(|r| r.to_string()),
            total_trips: self.total_trips.load(Ordering::SeqCst),
        }
    }
}
