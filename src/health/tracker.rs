//! Collection-health tracker
//!
//! Observes every `CollectionAttempt`, keeps per-collector rolling state,
//! detects degradation against trailing baselines, and drives the periodic
//! pattern and prediction passes. Collectors publish attempts over a channel
//! and never touch this state directly.

use chrono::{DateTime, Duration, NaiveDate, Utc};
use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use tokio::sync::{broadcast, mpsc, Mutex, RwLock};
use tracing::{debug, info, warn};

use crate::config::HealthConfig;
use crate::domain::{AttemptOutcome, CollectionAttempt};
use crate::shutdown::ShutdownToken;

use super::circuit::{CircuitBreakerConfig, CircuitState, CollectorCircuitBreaker};
use super::patterns::{detect_pattern, FailurePattern};
use super::prediction::{failure_probability, PredictionInputs};

/// Events emitted by the tracker
#[derive(Debug, Clone)]
pub enum HealthEvent {
    PerformanceDegradation {
        collector: String,
        success_rate: f64,
        p95_ms: u64,
        baseline_success_rate: f64,
        baseline_p95_ms: u64,
    },
    DegradationCleared {
        collector: String,
    },
    FailurePatternDetected(FailurePattern),
    PredictedFailure {
        collector: String,
        probability: f64,
    },
}

/// One ring-buffer entry
#[derive(Debug, Clone, Copy)]
struct AttemptRecord {
    at: DateTime<Utc>,
    success: bool,
    response_ms: u64,
}

/// Per-day aggregate backing the trailing baselines
#[derive(Debug, Clone)]
struct DayAggregate {
    date: NaiveDate,
    attempts: u64,
    successes: u64,
    /// Capped latency sample for the day's p95
    latencies: Vec<u64>,
}

const DAY_LATENCY_CAP: usize = 256;
const BASELINE_DAYS: usize = 7;

impl DayAggregate {
    fn new(date: NaiveDate) -> Self {
        Self {
            date,
            attempts: 0,
            successes: 0,
            latencies: Vec::new(),
        }
    }

    fn success_rate(&self) -> f64 {
        if self.attempts == 0 {
            1.0
        } else {
            self.successes as f64 / self.attempts as f64
        }
    }

    fn p95(&self) -> Option<u64> {
        percentile(&self.latencies, 0.95)
    }
}

/// Internal per-collector state
struct CollectorState {
    ring: VecDeque<AttemptRecord>,
    total_attempts: u64,
    total_successes: u64,
    failures_by_category: HashMap<AttemptOutcome, u64>,
    consecutive_failures: u32,
    days: VecDeque<DayAggregate>,
    degraded: bool,
    failure_probability: f64,
    last_attempt_at: Option<DateTime<Utc>>,
}

impl CollectorState {
    fn new() -> Self {
        Self {
            ring: VecDeque::new(),
            total_attempts: 0,
            total_successes: 0,
            failures_by_category: HashMap::new(),
            consecutive_failures: 0,
            days: VecDeque::new(),
            degraded: false,
            failure_probability: 0.0,
            last_attempt_at: None,
        }
    }

    fn window_records(&self, window: Duration) -> Vec<&AttemptRecord> {
        let cutoff = Utc::now() - window;
        self.ring.iter().filter(|r| r.at >= cutoff).collect()
    }

    fn window_success_rate(&self, window: Duration) -> Option<f64> {
        let records = self.window_records(window);
        if records.is_empty() {
            return None;
        }
        let successes = records.iter().filter(|r| r.success).count();
        Some(successes as f64 / records.len() as f64)
    }

    fn window_p95(&self, window: Duration) -> Option<u64> {
        let latencies: Vec<u64> = self
            .window_records(window)
            .iter()
            .map(|r| r.response_ms)
            .collect();
        percentile(&latencies, 0.95)
    }

    /// Trailing baseline the current window is compared against.
    ///
    /// Prefers medians over prior days; falls back to ring records older than
    /// the evaluation window so a collapse never drags its own baseline down.
    /// Returns `None` until enough history exists.
    fn baseline(&self, min_samples: usize, exclude_after: DateTime<Utc>) -> Option<(f64, u64)> {
        let today = Utc::now().date_naive();
        let prior: Vec<&DayAggregate> = self.days.iter().filter(|d| d.date < today).collect();
        let prior_samples: u64 = prior.iter().map(|d| d.attempts).sum();

        if prior.len() >= 2 && prior_samples as usize >= min_samples {
            let mut rates: Vec<f64> = prior.iter().map(|d| d.success_rate()).collect();
            rates.sort_by(|a, b| a.partial_cmp(b).unwrap_or(std::cmp::Ordering::Equal));
            let rate = rates[rates.len() / 2];

            let mut p95s: Vec<u64> = prior.iter().filter_map(|d| d.p95()).collect();
            p95s.sort_unstable();
            let p95 = if p95s.is_empty() {
                0
            } else {
                p95s[p95s.len() / 2]
            };
            return Some((rate, p95));
        }

        let older: Vec<&AttemptRecord> =
            self.ring.iter().filter(|r| r.at < exclude_after).collect();
        if older.len() < min_samples {
            return None;
        }
        let successes = older.iter().filter(|r| r.success).count();
        let rate = successes as f64 / older.len() as f64;
        let latencies: Vec<u64> = older.iter().map(|r| r.response_ms).collect();
        Some((rate, percentile(&latencies, 0.95).unwrap_or(0)))
    }
}

/// Nearest-rank percentile over an unsorted sample.
fn percentile(values: &[u64], q: f64) -> Option<u64> {
    if values.is_empty() {
        return None;
    }
    let mut sorted = values.to_vec();
    sorted.sort_unstable();
    let rank = ((sorted.len() as f64 * q).ceil() as usize).clamp(1, sorted.len());
    Some(sorted[rank - 1])
}

/// Public per-collector snapshot
#[derive(Debug, Clone)]
pub struct CollectorHealth {
    pub collector: String,
    pub total_attempts: u64,
    pub total_successes: u64,
    pub failures_by_category: HashMap<String, u64>,
    pub consecutive_failures: u32,
    pub success_rate_5m: Option<f64>,
    pub success_rate_60m: Option<f64>,
    pub p50_ms: Option<u64>,
    pub p95_ms: Option<u64>,
    pub circuit_state: CircuitState,
    pub degraded: bool,
    pub failure_probability: f64,
    pub last_attempt_at: Option<DateTime<Utc>>,
}

/// Collection-health tracker
pub struct HealthTracker {
    config: HealthConfig,
    states: RwLock<HashMap<String, CollectorState>>,
    breakers: RwLock<HashMap<String, Arc<CollectorCircuitBreaker>>>,
    event_tx: broadcast::Sender<HealthEvent>,
    attempt_tx: mpsc::UnboundedSender<CollectionAttempt>,
    attempt_rx: Mutex<Option<mpsc::UnboundedReceiver<CollectionAttempt>>>,
    /// Optional forward of every observed attempt (persistence)
    attempt_tap: RwLock<Option<mpsc::UnboundedSender<CollectionAttempt>>>,
}

impl HealthTracker {
    pub fn new(config: HealthConfig) -> Self {
        let (event_tx, _) = broadcast::channel(256);
        let (attempt_tx, attempt_rx) = mpsc::unbounded_channel();
        Self {
            config,
            states: RwLock::new(HashMap::new()),
            breakers: RwLock::new(HashMap::new()),
            event_tx,
            attempt_tx,
            attempt_rx: Mutex::new(Some(attempt_rx)),
            attempt_tap: RwLock::new(None),
        }
    }

    /// Forward every observed attempt to a second consumer.
    pub async fn set_attempt_tap(&self, tap: mpsc::UnboundedSender<CollectionAttempt>) {
        *self.attempt_tap.write().await = Some(tap);
    }

    /// Register a collector and create its circuit breaker.
    pub async fn register_collector(
        &self,
        name: &str,
        breaker_config: CircuitBreakerConfig,
    ) -> Arc<CollectorCircuitBreaker> {
        self.states
            .write()
            .await
            .entry(name.to_string())
            .or_insert_with(CollectorState::new);

        let breaker = Arc::new(CollectorCircuitBreaker::new(name, breaker_config));
        self.breakers
            .write()
            .await
            .insert(name.to_string(), breaker.clone());
        debug!("registered collector for health tracking: {}", name);
        breaker
    }

    pub async fn breaker(&self, name: &str) -> Option<Arc<CollectorCircuitBreaker>> {
        self.breakers.read().await.get(name).cloned()
    }

    /// Channel collectors publish attempts into.
    pub fn attempt_sender(&self) -> mpsc::UnboundedSender<CollectionAttempt> {
        self.attempt_tx.clone()
    }

    /// Subscribe to tracker events.
    pub fn subscribe(&self) -> broadcast::Receiver<HealthEvent> {
        self.event_tx.subscribe()
    }

    /// Fold one attempt into the rolling state.
    pub async fn observe(&self, attempt: CollectionAttempt) {
        if let Some(tap) = self.attempt_tap.read().await.as_ref() {
            let _ = tap.send(attempt.clone());
        }

        let mut states = self.states.write().await;
        let state = states
            .entry(attempt.collector.clone())
            .or_insert_with(CollectorState::new);

        let success = attempt.outcome.is_success();
        state.total_attempts += 1;
        if success {
            state.total_successes += 1;
            state.consecutive_failures = 0;
        } else {
            *state
                .failures_by_category
                .entry(attempt.outcome)
                .or_insert(0) += 1;
            state.consecutive_failures += 1;
        }
        state.last_attempt_at = Some(attempt.finished_at);

        state.ring.push_back(AttemptRecord {
            at: attempt.finished_at,
            success,
            response_ms: attempt.response_ms,
        });
        while state.ring.len() > self.config.ring_buffer_size {
            state.ring.pop_front();
        }

        // Daily aggregates for the trailing baselines
        let date = attempt.finished_at.date_naive();
        if state.days.back().map(|d| d.date) != Some(date) {
            state.days.push_back(DayAggregate::new(date));
            while state.days.len() > BASELINE_DAYS {
                state.days.pop_front();
            }
        }
        if let Some(day) = state.days.back_mut() {
            day.attempts += 1;
            if success {
                day.successes += 1;
            }
            if day.latencies.len() < DAY_LATENCY_CAP {
                day.latencies.push(attempt.response_ms);
            }
        }

        self.evaluate_degradation(&attempt.collector, state);
    }

    /// Flag or clear performance degradation for one collector.
    fn evaluate_degradation(&self, collector: &str, state: &mut CollectorState) {
        let window = Duration::minutes(5);
        let records = state.window_records(window);
        if records.len() < 5 {
            return;
        }

        let success_rate = state.window_success_rate(window).unwrap_or(1.0);
        let p95 = state.window_p95(window).unwrap_or(0);
        let cutoff = Utc::now() - window;
        let (baseline_rate, baseline_p95) =
            match state.baseline(self.config.baseline_min_samples, cutoff) {
                Some(baseline) => baseline,
                None => return, // not enough history to judge
            };

        let rate_degraded = success_rate < baseline_rate * self.config.degradation_success_ratio;
        let latency_degraded =
            baseline_p95 > 0 && p95 as f64 > baseline_p95 as f64 * self.config.degradation_latency_ratio;
        let now_degraded = rate_degraded || latency_degraded;

        if now_degraded && !state.degraded {
            state.degraded = true;
            warn!(
                collector = collector,
                success_rate, p95, "performance degradation detected"
            );
            let _ = self.event_tx.send(HealthEvent::PerformanceDegradation {
                collector: collector.to_string(),
                success_rate,
                p95_ms: p95,
                baseline_success_rate: baseline_rate,
                baseline_p95_ms: baseline_p95,
            });
        } else if !now_degraded && state.degraded {
            state.degraded = false;
            info!(collector = collector, "performance degradation cleared");
            let _ = self.event_tx.send(HealthEvent::DegradationCleared {
                collector: collector.to_string(),
            });
        }
    }

    /// Run the autocorrelation pass over every collector.
    pub async fn scan_patterns(&self) -> Vec<FailurePattern> {
        let states = self.states.read().await;
        let mut patterns = Vec::new();
        for (name, state) in states.iter() {
            let attempts: Vec<(DateTime<Utc>, bool)> =
                state.ring.iter().map(|r| (r.at, r.success)).collect();
            if let Some(pattern) = detect_pattern(
                name,
                &attempts,
                Duration::hours(2),
                self.config.pattern_min_confidence,
            ) {
                info!(
                    collector = name,
                    period_secs = pattern.period_secs,
                    confidence = pattern.confidence,
                    "periodic failure pattern detected"
                );
                let _ = self
                    .event_tx
                    .send(HealthEvent::FailurePatternDetected(pattern.clone()));
                patterns.push(pattern);
            }
        }
        patterns
    }

    /// Run the failure-probability pass over every collector.
    pub async fn predict_failures(&self) -> Vec<(String, f64)> {
        let mut results = Vec::new();
        let breaker_info: HashMap<String, (u64, bool)> = {
            let breakers = self.breakers.read().await;
            let mut info = HashMap::new();
            for (name, breaker) in breakers.iter() {
                let stats = breaker.stats().await;
                info.insert(
                    name.clone(),
                    (stats.total_trips, stats.state != CircuitState::Closed),
                );
            }
            info
        };

        let mut states = self.states.write().await;
        for (name, state) in states.iter_mut() {
            let (trips, unsettled) = breaker_info.get(name).copied().unwrap_or((0, false));
            let inputs = PredictionInputs {
                attempts: state
                    .ring
                    .iter()
                    .map(|r| (r.at, r.success, r.response_ms))
                    .collect(),
                breaker_trips: trips,
                breaker_unsettled: unsettled,
            };
            let probability = failure_probability(&inputs);
            state.failure_probability = probability;
            results.push((name.clone(), probability));

            if probability >= self.config.prediction_alert_threshold {
                warn!(
                    collector = name,
                    probability, "failure predicted for collector"
                );
                let _ = self.event_tx.send(HealthEvent::PredictedFailure {
                    collector: name.clone(),
                    probability,
                });
            }
        }
        results
    }

    /// Snapshot one collector.
    pub async fn snapshot(&self, name: &str) -> Option<CollectorHealth> {
        let circuit_state = match self.breaker(name).await {
            Some(breaker) => breaker.state().await,
            None => CircuitState::Closed,
        };
        let states = self.states.read().await;
        let state = states.get(name)?;

        let all_latencies: Vec<u64> = state.ring.iter().map(|r| r.response_ms).collect();
        Some(CollectorHealth {
            collector: name.to_string(),
            total_attempts: state.total_attempts,
            total_successes: state.total_successes,
            failures_by_category: state
                .failures_by_category
                .iter()
                .map(|(k, v)| (k.as_str().to_string(), *v))
                .collect(),
            consecutive_failures: state.consecutive_failures,
            success_rate_5m: state.window_success_rate(Duration::minutes(5)),
            success_rate_60m: state.window_success_rate(Duration::minutes(60)),
            p50_ms: percentile(&all_latencies, 0.50),
            p95_ms: percentile(&all_latencies, 0.95),
            circuit_state,
            degraded: state.degraded,
            failure_probability: state.failure_probability,
            last_attempt_at: state.last_attempt_at,
        })
    }

    /// Snapshot every registered collector.
    pub async fn snapshot_all(&self) -> Vec<CollectorHealth> {
        let names: Vec<String> = self.states.read().await.keys().cloned().collect();
        let mut snapshots = Vec::with_capacity(names.len());
        for name in names {
            if let Some(snapshot) = self.snapshot(&name).await {
                snapshots.push(snapshot);
            }
        }
        snapshots.sort_by(|a, b| a.collector.cmp(&b.collector));
        snapshots
    }

    /// Spawn the intake loop plus the periodic pattern/prediction passes.
    pub fn start(self: &Arc<Self>, shutdown: ShutdownToken) {
        let tracker = self.clone();
        let mut intake_shutdown = shutdown.clone();
        tokio::spawn(async move {
            let mut rx = match tracker.attempt_rx.lock().await.take() {
                Some(rx) => rx,
                None => return, // already started once
            };
            loop {
                tokio::select! {
                    attempt = rx.recv() => match attempt {
                        Some(attempt) => tracker.observe(attempt).await,
                        None => break,
                    },
                    _ = intake_shutdown.cancelled() => break,
                }
            }
            info!("health tracker intake stopped");
        });

        let tracker = self.clone();
        let mut pattern_shutdown = shutdown.clone();
        let pattern_interval = std::time::Duration::from_secs(self.config.pattern_interval_s);
        tokio::spawn(async move {
            let mut timer = tokio::time::interval(pattern_interval);
            timer.tick().await; // skip the immediate first tick
            loop {
                tokio::select! {
                    _ = timer.tick() => { tracker.scan_patterns().await; }
                    _ = pattern_shutdown.cancelled() => break,
                }
            }
        });

        let tracker = self.clone();
        let mut prediction_shutdown = shutdown;
        let prediction_interval = std::time::Duration::from_secs(self.config.prediction_interval_s);
        tokio::spawn(async move {
            let mut timer = tokio::time::interval(prediction_interval);
            timer.tick().await;
            loop {
                tokio::select! {
                    _ = timer.tick() => { tracker.predict_failures().await; }
                    _ = prediction_shutdown.cancelled() => break,
                }
            }
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::CollectionAttempt;

    fn tracker() -> HealthTracker {
        HealthTracker::new(HealthConfig::default())
    }

    fn attempt(collector: &str, outcome: AttemptOutcome, response_ms: u64) -> CollectionAttempt {
        aged_attempt(collector, outcome, response_ms, 0)
    }

    fn aged_attempt(
        collector: &str,
        outcome: AttemptOutcome,
        response_ms: u64,
        age_mins: i64,
    ) -> CollectionAttempt {
        let at = Utc::now() - Duration::minutes(age_mins);
        CollectionAttempt {
            collector: collector.to_string(),
            started_at: at,
            finished_at: at,
            outcome,
            record_count: if outcome.is_success() { 10 } else { 0 },
            response_ms,
            error: None,
        }
    }

    #[tokio::test]
    async fn test_observe_updates_counters() {
        let t = tracker();
        t.observe(attempt("odds_api", AttemptOutcome::Ok, 120)).await;
        t.observe(attempt("odds_api", AttemptOutcome::Timeout, 30_000))
            .await;

        let snapshot = t.snapshot("odds_api").await.unwrap();
        assert_eq!(snapshot.total_attempts, 2);
        assert_eq!(snapshot.total_successes, 1);
        assert_eq!(snapshot.consecutive_failures, 1);
        assert_eq!(snapshot.failures_by_category.get("timeout"), Some(&1));
    }

    #[tokio::test]
    async fn test_ring_buffer_bounded() {
        let config = HealthConfig {
            ring_buffer_size: 10,
            ..Default::default()
        };
        let t = HealthTracker::new(config);
        for _ in 0..25 {
            t.observe(attempt("odds_api", AttemptOutcome::Ok, 100)).await;
        }
        let states = t.states.read().await;
        assert_eq!(states.get("odds_api").unwrap().ring.len(), 10);
    }

    #[tokio::test]
    async fn test_degradation_fires_against_baseline() {
        let t = tracker();
        let mut events = t.subscribe();

        // Healthy history outside the 5-minute window establishes the baseline
        for _ in 0..50 {
            t.observe(aged_attempt("odds_api", AttemptOutcome::Ok, 100, 30))
                .await;
        }
        // Collapse: a run of failures drags the 5-minute window down
        for _ in 0..10 {
            t.observe(attempt("odds_api", AttemptOutcome::NetworkError, 100))
                .await;
        }

        let snapshot = t.snapshot("odds_api").await.unwrap();
        assert!(snapshot.degraded);

        let mut saw_degradation = false;
        while let Ok(event) = events.try_recv() {
            if matches!(event, HealthEvent::PerformanceDegradation { .. }) {
                saw_degradation = true;
            }
        }
        assert!(saw_degradation);
    }

    #[tokio::test]
    async fn test_prediction_pass_sets_probability() {
        let t = tracker();
        for _ in 0..20 {
            t.observe(attempt("odds_api", AttemptOutcome::NetworkError, 100))
                .await;
        }
        let results = t.predict_failures().await;
        let (_, probability) = results
            .iter()
            .find(|(name, _)| name == "odds_api")
            .expect("collector missing");
        assert!(*probability >= 0.5, "got {}", probability);

        let snapshot = t.snapshot("odds_api").await.unwrap();
        assert!(snapshot.failure_probability >= 0.5);
    }

    #[tokio::test]
    async fn test_percentiles() {
        assert_eq!(percentile(&[], 0.95), None);
        let values: Vec<u64> = (1..=100).collect();
        assert_eq!(percentile(&values, 0.50), Some(50));
        assert_eq!(percentile(&values, 0.95), Some(95));
        assert_eq!(percentile(&[7], 0.95), Some(7));
    }

    #[tokio::test]
    async fn test_register_creates_breaker() {
        let t = tracker();
        let breaker = t
            .register_collector("odds_api", CircuitBreakerConfig::default())
            .await;
        assert_eq!(breaker.state().await, CircuitState::Closed);
        assert!(t.breaker("odds_api").await.is_some());
        assert!(t.breaker("unknown").await.is_none());
    }
}
