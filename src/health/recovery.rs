//! Automated recovery
//!
//! When a collector's circuit opens, recovery runs a fixed sequence: reset
//! the breaker once its cooldown has elapsed, force a health probe, and
//! finally revalidate the collector's configuration. Every step is logged as
//! a recovery action; a collector gets at most one recovery attempt per
//! cooldown interval.

use chrono::{DateTime, Utc};
use futures::future::BoxFuture;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::{info, warn};

use crate::config::CollectorConfig;
use crate::domain::HealthProbe;
use crate::error::Result;
use crate::shutdown::ShutdownToken;

use super::alerts::{Alert, AlertManager, AlertSeverity};
use super::circuit::CircuitState;
use super::tracker::HealthTracker;

/// Steps recovery attempts, in order
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecoveryStep {
    ResetCircuitBreaker,
    ForceHealthProbe,
    RevalidateConfiguration,
}

impl RecoveryStep {
    pub fn as_str(&self) -> &'static str {
        match self {
            RecoveryStep::ResetCircuitBreaker => "reset_circuit_breaker",
            RecoveryStep::ForceHealthProbe => "force_health_probe",
            RecoveryStep::RevalidateConfiguration => "revalidate_configuration",
        }
    }
}

/// Outcome of one recovery step
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RecoveryOutcome {
    Succeeded,
    Failed(String),
    Skipped(String),
}

impl RecoveryOutcome {
    pub fn as_str(&self) -> &'static str {
        match self {
            RecoveryOutcome::Succeeded => "succeeded",
            RecoveryOutcome::Failed(_) => "failed",
            RecoveryOutcome::Skipped(_) => "skipped",
        }
    }

    pub fn detail(&self) -> Option<&str> {
        match self {
            RecoveryOutcome::Succeeded => None,
            RecoveryOutcome::Failed(detail) | RecoveryOutcome::Skipped(detail) => Some(detail),
        }
    }
}

/// One logged recovery action
#[derive(Debug, Clone)]
pub struct RecoveryAction {
    pub collector: String,
    pub step: RecoveryStep,
    pub outcome: RecoveryOutcome,
    pub at: DateTime<Utc>,
}

type ProbeFn = Arc<dyn Fn() -> BoxFuture<'static, Result<HealthProbe>> + Send + Sync>;

/// Drives recovery for open circuits
pub struct RecoveryManager {
    tracker: Arc<HealthTracker>,
    alerts: Arc<AlertManager>,
    collector_configs: HashMap<String, CollectorConfig>,
    probe_fns: RwLock<HashMap<String, ProbeFn>>,
    last_attempt: RwLock<HashMap<String, DateTime<Utc>>>,
    action_log: RwLock<Vec<RecoveryAction>>,
}

impl RecoveryManager {
    pub fn new(
        tracker: Arc<HealthTracker>,
        alerts: Arc<AlertManager>,
        collector_configs: HashMap<String, CollectorConfig>,
    ) -> Self {
        Self {
            tracker,
            alerts,
            collector_configs,
            probe_fns: RwLock::new(HashMap::new()),
            last_attempt: RwLock::new(HashMap::new()),
            action_log: RwLock::new(Vec::new()),
        }
    }

    /// Register the probe callback for a collector.
    pub async fn register_probe<F>(&self, collector: &str, probe: F)
    where
        F: Fn() -> BoxFuture<'static, Result<HealthProbe>> + Send + Sync + 'static,
    {
        self.probe_fns
            .write()
            .await
            .insert(collector.to_string(), Arc::new(probe));
    }

    /// Drain logged actions for persistence.
    pub async fn take_actions(&self) -> Vec<RecoveryAction> {
        std::mem::take(&mut *self.action_log.write().await)
    }

    async fn log_action(&self, collector: &str, step: RecoveryStep, outcome: RecoveryOutcome) {
        info!(
            collector = collector,
            step = step.as_str(),
            outcome = outcome.as_str(),
            detail = outcome.detail().unwrap_or(""),
            "recovery action"
        );
        self.action_log.write().await.push(RecoveryAction {
            collector: collector.to_string(),
            step,
            outcome,
            at: Utc::now(),
        });
    }

    /// Attempt recovery for one collector. Returns the actions taken.
    ///
    /// At most one attempt runs per breaker cooldown interval; callers inside
    /// the window get a single `Skipped` action back.
    pub async fn attempt_recovery(&self, collector: &str) -> Vec<RecoveryAction> {
        let breaker = match self.tracker.breaker(collector).await {
            Some(breaker) => breaker,
            None => {
                let action = RecoveryAction {
                    collector: collector.to_string(),
                    step: RecoveryStep::ResetCircuitBreaker,
                    outcome: RecoveryOutcome::Skipped("unknown collector".into()),
                    at: Utc::now(),
                };
                self.action_log.write().await.push(action.clone());
                return vec![action];
            }
        };

        let cooldown_secs = breaker.stats().await.current_cooldown_secs.max(1);
        {
            let mut last = self.last_attempt.write().await;
            let now = Utc::now();
            if let Some(previous) = last.get(collector) {
                if (now - *previous).num_seconds() < cooldown_secs as i64 {
                    let action = RecoveryAction {
                        collector: collector.to_string(),
                        step: RecoveryStep::ResetCircuitBreaker,
                        outcome: RecoveryOutcome::Skipped(
                            "recovery already attempted this cooldown".into(),
                        ),
                        at: now,
                    };
                    self.action_log.write().await.push(action.clone());
                    return vec![action];
                }
            }
            last.insert(collector.to_string(), now);
        }

        let mut actions = Vec::new();

        // Step 1: reset the breaker once its cooldown has elapsed
        let remaining = breaker.time_until_half_open().await;
        let reset_outcome = if remaining == 0 {
            breaker.close().await;
            RecoveryOutcome::Succeeded
        } else {
            RecoveryOutcome::Failed(format!("cooldown has {}s remaining", remaining))
        };
        let reset_succeeded = reset_outcome == RecoveryOutcome::Succeeded;
        self.log_action(collector, RecoveryStep::ResetCircuitBreaker, reset_outcome.clone())
            .await;
        actions.push(RecoveryAction {
            collector: collector.to_string(),
            step: RecoveryStep::ResetCircuitBreaker,
            outcome: reset_outcome,
            at: Utc::now(),
        });
        if reset_succeeded {
            return actions;
        }

        // Step 2: force a health probe
        let probe_fn = self.probe_fns.read().await.get(collector).cloned();
        let probe_outcome = match probe_fn {
            Some(probe) => match probe().await {
                Ok(result) if result.reachable => {
                    breaker.record_success().await;
                    RecoveryOutcome::Succeeded
                }
                Ok(_) => RecoveryOutcome::Failed("probe unreachable".into()),
                Err(e) => RecoveryOutcome::Failed(e.to_string()),
            },
            None => RecoveryOutcome::Skipped("no probe registered".into()),
        };
        let probe_succeeded = probe_outcome == RecoveryOutcome::Succeeded;
        self.log_action(collector, RecoveryStep::ForceHealthProbe, probe_outcome.clone())
            .await;
        actions.push(RecoveryAction {
            collector: collector.to_string(),
            step: RecoveryStep::ForceHealthProbe,
            outcome: probe_outcome,
            at: Utc::now(),
        });
        if probe_succeeded {
            return actions;
        }

        // Step 3: revalidate configuration
        let config_outcome = self.revalidate_config(collector);
        self.log_action(
            collector,
            RecoveryStep::RevalidateConfiguration,
            config_outcome.clone(),
        )
        .await;
        actions.push(RecoveryAction {
            collector: collector.to_string(),
            step: RecoveryStep::RevalidateConfiguration,
            outcome: config_outcome,
            at: Utc::now(),
        });

        warn!(collector = collector, "automated recovery exhausted");
        self.alerts
            .raise(
                Alert::new(
                    "recovery_exhausted",
                    AlertSeverity::Critical,
                    collector,
                    "automated recovery exhausted; manual intervention required",
                )
                .with_context(serde_json::json!({
                    "steps": actions.len(),
                })),
            )
            .await;

        actions
    }

    /// Check the collector's static configuration still makes sense.
    fn revalidate_config(&self, collector: &str) -> RecoveryOutcome {
        let config = match self.collector_configs.get(collector) {
            Some(config) => config,
            None => return RecoveryOutcome::Failed("collector missing from configuration".into()),
        };
        if !config.enabled {
            return RecoveryOutcome::Failed("collector is disabled".into());
        }
        if url::Url::parse(&config.base_url).is_err() {
            return RecoveryOutcome::Failed(format!("invalid base_url: {}", config.base_url));
        }
        if config.api_key.as_deref().map(str::is_empty).unwrap_or(false) {
            return RecoveryOutcome::Failed("api_key is set but empty".into());
        }
        RecoveryOutcome::Succeeded
    }

    /// Periodically sweep breakers and recover open ones.
    pub fn start(self: &Arc<Self>, interval_secs: u64, shutdown: ShutdownToken) {
        let manager = self.clone();
        let mut shutdown = shutdown;
        tokio::spawn(async move {
            let mut timer =
                tokio::time::interval(std::time::Duration::from_secs(interval_secs.max(1)));
            timer.tick().await;
            loop {
                tokio::select! {
                    _ = timer.tick() => {
                        let snapshots = manager.tracker.snapshot_all().await;
                        for snapshot in snapshots {
                            if snapshot.circuit_state == CircuitState::Open {
                                manager.attempt_recovery(&snapshot.collector).await;
                            }
                        }
                    }
                    _ = shutdown.cancelled() => break,
                }
            }
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{HealthConfig, ThrottleBySeverity};
    use crate::health::circuit::CircuitBreakerConfig;

    async fn setup(cooldown_secs: u64) -> (Arc<HealthTracker>, Arc<RecoveryManager>) {
        let tracker = Arc::new(HealthTracker::new(HealthConfig::default()));
        tracker
            .register_collector(
                "odds_api",
                CircuitBreakerConfig {
                    cooldown_secs,
                    ..Default::default()
                },
            )
            .await;
        let alerts = Arc::new(AlertManager::new(ThrottleBySeverity::default()));
        let mut configs = HashMap::new();
        configs.insert(
            "odds_api".to_string(),
            CollectorConfig {
                base_url: "https://api.example.com/v4".into(),
                ..Default::default()
            },
        );
        let manager = Arc::new(RecoveryManager::new(tracker.clone(), alerts, configs));
        (tracker, manager)
    }

    #[tokio::test]
    async fn test_reset_succeeds_after_cooldown() {
        let (tracker, manager) = setup(0).await;
        let breaker = tracker.breaker("odds_api").await.unwrap();
        breaker
            .trip(crate::health::circuit::TripReason::Manual("test".into()))
            .await;

        let actions = manager.attempt_recovery("odds_api").await;
        assert_eq!(actions.len(), 1);
        assert_eq!(actions[0].step, RecoveryStep::ResetCircuitBreaker);
        assert_eq!(actions[0].outcome, RecoveryOutcome::Succeeded);
        assert_eq!(breaker.state().await, CircuitState::Closed);
    }

    #[tokio::test]
    async fn test_probe_recovers_during_cooldown() {
        let (tracker, manager) = setup(3600).await;
        let breaker = tracker.breaker("odds_api").await.unwrap();
        breaker
            .trip(crate::health::circuit::TripReason::Manual("test".into()))
            .await;

        manager
            .register_probe("odds_api", || {
                Box::pin(async {
                    Ok(HealthProbe {
                        collector: "odds_api".into(),
                        reachable: true,
                        response_ms: 40,
                        checked_at: Utc::now(),
                    })
                })
            })
            .await;

        let actions = manager.attempt_recovery("odds_api").await;
        assert_eq!(actions.len(), 2);
        assert_eq!(actions[1].step, RecoveryStep::ForceHealthProbe);
        assert_eq!(actions[1].outcome, RecoveryOutcome::Succeeded);
        assert_eq!(breaker.state().await, CircuitState::Closed);
    }

    #[tokio::test]
    async fn test_full_sequence_when_everything_fails() {
        let (tracker, manager) = setup(3600).await;
        let breaker = tracker.breaker("odds_api").await.unwrap();
        breaker
            .trip(crate::health::circuit::TripReason::Manual("test".into()))
            .await;

        manager
            .register_probe("odds_api", || {
                Box::pin(async {
                    Err(crate::error::SharplineError::TransientIo(
                        "connection refused".into(),
                    ))
                })
            })
            .await;

        let actions = manager.attempt_recovery("odds_api").await;
        assert_eq!(actions.len(), 3);
        assert!(matches!(actions[0].outcome, RecoveryOutcome::Failed(_)));
        assert!(matches!(actions[1].outcome, RecoveryOutcome::Failed(_)));
        // Config itself is valid
        assert_eq!(actions[2].outcome, RecoveryOutcome::Succeeded);
        assert_eq!(breaker.state().await, CircuitState::Open);
    }

    #[tokio::test]
    async fn test_at_most_once_per_cooldown() {
        let (tracker, manager) = setup(3600).await;
        let breaker = tracker.breaker("odds_api").await.unwrap();
        breaker
            .trip(crate::health::circuit::TripReason::Manual("test".into()))
            .await;

        let first = manager.attempt_recovery("odds_api").await;
        assert!(first.len() > 1);

        let second = manager.attempt_recovery("odds_api").await;
        assert_eq!(second.len(), 1);
        assert!(matches!(second[0].outcome, RecoveryOutcome::Skipped(_)));
    }

    #[tokio::test]
    async fn test_unknown_collector_skipped() {
        let (_, manager) = setup(0).await;
        let actions = manager.attempt_recovery("mystery").await;
        assert_eq!(actions.len(), 1);
        assert!(matches!(actions[0].outcome, RecoveryOutcome::Skipped(_)));
    }
}
