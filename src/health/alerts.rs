//! Alert routing
//!
//! Structured alerts flow to configured sinks with per-severity throttling
//! of identical alerts. Webhook delivery is at-least-once: failed deliveries
//! land in a dead-letter buffer the persistence layer drains.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::RwLock;
use tracing::{error, info, warn};
use uuid::Uuid;

use crate::config::{AlertingConfig, SinkConfig, ThrottleBySeverity};
use crate::error::Result;
use crate::shutdown::ShutdownToken;

use super::tracker::HealthEvent;

/// Alert severity levels
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AlertSeverity {
    Info,
    Warning,
    Critical,
}

impl AlertSeverity {
    pub fn as_str(&self) -> &'static str {
        match self {
            AlertSeverity::Info => "info",
            AlertSeverity::Warning => "warning",
            AlertSeverity::Critical => "critical",
        }
    }
}

impl std::fmt::Display for AlertSeverity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Structured alert payload
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Alert {
    pub alert_type: String,
    pub severity: AlertSeverity,
    pub collector: String,
    pub correlation_id: Uuid,
    pub message: String,
    pub context: serde_json::Value,
    pub created_at: DateTime<Utc>,
}

impl Alert {
    pub fn new(alert_type: &str, severity: AlertSeverity, collector: &str, message: &str) -> Self {
        Self {
            alert_type: alert_type.to_string(),
            severity,
            collector: collector.to_string(),
            correlation_id: Uuid::new_v4(),
            message: message.to_string(),
            context: serde_json::Value::Null,
            created_at: Utc::now(),
        }
    }

    pub fn with_context(mut self, context: serde_json::Value) -> Self {
        self.context = context;
        self
    }

    /// Throttle key: identical alerts share one
    fn throttle_key(&self) -> String {
        format!("{}:{}:{}", self.alert_type, self.collector, self.severity)
    }
}

/// Lifecycle of a raised alert
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AlertStatus {
    Active,
    Acknowledged,
    Resolved,
}

/// An alert plus its mutable status
#[derive(Debug, Clone)]
pub struct AlertRecord {
    pub alert: Alert,
    pub status: AlertStatus,
    pub updated_at: DateTime<Utc>,
}

/// A delivery that exhausted its retries
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeadLetter {
    pub sink: String,
    pub alert: Alert,
    pub error: String,
    pub failed_at: DateTime<Utc>,
}

/// Destination for alerts
#[async_trait]
pub trait AlertSink: Send + Sync {
    /// Deliver one alert; implementations handle their own retries.
    async fn deliver(&self, alert: &Alert) -> Result<()>;

    fn name(&self) -> &'static str;
}

/// Sink that logs through tracing
pub struct ConsoleSink;

#[async_trait]
impl AlertSink for ConsoleSink {
    async fn deliver(&self, alert: &Alert) -> Result<()> {
        match alert.severity {
            AlertSeverity::Info => info!(
                alert_type = %alert.alert_type,
                collector = %alert.collector,
                correlation_id = %alert.correlation_id,
                "{}",
                alert.message
            ),
            AlertSeverity::Warning => warn!(
                alert_type = %alert.alert_type,
                collector = %alert.collector,
                correlation_id = %alert.correlation_id,
                "{}",
                alert.message
            ),
            AlertSeverity::Critical => error!(
                alert_type = %alert.alert_type,
                collector = %alert.collector,
                correlation_id = %alert.correlation_id,
                "{}",
                alert.message
            ),
        }
        Ok(())
    }

    fn name(&self) -> &'static str {
        "console"
    }
}

/// Sink that POSTs the alert JSON to a webhook
pub struct WebhookSink {
    client: reqwest::Client,
    url: String,
    retry_max_attempts: u32,
}

impl WebhookSink {
    pub fn new(url: &str, retry_max_attempts: u32, timeout_s: u64) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(timeout_s))
            .build()?;
        Ok(Self {
            client,
            url: url.to_string(),
            retry_max_attempts: retry_max_attempts.max(1),
        })
    }
}

#[async_trait]
impl AlertSink for WebhookSink {
    async fn deliver(&self, alert: &Alert) -> Result<()> {
        let mut last_error = String::new();
        for attempt in 0..self.retry_max_attempts {
            if attempt > 0 {
                tokio::time::sleep(Duration::from_secs(1 << attempt.min(4))).await;
            }
            match self.client.post(&self.url).json(alert).send().await {
                Ok(response) if response.status().is_success() => return Ok(()),
                Ok(response) => {
                    last_error = format!("webhook returned {}", response.status());
                }
                Err(e) => {
                    last_error = e.to_string();
                }
            }
        }
        Err(crate::error::SharplineError::TransientIo(last_error))
    }

    fn name(&self) -> &'static str {
        "webhook"
    }
}

struct ThrottleState {
    last_sent: DateTime<Utc>,
    suppressed: u64,
}

/// Routes alerts to sinks with throttling and status tracking
pub struct AlertManager {
    sinks: Vec<Arc<dyn AlertSink>>,
    throttle: ThrottleBySeverity,
    throttle_state: DashMap<String, ThrottleState>,
    records: RwLock<HashMap<Uuid, AlertRecord>>,
    dead_letters: RwLock<Vec<DeadLetter>>,
}

impl AlertManager {
    pub fn new(throttle: ThrottleBySeverity) -> Self {
        Self {
            sinks: Vec::new(),
            throttle,
            throttle_state: DashMap::new(),
            records: RwLock::new(HashMap::new()),
            dead_letters: RwLock::new(Vec::new()),
        }
    }

    /// Build from the alerting config section.
    pub fn from_config(config: &AlertingConfig) -> Result<Self> {
        let mut manager = Self::new(config.throttle_by_severity.clone());
        for sink in &config.sinks {
            match sink {
                SinkConfig::Console => manager = manager.with_sink(Arc::new(ConsoleSink)),
                SinkConfig::Webhook {
                    url,
                    retry_max_attempts,
                    timeout_s,
                } => {
                    manager = manager
                        .with_sink(Arc::new(WebhookSink::new(url, *retry_max_attempts, *timeout_s)?))
                }
            }
        }
        Ok(manager)
    }

    pub fn with_sink(mut self, sink: Arc<dyn AlertSink>) -> Self {
        self.sinks.push(sink);
        self
    }

    fn throttle_secs(&self, severity: AlertSeverity) -> u64 {
        match severity {
            AlertSeverity::Info => self.throttle.info,
            AlertSeverity::Warning => self.throttle.warning,
            AlertSeverity::Critical => self.throttle.critical,
        }
    }

    /// True when an identical alert went out too recently.
    fn is_throttled(&self, alert: &Alert) -> bool {
        let key = alert.throttle_key();
        let window = self.throttle_secs(alert.severity) as i64;
        let now = Utc::now();

        let mut entry = self.throttle_state.entry(key).or_insert(ThrottleState {
            last_sent: now - chrono::Duration::seconds(window + 1),
            suppressed: 0,
        });

        if (now - entry.last_sent).num_seconds() < window {
            entry.suppressed += 1;
            return true;
        }
        entry.last_sent = now;
        entry.suppressed = 0;
        false
    }

    /// Raise an alert: record it, then fan out to sinks unless throttled.
    pub async fn raise(&self, alert: Alert) {
        let record = AlertRecord {
            alert: alert.clone(),
            status: AlertStatus::Active,
            updated_at: Utc::now(),
        };
        self.records
            .write()
            .await
            .insert(alert.correlation_id, record);

        if self.is_throttled(&alert) {
            return;
        }

        for sink in &self.sinks {
            if let Err(e) = sink.deliver(&alert).await {
                error!(
                    sink = sink.name(),
                    alert_type = %alert.alert_type,
                    "alert delivery failed: {}",
                    e
                );
                self.dead_letters.write().await.push(DeadLetter {
                    sink: sink.name().to_string(),
                    alert: alert.clone(),
                    error: e.to_string(),
                    failed_at: Utc::now(),
                });
            }
        }
    }

    /// Acknowledge an active alert. Future occurrences are unaffected.
    pub async fn acknowledge(&self, correlation_id: Uuid) -> bool {
        let mut records = self.records.write().await;
        match records.get_mut(&correlation_id) {
            Some(record) if record.status == AlertStatus::Active => {
                record.status = AlertStatus::Acknowledged;
                record.updated_at = Utc::now();
                true
            }
            _ => false,
        }
    }

    /// Resolve an alert. Future occurrences are unaffected.
    pub async fn resolve(&self, correlation_id: Uuid) -> bool {
        let mut records = self.records.write().await;
        match records.get_mut(&correlation_id) {
            Some(record) if record.status != AlertStatus::Resolved => {
                record.status = AlertStatus::Resolved;
                record.updated_at = Utc::now();
                true
            }
            _ => false,
        }
    }

    pub async fn active_alerts(&self) -> Vec<AlertRecord> {
        self.records
            .read()
            .await
            .values()
            .filter(|r| r.status == AlertStatus::Active)
            .cloned()
            .collect()
    }

    /// Drain dead letters for persistence.
    pub async fn take_dead_letters(&self) -> Vec<DeadLetter> {
        std::mem::take(&mut *self.dead_letters.write().await)
    }

    /// Count of suppressed alerts per throttle key.
    pub fn suppressed_counts(&self) -> HashMap<String, u64> {
        self.throttle_state
            .iter()
            .filter(|entry| entry.suppressed > 0)
            .map(|entry| (entry.key().clone(), entry.suppressed))
            .collect()
    }
}

/// Bridge tracker events onto the alert manager.
pub fn spawn_health_alert_bridge(
    manager: Arc<AlertManager>,
    mut events: tokio::sync::broadcast::Receiver<HealthEvent>,
    mut shutdown: ShutdownToken,
) {
    tokio::spawn(async move {
        loop {
            tokio::select! {
                event = events.recv() => {
                    let event = match event {
                        Ok(event) => event,
                        Err(tokio::sync::broadcast::error::RecvError::Lagged(_)) => continue,
                        Err(_) => break,
                    };
                    let alert = match event {
                        HealthEvent::PerformanceDegradation {
                            collector,
                            success_rate,
                            p95_ms,
                            baseline_success_rate,
                            baseline_p95_ms,
                        } => Alert::new(
                            "performance_degradation",
                            AlertSeverity::Warning,
                            &collector,
                            &format!(
                                "success rate {:.0}% (baseline {:.0}%), p95 {}ms (baseline {}ms)",
                                success_rate * 100.0,
                                baseline_success_rate * 100.0,
                                p95_ms,
                                baseline_p95_ms
                            ),
                        )
                        .with_context(serde_json::json!({
                            "success_rate": success_rate,
                            "p95_ms": p95_ms,
                        })),
                        HealthEvent::DegradationCleared { collector } => Alert::new(
                            "degradation_cleared",
                            AlertSeverity::Info,
                            &collector,
                            "collector performance recovered",
                        ),
                        HealthEvent::FailurePatternDetected(pattern) => Alert::new(
                            "failure_pattern",
                            AlertSeverity::Warning,
                            &pattern.collector,
                            &format!(
                                "periodic failures every ~{}s (confidence {:.2})",
                                pattern.period_secs, pattern.confidence
                            ),
                        )
                        .with_context(serde_json::json!({
                            "period_secs": pattern.period_secs,
                            "confidence": pattern.confidence,
                        })),
                        HealthEvent::PredictedFailure {
                            collector,
                            probability,
                        } => Alert::new(
                            "predicted_failure",
                            AlertSeverity::Critical,
                            &collector,
                            &format!("failure probability {:.2}", probability),
                        )
                        .with_context(serde_json::json!({ "probability": probability })),
                    };
                    manager.raise(alert).await;
                }
                _ = shutdown.cancelled() => break,
            }
        }
    });
}
