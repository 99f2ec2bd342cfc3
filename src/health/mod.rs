//! Collection-health tracking, circuit breaking, recovery and alerting

pub mod alerts;
pub mod circuit;
pub mod patterns;
pub mod prediction;
pub mod recovery;
pub mod tracker;

pub use alerts::{
    spawn_health_alert_bridge, Alert, AlertManager, AlertRecord, AlertSeverity, AlertSink,
    AlertStatus, ConsoleSink, DeadLetter, WebhookSink,
};
pub use circuit::{
    CircuitBreakerConfig, CircuitBreakerStats, CircuitState, CollectorCircuitBreaker, TripReason,
};
pub use patterns::FailurePattern;
pub use prediction::{failure_probability, PredictionInputs};
pub use recovery::{RecoveryAction, RecoveryManager, RecoveryOutcome, RecoveryStep};
pub use tracker::{CollectorHealth, HealthEvent, HealthTracker};
