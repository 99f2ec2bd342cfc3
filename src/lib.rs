pub mod cli;
pub mod collector;
pub mod config;
pub mod domain;
pub mod error;
pub mod health;
pub mod identity;
pub mod persistence;
pub mod pipeline;
pub mod sharp;
pub mod shutdown;

pub use config::AppConfig;
pub use domain::{
    BettingLine, CollectionAttempt, CollectionWindow, DataQuality, Game, Market, MarketQuote,
    PipelineRun, RawRecord, RunMode, RunStatus, SharpAction,
};
pub use error::{Result, SharplineError};
pub use health::{
    AlertManager, AlertSeverity, AlertSink, CircuitState, CollectorCircuitBreaker, HealthTracker,
    RecoveryManager,
};
pub use identity::IdentityResolver;
pub use persistence::{PgStore, PipelineStore, StoreHealth};
pub use pipeline::Orchestrator;
pub use shutdown::{ShutdownController, ShutdownToken};
