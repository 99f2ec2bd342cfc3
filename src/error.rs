use thiserror::Error;

/// Main error type for the pipeline
#[derive(Error, Debug)]
pub enum SharplineError {
    // Configuration errors
    #[error("Configuration error: {0}")]
    Config(#[from] config::ConfigError),

    #[error("Invalid configuration: {0}")]
    Configuration(String),

    // Database errors
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("Migration error: {0}")]
    Migration(#[from] sqlx::migrate::MigrateError),

    #[error("Persistence error: {0}")]
    Persistence(String),

    // Network errors
    #[error("HTTP request error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Transient I/O failure: {0}")]
    TransientIo(String),

    #[error("Rate limited by {source_tag}, retry after {retry_after_secs}s")]
    RateLimited {
        source_tag: String,
        retry_after_secs: u64,
    },

    #[error("Request timed out after {elapsed_ms}ms")]
    Timeout { elapsed_ms: u64 },

    #[error("Circuit open for collector: {0}")]
    CircuitOpen(String),

    // Serialization errors
    #[error("JSON serialization error: {0}")]
    Json(#[from] serde_json::Error),

    // Record-level errors
    #[error("Parse error: {0}")]
    Parse(String),

    #[error("Schema violation: {0}")]
    SchemaViolation(String),

    #[error("Unresolved identity: {0}")]
    UnresolvedIdentity(String),

    // Resource errors
    #[error("Resource exhausted: {0}")]
    ResourceExhausted(String),

    // IO errors
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    // Generic errors
    #[error("Internal error: {0}")]
    Internal(String),

    #[error("Operation cancelled")]
    Cancelled,

    #[error("{0}")]
    Other(#[from] anyhow::Error),
}

impl SharplineError {
    /// True for failures that warrant a local retry before giving up.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            SharplineError::TransientIo(_)
                | SharplineError::Timeout { .. }
                | SharplineError::RateLimited { .. }
        )
    }

    /// True for record-level errors that are counted, never raised.
    pub fn is_record_level(&self) -> bool {
        matches!(
            self,
            SharplineError::Parse(_)
                | SharplineError::SchemaViolation(_)
                | SharplineError::UnresolvedIdentity(_)
        )
    }
}

/// Result type alias for SharplineError
pub type Result<T> = std::result::Result<T, SharplineError>;

/// Reasons a record can be rejected during staging
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RejectReason {
    #[error("unknown_game")]
    UnknownGame,

    #[error("unknown_sportsbook")]
    UnknownSportsbook,

    #[error("invalid_odds")]
    InvalidOdds,

    #[error("invalid_timestamp")]
    InvalidTimestamp,

    #[error("duplicate")]
    Duplicate,

    #[error("schema_violation")]
    SchemaViolation,
}

impl RejectReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            RejectReason::UnknownGame => "unknown_game",
            RejectReason::UnknownSportsbook => "unknown_sportsbook",
            RejectReason::InvalidOdds => "invalid_odds",
            RejectReason::InvalidTimestamp => "invalid_timestamp",
            RejectReason::Duplicate => "duplicate",
            RejectReason::SchemaViolation => "schema_violation",
        }
    }
}
