//! Persistence: the sole writer to relational storage

pub mod store;

pub use store::{bootstrap_sportsbooks, AttemptSummary, PgStore, PipelineStore, StoreHealth};
