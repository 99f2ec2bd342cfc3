//! The RAW → STAGING → CURATED processing engine

pub mod curated_zone;
pub mod orchestrator;
pub mod quality;
pub mod raw_zone;
pub mod staging_zone;

pub use curated_zone::{CuratedOutput, CuratedZone};
pub use orchestrator::Orchestrator;
pub use raw_zone::{prepare_batch, RawIngestResult};
pub use staging_zone::{QuarantinedLine, StagingOutput, StagingZone};
