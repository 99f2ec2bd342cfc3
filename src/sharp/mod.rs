//! Sharp-signal detection: volume divergence, reverse line movement, steam

pub mod detector;
pub mod rlm;
pub mod steam;

pub use detector::{detect, SharpSignal, DIVERGENCE_THRESHOLD};
pub use rlm::{flag_rlm, LINE_TICK};
pub use steam::flag_steam;
