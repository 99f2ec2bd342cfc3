//! Core domain types shared across zones

pub mod attempt;
pub mod game;
pub mod line;
pub mod raw;
pub mod run;
pub mod sportsbook;
pub mod time;

pub use attempt::{AttemptOutcome, CollectionAttempt, HealthProbe};
pub use game::{Game, GameStatus};
pub use line::{
    american_from_decimal, american_from_fractional, BettingLine, DataQuality, LineKey, Market,
    MarketQuote, MarketSide, SharpAction, VolumeSplits, AMERICAN_ODDS_BOUND, PRICE_TICK,
};
pub use raw::{
    round_half_point, CollectorBatch, ParseStatus, ProvisionalLine, RawRecord, ScheduleEntry,
};
pub use run::{CollectionWindow, PipelineRun, RunMode, RunStatus, Zone, ZoneMetrics};
pub use sportsbook::{Sportsbook, SportsbookMapping};
pub use time::{naive_east_to_utc, parse_odds_timestamp, utc_to_east};
