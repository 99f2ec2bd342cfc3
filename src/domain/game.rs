//! Canonical game identity
//!
//! Every record in staging and curated is reconciled to one canonical game,
//! regardless of which source produced it. The canonical id is derived from
//! the game date and team abbreviations; the official league id is attached
//! when the schedule source can resolve it.

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};

/// Game lifecycle status, driven by the official schedule source
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GameStatus {
    Scheduled,
    InProgress,
    Final,
    Postponed,
    Cancelled,
    Delayed,
}

impl GameStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            GameStatus::Scheduled => "scheduled",
            GameStatus::InProgress => "in_progress",
            GameStatus::Final => "final",
            GameStatus::Postponed => "postponed",
            GameStatus::Cancelled => "cancelled",
            GameStatus::Delayed => "delayed",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "scheduled" => Some(GameStatus::Scheduled),
            "in_progress" => Some(GameStatus::InProgress),
            "final" => Some(GameStatus::Final),
            "postponed" => Some(GameStatus::Postponed),
            "cancelled" => Some(GameStatus::Cancelled),
            "delayed" => Some(GameStatus::Delayed),
            _ => None,
        }
    }
}

impl std::fmt::Display for GameStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// A canonical game row
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Game {
    /// Canonical id, `YYYY-MM-DD-AWY-HOM`
    pub canonical_id: String,
    /// Official league game id, when resolvable
    pub league_game_id: Option<i64>,
    pub game_date: NaiveDate,
    pub home_abbrev: String,
    pub away_abbrev: String,
    /// Scheduled first pitch, UTC
    pub scheduled_utc: Option<DateTime<Utc>>,
    /// Scheduled first pitch, East-Coast wall clock
    pub scheduled_east: Option<chrono::NaiveDateTime>,
    pub status: GameStatus,
    pub home_score: Option<i32>,
    pub away_score: Option<i32>,
}

impl Game {
    /// Build the canonical id from the identity tuple.
    ///
    /// Abbreviations are uppercased so `nyy` and `NYY` produce the same id.
    pub fn canonical_id_for(date: NaiveDate, away_abbrev: &str, home_abbrev: &str) -> String {
        format!(
            "{}-{}-{}",
            date.format("%Y-%m-%d"),
            away_abbrev.trim().to_ascii_uppercase(),
            home_abbrev.trim().to_ascii_uppercase()
        )
    }

    pub fn new(date: NaiveDate, away_abbrev: &str, home_abbrev: &str) -> Self {
        Self {
            canonical_id: Self::canonical_id_for(date, away_abbrev, home_abbrev),
            league_game_id: None,
            game_date: date,
            home_abbrev: home_abbrev.trim().to_ascii_uppercase(),
            away_abbrev: away_abbrev.trim().to_ascii_uppercase(),
            scheduled_utc: None,
            scheduled_east: None,
            status: GameStatus::Scheduled,
            home_score: None,
            away_score: None,
        }
    }

    /// Games never revert out of a terminal status.
    pub fn is_terminal(&self) -> bool {
        matches!(self.status, GameStatus::Final | GameStatus::Cancelled)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_canonical_id_normalizes_case() {
        let date = NaiveDate::from_ymd_opt(2025, 5, 1).unwrap();
        assert_eq!(
            Game::canonical_id_for(date, "nyy", "bos"),
            "2025-05-01-NYY-BOS"
        );
        assert_eq!(
            Game::canonical_id_for(date, "NYY", " BOS "),
            "2025-05-01-NYY-BOS"
        );
    }

    #[test]
    fn test_status_round_trip() {
        for status in [
            GameStatus::Scheduled,
            GameStatus::InProgress,
            GameStatus::Final,
            GameStatus::Postponed,
            GameStatus::Cancelled,
            GameStatus::Delayed,
        ] {
            assert_eq!(GameStatus::parse(status.as_str()), Some(status));
        }
        assert_eq!(GameStatus::parse("rainout"), None);
    }

    #[test]
    fn test_terminal_status() {
        let date = NaiveDate::from_ymd_opt(2025, 5, 1).unwrap();
        let mut game = Game::new(date, "NYY", "BOS");
        assert!(!game.is_terminal());
        game.status = GameStatus::Final;
        assert!(game.is_terminal());
    }
}
