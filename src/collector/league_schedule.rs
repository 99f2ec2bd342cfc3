//! Official league schedule and outcomes
//!
//! The authoritative source for game identity: official game ids, scheduled
//! start times, status transitions, and final scores. Schedule entries feed
//! the identity resolver and drive outcome resolution; they are not betting
//! lines.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Deserialize;
use tracing::info;
use uuid::Uuid;

use crate::domain::{
    CollectionWindow, CollectorBatch, GameStatus, HealthProbe, ParseStatus, RawRecord,
    ScheduleEntry,
};
use crate::error::{Result, SharplineError};
use crate::shutdown::ShutdownToken;

use super::{Collector, SourceClient, SOURCE_MLB_STATS};

#[derive(Debug, Deserialize, Clone, Default)]
#[serde(default)]
struct SchedulePayload {
    dates: Vec<ScheduleDate>,
}

#[derive(Debug, Deserialize, Clone, Default)]
#[serde(default)]
struct ScheduleDate {
    date: String,
    games: Vec<ScheduleGame>,
}

#[derive(Debug, Deserialize, Clone, Default)]
#[serde(default)]
struct ScheduleGame {
    #[serde(rename = "gamePk")]
    game_pk: i64,
    #[serde(rename = "gameDate")]
    game_date: Option<DateTime<Utc>>,
    status: ScheduleStatus,
    teams: ScheduleTeams,
}

#[derive(Debug, Deserialize, Clone, Default)]
#[serde(default)]
struct ScheduleStatus {
    #[serde(rename = "detailedState")]
    detailed_state: String,
}

#[derive(Debug, Deserialize, Clone, Default)]
#[serde(default)]
struct ScheduleTeams {
    home: ScheduleSide,
    away: ScheduleSide,
}

#[derive(Debug, Deserialize, Clone, Default)]
#[serde(default)]
struct ScheduleSide {
    score: Option<i32>,
    team: ScheduleTeam,
}

#[derive(Debug, Deserialize, Clone, Default)]
#[serde(default)]
struct ScheduleTeam {
    name: String,
}

/// Map the league's verbose status strings onto the game lifecycle.
pub fn map_status(detailed_state: &str) -> GameStatus {
    match detailed_state {
        "Final" | "Game Over" | "Completed Early" => GameStatus::Final,
        "In Progress" | "Warmup" => GameStatus::InProgress,
        "Postponed" => GameStatus::Postponed,
        "Cancelled" => GameStatus::Cancelled,
        "Delayed" | "Delayed Start" | "Suspended" => GameStatus::Delayed,
        _ => GameStatus::Scheduled,
    }
}

/// Parse a stored schedule payload into entries.
pub fn parse_schedule_payload(payload: &serde_json::Value) -> Result<Vec<ScheduleEntry>> {
    let parsed: SchedulePayload = serde_json::from_value(payload.clone())
        .map_err(|e| SharplineError::Parse(format!("schedule payload: {}", e)))?;

    let mut entries = Vec::new();
    for date in parsed.dates {
        let game_date = date
            .date
            .parse()
            .map_err(|_| SharplineError::Parse(format!("bad schedule date: {}", date.date)))?;
        for game in date.games {
            if game.game_pk == 0 {
                continue;
            }
            entries.push(ScheduleEntry {
                league_game_id: game.game_pk,
                game_date,
                home_team: game.teams.home.team.name.clone(),
                away_team: game.teams.away.team.name.clone(),
                scheduled_utc: game.game_date,
                status: game.status.detailed_state.clone(),
                home_score: game.teams.home.score,
                away_score: game.teams.away.score,
            });
        }
    }
    Ok(entries)
}

/// Collector for the official league schedule
pub struct LeagueScheduleCollector {
    client: SourceClient,
}

impl LeagueScheduleCollector {
    pub fn new(client: SourceClient) -> Self {
        Self { client }
    }

    fn schedule_url(&self) -> String {
        format!(
            "{}/api/v1/schedule",
            self.client.base_url().trim_end_matches('/')
        )
    }
}

#[async_trait]
impl Collector for LeagueScheduleCollector {
    fn source(&self) -> &'static str {
        SOURCE_MLB_STATS
    }

    async fn collect(
        &self,
        window: CollectionWindow,
        mut shutdown: ShutdownToken,
    ) -> Result<CollectorBatch> {
        let started_at = Utc::now();
        let query = vec![
            ("sportId", "1".to_string()),
            ("startDate", window.start.to_string()),
            ("endDate", window.end.to_string()),
        ];
        let payload = self
            .client
            .get_json(&self.schedule_url(), &query, &mut shutdown)
            .await?;

        let fetched_at = Utc::now();
        let batch_id = Uuid::new_v4();
        let mut batch = CollectorBatch::default();

        match parse_schedule_payload(&payload) {
            Ok(entries) => {
                let count = entries.len() as u32;
                batch.schedule = entries;
                batch.raw_records.push(RawRecord {
                    source: SOURCE_MLB_STATS.to_string(),
                    external_id: format!("schedule-{}-{}", window.start, window.end),
                    fetched_at,
                    odds_timestamp: fetched_at,
                    payload,
                    batch_id,
                    parse_status: ParseStatus::Ok,
                });
                info!(
                    source = SOURCE_MLB_STATS,
                    games = count,
                    "collected schedule sweep"
                );
                self.client.report_success(started_at, count);
            }
            Err(e) => {
                batch.raw_records.push(RawRecord {
                    source: SOURCE_MLB_STATS.to_string(),
                    external_id: format!("schedule-{}-{}", window.start, window.end),
                    fetched_at,
                    odds_timestamp: fetched_at,
                    payload,
                    batch_id,
                    parse_status: ParseStatus::Invalid(e.to_string()),
                });
                self.client.report_parse_error(started_at, &e.to_string());
                return Err(e);
            }
        }

        Ok(batch)
    }

    async fn probe(&self) -> Result<HealthProbe> {
        self.client.probe().await
    }
}
