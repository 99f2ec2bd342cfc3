//! Betting-splits provider
//!
//! The secondary source: per-market ticket and money percentages alongside
//! the quoted prices. One payload row per (game, book, market); the `home`
//! side doubles as Over for totals. Timestamps arrive as naive East-Coast
//! wall-clock strings.

use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, Utc};
use rust_decimal::prelude::FromPrimitive;
use rust_decimal::Decimal;
use serde::Deserialize;
use tracing::info;
use uuid::Uuid;

use crate::domain::{
    CollectionWindow, CollectorBatch, HealthProbe, MarketQuote, ParseStatus, ProvisionalLine,
    RawRecord, VolumeSplits,
};
use crate::error::{Result, SharplineError};
use crate::shutdown::ShutdownToken;

use super::{Collector, SourceClient, SOURCE_BETSPLITS};

#[derive(Debug, Deserialize, Clone, Default)]
#[serde(default)]
pub struct SplitSide {
    pub price: Option<i32>,
    pub bets_pct: Option<f64>,
    pub money_pct: Option<f64>,
}

/// One split row: a quote plus its public-volume breakdown
#[derive(Debug, Deserialize, Clone, Default)]
#[serde(default)]
pub struct SplitRow {
    pub event_id: String,
    pub game_date: Option<NaiveDate>,
    pub home_team: String,
    pub away_team: String,
    pub book: String,
    pub market: String,
    pub line: Option<f64>,
    /// Home side, or Over for totals
    pub home: SplitSide,
    /// Away side, or Under for totals
    pub away: SplitSide,
    /// Wall-clock string, naive values interpreted as East-Coast time
    pub updated_at: Option<String>,
}

impl SplitRow {
    fn odds_timestamp(&self, fallback: DateTime<Utc>) -> DateTime<Utc> {
        self.updated_at
            .as_deref()
            .and_then(|raw| crate::domain::parse_odds_timestamp(raw).ok())
            .unwrap_or(fallback)
    }
}

/// Parse one stored row payload into provisional lines.
pub fn parse_payload(payload: &serde_json::Value) -> Result<Vec<ProvisionalLine>> {
    let row: SplitRow = serde_json::from_value(payload.clone())
        .map_err(|e| SharplineError::Parse(format!("split row: {}", e)))?;
    if row.event_id.is_empty() {
        return Err(SharplineError::Parse("split row missing event_id".into()));
    }
    Ok(row_line(&row).into_iter().collect())
}

fn row_line(row: &SplitRow) -> Option<ProvisionalLine> {
    let line = row.line.and_then(Decimal::from_f64);
    let quote = match row.market.as_str() {
        "moneyline" => MarketQuote::Moneyline {
            home_price: row.home.price?,
            away_price: row.away.price?,
        },
        "spread" => MarketQuote::Spread {
            line: line?,
            home_price: row.home.price?,
            away_price: row.away.price?,
        },
        "total" => MarketQuote::Total {
            line: line?,
            over_price: row.home.price?,
            under_price: row.away.price?,
        },
        _ => return None,
    };

    Some(ProvisionalLine {
        source: SOURCE_BETSPLITS.to_string(),
        external_game_id: row.event_id.clone(),
        game_date: row.game_date,
        home_team: Some(row.home_team.clone()),
        away_team: Some(row.away_team.clone()),
        external_sportsbook: row.book.clone(),
        quote,
        splits: VolumeSplits {
            side_a_bets_pct: row.home.bets_pct,
            side_a_money_pct: row.home.money_pct,
            side_b_bets_pct: row.away.bets_pct,
            side_b_money_pct: row.away.money_pct,
        },
        odds_timestamp: row.odds_timestamp(Utc::now()),
    })
}

/// Collector for the betting-splits provider
pub struct SplitsCollector {
    client: SourceClient,
}

impl SplitsCollector {
    pub fn new(client: SourceClient) -> Self {
        Self { client }
    }

    fn splits_url(&self) -> String {
        format!(
            "{}/mlb/splits",
            self.client.base_url().trim_end_matches('/')
        )
    }
}

#[async_trait]
impl Collector for SplitsCollector {
    fn source(&self) -> &'static str {
        SOURCE_BETSPLITS
    }

    async fn collect(
        &self,
        window: CollectionWindow,
        mut shutdown: ShutdownToken,
    ) -> Result<CollectorBatch> {
        let started_at = Utc::now();
        let query = vec![
            ("date_from", window.start.to_string()),
            ("date_to", window.end.to_string()),
        ];
        let payload = self
            .client
            .get_json(&self.splits_url(), &query, &mut shutdown)
            .await?;

        let rows = match payload.as_array() {
            Some(rows) => rows.clone(),
            None => {
                self.client
                    .report_parse_error(started_at, "expected a JSON array of split rows");
                return Err(SharplineError::Parse("expected array of split rows".into()));
            }
        };

        let fetched_at = Utc::now();
        let batch_id = Uuid::new_v4();
        let mut batch = CollectorBatch::default();
        let mut line_count = 0u32;

        for (index, row_payload) in rows.into_iter().enumerate() {
            let (external_id, odds_timestamp, parse_status) =
                match serde_json::from_value::<SplitRow>(row_payload.clone()) {
                    Ok(row) if !row.event_id.is_empty() => {
                        if row_line(&row).is_some() {
                            line_count += 1;
                        }
                        (
                            format!("{}:{}:{}", row.event_id, row.book, row.market),
                            row.odds_timestamp(fetched_at),
                            ParseStatus::Ok,
                        )
                    }
                    Ok(_) => (
                        format!("missing-id-{}", index),
                        fetched_at,
                        ParseStatus::Invalid("row missing event_id".into()),
                    ),
                    Err(e) => (
                        format!("unparsed-{}", index),
                        fetched_at,
                        ParseStatus::Invalid(e.to_string()),
                    ),
                };

            batch.raw_records.push(RawRecord {
                source: SOURCE_BETSPLITS.to_string(),
                external_id,
                fetched_at,
                odds_timestamp,
                payload: row_payload,
                batch_id,
                parse_status,
            });
        }

        info!(
            source = SOURCE_BETSPLITS,
            rows = batch.raw_records.len(),
            lines = line_count,
            "collected splits sweep"
        );
        self.client.report_success(started_at, line_count);
        Ok(batch)
    }

    async fn probe(&self) -> Result<HealthProbe> {
        self.client.probe().await
    }
}
