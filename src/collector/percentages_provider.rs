//! Ticket-percentage provider
//!
//! The third splits source carries ticket percentages only (no money split),
//! with the book's current prices riding along. Useful as a cross-check on
//! the primary splits feed and as divergence input when money data arrives
//! from elsewhere.

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

use super::{Collector, SourceClient, SOURCE_WAGERPCT};

/// One percentage row
#[derive(Debug, Deserialize, Clone, Default)]
#[serde(default)]
pub struct PercentageRow {
    pub game_id: String,
    pub date: Option<NaiveDate>,
    pub home: String,
    pub away: String,
    pub sportsbook: String,
    pub market: String,
    pub line: Option<f64>,
    pub home_price: Option<i32>,
    pub away_price: Option<i32>,
    /// Ticket share on the home/over side, [0, 100]
    pub home_tickets_pct: Option<f64>,
    pub away_tickets_pct: Option<f64>,
    pub as_of: Option<DateTime<Utc>>,
}

/// Parse one stored row payload into provisional lines.
pub fn parse_payload(payload: &serde_json::Value) -> Result<Vec<ProvisionalLine>> {
    let row: PercentageRow = serde_json::from_value(payload.clone())
        .map_err(|e| SharplineError::Parse(format!("percentage row: {}", e)))?;
    if row.game_id.is_empty() {
        return Err(SharplineError::Parse(
            "percentage row missing game_id".into(),
        ));
    }
    Ok(row_line(&row).into_iter().collect())
}

fn row_line(row: &PercentageRow) -> Option<ProvisionalLine> {
    let line = row.line.and_then(Decimal::from_f64);
    let quote = match row.market.as_str() {
        "moneyline" => MarketQuote::Moneyline {
            home_price: row.home_price?,
            away_price: row.away_price?,
        },
        "spread" => MarketQuote::Spread {
            line: line?,
            home_price: row.home_price?,
            away_price: row.away_price?,
        },
        "total" => MarketQuote::Total {
            line: line?,
            over_price: row.home_price?,
            under_price: row.away_price?,
        },
        _ => return None,
    };

    Some(ProvisionalLine {
        source: SOURCE_WAGERPCT.to_string(),
        external_game_id: row.game_id.clone(),
        game_date: row.date,
        home_team: Some(row.home.clone()),
        away_team: Some(row.away.clone()),
        external_sportsbook: row.sportsbook.clone(),
        quote,
        splits: VolumeSplits {
            side_a_bets_pct: row.home_tickets_pct,
            side_b_bets_pct: row.away_tickets_pct,
            ..Default::default()
        },
        odds_timestamp: row.as_of.unwrap_or_else(Utc::now),
    })
}

/// Collector for the ticket-percentage provider
pub struct PercentagesCollector {
    client: SourceClient,
}

impl PercentagesCollector {
    pub fn new(client: SourceClient) -> Self {
        Self { client }
    }

    fn percentages_url(&self) -> String {
        format!(
            "{}/percentages/mlb",
            self.client.base_url().trim_end_matches('/')
        )
    }
}

#[async_trait]
impl Collector for PercentagesCollector {
    fn source(&self) -> &'static str {
        SOURCE_WAGERPCT
    }

    async fn collect(
        &self,
        window: CollectionWindow,
        mut shutdown: ShutdownToken,
    ) -> Result<CollectorBatch> {
        let started_at = Utc::now();
        let query = vec![("date", window.start.to_string())];
        let payload = self
            .client
            .get_json(&self.percentages_url(), &query, &mut shutdown)
            .await?;

        let rows = match payload.as_array() {
            Some(rows) => rows.clone(),
            None => {
                self.client
                    .report_parse_error(started_at, "expected a JSON array of percentage rows");
                return Err(SharplineError::Parse(
                    "expected array of percentage rows".into(),
                ));
            }
        };

        let fetched_at = Utc::now();
        let batch_id = Uuid::new_v4();
        let mut batch = CollectorBatch::default();
        let mut line_count = 0u32;

        for (index, row_payload) in rows.into_iter().enumerate() {
            let (external_id, odds_timestamp, parse_status) =
                match serde_json::from_value::<PercentageRow>(row_payload.clone()) {
                    Ok(row) if !row.game_id.is_empty() => {
                        if row_line(&row).is_some() {
                            line_count += 1;
                        }
                        (
                            format!("{}:{}:{}", row.game_id, row.sportsbook, row.market),
                            row.as_of.unwrap_or(fetched_at),
                            ParseStatus::Ok,
                        )
                    }
                    Ok(_) => (
                        format!("missing-id-{}", index),
                        fetched_at,
                        ParseStatus::Invalid("row missing game_id".into()),
                    ),
                    Err(e) => (
                        format!("unparsed-{}", index),
                        fetched_at,
                        ParseStatus::Invalid(e.to_string()),
                    ),
                };

            batch.raw_records.push(RawRecord {
                source: SOURCE_WAGERPCT.to_string(),
                external_id,
                fetched_at,
                odds_timestamp,
                payload: row_payload,
                batch_id,
                parse_status,
            });
        }

        info!(
            source = SOURCE_WAGERPCT,
            rows = batch.raw_records.len(),
            lines = line_count,
            "collected percentages sweep"
        );
        self.client.report_success(started_at, line_count);
        Ok(batch)
    }

    async fn probe(&self) -> Result<HealthProbe> {
        self.client.probe().await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn row_json() -> serde_json::Value {
        serde_json::json!({
            "game_id": "wp-515",
            "date": "2025-05-01",
            "home": "BOS",
            "away": "NYY",
            "sportsbook": "Pinnacle",
            "market": "moneyline",
            "home_price": -140,
            "away_price": 120,
            "home_tickets_pct": 44.0,
            "away_tickets_pct": 56.0,
            "as_of": "2025-05-01T12:00:00Z"
        })
    }

    #[test]
    fn test_parse_percentage_row() {
        let lines = parse_payload(&row_json()).unwrap();
        assert_eq!(lines.len(), 1);
        let line = &lines[0];
        assert_eq!(line.splits.side_a_bets_pct, Some(44.0));
        // Money percentages never come from this feed
        assert_eq!(line.splits.side_a_money_pct, None);
        assert!(!line.splits.is_complete());
    }

    #[test]
    fn test_prices_still_required() {
        let mut payload = row_json();
        payload["home_price"] = serde_json::Value::Null;
        let lines = parse_payload(&payload).unwrap();
        assert!(lines.is_empty());
    }
}
