//! Odds-comparison provider
//!
//! A cross-book aggregator: one payload row per event carrying every book's
//! current quote for all three markets. Widens sportsbook coverage beyond
//! the primary provider.

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

use super::{Collector, SourceClient, SOURCE_LINECOMPARE};

#[derive(Debug, Deserialize, Clone, Default)]
#[serde(default)]
pub struct ComparisonEvent {
    pub event_id: String,
    pub date: Option<NaiveDate>,
    pub home: String,
    pub away: String,
    pub books: Vec<BookQuotes>,
    pub updated: Option<DateTime<Utc>>,
}

#[derive(Debug, Deserialize, Clone, Default)]
#[serde(default)]
pub struct BookQuotes {
    pub name: String,
    pub moneyline: Option<PriceSides>,
    pub spread: Option<LineQuote>,
    pub total: Option<LineQuote>,
}

#[derive(Debug, Deserialize, Clone, Default)]
#[serde(default)]
pub struct PriceSides {
    pub home: Option<serde_json::Value>,
    pub away: Option<serde_json::Value>,
}

#[derive(Debug, Deserialize, Clone, Default)]
#[serde(default)]
pub struct LineQuote {
    pub line: Option<f64>,
    pub home: Option<serde_json::Value>,
    pub away: Option<serde_json::Value>,
}

/// The aggregator mixes odds formats per book: American integers, decimal
/// floats, and fractional strings. Magnitudes below 100 can only be decimal.
fn parse_price(value: &Option<serde_json::Value>) -> Option<i32> {
    match value.as_ref()? {
        serde_json::Value::Number(n) => {
            let v = n.as_f64()?;
            if v.abs() >= 100.0 {
                Some(v.round() as i32)
            } else {
                crate::domain::american_from_decimal(v)
            }
        }
        serde_json::Value::String(s) => crate::domain::american_from_fractional(s),
        _ => None,
    }
}

/// Parse one stored comparison payload into provisional lines.
pub fn parse_payload(payload: &serde_json::Value) -> Result<Vec<ProvisionalLine>> {
    let event: ComparisonEvent = serde_json::from_value(payload.clone())
        .map_err(|e| SharplineError::Parse(format!("comparison event: {}", e)))?;
    if event.event_id.is_empty() {
        return Err(SharplineError::Parse(
            "comparison event missing event_id".into(),
        ));
    }
    Ok(event_lines(&event))
}

fn event_lines(event: &ComparisonEvent) -> Vec<ProvisionalLine> {
    let odds_timestamp = event.updated.unwrap_or_else(Utc::now);
    let mut lines = Vec::new();

    let mut push = |book: &str, quote: MarketQuote| {
        lines.push(ProvisionalLine {
            source: SOURCE_LINECOMPARE.to_string(),
            external_game_id: event.event_id.clone(),
            game_date: event.date,
            home_team: Some(event.home.clone()),
            away_team: Some(event.away.clone()),
            external_sportsbook: book.to_string(),
            quote,
            splits: VolumeSplits::default(),
            odds_timestamp,
        });
    };

    for book in &event.books {
        if let Some(ml) = &book.moneyline {
            if let (Some(home), Some(away)) = (parse_price(&ml.home), parse_price(&ml.away)) {
                push(
                    &book.name,
                    MarketQuote::Moneyline {
                        home_price: home,
                        away_price: away,
                    },
                );
            }
        }
        if let Some(spread) = &book.spread {
            if let (Some(line), Some(home), Some(away)) = (
                spread.line.and_then(Decimal::from_f64),
                parse_price(&spread.home),
                parse_price(&spread.away),
            ) {
                push(
                    &book.name,
                    MarketQuote::Spread {
                        line,
                        home_price: home,
                        away_price: away,
                    },
                );
            }
        }
        if let Some(total) = &book.total {
            if let (Some(line), Some(over), Some(under)) = (
                total.line.and_then(Decimal::from_f64),
                parse_price(&total.home),
                parse_price(&total.away),
            ) {
                push(
                    &book.name,
                    MarketQuote::Total {
                        line,
                        over_price: over,
                        under_price: under,
                    },
                );
            }
        }
    }
    lines
}

/// Collector for the odds-comparison provider
pub struct OddsComparisonCollector {
    client: SourceClient,
}

impl OddsComparisonCollector {
    pub fn new(client: SourceClient) -> Self {
        Self { client }
    }

    fn compare_url(&self) -> String {
        format!(
            "{}/compare/mlb",
            self.client.base_url().trim_end_matches('/')
        )
    }
}

#[async_trait]
impl Collector for OddsComparisonCollector {
    fn source(&self) -> &'static str {
        SOURCE_LINECOMPARE
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
            .get_json(&self.compare_url(), &query, &mut shutdown)
            .await?;

        let events = match payload.as_array() {
            Some(events) => events.clone(),
            None => {
                self.client
                    .report_parse_error(started_at, "expected a JSON array of comparison events");
                return Err(SharplineError::Parse(
                    "expected array of comparison events".into(),
                ));
            }
        };

        let fetched_at = Utc::now();
        let batch_id = Uuid::new_v4();
        let mut batch = CollectorBatch::default();
        let mut line_count = 0u32;

        for (index, event_payload) in events.into_iter().enumerate() {
            let (external_id, odds_timestamp, parse_status) =
                match serde_json::from_value::<ComparisonEvent>(event_payload.clone()) {
                    Ok(event) if !event.event_id.is_empty() => {
                        line_count += event_lines(&event).len() as u32;
                        (
                            event.event_id.clone(),
                            event.updated.unwrap_or(fetched_at),
                            ParseStatus::Ok,
                        )
                    }
                    Ok(_) => (
                        format!("missing-id-{}", index),
                        fetched_at,
                        ParseStatus::Invalid("event missing event_id".into()),
                    ),
                    Err(e) => (
                        format!("unparsed-{}", index),
                        fetched_at,
                        ParseStatus::Invalid(e.to_string()),
                    ),
                };

            batch.raw_records.push(RawRecord {
                source: SOURCE_LINECOMPARE.to_string(),
                external_id,
                fetched_at,
                odds_timestamp,
                payload: event_payload,
                batch_id,
                parse_status,
            });
        }

        info!(
            source = SOURCE_LINECOMPARE,
            events = batch.raw_records.len(),
            lines = line_count,
            "collected comparison sweep"
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
    use rust_decimal_macros::dec;

    fn event_json() -> serde_json::Value {
        serde_json::json!({
            "event_id": "cmp-31",
            "date": "2025-05-01",
            "home": "BOS",
            "away": "NYY",
            "updated": "2025-05-01T12:00:00Z",
            "books": [
                {
                    "name": "Pinnacle",
                    "moneyline": {"home": -140, "away": 120},
                    "spread": {"line": -1.5, "home": 130, "away": -150},
                    "total": {"line": 8.5, "home": -110, "away": -110}
                },
                {
                    "name": "Circa",
                    "moneyline": {"home": -138, "away": 118}
                }
            ]
        })
    }

    #[test]
    fn test_parse_comparison_event() {
        let lines = parse_payload(&event_json()).unwrap();
        // Three markets from Pinnacle, one from Circa
        assert_eq!(lines.len(), 4);
        assert_eq!(lines[1].quote.line(), Some(dec!(-1.5)));
        assert_eq!(lines[3].external_sportsbook, "Circa");
    }

    #[test]
    fn test_book_with_partial_sides_skipped() {
        let mut payload = event_json();
        payload["books"][1]["moneyline"]["away"] = serde_json::Value::Null;
        let lines = parse_payload(&payload).unwrap();
        assert_eq!(lines.len(), 3);
    }

    #[test]
    fn test_decimal_and_fractional_odds_normalized() {
        let mut payload = event_json();
        payload["books"][1]["moneyline"] = serde_json::json!({"home": 1.50, "away": "5/2"});
        let lines = parse_payload(&payload).unwrap();
        let circa = lines.iter().find(|l| l.external_sportsbook == "Circa").unwrap();
        assert_eq!(
            circa.quote,
            MarketQuote::Moneyline {
                home_price: -200,
                away_price: 150
            }
        );
    }
}
