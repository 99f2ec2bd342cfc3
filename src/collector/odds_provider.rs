//! Primary odds provider
//!
//! Fetches MLB events with per-bookmaker odds for the three markets, plus
//! line-movement history for individual events. Payloads are stored verbatim
//! per event; parsing yields one provisional line per (bookmaker, market).

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rust_decimal::prelude::FromPrimitive;
use rust_decimal::Decimal;
use serde::Deserialize;
use tracing::{info, warn};
use uuid::Uuid;

use crate::domain::{
    CollectionWindow, CollectorBatch, HealthProbe, MarketQuote, ParseStatus, ProvisionalLine,
    RawRecord, VolumeSplits,
};
use crate::error::{Result, SharplineError};
use crate::shutdown::ShutdownToken;

use super::{Collector, SourceClient, SOURCE_ODDS_API};

/// Event shape returned by the odds provider
#[derive(Debug, Deserialize, Clone, Default)]
#[serde(default)]
pub struct OddsEvent {
    pub id: String,
    pub commence_time: Option<DateTime<Utc>>,
    pub home_team: String,
    pub away_team: String,
    pub bookmakers: Vec<Bookmaker>,
}

#[derive(Debug, Deserialize, Clone, Default)]
#[serde(default)]
pub struct Bookmaker {
    pub key: String,
    pub title: String,
    pub last_update: Option<DateTime<Utc>>,
    pub markets: Vec<EventMarket>,
}

#[derive(Debug, Deserialize, Clone, Default)]
#[serde(default)]
pub struct EventMarket {
    pub key: String,
    pub last_update: Option<DateTime<Utc>>,
    pub outcomes: Vec<Outcome>,
}

#[derive(Debug, Deserialize, Clone, Default)]
#[serde(default)]
pub struct Outcome {
    pub name: String,
    pub price: Option<i32>,
    pub point: Option<f64>,
}

/// Parse one stored event payload into provisional lines.
pub fn parse_payload(payload: &serde_json::Value) -> Result<Vec<ProvisionalLine>> {
    let event: OddsEvent = serde_json::from_value(payload.clone())
        .map_err(|e| SharplineError::Parse(format!("odds event: {}", e)))?;
    if event.id.is_empty() {
        return Err(SharplineError::Parse("odds event missing id".into()));
    }
    Ok(event_lines(&event))
}

/// Extract every (bookmaker, market) quote from one event.
///
/// Partial payloads yield as many valid lines as possible; a market with a
/// missing side is skipped, not fatal.
fn event_lines(event: &OddsEvent) -> Vec<ProvisionalLine> {
    let mut lines = Vec::new();
    let game_date = event.commence_time.map(|t| t.date_naive());

    for bookmaker in &event.bookmakers {
        for market in &bookmaker.markets {
            let quote = match extract_quote(market, &event.home_team) {
                Some(quote) => quote,
                None => continue,
            };
            let odds_timestamp = market
                .last_update
                .or(bookmaker.last_update)
                .unwrap_or_else(Utc::now);

            lines.push(ProvisionalLine {
                source: SOURCE_ODDS_API.to_string(),
                external_game_id: event.id.clone(),
                game_date,
                home_team: Some(event.home_team.clone()),
                away_team: Some(event.away_team.clone()),
                external_sportsbook: bookmaker.key.clone(),
                quote,
                splits: VolumeSplits::default(),
                odds_timestamp,
            });
        }
    }
    lines
}

fn extract_quote(market: &EventMarket, home_team: &str) -> Option<MarketQuote> {
    match market.key.as_str() {
        "h2h" => {
            let mut home_price = None;
            let mut away_price = None;
            for outcome in &market.outcomes {
                if outcome.name == home_team {
                    home_price = outcome.price;
                } else {
                    away_price = outcome.price;
                }
            }
            Some(MarketQuote::Moneyline {
                home_price: home_price?,
                away_price: away_price?,
            })
        }
        "spreads" => {
            let mut line = None;
            let mut home_price = None;
            let mut away_price = None;
            for outcome in &market.outcomes {
                if outcome.name == home_team {
                    line = outcome.point.and_then(Decimal::from_f64);
                    home_price = outcome.price;
                } else {
                    away_price = outcome.price;
                }
            }
            Some(MarketQuote::Spread {
                line: line?,
                home_price: home_price?,
                away_price: away_price?,
            })
        }
        "totals" => {
            let mut line = None;
            let mut over_price = None;
            let mut under_price = None;
            for outcome in &market.outcomes {
                match outcome.name.as_str() {
                    "Over" => {
                        line = outcome.point.and_then(Decimal::from_f64);
                        over_price = outcome.price;
                    }
                    "Under" => under_price = outcome.price,
                    _ => {}
                }
            }
            Some(MarketQuote::Total {
                line: line?,
                over_price: over_price?,
                under_price: under_price?,
            })
        }
        _ => None,
    }
}

/// Latest odds timestamp across an event's lines, for the raw idempotency key.
fn event_odds_timestamp(event: &OddsEvent, fallback: DateTime<Utc>) -> DateTime<Utc> {
    event
        .bookmakers
        .iter()
        .flat_map(|b| b.markets.iter().filter_map(|m| m.last_update).chain(b.last_update))
        .max()
        .unwrap_or(fallback)
}

/// Events whose movement history is pulled per sweep
const HISTORY_EVENT_CAP: usize = 25;

/// Collector for the primary odds provider
pub struct OddsProviderCollector {
    client: SourceClient,
}

impl OddsProviderCollector {
    pub fn new(client: SourceClient) -> Self {
        Self { client }
    }

    fn odds_url(&self) -> String {
        format!(
            "{}/sports/baseball_mlb/odds",
            self.client.base_url().trim_end_matches('/')
        )
    }

    fn history_url(&self, event_id: &str) -> String {
        format!(
            "{}/sports/baseball_mlb/events/{}/odds-history",
            self.client.base_url().trim_end_matches('/'),
            event_id
        )
    }

    fn base_query(&self) -> Vec<(&'static str, String)> {
        let mut query = vec![
            ("regions", "us".to_string()),
            ("markets", "h2h,spreads,totals".to_string()),
            ("oddsFormat", "american".to_string()),
        ];
        if let Some(key) = self.client.api_key() {
            query.push(("apiKey", key.to_string()));
        }
        query
    }

    /// Fetch line-movement history for one event. Best effort: a missing
    /// history endpoint degrades to current odds only.
    pub async fn fetch_history(
        &self,
        event_id: &str,
        shutdown: &mut ShutdownToken,
    ) -> Result<Vec<RawRecord>> {
        let fetched_at = Utc::now();
        let payload = self
            .client
            .get_json(&self.history_url(event_id), &self.base_query(), shutdown)
            .await?;

        let batch_id = Uuid::new_v4();
        let snapshots = payload
            .as_array()
            .cloned()
            .unwrap_or_else(|| vec![payload.clone()]);

        Ok(snapshots
            .into_iter()
            .map(|snapshot| {
                let parse_status = match parse_payload(&snapshot) {
                    Ok(_) => ParseStatus::Ok,
                    Err(e) => ParseStatus::Invalid(e.to_string()),
                };
                let odds_timestamp = serde_json::from_value::<OddsEvent>(snapshot.clone())
                    .map(|event| event_odds_timestamp(&event, fetched_at))
                    .unwrap_or(fetched_at);
                RawRecord {
                    source: SOURCE_ODDS_API.to_string(),
                    external_id: event_id.to_string(),
                    fetched_at,
                    odds_timestamp,
                    payload: snapshot,
                    batch_id,
                    parse_status,
                }
            })
            .collect())
    }
}

#[async_trait]
impl Collector for OddsProviderCollector {
    fn source(&self) -> &'static str {
        SOURCE_ODDS_API
    }

    async fn collect(
        &self,
        window: CollectionWindow,
        mut shutdown: ShutdownToken,
    ) -> Result<CollectorBatch> {
        let started_at = Utc::now();
        let payload = self
            .client
            .get_json(&self.odds_url(), &self.base_query(), &mut shutdown)
            .await?;

        let events: Vec<serde_json::Value> = match payload.as_array() {
            Some(events) => events.clone(),
            None => {
                self.client
                    .report_parse_error(started_at, "expected a JSON array of events");
                return Err(SharplineError::Parse("expected array of events".into()));
            }
        };

        let fetched_at = Utc::now();
        let batch_id = Uuid::new_v4();
        let mut batch = CollectorBatch::default();
        let mut line_count = 0u32;

        for event_payload in events {
            let (external_id, odds_timestamp, parse_status, in_window) =
                match serde_json::from_value::<OddsEvent>(event_payload.clone()) {
                    Ok(event) if !event.id.is_empty() => {
                        let in_window = event
                            .commence_time
                            .map(|t| window.contains(t.date_naive()))
                            .unwrap_or(true);
                        line_count += event_lines(&event).len() as u32;
                        (
                            event.id.clone(),
                            event_odds_timestamp(&event, fetched_at),
                            ParseStatus::Ok,
                            in_window,
                        )
                    }
                    Ok(_) => (
                        format!("missing-id-{}", batch.raw_records.len()),
                        fetched_at,
                        ParseStatus::Invalid("event missing id".into()),
                        true,
                    ),
                    Err(e) => (
                        format!("unparsed-{}", batch.raw_records.len()),
                        fetched_at,
                        ParseStatus::Invalid(e.to_string()),
                        true,
                    ),
                };

            if !in_window {
                continue;
            }

            batch.raw_records.push(RawRecord {
                source: SOURCE_ODDS_API.to_string(),
                external_id,
                fetched_at,
                odds_timestamp,
                payload: event_payload,
                batch_id,
                parse_status,
            });
        }

        // Line-movement history per event, best effort. Deduplication against
        // the current-odds snapshots happens on the raw idempotency key.
        let event_ids: Vec<String> = batch
            .raw_records
            .iter()
            .filter(|r| r.parse_status.is_ok())
            .map(|r| r.external_id.clone())
            .collect();
        if event_ids.len() > HISTORY_EVENT_CAP {
            warn!(
                source = SOURCE_ODDS_API,
                total = event_ids.len(),
                cap = HISTORY_EVENT_CAP,
                "movement history truncated to cap"
            );
        }
        for event_id in event_ids.iter().take(HISTORY_EVENT_CAP) {
            match self.fetch_history(event_id, &mut shutdown).await {
                Ok(records) => batch.raw_records.extend(records),
                Err(SharplineError::CircuitOpen(_))
                | Err(SharplineError::RateLimited { .. })
                | Err(SharplineError::Cancelled) => break,
                Err(e) => warn!(
                    source = SOURCE_ODDS_API,
                    event = %event_id,
                    "movement history unavailable: {}",
                    e
                ),
            }
        }

        let invalid = batch
            .raw_records
            .iter()
            .filter(|r| !r.parse_status.is_ok())
            .count();
        if invalid > 0 {
            warn!(
                source = SOURCE_ODDS_API,
                invalid, "some event payloads failed structural parse"
            );
        }
        info!(
            source = SOURCE_ODDS_API,
            events = batch.raw_records.len(),
            lines = line_count,
            "collected odds sweep"
        );
        self.client.report_success(started_at, line_count);
        Ok(batch)
    }

    async fn probe(&self) -> Result<HealthProbe> {
        self.client.probe().await
    }
}
