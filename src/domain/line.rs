//! Unified betting-line records
//!
//! One `BettingLine` is a time-stamped quote for a single
//! (canonical game, sportsbook, market) key. The three markets each have
//! their own quote shape; `MarketQuote` is the discriminated union covering
//! "any market".

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::hash::{Hash, Hasher};

/// Sanity bound on American odds accepted anywhere in the pipeline
pub const AMERICAN_ODDS_BOUND: i32 = 100_000;

/// One American-odds tick, used by movement detection
pub const PRICE_TICK: i32 = 5;

/// Betting market
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Market {
    Moneyline,
    Spread,
    Total,
}

impl Market {
    pub fn as_str(&self) -> &'static str {
        match self {
            Market::Moneyline => "moneyline",
            Market::Spread => "spread",
            Market::Total => "total",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "moneyline" | "h2h" => Some(Market::Moneyline),
            "spread" | "spreads" => Some(Market::Spread),
            "total" | "totals" => Some(Market::Total),
            _ => None,
        }
    }
}

impl std::fmt::Display for Market {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Market-specific quote fields
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "market", rename_all = "snake_case")]
pub enum MarketQuote {
    Moneyline {
        home_price: i32,
        away_price: i32,
    },
    Spread {
        /// Handicap on the home side, half-point granularity
        line: Decimal,
        home_price: i32,
        away_price: i32,
    },
    Total {
        line: Decimal,
        over_price: i32,
        under_price: i32,
    },
}

impl MarketQuote {
    pub fn market(&self) -> Market {
        match self {
            MarketQuote::Moneyline { .. } => Market::Moneyline,
            MarketQuote::Spread { .. } => Market::Spread,
            MarketQuote::Total { .. } => Market::Total,
        }
    }

    /// Price on the home (or over) side
    pub fn side_a_price(&self) -> i32 {
        match self {
            MarketQuote::Moneyline { home_price, .. } => *home_price,
            MarketQuote::Spread { home_price, .. } => *home_price,
            MarketQuote::Total { over_price, .. } => *over_price,
        }
    }

    /// Price on the away (or under) side
    pub fn side_b_price(&self) -> i32 {
        match self {
            MarketQuote::Moneyline { away_price, .. } => *away_price,
            MarketQuote::Spread { away_price, .. } => *away_price,
            MarketQuote::Total { under_price, .. } => *under_price,
        }
    }

    /// Handicap or total line, when the market has one
    pub fn line(&self) -> Option<Decimal> {
        match self {
            MarketQuote::Moneyline { .. } => None,
            MarketQuote::Spread { line, .. } | MarketQuote::Total { line, .. } => Some(*line),
        }
    }

    /// All prices within the accepted sanity range
    pub fn prices_in_range(&self) -> bool {
        let (a, b) = (self.side_a_price(), self.side_b_price());
        a.abs() <= AMERICAN_ODDS_BOUND && b.abs() <= AMERICAN_ODDS_BOUND
    }
}

/// Convert decimal odds to an American integer price.
///
/// Decimal 2.00 is the even-money pivot: above it the American price is
/// positive, below it negative. Values at or below 1.0 carry no payout and
/// are rejected.
pub fn american_from_decimal(decimal: f64) -> Option<i32> {
    if !decimal.is_finite() || decimal <= 1.0 {
        return None;
    }
    let price = if decimal >= 2.0 {
        (decimal - 1.0) * 100.0
    } else {
        -100.0 / (decimal - 1.0)
    };
    let rounded = price.round();
    if rounded.abs() > AMERICAN_ODDS_BOUND as f64 {
        return None;
    }
    Some(rounded as i32)
}

/// Convert fractional odds ("5/2", "1/4") to an American integer price.
pub fn american_from_fractional(raw: &str) -> Option<i32> {
    let (num, den) = raw.trim().split_once('/')?;
    let num: f64 = num.trim().parse().ok()?;
    let den: f64 = den.trim().parse().ok()?;
    if den <= 0.0 || num <= 0.0 {
        return None;
    }
    american_from_decimal(num / den + 1.0)
}

/// Which side of a market a tag or split refers to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MarketSide {
    /// Home, or Over for totals
    A,
    /// Away, or Under for totals
    B,
}

/// Public betting volume splits for one line; all fields nullable
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct VolumeSplits {
    /// Ticket percentage on the home/over side, [0, 100]
    pub side_a_bets_pct: Option<f64>,
    /// Money percentage on the home/over side, [0, 100]
    pub side_a_money_pct: Option<f64>,
    pub side_b_bets_pct: Option<f64>,
    pub side_b_money_pct: Option<f64>,
}

impl VolumeSplits {
    /// Both percentage pairs present, making sharp detection possible
    pub fn is_complete(&self) -> bool {
        self.side_a_bets_pct.is_some()
            && self.side_a_money_pct.is_some()
            && self.side_b_bets_pct.is_some()
            && self.side_b_money_pct.is_some()
    }

    pub fn filled_count(&self) -> usize {
        [
            self.side_a_bets_pct,
            self.side_a_money_pct,
            self.side_b_bets_pct,
            self.side_b_money_pct,
        ]
        .iter()
        .filter(|v| v.is_some())
        .count()
    }

    /// Paired sides must sum to 100 within one point when both are present.
    pub fn pairs_consistent(&self) -> bool {
        let pair_ok = |a: Option<f64>, b: Option<f64>| match (a, b) {
            (Some(a), Some(b)) => (a + b - 100.0).abs() <= 1.0,
            _ => true,
        };
        pair_ok(self.side_a_bets_pct, self.side_b_bets_pct)
            && pair_ok(self.side_a_money_pct, self.side_b_money_pct)
    }
}

/// Sharp-action tag derived from volume divergence
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SharpAction {
    HeavyHome,
    HeavyAway,
    HeavyOver,
    HeavyUnder,
    #[default]
    None,
}

impl SharpAction {
    pub fn as_str(&self) -> &'static str {
        match self {
            SharpAction::HeavyHome => "heavy_home",
            SharpAction::HeavyAway => "heavy_away",
            SharpAction::HeavyOver => "heavy_over",
            SharpAction::HeavyUnder => "heavy_under",
            SharpAction::None => "none",
        }
    }

    /// The tag for sharp money on a given side of a given market
    pub fn for_side(market: Market, side: MarketSide) -> Self {
        match (market, side) {
            (Market::Total, MarketSide::A) => SharpAction::HeavyOver,
            (Market::Total, MarketSide::B) => SharpAction::HeavyUnder,
            (_, MarketSide::A) => SharpAction::HeavyHome,
            (_, MarketSide::B) => SharpAction::HeavyAway,
        }
    }
}

/// Quality tier assigned to every unified line
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum DataQuality {
    Poor,
    Low,
    Medium,
    High,
}

impl DataQuality {
    pub fn as_str(&self) -> &'static str {
        match self {
            DataQuality::High => "HIGH",
            DataQuality::Medium => "MEDIUM",
            DataQuality::Low => "LOW",
            DataQuality::Poor => "POOR",
        }
    }
}

impl std::fmt::Display for DataQuality {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Idempotency key: one row per (game, sportsbook, market, timestamp)
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct LineKey {
    pub game_id: String,
    pub sportsbook_id: i32,
    pub market: Market,
    pub odds_timestamp: DateTime<Utc>,
}

impl LineKey {
    /// Partition key: per-(game, sportsbook, market) processing is serial,
    /// so the hash deliberately excludes the timestamp.
    pub fn partition(&self, buckets: usize) -> usize {
        let mut hasher = std::collections::hash_map::DefaultHasher::new();
        self.game_id.hash(&mut hasher);
        self.sportsbook_id.hash(&mut hasher);
        self.market.hash(&mut hasher);
        (hasher.finish() as usize) % buckets.max(1)
    }
}

/// A unified, per-market betting line
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BettingLine {
    pub game_id: String,
    pub sportsbook_id: i32,
    pub quote: MarketQuote,
    pub source: String,
    pub source_external_id: String,
    pub odds_timestamp: DateTime<Utc>,
    pub is_opening: bool,
    pub is_closing: bool,
    pub splits: VolumeSplits,
    pub sharp_action: SharpAction,
    pub public_fade: bool,
    pub rlm: bool,
    pub steam: bool,
    /// filled_fields / expected_fields for this market, [0, 1]
    pub completeness: f64,
    /// Static per-source reliability, [0, 1]
    pub reliability: f64,
    pub quality: DataQuality,
}

impl BettingLine {
    pub fn key(&self) -> LineKey {
        LineKey {
            game_id: self.game_id.clone(),
            sportsbook_id: self.sportsbook_id,
            market: self.quote.market(),
            odds_timestamp: self.odds_timestamp,
        }
    }

    pub fn market(&self) -> Market {
        self.quote.market()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    fn quote() -> MarketQuote {
        MarketQuote::Spread {
            line: dec!(-1.5),
            home_price: -110,
            away_price: -110,
        }
    }

    #[test]
    fn test_market_parse_aliases() {
        assert_eq!(Market::parse("h2h"), Some(Market::Moneyline));
        assert_eq!(Market::parse("spreads"), Some(Market::Spread));
        assert_eq!(Market::parse("runline"), None);
    }

    #[test]
    fn test_quote_sides() {
        let q = quote();
        assert_eq!(q.market(), Market::Spread);
        assert_eq!(q.side_a_price(), -110);
        assert_eq!(q.line(), Some(dec!(-1.5)));

        let ml = MarketQuote::Moneyline {
            home_price: -140,
            away_price: 120,
        };
        assert_eq!(ml.line(), None);
        assert_eq!(ml.side_b_price(), 120);
    }

    #[test]
    fn test_odds_bound() {
        let q = MarketQuote::Moneyline {
            home_price: -100_000,
            away_price: 100_000,
        };
        assert!(q.prices_in_range());
        let q = MarketQuote::Moneyline {
            home_price: -100_001,
            away_price: 100,
        };
        assert!(!q.prices_in_range());
    }

    #[test]
    fn test_splits_pair_consistency() {
        let ok = VolumeSplits {
            side_a_bets_pct: Some(38.0),
            side_a_money_pct: Some(68.0),
            side_b_bets_pct: Some(62.0),
            side_b_money_pct: Some(32.0),
        };
        assert!(ok.is_complete());
        assert!(ok.pairs_consistent());

        let off = VolumeSplits {
            side_a_bets_pct: Some(38.0),
            side_b_bets_pct: Some(60.0),
            ..Default::default()
        };
        assert!(!off.pairs_consistent());

        // Missing sides never fail the consistency check
        assert!(VolumeSplits::default().pairs_consistent());
    }

    #[test]
    fn test_sharp_tag_for_side() {
        assert_eq!(
            SharpAction::for_side(Market::Moneyline, MarketSide::A),
            SharpAction::HeavyHome
        );
        assert_eq!(
            SharpAction::for_side(Market::Total, MarketSide::B),
            SharpAction::HeavyUnder
        );
    }

    #[test]
    fn test_decimal_to_american() {
        assert_eq!(american_from_decimal(2.50), Some(150));
        assert_eq!(american_from_decimal(1.50), Some(-200));
        assert_eq!(american_from_decimal(2.00), Some(100));
        assert_eq!(american_from_decimal(1.9091), Some(-110));
        assert_eq!(american_from_decimal(1.0), None);
        assert_eq!(american_from_decimal(0.0), None);
    }

    #[test]
    fn test_fractional_to_american() {
        assert_eq!(american_from_fractional("5/2"), Some(150));
        assert_eq!(american_from_fractional("1/2"), Some(-200));
        assert_eq!(american_from_fractional("1/1"), Some(100));
        assert_eq!(american_from_fractional("nonsense"), None);
        assert_eq!(american_from_fractional("5/0"), None);
    }

    #[test]
    fn test_quality_ordering() {
        assert!(DataQuality::High > DataQuality::Medium);
        assert!(DataQuality::Low > DataQuality::Poor);
    }

    #[test]
    fn test_partition_stable_across_timestamps() {
        let base = LineKey {
            game_id: "2025-05-01-NYY-BOS".into(),
            sportsbook_id: 15,
            market: Market::Moneyline,
            odds_timestamp: Utc::now(),
        };
        let later = LineKey {
            odds_timestamp: base.odds_timestamp + chrono::Duration::minutes(7),
            ..base.clone()
        };
        assert_eq!(base.partition(8), later.partition(8));
    }
}
