//! Quality scoring for unified lines
//!
//! Pure functions so the same inputs always produce the same bucket; the
//! staging zone applies them to every accepted record.

use crate::domain::{DataQuality, MarketQuote, VolumeSplits};

/// Static per-source reliability table
pub fn source_reliability(source: &str) -> f64 {
    match source {
        "mlb_stats" => 0.98,
        "odds_api" => 0.95,
        "linecompare" => 0.85,
        "betsplits" => 0.80,
        "wagerpct" => 0.75,
        _ => 0.50,
    }
}

/// Fraction of expected fields that are filled for this market.
///
/// Base fields (quote prices, line when the market has one, timestamp,
/// sportsbook identifier) are always expected. Volume-split fields count
/// toward the expectation only when the source supplied at least one of
/// them, so price-only feeds are not penalized for a capability they never
/// advertise.
pub fn completeness(quote: &MarketQuote, splits: &VolumeSplits, has_sportsbook: bool) -> f64 {
    // prices + optional line + timestamp
    let quote_fields = match quote {
        MarketQuote::Moneyline { .. } => 2,
        MarketQuote::Spread { .. } | MarketQuote::Total { .. } => 3,
    };
    let mut expected = quote_fields + 2; // + odds_timestamp + sportsbook identifier
    let mut filled = quote_fields + 1; // parsed quotes always carry a timestamp
    if has_sportsbook {
        filled += 1;
    }

    let split_count = splits.filled_count();
    if split_count > 0 {
        expected += 4;
        filled += split_count;
    }

    filled as f64 / expected as f64
}

/// Bucketize completeness and reliability into a quality tier.
pub fn bucketize(completeness: f64, reliability: f64, has_sportsbook: bool) -> DataQuality {
    if completeness >= 0.9 && reliability >= 0.9 && has_sportsbook {
        DataQuality::High
    } else if completeness >= 0.6 && reliability >= 0.6 {
        DataQuality::Medium
    } else if completeness >= 0.3 || reliability >= 0.3 {
        DataQuality::Low
    } else {
        DataQuality::Poor
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    fn moneyline() -> MarketQuote {
        MarketQuote::Moneyline {
            home_price: -140,
            away_price: 120,
        }
    }

    #[test]
    fn test_price_only_feed_is_complete() {
        let c = completeness(&moneyline(), &VolumeSplits::default(), true);
        assert_relative_eq!(c, 1.0);
        assert_eq!(
            bucketize(c, source_reliability("odds_api"), true),
            DataQuality::High
        );
    }

    #[test]
    fn test_partial_splits_reduce_completeness() {
        let splits = VolumeSplits {
            side_a_bets_pct: Some(40.0),
            side_a_money_pct: Some(60.0),
            ..Default::default()
        };
        // 2 prices + timestamp + sportsbook + 2 of 4 splits = 6 / 8
        let c = completeness(&moneyline(), &splits, true);
        assert_relative_eq!(c, 0.75);
    }

    #[test]
    fn test_full_splits_restore_completeness() {
        let splits = VolumeSplits {
            side_a_bets_pct: Some(40.0),
            side_a_money_pct: Some(60.0),
            side_b_bets_pct: Some(60.0),
            side_b_money_pct: Some(40.0),
        };
        let c = completeness(&moneyline(), &splits, true);
        assert_relative_eq!(c, 1.0);
    }

    #[test]
    fn test_missing_sportsbook_blocks_high() {
        let c = completeness(&moneyline(), &VolumeSplits::default(), false);
        assert_eq!(bucketize(c, 0.95, false), DataQuality::Medium);
    }

    #[test]
    fn test_unknown_source_reliability_floor() {
        assert_relative_eq!(source_reliability("mystery_feed"), 0.50);
        assert_eq!(bucketize(1.0, 0.50, true), DataQuality::Low);
    }

    #[test]
    fn test_poor_bucket() {
        assert_eq!(bucketize(0.2, 0.2, false), DataQuality::Poor);
    }

    #[test]
    fn test_bucketize_is_pure() {
        for _ in 0..3 {
            assert_eq!(bucketize(0.95, 0.95, true), DataQuality::High);
        }
    }
}
