//! Sharp-action detection from volume splits
//!
//! Professional money shows up as a large money-share from a small
//! bet-share. Detection needs both percentages on at least one side.

use crate::domain::{Market, MarketSide, SharpAction, VolumeSplits};

/// Money-vs-bets divergence threshold, in percentage points
pub const DIVERGENCE_THRESHOLD: f64 = 15.0;

/// Public side must carry at least this ticket share to qualify for a fade
pub const PUBLIC_FADE_BETS_PCT: f64 = 75.0;

/// ...while attracting less than this money share
pub const PUBLIC_FADE_MONEY_PCT: f64 = 60.0;

/// Outcome of sharp-action evaluation for one line
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SharpSignal {
    pub action: SharpAction,
    /// money_pct − bets_pct on the flagged side, when a side was flagged
    pub divergence: Option<f64>,
    pub public_fade: bool,
}

impl SharpSignal {
    pub fn none() -> Self {
        Self {
            action: SharpAction::None,
            divergence: None,
            public_fade: false,
        }
    }
}

/// Divergence on one side: how much more money than tickets it attracts.
fn side_divergence(bets_pct: Option<f64>, money_pct: Option<f64>) -> Option<f64> {
    match (bets_pct, money_pct) {
        (Some(bets), Some(money)) => Some(money - bets),
        _ => None,
    }
}

/// Evaluate sharp action for a line's volume splits.
pub fn detect(market: Market, splits: &VolumeSplits) -> SharpSignal {
    let div_a = side_divergence(splits.side_a_bets_pct, splits.side_a_money_pct);
    let div_b = side_divergence(splits.side_b_bets_pct, splits.side_b_money_pct);

    // The heavy side is the one where money outpaces tickets.
    let mut best: Option<(MarketSide, f64)> = None;
    for (side, div) in [(MarketSide::A, div_a), (MarketSide::B, div_b)] {
        if let Some(div) = div {
            if div.abs() >= DIVERGENCE_THRESHOLD && div > 0.0 {
                match best {
                    Some((_, existing)) if existing >= div => {}
                    _ => best = Some((side, div)),
                }
            }
        }
    }

    let (action, divergence) = match best {
        Some((side, div)) => (SharpAction::for_side(market, side), Some(div)),
        None => (SharpAction::None, None),
    };

    SharpSignal {
        action,
        divergence,
        public_fade: is_public_fade(splits),
    }
}

/// One side carries the public tickets but not the money.
fn is_public_fade(splits: &VolumeSplits) -> bool {
    let fade = |bets: Option<f64>, money: Option<f64>| match (bets, money) {
        (Some(bets), Some(money)) => bets >= PUBLIC_FADE_BETS_PCT && money < PUBLIC_FADE_MONEY_PCT,
        _ => false,
    };
    fade(splits.side_a_bets_pct, splits.side_a_money_pct)
        || fade(splits.side_b_bets_pct, splits.side_b_money_pct)
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    fn splits(a_bets: f64, a_money: f64, b_bets: f64, b_money: f64) -> VolumeSplits {
        VolumeSplits {
            side_a_bets_pct: Some(a_bets),
            side_a_money_pct: Some(a_money),
            side_b_bets_pct: Some(b_bets),
            side_b_money_pct: Some(b_money),
        }
    }

    #[test]
    fn test_heavy_side_a_detected() {
        // 38% of bets carrying 68% of money on the home side
        let signal = detect(Market::Moneyline, &splits(38.0, 68.0, 62.0, 32.0));
        assert_eq!(signal.action, SharpAction::HeavyHome);
        assert_relative_eq!(signal.divergence.unwrap(), 30.0);
    }

    #[test]
    fn test_heavy_under_on_totals() {
        let signal = detect(Market::Total, &splits(70.0, 40.0, 30.0, 60.0));
        assert_eq!(signal.action, SharpAction::HeavyUnder);
        assert_relative_eq!(signal.divergence.unwrap(), 30.0);
    }

    #[test]
    fn test_below_threshold_is_none() {
        let signal = detect(Market::Moneyline, &splits(45.0, 55.0, 55.0, 45.0));
        assert_eq!(signal.action, SharpAction::None);
        assert!(signal.divergence.is_none());
    }

    #[test]
    fn test_exact_threshold_fires() {
        let signal = detect(Market::Spread, &splits(40.0, 55.0, 60.0, 45.0));
        assert_eq!(signal.action, SharpAction::HeavyHome);
        assert_relative_eq!(signal.divergence.unwrap(), 15.0);
    }

    #[test]
    fn test_missing_percentages_never_fire() {
        let partial = VolumeSplits {
            side_a_bets_pct: Some(38.0),
            ..Default::default()
        };
        let signal = detect(Market::Moneyline, &partial);
        assert_eq!(signal.action, SharpAction::None);
        assert!(!signal.public_fade);
    }

    #[test]
    fn test_public_fade() {
        // Public hammers the favorite on tickets but the money stays away.
        let signal = detect(Market::Moneyline, &splits(78.0, 55.0, 22.0, 45.0));
        assert!(signal.public_fade);
        assert_eq!(signal.action, SharpAction::None);
    }

    #[test]
    fn test_public_fade_requires_both_conditions() {
        assert!(!detect(Market::Moneyline, &splits(78.0, 65.0, 22.0, 35.0)).public_fade);
        assert!(!detect(Market::Moneyline, &splits(70.0, 55.0, 30.0, 45.0)).public_fade);
    }
}
