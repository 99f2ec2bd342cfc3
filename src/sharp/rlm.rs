//! Reverse line movement
//!
//! RLM fires when the price moves against the side holding the majority of
//! bets: the book sharpens the quote on the public side, which is evidence
//! the other side of the ledger is professional.

use chrono::Duration;
use rust_decimal::Decimal;
use rust_decimal_macros::dec;

use crate::domain::{BettingLine, MarketQuote, MarketSide, PRICE_TICK};

/// Minimum line movement that counts as one tick
pub const LINE_TICK: Decimal = dec!(0.5);

/// Side holding the majority of tickets, when the splits say so.
fn majority_side(line: &BettingLine) -> Option<MarketSide> {
    let a = line.splits.side_a_bets_pct?;
    let b = line.splits.side_b_bets_pct?;
    if a > 50.0 && a > b {
        Some(MarketSide::A)
    } else if b > 50.0 && b > a {
        Some(MarketSide::B)
    } else {
        None
    }
}

fn side_price(quote: &MarketQuote, side: MarketSide) -> i32 {
    match side {
        MarketSide::A => quote.side_a_price(),
        MarketSide::B => quote.side_b_price(),
    }
}

/// Did the quote move against the majority side by at least one tick?
///
/// "Against" means the majority side's price got shorter, or the handicap
/// moved so the majority side needs more: home lays more points, the over
/// needs more runs.
fn moved_against(majority: MarketSide, prev: &MarketQuote, curr: &MarketQuote) -> bool {
    let price_delta = side_price(curr, majority) - side_price(prev, majority);
    if price_delta <= -PRICE_TICK {
        return true;
    }

    match (prev, curr) {
        (MarketQuote::Spread { line: prev, .. }, MarketQuote::Spread { line: curr, .. }) => {
            match majority {
                MarketSide::A => *curr <= *prev - LINE_TICK,
                MarketSide::B => *curr >= *prev + LINE_TICK,
            }
        }
        (MarketQuote::Total { line: prev, .. }, MarketQuote::Total { line: curr, .. }) => {
            match majority {
                MarketSide::A => *curr >= *prev + LINE_TICK,
                MarketSide::B => *curr <= *prev - LINE_TICK,
            }
        }
        _ => false,
    }
}

/// Flag reverse line movement across an ordered per-key sequence.
///
/// `lines` must already be in canonical order (odds_timestamp ascending,
/// reliability descending). Each record is compared against every earlier
/// record inside the rolling window; the later record carries the flag.
pub fn flag_rlm(lines: &mut [BettingLine], window: Duration) {
    for i in 1..lines.len() {
        let mut flagged = false;
        for j in (0..i).rev() {
            let age = lines[i].odds_timestamp - lines[j].odds_timestamp;
            if age > window {
                break;
            }
            let majority = majority_side(&lines[j]).or_else(|| majority_side(&lines[i]));
            if let Some(majority) = majority {
                if moved_against(majority, &lines[j].quote, &lines[i].quote) {
                    flagged = true;
                    break;
                }
            }
        }
        if flagged {
            lines[i].rlm = true;
        }
    }
}
