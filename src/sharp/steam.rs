//! Steam detection
//!
//! A steam move is a coordinated, rapid move in the same direction across
//! many sportsbooks for the same (game, market). Detection runs over the
//! canonical ordered sequence per book and compares movement directions
//! inside a short rolling window.

use chrono::{DateTime, Duration, Utc};
use std::collections::{HashMap, HashSet};

use crate::domain::{BettingLine, MarketQuote, PRICE_TICK};

use super::rlm::LINE_TICK;

/// Direction of one book's quote change, when it moved at least a tick.
fn movement_direction(prev: &MarketQuote, curr: &MarketQuote) -> Option<i8> {
    match (prev.line(), curr.line()) {
        (Some(prev_line), Some(curr_line)) => {
            let delta = curr_line - prev_line;
            if delta >= LINE_TICK {
                return Some(1);
            }
            if delta <= -LINE_TICK {
                return Some(-1);
            }
        }
        _ => {}
    }

    let delta = curr.side_a_price() - prev.side_a_price();
    if delta >= PRICE_TICK {
        Some(1)
    } else if delta <= -PRICE_TICK {
        Some(-1)
    } else {
        None
    }
}

#[derive(Debug, Clone, Copy)]
struct Movement {
    index: usize,
    sportsbook_id: i32,
    at: DateTime<Utc>,
    span: Duration,
    direction: i8,
}

/// Flag steam across all books quoting one (game, market).
///
/// `lines` is the combined sequence for the key in canonical order. A record
/// is flagged when it is the endpoint of a movement and, inside the trailing
/// window, at least `min_book_ratio` of the books active in that window
/// moved the same direction.
pub fn flag_steam(lines: &mut [BettingLine], window: Duration, min_book_ratio: f64) {
    // Per-book ordered index lists
    let mut by_book: HashMap<i32, Vec<usize>> = HashMap::new();
    for (i, line) in lines.iter().enumerate() {
        by_book.entry(line.sportsbook_id).or_default().push(i);
    }

    let mut movements: Vec<Movement> = Vec::new();
    for indices in by_book.values() {
        for pair in indices.windows(2) {
            let (prev, curr) = (pair[0], pair[1]);
            if let Some(direction) = movement_direction(&lines[prev].quote, &lines[curr].quote) {
                movements.push(Movement {
                    index: curr,
                    sportsbook_id: lines[curr].sportsbook_id,
                    at: lines[curr].odds_timestamp,
                    span: lines[curr].odds_timestamp - lines[prev].odds_timestamp,
                    direction,
                });
            }
        }
    }

    // Only moves completed inside the window count as rapid
    let movements: Vec<Movement> = movements.into_iter().filter(|m| m.span <= window).collect();

    let mut flagged: HashSet<usize> = HashSet::new();
    for movement in &movements {
        let window_start = movement.at - window;

        // Books with any quote inside the window are "active"
        let active: HashSet<i32> = lines
            .iter()
            .filter(|l| l.odds_timestamp > window_start && l.odds_timestamp <= movement.at)
            .map(|l| l.sportsbook_id)
            .collect();
        if active.len() < 2 {
            continue;
        }

        let same_direction: HashSet<i32> = movements
            .iter()
            .filter(|m| {
                m.at > window_start && m.at <= movement.at && m.direction == movement.direction
            })
            .map(|m| m.sportsbook_id)
            .collect();

        if same_direction.len() >= 2
            && same_direction.len() as f64 / active.len() as f64 >= min_book_ratio
        {
            for m in movements.iter().filter(|m| {
                m.at > window_start && m.at <= movement.at && m.direction == movement.direction
            }) {
                flagged.insert(m.index);
            }
        }
    }

    for index in flagged {
        lines[index].steam = true;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{DataQuality, SharpAction, VolumeSplits};
    use chrono::TimeZone;

    fn line(book: i32, minute: u32, second: u32, home_price: i32) -> BettingLine {
        BettingLine {
            game_id: "2025-05-01-NYY-BOS".into(),
            sportsbook_id: book,
            quote: MarketQuote::Moneyline {
                home_price,
                away_price: -home_price,
            },
            source: "odds_api".into(),
            source_external_id: "777".into(),
            odds_timestamp: Utc
                .with_ymd_and_hms(2025, 5, 1, 12, minute, second)
                .unwrap(),
            is_opening: false,
            is_closing: false,
            splits: VolumeSplits::default(),
            sharp_action: SharpAction::None,
            public_fade: false,
            rlm: false,
            steam: false,
            completeness: 1.0,
            reliability: 0.95,
            quality: DataQuality::High,
        }
    }

    #[test]
    fn test_steam_when_all_books_move_together() {
        let mut lines = vec![
            line(1, 0, 0, -140),
            line(2, 0, 10, -140),
            line(3, 0, 20, -140),
            line(1, 2, 0, -150),
            line(2, 2, 30, -150),
            line(3, 3, 0, -150),
        ];
        flag_steam(&mut lines, Duration::minutes(5), 0.70);
        assert!(lines[3].steam);
        assert!(lines[4].steam);
        assert!(lines[5].steam);
        assert!(!lines[0].steam);
    }

    #[test]
    fn test_no_steam_when_one_book_moves() {
        let mut lines = vec![
            line(1, 0, 0, -140),
            line(2, 0, 10, -140),
            line(3, 0, 20, -140),
            line(1, 2, 0, -150),
        ];
        flag_steam(&mut lines, Duration::minutes(5), 0.70);
        assert!(lines.iter().all(|l| !l.steam));
    }

    #[test]
    fn test_no_steam_when_directions_split() {
        let mut lines = vec![
            line(1, 0, 0, -140),
            line(2, 0, 10, -140),
            line(1, 2, 0, -150),
            line(2, 2, 30, -130),
        ];
        flag_steam(&mut lines, Duration::minutes(5), 0.70);
        // One of two active books per direction: 50% < 70%
        assert!(lines.iter().all(|l| !l.steam));
    }

    #[test]
    fn test_no_steam_when_moves_are_slow() {
        let mut lines = vec![
            line(1, 0, 0, -140),
            line(2, 0, 10, -140),
            line(1, 10, 0, -150),
            line(2, 20, 0, -150),
        ];
        flag_steam(&mut lines, Duration::minutes(5), 0.70);
        assert!(lines.iter().all(|l| !l.steam));
    }
}
