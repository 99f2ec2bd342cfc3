//! Curated zone
//!
//! Produces analysis-ready lines: enforces one row per
//! (game, sportsbook, market, odds_timestamp) across all sources, orders
//! movement sequences canonically, and applies the sharp-action, reverse
//! line movement and steam detectors. Never writes back to raw or staging.

use chrono::Duration;
use std::collections::HashMap;
use tracing::info;

use crate::config::PipelineConfig;
use crate::domain::{BettingLine, LineKey, Market, ZoneMetrics};
use crate::error::RejectReason;
use crate::sharp;

/// Output of one curated pass
#[derive(Debug, Default)]
pub struct CuratedOutput {
    pub lines: Vec<BettingLine>,
    pub metrics: ZoneMetrics,
}

/// Curated zone processor
pub struct CuratedZone {
    config: PipelineConfig,
}

impl CuratedZone {
    pub fn new(config: PipelineConfig) -> Self {
        Self { config }
    }

    /// Run the curated pass over staging-accepted lines.
    pub fn process(&self, lines: Vec<BettingLine>) -> CuratedOutput {
        let mut output = CuratedOutput::default();
        output.metrics.records_in = lines.len() as u64;

        // Cross-source dedup: keep the highest quality tier, then the highest
        // reliability, per idempotency key.
        let mut by_key: HashMap<LineKey, BettingLine> = HashMap::new();
        for line in lines {
            let key = line.key();
            match by_key.get(&key) {
                None => {
                    by_key.insert(key, line);
                }
                Some(existing) => {
                    let wins = (line.quality, line.reliability)
                        > (existing.quality, existing.reliability);
                    if wins {
                        by_key.insert(key, line);
                    }
                    output.metrics.record_rejection(RejectReason::Duplicate);
                }
            }
        }

        // Partition into per-(game, sportsbook, market) movement sequences in
        // canonical order: timestamp asc, reliability desc, ingestion order.
        let mut sequences: HashMap<(String, i32, Market), Vec<BettingLine>> = HashMap::new();
        for (_, line) in by_key {
            sequences
                .entry((line.game_id.clone(), line.sportsbook_id, line.market()))
                .or_default()
                .push(line);
        }

        let rlm_window = Duration::seconds(self.config.rlm_window_s as i64);
        for sequence in sequences.values_mut() {
            sequence.sort_by(|a, b| {
                a.odds_timestamp.cmp(&b.odds_timestamp).then(
                    b.reliability
                        .partial_cmp(&a.reliability)
                        .unwrap_or(std::cmp::Ordering::Equal),
                )
            });

            // Opening and closing snapshots per key
            if let Some(first) = sequence.first_mut() {
                first.is_opening = true;
            }
            if let Some(last) = sequence.last_mut() {
                last.is_closing = true;
            }

            for line in sequence.iter_mut() {
                let signal = sharp::detect(line.market(), &line.splits);
                line.sharp_action = signal.action;
                line.public_fade = signal.public_fade;
            }

            sharp::flag_rlm(sequence, rlm_window);
        }

        // Steam needs all books for a (game, market) together
        let mut by_game_market: HashMap<(String, Market), Vec<BettingLine>> = HashMap::new();
        for sequence in sequences.into_values() {
            for line in sequence {
                by_game_market
                    .entry((line.game_id.clone(), line.market()))
                    .or_default()
                    .push(line);
            }
        }

        let steam_window = Duration::seconds(self.config.steam_window_s as i64);
        for group in by_game_market.values_mut() {
            group.sort_by(|a, b| a.odds_timestamp.cmp(&b.odds_timestamp));
            sharp::flag_steam(group, steam_window, self.config.steam_min_book_ratio);
        }

        output.lines = by_game_market.into_values().flatten().collect();
        output
            .lines
            .sort_by(|a, b| a.odds_timestamp.cmp(&b.odds_timestamp));
        output.metrics.records_out = output.lines.len() as u64;
        for line in &output.lines {
            output.metrics.record_quality(line.quality);
        }

        info!(
            lines = output.lines.len(),
            duplicates = output.metrics.rejected.get("duplicate").copied().unwrap_or(0),
            "curated pass complete"
        );
        output
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{DataQuality, MarketQuote, SharpAction, VolumeSplits};
    use chrono::{TimeZone, Timelike, Utc};

    fn line(
        book: i32,
        minute: u32,
        home_price: i32,
        source: &str,
        reliability: f64,
    ) -> BettingLine {
        BettingLine {
            game_id: "2025-05-01-NYY-BOS".into(),
            sportsbook_id: book,
            quote: MarketQuote::Moneyline {
                home_price,
                away_price: -home_price,
            },
            source: source.into(),
            source_external_id: "x".into(),
            odds_timestamp: Utc.with_ymd_and_hms(2025, 5, 1, 12, minute, 0).unwrap(),
            is_opening: false,
            is_closing: false,
            splits: VolumeSplits::default(),
            sharp_action: SharpAction::None,
            public_fade: false,
            rlm: false,
            steam: false,
            completeness: 1.0,
            reliability,
            quality: DataQuality::High,
        }
    }

    fn zone() -> CuratedZone {
        CuratedZone::new(PipelineConfig::default())
    }

    #[test]
    fn test_cross_source_dedup_keeps_best() {
        let mut weaker = line(7, 0, -138, "linecompare", 0.85);
        weaker.quality = DataQuality::Medium;
        let stronger = line(7, 0, -140, "odds_api", 0.95);

        let output = zone().process(vec![weaker, stronger]);
        assert_eq!(output.lines.len(), 1);
        assert_eq!(output.lines[0].source, "odds_api");
        assert_eq!(output.metrics.rejected.get("duplicate"), Some(&1));
    }

    #[test]
    fn test_opening_closing_flags() {
        let output = zone().process(vec![
            line(7, 0, -140, "odds_api", 0.95),
            line(7, 30, -150, "odds_api", 0.95),
            line(7, 59, -155, "odds_api", 0.95),
        ]);
        let mut lines = output.lines;
        lines.sort_by_key(|l| l.odds_timestamp);
        assert!(lines[0].is_opening);
        assert!(!lines[0].is_closing);
        assert!(lines[2].is_closing);
    }

    #[test]
    fn test_sharp_action_applied() {
        let mut sharp_line = line(7, 0, -140, "betsplits", 0.80);
        sharp_line.splits = VolumeSplits {
            side_a_bets_pct: Some(38.0),
            side_a_money_pct: Some(68.0),
            side_b_bets_pct: Some(62.0),
            side_b_money_pct: Some(32.0),
        };

        let output = zone().process(vec![sharp_line]);
        assert_eq!(output.lines[0].sharp_action, SharpAction::HeavyHome);
    }

    #[test]
    fn test_rlm_flagged_within_sequence() {
        let splits = VolumeSplits {
            side_a_bets_pct: Some(70.0),
            side_b_bets_pct: Some(30.0),
            ..Default::default()
        };
        let mut first = line(7, 0, -150, "odds_api", 0.95);
        first.splits = splits;
        let mut second = line(7, 30, -165, "odds_api", 0.95);
        second.splits = splits;

        let output = zone().process(vec![first, second]);
        let later = output
            .lines
            .iter()
            .find(|l| l.odds_timestamp.time().minute() == 30)
            .unwrap();
        assert!(later.rlm);
    }

    #[test]
    fn test_steam_flagged_across_books() {
        let mut input = Vec::new();
        for book in 1..=3 {
            input.push(line(book, 0, -140, "odds_api", 0.95));
            let mut moved = line(book, 2, -150, "odds_api", 0.95);
            moved.odds_timestamp = Utc.with_ymd_and_hms(2025, 5, 1, 12, 2, book as u32).unwrap();
            input.push(moved);
        }

        let output = zone().process(input);
        let steamed = output.lines.iter().filter(|l| l.steam).count();
        assert_eq!(steamed, 3);
    }

    #[test]
    fn test_idempotent_over_same_input() {
        let input = vec![
            line(7, 0, -140, "odds_api", 0.95),
            line(7, 30, -150, "odds_api", 0.95),
        ];
        let first = zone().process(input.clone());
        let second = zone().process(first.lines.clone());

        // Flags and ordering stabilize: re-processing changes nothing
        assert_eq!(first.lines.len(), second.lines.len());
        for (a, b) in first.lines.iter().zip(second.lines.iter()) {
            assert_eq!(a.odds_timestamp, b.odds_timestamp);
            assert_eq!(a.rlm, b.rlm);
            assert_eq!(a.steam, b.steam);
            assert_eq!(a.is_opening, b.is_opening);
        }
    }
}
