//! Staging zone
//!
//! Cleans raw captures into unified per-market betting lines: re-parses the
//! stored payloads, resolves canonical identities, canonicalizes fields,
//! rejects or quarantines what cannot be repaired, deduplicates within the
//! batch, and scores quality.

use chrono::{DateTime, Duration, Utc};
use std::collections::HashMap;
use tracing::{debug, info};

use crate::collector::parse_source_payload;
use crate::config::PipelineConfig;
use crate::domain::{
    round_half_point, BettingLine, LineKey, MarketQuote, ProvisionalLine, RawRecord, SharpAction,
    VolumeSplits, ZoneMetrics,
};
use crate::error::RejectReason;
use crate::identity::{GameLookup, GameResolution, IdentityResolver, SportsbookResolution};

use super::quality;

/// A record held back until its identity can be resolved
#[derive(Debug, Clone)]
pub struct QuarantinedLine {
    pub line: ProvisionalLine,
    pub reason: RejectReason,
    pub quarantined_at: DateTime<Utc>,
}

/// Output of one staging pass
#[derive(Debug, Default)]
pub struct StagingOutput {
    pub accepted: Vec<BettingLine>,
    pub rejected: Vec<(ProvisionalLine, RejectReason)>,
    pub quarantined: Vec<QuarantinedLine>,
    pub metrics: ZoneMetrics,
}

/// Staging zone processor
pub struct StagingZone {
    config: PipelineConfig,
}

impl StagingZone {
    pub fn new(config: PipelineConfig) -> Self {
        Self { config }
    }

    /// Process one batch of raw records into unified lines.
    ///
    /// Only structurally-valid raw records are consulted; flagged captures
    /// never propagate.
    pub async fn process(
        &self,
        records: &[RawRecord],
        resolver: &IdentityResolver,
    ) -> StagingOutput {
        let mut output = StagingOutput::default();
        let mut provisional: Vec<(ProvisionalLine, DateTime<Utc>)> = Vec::new();

        for record in records.iter().filter(|r| r.parse_status.is_ok()) {
            match parse_source_payload(&record.source, &record.payload) {
                Ok(lines) => {
                    for line in lines {
                        provisional.push((line, record.fetched_at));
                    }
                }
                Err(e) => {
                    debug!(
                        source = %record.source,
                        external_id = %record.external_id,
                        "payload re-parse failed: {}",
                        e
                    );
                    output.metrics.records_in += 1;
                    output.metrics.record_rejection(RejectReason::SchemaViolation);
                }
            }
        }

        // First record wins per idempotency key; ties across sources keep the
        // more reliable source, then lexical source order.
        let mut by_key: HashMap<LineKey, BettingLine> = HashMap::new();

        for (line, fetched_at) in provisional {
            output.metrics.records_in += 1;

            let line = match self.canonicalize(line, fetched_at, &mut output) {
                Some(line) => line,
                None => continue,
            };

            let unified = match self.resolve(line, resolver, &mut output).await {
                Some(unified) => unified,
                None => continue,
            };

            let key = unified.key();
            match by_key.get(&key) {
                None => {
                    by_key.insert(key, unified);
                }
                Some(existing) => {
                    let replace = unified.reliability > existing.reliability
                        || (unified.reliability == existing.reliability
                            && unified.source < existing.source);
                    if replace {
                        let losing = by_key.insert(key, unified).expect("existing entry");
                        output.metrics.record_rejection(RejectReason::Duplicate);
                        debug!(
                            source = %losing.source,
                            "replaced duplicate with more reliable source"
                        );
                    } else {
                        output.metrics.record_rejection(RejectReason::Duplicate);
                    }
                }
            }
        }

        output.accepted = by_key.into_values().collect();
        output
            .accepted
            .sort_by(|a, b| a.odds_timestamp.cmp(&b.odds_timestamp));
        output.metrics.records_out = output.accepted.len() as u64;
        output.metrics.quarantined = output.quarantined.len() as u64;
        for line in &output.accepted {
            output.metrics.record_quality(line.quality);
        }

        info!(
            accepted = output.accepted.len(),
            rejected = output.rejected.len(),
            quarantined = output.quarantined.len(),
            "staging pass complete"
        );
        output
    }

    /// Field canonicalization and validity checks that need no resolver.
    fn canonicalize(
        &self,
        mut line: ProvisionalLine,
        fetched_at: DateTime<Utc>,
        output: &mut StagingOutput,
    ) -> Option<ProvisionalLine> {
        // Future timestamps beyond the skew tolerance are invalid
        let skew = Duration::seconds(self.config.clock_skew_tolerance_s as i64);
        if line.odds_timestamp > Utc::now() + skew {
            output.metrics.record_rejection(RejectReason::InvalidTimestamp);
            output.rejected.push((line, RejectReason::InvalidTimestamp));
            return None;
        }

        // Optional timing-grace filter against stale quotes
        if self.config.timing_grace_enabled {
            let lag = fetched_at - line.odds_timestamp;
            if lag > Duration::seconds(self.config.timing_grace_s as i64) {
                output.metrics.record_rejection(RejectReason::InvalidTimestamp);
                output.rejected.push((line, RejectReason::InvalidTimestamp));
                return None;
            }
        }

        if !line.quote.prices_in_range() {
            output.metrics.record_rejection(RejectReason::InvalidOdds);
            output.rejected.push((line, RejectReason::InvalidOdds));
            return None;
        }

        line.quote = canonicalize_quote(line.quote);
        line.splits = canonicalize_splits(line.splits);
        Some(line)
    }

    /// Resolve identities and build the unified line.
    async fn resolve(
        &self,
        line: ProvisionalLine,
        resolver: &IdentityResolver,
        output: &mut StagingOutput,
    ) -> Option<BettingLine> {
        let lookup = GameLookup {
            league_game_id: None,
            game_date: line.game_date,
            home_team: line.home_team.clone(),
            away_team: line.away_team.clone(),
        };
        let game_id = match resolver.resolve_game(&lookup).await {
            GameResolution::Resolved(id) => id,
            GameResolution::Unresolved => {
                output.metrics.record_rejection(RejectReason::UnknownGame);
                output.quarantined.push(QuarantinedLine {
                    line,
                    reason: RejectReason::UnknownGame,
                    quarantined_at: Utc::now(),
                });
                return None;
            }
        };

        let sportsbook_id = match resolver
            .resolve_sportsbook(&line.source, &line.external_sportsbook)
            .await
        {
            SportsbookResolution::Resolved(id) => id,
            SportsbookResolution::PendingReview => {
                output
                    .metrics
                    .record_rejection(RejectReason::UnknownSportsbook);
                output.quarantined.push(QuarantinedLine {
                    line,
                    reason: RejectReason::UnknownSportsbook,
                    quarantined_at: Utc::now(),
                });
                return None;
            }
        };

        Some(build_line(line, game_id, sportsbook_id))
    }

    /// Re-run quarantined lines after new mapping data arrived.
    pub async fn retry_quarantine(
        &self,
        quarantined: Vec<QuarantinedLine>,
        resolver: &IdentityResolver,
    ) -> (Vec<BettingLine>, Vec<QuarantinedLine>) {
        let mut recovered = Vec::new();
        let mut still_held = Vec::new();
        let mut scratch = StagingOutput::default();

        for held in quarantined {
            // The scratch output absorbs re-quarantine bookkeeping; the
            // original entry is what stays held.
            match self.resolve(held.line.clone(), resolver, &mut scratch).await {
                Some(line) => recovered.push(line),
                None => still_held.push(held),
            }
        }
        if !recovered.is_empty() {
            info!(recovered = recovered.len(), "quarantined records resolved");
        }
        (recovered, still_held)
    }
}

/// Normalize quote fields: half-point lines.
fn canonicalize_quote(quote: MarketQuote) -> MarketQuote {
    match quote {
        MarketQuote::Moneyline { .. } => quote,
        MarketQuote::Spread {
            line,
            home_price,
            away_price,
        } => MarketQuote::Spread {
            line: round_half_point(line),
            home_price,
            away_price,
        },
        MarketQuote::Total {
            line,
            over_price,
            under_price,
        } => MarketQuote::Total {
            line: round_half_point(line),
            over_price,
            under_price,
        },
    }
}

/// Clip percentages into [0, 100]; null inconsistent pairs.
fn canonicalize_splits(mut splits: VolumeSplits) -> VolumeSplits {
    let clip = |v: Option<f64>| {
        v.and_then(|v| {
            if v.is_finite() {
                Some(v.clamp(0.0, 100.0))
            } else {
                None
            }
        })
    };
    splits.side_a_bets_pct = clip(splits.side_a_bets_pct);
    splits.side_a_money_pct = clip(splits.side_a_money_pct);
    splits.side_b_bets_pct = clip(splits.side_b_bets_pct);
    splits.side_b_money_pct = clip(splits.side_b_money_pct);

    if !splits.pairs_consistent() {
        // A pair that cannot both be true tells us nothing; drop all of it
        return VolumeSplits::default();
    }
    splits
}

fn build_line(line: ProvisionalLine, game_id: String, sportsbook_id: i32) -> BettingLine {
    let reliability = quality::source_reliability(&line.source);
    let completeness = quality::completeness(&line.quote, &line.splits, true);
    let quality = quality::bucketize(completeness, reliability, true);

    BettingLine {
        game_id,
        sportsbook_id,
        quote: line.quote,
        source: line.source,
        source_external_id: line.external_game_id,
        odds_timestamp: line.odds_timestamp,
        is_opening: false,
        is_closing: false,
        splits: line.splits,
        sharp_action: SharpAction::None,
        public_fade: false,
        rlm: false,
        steam: false,
        completeness,
        reliability,
        quality,
    }
}
