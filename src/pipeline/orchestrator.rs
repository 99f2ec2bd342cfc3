//! Pipeline orchestrator
//!
//! Drives the zones in dependency order for a requested mode and window,
//! with bounded queues between collection and ingestion, shard-parallel zone
//! processing, and per-zone error-rate thresholds deciding the terminal run
//! status. Re-running a window is idempotent: every write is an upsert.

use chrono::Utc;
use futures::stream::{FuturesUnordered, StreamExt};
use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tracing::{error, info, warn};

use crate::collector::{league_schedule, Collector, SOURCE_MLB_STATS};
use crate::config::AppConfig;
use crate::domain::{
    BettingLine, CollectionWindow, CollectorBatch, Game, LineKey, PipelineRun, RawRecord, RunMode,
    RunStatus, ScheduleEntry, Zone, ZoneMetrics,
};
use crate::error::{Result, SharplineError};
use crate::identity::{IdentityResolver, normalize_team};
use crate::persistence::PipelineStore;
use crate::shutdown::ShutdownToken;

use super::curated_zone::CuratedZone;
use super::raw_zone;
use super::staging_zone::{StagingOutput, StagingZone};

/// Per-collector sweep budget
const SWEEP_TIMEOUT: Duration = Duration::from_secs(600);

/// Coordinates zone execution for pipeline runs
pub struct Orchestrator {
    config: AppConfig,
    store: Arc<dyn PipelineStore>,
    resolver: Arc<IdentityResolver>,
    collectors: Vec<Arc<dyn Collector>>,
    staging: StagingZone,
    curated: CuratedZone,
}

impl Orchestrator {
    pub fn new(
        config: AppConfig,
        store: Arc<dyn PipelineStore>,
        resolver: Arc<IdentityResolver>,
        collectors: Vec<Arc<dyn Collector>>,
    ) -> Self {
        let staging = StagingZone::new(config.pipeline.clone());
        let curated = CuratedZone::new(config.pipeline.clone());
        Self {
            config,
            store,
            resolver,
            collectors,
            staging,
            curated,
        }
    }

    /// Load persisted reference data into the resolver.
    pub async fn prime_resolver(&self) -> Result<()> {
        let games = self.store.load_games().await?;
        info!(games = games.len(), "priming resolver with known games");
        self.resolver.register_games(games).await;

        for book in self.store.load_sportsbooks().await? {
            self.resolver
                .register_sportsbook(book.id, &book.canonical_name)
                .await;
        }
        for mapping in self.store.load_sportsbook_mappings().await? {
            if let Some(id) = mapping.sportsbook_id {
                self.resolver
                    .register_sportsbook_mapping(&mapping.source, &mapping.external_key, id)
                    .await;
            }
        }
        Ok(())
    }

    /// Execute one run. Always returns a run with a terminal status.
    pub async fn run(
        &self,
        mode: RunMode,
        window: CollectionWindow,
        shutdown: ShutdownToken,
    ) -> PipelineRun {
        let mut run = PipelineRun::begin(mode, window);
        info!(run_id = %run.run_id, %mode, "pipeline run starting");

        let mut aborted = false;

        if mode.runs_raw() && self.config.pipeline.raw_enabled && !shutdown.is_cancelled() {
            match self.run_raw_zone(window, &shutdown).await {
                Ok(metrics) => {
                    run.zone_metrics.insert(Zone::Raw.as_str().into(), metrics);
                }
                Err(e) => {
                    error!(run_id = %run.run_id, "raw zone aborted: {}", e);
                    run.zone_metrics
                        .insert(Zone::Raw.as_str().into(), ZoneMetrics::default());
                    aborted = true;
                }
            }
        }

        if mode.runs_staging()
            && self.config.pipeline.staging_enabled
            && !aborted
            && !shutdown.is_cancelled()
        {
            match self.run_staging_zone(window).await {
                Ok(metrics) => {
                    run.zone_metrics
                        .insert(Zone::Staging.as_str().into(), metrics);
                }
                Err(e) => {
                    error!(run_id = %run.run_id, "staging zone aborted: {}", e);
                    run.zone_metrics
                        .insert(Zone::Staging.as_str().into(), ZoneMetrics::default());
                    aborted = true;
                }
            }
        }

        if mode.runs_curated()
            && self.config.pipeline.curated_enabled
            && !aborted
            && !shutdown.is_cancelled()
        {
            match self.run_curated_zone(window).await {
                Ok(metrics) => {
                    run.zone_metrics
                        .insert(Zone::Curated.as_str().into(), metrics);
                }
                Err(e) => {
                    error!(run_id = %run.run_id, "curated zone aborted: {}", e);
                    run.zone_metrics
                        .insert(Zone::Curated.as_str().into(), ZoneMetrics::default());
                    aborted = true;
                }
            }
        }

        run.finished_at = Some(Utc::now());
        run.status = self.final_status(&run, aborted);
        info!(run_id = %run.run_id, "{}", run.summary());

        if let Err(e) = self.store.record_run(&run).await {
            error!(run_id = %run.run_id, "failed to persist run record: {}", e);
        }
        run
    }

    /// Pull the official schedule for a date range and apply statuses and
    /// final scores to the canonical games.
    pub async fn resolve_outcomes(
        &self,
        window: CollectionWindow,
        shutdown: ShutdownToken,
    ) -> Result<usize> {
        let collector = self
            .collectors
            .iter()
            .find(|c| c.source() == SOURCE_MLB_STATS)
            .ok_or_else(|| {
                SharplineError::Configuration("schedule collector not configured".into())
            })?;
        let batch = collector.collect(window, shutdown).await?;
        self.apply_schedule(batch.schedule).await
    }

    /// Collectors → bounded queue → raw ingestion.
    async fn run_raw_zone(
        &self,
        window: CollectionWindow,
        shutdown: &ShutdownToken,
    ) -> Result<ZoneMetrics> {
        let (tx, mut rx) = mpsc::channel::<CollectorBatch>(self.config.pipeline.queue_capacity);

        let mut workers = FuturesUnordered::new();
        for collector in &self.collectors {
            let collector = collector.clone();
            let tx = tx.clone();
            let shutdown = shutdown.clone();
            workers.push(tokio::spawn(async move {
                let source = collector.source();
                match tokio::time::timeout(SWEEP_TIMEOUT, collector.collect(window, shutdown))
                    .await
                {
                    Ok(Ok(batch)) => {
                        // A full queue pauses the producer (block, never drop)
                        // and surfaces as a backpressure signal.
                        match tx.try_send(batch) {
                            Ok(()) => {}
                            Err(mpsc::error::TrySendError::Full(batch)) => {
                                warn!(source, "raw queue full, collector paused on backpressure");
                                if tx.send(batch).await.is_err() {
                                    warn!(source, "raw ingester dropped before batch arrived");
                                }
                            }
                            Err(mpsc::error::TrySendError::Closed(_)) => {
                                warn!(source, "raw ingester dropped before batch arrived");
                            }
                        }
                    }
                    Ok(Err(SharplineError::CircuitOpen(_))) => {
                        info!(source, "collector skipped: circuit open");
                    }
                    Ok(Err(e)) => {
                        warn!(source, "collector sweep failed: {}", e);
                    }
                    Err(_) => {
                        warn!(source, "collector sweep exceeded budget");
                    }
                }
            }));
        }
        drop(tx);

        let drain = async {
            let mut records: Vec<RawRecord> = Vec::new();
            let mut schedule: Vec<ScheduleEntry> = Vec::new();
            while let Some(batch) = rx.recv().await {
                records.extend(batch.raw_records);
                schedule.extend(batch.schedule);
            }
            (records, schedule)
        };
        let ((records, schedule), _) = tokio::join!(drain, async {
            while workers.next().await.is_some() {}
        });

        // Schedule entries refresh games and the resolver before ingestion
        if !schedule.is_empty() {
            let games = self.apply_schedule(schedule).await?;
            info!(games, "schedule import applied");
        }

        let result = raw_zone::prepare_batch(records);
        let mut metrics = result.metrics;
        let inserted = self.store.insert_raw_batch(&result.records).await?;
        info!(
            inserted,
            duplicates = result.duplicates,
            invalid = result.invalid,
            "raw zone ingested"
        );
        metrics.records_out = inserted.min(metrics.records_out);
        Ok(metrics)
    }

    /// Convert schedule entries to canonical games, persist and register.
    async fn apply_schedule(&self, entries: Vec<ScheduleEntry>) -> Result<usize> {
        let mut games: Vec<Game> = Vec::new();
        for entry in entries {
            let (home, away) = match (
                normalize_team(&entry.home_team),
                normalize_team(&entry.away_team),
            ) {
                (Some(home), Some(away)) => (home, away),
                _ => {
                    warn!(
                        home = %entry.home_team,
                        away = %entry.away_team,
                        "schedule entry with unknown team names"
                    );
                    continue;
                }
            };
            let mut game = Game::new(entry.game_date, away, home);
            game.league_game_id = Some(entry.league_game_id);
            game.scheduled_utc = entry.scheduled_utc;
            game.scheduled_east = entry.scheduled_utc.map(crate::domain::utc_to_east);
            game.status = league_schedule::map_status(&entry.status);
            game.home_score = entry.home_score;
            game.away_score = entry.away_score;
            games.push(game);
        }

        self.store.upsert_games(&games).await?;
        let count = games.len();
        self.resolver.register_games(games).await;
        Ok(count)
    }

    /// Staging over the window's raw records, shard-parallel with a final
    /// cross-shard merge so per-key dedup still holds.
    async fn run_staging_zone(&self, window: CollectionWindow) -> Result<ZoneMetrics> {
        let records = self.store.load_raw_window(window).await?;
        if records.is_empty() {
            info!("staging zone: no raw input for window");
            return Ok(ZoneMetrics::default());
        }

        let shards = self.shard_records(records);
        let mut outputs: Vec<StagingOutput> = futures::stream::iter(shards)
            .map(|shard| async move { self.staging.process(&shard, &self.resolver).await })
            .buffer_unordered(self.config.pipeline.zone_worker_pool_size)
            .collect()
            .await;

        let mut metrics = ZoneMetrics::default();
        let mut accepted: Vec<BettingLine> = Vec::new();
        let mut quarantined = Vec::new();
        for output in outputs.drain(..) {
            metrics.records_in += output.metrics.records_in;
            metrics.errors += output.metrics.errors;
            for (reason, count) in output.metrics.rejected {
                *metrics.rejected.entry(reason).or_insert(0) += count;
            }
            accepted.extend(output.accepted);
            quarantined.extend(output.quarantined);
        }

        // Cross-shard dedup on the idempotency key
        accepted = merge_by_key(accepted, &mut metrics);

        // Retry previously-quarantined records now that the resolver may know
        // more, then persist the survivors.
        let held = self.store.load_quarantine().await?;
        if !held.is_empty() {
            let (recovered, still_held) =
                self.staging.retry_quarantine(held, &self.resolver).await;
            accepted.extend(recovered);
            quarantined.extend(still_held);
        }
        metrics.quarantined = quarantined.len() as u64;
        self.store.replace_quarantine(&quarantined).await?;

        let new_mappings = self.resolver.take_pending_mappings().await;
        if !new_mappings.is_empty() {
            self.store.insert_sportsbook_mappings(&new_mappings).await?;
        }

        for line in &accepted {
            metrics.record_quality(line.quality);
        }
        metrics.records_out = accepted.len() as u64;
        self.store.upsert_staging_lines(&accepted).await?;
        Ok(metrics)
    }

    /// Curated over the window's staging lines, sharded by game so steam
    /// detection sees every book for a game together.
    async fn run_curated_zone(&self, window: CollectionWindow) -> Result<ZoneMetrics> {
        let lines = self.store.load_staging_window(window).await?;
        if lines.is_empty() {
            info!("curated zone: no staging input for window");
            return Ok(ZoneMetrics::default());
        }

        let mut shards: Vec<Vec<BettingLine>> =
            vec![Vec::new(); self.config.pipeline.zone_worker_pool_size.max(1)];
        let shard_count = shards.len();
        for line in lines {
            let mut hasher = DefaultHasher::new();
            line.game_id.hash(&mut hasher);
            shards[(hasher.finish() as usize) % shard_count].push(line);
        }

        let outputs: Vec<_> = futures::stream::iter(shards.into_iter().filter(|s| !s.is_empty()))
            .map(|shard| async move { self.curated.process(shard) })
            .buffer_unordered(shard_count)
            .collect()
            .await;

        let mut metrics = ZoneMetrics::default();
        let mut curated_lines = Vec::new();
        for output in outputs {
            metrics.records_in += output.metrics.records_in;
            metrics.errors += output.metrics.errors;
            for (reason, count) in output.metrics.rejected {
                *metrics.rejected.entry(reason).or_insert(0) += count;
            }
            for (quality, count) in output.metrics.quality {
                *metrics.quality.entry(quality).or_insert(0) += count;
            }
            curated_lines.extend(output.lines);
        }

        metrics.records_out = curated_lines.len() as u64;
        self.store.upsert_curated_lines(&curated_lines).await?;
        Ok(metrics)
    }

    /// Shard raw records by (source, external id) so one event's payload
    /// stays on one worker.
    fn shard_records(&self, records: Vec<RawRecord>) -> Vec<Vec<RawRecord>> {
        let shard_count = self.config.pipeline.zone_worker_pool_size.max(1);
        let mut shards: Vec<Vec<RawRecord>> = vec![Vec::new(); shard_count];
        for record in records {
            let mut hasher = DefaultHasher::new();
            record.source.hash(&mut hasher);
            record.external_id.hash(&mut hasher);
            shards[(hasher.finish() as usize) % shard_count].push(record);
        }
        shards.into_iter().filter(|s| !s.is_empty()).collect()
    }

    fn final_status(&self, run: &PipelineRun, aborted: bool) -> RunStatus {
        if aborted {
            return RunStatus::Failed;
        }
        if run.zone_metrics.is_empty() {
            return RunStatus::Failed;
        }

        let total_out: u64 = run.zone_metrics.values().map(|m| m.records_out).sum();
        let total_in: u64 = run.zone_metrics.values().map(|m| m.records_in).sum();
        if total_out == 0 && total_in > 0 {
            return RunStatus::Failed;
        }

        let thresholds = &self.config.pipeline.error_rate_thresholds;
        let over_threshold = [
            (Zone::Raw, thresholds.raw),
            (Zone::Staging, thresholds.staging),
            (Zone::Curated, thresholds.curated),
        ]
        .iter()
        .any(|(zone, threshold)| {
            run.metrics_for(*zone)
                .map(|m| m.error_rate() > *threshold)
                .unwrap_or(false)
        });

        if over_threshold {
            if total_out > 0 {
                RunStatus::Partial
            } else {
                RunStatus::Failed
            }
        } else {
            RunStatus::Succeeded
        }
    }
}

/// Cross-shard dedup: keep the more reliable source per key.
fn merge_by_key(lines: Vec<BettingLine>, metrics: &mut ZoneMetrics) -> Vec<BettingLine> {
    let mut by_key: std::collections::HashMap<LineKey, BettingLine> = std::collections::HashMap::new();
    for line in lines {
        let key = line.key();
        match by_key.get(&key) {
            None => {
                by_key.insert(key, line);
            }
            Some(existing) => {
                let replace = line.reliability > existing.reliability
                    || (line.reliability == existing.reliability && line.source < existing.source);
                if replace {
                    by_key.insert(key, line);
                }
                metrics.record_rejection(crate::error::RejectReason::Duplicate);
            }
        }
    }
    let mut merged: Vec<BettingLine> = by_key.into_values().collect();
    merged.sort_by(|a, b| a.odds_timestamp.cmp(&b.odds_timestamp));
    merged
}
