//! PostgreSQL storage adapter
//!
//! The only component that issues writes. Batched writes run in one
//! transaction with the idempotency keys from the data model; a failed batch
//! rolls back and is retried once before escalating. Pool exhaustion fails
//! fast as `resource_exhausted`.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use sqlx::postgres::{PgPool, PgPoolOptions};
use sqlx::{Postgres, Row, Transaction};
use std::time::Duration;
use tracing::{debug, info, instrument, warn};

use crate::config::DatabaseConfig;
use crate::domain::{
    BettingLine, CollectionAttempt, CollectionWindow, Game, GameStatus, Market, MarketQuote,
    ParseStatus, PipelineRun, RawRecord, SharpAction, Sportsbook, SportsbookMapping, VolumeSplits,
};
use crate::error::{RejectReason, Result, SharplineError};
use crate::health::{DeadLetter, RecoveryAction};
use crate::pipeline::QuarantinedLine;

/// Adapter health classification
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StoreHealth {
    Ok,
    Degraded,
    Down,
}

impl std::fmt::Display for StoreHealth {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            StoreHealth::Ok => write!(f, "ok"),
            StoreHealth::Degraded => write!(f, "degraded"),
            StoreHealth::Down => write!(f, "down"),
        }
    }
}

/// Per-collector rollup for the status surfaces
#[derive(Debug, Clone)]
pub struct AttemptSummary {
    pub collector: String,
    pub attempts: u64,
    pub successes: u64,
    pub avg_response_ms: u64,
    pub last_attempt: Option<DateTime<Utc>>,
}

/// Write/read surface the orchestrator drives
#[async_trait]
pub trait PipelineStore: Send + Sync {
    async fn insert_raw_batch(&self, records: &[RawRecord]) -> Result<u64>;
    async fn load_raw_window(&self, window: CollectionWindow) -> Result<Vec<RawRecord>>;
    async fn upsert_games(&self, games: &[Game]) -> Result<()>;
    async fn load_games(&self) -> Result<Vec<Game>>;
    async fn load_sportsbooks(&self) -> Result<Vec<Sportsbook>>;
    async fn load_sportsbook_mappings(&self) -> Result<Vec<SportsbookMapping>>;
    async fn insert_sportsbook_mappings(&self, mappings: &[SportsbookMapping]) -> Result<()>;
    async fn upsert_staging_lines(&self, lines: &[BettingLine]) -> Result<u64>;
    async fn load_staging_window(&self, window: CollectionWindow) -> Result<Vec<BettingLine>>;
    async fn upsert_curated_lines(&self, lines: &[BettingLine]) -> Result<u64>;
    async fn replace_quarantine(&self, entries: &[QuarantinedLine]) -> Result<()>;
    async fn load_quarantine(&self) -> Result<Vec<QuarantinedLine>>;
    async fn record_run(&self, run: &PipelineRun) -> Result<()>;
}

/// PostgreSQL storage adapter
#[derive(Clone)]
pub struct PgStore {
    pool: PgPool,
}

impl PgStore {
    /// Connect with the configured pool bounds.
    pub async fn new(config: &DatabaseConfig) -> Result<Self> {
        let pool = PgPoolOptions::new()
            .max_connections(config.max_connections())
            .min_connections(config.pool_size.min(2))
            .acquire_timeout(Duration::from_secs(config.pool_timeout_s))
            .max_lifetime(Duration::from_secs(config.pool_recycle_s))
            .connect(&config.connection_url())
            .await
            .map_err(map_pool_error)?;

        info!("Connected to PostgreSQL");
        Ok(Self { pool })
    }

    /// Reuse an existing pool (tests, shared wiring).
    pub fn from_pool(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Run migrations.
    pub async fn migrate(&self) -> Result<()> {
        sqlx::migrate!("./migrations").run(&self.pool).await?;
        info!("Database migrations completed");
        Ok(())
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    /// Open an explicit transaction (read-committed, the server default).
    pub async fn begin(&self) -> Result<Transaction<'_, Postgres>> {
        self.pool.begin().await.map_err(map_pool_error)
    }

    /// Lightweight health probe: `SELECT 1` latency plus connection usage.
    pub async fn health(&self) -> StoreHealth {
        let started = std::time::Instant::now();
        let ping = sqlx::query("SELECT 1").fetch_one(&self.pool).await;
        if ping.is_err() {
            return StoreHealth::Down;
        }

        let active_ratio = {
            let size = self.pool.size() as f64;
            let idle = self.pool.num_idle() as f64;
            if size <= 0.0 {
                0.0
            } else {
                (size - idle) / size
            }
        };

        if started.elapsed() > Duration::from_millis(500) || active_ratio > 0.9 {
            StoreHealth::Degraded
        } else {
            StoreHealth::Ok
        }
    }

    // ==================== Operational writes ====================

    /// Persist collection attempts.
    pub async fn record_attempts(&self, attempts: &[CollectionAttempt]) -> Result<()> {
        if attempts.is_empty() {
            return Ok(());
        }
        let mut tx = self.begin().await?;
        for attempt in attempts {
            sqlx::query(
                r#"
                INSERT INTO operational.collection_attempts (
                    collector, started_at, finished_at, outcome, record_count,
                    response_ms, error
                )
                VALUES ($1, $2, $3, $4, $5, $6, $7)
                "#,
            )
            .bind(&attempt.collector)
            .bind(attempt.started_at)
            .bind(attempt.finished_at)
            .bind(attempt.outcome.as_str())
            .bind(attempt.record_count as i32)
            .bind(attempt.response_ms as i64)
            .bind(&attempt.error)
            .execute(&mut *tx)
            .await?;
        }
        tx.commit().await?;
        Ok(())
    }

    /// Persist raised alerts.
    pub async fn record_alerts(&self, alerts: &[crate::health::Alert]) -> Result<()> {
        if alerts.is_empty() {
            return Ok(());
        }
        let mut tx = self.begin().await?;
        for alert in alerts {
            sqlx::query(
                r#"
                INSERT INTO operational.alerts (
                    correlation_id, alert_type, severity, collector, message, context
                )
                VALUES ($1, $2, $3, $4, $5, $6)
                ON CONFLICT (correlation_id) DO NOTHING
                "#,
            )
            .bind(alert.correlation_id)
            .bind(&alert.alert_type)
            .bind(alert.severity.as_str())
            .bind(&alert.collector)
            .bind(&alert.message)
            .bind(&alert.context)
            .execute(&mut *tx)
            .await?;
        }
        tx.commit().await?;
        Ok(())
    }

    /// Persist webhook dead letters for later redelivery.
    pub async fn record_dead_letters(&self, letters: &[DeadLetter]) -> Result<()> {
        if letters.is_empty() {
            return Ok(());
        }
        let mut tx = self.begin().await?;
        for letter in letters {
            sqlx::query(
                r#"
                INSERT INTO operational.webhook_dead_letters (sink, alert, error, failed_at)
                VALUES ($1, $2, $3, $4)
                "#,
            )
            .bind(&letter.sink)
            .bind(serde_json::to_value(&letter.alert)?)
            .bind(&letter.error)
            .bind(letter.failed_at)
            .execute(&mut *tx)
            .await?;
        }
        tx.commit().await?;
        Ok(())
    }

    /// Persist recovery actions.
    pub async fn record_recovery_actions(&self, actions: &[RecoveryAction]) -> Result<()> {
        if actions.is_empty() {
            return Ok(());
        }
        let mut tx = self.begin().await?;
        for action in actions {
            sqlx::query(
                r#"
                INSERT INTO operational.recovery_actions (collector, step, outcome, detail, at)
                VALUES ($1, $2, $3, $4, $5)
                "#,
            )
            .bind(&action.collector)
            .bind(action.step.as_str())
            .bind(action.outcome.as_str())
            .bind(action.outcome.detail())
            .bind(action.at)
            .execute(&mut *tx)
            .await?;
        }
        tx.commit().await?;
        Ok(())
    }

    /// Drop raw records and attempts past their retention windows.
    #[instrument(skip(self))]
    pub async fn prune_retention(&self, raw_days: u32, attempts_days: u32) -> Result<(u64, u64)> {
        let raw = sqlx::query(
            "DELETE FROM raw.records WHERE fetched_at < NOW() - ($1 || ' days')::interval",
        )
        .bind(raw_days.to_string())
        .execute(&self.pool)
        .await?
        .rows_affected();

        let attempts = sqlx::query(
            "DELETE FROM operational.collection_attempts WHERE finished_at < NOW() - ($1 || ' days')::interval",
        )
        .bind(attempts_days.to_string())
        .execute(&self.pool)
        .await?
        .rows_affected();

        if raw + attempts > 0 {
            info!(raw, attempts, "pruned retention windows");
        }
        Ok((raw, attempts))
    }

    // ==================== Read-side summaries ====================

    /// Most recent pipeline runs, newest first.
    pub async fn recent_runs(&self, limit: i64) -> Result<Vec<PipelineRun>> {
        let rows = sqlx::query(
            r#"
            SELECT run_id, mode, window_start, window_end, started_at, finished_at,
                   status, zone_metrics
            FROM operational.pipeline_runs
            ORDER BY started_at DESC
            LIMIT $1
            "#,
        )
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;

        let mut runs = Vec::with_capacity(rows.len());
        for row in &rows {
            let mode = match row.get::<String, _>("mode").as_str() {
                "raw_only" => crate::domain::RunMode::RawOnly,
                "staging_only" => crate::domain::RunMode::StagingOnly,
                "curated_only" => crate::domain::RunMode::CuratedOnly,
                "pair" => crate::domain::RunMode::Pair,
                _ => crate::domain::RunMode::Full,
            };
            let status = match row.get::<String, _>("status").as_str() {
                "succeeded" => crate::domain::RunStatus::Succeeded,
                "partial" => crate::domain::RunStatus::Partial,
                _ => crate::domain::RunStatus::Failed,
            };
            runs.push(PipelineRun {
                run_id: row.get("run_id"),
                mode,
                window: CollectionWindow {
                    start: row.get("window_start"),
                    end: row.get("window_end"),
                },
                started_at: row.get("started_at"),
                finished_at: row.get("finished_at"),
                zone_metrics: serde_json::from_value(row.get("zone_metrics"))
                    .unwrap_or_default(),
                status,
            });
        }
        Ok(runs)
    }

    /// Per-collector attempt summary over a trailing window.
    pub async fn attempt_summary(&self, hours: i64) -> Result<Vec<AttemptSummary>> {
        let rows = sqlx::query(
            r#"
            SELECT collector,
                   COUNT(*) AS attempts,
                   COUNT(*) FILTER (WHERE outcome = 'ok') AS successes,
                   COALESCE(AVG(response_ms), 0)::BIGINT AS avg_ms,
                   MAX(finished_at) AS last_attempt
            FROM operational.collection_attempts
            WHERE finished_at > NOW() - ($1 || ' hours')::interval
            GROUP BY collector
            ORDER BY collector
            "#,
        )
        .bind(hours.to_string())
        .fetch_all(&self.pool)
        .await?;

        Ok(rows
            .iter()
            .map(|row| AttemptSummary {
                collector: row.get("collector"),
                attempts: row.get::<i64, _>("attempts") as u64,
                successes: row.get::<i64, _>("successes") as u64,
                avg_response_ms: row.get::<i64, _>("avg_ms") as u64,
                last_attempt: row.get("last_attempt"),
            })
            .collect())
    }

    // ==================== Line helpers ====================

    async fn upsert_lines(&self, schema: &str, lines: &[BettingLine]) -> Result<u64> {
        if lines.is_empty() {
            return Ok(0);
        }
        // Batch-level retry: rolled back once, retried once, then escalated
        match self.try_upsert_lines(schema, lines).await {
            Ok(written) => Ok(written),
            Err(first_error) => {
                warn!(
                    schema,
                    "line batch failed, retrying once: {}", first_error
                );
                self.try_upsert_lines(schema, lines).await.map_err(|e| {
                    SharplineError::Persistence(format!(
                        "batch failed after retry: {} (first failure: {})",
                        e, first_error
                    ))
                })
            }
        }
    }

    async fn try_upsert_lines(&self, schema: &str, lines: &[BettingLine]) -> Result<u64> {
        let mut tx = self.begin().await?;
        let mut written = 0u64;
        for line in lines {
            written += upsert_line(&mut tx, schema, line).await?;
        }
        tx.commit().await?;
        debug!(schema, written, total = lines.len(), "line batch committed");
        Ok(written)
    }

    async fn load_lines(
        &self,
        schema: &str,
        window: CollectionWindow,
    ) -> Result<Vec<BettingLine>> {
        let mut lines = Vec::new();
        for market in [Market::Moneyline, Market::Spread, Market::Total] {
            let sql = select_lines_sql(schema, market);
            let rows = sqlx::query(&sql)
                .bind(window.start)
                .bind(window.end)
                .fetch_all(&self.pool)
                .await?;
            for row in rows {
                lines.push(line_from_row(&row, market)?);
            }
        }
        lines.sort_by(|a, b| a.odds_timestamp.cmp(&b.odds_timestamp));
        Ok(lines)
    }
}

#[async_trait]
impl PipelineStore for PgStore {
    /// Append-only raw ingestion; duplicates die on the idempotency key.
    async fn insert_raw_batch(&self, records: &[RawRecord]) -> Result<u64> {
        if records.is_empty() {
            return Ok(0);
        }
        let mut tx = self.begin().await?;
        let mut inserted = 0u64;
        for record in records {
            let result = sqlx::query(
                r#"
                INSERT INTO raw.records (
                    source, external_id, fetched_at, odds_timestamp, payload,
                    batch_id, parse_ok, parse_error
                )
                VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
                ON CONFLICT (source, external_id, odds_timestamp) DO NOTHING
                "#,
            )
            .bind(&record.source)
            .bind(&record.external_id)
            .bind(record.fetched_at)
            .bind(record.odds_timestamp)
            .bind(&record.payload)
            .bind(record.batch_id)
            .bind(record.parse_status.is_ok())
            .bind(match &record.parse_status {
                ParseStatus::Ok => None,
                ParseStatus::Invalid(reason) => Some(reason.clone()),
            })
            .execute(&mut *tx)
            .await?;
            inserted += result.rows_affected();
        }
        tx.commit().await?;
        Ok(inserted)
    }

    async fn load_raw_window(&self, window: CollectionWindow) -> Result<Vec<RawRecord>> {
        let rows = sqlx::query(
            r#"
            SELECT source, external_id, fetched_at, odds_timestamp, payload,
                   batch_id, parse_ok, parse_error
            FROM raw.records
            WHERE odds_timestamp::date >= $1 AND odds_timestamp::date <= $2
            ORDER BY odds_timestamp ASC, id ASC
            "#,
        )
        .bind(window.start)
        .bind(window.end)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows
            .iter()
            .map(|row| RawRecord {
                source: row.get("source"),
                external_id: row.get("external_id"),
                fetched_at: row.get("fetched_at"),
                odds_timestamp: row.get("odds_timestamp"),
                payload: row.get("payload"),
                batch_id: row.get("batch_id"),
                parse_status: if row.get::<bool, _>("parse_ok") {
                    ParseStatus::Ok
                } else {
                    ParseStatus::Invalid(
                        row.get::<Option<String>, _>("parse_error")
                            .unwrap_or_else(|| "unknown".into()),
                    )
                },
            })
            .collect())
    }

    async fn upsert_games(&self, games: &[Game]) -> Result<()> {
        if games.is_empty() {
            return Ok(());
        }
        let mut tx = self.begin().await?;
        for game in games {
            sqlx::query(
                r#"
                INSERT INTO curated.games (
                    canonical_id, league_game_id, game_date, home_abbrev, away_abbrev,
                    scheduled_utc, scheduled_east, status, home_score, away_score
                )
                VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10)
                ON CONFLICT (canonical_id) DO UPDATE SET
                    league_game_id = COALESCE(EXCLUDED.league_game_id, curated.games.league_game_id),
                    scheduled_utc = COALESCE(EXCLUDED.scheduled_utc, curated.games.scheduled_utc),
                    scheduled_east = COALESCE(EXCLUDED.scheduled_east, curated.games.scheduled_east),
                    status = EXCLUDED.status,
                    home_score = COALESCE(EXCLUDED.home_score, curated.games.home_score),
                    away_score = COALESCE(EXCLUDED.away_score, curated.games.away_score),
                    updated_at = NOW()
                "#,
            )
            .bind(&game.canonical_id)
            .bind(game.league_game_id)
            .bind(game.game_date)
            .bind(&game.home_abbrev)
            .bind(&game.away_abbrev)
            .bind(game.scheduled_utc)
            .bind(game.scheduled_east)
            .bind(game.status.as_str())
            .bind(game.home_score)
            .bind(game.away_score)
            .execute(&mut *tx)
            .await?;
        }
        tx.commit().await?;
        Ok(())
    }

    async fn load_games(&self) -> Result<Vec<Game>> {
        let rows = sqlx::query(
            r#"
            SELECT canonical_id, league_game_id, game_date, home_abbrev, away_abbrev,
                   scheduled_utc, scheduled_east, status, home_score, away_score
            FROM curated.games
            "#,
        )
        .fetch_all(&self.pool)
        .await?;

        Ok(rows
            .iter()
            .map(|row| Game {
                canonical_id: row.get("canonical_id"),
                league_game_id: row.get("league_game_id"),
                game_date: row.get("game_date"),
                home_abbrev: row.get("home_abbrev"),
                away_abbrev: row.get("away_abbrev"),
                scheduled_utc: row.get("scheduled_utc"),
                scheduled_east: row.get("scheduled_east"),
                status: GameStatus::parse(row.get("status")).unwrap_or(GameStatus::Scheduled),
                home_score: row.get("home_score"),
                away_score: row.get("away_score"),
            })
            .collect())
    }

    async fn load_sportsbooks(&self) -> Result<Vec<Sportsbook>> {
        let rows = sqlx::query(
            "SELECT id, canonical_name, display_name, abbreviation FROM curated.sportsbooks",
        )
        .fetch_all(&self.pool)
        .await?;

        Ok(rows
            .iter()
            .map(|row| Sportsbook {
                id: row.get("id"),
                canonical_name: row.get("canonical_name"),
                display_name: row.get("display_name"),
                abbreviation: row.get("abbreviation"),
            })
            .collect())
    }

    async fn load_sportsbook_mappings(&self) -> Result<Vec<SportsbookMapping>> {
        let rows = sqlx::query(
            r#"
            SELECT source, external_key, sportsbook_id, needs_review, created_at
            FROM operational.sportsbook_mappings
            "#,
        )
        .fetch_all(&self.pool)
        .await?;

        Ok(rows
            .iter()
            .map(|row| SportsbookMapping {
                source: row.get("source"),
                external_key: row.get("external_key"),
                sportsbook_id: row.get("sportsbook_id"),
                needs_review: row.get("needs_review"),
                created_at: row.get("created_at"),
            })
            .collect())
    }

    async fn insert_sportsbook_mappings(&self, mappings: &[SportsbookMapping]) -> Result<()> {
        if mappings.is_empty() {
            return Ok(());
        }
        let mut tx = self.begin().await?;
        for mapping in mappings {
            sqlx::query(
                r#"
                INSERT INTO operational.sportsbook_mappings (
                    source, external_key, sportsbook_id, needs_review, created_at
                )
                VALUES ($1, $2, $3, $4, $5)
                ON CONFLICT (source, external_key) DO NOTHING
                "#,
            )
            .bind(&mapping.source)
            .bind(&mapping.external_key)
            .bind(mapping.sportsbook_id)
            .bind(mapping.needs_review)
            .bind(mapping.created_at)
            .execute(&mut *tx)
            .await?;
        }
        tx.commit().await?;
        Ok(())
    }

    async fn upsert_staging_lines(&self, lines: &[BettingLine]) -> Result<u64> {
        self.upsert_lines("staging", lines).await
    }

    async fn load_staging_window(&self, window: CollectionWindow) -> Result<Vec<BettingLine>> {
        self.load_lines("staging", window).await
    }

    async fn upsert_curated_lines(&self, lines: &[BettingLine]) -> Result<u64> {
        self.upsert_lines("curated", lines).await
    }

    async fn replace_quarantine(&self, entries: &[QuarantinedLine]) -> Result<()> {
        let mut tx = self.begin().await?;
        sqlx::query("DELETE FROM operational.quarantine")
            .execute(&mut *tx)
            .await?;
        for entry in entries {
            sqlx::query(
                r#"
                INSERT INTO operational.quarantine (line, reason, quarantined_at)
                VALUES ($1, $2, $3)
                "#,
            )
            .bind(serde_json::to_value(&entry.line)?)
            .bind(entry.reason.as_str())
            .bind(entry.quarantined_at)
            .execute(&mut *tx)
            .await?;
        }
        tx.commit().await?;
        Ok(())
    }

    async fn load_quarantine(&self) -> Result<Vec<QuarantinedLine>> {
        let rows = sqlx::query(
            "SELECT line, reason, quarantined_at FROM operational.quarantine ORDER BY id ASC",
        )
        .fetch_all(&self.pool)
        .await?;

        let mut entries = Vec::with_capacity(rows.len());
        for row in &rows {
            let line = serde_json::from_value(row.get("line"))?;
            let reason = match row.get::<String, _>("reason").as_str() {
                "unknown_sportsbook" => RejectReason::UnknownSportsbook,
                _ => RejectReason::UnknownGame,
            };
            entries.push(QuarantinedLine {
                line,
                reason,
                quarantined_at: row.get("quarantined_at"),
            });
        }
        Ok(entries)
    }

    async fn record_run(&self, run: &PipelineRun) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO operational.pipeline_runs (
                run_id, mode, window_start, window_end, started_at, finished_at,
                status, zone_metrics
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
            ON CONFLICT (run_id) DO UPDATE SET
                finished_at = EXCLUDED.finished_at,
                status = EXCLUDED.status,
                zone_metrics = EXCLUDED.zone_metrics,
                updated_at = NOW()
            "#,
        )
        .bind(run.run_id)
        .bind(run.mode.as_str())
        .bind(run.window.start)
        .bind(run.window.end)
        .bind(run.started_at)
        .bind(run.finished_at)
        .bind(run.status.as_str())
        .bind(serde_json::to_value(&run.zone_metrics)?)
        .execute(&self.pool)
        .await?;
        Ok(())
    }
}

/// Curated keeps the best row per key; staging keeps the latest write.
async fn upsert_line(
    tx: &mut Transaction<'_, Postgres>,
    schema: &str,
    line: &BettingLine,
) -> Result<u64> {
    let quality_rank = match line.quality {
        crate::domain::DataQuality::Poor => 0i16,
        crate::domain::DataQuality::Low => 1,
        crate::domain::DataQuality::Medium => 2,
        crate::domain::DataQuality::High => 3,
    };

    let (table, line_value, price_a, price_b) = match &line.quote {
        MarketQuote::Moneyline {
            home_price,
            away_price,
        } => ("moneyline_lines", None, *home_price, *away_price),
        MarketQuote::Spread {
            line: spread,
            home_price,
            away_price,
        } => ("spread_lines", Some(*spread), *home_price, *away_price),
        MarketQuote::Total {
            line: total,
            over_price,
            under_price,
        } => ("total_lines", Some(*total), *over_price, *under_price),
    };

    // Staging overwrites on conflict; curated only when the new row wins on
    // (quality, reliability).
    let conflict_clause = if schema == "curated" {
        r#"
        DO UPDATE SET
            source = EXCLUDED.source,
            source_external_id = EXCLUDED.source_external_id,
            line_value = EXCLUDED.line_value,
            price_a = EXCLUDED.price_a,
            price_b = EXCLUDED.price_b,
            is_opening = EXCLUDED.is_opening,
            is_closing = EXCLUDED.is_closing,
            side_a_bets_pct = EXCLUDED.side_a_bets_pct,
            side_a_money_pct = EXCLUDED.side_a_money_pct,
            side_b_bets_pct = EXCLUDED.side_b_bets_pct,
            side_b_money_pct = EXCLUDED.side_b_money_pct,
            sharp_action = EXCLUDED.sharp_action,
            public_fade = EXCLUDED.public_fade,
            rlm = EXCLUDED.rlm,
            steam = EXCLUDED.steam,
            completeness = EXCLUDED.completeness,
            reliability = EXCLUDED.reliability,
            quality = EXCLUDED.quality,
            quality_rank = EXCLUDED.quality_rank,
            updated_at = NOW()
        WHERE (EXCLUDED.quality_rank, EXCLUDED.reliability)
            >= ({table}.quality_rank, {table}.reliability)
        "#
    } else {
        r#"
        DO UPDATE SET
            source = EXCLUDED.source,
            source_external_id = EXCLUDED.source_external_id,
            line_value = EXCLUDED.line_value,
            price_a = EXCLUDED.price_a,
            price_b = EXCLUDED.price_b,
            is_opening = EXCLUDED.is_opening,
            is_closing = EXCLUDED.is_closing,
            side_a_bets_pct = EXCLUDED.side_a_bets_pct,
            side_a_money_pct = EXCLUDED.side_a_money_pct,
            side_b_bets_pct = EXCLUDED.side_b_bets_pct,
            side_b_money_pct = EXCLUDED.side_b_money_pct,
            sharp_action = EXCLUDED.sharp_action,
            public_fade = EXCLUDED.public_fade,
            rlm = EXCLUDED.rlm,
            steam = EXCLUDED.steam,
            completeness = EXCLUDED.completeness,
            reliability = EXCLUDED.reliability,
            quality = EXCLUDED.quality,
            quality_rank = EXCLUDED.quality_rank,
            updated_at = NOW()
        "#
    };

    let sql = format!(
        r#"
        INSERT INTO {schema}.{table} (
            game_id, sportsbook_id, source, source_external_id, odds_timestamp,
            line_value, price_a, price_b, is_opening, is_closing,
            side_a_bets_pct, side_a_money_pct, side_b_bets_pct, side_b_money_pct,
            sharp_action, public_fade, rlm, steam,
            completeness, reliability, quality, quality_rank
        )
        VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10,
                $11, $12, $13, $14, $15, $16, $17, $18, $19, $20, $21, $22)
        ON CONFLICT (game_id, sportsbook_id, odds_timestamp)
        {conflict}
        "#,
        schema = schema,
        table = table,
        conflict = conflict_clause.replace("{table}", table),
    );

    let result = sqlx::query(&sql)
        .bind(&line.game_id)
        .bind(line.sportsbook_id)
        .bind(&line.source)
        .bind(&line.source_external_id)
        .bind(line.odds_timestamp)
        .bind(line_value)
        .bind(price_a)
        .bind(price_b)
        .bind(line.is_opening)
        .bind(line.is_closing)
        .bind(line.splits.side_a_bets_pct)
        .bind(line.splits.side_a_money_pct)
        .bind(line.splits.side_b_bets_pct)
        .bind(line.splits.side_b_money_pct)
        .bind(line.sharp_action.as_str())
        .bind(line.public_fade)
        .bind(line.rlm)
        .bind(line.steam)
        .bind(line.completeness)
        .bind(line.reliability)
        .bind(line.quality.as_str())
        .bind(quality_rank)
        .execute(&mut **tx)
        .await?;

    Ok(result.rows_affected())
}

fn select_lines_sql(schema: &str, market: Market) -> String {
    let table = match market {
        Market::Moneyline => "moneyline_lines",
        Market::Spread => "spread_lines",
        Market::Total => "total_lines",
    };
    format!(
        r#"
        SELECT game_id, sportsbook_id, source, source_external_id, odds_timestamp,
               line_value, price_a, price_b, is_opening, is_closing,
               side_a_bets_pct, side_a_money_pct, side_b_bets_pct, side_b_money_pct,
               sharp_action, public_fade, rlm, steam,
               completeness, reliability, quality
        FROM {schema}.{table}
        WHERE odds_timestamp::date >= $1 AND odds_timestamp::date <= $2
        ORDER BY odds_timestamp ASC
        "#,
        schema = schema,
        table = table
    )
}

fn line_from_row(row: &sqlx::postgres::PgRow, market: Market) -> Result<BettingLine> {
    let price_a: i32 = row.get("price_a");
    let price_b: i32 = row.get("price_b");
    let line_value: Option<Decimal> = row.get("line_value");

    let quote = match market {
        Market::Moneyline => MarketQuote::Moneyline {
            home_price: price_a,
            away_price: price_b,
        },
        Market::Spread => MarketQuote::Spread {
            line: line_value.ok_or_else(|| {
                SharplineError::Persistence("spread row missing line_value".into())
            })?,
            home_price: price_a,
            away_price: price_b,
        },
        Market::Total => MarketQuote::Total {
            line: line_value.ok_or_else(|| {
                SharplineError::Persistence("total row missing line_value".into())
            })?,
            over_price: price_a,
            under_price: price_b,
        },
    };

    let sharp_action = match row.get::<String, _>("sharp_action").as_str() {
        "heavy_home" => SharpAction::HeavyHome,
        "heavy_away" => SharpAction::HeavyAway,
        "heavy_over" => SharpAction::HeavyOver,
        "heavy_under" => SharpAction::HeavyUnder,
        _ => SharpAction::None,
    };

    let quality = match row.get::<String, _>("quality").as_str() {
        "HIGH" => crate::domain::DataQuality::High,
        "MEDIUM" => crate::domain::DataQuality::Medium,
        "LOW" => crate::domain::DataQuality::Low,
        _ => crate::domain::DataQuality::Poor,
    };

    Ok(BettingLine {
        game_id: row.get("game_id"),
        sportsbook_id: row.get("sportsbook_id"),
        quote,
        source: row.get("source"),
        source_external_id: row.get("source_external_id"),
        odds_timestamp: row.get("odds_timestamp"),
        is_opening: row.get("is_opening"),
        is_closing: row.get("is_closing"),
        splits: VolumeSplits {
            side_a_bets_pct: row.get("side_a_bets_pct"),
            side_a_money_pct: row.get("side_a_money_pct"),
            side_b_bets_pct: row.get("side_b_bets_pct"),
            side_b_money_pct: row.get("side_b_money_pct"),
        },
        sharp_action,
        public_fade: row.get("public_fade"),
        rlm: row.get("rlm"),
        steam: row.get("steam"),
        completeness: row.get("completeness"),
        reliability: row.get("reliability"),
        quality,
    })
}

fn map_pool_error(e: sqlx::Error) -> SharplineError {
    match e {
        sqlx::Error::PoolTimedOut => {
            SharplineError::ResourceExhausted("connection pool exhausted".into())
        }
        other => SharplineError::Database(other),
    }
}

/// One-time reference data: the sportsbooks every deployment knows about.
pub async fn bootstrap_sportsbooks(store: &PgStore) -> Result<()> {
    let books = [
        (1, "DraftKings", "DK"),
        (2, "FanDuel", "FD"),
        (3, "BetMGM", "MGM"),
        (4, "Caesars", "CZR"),
        (5, "BetRivers", "BR"),
        (6, "Circa", "CIRCA"),
        (7, "Pinnacle", "PIN"),
        (8, "ESPN BET", "ESPNB"),
        (9, "Fanatics", "FAN"),
        (10, "Hard Rock Bet", "HRB"),
    ];

    let mut tx = store.begin().await?;
    for (id, name, abbrev) in books {
        sqlx::query(
            r#"
            INSERT INTO curated.sportsbooks (id, canonical_name, display_name, abbreviation)
            VALUES ($1, $2, $2, $3)
            ON CONFLICT (id) DO NOTHING
            "#,
        )
        .bind(id)
        .bind(name)
        .bind(abbrev)
        .execute(&mut *tx)
        .await?;
    }
    tx.commit().await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_store_health_display() {
        assert_eq!(StoreHealth::Ok.to_string(), "ok");
        assert_eq!(StoreHealth::Degraded.to_string(), "degraded");
        assert_eq!(StoreHealth::Down.to_string(), "down");
    }

    #[test]
    fn test_pool_error_mapping() {
        let mapped = map_pool_error(sqlx::Error::PoolTimedOut);
        assert!(matches!(mapped, SharplineError::ResourceExhausted(_)));
    }

    #[test]
    fn test_select_sql_targets_market_table() {
        let sql = select_lines_sql("curated", Market::Spread);
        assert!(sql.contains("curated.spread_lines"));
        let sql = select_lines_sql("staging", Market::Moneyline);
        assert!(sql.contains("staging.moneyline_lines"));
    }
}
