//! End-to-end pipeline scenarios against an in-memory store.

use async_trait::async_trait;
use chrono::{NaiveDate, TimeZone, Utc};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::Mutex;
use uuid::Uuid;

use sharpline::config::AppConfig;
use sharpline::domain::{
    BettingLine, CollectionWindow, DataQuality, Game, LineKey, ParseStatus, PipelineRun,
    RawRecord, RunMode, RunStatus, SharpAction, Sportsbook, SportsbookMapping,
};
use sharpline::error::Result;
use sharpline::persistence::PipelineStore;
use sharpline::pipeline::{Orchestrator, QuarantinedLine};
use sharpline::shutdown::ShutdownController;
use sharpline::IdentityResolver;

/// Minimal in-memory stand-in for the Postgres adapter
#[derive(Default)]
struct MemoryStore {
    raw: Mutex<Vec<RawRecord>>,
    games: Mutex<Vec<Game>>,
    sportsbooks: Mutex<Vec<Sportsbook>>,
    mappings: Mutex<Vec<SportsbookMapping>>,
    staging: Mutex<HashMap<LineKey, BettingLine>>,
    curated: Mutex<HashMap<LineKey, BettingLine>>,
    quarantine: Mutex<Vec<QuarantinedLine>>,
    runs: Mutex<Vec<PipelineRun>>,
}

#[async_trait]
impl PipelineStore for MemoryStore {
    async fn insert_raw_batch(&self, records: &[RawRecord]) -> Result<u64> {
        let mut raw = self.raw.lock().await;
        let mut inserted = 0;
        for record in records {
            let key = record.idempotency_key();
            if raw.iter().all(|r| r.idempotency_key() != key) {
                raw.push(record.clone());
                inserted += 1;
            }
        }
        Ok(inserted)
    }

    async fn load_raw_window(&self, window: CollectionWindow) -> Result<Vec<RawRecord>> {
        Ok(self
            .raw
            .lock()
            .await
            .iter()
            .filter(|r| window.contains(r.odds_timestamp.date_naive()))
            .cloned()
            .collect())
    }

    async fn upsert_games(&self, games: &[Game]) -> Result<()> {
        let mut stored = self.games.lock().await;
        for game in games {
            stored.retain(|g| g.canonical_id != game.canonical_id);
            stored.push(game.clone());
        }
        Ok(())
    }

    async fn load_games(&self) -> Result<Vec<Game>> {
        Ok(self.games.lock().await.clone())
    }

    async fn load_sportsbooks(&self) -> Result<Vec<Sportsbook>> {
        Ok(self.sportsbooks.lock().await.clone())
    }

    async fn load_sportsbook_mappings(&self) -> Result<Vec<SportsbookMapping>> {
        Ok(self.mappings.lock().await.clone())
    }

    async fn insert_sportsbook_mappings(&self, mappings: &[SportsbookMapping]) -> Result<()> {
        self.mappings.lock().await.extend(mappings.iter().cloned());
        Ok(())
    }

    async fn upsert_staging_lines(&self, lines: &[BettingLine]) -> Result<u64> {
        let mut staging = self.staging.lock().await;
        for line in lines {
            staging.insert(line.key(), line.clone());
        }
        Ok(lines.len() as u64)
    }

    async fn load_staging_window(&self, window: CollectionWindow) -> Result<Vec<BettingLine>> {
        let mut lines: Vec<BettingLine> = self
            .staging
            .lock()
            .await
            .values()
            .filter(|l| window.contains(l.odds_timestamp.date_naive()))
            .cloned()
            .collect();
        lines.sort_by(|a, b| a.odds_timestamp.cmp(&b.odds_timestamp));
        Ok(lines)
    }

    async fn upsert_curated_lines(&self, lines: &[BettingLine]) -> Result<u64> {
        let mut curated = self.curated.lock().await;
        for line in lines {
            let key = line.key();
            let wins = match curated.get(&key) {
                None => true,
                Some(existing) => {
                    (line.quality, line.reliability) >= (existing.quality, existing.reliability)
                }
            };
            if wins {
                curated.insert(key, line.clone());
            }
        }
        Ok(lines.len() as u64)
    }

    async fn replace_quarantine(&self, entries: &[QuarantinedLine]) -> Result<()> {
        *self.quarantine.lock().await = entries.to_vec();
        Ok(())
    }

    async fn load_quarantine(&self) -> Result<Vec<QuarantinedLine>> {
        Ok(self.quarantine.lock().await.clone())
    }

    async fn record_run(&self, run: &PipelineRun) -> Result<()> {
        self.runs.lock().await.push(run.clone());
        Ok(())
    }
}

fn window() -> CollectionWindow {
    CollectionWindow::single_day(NaiveDate::from_ymd_opt(2025, 5, 1).unwrap())
}

fn seeded_store() -> Arc<MemoryStore> {
    let store = MemoryStore::default();
    let date = NaiveDate::from_ymd_opt(2025, 5, 1).unwrap();
    let game = Game::new(date, "NYY", "BOS");
    store.games.try_lock().unwrap().push(game);
    store.sportsbooks.try_lock().unwrap().push(Sportsbook::new(7, "Pinnacle"));
    store
        .mappings
        .try_lock()
        .unwrap()
        .push(SportsbookMapping::resolved("odds_api", "15", 7));
    Arc::new(store)
}

fn moneyline_raw_record(odds_minute: u32) -> RawRecord {
    RawRecord {
        source: "odds_api".into(),
        external_id: "evt-8841".into(),
        fetched_at: Utc::now(),
        odds_timestamp: Utc
            .with_ymd_and_hms(2025, 5, 1, 12, odds_minute, 0)
            .unwrap(),
        payload: serde_json::json!({
            "id": "evt-8841",
            "commence_time": "2025-05-01T23:05:00Z",
            "home_team": "Boston Red Sox",
            "away_team": "New York Yankees",
            "bookmakers": [{
                "key": "15",
                "title": "Pinnacle",
                "last_update": format!("2025-05-01T12:{:02}:00Z", odds_minute),
                "markets": [{
                    "key": "h2h",
                    "last_update": format!("2025-05-01T12:{:02}:00Z", odds_minute),
                    "outcomes": [
                        {"name": "Boston Red Sox", "price": -140},
                        {"name": "New York Yankees", "price": 120}
                    ]
                }]
            }]
        }),
        batch_id: Uuid::new_v4(),
        parse_status: ParseStatus::Ok,
    }
}

fn make_orchestrator(store: Arc<MemoryStore>) -> Orchestrator {
    let config = AppConfig::load("config/default.toml").expect("default config loads");
    let resolver = Arc::new(IdentityResolver::new(&config.identity));
    Orchestrator::new(config, store, resolver, Vec::new())
}

#[tokio::test]
async fn happy_path_produces_one_high_quality_curated_row() {
    let store = seeded_store();
    store
        .insert_raw_batch(&[moneyline_raw_record(0)])
        .await
        .unwrap();

    let orchestrator = make_orchestrator(store.clone());
    orchestrator.prime_resolver().await.unwrap();

    let controller = ShutdownController::new();
    let run = orchestrator
        .run(RunMode::Pair, window(), controller.token())
        .await;

    assert_eq!(run.status, RunStatus::Succeeded);

    let curated = store.curated.lock().await;
    assert_eq!(curated.len(), 1);
    let line = curated.values().next().unwrap();
    assert_eq!(line.game_id, "2025-05-01-NYY-BOS");
    assert_eq!(line.sportsbook_id, 7);
    assert_eq!(line.quality, DataQuality::High);
    assert_eq!(line.sharp_action, SharpAction::None);
}

#[tokio::test]
async fn duplicate_submissions_leave_single_rows() {
    let store = seeded_store();

    // Same record twice in one batch, then again in a later batch
    let first = store
        .insert_raw_batch(&[moneyline_raw_record(0), moneyline_raw_record(0)])
        .await
        .unwrap();
    let second = store.insert_raw_batch(&[moneyline_raw_record(0)]).await.unwrap();
    assert_eq!(first, 1);
    assert_eq!(second, 0);
    assert_eq!(store.raw.lock().await.len(), 1);

    let orchestrator = make_orchestrator(store.clone());
    orchestrator.prime_resolver().await.unwrap();
    let controller = ShutdownController::new();
    orchestrator
        .run(RunMode::Pair, window(), controller.token())
        .await;

    assert_eq!(store.curated.lock().await.len(), 1);
}

#[tokio::test]
async fn rerunning_the_same_window_is_idempotent() {
    let store = seeded_store();
    store
        .insert_raw_batch(&[moneyline_raw_record(0), moneyline_raw_record(30)])
        .await
        .unwrap();

    let orchestrator = make_orchestrator(store.clone());
    orchestrator.prime_resolver().await.unwrap();
    let controller = ShutdownController::new();

    let first = orchestrator
        .run(RunMode::Pair, window(), controller.token())
        .await;
    let snapshot: Vec<BettingLine> = {
        let curated = store.curated.lock().await;
        let mut lines: Vec<_> = curated.values().cloned().collect();
        lines.sort_by(|a, b| a.odds_timestamp.cmp(&b.odds_timestamp));
        lines
    };

    let second = orchestrator
        .run(RunMode::Pair, window(), controller.token())
        .await;
    let after: Vec<BettingLine> = {
        let curated = store.curated.lock().await;
        let mut lines: Vec<_> = curated.values().cloned().collect();
        lines.sort_by(|a, b| a.odds_timestamp.cmp(&b.odds_timestamp));
        lines
    };

    assert_eq!(first.status, RunStatus::Succeeded);
    assert_eq!(second.status, RunStatus::Succeeded);
    assert_eq!(snapshot.len(), after.len());
    for (a, b) in snapshot.iter().zip(after.iter()) {
        assert_eq!(a.odds_timestamp, b.odds_timestamp);
        assert_eq!(a.quote, b.quote);
        assert_eq!(a.rlm, b.rlm);
        assert_eq!(a.steam, b.steam);
        assert_eq!(a.quality, b.quality);
    }
}

#[tokio::test]
async fn unresolved_game_quarantines_then_recovers_after_schedule_import() {
    // Store knows the sportsbook but NOT the game
    let store = MemoryStore::default();
    store
        .sportsbooks
        .try_lock()
        .unwrap()
        .push(Sportsbook::new(7, "Pinnacle"));
    store
        .mappings
        .try_lock()
        .unwrap()
        .push(SportsbookMapping::resolved("odds_api", "15", 7));
    let store = Arc::new(store);

    let date = NaiveDate::from_ymd_opt(2025, 5, 1).unwrap();
    let record = RawRecord {
        payload: serde_json::json!({
            "id": "evt-9001",
            "commence_time": "2025-05-01T23:05:00Z",
            "home_team": "Oakland Athletics",
            "away_team": "Los Angeles Angels",
            "bookmakers": [{
                "key": "15",
                "last_update": "2025-05-01T12:00:00Z",
                "markets": [{
                    "key": "h2h",
                    "last_update": "2025-05-01T12:00:00Z",
                    "outcomes": [
                        {"name": "Oakland Athletics", "price": 110},
                        {"name": "Los Angeles Angels", "price": -130}
                    ]
                }]
            }]
        }),
        external_id: "evt-9001".into(),
        ..moneyline_raw_record(0)
    };
    store.insert_raw_batch(&[record]).await.unwrap();

    let orchestrator = make_orchestrator(store.clone());
    orchestrator.prime_resolver().await.unwrap();
    let controller = ShutdownController::new();

    orchestrator
        .run(RunMode::Pair, window(), controller.token())
        .await;
    assert!(store.curated.lock().await.is_empty());
    assert_eq!(store.quarantine.lock().await.len(), 1);

    // Schedule import arrives: build a fresh orchestrator (fresh resolver)
    // over the same store, as a later scheduled run would.
    store
        .upsert_games(&[Game::new(date, "LAA", "OAK")])
        .await
        .unwrap();
    let orchestrator = make_orchestrator(store.clone());
    orchestrator.prime_resolver().await.unwrap();
    orchestrator
        .run(RunMode::Pair, window(), controller.token())
        .await;

    assert!(store.quarantine.lock().await.is_empty());
    let curated = store.curated.lock().await;
    assert_eq!(curated.len(), 1);
    assert_eq!(curated.values().next().unwrap().game_id, "2025-05-01-LAA-OAK");
}

#[tokio::test]
async fn empty_window_with_input_elsewhere_reports_no_failure() {
    let store = seeded_store();
    let orchestrator = make_orchestrator(store);
    orchestrator.prime_resolver().await.unwrap();
    let controller = ShutdownController::new();

    // Nothing ingested at all: zero in, zero out
    let run = orchestrator
        .run(RunMode::Pair, window(), controller.token())
        .await;
    // No input means nothing was "produced" but nothing was lost either
    assert_ne!(run.status, RunStatus::Partial);
}
