//! Canonical identity resolution
//!
//! Centralizes game and sportsbook resolution. Collectors emit external
//! identifiers verbatim; the staging zone asks this resolver for canonical
//! ids. Resolution is deterministic given the mapping tables; refreshes go
//! through a single writer lock per table.

use chrono::NaiveDate;
use std::collections::HashMap;
use tokio::sync::RwLock;
use tracing::{debug, info};

use crate::config::IdentityConfig;
use crate::domain::{Game, SportsbookMapping};

use super::aliases::normalize_team;

/// Lookup request for a game identity
#[derive(Debug, Clone)]
pub struct GameLookup {
    pub league_game_id: Option<i64>,
    pub game_date: Option<NaiveDate>,
    pub home_team: Option<String>,
    pub away_team: Option<String>,
}

/// Outcome of a game lookup
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GameResolution {
    Resolved(String),
    /// Quarantined pending schedule data or mapping review
    Unresolved,
}

/// Outcome of a sportsbook lookup
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SportsbookResolution {
    Resolved(i32),
    /// A mapping entry was created and flagged for manual review
    PendingReview,
}

/// Size-bounded cache with least-recently-touched eviction
struct BoundedCache {
    entries: HashMap<String, (String, u64)>,
    clock: u64,
    capacity: usize,
}

impl BoundedCache {
    fn new(capacity: usize) -> Self {
        Self {
            entries: HashMap::new(),
            clock: 0,
            capacity: capacity.max(1),
        }
    }

    fn get(&mut self, key: &str) -> Option<String> {
        self.clock += 1;
        let clock = self.clock;
        self.entries.get_mut(key).map(|(value, touched)| {
            *touched = clock;
            value.clone()
        })
    }

    fn insert(&mut self, key: String, value: String) {
        self.clock += 1;
        if self.entries.len() >= self.capacity && !self.entries.contains_key(&key) {
            if let Some(oldest) = self
                .entries
                .iter()
                .min_by_key(|(_, (_, touched))| *touched)
                .map(|(k, _)| k.clone())
            {
                self.entries.remove(&oldest);
            }
        }
        self.entries.insert(key, (value, self.clock));
    }
}

/// Canonical game + sportsbook resolver
pub struct IdentityResolver {
    fuzzy_match_enabled: bool,
    /// canonical id → game, fed by schedule imports
    games: RwLock<HashMap<String, Game>>,
    /// official league id → canonical id
    league_index: RwLock<HashMap<i64, String>>,
    /// (source, lowercase external key) → sportsbook id
    sportsbook_mappings: RwLock<HashMap<(String, String), i32>>,
    /// lowercase canonical name → sportsbook id
    sportsbook_names: RwLock<HashMap<String, i32>>,
    /// lookup cache over the tuple/fuzzy paths
    cache: RwLock<BoundedCache>,
    /// mappings created lazily, awaiting persistence + review
    pending_mappings: RwLock<Vec<SportsbookMapping>>,
}

impl IdentityResolver {
    pub fn new(config: &IdentityConfig) -> Self {
        Self {
            fuzzy_match_enabled: config.fuzzy_match_enabled,
            games: RwLock::new(HashMap::new()),
            league_index: RwLock::new(HashMap::new()),
            sportsbook_mappings: RwLock::new(HashMap::new()),
            sportsbook_names: RwLock::new(HashMap::new()),
            cache: RwLock::new(BoundedCache::new(config.mapping_cache_size)),
            pending_mappings: RwLock::new(Vec::new()),
        }
    }

    /// Register a game from the schedule source (or raw-zone first sight).
    pub async fn register_game(&self, game: Game) {
        if let Some(league_id) = game.league_game_id {
            self.league_index
                .write()
                .await
                .insert(league_id, game.canonical_id.clone());
        }
        self.games
            .write()
            .await
            .insert(game.canonical_id.clone(), game);
    }

    pub async fn register_games(&self, games: Vec<Game>) {
        for game in games {
            self.register_game(game).await;
        }
    }

    pub async fn game_count(&self) -> usize {
        self.games.read().await.len()
    }

    pub async fn get_game(&self, canonical_id: &str) -> Option<Game> {
        self.games.read().await.get(canonical_id).cloned()
    }

    /// Register a known sportsbook and its canonical name.
    pub async fn register_sportsbook(&self, id: i32, canonical_name: &str) {
        self.sportsbook_names
            .write()
            .await
            .insert(canonical_name.to_ascii_lowercase(), id);
    }

    /// Register an external mapping loaded from persistence.
    pub async fn register_sportsbook_mapping(&self, source: &str, external_key: &str, id: i32) {
        self.sportsbook_mappings
            .write()
            .await
            .insert((source.to_string(), external_key.to_ascii_lowercase()), id);
    }

    /// Resolve a game. Order: league id → canonical tuple → fuzzy aliases.
    pub async fn resolve_game(&self, lookup: &GameLookup) -> GameResolution {
        if let Some(league_id) = lookup.league_game_id {
            if let Some(canonical) = self.league_index.read().await.get(&league_id) {
                return GameResolution::Resolved(canonical.clone());
            }
        }

        let (date, home, away) = match (&lookup.game_date, &lookup.home_team, &lookup.away_team) {
            (Some(date), Some(home), Some(away)) => (*date, home.as_str(), away.as_str()),
            _ => return GameResolution::Unresolved,
        };

        let cache_key = format!("{}|{}|{}", date, away.to_ascii_lowercase(), home.to_ascii_lowercase());
        if let Some(hit) = self.cache.write().await.get(&cache_key) {
            return GameResolution::Resolved(hit);
        }

        // First normalized lookup: the tuple as given
        let direct = Game::canonical_id_for(date, away, home);
        if self.games.read().await.contains_key(&direct) {
            self.cache.write().await.insert(cache_key, direct.clone());
            return GameResolution::Resolved(direct);
        }

        // Second normalized lookup: alias-table normalization
        if self.fuzzy_match_enabled {
            if let (Some(home_abbrev), Some(away_abbrev)) =
                (normalize_team(home), normalize_team(away))
            {
                let fuzzy = Game::canonical_id_for(date, away_abbrev, home_abbrev);
                if self.games.read().await.contains_key(&fuzzy) {
                    debug!(
                        home = home,
                        away = away,
                        canonical = %fuzzy,
                        "resolved game via alias normalization"
                    );
                    self.cache.write().await.insert(cache_key, fuzzy.clone());
                    return GameResolution::Resolved(fuzzy);
                }
            }
        }

        GameResolution::Unresolved
    }

    /// Resolve a sportsbook by `(source, external id)` then `(source, name)`.
    ///
    /// A miss creates a pending mapping flagged for manual review so the same
    /// unknown identifier is only surfaced once.
    pub async fn resolve_sportsbook(&self, source: &str, external_key: &str) -> SportsbookResolution {
        let key = (source.to_string(), external_key.to_ascii_lowercase());

        if let Some(id) = self.sportsbook_mappings.read().await.get(&key) {
            return SportsbookResolution::Resolved(*id);
        }

        if let Some(id) = self
            .sportsbook_names
            .read()
            .await
            .get(&external_key.to_ascii_lowercase())
        {
            let id = *id;
            // Remember the exact-match path for next time
            self.sportsbook_mappings.write().await.insert(key, id);
            return SportsbookResolution::Resolved(id);
        }

        let mut pending = self.pending_mappings.write().await;
        let already_pending = pending
            .iter()
            .any(|m| m.source == source && m.external_key.eq_ignore_ascii_case(external_key));
        if !already_pending {
            info!(
                source = source,
                external = external_key,
                "unknown sportsbook identifier, flagged for review"
            );
            pending.push(SportsbookMapping::pending_review(source, external_key));
        }

        SportsbookResolution::PendingReview
    }

    /// Drain mappings created since the last call, for persistence.
    pub async fn take_pending_mappings(&self) -> Vec<SportsbookMapping> {
        std::mem::take(&mut *self.pending_mappings.write().await)
    }
}
