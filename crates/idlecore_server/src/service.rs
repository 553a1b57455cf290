//! # Game Service
//!
//! The command surface: load a player, run one economy operation, save.
//! A failed operation is never persisted.
//!
//! ```text
//! Command ──► GameService ──► lock(id) ──► load ──► EconomyEngine ──► save
//! ```
//!
//! Player locks are shared with the [`UpdateScheduler`](crate::scheduler::UpdateScheduler)
//! so a command and a tick never interleave on the same player.

use std::collections::BTreeMap;
use std::fmt::Write as _;
use std::sync::Arc;

use idlecore_economy::{EconomyEngine, EconomyError, GameEvent, PlayerState};

use crate::command::{Command, HELP};
use crate::error::{ServiceError, ServiceResult, StoreError};
use crate::store::{PlayerLocks, PlayerStore};

/// Player-facing operations over a store.
#[derive(Clone)]
pub struct GameService {
    engine: Arc<EconomyEngine>,
    store: Arc<dyn PlayerStore>,
    locks: Arc<PlayerLocks>,
}

impl std::fmt::Debug for GameService {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GameService")
            .field("engine", &self.engine)
            .finish_non_exhaustive()
    }
}

impl GameService {
    /// Creates a service.
    #[must_use]
    pub fn new(
        engine: Arc<EconomyEngine>,
        store: Arc<dyn PlayerStore>,
        locks: Arc<PlayerLocks>,
    ) -> Self {
        Self {
            engine,
            store,
            locks,
        }
    }

    /// The economy engine.
    #[must_use]
    pub fn engine(&self) -> &Arc<EconomyEngine> {
        &self.engine
    }

    // ========================================================================
    // Lifecycle
    // ========================================================================

    /// Creates and stores a fresh player.
    ///
    /// # Errors
    ///
    /// [`ServiceError::PlayerExists`] if `id` is taken, or a store/codec
    /// failure.
    pub fn create_player(&self, id: &str) -> ServiceResult<PlayerState> {
        self.locks.with_lock(id, || {
            if self.store.contains(id) {
                return Err(ServiceError::PlayerExists(id.to_string()));
            }
            let player = self.engine.create_player(id);
            self.save(&player)?;
            Ok(player)
        })
    }

    /// Loads a player snapshot.
    ///
    /// # Errors
    ///
    /// [`EconomyError::UnknownPlayer`] if nothing is stored under `id`.
    pub fn get_player(&self, id: &str) -> ServiceResult<PlayerState> {
        let blob = self.store.load(id).map_err(|e| match e {
            StoreError::NotFound(id) => ServiceError::Economy(EconomyError::UnknownPlayer(id)),
            other => ServiceError::Store(other),
        })?;
        PlayerState::from_bytes(&blob).map_err(|e| ServiceError::Codec(format!("player {id}: {e}")))
    }

    fn save(&self, player: &PlayerState) -> ServiceResult<()> {
        let blob = player
            .to_bytes()
            .map_err(|e| ServiceError::Codec(format!("player {}: {e}", player.id)))?;
        self.store.save(&player.id, &blob)?;
        Ok(())
    }

    /// Load, mutate, save on success, all under the player's lock.
    ///
    /// Events raised by `op` are published only after the save, so
    /// subscribers never see a change that was not committed.
    fn with_player<T>(
        &self,
        id: &str,
        op: impl FnOnce(&EconomyEngine, &mut PlayerState, &mut Vec<GameEvent>) -> Result<T, EconomyError>,
    ) -> ServiceResult<T> {
        self.locks.with_lock(id, || {
            let mut player = self.get_player(id)?;
            let mut pending = Vec::new();
            let value = op(&self.engine, &mut player, &mut pending)?;
            self.save(&player)?;
            self.engine.events().publish(pending);
            Ok(value)
        })
    }

    // ========================================================================
    // Commands
    // ========================================================================

    /// Buys an upgrade or one building.
    ///
    /// # Errors
    ///
    /// Any [`EconomyError`] from the purchase, or a store failure.
    pub fn buy(&self, id: &str, key: &str) -> ServiceResult<idlecore_economy::Purchase> {
        self.with_player(id, |engine, player, pending| {
            engine.buy_deferred(player, key, pending)
        })
    }

    /// Sells one building; returns the refund.
    ///
    /// # Errors
    ///
    /// Any [`EconomyError`] from the sale, or a store failure.
    pub fn sell(&self, id: &str, key: &str) -> ServiceResult<BTreeMap<String, f64>> {
        self.with_player(id, |engine, player, pending| {
            engine.sell_deferred(player, key, pending)
        })
    }

    /// Performs prestige; returns the new prestige level.
    ///
    /// # Errors
    ///
    /// Any [`EconomyError`] from the prestige, or a store failure.
    pub fn perform_prestige(&self, id: &str) -> ServiceResult<u32> {
        self.with_player(id, EconomyEngine::perform_prestige_deferred)
    }

    /// Resource balances.
    ///
    /// # Errors
    ///
    /// [`EconomyError::UnknownPlayer`] or a store failure.
    pub fn get_player_resources(&self, id: &str) -> ServiceResult<BTreeMap<String, u64>> {
        Ok(self.get_player(id)?.resources)
    }

    /// Building counts.
    ///
    /// # Errors
    ///
    /// [`EconomyError::UnknownPlayer`] or a store failure.
    pub fn get_player_buildings(&self, id: &str) -> ServiceResult<BTreeMap<String, u32>> {
        Ok(self.get_player(id)?.buildings)
    }

    /// Runs a parsed command and renders the reply.
    ///
    /// # Errors
    ///
    /// Whatever the underlying operation returns.
    pub fn execute(&self, id: &str, command: &Command) -> ServiceResult<String> {
        let reply = match command {
            Command::Create => {
                self.create_player(id)?;
                format!("created player {id}")
            }
            Command::Buy(key) => {
                let purchase = self.buy(id, key)?;
                format!("bought {} (owned: {})", purchase.key, purchase.owned)
            }
            Command::Sell(key) => {
                let refund = self.sell(id, key)?;
                format!("sold {key}, refunded {}", render_amounts(&refund))
            }
            Command::Prestige => {
                let level = self.perform_prestige(id)?;
                format!("prestige level {level}")
            }
            Command::Resources => render_counts(&self.get_player_resources(id)?),
            Command::Buildings => render_counts(&self.get_player_buildings(id)?),
            Command::Status => render_status(&self.get_player(id)?),
            Command::Help => HELP.to_string(),
        };
        Ok(reply)
    }
}

fn render_counts<V: std::fmt::Display>(counts: &BTreeMap<String, V>) -> String {
    if counts.is_empty() {
        return "(none)".to_string();
    }
    counts
        .iter()
        .map(|(k, v)| format!("{k}: {v}"))
        .collect::<Vec<_>>()
        .join(", ")
}

fn render_amounts(amounts: &BTreeMap<String, f64>) -> String {
    amounts
        .iter()
        .map(|(k, v)| format!("{v} {k}"))
        .collect::<Vec<_>>()
        .join(", ")
}

fn render_status(player: &PlayerState) -> String {
    let mut out = String::new();
    let _ = writeln!(out, "player {} (prestige {})", player.id, player.prestige);
    let _ = writeln!(out, "resources: {}", render_counts(&player.resources));
    let _ = writeln!(out, "buildings: {}", render_counts(&player.buildings));
    let owned: Vec<&str> = player
        .upgrades
        .iter()
        .filter(|(_, owned)| **owned)
        .map(|(k, _)| k.as_str())
        .collect();
    let _ = writeln!(out, "upgrades: {}", if owned.is_empty() { "(none)".to_string() } else { owned.join(", ") });
    let _ = writeln!(out, "achievements: {}", render_counts(&player.achievements));
    for line in &player.log {
        let _ = writeln!(out, "  > {line}");
    }
    out.trim_end().to_string()
}
