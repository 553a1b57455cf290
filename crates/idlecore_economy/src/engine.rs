//! # Economy Engine
//!
//! The rules layer: Buy, Sell, Prestige, achievements and the per-player
//! tick. Reads the catalog, evaluates formulas, hands results to the
//! [`EffectResolver`] and emits [`GameEvent`]s.
//!
//! ## Tick Order
//!
//! ```text
//! yield per resource ──► × upgrade multiplier ──► × persistent multiplier
//!        ──► credit ──► expire shinies ──► achievements
//! ```
//!
//! ## Atomicity
//!
//! Every command validates before it mutates. A failed Buy, Sell or
//! Prestige leaves the player untouched.

use std::collections::BTreeMap;
use std::sync::Arc;

use crate::config::EngineConfig;
use crate::content::{category, ContentItem, ContentRegistry, EffectKind};
use crate::effects::EffectResolver;
use crate::error::{EconomyError, EconomyResult};
use crate::events::{EventBus, GameEvent};
use crate::expression::{ExpressionEngine, FormulaCache, Variables};
use crate::player::{now_millis, PlayerState};

/// Milliseconds per second, for shiny `duration` properties.
const MS_PER_SECOND: f64 = 1000.0;

/// Result of a successful Buy.
#[derive(Clone, Debug, PartialEq)]
pub struct Purchase {
    /// Item key.
    pub key: String,
    /// `upgrades` or `buildings`.
    pub category: &'static str,
    /// Resources spent.
    pub cost: BTreeMap<String, f64>,
    /// Owned count afterwards (1 for upgrades).
    pub owned: u32,
}

/// What one tick did to one player.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct TickSummary {
    /// Amount credited per resource (after multipliers).
    pub credited: BTreeMap<String, f64>,
    /// Achievement levels unlocked this tick.
    pub unlocked: Vec<(String, u32)>,
    /// Shinies whose timer ran out.
    pub expired_shinies: usize,
}

/// Buy/Sell/Prestige/Achievement orchestration.
#[derive(Debug)]
pub struct EconomyEngine {
    registry: Arc<ContentRegistry>,
    expressions: ExpressionEngine,
    events: EventBus,
    config: EngineConfig,
}

impl EconomyEngine {
    /// Creates an engine with its own formula cache.
    ///
    /// # Errors
    ///
    /// Returns [`EconomyError::Config`] if `config` is invalid.
    pub fn new(registry: Arc<ContentRegistry>, config: EngineConfig) -> EconomyResult<Self> {
        Self::with_cache(registry, config, Arc::new(FormulaCache::new()))
    }

    /// Creates an engine over a shared formula cache.
    ///
    /// # Errors
    ///
    /// Returns [`EconomyError::Config`] if `config` is invalid.
    pub fn with_cache(
        registry: Arc<ContentRegistry>,
        config: EngineConfig,
        cache: Arc<FormulaCache>,
    ) -> EconomyResult<Self> {
        config.validate()?;
        let expressions = ExpressionEngine::new(cache, config.cache_ttl(), config.make_rng());
        Ok(Self {
            registry,
            expressions,
            events: EventBus::new(),
            config,
        })
    }

    /// The catalog.
    #[must_use]
    pub fn registry(&self) -> &ContentRegistry {
        &self.registry
    }

    /// The formula evaluator.
    #[must_use]
    pub fn expressions(&self) -> &ExpressionEngine {
        &self.expressions
    }

    /// The event bus economy events are emitted on.
    #[must_use]
    pub fn events(&self) -> &EventBus {
        &self.events
    }

    /// Active configuration.
    #[must_use]
    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// Fresh player seeded from the catalog.
    #[must_use]
    pub fn create_player(&self, id: &str) -> PlayerState {
        tracing::info!(player = id, "player created");
        PlayerState::new(id, &self.registry)
    }

    fn resolver(&self, now_ms: u64) -> EffectResolver<'_> {
        EffectResolver::new(&self.registry, &self.expressions, now_ms)
    }

    // ========================================================================
    // Buy / Sell
    // ========================================================================

    /// Cost of the next building when `owned` are already owned:
    /// `base * (owned + 1)` per resource.
    #[must_use]
    pub fn building_cost(item: &ContentItem, owned: u32) -> BTreeMap<String, f64> {
        let factor = f64::from(owned) + 1.0;
        item.cost
            .iter()
            .map(|(resource, base)| (resource.clone(), base * factor))
            .collect()
    }

    /// Buys an upgrade or the next unit of a building.
    ///
    /// Upgrades are looked up first; a key present in both catalogs buys
    /// the upgrade.
    ///
    /// # Errors
    ///
    /// [`EconomyError::NotFound`] for an unknown key,
    /// [`EconomyError::AlreadyOwned`] for an owned upgrade,
    /// [`EconomyError::RequirementsNotMet`] or
    /// [`EconomyError::Unaffordable`]. The player is unchanged on error.
    pub fn buy(&self, player: &mut PlayerState, key: &str) -> EconomyResult<Purchase> {
        let mut pending = Vec::new();
        let purchase = self.buy_deferred(player, key, &mut pending)?;
        self.events.publish(pending);
        Ok(purchase)
    }

    /// [`EconomyEngine::buy`], with the resulting events pushed to
    /// `pending` instead of emitted. Callers that persist the player
    /// publish them once the save succeeded.
    ///
    /// # Errors
    ///
    /// As [`EconomyEngine::buy`].
    pub fn buy_deferred(
        &self,
        player: &mut PlayerState,
        key: &str,
        pending: &mut Vec<GameEvent>,
    ) -> EconomyResult<Purchase> {
        if let Some(upgrade) = self.registry.upgrades().get(key) {
            return self.buy_upgrade(player, upgrade, pending);
        }
        if let Some(building) = self.registry.buildings().get(key) {
            return self.buy_building(player, building, pending);
        }
        tracing::debug!(player = %player.id, key, "buy of unknown item");
        Err(EconomyError::not_found("upgrades/buildings", key))
    }

    fn buy_upgrade(
        &self,
        player: &mut PlayerState,
        item: &ContentItem,
        pending: &mut Vec<GameEvent>,
    ) -> EconomyResult<Purchase> {
        if player.has_upgrade(&item.key) {
            return Err(EconomyError::AlreadyOwned(item.key.clone()));
        }
        Self::check_requirements(player, item)?;
        player.spend_resources(&item.cost)?;
        player.upgrades.insert(item.key.clone(), true);

        tracing::info!(player = %player.id, upgrade = %item.key, "upgrade bought");
        player.push_log(format!("Bought upgrade: {}", item.name), self.config.player_log_capacity);
        pending.push(GameEvent::UpgradeBought {
            player_id: player.id.clone(),
            upgrade: item.key.clone(),
        });

        Ok(Purchase {
            key: item.key.clone(),
            category: category::UPGRADES,
            cost: item.cost.clone(),
            owned: 1,
        })
    }

    fn buy_building(
        &self,
        player: &mut PlayerState,
        item: &ContentItem,
        pending: &mut Vec<GameEvent>,
    ) -> EconomyResult<Purchase> {
        Self::check_requirements(player, item)?;
        let cost = Self::building_cost(item, player.building(&item.key));
        player.spend_resources(&cost)?;

        let owned = player.buildings.entry(item.key.clone()).or_insert(0);
        *owned = owned.saturating_add(1);
        let owned = *owned;

        tracing::info!(player = %player.id, building = %item.key, owned, "building bought");
        player.push_log(
            format!("Bought building: {} (now have {owned})", item.name),
            self.config.player_log_capacity,
        );
        pending.push(GameEvent::BuildingBought {
            player_id: player.id.clone(),
            building: item.key.clone(),
            amount: owned,
        });

        Ok(Purchase {
            key: item.key.clone(),
            category: category::BUILDINGS,
            cost,
            owned,
        })
    }

    fn check_requirements(player: &PlayerState, item: &ContentItem) -> EconomyResult<()> {
        let missing: Vec<String> = item
            .requirements
            .iter()
            .filter(|req| !player.has(req))
            .cloned()
            .collect();
        if missing.is_empty() {
            Ok(())
        } else {
            Err(EconomyError::RequirementsNotMet {
                key: item.key.clone(),
                missing,
            })
        }
    }

    /// Sells one building for `sell_refund_ratio` of its base cost.
    ///
    /// Returns the refund per resource.
    ///
    /// # Errors
    ///
    /// [`EconomyError::NotFound`] for a key that is not a building,
    /// [`EconomyError::NothingToSell`] when none are owned.
    pub fn sell(&self, player: &mut PlayerState, key: &str) -> EconomyResult<BTreeMap<String, f64>> {
        let mut pending = Vec::new();
        let refund = self.sell_deferred(player, key, &mut pending)?;
        self.events.publish(pending);
        Ok(refund)
    }

    /// [`EconomyEngine::sell`] with deferred events.
    ///
    /// # Errors
    ///
    /// As [`EconomyEngine::sell`].
    pub fn sell_deferred(
        &self,
        player: &mut PlayerState,
        key: &str,
        pending: &mut Vec<GameEvent>,
    ) -> EconomyResult<BTreeMap<String, f64>> {
        let item = self
            .registry
            .buildings()
            .get(key)
            .ok_or_else(|| EconomyError::not_found(category::BUILDINGS, key))?;
        let owned = player.building(key);
        if owned == 0 {
            return Err(EconomyError::NothingToSell(key.to_string()));
        }

        let refund: BTreeMap<String, f64> = item
            .cost
            .iter()
            .map(|(resource, base)| (resource.clone(), base * self.config.sell_refund_ratio))
            .collect();
        for (resource, amount) in &refund {
            player.add_resource(resource, *amount);
        }
        let remaining = owned - 1;
        player.buildings.insert(key.to_string(), remaining);

        tracing::info!(player = %player.id, building = key, remaining, "building sold");
        player.push_log(
            format!("Sold building: {} (now have {remaining})", item.name),
            self.config.player_log_capacity,
        );
        pending.push(GameEvent::BuildingSold {
            player_id: player.id.clone(),
            building: key.to_string(),
            amount: remaining,
        });
        Ok(refund)
    }

    // ========================================================================
    // Prestige
    // ========================================================================

    /// Spends the prestige cost, resets progress, then applies the prestige
    /// item's effects to the reset state. Returns the new prestige level.
    ///
    /// # Errors
    ///
    /// [`EconomyError::NotFound`] if the catalog defines no prestige,
    /// [`EconomyError::Unaffordable`] if the cost is not covered.
    pub fn perform_prestige(&self, player: &mut PlayerState) -> EconomyResult<u32> {
        let mut pending = Vec::new();
        let level = self.perform_prestige_deferred(player, &mut pending)?;
        self.events.publish(pending);
        Ok(level)
    }

    /// [`EconomyEngine::perform_prestige`] with deferred events.
    ///
    /// # Errors
    ///
    /// As [`EconomyEngine::perform_prestige`].
    pub fn perform_prestige_deferred(
        &self,
        player: &mut PlayerState,
        pending: &mut Vec<GameEvent>,
    ) -> EconomyResult<u32> {
        let item = self.registry.prestige()?;
        player.spend_resources(&item.cost)?;
        player.reset_progress(&self.registry);

        let outcome = self.resolver(now_millis()).execute_effects(
            player,
            item.gate.as_ref(),
            &item.effects,
            &Variables::new(),
        );

        tracing::info!(
            player = %player.id,
            prestige = player.prestige,
            effects = outcome.applied,
            "prestige performed"
        );
        player.push_log(
            format!("Performed prestige: {}", item.name),
            self.config.player_log_capacity,
        );
        pending.push(GameEvent::Prestige {
            player_id: player.id.clone(),
            prestige_level: player.prestige,
        });
        Ok(player.prestige)
    }

    // ========================================================================
    // Achievements
    // ========================================================================

    /// Unlocks every achievement level whose condition now holds.
    ///
    /// Levels are checked in ascending order; each satisfied level above
    /// the current one unlocks, grants its rewards and emits an event.
    /// Levels never go down.
    pub fn evaluate_achievements(&self, player: &mut PlayerState) -> Vec<(String, u32)> {
        let mut pending = Vec::new();
        let unlocked = self.unlock_achievements(player, &mut pending);
        self.events.publish(pending);
        unlocked
    }

    fn unlock_achievements(
        &self,
        player: &mut PlayerState,
        pending: &mut Vec<GameEvent>,
    ) -> Vec<(String, u32)> {
        let resolver = self.resolver(now_millis());
        let mut unlocked = Vec::new();

        let mut keys: Vec<&String> = self.registry.achievements().keys().collect();
        keys.sort();

        for key in keys {
            let Some(item) = self.registry.achievements().get(key) else {
                continue;
            };
            let mut levels: Vec<_> = item.levels.iter().collect();
            levels.sort_by_key(|level| level.level);

            for level in levels {
                if level.level <= player.achievement_level(key) {
                    continue;
                }
                let vars = player.variables();
                if !resolver.condition_holds(Some(level.condition.as_str()), &vars) {
                    continue;
                }

                player.achievements.insert(key.clone(), level.level);
                for (resource, amount) in &level.rewards {
                    player.add_resource(resource, *amount);
                }
                tracing::info!(player = %player.id, achievement = %key, tier = level.level, "achievement unlocked");
                player.push_log(
                    format!("Achievement unlocked: {} (level {})", item.name, level.level),
                    self.config.player_log_capacity,
                );
                pending.push(GameEvent::AchievementUnlocked {
                    player_id: player.id.clone(),
                    achievement: key.clone(),
                    level: level.level,
                });
                unlocked.push((key.clone(), level.level));
            }
        }
        unlocked
    }

    // ========================================================================
    // Tick
    // ========================================================================

    /// Yield per resource from owned buildings.
    ///
    /// Each building's yield formulas see the player's variables plus
    /// `count` and `tier` bound to the owned quantity. A building's block
    /// gate is checked once; failing formulas contribute nothing.
    #[must_use]
    pub fn total_yield(&self, player: &PlayerState) -> BTreeMap<String, f64> {
        let resolver = self.resolver(now_millis());
        let base_vars = player.variables();
        let mut totals = BTreeMap::new();

        for (key, owned) in &player.buildings {
            if *owned == 0 {
                continue;
            }
            let Some(item) = self.registry.buildings().get(key) else {
                tracing::debug!(player = %player.id, building = %key, "owned building not in catalog");
                continue;
            };

            let mut vars = base_vars.clone();
            vars.insert("count".to_string(), f64::from(*owned));
            vars.insert("tier".to_string(), f64::from(*owned));
            if !resolver.gate_passes(item.gate.as_ref(), &vars) {
                continue;
            }

            for effect in item.effects_of(EffectKind::Yield) {
                if !resolver.condition_holds(effect.condition.as_deref(), &vars) {
                    continue;
                }
                if let Some(amount) = resolver.amount(effect, &vars) {
                    *totals.entry(effect.target.clone()).or_insert(0.0) += amount;
                }
            }
        }
        totals
    }

    /// Upgrade multiplier per resource: the sum of owned upgrades'
    /// `multiply` factors. Resources without one are absent (treated as 1).
    /// A factor formula that fails contributes nothing.
    #[must_use]
    pub fn total_multiplier(&self, player: &PlayerState) -> BTreeMap<String, f64> {
        let resolver = self.resolver(now_millis());
        let vars = player.variables();
        let mut totals = BTreeMap::new();
        for (key, owned) in &player.upgrades {
            if !owned {
                continue;
            }
            let Some(item) = self.registry.upgrades().get(key) else {
                continue;
            };
            for effect in item.effects_of(EffectKind::Multiply) {
                if let Some(factor) = resolver.amount(effect, &vars) {
                    *totals.entry(effect.target.clone()).or_insert(0.0) += factor;
                }
            }
        }
        totals
    }

    /// Deactivates shinies whose `duration` (seconds) has elapsed.
    pub fn expire_shinies(&self, player: &mut PlayerState, now_ms: u64) -> usize {
        let mut expired = 0;
        for (key, state) in &mut player.shinies {
            if !state.active {
                continue;
            }
            let Some(duration) = self
                .registry
                .shinies()
                .get(key)
                .and_then(|item| item.number_property("duration"))
            else {
                continue;
            };
            #[allow(clippy::cast_precision_loss)]
            let elapsed_ms = now_ms.saturating_sub(state.last_spawn_ms) as f64;
            if elapsed_ms >= duration * MS_PER_SECOND {
                state.active = false;
                expired += 1;
            }
        }
        expired
    }

    /// Advances one player by one tick at the current time.
    pub fn update_player(&self, player: &mut PlayerState) -> TickSummary {
        self.update_player_at(player, now_millis())
    }

    /// Advances one player by one tick at `now_ms`.
    pub fn update_player_at(&self, player: &mut PlayerState, now_ms: u64) -> TickSummary {
        let mut pending = Vec::new();
        let summary = self.update_player_deferred(player, now_ms, &mut pending);
        self.events.publish(pending);
        summary
    }

    /// [`EconomyEngine::update_player_at`] with deferred events.
    pub fn update_player_deferred(
        &self,
        player: &mut PlayerState,
        now_ms: u64,
        pending: &mut Vec<GameEvent>,
    ) -> TickSummary {
        let yields = self.total_yield(player);
        let multipliers = self.total_multiplier(player);

        let mut summary = TickSummary::default();
        for (resource, amount) in yields {
            let upgrade_mult = match multipliers.get(&resource) {
                Some(m) if m.abs() > f64::EPSILON => *m,
                _ => 1.0,
            };
            let credited = amount * upgrade_mult * player.multiplier(&resource);
            player.add_resource(&resource, credited);
            summary.credited.insert(resource, credited);
        }

        let tracked: Vec<String> = player.resources.keys().cloned().collect();
        for resource in tracked {
            let rate = summary.credited.get(&resource).copied().unwrap_or(0.0);
            player.stats.entry(resource).or_default().per_tick = rate;
        }

        summary.expired_shinies = self.expire_shinies(player, now_ms);
        summary.unlocked = self.unlock_achievements(player, pending);
        player.last_update_ms = now_ms;
        summary
    }
}
