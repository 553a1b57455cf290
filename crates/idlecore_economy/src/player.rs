//! # Player State
//!
//! Per-player numeric state: balances, building counts, upgrade flags,
//! multipliers, achievement levels, prestige, a bounded log and shiny
//! timers.
//!
//! ## Integral Balances
//!
//! Balances are `u64`. Formula results are `f64`, so gains keep their
//! fractional remainder in a per-resource carry that is folded into the
//! next gain. Spending always rounds the cost up; a balance can never go
//! negative.
//!
//! ## Serialization
//!
//! `serde_json` for the persistence collaborator. Every field has a serde
//! default, so snapshots written by older builds still load.

use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, VecDeque};
use std::time::{SystemTime, UNIX_EPOCH};

use crate::content::ContentRegistry;
use crate::error::{EconomyError, EconomyResult};
use crate::expression::Variables;

/// Default number of messages kept in a player's log.
pub const DEFAULT_LOG_CAPACITY: usize = 10;

/// Milliseconds since the Unix epoch.
#[must_use]
pub fn now_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map_or(0, |d| u64::try_from(d.as_millis()).unwrap_or(u64::MAX))
}

/// Activation state of a shiny.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ShinyState {
    /// Currently active.
    pub active: bool,
    /// When it was last granted (Unix ms).
    pub last_spawn_ms: u64,
}

/// Lifetime statistics of one resource.
#[derive(Clone, Copy, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct ResourceStats {
    /// Highest balance ever held.
    pub max: u64,
    /// Total ever gained.
    pub earned: u64,
    /// Net change during the last tick.
    pub per_tick: f64,
}

/// Complete state of one player.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PlayerState {
    /// Player identifier.
    pub id: String,
    /// Resource balances.
    pub resources: BTreeMap<String, u64>,
    /// Fractional remainders not yet credited, each in `[0, 1)`.
    pub carry: BTreeMap<String, f64>,
    /// Building counts.
    pub buildings: BTreeMap<String, u32>,
    /// Upgrade ownership flags.
    pub upgrades: BTreeMap<String, bool>,
    /// Persistent per-resource multipliers (default 1.0).
    pub multipliers: BTreeMap<String, f64>,
    /// Unlocked level per achievement.
    pub achievements: BTreeMap<String, u32>,
    /// Prestige counter.
    pub prestige: u32,
    /// Most recent messages, oldest first.
    pub log: VecDeque<String>,
    /// Shiny timers.
    pub shinies: BTreeMap<String, ShinyState>,
    /// Per-resource statistics.
    pub stats: BTreeMap<String, ResourceStats>,
    /// Last tick (Unix ms).
    pub last_update_ms: u64,
}

impl PlayerState {
    /// Creates a player seeded from the catalog's `initial` values.
    #[must_use]
    pub fn new(id: impl Into<String>, registry: &ContentRegistry) -> Self {
        let mut player = Self {
            id: id.into(),
            last_update_ms: now_millis(),
            ..Self::default()
        };

        for (key, item) in registry.resources() {
            player.resources.insert(key.clone(), 0);
            player.multipliers.insert(key.clone(), 1.0);
            player.stats.insert(key.clone(), ResourceStats::default());
            player.set_resource(key, item.initial);
        }
        for (key, item) in registry.buildings() {
            player.buildings.insert(key.clone(), whole_count(item.initial));
        }
        for key in registry.upgrades().keys() {
            player.upgrades.insert(key.clone(), false);
        }
        player
    }

    // ========================================================================
    // Resources
    // ========================================================================

    /// Current balance (0 if untracked).
    #[must_use]
    pub fn resource(&self, key: &str) -> u64 {
        self.resources.get(key).copied().unwrap_or(0)
    }

    /// Adds `amount` (may be fractional or negative) to a resource.
    ///
    /// Negative amounts are removed as by [`PlayerState::remove_resource`].
    /// Non-finite amounts are ignored.
    #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
    pub fn add_resource(&mut self, key: &str, amount: f64) {
        if !amount.is_finite() || amount == 0.0 {
            return;
        }
        if amount < 0.0 {
            self.remove_resource(key, -amount);
            return;
        }

        let carry = self.carry.get(key).copied().unwrap_or(0.0);
        let total = carry + amount;
        let whole = total.floor();
        self.carry.insert(key.to_string(), total - whole);

        let gained = whole as u64;
        let balance = self.resources.entry(key.to_string()).or_insert(0);
        *balance = balance.saturating_add(gained);
        let balance = *balance;

        let stats = self.stats.entry(key.to_string()).or_default();
        stats.earned = stats.earned.saturating_add(gained);
        stats.max = stats.max.max(balance);
    }

    /// Removes `ceil(amount)`, clamping at zero.
    pub fn remove_resource(&mut self, key: &str, amount: f64) {
        let due = cost_units(amount);
        if let Some(balance) = self.resources.get_mut(key) {
            *balance = balance.saturating_sub(due);
        }
    }

    /// Sets a balance outright, splitting off the fractional part as carry.
    #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
    pub fn set_resource(&mut self, key: &str, amount: f64) {
        let amount = if amount.is_finite() { amount.max(0.0) } else { 0.0 };
        let whole = amount.floor();
        self.resources.insert(key.to_string(), whole as u64);
        self.carry.insert(key.to_string(), amount - whole);
        let stats = self.stats.entry(key.to_string()).or_default();
        stats.max = stats.max.max(whole as u64);
    }

    /// True if every resource in `cost` covers `ceil(amount)`.
    #[must_use]
    pub fn can_afford(&self, cost: &BTreeMap<String, f64>) -> bool {
        self.check_affordable(cost).is_ok()
    }

    /// Like [`PlayerState::can_afford`] but names the first shortfall.
    ///
    /// # Errors
    ///
    /// Returns [`EconomyError::Unaffordable`] for the first resource (in key
    /// order) that falls short.
    pub fn check_affordable(&self, cost: &BTreeMap<String, f64>) -> EconomyResult<()> {
        for (resource, amount) in cost {
            let available = self.resource(resource);
            if available < cost_units(*amount) {
                return Err(EconomyError::Unaffordable {
                    resource: resource.clone(),
                    required: *amount,
                    available,
                });
            }
        }
        Ok(())
    }

    /// Spends `cost` atomically: either every resource is debited or none.
    ///
    /// # Errors
    ///
    /// Returns [`EconomyError::Unaffordable`] without mutating anything.
    pub fn spend_resources(&mut self, cost: &BTreeMap<String, f64>) -> EconomyResult<()> {
        self.check_affordable(cost)?;
        for (resource, amount) in cost {
            self.remove_resource(resource, *amount);
        }
        Ok(())
    }

    /// Persistent multiplier for a resource (1.0 when unset).
    #[must_use]
    pub fn multiplier(&self, key: &str) -> f64 {
        self.multipliers.get(key).copied().unwrap_or(1.0)
    }

    // ========================================================================
    // Ownership
    // ========================================================================

    /// Owned count of a building.
    #[must_use]
    pub fn building(&self, key: &str) -> u32 {
        self.buildings.get(key).copied().unwrap_or(0)
    }

    /// True if the upgrade is owned.
    #[must_use]
    pub fn has_upgrade(&self, key: &str) -> bool {
        self.upgrades.get(key).copied().unwrap_or(false)
    }

    /// Unlocked level of an achievement (0 = locked).
    #[must_use]
    pub fn achievement_level(&self, key: &str) -> u32 {
        self.achievements.get(key).copied().unwrap_or(0)
    }

    /// Presence test used by requirements and `have()`.
    #[must_use]
    pub fn has(&self, key: &str) -> bool {
        self.resource(key) > 0
            || self.building(key) > 0
            || self.has_upgrade(key)
            || self.achievement_level(key) > 0
    }

    /// Shiny state (inactive when never granted).
    #[must_use]
    pub fn shiny(&self, key: &str) -> ShinyState {
        self.shinies.get(key).copied().unwrap_or_default()
    }

    // ========================================================================
    // Formulas, log, prestige
    // ========================================================================

    /// Variable snapshot for formula evaluation.
    ///
    /// Every resource (plus `:max`, `:earned`, `:ps`), building, upgrade
    /// (1/0) and achievement (level) key, and `prestige`. A key present in
    /// several categories takes the largest value, so `have(key)` agrees
    /// with [`PlayerState::has`].
    #[must_use]
    #[allow(clippy::cast_precision_loss)]
    pub fn variables(&self) -> Variables {
        let mut vars = Variables::new();
        let mut put = |key: &str, value: f64| {
            vars.entry(key.to_string())
                .and_modify(|v| *v = v.max(value))
                .or_insert(value);
        };

        for (key, amount) in &self.resources {
            put(key, *amount as f64);
            let stats = self.stats.get(key).copied().unwrap_or_default();
            put(&format!("{key}:max"), stats.max as f64);
            put(&format!("{key}:earned"), stats.earned as f64);
            put(&format!("{key}:ps"), stats.per_tick);
        }
        for (key, count) in &self.buildings {
            put(key, f64::from(*count));
        }
        for (key, owned) in &self.upgrades {
            put(key, if *owned { 1.0 } else { 0.0 });
        }
        for (key, level) in &self.achievements {
            put(key, f64::from(*level));
        }
        put("prestige", f64::from(self.prestige));
        vars
    }

    /// Appends a message, evicting the oldest beyond `capacity`.
    pub fn push_log(&mut self, message: impl Into<String>, capacity: usize) {
        self.log.push_back(message.into());
        while self.log.len() > capacity {
            self.log.pop_front();
        }
    }

    /// Prestige reset: resources back to catalog `initial` (0 when not in
    /// the catalog), buildings to 0, prestige counter + 1.
    pub fn reset_progress(&mut self, registry: &ContentRegistry) {
        let tracked: Vec<String> = self
            .resources
            .keys()
            .chain(registry.resources().keys())
            .cloned()
            .collect();
        for key in tracked {
            self.set_resource(&key, registry.initial_resource(&key));
        }
        for count in self.buildings.values_mut() {
            *count = 0;
        }
        self.prestige = self.prestige.saturating_add(1);
    }

    /// Serializes to the persistence blob format.
    ///
    /// # Errors
    ///
    /// Returns the `serde_json` error, which only occurs for non-finite
    /// floats.
    pub fn to_bytes(&self) -> serde_json::Result<Vec<u8>> {
        serde_json::to_vec(self)
    }

    /// Deserializes a persistence blob.
    ///
    /// # Errors
    ///
    /// Returns the `serde_json` error for a malformed blob.
    pub fn from_bytes(bytes: &[u8]) -> serde_json::Result<Self> {
        serde_json::from_slice(bytes)
    }
}

/// `ceil(amount)` as whole units; non-positive or non-finite is 0.
#[inline]
#[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
fn cost_units(amount: f64) -> u64 {
    if amount.is_finite() && amount > 0.0 {
        amount.ceil() as u64
    } else {
        0
    }
}

#[inline]
#[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
fn whole_count(amount: f64) -> u32 {
    if amount.is_finite() && amount > 0.0 {
        amount.floor().min(f64::from(u32::MAX)) as u32
    } else {
        0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn create_test_registry() -> ContentRegistry {
        ContentRegistry::load(&json!({
            "resources": {
                "gold": { "initial": 10 },
                "wood": { "initial": 0.5 }
            },
            "buildings": {
                "mine": { "cost": { "gold": 10 } },
                "hut": { "initial": 1 }
            },
            "upgrades": {
                "pickaxe": { "cost": { "gold": 50 } }
            }
        }))
        .unwrap()
    }

    fn create_test_player() -> PlayerState {
        PlayerState::new("p1", &create_test_registry())
    }

    fn cost(pairs: &[(&str, f64)]) -> BTreeMap<String, f64> {
        pairs.iter().map(|(k, v)| ((*k).to_string(), *v)).collect()
    }

    #[test]
    fn test_new_player_seeded_from_catalog() {
        let player = create_test_player();
        assert_eq!(player.resource("gold"), 10);
        assert_eq!(player.resource("wood"), 0);
        assert!((player.carry["wood"] - 0.5).abs() < f64::EPSILON);
        assert_eq!(player.building("hut"), 1);
        assert_eq!(player.building("mine"), 0);
        assert!(!player.has_upgrade("pickaxe"));
        assert!((player.multiplier("gold") - 1.0).abs() < f64::EPSILON);
        assert_eq!(player.prestige, 0);
    }

    #[test]
    fn test_fractional_gains_carry() {
        let mut player = create_test_player();
        player.add_resource("wood", 0.75);
        assert_eq!(player.resource("wood"), 1);
        player.add_resource("wood", 0.75);
        assert_eq!(player.resource("wood"), 2);
        assert_eq!(player.stats["wood"].earned, 2);
    }

    #[test]
    fn test_stats_track_max_and_earned() {
        let mut player = create_test_player();
        player.add_resource("gold", 90.0);
        player.remove_resource("gold", 60.0);
        assert_eq!(player.resource("gold"), 40);
        assert_eq!(player.stats["gold"].max, 100);
        assert_eq!(player.stats["gold"].earned, 90);
    }

    #[test]
    fn test_spend_is_all_or_nothing() {
        let mut player = create_test_player();
        let err = player
            .spend_resources(&cost(&[("gold", 5.0), ("wood", 3.0)]))
            .unwrap_err();
        assert!(matches!(err, EconomyError::Unaffordable { ref resource, .. } if resource == "wood"));
        assert_eq!(player.resource("gold"), 10, "nothing spent on failure");

        player.spend_resources(&cost(&[("gold", 9.2)])).unwrap();
        assert_eq!(player.resource("gold"), 0, "cost rounds up");
    }

    #[test]
    fn test_affordability_never_goes_negative() {
        let mut player = create_test_player();
        for amount in [0.0, 0.1, 1.0, 9.0, 9.99, 10.0] {
            let mut p = player.clone();
            let c = cost(&[("gold", amount)]);
            if p.can_afford(&c) {
                p.spend_resources(&c).unwrap();
                assert!(p.resource("gold") <= 10);
            }
        }
        assert!(!player.can_afford(&cost(&[("gold", 10.01)])));
        assert!(player.can_afford(&cost(&[])));
        player.remove_resource("gold", 1000.0);
        assert_eq!(player.resource("gold"), 0);
    }

    #[test]
    fn test_variables_surface() {
        let mut player = create_test_player();
        player.upgrades.insert("pickaxe".into(), true);
        player.achievements.insert("rich".into(), 2);
        player.prestige = 3;

        let vars = player.variables();
        assert_eq!(vars["gold"], 10.0);
        assert_eq!(vars["gold:max"], 10.0);
        assert_eq!(vars["hut"], 1.0);
        assert_eq!(vars["pickaxe"], 1.0);
        assert_eq!(vars["rich"], 2.0);
        assert_eq!(vars["prestige"], 3.0);
    }

    #[test]
    fn test_log_is_bounded_fifo() {
        let mut player = create_test_player();
        for i in 0..15 {
            player.push_log(format!("msg {i}"), DEFAULT_LOG_CAPACITY);
        }
        assert_eq!(player.log.len(), 10);
        assert_eq!(player.log.front().map(String::as_str), Some("msg 5"));
        assert_eq!(player.log.back().map(String::as_str), Some("msg 14"));
    }

    #[test]
    fn test_reset_progress() {
        let registry = create_test_registry();
        let mut player = PlayerState::new("p1", &registry);
        player.add_resource("gold", 490.0);
        player.add_resource("gems", 4.0);
        player.buildings.insert("mine".into(), 5);
        player.upgrades.insert("pickaxe".into(), true);

        player.reset_progress(&registry);

        assert_eq!(player.resource("gold"), 10);
        assert_eq!(player.resource("gems"), 0, "untracked in catalog resets to 0");
        assert!(player.buildings.values().all(|c| *c == 0));
        assert!(player.has_upgrade("pickaxe"), "upgrades survive prestige");
        assert_eq!(player.prestige, 1);
    }

    #[test]
    fn test_serialization_roundtrip_and_old_blobs() {
        let mut player = create_test_player();
        player.push_log("hello", 10);
        player.shinies.insert("comet".into(), ShinyState { active: true, last_spawn_ms: 5 });

        let bytes = player.to_bytes().unwrap();
        assert_eq!(PlayerState::from_bytes(&bytes).unwrap(), player);

        let old = PlayerState::from_bytes(br#"{"id":"legacy","resources":{"gold":3}}"#).unwrap();
        assert_eq!(old.resource("gold"), 3);
        assert!(old.log.is_empty());
        assert!(PlayerState::from_bytes(b"not json").is_err());
    }
}
