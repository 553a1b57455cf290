//! # Offline Simulator
//!
//! Runs a player forward without a scheduler, buying greedily. Used for
//! balance checks: how fast does a catalog snowball with a naive player?
//!
//! Each step tries every upgrade, then every building, once (in key
//! order), and then advances one tick at a synthetic clock.

use std::sync::Arc;

use crate::engine::EconomyEngine;
use crate::player::PlayerState;

/// Synthetic clock advance per simulated tick.
pub const DEFAULT_STEP_MS: u64 = 1000;

/// One purchase made during a run.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SimulatedPurchase {
    /// Zero-based step index.
    pub step: u32,
    /// Item bought.
    pub key: String,
}

/// Outcome of [`Simulator::run`].
#[derive(Clone, Debug, Default, PartialEq)]
pub struct SimulationReport {
    /// Steps executed.
    pub steps: u32,
    /// Purchases in the order they happened.
    pub purchases: Vec<SimulatedPurchase>,
    /// Achievement levels unlocked, in order.
    pub unlocked: Vec<(String, u32)>,
}

/// Greedy offline driver over an [`EconomyEngine`].
#[derive(Debug, Clone)]
pub struct Simulator {
    engine: Arc<EconomyEngine>,
    step_ms: u64,
}

impl Simulator {
    /// Creates a simulator advancing [`DEFAULT_STEP_MS`] per step.
    #[must_use]
    pub fn new(engine: Arc<EconomyEngine>) -> Self {
        Self {
            engine,
            step_ms: DEFAULT_STEP_MS,
        }
    }

    /// Overrides the synthetic clock step.
    #[must_use]
    pub fn with_step_ms(mut self, step_ms: u64) -> Self {
        self.step_ms = step_ms;
        self
    }

    /// Advances `player` by `steps` buy-then-tick rounds.
    pub fn run(&self, player: &mut PlayerState, steps: u32) -> SimulationReport {
        let registry = self.engine.registry();
        let mut upgrades: Vec<String> = registry.upgrades().keys().cloned().collect();
        upgrades.sort();
        let mut buildings: Vec<String> = registry.buildings().keys().cloned().collect();
        buildings.sort();

        let mut report = SimulationReport::default();
        let mut clock = player.last_update_ms;

        for step in 0..steps {
            for key in &upgrades {
                if player.has_upgrade(key) {
                    continue;
                }
                if self.engine.buy(player, key).is_ok() {
                    report.purchases.push(SimulatedPurchase { step, key: key.clone() });
                }
            }
            for key in &buildings {
                // A key shadowed by an upgrade of the same name is not a building purchase.
                if registry.upgrades().contains_key(key) {
                    continue;
                }
                if self.engine.buy(player, key).is_ok() {
                    report.purchases.push(SimulatedPurchase { step, key: key.clone() });
                }
            }

            clock = clock.saturating_add(self.step_ms);
            let summary = self.engine.update_player_at(player, clock);
            report.unlocked.extend(summary.unlocked);
            report.steps = step + 1;
        }

        tracing::info!(
            player = %player.id,
            steps = report.steps,
            purchases = report.purchases.len(),
            "simulation finished"
        );
        report
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::EngineConfig;
    use crate::content::ContentRegistry;
    use serde_json::json;

    fn create_test_simulator() -> Simulator {
        let registry = ContentRegistry::load(&json!({
            "resources": { "gold": { "initial": 10 } },
            "buildings": {
                "mine": { "cost": { "gold": 10 }, "effects": ["yield:gold:count * 5"] }
            },
            "upgrades": {
                "pickaxe": { "cost": { "gold": 40 }, "effects": ["multiply:gold:2"] }
            },
            "achievements": {
                "first": { "condition": "mine >= 1", "rewards": { "gold": 1 } }
            }
        }))
        .unwrap();
        let config = EngineConfig {
            rng_seed: Some(7),
            ..EngineConfig::default()
        };
        let engine = EconomyEngine::new(Arc::new(registry), config).unwrap();
        Simulator::new(Arc::new(engine))
    }

    #[test]
    fn test_first_step_buys_and_ticks() {
        let simulator = create_test_simulator();
        let mut player = simulator.engine.create_player("sim");
        player.last_update_ms = 0;

        let report = simulator.run(&mut player, 1);

        assert_eq!(report.steps, 1);
        assert_eq!(
            report.purchases,
            vec![SimulatedPurchase { step: 0, key: "mine".into() }]
        );
        assert_eq!(report.unlocked, vec![("first".to_string(), 1)]);
        // 10 - 10 spent, +5 yield, +1 reward
        assert_eq!(player.resource("gold"), 6);
        assert_eq!(player.last_update_ms, DEFAULT_STEP_MS);
    }

    #[test]
    fn test_long_run_snowballs() {
        let simulator = create_test_simulator().with_step_ms(10);
        let mut player = simulator.engine.create_player("sim");

        let report = simulator.run(&mut player, 50);

        assert_eq!(report.steps, 50);
        assert!(player.has_upgrade("pickaxe"));
        assert!(player.building("mine") > 2);
        assert!(report.purchases.iter().any(|p| p.key == "pickaxe"));
    }

    #[test]
    fn test_zero_steps_is_noop() {
        let simulator = create_test_simulator();
        let mut player = simulator.engine.create_player("sim");
        let before = player.clone();

        assert_eq!(simulator.run(&mut player, 0), SimulationReport::default());
        assert_eq!(player, before);
    }
}
