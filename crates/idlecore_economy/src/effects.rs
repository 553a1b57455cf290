//! # Effect Resolution
//!
//! Turns [`Effect`]s into player state mutations.
//!
//! | Kind       | Reads                   | Writes                           |
//! |------------|-------------------------|----------------------------------|
//! | `yield`    | `expression` (or value) | resource balance                 |
//! | `multiply` | `value`                 | persistent multiplier            |
//! | `grant`    | -                       | shiny timer (active, spawn time) |
//! | `spawn`    | shiny's yield effects   | resource balances                |
//! | `reset`    | catalog `initial`       | resource balance(s)              |
//!
//! ## Failure Containment
//!
//! A formula that fails to evaluate is logged and its effect skipped. A
//! failing block gate skips the block. Neither aborts the caller.

use crate::content::{category, BlockGate, ContentRegistry, Effect, EffectBlock, EffectKind};
use crate::expression::{ExpressionEngine, Variables};
use crate::player::PlayerState;

/// Target of a `reset` effect meaning "every resource".
pub const RESET_ALL: &str = "all";

/// What happened while executing a block.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct BlockOutcome {
    /// Block gate failed; nothing ran.
    pub gated: bool,
    /// Effects applied.
    pub applied: usize,
    /// Effects skipped by their own condition.
    pub skipped: usize,
    /// Effects dropped because a formula failed.
    pub failed: usize,
}

/// Stateless effect dispatcher.
///
/// Borrows the catalog and the evaluator; holds no state of its own.
#[derive(Clone, Copy, Debug)]
pub struct EffectResolver<'a> {
    registry: &'a ContentRegistry,
    expressions: &'a ExpressionEngine,
    now_ms: u64,
}

impl<'a> EffectResolver<'a> {
    /// Creates a resolver. `now_ms` is the timestamp `grant` records.
    #[must_use]
    pub fn new(registry: &'a ContentRegistry, expressions: &'a ExpressionEngine, now_ms: u64) -> Self {
        Self {
            registry,
            expressions,
            now_ms,
        }
    }

    /// Player variables overlaid with `extra` (e.g. `count`).
    #[must_use]
    pub fn variables(player: &PlayerState, extra: &Variables) -> Variables {
        let mut vars = player.variables();
        vars.extend(extra.iter().map(|(k, v)| (k.clone(), *v)));
        vars
    }

    /// Evaluates the amount of a `yield` or the factor of a `multiply`,
    /// without applying it.
    ///
    /// Uses `expression` when present, `value` otherwise. Returns `None`
    /// (after logging) if the formula fails.
    #[must_use]
    pub fn amount(&self, effect: &Effect, vars: &Variables) -> Option<f64> {
        let Some(formula) = effect.expression.as_deref() else {
            return Some(effect.value);
        };
        match self.expressions.evaluate(formula, vars) {
            Ok(amount) => Some(amount),
            Err(error) => {
                tracing::warn!(
                    kind = effect.kind.as_str(),
                    to = %effect.target,
                    formula,
                    %error,
                    "effect formula failed, effect skipped"
                );
                None
            }
        }
    }

    /// Evaluates an optional condition. A failing formula counts as false.
    #[must_use]
    pub fn condition_holds(&self, condition: Option<&str>, vars: &Variables) -> bool {
        let Some(formula) = condition else {
            return true;
        };
        match self.expressions.evaluate_condition(formula, vars) {
            Ok(holds) => holds,
            Err(error) => {
                tracing::warn!(formula, %error, "condition failed to evaluate, treated as false");
                false
            }
        }
    }

    /// Checks a block gate once.
    #[must_use]
    pub fn gate_passes(&self, gate: Option<&BlockGate>, vars: &Variables) -> bool {
        match gate {
            None => true,
            Some(BlockGate::Chance(percent)) => self.expressions.roll_percent(*percent),
            Some(BlockGate::Condition(formula)) => self.condition_holds(Some(formula.as_str()), vars),
        }
    }

    /// Applies one effect, checking its own condition first.
    ///
    /// Returns `Some(true)` if applied, `Some(false)` if its condition was
    /// false, `None` if a formula failed.
    pub fn apply(&self, player: &mut PlayerState, effect: &Effect, extra: &Variables) -> Option<bool> {
        let vars = Self::variables(player, extra);
        if !self.condition_holds(effect.condition.as_deref(), &vars) {
            return Some(false);
        }

        match effect.kind {
            EffectKind::Yield => {
                let amount = self.amount(effect, &vars)?;
                tracing::debug!(player = %player.id, to = %effect.target, amount, "yield");
                player.add_resource(&effect.target, amount);
            }
            EffectKind::Multiply => {
                let factor = self.amount(effect, &vars)?;
                let current = player.multiplier(&effect.target);
                player
                    .multipliers
                    .insert(effect.target.clone(), current * factor);
            }
            EffectKind::Grant => {
                let shiny = player.shinies.entry(effect.target.clone()).or_default();
                shiny.active = true;
                shiny.last_spawn_ms = self.now_ms;
            }
            EffectKind::Spawn => return self.spawn(player, &effect.target, extra),
            EffectKind::Reset => self.reset(player, &effect.target),
        }
        Some(true)
    }

    /// Runs a block: gate once, then each effect in order.
    pub fn execute_block(
        &self,
        player: &mut PlayerState,
        block: &EffectBlock,
        extra: &Variables,
    ) -> BlockOutcome {
        self.execute_effects(player, block.gate.as_ref(), &block.effects, extra)
    }

    /// [`EffectResolver::execute_block`] over borrowed parts, so catalog
    /// items run without cloning their effect list.
    pub fn execute_effects(
        &self,
        player: &mut PlayerState,
        gate: Option<&BlockGate>,
        effects: &[Effect],
        extra: &Variables,
    ) -> BlockOutcome {
        let mut outcome = BlockOutcome::default();
        if gate.is_some() && !self.gate_passes(gate, &Self::variables(player, extra)) {
            outcome.gated = true;
            return outcome;
        }
        for effect in effects {
            match self.apply(player, effect, extra) {
                Some(true) => outcome.applied += 1,
                Some(false) => outcome.skipped += 1,
                None => outcome.failed += 1,
            }
        }
        outcome
    }

    /// Applies a shiny's yield effects. Unknown shinies are a no-op.
    ///
    /// `None` if any yield formula failed; the others still apply.
    fn spawn(&self, player: &mut PlayerState, shiny_key: &str, extra: &Variables) -> Option<bool> {
        let Ok(shiny) = self.registry.get_content(category::SHINIES, shiny_key) else {
            tracing::debug!(shiny = shiny_key, "spawn of unknown shiny ignored");
            return Some(true);
        };
        let mut failed = 0_usize;
        for effect in shiny.effects_of(EffectKind::Yield) {
            if self.apply(player, effect, extra).is_none() {
                failed += 1;
            }
        }
        if failed > 0 {
            tracing::warn!(player = %player.id, shiny = shiny_key, failed, "shiny spawned partially");
            return None;
        }
        Some(true)
    }

    fn reset(&self, player: &mut PlayerState, target: &str) {
        if target == RESET_ALL {
            let keys: Vec<String> = player
                .resources
                .keys()
                .chain(self.registry.resources().keys())
                .cloned()
                .collect();
            for key in keys {
                player.set_resource(&key, self.registry.initial_resource(&key));
            }
        } else if player.resources.contains_key(target)
            || self.registry.resources().contains_key(target)
        {
            player.set_resource(target, self.registry.initial_resource(target));
        } else {
            tracing::warn!(resource = target, "reset of unknown resource ignored");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn create_test_registry() -> ContentRegistry {
        ContentRegistry::load(&json!({
            "resources": {
                "gold": { "initial": 5 },
                "gems": { "initial": 0 }
            },
            "shinies": {
                "comet": { "effects": ["yield:gold:100", "grant:other", "yield:gems:2"] },
                "dud": { "effects": ["yield:gold:missing * 2", "yield:gems:1"] }
            }
        }))
        .unwrap()
    }

    fn setup() -> (ContentRegistry, ExpressionEngine) {
        (create_test_registry(), ExpressionEngine::seeded(3))
    }

    fn count(n: f64) -> Variables {
        let mut vars = Variables::new();
        vars.insert("count".into(), n);
        vars
    }

    #[test]
    fn test_yield_uses_count() {
        let (registry, engine) = setup();
        let resolver = EffectResolver::new(&registry, &engine, 0);
        let mut player = PlayerState::new("p", &registry);

        let effect = Effect::new(EffectKind::Yield, "gold").with_expression("count * 2");
        assert_eq!(resolver.apply(&mut player, &effect, &count(3.0)), Some(true));
        assert_eq!(player.resource("gold"), 11);
    }

    #[test]
    fn test_multiply_writes_multiplier_not_balance() {
        let (registry, engine) = setup();
        let resolver = EffectResolver::new(&registry, &engine, 0);
        let mut player = PlayerState::new("p", &registry);

        let effect = Effect::new(EffectKind::Multiply, "gold").with_value(1.5);
        let _ = resolver.apply(&mut player, &effect, &Variables::new());
        let _ = resolver.apply(&mut player, &effect, &Variables::new());

        assert!((player.multiplier("gold") - 2.25).abs() < 1e-9);
        assert_eq!(player.resource("gold"), 5);
    }

    #[test]
    fn test_multiply_evaluates_formula() {
        let (registry, engine) = setup();
        let resolver = EffectResolver::new(&registry, &engine, 0);
        let mut player = PlayerState::new("p", &registry);
        player.prestige = 2;

        let effect = Effect::new(EffectKind::Multiply, "gold").with_expression("prestige + 1");
        assert_eq!(resolver.apply(&mut player, &effect, &Variables::new()), Some(true));
        assert!((player.multiplier("gold") - 3.0).abs() < 1e-9);

        let broken = Effect::new(EffectKind::Multiply, "gold").with_expression("nope * 2");
        assert_eq!(resolver.apply(&mut player, &broken, &Variables::new()), None);
        assert!((player.multiplier("gold") - 3.0).abs() < 1e-9, "failed factor leaves multiplier");
    }

    #[test]
    fn test_grant_activates_shiny() {
        let (registry, engine) = setup();
        let resolver = EffectResolver::new(&registry, &engine, 1234);
        let mut player = PlayerState::new("p", &registry);

        let _ = resolver.apply(&mut player, &Effect::new(EffectKind::Grant, "comet"), &Variables::new());
        let shiny = player.shiny("comet");
        assert!(shiny.active);
        assert_eq!(shiny.last_spawn_ms, 1234);
        assert_eq!(player.resource("gold"), 5, "grant does not touch resources");
    }

    #[test]
    fn test_spawn_applies_only_yields() {
        let (registry, engine) = setup();
        let resolver = EffectResolver::new(&registry, &engine, 0);
        let mut player = PlayerState::new("p", &registry);

        let _ = resolver.apply(&mut player, &Effect::new(EffectKind::Spawn, "comet"), &Variables::new());
        assert_eq!(player.resource("gold"), 105);
        assert_eq!(player.resource("gems"), 2);
        assert!(!player.shiny("other").active);

        let before = player.clone();
        assert_eq!(
            resolver.apply(&mut player, &Effect::new(EffectKind::Spawn, "ghost"), &Variables::new()),
            Some(true)
        );
        assert_eq!(player, before, "unknown shiny is a no-op");

        assert_eq!(
            resolver.apply(&mut player, &Effect::new(EffectKind::Spawn, "dud"), &Variables::new()),
            None
        );
        assert_eq!(player.resource("gems"), 3, "healthy yields still apply");
    }

    #[test]
    fn test_reset_targets() {
        let (registry, engine) = setup();
        let resolver = EffectResolver::new(&registry, &engine, 0);
        let mut player = PlayerState::new("p", &registry);
        player.add_resource("gold", 50.0);
        player.add_resource("gems", 7.0);

        let _ = resolver.apply(&mut player, &Effect::new(EffectKind::Reset, "gems"), &Variables::new());
        assert_eq!(player.resource("gems"), 0);
        assert_eq!(player.resource("gold"), 55);

        let _ = resolver.apply(&mut player, &Effect::new(EffectKind::Reset, RESET_ALL), &Variables::new());
        assert_eq!(player.resource("gold"), 5);
    }

    #[test]
    fn test_failed_formula_is_contained() {
        let (registry, engine) = setup();
        let resolver = EffectResolver::new(&registry, &engine, 0);
        let mut player = PlayerState::new("p", &registry);

        let block = EffectBlock::new(vec![
            Effect::new(EffectKind::Yield, "gold").with_expression("gold / 0"),
            Effect::new(EffectKind::Yield, "gold").with_expression("undefined_thing + 1"),
            Effect::new(EffectKind::Yield, "gems").with_expression("3"),
        ]);
        let outcome = resolver.execute_block(&mut player, &block, &Variables::new());

        assert_eq!(outcome.failed, 2);
        assert_eq!(outcome.applied, 1);
        assert_eq!(player.resource("gold"), 5);
        assert_eq!(player.resource("gems"), 3);
    }

    #[test]
    fn test_block_gate_skips_everything() {
        let (registry, engine) = setup();
        let resolver = EffectResolver::new(&registry, &engine, 0);
        let mut player = PlayerState::new("p", &registry);

        let effects = vec![Effect::new(EffectKind::Yield, "gold").with_expression("10")];
        let closed = EffectBlock::new(effects.clone()).with_gate(BlockGate::Condition("gold > 100".into()));
        let never = EffectBlock::new(effects.clone()).with_gate(BlockGate::Chance(0.0));
        let always = EffectBlock::new(effects).with_gate(BlockGate::Chance(100.0));

        assert!(resolver.execute_block(&mut player, &closed, &Variables::new()).gated);
        assert!(resolver.execute_block(&mut player, &never, &Variables::new()).gated);
        assert_eq!(player.resource("gold"), 5);

        assert_eq!(resolver.execute_block(&mut player, &always, &Variables::new()).applied, 1);
        assert_eq!(player.resource("gold"), 15);
    }

    #[test]
    fn test_per_effect_condition() {
        let (registry, engine) = setup();
        let resolver = EffectResolver::new(&registry, &engine, 0);
        let mut player = PlayerState::new("p", &registry);

        let block = EffectBlock::new(vec![
            Effect::new(EffectKind::Yield, "gold").with_expression("1").with_condition("gold > 100"),
            Effect::new(EffectKind::Yield, "gems").with_expression("1").with_condition("gold >= 5"),
        ]);
        let outcome = resolver.execute_block(&mut player, &block, &Variables::new());

        assert_eq!(outcome.skipped, 1);
        assert_eq!(outcome.applied, 1);
        assert_eq!(player.resource("gems"), 1);
    }
}
