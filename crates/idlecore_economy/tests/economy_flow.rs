//! Integration test for a full economy session over a TOML catalog.

use idlecore_economy::{
    ContentRegistry, EconomyEngine, EconomyError, EngineConfig, EventKind, GameEvent, PlayerState,
};
use std::sync::Arc;
use std::thread;

const CATALOG: &str = r#"
[resources.gold]
name = "Gold"
initial = 25

[resources.gems]
initial = 0

[buildings.mine]
name = "Gold Mine"
cost = { gold = 10 }
effects = ["yield:gold:count * 2"]

[buildings.quarry]
cost = { gold = 40 }
reqs = ["mine"]
chance = "100%"
effects = [{ type = "yield", target = "gems", expression = "count" }]

[buildings.shrine]
cost = { gold = 1 }
effects = [{ type = "yield", target = "gems", expression = "1", condition = "have('miner')" }]

[upgrades.pickaxe]
cost = { gold = 30 }
effects = ["multiply:gold:2"]

[achievements.miner]
levels = [
    { level = 1, condition = "mine >= 1", rewards = { gems = 1 } },
    { level = 2, condition = "mine >= 3", rewards = { gems = 5 } },
]

[prestige.prestige]
name = "Rebirth"
cost = { gold = 100 }
effects = ["multiply:gold:1.5", "yield:gems:prestige * 10"]
"#;

fn create_test_engine() -> EconomyEngine {
    let registry = ContentRegistry::from_toml_str(CATALOG).unwrap();
    let config = EngineConfig {
        rng_seed: Some(42),
        ..EngineConfig::default()
    };
    EconomyEngine::new(Arc::new(registry), config).unwrap()
}

fn tick_until(engine: &EconomyEngine, player: &mut PlayerState, gold: u64) {
    let mut now = 0;
    while player.resource("gold") < gold {
        now += 1000;
        engine.update_player_at(player, now);
        assert!(now < 1_000_000, "economy stalled");
    }
}

#[test]
fn test_full_session() {
    let engine = create_test_engine();
    let events = engine.events().subscribe(64);
    let mut player = engine.create_player("alice");
    assert_eq!(player.resource("gold"), 25);

    // Two mines: 10 + 20
    engine.buy(&mut player, "mine").unwrap();
    assert!(matches!(
        engine.buy(&mut player, "mine"),
        Err(EconomyError::Unaffordable { .. })
    ));
    tick_until(&engine, &mut player, 20);
    engine.buy(&mut player, "mine").unwrap();
    assert_eq!(player.building("mine"), 2);

    // Third mine unlocks level 2; level 1 came with the first tick
    tick_until(&engine, &mut player, 30);
    engine.buy(&mut player, "mine").unwrap();
    let summary = engine.update_player_at(&mut player, 2_000_000);
    assert_eq!(summary.unlocked, vec![("miner".to_string(), 2)]);
    assert_eq!(player.achievement_level("miner"), 2);

    // Upgrade doubles the tick yield
    tick_until(&engine, &mut player, 30);
    engine.buy(&mut player, "pickaxe").unwrap();
    let before = player.resource("gold");
    let summary = engine.update_player_at(&mut player, 3_000_000);
    assert_eq!(summary.credited.get("gold"), Some(&12.0));
    assert_eq!(player.resource("gold"), before + 12);

    // Quarry gated at 100% with a met requirement
    tick_until(&engine, &mut player, 40);
    engine.buy(&mut player, "quarry").unwrap();
    let gems = player.resource("gems");
    engine.update_player_at(&mut player, 4_000_000);
    assert_eq!(player.resource("gems"), gems + 1);

    let kinds: Vec<EventKind> = events.drain().iter().map(GameEvent::kind).collect();
    assert!(kinds.contains(&EventKind::BuildingBought));
    assert!(kinds.contains(&EventKind::UpgradeBought));
    assert_eq!(
        kinds.iter().filter(|k| **k == EventKind::AchievementUnlocked).count(),
        2
    );
}

#[test]
fn test_prestige_then_restart() {
    let engine = create_test_engine();
    let mut player = engine.create_player("bob");
    player.add_resource("gold", 200.0);
    engine.buy(&mut player, "mine").unwrap();
    engine.buy(&mut player, "pickaxe").unwrap();

    assert_eq!(engine.perform_prestige(&mut player), Ok(1));

    assert_eq!(player.resource("gold"), 25);
    assert_eq!(player.building("mine"), 0);
    assert!(player.has_upgrade("pickaxe"), "upgrades survive prestige");
    assert_eq!(player.resource("gems"), 10, "effects see the new prestige level");
    assert!((player.multiplier("gold") - 1.5).abs() < f64::EPSILON);

    // Persistent and upgrade multipliers stack: 2 * 2 * 1.5
    engine.buy(&mut player, "mine").unwrap();
    assert_eq!(
        player.log.back().map(String::as_str),
        Some("Bought building: Gold Mine (now have 1)")
    );
    let summary = engine.update_player_at(&mut player, 1);
    assert_eq!(summary.credited.get("gold"), Some(&6.0));
}

#[test]
fn test_building_key_and_achievement_in_formula() {
    let engine = create_test_engine();
    let mut player = engine.create_player("dave");

    let purchase = engine.buy(&mut player, "shrine").unwrap();
    assert_eq!(purchase.category, "buildings");
    assert_eq!(purchase.owned, 1);
    assert!(!player.has_upgrade("shrine"));

    // Shrine yields nothing until the achievement exists
    engine.update_player_at(&mut player, 1000);
    assert_eq!(player.resource("gems"), 0);

    engine.buy(&mut player, "mine").unwrap();
    engine.update_player_at(&mut player, 2000);
    assert_eq!(player.achievement_level("miner"), 1);
    assert_eq!(player.resource("gems"), 1, "level 1 reward");
    let have = engine
        .expressions()
        .evaluate("have('miner')", &player.variables())
        .unwrap();
    assert!((have - 1.0).abs() < f64::EPSILON);

    let summary = engine.update_player_at(&mut player, 3000);
    assert_eq!(summary.credited.get("gems"), Some(&1.0));
    assert_eq!(player.resource("gems"), 2);
}

#[test]
fn test_sell_then_persist_roundtrip() {
    let engine = create_test_engine();
    let mut player = engine.create_player("carol");
    engine.buy(&mut player, "mine").unwrap();

    let refund = engine.sell(&mut player, "mine").unwrap();
    assert_eq!(refund.get("gold"), Some(&5.0));
    assert_eq!(player.resource("gold"), 20);
    assert_eq!(
        engine.sell(&mut player, "mine"),
        Err(EconomyError::NothingToSell("mine".into()))
    );

    let restored = PlayerState::from_bytes(&player.to_bytes().unwrap()).unwrap();
    assert_eq!(restored, player);
}

#[test]
fn test_engine_shared_across_threads() {
    let engine = Arc::new(create_test_engine());

    let handles: Vec<_> = (0..4)
        .map(|i| {
            let engine = Arc::clone(&engine);
            thread::spawn(move || {
                let mut player = engine.create_player(&format!("p{i}"));
                engine.buy(&mut player, "mine").unwrap();
                for now in 1..=10 {
                    engine.update_player_at(&mut player, now * 1000);
                }
                player.resource("gold")
            })
        })
        .collect();

    for handle in handles {
        // 25 - 10 + 10 ticks of 2
        assert_eq!(handle.join().unwrap(), 35);
    }
}
