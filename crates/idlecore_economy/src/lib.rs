//! # IdleCore Economy
//!
//! Data-driven economy core for incremental games.
//!
//! A catalog of resources, buildings, upgrades, achievements and shinies
//! becomes live per-player state, advanced one tick at a time.
//!
//! ## Design Principles
//!
//! 1. **Catalog is data** - Every item is a property bag; only a handful of
//!    fields are interpreted, the rest are carried verbatim
//! 2. **Formulas are sandboxed** - A fixed function set over a variable map,
//!    no access to anything else
//! 3. **Contained failures** - A broken formula disables one effect, never a
//!    tick
//! 4. **Atomic commands** - Buy, Sell and Prestige validate before mutating
//!
//! ## Thread Safety
//!
//! [`EconomyEngine`] is `Send + Sync`. Player state is plain data owned by
//! the caller; the engine never holds on to it.
//!
//! ## Example
//!
//! ```rust,ignore
//! use std::sync::Arc;
//! use idlecore_economy::{ContentRegistry, EconomyEngine, EngineConfig};
//!
//! let registry = ContentRegistry::from_path("data/catalog.toml")?;
//! let engine = EconomyEngine::new(Arc::new(registry), EngineConfig::default())?;
//!
//! let mut player = engine.create_player("alice");
//! engine.buy(&mut player, "mine")?;
//! engine.update_player(&mut player);
//! ```

#![warn(missing_docs)]
#![deny(unsafe_code)]
#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]

pub mod cache;
pub mod config;
pub mod content;
pub mod effects;
pub mod engine;
pub mod error;
pub mod events;
pub mod expression;
pub mod player;
pub mod simulator;

pub use cache::ExpirationCache;
pub use config::EngineConfig;
pub use content::{
    AchievementLevel, BlockGate, ContentItem, ContentRegistry, Effect, EffectBlock, EffectKind,
};
pub use effects::{BlockOutcome, EffectResolver};
pub use engine::{EconomyEngine, Purchase, TickSummary};
pub use error::{EconomyError, EconomyResult, EvalError, EvalResult, ParseError};
pub use events::{EventBus, EventKind, EventReceiver, GameEvent};
pub use expression::{ExpressionEngine, FormulaCache, Value, Variables};
pub use player::{PlayerState, ResourceStats, ShinyState};
pub use simulator::{SimulationReport, Simulator};
