//! # IdleCore Server
//!
//! Runs the `idlecore_economy` engine as a service.
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                       IDLE SERVER                           │
//! ├─────────────────────────────────────────────────────────────┤
//! │  ┌──────────────┐              ┌──────────────────┐         │
//! │  │ GameService  │              │ UpdateScheduler  │         │
//! │  │ (commands)   │              │ (1 Hz tick)      │         │
//! │  └──────┬───────┘              └────────┬─────────┘         │
//! │         │        PlayerLocks            │                   │
//! │         └──────────────┬────────────────┘                   │
//! │              ┌─────────▼──────────┐                         │
//! │              │ dyn PlayerStore    │                         │
//! │              └────────────────────┘                         │
//! └─────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Failure Model
//!
//! - Startup (config, catalog, store) failures are fatal.
//! - A player that fails during a tick is logged and skipped.
//! - Command failures are returned to the caller; nothing is persisted.
//!
//! ## Example
//!
//! ```rust,ignore
//! use idlecore_server::{Command, Server, ServerConfig};
//!
//! let server = Server::from_config(&ServerConfig::load("idle.toml")?)?;
//! server.service().execute("alice", &Command::parse("buy mine")?)?;
//! server.scheduler().run(tokio::signal::ctrl_c().map(|_| ())).await;
//! ```

#![warn(missing_docs)]
#![deny(unsafe_code)]
#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]

pub mod command;
pub mod config;
pub mod error;
pub mod scheduler;
pub mod service;
pub mod store;

use std::sync::Arc;

use idlecore_economy::{ContentRegistry, EconomyEngine};

pub use command::Command;
pub use config::ServerConfig;
pub use error::{ServiceError, ServiceResult, StoreError, TickError};
pub use scheduler::{SchedulerStats, TickReport, UpdateScheduler};
pub use service::GameService;
pub use store::{JsonFileStore, MemoryStore, PlayerLocks, PlayerStore};

/// Installs the global `tracing` subscriber: `RUST_LOG` if set, otherwise
/// `default_filter`. A second call is a no-op.
pub fn init_tracing(default_filter: &str) {
    use tracing_subscriber::prelude::*;

    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(default_filter));
    let _ = tracing_subscriber::registry()
        .with(env_filter)
        .with(tracing_subscriber::fmt::layer())
        .try_init();
}

/// Service and scheduler wired to one engine, store and lock table.
#[derive(Debug)]
pub struct Server {
    service: GameService,
    scheduler: UpdateScheduler,
}

impl Server {
    /// Wires a server over an explicit engine and store.
    #[must_use]
    pub fn new(engine: Arc<EconomyEngine>, store: Arc<dyn PlayerStore>, config: &ServerConfig) -> Self {
        let locks = Arc::new(PlayerLocks::new());
        let service = GameService::new(Arc::clone(&engine), Arc::clone(&store), Arc::clone(&locks));
        let scheduler = UpdateScheduler::new(
            engine,
            store,
            locks,
            config.tick_interval(),
            config.max_concurrent_players,
        );
        Self { service, scheduler }
    }

    /// Loads the catalog and opens the JSON store named by `config`.
    ///
    /// # Errors
    ///
    /// Any configuration, catalog or store failure.
    pub fn from_config(config: &ServerConfig) -> ServiceResult<Self> {
        config.validate()?;
        let registry = ContentRegistry::from_path(&config.catalog_path)?;
        tracing::info!(
            catalog = %config.catalog_path.display(),
            items = registry.item_count(),
            "catalog loaded"
        );
        let engine = EconomyEngine::new(Arc::new(registry), config.engine.clone())?;
        let store = JsonFileStore::open(&config.data_dir)?;
        Ok(Self::new(Arc::new(engine), Arc::new(store), config))
    }

    /// Command surface.
    #[must_use]
    pub fn service(&self) -> &GameService {
        &self.service
    }

    /// Tick driver.
    #[must_use]
    pub fn scheduler(&self) -> &UpdateScheduler {
        &self.scheduler
    }
}
