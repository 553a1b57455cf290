//! # Update Scheduler
//!
//! Advances every stored player by one economy tick on a fixed interval.
//!
//! ## One Tick
//!
//! ```text
//! load_all ──► decode ids ──► ┌ permit ─► lock ─► load ─► update ─► save ┐
//!                             │ permit ─► lock ─► load ─► update ─► save │──► TickReport
//!                             └ ...  (at most max_concurrent at once)    ┘
//! ```
//!
//! - Per-player work runs on the blocking pool; a semaphore bounds how
//!   many run at once.
//! - A failing player is recorded in the [`TickReport`] and skipped; its
//!   siblings still commit.
//! - The next tick starts only after every task of the current one has
//!   finished. Late ticks are skipped rather than bunched up.

use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use idlecore_economy::player::now_millis;
use idlecore_economy::{EconomyEngine, PlayerState};
use parking_lot::Mutex;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tokio::time::MissedTickBehavior;

use crate::error::TickError;
use crate::store::{PlayerLocks, PlayerStore};

/// What one tick did.
#[derive(Debug, Default)]
pub struct TickReport {
    /// Tick sequence number, from 1.
    pub tick: u64,
    /// Players updated and persisted.
    pub updated: Vec<String>,
    /// Players that failed, with the reason.
    pub failures: Vec<TickError>,
    /// Wall time spent.
    pub elapsed: Duration,
}

impl TickReport {
    /// True if no player failed.
    #[must_use]
    pub fn is_clean(&self) -> bool {
        self.failures.is_empty()
    }
}

/// Tick timing statistics.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct SchedulerStats {
    /// Ticks completed.
    pub total_ticks: u64,
    /// Fastest tick.
    pub min_tick_us: u64,
    /// Slowest tick.
    pub max_tick_us: u64,
    /// Rolling average tick duration.
    pub avg_tick_us: u64,
    /// Ticks that took longer than the interval.
    pub late_ticks: u64,
    /// Player updates committed, all ticks.
    pub players_updated: u64,
    /// Player updates failed, all ticks.
    pub player_failures: u64,
}

/// Periodic driver of [`EconomyEngine::update_player`] over a store.
pub struct UpdateScheduler {
    engine: Arc<EconomyEngine>,
    store: Arc<dyn PlayerStore>,
    locks: Arc<PlayerLocks>,
    interval: Duration,
    workers: Arc<Semaphore>,
    tick_count: AtomicU64,
    stats: Mutex<SchedulerStats>,
}

impl std::fmt::Debug for UpdateScheduler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("UpdateScheduler")
            .field("interval", &self.interval)
            .field("stats", &*self.stats.lock())
            .finish_non_exhaustive()
    }
}

impl UpdateScheduler {
    /// Creates a scheduler ticking every `interval` with at most
    /// `max_concurrent` players in flight.
    #[must_use]
    pub fn new(
        engine: Arc<EconomyEngine>,
        store: Arc<dyn PlayerStore>,
        locks: Arc<PlayerLocks>,
        interval: Duration,
        max_concurrent: usize,
    ) -> Self {
        Self {
            engine,
            store,
            locks,
            interval,
            workers: Arc::new(Semaphore::new(max_concurrent.max(1))),
            tick_count: AtomicU64::new(0),
            stats: Mutex::new(SchedulerStats {
                min_tick_us: u64::MAX,
                ..SchedulerStats::default()
            }),
        }
    }

    /// Timing statistics so far.
    #[must_use]
    pub fn stats(&self) -> SchedulerStats {
        *self.stats.lock()
    }

    /// Runs one tick over every stored player and waits for all of them.
    pub async fn tick(&self) -> TickReport {
        let start = Instant::now();
        let mut report = TickReport {
            tick: self.tick_count.fetch_add(1, Ordering::Relaxed) + 1,
            ..TickReport::default()
        };

        let store = Arc::clone(&self.store);
        let blobs = match tokio::task::spawn_blocking(move || store.load_all()).await {
            Ok(Ok(blobs)) => blobs,
            Ok(Err(error)) => {
                tracing::warn!(tick = report.tick, %error, "tick skipped: player list unavailable");
                report.failures.push(TickError::LoadAll(error));
                return self.finish(report, start);
            }
            Err(error) => {
                report.failures.push(TickError::Aborted(error.to_string()));
                return self.finish(report, start);
            }
        };

        let mut tasks = JoinSet::new();
        for (index, blob) in blobs.into_iter().enumerate() {
            let blob = match blob {
                Ok(blob) => blob,
                Err(error) => {
                    tracing::warn!(tick = report.tick, %error, "player entry skipped");
                    report.failures.push(TickError::Read(error));
                    continue;
                }
            };
            let Ok(permit) = Arc::clone(&self.workers).acquire_owned().await else {
                break;
            };
            let engine = Arc::clone(&self.engine);
            let store = Arc::clone(&self.store);
            let locks = Arc::clone(&self.locks);
            tasks.spawn_blocking(move || {
                let _permit = permit;
                update_one(&engine, store.as_ref(), &locks, index, &blob)
            });
        }

        while let Some(joined) = tasks.join_next().await {
            match joined {
                Ok(Ok(player_id)) => report.updated.push(player_id),
                Ok(Err(error)) => {
                    tracing::warn!(tick = report.tick, %error, "player update failed");
                    report.failures.push(error);
                }
                Err(error) => {
                    tracing::warn!(tick = report.tick, %error, "player task aborted");
                    report.failures.push(TickError::Aborted(error.to_string()));
                }
            }
        }
        report.updated.sort();

        self.finish(report, start)
    }

    fn finish(&self, mut report: TickReport, start: Instant) -> TickReport {
        report.elapsed = start.elapsed();
        let elapsed_us = u64::try_from(report.elapsed.as_micros()).unwrap_or(u64::MAX);

        let mut stats = self.stats.lock();
        stats.total_ticks += 1;
        stats.min_tick_us = stats.min_tick_us.min(elapsed_us);
        stats.max_tick_us = stats.max_tick_us.max(elapsed_us);
        stats.avg_tick_us = if stats.total_ticks == 1 {
            elapsed_us
        } else {
            (stats.avg_tick_us.saturating_mul(15).saturating_add(elapsed_us)) / 16
        };
        if report.elapsed > self.interval {
            stats.late_ticks += 1;
        }
        stats.players_updated += report.updated.len() as u64;
        stats.player_failures += report.failures.len() as u64;
        drop(stats);

        tracing::info!(
            tick = report.tick,
            updated = report.updated.len(),
            failed = report.failures.len(),
            elapsed_us,
            "tick complete"
        );
        report
    }

    /// Ticks on the interval until `shutdown` resolves. Returns the number
    /// of ticks run.
    pub async fn run<F>(&self, shutdown: F) -> u64
    where
        F: Future<Output = ()>,
    {
        let mut interval = tokio::time::interval(self.interval);
        interval.set_missed_tick_behavior(MissedTickBehavior::Skip);
        tokio::pin!(shutdown);

        let mut ticks = 0;
        tracing::info!(interval_ms = self.interval.as_millis(), "scheduler started");
        loop {
            tokio::select! {
                () = &mut shutdown => break,
                _ = interval.tick() => {
                    self.tick().await;
                    ticks += 1;
                }
            }
        }
        tracing::info!(ticks, "scheduler stopped");
        ticks
    }
}

/// Decode, then reload and update under the player's lock so a concurrent
/// command is never overwritten by a stale snapshot.
fn update_one(
    engine: &EconomyEngine,
    store: &dyn PlayerStore,
    locks: &PlayerLocks,
    index: usize,
    blob: &[u8],
) -> Result<String, TickError> {
    let player_id = PlayerState::from_bytes(blob)
        .map_err(|e| TickError::Decode {
            index,
            reason: e.to_string(),
        })?
        .id;

    locks.with_lock(&player_id, || {
        let persist = |source| TickError::Persist {
            player_id: player_id.clone(),
            source,
        };
        let current = store.load(&player_id).map_err(persist)?;
        let mut player = PlayerState::from_bytes(&current).map_err(|e| TickError::Decode {
            index,
            reason: e.to_string(),
        })?;

        let mut pending = Vec::new();
        let summary = engine.update_player_deferred(&mut player, now_millis(), &mut pending);
        tracing::debug!(
            player = %player_id,
            credited = ?summary.credited,
            unlocked = summary.unlocked.len(),
            "player ticked"
        );

        let bytes = player.to_bytes().map_err(|e| TickError::Encode {
            player_id: player_id.clone(),
            reason: e.to_string(),
        })?;
        store.save(&player_id, &bytes).map_err(persist)?;
        engine.events().publish(pending);
        Ok(player_id.clone())
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MemoryStore;
    use idlecore_economy::{ContentRegistry, EngineConfig};
    use serde_json::json;

    fn create_test_engine() -> Arc<EconomyEngine> {
        let registry = ContentRegistry::load(&json!({
            "resources": { "gold": { "initial": 0 } },
            "buildings": { "mine": { "initial": 1, "effects": ["yield:gold:count"] } }
        }))
        .unwrap();
        Arc::new(EconomyEngine::new(Arc::new(registry), EngineConfig::default()).unwrap())
    }

    #[tokio::test]
    async fn test_tick_updates_every_player() {
        let engine = create_test_engine();
        let store = Arc::new(MemoryStore::new());
        for id in ["a", "b", "c"] {
            let player = engine.create_player(id);
            store.save(id, &player.to_bytes().unwrap()).unwrap();
        }

        let scheduler = UpdateScheduler::new(
            engine,
            store.clone(),
            Arc::new(PlayerLocks::new()),
            Duration::from_secs(1),
            2,
        );
        let report = scheduler.tick().await;

        assert!(report.is_clean());
        assert_eq!(report.tick, 1);
        assert_eq!(report.updated, vec!["a", "b", "c"]);
        let b = PlayerState::from_bytes(&store.load("b").unwrap()).unwrap();
        assert_eq!(b.resource("gold"), 1);
        assert_eq!(scheduler.stats().players_updated, 3);
    }

    #[tokio::test]
    async fn test_empty_store_ticks_cleanly() {
        let scheduler = UpdateScheduler::new(
            create_test_engine(),
            Arc::new(MemoryStore::new()),
            Arc::new(PlayerLocks::new()),
            Duration::from_millis(10),
            4,
        );
        let report = scheduler.tick().await;
        assert!(report.is_clean());
        assert!(report.updated.is_empty());
        assert_eq!(scheduler.stats().total_ticks, 1);
    }
}
