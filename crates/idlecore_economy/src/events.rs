//! # Economy Events
//!
//! Closed set of typed events emitted by the economy engine, and the bus
//! that delivers them.
//!
//! ## Delivery
//!
//! ```text
//!                    ┌──► handler (on EventKind::Prestige)
//! EconomyEngine ──► EventBus ──► handler (on EventKind::BuildingBought)
//!                    └──► EventReceiver (bounded channel, drained later)
//! ```
//!
//! Handlers run synchronously inside `emit`, on the caller's thread.
//! Channel subscribers never block the emitter: when a subscriber's queue
//! is full the event is dropped for that subscriber and counted.

use crossbeam_channel::{bounded, Receiver, Sender, TrySendError};
use parking_lot::RwLock;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

/// Events emitted by economy operations.
#[derive(Clone, Debug, PartialEq)]
pub enum GameEvent {
    // =========================================================================
    // Purchases
    // =========================================================================
    /// A building was bought.
    BuildingBought {
        /// Buyer.
        player_id: String,
        /// Building key.
        building: String,
        /// Owned count after the purchase.
        amount: u32,
    },

    /// An upgrade was bought.
    UpgradeBought {
        /// Buyer.
        player_id: String,
        /// Upgrade key.
        upgrade: String,
    },

    /// A building was sold.
    BuildingSold {
        /// Seller.
        player_id: String,
        /// Building key.
        building: String,
        /// Owned count after the sale.
        amount: u32,
    },

    // =========================================================================
    // Progression
    // =========================================================================
    /// The player prestiged.
    Prestige {
        /// Player.
        player_id: String,
        /// New prestige counter.
        prestige_level: u32,
    },

    /// An achievement level was unlocked.
    AchievementUnlocked {
        /// Player.
        player_id: String,
        /// Achievement key.
        achievement: String,
        /// Level reached.
        level: u32,
    },
}

/// Discriminant of a [`GameEvent`], used to register handlers.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum EventKind {
    /// [`GameEvent::BuildingBought`]
    BuildingBought,
    /// [`GameEvent::UpgradeBought`]
    UpgradeBought,
    /// [`GameEvent::BuildingSold`]
    BuildingSold,
    /// [`GameEvent::Prestige`]
    Prestige,
    /// [`GameEvent::AchievementUnlocked`]
    AchievementUnlocked,
}

impl GameEvent {
    /// The event's kind.
    #[must_use]
    pub const fn kind(&self) -> EventKind {
        match self {
            Self::BuildingBought { .. } => EventKind::BuildingBought,
            Self::UpgradeBought { .. } => EventKind::UpgradeBought,
            Self::BuildingSold { .. } => EventKind::BuildingSold,
            Self::Prestige { .. } => EventKind::Prestige,
            Self::AchievementUnlocked { .. } => EventKind::AchievementUnlocked,
        }
    }

    /// Player the event concerns.
    #[must_use]
    pub fn player_id(&self) -> &str {
        match self {
            Self::BuildingBought { player_id, .. }
            | Self::UpgradeBought { player_id, .. }
            | Self::BuildingSold { player_id, .. }
            | Self::Prestige { player_id, .. }
            | Self::AchievementUnlocked { player_id, .. } => player_id,
        }
    }
}

type Handler = Arc<dyn Fn(&GameEvent) + Send + Sync>;

/// Publish/subscribe hub for [`GameEvent`]s.
#[derive(Default)]
pub struct EventBus {
    handlers: RwLock<Vec<(EventKind, Handler)>>,
    subscribers: RwLock<Vec<Sender<GameEvent>>>,
    dropped: AtomicU64,
}

impl std::fmt::Debug for EventBus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EventBus")
            .field("handlers", &self.handlers.read().len())
            .field("subscribers", &self.subscribers.read().len())
            .field("dropped", &self.dropped_count())
            .finish()
    }
}

impl EventBus {
    /// Creates a bus with no listeners.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a handler for one event kind.
    pub fn on<F>(&self, kind: EventKind, handler: F)
    where
        F: Fn(&GameEvent) + Send + Sync + 'static,
    {
        self.handlers.write().push((kind, Arc::new(handler)));
    }

    /// Opens a channel receiving every event, holding at most `capacity`
    /// undelivered ones.
    #[must_use]
    pub fn subscribe(&self, capacity: usize) -> EventReceiver {
        let (sender, receiver) = bounded(capacity.max(1));
        self.subscribers.write().push(sender);
        EventReceiver { receiver }
    }

    /// Delivers an event to matching handlers and every subscriber.
    pub fn emit(&self, event: &GameEvent) {
        let kind = event.kind();
        // Clone the handler list so a handler may register further handlers.
        let handlers: Vec<Handler> = self
            .handlers
            .read()
            .iter()
            .filter(|(k, _)| *k == kind)
            .map(|(_, h)| Arc::clone(h))
            .collect();
        for handler in handlers {
            handler(event);
        }

        // Disconnected subscribers are pruned on the way.
        self.subscribers
            .write()
            .retain(|sender| match sender.try_send(event.clone()) {
                Ok(()) => true,
                Err(TrySendError::Full(_)) => {
                    self.dropped.fetch_add(1, Ordering::Relaxed);
                    tracing::warn!(?kind, "event subscriber full, event dropped");
                    true
                }
                Err(TrySendError::Disconnected(_)) => false,
            });
    }

    /// Emits events held back until a change was committed, in order.
    pub fn publish(&self, events: impl IntoIterator<Item = GameEvent>) {
        for event in events {
            self.emit(&event);
        }
    }

    /// Events dropped because a subscriber was full.
    #[must_use]
    pub fn dropped_count(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }

    /// Number of live channel subscribers.
    #[must_use]
    pub fn subscriber_count(&self) -> usize {
        self.subscribers.read().len()
    }
}

/// Receiving end of a [`EventBus::subscribe`] channel.
#[derive(Clone, Debug)]
pub struct EventReceiver {
    receiver: Receiver<GameEvent>,
}

impl EventReceiver {
    /// Takes every pending event (non-blocking).
    #[must_use]
    pub fn drain(&self) -> Vec<GameEvent> {
        self.receiver.try_iter().collect()
    }

    /// Takes one event (non-blocking).
    #[must_use]
    pub fn try_recv(&self) -> Option<GameEvent> {
        self.receiver.try_recv().ok()
    }

    /// Number of pending events.
    #[must_use]
    pub fn pending_count(&self) -> usize {
        self.receiver.len()
    }
}
