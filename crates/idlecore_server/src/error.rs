//! Error types for persistence, the tick loop and the command surface.

use std::path::PathBuf;

use idlecore_economy::EconomyError;
use thiserror::Error;

/// Errors raised by a [`PlayerStore`](crate::store::PlayerStore).
#[derive(Error, Debug)]
pub enum StoreError {
    /// No blob stored under this player ID.
    #[error("player not stored: {0}")]
    NotFound(String),

    /// Player ID cannot be used as a storage key.
    #[error("invalid player id: {0:?}")]
    InvalidId(String),

    /// Filesystem failure.
    #[error("i/o error on {path}: {source}")]
    Io {
        /// File or directory involved.
        path: PathBuf,
        /// Underlying error.
        #[source]
        source: std::io::Error,
    },
}

/// Result type for store operations.
pub type StoreResult<T> = Result<T, StoreError>;

/// A per-player failure inside one scheduler tick.
///
/// Never aborts the tick; collected into the
/// [`TickReport`](crate::scheduler::TickReport).
#[derive(Error, Debug)]
pub enum TickError {
    /// Loading the player list failed; nothing was updated.
    #[error("could not load players: {0}")]
    LoadAll(#[source] StoreError),

    /// One stored entry could not be read; the rest of the tick went on.
    #[error("could not read player entry: {0}")]
    Read(#[source] StoreError),

    /// A stored blob is not a valid player snapshot.
    #[error("undecodable player blob #{index}: {reason}")]
    Decode {
        /// Position in the loaded batch.
        index: usize,
        /// Decoder message.
        reason: String,
    },

    /// Updated state could not be serialized.
    #[error("could not encode player {player_id}: {reason}")]
    Encode {
        /// Player affected.
        player_id: String,
        /// Encoder message.
        reason: String,
    },

    /// Reloading or saving the player failed.
    #[error("persistence failed for player {player_id}: {source}")]
    Persist {
        /// Player affected.
        player_id: String,
        /// Store failure.
        #[source]
        source: StoreError,
    },

    /// The update task panicked or was cancelled.
    #[error("player task aborted: {0}")]
    Aborted(String),
}

/// Errors surfaced by the [`GameService`](crate::service::GameService).
#[derive(Error, Debug)]
pub enum ServiceError {
    /// Persistence failure.
    #[error(transparent)]
    Store(#[from] StoreError),

    /// Rule violation (unaffordable, unknown key, ...).
    #[error(transparent)]
    Economy(#[from] EconomyError),

    /// Player snapshot could not be encoded or decoded.
    #[error("codec error: {0}")]
    Codec(String),

    /// Player already exists.
    #[error("player already exists: {0}")]
    PlayerExists(String),

    /// Unparseable command text.
    #[error("bad command: {0}")]
    BadCommand(String),

    /// Invalid server configuration.
    #[error("invalid configuration: {0}")]
    Config(String),
}

/// Result type for service operations.
pub type ServiceResult<T> = Result<T, ServiceError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_messages() {
        let err = TickError::Persist {
            player_id: "p1".into(),
            source: StoreError::NotFound("p1".into()),
        };
        assert_eq!(
            err.to_string(),
            "persistence failed for player p1: player not stored: p1"
        );

        let err: ServiceError = EconomyError::UnknownPlayer("bob".into()).into();
        assert_eq!(err.to_string(), "unknown player: bob");
    }
}
