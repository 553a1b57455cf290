//! # Player Persistence
//!
//! The storage seam between the scheduler/service and whatever keeps the
//! player blobs. Blobs are opaque here; encoding is
//! [`PlayerState::to_bytes`](idlecore_economy::PlayerState::to_bytes).
//!
//! ```text
//! UpdateScheduler ──┐
//!                   ├──► dyn PlayerStore ──► MemoryStore   (tests, demos)
//! GameService ──────┘                   └──► JsonFileStore (<dir>/<id>.json)
//! ```
//!
//! Stores are synchronous; async callers go through `spawn_blocking`.
//! [`PlayerLocks`] serializes read-modify-write cycles on one player so a
//! command never races a tick.

use std::collections::{BTreeMap, HashMap};
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use parking_lot::{Mutex, RwLock};

use crate::error::{StoreError, StoreResult};

/// Storage backend for serialized players.
pub trait PlayerStore: Send + Sync {
    /// Every stored blob, in no particular order.
    ///
    /// An entry that cannot be read comes back as its own `Err`; the other
    /// entries are still returned.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] if the backend cannot be listed at all.
    fn load_all(&self) -> StoreResult<Vec<StoreResult<Vec<u8>>>>;

    /// One player's blob.
    ///
    /// # Errors
    ///
    /// [`StoreError::NotFound`] if nothing is stored under `id`.
    fn load(&self, id: &str) -> StoreResult<Vec<u8>>;

    /// Stores (or replaces) one player's blob.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] if the write fails.
    fn save(&self, id: &str, blob: &[u8]) -> StoreResult<()>;

    /// Whether a blob exists under `id`.
    fn contains(&self, id: &str) -> bool {
        self.load(id).is_ok()
    }
}

// ============================================================================
// In-memory
// ============================================================================

/// Blobs in a map. Lost on drop.
#[derive(Debug, Default)]
pub struct MemoryStore {
    blobs: RwLock<BTreeMap<String, Vec<u8>>>,
}

impl MemoryStore {
    /// Empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of stored players.
    #[must_use]
    pub fn len(&self) -> usize {
        self.blobs.read().len()
    }

    /// True if nothing is stored.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.blobs.read().is_empty()
    }
}

impl PlayerStore for MemoryStore {
    fn load_all(&self) -> StoreResult<Vec<StoreResult<Vec<u8>>>> {
        Ok(self.blobs.read().values().cloned().map(Ok).collect())
    }

    fn load(&self, id: &str) -> StoreResult<Vec<u8>> {
        self.blobs
            .read()
            .get(id)
            .cloned()
            .ok_or_else(|| StoreError::NotFound(id.to_string()))
    }

    fn save(&self, id: &str, blob: &[u8]) -> StoreResult<()> {
        self.blobs.write().insert(id.to_string(), blob.to_vec());
        Ok(())
    }

    fn contains(&self, id: &str) -> bool {
        self.blobs.read().contains_key(id)
    }
}

// ============================================================================
// JSON files
// ============================================================================

const EXTENSION: &str = "json";

/// One `<id>.json` file per player under a directory.
///
/// Writes go to a temporary sibling first and are renamed into place, so a
/// crash mid-write leaves the previous snapshot intact.
#[derive(Debug, Clone)]
pub struct JsonFileStore {
    dir: PathBuf,
}

impl JsonFileStore {
    /// Opens (creating if needed) a store rooted at `dir`.
    ///
    /// # Errors
    ///
    /// [`StoreError::Io`] if the directory cannot be created.
    pub fn open(dir: impl Into<PathBuf>) -> StoreResult<Self> {
        let dir = dir.into();
        fs::create_dir_all(&dir).map_err(|source| StoreError::Io {
            path: dir.clone(),
            source,
        })?;
        Ok(Self { dir })
    }

    /// Root directory.
    #[must_use]
    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn path_for(&self, id: &str) -> StoreResult<PathBuf> {
        let valid = !id.is_empty()
            && id
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_');
        if !valid {
            return Err(StoreError::InvalidId(id.to_string()));
        }
        Ok(self.dir.join(format!("{id}.{EXTENSION}")))
    }
}

impl PlayerStore for JsonFileStore {
    fn load_all(&self) -> StoreResult<Vec<StoreResult<Vec<u8>>>> {
        let entries = fs::read_dir(&self.dir).map_err(|source| StoreError::Io {
            path: self.dir.clone(),
            source,
        })?;
        let mut blobs = Vec::new();
        for entry in entries {
            let path = match entry {
                Ok(entry) => entry.path(),
                Err(source) => {
                    blobs.push(Err(StoreError::Io {
                        path: self.dir.clone(),
                        source,
                    }));
                    continue;
                }
            };
            if path.extension().and_then(|e| e.to_str()) != Some(EXTENSION) {
                continue;
            }
            let blob = fs::read(&path).map_err(|source| {
                tracing::warn!(path = %path.display(), %source, "unreadable player file");
                StoreError::Io {
                    path: path.clone(),
                    source,
                }
            });
            blobs.push(blob);
        }
        Ok(blobs)
    }

    fn load(&self, id: &str) -> StoreResult<Vec<u8>> {
        let path = self.path_for(id)?;
        fs::read(&path).map_err(|source| {
            if source.kind() == std::io::ErrorKind::NotFound {
                StoreError::NotFound(id.to_string())
            } else {
                StoreError::Io { path, source }
            }
        })
    }

    fn save(&self, id: &str, blob: &[u8]) -> StoreResult<()> {
        let path = self.path_for(id)?;
        let tmp = path.with_extension("tmp");
        fs::write(&tmp, blob).map_err(|source| StoreError::Io {
            path: tmp.clone(),
            source,
        })?;
        fs::rename(&tmp, &path).map_err(|source| StoreError::Io { path, source })
    }
}

// ============================================================================
// Per-player locks
// ============================================================================

/// One mutex per player ID, created on first use and dropped once no
/// caller holds or waits on it.
#[derive(Debug, Default)]
pub struct PlayerLocks {
    locks: Mutex<HashMap<String, Arc<Mutex<()>>>>,
}

impl PlayerLocks {
    /// Empty lock table.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Runs `f` while holding `id`'s lock.
    pub fn with_lock<R>(&self, id: &str, f: impl FnOnce() -> R) -> R {
        let lock = Arc::clone(self.locks.lock().entry(id.to_string()).or_default());
        let result = {
            let _guard = lock.lock();
            f()
        };

        // Clones only happen under the table lock, so the count is exact:
        // one for the table, one for this call.
        let mut locks = self.locks.lock();
        if Arc::strong_count(&lock) == 2 {
            locks.remove(id);
        }
        result
    }

    /// Number of players with a live lock entry.
    #[must_use]
    pub fn len(&self) -> usize {
        self.locks.lock().len()
    }

    /// True if no lock entry is live.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.locks.lock().is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn create_test_dir(name: &str) -> PathBuf {
        let id = std::time::SystemTime::now()
            .duration_since(std::time::UNIX_EPOCH)
            .unwrap()
            .as_nanos();
        std::env::temp_dir().join(format!("idlecore_store_{name}_{id}"))
    }

    #[test]
    fn test_memory_store() {
        let store = MemoryStore::new();
        assert!(matches!(store.load("p1"), Err(StoreError::NotFound(_))));

        store.save("p1", b"one").unwrap();
        store.save("p1", b"two").unwrap();
        store.save("p2", b"three").unwrap();

        assert_eq!(store.load("p1").unwrap(), b"two");
        assert_eq!(store.len(), 2);
        assert!(store.contains("p2"));
        assert_eq!(store.load_all().unwrap().len(), 2);
    }

    #[test]
    fn test_json_file_store_reports_unreadable_entries() {
        let dir = create_test_dir("unreadable");
        let store = JsonFileStore::open(&dir).unwrap();
        store.save("alice", br#"{"id":"alice"}"#).unwrap();
        fs::create_dir(dir.join("zzz.json")).unwrap();

        let entries = store.load_all().unwrap();
        assert_eq!(entries.len(), 2);
        assert_eq!(entries.iter().filter(|e| e.is_ok()).count(), 1);
        assert!(entries
            .iter()
            .any(|e| matches!(e, Err(StoreError::Io { path, .. }) if path.ends_with("zzz.json"))));

        fs::remove_dir_all(&dir).ok();
    }

    #[test]
    fn test_json_file_store_roundtrip() {
        let dir = create_test_dir("roundtrip");
        let store = JsonFileStore::open(&dir).unwrap();

        store.save("alice", br#"{"id":"alice"}"#).unwrap();
        store.save("bob", br#"{"id":"bob"}"#).unwrap();
        fs::write(dir.join("notes.txt"), "ignored").unwrap();

        assert_eq!(store.load("alice").unwrap(), br#"{"id":"alice"}"#);
        assert_eq!(store.load_all().unwrap().len(), 2);
        assert!(matches!(store.load("carol"), Err(StoreError::NotFound(_))));
        assert!(!dir.join("alice.tmp").exists());

        fs::remove_dir_all(&dir).ok();
    }

    #[test]
    fn test_json_file_store_rejects_path_ids() {
        let dir = create_test_dir("ids");
        let store = JsonFileStore::open(&dir).unwrap();

        assert!(matches!(store.save("../evil", b"x"), Err(StoreError::InvalidId(_))));
        assert!(matches!(store.load(""), Err(StoreError::InvalidId(_))));

        fs::remove_dir_all(&dir).ok();
    }

    #[test]
    fn test_player_locks_serialize() {
        let locks = Arc::new(PlayerLocks::new());
        let counter = Arc::new(Mutex::new(0_u32));

        let handles: Vec<_> = (0..4)
            .map(|_| {
                let locks = Arc::clone(&locks);
                let counter = Arc::clone(&counter);
                std::thread::spawn(move || {
                    for _ in 0..100 {
                        locks.with_lock("p1", || {
                            let value = *counter.lock();
                            *counter.lock() = value + 1;
                        });
                    }
                })
            })
            .collect();
        for handle in handles {
            handle.join().unwrap();
        }
        assert_eq!(*counter.lock(), 400);
        assert!(locks.is_empty());
    }

    #[test]
    fn test_player_locks_pruned_after_use() {
        let locks = PlayerLocks::new();
        for i in 0..50 {
            locks.with_lock(&format!("p{i}"), || ());
        }
        assert!(locks.is_empty());

        let len_inside = locks.with_lock("p1", || locks.len());
        assert_eq!(len_inside, 1);
        assert_eq!(locks.len(), 0);
    }
}
