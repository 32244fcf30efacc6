use crate::traits::Persistence;
use crate::types::{RelayError, Result};
use std::collections::HashSet;
use std::fs;
use std::io::{ErrorKind, Write};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use tempfile::NamedTempFile;
use tokio::sync::Mutex as AsyncMutex;
use tracing::{debug, info, warn};

/// Persisted set of keys the relay has already taken responsibility for.
///
/// The set is loaded once when the store is opened and written through the
/// persistence collaborator on every mutation, while the set lock is held,
/// so there is exactly one writer at a time and a mutation is only visible
/// once it is durable. Writes run on the blocking pool.
pub struct DedupStore {
    keys: AsyncMutex<HashSet<String>>,
    persistence: Arc<dyn Persistence>,
}

impl DedupStore {
    /// Load the existing state. A missing file is a cold start; a malformed
    /// one is `CorruptState`.
    pub fn open(persistence: Box<dyn Persistence>) -> Result<Self> {
        let keys = persistence.load()?;
        info!("Loaded {} handled keys from {}", keys.len(), persistence.describe());

        Ok(Self {
            keys: AsyncMutex::new(keys),
            persistence: Arc::from(persistence),
        })
    }

    /// Shorthand for a JSON file backed store
    pub fn open_file(path: impl Into<PathBuf>) -> Result<Self> {
        Self::open(Box::new(JsonFilePersistence::new(path)))
    }

    /// Load the keys recorded at `path` but keep every later change in
    /// memory. Used for dry runs, which must not claim keys for real.
    pub fn open_file_read_only(path: impl Into<PathBuf>) -> Result<Self> {
        let keys = JsonFilePersistence::new(path).load()?;
        Self::open(Box::new(MemoryPersistence::seeded(keys)))
    }

    pub fn in_memory() -> Self {
        Self {
            keys: AsyncMutex::new(HashSet::new()),
            persistence: Arc::new(MemoryPersistence::default()),
        }
    }

    pub async fn contains(&self, key: &str) -> bool {
        self.keys.lock().await.contains(key)
    }

    /// Record `key` as handled. Returns `true` if the key was not present
    /// before, which makes this the race-free "claim" operation for pollers.
    pub async fn mark(&self, key: &str) -> Result<bool> {
        let mut keys = self.keys.lock().await;
        if !keys.insert(key.to_string()) {
            return Ok(false);
        }

        if let Err(e) = self.save(&keys).await {
            // Roll back so memory never claims more than disk
            keys.remove(key);
            return Err(e);
        }

        debug!("Marked key {}", key);
        Ok(true)
    }

    /// Forget `key`. Returns `true` if it was present.
    pub async fn unmark(&self, key: &str) -> Result<bool> {
        let mut keys = self.keys.lock().await;
        if !keys.remove(key) {
            return Ok(false);
        }

        if let Err(e) = self.save(&keys).await {
            keys.insert(key.to_string());
            return Err(e);
        }

        debug!("Unmarked key {}", key);
        Ok(true)
    }

    /// Durably persist the current set
    pub async fn flush(&self) -> Result<()> {
        let keys = self.keys.lock().await;
        self.save(&keys).await
    }

    /// Hand a snapshot to the persistence layer off the async worker
    /// threads. Callers hold the set lock across this.
    async fn save(&self, keys: &HashSet<String>) -> Result<()> {
        let persistence = self.persistence.clone();
        let snapshot = keys.clone();
        tokio::task::spawn_blocking(move || persistence.save(&snapshot))
            .await
            .map_err(|e| RelayError::Io(std::io::Error::new(ErrorKind::Other, e)))?
    }

    pub async fn len(&self) -> usize {
        self.keys.lock().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.keys.lock().await.is_empty()
    }

    /// Sorted copy of every handled key
    pub async fn keys(&self) -> Vec<String> {
        let keys = self.keys.lock().await;
        let mut sorted: Vec<String> = keys.iter().cloned().collect();
        sorted.sort();
        sorted
    }

    pub fn location(&self) -> String {
        self.persistence.describe()
    }
}

/// Stores the key set as a JSON array of strings, replaced atomically
/// (temp file in the same directory, fsync, rename).
pub struct JsonFilePersistence {
    path: PathBuf,
}

impl JsonFilePersistence {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn parent_dir(&self) -> PathBuf {
        match self.path.parent() {
            Some(parent) if !parent.as_os_str().is_empty() => parent.to_path_buf(),
            _ => PathBuf::from("."),
        }
    }
}

impl Persistence for JsonFilePersistence {
    fn load(&self) -> Result<HashSet<String>> {
        let raw = match fs::read_to_string(&self.path) {
            Ok(raw) => raw,
            Err(e) if e.kind() == ErrorKind::NotFound => {
                warn!("No dedup state at {}, starting empty", self.path.display());
                return Ok(HashSet::new());
            }
            Err(e) => return Err(e.into()),
        };

        let keys: Vec<String> = serde_json::from_str(&raw).map_err(|e| RelayError::CorruptState {
            path: self.path.clone(),
            reason: e.to_string(),
        })?;

        Ok(keys.into_iter().collect())
    }

    fn save(&self, keys: &HashSet<String>) -> Result<()> {
        let dir = self.parent_dir();
        fs::create_dir_all(&dir)?;

        let mut sorted: Vec<&String> = keys.iter().collect();
        sorted.sort();

        let mut tmp = NamedTempFile::new_in(&dir)?;
        serde_json::to_writer(&mut tmp, &sorted)?;
        tmp.flush()?;
        tmp.as_file().sync_all()?;
        tmp.persist(&self.path).map_err(|e| RelayError::Io(e.error))?;

        // Make the rename itself durable
        #[cfg(unix)]
        fs::File::open(&dir)?.sync_all()?;

        Ok(())
    }

    fn describe(&self) -> String {
        self.path.display().to_string()
    }
}

/// Volatile persistence for tests and dry runs. Clones share the same
/// backing set, which lets a test "restart" a store over the same state.
#[derive(Clone, Default)]
pub struct MemoryPersistence {
    saved: Arc<Mutex<Option<HashSet<String>>>>,
}

impl MemoryPersistence {
    /// Start from an existing key set, as if it had been saved before
    pub fn seeded(keys: HashSet<String>) -> Self {
        Self {
            saved: Arc::new(Mutex::new(Some(keys))),
        }
    }

    pub fn snapshot(&self) -> HashSet<String> {
        self.saved
            .lock()
            .map(|saved| saved.clone().unwrap_or_default())
            .unwrap_or_default()
    }
}

impl Persistence for MemoryPersistence {
    fn load(&self) -> Result<HashSet<String>> {
        Ok(self.snapshot())
    }

    fn save(&self, keys: &HashSet<String>) -> Result<()> {
        let mut saved = self.saved.lock().map_err(|_| {
            RelayError::Io(std::io::Error::new(
                ErrorKind::Other,
                "memory persistence lock poisoned",
            ))
        })?;
        *saved = Some(keys.clone());
        Ok(())
    }

    fn describe(&self) -> String {
        "memory".to_string()
    }
}
