//! Progress document persistence
//!
//! One JSON document per learner. Backends:
//!
//! - [`SledProgressStore`] - sled database, one key holding the document
//! - [`JsonFileStore`] - a single `.json` file, replaced via write-then-rename
//! - [`MemoryStore`] - in-process, for tests and ephemeral sessions
//!
//! A missing document loads as empty progress. So does a document that fails
//! to parse: corrupt storage means "no progress", it is logged and not fatal.
//! An unreachable medium is a [`StoreError`].

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Mutex;

use tracing::{debug, info, warn};

use crate::config::{Config, StoreBackend};
use crate::error::StoreError;
use crate::progress::{LearningPath, UserProgress};

/// Load/save/clear contract for the progress document
pub trait ProgressStore: Send + Sync {
    /// Last saved document, or empty progress if none or unparseable
    fn load(&self) -> Result<UserProgress, StoreError>;

    /// Replace the stored document as a whole
    fn save(&self, progress: &UserProgress) -> Result<(), StoreError>;

    /// Remove the whole document, or only one path's module data
    fn clear(&self, scope: Option<LearningPath>) -> Result<(), StoreError>;
}

/// Parse a stored document, treating corruption as empty progress
pub fn decode_document(bytes: &[u8]) -> UserProgress {
    match serde_json::from_slice(bytes) {
        Ok(progress) => progress,
        Err(e) => {
            warn!(error = %e, "Stored progress is corrupt, starting fresh");
            UserProgress::default()
        }
    }
}

fn clear_scoped<S: ProgressStore + ?Sized>(store: &S, path: LearningPath) -> Result<(), StoreError> {
    let mut progress = store.load()?;
    progress.clear_path(path);
    store.save(&progress)
}

/// Open the backend selected by the config
pub fn open_store(config: &Config) -> Result<Box<dyn ProgressStore>, StoreError> {
    match config.backend {
        StoreBackend::Sled => Ok(Box::new(SledProgressStore::open(
            config.progress_db_path(),
            &config.storage_key,
        )?)),
        StoreBackend::Json => Ok(Box::new(JsonFileStore::new(config.progress_json_path()))),
        StoreBackend::Memory => Ok(Box::new(MemoryStore::new())),
    }
}

// ============================================================================
// sled
// ============================================================================

pub struct SledProgressStore {
    db: sled::Db,
    key: String,
}

impl SledProgressStore {
    /// Open or create the database
    pub fn open<P: AsRef<Path>>(path: P, key: &str) -> Result<Self, StoreError> {
        let db = sled::open(path.as_ref())?;
        info!(path = %path.as_ref().display(), key, "Opened progress database");
        Ok(Self {
            db,
            key: key.to_string(),
        })
    }
}

impl ProgressStore for SledProgressStore {
    fn load(&self) -> Result<UserProgress, StoreError> {
        match self.db.get(self.key.as_bytes())? {
            Some(value) => Ok(decode_document(&value)),
            None => Ok(UserProgress::default()),
        }
    }

    fn save(&self, progress: &UserProgress) -> Result<(), StoreError> {
        let value = serde_json::to_vec(progress)?;
        self.db.insert(self.key.as_bytes(), value)?;
        self.db.flush()?;
        debug!(key = %self.key, "Saved progress");
        Ok(())
    }

    fn clear(&self, scope: Option<LearningPath>) -> Result<(), StoreError> {
        match scope {
            Some(path) => clear_scoped(self, path),
            None => {
                self.db.remove(self.key.as_bytes())?;
                self.db.flush()?;
                Ok(())
            }
        }
    }
}

// ============================================================================
// JSON file
// ============================================================================

pub struct JsonFileStore {
    path: PathBuf,
}

impl JsonFileStore {
    pub fn new<P: Into<PathBuf>>(path: P) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn temp_path(&self) -> PathBuf {
        self.path.with_extension("json.tmp")
    }
}

impl ProgressStore for JsonFileStore {
    fn load(&self) -> Result<UserProgress, StoreError> {
        match std::fs::read(&self.path) {
            Ok(bytes) => Ok(decode_document(&bytes)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(UserProgress::default()),
            Err(e) => Err(e.into()),
        }
    }

    fn save(&self, progress: &UserProgress) -> Result<(), StoreError> {
        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let bytes = serde_json::to_vec_pretty(progress)?;
        let temp = self.temp_path();
        std::fs::write(&temp, bytes)?;
        std::fs::rename(&temp, &self.path)?;
        debug!(path = %self.path.display(), "Saved progress");
        Ok(())
    }

    fn clear(&self, scope: Option<LearningPath>) -> Result<(), StoreError> {
        match scope {
            Some(path) => clear_scoped(self, path),
            None => match std::fs::remove_file(&self.path) {
                Ok(()) => Ok(()),
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
                Err(e) => Err(e.into()),
            },
        }
    }
}

// ============================================================================
// In-memory
// ============================================================================

/// Holds the serialized document, so corrupt payloads can be simulated
#[derive(Default)]
pub struct MemoryStore {
    document: Mutex<Option<Vec<u8>>>,
    unavailable: AtomicBool,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Seed the store with raw bytes (valid or not)
    pub fn with_raw(raw: impl Into<Vec<u8>>) -> Self {
        Self {
            document: Mutex::new(Some(raw.into())),
            unavailable: AtomicBool::new(false),
        }
    }

    /// Make every subsequent call fail, like a full or revoked storage quota
    pub fn set_unavailable(&self, unavailable: bool) {
        self.unavailable.store(unavailable, Ordering::SeqCst);
    }

    /// Raw stored bytes, if any
    pub fn raw(&self) -> Option<Vec<u8>> {
        self.document
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }

    fn check_available(&self) -> Result<(), StoreError> {
        if self.unavailable.load(Ordering::SeqCst) {
            return Err(StoreError::Unavailable("memory store quota exceeded".to_string()));
        }
        Ok(())
    }
}

impl ProgressStore for MemoryStore {
    fn load(&self) -> Result<UserProgress, StoreError> {
        self.check_available()?;
        Ok(self
            .raw()
            .map(|bytes| decode_document(&bytes))
            .unwrap_or_default())
    }

    fn save(&self, progress: &UserProgress) -> Result<(), StoreError> {
        self.check_available()?;
        let bytes = serde_json::to_vec(progress)?;
        *self.document.lock().unwrap_or_else(|e| e.into_inner()) = Some(bytes);
        Ok(())
    }

    fn clear(&self, scope: Option<LearningPath>) -> Result<(), StoreError> {
        self.check_available()?;
        match scope {
            Some(path) => clear_scoped(self, path),
            None => {
                *self.document.lock().unwrap_or_else(|e| e.into_inner()) = None;
                Ok(())
            }
        }
    }
}
