//! Durable persistence of the current credential pair.
//!
//! Exactly one serialized [`Token`] lives under a single well-known key.
//! Corrupted values self-heal: a read that fails to deserialize deletes the
//! entry and reports an empty store instead of wedging the session.

use crate::errors::StoreError;
use crate::token::Token;
use parking_lot::Mutex;
use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::warn;

/// File name of the credential slot inside the storage directory.
pub const CREDENTIAL_FILE: &str = "credentials.json";

/// Storage backend persisting exactly one credential pair.
///
/// Writers always overwrite the full value; a reader never observes a
/// half-written token.
pub trait TokenStore: Send + Sync + std::fmt::Debug {
    /// Serialize and write the token, replacing any previous value.
    fn save(&self, token: &Token) -> Result<(), StoreError>;

    /// Read the stored token. A present-but-corrupted value is deleted and
    /// reported as `None`.
    fn get(&self) -> Result<Option<Token>, StoreError>;

    /// Remove the stored value. Deleting an absent value is not an error.
    fn delete(&self) -> Result<(), StoreError>;
}

/// How strictly the on-disk credential file is protected.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StorageProfile {
    /// Owner-only file permissions. Use in release builds.
    Secure,
    /// No permission tightening. Use in development and test harnesses.
    Plain,
}

/// Pick a store for the given profile. Pure function of its arguments: the
/// decision is made once at construction and never re-derived from ambient
/// runtime flags.
pub fn select_store(profile: StorageProfile, dir: &Path) -> Arc<dyn TokenStore> {
    Arc::new(FileTokenStore::new(dir.join(CREDENTIAL_FILE), profile))
}

/// File-backed token store.
#[derive(Debug)]
pub struct FileTokenStore {
    path: PathBuf,
    profile: StorageProfile,
}

impl FileTokenStore {
    /// Create a store persisting to `path`.
    pub fn new(path: impl Into<PathBuf>, profile: StorageProfile) -> Self {
        Self {
            path: path.into(),
            profile,
        }
    }

    /// Path of the credential file.
    pub fn path(&self) -> &Path {
        &self.path
    }

    #[cfg(unix)]
    fn restrict_permissions(&self, path: &Path) -> std::io::Result<()> {
        use std::os::unix::fs::PermissionsExt;
        if self.profile == StorageProfile::Secure {
            fs::set_permissions(path, fs::Permissions::from_mode(0o600))?;
        }
        Ok(())
    }

    #[cfg(not(unix))]
    fn restrict_permissions(&self, _path: &Path) -> std::io::Result<()> {
        Ok(())
    }
}

impl TokenStore for FileTokenStore {
    fn save(&self, token: &Token) -> Result<(), StoreError> {
        let serialized = serde_json::to_vec(token)?;
        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent)?;
        }
        // Write-then-rename so a concurrent reader never sees a partial value.
        let tmp = self.path.with_extension("tmp");
        fs::write(&tmp, serialized)?;
        self.restrict_permissions(&tmp)?;
        fs::rename(&tmp, &self.path)?;
        Ok(())
    }

    fn get(&self) -> Result<Option<Token>, StoreError> {
        let raw = match fs::read_to_string(&self.path) {
            Ok(raw) => raw,
            Err(err) if err.kind() == ErrorKind::NotFound => return Ok(None),
            Err(err) => return Err(err.into()),
        };
        match serde_json::from_str::<Token>(&raw) {
            Ok(token) => Ok(Some(token)),
            Err(err) => {
                warn!(error = %err, path = %self.path.display(), "corrupted credential entry, deleting");
                self.delete()?;
                Ok(None)
            }
        }
    }

    fn delete(&self) -> Result<(), StoreError> {
        match fs::remove_file(&self.path) {
            Ok(()) => Ok(()),
            Err(err) if err.kind() == ErrorKind::NotFound => Ok(()),
            Err(err) => Err(err.into()),
        }
    }
}

/// In-memory token store for development and tests.
///
/// Holds the serialized form so corruption can be injected with
/// [`MemoryTokenStore::put_raw`].
#[derive(Debug, Default)]
pub struct MemoryTokenStore {
    slot: Mutex<Option<String>>,
}

impl MemoryTokenStore {
    /// Create an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a store seeded with a token.
    pub fn with_token(token: &Token) -> Self {
        let store = Self::new();
        // Serializing a plain struct of strings cannot fail.
        *store.slot.lock() = serde_json::to_string(token).ok();
        store
    }

    /// Replace the slot with a raw serialized value, bypassing validation.
    pub fn put_raw(&self, raw: impl Into<String>) {
        *self.slot.lock() = Some(raw.into());
    }
}

impl TokenStore for MemoryTokenStore {
    fn save(&self, token: &Token) -> Result<(), StoreError> {
        let serialized = serde_json::to_string(token)?;
        *self.slot.lock() = Some(serialized);
        Ok(())
    }

    fn get(&self) -> Result<Option<Token>, StoreError> {
        let mut slot = self.slot.lock();
        let Some(raw) = slot.as_deref() else {
            return Ok(None);
        };
        match serde_json::from_str::<Token>(raw) {
            Ok(token) => Ok(Some(token)),
            Err(err) => {
                warn!(error = %err, "corrupted credential entry, deleting");
                *slot = None;
                Ok(None)
            }
        }
    }

    fn delete(&self) -> Result<(), StoreError> {
        *self.slot.lock() = None;
        Ok(())
    }
}
