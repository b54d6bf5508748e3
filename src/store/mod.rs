//! # Persistent Slot Storage
//!
//! Shared persistence for the token store and the secret cache: one named
//! slot of opaque string data, kept in the OS credential store when it is
//! usable and in a mode-restricted file under the user's config directory
//! otherwise.
//!
//! The keyring is probed once per store instance with a sentinel read. A
//! "not found" answer means the backend works; any other error marks it
//! unusable for the rest of the process. Transient keyring errors are
//! therefore sticky — this mirrors the long-standing behavior of the
//! original probe and keeps cache keys stable within a run.

use crate::errors::{Result, SstartError};
use std::path::{Path, PathBuf};
use std::sync::{Arc, OnceLock};
use tracing::{debug, warn};

/// Directory name under the config root where sstart keeps its files
pub const CONFIG_DIR_NAME: &str = "sstart";

/// Keyring entry used to probe backend availability
const PROBE_ENTRY: &str = "test-availability";

/// Resolve the sstart config directory: `$XDG_CONFIG_HOME/sstart`, falling
/// back to `~/.config/sstart`, falling back to `./sstart`.
pub fn config_dir() -> PathBuf {
    let root = std::env::var_os("XDG_CONFIG_HOME")
        .map(PathBuf::from)
        .filter(|p| !p.as_os_str().is_empty())
        .or_else(|| dirs::home_dir().map(|home| home.join(".config")))
        .unwrap_or_else(|| PathBuf::from("."));
    root.join(CONFIG_DIR_NAME)
}

struct Inner {
    service: String,
    entry: String,
    path: PathBuf,
    keyring_usable: OnceLock<bool>,
}

impl Inner {
    fn keyring_available(&self) -> bool {
        *self.keyring_usable.get_or_init(|| {
            let probe = match keyring::Entry::new(&self.service, PROBE_ENTRY) {
                Ok(entry) => entry.get_password(),
                Err(e) => Err(e),
            };
            match probe {
                Ok(_) | Err(keyring::Error::NoEntry) => true,
                Err(e) => {
                    debug!(service = %self.service, error = %e, "Keyring unavailable, using file storage");
                    false
                }
            }
        })
    }

    fn load_blocking(&self) -> Result<Option<String>> {
        if self.keyring_available() {
            match keyring::Entry::new(&self.service, &self.entry)
                .and_then(|entry| entry.get_password())
            {
                Ok(data) => return Ok(Some(data)),
                Err(keyring::Error::NoEntry) => {}
                Err(e) => {
                    warn!(service = %self.service, error = %e, "Keyring read failed, trying file storage");
                }
            }
        }
        self.load_file()
    }

    fn load_file(&self) -> Result<Option<String>> {
        match std::fs::read_to_string(&self.path) {
            Ok(data) => Ok(Some(data)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(SstartError::cache(format!(
                "failed to read '{}': {}",
                self.path.display(),
                e
            ))),
        }
    }

    fn save_blocking(&self, data: &str) -> Result<()> {
        if self.keyring_available() {
            let saved = keyring::Entry::new(&self.service, &self.entry)
                .and_then(|entry| entry.set_password(data));
            match saved {
                Ok(()) => {
                    // Keyring now holds the truth; drop any stale fallback file.
                    let _ = std::fs::remove_file(&self.path);
                    return Ok(());
                }
                Err(e) => {
                    warn!(service = %self.service, error = %e, "Keyring write failed, falling back to file storage");
                }
            }
        }
        self.save_file(data)
    }

    fn save_file(&self, data: &str) -> Result<()> {
        if let Some(dir) = self.path.parent() {
            create_private_dir(dir).map_err(|e| {
                SstartError::cache(format!("failed to create '{}': {}", dir.display(), e))
            })?;
        }

        write_private_file(&self.path, data).map_err(|e| {
            SstartError::cache(format!("failed to write '{}': {}", self.path.display(), e))
        })
    }

    fn clear_blocking(&self) -> Result<()> {
        let mut last_err = None;

        if self.keyring_available() {
            let deleted = keyring::Entry::new(&self.service, &self.entry)
                .and_then(|entry| entry.delete_credential());
            match deleted {
                Ok(()) | Err(keyring::Error::NoEntry) => {}
                Err(e) => {
                    last_err =
                        Some(SstartError::cache(format!("failed to clear keyring entry: {}", e)))
                }
            }
        }

        match std::fs::remove_file(&self.path) {
            Ok(()) => {}
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => {
                last_err = Some(SstartError::cache(format!(
                    "failed to remove '{}': {}",
                    self.path.display(),
                    e
                )))
            }
        }

        match last_err {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }
}

fn create_private_dir(dir: &Path) -> std::io::Result<()> {
    #[cfg(unix)]
    {
        use std::os::unix::fs::DirBuilderExt;
        std::fs::DirBuilder::new().recursive(true).mode(0o700).create(dir)
    }
    #[cfg(not(unix))]
    {
        std::fs::create_dir_all(dir)
    }
}

fn write_private_file(path: &Path, data: &str) -> std::io::Result<()> {
    std::fs::write(path, data)?;
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        std::fs::set_permissions(path, std::fs::Permissions::from_mode(0o600))?;
    }
    Ok(())
}

/// A single named slot persisted keyring-first with file fallback
#[derive(Clone)]
pub struct SlotStore {
    inner: Arc<Inner>,
}

impl std::fmt::Debug for SlotStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SlotStore")
            .field("service", &self.inner.service)
            .field("entry", &self.inner.entry)
            .field("path", &self.inner.path)
            .finish()
    }
}

impl SlotStore {
    /// Create a store backed by the given keyring service/entry and
    /// fallback file path
    pub fn new(
        service: impl Into<String>,
        entry: impl Into<String>,
        path: impl Into<PathBuf>,
    ) -> Self {
        Self {
            inner: Arc::new(Inner {
                service: service.into(),
                entry: entry.into(),
                path: path.into(),
                keyring_usable: OnceLock::new(),
            }),
        }
    }

    /// Create a file-only store, used by tests and by explicit path
    /// overrides. The keyring probe is pre-answered as unusable.
    pub fn file_only(path: impl Into<PathBuf>) -> Self {
        let store = Self::new("", "", path);
        let _ = store.inner.keyring_usable.set(false);
        store
    }

    /// Path of the fallback file
    pub fn path(&self) -> &Path {
        &self.inner.path
    }

    /// Load the slot contents
    pub async fn load(&self) -> Result<Option<String>> {
        let inner = Arc::clone(&self.inner);
        tokio::task::spawn_blocking(move || inner.load_blocking())
            .await
            .map_err(|e| SstartError::cache(format!("storage task failed: {}", e)))?
    }

    /// Save the slot contents
    pub async fn save(&self, data: String) -> Result<()> {
        let inner = Arc::clone(&self.inner);
        tokio::task::spawn_blocking(move || inner.save_blocking(&data))
            .await
            .map_err(|e| SstartError::cache(format!("storage task failed: {}", e)))?
    }

    /// Remove the slot from both backends
    pub async fn clear(&self) -> Result<()> {
        let inner = Arc::clone(&self.inner);
        tokio::task::spawn_blocking(move || inner.clear_blocking())
            .await
            .map_err(|e| SstartError::cache(format!("storage task failed: {}", e)))?
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_file_roundtrip() {
        let dir = tempfile::tempdir().unwrap();
        let store = SlotStore::file_only(dir.path().join("slot.json"));

        assert!(store.load().await.unwrap().is_none());

        store.save("{\"a\":1}".to_string()).await.unwrap();
        assert_eq!(store.load().await.unwrap().as_deref(), Some("{\"a\":1}"));

        store.clear().await.unwrap();
        assert!(store.load().await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_save_creates_parent_directory() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("slot.json");
        let store = SlotStore::file_only(&path);

        store.save("data".to_string()).await.unwrap();
        assert!(path.exists());

        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            let file_mode = std::fs::metadata(&path).unwrap().permissions().mode() & 0o777;
            assert_eq!(file_mode, 0o600);
            let dir_mode =
                std::fs::metadata(path.parent().unwrap()).unwrap().permissions().mode() & 0o777;
            assert_eq!(dir_mode, 0o700);
        }
    }

    #[tokio::test]
    async fn test_clear_is_idempotent() {
        let dir = tempfile::tempdir().unwrap();
        let store = SlotStore::file_only(dir.path().join("slot.json"));
        store.clear().await.unwrap();
        store.clear().await.unwrap();
    }

    #[test]
    fn test_config_dir_honors_xdg_override() {
        // Exercised through the pure path logic: when XDG_CONFIG_HOME is set
        // the sstart directory lives directly under it.
        let dir = config_dir();
        assert!(dir.ends_with(CONFIG_DIR_NAME));
    }
}
