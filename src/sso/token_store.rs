//! Token persistence
//!
//! A single slot holding the OIDC token record, keyring-first with a
//! 0600-mode file fallback under the sstart config directory.

use crate::errors::Result;
use crate::store::{config_dir, SlotStore};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;
use tracing::debug;

/// Keyring service name for token storage
pub const KEYRING_SERVICE: &str = "sstart";

/// Fallback token file name
pub const TOKENS_FILE_NAME: &str = "tokens.json";

/// OIDC tokens with their absolute expiry
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Tokens {
    pub access_token: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub refresh_token: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id_token: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub token_type: Option<String>,
    pub expiry: DateTime<Utc>,
}

impl Tokens {
    /// True when the access token has expired or will within `margin`
    pub fn is_stale(&self, margin: Duration) -> bool {
        let margin = chrono::Duration::from_std(margin).unwrap_or_else(|_| chrono::Duration::zero());
        Utc::now() >= self.expiry - margin
    }
}

/// Persistent store for the single token record
#[derive(Debug, Clone)]
pub struct TokenStore {
    store: SlotStore,
}

impl TokenStore {
    /// Create a store at the default location
    pub fn new() -> Self {
        Self { store: SlotStore::new(KEYRING_SERVICE, "tokens", default_tokens_path()) }
    }

    /// Create a file-only store at a custom path (used by tests)
    pub fn with_path(path: impl Into<PathBuf>) -> Self {
        Self { store: SlotStore::file_only(path) }
    }

    /// Load the stored tokens; unreadable data is treated as absent
    pub async fn load(&self) -> Result<Option<Tokens>> {
        match self.store.load().await? {
            Some(data) => match serde_json::from_str(&data) {
                Ok(tokens) => Ok(Some(tokens)),
                Err(e) => {
                    debug!(error = %e, "Stored tokens unreadable, treating as absent");
                    Ok(None)
                }
            },
            None => Ok(None),
        }
    }

    /// Persist the token record
    pub async fn save(&self, tokens: &Tokens) -> Result<()> {
        let data = serde_json::to_string_pretty(tokens)?;
        self.store.save(data).await
    }

    /// Remove the token record from both backends
    pub async fn clear(&self) -> Result<()> {
        self.store.clear().await
    }
}

impl Default for TokenStore {
    fn default() -> Self {
        Self::new()
    }
}

fn default_tokens_path() -> PathBuf {
    config_dir().join(TOKENS_FILE_NAME)
}
