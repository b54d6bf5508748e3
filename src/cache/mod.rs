//! # Secret Cache
//!
//! Fingerprint-keyed TTL cache for provider results, persisted through the
//! keyring-or-file slot store. Cached entries hold the provider-intrinsic
//! (unrenamed) secrets so a rename-map change never invalidates the cache.

use crate::errors::Result;
use crate::provider::{SSO_ACCESS_TOKEN_KEY, SSO_ID_TOKEN_KEY};
use crate::store::{config_dir, SlotStore};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Deserializer, Serialize};
use sha2::{Digest, Sha256};
use std::collections::HashMap;
use std::path::PathBuf;
use std::time::Duration;
use tracing::debug;

/// Keyring service name for cache storage
pub const KEYRING_SERVICE: &str = "sstart-cache";

/// Fallback cache file name
pub const CACHE_FILE_NAME: &str = "secrets-cache.json";

/// Default cache TTL (5 minutes)
pub const DEFAULT_TTL: Duration = Duration::from_secs(300);

/// Cached secrets for one provider fingerprint
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CachedSecrets {
    pub secrets: HashMap<String, String>,
    pub expires_at: DateTime<Utc>,
    pub cached_at: DateTime<Utc>,
}

/// The entire persisted cache
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
struct CacheStore {
    #[serde(default, deserialize_with = "nullable_map")]
    providers: HashMap<String, CachedSecrets>,
}

fn nullable_map<'de, D>(
    deserializer: D,
) -> std::result::Result<HashMap<String, CachedSecrets>, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(Option::deserialize(deserializer)?.unwrap_or_default())
}

/// Compute the cache fingerprint for a provider configuration.
///
/// The fingerprint is a sha256 over the provider id, kind, and a canonical
/// form of the config in which keys are sorted and the reserved
/// `_sso_access_token` / `_sso_id_token` entries are omitted. Two runs whose
/// only difference is the current OIDC token therefore share a fingerprint.
pub fn fingerprint(
    provider_id: &str,
    kind: &str,
    config: &serde_json::Map<String, serde_json::Value>,
) -> String {
    // serde_json maps serialize with sorted keys, which gives the canonical
    // ordering at every nesting level.
    let canonical: serde_json::Map<String, serde_json::Value> = config
        .iter()
        .filter(|(k, _)| k.as_str() != SSO_ACCESS_TOKEN_KEY && k.as_str() != SSO_ID_TOKEN_KEY)
        .map(|(k, v)| (k.clone(), v.clone()))
        .collect();
    let canonical_str = serde_json::to_string(&canonical).unwrap_or_else(|_| "{}".to_string());

    let payload = serde_json::json!({
        "provider_id": provider_id,
        "kind": kind,
        "config": canonical_str,
    });
    let encoded = serde_json::to_string(&payload).unwrap_or_else(|_| provider_id.to_string());

    let mut hasher = Sha256::new();
    hasher.update(encoded.as_bytes());
    hex::encode(hasher.finalize())
}

/// Cache statistics: total entries, still-valid entries, expired entries
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CacheStats {
    pub total: usize,
    pub valid: usize,
    pub expired: usize,
}

/// Secret cache over the dual-backend slot store
#[derive(Debug, Clone)]
pub struct SecretCache {
    store: SlotStore,
    ttl: Duration,
}

impl SecretCache {
    /// Create a cache with the default keyring service and file path
    pub fn new() -> Self {
        Self::with_ttl(DEFAULT_TTL)
    }

    /// Create a cache with a custom TTL
    pub fn with_ttl(ttl: Duration) -> Self {
        Self {
            store: SlotStore::new(KEYRING_SERVICE, "cache", default_cache_path()),
            ttl,
        }
    }

    /// Create a file-only cache at a custom path (used by tests)
    pub fn with_path(path: impl Into<PathBuf>, ttl: Duration) -> Self {
        Self { store: SlotStore::file_only(path), ttl }
    }

    /// The configured TTL
    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    /// Load the persisted store, treating corrupt or partial data as empty
    async fn load_store(&self) -> CacheStore {
        match self.store.load().await {
            Ok(Some(data)) => serde_json::from_str(&data).unwrap_or_else(|e| {
                debug!(error = %e, "Cache contents unreadable, starting empty");
                CacheStore::default()
            }),
            Ok(None) => CacheStore::default(),
            Err(e) => {
                debug!(error = %e, "Cache load failed, treating as empty");
                CacheStore::default()
            }
        }
    }

    async fn save_store(&self, store: &CacheStore) -> Result<()> {
        let data = serde_json::to_string_pretty(store)?;
        self.store.save(data).await
    }

    /// Get cached secrets for a fingerprint if present and not expired.
    /// An expired entry is pruned and the store persisted back.
    pub async fn get(&self, fingerprint: &str) -> Option<HashMap<String, String>> {
        let mut store = self.load_store().await;
        let cached = store.providers.get(fingerprint)?;

        if Utc::now() > cached.expires_at {
            store.providers.remove(fingerprint);
            if let Err(e) = self.save_store(&store).await {
                debug!(error = %e, "Failed to prune expired cache entry");
            }
            return None;
        }

        Some(cached.secrets.clone())
    }

    /// Store secrets under a fingerprint with the configured TTL
    pub async fn set(&self, fingerprint: &str, secrets: HashMap<String, String>) -> Result<()> {
        let mut store = self.load_store().await;
        let now = Utc::now();
        store.providers.insert(
            fingerprint.to_string(),
            CachedSecrets {
                secrets,
                cached_at: now,
                expires_at: now
                    + chrono::Duration::from_std(self.ttl)
                        .unwrap_or_else(|_| chrono::Duration::seconds(300)),
            },
        );
        self.save_store(&store).await
    }

    /// Remove all cached secrets from both backends
    pub async fn clear(&self) -> Result<()> {
        self.store.clear().await
    }

    /// Remove cached secrets for one fingerprint
    pub async fn clear_provider(&self, fingerprint: &str) -> Result<()> {
        let mut store = self.load_store().await;
        if store.providers.remove(fingerprint).is_some() {
            self.save_store(&store).await?;
        }
        Ok(())
    }

    /// Remove every expired entry
    pub async fn clean_expired(&self) -> Result<()> {
        let mut store = self.load_store().await;
        let now = Utc::now();
        let before = store.providers.len();
        store.providers.retain(|_, cached| now <= cached.expires_at);
        if store.providers.len() != before {
            self.save_store(&store).await?;
        }
        Ok(())
    }

    /// Entry counts: total, valid, expired
    pub async fn stats(&self) -> CacheStats {
        let store = self.load_store().await;
        let now = Utc::now();
        let mut stats = CacheStats { total: 0, valid: 0, expired: 0 };
        for cached in store.providers.values() {
            stats.total += 1;
            if now <= cached.expires_at {
                stats.valid += 1;
            } else {
                stats.expired += 1;
            }
        }
        stats
    }
}

impl Default for SecretCache {
    fn default() -> Self {
        Self::new()
    }
}

fn default_cache_path() -> PathBuf {
    config_dir().join(CACHE_FILE_NAME)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn config(pairs: &[(&str, serde_json::Value)]) -> serde_json::Map<String, serde_json::Value> {
        pairs.iter().map(|(k, v)| (k.to_string(), v.clone())).collect()
    }

    fn temp_cache(ttl: Duration) -> (tempfile::TempDir, SecretCache) {
        let dir = tempfile::tempdir().unwrap();
        let cache = SecretCache::with_path(dir.path().join("cache.json"), ttl);
        (dir, cache)
    }

    fn secrets(pairs: &[(&str, &str)]) -> HashMap<String, String> {
        pairs.iter().map(|(k, v)| (k.to_string(), v.to_string())).collect()
    }

    #[test]
    fn test_fingerprint_is_deterministic() {
        let cfg = config(&[("region", json!("us-east-1")), ("secret", json!("my-secret"))]);
        assert_eq!(
            fingerprint("aws-prod", "aws_secretsmanager", &cfg),
            fingerprint("aws-prod", "aws_secretsmanager", &cfg)
        );
    }

    #[test]
    fn test_fingerprint_sensitive_to_config_and_identity() {
        let cfg1 = config(&[("region", json!("us-east-1"))]);
        let cfg2 = config(&[("region", json!("us-west-2"))]);

        assert_ne!(
            fingerprint("aws", "aws_secretsmanager", &cfg1),
            fingerprint("aws", "aws_secretsmanager", &cfg2)
        );
        assert_ne!(
            fingerprint("a", "aws_secretsmanager", &cfg1),
            fingerprint("b", "aws_secretsmanager", &cfg1)
        );
        assert_ne!(fingerprint("a", "vault", &cfg1), fingerprint("a", "dotenv", &cfg1));
    }

    #[test]
    fn test_fingerprint_ignores_sso_tokens() {
        let plain = config(&[("address", json!("https://vault.example.com"))]);
        let with_tokens = config(&[
            ("address", json!("https://vault.example.com")),
            (SSO_ACCESS_TOKEN_KEY, json!("token123")),
            (SSO_ID_TOKEN_KEY, json!("idtoken456")),
        ]);

        assert_eq!(fingerprint("vault", "vault", &plain), fingerprint("vault", "vault", &with_tokens));
    }

    #[tokio::test]
    async fn test_set_and_get_roundtrip() {
        let (_dir, cache) = temp_cache(Duration::from_secs(60));
        let entries = secrets(&[("API_KEY", "secret123"), ("DB_PASSWORD", "dbpass456")]);

        cache.set("fp-1", entries.clone()).await.unwrap();
        assert_eq!(cache.get("fp-1").await, Some(entries));
        assert_eq!(cache.get("fp-other").await, None);
    }

    #[tokio::test]
    async fn test_expired_entry_is_pruned() {
        let (_dir, cache) = temp_cache(Duration::from_millis(10));
        cache.set("fp-1", secrets(&[("K", "v")])).await.unwrap();

        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(cache.get("fp-1").await, None);

        let stats = cache.stats().await;
        assert_eq!(stats.total, 0);
    }

    #[tokio::test]
    async fn test_tolerant_load_of_corrupt_data() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("cache.json");

        for contents in ["{}", r#"{"providers": null}"#, "not json at all"] {
            std::fs::write(&path, contents).unwrap();
            let cache = SecretCache::with_path(&path, Duration::from_secs(60));
            assert_eq!(cache.get("fp").await, None);
            cache.set("fp", secrets(&[("A", "1")])).await.unwrap();
            assert_eq!(cache.get("fp").await, Some(secrets(&[("A", "1")])));
        }
    }

    #[tokio::test]
    async fn test_clear_provider_and_clean_expired() {
        let (_dir, cache) = temp_cache(Duration::from_secs(60));
        cache.set("fp-1", secrets(&[("A", "1")])).await.unwrap();
        cache.set("fp-2", secrets(&[("B", "2")])).await.unwrap();

        cache.clear_provider("fp-1").await.unwrap();
        assert_eq!(cache.get("fp-1").await, None);
        assert!(cache.get("fp-2").await.is_some());

        cache.clean_expired().await.unwrap();
        assert_eq!(cache.stats().await.total, 1);
    }

    #[tokio::test]
    async fn test_stats_counts_valid_and_expired() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("cache.json");

        let short = SecretCache::with_path(&path, Duration::from_millis(10));
        short.set("fp-old", secrets(&[("A", "1")])).await.unwrap();
        tokio::time::sleep(Duration::from_millis(50)).await;

        let long = SecretCache::with_path(&path, Duration::from_secs(60));
        long.set("fp-new", secrets(&[("B", "2")])).await.unwrap();

        let stats = long.stats().await;
        assert_eq!(stats, CacheStats { total: 2, valid: 1, expired: 1 });
    }

    #[tokio::test]
    async fn test_clear_drops_everything() {
        let (_dir, cache) = temp_cache(Duration::from_secs(60));
        cache.set("fp-1", secrets(&[("A", "1")])).await.unwrap();
        cache.clear().await.unwrap();
        assert_eq!(cache.stats().await.total, 0);
    }
}
