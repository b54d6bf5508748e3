//! # Secret Providers
//!
//! Pluggable secret backends behind a process-wide registry keyed by the
//! `kind` string. Adding a backend is adding a registration and a single
//! `fetch` implementation.

pub mod aws;
pub mod dotenv;
pub mod doppler;
pub mod infisical;
pub mod onepassword;
pub mod template;
pub mod vault;

use crate::errors::{Result, SstartError};
use async_trait::async_trait;
use serde::de::DeserializeOwned;
use std::collections::HashMap;
use std::sync::OnceLock;

/// Reserved config key carrying the current OIDC access token.
///
/// Injected by the collector, excluded from the cache fingerprint.
pub const SSO_ACCESS_TOKEN_KEY: &str = "_sso_access_token";

/// Reserved config key carrying the current OIDC id token.
pub const SSO_ID_TOKEN_KEY: &str = "_sso_id_token";

/// A single secret produced by a provider
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KeyValue {
    pub key: String,
    pub value: String,
}

impl KeyValue {
    pub fn new(key: impl Into<String>, value: impl Into<String>) -> Self {
        Self { key: key.into(), value: value.into() }
    }
}

/// Per-run context handed to every fetch.
///
/// Carries the results of providers that already completed in this
/// collection run, keyed by provider id. Only the `template` provider
/// consumes it.
#[derive(Debug, Default)]
pub struct FetchContext {
    pub resolved: HashMap<String, HashMap<String, String>>,
}

/// Trait for secret providers
///
/// Implementations must be Send + Sync for use in async contexts.
#[async_trait]
pub trait Provider: Send + Sync {
    /// The provider kind this plugin implements
    fn name(&self) -> &'static str;

    /// Fetch secrets from the backend.
    ///
    /// Interprets `config` in the plugin's own schema and fails with a
    /// configuration error when a required field is missing. The `keys`
    /// rename map follows the shared contract: empty means return every
    /// discovered secret under its source name; non-empty means return only
    /// the listed keys, renamed unless the target is `==`.
    async fn fetch(
        &self,
        ctx: &FetchContext,
        provider_id: &str,
        config: &serde_json::Map<String, serde_json::Value>,
        keys: &HashMap<String, String>,
    ) -> Result<Vec<KeyValue>>;
}

type Constructor = fn() -> Box<dyn Provider>;

fn registry() -> &'static HashMap<&'static str, Constructor> {
    static REGISTRY: OnceLock<HashMap<&'static str, Constructor>> = OnceLock::new();
    REGISTRY.get_or_init(|| {
        let mut map: HashMap<&'static str, Constructor> = HashMap::new();
        map.insert("dotenv", || Box::new(dotenv::DotenvProvider::new()));
        map.insert("aws_secretsmanager", || Box::new(aws::AwsSecretsManagerProvider::new()));
        map.insert("vault", || Box::new(vault::VaultProvider::new()));
        map.insert("doppler", || Box::new(doppler::DopplerProvider::new()));
        map.insert("infisical", || Box::new(infisical::InfisicalProvider::new()));
        map.insert("onepassword", || Box::new(onepassword::OnePasswordProvider::new()));
        map.insert("template", || Box::new(template::TemplateProvider::new()));
        map
    })
}

/// Construct a provider instance for the given kind
pub fn new(kind: &str) -> Result<Box<dyn Provider>> {
    registry().get(kind).map(|construct| construct()).ok_or_else(|| {
        SstartError::config(format!(
            "unknown provider kind '{}' (known kinds: {})",
            kind,
            registered_kinds().join(", ")
        ))
    })
}

/// List all registered provider kinds
pub fn registered_kinds() -> Vec<&'static str> {
    let mut kinds: Vec<_> = registry().keys().copied().collect();
    kinds.sort_unstable();
    kinds
}

/// Convert a loosely-typed config blob into a plugin's own schema.
///
/// Round-trips through serde_json so plugins get clean struct deserialization
/// with unknown fields ignored.
pub fn parse_config<T: DeserializeOwned>(
    provider_id: &str,
    config: &serde_json::Map<String, serde_json::Value>,
) -> Result<T> {
    serde_json::from_value(serde_json::Value::Object(config.clone())).map_err(|e| {
        SstartError::provider(provider_id, format!("invalid configuration: {}", e))
    })
}

/// Convert a fetched value to its string form.
///
/// Strings pass through; complex values are canonically JSON-serialized.
pub fn value_to_string(provider_id: &str, key: &str, value: &serde_json::Value) -> Result<String> {
    match value {
        serde_json::Value::String(s) => Ok(s.clone()),
        other => serde_json::to_string(other).map_err(|e| {
            SstartError::provider(
                provider_id,
                format!("failed to serialize value for key '{}': {}", key, e),
            )
        }),
    }
}

/// Apply the shared key-mapping contract to a provider's raw output.
///
/// Empty `keys` returns everything under the source name. Otherwise only the
/// listed source keys survive; the sentinel `==` keeps the source name and
/// any other target renames the key.
pub fn map_keys(
    source: impl IntoIterator<Item = (String, String)>,
    keys: &HashMap<String, String>,
) -> Vec<KeyValue> {
    let mut kvs = Vec::new();
    for (key, value) in source {
        let target = if keys.is_empty() {
            key.clone()
        } else {
            match keys.get(&key) {
                Some(mapped) if mapped == crate::config::KEY_PASSTHROUGH => key.clone(),
                Some(mapped) => mapped.clone(),
                None => continue,
            }
        };
        kvs.push(KeyValue { key: target, value });
    }
    kvs
}

#[cfg(test)]
mod tests {
    use super::*;

    fn source(pairs: &[(&str, &str)]) -> Vec<(String, String)> {
        pairs.iter().map(|(k, v)| (k.to_string(), v.to_string())).collect()
    }

    #[test]
    fn test_registry_knows_builtin_kinds() {
        for kind in
            ["dotenv", "aws_secretsmanager", "vault", "doppler", "infisical", "onepassword", "template"]
        {
            let provider = new(kind).expect(kind);
            assert_eq!(provider.name(), kind);
        }
    }

    #[test]
    fn test_unknown_kind_fails() {
        let err = match new("etcd") {
            Err(e) => e,
            Ok(_) => panic!("expected unknown provider kind to fail"),
        };
        assert!(err.to_string().contains("unknown provider kind 'etcd'"));
    }

    #[test]
    fn test_map_keys_empty_map_passes_everything() {
        let kvs = map_keys(source(&[("A", "1"), ("B", "2")]), &HashMap::new());
        assert_eq!(kvs.len(), 2);
    }

    #[test]
    fn test_map_keys_filters_and_renames() {
        let mut keys = HashMap::new();
        keys.insert("A".to_string(), "==".to_string());
        keys.insert("B".to_string(), "RENAMED".to_string());

        let mut kvs = map_keys(source(&[("A", "1"), ("B", "2"), ("C", "3")]), &keys);
        kvs.sort_by(|a, b| a.key.cmp(&b.key));

        assert_eq!(kvs, vec![KeyValue::new("A", "1"), KeyValue::new("RENAMED", "2")]);
    }

    #[test]
    fn test_passthrough_matches_unlisted_behavior() {
        let mut keys = HashMap::new();
        keys.insert("A".to_string(), "==".to_string());

        let mapped = map_keys(source(&[("A", "1")]), &keys);
        let unmapped = map_keys(source(&[("A", "1")]), &HashMap::new());
        assert_eq!(mapped, unmapped);
    }

    #[test]
    fn test_value_to_string_serializes_complex_values() {
        assert_eq!(
            value_to_string("p", "k", &serde_json::json!("plain")).unwrap(),
            "plain"
        );
        assert_eq!(
            value_to_string("p", "k", &serde_json::json!({"a": 1})).unwrap(),
            r#"{"a":1}"#
        );
        assert_eq!(value_to_string("p", "k", &serde_json::json!([1, 2])).unwrap(), "[1,2]");
    }
}
