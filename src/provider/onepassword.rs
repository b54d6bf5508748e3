//! 1Password Connect provider
//!
//! Reads one item from a vault through a 1Password Connect server. The
//! Connect host comes from `OP_CONNECT_HOST` (or the `connect_host` config
//! field) and the bearer token from `OP_CONNECT_TOKEN`. Item fields with a
//! label become keys.

use super::{map_keys, parse_config, FetchContext, KeyValue, Provider};
use crate::errors::{Result, SstartError};
use async_trait::async_trait;
use serde::Deserialize;
use std::collections::HashMap;
use std::time::Duration;

#[derive(Debug, Deserialize)]
struct OnePasswordConfig {
    /// Vault UUID (required)
    #[serde(default)]
    vault: String,
    /// Item UUID or title (required)
    #[serde(default)]
    item: String,
    /// Connect host override; falls back to OP_CONNECT_HOST
    connect_host: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ItemSummary {
    id: String,
}

#[derive(Debug, Deserialize)]
struct Item {
    #[serde(default)]
    fields: Vec<ItemField>,
}

#[derive(Debug, Deserialize)]
struct ItemField {
    #[serde(default)]
    label: String,
    #[serde(default)]
    value: Option<String>,
}

pub struct OnePasswordProvider {
    client: reqwest::Client,
}

impl Default for OnePasswordProvider {
    fn default() -> Self {
        Self::new()
    }
}

impl OnePasswordProvider {
    pub fn new() -> Self {
        Self {
            client: reqwest::Client::builder()
                .timeout(Duration::from_secs(30))
                .build()
                .expect("reqwest client construction cannot fail with static options"),
        }
    }

    /// Resolve an item reference to its UUID: 26-char lowercase alphanumeric
    /// ids pass through; anything else is looked up by title.
    async fn resolve_item_id(
        &self,
        provider_id: &str,
        host: &str,
        token: &str,
        vault: &str,
        item: &str,
    ) -> Result<String> {
        let looks_like_id =
            item.len() == 26 && item.chars().all(|c| c.is_ascii_lowercase() || c.is_ascii_digit());
        if looks_like_id {
            return Ok(item.to_string());
        }

        let response = self
            .client
            .get(format!("{}/v1/vaults/{}/items", host, vault))
            .query(&[("filter", format!("title eq \"{}\"", item))])
            .bearer_auth(token)
            .send()
            .await
            .map_err(|e| {
                SstartError::provider_with_source(
                    provider_id,
                    "failed to list 1Password items",
                    Box::new(e),
                )
            })?;

        let status = response.status();
        if !status.is_success() {
            return Err(SstartError::provider(
                provider_id,
                format!("1Password Connect returned status {}", status.as_u16()),
            ));
        }

        let matches: Vec<ItemSummary> = response.json().await.map_err(|e| {
            SstartError::provider_with_source(
                provider_id,
                "failed to decode 1Password item list",
                Box::new(e),
            )
        })?;

        matches.into_iter().next().map(|m| m.id).ok_or_else(|| {
            SstartError::provider(provider_id, format!("no 1Password item titled '{}'", item))
        })
    }
}

#[async_trait]
impl Provider for OnePasswordProvider {
    fn name(&self) -> &'static str {
        "onepassword"
    }

    async fn fetch(
        &self,
        _ctx: &FetchContext,
        provider_id: &str,
        config: &serde_json::Map<String, serde_json::Value>,
        keys: &HashMap<String, String>,
    ) -> Result<Vec<KeyValue>> {
        let cfg: OnePasswordConfig = parse_config(provider_id, config)?;
        if cfg.vault.is_empty() {
            return Err(SstartError::provider(
                provider_id,
                "onepassword provider requires 'vault' field in configuration",
            ));
        }
        if cfg.item.is_empty() {
            return Err(SstartError::provider(
                provider_id,
                "onepassword provider requires 'item' field in configuration",
            ));
        }

        let host = cfg
            .connect_host
            .or_else(|| std::env::var("OP_CONNECT_HOST").ok())
            .filter(|s| !s.is_empty())
            .ok_or_else(|| {
                SstartError::provider(
                    provider_id,
                    "onepassword provider requires 'connect_host' or OP_CONNECT_HOST",
                )
            })?;
        let host = host.trim_end_matches('/').to_string();

        let token = std::env::var("OP_CONNECT_TOKEN").unwrap_or_default();
        if token.is_empty() {
            return Err(SstartError::provider(
                provider_id,
                "onepassword provider requires 'OP_CONNECT_TOKEN' environment variable",
            ));
        }

        let item_id =
            self.resolve_item_id(provider_id, &host, &token, &cfg.vault, &cfg.item).await?;

        let response = self
            .client
            .get(format!("{}/v1/vaults/{}/items/{}", host, cfg.vault, item_id))
            .bearer_auth(&token)
            .send()
            .await
            .map_err(|e| {
                SstartError::provider_with_source(
                    provider_id,
                    "failed to read 1Password item",
                    Box::new(e),
                )
            })?;

        let status = response.status();
        if !status.is_success() {
            return Err(SstartError::provider(
                provider_id,
                format!("1Password Connect returned status {}", status.as_u16()),
            ));
        }

        let item: Item = response.json().await.map_err(|e| {
            SstartError::provider_with_source(
                provider_id,
                "failed to decode 1Password item",
                Box::new(e),
            )
        })?;

        let pairs = item
            .fields
            .into_iter()
            .filter(|f| !f.label.is_empty())
            .filter_map(|f| f.value.map(|v| (f.label, v)));

        Ok(map_keys(pairs, keys))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[tokio::test]
    async fn test_missing_vault_is_config_error() {
        let provider = OnePasswordProvider::new();
        let mut config = serde_json::Map::new();
        config.insert("item".to_string(), json!("db-creds"));

        let err = provider
            .fetch(&FetchContext::default(), "op", &config, &HashMap::new())
            .await
            .unwrap_err();
        assert!(err.to_string().contains("'vault'"));
    }

    #[tokio::test]
    async fn test_item_fetch_by_title() {
        use wiremock::matchers::{header, method, path};
        use wiremock::{Mock, MockServer, ResponseTemplate};

        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/v1/vaults/vault-1/items"))
            .and(header("Authorization", "Bearer op-token"))
            .respond_with(
                ResponseTemplate::new(200).set_body_json(json!([{ "id": "abcdefghijklmnopqrstuvwxyz" }])),
            )
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/v1/vaults/vault-1/items/abcdefghijklmnopqrstuvwxyz"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "fields": [
                    { "label": "username", "value": "svc" },
                    { "label": "password", "value": "hunter2" },
                    { "label": "", "value": "ignored" }
                ]
            })))
            .mount(&server)
            .await;

        std::env::set_var("OP_CONNECT_TOKEN", "op-token");
        let mut config = serde_json::Map::new();
        config.insert("vault".to_string(), json!("vault-1"));
        config.insert("item".to_string(), json!("db-creds"));
        config.insert("connect_host".to_string(), json!(server.uri()));

        let provider = OnePasswordProvider::new();
        let mut kvs = provider
            .fetch(&FetchContext::default(), "op", &config, &HashMap::new())
            .await
            .unwrap();
        std::env::remove_var("OP_CONNECT_TOKEN");
        kvs.sort_by(|a, b| a.key.cmp(&b.key));

        assert_eq!(kvs[0], KeyValue::new("password", "hunter2"));
        assert_eq!(kvs[1], KeyValue::new("username", "svc"));
    }
}
