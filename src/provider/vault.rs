//! HashiCorp Vault / OpenBao provider (KV v2)
//!
//! Reads a single path under a configurable mount. Authentication is either
//! a static token or a JWT/OIDC login: the OIDC id token injected by the
//! collector under `_sso_id_token` is POSTed against `auth/<mount>/login`
//! to obtain a Vault token before the read.

use super::{
    map_keys, parse_config, value_to_string, FetchContext, KeyValue, Provider, SSO_ID_TOKEN_KEY,
};
use crate::errors::{Result, SstartError};
use async_trait::async_trait;
use serde::Deserialize;
use std::collections::HashMap;
use std::time::Duration;
use tracing::debug;

#[derive(Debug, Deserialize)]
struct VaultConfig {
    /// Vault server address (required)
    address: String,
    /// Secret path under the KV v2 mount (required)
    path: String,
    /// KV v2 mount point
    #[serde(default = "default_mount")]
    mount: String,
    /// Static token authentication
    token: Option<String>,
    /// JWT/OIDC authentication block
    auth: Option<VaultAuthConfig>,
    /// Vault namespace for enterprise multi-tenancy (optional)
    namespace: Option<String>,
}

#[derive(Debug, Deserialize)]
struct VaultAuthConfig {
    /// Auth method: `jwt` or `oidc`
    method: String,
    /// Vault role bound to the JWT audience (required for jwt/oidc)
    role: String,
    /// Auth mount point; defaults to the method name
    mount: Option<String>,
}

fn default_mount() -> String {
    "secret".to_string()
}

#[derive(Debug, Deserialize)]
struct LoginResponse {
    auth: LoginAuth,
}

#[derive(Debug, Deserialize)]
struct LoginAuth {
    client_token: String,
}

#[derive(Debug, Deserialize)]
struct KvReadResponse {
    data: KvReadData,
}

#[derive(Debug, Deserialize)]
struct KvReadData {
    data: serde_json::Map<String, serde_json::Value>,
}

pub struct VaultProvider {
    client: reqwest::Client,
}

impl Default for VaultProvider {
    fn default() -> Self {
        Self::new()
    }
}

impl VaultProvider {
    pub fn new() -> Self {
        Self {
            client: reqwest::Client::builder()
                .timeout(Duration::from_secs(30))
                .build()
                .expect("reqwest client construction cannot fail with static options"),
        }
    }

    /// Resolve the Vault token to use for the read: a static `token` field
    /// wins; otherwise a jwt/oidc login with the injected OIDC id token.
    async fn resolve_token(
        &self,
        provider_id: &str,
        cfg: &VaultConfig,
        config: &serde_json::Map<String, serde_json::Value>,
    ) -> Result<String> {
        if let Some(token) = &cfg.token {
            return Ok(token.clone());
        }

        let Some(auth) = &cfg.auth else {
            return Err(SstartError::provider(
                provider_id,
                "vault provider requires either 'token' or an 'auth' block",
            ));
        };

        match auth.method.as_str() {
            "jwt" | "oidc" => {}
            other => {
                return Err(SstartError::provider(
                    provider_id,
                    format!("unsupported vault auth method '{}' (expected jwt or oidc)", other),
                ))
            }
        }
        if auth.role.is_empty() {
            return Err(SstartError::provider(
                provider_id,
                "vault auth block requires a 'role'",
            ));
        }

        let id_token = config
            .get(SSO_ID_TOKEN_KEY)
            .and_then(|v| v.as_str())
            .filter(|s| !s.is_empty())
            .ok_or_else(|| {
                SstartError::provider(
                    provider_id,
                    "vault jwt/oidc auth requires an SSO id token; configure the sso block",
                )
            })?;

        let auth_mount = auth.mount.clone().unwrap_or_else(|| auth.method.clone());
        let login_url = format!(
            "{}/v1/auth/{}/login",
            cfg.address.trim_end_matches('/'),
            auth_mount
        );
        debug!(provider_id = %provider_id, mount = %auth_mount, "Logging in to Vault via JWT");

        let mut request = self
            .client
            .post(&login_url)
            .json(&serde_json::json!({ "jwt": id_token, "role": auth.role }));
        if let Some(namespace) = &cfg.namespace {
            request = request.header("X-Vault-Namespace", namespace);
        }

        let response = request.send().await.map_err(|e| {
            SstartError::provider_with_source(
                provider_id,
                "vault login request failed",
                Box::new(e),
            )
        })?;

        let status = response.status();
        if !status.is_success() {
            return Err(SstartError::provider(
                provider_id,
                format!("vault login returned status {}", status.as_u16()),
            ));
        }

        let login: LoginResponse = response.json().await.map_err(|e| {
            SstartError::provider_with_source(
                provider_id,
                "failed to decode vault login response",
                Box::new(e),
            )
        })?;

        Ok(login.auth.client_token)
    }
}

#[async_trait]
impl Provider for VaultProvider {
    fn name(&self) -> &'static str {
        "vault"
    }

    async fn fetch(
        &self,
        _ctx: &FetchContext,
        provider_id: &str,
        config: &serde_json::Map<String, serde_json::Value>,
        keys: &HashMap<String, String>,
    ) -> Result<Vec<KeyValue>> {
        let cfg: VaultConfig = parse_config(provider_id, config)?;
        if cfg.address.is_empty() {
            return Err(SstartError::provider(
                provider_id,
                "vault provider requires 'address' field in configuration",
            ));
        }
        if cfg.path.is_empty() {
            return Err(SstartError::provider(
                provider_id,
                "vault provider requires 'path' field in configuration",
            ));
        }

        let token = self.resolve_token(provider_id, &cfg, config).await?;

        let read_url = format!(
            "{}/v1/{}/data/{}",
            cfg.address.trim_end_matches('/'),
            cfg.mount,
            cfg.path.trim_start_matches('/')
        );
        debug!(provider_id = %provider_id, url = %read_url, "Reading Vault KV v2 path");

        let mut request = self.client.get(&read_url).header("X-Vault-Token", &token);
        if let Some(namespace) = &cfg.namespace {
            request = request.header("X-Vault-Namespace", namespace);
        }

        let response = request.send().await.map_err(|e| {
            SstartError::provider_with_source(
                provider_id,
                "vault read request failed",
                Box::new(e),
            )
        })?;

        let status = response.status();
        if !status.is_success() {
            return Err(SstartError::provider(
                provider_id,
                format!("vault read of '{}' returned status {}", cfg.path, status.as_u16()),
            ));
        }

        let body: KvReadResponse = response.json().await.map_err(|e| {
            SstartError::provider_with_source(
                provider_id,
                "failed to decode vault KV v2 response",
                Box::new(e),
            )
        })?;

        let mut pairs = Vec::with_capacity(body.data.data.len());
        for (key, value) in &body.data.data {
            pairs.push((key.clone(), value_to_string(provider_id, key, value)?));
        }

        Ok(map_keys(pairs, keys))
    }
}
