//! Infisical provider
//!
//! Authenticates with universal auth (machine identity) and lists the
//! secrets at a project/environment/path. Credentials come from the
//! `INFISICAL_UNIVERSAL_AUTH_CLIENT_ID` and
//! `INFISICAL_UNIVERSAL_AUTH_CLIENT_SECRET` environment variables; the site
//! URL defaults to the Infisical cloud and can be overridden with
//! `INFISICAL_SITE_URL`.

use super::{map_keys, parse_config, FetchContext, KeyValue, Provider};
use crate::errors::{Result, SstartError};
use async_trait::async_trait;
use serde::Deserialize;
use std::collections::HashMap;
use std::time::Duration;
use tracing::debug;

const DEFAULT_SITE_URL: &str = "https://app.infisical.com";

#[derive(Debug, Deserialize)]
struct InfisicalConfig {
    /// Infisical project id (required)
    #[serde(default)]
    project_id: String,
    /// Environment slug, e.g. dev, prod (required)
    #[serde(default)]
    environment: String,
    /// Secret path to list from (required)
    #[serde(default)]
    path: String,
    /// Recurse into subdirectories
    recursive: Option<bool>,
    /// Include imported secrets
    include_imports: Option<bool>,
    /// Expand secret references
    expand_secrets: Option<bool>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct LoginResponse {
    access_token: String,
}

#[derive(Debug, Deserialize)]
struct ListSecretsResponse {
    secrets: Vec<RawSecret>,
    #[serde(default)]
    imports: Vec<SecretImport>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawSecret {
    secret_key: String,
    secret_value: String,
}

#[derive(Debug, Deserialize)]
struct SecretImport {
    #[serde(default)]
    secrets: Vec<RawSecret>,
}

pub struct InfisicalProvider {
    client: reqwest::Client,
}

impl Default for InfisicalProvider {
    fn default() -> Self {
        Self::new()
    }
}

impl InfisicalProvider {
    pub fn new() -> Self {
        Self {
            client: reqwest::Client::builder()
                .timeout(Duration::from_secs(30))
                .build()
                .expect("reqwest client construction cannot fail with static options"),
        }
    }

    async fn login(&self, provider_id: &str, site_url: &str) -> Result<String> {
        let client_id = std::env::var("INFISICAL_UNIVERSAL_AUTH_CLIENT_ID").unwrap_or_default();
        let client_secret =
            std::env::var("INFISICAL_UNIVERSAL_AUTH_CLIENT_SECRET").unwrap_or_default();
        if client_id.is_empty() || client_secret.is_empty() {
            return Err(SstartError::provider(
                provider_id,
                "infisical provider requires INFISICAL_UNIVERSAL_AUTH_CLIENT_ID and \
                 INFISICAL_UNIVERSAL_AUTH_CLIENT_SECRET environment variables",
            ));
        }

        debug!(provider_id = %provider_id, site_url = %site_url, "Logging in to Infisical");
        let response = self
            .client
            .post(format!("{}/api/v1/auth/universal-auth/login", site_url))
            .json(&serde_json::json!({
                "clientId": client_id,
                "clientSecret": client_secret,
            }))
            .send()
            .await
            .map_err(|e| {
                SstartError::provider_with_source(
                    provider_id,
                    "infisical universal-auth login failed",
                    Box::new(e),
                )
            })?;

        let status = response.status();
        if !status.is_success() {
            return Err(SstartError::provider(
                provider_id,
                format!("infisical universal-auth login returned status {}", status.as_u16()),
            ));
        }

        let login: LoginResponse = response.json().await.map_err(|e| {
            SstartError::provider_with_source(
                provider_id,
                "failed to decode infisical login response",
                Box::new(e),
            )
        })?;

        Ok(login.access_token)
    }
}

#[async_trait]
impl Provider for InfisicalProvider {
    fn name(&self) -> &'static str {
        "infisical"
    }

    async fn fetch(
        &self,
        _ctx: &FetchContext,
        provider_id: &str,
        config: &serde_json::Map<String, serde_json::Value>,
        keys: &HashMap<String, String>,
    ) -> Result<Vec<KeyValue>> {
        let cfg: InfisicalConfig = parse_config(provider_id, config)?;
        if cfg.project_id.is_empty() {
            return Err(SstartError::provider(
                provider_id,
                "infisical provider requires 'project_id' field in configuration",
            ));
        }
        if cfg.environment.is_empty() {
            return Err(SstartError::provider(
                provider_id,
                "infisical provider requires 'environment' field in configuration",
            ));
        }
        if cfg.path.is_empty() {
            return Err(SstartError::provider(
                provider_id,
                "infisical provider requires 'path' field in configuration",
            ));
        }

        let site_url = std::env::var("INFISICAL_SITE_URL")
            .ok()
            .filter(|s| !s.is_empty())
            .unwrap_or_else(|| DEFAULT_SITE_URL.to_string());
        let site_url = site_url.trim_end_matches('/').to_string();

        let access_token = self.login(provider_id, &site_url).await?;

        let response = self
            .client
            .get(format!("{}/api/v3/secrets/raw", site_url))
            .query(&[
                ("workspaceId", cfg.project_id.as_str()),
                ("environment", cfg.environment.as_str()),
                ("secretPath", cfg.path.as_str()),
                ("recursive", bool_str(cfg.recursive)),
                ("include_imports", bool_str(cfg.include_imports)),
                ("expandSecretReferences", bool_str(cfg.expand_secrets)),
            ])
            .bearer_auth(&access_token)
            .send()
            .await
            .map_err(|e| {
                SstartError::provider_with_source(
                    provider_id,
                    "failed to list secrets from Infisical",
                    Box::new(e),
                )
            })?;

        let status = response.status();
        if !status.is_success() {
            return Err(SstartError::provider(
                provider_id,
                format!("infisical API returned status {}", status.as_u16()),
            ));
        }

        let body: ListSecretsResponse = response.json().await.map_err(|e| {
            SstartError::provider_with_source(
                provider_id,
                "failed to decode infisical secrets response",
                Box::new(e),
            )
        })?;

        let mut pairs = Vec::new();
        for import in &body.imports {
            for secret in &import.secrets {
                pairs.push((secret.secret_key.clone(), secret.secret_value.clone()));
            }
        }
        // Direct secrets win over imported ones; map_keys keeps the last
        // occurrence ordering out of the merged result, so dedupe here.
        for secret in &body.secrets {
            pairs.retain(|(k, _)| k != &secret.secret_key);
            pairs.push((secret.secret_key.clone(), secret.secret_value.clone()));
        }

        Ok(map_keys(pairs, keys))
    }
}

fn bool_str(value: Option<bool>) -> &'static str {
    if value.unwrap_or(false) {
        "true"
    } else {
        "false"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn full_config() -> serde_json::Map<String, serde_json::Value> {
        let mut config = serde_json::Map::new();
        config.insert("project_id".to_string(), json!("proj-1"));
        config.insert("environment".to_string(), json!("dev"));
        config.insert("path".to_string(), json!("/"));
        config
    }

    #[tokio::test]
    async fn test_missing_required_fields() {
        let provider = InfisicalProvider::new();
        let err = provider
            .fetch(
                &FetchContext::default(),
                "infisical",
                &serde_json::Map::new(),
                &HashMap::new(),
            )
            .await
            .unwrap_err();
        assert!(err.to_string().contains("'project_id'"));
    }

    #[tokio::test]
    async fn test_login_then_list() {
        use wiremock::matchers::{body_json, header, method, path, query_param};
        use wiremock::{Mock, MockServer, ResponseTemplate};

        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/api/v1/auth/universal-auth/login"))
            .and(body_json(json!({ "clientId": "cid", "clientSecret": "csecret" })))
            .respond_with(
                ResponseTemplate::new(200).set_body_json(json!({ "accessToken": "at-1" })),
            )
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/api/v3/secrets/raw"))
            .and(query_param("workspaceId", "proj-1"))
            .and(query_param("environment", "dev"))
            .and(header("Authorization", "Bearer at-1"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "secrets": [
                    { "secretKey": "DB_URL", "secretValue": "postgres://x" }
                ],
                "imports": []
            })))
            .mount(&server)
            .await;

        std::env::set_var("INFISICAL_UNIVERSAL_AUTH_CLIENT_ID", "cid");
        std::env::set_var("INFISICAL_UNIVERSAL_AUTH_CLIENT_SECRET", "csecret");
        std::env::set_var("INFISICAL_SITE_URL", server.uri());

        let provider = InfisicalProvider::new();
        let kvs = provider
            .fetch(&FetchContext::default(), "infisical", &full_config(), &HashMap::new())
            .await
            .unwrap();

        std::env::remove_var("INFISICAL_UNIVERSAL_AUTH_CLIENT_ID");
        std::env::remove_var("INFISICAL_UNIVERSAL_AUTH_CLIENT_SECRET");
        std::env::remove_var("INFISICAL_SITE_URL");

        assert_eq!(kvs, vec![KeyValue::new("DB_URL", "postgres://x")]);
    }
}
