//! Doppler provider
//!
//! Downloads a config's secrets as JSON from the Doppler API using a service
//! token from the `DOPPLER_TOKEN` environment variable.

use super::{map_keys, parse_config, value_to_string, FetchContext, KeyValue, Provider};
use crate::errors::{Result, SstartError};
use async_trait::async_trait;
use serde::Deserialize;
use std::collections::HashMap;
use std::time::Duration;

#[derive(Debug, Deserialize)]
struct DopplerConfig {
    /// Doppler project name (required)
    #[serde(default)]
    project: String,
    /// Doppler config/environment name, e.g. "dev", "prd" (required)
    #[serde(default)]
    config: String,
    /// API host override
    #[serde(default = "default_api_host")]
    api_host: String,
}

fn default_api_host() -> String {
    "https://api.doppler.com".to_string()
}

pub struct DopplerProvider {
    client: reqwest::Client,
}

impl Default for DopplerProvider {
    fn default() -> Self {
        Self::new()
    }
}

impl DopplerProvider {
    pub fn new() -> Self {
        Self {
            client: reqwest::Client::builder()
                .timeout(Duration::from_secs(30))
                .build()
                .expect("reqwest client construction cannot fail with static options"),
        }
    }
}

#[async_trait]
impl Provider for DopplerProvider {
    fn name(&self) -> &'static str {
        "doppler"
    }

    async fn fetch(
        &self,
        _ctx: &FetchContext,
        provider_id: &str,
        config: &serde_json::Map<String, serde_json::Value>,
        keys: &HashMap<String, String>,
    ) -> Result<Vec<KeyValue>> {
        let cfg: DopplerConfig = parse_config(provider_id, config)?;
        if cfg.project.is_empty() {
            return Err(SstartError::provider(
                provider_id,
                "doppler provider requires 'project' field in configuration",
            ));
        }
        if cfg.config.is_empty() {
            return Err(SstartError::provider(
                provider_id,
                "doppler provider requires 'config' field in configuration",
            ));
        }

        let token = std::env::var("DOPPLER_TOKEN").unwrap_or_default();
        if token.is_empty() {
            return Err(SstartError::provider(
                provider_id,
                "doppler provider requires 'DOPPLER_TOKEN' environment variable",
            ));
        }

        let url = format!(
            "{}/v3/configs/config/secrets/download",
            cfg.api_host.trim_end_matches('/')
        );
        let response = self
            .client
            .get(&url)
            .query(&[
                ("format", "json"),
                ("project", cfg.project.as_str()),
                ("config", cfg.config.as_str()),
            ])
            .bearer_auth(&token)
            .header("Accept", "application/json")
            .send()
            .await
            .map_err(|e| {
                SstartError::provider_with_source(
                    provider_id,
                    "failed to fetch secrets from Doppler",
                    Box::new(e),
                )
            })?;

        let status = response.status();
        if !status.is_success() {
            return Err(SstartError::provider(
                provider_id,
                format!("doppler API returned status {}", status.as_u16()),
            ));
        }

        let body: serde_json::Map<String, serde_json::Value> =
            response.json().await.map_err(|e| {
                SstartError::provider_with_source(
                    provider_id,
                    "failed to parse Doppler JSON response",
                    Box::new(e),
                )
            })?;

        let mut pairs = Vec::with_capacity(body.len());
        for (key, value) in &body {
            pairs.push((key.clone(), value_to_string(provider_id, key, value)?));
        }

        Ok(map_keys(pairs, keys))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[tokio::test]
    async fn test_missing_project_is_config_error() {
        let provider = DopplerProvider::new();
        let mut config = serde_json::Map::new();
        config.insert("config".to_string(), json!("dev"));

        let err = provider
            .fetch(&FetchContext::default(), "doppler", &config, &HashMap::new())
            .await
            .unwrap_err();
        assert!(err.to_string().contains("'project'"));
    }

    #[tokio::test]
    async fn test_download_with_bearer_auth() {
        use wiremock::matchers::{header, method, path, query_param};
        use wiremock::{Mock, MockServer, ResponseTemplate};

        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/v3/configs/config/secrets/download"))
            .and(query_param("format", "json"))
            .and(query_param("project", "app"))
            .and(query_param("config", "dev"))
            .and(header("Authorization", "Bearer dp.st.token"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "API_KEY": "abc",
                "LIMITS": { "rps": 10 }
            })))
            .mount(&server)
            .await;

        std::env::set_var("DOPPLER_TOKEN", "dp.st.token");
        let mut config = serde_json::Map::new();
        config.insert("project".to_string(), json!("app"));
        config.insert("config".to_string(), json!("dev"));
        config.insert("api_host".to_string(), json!(server.uri()));

        let provider = DopplerProvider::new();
        let mut kvs = provider
            .fetch(&FetchContext::default(), "doppler", &config, &HashMap::new())
            .await
            .unwrap();
        std::env::remove_var("DOPPLER_TOKEN");
        kvs.sort_by(|a, b| a.key.cmp(&b.key));

        assert_eq!(kvs[0], KeyValue::new("API_KEY", "abc"));
        assert_eq!(kvs[1], KeyValue::new("LIMITS", r#"{"rps":10}"#));
    }
}
