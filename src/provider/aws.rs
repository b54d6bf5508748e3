//! AWS Secrets Manager provider
//!
//! Reads a single secret by id and JSON-decodes its body into a flat map.
//! Credentials come from the standard AWS chain (environment, shared config,
//! instance metadata).

use super::{map_keys, parse_config, value_to_string, FetchContext, KeyValue, Provider};
use crate::errors::{Result, SstartError};
use async_trait::async_trait;
use serde::Deserialize;
use std::collections::HashMap;

#[derive(Debug, Deserialize)]
struct AwsConfig {
    /// Secret name or ARN (required)
    secret_id: String,
    /// Region override (optional, falls back to the AWS chain)
    region: Option<String>,
    /// Endpoint override for localstack-style testing (optional)
    endpoint: Option<String>,
}

#[derive(Debug, Default)]
pub struct AwsSecretsManagerProvider;

impl AwsSecretsManagerProvider {
    pub fn new() -> Self {
        Self
    }

    async fn build_client(&self, cfg: &AwsConfig) -> aws_sdk_secretsmanager::Client {
        let mut loader = aws_config::defaults(aws_config::BehaviorVersion::latest());
        if let Some(region) = &cfg.region {
            loader = loader.region(aws_config::Region::new(region.clone()));
        }
        if let Some(endpoint) = &cfg.endpoint {
            loader = loader.endpoint_url(endpoint.clone());
        }
        aws_sdk_secretsmanager::Client::new(&loader.load().await)
    }
}

#[async_trait]
impl Provider for AwsSecretsManagerProvider {
    fn name(&self) -> &'static str {
        "aws_secretsmanager"
    }

    async fn fetch(
        &self,
        _ctx: &FetchContext,
        provider_id: &str,
        config: &serde_json::Map<String, serde_json::Value>,
        keys: &HashMap<String, String>,
    ) -> Result<Vec<KeyValue>> {
        let cfg: AwsConfig = parse_config(provider_id, config)?;
        if cfg.secret_id.is_empty() {
            return Err(SstartError::provider(
                provider_id,
                "aws_secretsmanager provider requires 'secret_id' field in configuration",
            ));
        }

        let client = self.build_client(&cfg).await;
        let output = client
            .get_secret_value()
            .secret_id(&cfg.secret_id)
            .send()
            .await
            .map_err(|e| {
                SstartError::provider_with_source(
                    provider_id,
                    format!("failed to read secret '{}'", cfg.secret_id),
                    Box::new(e),
                )
            })?;

        let body = output.secret_string().ok_or_else(|| {
            SstartError::provider(
                provider_id,
                format!("secret '{}' has no string body (binary secrets are not supported)", cfg.secret_id),
            )
        })?;

        let parsed: serde_json::Map<String, serde_json::Value> = serde_json::from_str(body)
            .map_err(|e| {
                SstartError::provider(
                    provider_id,
                    format!("secret '{}' body is not a JSON object: {}", cfg.secret_id, e),
                )
            })?;

        let mut pairs = Vec::with_capacity(parsed.len());
        for (key, value) in &parsed {
            pairs.push((key.clone(), value_to_string(provider_id, key, value)?));
        }

        Ok(map_keys(pairs, keys))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_missing_secret_id_is_config_error() {
        let provider = AwsSecretsManagerProvider::new();
        let err = provider
            .fetch(
                &FetchContext::default(),
                "aws-prod",
                &serde_json::Map::new(),
                &HashMap::new(),
            )
            .await
            .unwrap_err();
        assert!(err.to_string().contains("aws-prod"));
    }

    #[test]
    fn test_config_parses_optional_fields() {
        let mut config = serde_json::Map::new();
        config.insert("secret_id".to_string(), serde_json::json!("app/prod"));
        config.insert("region".to_string(), serde_json::json!("eu-central-1"));

        let cfg: AwsConfig = parse_config("aws", &config).unwrap();
        assert_eq!(cfg.secret_id, "app/prod");
        assert_eq!(cfg.region.as_deref(), Some("eu-central-1"));
        assert!(cfg.endpoint.is_none());
    }
}
