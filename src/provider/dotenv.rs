//! Dotenv file provider
//!
//! Reads `KEY=VALUE` pairs from a local file. Lines starting with `#` are
//! comments; values may carry optional surrounding single or double quotes;
//! a leading `export ` prefix is tolerated.

use super::{map_keys, parse_config, FetchContext, KeyValue, Provider};
use crate::errors::{Result, SstartError};
use async_trait::async_trait;
use serde::Deserialize;
use std::collections::HashMap;

#[derive(Debug, Deserialize)]
struct DotenvConfig {
    /// Path to the dotenv file
    #[serde(default = "default_path")]
    path: String,
}

fn default_path() -> String {
    ".env".to_string()
}

#[derive(Debug, Default)]
pub struct DotenvProvider;

impl DotenvProvider {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl Provider for DotenvProvider {
    fn name(&self) -> &'static str {
        "dotenv"
    }

    async fn fetch(
        &self,
        _ctx: &FetchContext,
        provider_id: &str,
        config: &serde_json::Map<String, serde_json::Value>,
        keys: &HashMap<String, String>,
    ) -> Result<Vec<KeyValue>> {
        let cfg: DotenvConfig = parse_config(provider_id, config)?;

        let contents = tokio::fs::read_to_string(&cfg.path).await.map_err(|e| {
            SstartError::provider_with_source(
                provider_id,
                format!("failed to read dotenv file '{}'", cfg.path),
                Box::new(e),
            )
        })?;

        Ok(map_keys(parse_dotenv(&contents), keys))
    }
}

/// Parse dotenv file contents into ordered key/value pairs
fn parse_dotenv(contents: &str) -> Vec<(String, String)> {
    let mut pairs = Vec::new();
    for line in contents.lines() {
        let line = line.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }

        let line = line.strip_prefix("export ").unwrap_or(line);
        let Some((key, value)) = line.split_once('=') else {
            continue;
        };

        let key = key.trim();
        if key.is_empty() {
            continue;
        }

        pairs.push((key.to_string(), unquote(value.trim()).to_string()));
    }
    pairs
}

fn unquote(value: &str) -> &str {
    if value.len() >= 2 {
        let bytes = value.as_bytes();
        if (bytes[0] == b'"' && bytes[value.len() - 1] == b'"')
            || (bytes[0] == b'\'' && bytes[value.len() - 1] == b'\'')
        {
            return &value[1..value.len() - 1];
        }
    }
    value
}
