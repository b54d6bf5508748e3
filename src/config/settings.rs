//! # Configuration Settings
//!
//! Defines the configuration structure for sstart and its validation rules.
//! Provider declaration order is load-bearing: it is both the merge order and
//! the dependency order for the `template` provider.

use crate::errors::{Result, SstartError};
use serde::{Deserialize, Deserializer, Serialize};
use std::collections::{HashMap, HashSet};
use std::path::Path;
use validator::Validate;

/// Default configuration file name
pub const DEFAULT_CONFIG_FILE: &str = ".sstart.yml";

/// Sentinel in a provider `keys` map meaning "reuse the source name verbatim"
pub const KEY_PASSTHROUGH: &str = "==";

/// Main application configuration
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct Config {
    /// Ordered provider declarations. Later providers override earlier ones
    /// on key collision.
    #[serde(default)]
    pub providers: Vec<ProviderConfig>,

    /// Optional SSO block for OIDC token acquisition
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sso: Option<SsoConfig>,

    /// Optional MCP proxy block
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mcp: Option<McpConfig>,

    /// Pass the operator's ambient environment through to child processes
    #[serde(default)]
    pub inherit: bool,
}

/// A declared instance of a secret backend
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProviderConfig {
    /// Plugin selector (`dotenv`, `vault`, `aws_secretsmanager`, ...)
    pub kind: String,

    /// Unique identifier; defaults to `kind` when omitted
    #[serde(default)]
    pub id: String,

    /// Rename map `source -> target`; `==` keeps the source name
    #[serde(default, skip_serializing_if = "HashMap::is_empty")]
    pub keys: HashMap<String, String>,

    /// Backend-specific options, interpreted by the plugin's own schema
    #[serde(flatten)]
    pub config: serde_json::Map<String, serde_json::Value>,
}

/// SSO configuration block
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SsoConfig {
    pub oidc: OidcConfig,
}

/// OIDC client configuration
#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
pub struct OidcConfig {
    /// OAuth2 client identifier
    #[validate(length(min = 1, message = "clientId cannot be empty"))]
    pub client_id: String,

    /// Issuer URL; discovery appends `/.well-known/openid-configuration`
    #[validate(length(min = 1, message = "issuer cannot be empty"))]
    pub issuer: String,

    /// Requested scopes; accepts a YAML list or a space-separated string
    #[serde(deserialize_with = "scopes_from_list_or_string")]
    pub scopes: Vec<String>,

    /// Force PKCE even when a client secret is available
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pkce: Option<bool>,

    /// Override the loopback redirect URI
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub redirect_uri: Option<String>,

    /// OAuth2 response_mode parameter
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub response_mode: Option<String>,
}

/// MCP proxy configuration block
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct McpConfig {
    pub servers: Vec<McpServerConfig>,
}

/// Launch spec for one downstream MCP server
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct McpServerConfig {
    /// Unique server id; also the namespace prefix for its tools
    pub id: String,

    /// Executable to spawn
    pub command: String,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub args: Vec<String>,

    /// Child-specific environment overrides, applied on top of the
    /// collected secrets
    #[serde(default, skip_serializing_if = "HashMap::is_empty")]
    pub env: HashMap<String, String>,
}

fn scopes_from_list_or_string<'de, D>(deserializer: D) -> std::result::Result<Vec<String>, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum ListOrString {
        List(Vec<String>),
        String(String),
    }

    match ListOrString::deserialize(deserializer)? {
        ListOrString::List(list) => Ok(list),
        ListOrString::String(s) => Ok(s.split_whitespace().map(str::to_string).collect()),
    }
}

impl Config {
    /// Load and validate a configuration file
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let contents = std::fs::read_to_string(path).map_err(|e| {
            SstartError::config_with_source(
                format!("failed to read config file '{}'", path.display()),
                Box::new(e),
            )
        })?;

        let mut config: Config = serde_yaml::from_str(&contents).map_err(|e| {
            SstartError::config_with_source(
                format!("failed to parse config file '{}'", path.display()),
                Box::new(e),
            )
        })?;

        config.apply_defaults();
        config.validate()?;
        Ok(config)
    }

    /// Fill in defaulted fields: a provider's id defaults to its kind
    fn apply_defaults(&mut self) {
        for provider in &mut self.providers {
            if provider.id.is_empty() {
                provider.id = provider.kind.clone();
            }
        }
    }

    /// Validate the entire configuration
    pub fn validate(&self) -> Result<()> {
        if let Some(sso) = &self.sso {
            Validate::validate(&sso.oidc)
                .map_err(|e| SstartError::config(format!("invalid sso.oidc block: {}", e)))?;
        }

        self.validate_custom()
    }

    /// Custom validation logic beyond what the validator crate covers
    fn validate_custom(&self) -> Result<()> {
        let mut seen_ids = HashSet::new();
        let mut kind_counts: HashMap<&str, usize> = HashMap::new();
        for provider in &self.providers {
            if provider.kind.is_empty() {
                return Err(SstartError::config("provider declaration is missing 'kind'"));
            }
            *kind_counts.entry(provider.kind.as_str()).or_default() += 1;
            if !seen_ids.insert(provider.id.as_str()) {
                let hint = if kind_counts[provider.kind.as_str()] > 1 {
                    " (providers sharing a kind must declare explicit ids)"
                } else {
                    ""
                };
                return Err(SstartError::config(format!(
                    "duplicate provider id '{}'{}",
                    provider.id, hint
                )));
            }
        }

        if let Some(sso) = &self.sso {
            if sso.oidc.scopes.is_empty() {
                return Err(SstartError::config("sso.oidc.scopes must not be empty"));
            }
            url::Url::parse(&sso.oidc.issuer).map_err(|e| {
                SstartError::config(format!(
                    "sso.oidc.issuer '{}' is not a valid URL: {}",
                    sso.oidc.issuer, e
                ))
            })?;
        }

        if let Some(mcp) = &self.mcp {
            if mcp.servers.is_empty() {
                return Err(SstartError::config("mcp.servers must not be empty"));
            }
            let mut seen = HashSet::new();
            for server in &mcp.servers {
                if server.id.is_empty() {
                    return Err(SstartError::config("mcp server declaration is missing 'id'"));
                }
                if server.command.is_empty() {
                    return Err(SstartError::config(format!(
                        "mcp server '{}' is missing 'command'",
                        server.id
                    )));
                }
                if !seen.insert(server.id.as_str()) {
                    return Err(SstartError::config(format!(
                        "duplicate mcp server id '{}'",
                        server.id
                    )));
                }
            }
        }

        Ok(())
    }

    /// Look up a provider declaration by id
    pub fn get_provider(&self, id: &str) -> Result<&ProviderConfig> {
        self.providers
            .iter()
            .find(|p| p.id == id)
            .ok_or_else(|| SstartError::config(format!("unknown provider id '{}'", id)))
    }

    /// Returns true when an MCP block is configured
    pub fn has_mcp(&self) -> bool {
        self.mcp.is_some()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn parse(yaml: &str) -> Result<Config> {
        let mut config: Config = serde_yaml::from_str(yaml).expect("yaml should parse");
        config.apply_defaults();
        config.validate()?;
        Ok(config)
    }

    #[test]
    fn test_provider_id_defaults_to_kind() {
        let config = parse(
            r#"
providers:
  - kind: dotenv
    path: .env
"#,
        )
        .unwrap();

        assert_eq!(config.providers[0].id, "dotenv");
        assert_eq!(
            config.providers[0].config.get("path").and_then(|v| v.as_str()),
            Some(".env")
        );
    }

    #[test]
    fn test_duplicate_kind_without_ids_rejected() {
        let err = parse(
            r#"
providers:
  - kind: dotenv
    path: a.env
  - kind: dotenv
    path: b.env
"#,
        )
        .unwrap_err();

        assert!(err.to_string().contains("duplicate provider id"));
        assert!(err.to_string().contains("explicit ids"));
    }

    #[test]
    fn test_keys_map_and_passthrough_sentinel() {
        let config = parse(
            r#"
providers:
  - kind: dotenv
    id: local
    keys:
      X: "=="
      Y: RENAMED
"#,
        )
        .unwrap();

        let keys = &config.providers[0].keys;
        assert_eq!(keys.get("X").map(String::as_str), Some(KEY_PASSTHROUGH));
        assert_eq!(keys.get("Y").map(String::as_str), Some("RENAMED"));
    }

    #[test]
    fn test_scopes_accepts_string_or_list() {
        let config = parse(
            r#"
providers: []
sso:
  oidc:
    clientId: app
    issuer: https://issuer.example.com
    scopes: openid profile email
"#,
        )
        .unwrap();
        assert_eq!(config.sso.unwrap().oidc.scopes, vec!["openid", "profile", "email"]);

        let config = parse(
            r#"
providers: []
sso:
  oidc:
    clientId: app
    issuer: https://issuer.example.com
    scopes: [openid, profile]
"#,
        )
        .unwrap();
        assert_eq!(config.sso.unwrap().oidc.scopes, vec!["openid", "profile"]);
    }

    #[test]
    fn test_empty_scopes_rejected() {
        let err = parse(
            r#"
providers: []
sso:
  oidc:
    clientId: app
    issuer: https://issuer.example.com
    scopes: []
"#,
        )
        .unwrap_err();
        assert!(err.to_string().contains("scopes"));
    }

    #[test]
    fn test_empty_mcp_servers_rejected() {
        let err = parse(
            r#"
providers: []
mcp:
  servers: []
"#,
        )
        .unwrap_err();
        assert!(err.to_string().contains("mcp.servers"));
    }

    #[test]
    fn test_duplicate_mcp_server_id_rejected() {
        let err = parse(
            r#"
providers: []
mcp:
  servers:
    - id: pg
      command: npx
    - id: pg
      command: npx
"#,
        )
        .unwrap_err();
        assert!(err.to_string().contains("duplicate mcp server id"));
    }

    #[test]
    fn test_load_from_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(
            file,
            r#"
providers:
  - kind: dotenv
    id: local
    path: .env
inherit: true
"#
        )
        .unwrap();

        let config = Config::load(file.path()).unwrap();
        assert!(config.inherit);
        assert_eq!(config.get_provider("local").unwrap().kind, "dotenv");
        assert!(config.get_provider("missing").is_err());
    }

    #[test]
    fn test_unknown_provider_lookup_fails_fast() {
        let config = parse("providers: []").unwrap();
        let err = config.get_provider("nope").unwrap_err();
        assert!(err.to_string().contains("unknown provider id 'nope'"));
    }
}
