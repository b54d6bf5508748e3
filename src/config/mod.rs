//! # Configuration
//!
//! Declarative configuration for sstart, loaded from a YAML file
//! (default `.sstart.yml`). Defines the ordered provider list, the optional
//! SSO block, and the optional MCP server list.

mod settings;

pub use settings::{
    Config, McpConfig, McpServerConfig, OidcConfig, ProviderConfig, SsoConfig,
    DEFAULT_CONFIG_FILE, KEY_PASSTHROUGH,
};
