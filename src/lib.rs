//! # sstart
//!
//! A command-line secret aggregator and injector. sstart reads a
//! declarative configuration, fetches named values from one or more backing
//! secret stores (cloud secret managers, key/value vaults, local dotenv
//! files, SaaS secret platforms), optionally obtains an OIDC identity for
//! the operator, and unifies everything into a single key/value map. The
//! map is then either injected into a child process, printed in an export
//! format, or fed into downstream MCP servers through a stdio proxy.
//!
//! ## Core Components
//!
//! - **Provider registry**: pluggable backends keyed by a `kind` string
//! - **Collector**: per-provider template expansion, token injection,
//!   fingerprint caching, key renaming, and ordered merging
//! - **OIDC client**: client-credentials or interactive PKCE loopback
//!   authentication with keyring-or-file token persistence
//! - **Secret cache**: fingerprint-keyed TTL cache over the same dual
//!   backend
//! - **MCP proxy**: child supervision, namespaced tool aggregation, and
//!   request routing over newline-delimited JSON-RPC

pub mod cache;
pub mod cli;
pub mod config;
pub mod errors;
pub mod mcp;
pub mod provider;
pub mod secrets;
pub mod sso;
pub mod store;
pub mod template;

// Re-export commonly used types
pub use config::Config;
pub use errors::{Result, SstartError};

/// Application version from Cargo.toml
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Application name from Cargo.toml
pub const APP_NAME: &str = env!("CARGO_PKG_NAME");
