//! # Error Handling
//!
//! Error types for sstart using `thiserror`. Every failure surfaced to the
//! operator is a one-line message with a stable prefix; secret values never
//! appear in error text.

use std::fmt;

/// Custom result type for sstart operations
pub type Result<T> = std::result::Result<T, SstartError>;

/// Main error type for sstart
#[derive(thiserror::Error, Debug)]
pub enum SstartError {
    /// Configuration errors: malformed file, missing required field,
    /// duplicate provider id, unknown kind
    #[error("Configuration error: {message}")]
    Config {
        message: String,
        #[source]
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
    },

    /// OIDC discovery, token exchange, or refresh errors
    #[error("Authentication error: {message}")]
    Auth {
        message: String,
        error_type: AuthErrorType,
    },

    /// Backend failure from a secret provider, tagged with the provider id
    #[error("Provider '{provider_id}' error: {message}")]
    Provider {
        provider_id: String,
        message: String,
        #[source]
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
    },

    /// Transient cache read/write failure; degrades to a miss and never
    /// fails the run
    #[error("Cache error: {message}")]
    Cache { message: String },

    /// Invalid JSON-RPC traffic from a downstream MCP server
    #[error("MCP server '{server_id}' protocol error: {message}")]
    Protocol { server_id: String, message: String },

    /// I/O errors with additional context
    #[error("I/O error: {context}")]
    Io {
        #[source]
        source: std::io::Error,
        context: String,
    },

    /// Serialization/deserialization errors
    #[error("Serialization error: {context}")]
    Serialization {
        #[source]
        source: serde_json::Error,
        context: String,
    },

    /// Operation cancelled by a signal or host disconnect
    #[error("Operation cancelled")]
    Cancelled,
}

/// Authentication error subtypes
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuthErrorType {
    Discovery,
    Exchange,
    Refresh,
    MissingToken,
    Timeout,
}

impl fmt::Display for AuthErrorType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AuthErrorType::Discovery => write!(f, "discovery"),
            AuthErrorType::Exchange => write!(f, "exchange"),
            AuthErrorType::Refresh => write!(f, "refresh"),
            AuthErrorType::MissingToken => write!(f, "missing_token"),
            AuthErrorType::Timeout => write!(f, "timeout"),
        }
    }
}

impl SstartError {
    /// Create a new configuration error
    pub fn config<S: Into<String>>(message: S) -> Self {
        Self::Config { message: message.into(), source: None }
    }

    /// Create a configuration error with source
    pub fn config_with_source<S: Into<String>>(
        message: S,
        source: Box<dyn std::error::Error + Send + Sync>,
    ) -> Self {
        Self::Config { message: message.into(), source: Some(source) }
    }

    /// Create a new authentication error
    pub fn auth<S: Into<String>>(message: S, error_type: AuthErrorType) -> Self {
        Self::Auth { message: message.into(), error_type }
    }

    /// Create a new provider error tagged with the provider id
    pub fn provider<I: Into<String>, S: Into<String>>(provider_id: I, message: S) -> Self {
        Self::Provider { provider_id: provider_id.into(), message: message.into(), source: None }
    }

    /// Create a provider error with source
    pub fn provider_with_source<I: Into<String>, S: Into<String>>(
        provider_id: I,
        message: S,
        source: Box<dyn std::error::Error + Send + Sync>,
    ) -> Self {
        Self::Provider {
            provider_id: provider_id.into(),
            message: message.into(),
            source: Some(source),
        }
    }

    /// Create a new cache error
    pub fn cache<S: Into<String>>(message: S) -> Self {
        Self::Cache { message: message.into() }
    }

    /// Create a new protocol error tagged with the MCP server id
    pub fn protocol<I: Into<String>, S: Into<String>>(server_id: I, message: S) -> Self {
        Self::Protocol { server_id: server_id.into(), message: message.into() }
    }

    /// Create an I/O error with context
    pub fn io<S: Into<String>>(source: std::io::Error, context: S) -> Self {
        Self::Io { source, context: context.into() }
    }

    /// Returns true when the error should abort the run with a non-zero exit
    pub fn is_fatal(&self) -> bool {
        !matches!(self, Self::Cache { .. } | Self::Cancelled)
    }
}

impl From<std::io::Error> for SstartError {
    fn from(source: std::io::Error) -> Self {
        Self::Io { source, context: "I/O operation failed".to_string() }
    }
}

impl From<serde_json::Error> for SstartError {
    fn from(source: serde_json::Error) -> Self {
        Self::Serialization { source, context: "JSON serialization failed".to_string() }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_provider_error_includes_id() {
        let err = SstartError::provider("vault-prod", "connection refused");
        assert!(err.to_string().contains("vault-prod"));
        assert!(err.to_string().contains("connection refused"));
    }

    #[test]
    fn test_cache_error_is_not_fatal() {
        assert!(!SstartError::cache("keyring unavailable").is_fatal());
        assert!(!SstartError::Cancelled.is_fatal());
        assert!(SstartError::config("bad yaml").is_fatal());
        assert!(SstartError::provider("a", "down").is_fatal());
    }

    #[test]
    fn test_auth_error_type_display() {
        assert_eq!(AuthErrorType::Discovery.to_string(), "discovery");
        assert_eq!(AuthErrorType::Refresh.to_string(), "refresh");
    }
}
