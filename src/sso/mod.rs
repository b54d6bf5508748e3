//! # SSO / OIDC
//!
//! OpenID Connect token acquisition for providers that authenticate with the
//! operator's identity. Two modes: a non-interactive client-credentials
//! exchange when `SSTART_SSO_SECRET` is set, and an interactive PKCE
//! loopback flow otherwise. Tokens persist through the keyring-or-file
//! store and refresh automatically near expiry.

mod oidc;
mod pkce;
mod token_store;

pub use oidc::{OidcClient, CLIENT_SECRET_ENV, DEFAULT_REDIRECT_URI};
pub use pkce::Pkce;
pub use token_store::{TokenStore, Tokens, KEYRING_SERVICE, TOKENS_FILE_NAME};
