//! OIDC client
//!
//! Dual-mode token acquisition: a direct client-credentials exchange when
//! `SSTART_SSO_SECRET` is present, an interactive PKCE loopback flow
//! otherwise. Endpoints come from RFC 8414 discovery on the configured
//! issuer. Refresh happens automatically inside a margin before expiry; a
//! dead refresh token falls back to a full re-authentication.

use super::pkce::Pkce;
use super::token_store::{TokenStore, Tokens};
use crate::config::OidcConfig;
use crate::errors::{AuthErrorType, Result, SstartError};
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use chrono::Utc;
use rand::RngCore;
use serde::Deserialize;
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::TcpListener;
use tracing::{debug, info, warn};
use url::Url;

/// Environment variable whose presence selects client-credentials mode
pub const CLIENT_SECRET_ENV: &str = "SSTART_SSO_SECRET";

/// Default loopback redirect URI for the interactive flow
pub const DEFAULT_REDIRECT_URI: &str = "http://127.0.0.1:5747/auth/sstart";

/// Hard timeout for the interactive browser round-trip
const AUTH_TIMEOUT: Duration = Duration::from_secs(300);

/// Refresh when this close to expiry
const REFRESH_MARGIN: Duration = Duration::from_secs(60);

#[derive(Debug, Clone, Deserialize)]
struct DiscoveryDocument {
    token_endpoint: String,
    authorization_endpoint: String,
    #[serde(default)]
    #[allow(dead_code)]
    jwks_uri: Option<String>,
}

#[derive(Debug, Deserialize)]
struct TokenResponse {
    access_token: String,
    #[serde(default)]
    refresh_token: Option<String>,
    #[serde(default)]
    id_token: Option<String>,
    #[serde(default)]
    token_type: Option<String>,
    #[serde(default)]
    expires_in: Option<u64>,
}

impl From<TokenResponse> for Tokens {
    fn from(response: TokenResponse) -> Self {
        Tokens {
            access_token: response.access_token,
            refresh_token: response.refresh_token,
            id_token: response.id_token,
            token_type: response.token_type,
            expiry: Utc::now() + chrono::Duration::seconds(response.expires_in.unwrap_or(3600) as i64),
        }
    }
}

/// OIDC token acquisition machine
pub struct OidcClient {
    config: OidcConfig,
    store: TokenStore,
    client: reqwest::Client,
    client_secret: Option<String>,
}

impl OidcClient {
    /// Create a client; the client secret is read from `SSTART_SSO_SECRET`
    pub fn new(config: OidcConfig, store: TokenStore) -> Self {
        let client_secret = std::env::var(CLIENT_SECRET_ENV).ok().filter(|s| !s.is_empty());
        Self::with_secret(config, store, client_secret)
    }

    /// Create a client with an explicit secret (used by tests)
    pub fn with_secret(
        config: OidcConfig,
        store: TokenStore,
        client_secret: Option<String>,
    ) -> Self {
        Self {
            config,
            store,
            client: reqwest::Client::builder()
                .timeout(Duration::from_secs(30))
                .build()
                .expect("reqwest client construction cannot fail with static options"),
            client_secret,
        }
    }

    /// True when a client secret is configured, forcing the
    /// client-credentials path
    pub fn has_client_credentials(&self) -> bool {
        self.client_secret.is_some()
    }

    /// The backing token store
    pub fn store(&self) -> &TokenStore {
        &self.store
    }

    /// Ensure fresh tokens: stored ones when still valid, a refresh when
    /// near expiry, a full authentication otherwise. `force` skips the
    /// stored tokens entirely.
    pub async fn ensure_tokens(&self, force: bool) -> Result<Tokens> {
        if !force {
            if let Some(tokens) = self.store.load().await? {
                if !tokens.is_stale(REFRESH_MARGIN) {
                    debug!("Using stored OIDC tokens");
                    return Ok(tokens);
                }

                if let Some(refresh_token) = tokens.refresh_token.clone() {
                    match self.refresh(&refresh_token).await {
                        Ok(refreshed) => {
                            self.store.save(&refreshed).await?;
                            info!("Refreshed OIDC tokens");
                            return Ok(refreshed);
                        }
                        Err(e) => {
                            warn!(error = %e, "Token refresh failed, re-authenticating");
                            self.store.clear().await?;
                        }
                    }
                }
            }
        }

        let tokens = self.authenticate().await?;
        self.store.save(&tokens).await?;
        Ok(tokens)
    }

    /// Remove any stored tokens
    pub async fn clear_tokens(&self) -> Result<()> {
        self.store.clear().await
    }

    async fn discover(&self) -> Result<DiscoveryDocument> {
        let url = format!(
            "{}/.well-known/openid-configuration",
            self.config.issuer.trim_end_matches('/')
        );
        debug!(url = %url, "Fetching OIDC discovery document");

        let response = self.client.get(&url).send().await.map_err(|e| {
            SstartError::auth(
                format!("OIDC discovery request failed: {}", e),
                AuthErrorType::Discovery,
            )
        })?;

        let status = response.status();
        if !status.is_success() {
            return Err(SstartError::auth(
                format!("OIDC discovery returned status {}", status.as_u16()),
                AuthErrorType::Discovery,
            ));
        }

        response.json().await.map_err(|e| {
            SstartError::auth(
                format!("failed to parse OIDC discovery document: {}", e),
                AuthErrorType::Discovery,
            )
        })
    }

    /// Run a full authentication exchange in the mode selected by the
    /// presence of the client secret. Client-credentials failures are
    /// terminal; there is no fallback to the interactive path.
    async fn authenticate(&self) -> Result<Tokens> {
        let discovery = self.discover().await?;
        match &self.client_secret {
            Some(secret) => self.client_credentials(&discovery, secret).await,
            None => self.interactive(&discovery).await,
        }
    }

    async fn client_credentials(
        &self,
        discovery: &DiscoveryDocument,
        secret: &str,
    ) -> Result<Tokens> {
        info!("Authenticating with client credentials");
        let scope = self.config.scopes.join(" ");
        let params = [
            ("grant_type", "client_credentials"),
            ("client_id", self.config.client_id.as_str()),
            ("client_secret", secret),
            ("scope", scope.as_str()),
        ];
        self.token_request(&discovery.token_endpoint, &params, AuthErrorType::Exchange).await
    }

    async fn refresh(&self, refresh_token: &str) -> Result<Tokens> {
        let discovery = self.discover().await?;
        let mut params = vec![
            ("grant_type", "refresh_token".to_string()),
            ("refresh_token", refresh_token.to_string()),
            ("client_id", self.config.client_id.clone()),
        ];
        if let Some(secret) = &self.client_secret {
            params.push(("client_secret", secret.clone()));
        }
        self.token_request(&discovery.token_endpoint, &params, AuthErrorType::Refresh).await
    }

    async fn token_request<P: serde::Serialize + ?Sized>(
        &self,
        token_endpoint: &str,
        params: &P,
        error_type: AuthErrorType,
    ) -> Result<Tokens> {
        let response =
            self.client.post(token_endpoint).form(params).send().await.map_err(|e| {
                SstartError::auth(format!("token request failed: {}", e), error_type)
            })?;

        let status = response.status();
        if !status.is_success() {
            return Err(SstartError::auth(
                format!("token endpoint returned status {}", status.as_u16()),
                error_type,
            ));
        }

        let token_response: TokenResponse = response.json().await.map_err(|e| {
            SstartError::auth(format!("failed to parse token response: {}", e), error_type)
        })?;
        Ok(token_response.into())
    }

    /// Interactive PKCE loopback flow: bind the listener, open the browser,
    /// wait for exactly one authorization code, exchange it.
    async fn interactive(&self, discovery: &DiscoveryDocument) -> Result<Tokens> {
        let redirect_uri = self
            .config
            .redirect_uri
            .clone()
            .unwrap_or_else(|| DEFAULT_REDIRECT_URI.to_string());
        let redirect = Url::parse(&redirect_uri).map_err(|e| {
            SstartError::config(format!("invalid redirectUri '{}': {}", redirect_uri, e))
        })?;
        let port = redirect.port().unwrap_or(5747);
        let callback_path = redirect.path().to_string();

        let listener =
            TcpListener::bind(("127.0.0.1", port)).await.map_err(|e| {
                SstartError::auth(
                    format!("failed to bind loopback listener on port {}: {}", port, e),
                    AuthErrorType::Exchange,
                )
            })?;

        let pkce = Pkce::generate();
        let state = random_state();

        let mut auth_url = Url::parse(&discovery.authorization_endpoint).map_err(|e| {
            SstartError::auth(
                format!("invalid authorization endpoint: {}", e),
                AuthErrorType::Discovery,
            )
        })?;
        {
            let mut query = auth_url.query_pairs_mut();
            query.append_pair("response_type", "code");
            query.append_pair("client_id", &self.config.client_id);
            query.append_pair("redirect_uri", &redirect_uri);
            query.append_pair("scope", &self.config.scopes.join(" "));
            query.append_pair("state", &state);
            if self.config.pkce.unwrap_or(true) {
                query.append_pair("code_challenge", &pkce.challenge);
                query.append_pair("code_challenge_method", "S256");
            }
            if let Some(mode) = &self.config.response_mode {
                query.append_pair("response_mode", mode);
            }
        }

        eprintln!("Opening browser for authentication...");
        eprintln!("If the browser does not open, visit:\n  {}", auth_url);
        if let Err(e) = webbrowser::open(auth_url.as_str()) {
            debug!(error = %e, "Failed to open browser");
        }

        let code = tokio::time::timeout(
            AUTH_TIMEOUT,
            wait_for_callback(&listener, &callback_path, &state),
        )
        .await
        .map_err(|_| {
            SstartError::auth(
                "timed out waiting for the browser authorization (5 minutes)",
                AuthErrorType::Timeout,
            )
        })??;

        info!("Authorization code received, exchanging for tokens");
        let params = [
            ("grant_type", "authorization_code"),
            ("code", code.as_str()),
            ("redirect_uri", redirect_uri.as_str()),
            ("client_id", self.config.client_id.as_str()),
            ("code_verifier", pkce.verifier.as_str()),
        ];
        self.token_request(&discovery.token_endpoint, &params, AuthErrorType::Exchange).await
    }
}

fn random_state() -> String {
    let mut bytes = [0u8; 16];
    rand::rngs::OsRng.fill_bytes(&mut bytes);
    URL_SAFE_NO_PAD.encode(bytes)
}

/// Accept connections until the callback path delivers a valid
/// authorization response, then stop serving. Unrelated requests (favicon
/// probes and the like) get a 404 and the wait continues.
async fn wait_for_callback(
    listener: &TcpListener,
    callback_path: &str,
    expected_state: &str,
) -> Result<String> {
    loop {
        let (stream, _) = listener.accept().await.map_err(|e| {
            SstartError::auth(format!("loopback accept failed: {}", e), AuthErrorType::Exchange)
        })?;

        let mut stream = BufReader::new(stream);
        let mut request_line = String::new();
        if stream.read_line(&mut request_line).await.is_err() {
            continue;
        }

        // Drain headers so the browser sees a well-formed exchange.
        let mut header = String::new();
        while let Ok(n) = stream.read_line(&mut header).await {
            if n == 0 || header == "\r\n" || header == "\n" {
                break;
            }
            header.clear();
        }

        let target = match request_line.split_whitespace().nth(1) {
            Some(target) => target.to_string(),
            None => continue,
        };

        let Some(outcome) = parse_callback(&target, callback_path, expected_state) else {
            let _ = respond(stream.get_mut(), 404, "Not Found", "Not found").await;
            continue;
        };

        match outcome {
            CallbackOutcome::Code(code) => {
                let _ = respond(
                    stream.get_mut(),
                    200,
                    "OK",
                    "Authentication complete. You can close this window and return to the terminal.",
                )
                .await;
                return Ok(code);
            }
            CallbackOutcome::Error(error) => {
                let _ = respond(stream.get_mut(), 400, "Bad Request", "Authentication failed.")
                    .await;
                return Err(SstartError::auth(
                    format!("authorization was denied: {}", error),
                    AuthErrorType::Exchange,
                ));
            }
            CallbackOutcome::StateMismatch => {
                let _ = respond(stream.get_mut(), 400, "Bad Request", "State mismatch.").await;
                return Err(SstartError::auth(
                    "authorization response state did not match the request",
                    AuthErrorType::Exchange,
                ));
            }
        }
    }
}

enum CallbackOutcome {
    Code(String),
    Error(String),
    StateMismatch,
}

fn parse_callback(target: &str, callback_path: &str, expected_state: &str) -> Option<CallbackOutcome> {
    let url = Url::parse(&format!("http://127.0.0.1{}", target)).ok()?;
    if url.path() != callback_path {
        return None;
    }

    let mut code = None;
    let mut state = None;
    let mut error = None;
    for (key, value) in url.query_pairs() {
        match key.as_ref() {
            "code" => code = Some(value.into_owned()),
            "state" => state = Some(value.into_owned()),
            "error" => error = Some(value.into_owned()),
            _ => {}
        }
    }

    if let Some(error) = error {
        return Some(CallbackOutcome::Error(error));
    }
    if state.as_deref() != Some(expected_state) {
        return Some(CallbackOutcome::StateMismatch);
    }
    code.map(CallbackOutcome::Code)
}

async fn respond<W: tokio::io::AsyncWrite + Unpin>(
    writer: &mut W,
    status: u16,
    reason: &str,
    body: &str,
) -> std::io::Result<()> {
    let page = format!("<html><body><p>{}</p></body></html>", body);
    let response = format!(
        "HTTP/1.1 {} {}\r\nContent-Type: text/html\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{}",
        status,
        reason,
        page.len(),
        page
    );
    writer.write_all(response.as_bytes()).await?;
    writer.flush().await
}
