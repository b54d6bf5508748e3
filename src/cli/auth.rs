//! `auth` subcommand
//!
//! OIDC token lifecycle: log in (optionally forcing a fresh exchange), log
//! out, and inspect the stored token's expiry. Token values are never
//! printed.

use crate::config::Config;
use crate::sso::{OidcClient, TokenStore};
use clap::Subcommand;

#[derive(Subcommand)]
pub enum AuthCommands {
    /// Acquire tokens, refreshing or re-authenticating as needed
    Login {
        /// Ignore stored tokens and run a fresh exchange
        #[arg(long)]
        force: bool,
    },

    /// Remove stored tokens
    Logout,

    /// Show stored token status
    Status,
}

pub async fn handle_auth_command(command: AuthCommands, config: &Config) -> anyhow::Result<()> {
    let Some(sso) = &config.sso else {
        anyhow::bail!("sso configuration not found in config file");
    };
    let client = OidcClient::new(sso.oidc.clone(), TokenStore::new());

    match command {
        AuthCommands::Login { force } => {
            let tokens = client.ensure_tokens(force).await?;
            println!("Authenticated; token expires at {}", tokens.expiry.to_rfc3339());
        }
        AuthCommands::Logout => {
            client.clear_tokens().await?;
            println!("Stored tokens removed");
        }
        AuthCommands::Status => match client.store().load().await? {
            Some(tokens) => {
                let state = if tokens.is_stale(std::time::Duration::from_secs(0)) {
                    "expired"
                } else {
                    "valid"
                };
                println!("Tokens: {} (expires at {})", state, tokens.expiry.to_rfc3339());
                println!("  refresh token: {}", presence(tokens.refresh_token.is_some()));
                println!("  id token:      {}", presence(tokens.id_token.is_some()));
            }
            None => println!("No stored tokens"),
        },
    }

    Ok(())
}

fn presence(present: bool) -> &'static str {
    if present {
        "present"
    } else {
        "absent"
    }
}
