//! `cache` subcommand
//!
//! Maintenance surface over the secret cache: clear everything, prune
//! expired entries, or print counts.

use crate::cache::SecretCache;
use clap::Subcommand;

#[derive(Subcommand)]
pub enum CacheCommands {
    /// Remove all cached secrets
    Clear,

    /// Remove expired entries only
    Clean,

    /// Show entry counts
    Stats,
}

pub async fn handle_cache_command(command: CacheCommands) -> anyhow::Result<()> {
    let cache = SecretCache::new();

    match command {
        CacheCommands::Clear => {
            cache.clear().await?;
            println!("Cache cleared");
        }
        CacheCommands::Clean => {
            cache.clean_expired().await?;
            println!("Expired entries removed");
        }
        CacheCommands::Stats => {
            let stats = cache.stats().await;
            println!("Cached providers: {}", stats.total);
            println!("  valid:   {}", stats.valid);
            println!("  expired: {}", stats.expired);
        }
    }

    Ok(())
}
