//! `show` subcommand
//!
//! Prints the collected keys with masked values, sorted for stable output.

use crate::secrets::{mask, Collector};

pub async fn handle_show(collector: &Collector, provider_ids: &[String]) -> anyhow::Result<()> {
    let secrets = collector.collect(provider_ids).await?;

    let mut keys: Vec<&String> = secrets.keys().collect();
    keys.sort();

    for key in keys {
        println!("{}={}", key, mask(&secrets[key]));
    }

    Ok(())
}
