//! `env` and `sh` subcommands
//!
//! Exports the collected map as shell export lines, JSON, or YAML. Output
//! is sorted by key so downstream tools see identical bytes across runs.

use super::EnvFormat;
use crate::secrets::Collector;
use std::collections::BTreeMap;

pub async fn handle_env(
    collector: &Collector,
    provider_ids: &[String],
    format: EnvFormat,
) -> anyhow::Result<()> {
    let secrets = collector.collect(provider_ids).await?;
    let sorted: BTreeMap<String, String> = secrets.into_iter().collect();

    match format {
        EnvFormat::Json => {
            println!("{}", serde_json::to_string_pretty(&sorted)?);
        }
        EnvFormat::Yaml => {
            for (key, value) in &sorted {
                println!("{}: {}", key, escape_yaml(value));
            }
        }
        EnvFormat::Shell => {
            for (key, value) in &sorted {
                println!("export {}={}", key, escape_shell(value));
            }
        }
    }

    Ok(())
}

/// Single-quote a value for the shell, escaping embedded single quotes with
/// the `'\''` idiom.
pub fn escape_shell(value: &str) -> String {
    format!("'{}'", value.replace('\'', "'\\''"))
}

/// Double-quote a YAML value when it contains characters that would change
/// its parse, escaping backslashes, quotes, and newlines.
pub fn escape_yaml(value: &str) -> String {
    const SPECIAL: &[char] = &[
        ':', '{', '}', '[', ']', ',', '&', '*', '#', '?', '|', '-', '<', '>', '=', '!', '%', '@',
        '`',
    ];

    if value.contains(SPECIAL) || value.contains('\n') {
        let escaped = value.replace('\\', "\\\\").replace('"', "\\\"").replace('\n', "\\n");
        format!("\"{}\"", escaped)
    } else {
        value.to_string()
    }
}
