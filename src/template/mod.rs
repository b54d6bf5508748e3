//! # Template Expansion
//!
//! Expands environment references inside provider configuration values
//! before fetch. Two forms are supported on every string in the config blob,
//! recursively across maps and lists:
//!
//! 1. `{{ get_env(name="VAR", default="fallback") }}` — the environment value
//!    when set and non-empty, otherwise the default.
//! 2. `${VAR}` / `$VAR` — the environment value, empty when unset.
//!
//! The cross-provider form `{{.provider_id.KEY}}` is not handled here; it is
//! resolved by the `template` provider against previously collected results.

use regex::Regex;
use std::sync::OnceLock;

fn get_env_pattern() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r#"\{\{\s*get_env\(name="([^"]+)",\s*default="([^"]*)"\)\s*\}\}"#)
            .expect("get_env pattern is valid")
    })
}

fn shell_var_pattern() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"\$\{([A-Za-z_][A-Za-z0-9_]*)\}|\$([A-Za-z_][A-Za-z0-9_]*)")
            .expect("shell var pattern is valid")
    })
}

/// Expand template variables in a single string against the process
/// environment.
pub fn expand_str(template: &str) -> String {
    expand_str_with(template, |name| std::env::var(name).ok())
}

/// Expand template variables using the supplied environment lookup.
pub fn expand_str_with<F>(template: &str, lookup: F) -> String
where
    F: Fn(&str) -> Option<String>,
{
    let result = get_env_pattern().replace_all(template, |caps: &regex::Captures<'_>| {
        let name = &caps[1];
        let default = &caps[2];
        match lookup(name) {
            Some(value) if !value.is_empty() => value,
            _ => default.to_string(),
        }
    });

    shell_var_pattern()
        .replace_all(&result, |caps: &regex::Captures<'_>| {
            let name = caps.get(1).or_else(|| caps.get(2)).map(|m| m.as_str()).unwrap_or("");
            lookup(name).unwrap_or_default()
        })
        .into_owned()
}

/// Expand template variables in every string of a provider config blob,
/// recursing through nested maps and lists.
pub fn expand_config(
    config: &serde_json::Map<String, serde_json::Value>,
) -> serde_json::Map<String, serde_json::Value> {
    config.iter().map(|(k, v)| (k.clone(), expand_value(v))).collect()
}

fn expand_value(value: &serde_json::Value) -> serde_json::Value {
    match value {
        serde_json::Value::String(s) => serde_json::Value::String(expand_str(s)),
        serde_json::Value::Object(map) => serde_json::Value::Object(expand_config(map)),
        serde_json::Value::Array(items) => {
            serde_json::Value::Array(items.iter().map(expand_value).collect())
        }
        other => other.clone(),
    }
}
