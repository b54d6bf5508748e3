//! # Secret Collection
//!
//! Orchestrates providers into a single key/value map and provides the
//! masking helpers used when secrets are printed.

mod collector;

pub use collector::Collector;

/// Mask a secret value for display: short values vanish entirely, longer
/// ones keep a two-character hint at each visible end.
pub fn mask(value: &str) -> String {
    let chars: Vec<char> = value.chars().collect();
    match chars.len() {
        0..=4 => "****".to_string(),
        5..=8 => format!("{}****", chars[..2].iter().collect::<String>()),
        _ => format!(
            "{}****{}",
            chars[..2].iter().collect::<String>(),
            chars[chars.len() - 2..].iter().collect::<String>()
        ),
    }
}

/// Replace every secret value occurring in `text` with asterisks of the
/// same length.
pub fn redact(text: &str, secrets: &std::collections::HashMap<String, String>) -> String {
    let mut result = text.to_string();
    for value in secrets.values() {
        if !value.is_empty() {
            result = result.replace(value.as_str(), &"*".repeat(value.chars().count()));
        }
    }
    result
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    #[test]
    fn test_mask_law() {
        assert_eq!(mask(""), "****");
        assert_eq!(mask("ab"), "****");
        assert_eq!(mask("abcd"), "****");
        assert_eq!(mask("abcde"), "ab****");
        assert_eq!(mask("abcdefgh"), "ab****");
        assert_eq!(mask("supersecret"), "su****et");
    }

    #[test]
    fn test_redact_replaces_values_with_same_length() {
        let mut secrets = HashMap::new();
        secrets.insert("KEY".to_string(), "hunter2".to_string());

        let out = redact("the password is hunter2!", &secrets);
        assert_eq!(out, "the password is *******!");
    }

    #[test]
    fn test_redact_ignores_empty_values() {
        let mut secrets = HashMap::new();
        secrets.insert("EMPTY".to_string(), String::new());
        assert_eq!(redact("unchanged", &secrets), "unchanged");
    }
}
