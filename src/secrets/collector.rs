//! Secret collector
//!
//! Walks the configured providers in order and merges their results into a
//! single map. Per provider: expand config templates, inject the current
//! OIDC tokens under the reserved keys, consult the fingerprint cache,
//! fetch on miss, cache the provider-intrinsic result, then apply the
//! rename map and merge. Later providers override earlier ones.

use crate::cache::{fingerprint, SecretCache};
use crate::config::Config;
use crate::errors::{Result, SstartError};
use crate::provider::{self, FetchContext, SSO_ACCESS_TOKEN_KEY, SSO_ID_TOKEN_KEY};
use crate::sso::{OidcClient, TokenStore, Tokens};
use crate::template;
use std::collections::HashMap;
use tracing::{debug, warn};

pub struct Collector {
    config: Config,
    cache: SecretCache,
    oidc: Option<OidcClient>,
    force_auth: bool,
}

impl Collector {
    /// Create a collector with the default cache and, when an sso block is
    /// configured, the default token store
    pub fn new(config: Config) -> Self {
        let oidc = config
            .sso
            .as_ref()
            .map(|sso| OidcClient::new(sso.oidc.clone(), TokenStore::new()));
        Self { config, cache: SecretCache::new(), oidc, force_auth: false }
    }

    /// Override the secret cache (used by tests)
    pub fn with_cache(mut self, cache: SecretCache) -> Self {
        self.cache = cache;
        self
    }

    /// Override the OIDC client (used by tests)
    pub fn with_oidc_client(mut self, oidc: OidcClient) -> Self {
        self.oidc = Some(oidc);
        self
    }

    /// Force a fresh OIDC exchange, ignoring stored tokens
    pub fn with_force_auth(mut self, force_auth: bool) -> Self {
        self.force_auth = force_auth;
        self
    }

    /// Collect secrets from the selected providers (all of them, in
    /// declaration order, when the filter is empty) and merge the results.
    /// Any provider failure aborts the whole run; there is no partial
    /// success.
    pub async fn collect(&self, provider_ids: &[String]) -> Result<HashMap<String, String>> {
        let effective_ids: Vec<String> = if provider_ids.is_empty() {
            self.config.providers.iter().map(|p| p.id.clone()).collect()
        } else {
            provider_ids.to_vec()
        };

        // Unknown filter entries fail before any network traffic.
        for id in &effective_ids {
            self.config.get_provider(id)?;
        }

        let tokens = match &self.oidc {
            Some(oidc) => Some(oidc.ensure_tokens(self.force_auth).await?),
            None => None,
        };

        let mut merged = HashMap::new();
        let mut ctx = FetchContext::default();
        let mut cache_warned = false;

        for id in &effective_ids {
            let provider_cfg = self.config.get_provider(id)?;

            let mut effective_config = template::expand_config(&provider_cfg.config);
            inject_tokens(&mut effective_config, tokens.as_ref());

            let cache_key = fingerprint(&provider_cfg.id, &provider_cfg.kind, &effective_config);

            let raw = match self.cache.get(&cache_key).await {
                Some(secrets) => {
                    debug!(provider_id = %id, "Cache hit, skipping fetch");
                    secrets
                }
                None => {
                    let plugin = provider::new(&provider_cfg.kind).map_err(|e| {
                        SstartError::config(format!("failed to create provider '{}': {}", id, e))
                    })?;

                    debug!(provider_id = %id, kind = %provider_cfg.kind, "Fetching secrets");
                    // Fetch everything under source names; the rename map is
                    // applied after caching so the cache stores
                    // provider-intrinsic keys.
                    let kvs = plugin
                        .fetch(&ctx, &provider_cfg.id, &effective_config, &HashMap::new())
                        .await?;
                    let raw: HashMap<String, String> =
                        kvs.into_iter().map(|kv| (kv.key, kv.value)).collect();

                    if let Err(e) = self.cache.set(&cache_key, raw.clone()).await {
                        if !cache_warned {
                            warn!(error = %e, "Secret cache write failed, continuing without cache");
                            cache_warned = true;
                        }
                    }
                    raw
                }
            };

            let mapped = provider::map_keys(raw, &provider_cfg.keys);

            let mut contributed = HashMap::with_capacity(mapped.len());
            for kv in mapped {
                contributed.insert(kv.key.clone(), kv.value.clone());
                merged.insert(kv.key, kv.value);
            }
            ctx.resolved.insert(provider_cfg.id.clone(), contributed);
        }

        Ok(merged)
    }
}

fn inject_tokens(
    config: &mut serde_json::Map<String, serde_json::Value>,
    tokens: Option<&Tokens>,
) {
    let Some(tokens) = tokens else {
        return;
    };
    config.insert(
        SSO_ACCESS_TOKEN_KEY.to_string(),
        serde_json::Value::String(tokens.access_token.clone()),
    );
    if let Some(id_token) = &tokens.id_token {
        config.insert(SSO_ID_TOKEN_KEY.to_string(), serde_json::Value::String(id_token.clone()));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::SecretCache;
    use std::io::Write;
    use std::time::Duration;

    fn dotenv_file(contents: &str) -> tempfile::NamedTempFile {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(file, "{}", contents).unwrap();
        file
    }

    fn temp_collector(config: Config) -> (tempfile::TempDir, Collector) {
        let dir = tempfile::tempdir().unwrap();
        let cache =
            SecretCache::with_path(dir.path().join("cache.json"), Duration::from_secs(60));
        (dir, Collector::new(config).with_cache(cache))
    }

    fn load_config(yaml: &str) -> Config {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(file, "{}", yaml).unwrap();
        Config::load(file.path()).unwrap()
    }

    #[tokio::test]
    async fn test_two_dotenv_providers_rename_and_override() {
        let a = dotenv_file("X=1\n");
        let b = dotenv_file("X=2\nY=3\n");
        let config = load_config(&format!(
            r#"
providers:
  - kind: dotenv
    id: a
    path: {}
  - kind: dotenv
    id: b
    path: {}
    keys:
      X: "=="
      Y: YY
"#,
            a.path().display(),
            b.path().display()
        ));

        let (_dir, collector) = temp_collector(config);
        let secrets = collector.collect(&[]).await.unwrap();

        assert_eq!(secrets.len(), 2);
        assert_eq!(secrets.get("X").map(String::as_str), Some("2"));
        assert_eq!(secrets.get("YY").map(String::as_str), Some("3"));
    }

    #[tokio::test]
    async fn test_merge_is_deterministic() {
        let a = dotenv_file("K=first\n");
        let b = dotenv_file("K=second\n");
        let config = load_config(&format!(
            r#"
providers:
  - kind: dotenv
    id: a
    path: {}
  - kind: dotenv
    id: b
    path: {}
"#,
            a.path().display(),
            b.path().display()
        ));

        let (_dir, collector) = temp_collector(config);
        for _ in 0..3 {
            let secrets = collector.collect(&[]).await.unwrap();
            assert_eq!(secrets.get("K").map(String::as_str), Some("second"));
        }
    }

    #[tokio::test]
    async fn test_provider_filter_order_and_unknown_id() {
        let a = dotenv_file("K=a\n");
        let b = dotenv_file("K=b\n");
        let config = load_config(&format!(
            r#"
providers:
  - kind: dotenv
    id: a
    path: {}
  - kind: dotenv
    id: b
    path: {}
"#,
            a.path().display(),
            b.path().display()
        ));

        let (_dir, collector) = temp_collector(config);

        // Filter order wins over declaration order.
        let secrets =
            collector.collect(&["b".to_string(), "a".to_string()]).await.unwrap();
        assert_eq!(secrets.get("K").map(String::as_str), Some("a"));

        let err = collector.collect(&["missing".to_string()]).await.unwrap_err();
        assert!(err.to_string().contains("unknown provider id 'missing'"));
    }

    #[tokio::test]
    async fn test_cache_hit_suppresses_fetch() {
        let file = dotenv_file("K=original\n");
        let config = load_config(&format!(
            r#"
providers:
  - kind: dotenv
    id: local
    path: {}
"#,
            file.path().display()
        ));

        let (_dir, collector) = temp_collector(config);

        let first = collector.collect(&[]).await.unwrap();
        assert_eq!(first.get("K").map(String::as_str), Some("original"));

        // Mutate the backing file; a second collect within TTL must not
        // observe the change because the fetch is skipped entirely.
        std::fs::write(file.path(), "K=changed\n").unwrap();
        let second = collector.collect(&[]).await.unwrap();
        assert_eq!(second.get("K").map(String::as_str), Some("original"));
    }

    #[tokio::test]
    async fn test_rename_applies_even_on_cache_hit() {
        let file = dotenv_file("K=v\nL=w\n");
        let config_yaml = format!(
            r#"
providers:
  - kind: dotenv
    id: local
    path: {}
    keys:
      K: RENAMED
"#,
            file.path().display()
        );

        let dir = tempfile::tempdir().unwrap();
        let cache_path = dir.path().join("cache.json");

        let collector = Collector::new(load_config(&config_yaml))
            .with_cache(SecretCache::with_path(&cache_path, Duration::from_secs(60)));
        let first = collector.collect(&[]).await.unwrap();
        assert_eq!(first.get("RENAMED").map(String::as_str), Some("v"));
        assert!(!first.contains_key("K"));
        assert!(!first.contains_key("L"));

        // Second collector hits the cache; the stored entry holds the
        // provider-intrinsic names so the rename still applies.
        let collector = Collector::new(load_config(&config_yaml))
            .with_cache(SecretCache::with_path(&cache_path, Duration::from_secs(60)));
        let second = collector.collect(&[]).await.unwrap();
        assert_eq!(second.get("RENAMED").map(String::as_str), Some("v"));
        assert!(!second.contains_key("L"));
    }

    #[tokio::test]
    async fn test_template_provider_reads_prior_results() {
        let creds = dotenv_file("USER=admin\nPASS=s3cret\n");
        let config = load_config(&format!(
            r#"
providers:
  - kind: dotenv
    id: creds
    path: {}
  - kind: template
    id: derived
    templates:
      DB_URI: "db://{{{{.creds.USER}}}}:{{{{.creds.PASS}}}}@host"
"#,
            creds.path().display()
        ));

        let (_dir, collector) = temp_collector(config);
        let secrets = collector.collect(&[]).await.unwrap();
        assert_eq!(secrets.get("DB_URI").map(String::as_str), Some("db://admin:s3cret@host"));
    }

    #[tokio::test]
    async fn test_provider_failure_aborts_collection() {
        let good = dotenv_file("A=1\n");
        let config = load_config(&format!(
            r#"
providers:
  - kind: dotenv
    id: good
    path: {}
  - kind: dotenv
    id: bad
    path: /nonexistent/missing.env
"#,
            good.path().display()
        ));

        let (_dir, collector) = temp_collector(config);
        let err = collector.collect(&[]).await.unwrap_err();
        assert!(err.to_string().contains("bad"));
    }
}
