//! `mcp` subcommand
//!
//! Collects secrets, then runs the MCP proxy over stdin/stdout with the
//! secrets injected into every downstream server's environment. SIGINT and
//! SIGTERM tear the proxy and its children down; a clean host EOF exits
//! zero.

use crate::config::Config;
use crate::mcp::{JsonRpcMessage, Proxy};
use crate::secrets::Collector;
use std::collections::HashMap;
use tokio::sync::mpsc;
use tracing::info;

pub async fn handle_mcp(
    config: &Config,
    collector: &Collector,
    provider_ids: &[String],
) -> anyhow::Result<()> {
    let Some(mcp_config) = &config.mcp else {
        anyhow::bail!("mcp configuration not found in config file");
    };

    let secrets = collector.collect(provider_ids).await?;
    let env = build_environment(config.inherit, secrets);

    let (upstream_tx, upstream_rx) = mpsc::channel::<JsonRpcMessage>(64);
    let children = Proxy::spawn_children(&mcp_config.servers, &env, upstream_tx)?;
    info!(servers = children.len(), "Starting MCP proxy");

    let proxy = Proxy::new(children);
    proxy.run(tokio::io::stdin(), tokio::io::stdout(), upstream_rx, shutdown_signal()).await?;

    Ok(())
}

/// Environment for downstream servers: the operator's ambient environment
/// when `inherit` is set, with collected secrets layered on top.
fn build_environment(inherit: bool, secrets: HashMap<String, String>) -> HashMap<String, String> {
    let mut env: HashMap<String, String> =
        if inherit { std::env::vars().collect() } else { HashMap::new() };
    env.extend(secrets);
    env
}

async fn shutdown_signal() {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};
        let mut interrupt =
            signal(SignalKind::interrupt()).expect("interrupt handler installs on every platform");
        let mut terminate =
            signal(SignalKind::terminate()).expect("terminate handler installs on every platform");
        tokio::select! {
            _ = interrupt.recv() => {}
            _ = terminate.recv() => {}
        }
    }
    #[cfg(not(unix))]
    {
        let _ = tokio::signal::ctrl_c().await;
    }
}
