//! # Command Line Interface
//!
//! Subcommands for collecting secrets and delivering them: exec into a
//! child process (`run`), print masked (`show`), export (`env`, `sh`),
//! serve as an MCP proxy (`mcp`), and manage the cache and stored tokens.

pub mod auth;
pub mod cache_cmd;
pub mod env_cmd;
pub mod mcp;
pub mod run;
pub mod show;

use crate::config::Config;
use crate::secrets::Collector;
use clap::{Parser, Subcommand, ValueEnum};
use std::path::PathBuf;
use tracing_subscriber::{EnvFilter, FmtSubscriber};

#[derive(Parser)]
#[command(name = "sstart")]
#[command(about = "Collect secrets from configured providers and inject them into processes")]
#[command(version = env!("CARGO_PKG_VERSION"))]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,

    /// Path to the configuration file
    #[arg(short, long, global = true, default_value = crate::config::DEFAULT_CONFIG_FILE)]
    pub config: PathBuf,

    /// Comma-separated provider ids to collect from (default: all, in
    /// declaration order)
    #[arg(long, global = true, value_delimiter = ',')]
    pub providers: Vec<String>,

    /// Force a fresh OIDC exchange, ignoring stored tokens
    #[arg(long, global = true)]
    pub force_auth: bool,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    pub verbose: bool,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Run a command with collected secrets injected into its environment
    Run {
        /// Start from an empty environment instead of inheriting
        #[arg(long)]
        reset: bool,

        /// The command to execute, after `--`
        #[arg(last = true, required = true)]
        command: Vec<String>,
    },

    /// Print collected secrets with masked values
    Show,

    /// Export collected secrets in a machine-readable format
    Env {
        /// Output format
        #[arg(long, value_enum, default_value = "shell")]
        format: EnvFormat,
    },

    /// Emit shell export lines (shorthand for `env --format shell`)
    Sh,

    /// Run as an MCP proxy, injecting secrets into downstream servers
    Mcp,

    /// Secret cache maintenance
    Cache {
        #[command(subcommand)]
        command: cache_cmd::CacheCommands,
    },

    /// OIDC token management
    Auth {
        #[command(subcommand)]
        command: auth::AuthCommands,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum EnvFormat {
    Shell,
    Json,
    Yaml,
}

/// Parse arguments and dispatch
pub async fn run_cli() -> anyhow::Result<()> {
    let cli = Cli::parse();

    initialise_logging(cli.verbose)?;

    match cli.command {
        Commands::Run { reset, ref command } => {
            let collector = build_collector(&cli)?;
            run::handle_run(&collector, &cli.providers, reset, &command).await
        }
        Commands::Show => {
            let collector = build_collector(&cli)?;
            show::handle_show(&collector, &cli.providers).await
        }
        Commands::Env { format } => {
            let collector = build_collector(&cli)?;
            env_cmd::handle_env(&collector, &cli.providers, format).await
        }
        Commands::Sh => {
            let collector = build_collector(&cli)?;
            env_cmd::handle_env(&collector, &cli.providers, EnvFormat::Shell).await
        }
        Commands::Mcp => {
            let config = Config::load(&cli.config)?;
            let collector =
                Collector::new(config.clone()).with_force_auth(cli.force_auth);
            mcp::handle_mcp(&config, &collector, &cli.providers).await
        }
        Commands::Cache { command } => cache_cmd::handle_cache_command(command).await,
        Commands::Auth { command } => {
            let config = Config::load(&cli.config)?;
            auth::handle_auth_command(command, &config).await
        }
    }
}

fn build_collector(cli: &Cli) -> anyhow::Result<Collector> {
    let config = Config::load(&cli.config)?;
    Ok(Collector::new(config).with_force_auth(cli.force_auth))
}

/// Logs go to stderr so stdout stays clean for `env`, `sh`, and the MCP
/// wire protocol.
fn initialise_logging(verbose: bool) -> anyhow::Result<()> {
    let default_level = if verbose { "sstart=debug" } else { "sstart=info" };
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(default_level));

    if tracing::subscriber::set_global_default(
        FmtSubscriber::builder().with_env_filter(filter).with_writer(std::io::stderr).finish(),
    )
    .is_err()
    {
        // Subscriber already set elsewhere (e.g. integration tests); ignore.
    }
    Ok(())
}
