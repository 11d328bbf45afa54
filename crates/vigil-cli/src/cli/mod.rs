//! CLI entry and dispatch.

use anyhow::{Context, Result};
use clap::Parser;
use vigil_core::config::{Config, FeedSettings};

mod commands;

#[derive(Parser)]
#[command(name = "vigil")]
#[command(version = "0.1")]
#[command(about = "Live activity watcher for AI agent fleets")]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Override the feed URL from config
    #[arg(long, global = true, value_name = "URL")]
    url: Option<String>,

    /// Override the feed token from config (VIGIL_FEED_TOKEN also works)
    #[arg(long, global = true, value_name = "TOKEN")]
    token: Option<String>,
}

#[derive(clap::Subcommand)]
enum Commands {
    /// Follow the feed and print activity transitions
    Tail {
        /// Print whole snapshots as JSON lines instead of transitions
        #[arg(long)]
        json: bool,
    },
    /// Live terminal dashboard of agent activity
    Monitor,
    /// Manage configuration
    Config {
        #[command(subcommand)]
        command: ConfigCommands,
    },
}

#[derive(clap::Subcommand)]
enum ConfigCommands {
    /// Print the config file location
    Path,
    /// Write a commented starter config
    Init,
    /// Print the effective configuration (token redacted)
    Show,
}

pub fn run() -> Result<()> {
    let Cli {
        command,
        url,
        token,
    } = Cli::parse();

    match command {
        Commands::Config { command } => match command {
            ConfigCommands::Path => {
                commands::config::path();
                Ok(())
            }
            ConfigCommands::Init => commands::config::init(),
            ConfigCommands::Show => commands::config::show(),
        },
        Commands::Tail { json } => {
            let (config, settings) = load_settings(url.as_deref(), token.as_deref())?;
            crate::logging::init_stderr();

            let rt = tokio::runtime::Runtime::new().context("create tokio runtime")?;
            rt.block_on(commands::tail::run(&config, settings, json))
        }
        Commands::Monitor => {
            let (config, settings) = load_settings(url.as_deref(), token.as_deref())?;
            commands::monitor::run(&config, settings)
        }
    }
}

fn load_settings(
    url_override: Option<&str>,
    token_override: Option<&str>,
) -> Result<(Config, FeedSettings)> {
    let config = Config::load().context("load config")?;
    let settings = FeedSettings::resolve(&config, url_override, token_override)?;
    Ok((config, settings))
}
