//! Config command handlers.

use anyhow::{Context, Result};
use vigil_core::config::{self, Config};

pub fn path() {
    println!("{}", config::paths::config_path().display());
}

pub fn init() -> Result<()> {
    let config_path = config::paths::config_path();
    Config::init(&config_path)
        .with_context(|| format!("init config at {}", config_path.display()))?;
    println!("Created config at {}", config_path.display());
    Ok(())
}

pub fn show() -> Result<()> {
    let mut config = Config::load().context("load config")?;
    if config.feed.token.is_some() {
        config.feed.token = Some("<redacted>".to_string());
    }
    let toml = toml::to_string_pretty(&config).context("render config")?;
    print!("{toml}");
    Ok(())
}
