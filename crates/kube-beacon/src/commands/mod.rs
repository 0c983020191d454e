//! CLI command implementations.

use anyhow::{Context, Result};

use kube_beacon::config::Config;

pub mod doctor;
pub mod run;

/// Load the config file and apply `KUBE_BEACON_*` environment overrides.
pub async fn load_config(config_path: &str) -> Result<Config> {
    let mut config = Config::load(config_path)
        .await
        .with_context(|| format!("Failed to load config '{config_path}'"))?;
    config.apply_env();
    Ok(config)
}
