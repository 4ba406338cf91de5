//! Initialize the configuration directory: create ~/.switchyard and a default config.

use anyhow::{Context, Result};
use std::path::{Path, PathBuf};

use crate::config::Config;

/// Fail unless the config file exists.
pub fn require_initialized(config_path: &Path) -> Result<()> {
    if !config_path.exists() {
        anyhow::bail!(
            "configuration not initialized; run `switchyard init` first (config file not found: {})",
            config_path.display()
        );
    }
    Ok(())
}

/// Create the config directory and write a default `config.json` if missing.
/// The written file lists every section with its default so it can be edited in place.
pub fn init_config_dir(config_path: &Path) -> Result<PathBuf> {
    let config_dir = config_path
        .parent()
        .filter(|p| !p.as_os_str().is_empty())
        .unwrap_or_else(|| Path::new("."));
    std::fs::create_dir_all(config_dir)
        .with_context(|| format!("creating config directory {}", config_dir.display()))?;

    if !config_path.exists() {
        let default_config = serde_json::to_string_pretty(&Config::default())
            .context("serializing default config")?;
        std::fs::write(config_path, default_config)
            .with_context(|| format!("writing default config to {}", config_path.display()))?;
        log::info!("created default config at {}", config_path.display());
    } else {
        log::debug!("config already exists at {}, skipping", config_path.display());
    }

    Ok(config_dir.to_path_buf())
}
