mod types;

pub use types::*;

use anyhow::{Context, Result};
use std::path::{Path, PathBuf};

/// Locations searched when no config path is given, in order.
pub const DEFAULT_CONFIG_PATHS: [&str; 2] = ["./vidshrink.toml", "~/.config/vidshrink/config.toml"];

/// Load configuration from a TOML file
pub fn load_config(path: &Path) -> Result<Config> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file: {:?}", path))?;

    parse_config(&content).with_context(|| format!("Invalid config file: {:?}", path))
}

/// Parse and validate configuration text
pub fn parse_config(content: &str) -> Result<Config> {
    let config: Config = toml::from_str(content).context("Failed to parse TOML")?;
    validate_config(&config)?;
    Ok(config)
}

/// First default location that exists
pub fn find_default_config() -> Option<PathBuf> {
    DEFAULT_CONFIG_PATHS.iter().find_map(|path_str| {
        let path = PathBuf::from(shellexpand::tilde(path_str).as_ref());
        path.exists().then_some(path)
    })
}

/// Load config from default locations or return default config
pub fn load_config_or_default(custom_path: Option<&Path>) -> Result<Config> {
    if let Some(path) = custom_path {
        return load_config(path);
    }

    match find_default_config() {
        Some(path) => {
            tracing::debug!("Using config file {:?}", path);
            load_config(&path)
        }
        None => Ok(Config::default()),
    }
}

/// Validate configuration
pub fn validate_config(config: &Config) -> Result<()> {
    let target = &config.target;
    if target.width == 0 || target.height == 0 {
        anyhow::bail!("Target dimensions must be non-zero");
    }
    if target.height > target.width {
        anyhow::bail!(
            "Target height ({}) is the shorter edge and cannot exceed width ({})",
            target.height,
            target.width
        );
    }
    if target.bitrate == 0 {
        anyhow::bail!("Target bitrate cannot be 0");
    }
    if target.frame_rate == 0 {
        anyhow::bail!("Target frame rate cannot be 0");
    }
    if !target.mime.starts_with("video/") {
        anyhow::bail!("Target mime '{}' is not a video type", target.mime);
    }

    if config.pipeline.progress_interval == 0 {
        anyhow::bail!("Pipeline progress_interval cannot be 0");
    }
    if config.pipeline.backoff_ms > 1000 {
        tracing::warn!(
            "Pipeline backoff of {}ms will make transcodes very slow",
            config.pipeline.backoff_ms
        );
    }

    Ok(())
}
