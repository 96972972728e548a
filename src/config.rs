//! Configuration loaded from `~/.config/reelcast/config.toml`.

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

use crate::compose::CompositorConfig;
use crate::pipeline::PipelineConfig;
use crate::provider::ProviderConfig;
use crate::server::ServerConfig;

/// Environment variable overriding `provider.narration_api_key`.
pub const NARRATION_KEY_ENV: &str = "REELCAST_NARRATION_API_KEY";
/// Environment variable overriding `provider.image_api_key`.
pub const IMAGE_KEY_ENV: &str = "REELCAST_IMAGE_API_KEY";

/// Top-level configuration file.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub server: ServerConfig,
    pub pipeline: PipelineConfig,
    pub provider: ProviderConfig,
    pub compositor: CompositorConfig,
}

impl Config {
    /// Load from `path`, or from the default location when `None`.
    ///
    /// A missing file yields defaults. API keys from the environment win
    /// over the file.
    ///
    /// # Errors
    ///
    /// Returns an error if the file exists but cannot be read or parsed.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let path = path.map_or_else(config_path, Path::to_path_buf);
        let mut config = if path.exists() {
            Self::from_file(&path)?
        } else {
            Self::default()
        };
        config.apply_env(|key| std::env::var(key).ok());
        Ok(config)
    }

    /// Parse a config file.
    pub fn from_file(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read {}", path.display()))?;
        toml::from_str(&content).with_context(|| format!("invalid TOML in {}", path.display()))
    }

    fn apply_env(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        if let Some(key) = lookup(NARRATION_KEY_ENV).filter(|k| !k.is_empty()) {
            self.provider.narration_api_key = Some(key);
        }
        if let Some(key) = lookup(IMAGE_KEY_ENV).filter(|k| !k.is_empty()) {
            self.provider.image_api_key = Some(key);
        }
    }
}

/// Return the path to the default config file.
#[must_use]
pub fn config_path() -> PathBuf {
    dirs::config_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("reelcast")
        .join("config.toml")
}
