pub mod link_config;
pub mod speech_config;

use std::path::{Path, PathBuf};

use anyhow::Result;
use log::{error, info, warn};
use serde::{Deserialize, Serialize};
use tokio::fs;

use crate::config::link_config::LinkConfig;
use crate::config::speech_config::SpeechConfig;
use crate::utils::ensure_directory_exists;

const CONFIG_FILE_NAME: &str = "headset_link_config.json";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub link: LinkConfig,
    pub speech: SpeechConfig,
    /// Default log level, overridden by `RUST_LOG`.
    pub log_level: String,
}

impl Default for AppConfig {
    fn default() -> Self {
        AppConfig {
            link: LinkConfig::default(),
            speech: SpeechConfig::default(),
            log_level: "info".to_string(),
        }
    }
}

impl AppConfig {
    /// Path of the config file inside `config_dir`
    pub fn file_path(config_dir: &Path) -> PathBuf {
        config_dir.join(CONFIG_FILE_NAME)
    }

    /// Reads the config file without logging. `None` when it does not exist
    /// yet, so callers can pick the log level before reporting.
    pub async fn read_config(config_dir: &Path) -> Result<Option<Self>> {
        let file_path = Self::file_path(config_dir);
        if !file_path.exists() {
            return Ok(None);
        }
        let config_json = fs::read_to_string(&file_path).await?;
        Ok(Some(serde_json::from_str(&config_json)?))
    }

    /// Loads the config from `config_dir`, falling back to defaults when the
    /// file does not exist yet.
    pub async fn load_config(config_dir: &Path) -> Result<Self> {
        let file_path_str = Self::file_path(config_dir).to_string_lossy().into_owned();
        match Self::read_config(config_dir).await? {
            Some(config) => {
                info!("Config loaded from {:?}", file_path_str);
                Ok(config)
            }
            None => {
                warn!(
                    "Config file not found at {:?}, using default.",
                    file_path_str
                );
                Ok(Self::default())
            }
        }
    }

    /// Saves the current config to `config_dir`, creating it if needed.
    pub async fn save_config(&self, config_dir: &Path) -> Result<()> {
        ensure_directory_exists(config_dir).await?;

        let file_path = config_dir.join(CONFIG_FILE_NAME);
        let file_path_str = file_path.to_string_lossy().into_owned();

        let config_json = match serde_json::to_string_pretty(&self) {
            Ok(json) => json,
            Err(e) => {
                error!("Failed to serialize config to JSON: {}", e);
                return Err(e.into());
            }
        };

        fs::write(&file_path, config_json).await?;

        info!("Config saved to {:?}.", file_path_str);
        Ok(())
    }
}
