use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::images::DEFAULT_IMAGE_PATH;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub host: String,
    pub port: u16,
    pub upload_dir: String,
    /// Default image directory inside exported archives.
    pub image_path: String,
    pub max_upload_bytes: u64,
    pub allowed_extensions: Vec<String>,
    pub title_timeout_secs: u64,
    pub user_agent: Option<String>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 5000,
            upload_dir: "uploads".to_string(),
            image_path: DEFAULT_IMAGE_PATH.to_string(),
            max_upload_bytes: 10 * 1024 * 1024,
            allowed_extensions: ["png", "jpg", "jpeg", "webp", "gif"]
                .iter()
                .map(|s| s.to_string())
                .collect(),
            title_timeout_secs: 15,
            user_agent: None,
        }
    }
}

impl Config {
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let mut config = if path.as_ref().exists() {
            let content = fs::read_to_string(path)
                .context("Failed to read config file")?;
            let config: Config = serde_json::from_str(&content)
                .context("Failed to parse config file")?;
            config
        } else {
            // Create default config
            let config = Config::default();
            let content = serde_json::to_string_pretty(&config)
                .context("Failed to serialize default config")?;
            fs::write(path, content)
                .context("Failed to write default config")?;
            config
        };

        if let Ok(dir) = std::env::var("QUILL_UPLOAD_DIR") {
            if !dir.trim().is_empty() {
                config.upload_dir = dir;
            }
        }

        Ok(config)
    }

    pub fn upload_root(&self) -> PathBuf {
        PathBuf::from(&self.upload_dir)
    }

    pub fn title_timeout(&self) -> Duration {
        Duration::from_secs(self.title_timeout_secs)
    }
}
