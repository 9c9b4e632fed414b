use crate::paths::AppPaths;
use crate::{EngineError, Result};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

pub const DEFAULT_OUTPUT_TEMPLATE: &str = "%(title)s.%(ext)s";

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DownloaderConfig {
    /// Destination directory override; the platform Downloads folder when unset.
    #[serde(default)]
    pub download_dir: Option<PathBuf>,
    /// yt-dlp output template override.
    #[serde(default)]
    pub output_template: Option<String>,
}

impl Default for DownloaderConfig {
    fn default() -> Self {
        Self {
            download_dir: None,
            output_template: None,
        }
    }
}

impl DownloaderConfig {
    pub fn effective_download_dir(&self) -> PathBuf {
        match &self.download_dir {
            Some(dir) => dir.clone(),
            None => AppPaths::default_download_dir(),
        }
    }

    pub fn effective_output_template(&self) -> String {
        match &self.output_template {
            Some(template) if !template.trim().is_empty() => template.clone(),
            _ => DEFAULT_OUTPUT_TEMPLATE.to_string(),
        }
    }
}

pub fn load_downloader_config(paths: &AppPaths) -> Result<DownloaderConfig> {
    let path = paths.config_path();
    if !path.exists() {
        return Ok(DownloaderConfig::default());
    }
    let bytes = std::fs::read(&path)?;
    let parsed: DownloaderConfig = serde_json::from_slice(&bytes).map_err(|e| {
        EngineError::ConfigInvalid(format!(
            "failed to parse downloader config at {}: {e}",
            path.to_string_lossy()
        ))
    })?;
    Ok(parsed)
}

pub fn save_downloader_config(paths: &AppPaths, config: &DownloaderConfig) -> Result<()> {
    let path = paths.config_path();
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    let json = serde_json::to_string_pretty(config)?;
    std::fs::write(&path, format!("{json}\n"))?;
    Ok(())
}
