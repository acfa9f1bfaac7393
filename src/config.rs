use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::debug;

use crate::downloader::DownloadConfig;

pub const DEFAULT_CONFIG_FILE: &str = "config.json";
pub const MAX_CONCURRENT_LIMIT: usize = 10;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("读取配置文件失败: {0}")]
    Io(#[from] std::io::Error),

    #[error("配置文件格式错误: {0}")]
    Parse(#[from] serde_json::Error),
}

/// 应用配置，保存为 JSON，缺失的字段取默认值
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub download_path: PathBuf,
    pub max_concurrent_downloads: usize,
    /// KB/s，`None` 表示不限速
    pub max_download_speed: Option<u64>,
    pub manufacturer_filter: String,
    pub max_retries: u32,
}

impl Default for AppConfig {
    fn default() -> Self {
        let home = dirs::home_dir().unwrap_or_else(|| PathBuf::from("."));
        Self {
            download_path: home.join("Downloads").join("ChromeOS_Recovery"),
            max_concurrent_downloads: 1,
            max_download_speed: None,
            manufacturer_filter: "ASUS".to_string(),
            max_retries: 3,
        }
    }
}

impl AppConfig {
    /// 文件不存在时返回默认配置
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        if !path.exists() {
            debug!("配置文件不存在，使用默认配置: {}", path.display());
            return Ok(Self::default());
        }

        let text = std::fs::read_to_string(path)?;
        let config: AppConfig = serde_json::from_str(&text)?;
        Ok(config.normalized())
    }

    pub fn save(&self, path: impl AsRef<Path>) -> Result<(), ConfigError> {
        let path = path.as_ref();
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(path, serde_json::to_string_pretty(self)?)?;
        debug!("配置已保存: {}", path.display());
        Ok(())
    }

    /// 并发数限制在 1..=10，限速 0 视为不限速
    pub fn normalized(mut self) -> Self {
        self.max_concurrent_downloads = self
            .max_concurrent_downloads
            .clamp(1, MAX_CONCURRENT_LIMIT);
        self.max_download_speed = self.max_download_speed.filter(|kb| *kb > 0);
        self
    }

    pub fn download_config(&self) -> DownloadConfig {
        DownloadConfig {
            max_concurrent_downloads: self.max_concurrent_downloads,
            max_download_speed: self
                .max_download_speed
                .filter(|kb| *kb > 0)
                .map(|kb| kb * 1024),
            max_retries: self.max_retries,
            ..DownloadConfig::default()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_missing_file_gives_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let config = AppConfig::load(dir.path().join("config.json")).unwrap();
        assert_eq!(config, AppConfig::default());
        assert_eq!(config.manufacturer_filter, "ASUS");
    }

    #[test]
    fn test_partial_file_keeps_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.json");
        std::fs::write(
            &path,
            r#"{"max_concurrent_downloads": 25, "max_download_speed": 0, "manufacturer_filter": "Acer"}"#,
        )
        .unwrap();

        let config = AppConfig::load(&path).unwrap();
        assert_eq!(config.max_concurrent_downloads, MAX_CONCURRENT_LIMIT);
        assert_eq!(config.max_download_speed, None);
        assert_eq!(config.manufacturer_filter, "Acer");
        assert_eq!(config.max_retries, 3);
    }

    #[test]
    fn test_save_and_reload() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("config.json");
        let config = AppConfig {
            download_path: dir.path().join("images"),
            max_concurrent_downloads: 3,
            max_download_speed: Some(512),
            manufacturer_filter: "HP".to_string(),
            max_retries: 5,
        };
        config.save(&path).unwrap();
        assert_eq!(AppConfig::load(&path).unwrap(), config);
    }

    #[test]
    fn test_download_config_converts_kb() {
        let config = AppConfig {
            max_download_speed: Some(100),
            max_concurrent_downloads: 2,
            ..Default::default()
        };
        let dl = config.download_config();
        assert_eq!(dl.max_download_speed, Some(102_400));
        assert_eq!(dl.max_concurrent_downloads, 2);
        assert_eq!(dl.chunk_size, 8192);
    }

    #[test]
    fn test_invalid_json_is_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.json");
        std::fs::write(&path, "{not json").unwrap();
        assert!(matches!(AppConfig::load(&path), Err(ConfigError::Parse(_))));
    }
}
