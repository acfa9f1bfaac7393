use std::collections::HashMap;
use std::fmt;
use std::path::{Path, PathBuf};

use serde::Serialize;

use super::layout::sanitize_folder_name;
use crate::downloader::task::DownloadTask;

/// 一个可下载的恢复镜像
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RecoveryImage {
    pub codename: String,
    pub brand_name: String,
    pub platform: String,
    pub form_factor: String,
    pub is_aue: bool, // 是否已停止更新
    pub download_url: String,
    pub version: String,
    pub milestone: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SupportStatus {
    Supported,
    Discontinued,
}

impl fmt::Display for SupportStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SupportStatus::Supported => f.write_str("Supported"),
            SupportStatus::Discontinued => f.write_str("Discontinued"),
        }
    }
}

impl RecoveryImage {
    pub fn support_status(&self) -> SupportStatus {
        if self.is_aue {
            SupportStatus::Discontinued
        } else {
            SupportStatus::Supported
        }
    }

    /// 从下载地址中取文件名（去掉查询参数），没有地址时用 `<codename>_<version>.bin`
    pub fn filename(&self) -> String {
        if self.download_url.is_empty() {
            return format!("{}_{}.bin", self.codename, self.version);
        }

        if let Ok(url) = url::Url::parse(&self.download_url) {
            if let Some(name) = url
                .path_segments()
                .and_then(|mut segments| segments.next_back())
                .filter(|name| !name.is_empty())
            {
                return name.to_string();
            }
        }

        let last = self.download_url.rsplit('/').next().unwrap_or_default();
        last.split('?').next().unwrap_or_default().to_string()
    }

    /// 保存目录: `<root>/<Supported|Discontinued>/<形态>/<品牌>`
    pub fn destination(&self, root: &Path) -> PathBuf {
        root.join(self.support_status().to_string())
            .join(sanitize_folder_name(&self.form_factor))
            .join(sanitize_folder_name(&self.brand_name))
    }

    pub fn full_path(&self, root: &Path) -> PathBuf {
        self.destination(root).join(self.filename())
    }

    pub fn is_downloaded(&self, root: &Path) -> bool {
        self.full_path(root).exists()
    }

    pub fn to_task(&self, root: &Path) -> DownloadTask {
        let metadata = HashMap::from([
            ("device".to_string(), self.brand_name.clone()),
            ("codename".to_string(), self.codename.clone()),
            ("version".to_string(), self.version.clone()),
        ]);
        DownloadTask::new(&self.download_url, self.destination(root), self.filename())
            .with_metadata(metadata)
    }
}
