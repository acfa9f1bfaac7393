use std::path::PathBuf;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum DownloadError {
    #[error("HTTP错误: {0}")]
    HttpError(#[from] reqwest::Error),

    #[error("IO错误: {0}")]
    IoError(#[from] std::io::Error),

    #[error("HTTP 请求失败，状态码: {0}")]
    BadStatus(reqwest::StatusCode),

    #[error("服务器拒绝了断点续传范围，临时文件已丢弃")]
    RangeNotSatisfiable,

    #[error("无法创建目标目录 {path}: {source}")]
    CreateDir {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("下载已被用户停止")]
    Stopped,

    #[error("任务已存在: {0}")]
    TaskAlreadyExists(String),
}

impl DownloadError {
    /// 用户主动停止不算失败，不参与重试
    pub fn is_user_stop(&self) -> bool {
        matches!(self, DownloadError::Stopped)
    }
}

pub type Result<T> = std::result::Result<T, DownloadError>;
