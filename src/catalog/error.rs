use thiserror::Error;

#[derive(Debug, Error)]
pub enum CatalogError {
    #[error("网络请求失败: {0}")]
    Reqwest(#[from] reqwest::Error),

    #[error("获取镜像列表失败，状态码: {0}")]
    BadStatus(reqwest::StatusCode),

    #[error("响应解析失败: {0}")]
    InvalidResponse(String),
}

impl From<serde_json::Error> for CatalogError {
    fn from(e: serde_json::Error) -> Self {
        Self::InvalidResponse(e.to_string())
    }
}

pub type Result<T> = std::result::Result<T, CatalogError>;
