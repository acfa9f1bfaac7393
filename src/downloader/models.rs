use tokio::time::Duration;

/// 下载管理器的参数
///
/// 并发数、限速和重试次数可以通过 `DownloadManager::update_limits` 在运行中修改，
/// 其余参数在管理器创建后固定。
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct DownloadConfig {
    pub max_concurrent_downloads: usize,
    /// 所有任务合计的速度上限（字节/秒），`None` 表示不限速
    pub max_download_speed: Option<u64>,
    pub max_retries: u32,
    pub retry_delay: Duration,
    pub chunk_size: usize,
    /// 两次进度回调之间的最小间隔
    pub update_interval: Duration,
    pub connect_timeout: Duration,
    pub read_timeout: Duration,
}

impl Default for DownloadConfig {
    fn default() -> Self {
        Self {
            max_concurrent_downloads: 1,
            max_download_speed: None,
            max_retries: 3,
            retry_delay: Duration::from_secs(2),
            chunk_size: 8192,
            update_interval: Duration::from_millis(500),
            connect_timeout: Duration::from_secs(30),
            read_timeout: Duration::from_secs(60),
        }
    }
}
