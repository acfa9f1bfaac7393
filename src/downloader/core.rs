use std::path::Path;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, RwLock};

use futures::StreamExt;
use reqwest::StatusCode;
use reqwest::header::RANGE;
use tokio::fs::{File, OpenOptions};
use tokio::io::AsyncWriteExt;
use tokio::time::{Duration, Instant};
use tracing::{debug, error, info, warn};

use super::error::{DownloadError, Result};
use super::limiter::SpeedLimiter;
use super::models::DownloadConfig;
use super::observer::{CompletionObserver, UpdateObserver};
use super::task::{DownloadTask, TaskStatus};

/// 下载协程共享的部分：HTTP 客户端、限速器、回调和重试参数
pub(crate) struct DownloadCore {
    client: reqwest::Client,
    limiter: SpeedLimiter,
    max_retries: AtomicU32,
    retry_delay: Duration,
    chunk_size: usize,
    update_interval: Duration,
    update_observer: RwLock<Option<Arc<dyn UpdateObserver>>>,
    completion_observer: RwLock<Option<Arc<dyn CompletionObserver>>>,
}

impl DownloadCore {
    pub fn new(config: &DownloadConfig) -> Result<Self> {
        let client = reqwest::Client::builder()
            .connect_timeout(config.connect_timeout)
            .read_timeout(config.read_timeout)
            .redirect(reqwest::redirect::Policy::limited(10))
            .user_agent(concat!("recoverydl/", env!("CARGO_PKG_VERSION")))
            .build()?;

        Ok(Self {
            client,
            limiter: SpeedLimiter::new(config.max_download_speed),
            max_retries: AtomicU32::new(config.max_retries),
            retry_delay: config.retry_delay,
            chunk_size: config.chunk_size.max(1),
            update_interval: config.update_interval,
            update_observer: RwLock::new(None),
            completion_observer: RwLock::new(None),
        })
    }

    pub fn limiter(&self) -> &SpeedLimiter {
        &self.limiter
    }

    pub fn max_retries(&self) -> u32 {
        self.max_retries.load(Ordering::SeqCst)
    }

    pub fn set_max_retries(&self, max_retries: u32) {
        self.max_retries.store(max_retries, Ordering::SeqCst);
    }

    pub fn set_update_observer(&self, observer: Arc<dyn UpdateObserver>) {
        *self
            .update_observer
            .write()
            .unwrap_or_else(|e| e.into_inner()) = Some(observer);
    }

    pub fn set_completion_observer(&self, observer: Arc<dyn CompletionObserver>) {
        *self
            .completion_observer
            .write()
            .unwrap_or_else(|e| e.into_inner()) = Some(observer);
    }

    pub fn notify_update(&self) {
        // 先克隆出来再调用，回调里可以重新注册
        let observer = self
            .update_observer
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .clone();
        if let Some(observer) = observer {
            observer.on_update();
        }
    }

    fn notify_complete(&self, task: &Arc<DownloadTask>) {
        let observer = self
            .completion_observer
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .clone();
        if let Some(observer) = observer {
            observer.on_complete(task);
        }
    }

    /// 执行一次下载尝试，所有错误都在这里转换成任务状态
    pub async fn run(&self, task: &Arc<DownloadTask>) {
        info!(
            "开始下载任务: {} -> {}",
            task.filename(),
            task.full_path().display()
        );

        match self.download(task).await {
            Ok(()) => {
                task.update(|s| {
                    s.status = TaskStatus::Completed;
                    s.progress = 100.0;
                    s.eta = 0;
                    s.error_message.clear();
                    if s.total_size == 0 {
                        s.total_size = s.downloaded_size;
                    }
                });
                info!("✅ 下载任务完成: {}", task.filename());
                self.notify_complete(task);
            }
            Err(e) => self.handle_failure(task, e).await,
        }
    }

    async fn download(&self, task: &DownloadTask) -> Result<()> {
        let temp_path = task.temp_path();

        // 临时文件的大小就是断点
        let mut start_byte = match tokio::fs::metadata(&temp_path).await {
            Ok(meta) if meta.is_file() => meta.len(),
            _ => 0,
        };
        task.update(|s| {
            s.downloaded_size = start_byte;
            s.download_speed = 0;
            s.eta = 0;
        });

        let mut request = self.client.get(task.url());
        if start_byte > 0 {
            debug!("从第 {} 字节继续下载: {}", start_byte, task.filename());
            request = request.header(RANGE, format!("bytes={}-", start_byte));
        }

        let response = request.send().await?;
        match response.status() {
            StatusCode::PARTIAL_CONTENT => {}
            StatusCode::OK => {
                if start_byte > 0 {
                    // 服务器忽略了 Range，直接追加会把文件写坏
                    warn!("服务器不支持断点续传，从头开始下载: {}", task.filename());
                    start_byte = 0;
                    task.update(|s| s.downloaded_size = 0);
                }
            }
            StatusCode::RANGE_NOT_SATISFIABLE => {
                remove_if_exists(&temp_path).await?;
                task.update(|s| s.downloaded_size = 0);
                return Err(DownloadError::RangeNotSatisfiable);
            }
            status => return Err(DownloadError::BadStatus(status)),
        }

        let total_size = response
            .content_length()
            .map(|len| start_byte + len)
            .unwrap_or(0);
        task.update(|s| {
            s.total_size = total_size;
            s.progress = percent(s.downloaded_size, total_size);
        });

        let mut options = OpenOptions::new();
        options.create(true);
        if start_byte > 0 {
            options.append(true);
        } else {
            options.write(true).truncate(true);
        }
        let mut file = options.open(&temp_path).await?;

        // 无论成功与否都要落盘，临时文件大小必须和 downloaded_size 一致
        let streamed = self.stream_body(task, response, &mut file).await;
        let flushed = file.flush().await;
        drop(file);
        streamed?;
        flushed?;

        let full_path = task.full_path();
        remove_if_exists(&full_path).await?;
        tokio::fs::rename(&temp_path, &full_path).await?;
        Ok(())
    }

    async fn stream_body(
        &self,
        task: &DownloadTask,
        response: reqwest::Response,
        file: &mut File,
    ) -> Result<()> {
        let mut stream = response.bytes_stream();
        let started = Instant::now();
        let mut last_update = started;
        let mut received = 0u64;

        while let Some(bytes) = stream.next().await {
            let bytes = bytes?;
            for chunk in bytes.chunks(self.chunk_size) {
                self.checkpoint(task).await?;

                file.write_all(chunk).await?;
                received += chunk.len() as u64;

                let now = Instant::now();
                let elapsed = now.duration_since(started).as_secs_f64();
                task.update(|s| {
                    s.downloaded_size += chunk.len() as u64;
                    if s.total_size > 0 && s.downloaded_size > s.total_size {
                        s.total_size = s.downloaded_size;
                    }
                    s.progress = percent(s.downloaded_size, s.total_size);
                    if elapsed > 0.0 {
                        s.download_speed = (received as f64 / elapsed) as u64;
                        if s.download_speed > 0 && s.total_size > 0 {
                            s.eta = (s.total_size - s.downloaded_size) / s.download_speed;
                        }
                    }
                });

                if now.duration_since(last_update) >= self.update_interval {
                    self.notify_update();
                    last_update = now;
                }

                self.limiter.acquire(chunk.len()).await;
            }
        }

        Ok(())
    }

    // 每个分块写入前检查停止/暂停
    async fn checkpoint(&self, task: &DownloadTask) -> Result<()> {
        if task.is_stopped() {
            return Err(DownloadError::Stopped);
        }

        if task.is_paused() {
            task.set_status(TaskStatus::Paused);
            info!("⏸️ 下载已暂停: {}", task.filename());
            self.notify_update();

            task.wait_while_paused().await;
            if task.is_stopped() {
                return Err(DownloadError::Stopped);
            }

            task.set_status(TaskStatus::Downloading);
            info!("▶️ 下载已恢复: {}", task.filename());
            self.notify_update();
        }

        Ok(())
    }

    async fn handle_failure(&self, task: &DownloadTask, err: DownloadError) {
        let message = err.to_string();

        if err.is_user_stop() || task.is_stopped() {
            task.update(|s| {
                s.status = TaskStatus::Stopped;
                s.error_message = DownloadError::Stopped.to_string();
                s.download_speed = 0;
                s.eta = 0;
            });
            info!("⏹️ 下载已停止，保留临时文件: {}", task.filename());
            return;
        }

        let max_retries = self.max_retries();
        let retry = task.update(|s| {
            s.error_message = message.clone();
            s.download_speed = 0;
            s.eta = 0;
            if s.retry_count < max_retries {
                s.retry_count += 1;
                s.status = TaskStatus::Queued;
                Some(s.retry_count)
            } else {
                s.status = TaskStatus::Error;
                None
            }
        });

        match retry {
            Some(attempt) => {
                warn!(
                    "⚠️ 下载失败，将进行第 {}/{} 次重试: {}, 错误: {}",
                    attempt,
                    max_retries,
                    task.filename(),
                    message
                );
                self.notify_update();
                tokio::time::sleep(self.retry_delay).await;
            }
            None => {
                error!("❌ 下载任务失败: {}, 错误: {}", task.filename(), message);
                if let Err(e) = remove_if_exists(&task.temp_path()).await {
                    debug!("删除临时文件失败: {}", e);
                }
            }
        }
    }
}

fn percent(downloaded: u64, total: u64) -> f64 {
    if total == 0 {
        0.0
    } else {
        (downloaded as f64 / total as f64 * 100.0).min(100.0)
    }
}

async fn remove_if_exists(path: &Path) -> std::io::Result<()> {
    match tokio::fs::remove_file(path).await {
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
        other => other,
    }
}
