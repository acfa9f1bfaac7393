use std::collections::HashMap;
use std::ffi::OsString;
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Mutex, MutexGuard};

use serde::Serialize;
use tokio::sync::Notify;
use uuid::Uuid;

#[derive(Debug, Clone, Copy, Serialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum TaskStatus {
    Queued,
    Downloading,
    Paused,
    Completed,
    Error,
    Stopped,
}

impl TaskStatus {
    /// 终态：不会再发生任何状态转换
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            TaskStatus::Completed | TaskStatus::Error | TaskStatus::Stopped
        )
    }
}

impl fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            TaskStatus::Queued => "queued",
            TaskStatus::Downloading => "downloading",
            TaskStatus::Paused => "paused",
            TaskStatus::Completed => "completed",
            TaskStatus::Error => "error",
            TaskStatus::Stopped => "stopped",
        };
        f.write_str(s)
    }
}

// 任务的实时进度，由下载协程写入，其他线程随时读取
#[derive(Debug, Clone)]
pub(crate) struct TaskProgress {
    pub status: TaskStatus,
    pub downloaded_size: u64,
    pub total_size: u64,
    pub progress: f64,
    pub download_speed: u64,
    pub eta: u64,
    pub error_message: String,
    pub retry_count: u32,
}

impl Default for TaskProgress {
    fn default() -> Self {
        Self {
            status: TaskStatus::Queued,
            downloaded_size: 0,
            total_size: 0,
            progress: 0.0,
            download_speed: 0,
            eta: 0,
            error_message: String::new(),
            retry_count: 0,
        }
    }
}

/// 某一时刻任务状态的只读拷贝，供界面展示使用
#[derive(Debug, Clone, Serialize)]
pub struct TaskSnapshot {
    pub id: Uuid,
    pub url: String,
    pub filename: String,
    pub full_path: PathBuf,
    pub status: TaskStatus,
    pub downloaded_size: u64,
    pub total_size: u64,
    pub progress: f64,
    pub download_speed: u64,
    pub eta: u64,
    pub error_message: String,
    pub retry_count: u32,
}

/// 一个下载任务
///
/// 身份信息（URL、目录、文件名）创建后不可变；进度字段放在任务自己的锁里，
/// 暂停/停止标志是原子量，下载协程在每个分块处检查。
#[derive(Debug)]
pub struct DownloadTask {
    id: Uuid,
    url: String,
    destination: PathBuf,
    filename: String,
    metadata: HashMap<String, String>,
    state: Mutex<TaskProgress>,
    paused: AtomicBool,
    stopped: AtomicBool,
    control: Notify,
    // 上一个下载协程是否还没退出（重试退避期间任务已是 Queued）
    worker_attached: AtomicBool,
}

impl DownloadTask {
    pub fn new(
        url: impl Into<String>,
        destination: impl Into<PathBuf>,
        filename: impl Into<String>,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            url: url.into(),
            destination: destination.into(),
            filename: filename.into(),
            metadata: HashMap::new(),
            state: Mutex::new(TaskProgress::default()),
            paused: AtomicBool::new(false),
            stopped: AtomicBool::new(false),
            control: Notify::new(),
            worker_attached: AtomicBool::new(false),
        }
    }

    pub fn with_metadata(mut self, metadata: HashMap<String, String>) -> Self {
        self.metadata = metadata;
        self
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    pub fn destination(&self) -> &Path {
        &self.destination
    }

    pub fn filename(&self) -> &str {
        &self.filename
    }

    pub fn metadata(&self) -> &HashMap<String, String> {
        &self.metadata
    }

    pub fn full_path(&self) -> PathBuf {
        self.destination.join(&self.filename)
    }

    /// 断点续传用的临时文件：`<full_path>.tmp`
    pub fn temp_path(&self) -> PathBuf {
        let mut path: OsString = self.full_path().into_os_string();
        path.push(".tmp");
        PathBuf::from(path)
    }

    /// 目标位置已经存在一个普通文件
    pub fn already_exists(&self) -> bool {
        self.full_path().is_file()
    }

    pub fn status(&self) -> TaskStatus {
        self.state().status
    }

    pub fn downloaded_size(&self) -> u64 {
        self.state().downloaded_size
    }

    pub fn total_size(&self) -> u64 {
        self.state().total_size
    }

    pub fn progress(&self) -> f64 {
        self.state().progress
    }

    pub fn download_speed(&self) -> u64 {
        self.state().download_speed
    }

    pub fn eta(&self) -> u64 {
        self.state().eta
    }

    pub fn error_message(&self) -> String {
        self.state().error_message.clone()
    }

    pub fn retry_count(&self) -> u32 {
        self.state().retry_count
    }

    pub fn is_paused(&self) -> bool {
        self.paused.load(Ordering::SeqCst)
    }

    pub fn is_stopped(&self) -> bool {
        self.stopped.load(Ordering::SeqCst)
    }

    pub fn snapshot(&self) -> TaskSnapshot {
        let state = self.state();
        TaskSnapshot {
            id: self.id,
            url: self.url.clone(),
            filename: self.filename.clone(),
            full_path: self.full_path(),
            status: state.status,
            downloaded_size: state.downloaded_size,
            total_size: state.total_size,
            progress: state.progress,
            download_speed: state.download_speed,
            eta: state.eta,
            error_message: state.error_message.clone(),
            retry_count: state.retry_count,
        }
    }

    // 锁只保护几个标量，中毒时直接沿用里面的数据
    fn state(&self) -> MutexGuard<'_, TaskProgress> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    pub(crate) fn update<R>(&self, f: impl FnOnce(&mut TaskProgress) -> R) -> R {
        f(&mut self.state())
    }

    pub(crate) fn set_status(&self, status: TaskStatus) {
        self.update(|s| s.status = status);
    }

    pub(crate) fn request_pause(&self) {
        self.paused.store(true, Ordering::SeqCst);
        self.control.notify_waiters();
    }

    pub(crate) fn request_resume(&self) {
        self.paused.store(false, Ordering::SeqCst);
        self.control.notify_waiters();
    }

    pub(crate) fn request_stop(&self) {
        self.stopped.store(true, Ordering::SeqCst);
        self.control.notify_waiters();
    }

    /// 阻塞直到暂停标志被清除或任务被停止
    pub(crate) async fn wait_while_paused(&self) {
        loop {
            // 先注册通知再检查标志，避免错过 notify_waiters
            let notified = self.control.notified();
            if !self.is_paused() || self.is_stopped() {
                return;
            }
            notified.await;
        }
    }

    pub(crate) fn worker_attached(&self) -> bool {
        self.worker_attached.load(Ordering::SeqCst)
    }

    pub(crate) fn set_worker_attached(&self, attached: bool) {
        self.worker_attached.store(attached, Ordering::SeqCst);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_paths() {
        let task = DownloadTask::new("https://example.com/a.bin.zip", "/tmp/out", "a.bin.zip");
        assert_eq!(task.full_path(), PathBuf::from("/tmp/out/a.bin.zip"));
        assert_eq!(task.temp_path(), PathBuf::from("/tmp/out/a.bin.zip.tmp"));
        assert_eq!(task.status(), TaskStatus::Queued);
        assert_eq!(task.progress(), 0.0);
    }

    #[test]
    fn test_already_exists_only_for_regular_files() {
        let dir = tempfile::tempdir().unwrap();
        // 同名目录不算已下载
        std::fs::create_dir(dir.path().join("image.bin")).unwrap();
        let task = DownloadTask::new("http://localhost/image.bin", dir.path(), "image.bin");
        assert!(!task.already_exists());

        std::fs::write(dir.path().join("other.bin"), b"x").unwrap();
        let task = DownloadTask::new("http://localhost/other.bin", dir.path(), "other.bin");
        assert!(task.already_exists());
    }

    #[test]
    fn test_terminal_status() {
        assert!(TaskStatus::Completed.is_terminal());
        assert!(TaskStatus::Error.is_terminal());
        assert!(TaskStatus::Stopped.is_terminal());
        assert!(!TaskStatus::Paused.is_terminal());
        assert_eq!(TaskStatus::Downloading.to_string(), "downloading");
    }

    #[tokio::test]
    async fn test_wait_while_paused_wakes_on_resume() {
        let task = std::sync::Arc::new(DownloadTask::new("u", "/tmp", "f"));
        task.request_pause();

        let waiter = {
            let task = task.clone();
            tokio::spawn(async move { task.wait_while_paused().await })
        };
        tokio::time::sleep(std::time::Duration::from_millis(50)).await;
        assert!(!waiter.is_finished());

        task.request_resume();
        tokio::time::timeout(std::time::Duration::from_secs(1), waiter)
            .await
            .expect("恢复后应当被唤醒")
            .unwrap();
    }
}
