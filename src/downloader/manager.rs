use std::panic::AssertUnwindSafe;
use std::sync::{Arc, Mutex, MutexGuard};

use futures::FutureExt;
use tokio::sync::Notify;
use tracing::{debug, error, info};
use uuid::Uuid;

use super::core::DownloadCore;
use super::error::{DownloadError, Result};
use super::models::DownloadConfig;
use super::observer::{CompletionObserver, UpdateObserver};
use super::task::{DownloadTask, TaskSnapshot, TaskStatus};

/// 下载调度器
///
/// 持有任务列表（按提交顺序，从不重排），限制同时运行的下载协程数量。
/// 空出名额时总是挑选列表中第一个排队的任务。
#[derive(Clone)]
pub struct DownloadManager {
    core: Arc<DownloadCore>,
    scheduler: Arc<Mutex<Scheduler>>,
    idle: Arc<Notify>,
}

struct Scheduler {
    tasks: Vec<Arc<DownloadTask>>,
    active: usize,
    max_concurrent: usize,
}

impl DownloadManager {
    pub fn new(config: DownloadConfig) -> Result<Self> {
        Ok(Self {
            core: Arc::new(DownloadCore::new(&config)?),
            scheduler: Arc::new(Mutex::new(Scheduler {
                tasks: Vec::new(),
                active: 0,
                max_concurrent: config.max_concurrent_downloads.max(1),
            })),
            idle: Arc::new(Notify::new()),
        })
    }

    // 临界区里不做任何 await
    fn scheduler(&self) -> MutexGuard<'_, Scheduler> {
        self.scheduler.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// 注册进度回调，替换之前注册的回调
    pub fn set_update_callback(&self, observer: impl UpdateObserver + 'static) {
        self.core.set_update_observer(Arc::new(observer));
    }

    /// 注册完成回调，替换之前注册的回调
    pub fn set_completion_callback(&self, observer: impl CompletionObserver + 'static) {
        self.core.set_completion_observer(Arc::new(observer));
    }

    /// 运行中修改并发数、总限速和重试次数
    ///
    /// 并发数在下一次调度时生效，调大会立即启动排队的任务；限速从下一个分块开始生效；
    /// 重试次数在下一次失败时生效。
    pub fn update_limits(
        &self,
        max_concurrent_downloads: usize,
        max_download_speed: Option<u64>,
        max_retries: u32,
    ) {
        {
            let mut scheduler = self.scheduler();
            scheduler.max_concurrent = max_concurrent_downloads.max(1);
        }
        self.core.limiter().set_rate(max_download_speed);
        self.core.set_max_retries(max_retries);
        info!(
            "下载参数已更新: 并发 {}, 限速 {:?} B/s, 重试 {}",
            max_concurrent_downloads, max_download_speed, max_retries
        );
        self.admit_next();
    }

    /// 添加下载任务
    ///
    /// 目标文件已存在时直接标记完成并返回 `Ok(false)`，不发起任何网络请求。
    /// 目标目录无法创建时同步返回错误。
    pub async fn add_task(&self, task: Arc<DownloadTask>) -> Result<bool> {
        if self.find(task.id()).is_some() {
            return Err(DownloadError::TaskAlreadyExists(task.id().to_string()));
        }

        if task.already_exists() {
            task.update(|s| {
                s.status = TaskStatus::Completed;
                s.progress = 100.0;
            });
            info!("文件已存在，跳过下载: {}", task.full_path().display());
            self.scheduler().tasks.push(task);
            self.core.notify_update();
            return Ok(false);
        }

        tokio::fs::create_dir_all(task.destination())
            .await
            .map_err(|source| DownloadError::CreateDir {
                path: task.destination().to_path_buf(),
                source,
            })?;

        debug!("任务入队: {} ({})", task.filename(), task.id());
        self.scheduler().tasks.push(task);
        self.admit_next();
        Ok(true)
    }

    /// 有空闲名额时按提交顺序启动排队中的任务
    fn admit_next(&self) {
        let admitted = {
            let mut scheduler = self.scheduler();
            let mut admitted = Vec::new();
            while scheduler.active < scheduler.max_concurrent {
                // 重试退避中的任务虽然是 Queued，但旧协程还没退出
                let next = scheduler
                    .tasks
                    .iter()
                    .find(|t| t.status() == TaskStatus::Queued && !t.worker_attached())
                    .cloned();
                let Some(task) = next else { break };

                scheduler.active += 1;
                task.set_worker_attached(true);
                task.set_status(TaskStatus::Downloading);
                admitted.push(task);
            }
            admitted
        };

        if admitted.is_empty() {
            return;
        }
        for task in admitted {
            self.spawn_worker(task);
        }
        self.core.notify_update();
    }

    fn spawn_worker(&self, task: Arc<DownloadTask>) {
        let manager = self.clone();
        tokio::spawn(async move {
            let outcome = AssertUnwindSafe(manager.core.run(&task))
                .catch_unwind()
                .await;
            if outcome.is_err() {
                error!("下载协程异常退出: {}", task.filename());
                task.update(|s| {
                    if !s.status.is_terminal() {
                        s.status = TaskStatus::Error;
                        s.error_message = "下载协程异常退出".to_string();
                    }
                });
            }

            manager.release_slot(&task);
            manager.core.notify_update();
            manager.admit_next();
            manager.idle.notify_waiters();
        });
    }

    fn release_slot(&self, task: &DownloadTask) {
        let mut scheduler = self.scheduler();
        scheduler.active = scheduler.active.saturating_sub(1);
        task.set_worker_attached(false);
    }

    /// 暂停，只对下载中的任务有效
    pub fn pause(&self, task: &DownloadTask) {
        if task.status() == TaskStatus::Downloading {
            task.request_pause();
        }
    }

    /// 恢复，只对已暂停的任务有效
    pub fn resume(&self, task: &DownloadTask) {
        if task.status() == TaskStatus::Paused {
            task.request_resume();
        }
    }

    /// 停止任务，临时文件保留以便以后续传
    ///
    /// 还在排队的任务直接变为 Stopped；运行中的任务在下一个分块处退出。
    pub fn stop(&self, task: &DownloadTask) {
        {
            // 持锁防止与调度同时进行
            let _scheduler = self.scheduler();
            match task.status() {
                TaskStatus::Queued => {
                    task.request_stop();
                    task.update(|s| {
                        s.status = TaskStatus::Stopped;
                        s.error_message = DownloadError::Stopped.to_string();
                    });
                }
                status if status.is_terminal() => return,
                _ => task.request_stop(),
            }
        }
        self.core.notify_update();
        self.idle.notify_waiters();
    }

    /// 停止所有未结束的任务
    pub fn stop_all(&self) {
        for task in self.tasks() {
            self.stop(&task);
        }
    }

    /// 处于下载中的任务数量
    pub fn active_count(&self) -> usize {
        self.scheduler()
            .tasks
            .iter()
            .filter(|t| t.status() == TaskStatus::Downloading)
            .count()
    }

    pub fn tasks(&self) -> Vec<Arc<DownloadTask>> {
        self.scheduler().tasks.clone()
    }

    pub fn snapshots(&self) -> Vec<TaskSnapshot> {
        self.tasks().iter().map(|t| t.snapshot()).collect()
    }

    pub fn find(&self, id: Uuid) -> Option<Arc<DownloadTask>> {
        self.scheduler()
            .tasks
            .iter()
            .find(|t| t.id() == id)
            .cloned()
    }

    /// 从列表中移除已完成的任务，这是移除任务的唯一途径
    pub fn cleanup_completed(&self) -> usize {
        let mut scheduler = self.scheduler();
        let before = scheduler.tasks.len();
        scheduler
            .tasks
            .retain(|t| t.status() != TaskStatus::Completed);
        before - scheduler.tasks.len()
    }

    fn is_idle(&self) -> bool {
        let scheduler = self.scheduler();
        scheduler.active == 0
            && scheduler.tasks.iter().all(|t| {
                !matches!(
                    t.status(),
                    TaskStatus::Queued | TaskStatus::Downloading | TaskStatus::Paused
                )
            })
    }

    /// 等待所有任务进入终态
    pub async fn wait_idle(&self) {
        loop {
            let notified = self.idle.notified();
            if self.is_idle() {
                return;
            }
            notified.await;
        }
    }
}
