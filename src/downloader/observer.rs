use std::sync::Arc;

use super::task::DownloadTask;

/// 任务状态或进度发生变化时被调用
///
/// 调用发生在下载协程上，调用方如果需要切回自己的事件循环要自行转发。
pub trait UpdateObserver: Send + Sync {
    fn on_update(&self);
}

/// 任务成功下载完成时被调用，每个任务恰好一次
pub trait CompletionObserver: Send + Sync {
    fn on_complete(&self, task: &Arc<DownloadTask>);
}

impl<F> UpdateObserver for F
where
    F: Fn() + Send + Sync,
{
    fn on_update(&self) {
        self()
    }
}

impl<F> CompletionObserver for F
where
    F: Fn(&Arc<DownloadTask>) + Send + Sync,
{
    fn on_complete(&self, task: &Arc<DownloadTask>) {
        self(task)
    }
}
