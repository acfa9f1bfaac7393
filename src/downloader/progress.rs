use std::sync::{Arc, Mutex};

use indicatif::{MultiProgress, ProgressBar, ProgressStyle};

use super::task::{DownloadTask, TaskStatus};

const BAR_TEMPLATE: &str =
    "{spinner:.green} {prefix:30!} [{bar:30.cyan/blue}] {bytes}/{total_bytes} {bytes_per_sec} ({eta}) {msg}";

/// 终端多进度条，由下载管理器的回调驱动刷新
pub struct DownloadProgress {
    multi_pb: MultiProgress,
    bars: Mutex<Vec<(Arc<DownloadTask>, ProgressBar)>>,
}

impl DownloadProgress {
    pub fn new() -> Self {
        Self {
            multi_pb: MultiProgress::new(),
            bars: Mutex::new(Vec::new()),
        }
    }

    pub fn track(&self, task: Arc<DownloadTask>) {
        let pb = self.multi_pb.add(ProgressBar::new(task.total_size()));
        pb.set_style(
            ProgressStyle::with_template(BAR_TEMPLATE)
                .unwrap_or_else(|_| ProgressStyle::default_bar())
                .progress_chars("#>-"),
        );
        pb.set_prefix(task.filename().to_string());
        self.bars
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push((task, pb));
        self.refresh();
    }

    /// 用任务当前的状态刷新所有进度条
    pub fn refresh(&self) {
        let bars = self.bars.lock().unwrap_or_else(|e| e.into_inner());
        for (task, pb) in bars.iter() {
            if pb.is_finished() {
                continue;
            }
            let snapshot = task.snapshot();
            if snapshot.total_size > 0 {
                pb.set_length(snapshot.total_size);
            }
            pb.set_position(snapshot.downloaded_size);

            match snapshot.status {
                TaskStatus::Completed => pb.finish_with_message("完成"),
                TaskStatus::Error => {
                    pb.abandon_with_message(format!("失败: {}", snapshot.error_message))
                }
                TaskStatus::Stopped => pb.abandon_with_message("已停止"),
                TaskStatus::Paused => pb.set_message("已暂停"),
                TaskStatus::Queued if snapshot.retry_count > 0 => {
                    pb.set_message(format!("等待重试 ({})", snapshot.retry_count))
                }
                TaskStatus::Queued => pb.set_message("排队中"),
                TaskStatus::Downloading => pb.set_message(""),
            }
        }
    }
}

impl Default for DownloadProgress {
    fn default() -> Self {
        Self::new()
    }
}
