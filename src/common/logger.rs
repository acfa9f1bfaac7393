use colored::*;

use crate::catalog::RecoveryImage;
use crate::downloader::{TaskSnapshot, TaskStatus};

/// 漂亮的终端输出工具
pub struct PrettyLogger;

impl PrettyLogger {
    /// 显示成功消息
    pub fn success(message: impl AsRef<str>) {
        println!("{} {}", "✓".green().bold(), message.as_ref());
    }

    /// 显示信息消息
    pub fn info(message: impl AsRef<str>) {
        println!("{} {}", "ℹ".blue().bold(), message.as_ref());
    }

    /// 显示警告消息
    pub fn warning(message: impl AsRef<str>) {
        println!("{} {}", "⚠".yellow().bold(), message.as_ref());
    }

    /// 显示错误消息
    pub fn error(message: impl AsRef<str>) {
        println!("{} {}", "✗".red().bold(), message.as_ref());
    }

    /// 显示步骤开始
    pub fn step_start(step: impl AsRef<str>) {
        println!("\n{} {}", "▶".cyan().bold(), step.as_ref().bold());
    }

    /// 显示文件信息
    pub fn file_info(label: impl AsRef<str>, path: impl AsRef<str>) {
        println!("{} {}: {}", "📁".blue().bold(), label.as_ref().bold(), path.as_ref());
    }

    /// 显示分割线
    pub fn separator() {
        println!("{}", "─".repeat(100).bright_black());
    }

    /// 显示镜像列表的一行
    pub fn image_row(image: &RecoveryImage, downloaded: bool) {
        let status = if image.is_aue {
            "Discontinued".red()
        } else {
            "Supported".green()
        };
        let mark = if downloaded { "✓".green() } else { " ".normal() };
        println!(
            "{} {:<36} {:<22} {:<10} {:<12} {:<12} {}",
            mark,
            image.brand_name.bold(),
            image.codename,
            image.platform,
            image.form_factor,
            status,
            image.version.cyan()
        );
    }

    /// 显示下载结果汇总
    pub fn completion_summary(tasks: &[TaskSnapshot]) {
        println!("\n{}", "下载结果".bold());
        for task in tasks {
            let line = format!("{} ({})", task.filename, format_size(task.total_size));
            match task.status {
                TaskStatus::Completed => Self::success(line),
                TaskStatus::Stopped => Self::warning(format!("{} 已停止，可稍后续传", line)),
                TaskStatus::Error => Self::error(format!("{}: {}", line, task.error_message)),
                _ => Self::info(format!("{} {}", line, task.status)),
            }
        }
    }
}

/// 字节数转成便于阅读的形式
pub fn format_size(size: u64) -> String {
    const KB: u64 = 1024;
    const MB: u64 = KB * 1024;
    const GB: u64 = MB * 1024;

    if size < KB {
        format!("{} B", size)
    } else if size < MB {
        format!("{:.1} KB", size as f64 / KB as f64)
    } else if size < GB {
        format!("{:.1} MB", size as f64 / MB as f64)
    } else {
        format!("{:.2} GB", size as f64 / GB as f64)
    }
}

/// 便捷宏用于漂亮的日志输出
#[macro_export]
macro_rules! log_success {
    ($($arg:tt)*) => {
        $crate::common::logger::PrettyLogger::success(format!($($arg)*))
    };
}

#[macro_export]
macro_rules! log_info {
    ($($arg:tt)*) => {
        $crate::common::logger::PrettyLogger::info(format!($($arg)*))
    };
}

#[macro_export]
macro_rules! log_warning {
    ($($arg:tt)*) => {
        $crate::common::logger::PrettyLogger::warning(format!($($arg)*))
    };
}

#[macro_export]
macro_rules! log_error {
    ($($arg:tt)*) => {
        $crate::common::logger::PrettyLogger::error(format!($($arg)*))
    };
}

#[macro_export]
macro_rules! log_step {
    ($($arg:tt)*) => {
        $crate::common::logger::PrettyLogger::step_start(format!($($arg)*))
    };
}
