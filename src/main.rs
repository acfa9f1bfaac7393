use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, Result, bail};
use clap::Parser;
use colored::Colorize;
use tracing::{debug, info};

use recovery_downloader::catalog::client::DEFAULT_CACHE_FILE;
use recovery_downloader::catalog::{CatalogClient, RecoveryImage, filter::form_factors};
use recovery_downloader::common::logger::PrettyLogger;
use recovery_downloader::config::AppConfig;
use recovery_downloader::downloader::progress::DownloadProgress;
use recovery_downloader::downloader::{DownloadManager, DownloadTask, TaskStatus};
use recovery_downloader::{log_error, log_info, log_step, log_success, log_warning};

mod cli;

use cli::{Cli, Command, FilterArgs};

/// 镜像列表缓存放在配置文件旁边
fn cache_file_path(config_path: &Path) -> PathBuf {
    config_path.with_file_name(DEFAULT_CACHE_FILE)
}

/// 获取并筛选镜像列表
async fn load_images(
    config: &AppConfig,
    config_path: &Path,
    filter: &FilterArgs,
) -> Result<Vec<RecoveryImage>> {
    let manufacturer = filter
        .manufacturer
        .as_deref()
        .unwrap_or(&config.manufacturer_filter);
    log_step!("获取 {} 的恢复镜像列表", manufacturer);

    let catalog = CatalogClient::new()?.with_cache_file(cache_file_path(config_path));
    let images = catalog
        .images_by_manufacturer(manufacturer, true, filter.refresh)
        .await
        .context("获取镜像列表失败")?;
    if let Some(fetched_at) = catalog.last_fetch().await {
        debug!("镜像列表获取时间: {}", fetched_at);
    }

    Ok(filter
        .image_filter()
        .apply(&images, &config.download_path)
        .into_iter()
        .cloned()
        .collect())
}

async fn list_images(config: &AppConfig, config_path: &Path, filter: &FilterArgs) -> Result<()> {
    let images = load_images(config, config_path, filter).await?;

    PrettyLogger::separator();
    for image in &images {
        PrettyLogger::image_row(image, image.is_downloaded(&config.download_path));
    }
    PrettyLogger::separator();

    log_info!("共 {} 个镜像", images.len());
    let factors = form_factors(&images);
    if !factors.is_empty() {
        log_info!("设备形态: {}", factors.join(", "));
    }
    Ok(())
}

async fn remove_existing(path: &Path) -> Result<()> {
    match tokio::fs::remove_file(path).await {
        Ok(()) => {
            debug!("已删除旧文件: {}", path.display());
            Ok(())
        }
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
        Err(e) => Err(e).with_context(|| format!("无法删除旧文件 {}", path.display())),
    }
}

async fn download_images(
    config: &AppConfig,
    config_path: &Path,
    filter: &FilterArgs,
    codenames: &[String],
    overwrite: bool,
) -> Result<()> {
    let mut images = load_images(config, config_path, filter).await?;
    if !codenames.is_empty() {
        images.retain(|image| {
            codenames
                .iter()
                .any(|c| c.eq_ignore_ascii_case(&image.codename))
        });
    }
    if images.is_empty() {
        log_warning!("没有匹配的镜像");
        return Ok(());
    }

    PrettyLogger::file_info("保存目录", config.download_path.display().to_string());
    log_step!("开始下载 {} 个镜像", images.len());

    let manager = DownloadManager::new(config.download_config())?;
    let progress = Arc::new(DownloadProgress::new());
    {
        let progress = Arc::clone(&progress);
        manager.set_update_callback(move || progress.refresh());
    }
    manager.set_completion_callback(|task: &Arc<DownloadTask>| {
        let device = task.metadata().get("device").map(String::as_str).unwrap_or("");
        info!("下载完成: {} ({})", task.full_path().display(), device);
    });

    for image in &images {
        if overwrite {
            remove_existing(&image.full_path(&config.download_path)).await?;
        }
        let task = Arc::new(image.to_task(&config.download_path));
        progress.track(Arc::clone(&task));
        if !manager.add_task(task).await? {
            debug!("已下载，跳过: {}", image.filename());
        }
    }

    tokio::select! {
        _ = manager.wait_idle() => {}
        _ = tokio::signal::ctrl_c() => {
            log_warning!("收到中断信号，正在停止下载...");
            manager.stop_all();
            manager.wait_idle().await;
        }
    }
    progress.refresh();

    let snapshots = manager.snapshots();
    PrettyLogger::completion_summary(&snapshots);

    let failed = snapshots
        .iter()
        .filter(|t| t.status == TaskStatus::Error)
        .count();
    if failed > 0 {
        bail!("{} 个镜像下载失败", failed);
    }
    log_success!("{}", "全部完成！".green());
    Ok(())
}

fn show_config(config: &AppConfig, path: &Path, save: bool) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(config)?);
    if save {
        config.save(path)?;
        log_success!("配置已保存到 {}", path.display());
    }
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    // 解析命令行参数
    let args = Cli::parse();

    // 初始化日志，默认只输出警告以免打乱进度条
    tracing_subscriber::fmt()
        .with_max_level(if args.verbose {
            tracing::Level::DEBUG
        } else {
            tracing::Level::WARN
        })
        .with_writer(std::io::stderr)
        .init();

    let mut config = match AppConfig::load(&args.config) {
        Ok(config) => config,
        Err(e) => {
            log_error!("{}，使用默认配置", e);
            AppConfig::default()
        }
    };

    match args.command {
        Command::List { filter } => list_images(&config, &args.config, &filter).await,
        Command::Download {
            filter,
            codenames,
            overwrite,
            concurrency,
            speed_limit,
            output_dir,
        } => {
            // 命令行参数覆盖配置文件
            if let Some(n) = concurrency {
                config.max_concurrent_downloads = n;
            }
            if let Some(kb) = speed_limit {
                config.max_download_speed = Some(kb);
            }
            if let Some(dir) = output_dir {
                config.download_path = dir;
            }
            let config = config.normalized();
            download_images(&config, &args.config, &filter, &codenames, overwrite).await
        }
        Command::Config { save } => show_config(&config, &args.config, save),
    }
}
