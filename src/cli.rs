use clap::{Args, Parser, Subcommand};
use std::path::PathBuf;

use recovery_downloader::catalog::{DownloadedFilter, ImageFilter, StatusFilter};
use recovery_downloader::config::DEFAULT_CONFIG_FILE;

/// Chrome OS 恢复镜像下载器
#[derive(Parser, Debug)]
#[command(name = "recoverydl")]
#[command(version)]
#[command(about = "浏览并下载 Chrome OS 恢复镜像，支持断点续传", long_about = None)]
pub struct Cli {
    /// 配置文件路径
    #[arg(long, value_name = "FILE", default_value = DEFAULT_CONFIG_FILE)]
    #[arg(value_hint = clap::ValueHint::FilePath)]
    pub config: PathBuf,

    /// 输出调试日志
    #[arg(short, long)]
    pub verbose: bool,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// 列出匹配的恢复镜像
    List {
        #[command(flatten)]
        filter: FilterArgs,
    },

    /// 下载匹配的恢复镜像
    Download {
        #[command(flatten)]
        filter: FilterArgs,

        /// 只下载指定代号的设备 (如 hatch-helios)
        #[arg(value_name = "CODENAME")]
        codenames: Vec<String>,

        /// 删除已存在的文件后重新下载
        #[arg(long)]
        overwrite: bool,

        /// 同时下载的任务数 (1-10)
        #[arg(long, value_name = "N")]
        concurrency: Option<usize>,

        /// 总下载速度上限 (KB/s)，0 表示不限速
        #[arg(long, value_name = "KB")]
        speed_limit: Option<u64>,

        /// 保存目录
        #[arg(long, value_name = "DIR")]
        #[arg(value_hint = clap::ValueHint::DirPath)]
        output_dir: Option<PathBuf>,
    },

    /// 显示当前配置
    Config {
        /// 把当前生效的配置写回配置文件
        #[arg(long)]
        save: bool,
    },
}

#[derive(Args, Debug, Clone)]
pub struct FilterArgs {
    /// 厂商 (默认使用配置中的厂商)
    #[arg(long, value_name = "NAME")]
    pub manufacturer: Option<String>,

    /// 支持状态
    #[arg(long, value_enum, default_value_t = StatusFilter::All)]
    pub status: StatusFilter,

    /// 设备形态，如 Convertible、Chromebox
    #[arg(long, value_name = "FORM")]
    pub form_factor: Option<String>,

    /// 按品牌、代号、平台、形态、版本搜索
    #[arg(long, value_name = "TEXT")]
    pub search: Option<String>,

    /// 按是否已下载过滤
    #[arg(long, value_enum, default_value_t = DownloadedFilter::All)]
    pub downloaded: DownloadedFilter,

    /// 忽略本地缓存 (builds_cache.json) 重新获取镜像列表
    #[arg(long)]
    pub refresh: bool,
}

impl FilterArgs {
    pub fn image_filter(&self) -> ImageFilter {
        ImageFilter {
            status: self.status,
            form_factor: self.form_factor.clone(),
            search: self.search.clone(),
            downloaded: self.downloaded,
        }
    }
}
