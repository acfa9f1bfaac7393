//! Chrome OS 恢复镜像下载器
//!
//! 核心是 [`downloader::DownloadManager`]：限制并发、支持断点续传、
//! 暂停/恢复/停止、失败重试和全局限速的下载调度器。
//! [`catalog`] 负责获取和筛选镜像列表，[`config`] 负责持久化配置。

pub mod catalog;
pub mod common;
pub mod config;
pub mod downloader;
