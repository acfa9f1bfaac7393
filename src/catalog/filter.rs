use std::collections::BTreeSet;
use std::path::Path;

use clap::ValueEnum;

use super::models::RecoveryImage;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, ValueEnum)]
pub enum StatusFilter {
    #[default]
    All,
    Supported,
    Discontinued,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, ValueEnum)]
pub enum DownloadedFilter {
    #[default]
    All,
    /// 隐藏已下载的镜像
    Hide,
    /// 只显示已下载的镜像
    Only,
}

/// 镜像列表的筛选条件，依次按状态、形态、关键字、下载情况过滤
#[derive(Debug, Clone, Default)]
pub struct ImageFilter {
    pub status: StatusFilter,
    pub form_factor: Option<String>,
    pub search: Option<String>,
    pub downloaded: DownloadedFilter,
}

impl ImageFilter {
    pub fn matches(&self, image: &RecoveryImage, download_root: &Path) -> bool {
        match self.status {
            StatusFilter::Supported if image.is_aue => return false,
            StatusFilter::Discontinued if !image.is_aue => return false,
            _ => {}
        }

        if let Some(form_factor) = &self.form_factor {
            if &image.form_factor != form_factor {
                return false;
            }
        }

        if let Some(search) = self.search.as_deref().filter(|s| !s.is_empty()) {
            let searchable = format!(
                "{} {} {} {} {}",
                image.brand_name, image.codename, image.platform, image.form_factor, image.version
            )
            .to_lowercase();
            if !searchable.contains(&search.to_lowercase()) {
                return false;
            }
        }

        match self.downloaded {
            DownloadedFilter::All => true,
            DownloadedFilter::Hide => !image.is_downloaded(download_root),
            DownloadedFilter::Only => image.is_downloaded(download_root),
        }
    }

    pub fn apply<'a>(
        &self,
        images: &'a [RecoveryImage],
        download_root: &Path,
    ) -> Vec<&'a RecoveryImage> {
        images
            .iter()
            .filter(|image| self.matches(image, download_root))
            .collect()
    }
}

/// 列表中出现过的所有设备形态，已排序
pub fn form_factors(images: &[RecoveryImage]) -> Vec<String> {
    images
        .iter()
        .filter(|i| !i.form_factor.is_empty())
        .map(|i| i.form_factor.clone())
        .collect::<BTreeSet<_>>()
        .into_iter()
        .collect()
}
