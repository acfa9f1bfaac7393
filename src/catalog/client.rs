use std::path::{Path, PathBuf};
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Local, TimeDelta};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use super::error::{CatalogError, Result};
use super::models::RecoveryImage;

pub const DEFAULT_API_URL: &str =
    "https://chromiumdash.appspot.com/cros/fetch_serving_builds?deviceCategory=ChromeOS";

pub const DEFAULT_CACHE_FILE: &str = "builds_cache.json";

/// 镜像列表的数据来源
#[async_trait]
pub trait BuildSource: Send + Sync {
    async fn fetch(&self) -> Result<Value>;
}

/// 通过 HTTP 拉取上游 JSON
pub struct HttpBuildSource {
    client: reqwest::Client,
    url: String,
}

impl HttpBuildSource {
    pub fn new(url: impl Into<String>) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(std::time::Duration::from_secs(30))
            .build()?;
        Ok(Self {
            client,
            url: url.into(),
        })
    }
}

#[async_trait]
impl BuildSource for HttpBuildSource {
    async fn fetch(&self) -> Result<Value> {
        debug!("请求镜像列表: {}", self.url);
        let resp = self.client.get(&self.url).send().await?;
        let status = resp.status();
        if !status.is_success() {
            return Err(CatalogError::BadStatus(status));
        }
        let text = resp.text().await?;
        Ok(serde_json::from_str(&text)?)
    }
}

struct CachedBuilds {
    data: Arc<Value>,
    fetched_at: DateTime<Local>,
}

// 磁盘缓存的格式，写入时借用、读取时持有
#[derive(Serialize, Deserialize)]
struct CacheFile<B> {
    fetched_at: DateTime<Local>,
    builds: B,
}

/// 带缓存的镜像列表客户端
///
/// 缓存在过期（默认一小时）或显式要求刷新之前一直有效。
/// 设置了缓存文件时，缓存会写到磁盘上，下次启动时仍可使用。
pub struct CatalogClient {
    source: Box<dyn BuildSource>,
    ttl: Option<TimeDelta>,
    cache: Mutex<Option<CachedBuilds>>,
    cache_file: Option<PathBuf>,
}

impl CatalogClient {
    pub fn new() -> Result<Self> {
        Self::with_url(DEFAULT_API_URL)
    }

    pub fn with_url(url: impl Into<String>) -> Result<Self> {
        Ok(Self::with_source(Box::new(HttpBuildSource::new(url)?)))
    }

    pub fn with_source(source: Box<dyn BuildSource>) -> Self {
        Self {
            source,
            ttl: Some(TimeDelta::hours(1)),
            cache: Mutex::new(None),
            cache_file: None,
        }
    }

    /// `None` 表示缓存永不过期
    pub fn with_ttl(mut self, ttl: Option<TimeDelta>) -> Self {
        self.ttl = ttl;
        self
    }

    pub fn with_cache_file(mut self, path: impl Into<PathBuf>) -> Self {
        self.cache_file = Some(path.into());
        self
    }

    pub async fn last_fetch(&self) -> Option<DateTime<Local>> {
        self.cache.lock().await.as_ref().map(|c| c.fetched_at)
    }

    pub async fn invalidate(&self) {
        *self.cache.lock().await = None;
        if let Some(path) = &self.cache_file {
            match tokio::fs::remove_file(path).await {
                Err(e) if e.kind() != std::io::ErrorKind::NotFound => {
                    warn!("删除缓存文件失败 {}: {}", path.display(), e);
                }
                _ => {}
            }
        }
    }

    fn is_fresh(&self, fetched_at: DateTime<Local>) -> bool {
        match self.ttl {
            Some(ttl) => Local::now() - fetched_at < ttl,
            None => true,
        }
    }

    pub async fn fetch_builds(&self, force_refresh: bool) -> Result<Arc<Value>> {
        let mut cache = self.cache.lock().await;

        if !force_refresh {
            if cache.is_none() {
                if let Some(path) = &self.cache_file {
                    *cache = load_cache_file(path).await;
                }
            }
            if let Some(cached) = cache.as_ref() {
                if self.is_fresh(cached.fetched_at) {
                    debug!("使用缓存的镜像列表 ({})", cached.fetched_at);
                    return Ok(Arc::clone(&cached.data));
                }
            }
        }

        let data = Arc::new(self.source.fetch().await?);
        let fetched_at = Local::now();
        if let Some(path) = &self.cache_file {
            // 缓存写不进去不影响本次结果
            if let Err(e) = store_cache_file(path, &data, fetched_at).await {
                warn!("写入缓存文件失败 {}: {}", path.display(), e);
            }
        }
        *cache = Some(CachedBuilds {
            data: Arc::clone(&data),
            fetched_at,
        });
        Ok(data)
    }

    /// 按厂商筛选设备并取出恢复镜像
    pub async fn images_by_manufacturer(
        &self,
        manufacturer: &str,
        stable_only: bool,
        force_refresh: bool,
    ) -> Result<Vec<RecoveryImage>> {
        let data = self.fetch_builds(force_refresh).await?;
        let images = extract_images(&data, manufacturer, stable_only)?;
        info!("厂商 {} 共找到 {} 个镜像", manufacturer, images.len());
        Ok(images)
    }
}

async fn load_cache_file(path: &Path) -> Option<CachedBuilds> {
    let text = match tokio::fs::read_to_string(path).await {
        Ok(text) => text,
        Err(e) => {
            if e.kind() != std::io::ErrorKind::NotFound {
                warn!("读取缓存文件失败 {}: {}", path.display(), e);
            }
            return None;
        }
    };

    match serde_json::from_str::<CacheFile<Value>>(&text) {
        Ok(file) => {
            debug!("读取磁盘缓存: {} ({})", path.display(), file.fetched_at);
            Some(CachedBuilds {
                data: Arc::new(file.builds),
                fetched_at: file.fetched_at,
            })
        }
        Err(e) => {
            warn!("缓存文件已损坏，将重新获取 {}: {}", path.display(), e);
            None
        }
    }
}

async fn store_cache_file(
    path: &Path,
    builds: &Value,
    fetched_at: DateTime<Local>,
) -> std::io::Result<()> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        tokio::fs::create_dir_all(parent).await?;
    }
    let file = CacheFile {
        fetched_at,
        builds,
    };
    let text = serde_json::to_string(&file)?;
    tokio::fs::write(path, text).await
}

/// 从上游 JSON 中取出匹配厂商的镜像
///
/// 带 `models` 的主板按型号展开，型号字段覆盖主板字段，代号为 `<主板>-<型号>`。
pub fn extract_images(
    data: &Value,
    manufacturer: &str,
    stable_only: bool,
) -> Result<Vec<RecoveryImage>> {
    let builds = data
        .get("builds")
        .and_then(Value::as_object)
        .ok_or_else(|| CatalogError::InvalidResponse("缺少 builds 字段".to_string()))?;

    let mut images = Vec::new();
    for (codename, details) in builds {
        let Some(details) = details.as_object() else {
            continue;
        };

        match details.get("models").and_then(Value::as_object) {
            Some(models) => {
                for (model_codename, model) in models {
                    let Some(model) = model.as_object() else {
                        continue;
                    };
                    if !matches_manufacturer(model, manufacturer) {
                        continue;
                    }
                    let combined = combine_details(details, model);
                    let display_codename = format!("{}-{}", codename, model_codename);
                    images.extend(recovery_images(&display_codename, &combined, stable_only));
                }
            }
            None => {
                if matches_manufacturer(details, manufacturer) {
                    images.extend(recovery_images(codename, details, stable_only));
                }
            }
        }
    }

    Ok(images)
}

fn brand_names(details: &Map<String, Value>) -> impl Iterator<Item = &str> {
    details
        .get("brandNames")
        .and_then(Value::as_array)
        .into_iter()
        .flatten()
        .filter_map(Value::as_str)
}

fn matches_manufacturer(details: &Map<String, Value>, manufacturer: &str) -> bool {
    let manufacturer = manufacturer.to_uppercase();
    brand_names(details).any(|name| name.to_uppercase().contains(&manufacturer))
}

fn combine_details(parent: &Map<String, Value>, model: &Map<String, Value>) -> Map<String, Value> {
    let mut combined = parent.clone();
    combined.remove("models");
    for (key, value) in model {
        combined.insert(key.clone(), value.clone());
    }
    combined
}

// 先看直接字段，再看 brandNameToFormattedDeviceMap 的第一项
fn device_attribute(details: &Map<String, Value>, key: &str) -> String {
    if let Some(value) = details.get(key).and_then(Value::as_str) {
        return value.to_string();
    }

    details
        .get("brandNameToFormattedDeviceMap")
        .and_then(Value::as_object)
        .and_then(|map| map.values().next())
        .and_then(|device| device.get(key))
        .and_then(Value::as_str)
        .unwrap_or("Unknown")
        .to_string()
}

fn recovery_images(
    codename: &str,
    details: &Map<String, Value>,
    stable_only: bool,
) -> Vec<RecoveryImage> {
    let brand_name = brand_names(details).next().unwrap_or(codename).to_string();
    let platform = device_attribute(details, "platform");
    let form_factor = device_attribute(details, "formFactor");
    let is_aue = details
        .get("isAue")
        .and_then(Value::as_bool)
        .unwrap_or(false);
    let chrome_version = details
        .get("servingStable")
        .and_then(|s| s.get("chromeVersion"))
        .and_then(Value::as_str)
        .unwrap_or_default();

    let Some(recoveries) = details.get("pushRecoveries").and_then(Value::as_object) else {
        return Vec::new();
    };

    let mut milestones: Vec<(u64, &String)> = recoveries
        .keys()
        .filter_map(|k| k.parse::<u64>().ok().map(|m| (m, k)))
        .collect();
    milestones.sort_by(|a, b| b.0.cmp(&a.0));
    if stable_only {
        milestones.truncate(1);
    }

    milestones
        .into_iter()
        .enumerate()
        .filter_map(|(i, (_, milestone))| {
            let download_url = match &recoveries[milestone.as_str()] {
                Value::String(url) => url.clone(),
                Value::Object(obj) => obj
                    .get("url")
                    .and_then(Value::as_str)
                    .unwrap_or_default()
                    .to_string(),
                _ => String::new(),
            };
            if download_url.is_empty() {
                return None;
            }

            // servingStable 的版本号只对应最新的里程碑
            let version = if i == 0 && !chrome_version.is_empty() {
                chrome_version.to_string()
            } else {
                format!("M{}", milestone)
            };

            Some(RecoveryImage {
                codename: codename.to_string(),
                brand_name: brand_name.clone(),
                platform: platform.clone(),
                form_factor: form_factor.clone(),
                is_aue,
                download_url,
                version,
                milestone: milestone.clone(),
            })
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use serde_json::json;

    use super::*;

    fn sample_builds() -> Value {
        json!({
            "builds": {
                "hatch": {
                    "pushRecoveries": {"120": "https://dl.example.com/hatch_120.bin.zip"},
                    "models": {
                        "kohaku": {
                            "brandNames": ["Samsung Galaxy Chromebook"],
                            "formFactor": "Convertible",
                            "pushRecoveries": {
                                "125": "https://dl.example.com/kohaku_125.bin.zip",
                                "126": "https://dl.example.com/kohaku_126.bin.zip"
                            },
                            "servingStable": {"chromeVersion": "126.0.6478.132"}
                        },
                        "helios": {
                            "brandNames": ["ASUS Chromebook Flip C436FA"],
                            "pushRecoveries": {"126": "https://dl.example.com/helios_126.bin.zip"}
                        }
                    },
                    "brandNameToFormattedDeviceMap": {
                        "ASUS Chromebook Flip C436FA": {"platform": "Intel", "formFactor": "Convertible"}
                    }
                },
                "fizz": {
                    "brandNames": ["ASUS Chromebox 3"],
                    "platform": "Intel",
                    "formFactor": "Chromebox",
                    "isAue": true,
                    "pushRecoveries": {"114": {"url": "https://dl.example.com/fizz_114.bin.zip"}, "notes": "x"}
                },
                "empty": {
                    "brandNames": ["ASUS Nothing"],
                    "pushRecoveries": {"110": ""}
                }
            }
        })
    }

    #[test]
    fn test_extract_board_with_models() {
        let images = extract_images(&sample_builds(), "asus", true).unwrap();
        let helios = images
            .iter()
            .find(|i| i.codename == "hatch-helios")
            .expect("应当展开型号");
        assert_eq!(helios.brand_name, "ASUS Chromebook Flip C436FA");
        assert_eq!(helios.platform, "Intel");
        assert_eq!(helios.form_factor, "Convertible");
        assert_eq!(helios.version, "M126");
        assert!(!helios.is_aue);
    }

    #[test]
    fn test_extract_standalone_device() {
        let images = extract_images(&sample_builds(), "ASUS", true).unwrap();
        let fizz = images.iter().find(|i| i.codename == "fizz").unwrap();
        assert!(fizz.is_aue);
        assert_eq!(fizz.download_url, "https://dl.example.com/fizz_114.bin.zip");
        assert_eq!(fizz.milestone, "114");
        // 空地址不产生镜像
        assert!(images.iter().all(|i| i.codename != "empty"));
        assert_eq!(images.len(), 2);
    }

    #[test]
    fn test_latest_milestone_uses_serving_stable_version() {
        let images = extract_images(&sample_builds(), "Samsung", true).unwrap();
        assert_eq!(images.len(), 1);
        assert_eq!(images[0].milestone, "126");
        assert_eq!(images[0].version, "126.0.6478.132");

        let all = extract_images(&sample_builds(), "Samsung", false).unwrap();
        assert_eq!(all.len(), 2);
        assert_eq!(all[1].version, "M125");
    }

    #[test]
    fn test_missing_builds_is_error() {
        assert!(extract_images(&json!({}), "ASUS", true).is_err());
    }

    struct CountingSource {
        calls: Arc<AtomicUsize>,
    }

    #[async_trait]
    impl BuildSource for CountingSource {
        async fn fetch(&self) -> Result<Value> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Ok(sample_builds())
        }
    }

    #[tokio::test]
    async fn test_cache_and_force_refresh() {
        let calls = Arc::new(AtomicUsize::new(0));
        let client = CatalogClient::with_source(Box::new(CountingSource {
            calls: calls.clone(),
        }));

        client.images_by_manufacturer("ASUS", true, false).await.unwrap();
        client.images_by_manufacturer("ASUS", true, false).await.unwrap();
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert!(client.last_fetch().await.is_some());

        client.fetch_builds(true).await.unwrap();
        assert_eq!(calls.load(Ordering::SeqCst), 2);

        client.invalidate().await;
        client.fetch_builds(false).await.unwrap();
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_expired_cache_refetches() {
        let calls = Arc::new(AtomicUsize::new(0));
        let client = CatalogClient::with_source(Box::new(CountingSource {
            calls: calls.clone(),
        }))
        .with_ttl(Some(TimeDelta::zero()));

        client.fetch_builds(false).await.unwrap();
        client.fetch_builds(false).await.unwrap();
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    fn counting_client(calls: &Arc<AtomicUsize>, cache_file: &Path) -> CatalogClient {
        CatalogClient::with_source(Box::new(CountingSource {
            calls: calls.clone(),
        }))
        .with_cache_file(cache_file)
    }

    #[tokio::test]
    async fn test_cache_file_survives_restart() {
        let dir = tempfile::tempdir().unwrap();
        let cache_file = dir.path().join("cache").join(DEFAULT_CACHE_FILE);
        let calls = Arc::new(AtomicUsize::new(0));

        let first = counting_client(&calls, &cache_file);
        first.fetch_builds(false).await.unwrap();
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert!(cache_file.exists());

        // 新的客户端直接读磁盘缓存
        let second = counting_client(&calls, &cache_file);
        let builds = second.fetch_builds(false).await.unwrap();
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert_eq!(*builds, sample_builds());
        assert!(second.last_fetch().await.is_some());

        // 强制刷新绕过磁盘缓存
        let third = counting_client(&calls, &cache_file);
        third.fetch_builds(true).await.unwrap();
        assert_eq!(calls.load(Ordering::SeqCst), 2);

        third.invalidate().await;
        assert!(!cache_file.exists());
    }

    #[tokio::test]
    async fn test_stale_or_corrupt_cache_file_refetches() {
        let dir = tempfile::tempdir().unwrap();
        let cache_file = dir.path().join(DEFAULT_CACHE_FILE);
        let calls = Arc::new(AtomicUsize::new(0));

        let stale = CacheFile {
            fetched_at: Local::now() - TimeDelta::hours(2),
            builds: json!({"builds": {}}),
        };
        std::fs::write(&cache_file, serde_json::to_string(&stale).unwrap()).unwrap();
        let client = counting_client(&calls, &cache_file);
        let builds = client.fetch_builds(false).await.unwrap();
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert_eq!(*builds, sample_builds());

        std::fs::write(&cache_file, "not json").unwrap();
        let client = counting_client(&calls, &cache_file);
        client.fetch_builds(false).await.unwrap();
        assert_eq!(calls.load(Ordering::SeqCst), 2);

        // 重新获取后磁盘缓存被覆盖为新内容
        let text = std::fs::read_to_string(&cache_file).unwrap();
        let file: CacheFile<Value> = serde_json::from_str(&text).unwrap();
        assert_eq!(file.builds, sample_builds());
    }
}
