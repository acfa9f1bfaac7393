use std::sync::Mutex;
use std::sync::atomic::{AtomicU64, Ordering};

use tokio::time::{Duration, Instant};

/// 所有下载协程共享的令牌桶，限制的是总速度而不是单个任务的速度
///
/// 桶容量为一秒的配额。令牌不足时先记账再睡眠，锁只在记账时持有。
#[derive(Debug)]
pub struct SpeedLimiter {
    // 字节/秒，0 表示不限速
    rate: AtomicU64,
    bucket: Mutex<Bucket>,
}

#[derive(Debug)]
struct Bucket {
    available: f64,
    last_refill: Instant,
}

impl SpeedLimiter {
    pub fn new(bytes_per_sec: Option<u64>) -> Self {
        let rate = bytes_per_sec.unwrap_or(0);
        Self {
            rate: AtomicU64::new(rate),
            bucket: Mutex::new(Bucket {
                available: rate as f64,
                last_refill: Instant::now(),
            }),
        }
    }

    pub fn rate(&self) -> Option<u64> {
        match self.rate.load(Ordering::SeqCst) {
            0 => None,
            rate => Some(rate),
        }
    }

    /// 修改限速，对正在运行的任务从下一个分块开始生效
    pub fn set_rate(&self, bytes_per_sec: Option<u64>) {
        let rate = bytes_per_sec.unwrap_or(0);
        self.rate.store(rate, Ordering::SeqCst);
        let mut bucket = self.bucket.lock().unwrap_or_else(|e| e.into_inner());
        bucket.available = bucket.available.min(rate as f64);
        bucket.last_refill = Instant::now();
    }

    /// 为刚写入的 `bytes` 个字节付账，超出配额时睡眠相应时长
    pub async fn acquire(&self, bytes: usize) {
        let rate = self.rate.load(Ordering::SeqCst);
        if rate == 0 || bytes == 0 {
            return;
        }

        let wait = {
            let mut bucket = self.bucket.lock().unwrap_or_else(|e| e.into_inner());
            let now = Instant::now();
            let refill = now.duration_since(bucket.last_refill).as_secs_f64() * rate as f64;
            bucket.available = (bucket.available + refill).min(rate as f64);
            bucket.last_refill = now;
            bucket.available -= bytes as f64;

            if bucket.available >= 0.0 {
                Duration::ZERO
            } else {
                Duration::from_secs_f64(-bucket.available / rate as f64)
            }
        };

        if !wait.is_zero() {
            tokio::time::sleep(wait).await;
        }
    }
}
