#![allow(dead_code)]

use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use axum::Router;
use axum::body::{Body, Bytes};
use axum::extract::{Path, State};
use axum::http::{HeaderMap, StatusCode, header};
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use futures::{StreamExt, stream};

use recovery_downloader::downloader::DownloadConfig;

const SERVE_CHUNK: usize = 4096;

/// 本地文件服务器，支持 Range、注入失败、慢速传输和中途断开
#[derive(Default)]
pub struct ServerState {
    files: HashMap<String, Vec<u8>>,
    /// 接下来的 N 个请求返回 500
    pub fail_next: AtomicUsize,
    /// 每个 4KB 分块之间的延迟（毫秒）
    pub delay_ms: AtomicU64,
    /// 下一个响应只发送这么多字节就断开
    pub cut_after: Mutex<Option<usize>>,
    /// 忽略 Range，总是返回完整文件
    pub ignore_range: AtomicBool,
    pub requests: AtomicUsize,
    /// 每个请求的 (文件名, Range 头)
    pub log: Mutex<Vec<(String, Option<String>)>>,
}

impl ServerState {
    pub fn with_files(files: Vec<(&str, Vec<u8>)>) -> Self {
        Self {
            files: files
                .into_iter()
                .map(|(name, data)| (name.to_string(), data))
                .collect(),
            ..Default::default()
        }
    }

    pub fn ranges(&self) -> Vec<Option<String>> {
        self.log
            .lock()
            .unwrap()
            .iter()
            .map(|(_, range)| range.clone())
            .collect()
    }

    pub fn requested_files(&self) -> Vec<String> {
        self.log
            .lock()
            .unwrap()
            .iter()
            .map(|(name, _)| name.clone())
            .collect()
    }
}

pub struct TestServer {
    pub addr: SocketAddr,
    pub state: Arc<ServerState>,
}

impl TestServer {
    pub async fn start(state: ServerState) -> Self {
        let state = Arc::new(state);
        let app = Router::new()
            .route("/files/{name}", get(serve_file))
            .with_state(Arc::clone(&state));

        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });

        Self { addr, state }
    }

    pub fn url(&self, name: &str) -> String {
        format!("http://{}/files/{}", self.addr, name)
    }
}

fn parse_range_start(value: &str) -> Option<usize> {
    value
        .strip_prefix("bytes=")?
        .strip_suffix('-')?
        .parse()
        .ok()
}

async fn serve_file(
    State(state): State<Arc<ServerState>>,
    Path(name): Path<String>,
    headers: HeaderMap,
) -> Response {
    state.requests.fetch_add(1, Ordering::SeqCst);
    let range = headers
        .get(header::RANGE)
        .and_then(|v| v.to_str().ok())
        .map(str::to_string);
    state.log.lock().unwrap().push((name.clone(), range.clone()));

    let failing = state
        .fail_next
        .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
        .is_ok();
    if failing {
        return (StatusCode::INTERNAL_SERVER_ERROR, "injected failure").into_response();
    }

    let Some(data) = state.files.get(&name) else {
        return StatusCode::NOT_FOUND.into_response();
    };

    let start = if state.ignore_range.load(Ordering::SeqCst) {
        0
    } else {
        range.as_deref().and_then(parse_range_start).unwrap_or(0)
    };
    if start >= data.len() && start > 0 {
        return (
            StatusCode::RANGE_NOT_SATISFIABLE,
            [(header::CONTENT_RANGE, format!("bytes */{}", data.len()))],
        )
            .into_response();
    }

    let body = data[start..].to_vec();
    let content_length = body.len();
    let cut_after = state.cut_after.lock().unwrap().take();
    let delay = Duration::from_millis(state.delay_ms.load(Ordering::SeqCst));

    let sent = cut_after.unwrap_or(content_length).min(content_length);
    let chunks: Vec<Bytes> = body[..sent]
        .chunks(SERVE_CHUNK)
        .map(Bytes::copy_from_slice)
        .collect();
    let chunks = stream::iter(chunks).then(move |chunk| async move {
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }
        Ok::<_, std::io::Error>(chunk)
    });
    let body = if cut_after.is_some() {
        let broken = stream::once(async {
            Err(std::io::Error::new(
                std::io::ErrorKind::ConnectionReset,
                "injected disconnect",
            ))
        });
        Body::from_stream(chunks.chain(broken))
    } else {
        Body::from_stream(chunks)
    };

    let mut builder = Response::builder().header(header::CONTENT_LENGTH, content_length.to_string());
    builder = if start > 0 {
        builder.status(StatusCode::PARTIAL_CONTENT).header(
            header::CONTENT_RANGE,
            format!("bytes {}-{}/{}", start, data.len() - 1, data.len()),
        )
    } else {
        builder.status(StatusCode::OK)
    };
    builder.body(body).unwrap()
}

pub fn test_data(len: usize) -> Vec<u8> {
    (0..len).map(|i| (i % 251) as u8).collect()
}

pub fn fast_config(max_concurrent_downloads: usize, max_retries: u32) -> DownloadConfig {
    DownloadConfig {
        max_concurrent_downloads,
        max_retries,
        retry_delay: Duration::from_millis(20),
        update_interval: Duration::from_millis(50),
        connect_timeout: Duration::from_secs(5),
        read_timeout: Duration::from_secs(10),
        ..DownloadConfig::default()
    }
}

/// 轮询直到条件成立，超时则失败
pub async fn wait_until(what: &str, timeout: Duration, cond: impl Fn() -> bool) {
    let deadline = tokio::time::Instant::now() + timeout;
    while !cond() {
        if tokio::time::Instant::now() > deadline {
            panic!("等待超时: {}", what);
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
}
