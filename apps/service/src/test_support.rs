//! Local HTTP stub used by probe, scheduler and orchestrator tests.

use std::net::SocketAddr;
use std::sync::Arc;
use std::sync::atomic::{AtomicU16, AtomicU64, AtomicUsize, Ordering};
use std::time::Duration;

use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::Mutex;
use tokio::task::JoinHandle;

use crate::models::{RawInterval, Service, ServiceId};

struct StubState {
    status: AtomicU16,
    delay_ms: AtomicU64,
    hang: bool,
    requests: Mutex<Vec<String>>,
    active: AtomicUsize,
    peak: AtomicUsize,
}

/// Answers every request with a fixed status, recording the raw requests
pub struct StubServer {
    addr: SocketAddr,
    state: Arc<StubState>,
    handle: JoinHandle<()>,
}

impl StubServer {
    pub async fn start(status: u16) -> Self {
        Self::spawn(status, Duration::ZERO, false).await
    }

    pub async fn start_with_delay(status: u16, delay: Duration) -> Self {
        Self::spawn(status, delay, false).await
    }

    /// Accepts connections but never answers
    pub async fn hanging() -> Self {
        Self::spawn(200, Duration::ZERO, true).await
    }

    async fn spawn(status: u16, delay: Duration, hang: bool) -> Self {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let state = Arc::new(StubState {
            status: AtomicU16::new(status),
            delay_ms: AtomicU64::new(delay.as_millis() as u64),
            hang,
            requests: Mutex::new(Vec::new()),
            active: AtomicUsize::new(0),
            peak: AtomicUsize::new(0),
        });

        let accept_state = state.clone();
        let handle = tokio::spawn(async move {
            while let Ok((stream, _)) = listener.accept().await {
                tokio::spawn(serve(stream, accept_state.clone()));
            }
        });

        Self { addr, state, handle }
    }

    pub fn url(&self, path: &str) -> String {
        format!("http://{}{}", self.addr, path)
    }

    pub async fn requests(&self) -> Vec<String> {
        self.state.requests.lock().await.clone()
    }

    /// Most requests ever being answered at the same time
    pub fn peak_concurrency(&self) -> usize {
        self.state.peak.load(Ordering::SeqCst)
    }
}

impl Drop for StubServer {
    fn drop(&mut self) {
        self.handle.abort();
    }
}

async fn serve(mut stream: TcpStream, state: Arc<StubState>) {
    let Some(raw) = read_request(&mut stream).await else { return };

    if state.hang {
        tokio::time::sleep(Duration::from_secs(3600)).await;
        return;
    }

    state.requests.lock().await.push(raw);
    let active = state.active.fetch_add(1, Ordering::SeqCst) + 1;
    state.peak.fetch_max(active, Ordering::SeqCst);

    let delay = state.delay_ms.load(Ordering::SeqCst);
    if delay > 0 {
        tokio::time::sleep(Duration::from_millis(delay)).await;
    }
    state.active.fetch_sub(1, Ordering::SeqCst);

    let status = state.status.load(Ordering::SeqCst);
    let reason = reqwest::StatusCode::from_u16(status)
        .ok()
        .and_then(|code| code.canonical_reason())
        .unwrap_or("Status");
    let length = if matches!(status, 204 | 304) { "" } else { "Content-Length: 0\r\n" };
    let response = format!("HTTP/1.1 {status} {reason}\r\n{length}Connection: close\r\n\r\n");
    let _ = stream.write_all(response.as_bytes()).await;
    let _ = stream.shutdown().await;
}

/// Read one request: head, then a Content-Length or chunked body
async fn read_request(stream: &mut TcpStream) -> Option<String> {
    let mut buffer = Vec::new();
    let mut chunk = [0u8; 4096];

    let head_end = loop {
        if let Some(pos) = find(&buffer, b"\r\n\r\n") {
            break pos + 4;
        }
        let n = stream.read(&mut chunk).await.ok()?;
        if n == 0 {
            return None;
        }
        buffer.extend_from_slice(&chunk[..n]);
    };

    let head = String::from_utf8_lossy(&buffer[..head_end]).to_ascii_lowercase();
    let content_length = head
        .lines()
        .find_map(|line| line.strip_prefix("content-length:"))
        .and_then(|value| value.trim().parse::<usize>().ok());
    let chunked = head.contains("transfer-encoding: chunked");

    loop {
        let body = &buffer[head_end..];
        let complete = match content_length {
            Some(length) => body.len() >= length,
            None if chunked => body.ends_with(b"0\r\n\r\n"),
            None => true,
        };
        if complete {
            break;
        }
        let n = stream.read(&mut chunk).await.ok()?;
        if n == 0 {
            break;
        }
        buffer.extend_from_slice(&chunk[..n]);
    }

    Some(String::from_utf8_lossy(&buffer).into_owned())
}

fn find(haystack: &[u8], needle: &[u8]) -> Option<usize> {
    haystack.windows(needle.len()).position(|window| window == needle)
}

/// Url of a local port nothing listens on
pub async fn unused_local_url() -> String {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    drop(listener);
    format!("http://{addr}/")
}

pub fn service(id: i64, url: String, interval: RawInterval) -> Service {
    Service::new(ServiceId::Int(id), format!("service-{id}"), url).with_interval(interval)
}
