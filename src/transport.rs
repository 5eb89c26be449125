//! Network byte-loading collaborator for the http/https/ftp handler
//!
//! The network handler never speaks a wire protocol itself: it hands a
//! `TransportRequest` to a `Transport` and consumes the response head and
//! a stream of body chunks.

use crate::error::{BindError, Result};
use async_trait::async_trait;
use bytes::Bytes;
use futures::stream::BoxStream;
use std::collections::HashMap;
use std::sync::Mutex;
use std::time::Duration;
use tokio_stream::wrappers::ReceiverStream;

/// Outgoing request
#[derive(Debug, Clone, Default)]
pub struct TransportRequest {
    pub url: String,
    pub verb: String,
    pub headers: Vec<(String, String)>,
    pub body: Option<Bytes>,
}

impl TransportRequest {
    pub fn header(&self, name: &str) -> Option<&str> {
        find_header(&self.headers, name)
    }
}

/// Response head plus a body stream
pub struct TransportResponse {
    pub status: u16,
    pub headers: Vec<(String, String)>,
    pub body: BoxStream<'static, Result<Bytes>>,
}

impl TransportResponse {
    pub fn header(&self, name: &str) -> Option<&str> {
        find_header(&self.headers, name)
    }

    /// Declared type without parameters
    pub fn content_type(&self) -> Option<&str> {
        self.header("content-type")
            .map(|v| v.split(';').next().unwrap_or(v).trim())
    }

    pub fn content_length(&self) -> Option<u64> {
        self.header("content-length")
            .and_then(|v| v.trim().parse().ok())
    }

    pub fn location(&self) -> Option<&str> {
        self.header("location")
    }

    pub fn is_redirect(&self) -> bool {
        (300..400).contains(&self.status) && self.location().is_some()
    }
}

impl std::fmt::Debug for TransportResponse {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TransportResponse")
            .field("status", &self.status)
            .field("headers", &self.headers)
            .finish_non_exhaustive()
    }
}

fn find_header<'a>(headers: &'a [(String, String)], name: &str) -> Option<&'a str> {
    headers
        .iter()
        .find(|(k, _)| k.eq_ignore_ascii_case(name))
        .map(|(_, v)| v.as_str())
}

/// Async transport for network-backed schemes
#[async_trait]
pub trait Transport: Send + Sync {
    /// Send a request and return once the response head is available
    async fn send(&self, request: TransportRequest) -> Result<TransportResponse>;

    /// Transport name for logs
    fn name(&self) -> &str;
}

/// Transport used when none is configured; every request fails to connect
#[derive(Debug, Default)]
pub struct UnavailableTransport;

#[async_trait]
impl Transport for UnavailableTransport {
    async fn send(&self, request: TransportRequest) -> Result<TransportResponse> {
        Err(BindError::Connection(format!(
            "No transport configured for '{}'",
            request.url
        )))
    }

    fn name(&self) -> &str {
        "unavailable"
    }
}

/// Canned response served by `MockTransport`
#[derive(Debug, Clone)]
pub struct MockRoute {
    pub status: u16,
    pub headers: Vec<(String, String)>,
    pub chunks: Vec<Bytes>,

    /// Delay before the head is returned
    pub head_delay: Duration,

    /// Delay before each body chunk
    pub chunk_delay: Duration,

    /// Fail the connection instead of answering
    pub refuse: bool,
}

impl MockRoute {
    /// 200 response with a content type and a single-chunk body
    pub fn ok(content_type: &str, body: impl Into<Bytes>) -> Self {
        let body = body.into();
        Self {
            status: 200,
            headers: vec![
                ("Content-Type".to_string(), content_type.to_string()),
                ("Content-Length".to_string(), body.len().to_string()),
            ],
            chunks: vec![body],
            head_delay: Duration::ZERO,
            chunk_delay: Duration::ZERO,
            refuse: false,
        }
    }

    /// Redirect to `location`
    pub fn redirect(status: u16, location: &str) -> Self {
        Self {
            status,
            headers: vec![("Location".to_string(), location.to_string())],
            chunks: Vec::new(),
            head_delay: Duration::ZERO,
            chunk_delay: Duration::ZERO,
            refuse: false,
        }
    }

    /// Error status with an empty body
    pub fn status(status: u16) -> Self {
        Self {
            status,
            headers: Vec::new(),
            chunks: Vec::new(),
            head_delay: Duration::ZERO,
            chunk_delay: Duration::ZERO,
            refuse: false,
        }
    }

    /// Connection refused
    pub fn refused() -> Self {
        Self {
            refuse: true,
            ..Self::status(0)
        }
    }

    /// Split the body into chunks of at most `size` bytes
    pub fn chunked(mut self, size: usize) -> Self {
        let body: Vec<u8> = self.chunks.iter().flat_map(|c| c.iter().copied()).collect();
        self.chunks = body
            .chunks(size.max(1))
            .map(Bytes::copy_from_slice)
            .collect();
        self.headers.retain(|(k, _)| !k.eq_ignore_ascii_case("content-length"));
        self
    }

    pub fn with_head_delay(mut self, delay: Duration) -> Self {
        self.head_delay = delay;
        self
    }

    pub fn with_chunk_delay(mut self, delay: Duration) -> Self {
        self.chunk_delay = delay;
        self
    }
}

/// In-memory transport for testing
///
/// Serves routes keyed by exact URL; unknown URLs answer 404. Records every
/// request it receives.
#[derive(Default)]
pub struct MockTransport {
    routes: Mutex<HashMap<String, MockRoute>>,
    requests: Mutex<Vec<TransportRequest>>,
}

impl MockTransport {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register or replace a route
    pub fn route(&self, url: impl Into<String>, route: MockRoute) -> &Self {
        if let Ok(mut routes) = self.routes.lock() {
            routes.insert(url.into(), route);
        }
        self
    }

    /// Requests received so far, oldest first
    pub fn requests(&self) -> Vec<TransportRequest> {
        self.requests
            .lock()
            .map(|r| r.clone())
            .unwrap_or_default()
    }
}

#[async_trait]
impl Transport for MockTransport {
    async fn send(&self, request: TransportRequest) -> Result<TransportResponse> {
        let route = {
            let routes = self.routes.lock().map_err(|e| {
                BindError::Connection(format!("Mock transport lock poisoned: {}", e))
            })?;
            routes.get(&request.url).cloned()
        };
        if let Ok(mut requests) = self.requests.lock() {
            requests.push(request.clone());
        }

        let route = route.unwrap_or_else(|| MockRoute::status(404));
        if !route.head_delay.is_zero() {
            tokio::time::sleep(route.head_delay).await;
        }
        if route.refuse {
            return Err(BindError::Connection(format!(
                "Connection refused: {}",
                request.url
            )));
        }

        let (tx, rx) = tokio::sync::mpsc::channel(route.chunks.len().max(1));
        let chunks = route.chunks.clone();
        let chunk_delay = route.chunk_delay;
        tokio::spawn(async move {
            for chunk in chunks {
                if !chunk_delay.is_zero() {
                    tokio::time::sleep(chunk_delay).await;
                }
                if tx.send(Ok(chunk)).await.is_err() {
                    break;
                }
            }
        });

        Ok(TransportResponse {
            status: route.status,
            headers: route.headers,
            body: Box::pin(ReceiverStream::new(rx)),
        })
    }

    fn name(&self) -> &str {
        "mock"
    }
}
