//! Network handler for `http:`, `https:` and `ftp:`
//!
//! The connect/request phase and body streaming run on a tokio task. The
//! task never reports to the sink directly; it stores what it received in
//! shared state and calls `switch`, and the owner drives all progress, data,
//! and result reporting from `continue_async` on its own thread.

use super::{
    report_error, BindInfoSource, BindStatus, BindStringKind, DataFlags, LockCount,
    ProtocolData, ProtocolHandler, ProtocolSink, ReadStatus, ResultLatch, TerminateOptions,
};
use crate::error::{BindError, Result, ResultCode};
use crate::locator::Locator;
use crate::mime;
use crate::transport::{Transport, TransportRequest, TransportResponse};
use bytes::{Buf, Bytes};
use futures::StreamExt;
use std::collections::VecDeque;
use std::sync::{Arc, Mutex, MutexGuard};
use tokio::task::JoinHandle;

/// Schemes served by `HttpHandler`
pub const NETWORK_SCHEMES: &[&str] = &["http", "https", "ftp"];

const STATE_HEAD: u32 = 1;
const STATE_DATA: u32 = 2;
const STATE_EOF: u32 = 3;
const STATE_ERROR: u32 = 4;

/// Caller-supplied HTTP request customization
pub trait HttpNegotiate: Send + Sync {
    /// Headers to add to the request for `url`
    fn additional_headers(&self, url: &str) -> Vec<(String, String)>;
}

#[derive(Debug, Clone)]
struct ResponseHead {
    status: u16,
    content_type: Option<String>,
    content_length: Option<u64>,
    location: Option<String>,
}

impl ResponseHead {
    fn from_response(response: &TransportResponse) -> Self {
        Self {
            status: response.status,
            content_type: response.content_type().map(str::to_string),
            content_length: response.content_length(),
            location: if response.is_redirect() {
                response.location().map(str::to_string)
            } else {
                None
            },
        }
    }

    fn carries_body(&self) -> bool {
        self.location.is_none() && self.status < 400
    }
}

/// State written by the worker task and drained by the owner
#[derive(Default)]
struct Shared {
    head: Option<ResponseHead>,
    chunks: VecDeque<Bytes>,
    received: u64,
    eof: bool,
    error: Option<BindError>,
}

/// Handler for network-backed schemes
pub struct HttpHandler {
    transport: Arc<dyn Transport>,
    shared: Arc<Mutex<Shared>>,
    task: Option<JoinHandle<()>>,
    locator: Option<Locator>,
    sink: Option<Arc<dyn ProtocolSink>>,
    latch: ResultLatch,
    locks: LockCount,
    pending_terminate: Option<TerminateOptions>,
    mime_pending: bool,
    first_data_reported: bool,
    failed: bool,
}

impl HttpHandler {
    pub fn new(transport: Arc<dyn Transport>) -> Self {
        Self {
            transport,
            shared: Arc::new(Mutex::new(Shared::default())),
            task: None,
            locator: None,
            sink: None,
            latch: ResultLatch::default(),
            locks: LockCount::default(),
            pending_terminate: None,
            mime_pending: false,
            first_data_reported: false,
            failed: false,
        }
    }

    fn shared(&self) -> Result<MutexGuard<'_, Shared>> {
        self.shared
            .lock()
            .map_err(|e| BindError::Connection(format!("Network handler state poisoned: {}", e)))
    }

    fn finish(&mut self, sink: &dyn ProtocolSink, err: &BindError) {
        self.failed = true;
        if self.latch.fire() {
            report_error(sink, err);
        }
    }

    fn stop_worker(&mut self) {
        if let Some(task) = self.task.take() {
            task.abort();
        }
    }

    fn build_request(locator: &Locator, bind_info: &dyn BindInfoSource) -> TransportRequest {
        let info = bind_info.get_bind_info();
        let mut headers = info.headers.clone();
        if let Some(agent) = bind_info.get_bind_string(BindStringKind::UserAgent) {
            headers.push(("User-Agent".to_string(), agent));
        }
        if let Some(accept) = bind_info.get_bind_string(BindStringKind::AcceptMimes) {
            headers.push(("Accept".to_string(), accept));
        }
        if let Some(language) = bind_info.get_bind_string(BindStringKind::Language) {
            headers.push(("Accept-Language".to_string(), language));
        }
        if let Some(ref referrer) = info.referrer {
            headers.push(("Referer".to_string(), referrer.clone()));
        }
        if let Some(negotiate) = bind_info.http_negotiate() {
            headers.extend(negotiate.additional_headers(locator.as_str()));
        }

        TransportRequest {
            url: locator.as_str().to_string(),
            verb: info.verb.as_str().to_string(),
            headers,
            body: info.post_data,
        }
    }

    fn on_head(&mut self, sink: &dyn ProtocolSink) -> Result<()> {
        let head = match self.shared()?.head.clone() {
            Some(head) => head,
            None => return Ok(()),
        };

        if let Some(ref location) = head.location {
            let target = match self.locator.as_ref() {
                Some(base) => base
                    .resolve_reference(location)
                    .map(|l| l.as_str().to_string())
                    .unwrap_or_else(|_| location.clone()),
                None => location.clone(),
            };
            tracing::debug!(status = head.status, location = %target, "Redirect received");
            self.finish(sink, &BindError::RedirectFailed {
                status: head.status,
                location: target,
            });
            return Ok(());
        }

        if head.status >= 400 {
            let url = self
                .locator
                .as_ref()
                .map(|l| l.as_str().to_string())
                .unwrap_or_default();
            self.finish(sink, &BindError::Http {
                status: head.status,
                url,
            });
            return Ok(());
        }

        let url = self.locator.as_ref().map(|l| l.as_str().to_string());
        sink.report_progress(BindStatus::SendingRequest, url.as_deref());
        match head.content_type {
            Some(ref declared) if !mime::is_ambiguous(declared) => {
                sink.report_progress(BindStatus::MimeTypeAvailable, Some(declared));
            }
            _ => self.mime_pending = true,
        }
        Ok(())
    }

    fn report_pending_mime(&mut self, sink: &dyn ProtocolSink, first: Option<&Bytes>) {
        if !self.mime_pending {
            return;
        }
        self.mime_pending = false;
        let sniffed = first.and_then(|chunk| mime::sniff_from_data(chunk));
        let guessed = self
            .locator
            .as_ref()
            .and_then(|l| mime::guess_from_path(l.path()));
        let declared = self
            .shared
            .lock()
            .ok()
            .and_then(|s| s.head.as_ref().and_then(|h| h.content_type.clone()));

        let mime = sniffed
            .map(str::to_string)
            .or(guessed)
            .or(declared);
        if let Some(mime) = mime {
            sink.report_progress(BindStatus::MimeTypeAvailable, Some(&mime));
        }
    }

    fn on_data(&mut self, sink: &dyn ProtocolSink) -> Result<()> {
        let (first, received, total) = {
            let shared = self.shared()?;
            let total = shared.head.as_ref().and_then(|h| h.content_length);
            (shared.chunks.front().cloned(), shared.received, total)
        };
        if received == 0 {
            return Ok(());
        }

        let flags = if self.first_data_reported {
            DataFlags::INTERMEDIATE
        } else {
            self.report_pending_mime(sink, first.as_ref());
            sink.report_progress(BindStatus::BeginDownloadData, None);
            self.first_data_reported = true;
            DataFlags::FIRST
        };
        sink.report_progress(BindStatus::DownloadingData, None);
        sink.report_data(flags, received, total.unwrap_or(0));
        Ok(())
    }

    fn on_eof(&mut self, sink: &dyn ProtocolSink) -> Result<()> {
        let received = self.shared()?.received;
        self.report_pending_mime(sink, None);

        let flags = if self.first_data_reported {
            DataFlags::LAST | DataFlags::FULLY_AVAILABLE
        } else {
            DataFlags::FIRST | DataFlags::LAST | DataFlags::FULLY_AVAILABLE
        };
        self.first_data_reported = true;
        sink.report_data(flags, received, received);
        sink.report_progress(BindStatus::EndDownloadData, None);
        if self.latch.fire() {
            sink.report_result(ResultCode::Ok, 0, None);
        }
        Ok(())
    }

    fn finish_terminate(&mut self, options: TerminateOptions) {
        self.stop_worker();
        if let Ok(mut shared) = self.shared.lock() {
            shared.eof = true;
            if options.discard_buffered {
                shared.chunks.clear();
            }
        }
    }
}

impl Drop for HttpHandler {
    fn drop(&mut self) {
        self.stop_worker();
    }
}

async fn fetch(
    transport: Arc<dyn Transport>,
    request: TransportRequest,
    shared: Arc<Mutex<Shared>>,
    sink: Arc<dyn ProtocolSink>,
) {
    let url = request.url.clone();
    let response = match transport.send(request).await {
        Ok(response) => response,
        Err(e) => {
            tracing::debug!(url = %url, error = %e, "Request failed");
            if let Ok(mut s) = shared.lock() {
                s.error = Some(e);
            }
            sink.switch(ProtocolData::new(STATE_ERROR));
            return;
        }
    };

    let head = ResponseHead::from_response(&response);
    let carries_body = head.carries_body();
    tracing::debug!(url = %url, status = head.status, "Response head received");
    if let Ok(mut s) = shared.lock() {
        s.head = Some(head);
    }
    sink.switch(ProtocolData::new(STATE_HEAD));
    if !carries_body {
        return;
    }

    let mut body = response.body;
    while let Some(chunk) = body.next().await {
        match chunk {
            Ok(chunk) if chunk.is_empty() => continue,
            Ok(chunk) => {
                if let Ok(mut s) = shared.lock() {
                    s.received += chunk.len() as u64;
                    s.chunks.push_back(chunk);
                }
                sink.switch(ProtocolData::new(STATE_DATA));
            }
            Err(e) => {
                if let Ok(mut s) = shared.lock() {
                    s.error = Some(e);
                }
                sink.switch(ProtocolData::new(STATE_ERROR));
                return;
            }
        }
    }

    if let Ok(mut s) = shared.lock() {
        s.eof = true;
    }
    sink.switch(ProtocolData::new(STATE_EOF));
}

impl ProtocolHandler for HttpHandler {
    fn start(
        &mut self,
        locator: &Locator,
        sink: Arc<dyn ProtocolSink>,
        bind_info: &dyn BindInfoSource,
    ) -> Result<()> {
        if !NETWORK_SCHEMES.contains(&locator.scheme()) {
            return Err(BindError::UseDefault(format!(
                "'{}' is not a network locator",
                locator
            )));
        }

        self.stop_worker();
        self.shared = Arc::new(Mutex::new(Shared::default()));
        self.latch.reset();
        self.pending_terminate = None;
        self.mime_pending = false;
        self.first_data_reported = false;
        self.failed = false;
        self.locator = Some(locator.clone());
        self.sink = Some(Arc::clone(&sink));

        let runtime = match tokio::runtime::Handle::try_current() {
            Ok(runtime) => runtime,
            Err(e) => {
                let err = BindError::Connection(format!("No async runtime available: {}", e));
                self.finish(sink.as_ref(), &err);
                return Err(err);
            }
        };

        let host = locator.host().unwrap_or_default().to_string();
        sink.report_progress(BindStatus::FindingResource, Some(&host));
        sink.report_progress(BindStatus::Connecting, Some(&host));

        let request = Self::build_request(locator, bind_info);
        tracing::debug!(
            url = %request.url,
            verb = %request.verb,
            transport = self.transport.name(),
            "Request dispatched"
        );
        self.task = Some(runtime.spawn(fetch(
            Arc::clone(&self.transport),
            request,
            Arc::clone(&self.shared),
            sink,
        )));
        Ok(())
    }

    fn continue_async(&mut self, data: ProtocolData) -> Result<()> {
        let sink = match self.sink.clone() {
            Some(sink) => sink,
            None => return Ok(()),
        };
        if self.failed || self.latch.fired() {
            return Ok(());
        }

        match data.state {
            STATE_HEAD => self.on_head(sink.as_ref()),
            STATE_DATA => self.on_data(sink.as_ref()),
            STATE_EOF => self.on_eof(sink.as_ref()),
            STATE_ERROR => {
                let err = self.shared()?.error.take().unwrap_or_else(|| {
                    BindError::Connection("Request failed".to_string())
                });
                self.finish(sink.as_ref(), &err);
                Ok(())
            }
            other => Err(BindError::InvalidArgument(format!(
                "Unknown continuation state {}",
                other
            ))),
        }
    }

    fn read(&mut self, buf: &mut [u8]) -> Result<(usize, ReadStatus)> {
        if self.locator.is_none() {
            return Err(BindError::DataNotAvailable(
                "No request was started".to_string(),
            ));
        }
        let failed = self.failed;
        let mut shared = self.shared()?;

        let mut filled = 0;
        while filled < buf.len() {
            let chunk = match shared.chunks.front_mut() {
                Some(chunk) => chunk,
                None => break,
            };
            let n = chunk.len().min(buf.len() - filled);
            buf[filled..filled + n].copy_from_slice(&chunk[..n]);
            chunk.advance(n);
            filled += n;
            if chunk.is_empty() {
                shared.chunks.pop_front();
            }
        }

        if filled > 0 {
            Ok((filled, ReadStatus::Ok))
        } else if shared.eof {
            Ok((0, ReadStatus::Complete))
        } else if failed || shared.error.is_some() {
            Err(BindError::DataNotAvailable("Request failed".to_string()))
        } else {
            Ok((0, ReadStatus::WouldBlock))
        }
    }

    fn lock(&mut self) -> Result<()> {
        self.locks.lock();
        Ok(())
    }

    fn unlock(&mut self) -> Result<()> {
        if self.locks.unlock() {
            if let Some(options) = self.pending_terminate.take() {
                self.finish_terminate(options);
            }
        }
        Ok(())
    }

    fn terminate(&mut self, options: TerminateOptions) -> Result<()> {
        if self.locks.is_locked() {
            self.pending_terminate = Some(options);
        } else {
            self.finish_terminate(options);
        }
        Ok(())
    }

    fn abort(&mut self, reason: &str) -> Result<()> {
        self.stop_worker();
        if let Some(sink) = self.sink.clone() {
            self.finish(sink.as_ref(), &BindError::Cancelled(reason.to_string()));
        }
        Ok(())
    }

    fn name(&self) -> &str {
        "http"
    }
}
