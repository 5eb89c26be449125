//! Protocol handler trait — the core abstraction for scheme backends
//!
//! Every scheme family (file, http/https/ftp, archive, mk, about, res)
//! implements `ProtocolHandler`. A handler fetches bytes for exactly one
//! bound request at a time and reports into a `ProtocolSink`. The
//! `BindingSession` owns the handler and is the sink it reports into.

use crate::error::{BindError, Result, ResultCode};
use crate::locator::Locator;
use bytes::Bytes;
use serde::{Deserialize, Serialize};
use std::ops::BitOr;
use std::sync::Arc;

pub mod about;
pub mod archive;
pub mod file;
pub mod http;
pub mod mk;
pub mod res;

/// Progress status codes, in the order a bind may emit them
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BindStatus {
    FindingResource,
    Connecting,
    Redirecting,
    SendingRequest,
    MimeTypeAvailable,
    CacheFileNameAvailable,
    BeginDownloadData,
    DownloadingData,
    EndDownloadData,
}

impl BindStatus {
    /// Statuses emitted only by network-backed handlers
    pub fn is_network_phase(self) -> bool {
        matches!(self, BindStatus::FindingResource | BindStatus::Connecting)
    }
}

/// Flags attached to a data notification
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
pub struct DataFlags(u32);

impl DataFlags {
    pub const NONE: DataFlags = DataFlags(0);
    pub const FIRST: DataFlags = DataFlags(0x01);
    pub const INTERMEDIATE: DataFlags = DataFlags(0x02);
    pub const LAST: DataFlags = DataFlags(0x04);
    pub const FULLY_AVAILABLE: DataFlags = DataFlags(0x08);

    pub fn bits(self) -> u32 {
        self.0
    }

    pub fn contains(self, other: DataFlags) -> bool {
        self.0 & other.0 == other.0
    }
}

impl BitOr for DataFlags {
    type Output = DataFlags;

    fn bitor(self, rhs: DataFlags) -> DataFlags {
        DataFlags(self.0 | rhs.0)
    }
}

/// Outcome of a `read` that did not fail
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReadStatus {
    /// Bytes were produced; more may follow
    Ok,
    /// Stream exhausted; zero bytes
    Complete,
    /// Nothing buffered yet; wait for a switch and resume with `continue_async`
    WouldBlock,
}

/// Opaque continuation handed from a handler to its sink via `switch`
///
/// Meaning of `state` and `flags` is private to the handler that produced it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ProtocolData {
    pub state: u32,
    pub flags: u32,
}

impl ProtocolData {
    pub fn new(state: u32) -> Self {
        Self { state, flags: 0 }
    }
}

/// Options for `terminate`
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TerminateOptions {
    /// Drop buffered data too instead of keeping it readable
    pub discard_buffered: bool,
}

/// Request verb
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum BindVerb {
    #[default]
    Get,
    Post,
    Put,
    Custom(String),
}

impl BindVerb {
    pub fn as_str(&self) -> &str {
        match self {
            BindVerb::Get => "GET",
            BindVerb::Post => "POST",
            BindVerb::Put => "PUT",
            BindVerb::Custom(verb) => verb,
        }
    }
}

/// Per-bind configuration pulled from the caller
#[derive(Debug, Clone, Default)]
pub struct BindInfo {
    pub verb: BindVerb,

    /// Request body for POST/PUT
    pub post_data: Option<Bytes>,

    /// Extra request headers
    pub headers: Vec<(String, String)>,

    /// Locator the navigation originates from; enables the zone-elevation check
    pub referrer: Option<String>,

    /// URL action ids that must be allowed before response bytes are released
    pub required_actions: Vec<u32>,

    /// Skip MIME filter interposition for this bind
    pub ignore_mime_filters: bool,

    /// Never follow redirects, even when the callback would approve them
    pub no_auto_redirect: bool,
}

/// String kinds a handler may pull through `get_bind_string`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BindStringKind {
    UserAgent,
    AcceptMimes,
    Language,
    Username,
    Password,
    PostCookie,
}

/// Pull-style configuration source a handler queries during `start`
pub trait BindInfoSource: Send + Sync {
    fn get_bind_info(&self) -> BindInfo;

    /// Default: no string of this kind
    fn get_bind_string(&self, _kind: BindStringKind) -> Option<String> {
        None
    }

    /// Optional request customization capability; absent by default
    fn http_negotiate(&self) -> Option<&dyn http::HttpNegotiate> {
        None
    }
}

impl BindInfoSource for BindInfo {
    fn get_bind_info(&self) -> BindInfo {
        self.clone()
    }
}

/// Notification surface a handler reports into
///
/// May be invoked from a thread other than the one that called `start`.
pub trait ProtocolSink: Send + Sync {
    /// Hand a continuation back; the owner resumes via `continue_async`
    fn switch(&self, data: ProtocolData);

    fn report_progress(&self, status: BindStatus, text: Option<&str>);

    fn report_data(&self, flags: DataFlags, progress: u64, progress_max: u64);

    /// Final notification for the bind
    fn report_result(&self, code: ResultCode, error: u32, text: Option<&str>);
}

/// Report `err` as the final result on `sink`
pub fn report_error(sink: &dyn ProtocolSink, err: &BindError) {
    let text = err.result_text();
    sink.report_result(err.result_code(), err.error_detail(), Some(&text));
}

/// Active worker that fetches bytes for one bound request
pub trait ProtocolHandler: Send {
    /// Begin fetching
    ///
    /// Returns `BindError::UseDefault` when the locator's scheme prefix does
    /// not belong to this handler. Failures after the sink is engaged are
    /// reported through it before the error is returned.
    fn start(
        &mut self,
        locator: &Locator,
        sink: Arc<dyn ProtocolSink>,
        bind_info: &dyn BindInfoSource,
    ) -> Result<()>;

    /// Resume a suspended fetch with a continuation previously passed to `switch`
    fn continue_async(&mut self, _data: ProtocolData) -> Result<()> {
        Ok(())
    }

    /// Pull bytes into `buf`
    fn read(&mut self, buf: &mut [u8]) -> Result<(usize, ReadStatus)>;

    /// Pin the underlying resource across reads
    fn lock(&mut self) -> Result<()>;

    /// Release one pin; a no-op when nothing is pinned
    fn unlock(&mut self) -> Result<()>;

    /// Release handler-owned resources; buffered data stays readable
    fn terminate(&mut self, options: TerminateOptions) -> Result<()>;

    /// Request cancellation; the sink still receives a final result
    fn abort(&mut self, reason: &str) -> Result<()>;

    /// Handler family name for logs
    fn name(&self) -> &str;
}

/// Reference-count style pin shared by the handler variants
#[derive(Debug, Default)]
pub(crate) struct LockCount(u32);

impl LockCount {
    pub(crate) fn lock(&mut self) {
        self.0 = self.0.saturating_add(1);
    }

    /// Returns true when this call dropped the last pin
    pub(crate) fn unlock(&mut self) -> bool {
        if self.0 == 0 {
            return false;
        }
        self.0 -= 1;
        self.0 == 0
    }

    pub(crate) fn is_locked(&self) -> bool {
        self.0 > 0
    }
}

/// Fully-buffered body with a read cursor
#[derive(Debug, Default)]
pub(crate) struct BufferedBody {
    data: Bytes,
    offset: usize,
}

impl BufferedBody {
    pub(crate) fn new(data: Bytes) -> Self {
        Self { data, offset: 0 }
    }

    pub(crate) fn len(&self) -> usize {
        self.data.len()
    }

    pub(crate) fn read(&mut self, buf: &mut [u8]) -> (usize, ReadStatus) {
        let remaining = &self.data[self.offset..];
        if remaining.is_empty() {
            return (0, ReadStatus::Complete);
        }
        let n = remaining.len().min(buf.len());
        buf[..n].copy_from_slice(&remaining[..n]);
        self.offset += n;
        (n, ReadStatus::Ok)
    }
}

/// Tracks whether the final result for the current request was sent
#[derive(Debug, Default)]
pub(crate) struct ResultLatch(bool);

impl ResultLatch {
    /// Returns true the first time only
    pub(crate) fn fire(&mut self) -> bool {
        !std::mem::replace(&mut self.0, true)
    }

    pub(crate) fn reset(&mut self) {
        self.0 = false;
    }

    pub(crate) fn fired(&self) -> bool {
        self.0
    }
}


#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_data_flags() {
        let flags = DataFlags::FIRST | DataFlags::FULLY_AVAILABLE;
        assert!(flags.contains(DataFlags::FIRST));
        assert!(flags.contains(DataFlags::FULLY_AVAILABLE));
        assert!(!flags.contains(DataFlags::LAST));
        assert_eq!(flags.bits(), 0x09);
    }

    #[test]
    fn test_lock_count_unlock_without_lock_is_noop() {
        let mut count = LockCount::default();
        assert!(!count.unlock());
        count.lock();
        count.lock();
        assert!(!count.unlock());
        assert!(count.unlock());
        assert!(!count.is_locked());
    }

    #[test]
    fn test_buffered_body() {
        let mut body = BufferedBody::new(Bytes::from_static(b"hello"));
        let mut buf = [0u8; 3];
        assert_eq!(body.read(&mut buf), (3, ReadStatus::Ok));
        assert_eq!(&buf, b"hel");
        assert_eq!(body.read(&mut buf), (2, ReadStatus::Ok));
        assert_eq!(body.read(&mut buf), (0, ReadStatus::Complete));
    }

    #[test]
    fn test_result_latch() {
        let mut latch = ResultLatch::default();
        assert!(latch.fire());
        assert!(!latch.fire());
        latch.reset();
        assert!(latch.fire());
    }

    #[test]
    fn test_bind_info_source_for_bind_info() {
        let info = BindInfo {
            verb: BindVerb::Post,
            ..Default::default()
        };
        assert_eq!(info.get_bind_info().verb.as_str(), "POST");
        assert_eq!(info.get_bind_string(BindStringKind::UserAgent), None);
    }
}
