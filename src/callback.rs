//! Caller-supplied bind status callback
//!
//! The callback is the sink a bind reports into and the object the handler
//! pulls its configuration from. Optional capabilities (security responder,
//! redirect approval, HTTP negotiation) are discovered through accessor
//! methods that return `None` when the callback does not provide them.

use crate::error::ResultCode;
use crate::protocol::http::HttpNegotiate;
use crate::protocol::{BindInfo, BindStatus, BindStringKind, DataFlags};
use crate::zone::SecurityResponder;

/// Decides whether a bind may follow a redirect
pub trait RedirectApprover: Send + Sync {
    fn approve_redirect(&self, from: &str, to: &str) -> bool;
}

/// Receives the notifications of one bind
///
/// Methods may be invoked from a thread other than the one that started the
/// bind. `report_result` is always the last call for a bind.
pub trait BindStatusCallback: Send + Sync {
    fn report_progress(&self, _status: BindStatus, _text: Option<&str>) {}

    fn report_data(&self, _flags: DataFlags, _progress: u64, _progress_max: u64) {}

    fn report_result(&self, code: ResultCode, error: u32, text: Option<&str>);

    /// Per-bind configuration, pulled once when the bind starts
    fn get_bind_info(&self) -> BindInfo {
        BindInfo::default()
    }

    fn get_bind_string(&self, _kind: BindStringKind) -> Option<String> {
        None
    }

    fn security_responder(&self) -> Option<&dyn SecurityResponder> {
        None
    }

    fn redirect_approver(&self) -> Option<&dyn RedirectApprover> {
        None
    }

    fn http_negotiate(&self) -> Option<&dyn HttpNegotiate> {
        None
    }
}

/// One notification as seen by a callback
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CallbackEvent {
    Progress(BindStatus, Option<String>),
    Data(DataFlags, u64, u64),
    Result(ResultCode, u32, Option<String>),
}

/// Callback that records every notification, in order
///
/// Useful for tests and for callers that prefer to inspect a bind after the
/// fact. Carries a `BindInfo` to hand out.
#[derive(Default)]
pub struct RecordingCallback {
    bind_info: BindInfo,
    events: std::sync::Mutex<Vec<CallbackEvent>>,
}

impl RecordingCallback {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_bind_info(bind_info: BindInfo) -> Self {
        Self {
            bind_info,
            events: std::sync::Mutex::new(Vec::new()),
        }
    }

    pub fn events(&self) -> Vec<CallbackEvent> {
        self.events
            .lock()
            .map(|e| e.clone())
            .unwrap_or_default()
    }

    pub fn results(&self) -> Vec<ResultCode> {
        self.events()
            .into_iter()
            .filter_map(|e| match e {
                CallbackEvent::Result(code, _, _) => Some(code),
                _ => None,
            })
            .collect()
    }

    pub fn progress(&self) -> Vec<(BindStatus, Option<String>)> {
        self.events()
            .into_iter()
            .filter_map(|e| match e {
                CallbackEvent::Progress(status, text) => Some((status, text)),
                _ => None,
            })
            .collect()
    }

    pub fn data(&self) -> Vec<(DataFlags, u64, u64)> {
        self.events()
            .into_iter()
            .filter_map(|e| match e {
                CallbackEvent::Data(flags, progress, max) => Some((flags, progress, max)),
                _ => None,
            })
            .collect()
    }

    fn push(&self, event: CallbackEvent) {
        if let Ok(mut events) = self.events.lock() {
            events.push(event);
        }
    }
}

impl BindStatusCallback for RecordingCallback {
    fn report_progress(&self, status: BindStatus, text: Option<&str>) {
        self.push(CallbackEvent::Progress(status, text.map(str::to_string)));
    }

    fn report_data(&self, flags: DataFlags, progress: u64, progress_max: u64) {
        self.push(CallbackEvent::Data(flags, progress, progress_max));
    }

    fn report_result(&self, code: ResultCode, error: u32, text: Option<&str>) {
        self.push(CallbackEvent::Result(code, error, text.map(str::to_string)));
    }

    fn get_bind_info(&self) -> BindInfo {
        self.bind_info.clone()
    }
}
