//! Binding session — one in-flight request and its state machine
//!
//! A `BindingSession` owns the handler for one bind and acts as the sink the
//! handler reports into. Handler notifications may arrive from any thread;
//! they are queued and delivered to the caller's `BindStatusCallback` in
//! order by whichever thread holds the delivery role, never while the
//! handler itself is borrowed. `Switch` notifications are turned into
//! `continue_async` calls on the handler by the same delivery loop, which
//! keeps continuations for one bind from racing each other.
//!
//! Phases move `Idle → Connecting → SendingRequest → StartDownloading →
//! Downloading` and end in exactly one of `Completed`, `Aborted`, `Failed`.
//! Response bytes are held back until the required URL actions pass the
//! zone policy, which happens on entry to `StartDownloading`.

use crate::callback::BindStatusCallback;
use crate::config::SessionConfig;
use crate::error::{BindError, Result, ResultCode};
use crate::filter::{FilteredHandler, MimeFilterRegistry};
use crate::locator::Locator;
use crate::protocol::{
    BindInfo, BindInfoSource, BindStatus, BindStringKind, DataFlags, ProtocolData,
    ProtocolHandler, ProtocolSink, ReadStatus, TerminateOptions,
};
use crate::protocol::http::HttpNegotiate;
use crate::registry::{FactoryRef, SchemeRegistry};
use crate::zone::{ActionContext, UrlAction, Verdict, ZonePolicyEngine};
use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, TryLockError, Weak};
use tokio::sync::Notify;

/// Lifecycle phase of a bind
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum BindPhase {
    Idle,
    Connecting,
    SendingRequest,
    StartDownloading,
    Downloading,
    Completed,
    Aborted,
    Failed,
}

impl BindPhase {
    pub fn is_terminal(self) -> bool {
        matches!(self, BindPhase::Completed | BindPhase::Aborted | BindPhase::Failed)
    }
}

/// Final result of a bind, as delivered to the callback
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BindOutcome {
    pub code: ResultCode,
    pub error: u32,
    pub text: Option<String>,
}

impl BindOutcome {
    pub fn is_success(&self) -> bool {
        self.code.is_success()
    }
}

/// Shared collaborators every bind of one session uses
#[derive(Clone)]
pub(crate) struct BindEnv {
    pub registry: Arc<SchemeRegistry>,
    pub zones: Arc<ZonePolicyEngine>,
    pub filters: Arc<MimeFilterRegistry>,
    pub config: Arc<SessionConfig>,
}

#[derive(Debug)]
enum Notification {
    Switch(ProtocolData),
    Progress(BindStatus, Option<String>),
    Data(DataFlags, u64, u64),
    Result(ResultCode, u32, Option<String>),
}

struct BindState {
    phase: BindPhase,
    locator: Locator,
    generation: u64,
    queue: VecDeque<(u64, Notification)>,
    result_queued: bool,
    outcome: Option<BindOutcome>,
    released: bool,
    filtered: bool,
    mime_type: Option<String>,
    abort_requested: bool,
    redirects: u32,
}

impl BindState {
    fn advance(&mut self, id: &str, phase: BindPhase) {
        if phase > self.phase && !self.phase.is_terminal() {
            tracing::debug!(bind_id = %id, from = ?self.phase, to = ?phase, "Bind phase changed");
            self.phase = phase;
        }
    }
}

struct BindCore {
    id: String,
    env: BindEnv,
    bind_info: BindInfo,
    callback: Mutex<Option<Arc<dyn BindStatusCallback>>>,
    handler: Mutex<Option<Box<dyn ProtocolHandler>>>,
    state: Mutex<BindState>,
    delivering: AtomicBool,
    notify: Notify,
}

/// Sink handed to one handler generation
struct SinkProxy {
    core: Weak<BindCore>,
    generation: u64,
}

impl SinkProxy {
    fn post(&self, notification: Notification) {
        if let Some(core) = self.core.upgrade() {
            core.enqueue(self.generation, notification);
        }
    }
}

impl ProtocolSink for SinkProxy {
    fn switch(&self, data: ProtocolData) {
        self.post(Notification::Switch(data));
    }

    fn report_progress(&self, status: BindStatus, text: Option<&str>) {
        self.post(Notification::Progress(status, text.map(str::to_string)));
    }

    fn report_data(&self, flags: DataFlags, progress: u64, progress_max: u64) {
        self.post(Notification::Data(flags, progress, progress_max));
    }

    fn report_result(&self, code: ResultCode, error: u32, text: Option<&str>) {
        self.post(Notification::Result(code, error, text.map(str::to_string)));
    }
}

/// What a handler sees when it pulls configuration during `start`
struct CallbackInfo {
    bind_info: BindInfo,
    user_agent: String,
    callback: Option<Arc<dyn BindStatusCallback>>,
}

impl BindInfoSource for CallbackInfo {
    fn get_bind_info(&self) -> BindInfo {
        self.bind_info.clone()
    }

    fn get_bind_string(&self, kind: BindStringKind) -> Option<String> {
        let supplied = self
            .callback
            .as_ref()
            .and_then(|callback| callback.get_bind_string(kind));
        match (supplied, kind) {
            (Some(value), _) => Some(value),
            (None, BindStringKind::UserAgent) => Some(self.user_agent.clone()),
            (None, _) => None,
        }
    }

    fn http_negotiate(&self) -> Option<&dyn HttpNegotiate> {
        self.callback
            .as_ref()
            .and_then(|callback| callback.http_negotiate())
    }
}

fn recover<'a, T>(
    result: std::result::Result<MutexGuard<'a, T>, std::sync::PoisonError<MutexGuard<'a, T>>>,
) -> MutexGuard<'a, T> {
    result.unwrap_or_else(|poisoned| poisoned.into_inner())
}

impl BindCore {
    fn state(&self) -> MutexGuard<'_, BindState> {
        recover(self.state.lock())
    }

    fn handler(&self) -> MutexGuard<'_, Option<Box<dyn ProtocolHandler>>> {
        recover(self.handler.lock())
    }

    fn callback(&self) -> Option<Arc<dyn BindStatusCallback>> {
        recover(self.callback.lock()).clone()
    }

    fn enqueue(self: &Arc<Self>, generation: u64, notification: Notification) {
        {
            let mut state = self.state();
            if generation != state.generation {
                tracing::debug!(bind_id = %self.id, ?notification, "Dropped stale notification");
                return;
            }
            if state.outcome.is_some() {
                if matches!(notification, Notification::Result(..)) {
                    tracing::warn!(bind_id = %self.id, ?notification, "Dropped result after completion");
                }
                return;
            }
            if matches!(notification, Notification::Result(..)) {
                if state.result_queued {
                    tracing::warn!(bind_id = %self.id, ?notification, "Dropped duplicate result");
                    return;
                }
                state.result_queued = true;
            }
            state.queue.push_back((generation, notification));
        }
        self.deliver();
    }

    /// Drain the notification queue unless another caller already is, or the
    /// handler is borrowed (its borrower delivers once it lets go)
    fn deliver(self: &Arc<Self>) {
        loop {
            if self.delivering.swap(true, Ordering::AcqRel) {
                return;
            }
            let busy = matches!(self.handler.try_lock(), Err(TryLockError::WouldBlock));
            if busy {
                self.delivering.store(false, Ordering::Release);
                return;
            }

            loop {
                let next = self.state().queue.pop_front();
                match next {
                    Some((generation, notification)) => self.dispatch(generation, notification),
                    None => break,
                }
            }

            self.delivering.store(false, Ordering::Release);
            if self.state().queue.is_empty() {
                return;
            }
        }
    }

    fn dispatch(self: &Arc<Self>, generation: u64, notification: Notification) {
        {
            let state = self.state();
            if generation != state.generation || state.outcome.is_some() {
                return;
            }
        }

        match notification {
            Notification::Switch(data) => {
                let result = match self.handler().as_mut() {
                    Some(handler) => handler.continue_async(data),
                    None => Ok(()),
                };
                if let Err(e) = result {
                    self.fail_unreported(generation, e);
                }
            }
            Notification::Progress(status, text) => self.on_progress(status, text),
            Notification::Data(flags, progress, progress_max) => {
                if !self.enter_start_downloading() {
                    return;
                }
                self.state().advance(&self.id, BindPhase::Downloading);
                if let Some(callback) = self.callback() {
                    callback.report_data(flags, progress, progress_max);
                }
            }
            Notification::Result(ResultCode::RedirectFailed, error, Some(target)) => {
                self.try_redirect(error, target);
            }
            Notification::Result(ResultCode::Ok, error, text) => {
                if !self.enter_start_downloading() {
                    return;
                }
                self.complete(ResultCode::Ok, error, text);
            }
            Notification::Result(code, error, text) => self.complete(code, error, text),
        }
    }

    /// Queue `err` as the result unless the handler already reported one
    fn fail_unreported(self: &Arc<Self>, generation: u64, err: BindError) {
        let text = err.result_text();
        let queued = self.state().result_queued;
        if queued {
            tracing::warn!(bind_id = %self.id, error = %err, "Handler error after result");
            return;
        }
        self.enqueue(
            generation,
            Notification::Result(err.result_code(), err.error_detail(), Some(text)),
        );
    }

    fn on_progress(self: &Arc<Self>, status: BindStatus, text: Option<String>) {
        let text = match status {
            BindStatus::FindingResource | BindStatus::Connecting => {
                self.state().advance(&self.id, BindPhase::Connecting);
                text
            }
            BindStatus::SendingRequest | BindStatus::CacheFileNameAvailable => {
                self.state().advance(&self.id, BindPhase::SendingRequest);
                text
            }
            BindStatus::MimeTypeAvailable => {
                if !self.enter_start_downloading() {
                    return;
                }
                let declared = text.unwrap_or_default();
                let reported = self.interpose_filter(&declared);
                self.state().mime_type = Some(reported.clone());
                Some(reported)
            }
            BindStatus::BeginDownloadData => {
                if !self.enter_start_downloading() {
                    return;
                }
                text
            }
            _ => text,
        };

        if let Some(callback) = self.callback() {
            callback.report_progress(status, text.as_deref());
        }
    }

    /// Policy gate in front of the first response bytes; false when the bind failed
    fn enter_start_downloading(self: &Arc<Self>) -> bool {
        let locator = {
            let state = self.state();
            if state.released {
                return true;
            }
            state.locator.clone()
        };

        let callback = self.callback();
        let responder = callback.as_ref().and_then(|c| c.security_responder());
        let context = ActionContext {
            object_id: None,
            no_ui: true,
        };
        for &action in &self.bind_info.required_actions {
            let verdict = self
                .env
                .zones
                .evaluate_action(&locator, action, &context, responder);
            match verdict {
                Ok(Verdict::Allow) => {}
                Ok(_) => {
                    let zone = self
                        .env
                        .zones
                        .map_url_to_zone(&locator, responder)
                        .map(|z| z.to_string())
                        .unwrap_or_else(|_| "unknown".to_string());
                    self.complete_error(BindError::PolicyDisallowed { action, zone });
                    return false;
                }
                Err(e) => {
                    self.complete_error(e);
                    return false;
                }
            }
        }

        let mut state = self.state();
        state.released = true;
        state.advance(&self.id, BindPhase::StartDownloading);
        true
    }

    /// Wrap the handler in a registered filter for `declared`; returns the
    /// type to report downstream
    fn interpose_filter(self: &Arc<Self>, declared: &str) -> String {
        if !self.env.config.enable_mime_filters || self.bind_info.ignore_mime_filters {
            return declared.to_string();
        }
        if self.state().filtered {
            return declared.to_string();
        }

        let factory = match self.env.filters.find(declared) {
            Ok(Some(factory)) => factory,
            Ok(None) => return declared.to_string(),
            Err(e) => {
                tracing::warn!(bind_id = %self.id, error = %e, "MIME filter lookup failed");
                return declared.to_string();
            }
        };
        let filter = match factory.create() {
            Ok(filter) => filter,
            Err(e) => {
                tracing::warn!(bind_id = %self.id, error = %e, "MIME filter creation failed");
                return declared.to_string();
            }
        };

        let reported = filter.output_type(declared);
        let mut slot = self.handler();
        if let Some(inner) = slot.take() {
            tracing::debug!(
                bind_id = %self.id,
                content_type = %declared,
                filter = filter.name(),
                "MIME filter interposed"
            );
            *slot = Some(Box::new(FilteredHandler::new(inner, filter)));
            self.state().filtered = true;
        }
        reported
    }

    fn complete_error(self: &Arc<Self>, err: BindError) {
        let text = err.result_text();
        self.complete(err.result_code(), err.error_detail(), Some(text));
    }

    fn complete(self: &Arc<Self>, code: ResultCode, error: u32, text: Option<String>) {
        let callback = {
            let mut state = self.state();
            if state.outcome.is_some() {
                tracing::warn!(bind_id = %self.id, code = ?code, "Dropped result after completion");
                return;
            }
            let phase = match code {
                ResultCode::Ok => BindPhase::Completed,
                ResultCode::Cancelled => BindPhase::Aborted,
                _ => BindPhase::Failed,
            };
            tracing::debug!(bind_id = %self.id, from = ?state.phase, to = ?phase, "Bind phase changed");
            state.phase = phase;
            state.queue.clear();
            if code.is_success() {
                state.released = true;
            }
            state.outcome = Some(BindOutcome {
                code,
                error,
                text: text.clone(),
            });
            recover(self.callback.lock()).take()
        };

        if !code.is_success() {
            if let Some(handler) = self.handler().as_mut() {
                if let Err(e) = handler.terminate(TerminateOptions::default()) {
                    tracing::warn!(bind_id = %self.id, error = %e, "Terminate after failure failed");
                }
            }
        }

        tracing::info!(bind_id = %self.id, code = ?code, error, "Bind finished");
        if let Some(callback) = callback {
            callback.report_result(code, error, text.as_deref());
        }
        self.notify.notify_waiters();
    }

    fn try_redirect(self: &Arc<Self>, status: u32, target: String) {
        let refused = |reason: &str| {
            tracing::info!(bind_id = %self.id, target = %target, reason, "Redirect not followed");
            self.complete(ResultCode::RedirectFailed, status, Some(target.clone()));
        };

        let (current, redirects, aborted) = {
            let state = self.state();
            (state.locator.clone(), state.redirects, state.abort_requested)
        };
        if aborted {
            return refused("bind aborted");
        }
        if self.bind_info.no_auto_redirect {
            return refused("redirects disabled for this bind");
        }
        if redirects >= self.env.config.max_redirects {
            return refused("too many redirects");
        }
        let next = match current.resolve_reference(&target) {
            Ok(next) => next,
            Err(_) => return refused("target is not a valid locator"),
        };

        let callback = self.callback();
        let approved = match callback.as_ref().and_then(|c| c.redirect_approver()) {
            Some(approver) => approver.approve_redirect(current.as_str(), next.as_str()),
            None => self.env.config.auto_redirect,
        };
        if !approved {
            return refused("not approved");
        }

        let responder = callback.as_ref().and_then(|c| c.security_responder());
        match self.env.zones.check_zone_elevation(&current, &next, responder) {
            Ok(Verdict::Allow) => {}
            Ok(_) => {
                let zone = self
                    .env
                    .zones
                    .map_url_to_zone(&current, responder)
                    .map(|z| z.to_string())
                    .unwrap_or_else(|_| "unknown".to_string());
                return self.complete_error(BindError::PolicyDisallowed {
                    action: UrlAction::FeatureZoneElevation.id(),
                    zone,
                });
            }
            Err(e) => return self.complete_error(e),
        }

        let factory = match self.env.registry.resolve_locator(&next) {
            Ok(factory) => factory,
            Err(e) => return self.complete_error(e),
        };

        let old = self.handler().take();
        if let Some(mut old) = old {
            if let Err(e) = old.terminate(TerminateOptions {
                discard_buffered: true,
            }) {
                tracing::warn!(bind_id = %self.id, error = %e, "Terminate during redirect failed");
            }
        }

        {
            let mut state = self.state();
            state.generation += 1;
            state.redirects += 1;
            state.locator = next.clone();
            state.queue.clear();
            state.result_queued = false;
            state.released = false;
            state.filtered = false;
            state.mime_type = None;
            state.phase = BindPhase::Connecting;
        }
        tracing::info!(
            bind_id = %self.id,
            from = %current,
            to = %next,
            redirects = redirects + 1,
            "Following redirect"
        );
        if let Some(callback) = callback {
            callback.report_progress(BindStatus::Redirecting, Some(next.as_str()));
        }
        self.launch(factory);
    }

    /// Create a handler from `factory`, install it and start it
    fn launch(self: &Arc<Self>, factory: FactoryRef) {
        let (locator, generation) = {
            let mut state = self.state();
            state.advance(&self.id, BindPhase::Connecting);
            (state.locator.clone(), state.generation)
        };
        let info = CallbackInfo {
            bind_info: self.bind_info.clone(),
            user_agent: self.env.config.user_agent.clone(),
            callback: self.callback(),
        };

        let mut result = self.start_with(&factory, &locator, generation, &info);
        if matches!(result, Err(BindError::UseDefault(_)))
            && !self.env.registry.is_builtin(&factory)
            && !self.state().result_queued
        {
            if let Some(builtin) = self.env.registry.builtin(locator.scheme()) {
                tracing::debug!(bind_id = %self.id, scheme = locator.scheme(), "Falling back to built-in handler");
                result = self.start_with(&builtin, &locator, generation, &info);
            }
        }

        if let Err(e) = result {
            self.fail_unreported(generation, e);
        }
        self.deliver();
    }

    fn start_with(
        self: &Arc<Self>,
        factory: &FactoryRef,
        locator: &Locator,
        generation: u64,
        info: &CallbackInfo,
    ) -> Result<()> {
        let handler = factory.create()?;
        let sink: Arc<dyn ProtocolSink> = Arc::new(SinkProxy {
            core: Arc::downgrade(self),
            generation,
        });

        let mut slot = self.handler();
        let handler = slot.insert(handler);
        tracing::debug!(
            bind_id = %self.id,
            locator = %locator,
            handler = handler.name(),
            factory = factory.name(),
            "Handler starting"
        );
        handler.start(locator, sink, info)
    }
}

/// One bind in flight
///
/// Dropping the session aborts the bind if it has not finished and releases
/// the handler.
pub struct BindingSession {
    core: Arc<BindCore>,
}

impl BindingSession {
    pub(crate) fn start(
        env: BindEnv,
        locator: Locator,
        factory: FactoryRef,
        callback: Arc<dyn BindStatusCallback>,
        bind_info: BindInfo,
    ) -> Self {
        let id = format!("bind-{}", uuid::Uuid::new_v4());
        tracing::info!(bind_id = %id, locator = %locator, factory = factory.name(), "Bind started");

        let core = Arc::new(BindCore {
            id,
            env,
            bind_info,
            callback: Mutex::new(Some(callback)),
            handler: Mutex::new(None),
            state: Mutex::new(BindState {
                phase: BindPhase::Idle,
                locator,
                generation: 0,
                queue: VecDeque::new(),
                result_queued: false,
                outcome: None,
                released: false,
                filtered: false,
                mime_type: None,
                abort_requested: false,
                redirects: 0,
            }),
            delivering: AtomicBool::new(false),
            notify: Notify::new(),
        });
        core.launch(factory);
        Self { core }
    }

    pub fn id(&self) -> &str {
        &self.core.id
    }

    /// Current locator; changes when a redirect is followed
    pub fn locator(&self) -> Locator {
        self.core.state().locator.clone()
    }

    pub fn phase(&self) -> BindPhase {
        self.core.state().phase
    }

    /// Content type reported downstream, after any filter rewrote it
    pub fn mime_type(&self) -> Option<String> {
        self.core.state().mime_type.clone()
    }

    pub fn redirects(&self) -> u32 {
        self.core.state().redirects
    }

    /// Final outcome once the bind finished
    pub fn result(&self) -> Option<BindOutcome> {
        self.core.state().outcome.clone()
    }

    /// Pull response bytes
    ///
    /// Returns `WouldBlock` until the policy gate released the response and
    /// `DataNotAvailable` once the bind failed.
    pub fn read(&self, buf: &mut [u8]) -> Result<(usize, ReadStatus)> {
        {
            let state = self.core.state();
            match state.outcome {
                Some(ref outcome) if !outcome.is_success() => {
                    return Err(BindError::DataNotAvailable(format!(
                        "Bind finished with {:?}",
                        outcome.code
                    )));
                }
                None if !state.released => return Ok((0, ReadStatus::WouldBlock)),
                _ => {}
            }
        }

        let result = match self.core.handler().as_mut() {
            Some(handler) => handler.read(buf),
            None => Err(BindError::DataNotAvailable(
                "Binding has no handler".to_string(),
            )),
        };
        self.core.deliver();
        result
    }

    /// Drain everything readable right now, in chunks of the configured size
    pub fn read_available(&self) -> Result<(Vec<u8>, ReadStatus)> {
        let mut out = Vec::new();
        let mut buf = vec![0u8; self.core.env.config.read_chunk_size.max(1)];
        loop {
            match self.read(&mut buf)? {
                (n, ReadStatus::Ok) => out.extend_from_slice(&buf[..n]),
                (_, status) => return Ok((out, status)),
            }
        }
    }

    /// Resume the handler with a continuation it handed out through `switch`
    pub fn continue_async(&self, data: ProtocolData) -> Result<()> {
        let result = match self.core.handler().as_mut() {
            Some(handler) => handler.continue_async(data),
            None => Ok(()),
        };
        self.core.deliver();
        result
    }

    /// Deliver anything queued that could not be delivered yet
    pub fn pump(&self) {
        self.core.deliver();
    }

    /// Wait until the bind produced its final result
    pub async fn wait(&self) -> BindOutcome {
        loop {
            let notified = self.core.notify.notified();
            if let Some(outcome) = self.result() {
                return outcome;
            }
            self.core.deliver();
            if let Some(outcome) = self.result() {
                return outcome;
            }
            notified.await;
        }
    }

    /// Request cancellation
    ///
    /// Idempotent. The callback still receives exactly one final result,
    /// which may be a success that was already in flight.
    pub fn abort(&self, reason: &str) -> Result<()> {
        {
            let mut state = self.core.state();
            if state.outcome.is_some() || state.abort_requested {
                return Ok(());
            }
            state.abort_requested = true;
        }
        tracing::info!(bind_id = %self.core.id, reason, "Bind abort requested");

        if let Some(handler) = self.core.handler().as_mut() {
            if let Err(e) = handler.abort(reason) {
                tracing::warn!(bind_id = %self.core.id, error = %e, "Handler abort failed");
            }
        }

        let generation = {
            let state = self.core.state();
            (!state.result_queued && state.outcome.is_none()).then_some(state.generation)
        };
        if let Some(generation) = generation {
            self.core.enqueue(
                generation,
                Notification::Result(
                    ResultCode::Cancelled,
                    0,
                    Some(format!("Bind cancelled: {}", reason)),
                ),
            );
        }
        self.core.deliver();
        Ok(())
    }

    pub fn lock(&self) -> Result<()> {
        let result = match self.core.handler().as_mut() {
            Some(handler) => handler.lock(),
            None => Ok(()),
        };
        self.core.deliver();
        result
    }

    pub fn unlock(&self) -> Result<()> {
        let result = match self.core.handler().as_mut() {
            Some(handler) => handler.unlock(),
            None => Ok(()),
        };
        self.core.deliver();
        result
    }

    /// Release handler resources; buffered bytes stay readable unless discarded
    pub fn terminate(&self, options: TerminateOptions) -> Result<()> {
        let result = match self.core.handler().as_mut() {
            Some(handler) => handler.terminate(options),
            None => Ok(()),
        };
        self.core.deliver();
        result
    }

    /// Abort if still running, then release the handler and the callback
    pub fn close(&self) {
        if self.result().is_none() {
            if let Err(e) = self.abort("binding closed") {
                tracing::warn!(bind_id = %self.core.id, error = %e, "Abort on close failed");
            }
        }
        let handler = self.core.handler().take();
        if let Some(mut handler) = handler {
            if let Err(e) = handler.terminate(TerminateOptions {
                discard_buffered: true,
            }) {
                tracing::warn!(bind_id = %self.core.id, error = %e, "Terminate on close failed");
            }
        }
        recover(self.core.callback.lock()).take();
    }
}

impl Drop for BindingSession {
    fn drop(&mut self) {
        self.close();
    }
}

impl std::fmt::Debug for BindingSession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = self.core.state();
        f.debug_struct("BindingSession")
            .field("id", &self.core.id)
            .field("locator", &state.locator.as_str())
            .field("phase", &state.phase)
            .field("outcome", &state.outcome)
            .finish()
    }
}
