//! `about:` handler

use super::{
    report_error, BindInfoSource, BindStatus, BufferedBody, DataFlags, LockCount, ProtocolHandler,
    ProtocolSink, ReadStatus, ResultLatch, TerminateOptions,
};
use crate::error::{BindError, Result, ResultCode};
use crate::locator::{percent_decode, Locator};
use bytes::Bytes;
use std::sync::Arc;

/// Serves `about:blank` as an empty document and `about:<text>` as `<text>`
#[derive(Default)]
pub struct AboutHandler {
    body: Option<BufferedBody>,
    locks: LockCount,
    sink: Option<Arc<dyn ProtocolSink>>,
    latch: ResultLatch,
}

impl AboutHandler {
    pub fn new() -> Self {
        Self::default()
    }
}

/// Document text for an `about:` locator
pub fn about_document(locator: &Locator) -> String {
    let text = locator.scheme_specific();
    if text.eq_ignore_ascii_case("blank") {
        String::new()
    } else {
        percent_decode(text)
    }
}

impl ProtocolHandler for AboutHandler {
    fn start(
        &mut self,
        locator: &Locator,
        sink: Arc<dyn ProtocolSink>,
        _bind_info: &dyn BindInfoSource,
    ) -> Result<()> {
        if !locator.has_scheme("about") {
            return Err(BindError::UseDefault(format!(
                "'{}' is not an about locator",
                locator
            )));
        }

        self.latch.reset();
        self.sink = Some(Arc::clone(&sink));
        let body = Bytes::from(about_document(locator));
        let length = body.len() as u64;
        self.body = Some(BufferedBody::new(body));

        sink.report_progress(BindStatus::MimeTypeAvailable, Some("text/html"));
        sink.report_data(
            DataFlags::FIRST | DataFlags::LAST | DataFlags::FULLY_AVAILABLE,
            length,
            length,
        );
        if self.latch.fire() {
            sink.report_result(ResultCode::Ok, 0, None);
        }
        Ok(())
    }

    fn read(&mut self, buf: &mut [u8]) -> Result<(usize, ReadStatus)> {
        match self.body {
            Some(ref mut body) => Ok(body.read(buf)),
            None => Err(BindError::DataNotAvailable(
                "No about document was started".to_string(),
            )),
        }
    }

    fn lock(&mut self) -> Result<()> {
        self.locks.lock();
        Ok(())
    }

    fn unlock(&mut self) -> Result<()> {
        self.locks.unlock();
        Ok(())
    }

    fn terminate(&mut self, options: TerminateOptions) -> Result<()> {
        if options.discard_buffered && !self.locks.is_locked() {
            self.body = None;
        }
        Ok(())
    }

    fn abort(&mut self, reason: &str) -> Result<()> {
        if let Some(sink) = self.sink.clone() {
            if self.latch.fire() {
                report_error(sink.as_ref(), &BindError::Cancelled(reason.to_string()));
            }
        }
        Ok(())
    }

    fn name(&self) -> &str {
        "about"
    }
}
