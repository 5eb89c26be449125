//! `res://module/[type/]name` handler
//!
//! The module path is opened as a container and the resource is looked up
//! as the entry `/<type>/<name>`. The type defaults to 23 (HTML).

use super::archive::ContainerReader;
use super::{
    report_error, BindInfoSource, BindStatus, DataFlags, ProtocolHandler, ProtocolSink,
    ReadStatus, ResultLatch, TerminateOptions,
};
use crate::container::ContainerStore;
use crate::error::{BindError, Result, ResultCode};
use crate::locator::{percent_decode, Locator};
use crate::mime;
use std::sync::Arc;

/// Resource type used when the locator names none
pub const DEFAULT_RESOURCE_TYPE: &str = "23";

/// Parsed `res:` locator
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResourceName {
    pub module: String,
    pub kind: String,
    pub name: String,
}

impl ResourceName {
    pub fn parse(locator: &Locator) -> Result<Self> {
        let text = locator.scheme_specific();
        let text = text.strip_prefix("//").ok_or_else(|| {
            BindError::InvalidUrl(format!("'{}' is missing '//' after res:", locator))
        })?;
        let text = percent_decode(text);

        let slash = text
            .rfind('/')
            .ok_or_else(|| BindError::InvalidUrl(format!("'{}' names no resource", locator)))?;
        let name = &text[slash + 1..];
        let head = &text[..slash];
        if name.is_empty() || head.is_empty() {
            return Err(BindError::InvalidUrl(format!(
                "'{}' names no resource",
                locator
            )));
        }

        let (module, kind) = match head.rfind('/') {
            Some(i) if is_resource_type(&head[i + 1..]) && i > 0 => {
                (&head[..i], head[i + 1..].trim_start_matches('#'))
            }
            _ => (head, DEFAULT_RESOURCE_TYPE),
        };

        Ok(Self {
            module: module.to_string(),
            kind: kind.to_string(),
            name: name.to_string(),
        })
    }

    /// Entry path inside the module container
    pub fn entry_path(&self) -> String {
        format!("/{}/{}", self.kind, self.name)
    }
}

fn is_resource_type(segment: &str) -> bool {
    let digits = segment.strip_prefix('#').unwrap_or(segment);
    !digits.is_empty() && digits.bytes().all(|b| b.is_ascii_digit())
}

/// Handler for `res:` locators
pub struct ResHandler {
    store: Arc<dyn ContainerStore>,
    reader: ContainerReader,
    sink: Option<Arc<dyn ProtocolSink>>,
    latch: ResultLatch,
}

impl ResHandler {
    pub fn new(store: Arc<dyn ContainerStore>) -> Self {
        Self {
            store,
            reader: ContainerReader::default(),
            sink: None,
            latch: ResultLatch::default(),
        }
    }

    fn fail(&mut self, sink: &dyn ProtocolSink, err: BindError) -> Result<()> {
        if self.latch.fire() {
            report_error(sink, &err);
        }
        Err(err)
    }
}

impl ProtocolHandler for ResHandler {
    fn start(
        &mut self,
        locator: &Locator,
        sink: Arc<dyn ProtocolSink>,
        _bind_info: &dyn BindInfoSource,
    ) -> Result<()> {
        if !locator.has_scheme("res") {
            return Err(BindError::UseDefault(format!(
                "'{}' is not a res locator",
                locator
            )));
        }

        self.reader.reset();
        self.latch.reset();
        self.sink = Some(Arc::clone(&sink));

        let resource = match ResourceName::parse(locator) {
            Ok(resource) => resource,
            Err(e) => return self.fail(sink.as_ref(), e),
        };
        let mut module = match self.store.open(&resource.module) {
            Ok(module) => module,
            Err(_) => {
                return self.fail(
                    sink.as_ref(),
                    BindError::FileNotFound(format!("Module '{}' not found", resource.module)),
                )
            }
        };
        let entry = match module.resolve(&resource.entry_path()) {
            Ok(entry) => entry,
            Err(_) => {
                return self.fail(
                    sink.as_ref(),
                    BindError::FileNotFound(format!(
                        "Resource '{}' not found in '{}'",
                        resource.entry_path(),
                        resource.module
                    )),
                )
            }
        };

        let length = entry.length;
        self.reader.attach(module, entry);
        tracing::debug!(module = %resource.module, resource = %resource.name, length, "Resource opened");

        if let Some(mime) = mime::guess_from_path(&resource.name) {
            sink.report_progress(BindStatus::MimeTypeAvailable, Some(&mime));
        }
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
        self.reader.read(buf)
    }

    fn lock(&mut self) -> Result<()> {
        self.reader.lock();
        Ok(())
    }

    fn unlock(&mut self) -> Result<()> {
        self.reader.unlock();
        Ok(())
    }

    fn terminate(&mut self, options: TerminateOptions) -> Result<()> {
        self.reader.terminate(options);
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
        "res"
    }
}
