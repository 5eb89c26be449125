//! MIME filters — interposed handlers that rewrite content type and bytes
//!
//! Filters are registered per content type. When a bind announces a type
//! with a registered filter, the bind's handler is wrapped in a
//! `FilteredHandler` that owns it and pulls bytes through the filter.

use crate::error::{BindError, Result};
use crate::locator::Locator;
use crate::protocol::{
    BindInfoSource, ProtocolData, ProtocolHandler, ProtocolSink, ReadStatus, TerminateOptions,
};
use std::sync::{Arc, RwLock};

const PULL_SIZE: usize = 4096;

/// Stream transformer applied to one bind's body
pub trait MimeFilter: Send {
    /// Content type reported downstream once this filter is installed
    fn output_type(&self, declared: &str) -> String {
        declared.to_string()
    }

    /// Transform one chunk of input, appending to `output`
    fn transform(&mut self, input: &[u8], output: &mut Vec<u8>) -> Result<()>;

    /// Flush anything held back once input is exhausted
    fn finish(&mut self, _output: &mut Vec<u8>) -> Result<()> {
        Ok(())
    }

    fn name(&self) -> &str {
        "filter"
    }
}

/// Creates a filter instance per bind
pub trait MimeFilterFactory: Send + Sync {
    fn create(&self) -> Result<Box<dyn MimeFilter>>;
}

impl<F> MimeFilterFactory for F
where
    F: Fn() -> Box<dyn MimeFilter> + Send + Sync,
{
    fn create(&self) -> Result<Box<dyn MimeFilter>> {
        Ok(self())
    }
}

/// Shared filter factory reference
pub type FilterRef = Arc<dyn MimeFilterFactory>;

fn same_filter(a: &FilterRef, b: &FilterRef) -> bool {
    std::ptr::eq(Arc::as_ptr(a) as *const (), Arc::as_ptr(b) as *const ())
}

/// Lowercased type without parameters
pub fn content_type_essence(content_type: &str) -> String {
    content_type
        .split(';')
        .next()
        .unwrap_or(content_type)
        .trim()
        .to_ascii_lowercase()
}

/// Content type → filter factory; the most recent registration wins
#[derive(Default)]
pub struct MimeFilterRegistry {
    entries: RwLock<Vec<(String, FilterRef)>>,
}

impl MimeFilterRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&self, content_type: &str, factory: FilterRef) -> Result<()> {
        let essence = content_type_essence(content_type);
        if essence.is_empty() {
            return Err(BindError::InvalidArgument(
                "Content type must not be empty".to_string(),
            ));
        }
        let mut entries = self.entries.write().map_err(|e| {
            BindError::Config(format!("Failed to acquire filter lock: {}", e))
        })?;
        tracing::info!(content_type = %essence, "MIME filter registered");
        entries.push((essence, factory));
        Ok(())
    }

    /// Remove the most recent registration of `factory`; absent is not an error
    pub fn unregister(&self, content_type: &str, factory: &FilterRef) -> Result<()> {
        let essence = content_type_essence(content_type);
        let mut entries = self.entries.write().map_err(|e| {
            BindError::Config(format!("Failed to acquire filter lock: {}", e))
        })?;
        if let Some(index) = entries
            .iter()
            .rposition(|(ct, f)| *ct == essence && same_filter(f, factory))
        {
            entries.remove(index);
            tracing::info!(content_type = %essence, "MIME filter unregistered");
        }
        Ok(())
    }

    pub fn find(&self, content_type: &str) -> Result<Option<FilterRef>> {
        let essence = content_type_essence(content_type);
        let entries = self.entries.read().map_err(|e| {
            BindError::Config(format!("Failed to acquire filter lock: {}", e))
        })?;
        Ok(entries
            .iter()
            .rev()
            .find(|(ct, _)| *ct == essence)
            .map(|(_, f)| Arc::clone(f)))
    }

    pub fn len(&self) -> usize {
        self.entries.read().map(|e| e.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Handler wrapper that owns the real handler and filters what it reads
pub struct FilteredHandler {
    inner: Box<dyn ProtocolHandler>,
    filter: Box<dyn MimeFilter>,
    pending: Vec<u8>,
    offset: usize,
    finished: bool,
}

impl FilteredHandler {
    pub fn new(inner: Box<dyn ProtocolHandler>, filter: Box<dyn MimeFilter>) -> Self {
        Self {
            inner,
            filter,
            pending: Vec::new(),
            offset: 0,
            finished: false,
        }
    }

    pub fn into_inner(self) -> Box<dyn ProtocolHandler> {
        self.inner
    }
}

impl ProtocolHandler for FilteredHandler {
    fn start(
        &mut self,
        locator: &Locator,
        sink: Arc<dyn ProtocolSink>,
        bind_info: &dyn BindInfoSource,
    ) -> Result<()> {
        self.pending.clear();
        self.offset = 0;
        self.finished = false;
        self.inner.start(locator, sink, bind_info)
    }

    fn continue_async(&mut self, data: ProtocolData) -> Result<()> {
        self.inner.continue_async(data)
    }

    fn read(&mut self, buf: &mut [u8]) -> Result<(usize, ReadStatus)> {
        if buf.is_empty() {
            return Ok((0, ReadStatus::Ok));
        }
        loop {
            if self.offset < self.pending.len() {
                let n = (self.pending.len() - self.offset).min(buf.len());
                buf[..n].copy_from_slice(&self.pending[self.offset..self.offset + n]);
                self.offset += n;
                return Ok((n, ReadStatus::Ok));
            }
            if self.finished {
                return Ok((0, ReadStatus::Complete));
            }

            self.pending.clear();
            self.offset = 0;
            let mut raw = vec![0u8; PULL_SIZE.max(buf.len())];
            match self.inner.read(&mut raw)? {
                (0, ReadStatus::Ok) => return Ok((0, ReadStatus::WouldBlock)),
                (n, ReadStatus::Ok) => self.filter.transform(&raw[..n], &mut self.pending)?,
                (_, ReadStatus::WouldBlock) => return Ok((0, ReadStatus::WouldBlock)),
                (_, ReadStatus::Complete) => {
                    self.filter.finish(&mut self.pending)?;
                    self.finished = true;
                }
            }
        }
    }

    fn lock(&mut self) -> Result<()> {
        self.inner.lock()
    }

    fn unlock(&mut self) -> Result<()> {
        self.inner.unlock()
    }

    fn terminate(&mut self, options: TerminateOptions) -> Result<()> {
        if options.discard_buffered {
            self.pending.clear();
            self.offset = 0;
        }
        self.inner.terminate(options)
    }

    fn abort(&mut self, reason: &str) -> Result<()> {
        self.inner.abort(reason)
    }

    fn name(&self) -> &str {
        self.inner.name()
    }
}

type TransformFn = dyn FnMut(&[u8], &mut Vec<u8>) -> Result<()> + Send;

/// Filter built from a closure
pub struct TransformFilter {
    output_type: Option<String>,
    transform: Box<TransformFn>,
}

impl TransformFilter {
    pub fn new<F>(transform: F) -> Self
    where
        F: FnMut(&[u8], &mut Vec<u8>) -> Result<()> + Send + 'static,
    {
        Self {
            output_type: None,
            transform: Box::new(transform),
        }
    }

    /// Report `content_type` downstream instead of the declared type
    pub fn with_output_type(mut self, content_type: impl Into<String>) -> Self {
        self.output_type = Some(content_type.into());
        self
    }
}

impl MimeFilter for TransformFilter {
    fn output_type(&self, declared: &str) -> String {
        self.output_type
            .clone()
            .unwrap_or_else(|| declared.to_string())
    }

    fn transform(&mut self, input: &[u8], output: &mut Vec<u8>) -> Result<()> {
        (self.transform)(input, output)
    }

    fn name(&self) -> &str {
        "transform"
    }
}
