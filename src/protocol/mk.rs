//! `mk:@ProgId:display-name` composite handler
//!
//! Only the `MSITStore` ProgId has a backend; it is served by an owned
//! `ArchiveHandler`. Every other ProgId fails with `NotFound`.

use super::archive::ArchiveHandler;
use super::{
    report_error, BindInfoSource, LockCount, ProtocolHandler, ProtocolSink, ReadStatus,
    ResultLatch, TerminateOptions,
};
use crate::container::ContainerStore;
use crate::error::{BindError, Result};
use crate::locator::{ArchiveScheme, Locator};
use std::sync::Arc;

/// Split `mk:@ProgId:display` into its ProgId and display name
pub fn parse_moniker(locator: &Locator) -> Option<(&str, &str)> {
    let rest = locator.scheme_specific().strip_prefix('@')?;
    let colon = rest.find(':')?;
    Some((&rest[..colon], &rest[colon + 1..]))
}

/// Handler for `mk:` locators
pub struct MkHandler {
    archive: ArchiveHandler,
    delegated: bool,
    locks: LockCount,
    sink: Option<Arc<dyn ProtocolSink>>,
    latch: ResultLatch,
}

impl MkHandler {
    pub fn new(store: Arc<dyn ContainerStore>) -> Self {
        Self {
            archive: ArchiveHandler::new(store),
            delegated: false,
            locks: LockCount::default(),
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

impl ProtocolHandler for MkHandler {
    fn start(
        &mut self,
        locator: &Locator,
        sink: Arc<dyn ProtocolSink>,
        bind_info: &dyn BindInfoSource,
    ) -> Result<()> {
        if !locator.has_scheme("mk") {
            return Err(BindError::UseDefault(format!(
                "'{}' is not an mk locator",
                locator
            )));
        }

        if ArchiveScheme::detect(locator.as_str()) == Some(ArchiveScheme::MkStore) {
            self.delegated = true;
            return self.archive.start(locator, sink, bind_info);
        }

        self.delegated = false;
        self.latch.reset();
        self.sink = Some(Arc::clone(&sink));
        match parse_moniker(locator) {
            Some((prog_id, _)) => {
                tracing::debug!(prog_id, "No backend for moniker ProgId");
                self.fail(
                    sink.as_ref(),
                    BindError::NotFound(format!("No moniker backend for ProgId '{}'", prog_id)),
                )
            }
            None => self.fail(
                sink.as_ref(),
                BindError::InvalidUrl(format!("'{}' is not of the form mk:@ProgId:name", locator)),
            ),
        }
    }

    fn read(&mut self, buf: &mut [u8]) -> Result<(usize, ReadStatus)> {
        if self.delegated {
            return self.archive.read(buf);
        }
        Err(BindError::DataNotAvailable(
            "No moniker is bound".to_string(),
        ))
    }

    fn lock(&mut self) -> Result<()> {
        self.locks.lock();
        self.archive.lock()
    }

    fn unlock(&mut self) -> Result<()> {
        if !self.locks.is_locked() {
            return Ok(());
        }
        self.locks.unlock();
        self.archive.unlock()
    }

    fn terminate(&mut self, options: TerminateOptions) -> Result<()> {
        self.archive.terminate(options)
    }

    fn abort(&mut self, reason: &str) -> Result<()> {
        if self.delegated {
            return self.archive.abort(reason);
        }
        if let Some(sink) = self.sink.clone() {
            if self.latch.fire() {
                report_error(sink.as_ref(), &BindError::Cancelled(reason.to_string()));
            }
        }
        Ok(())
    }

    fn name(&self) -> &str {
        "mk"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::container::MemoryContainerStore;
    use crate::error::ResultCode;
    use crate::protocol::testing::RecordingSink;
    use crate::protocol::BindInfo;

    fn handler() -> MkHandler {
        let store = Arc::new(MemoryContainerStore::new());
        store.insert("C:\\help\\a.chm", "/x.html", "<p>x</p>").unwrap();
        MkHandler::new(store)
    }

    fn start(handler: &mut MkHandler, url: &str) -> (Arc<RecordingSink>, Result<()>) {
        let sink = Arc::new(RecordingSink::default());
        let result = handler.start(&Locator::parse(url).unwrap(), sink.clone(), &BindInfo::default());
        (sink, result)
    }

    #[test]
    fn test_parse_moniker() {
        let loc = Locator::parse("mk:@Other.Doc:file.bin").unwrap();
        assert_eq!(parse_moniker(&loc), Some(("Other.Doc", "file.bin")));
        let loc = Locator::parse("mk:plain").unwrap();
        assert_eq!(parse_moniker(&loc), None);
    }

    #[test]
    fn test_msitstore_delegates_to_archive() {
        let mut mk = handler();
        let (sink, result) = start(&mut mk, "mk:@MSITStore:C:\\help\\a.chm::/x.html");
        result.unwrap();
        assert_eq!(sink.results(), vec![ResultCode::Ok]);

        let mut buf = [0u8; 32];
        assert_eq!(mk.read(&mut buf).unwrap(), (8, ReadStatus::Ok));
        assert_eq!(mk.read(&mut buf).unwrap(), (0, ReadStatus::Complete));
    }

    #[test]
    fn test_unknown_progid() {
        let mut mk = handler();
        let (sink, result) = start(&mut mk, "mk:@Other.Doc:file.bin");
        assert!(matches!(result, Err(BindError::NotFound(_))));
        assert_eq!(sink.results(), vec![ResultCode::NotFound]);

        let mut buf = [0u8; 4];
        assert!(matches!(mk.read(&mut buf), Err(BindError::DataNotAvailable(_))));
        mk.abort("late").unwrap();
        assert_eq!(sink.results().len(), 1);
    }

    #[test]
    fn test_malformed_moniker() {
        let mut mk = handler();
        let (sink, result) = start(&mut mk, "mk:nothing");
        assert!(matches!(result, Err(BindError::InvalidUrl(_))));
        assert_eq!(sink.results(), vec![ResultCode::InvalidUrl]);
    }

    #[test]
    fn test_unlock_without_lock() {
        let mut mk = handler();
        mk.unlock().unwrap();
        mk.lock().unwrap();
        mk.unlock().unwrap();
        mk.unlock().unwrap();
    }
}
