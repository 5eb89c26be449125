//! Archive handler for `its:`, `ms-its:` and `mk:@MSITStore:` locators
//!
//! Locators have the form `<prefix><container-path>::<inner-path>`. The
//! container is opened through a `ContainerStore`, the inner path is resolved
//! to an entry, and the whole entry is announced as available at once.

use super::{
    report_error, BindInfoSource, BindStatus, DataFlags, LockCount, ProtocolHandler, ProtocolSink,
    ReadStatus, ResultLatch, TerminateOptions,
};
use crate::container::{Container, ContainerStore, EntryInfo};
use crate::error::{BindError, Result, ResultCode};
use crate::locator::{ArchiveScheme, Locator};
use crate::mime;
use std::sync::Arc;

/// Open container plus a read cursor into one entry
///
/// Shared by the handlers that serve bytes out of a `Container`. A plain
/// `terminate` leaves the container readable and releases it once the entry
/// has been read to its end.
#[derive(Default)]
pub(crate) struct ContainerReader {
    container: Option<Box<dyn Container>>,
    entry: Option<EntryInfo>,
    offset: u64,
    terminated: bool,
    locks: LockCount,
    pending_terminate: Option<TerminateOptions>,
}

impl ContainerReader {
    pub(crate) fn is_open(&self) -> bool {
        self.container.is_some()
    }

    /// Drop any open container and the read cursor; lock count is kept
    pub(crate) fn reset(&mut self) {
        self.container = None;
        self.entry = None;
        self.offset = 0;
        self.terminated = false;
        self.pending_terminate = None;
    }

    pub(crate) fn attach(&mut self, container: Box<dyn Container>, entry: EntryInfo) {
        self.reset();
        self.container = Some(container);
        self.entry = Some(entry);
    }

    pub(crate) fn read(&mut self, buf: &mut [u8]) -> Result<(usize, ReadStatus)> {
        let length = match self.entry {
            Some(ref entry) => entry.length,
            None => {
                return Err(BindError::DataNotAvailable(
                    "No container is open".to_string(),
                ))
            }
        };

        let n = match (self.container.as_mut(), self.entry.as_ref()) {
            (Some(container), Some(entry)) if self.offset < length => {
                container.read_at(entry, self.offset, buf)?
            }
            _ => 0,
        };
        self.offset += n as u64;
        if self.terminated && (n == 0 || self.offset >= length) {
            self.release();
        }

        if n == 0 {
            Ok((0, ReadStatus::Complete))
        } else {
            Ok((n, ReadStatus::Ok))
        }
    }

    pub(crate) fn lock(&mut self) {
        self.locks.lock();
    }

    pub(crate) fn unlock(&mut self) {
        if self.locks.unlock() {
            if let Some(options) = self.pending_terminate.take() {
                self.finish_terminate(options);
            }
        }
    }

    /// Release the container, deferring while pinned
    pub(crate) fn terminate(&mut self, options: TerminateOptions) {
        if self.locks.is_locked() {
            self.pending_terminate = Some(options);
            return;
        }
        self.finish_terminate(options);
    }

    fn finish_terminate(&mut self, options: TerminateOptions) {
        if options.discard_buffered {
            self.release();
            self.reset();
            return;
        }
        self.terminated = true;
        let fully_read = self
            .entry
            .as_ref()
            .map_or(true, |entry| self.offset >= entry.length);
        if fully_read {
            self.release();
        }
    }

    fn release(&mut self) {
        if let Some(container) = self.container.take() {
            tracing::debug!(container = %container.path(), "Container released");
        }
    }
}

/// Backslashes to slashes, fragment dropped, leading slash ensured
pub(crate) fn normalize_inner_path(inner: &str) -> String {
    let inner = inner.split('#').next().unwrap_or(inner);
    let mut path = inner.replace('\\', "/");
    if !path.starts_with('/') {
        path.insert(0, '/');
    }
    path
}

/// Handler for composite archive locators
pub struct ArchiveHandler {
    store: Arc<dyn ContainerStore>,
    reader: ContainerReader,
    sink: Option<Arc<dyn ProtocolSink>>,
    latch: ResultLatch,
}

impl ArchiveHandler {
    pub fn new(store: Arc<dyn ContainerStore>) -> Self {
        Self {
            store,
            reader: ContainerReader::default(),
            sink: None,
            latch: ResultLatch::default(),
        }
    }

    fn report_failure(&mut self, sink: &dyn ProtocolSink, err: &BindError) {
        if self.latch.fire() {
            report_error(sink, err);
        }
    }
}

impl ProtocolHandler for ArchiveHandler {
    fn start(
        &mut self,
        locator: &Locator,
        sink: Arc<dyn ProtocolSink>,
        _bind_info: &dyn BindInfoSource,
    ) -> Result<()> {
        if ArchiveScheme::detect(locator.as_str()).is_none() {
            return Err(BindError::UseDefault(format!(
                "'{}' is not an archive locator",
                locator
            )));
        }

        if self.reader.is_open() {
            tracing::debug!(locator = %locator, "Closing previous container before restart");
        }
        self.reader.reset();
        self.latch.reset();
        self.sink = Some(Arc::clone(&sink));

        let split = match locator.split_composite() {
            Some(split) => split,
            None => {
                let missing = BindError::FileNotFound(format!(
                    "'{}' has no composite delimiter",
                    locator
                ));
                self.report_failure(sink.as_ref(), &missing);
                return Err(BindError::InvalidUrl(missing.to_string()));
            }
        };

        let mut container = match self.store.open(split.container) {
            Ok(container) => container,
            Err(e) => {
                let err = BindError::FileNotFound(format!(
                    "Cannot open container '{}': {}",
                    split.container, e
                ));
                self.report_failure(sink.as_ref(), &err);
                return Err(err);
            }
        };

        let inner = normalize_inner_path(split.inner);
        let entry = match container.resolve(&inner) {
            Ok(entry) => entry,
            Err(e) => {
                let err = BindError::FileNotFound(format!(
                    "Cannot resolve '{}' in '{}': {}",
                    inner, split.container, e
                ));
                self.report_failure(sink.as_ref(), &err);
                return Err(err);
            }
        };

        let length = entry.length;
        tracing::debug!(
            container = %split.container,
            entry = %inner,
            length,
            "Archive entry opened"
        );
        self.reader.attach(container, entry);

        sink.report_progress(BindStatus::SendingRequest, Some(&inner));
        if let Some(mime) = mime::guess_from_path(&inner) {
            sink.report_progress(BindStatus::MimeTypeAvailable, Some(&mime));
        }
        sink.report_data(DataFlags::FIRST | DataFlags::FULLY_AVAILABLE, length, length);
        sink.report_progress(BindStatus::BeginDownloadData, None);
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
            let err = BindError::Cancelled(reason.to_string());
            self.report_failure(sink.as_ref(), &err);
        }
        Ok(())
    }

    fn name(&self) -> &str {
        "archive"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::container::MemoryContainerStore;
    use crate::protocol::testing::{Note, RecordingSink};
    use crate::protocol::BindInfo;
    use std::sync::atomic::{AtomicUsize, Ordering};

    const PAGE: &[u8] = b"<html></html>";

    fn store() -> Arc<MemoryContainerStore> {
        let store = Arc::new(MemoryContainerStore::new());
        store.insert("test.chm", "/blank.html", PAGE).unwrap();
        store.insert("test.chm", "/dir/raw", "abc").unwrap();
        store
    }

    fn start(
        handler: &mut ArchiveHandler,
        url: &str,
    ) -> (Arc<RecordingSink>, Result<()>) {
        let sink = Arc::new(RecordingSink::default());
        let locator = Locator::parse(url).unwrap();
        let result = handler.start(&locator, sink.clone(), &BindInfo::default());
        (sink, result)
    }

    #[test]
    fn test_successful_fetch_sequence() {
        let mut handler = ArchiveHandler::new(store());
        let (sink, result) = start(&mut handler, "its:test.chm::/blank.html");
        result.unwrap();

        assert_eq!(
            sink.notes(),
            vec![
                Note::Progress(BindStatus::SendingRequest, Some("/blank.html".to_string())),
                Note::Progress(BindStatus::MimeTypeAvailable, Some("text/html".to_string())),
                Note::Data(DataFlags::FIRST | DataFlags::FULLY_AVAILABLE, 13, 13),
                Note::Progress(BindStatus::BeginDownloadData, None),
                Note::Result(ResultCode::Ok, 0),
            ]
        );

        let mut buf = [0u8; 512];
        assert_eq!(handler.read(&mut buf).unwrap(), (13, ReadStatus::Ok));
        assert_eq!(&buf[..13], PAGE);
        assert_eq!(handler.read(&mut buf).unwrap(), (0, ReadStatus::Complete));
    }

    #[test]
    fn test_all_prefix_spellings() {
        for url in [
            "ITS:test.chm::/blank.html",
            "ms-its:test.chm::/blank.html",
            "mk:@MSITStore:test.chm::/blank.html",
        ] {
            let mut handler = ArchiveHandler::new(store());
            let (sink, result) = start(&mut handler, url);
            result.unwrap();
            assert_eq!(sink.results(), vec![ResultCode::Ok], "{}", url);
        }
    }

    #[test]
    fn test_no_mime_without_extension() {
        let mut handler = ArchiveHandler::new(store());
        let (sink, result) = start(&mut handler, "its:test.chm::/dir/raw");
        result.unwrap();
        assert!(!sink
            .notes()
            .iter()
            .any(|n| matches!(n, Note::Progress(BindStatus::MimeTypeAvailable, _))));
    }

    #[test]
    fn test_inner_path_normalization() {
        assert_eq!(normalize_inner_path("\\dir\\a.html#top"), "/dir/a.html");
        assert_eq!(normalize_inner_path("blank.html"), "/blank.html");

        let mut handler = ArchiveHandler::new(store());
        let (sink, result) = start(&mut handler, "its:test.chm::\\DIR\\raw#frag");
        result.unwrap();
        assert_eq!(sink.results(), vec![ResultCode::Ok]);
    }

    #[test]
    fn test_missing_container() {
        let mut handler = ArchiveHandler::new(store());
        let (sink, result) = start(&mut handler, "its:missing.chm::/x.html");
        assert!(matches!(result, Err(BindError::FileNotFound(_))));
        assert_eq!(sink.results(), vec![ResultCode::FileNotFound]);
        assert!(!sink.notes().iter().any(|n| matches!(n, Note::Data(..))));

        let mut buf = [0u8; 16];
        assert!(matches!(
            handler.read(&mut buf),
            Err(BindError::DataNotAvailable(_))
        ));
    }

    #[test]
    fn test_missing_entry() {
        let store = store();
        let mut handler = ArchiveHandler::new(store.clone());
        let (sink, result) = start(&mut handler, "its:test.chm::/nope.html");
        assert!(matches!(result, Err(BindError::FileNotFound(_))));
        assert_eq!(sink.results(), vec![ResultCode::FileNotFound]);
        assert_eq!(store.open_count(), 0);
    }

    struct CountingStore {
        opens: AtomicUsize,
    }

    impl ContainerStore for CountingStore {
        fn open(&self, path: &str) -> Result<Box<dyn Container>> {
            self.opens.fetch_add(1, Ordering::SeqCst);
            Err(BindError::FileNotFound(path.to_string()))
        }
    }

    #[test]
    fn test_missing_delimiter_never_opens() {
        let store = Arc::new(CountingStore {
            opens: AtomicUsize::new(0),
        });
        let mut handler = ArchiveHandler::new(store.clone());
        let (sink, result) = start(&mut handler, "its:test.chm/blank.html");
        assert!(matches!(result, Err(BindError::InvalidUrl(_))));
        assert_eq!(sink.results(), vec![ResultCode::FileNotFound]);
        assert_eq!(store.opens.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn test_prefix_mismatch_defers() {
        let mut handler = ArchiveHandler::new(store());
        let (sink, result) = start(&mut handler, "itsy:test.chm::/blank.html");
        assert!(matches!(result, Err(BindError::UseDefault(_))));
        assert!(sink.notes().is_empty());
    }

    #[test]
    fn test_read_before_start() {
        let mut handler = ArchiveHandler::new(store());
        let mut buf = [0u8; 4];
        assert!(matches!(
            handler.read(&mut buf),
            Err(BindError::DataNotAvailable(_))
        ));
    }

    #[test]
    fn test_restart_closes_previous_container() {
        let store = store();
        let mut handler = ArchiveHandler::new(store.clone());
        start(&mut handler, "its:test.chm::/blank.html").1.unwrap();
        assert_eq!(store.open_count(), 1);
        start(&mut handler, "its:test.chm::/dir/raw").1.unwrap();
        assert_eq!(store.open_count(), 1);

        let mut buf = [0u8; 8];
        assert_eq!(handler.read(&mut buf).unwrap(), (3, ReadStatus::Ok));
        assert_eq!(&buf[..3], b"abc");
    }

    #[test]
    fn test_terminate_keeps_entry_readable_until_drained() {
        let store = store();
        let mut handler = ArchiveHandler::new(store.clone());
        start(&mut handler, "its:test.chm::/blank.html").1.unwrap();

        let mut buf = [0u8; 6];
        assert_eq!(handler.read(&mut buf).unwrap(), (6, ReadStatus::Ok));
        handler.terminate(TerminateOptions::default()).unwrap();
        assert_eq!(store.open_count(), 1);

        let mut rest = [0u8; 32];
        assert_eq!(handler.read(&mut rest).unwrap(), (7, ReadStatus::Ok));
        assert_eq!(&rest[..7], b"</html>");
        assert_eq!(store.open_count(), 0);
        assert_eq!(handler.read(&mut rest).unwrap(), (0, ReadStatus::Complete));
    }

    #[test]
    fn test_terminate_after_full_read_releases_at_once() {
        let store = store();
        let mut handler = ArchiveHandler::new(store.clone());
        start(&mut handler, "its:test.chm::/blank.html").1.unwrap();

        let mut buf = [0u8; 32];
        assert_eq!(handler.read(&mut buf).unwrap(), (13, ReadStatus::Ok));
        handler.terminate(TerminateOptions::default()).unwrap();
        assert_eq!(store.open_count(), 0);
        assert_eq!(handler.read(&mut buf).unwrap(), (0, ReadStatus::Complete));
    }

    #[test]
    fn test_terminate_deferred_while_locked() {
        let store = store();
        let mut handler = ArchiveHandler::new(store.clone());
        handler.lock().unwrap();
        start(&mut handler, "its:test.chm::/blank.html").1.unwrap();

        handler
            .terminate(TerminateOptions {
                discard_buffered: true,
            })
            .unwrap();
        assert_eq!(store.open_count(), 1);
        handler.unlock().unwrap();
        assert_eq!(store.open_count(), 0);
        handler.unlock().unwrap();
    }

    #[test]
    fn test_terminate_discard() {
        let mut handler = ArchiveHandler::new(store());
        start(&mut handler, "its:test.chm::/blank.html").1.unwrap();
        handler
            .terminate(TerminateOptions {
                discard_buffered: true,
            })
            .unwrap();
        let mut buf = [0u8; 4];
        assert!(matches!(
            handler.read(&mut buf),
            Err(BindError::DataNotAvailable(_))
        ));
    }

    #[test]
    fn test_unlock_balanced_across_failure() {
        let mut handler = ArchiveHandler::new(store());
        let (_, result) = start(&mut handler, "its:missing.chm::/x.html");
        assert!(result.is_err());
        handler.unlock().unwrap();

        handler.lock().unwrap();
        let (_, result) = start(&mut handler, "its:missing.chm::/x.html");
        assert!(result.is_err());
        handler.unlock().unwrap();
        assert!(!handler.reader.locks.is_locked());
    }

    #[test]
    fn test_abort_after_result_is_silent() {
        let mut handler = ArchiveHandler::new(store());
        let (sink, result) = start(&mut handler, "its:test.chm::/blank.html");
        result.unwrap();
        handler.abort("user").unwrap();
        handler.abort("user").unwrap();
        assert_eq!(sink.results(), vec![ResultCode::Ok]);
    }
}
