//! `file:` handler: local files read synchronously

use super::{
    report_error, BindInfoSource, BindStatus, DataFlags, LockCount, ProtocolHandler, ProtocolSink,
    ReadStatus, ResultLatch, TerminateOptions,
};
use crate::error::{BindError, Result, ResultCode};
use crate::locator::{percent_decode, Locator};
use crate::mime;
use std::fs::File;
use std::io::{Read, Seek, SeekFrom};
use std::path::PathBuf;
use std::sync::Arc;

const SNIFF_LEN: usize = 512;

/// Local filesystem path named by a `file:` locator
pub fn local_path(locator: &Locator) -> Result<PathBuf> {
    if !locator.has_scheme("file") {
        return Err(BindError::InvalidArgument(format!(
            "'{}' is not a file locator",
            locator
        )));
    }

    let path = percent_decode(locator.path());
    if path.is_empty() {
        return Err(BindError::InvalidUrl(format!("'{}' names no file", locator)));
    }

    let path = match locator.host() {
        Some(host) if host != "localhost" => format!("//{}{}", host, path),
        _ => path,
    };

    // file:///C:/dir → C:/dir
    let bytes = path.as_bytes();
    let drive = bytes.len() >= 3 && bytes[0] == b'/' && bytes[1].is_ascii_alphabetic() && bytes[2] == b':';
    if cfg!(windows) && drive {
        return Ok(PathBuf::from(&path[1..]));
    }
    Ok(PathBuf::from(path))
}

/// Handler for `file:` locators
///
/// After a plain `terminate` the open file stays readable and is closed as
/// soon as a read reaches its end.
#[derive(Default)]
pub struct FileHandler {
    file: Option<File>,
    terminated: bool,
    exhausted: bool,
    locks: LockCount,
    pending_terminate: Option<TerminateOptions>,
    sink: Option<Arc<dyn ProtocolSink>>,
    latch: ResultLatch,
}

impl FileHandler {
    pub fn new() -> Self {
        Self::default()
    }

    fn fail(&mut self, sink: &dyn ProtocolSink, err: BindError) -> Result<()> {
        if self.latch.fire() {
            report_error(sink, &err);
        }
        Err(err)
    }

    fn finish_terminate(&mut self, options: TerminateOptions) {
        if options.discard_buffered {
            self.file = None;
            self.exhausted = false;
            return;
        }
        self.terminated = true;
    }
}

fn sniff_file(file: &mut File) -> std::io::Result<Option<&'static str>> {
    let mut head = [0u8; SNIFF_LEN];
    let mut filled = 0;
    while filled < head.len() {
        let n = file.read(&mut head[filled..])?;
        if n == 0 {
            break;
        }
        filled += n;
    }
    file.seek(SeekFrom::Start(0))?;
    Ok(mime::sniff_from_data(&head[..filled]))
}

impl ProtocolHandler for FileHandler {
    fn start(
        &mut self,
        locator: &Locator,
        sink: Arc<dyn ProtocolSink>,
        _bind_info: &dyn BindInfoSource,
    ) -> Result<()> {
        if !locator.has_scheme("file") {
            return Err(BindError::UseDefault(format!(
                "'{}' is not a file locator",
                locator
            )));
        }

        self.file = None;
        self.terminated = false;
        self.exhausted = false;
        self.pending_terminate = None;
        self.latch.reset();
        self.sink = Some(Arc::clone(&sink));

        let path = match local_path(locator) {
            Ok(path) => path,
            Err(e) => return self.fail(sink.as_ref(), e),
        };
        let shown = path.display().to_string();

        let mut file = match File::open(&path) {
            Ok(file) => file,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return self.fail(sink.as_ref(), BindError::FileNotFound(shown));
            }
            Err(e) => return self.fail(sink.as_ref(), BindError::Io(e)),
        };
        let length = match file.metadata() {
            Ok(meta) if meta.is_file() => meta.len(),
            Ok(_) => return self.fail(sink.as_ref(), BindError::FileNotFound(shown)),
            Err(e) => return self.fail(sink.as_ref(), BindError::Io(e)),
        };

        sink.report_progress(BindStatus::SendingRequest, Some(&shown));
        sink.report_progress(BindStatus::CacheFileNameAvailable, Some(&shown));

        let mime = match mime::guess_from_path(&shown) {
            Some(mime) => Some(mime),
            None => match sniff_file(&mut file) {
                Ok(sniffed) => sniffed.map(str::to_string),
                Err(e) => return self.fail(sink.as_ref(), BindError::Io(e)),
            },
        };
        if let Some(ref mime) = mime {
            sink.report_progress(BindStatus::MimeTypeAvailable, Some(mime));
        }

        tracing::debug!(path = %shown, length, "File opened");
        self.file = Some(file);

        sink.report_data(
            DataFlags::FIRST | DataFlags::LAST | DataFlags::FULLY_AVAILABLE,
            length,
            length,
        );
        sink.report_progress(BindStatus::BeginDownloadData, None);
        sink.report_progress(BindStatus::EndDownloadData, None);
        if self.latch.fire() {
            sink.report_result(ResultCode::Ok, 0, None);
        }
        Ok(())
    }

    fn read(&mut self, buf: &mut [u8]) -> Result<(usize, ReadStatus)> {
        if self.exhausted {
            return Ok((0, ReadStatus::Complete));
        }
        let file = self
            .file
            .as_mut()
            .ok_or_else(|| BindError::DataNotAvailable("No file is open".to_string()))?;
        match file.read(buf)? {
            0 if !buf.is_empty() => {
                if self.terminated {
                    self.file = None;
                    self.exhausted = true;
                    tracing::debug!("File closed after terminate");
                }
                Ok((0, ReadStatus::Complete))
            }
            n => Ok((n, ReadStatus::Ok)),
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
        if let Some(sink) = self.sink.clone() {
            if self.latch.fire() {
                report_error(sink.as_ref(), &BindError::Cancelled(reason.to_string()));
            }
        }
        Ok(())
    }

    fn name(&self) -> &str {
        "file"
    }
}
