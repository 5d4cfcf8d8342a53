//! Write sessions.
//!
//! An [`ArchiveWriter`] serializes entries in the chosen format and pushes
//! them through the configured compression stages into a [`ByteSink`].
//!
//! # Example
//!
//! ```rust
//! use arcstream::{ArchiveWriter, EntryMetadata, FilterCode, FormatCode, WriteOptions};
//!
//! # fn main() -> arcstream::Result<()> {
//! let options = WriteOptions::new()
//!     .format(FormatCode::TarPax)
//!     .add_filter(FilterCode::Gzip);
//! let (mut writer, sink) = ArchiveWriter::create_memory(options)?;
//!
//! writer.write_header(&EntryMetadata::directory("docs/"))?;
//! writer.finish_entry()?;
//! writer.write_header(&EntryMetadata::file("docs/readme.txt", 5))?;
//! writer.write_data(b"hello")?;
//! writer.finish_entry()?;
//! writer.close()?;
//!
//! assert!(!sink.is_empty());
//! # Ok(())
//! # }
//! ```
//!
//! # Entry Lifecycle
//!
//! Each entry is a [`write_header`](ArchiveWriter::write_header) followed by
//! any number of [`write_data`](ArchiveWriter::write_data) calls and a
//! [`finish_entry`](ArchiveWriter::finish_entry). Writing a second header
//! before finishing the first is rejected without touching the output.
//!
//! When the header declares a size, data beyond it is not accepted and a
//! short entry is padded with zeros at `finish_entry`; both are reported as
//! warnings through [`last_error`](ArchiveWriter::last_error).

mod options;

pub use options::{DEFAULT_BYTES_PER_BLOCK, WriteOptions};

use std::io::Read;
use std::path::Path;

use crate::crypto::{Passphrases, Password};
use crate::entry::EntryMetadata;
use crate::error::ErrorInfo;
use crate::filter::{FilterCode, FilterInfo, WriteChain};
use crate::format::{self, FormatCapabilities, FormatCode, FormatWriter};
use crate::io::{ByteSink, FileSink, MemorySink};
use crate::options::OptionSet;
use crate::{Error, READ_BUFFER_SIZE, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum State {
    /// No entry written yet.
    Init,
    /// A header was written; no data yet.
    HeaderRead,
    /// Some data of the current entry was written.
    DataStreaming,
    /// The last entry was finished.
    EntryDone,
    /// The trailer was written or the session aborted.
    Closed,
    /// A fatal error occurred.
    Failed,
}

/// A write session producing one archive.
pub struct ArchiveWriter {
    chain: WriteChain,
    format: Box<dyn FormatWriter>,
    passphrases: Passphrases,
    state: State,
    /// Data bytes the open entry must carry, if the header declared them.
    limit: Option<u64>,
    written: u64,
    entry_count: usize,
    entry_name: String,
    last_error: Option<ErrorInfo>,
}

impl std::fmt::Debug for ArchiveWriter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ArchiveWriter")
            .field("format", &self.format.code())
            .field("state", &self.state)
            .field("entry_count", &self.entry_count)
            .finish_non_exhaustive()
    }
}

impl ArchiveWriter {
    /// Opens a write session over `sink`.
    ///
    /// The format and every filter are resolved before the sink is opened,
    /// so an unsupported combination leaves the sink untouched.
    ///
    /// # Errors
    ///
    /// - [`Error::InvalidOption`] for malformed or rejected options
    /// - [`Error::UnsupportedFormat`] for read-only formats
    /// - [`Error::UnsupportedFilter`] for filters not compiled in
    /// - I/O errors from the sink
    pub fn open(sink: impl ByteSink + 'static, options: WriteOptions) -> Result<Self> {
        let mut option_set = OptionSet::new();
        for text in &options.options {
            option_set.extend_from_str(text)?;
        }
        let mut format = format::writer_for(options.format, &option_set)?;
        let filtered = options
            .filters
            .iter()
            .any(|&c| c != FilterCode::None);
        let blocking = options.blocking(format.pads_output(), filtered);

        let mut chain = WriteChain::open(Box::new(sink), &options.filters, &option_set, blocking)?;
        if let Err(e) = format.start(chain.stream()) {
            if let Err(abort_err) = chain.abort() {
                log::debug!("Aborting sink after failed start: {}", abort_err);
            }
            return Err(e);
        }
        log::debug!(
            "Opened write session: format {}, filters {:?}",
            format.code(),
            options.filters
        );

        let WriteOptions {
            passphrases,
            provider,
            ..
        } = options;
        Ok(Self {
            chain,
            format,
            passphrases: Passphrases::new(passphrases, provider),
            state: State::Init,
            limit: None,
            written: 0,
            entry_count: 0,
            entry_name: String::new(),
            last_error: None,
        })
    }

    /// Creates (or truncates) the file at `path`.
    pub fn create_path(path: impl AsRef<Path>, options: WriteOptions) -> Result<Self> {
        Self::open(FileSink::new(path), options)
    }

    /// Writes into memory. The returned handle shares the buffer.
    pub fn create_memory(options: WriteOptions) -> Result<(Self, MemorySink)> {
        let sink = MemorySink::new();
        let writer = Self::open(sink.clone(), options)?;
        Ok((writer, sink))
    }

    fn check_usable(&self) -> Result<()> {
        match self.state {
            State::Failed => Err(Error::SessionFailed),
            State::Closed => Err(Error::protocol("the session is closed")),
            _ => Ok(()),
        }
    }

    fn fail(&mut self, err: Error) -> Error {
        self.last_error = Some(ErrorInfo::from(&err));
        if err.is_fatal() {
            log::debug!("Write session failed: {}", err);
            self.state = State::Failed;
        }
        err
    }

    fn misuse(&mut self, reason: &str) -> Error {
        self.fail(Error::protocol(reason))
    }

    fn warn(&mut self, message: String) {
        log::warn!("{}", message);
        self.last_error = Some(ErrorInfo::warning(message));
    }

    fn entry_open(&self) -> bool {
        matches!(self.state, State::HeaderRead | State::DataStreaming)
    }

    /// Serializes the header of a new entry.
    ///
    /// # Errors
    ///
    /// - [`Error::ProtocolViolation`] if the previous entry was not finished
    /// - [`Error::EntryTooLarge`] or [`Error::UnsupportedFeature`] if the
    ///   format cannot represent the entry; nothing is written and the
    ///   session continues
    pub fn write_header(&mut self, entry: &EntryMetadata) -> Result<()> {
        self.check_usable()?;
        if self.entry_open() {
            return Err(self.misuse("write_header called before finish_entry"));
        }
        let index = self.entry_count;
        match self
            .format
            .write_header(self.chain.stream(), entry, &mut self.passphrases, index)
        {
            Ok(limit) => {
                self.limit = limit;
                self.written = 0;
                self.entry_count += 1;
                self.entry_name = entry.display_name();
                self.state = State::HeaderRead;
                Ok(())
            }
            Err(e) => Err(self.fail(e)),
        }
    }

    /// Writes data of the current entry and returns how many bytes were accepted.
    ///
    /// Fewer than `data.len()` bytes are accepted only when the header
    /// declared a smaller size.
    pub fn write_data(&mut self, data: &[u8]) -> Result<usize> {
        self.check_usable()?;
        if !self.entry_open() {
            return Err(self.misuse("write_data called without an open entry"));
        }
        let accepted = match self.limit {
            Some(limit) => data.len().min((limit - self.written) as usize),
            None => data.len(),
        };
        if accepted < data.len() {
            self.warn(format!(
                "{}: {} bytes beyond the declared size were dropped",
                self.entry_name,
                data.len() - accepted
            ));
        }
        if accepted == 0 {
            return Ok(0);
        }
        if let Err(e) = self
            .format
            .write_data(self.chain.stream(), &data[..accepted])
        {
            return Err(self.fail(e));
        }
        self.written += accepted as u64;
        self.state = State::DataStreaming;
        Ok(accepted)
    }

    /// Copies `reader` to the end into the current entry.
    pub fn write_data_from(&mut self, reader: &mut impl Read) -> Result<u64> {
        let mut buf = vec![0u8; READ_BUFFER_SIZE];
        let mut total = 0u64;
        loop {
            let n = reader.read(&mut buf)?;
            if n == 0 {
                return Ok(total);
            }
            let accepted = self.write_data(&buf[..n])?;
            total += accepted as u64;
            if accepted < n {
                return Ok(total);
            }
        }
    }

    /// Completes the current entry. A no-op when no entry is open.
    pub fn finish_entry(&mut self) -> Result<()> {
        self.check_usable()?;
        if !self.entry_open() {
            return Ok(());
        }
        if let Some(limit) = self.limit {
            if self.written < limit {
                let missing = limit - self.written;
                self.warn(format!(
                    "{}: entry is {} bytes short of its declared size; padded with zeros",
                    self.entry_name, missing
                ));
                let zeros = [0u8; READ_BUFFER_SIZE];
                let mut left = missing;
                while left > 0 {
                    let n = left.min(zeros.len() as u64) as usize;
                    if let Err(e) = self.format.write_data(self.chain.stream(), &zeros[..n]) {
                        return Err(self.fail(e));
                    }
                    left -= n as u64;
                }
                self.written = limit;
            }
        }
        if let Err(e) = self.format.finish_entry(self.chain.stream()) {
            return Err(self.fail(e));
        }
        self.state = State::EntryDone;
        Ok(())
    }

    /// Finishes the open entry, writes the end-of-archive marker, flushes
    /// every compression stage and closes the sink.
    ///
    /// Calling `close` again is a no-op. After a fatal error it releases the
    /// sink without writing anything more.
    pub fn close(&mut self) -> Result<()> {
        match self.state {
            State::Closed => return Ok(()),
            State::Failed => {
                self.state = State::Closed;
                return self.chain.abort();
            }
            _ => {}
        }
        let result = self.finish_entry().and_then(|()| {
            self.format.close(self.chain.stream())?;
            self.chain.finish()
        });
        match result {
            Ok(()) => {
                log::debug!(
                    "Closed write session after {} entries, {} bytes",
                    self.entry_count,
                    self.chain.stream().position()
                );
                self.state = State::Closed;
                Ok(())
            }
            Err(e) => {
                self.last_error = Some(ErrorInfo::from(&e));
                self.state = State::Closed;
                if let Err(abort_err) = self.chain.abort() {
                    log::debug!("Aborting sink after failed close: {}", abort_err);
                }
                Err(e)
            }
        }
    }

    /// Discards buffered output and closes the sink without a trailer.
    pub fn abort(&mut self) -> Result<()> {
        if self.state == State::Closed {
            return Ok(());
        }
        log::debug!("Aborting write session after {} entries", self.entry_count);
        self.state = State::Closed;
        self.chain.abort()
    }

    /// Adds a passphrase candidate.
    pub fn add_passphrase(&mut self, password: impl Into<Password>) {
        self.passphrases.add(password.into());
    }

    /// The last error (or warning) this session observed.
    pub fn last_error(&self) -> Option<&ErrorInfo> {
        self.last_error.as_ref()
    }

    /// Forgets the last error.
    pub fn clear_error(&mut self) {
        self.last_error = None;
    }

    /// Bytes the format has produced so far, before compression.
    pub fn position(&mut self) -> u64 {
        self.chain.stream().position()
    }

    /// Number of headers written.
    pub fn entry_count(&self) -> usize {
        self.entry_count
    }

    /// Per-stage statistics, the stage nearest the format first and the
    /// raw sink stage (`none`) last.
    pub fn filters(&self) -> Vec<FilterInfo> {
        self.chain.info()
    }

    /// Number of stages including the raw sink stage.
    pub fn filter_count(&self) -> usize {
        self.chain.info().len()
    }

    /// The format being written.
    pub fn format(&self) -> FormatCode {
        self.format.code()
    }

    /// Name of [`format`](Self::format).
    pub fn format_name(&self) -> &'static str {
        self.format.code().name()
    }

    /// What the format can protect.
    pub fn format_capabilities(&self) -> FormatCapabilities {
        self.format.capabilities()
    }
}

impl Drop for ArchiveWriter {
    fn drop(&mut self) {
        if self.state != State::Closed {
            if let Err(e) = self.close() {
                log::warn!("Closing archive on drop failed: {}", e);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_header_twice_is_rejected() {
        let (mut writer, sink) = ArchiveWriter::create_memory(
            WriteOptions::new().format(FormatCode::TarUstar),
        )
        .unwrap();
        writer
            .write_header(&EntryMetadata::file("a.txt", 1))
            .unwrap();
        let before = writer.position();
        let err = writer
            .write_header(&EntryMetadata::file("b.txt", 1))
            .unwrap_err();
        assert!(matches!(err, Error::ProtocolViolation(_)));
        assert_eq!(writer.position(), before);
        // The session survives the misuse
        writer.write_data(b"x").unwrap();
        writer.finish_entry().unwrap();
        writer.close().unwrap();
        assert_eq!(sink.len(), 10240);
    }

    #[test]
    fn test_data_beyond_declared_size_is_dropped() {
        let (mut writer, _sink) =
            ArchiveWriter::create_memory(WriteOptions::new().format(FormatCode::CpioNewc))
                .unwrap();
        writer
            .write_header(&EntryMetadata::file("a", 3))
            .unwrap();
        assert_eq!(writer.write_data(b"abcdef").unwrap(), 3);
        assert_eq!(writer.last_error().unwrap().severity, crate::Severity::Warn);
        assert_eq!(writer.write_data(b"more").unwrap(), 0);
        writer.close().unwrap();
    }

    #[test]
    fn test_short_entry_padded() {
        let (mut writer, sink) =
            ArchiveWriter::create_memory(WriteOptions::new().format(FormatCode::CpioNewc))
                .unwrap();
        writer
            .write_header(&EntryMetadata::file("a", 8))
            .unwrap();
        writer.write_data(b"abc").unwrap();
        writer.finish_entry().unwrap();
        assert!(writer.last_error().is_some());
        writer.close().unwrap();
        let bytes = sink.contents();
        let data_at = 110 + 2; // header plus "a\0" is already 4-byte aligned
        assert_eq!(&bytes[data_at..data_at + 8], b"abc\0\0\0\0\0");
    }

    #[test]
    fn test_data_without_header_is_misuse() {
        let (mut writer, _sink) = ArchiveWriter::create_memory(WriteOptions::new()).unwrap();
        assert!(matches!(
            writer.write_data(b"x"),
            Err(Error::ProtocolViolation(_))
        ));
        writer.close().unwrap();
        writer.close().unwrap();
    }

    #[test]
    fn test_abort_writes_no_trailer() {
        let (mut writer, sink) = ArchiveWriter::create_memory(
            WriteOptions::new().format(FormatCode::TarPax),
        )
        .unwrap();
        writer
            .write_header(&EntryMetadata::file("a", 0))
            .unwrap();
        writer.abort().unwrap();
        assert!(sink.is_empty());
        assert!(matches!(
            writer.write_header(&EntryMetadata::file("b", 0)),
            Err(Error::ProtocolViolation(_))
        ));
    }

    #[test]
    fn test_gnu_tar_cannot_be_written() {
        let err = ArchiveWriter::create_memory(WriteOptions::new().format(FormatCode::TarGnu))
            .unwrap_err();
        assert!(matches!(err, Error::UnsupportedFormat { .. }));
    }
}
