//! Read sessions.
//!
//! An [`ArchiveReader`] pulls bytes from a [`ByteSource`], decodes them
//! through an auto-detected filter chain, detects the container format and
//! yields entries one at a time.
//!
//! # Example
//!
//! ```rust,no_run
//! use std::io::Read;
//!
//! use arcstream::{ArchiveReader, ReadOptions};
//!
//! # fn main() -> arcstream::Result<()> {
//! let mut reader = ArchiveReader::open_path("backup.tar.gz", ReadOptions::new())?;
//! while let Some(entry) = reader.next_header()? {
//!     let mut data = Vec::new();
//!     reader.read_data_into(&mut data)?;
//!     println!("{}: {} bytes", entry.pathname().map(|p| p.to_string()).unwrap_or_default(), data.len());
//! }
//! reader.close()?;
//! # Ok(())
//! # }
//! ```
//!
//! # Error Scoping
//!
//! Errors carry a [`Severity`](crate::Severity):
//!
//! - `Failed` errors make the current entry unusable; the next
//!   [`next_header`](ArchiveReader::next_header) skips what is left of it
//! - `Fatal` errors leave the session unusable; every later call except
//!   [`close`](ArchiveReader::close) returns [`Error::SessionFailed`]
//!
//! The end of the archive is `Ok(None)`, never an error.

mod options;

pub use options::ReadOptions;

use std::io::{self, SeekFrom, Write};
use std::path::Path;

use crate::checksum::EntryDigest;
use crate::crypto::{Passphrases, Password};
use crate::entry::EntryMetadata;
use crate::error::ErrorInfo;
use crate::filter::{FilterInfo, ReadChain};
use crate::format::{
    self, DEFAULT_READ_FORMATS, EncryptionStatus, FormatCapabilities, FormatCode, FormatReader,
    ReadContext,
};
use crate::io::{ByteSource, FileSource, MemorySource, ReaderSource};
use crate::options::OptionSet;
use crate::volume::MultiVolumeSource;
use crate::{Error, READ_BUFFER_SIZE, Result, Severity};

/// Position of a read session in the entry state machine.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum State {
    /// No header read yet.
    Init,
    /// A header was returned; no data read yet.
    HeaderRead,
    /// Some data of the current entry was read.
    DataStreaming,
    /// The current entry's data is exhausted or skipped.
    EntryDone,
    /// The current entry failed; the session continues.
    EntryFailed,
    /// The end of the archive was reached.
    Closed,
    /// A fatal error occurred.
    Failed,
}

/// A read session over one archive.
pub struct ArchiveReader {
    chain: ReadChain,
    format: Box<dyn FormatReader>,
    passphrases: Passphrases,
    state: State,
    entry: EntryMetadata,
    file_count: usize,
    header_position: Option<u64>,
    last_error: Option<ErrorInfo>,
    released: bool,
}

impl std::fmt::Debug for ArchiveReader {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ArchiveReader")
            .field("format", &self.format.code())
            .field("state", &self.state)
            .field("file_count", &self.file_count)
            .field("header_position", &self.header_position)
            .finish_non_exhaustive()
    }
}

fn context<'a>(
    chain: &'a mut ReadChain,
    passphrases: &'a mut Passphrases,
    entry_index: usize,
) -> ReadContext<'a> {
    ReadContext {
        stream: chain.stream(),
        passphrases,
        entry_index,
    }
}

impl ArchiveReader {
    /// Opens a read session over `source`.
    ///
    /// The source is opened, the filter chain is built and the format is
    /// detected before this returns.
    ///
    /// # Errors
    ///
    /// - [`Error::InvalidOption`] if an option string is malformed or a
    ///   strict module rejects a key
    /// - [`Error::UnrecognizedFormat`] if no enabled format matches
    /// - I/O and filter errors from the source
    pub fn open(source: impl ByteSource + 'static, options: ReadOptions) -> Result<Self> {
        let ReadOptions {
            filters,
            forced_filters,
            formats,
            options,
            passphrases,
            provider,
        } = options;

        let mut option_set = OptionSet::new();
        for text in &options {
            option_set.extend_from_str(text)?;
        }

        let mut chain = ReadChain::open(Box::new(source), filters.as_deref(), &forced_filters)?;
        let enabled = formats.unwrap_or_else(|| DEFAULT_READ_FORMATS.to_vec());
        let format = match format::detect(chain.stream(), &enabled, &option_set) {
            Ok(format) => format,
            Err(e) => {
                if let Err(close_err) = chain.close() {
                    log::debug!("Closing source after failed detection: {}", close_err);
                }
                return Err(e);
            }
        };
        log::debug!(
            "Opened read session: format {}, filters {:?}",
            format.code(),
            chain.info().iter().map(|f| f.name).collect::<Vec<_>>()
        );

        Ok(Self {
            chain,
            format,
            passphrases: Passphrases::new(passphrases, provider),
            state: State::Init,
            entry: EntryMetadata::new(),
            file_count: 0,
            header_position: None,
            last_error: None,
            released: false,
        })
    }

    /// Opens the file at `path`.
    pub fn open_path(path: impl AsRef<Path>, options: ReadOptions) -> Result<Self> {
        Self::open(FileSource::new(path), options)
    }

    /// Opens several files read back to back as one multi-volume archive.
    pub fn open_paths<P: AsRef<Path>>(
        paths: impl IntoIterator<Item = P>,
        options: ReadOptions,
    ) -> Result<Self> {
        Self::open(MultiVolumeSource::from_paths(paths), options)
    }

    /// Opens an in-memory archive.
    pub fn open_memory(data: impl Into<Vec<u8>>, options: ReadOptions) -> Result<Self> {
        Self::open(MemorySource::new(data), options)
    }

    /// Opens a sequential reader. Seeking within entries is not possible.
    pub fn open_reader<R: io::Read + Send + 'static>(
        reader: R,
        options: ReadOptions,
    ) -> Result<Self> {
        Self::open(ReaderSource::new(reader), options)
    }

    fn check_usable(&self) -> Result<()> {
        if self.released {
            return Err(Error::protocol("the session is closed"));
        }
        if self.state == State::Failed {
            return Err(Error::SessionFailed);
        }
        Ok(())
    }

    /// Records `err` and applies its severity to the session.
    fn fail(&mut self, err: Error) -> Error {
        self.last_error = Some(ErrorInfo::from(&err));
        match &err {
            e if e.is_fatal() => {
                log::debug!("Read session failed: {}", e);
                self.state = State::Failed;
            }
            // Misuse and unsupported calls leave the entry intact
            Error::ProtocolViolation(_) | Error::NotSupported { .. } => {}
            e if e.severity() == Severity::Warn => {
                log::warn!("Entry {}: {}", self.file_count, e);
            }
            e => {
                log::debug!("Entry {} failed: {}", self.file_count, e);
                if matches!(
                    self.state,
                    State::Init | State::HeaderRead | State::DataStreaming | State::EntryDone
                ) {
                    self.state = State::EntryFailed;
                }
            }
        }
        err
    }

    fn misuse(&mut self, reason: &str) -> Error {
        let err = Error::protocol(reason);
        self.last_error = Some(ErrorInfo::from(&err));
        err
    }

    /// Advances to the next entry.
    ///
    /// Whatever is left of the current entry is skipped first, whether its
    /// data was read fully, partially or not at all. Returns `Ok(None)` at
    /// the end of the archive, and again on every later call.
    pub fn next_header(&mut self) -> Result<Option<EntryMetadata>> {
        self.check_usable()?;
        match self.state {
            State::Closed => return Ok(None),
            State::Init => {}
            _ => {
                let mut cx = context(&mut self.chain, &mut self.passphrases, self.file_count);
                if let Err(e) = self.format.skip_data(&mut cx) {
                    return Err(self.fail(e));
                }
            }
        }

        self.entry.clear();
        let index = self.file_count;
        let mut cx = context(&mut self.chain, &mut self.passphrases, index);
        let result = self.format.read_header(&mut cx, &mut self.entry);
        match result {
            Ok(None) => {
                log::debug!("End of archive after {} entries", self.file_count);
                self.state = State::Closed;
                Ok(None)
            }
            Ok(Some(offset)) => {
                if let Some(previous) = self.header_position {
                    if offset < previous {
                        return Err(self.fail(Error::OffsetRegression {
                            previous,
                            current: offset,
                        }));
                    }
                }
                self.header_position = Some(offset);
                self.file_count += 1;
                self.state = State::HeaderRead;
                if let Some(warning) = self.entry.warnings().last() {
                    for w in self.entry.warnings() {
                        log::warn!("{}: {}", self.entry.display_name(), w);
                    }
                    self.last_error = Some(ErrorInfo::warning(warning.clone()));
                }
                Ok(Some(self.entry.clone()))
            }
            Err(e) => {
                if !e.is_fatal() {
                    // The codec consumed the damaged header; keep indices aligned
                    self.file_count += 1;
                    self.state = State::HeaderRead;
                }
                Err(self.fail(e))
            }
        }
    }

    /// Reads data of the current entry.
    ///
    /// Returns the number of bytes read, which may be less than
    /// `buf.len()`; `Ok(0)` means the entry's data is exhausted.
    pub fn read_data(&mut self, buf: &mut [u8]) -> Result<usize> {
        self.check_usable()?;
        match self.state {
            State::HeaderRead | State::DataStreaming => {}
            State::EntryDone => return Ok(0),
            State::EntryFailed => {
                return Err(self.misuse("the current entry failed; advance with next_header"));
            }
            State::Init | State::Closed | State::Failed => {
                return Err(self.misuse("no entry header has been read"));
            }
        }
        let mut cx = context(&mut self.chain, &mut self.passphrases, self.file_count - 1);
        match self.format.read_data(&mut cx, buf) {
            Ok(0) if !buf.is_empty() => {
                self.state = State::EntryDone;
                Ok(0)
            }
            Ok(n) => {
                self.state = State::DataStreaming;
                Ok(n)
            }
            Err(e) => Err(self.fail(e)),
        }
    }

    /// Copies the rest of the current entry into `out` and returns the byte count.
    pub fn read_data_into(&mut self, out: &mut impl Write) -> Result<u64> {
        let mut buf = vec![0u8; READ_BUFFER_SIZE];
        let mut total = 0u64;
        loop {
            let n = self.read_data(&mut buf)?;
            if n == 0 {
                return Ok(total);
            }
            out.write_all(&buf[..n])?;
            total += n as u64;
        }
    }

    /// Returns an [`io::Read`] view of the current entry's data.
    pub fn entry_reader(&mut self) -> EntryReader<'_> {
        EntryReader { reader: self }
    }

    /// Discards the rest of the current entry.
    pub fn skip_entry_data(&mut self) -> Result<()> {
        self.check_usable()?;
        match self.state {
            State::HeaderRead | State::DataStreaming | State::EntryFailed => {}
            State::EntryDone => return Ok(()),
            State::Init | State::Closed | State::Failed => {
                return Err(self.misuse("no entry header has been read"));
            }
        }
        let mut cx = context(&mut self.chain, &mut self.passphrases, self.file_count - 1);
        match self.format.skip_data(&mut cx) {
            Ok(()) => {
                self.state = State::EntryDone;
                Ok(())
            }
            Err(e) => Err(self.fail(e)),
        }
    }

    /// Moves within the current entry's data and returns the new offset
    /// relative to the start of the entry.
    ///
    /// # Errors
    ///
    /// [`Error::NotSupported`] unless the source is seekable, no filter is
    /// installed and the format stores entry data contiguously. The entry
    /// stays readable after this error.
    pub fn seek_in_entry(&mut self, pos: SeekFrom) -> Result<u64> {
        self.check_usable()?;
        if !matches!(
            self.state,
            State::HeaderRead | State::DataStreaming | State::EntryDone
        ) {
            return Err(self.misuse("no readable entry to seek in"));
        }
        let mut cx = context(&mut self.chain, &mut self.passphrases, self.file_count - 1);
        match self.format.seek_data(&mut cx, pos) {
            Ok(offset) => {
                self.state = State::DataStreaming;
                Ok(offset)
            }
            Err(e) => Err(self.fail(e)),
        }
    }

    /// Returns the metadata of the current entry.
    pub fn entry(&self) -> Option<&EntryMetadata> {
        match self.state {
            State::HeaderRead | State::DataStreaming | State::EntryDone | State::EntryFailed => {
                Some(&self.entry)
            }
            _ => None,
        }
    }

    /// Returns the verified digest of the current entry.
    ///
    /// Available once the entry's data has been read to the end, and only
    /// for formats that store one.
    pub fn digest(&self) -> Option<EntryDigest> {
        if self.state == State::EntryDone {
            self.format.digest()
        } else {
            None
        }
    }

    /// Adds a passphrase for the remaining entries.
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

    /// Absolute decoded offset of the current entry's header.
    pub fn header_position(&self) -> Option<u64> {
        self.header_position
    }

    /// Absolute decoded offset of the next byte the format will read.
    pub fn position(&mut self) -> u64 {
        self.chain.stream().position()
    }

    /// Number of headers read so far.
    pub fn file_count(&self) -> usize {
        self.file_count
    }

    /// Per-stage statistics, the stage nearest the format first and the
    /// raw source stage (`none`) last.
    pub fn filters(&self) -> Vec<FilterInfo> {
        self.chain.info()
    }

    /// Number of stages including the raw source stage.
    pub fn filter_count(&self) -> usize {
        self.chain.info().len()
    }

    /// The detected format, refined to a variant once headers have been read.
    pub fn format(&self) -> FormatCode {
        self.format.code()
    }

    /// Name of [`format`](Self::format).
    pub fn format_name(&self) -> &'static str {
        self.format.code().name()
    }

    /// What the detected format can protect.
    pub fn format_capabilities(&self) -> FormatCapabilities {
        self.format.capabilities()
    }

    /// Whether encrypted entries have been seen.
    pub fn has_encrypted_entries(&self) -> EncryptionStatus {
        self.format.encryption_status()
    }

    /// Ends the session and closes the source. Later calls are no-ops.
    pub fn close(&mut self) -> Result<()> {
        if self.released {
            return Ok(());
        }
        self.released = true;
        log::debug!("Closing read session after {} entries", self.file_count);
        self.chain.close()
    }
}

impl Drop for ArchiveReader {
    fn drop(&mut self) {
        if let Err(e) = self.close() {
            log::warn!("Closing archive source on drop failed: {}", e);
        }
    }
}

/// An [`io::Read`] view of the current entry, from [`ArchiveReader::entry_reader`].
#[derive(Debug)]
pub struct EntryReader<'a> {
    reader: &'a mut ArchiveReader,
}

impl io::Read for EntryReader<'_> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        self.reader.read_data(buf).map_err(|e| match e {
            Error::Io(io_err) => io_err,
            other => io::Error::new(io::ErrorKind::InvalidData, other),
        })
    }
}
