//! Container format codecs.
//!
//! A format codec parses (or serializes) entry headers and data framing on
//! top of the decoded stream a filter chain delivers. On read, the format is
//! chosen by probing the decoded stream; on write, the caller names it.
//!
//! # Supported Formats
//!
//! | Format | Code | Read | Write | Notes |
//! |--------|------|------|-------|-------|
//! | spool | `0x1F0000` | yes | yes | native; chunked data, CRC-32, optional AES-256 |
//! | tar (ustar, pax, GNU) | `0x30000` | yes | ustar, pax | pax records for long names, large values, sub-second times |
//! | cpio (newc, crc) | `0x10000` | yes | yes | 4-byte aligned, `TRAILER!!!` terminator |
//! | empty | `0x60000` | yes | no entries | a zero-length stream |
//! | raw | `0x90000` | when enabled | one entry | the whole stream as one entry named `data` |
//!
//! Read-side detection priority is spool, tar, cpio, empty. The raw format
//! matches any stream, so it only takes part when explicitly enabled.

mod cpio;
mod empty;
mod raw;
mod spool;
mod tar;

use std::fmt;
use std::io::SeekFrom;

use crate::checksum::EntryDigest;
use crate::crypto::Passphrases;
use crate::entry::EntryMetadata;
use crate::filter::{ReadStream, WriteStream};
use crate::options::{ModuleOptions, OptionSet};
use crate::{Error, Result};

/// Bytes peeked for format detection.
pub(crate) const FORMAT_PROBE_SIZE: usize = 1024;

const FAMILY_MASK: u32 = 0xFF0000;

/// Identifies a container format or one of its variants.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[non_exhaustive]
pub enum FormatCode {
    /// cpio, variant chosen by options (newc by default).
    Cpio,
    /// cpio SVR4 "newc" (`070701`).
    CpioNewc,
    /// cpio SVR4 with byte-sum checksum (`070702`).
    CpioCrc,
    /// tar, variant chosen by options (pax by default).
    Tar,
    /// POSIX ustar.
    TarUstar,
    /// POSIX pax (ustar plus extended headers).
    TarPax,
    /// GNU tar (read only).
    TarGnu,
    /// A stream without entries.
    Empty,
    /// The whole stream as one entry.
    Raw,
    /// The native chunked container.
    Spool,
}

impl FormatCode {
    /// Every format code.
    pub const ALL: [FormatCode; 10] = [
        FormatCode::Cpio,
        FormatCode::CpioNewc,
        FormatCode::CpioCrc,
        FormatCode::Tar,
        FormatCode::TarUstar,
        FormatCode::TarPax,
        FormatCode::TarGnu,
        FormatCode::Empty,
        FormatCode::Raw,
        FormatCode::Spool,
    ];

    /// Returns the numeric format code.
    pub const fn code(self) -> u32 {
        match self {
            FormatCode::Cpio => 0x10000,
            FormatCode::CpioNewc => 0x10004,
            FormatCode::CpioCrc => 0x10005,
            FormatCode::Tar => 0x30000,
            FormatCode::TarUstar => 0x30001,
            FormatCode::TarPax => 0x30002,
            FormatCode::TarGnu => 0x30004,
            FormatCode::Empty => 0x60000,
            FormatCode::Raw => 0x90000,
            FormatCode::Spool => 0x1F0000,
        }
    }

    /// Maps a numeric code back to a format.
    pub fn from_code(code: u32) -> Option<Self> {
        Self::ALL.into_iter().find(|f| f.code() == code)
    }

    /// Returns the format name.
    pub const fn name(self) -> &'static str {
        match self {
            FormatCode::Cpio => "cpio",
            FormatCode::CpioNewc => "SVR4 cpio newc",
            FormatCode::CpioCrc => "SVR4 cpio crc",
            FormatCode::Tar => "tar",
            FormatCode::TarUstar => "POSIX ustar",
            FormatCode::TarPax => "POSIX pax interchange",
            FormatCode::TarGnu => "GNU tar",
            FormatCode::Empty => "empty",
            FormatCode::Raw => "raw",
            FormatCode::Spool => "spool",
        }
    }

    /// Returns the base format of a variant (`TarPax` → `Tar`).
    pub fn family(self) -> FormatCode {
        Self::from_code(self.code() & FAMILY_MASK).unwrap_or(self)
    }
}

impl fmt::Display for FormatCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// What a format can protect.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct FormatCapabilities {
    /// Entry data can be encrypted.
    pub encrypt_data: bool,
    /// Entry metadata can be encrypted.
    pub encrypt_metadata: bool,
}

/// Whether an archive contains encrypted entries.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[non_exhaustive]
pub enum EncryptionStatus {
    /// The format cannot encrypt anything.
    Unsupported,
    /// No encrypted entry seen yet, but more entries may follow.
    DontKnow,
    /// At least one encrypted entry was seen.
    Yes,
    /// The whole archive was read and nothing was encrypted.
    No,
}

/// Session state a codec may use while reading.
pub(crate) struct ReadContext<'a> {
    pub(crate) stream: &'a mut ReadStream,
    pub(crate) passphrases: &'a mut Passphrases,
    /// Index of the current (or next) entry.
    pub(crate) entry_index: usize,
}

/// A format parser.
///
/// The session guarantees call order: `read_header`, then any number of
/// `read_data` / `seek_data` calls, then `skip_data` before the next
/// `read_header`.
pub(crate) trait FormatReader: Send {
    /// The format, refined to a variant once headers have been seen.
    fn code(&self) -> FormatCode;

    /// Parses the next header into `entry`.
    ///
    /// Returns the absolute decoded offset of the header, or `None` at the
    /// end of the archive.
    fn read_header(
        &mut self,
        cx: &mut ReadContext<'_>,
        entry: &mut EntryMetadata,
    ) -> Result<Option<u64>>;

    /// Reads entry data; `Ok(0)` at the end of the entry.
    fn read_data(&mut self, cx: &mut ReadContext<'_>, buf: &mut [u8]) -> Result<usize>;

    /// Discards whatever is left of the current entry, including padding.
    fn skip_data(&mut self, cx: &mut ReadContext<'_>) -> Result<()>;

    /// Moves within the current entry's data.
    fn seek_data(&mut self, cx: &mut ReadContext<'_>, pos: SeekFrom) -> Result<u64> {
        let _ = (cx, pos);
        Err(Error::NotSupported {
            operation: "seek within entry data",
        })
    }

    /// Digest of the current entry, once its data has been fully read and verified.
    fn digest(&self) -> Option<EntryDigest> {
        None
    }

    fn capabilities(&self) -> FormatCapabilities {
        FormatCapabilities::default()
    }

    fn encryption_status(&self) -> EncryptionStatus {
        EncryptionStatus::Unsupported
    }
}

/// A format serializer.
pub(crate) trait FormatWriter: Send {
    fn code(&self) -> FormatCode;

    /// Writes the archive preamble, if any.
    fn start(&mut self, out: &mut WriteStream) -> Result<()> {
        let _ = out;
        Ok(())
    }

    /// Serializes a header.
    ///
    /// Nothing is written if the entry is rejected. Returns the number of
    /// data bytes the entry must carry, or `None` if the format frames data
    /// of any length.
    fn write_header(
        &mut self,
        out: &mut WriteStream,
        entry: &EntryMetadata,
        passphrases: &mut Passphrases,
        entry_index: usize,
    ) -> Result<Option<u64>>;

    /// Writes entry data. The session never passes more than the header allowed.
    fn write_data(&mut self, out: &mut WriteStream, data: &[u8]) -> Result<()>;

    /// Completes the current entry (padding, trailers).
    fn finish_entry(&mut self, out: &mut WriteStream) -> Result<()>;

    /// Writes the end-of-archive marker.
    fn close(&mut self, out: &mut WriteStream) -> Result<()>;

    /// Returns true if the format pads its output to full blocks.
    fn pads_output(&self) -> bool {
        false
    }

    fn capabilities(&self) -> FormatCapabilities {
        FormatCapabilities::default()
    }
}

/// A format family: its signature test and codec constructors.
pub(crate) trait Format: Sync {
    fn family(&self) -> FormatCode;

    /// Tests the start of the decoded stream.
    fn bid(&self, prefix: &[u8]) -> bool;

    fn reader(&self, options: &ModuleOptions<'_>) -> Result<Box<dyn FormatReader>>;

    /// Creates a writer for `code`, a member of this family.
    fn writer(&self, code: FormatCode, options: &ModuleOptions<'_>)
    -> Result<Box<dyn FormatWriter>>;
}

/// Option module name of a family.
fn module_name(family: FormatCode) -> &'static str {
    match family {
        FormatCode::Cpio => "cpio",
        FormatCode::Tar => "tar",
        FormatCode::Empty => "empty",
        FormatCode::Raw => "raw",
        _ => "spool",
    }
}

/// Every format family in read-side priority order.
fn registry() -> [&'static dyn Format; 5] {
    [
        &spool::SpoolFormat,
        &tar::TarFormat,
        &cpio::CpioFormat,
        &empty::EmptyFormat,
        &raw::RawFormat,
    ]
}

fn lookup(code: FormatCode) -> &'static dyn Format {
    let family = code.family();
    registry()
        .into_iter()
        .find(|f| f.family() == family)
        .unwrap_or(&raw::RawFormat)
}

/// Formats probed when the caller does not choose.
pub(crate) const DEFAULT_READ_FORMATS: [FormatCode; 4] = [
    FormatCode::Spool,
    FormatCode::Tar,
    FormatCode::Cpio,
    FormatCode::Empty,
];

/// Probes the stream and returns a reader for the first format that bids.
pub(crate) fn detect(
    stream: &mut ReadStream,
    enabled: &[FormatCode],
    options: &OptionSet,
) -> Result<Box<dyn FormatReader>> {
    let families: Vec<FormatCode> = enabled.iter().map(|f| f.family()).collect();
    let prefix = stream.peek(FORMAT_PROBE_SIZE)?;
    let format = registry()
        .into_iter()
        .filter(|f| families.contains(&f.family()))
        .find(|f| f.bid(prefix))
        .ok_or(Error::UnrecognizedFormat)?;
    log::debug!("Detected {} format", format.family());
    format.reader(&options.for_module(module_name(format.family())))
}

/// Creates a writer for `code`.
pub(crate) fn writer_for(code: FormatCode, options: &OptionSet) -> Result<Box<dyn FormatWriter>> {
    let format = lookup(code);
    if code == FormatCode::TarGnu {
        return Err(Error::UnsupportedFormat { code: code.code() });
    }
    format.writer(code, &options.for_module(module_name(format.family())))
}

/// Number of zero bytes that pads `len` to a multiple of `align`.
pub(crate) fn padding(len: u64, align: u64) -> u64 {
    (align - len % align) % align
}

/// Cursor over entry data with a known length.
#[derive(Debug, Clone, Copy, Default)]
pub(crate) struct DataWindow {
    /// Absolute offset of the first data byte.
    pub(crate) start: u64,
    /// Data length.
    pub(crate) size: u64,
    /// Bytes not yet consumed.
    pub(crate) remaining: u64,
    /// Padding after the data.
    pub(crate) padding: u64,
}

impl DataWindow {
    pub(crate) fn new(start: u64, size: u64, padding: u64) -> Self {
        Self {
            start,
            size,
            remaining: size,
            padding,
        }
    }

    /// Reads up to `buf.len()` bytes of the window.
    pub(crate) fn read(&mut self, stream: &mut ReadStream, buf: &mut [u8]) -> Result<usize> {
        if self.remaining == 0 || buf.is_empty() {
            return Ok(0);
        }
        let want = (buf.len() as u64).min(self.remaining) as usize;
        let n = stream.read(&mut buf[..want])?;
        if n == 0 {
            return Err(Error::Truncated {
                offset: stream.position(),
            });
        }
        self.remaining -= n as u64;
        Ok(n)
    }

    /// Skips the rest of the window and its padding.
    pub(crate) fn skip(&mut self, stream: &mut ReadStream) -> Result<()> {
        let total = self.remaining + self.padding;
        self.remaining = 0;
        self.padding = 0;
        stream.skip_exact(total)
    }

    /// Repositions within the window on a seekable stream.
    pub(crate) fn seek(&mut self, stream: &mut ReadStream, pos: SeekFrom) -> Result<u64> {
        if !stream.can_seek() {
            return Err(Error::NotSupported {
                operation: "seek within entry data on a sequential or filtered stream",
            });
        }
        let current = self.size - self.remaining;
        let target = match pos {
            SeekFrom::Start(n) => Some(n),
            SeekFrom::Current(d) => current.checked_add_signed(d),
            SeekFrom::End(d) => self.size.checked_add_signed(d),
        };
        let target = target
            .filter(|&t| t <= self.size)
            .ok_or_else(|| Error::protocol("seek target outside the entry data"))?;
        stream.seek_to(self.start + target)?;
        self.remaining = self.size - target;
        Ok(target)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_codes_and_families() {
        for f in FormatCode::ALL {
            assert_eq!(FormatCode::from_code(f.code()), Some(f));
        }
        assert_eq!(FormatCode::TarPax.family(), FormatCode::Tar);
        assert_eq!(FormatCode::CpioCrc.family(), FormatCode::Cpio);
        assert_eq!(FormatCode::Spool.family(), FormatCode::Spool);
        assert_eq!(FormatCode::TarGnu.code(), 0x30004);
    }

    #[test]
    fn test_padding() {
        assert_eq!(padding(0, 512), 0);
        assert_eq!(padding(1, 512), 511);
        assert_eq!(padding(512, 512), 0);
        assert_eq!(padding(6, 4), 2);
    }

    #[test]
    fn test_gnu_tar_is_read_only() {
        let err = writer_for(FormatCode::TarGnu, &OptionSet::new()).err().unwrap();
        assert!(matches!(err, Error::UnsupportedFormat { code: 0x30004 }));
    }
}
