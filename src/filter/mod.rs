//! Compression filters and filter chains.
//!
//! A filter chain sits between the raw byte source (or sink) and the format
//! codec. On read, the chain is discovered by probing: the first bytes of the
//! stream are peeked, every enabled filter's signature test runs in priority
//! order, and the first match installs a decompression stage. Probing then
//! repeats on the decompressed output until nothing matches. On write, the
//! caller lists filters explicitly in application order; the first filter
//! receives the format's output and the last one writes to the sink.
//!
//! # Supported Filters
//!
//! | Filter | Code | Feature | Signature |
//! |--------|------|---------|-----------|
//! | gzip | 1 | `deflate` | `1F 8B 08` |
//! | bzip2 | 2 | `bzip2` | `BZh1`..`BZh9` + block magic |
//! | lzma | 5 | `lzma` | 13-byte `.lzma` header |
//! | lz4 | 13 | `lz4` | `04 22 4D 18` |
//! | zstd | 14 | `zstd` | `28 B5 2F FD` |
//!
//! Read-side detection priority is gzip, bzip2, zstd, lz4, lzma.

mod chain;
pub(crate) mod stage;

#[cfg(feature = "bzip2")]
mod bzip2;
#[cfg(feature = "deflate")]
mod gzip;
#[cfg(feature = "lz4")]
mod lz4;
#[cfg(feature = "lzma")]
mod lzma;
#[cfg(feature = "zstd")]
mod zstd;

pub(crate) use chain::{ReadChain, ReadStream, WriteChain, WriteStream};
pub(crate) use stage::Blocking;

use std::fmt;
use std::io::{self, Read};

use crate::options::ModuleOptions;
use crate::{Error, Result};

use stage::{Stage, StageWriter};

/// Maximum number of stacked filters on the read side.
pub const MAX_FILTER_DEPTH: usize = 25;

/// Number of bytes peeked for signature probes.
pub(crate) const PROBE_SIZE: usize = 1024;

/// Identifies a filter.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[non_exhaustive]
pub enum FilterCode {
    /// No transformation; the raw source or sink.
    None,
    /// gzip (RFC 1952).
    Gzip,
    /// bzip2.
    Bzip2,
    /// LZMA "alone" (`.lzma`).
    Lzma,
    /// LZ4 frame format.
    Lz4,
    /// Zstandard.
    Zstd,
}

impl FilterCode {
    /// Every filter code, in read-side priority order after `None`.
    pub const ALL: [FilterCode; 6] = [
        FilterCode::None,
        FilterCode::Gzip,
        FilterCode::Bzip2,
        FilterCode::Zstd,
        FilterCode::Lz4,
        FilterCode::Lzma,
    ];

    /// Returns the numeric filter code.
    pub const fn code(self) -> u32 {
        match self {
            FilterCode::None => 0,
            FilterCode::Gzip => 1,
            FilterCode::Bzip2 => 2,
            FilterCode::Lzma => 5,
            FilterCode::Lz4 => 13,
            FilterCode::Zstd => 14,
        }
    }

    /// Maps a numeric code back to a filter.
    pub fn from_code(code: u32) -> Option<Self> {
        Self::ALL.into_iter().find(|f| f.code() == code)
    }

    /// Returns the short filter name, which is also its option module name.
    pub const fn name(self) -> &'static str {
        match self {
            FilterCode::None => "none",
            FilterCode::Gzip => "gzip",
            FilterCode::Bzip2 => "bzip2",
            FilterCode::Lzma => "lzma",
            FilterCode::Lz4 => "lz4",
            FilterCode::Zstd => "zstd",
        }
    }

    /// Returns true if this build can encode and decode the filter.
    pub fn is_available(self) -> bool {
        self == FilterCode::None || lookup(self).is_ok()
    }
}

impl fmt::Display for FilterCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Statistics of one stage of an active chain.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FilterInfo {
    /// The filter.
    pub code: FilterCode,
    /// The filter name.
    pub name: &'static str,
    /// Bytes the stage delivered toward the format (read) or accepted from it (write).
    pub bytes: u64,
}

/// A filter implementation.
pub(crate) trait Filter: Sync {
    fn code(&self) -> FilterCode;

    fn name(&self) -> &'static str {
        self.code().name()
    }

    /// Smallest prefix the signature test needs.
    fn min_probe(&self) -> usize;

    /// Tests a stream prefix. Only called with at least `min_probe` bytes.
    fn matches(&self, prefix: &[u8]) -> bool;

    /// Wraps `input` in a decoder.
    fn decoder(&self, input: Box<dyn Stage>) -> io::Result<Box<dyn Read + Send>>;

    /// Wraps `output` in an encoder configured from this filter's options.
    fn encoder(
        &self,
        output: Box<dyn StageWriter>,
        options: &ModuleOptions<'_>,
    ) -> Result<Box<dyn StageWriter>>;

    /// Signature test guarded by the minimum-length check.
    fn bid(&self, prefix: &[u8]) -> bool {
        prefix.len() >= self.min_probe() && self.matches(prefix)
    }
}

/// Returns the compiled-in filters in read-side priority order.
pub(crate) fn registry() -> Vec<&'static dyn Filter> {
    #[allow(unused_mut)]
    let mut filters: Vec<&'static dyn Filter> = Vec::new();
    #[cfg(feature = "deflate")]
    filters.push(&gzip::GzipFilter);
    #[cfg(feature = "bzip2")]
    filters.push(&bzip2::Bzip2Filter);
    #[cfg(feature = "zstd")]
    filters.push(&zstd::ZstdFilter);
    #[cfg(feature = "lz4")]
    filters.push(&lz4::Lz4Filter);
    #[cfg(feature = "lzma")]
    filters.push(&lzma::LzmaFilter);
    filters
}

/// Finds a compiled-in filter by code.
pub(crate) fn lookup(code: FilterCode) -> Result<&'static dyn Filter> {
    registry()
        .into_iter()
        .find(|f| f.code() == code)
        .ok_or(Error::UnsupportedFilter { code: code.code() })
}

/// Reads the compression level option shared by all encoders.
pub(crate) fn level_option(
    options: &ModuleOptions<'_>,
    min: u32,
    max: u32,
    default: u32,
) -> Result<u32> {
    Ok(options
        .uint("compression-level", min, max)?
        .unwrap_or(default))
}
