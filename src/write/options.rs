//! Options for opening a write session.

use std::fmt;
use std::path::Path;

use crate::crypto::{PassphraseProvider, Password};
use crate::filter::{Blocking, FilterCode};
use crate::format::FormatCode;

/// Default size of every write to the sink for block-oriented output.
pub const DEFAULT_BYTES_PER_BLOCK: usize = 10240;

/// Configuration for [`ArchiveWriter`](super::ArchiveWriter).
///
/// # Example
///
/// ```rust
/// use arcstream::{FilterCode, FormatCode, WriteOptions};
///
/// let options = WriteOptions::new()
///     .format(FormatCode::TarPax)
///     .add_filter(FilterCode::Gzip)
///     .options("gzip:compression-level=9,gzip:!timestamp");
/// # let _ = options;
/// ```
pub struct WriteOptions {
    pub(crate) format: FormatCode,
    pub(crate) filters: Vec<FilterCode>,
    pub(crate) options: Vec<String>,
    pub(crate) passphrases: Vec<Password>,
    pub(crate) provider: Option<Box<dyn PassphraseProvider>>,
    pub(crate) bytes_per_block: Option<usize>,
    pub(crate) bytes_in_last_block: Option<usize>,
}

impl Default for WriteOptions {
    fn default() -> Self {
        Self {
            format: FormatCode::Spool,
            filters: Vec::new(),
            options: Vec::new(),
            passphrases: Vec::new(),
            provider: None,
            bytes_per_block: None,
            bytes_in_last_block: None,
        }
    }
}

impl fmt::Debug for WriteOptions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("WriteOptions")
            .field("format", &self.format)
            .field("filters", &self.filters)
            .field("options", &self.options)
            .field("passphrases", &self.passphrases.len())
            .field("has_provider", &self.provider.is_some())
            .field("bytes_per_block", &self.bytes_per_block)
            .field("bytes_in_last_block", &self.bytes_in_last_block)
            .finish()
    }
}

impl WriteOptions {
    /// Creates options for an uncompressed spool archive.
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the container format.
    pub fn format(mut self, format: FormatCode) -> Self {
        self.format = format;
        self
    }

    /// Appends a compression stage. The first stage added receives the
    /// format output; the last one writes to the sink.
    pub fn add_filter(mut self, code: FilterCode) -> Self {
        self.filters.push(code);
        self
    }

    /// Replaces the compression stages.
    pub fn filters(mut self, codes: impl IntoIterator<Item = FilterCode>) -> Self {
        self.filters = codes.into_iter().collect();
        self
    }

    /// Adds `module:key=value` options, parsed when the session opens.
    pub fn options(mut self, text: impl Into<String>) -> Self {
        self.options.push(text.into());
        self
    }

    /// Sets the passphrase used for encrypted entries.
    pub fn passphrase(mut self, password: impl Into<Password>) -> Self {
        self.passphrases.push(password.into());
        self
    }

    /// Sets the provider asked for the archive passphrase.
    pub fn passphrase_provider(mut self, provider: impl PassphraseProvider + 'static) -> Self {
        self.provider = Some(Box::new(provider));
        self
    }

    /// Size of every write to the sink. `0` writes through unbuffered.
    ///
    /// Defaults to [`DEFAULT_BYTES_PER_BLOCK`] for formats that pad their
    /// output (tar) and for compressed output, and to `0` otherwise.
    pub fn bytes_per_block(mut self, bytes: usize) -> Self {
        self.bytes_per_block = Some(bytes);
        self
    }

    /// Pads the final block to a multiple of `bytes`; `1` disables padding.
    ///
    /// Defaults to a full block for uncompressed tar and to `1` otherwise.
    pub fn bytes_in_last_block(mut self, bytes: usize) -> Self {
        self.bytes_in_last_block = Some(bytes);
        self
    }

    /// Picks the format and filter from an archive file name.
    ///
    /// A trailing `.gz`, `.bz2`, `.lzma`, `.lz4` or `.zst` selects the filter
    /// and the extension before it selects the format: `.tar` (pax), `.cpio`
    /// (newc) or `.spool`. The shorthands `.tgz`, `.tbz`, `.tbz2`, `.tlz` and
    /// `.tzst` stand for compressed tar. A compression suffix alone writes
    /// the raw format. Returns `None` for names that match none of these.
    ///
    /// ```rust
    /// use arcstream::WriteOptions;
    ///
    /// assert!(WriteOptions::for_extension("backup.tar.gz").is_some());
    /// assert!(WriteOptions::for_extension("notes.txt").is_none());
    /// ```
    pub fn for_extension(name: impl AsRef<Path>) -> Option<Self> {
        let (format, filter) = format_for_name(name.as_ref())?;
        let options = Self::new().format(format);
        Some(match filter {
            Some(code) => options.add_filter(code),
            None => options,
        })
    }

    pub(crate) fn blocking(&self, pads_output: bool, filtered: bool) -> Blocking {
        let per_block = self.bytes_per_block.unwrap_or(if pads_output || filtered {
            DEFAULT_BYTES_PER_BLOCK
        } else {
            0
        });
        if per_block == 0 {
            return Blocking::UNBLOCKED;
        }
        let last_block = self
            .bytes_in_last_block
            .unwrap_or(if filtered || !pads_output { 1 } else { per_block });
        Blocking {
            bytes_per_block: per_block,
            bytes_in_last_block: last_block.max(1),
        }
    }
}

fn format_for_name(name: &Path) -> Option<(FormatCode, Option<FilterCode>)> {
    let name = name.file_name()?.to_string_lossy().to_ascii_lowercase();
    let (stem, ext) = name.rsplit_once('.')?;
    let shorthand = match ext {
        "tgz" => Some(FilterCode::Gzip),
        "tbz" | "tbz2" => Some(FilterCode::Bzip2),
        "tlz" => Some(FilterCode::Lzma),
        "tzst" => Some(FilterCode::Zstd),
        _ => None,
    };
    if shorthand.is_some() {
        return Some((FormatCode::TarPax, shorthand));
    }
    let filter = match ext {
        "gz" => Some(FilterCode::Gzip),
        "bz2" => Some(FilterCode::Bzip2),
        "lzma" => Some(FilterCode::Lzma),
        "lz4" => Some(FilterCode::Lz4),
        "zst" => Some(FilterCode::Zstd),
        _ => None,
    };
    let inner = match filter {
        Some(_) => stem.rsplit_once('.').map_or("", |(_, inner)| inner),
        None => ext,
    };
    let format = match inner {
        "tar" => FormatCode::TarPax,
        "cpio" => FormatCode::CpioNewc,
        "spool" => FormatCode::Spool,
        _ if filter.is_some() => FormatCode::Raw,
        _ => return None,
    };
    Some((format, filter))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_tar_pads_to_full_block() {
        let b = WriteOptions::new().blocking(true, false);
        assert_eq!(b.bytes_per_block, 10240);
        assert_eq!(b.bytes_in_last_block, 10240);
    }

    #[test]
    fn test_compressed_output_not_padded() {
        let b = WriteOptions::new().blocking(true, true);
        assert_eq!(b.bytes_per_block, 10240);
        assert_eq!(b.bytes_in_last_block, 1);
    }

    #[test]
    fn test_unpadded_format_writes_through() {
        let b = WriteOptions::new().blocking(false, false);
        assert_eq!(b.bytes_per_block, 0);
        assert_eq!(b.bytes_in_last_block, 1);
    }

    #[test]
    fn test_explicit_block_sizes() {
        let b = WriteOptions::new()
            .bytes_per_block(512)
            .bytes_in_last_block(0)
            .blocking(false, false);
        assert_eq!(b.bytes_per_block, 512);
        assert_eq!(b.bytes_in_last_block, 1);
    }

    #[test]
    fn test_format_for_name() {
        let cases = [
            ("a.tar", Some((FormatCode::TarPax, None))),
            ("dir/A.TAR.GZ", Some((FormatCode::TarPax, Some(FilterCode::Gzip)))),
            ("a.tgz", Some((FormatCode::TarPax, Some(FilterCode::Gzip)))),
            ("a.tbz2", Some((FormatCode::TarPax, Some(FilterCode::Bzip2)))),
            ("a.cpio.zst", Some((FormatCode::CpioNewc, Some(FilterCode::Zstd)))),
            ("a.spool", Some((FormatCode::Spool, None))),
            ("a.spool.lz4", Some((FormatCode::Spool, Some(FilterCode::Lz4)))),
            ("dump.lzma", Some((FormatCode::Raw, Some(FilterCode::Lzma)))),
            ("notes.txt", None),
            ("tar", None),
            ("", None),
        ];
        for (name, expected) in cases {
            assert_eq!(format_for_name(Path::new(name)), expected, "{}", name);
        }
    }

    #[test]
    fn test_for_extension_sets_options() {
        let options = WriteOptions::for_extension("out.cpio.bz2").unwrap();
        assert_eq!(options.format, FormatCode::CpioNewc);
        assert_eq!(options.filters, vec![FilterCode::Bzip2]);
    }
}
