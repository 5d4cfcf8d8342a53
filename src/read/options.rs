//! Options for opening a read session.

use std::fmt;

use crate::crypto::{PassphraseProvider, Password};
use crate::filter::FilterCode;
use crate::format::FormatCode;

/// Configuration for [`ArchiveReader`](super::ArchiveReader).
///
/// # Example
///
/// ```rust
/// use arcstream::{FilterCode, FormatCode, ReadOptions};
///
/// let options = ReadOptions::new()
///     .filters([FilterCode::Gzip, FilterCode::Bzip2])
///     .formats([FormatCode::Tar, FormatCode::Cpio])
///     .options("tar:!unused")
///     .passphrase("secret");
/// # let _ = options;
/// ```
#[derive(Default)]
pub struct ReadOptions {
    pub(crate) filters: Option<Vec<FilterCode>>,
    pub(crate) forced_filters: Vec<FilterCode>,
    pub(crate) formats: Option<Vec<FormatCode>>,
    pub(crate) options: Vec<String>,
    pub(crate) passphrases: Vec<Password>,
    pub(crate) provider: Option<Box<dyn PassphraseProvider>>,
}

impl fmt::Debug for ReadOptions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ReadOptions")
            .field("filters", &self.filters)
            .field("forced_filters", &self.forced_filters)
            .field("formats", &self.formats)
            .field("options", &self.options)
            .field("passphrases", &self.passphrases.len())
            .field("has_provider", &self.provider.is_some())
            .finish()
    }
}

impl ReadOptions {
    /// Creates options that auto-detect every compiled-in filter and the
    /// default formats (spool, tar, cpio, empty).
    pub fn new() -> Self {
        Self::default()
    }

    /// Restricts filter auto-detection to `codes`.
    ///
    /// An empty set disables detection: the stream is handed to the format
    /// as-is.
    pub fn filters(mut self, codes: impl IntoIterator<Item = FilterCode>) -> Self {
        self.filters = Some(codes.into_iter().collect());
        self
    }

    /// Installs a decompression stage without probing.
    ///
    /// Forced stages are applied in call order, outermost first, and replace
    /// auto-detection entirely.
    pub fn append_filter(mut self, code: FilterCode) -> Self {
        self.forced_filters.push(code);
        self
    }

    /// Reads only `format`. Enabling [`FormatCode::Raw`] this way is the only
    /// way to read a stream as a single raw entry.
    pub fn format(self, format: FormatCode) -> Self {
        self.formats([format])
    }

    /// Restricts format detection to `formats`, probed in the built-in
    /// priority order.
    pub fn formats(mut self, formats: impl IntoIterator<Item = FormatCode>) -> Self {
        self.formats = Some(formats.into_iter().collect());
        self
    }

    /// Adds `module:key=value` options, parsed when the session opens.
    pub fn options(mut self, text: impl Into<String>) -> Self {
        self.options.push(text.into());
        self
    }

    /// Adds a passphrase to try on encrypted entries.
    pub fn passphrase(mut self, password: impl Into<Password>) -> Self {
        self.passphrases.push(password.into());
        self
    }

    /// Sets the provider asked when no known passphrase unlocks an entry.
    pub fn passphrase_provider(mut self, provider: impl PassphraseProvider + 'static) -> Self {
        self.provider = Some(Box::new(provider));
        self
    }
}
