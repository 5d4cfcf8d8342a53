//! Error types for archive sessions.
//!
//! This module provides the [`Error`] enum which represents all failure modes
//! of the read and write pipelines, the [`Severity`] taxonomy that tells a
//! caller how far a failure reaches, and [`ErrorInfo`], the snapshot a session
//! keeps as its "last error".
//!
//! # Severity
//!
//! Every error has a severity:
//!
//! | Severity | Meaning | Typical cause |
//! |----------|---------|---------------|
//! | [`Warn`](Severity::Warn) | operation succeeded with a caveat | unknown extended attribute |
//! | [`Failed`](Severity::Failed) | the current entry is unusable, the session continues | wrong passphrase, digest mismatch |
//! | [`Fatal`](Severity::Fatal) | the session is unusable and must be closed | I/O failure, filter desynchronization |
//!
//! ```rust
//! use arcstream::{Error, Severity};
//!
//! fn keep_going(error: &Error) -> bool {
//!     error.severity() != Severity::Fatal
//! }
//!
//! assert!(keep_going(&Error::PasswordRequired { entry_index: 0, entry_name: None }));
//! assert!(!keep_going(&Error::Truncated { offset: 512 }));
//! ```
//!
//! # Provider errors
//!
//! Custom [`ByteSource`](crate::io::ByteSource) and [`ByteSink`](crate::io::ByteSink)
//! implementations report failures through `std::io::Error`. To carry their
//! own code and message across the boundary, wrap a [`ProviderError`]:
//!
//! ```rust
//! use arcstream::{Error, ProviderError, Severity};
//!
//! let io_err = ProviderError::new(42, "remote volume went away").into_io();
//! let err = Error::from(io_err);
//! assert_eq!(err.code(), 42);
//! assert_eq!(err.severity(), Severity::Fatal);
//! ```

use std::fmt;
use std::io;

use crate::checksum::DigestAlgorithm;

/// Errno-style numeric codes attached to errors.
///
/// File-format problems use `EILSEQ`, caller mistakes use `EINVAL` and
/// everything without a better match uses [`MISC`](code::MISC).
pub mod code {
    /// Input/output error.
    pub const EIO: i32 = 5;
    /// Out of memory or a resource limit was hit.
    pub const ENOMEM: i32 = 12;
    /// Invalid argument or API misuse.
    pub const EINVAL: i32 = 22;
    /// Illegal byte sequence: the data is not a valid archive.
    pub const EILSEQ: i32 = 84;
    /// Operation cancelled.
    pub const ECANCELED: i32 = 125;
    /// Miscellaneous failure.
    pub const MISC: i32 = -1;
}

/// How far an error reaches.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Severity {
    /// The operation succeeded with a caveat.
    Warn,
    /// The current entry is unusable; iteration may continue.
    Failed,
    /// The session is unusable and must be closed.
    Fatal,
}

impl Severity {
    /// Status code of a successful operation.
    pub const OK_STATUS: i32 = 0;

    /// Returns the integer status code for this severity.
    ///
    /// These are the values returned by the classic C interface:
    /// `-20` (warn), `-25` (failed) and `-30` (fatal).
    pub const fn status_code(self) -> i32 {
        match self {
            Severity::Warn => -20,
            Severity::Failed => -25,
            Severity::Fatal => -30,
        }
    }

    /// Maps a classic integer status back to a severity.
    ///
    /// Returns `None` for `0` and for unknown values.
    pub fn from_status_code(status: i32) -> Option<Self> {
        match status {
            -20 => Some(Severity::Warn),
            -25 => Some(Severity::Failed),
            -30 => Some(Severity::Fatal),
            _ => None,
        }
    }
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Severity::Warn => write!(f, "warning"),
            Severity::Failed => write!(f, "failed"),
            Severity::Fatal => write!(f, "fatal"),
        }
    }
}

/// An error reported by a custom I/O provider.
///
/// Providers return this inside an [`io::Error`] (see [`into_io`](Self::into_io));
/// the session converts it into [`Error::Provider`] and keeps the code and
/// message intact.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProviderError {
    /// Provider-defined numeric code.
    pub code: i32,
    /// Human-readable message.
    pub message: String,
    /// Severity requested by the provider. `None` means fatal.
    pub severity: Option<Severity>,
}

impl ProviderError {
    /// Creates a provider error with the default (fatal) severity.
    pub fn new(code: i32, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
            severity: None,
        }
    }

    /// Sets the severity the session should apply.
    pub fn with_severity(mut self, severity: Severity) -> Self {
        self.severity = Some(severity);
        self
    }

    /// Wraps this error in an [`io::Error`] so it can travel through `Read`/`Write`.
    pub fn into_io(self) -> io::Error {
        io::Error::other(self)
    }
}

impl fmt::Display for ProviderError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} (code {})", self.message, self.code)
    }
}

impl std::error::Error for ProviderError {}

/// Helper struct for formatting entry context in messages.
struct EntryDisplay<'a> {
    index: usize,
    name: Option<&'a str>,
}

impl fmt::Display for EntryDisplay<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "entry {}", self.index)?;
        if let Some(name) = self.name {
            write!(f, " ({})", name)?;
        }
        Ok(())
    }
}

/// The main error type for archive sessions.
///
/// # Error Categories
///
/// | Category | Variants | Severity |
/// |----------|----------|----------|
/// | I/O | [`Io`][Self::Io], [`Provider`][Self::Provider], [`Filter`][Self::Filter] | fatal (providers may choose) |
/// | Format | [`UnrecognizedFormat`][Self::UnrecognizedFormat], [`CorruptHeader`][Self::CorruptHeader], [`Truncated`][Self::Truncated] | fatal |
/// | Entry | [`InvalidEntry`][Self::InvalidEntry], [`DigestMismatch`][Self::DigestMismatch], [`EntryTooLarge`][Self::EntryTooLarge] | failed |
/// | Encryption | [`WrongPassword`][Self::WrongPassword], [`PasswordRequired`][Self::PasswordRequired] | failed |
/// | Usage | [`ProtocolViolation`][Self::ProtocolViolation], [`InvalidOption`][Self::InvalidOption] | failed |
/// | Session | [`OffsetRegression`][Self::OffsetRegression], [`SessionFailed`][Self::SessionFailed] | fatal |
#[derive(Debug, thiserror::Error)]
#[non_exhaustive]
pub enum Error {
    /// An I/O error occurred in a source, sink or filter stage.
    #[error("I/O error: {0}")]
    Io(io::Error),

    /// A custom I/O provider reported a failure.
    #[error("provider error {code}: {message}")]
    Provider {
        /// Provider-defined numeric code.
        code: i32,
        /// Provider message.
        message: String,
        /// Severity applied to the session.
        severity: Severity,
    },

    /// A filter stage could not decode or encode its stream.
    #[error("{filter} filter error: {source}")]
    Filter {
        /// Name of the failing filter.
        filter: &'static str,
        /// The underlying stream error.
        #[source]
        source: io::Error,
    },

    /// No enabled format codec recognized the stream.
    #[error("Unrecognized archive format")]
    UnrecognizedFormat,

    /// The stream is not a valid archive of the selected format.
    #[error("Invalid archive: {0}")]
    InvalidFormat(String),

    /// Entry framing is damaged; the next header cannot be located.
    #[error("Corrupt header at offset {offset:#x}: {reason}")]
    CorruptHeader {
        /// Absolute decoded offset of the damaged header.
        offset: u64,
        /// Description of the damage.
        reason: String,
    },

    /// An entry's header is framed correctly but its content is invalid.
    ///
    /// The entry is unusable, but the session can skip to the next header.
    #[error("Invalid entry at offset {offset:#x}: {reason}")]
    InvalidEntry {
        /// Absolute decoded offset of the entry header.
        offset: u64,
        /// Description of the problem.
        reason: String,
    },

    /// The stream ended in the middle of an entry or header.
    #[error("Truncated archive at offset {offset:#x}")]
    Truncated {
        /// Absolute decoded offset where data ran out.
        offset: u64,
    },

    /// The requested filter is not compiled in or unknown.
    #[error("Unsupported filter code {code}")]
    UnsupportedFilter {
        /// Numeric filter code.
        code: u32,
    },

    /// The requested format is not compiled in or unknown.
    #[error("Unsupported format code {code:#x}")]
    UnsupportedFormat {
        /// Numeric format code.
        code: u32,
    },

    /// A feature used by the archive or requested by the caller is not supported.
    #[error("Unsupported feature: {feature}")]
    UnsupportedFeature {
        /// The name of the unsupported feature.
        feature: &'static str,
    },

    /// The active filter chain or format codec cannot perform this operation.
    #[error("Operation not supported: {operation}")]
    NotSupported {
        /// The operation that was attempted.
        operation: &'static str,
    },

    /// An API call arrived in a state where it is not allowed.
    #[error("Protocol violation: {0}")]
    ProtocolViolation(String),

    /// A format codec reported entry offsets out of order.
    #[error("Entry offset went backwards: {current:#x} after {previous:#x}")]
    OffsetRegression {
        /// Offset of the previous header.
        previous: u64,
        /// Offset of the offending header.
        current: u64,
    },

    /// The session already failed fatally and must be closed.
    #[error("Session is in a failed state and must be closed")]
    SessionFailed,

    /// An option string was malformed or rejected by a strict module.
    #[error("Invalid option {module}:{key}: {reason}")]
    InvalidOption {
        /// Module the option was addressed to (`*` for every module).
        module: String,
        /// Option key.
        key: String,
        /// Why the option was rejected.
        reason: String,
    },

    /// The passphrase does not unlock this entry.
    #[error("Wrong passphrase for {}", EntryDisplay { index: *entry_index, name: entry_name.as_deref() })]
    WrongPassword {
        /// Index of the entry in archive order.
        entry_index: usize,
        /// Path of the entry, if known.
        entry_name: Option<String>,
    },

    /// The entry is encrypted and no passphrase was available.
    #[error("Passphrase required for {}", EntryDisplay { index: *entry_index, name: entry_name.as_deref() })]
    PasswordRequired {
        /// Index of the entry in archive order.
        entry_index: usize,
        /// Path of the entry, if known.
        entry_name: Option<String>,
    },

    /// The passphrase provider itself failed.
    ///
    /// This is a provider contract violation and is always fatal.
    #[error("Passphrase provider failed: {0}")]
    PassphraseProvider(#[source] Box<dyn std::error::Error + Send + Sync>),

    /// A cryptographic primitive failed.
    #[error("Cryptographic error: {0}")]
    CryptoError(String),

    /// The entry digest computed while reading does not match the stored one.
    #[error("{algorithm} mismatch for {}: expected {expected:#010x}, got {actual:#010x}", EntryDisplay { index: *entry_index, name: entry_name.as_deref() })]
    DigestMismatch {
        /// Index of the entry in archive order.
        entry_index: usize,
        /// Path of the entry, if known.
        entry_name: Option<String>,
        /// Digest algorithm.
        algorithm: DigestAlgorithm,
        /// Stored value.
        expected: u32,
        /// Computed value.
        actual: u32,
    },

    /// An entry attribute cannot be represented by the target format.
    #[error("{format} cannot represent {field} = {value}")]
    EntryTooLarge {
        /// Name of the target format.
        format: &'static str,
        /// The field that overflowed.
        field: &'static str,
        /// The value that did not fit.
        value: u64,
    },

    /// A resource limit was exceeded.
    #[error("Resource limit exceeded: {0}")]
    ResourceLimitExceeded(String),

    /// A volume of a multi-volume archive is missing.
    #[error("Volume {volume} missing: expected at '{path}'")]
    VolumeMissing {
        /// The volume number (1-indexed).
        volume: u32,
        /// The expected path of the missing volume.
        path: String,
        /// The underlying I/O error.
        #[source]
        source: io::Error,
    },

    /// The session was cancelled between chunk operations.
    #[error("Operation cancelled")]
    Cancelled,
}

impl From<io::Error> for Error {
    fn from(err: io::Error) -> Self {
        let provider = err
            .get_ref()
            .and_then(|inner| inner.downcast_ref::<ProviderError>())
            .cloned();
        match provider {
            Some(p) => Error::Provider {
                code: p.code,
                message: p.message,
                severity: p.severity.unwrap_or(Severity::Fatal),
            },
            None => Error::Io(err),
        }
    }
}

impl Error {
    /// Returns the severity of this error.
    pub fn severity(&self) -> Severity {
        match self {
            Error::Provider { severity, .. } => *severity,
            Error::InvalidEntry { .. }
            | Error::UnsupportedFeature { .. }
            | Error::NotSupported { .. }
            | Error::ProtocolViolation(_)
            | Error::InvalidOption { .. }
            | Error::WrongPassword { .. }
            | Error::PasswordRequired { .. }
            | Error::CryptoError(_)
            | Error::DigestMismatch { .. }
            | Error::EntryTooLarge { .. } => Severity::Failed,
            _ => Severity::Fatal,
        }
    }

    /// Returns the errno-style numeric code for this error.
    pub fn code(&self) -> i32 {
        match self {
            Error::Io(e) => e.raw_os_error().unwrap_or(code::EIO),
            Error::Provider { code, .. } => *code,
            Error::Filter { .. } => code::EILSEQ,
            Error::UnrecognizedFormat
            | Error::InvalidFormat(_)
            | Error::CorruptHeader { .. }
            | Error::InvalidEntry { .. }
            | Error::Truncated { .. }
            | Error::DigestMismatch { .. } => code::EILSEQ,
            Error::ProtocolViolation(_) | Error::InvalidOption { .. } => code::EINVAL,
            Error::ResourceLimitExceeded(_) => code::ENOMEM,
            Error::VolumeMissing { source, .. } => source.raw_os_error().unwrap_or(code::EIO),
            Error::Cancelled => code::ECANCELED,
            _ => code::MISC,
        }
    }

    /// Returns `true` if the session must be closed after this error.
    pub fn is_fatal(&self) -> bool {
        self.severity() == Severity::Fatal
    }

    /// Returns `true` if only the current entry is affected.
    pub fn is_entry_scoped(&self) -> bool {
        self.severity() == Severity::Failed
    }

    /// Returns `true` if this is an encryption-related error.
    pub fn is_encryption_error(&self) -> bool {
        matches!(
            self,
            Error::WrongPassword { .. }
                | Error::PasswordRequired { .. }
                | Error::PassphraseProvider(_)
                | Error::CryptoError(_)
        )
    }

    /// Returns `true` if the error is about something this build cannot do.
    pub fn is_unsupported(&self) -> bool {
        matches!(
            self,
            Error::UnsupportedFilter { .. }
                | Error::UnsupportedFormat { .. }
                | Error::UnsupportedFeature { .. }
                | Error::NotSupported { .. }
        )
    }

    /// Returns `true` if the archive data is damaged.
    pub fn is_corruption(&self) -> bool {
        matches!(
            self,
            Error::CorruptHeader { .. }
                | Error::InvalidEntry { .. }
                | Error::Truncated { .. }
                | Error::DigestMismatch { .. }
                | Error::Filter { .. }
        )
    }

    /// Returns the entry index associated with this error, if any.
    pub fn entry_index(&self) -> Option<usize> {
        match self {
            Error::WrongPassword { entry_index, .. }
            | Error::PasswordRequired { entry_index, .. }
            | Error::DigestMismatch { entry_index, .. } => Some(*entry_index),
            _ => None,
        }
    }

    pub(crate) fn corrupt_header(offset: u64, reason: impl Into<String>) -> Self {
        Error::CorruptHeader {
            offset,
            reason: reason.into(),
        }
    }

    pub(crate) fn invalid_entry(offset: u64, reason: impl Into<String>) -> Self {
        Error::InvalidEntry {
            offset,
            reason: reason.into(),
        }
    }

    pub(crate) fn protocol(reason: impl Into<String>) -> Self {
        Error::ProtocolViolation(reason.into())
    }

    pub(crate) fn filter(filter: &'static str, source: io::Error) -> Self {
        // Provider failures surfacing through a decoder keep their identity
        match Error::from(source) {
            Error::Io(source) => Error::Filter { filter, source },
            other => other,
        }
    }
}

/// A snapshot of the last error a session observed.
///
/// Sessions overwrite it on every failing operation and keep it readable
/// until the next failure or an explicit `clear_error()`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ErrorInfo {
    /// Errno-style numeric code.
    pub code: i32,
    /// Human-readable message.
    pub message: String,
    /// Severity of the failure.
    pub severity: Severity,
    /// Messages of the causal chain, outermost first, excluding `message`.
    pub causes: Vec<String>,
}

impl ErrorInfo {
    /// Builds a warning record that has no underlying [`Error`].
    pub fn warning(message: impl Into<String>) -> Self {
        Self {
            code: code::MISC,
            message: message.into(),
            severity: Severity::Warn,
            causes: Vec::new(),
        }
    }
}

impl From<&Error> for ErrorInfo {
    fn from(err: &Error) -> Self {
        let mut causes = Vec::new();
        let mut source = std::error::Error::source(err);
        while let Some(cause) = source {
            causes.push(cause.to_string());
            source = cause.source();
        }
        Self {
            code: err.code(),
            message: err.to_string(),
            severity: err.severity(),
            causes,
        }
    }
}

impl fmt::Display for ErrorInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}] {}", self.severity, self.message)?;
        for cause in &self.causes {
            write!(f, ": {}", cause)?;
        }
        Ok(())
    }
}

/// Result type alias for archive operations.
pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_io_error_is_fatal() {
        let err: Error = io::Error::new(io::ErrorKind::NotFound, "gone").into();
        assert!(matches!(err, Error::Io(_)));
        assert_eq!(err.severity(), Severity::Fatal);
        assert_eq!(err.code(), code::EIO);
    }

    #[test]
    fn test_provider_error_survives_io_roundtrip() {
        let io_err = ProviderError::new(7, "tape jammed")
            .with_severity(Severity::Failed)
            .into_io();
        let err = Error::from(io_err);
        match &err {
            Error::Provider {
                code,
                message,
                severity,
            } => {
                assert_eq!(*code, 7);
                assert_eq!(message, "tape jammed");
                assert_eq!(*severity, Severity::Failed);
            }
            other => panic!("unexpected error: {other:?}"),
        }
        assert_eq!(err.code(), 7);
        assert!(err.is_entry_scoped());
    }

    #[test]
    fn test_provider_default_severity_is_fatal() {
        let err = Error::from(ProviderError::new(1, "boom").into_io());
        assert!(err.is_fatal());
    }

    #[test]
    fn test_filter_error_keeps_provider_identity() {
        let err = Error::filter("gzip", ProviderError::new(3, "read failed").into_io());
        assert!(matches!(err, Error::Provider { code: 3, .. }));

        let err = Error::filter("gzip", io::Error::new(io::ErrorKind::InvalidData, "bad crc"));
        assert!(matches!(err, Error::Filter { filter: "gzip", .. }));
        assert!(err.is_corruption());
    }

    #[test]
    fn test_severity_status_codes() {
        assert_eq!(Severity::Warn.status_code(), -20);
        assert_eq!(Severity::Failed.status_code(), -25);
        assert_eq!(Severity::Fatal.status_code(), -30);
        assert_eq!(Severity::from_status_code(-25), Some(Severity::Failed));
        assert_eq!(Severity::from_status_code(Severity::OK_STATUS), None);
        assert!(Severity::Warn < Severity::Fatal);
    }

    #[test]
    fn test_entry_scoped_errors() {
        let err = Error::WrongPassword {
            entry_index: 3,
            entry_name: Some("secret.txt".into()),
        };
        assert!(err.is_entry_scoped());
        assert!(err.is_encryption_error());
        assert_eq!(err.entry_index(), Some(3));
        let msg = err.to_string();
        assert!(msg.contains("entry 3"));
        assert!(msg.contains("secret.txt"));
    }

    #[test]
    fn test_digest_mismatch_message() {
        let err = Error::DigestMismatch {
            entry_index: 1,
            entry_name: None,
            algorithm: DigestAlgorithm::Crc32,
            expected: 0xDEADBEEF,
            actual: 0xCAFEBABE,
        };
        let msg = err.to_string();
        assert!(msg.contains("0xdeadbeef"));
        assert!(msg.contains("0xcafebabe"));
        assert!(err.is_corruption());
    }

    #[test]
    fn test_error_info_collects_causes() {
        let err = Error::Filter {
            filter: "bzip2",
            source: io::Error::new(io::ErrorKind::InvalidData, "block crc"),
        };
        let info = ErrorInfo::from(&err);
        assert_eq!(info.severity, Severity::Fatal);
        assert_eq!(info.code, code::EILSEQ);
        assert_eq!(info.causes, vec!["block crc".to_string()]);
        assert!(info.to_string().starts_with("[fatal]"));
    }

    #[test]
    fn test_passphrase_provider_error_is_fatal() {
        let err = Error::PassphraseProvider("keyring locked".into());
        assert!(err.is_fatal());
        assert!(err.is_encryption_error());
    }

    #[test]
    fn test_error_is_send_sync() {
        fn assert_send_sync<T: Send + Sync>() {}
        assert_send_sync::<Error>();
    }
}
