//! # arcstream
//!
//! A streaming archive codec core in pure Rust.
//!
//! A read session pulls bytes from a [`ByteSource`](io::ByteSource), peels
//! off compression layers through an auto-detected filter chain, detects the
//! container format and yields entries one at a time with their data as a
//! pull-based stream. A write session does the reverse: entries and data go
//! through a format serializer and an explicit chain of compression stages
//! into a [`ByteSink`](io::ByteSink).
//!
//! ## Quick Start
//!
//! ### Reading an Archive
//!
//! ```rust,no_run
//! use arcstream::{ArchiveReader, ReadOptions, Result};
//!
//! fn main() -> Result<()> {
//!     let mut reader = ArchiveReader::open_path("backup.tar.gz", ReadOptions::new())?;
//!     println!("{} via {:?}", reader.format_name(), reader.filters());
//!
//!     while let Some(entry) = reader.next_header()? {
//!         let mut data = Vec::new();
//!         let n = reader.read_data_into(&mut data)?;
//!         println!("{}: {} bytes", entry.pathname().map(|p| p.to_string()).unwrap_or_default(), n);
//!     }
//!     reader.close()
//! }
//! ```
//!
//! ### Writing an Archive
//!
//! ```rust
//! use arcstream::{ArchiveWriter, EntryMetadata, FilterCode, FormatCode, Result, WriteOptions};
//!
//! fn main() -> Result<()> {
//!     let options = WriteOptions::new()
//!         .format(FormatCode::TarPax)
//!         .add_filter(FilterCode::Gzip);
//!     let (mut writer, sink) = ArchiveWriter::create_memory(options)?;
//!
//!     writer.write_header(&EntryMetadata::file("hello.txt", 13))?;
//!     writer.write_data(b"Hello, World!")?;
//!     writer.finish_entry()?;
//!     writer.close()?;
//!
//!     println!("{} compressed bytes", sink.len());
//!     Ok(())
//! }
//! ```
//!
//! ### Encrypted Entries
//!
//! The native spool format can encrypt entry data with AES-256:
//!
//! ```rust
//! # #[cfg(feature = "aes")]
//! # fn main() -> arcstream::Result<()> {
//! use arcstream::{ArchiveReader, ArchiveWriter, EntryMetadata, ReadOptions, WriteOptions};
//!
//! let options = WriteOptions::new()
//!     .options("spool:encryption=aes256,spool:kdf-rounds=8")
//!     .passphrase("secret");
//! let (mut writer, sink) = ArchiveWriter::create_memory(options)?;
//! writer.write_header(&EntryMetadata::file("secret.txt", 4))?;
//! writer.write_data(b"data")?;
//! writer.close()?;
//!
//! let mut reader = ArchiveReader::open_memory(sink.take(), ReadOptions::new().passphrase("secret"))?;
//! let entry = reader.next_header()?.expect("one entry");
//! assert!(entry.is_data_encrypted());
//! let mut data = Vec::new();
//! reader.read_data_into(&mut data)?;
//! assert_eq!(data, b"data");
//! # Ok(())
//! # }
//! # #[cfg(not(feature = "aes"))]
//! # fn main() {}
//! ```
//!
//! ## Error Handling
//!
//! Every error has a [`Severity`]. `Failed` errors are scoped to one entry and
//! iteration can continue; `Fatal` errors end the session. The end of the
//! archive is `Ok(None)` from [`ArchiveReader::next_header`], never an error.
//!
//! ```rust,no_run
//! use arcstream::{ArchiveReader, Error, ReadOptions, Result};
//!
//! fn list(path: &str) -> Result<()> {
//!     let mut reader = ArchiveReader::open_path(path, ReadOptions::new())?;
//!     loop {
//!         match reader.next_header() {
//!             Ok(Some(entry)) => println!("{:?}", entry.pathname()),
//!             Ok(None) => break,
//!             Err(e) if e.is_entry_scoped() => eprintln!("skipping entry: {}", e),
//!             Err(e) => return Err(e),
//!         }
//!     }
//!     Ok(())
//! }
//! # fn main() {}
//! ```
//!
//! ## Feature Flags
//!
//! | Feature | Default | Description |
//! |---------|---------|-------------|
//! | `deflate` | Yes | gzip filter |
//! | `bzip2` | Yes | bzip2 filter |
//! | `lzma` | Yes | lzma (`.lzma` alone) filter |
//! | `aes` | Yes | AES-256 encryption in the spool format |
//! | `lz4` | No | lz4 frame filter |
//! | `zstd` | No | Zstandard filter |
//! | `async` | No | Tokio worker-task wrapper for read sessions |
//!
//! ## Minimum Supported Rust Version (MSRV)
//!
//! This crate requires **Rust 1.85** or later.

#![cfg_attr(docsrs, feature(doc_cfg))]
#![warn(missing_docs)]
#![warn(rust_2018_idioms)]
#![deny(unsafe_op_in_unsafe_fn)]

/// Default buffer size for read operations (8 KiB).
pub(crate) const READ_BUFFER_SIZE: usize = 8192;

/// Version of this crate.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Returns the crate version followed by the filters compiled into this build,
/// for example `arcstream 0.1.0 (gzip, bzip2, lzma)`.
pub fn version_details() -> String {
    let filters: Vec<&str> = filter::FilterCode::ALL
        .into_iter()
        .filter(|&code| code != filter::FilterCode::None && code.is_available())
        .map(filter::FilterCode::name)
        .collect();
    format!("arcstream {} ({})", VERSION, filters.join(", "))
}

pub mod checksum;
pub mod crypto;
pub mod entry;
pub mod error;
pub mod filter;
pub mod format;
pub mod io;
pub mod options;
pub mod read;
pub mod timestamp;
pub mod volume;
pub mod write;

// Async module (requires "async" feature)
#[cfg(feature = "async")]
#[cfg_attr(docsrs, doc(cfg(feature = "async")))]
pub mod async_read;

pub use checksum::{DigestAlgorithm, EntryDigest};
pub use crypto::{PassphraseProvider, PassphrasePurpose, PassphraseRequest, Password};
pub use entry::{DeviceNumber, EntryMetadata, EntryName, EntryType, FileFlags, SymlinkType};
pub use error::{Error, ErrorInfo, ProviderError, Result, Severity};
pub use filter::{FilterCode, FilterInfo};
pub use format::{EncryptionStatus, FormatCapabilities, FormatCode};
pub use timestamp::Timestamp;

// Re-export session API at crate root for convenience
pub use read::{ArchiveReader, EntryReader, ReadOptions};
pub use write::{ArchiveWriter, WriteOptions};

#[cfg(feature = "async")]
pub use async_read::{ReaderEvent, ReaderHandle, spawn_reader};

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_version_details_lists_builtin_filters() {
        let details = version_details();
        assert!(details.starts_with(&format!("arcstream {}", VERSION)));
        assert_eq!(details.contains("gzip"), FilterCode::Gzip.is_available());
        assert!(!details.contains("none"));
    }
}
