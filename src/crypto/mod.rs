//! Passphrases and entry encryption.
//!
//! Sessions keep every known passphrase in a per-session cache. Passphrases
//! come from [`ReadOptions::passphrase`](crate::ReadOptions::passphrase),
//! [`ArchiveReader::add_passphrase`](crate::ArchiveReader::add_passphrase),
//! or a [`PassphraseProvider`] that the session asks on demand:
//!
//! - while reading, at most once per protected entry
//! - while writing, at most once per archive
//!
//! A passphrase the provider supplies is cached for the rest of the session.
//!
//! The cipher itself (AES-256-CBC with an iterated SHA-256 key derivation)
//! requires the `aes` feature.

#[cfg(feature = "aes")]
pub(crate) mod cipher;
mod password;
mod provider;

pub use password::Password;
pub(crate) use provider::Passphrases;
pub use provider::{PassphraseProvider, PassphrasePurpose, PassphraseRequest, ProviderFailure};

/// Maximum accepted key derivation power (2^30 rounds).
pub const MAX_KDF_POWER: u8 = 30;

/// Default key derivation power for new archives.
pub const DEFAULT_KDF_POWER: u8 = 16;
