//! Entry digest computation.
//!
//! Formats that store a per-entry content digest compute it while data flows
//! through the session and compare it with the stored value once the entry
//! has been fully consumed. The result is exposed as an [`EntryDigest`].
//!
//! Two algorithms are used by the built-in formats:
//!
//! - [`Crc32`]: CRC-32 (IEEE 802.3 polynomial), stored by the spool format
//! - [`ByteSum32`]: the 32-bit wrapping byte sum used by the cpio "crc" variant
//!
//! # Example
//!
//! ```rust
//! use arcstream::checksum::{ByteSum32, Checksum, Crc32};
//!
//! let mut crc = Crc32::new();
//! crc.update(b"Hello, ");
//! crc.update(b"World!");
//! assert_eq!(crc.finalize(), 0xEC4AC3D0);
//!
//! assert_eq!(ByteSum32::compute(&[1, 2, 250]), 253);
//! ```

use std::fmt;
use std::io::{self, Read};

use crate::READ_BUFFER_SIZE;

/// Common trait for checksum computation.
pub trait Checksum: Default + Clone {
    /// Creates a new checksum calculator.
    fn new() -> Self;

    /// Updates the checksum with additional data.
    fn update(&mut self, data: &[u8]);

    /// Returns the checksum of all data seen so far.
    fn finalize(&self) -> u32;

    /// Resets the checksum to its initial state.
    fn reset(&mut self);

    /// Computes the checksum of a single slice in one call.
    fn compute(data: &[u8]) -> u32 {
        let mut hasher = Self::new();
        hasher.update(data);
        hasher.finalize()
    }

    /// Computes the checksum by reading from a reader until EOF.
    fn compute_reader<R: Read>(reader: &mut R) -> io::Result<u32> {
        let mut hasher = Self::new();
        let mut buffer = [0u8; READ_BUFFER_SIZE];
        loop {
            let n = reader.read(&mut buffer)?;
            if n == 0 {
                break;
            }
            hasher.update(&buffer[..n]);
        }
        Ok(hasher.finalize())
    }
}

/// CRC-32 checksum calculator.
#[derive(Clone)]
pub struct Crc32 {
    hasher: crc32fast::Hasher,
}

impl Default for Crc32 {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for Crc32 {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Crc32")
            .field("current", &self.hasher.clone().finalize())
            .finish()
    }
}

impl Checksum for Crc32 {
    fn new() -> Self {
        Self {
            hasher: crc32fast::Hasher::new(),
        }
    }

    fn update(&mut self, data: &[u8]) {
        self.hasher.update(data);
    }

    fn finalize(&self) -> u32 {
        self.hasher.clone().finalize()
    }

    fn reset(&mut self) {
        self.hasher.reset();
    }
}

/// 32-bit wrapping sum of all bytes.
#[derive(Debug, Clone, Default)]
pub struct ByteSum32 {
    sum: u32,
}

impl Checksum for ByteSum32 {
    fn new() -> Self {
        Self { sum: 0 }
    }

    fn update(&mut self, data: &[u8]) {
        for &b in data {
            self.sum = self.sum.wrapping_add(u32::from(b));
        }
    }

    fn finalize(&self) -> u32 {
        self.sum
    }

    fn reset(&mut self) {
        self.sum = 0;
    }
}

/// Identifies a digest algorithm.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DigestAlgorithm {
    /// CRC-32 (IEEE).
    Crc32,
    /// 32-bit byte sum (cpio "crc" format).
    ByteSum32,
}

impl DigestAlgorithm {
    /// Returns the short identifier of the algorithm.
    pub fn name(&self) -> &'static str {
        match self {
            DigestAlgorithm::Crc32 => "CRC-32",
            DigestAlgorithm::ByteSum32 => "byte-sum",
        }
    }
}

impl fmt::Display for DigestAlgorithm {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// A content digest of one entry, tagged with its algorithm.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct EntryDigest {
    /// Algorithm that produced the value.
    pub algorithm: DigestAlgorithm,
    /// Digest value.
    pub value: u32,
}

impl EntryDigest {
    /// Returns the digest as big-endian bytes.
    pub fn to_bytes(&self) -> [u8; 4] {
        self.value.to_be_bytes()
    }
}

impl fmt::Display for EntryDigest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{:08x}", self.algorithm, self.value)
    }
}
