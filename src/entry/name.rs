//! Raw entry path names.

use std::borrow::Cow;
use std::fmt;

/// A path name as stored in an archive.
///
/// Archives carry names as byte strings in whatever encoding the creating
/// system used. `EntryName` keeps those bytes untouched and offers a UTF-8
/// projection on top; writing an entry read from another archive therefore
/// reproduces the original bytes even when they are not valid UTF-8.
///
/// # Example
///
/// ```rust
/// use arcstream::EntryName;
///
/// let name = EntryName::from("docs/readme.md");
/// assert_eq!(name.as_str(), Some("docs/readme.md"));
///
/// let latin1 = EntryName::from(&b"caf\xe9.txt"[..]);
/// assert_eq!(latin1.as_str(), None);
/// assert_eq!(latin1.to_string_lossy(), "caf\u{fffd}.txt");
/// ```
#[derive(Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Default)]
pub struct EntryName {
    bytes: Vec<u8>,
}

impl EntryName {
    /// Creates a name from raw bytes.
    pub fn from_bytes(bytes: impl Into<Vec<u8>>) -> Self {
        Self {
            bytes: bytes.into(),
        }
    }

    /// Returns the raw bytes.
    pub fn as_bytes(&self) -> &[u8] {
        &self.bytes
    }

    /// Consumes the name and returns the raw bytes.
    pub fn into_bytes(self) -> Vec<u8> {
        self.bytes
    }

    /// Returns the name as UTF-8, or `None` if the bytes are not valid UTF-8.
    pub fn as_str(&self) -> Option<&str> {
        std::str::from_utf8(&self.bytes).ok()
    }

    /// Returns a UTF-8 rendering, replacing invalid sequences with U+FFFD.
    pub fn to_string_lossy(&self) -> Cow<'_, str> {
        String::from_utf8_lossy(&self.bytes)
    }

    /// Returns the length in bytes.
    pub fn len(&self) -> usize {
        self.bytes.len()
    }

    /// Returns true if the name is empty.
    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }

    /// Returns true if the name ends with `/`.
    pub fn has_trailing_slash(&self) -> bool {
        self.bytes.last() == Some(&b'/')
    }
}

impl fmt::Debug for EntryName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?}", self.to_string_lossy())
    }
}

impl fmt::Display for EntryName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_string_lossy())
    }
}

impl From<&str> for EntryName {
    fn from(s: &str) -> Self {
        Self::from_bytes(s.as_bytes())
    }
}

impl From<String> for EntryName {
    fn from(s: String) -> Self {
        Self::from_bytes(s.into_bytes())
    }
}

impl From<&[u8]> for EntryName {
    fn from(b: &[u8]) -> Self {
        Self::from_bytes(b)
    }
}

impl From<Vec<u8>> for EntryName {
    fn from(b: Vec<u8>) -> Self {
        Self::from_bytes(b)
    }
}

impl PartialEq<str> for EntryName {
    fn eq(&self, other: &str) -> bool {
        self.bytes == other.as_bytes()
    }
}

impl PartialEq<&str> for EntryName {
    fn eq(&self, other: &&str) -> bool {
        self.bytes == other.as_bytes()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_utf8_projection() {
        let name = EntryName::from("a/b.txt");
        assert_eq!(name.as_str(), Some("a/b.txt"));
        assert_eq!(name, "a/b.txt");
        assert!(!name.has_trailing_slash());
    }

    #[test]
    fn test_non_utf8_bytes_preserved() {
        let raw = vec![b'x', 0xFF, b'y'];
        let name = EntryName::from(raw.clone());
        assert!(name.as_str().is_none());
        assert_eq!(name.as_bytes(), &raw[..]);
        assert_eq!(name.into_bytes(), raw);
    }

    #[test]
    fn test_trailing_slash() {
        assert!(EntryName::from("dir/").has_trailing_slash());
        assert!(!EntryName::default().has_trailing_slash());
    }
}
