//! Passphrase storage.

use zeroize::Zeroizing;

/// A passphrase for entry encryption and decryption.
///
/// The text is wiped from memory when the value is dropped. Key derivation
/// uses its UTF-8 bytes.
#[derive(Clone, PartialEq, Eq)]
pub struct Password {
    inner: Zeroizing<String>,
}

impl Password {
    /// Creates a new passphrase from a string.
    pub fn new<S: Into<String>>(password: S) -> Self {
        Self {
            inner: Zeroizing::new(password.into()),
        }
    }

    /// Returns the passphrase bytes used for key derivation.
    pub fn as_bytes(&self) -> &[u8] {
        self.inner.as_bytes()
    }

    /// Returns the passphrase as a string slice.
    pub fn as_str(&self) -> &str {
        &self.inner
    }

    /// Returns true if the passphrase is empty.
    pub fn is_empty(&self) -> bool {
        self.inner.is_empty()
    }

    /// Returns the length of the passphrase in characters.
    pub fn len(&self) -> usize {
        self.inner.chars().count()
    }
}

impl std::fmt::Debug for Password {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Password")
            .field("len", &self.inner.len())
            .finish()
    }
}

impl From<&str> for Password {
    fn from(s: &str) -> Self {
        Self::new(s)
    }
}

impl From<String> for Password {
    fn from(s: String) -> Self {
        Self::new(s)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_password_bytes_are_utf8() {
        let password = Password::new("пароль");
        assert_eq!(password.as_bytes().len(), 12);
        assert_eq!(password.len(), 6);
    }

    #[test]
    fn test_password_debug_hides_text() {
        let password = Password::new("secret");
        let debug = format!("{:?}", password);
        assert!(!debug.contains("secret"));
        assert!(debug.contains("len"));
    }

    #[test]
    fn test_password_conversions() {
        let a: Password = "test".into();
        let b: Password = String::from("test").into();
        assert_eq!(a, b);
        assert_eq!(a.as_str(), "test");
        assert!(Password::new("").is_empty());
    }
}
