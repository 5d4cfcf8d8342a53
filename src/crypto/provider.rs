//! Passphrase providers and the per-session passphrase cache.

use std::collections::HashSet;
use std::fmt;

use super::Password;
use crate::{Error, ProviderError, Result, Severity};

/// Error type returned by a failing [`PassphraseProvider`].
pub type ProviderFailure = Box<dyn std::error::Error + Send + Sync>;

/// Why a passphrase is being requested.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[non_exhaustive]
pub enum PassphrasePurpose {
    /// Decrypting an entry while reading.
    Decrypt,
    /// Encrypting entries while writing.
    Encrypt,
}

/// Context handed to a [`PassphraseProvider`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PassphraseRequest {
    /// Index of the entry that needs the passphrase, `None` for archive-wide requests.
    pub entry_index: Option<usize>,
    /// Path of that entry, if known.
    pub entry_name: Option<String>,
    /// Decrypt or encrypt.
    pub purpose: PassphrasePurpose,
}

/// Supplies passphrases on demand.
///
/// The session asks at most once per protected entry while reading and at
/// most once per archive while writing. Returning `Ok(None)` means "no
/// passphrase": the affected entry fails, the session continues. Returning
/// `Err` is treated as a provider failure and is fatal to the session, unless
/// the error is a [`ProviderError`] asking for a lower severity. A warning
/// leaves the entry readable and the provider is asked again on the next
/// attempt.
///
/// Any `FnMut(&PassphraseRequest) -> Result<Option<Password>, _>` closure is
/// a provider:
///
/// ```rust
/// use arcstream::crypto::{PassphraseRequest, ProviderFailure};
/// use arcstream::{Password, ReadOptions};
///
/// let options = ReadOptions::new().passphrase_provider(
///     |request: &PassphraseRequest| -> Result<Option<Password>, ProviderFailure> {
///         println!("passphrase needed for {:?}", request.entry_name);
///         Ok(Some(Password::new("hunter2")))
///     },
/// );
/// # let _ = options;
/// ```
pub trait PassphraseProvider: Send {
    /// Returns the passphrase for `request`.
    fn provide_passphrase(
        &mut self,
        request: &PassphraseRequest,
    ) -> std::result::Result<Option<Password>, ProviderFailure>;
}

impl<F> PassphraseProvider for F
where
    F: FnMut(&PassphraseRequest) -> std::result::Result<Option<Password>, ProviderFailure> + Send,
{
    fn provide_passphrase(
        &mut self,
        request: &PassphraseRequest,
    ) -> std::result::Result<Option<Password>, ProviderFailure> {
        self(request)
    }
}

/// Keeps the code and severity of a [`ProviderError`]; anything else is fatal.
fn provider_failure(failure: ProviderFailure) -> Error {
    match failure.downcast::<ProviderError>() {
        Ok(p) => Error::Provider {
            code: p.code,
            message: p.message,
            severity: p.severity.unwrap_or(Severity::Fatal),
        },
        Err(other) => Error::PassphraseProvider(other),
    }
}

/// Passphrases known to a session plus the provider to ask for more.
#[derive(Default)]
pub(crate) struct Passphrases {
    candidates: Vec<Password>,
    provider: Option<Box<dyn PassphraseProvider>>,
    asked: HashSet<usize>,
    asked_for_archive: bool,
}

impl fmt::Debug for Passphrases {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Passphrases")
            .field("candidates", &self.candidates.len())
            .field("has_provider", &self.provider.is_some())
            .finish_non_exhaustive()
    }
}

impl Passphrases {
    pub(crate) fn new(
        candidates: Vec<Password>,
        provider: Option<Box<dyn PassphraseProvider>>,
    ) -> Self {
        Self {
            candidates,
            provider,
            asked: HashSet::new(),
            asked_for_archive: false,
        }
    }

    /// Adds a candidate tried before any cached or provided passphrase.
    pub(crate) fn add(&mut self, password: Password) {
        if !self.candidates.contains(&password) {
            self.candidates.push(password);
        }
    }

    fn ask(&mut self, request: &PassphraseRequest) -> Result<Option<Password>> {
        let Some(provider) = self.provider.as_mut() else {
            return Ok(None);
        };
        log::debug!(
            "Asking passphrase provider ({:?}) for {:?}",
            request.purpose,
            request.entry_name
        );
        provider.provide_passphrase(request).map_err(provider_failure)
    }

    /// Finds a passphrase that `verify` accepts for one entry.
    ///
    /// Known candidates are tried first. Then the provider is asked, at most
    /// once per entry; an accepted answer is cached for later entries.
    pub(crate) fn resolve_for_entry<R>(
        &mut self,
        entry_index: usize,
        entry_name: Option<&str>,
        mut verify: impl FnMut(&Password) -> Result<Option<R>>,
    ) -> Result<R> {
        for candidate in &self.candidates {
            if let Some(found) = verify(candidate)? {
                return Ok(found);
            }
        }
        let had_candidates = !self.candidates.is_empty();
        let failure = |had_candidates: bool| {
            let entry_name = entry_name.map(str::to_string);
            if had_candidates {
                Error::WrongPassword {
                    entry_index,
                    entry_name,
                }
            } else {
                Error::PasswordRequired {
                    entry_index,
                    entry_name,
                }
            }
        };

        if !self.asked.insert(entry_index) {
            return Err(failure(had_candidates));
        }
        let request = PassphraseRequest {
            entry_index: Some(entry_index),
            entry_name: entry_name.map(str::to_string),
            purpose: PassphrasePurpose::Decrypt,
        };
        let answer = match self.ask(&request) {
            Ok(answer) => answer,
            Err(e) => {
                if e.severity() == Severity::Warn {
                    self.asked.remove(&entry_index);
                }
                return Err(e);
            }
        };
        match answer {
            None => Err(failure(had_candidates)),
            Some(password) => match verify(&password)? {
                Some(found) => {
                    self.candidates.push(password);
                    Ok(found)
                }
                None => Err(Error::WrongPassword {
                    entry_index,
                    entry_name: entry_name.map(str::to_string),
                }),
            },
        }
    }

    /// Returns the passphrase for encrypting a whole archive.
    pub(crate) fn resolve_for_archive(&mut self) -> Result<Password> {
        if let Some(first) = self.candidates.first() {
            return Ok(first.clone());
        }
        let failure = Error::PasswordRequired {
            entry_index: 0,
            entry_name: None,
        };
        if self.asked_for_archive {
            return Err(failure);
        }
        self.asked_for_archive = true;
        let request = PassphraseRequest {
            entry_index: None,
            entry_name: None,
            purpose: PassphrasePurpose::Encrypt,
        };
        match self.ask(&request)? {
            Some(password) => {
                self.candidates.push(password.clone());
                Ok(password)
            }
            None => Err(failure),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::{Arc, Mutex};

    fn counting_provider(
        answer: Option<&'static str>,
    ) -> (Box<dyn PassphraseProvider>, Arc<Mutex<Vec<PassphraseRequest>>>) {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let seen_inner = Arc::clone(&seen);
        let provider = move |request: &PassphraseRequest| -> std::result::Result<Option<Password>, ProviderFailure> {
            seen_inner.lock().unwrap().push(request.clone());
            Ok(answer.map(Password::new))
        };
        (Box::new(provider), seen)
    }

    fn accept(expected: &'static str) -> impl FnMut(&Password) -> Result<Option<()>> {
        move |p| Ok((p.as_str() == expected).then_some(()))
    }

    #[test]
    fn test_candidates_tried_first() {
        let (provider, seen) = counting_provider(Some("other"));
        let mut p = Passphrases::new(vec![Password::new("right")], Some(provider));
        p.resolve_for_entry(0, Some("a"), accept("right")).unwrap();
        assert!(seen.lock().unwrap().is_empty());
    }

    #[test]
    fn test_provider_asked_once_per_entry_and_cached() {
        let (provider, seen) = counting_provider(Some("right"));
        let mut p = Passphrases::new(Vec::new(), Some(provider));
        p.resolve_for_entry(0, Some("a"), accept("right")).unwrap();
        p.resolve_for_entry(1, Some("b"), accept("right")).unwrap();
        let seen = seen.lock().unwrap();
        assert_eq!(seen.len(), 1);
        assert_eq!(seen[0].entry_index, Some(0));
        assert_eq!(seen[0].entry_name.as_deref(), Some("a"));
    }

    #[test]
    fn test_provider_none_is_entry_scoped() {
        let (provider, seen) = counting_provider(None);
        let mut p = Passphrases::new(Vec::new(), Some(provider));
        let err = p.resolve_for_entry(2, Some("x"), accept("right")).unwrap_err();
        assert!(matches!(err, Error::PasswordRequired { entry_index: 2, .. }));
        assert!(err.is_entry_scoped());

        // A second attempt on the same entry does not ask again
        let err = p.resolve_for_entry(2, Some("x"), accept("right")).unwrap_err();
        assert!(matches!(err, Error::PasswordRequired { .. }));
        assert_eq!(seen.lock().unwrap().len(), 1);
    }

    #[test]
    fn test_wrong_answer() {
        let (provider, _) = counting_provider(Some("nope"));
        let mut p = Passphrases::new(Vec::new(), Some(provider));
        let err = p.resolve_for_entry(0, None, accept("right")).unwrap_err();
        assert!(matches!(err, Error::WrongPassword { .. }));

        let mut p = Passphrases::new(vec![Password::new("bad")], None);
        let err = p.resolve_for_entry(0, None, accept("right")).unwrap_err();
        assert!(matches!(err, Error::WrongPassword { .. }));
    }

    #[test]
    fn test_provider_failure_is_fatal() {
        let provider = |_: &PassphraseRequest| -> std::result::Result<Option<Password>, ProviderFailure> {
            Err("keyring locked".into())
        };
        let mut p = Passphrases::new(Vec::new(), Some(Box::new(provider)));
        let err = p.resolve_for_entry(0, None, accept("x")).unwrap_err();
        assert!(err.is_fatal());
        let mut p = Passphrases::new(Vec::new(), Some(Box::new(provider)));
        assert!(p.resolve_for_archive().unwrap_err().is_fatal());
    }

    #[test]
    fn test_archive_passphrase_asked_once() {
        let (provider, seen) = counting_provider(Some("w"));
        let mut p = Passphrases::new(Vec::new(), Some(provider));
        assert_eq!(p.resolve_for_archive().unwrap().as_str(), "w");
        assert_eq!(p.resolve_for_archive().unwrap().as_str(), "w");
        let seen = seen.lock().unwrap();
        assert_eq!(seen.len(), 1);
        assert_eq!(seen[0].purpose, PassphrasePurpose::Encrypt);
    }

    #[test]
    fn test_no_provider_no_candidates() {
        let mut p = Passphrases::default();
        assert!(matches!(
            p.resolve_for_archive(),
            Err(Error::PasswordRequired { .. })
        ));
    }

    #[test]
    fn test_provider_warning_allows_another_ask() {
        let calls = Arc::new(Mutex::new(0));
        let calls_inner = Arc::clone(&calls);
        let provider = move |_: &PassphraseRequest| -> std::result::Result<Option<Password>, ProviderFailure> {
            let mut calls = calls_inner.lock().unwrap();
            *calls += 1;
            if *calls == 1 {
                Err(ProviderError::new(11, "keyring busy")
                    .with_severity(Severity::Warn)
                    .into())
            } else {
                Ok(Some(Password::new("right")))
            }
        };
        let mut p = Passphrases::new(Vec::new(), Some(Box::new(provider)));
        let err = p.resolve_for_entry(0, None, accept("right")).unwrap_err();
        assert!(matches!(
            err,
            Error::Provider {
                code: 11,
                severity: Severity::Warn,
                ..
            }
        ));
        p.resolve_for_entry(0, None, accept("right")).unwrap();
        assert_eq!(*calls.lock().unwrap(), 2);
    }
}
