//! AES-256 entry sealing for the spool format.

use super::fields::{CIPHER_AES256_CBC, EncryptionParams};
use crate::crypto::Passphrases;
use crate::crypto::cipher::{self, Key, SALT_SIZE};
use crate::{Error, Result};

pub(super) use crate::crypto::cipher::{StreamDecryptor as Decryptor, StreamEncryptor as Encryptor};

struct CachedKey {
    salt: [u8; SALT_SIZE],
    power: u8,
    verifier: [u8; 4],
    key: Key,
}

/// Keys already derived in this session, by salt and work factor.
#[derive(Default)]
pub(super) struct KeyCache {
    keys: Vec<CachedKey>,
}

impl KeyCache {
    /// Returns a decryptor for one entry, asking for a passphrase if no cached key fits.
    pub(super) fn unlock(
        &mut self,
        params: &EncryptionParams,
        entry_index: usize,
        entry_name: Option<&str>,
        passphrases: &mut Passphrases,
    ) -> Result<Decryptor> {
        if params.cipher != CIPHER_AES256_CBC {
            return Err(Error::UnsupportedFeature {
                feature: "spool cipher other than AES-256-CBC",
            });
        }
        let cached = self.keys.iter().find(|k| {
            k.salt == params.salt && k.power == params.power && k.verifier == params.verifier
        });
        let key = match cached {
            Some(cached) => cached.key.clone(),
            None => {
                let key = passphrases.resolve_for_entry(entry_index, entry_name, |password| {
                    let key = cipher::derive_key(password, &params.salt, params.power)?;
                    Ok((cipher::key_verifier(&key) == params.verifier).then_some(key))
                })?;
                self.keys.push(CachedKey {
                    salt: params.salt,
                    power: params.power,
                    verifier: params.verifier,
                    key: key.clone(),
                });
                key
            }
        };
        Ok(Decryptor::new(key, params.iv))
    }
}

/// The archive key of a writer, derived on first use.
pub(super) struct Sealer {
    power: u8,
    archive: Option<(Key, [u8; SALT_SIZE], [u8; 4])>,
}

impl Sealer {
    pub(super) fn new(power: u8) -> Self {
        Self {
            power,
            archive: None,
        }
    }

    /// Returns the parameters and encryptor for a new entry.
    ///
    /// Every entry shares the archive salt and key but gets a fresh IV.
    pub(super) fn seal_entry(
        &mut self,
        passphrases: &mut Passphrases,
    ) -> Result<(EncryptionParams, Encryptor)> {
        if self.archive.is_none() {
            let password = passphrases.resolve_for_archive()?;
            let mut salt = [0u8; SALT_SIZE];
            cipher::random_bytes(&mut salt)?;
            let key = cipher::derive_key(&password, &salt, self.power)?;
            let verifier = cipher::key_verifier(&key);
            log::debug!("Derived spool archive key (2^{} rounds)", self.power);
            self.archive = Some((key, salt, verifier));
        }
        let Some((key, salt, verifier)) = self.archive.as_ref() else {
            return Err(Error::CryptoError("archive key unavailable".into()));
        };
        let mut iv = [0u8; 16];
        cipher::random_bytes(&mut iv)?;
        let params = EncryptionParams {
            cipher: CIPHER_AES256_CBC,
            power: self.power,
            salt: *salt,
            iv,
            verifier: *verifier,
        };
        Ok((params, Encryptor::new(key.clone(), iv)))
    }
}
