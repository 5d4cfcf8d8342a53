//! AES-256-CBC entry encryption.
//!
//! Keys are derived by iterated SHA-256: `2^power` rounds each hashing
//! `salt || passphrase || counter` (counter as u64 LE) into one running
//! digest. A 4-byte verifier (the first bytes of `SHA-256(key)`) is stored
//! with the entry so a wrong passphrase is detected before any data is
//! decrypted. Data is padded with PKCS#7.

use aes::Aes256;
use cbc::cipher::block_padding::NoPadding;
use cbc::cipher::{BlockDecryptMut, BlockEncryptMut, KeyIvInit};
use sha2::{Digest, Sha256};
use zeroize::Zeroizing;

use super::{MAX_KDF_POWER, Password};
use crate::{Error, Result};

type Aes256CbcDec = cbc::Decryptor<Aes256>;
type Aes256CbcEnc = cbc::Encryptor<Aes256>;

/// AES block size in bytes.
pub(crate) const BLOCK_SIZE: usize = 16;

/// Salt length stored per entry.
pub(crate) const SALT_SIZE: usize = 16;

/// A derived AES-256 key.
pub(crate) type Key = Zeroizing<[u8; 32]>;

/// Derives an AES-256 key from a passphrase.
///
/// # Errors
///
/// Returns [`Error::ResourceLimitExceeded`] if `power` exceeds [`MAX_KDF_POWER`].
pub(crate) fn derive_key(password: &Password, salt: &[u8], power: u8) -> Result<Key> {
    if power > MAX_KDF_POWER {
        log::warn!(
            "Key derivation power {} exceeds maximum {}, rejecting",
            power,
            MAX_KDF_POWER
        );
        return Err(Error::ResourceLimitExceeded(format!(
            "key derivation power {} exceeds maximum {}",
            power, MAX_KDF_POWER
        )));
    }

    let rounds = 1u64 << power;
    let password = password.as_bytes();
    let mut input = Zeroizing::new(Vec::with_capacity(salt.len() + password.len() + 8));
    let mut sha = Sha256::new();
    for i in 0..rounds {
        input.clear();
        input.extend_from_slice(salt);
        input.extend_from_slice(password);
        input.extend_from_slice(&i.to_le_bytes());
        sha.update(input.as_slice());
    }
    Ok(Zeroizing::new(sha.finalize().into()))
}

/// Returns the 4-byte key verifier.
pub(crate) fn key_verifier(key: &Key) -> [u8; 4] {
    let digest = Sha256::digest(key.as_slice());
    [digest[0], digest[1], digest[2], digest[3]]
}

/// Fills `buf` from the operating system's random source.
pub(crate) fn random_bytes(buf: &mut [u8]) -> Result<()> {
    getrandom::getrandom(buf).map_err(|e| Error::CryptoError(format!("random source: {}", e)))
}

/// Incremental CBC encryptor; the caller frames the output.
pub(crate) struct StreamEncryptor {
    key: Key,
    iv: [u8; BLOCK_SIZE],
    pending: Vec<u8>,
}

impl std::fmt::Debug for StreamEncryptor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StreamEncryptor")
            .field("pending", &self.pending.len())
            .finish_non_exhaustive()
    }
}

impl StreamEncryptor {
    pub(crate) fn new(key: Key, iv: [u8; BLOCK_SIZE]) -> Self {
        Self {
            key,
            iv,
            pending: Vec::new(),
        }
    }

    fn encrypt_blocks(&mut self, blocks: &mut [u8]) -> Result<()> {
        let len = blocks.len();
        if len == 0 {
            return Ok(());
        }
        let encryptor = Aes256CbcEnc::new(&(*self.key).into(), &self.iv.into());
        encryptor
            .encrypt_padded_mut::<NoPadding>(blocks, len)
            .map_err(|e| Error::CryptoError(e.to_string()))?;
        self.iv.copy_from_slice(&blocks[len - BLOCK_SIZE..]);
        Ok(())
    }

    /// Encrypts as many whole blocks as are available and returns them.
    pub(crate) fn update(&mut self, data: &[u8]) -> Result<Vec<u8>> {
        self.pending.extend_from_slice(data);
        let whole = self.pending.len() / BLOCK_SIZE * BLOCK_SIZE;
        let mut out: Vec<u8> = self.pending.drain(..whole).collect();
        self.encrypt_blocks(&mut out)?;
        Ok(out)
    }

    /// Pads and encrypts the remaining bytes.
    pub(crate) fn finish(mut self) -> Result<Vec<u8>> {
        let mut out = std::mem::take(&mut self.pending);
        let pad = BLOCK_SIZE - out.len() % BLOCK_SIZE;
        out.extend(std::iter::repeat_n(pad as u8, pad));
        self.encrypt_blocks(&mut out)?;
        Ok(out)
    }
}

/// Incremental CBC decryptor that holds back the final block until the
/// caller reports the end of the ciphertext.
pub(crate) struct StreamDecryptor {
    key: Key,
    iv: [u8; BLOCK_SIZE],
    pending: Vec<u8>,
}

impl std::fmt::Debug for StreamDecryptor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StreamDecryptor")
            .field("pending", &self.pending.len())
            .finish_non_exhaustive()
    }
}

impl StreamDecryptor {
    pub(crate) fn new(key: Key, iv: [u8; BLOCK_SIZE]) -> Self {
        Self {
            key,
            iv,
            pending: Vec::new(),
        }
    }

    fn decrypt_blocks(&mut self, blocks: &mut [u8]) -> Result<()> {
        let len = blocks.len();
        if len == 0 {
            return Ok(());
        }
        let mut next_iv = [0u8; BLOCK_SIZE];
        next_iv.copy_from_slice(&blocks[len - BLOCK_SIZE..]);
        let decryptor = Aes256CbcDec::new(&(*self.key).into(), &self.iv.into());
        decryptor
            .decrypt_padded_mut::<NoPadding>(blocks)
            .map_err(|e| Error::CryptoError(e.to_string()))?;
        self.iv = next_iv;
        Ok(())
    }

    /// Decrypts every whole block except the last one seen so far.
    pub(crate) fn update(&mut self, data: &[u8]) -> Result<Vec<u8>> {
        self.pending.extend_from_slice(data);
        let whole = self.pending.len() / BLOCK_SIZE * BLOCK_SIZE;
        if whole <= BLOCK_SIZE {
            return Ok(Vec::new());
        }
        let take = if whole == self.pending.len() {
            whole - BLOCK_SIZE
        } else {
            whole
        };
        let mut out: Vec<u8> = self.pending.drain(..take).collect();
        self.decrypt_blocks(&mut out)?;
        Ok(out)
    }

    /// Decrypts the held-back block and strips the padding.
    ///
    /// Fails if the ciphertext length is not a whole number of blocks or the
    /// padding is malformed.
    pub(crate) fn finish(mut self) -> Result<Vec<u8>> {
        let mut out = std::mem::take(&mut self.pending);
        if out.is_empty() || out.len() % BLOCK_SIZE != 0 {
            return Err(Error::CryptoError(format!(
                "ciphertext length leaves {} stray bytes",
                out.len() % BLOCK_SIZE
            )));
        }
        self.decrypt_blocks(&mut out)?;
        let pad = usize::from(out[out.len() - 1]);
        if pad == 0
            || pad > BLOCK_SIZE
            || !out[out.len() - pad..].iter().all(|&b| usize::from(b) == pad)
        {
            return Err(Error::CryptoError("invalid padding".into()));
        }
        out.truncate(out.len() - pad);
        Ok(out)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn key(password: &str) -> Key {
        derive_key(&Password::new(password), b"0123456789abcdef", 4).unwrap()
    }

    #[test]
    fn test_derive_key_is_deterministic() {
        assert_eq!(*key("test"), *key("test"));
        assert_ne!(*key("test"), *key("test2"));
        let other_salt = derive_key(&Password::new("test"), b"fedcba9876543210", 4).unwrap();
        assert_ne!(*key("test"), *other_salt);
    }

    #[test]
    fn test_derive_key_power_limit() {
        let err = derive_key(&Password::new("x"), &[0; SALT_SIZE], MAX_KDF_POWER + 1).unwrap_err();
        assert!(matches!(err, Error::ResourceLimitExceeded(_)));
    }

    #[test]
    fn test_verifier_distinguishes_keys() {
        assert_eq!(key_verifier(&key("a")), key_verifier(&key("a")));
        assert_ne!(key_verifier(&key("a")), key_verifier(&key("b")));
    }

    #[test]
    fn test_stream_roundtrip_in_odd_pieces() {
        let plain: Vec<u8> = (0..1000u32).map(|i| (i * 7) as u8).collect();
        let iv = [9u8; BLOCK_SIZE];

        let mut enc = StreamEncryptor::new(key("k"), iv);
        let mut cipher = Vec::new();
        for piece in plain.chunks(37) {
            cipher.extend(enc.update(piece).unwrap());
        }
        cipher.extend(enc.finish().unwrap());
        assert_eq!(cipher.len() % BLOCK_SIZE, 0);
        assert!(cipher.len() > plain.len());

        let mut dec = StreamDecryptor::new(key("k"), iv);
        let mut out = Vec::new();
        for piece in cipher.chunks(50) {
            out.extend(dec.update(piece).unwrap());
        }
        out.extend(dec.finish().unwrap());
        assert_eq!(out, plain);
    }

    #[test]
    fn test_empty_plaintext_is_one_block() {
        let iv = [0u8; BLOCK_SIZE];
        let enc = StreamEncryptor::new(key("k"), iv);
        let cipher = enc.finish().unwrap();
        assert_eq!(cipher.len(), BLOCK_SIZE);

        let mut dec = StreamDecryptor::new(key("k"), iv);
        assert!(dec.update(&cipher).unwrap().is_empty());
        assert!(dec.finish().unwrap().is_empty());
    }

    #[test]
    fn test_truncated_ciphertext_rejected() {
        let mut dec = StreamDecryptor::new(key("k"), [0u8; BLOCK_SIZE]);
        dec.update(&[1u8; 20]).unwrap();
        assert!(dec.finish().is_err());
    }
}
