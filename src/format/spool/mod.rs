//! The native spool container.
//!
//! A spool archive is a 16-byte archive header followed by entry frames and
//! an end marker:
//!
//! ```text
//! archive  := "ARCSPOOL" version:u8 flags:u8 reserved:[u8; 6]
//! entry    := 0x01 header_len:u32 header_crc:u32 header chunk* 0:u32 trailer
//! chunk    := len:u32 bytes
//! trailer  := plaintext_size:u64 crc32:u32
//! end      := 0x00
//! ```
//!
//! The header is a list of tagged fields (see `fields`). Entry data is
//! chunked, so the writer does not need to know an entry's size up front.
//! With the `aes` feature, entry data can be encrypted with AES-256-CBC; the
//! chunks then carry ciphertext and the trailer describes the plaintext.
//!
//! All integers are little-endian.

mod fields;
#[cfg(feature = "aes")]
mod seal;

use std::io::SeekFrom;

use fields::{EncryptionParams, Framing};

use super::{
    EncryptionStatus, Format, FormatCapabilities, FormatCode, FormatReader, FormatWriter,
    ReadContext,
};
use crate::READ_BUFFER_SIZE;
use crate::checksum::{Checksum, Crc32, DigestAlgorithm, EntryDigest};
use crate::crypto::{DEFAULT_KDF_POWER, MAX_KDF_POWER, Passphrases};
use crate::entry::EntryMetadata;
use crate::filter::{ReadStream, WriteStream};
use crate::options::ModuleOptions;
use crate::{Error, Result};

const MAGIC: &[u8; 8] = b"ARCSPOOL";
const VERSION: u8 = 1;
const ARCHIVE_HEADER_SIZE: usize = 16;
const FLAG_ENCRYPTED: u8 = 0x01;

const KIND_END: u8 = 0x00;
const KIND_ENTRY: u8 = 0x01;

/// Largest entry header accepted while reading.
const MAX_HEADER_SIZE: u32 = 16 * 1024 * 1024;
/// Largest chunk the writer emits.
const CHUNK_SIZE: usize = 64 * 1024;
const TRAILER_SIZE: u64 = 12;

/// Stand-ins for builds without a cipher: no entry can be sealed or unlocked.
#[cfg(not(feature = "aes"))]
mod seal {
    use super::fields::EncryptionParams;
    use crate::crypto::Passphrases;
    use crate::{Error, Result};

    const UNAVAILABLE: Error = Error::UnsupportedFeature {
        feature: "AES-256 entry encryption (built without the `aes` feature)",
    };

    pub(super) enum Encryptor {}

    impl Encryptor {
        pub(super) fn update(&mut self, _data: &[u8]) -> Result<Vec<u8>> {
            match *self {}
        }

        pub(super) fn finish(self) -> Result<Vec<u8>> {
            match self {}
        }
    }

    pub(super) enum Decryptor {}

    impl Decryptor {
        pub(super) fn update(&mut self, _data: &[u8]) -> Result<Vec<u8>> {
            match *self {}
        }

        pub(super) fn finish(self) -> Result<Vec<u8>> {
            match self {}
        }
    }

    #[derive(Default)]
    pub(super) struct KeyCache;

    impl KeyCache {
        pub(super) fn unlock(
            &mut self,
            _params: &EncryptionParams,
            _entry_index: usize,
            _entry_name: Option<&str>,
            _passphrases: &mut Passphrases,
        ) -> Result<Decryptor> {
            Err(UNAVAILABLE)
        }
    }

    pub(super) struct Sealer;

    impl Sealer {
        pub(super) fn new(_power: u8) -> Self {
            Sealer
        }

        pub(super) fn seal_entry(
            &mut self,
            _passphrases: &mut Passphrases,
        ) -> Result<(EncryptionParams, Encryptor)> {
            Err(UNAVAILABLE)
        }
    }
}

use seal::{Decryptor, Encryptor, KeyCache, Sealer};

fn read_u8(stream: &mut ReadStream) -> Result<u8> {
    let mut b = [0u8; 1];
    stream.read_exact(&mut b)?;
    Ok(b[0])
}

fn read_u32(stream: &mut ReadStream) -> Result<u32> {
    let mut b = [0u8; 4];
    stream.read_exact(&mut b)?;
    Ok(u32::from_le_bytes(b))
}

fn read_u64(stream: &mut ReadStream) -> Result<u64> {
    let mut b = [0u8; 8];
    stream.read_exact(&mut b)?;
    Ok(u64::from_le_bytes(b))
}

#[derive(Debug, Clone, Copy)]
pub(crate) struct SpoolFormat;

impl Format for SpoolFormat {
    fn family(&self) -> FormatCode {
        FormatCode::Spool
    }

    fn bid(&self, prefix: &[u8]) -> bool {
        prefix.starts_with(MAGIC)
    }

    fn reader(&self, options: &ModuleOptions<'_>) -> Result<Box<dyn FormatReader>> {
        options.reject_unknown(&["encryption", "checksum", "kdf-rounds"])?;
        Ok(Box::new(SpoolReader {
            started: false,
            done: false,
            seen_encrypted: false,
            current: None,
            keys: KeyCache::default(),
        }))
    }

    fn writer(
        &self,
        _code: FormatCode,
        options: &ModuleOptions<'_>,
    ) -> Result<Box<dyn FormatWriter>> {
        options.reject_unknown(&["encryption", "checksum", "kdf-rounds"])?;
        let invalid = |key: &str, reason: String| Error::InvalidOption {
            module: "spool".into(),
            key: key.into(),
            reason,
        };
        let checksum = match options.text("checksum")? {
            None | Some("crc32") => true,
            Some("none") => false,
            Some(other) => return Err(invalid("checksum", format!("unknown checksum '{}'", other))),
        };
        let encrypt = match options.text("encryption")? {
            None => false,
            Some("aes256") => true,
            Some(other) => {
                return Err(invalid("encryption", format!("unknown cipher '{}'", other)));
            }
        };
        if encrypt && !cfg!(feature = "aes") {
            return Err(Error::UnsupportedFeature {
                feature: "AES-256 entry encryption (built without the `aes` feature)",
            });
        }
        let power = options
            .uint("kdf-rounds", 0, u32::from(MAX_KDF_POWER))?
            .map_or(DEFAULT_KDF_POWER, |p| p as u8);
        log::debug!(
            "spool writer: checksum={} encryption={} kdf-power={}",
            checksum,
            encrypt,
            power
        );
        Ok(Box::new(SpoolWriter {
            encrypt_all: encrypt,
            checksum,
            sealer: Sealer::new(power),
            current: None,
        }))
    }
}

/// Read-side state of the current entry.
struct ReadEntry {
    offset: u64,
    index: usize,
    name: Option<String>,
    declared_size: Option<u64>,
    framing: Framing,
    /// Raw bytes left in the current chunk.
    chunk_remaining: u64,
    /// The end-of-data marker and trailer have been consumed.
    finished: bool,
    crc: Crc32,
    plain_size: u64,
    /// Decrypted bytes not yet handed out.
    out: Vec<u8>,
    out_pos: usize,
    decryptor: Option<Decryptor>,
    verified: Option<EntryDigest>,
}

impl ReadEntry {
    fn new(offset: u64, index: usize) -> Self {
        Self {
            offset,
            index,
            name: None,
            declared_size: None,
            framing: Framing::default(),
            chunk_remaining: 0,
            finished: false,
            crc: Crc32::new(),
            plain_size: 0,
            out: Vec::new(),
            out_pos: 0,
            decryptor: None,
            verified: None,
        }
    }

    /// Consumes the trailer and checks it against what was read.
    fn finish_data(&mut self, stream: &mut ReadStream) -> Result<()> {
        if let Some(decryptor) = self.decryptor.take() {
            let tail = decryptor.finish()?;
            self.crc.update(&tail);
            self.plain_size += tail.len() as u64;
            self.out = tail;
            self.out_pos = 0;
        }
        let size = read_u64(stream)?;
        let stored_crc = read_u32(stream)?;
        self.finished = true;

        if size != self.plain_size || self.declared_size.is_some_and(|d| d != self.plain_size) {
            return Err(Error::invalid_entry(
                self.offset,
                format!(
                    "spool entry carries {} data bytes, header declares {:?}, trailer {}",
                    self.plain_size, self.declared_size, size
                ),
            ));
        }
        if self.framing.checksum {
            let actual = self.crc.finalize();
            if actual != stored_crc {
                return Err(Error::DigestMismatch {
                    entry_index: self.index,
                    entry_name: self.name.clone(),
                    algorithm: DigestAlgorithm::Crc32,
                    expected: stored_crc,
                    actual,
                });
            }
            self.verified = Some(EntryDigest {
                algorithm: DigestAlgorithm::Crc32,
                value: actual,
            });
        }
        Ok(())
    }
}

struct SpoolReader {
    started: bool,
    done: bool,
    seen_encrypted: bool,
    current: Option<ReadEntry>,
    keys: KeyCache,
}

impl SpoolReader {
    fn read_archive_header(&mut self, stream: &mut ReadStream) -> Result<()> {
        let mut header = [0u8; ARCHIVE_HEADER_SIZE];
        stream.read_exact(&mut header)?;
        if &header[..8] != MAGIC {
            return Err(Error::InvalidFormat("missing spool signature".into()));
        }
        if header[8] != VERSION {
            return Err(Error::InvalidFormat(format!(
                "unsupported spool version {}",
                header[8]
            )));
        }
        let flags = header[9];
        log::debug!(
            "spool archive v{} (encryption configured: {})",
            header[8],
            flags & FLAG_ENCRYPTED != 0
        );
        self.started = true;
        Ok(())
    }
}

impl FormatReader for SpoolReader {
    fn code(&self) -> FormatCode {
        FormatCode::Spool
    }

    fn read_header(
        &mut self,
        cx: &mut ReadContext<'_>,
        entry: &mut EntryMetadata,
    ) -> Result<Option<u64>> {
        if !self.started {
            self.read_archive_header(cx.stream)?;
        }
        if self.done {
            return Ok(None);
        }
        self.skip_data(cx)?;

        let stream = &mut *cx.stream;
        let offset = stream.position();
        match read_u8(stream)? {
            KIND_END => {
                self.done = true;
                self.current = None;
                return Ok(None);
            }
            KIND_ENTRY => {}
            other => {
                return Err(Error::corrupt_header(
                    offset,
                    format!("unknown spool frame kind {:#04x}", other),
                ));
            }
        }
        let len = read_u32(stream)?;
        if len > MAX_HEADER_SIZE {
            return Err(Error::corrupt_header(
                offset,
                format!("spool header of {} bytes exceeds the limit", len),
            ));
        }
        let stored_crc = read_u32(stream)?;
        let mut body = vec![0u8; len as usize];
        stream.read_exact(&mut body)?;

        // From here on the data can be skipped even if the header is rejected
        let current = self.current.insert(ReadEntry::new(offset, cx.entry_index));
        if Crc32::compute(&body) != stored_crc {
            return Err(Error::invalid_entry(offset, "spool header checksum mismatch"));
        }
        let framing = fields::decode(&body, offset, entry)?;
        if framing.encryption.is_some() {
            self.seen_encrypted = true;
        }
        current.framing = framing;
        current.declared_size = entry
            .size()
            .filter(|_| entry.entry_type().is_none_or(|t| t.has_data()));
        current.name = entry.name_string();
        Ok(Some(offset))
    }

    fn read_data(&mut self, cx: &mut ReadContext<'_>, buf: &mut [u8]) -> Result<usize> {
        let Some(current) = self.current.as_mut() else {
            return Ok(0);
        };
        if buf.is_empty() {
            return Ok(0);
        }
        if let Some(params) = current.framing.encryption {
            if current.decryptor.is_none() && !current.finished {
                current.decryptor = Some(self.keys.unlock(
                    &params,
                    current.index,
                    current.name.as_deref(),
                    cx.passphrases,
                )?);
            }
        }
        let stream = &mut *cx.stream;
        loop {
            if current.out_pos < current.out.len() {
                let n = buf.len().min(current.out.len() - current.out_pos);
                buf[..n].copy_from_slice(&current.out[current.out_pos..current.out_pos + n]);
                current.out_pos += n;
                return Ok(n);
            }
            if current.finished {
                return Ok(0);
            }
            if current.chunk_remaining == 0 {
                let len = read_u32(stream)?;
                if len == 0 {
                    current.finish_data(stream)?;
                    continue;
                }
                current.chunk_remaining = u64::from(len);
            }
            let want = current.chunk_remaining.min(READ_BUFFER_SIZE as u64) as usize;
            match current.decryptor.as_mut() {
                None => {
                    let want = want.min(buf.len());
                    let n = stream.read(&mut buf[..want])?;
                    if n == 0 {
                        return Err(Error::Truncated {
                            offset: stream.position(),
                        });
                    }
                    current.chunk_remaining -= n as u64;
                    current.crc.update(&buf[..n]);
                    current.plain_size += n as u64;
                    return Ok(n);
                }
                Some(decryptor) => {
                    let mut raw = vec![0u8; want];
                    stream.read_exact(&mut raw)?;
                    current.chunk_remaining -= want as u64;
                    let plain = decryptor.update(&raw)?;
                    current.crc.update(&plain);
                    current.plain_size += plain.len() as u64;
                    current.out = plain;
                    current.out_pos = 0;
                }
            }
        }
    }

    fn skip_data(&mut self, cx: &mut ReadContext<'_>) -> Result<()> {
        let Some(current) = self.current.as_mut() else {
            return Ok(());
        };
        if current.finished {
            return Ok(());
        }
        let stream = &mut *cx.stream;
        stream.skip_exact(current.chunk_remaining)?;
        current.chunk_remaining = 0;
        loop {
            let len = read_u32(stream)?;
            if len == 0 {
                break;
            }
            stream.skip_exact(u64::from(len))?;
        }
        stream.skip_exact(TRAILER_SIZE)?;
        current.finished = true;
        current.decryptor = None;
        current.out.clear();
        current.out_pos = 0;
        Ok(())
    }

    fn seek_data(&mut self, _cx: &mut ReadContext<'_>, _pos: SeekFrom) -> Result<u64> {
        Err(Error::NotSupported {
            operation: "seek within chunked spool entry data",
        })
    }

    fn digest(&self) -> Option<EntryDigest> {
        self.current.as_ref().and_then(|c| c.verified)
    }

    fn capabilities(&self) -> FormatCapabilities {
        FormatCapabilities {
            encrypt_data: cfg!(feature = "aes"),
            encrypt_metadata: false,
        }
    }

    fn encryption_status(&self) -> EncryptionStatus {
        if self.seen_encrypted {
            EncryptionStatus::Yes
        } else if self.done {
            EncryptionStatus::No
        } else {
            EncryptionStatus::DontKnow
        }
    }
}

/// Write-side state of the current entry.
struct WriteEntry {
    encryptor: Option<Encryptor>,
    crc: Crc32,
    size: u64,
    pending: Vec<u8>,
}

struct SpoolWriter {
    encrypt_all: bool,
    checksum: bool,
    sealer: Sealer,
    current: Option<WriteEntry>,
}

impl SpoolWriter {
    fn flush_chunks(pending: &mut Vec<u8>, out: &mut WriteStream, all: bool) -> Result<()> {
        let mut start = 0;
        while pending.len() - start >= CHUNK_SIZE || (all && start < pending.len()) {
            let len = (pending.len() - start).min(CHUNK_SIZE);
            out.put(&(len as u32).to_le_bytes())?;
            out.put(&pending[start..start + len])?;
            start += len;
        }
        pending.drain(..start);
        Ok(())
    }
}

impl FormatWriter for SpoolWriter {
    fn code(&self) -> FormatCode {
        FormatCode::Spool
    }

    fn start(&mut self, out: &mut WriteStream) -> Result<()> {
        let mut header = [0u8; ARCHIVE_HEADER_SIZE];
        header[..8].copy_from_slice(MAGIC);
        header[8] = VERSION;
        if self.encrypt_all {
            header[9] |= FLAG_ENCRYPTED;
        }
        out.put(&header)
    }

    fn write_header(
        &mut self,
        out: &mut WriteStream,
        entry: &EntryMetadata,
        passphrases: &mut Passphrases,
        _entry_index: usize,
    ) -> Result<Option<u64>> {
        if entry.pathname().is_none() {
            return Err(Error::protocol("entry has no pathname"));
        }
        let has_data = entry.entry_type().is_none_or(|t| t.has_data());
        let (encryption, encryptor) = if has_data && (self.encrypt_all || entry.is_data_encrypted())
        {
            let (params, encryptor): (EncryptionParams, Encryptor) =
                self.sealer.seal_entry(passphrases)?;
            (Some(params), Some(encryptor))
        } else {
            (None, None)
        };
        let framing = Framing {
            encryption,
            checksum: self.checksum,
        };
        let body = fields::encode(entry, &framing);
        if body.len() as u64 > u64::from(MAX_HEADER_SIZE) {
            return Err(Error::EntryTooLarge {
                format: "spool",
                field: "header",
                value: body.len() as u64,
            });
        }

        let mut frame = Vec::with_capacity(9 + body.len());
        frame.push(KIND_ENTRY);
        frame.extend_from_slice(&(body.len() as u32).to_le_bytes());
        frame.extend_from_slice(&Crc32::compute(&body).to_le_bytes());
        frame.extend_from_slice(&body);
        out.put(&frame)?;

        self.current = Some(WriteEntry {
            encryptor,
            crc: Crc32::new(),
            size: 0,
            pending: Vec::new(),
        });
        Ok(if has_data { entry.size() } else { Some(0) })
    }

    fn write_data(&mut self, out: &mut WriteStream, data: &[u8]) -> Result<()> {
        let Some(current) = self.current.as_mut() else {
            return Err(Error::protocol("no spool entry is open"));
        };
        current.crc.update(data);
        current.size += data.len() as u64;
        match current.encryptor.as_mut() {
            Some(encryptor) => {
                let sealed = encryptor.update(data)?;
                current.pending.extend_from_slice(&sealed);
            }
            None => current.pending.extend_from_slice(data),
        }
        Self::flush_chunks(&mut current.pending, out, false)
    }

    fn finish_entry(&mut self, out: &mut WriteStream) -> Result<()> {
        let Some(mut current) = self.current.take() else {
            return Ok(());
        };
        if let Some(encryptor) = current.encryptor.take() {
            let tail = encryptor.finish()?;
            current.pending.extend_from_slice(&tail);
        }
        Self::flush_chunks(&mut current.pending, out, true)?;
        let crc = if self.checksum {
            current.crc.finalize()
        } else {
            0
        };
        let mut trailer = [0u8; 4 + TRAILER_SIZE as usize];
        trailer[4..12].copy_from_slice(&current.size.to_le_bytes());
        trailer[12..].copy_from_slice(&crc.to_le_bytes());
        out.put(&trailer)
    }

    fn close(&mut self, out: &mut WriteStream) -> Result<()> {
        out.put(&[KIND_END])
    }

    fn capabilities(&self) -> FormatCapabilities {
        FormatCapabilities {
            encrypt_data: cfg!(feature = "aes"),
            encrypt_metadata: false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::options::OptionSet;

    #[test]
    fn test_strict_options() {
        let opts = OptionSet::parse("spool:compression=9").unwrap();
        let err = SpoolFormat
            .writer(FormatCode::Spool, &opts.for_module("spool"))
            .err()
            .unwrap();
        assert!(matches!(err, Error::InvalidOption { .. }));

        let opts = OptionSet::parse("spool:checksum=md5").unwrap();
        assert!(SpoolFormat
            .writer(FormatCode::Spool, &opts.for_module("spool"))
            .is_err());

        let opts = OptionSet::parse("spool:checksum=none,spool:kdf-rounds=10").unwrap();
        assert!(SpoolFormat
            .writer(FormatCode::Spool, &opts.for_module("spool"))
            .is_ok());
    }

    #[cfg(not(feature = "aes"))]
    #[test]
    fn test_encryption_requires_cipher() {
        let opts = OptionSet::parse("spool:encryption=aes256").unwrap();
        let err = SpoolFormat
            .writer(FormatCode::Spool, &opts.for_module("spool"))
            .err()
            .unwrap();
        assert!(matches!(err, Error::UnsupportedFeature { .. }));
    }

    #[test]
    fn test_chunking() {
        let mut pending = vec![7u8; CHUNK_SIZE + 10];
        let sink = crate::io::MemorySink::new();
        let mut chain = crate::filter::WriteChain::open(
            Box::new(sink.clone()),
            &[],
            &OptionSet::new(),
            crate::filter::Blocking::UNBLOCKED,
        )
        .unwrap();
        SpoolWriter::flush_chunks(&mut pending, chain.stream(), false).unwrap();
        assert_eq!(pending.len(), 10);
        SpoolWriter::flush_chunks(&mut pending, chain.stream(), true).unwrap();
        assert!(pending.is_empty());
        chain.finish().unwrap();
        // Two length prefixes plus the data
        assert_eq!(sink.len(), 8 + CHUNK_SIZE + 10);
    }

    #[test]
    fn test_bid() {
        assert!(SpoolFormat.bid(b"ARCSPOOL\x01\x00\x00\x00\x00\x00\x00\x00"));
        assert!(!SpoolFormat.bid(b"ARCSPO"));
    }
}
