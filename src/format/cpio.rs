//! SVR4 cpio: "newc" (`070701`) and "crc" (`070702`).
//!
//! Every header is 110 bytes of ASCII hex followed by the NUL-terminated
//! name; name and data are each padded to 4 bytes. The archive ends with an
//! entry named `TRAILER!!!`.
//!
//! Hard links are expressed by sharing an inode number: a later regular
//! entry without data that reuses the `(dev, ino)` of an earlier entry is
//! reported as a [`EntryType::Hardlink`] to it.
//!
//! The "crc" variant carries the data checksum in the header, so the writer
//! holds each regular file's data until the entry is finished. Entries larger
//! than 64 MiB are refused with [`Error::EntryTooLarge`].

use std::collections::HashMap;
use std::io::SeekFrom;

use super::{
    DataWindow, EncryptionStatus, Format, FormatCode, FormatReader, FormatWriter, ReadContext,
    padding,
};
use crate::checksum::{ByteSum32, Checksum, DigestAlgorithm, EntryDigest};
use crate::crypto::Passphrases;
use crate::entry::{DeviceNumber, EntryMetadata, EntryName, EntryType};
use crate::filter::WriteStream;
use crate::options::ModuleOptions;
use crate::timestamp::Timestamp;
use crate::{Error, Result};

const HEADER_SIZE: usize = 110;
const MAGIC_NEWC: &[u8; 6] = b"070701";
const MAGIC_CRC: &[u8; 6] = b"070702";
const TRAILER: &[u8] = b"TRAILER!!!";
const ALIGN: u64 = 4;

/// Longest name (including the NUL) accepted while reading.
const MAX_NAME_SIZE: u64 = 64 * 1024;
/// Longest symlink target accepted while reading.
const MAX_LINK_SIZE: u64 = 64 * 1024;
/// Largest regular file the "crc" writer will hold in memory.
pub(crate) const MAX_CRC_ENTRY_SIZE: u64 = 64 * 1024 * 1024;

/// Numeric header fields in on-disk order.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
struct Header {
    ino: u32,
    mode: u32,
    uid: u32,
    gid: u32,
    nlink: u32,
    mtime: u32,
    filesize: u32,
    dev_major: u32,
    dev_minor: u32,
    rdev_major: u32,
    rdev_minor: u32,
    namesize: u32,
    check: u32,
}

impl Header {
    fn parse(raw: &[u8; HEADER_SIZE], offset: u64) -> Result<Self> {
        let mut fields = [0u32; 13];
        for (i, slot) in fields.iter_mut().enumerate() {
            let start = 6 + i * 8;
            let digits = std::str::from_utf8(&raw[start..start + 8])
                .ok()
                .and_then(|s| u32::from_str_radix(s, 16).ok())
                .ok_or_else(|| Error::corrupt_header(offset, "malformed cpio header field"))?;
            *slot = digits;
        }
        let [
            ino,
            mode,
            uid,
            gid,
            nlink,
            mtime,
            filesize,
            dev_major,
            dev_minor,
            rdev_major,
            rdev_minor,
            namesize,
            check,
        ] = fields;
        Ok(Self {
            ino,
            mode,
            uid,
            gid,
            nlink,
            mtime,
            filesize,
            dev_major,
            dev_minor,
            rdev_major,
            rdev_minor,
            namesize,
            check,
        })
    }

    fn encode(&self, magic: &[u8; 6], name: &[u8], out: &mut Vec<u8>) {
        out.extend_from_slice(magic);
        for value in [
            self.ino,
            self.mode,
            self.uid,
            self.gid,
            self.nlink,
            self.mtime,
            self.filesize,
            self.dev_major,
            self.dev_minor,
            self.rdev_major,
            self.rdev_minor,
            self.namesize,
            self.check,
        ] {
            out.extend_from_slice(format!("{:08x}", value).as_bytes());
        }
        out.extend_from_slice(name);
        out.push(0);
        let pad = padding(HEADER_SIZE as u64 + u64::from(self.namesize), ALIGN);
        out.resize(out.len() + pad as usize, 0);
    }
}

#[derive(Debug, Clone, Copy)]
pub(crate) struct CpioFormat;

impl Format for CpioFormat {
    fn family(&self) -> FormatCode {
        FormatCode::Cpio
    }

    fn bid(&self, prefix: &[u8]) -> bool {
        prefix.len() >= HEADER_SIZE && (prefix.starts_with(MAGIC_NEWC) || prefix.starts_with(MAGIC_CRC))
    }

    fn reader(&self, _options: &ModuleOptions<'_>) -> Result<Box<dyn FormatReader>> {
        Ok(Box::new(CpioReader {
            code: FormatCode::Cpio,
            window: DataWindow::default(),
            done: false,
            inodes: HashMap::new(),
            pending: None,
            verified: None,
            entry_index: 0,
            entry_name: None,
        }))
    }

    fn writer(
        &self,
        code: FormatCode,
        options: &ModuleOptions<'_>,
    ) -> Result<Box<dyn FormatWriter>> {
        let code = match options.text("format")? {
            Some("newc") => FormatCode::CpioNewc,
            Some("crc") => FormatCode::CpioCrc,
            Some(other) => {
                return Err(Error::InvalidOption {
                    module: "cpio".into(),
                    key: "format".into(),
                    reason: format!("unknown cpio variant '{}'", other),
                });
            }
            None if code == FormatCode::CpioCrc => FormatCode::CpioCrc,
            None => FormatCode::CpioNewc,
        };
        log::debug!("cpio writer: {}", code.name());
        Ok(Box::new(CpioWriter {
            code,
            next_ino: 1,
            inodes: HashMap::new(),
            current: None,
        }))
    }
}

struct CpioReader {
    code: FormatCode,
    window: DataWindow,
    done: bool,
    /// Name of the first entry seen for each `(dev, ino)`.
    inodes: HashMap<(u32, u32, u32), Vec<u8>>,
    /// Running byte sum and the stored value, for the crc variant.
    pending: Option<(ByteSum32, u32)>,
    verified: Option<EntryDigest>,
    entry_index: usize,
    entry_name: Option<String>,
}

impl CpioReader {
    fn check_digest(&mut self) -> Result<()> {
        let Some((sum, expected)) = self.pending.take() else {
            return Ok(());
        };
        let actual = sum.finalize();
        if actual != expected {
            return Err(Error::DigestMismatch {
                entry_index: self.entry_index,
                entry_name: self.entry_name.clone(),
                algorithm: DigestAlgorithm::ByteSum32,
                expected,
                actual,
            });
        }
        self.verified = Some(EntryDigest {
            algorithm: DigestAlgorithm::ByteSum32,
            value: actual,
        });
        Ok(())
    }
}

impl FormatReader for CpioReader {
    fn code(&self) -> FormatCode {
        self.code
    }

    fn read_header(
        &mut self,
        cx: &mut ReadContext<'_>,
        entry: &mut EntryMetadata,
    ) -> Result<Option<u64>> {
        if self.done {
            return Ok(None);
        }
        self.pending = None;
        self.verified = None;

        let stream = &mut *cx.stream;
        let offset = stream.position();
        let mut raw = [0u8; HEADER_SIZE];
        let n = stream.read_full(&mut raw)?;
        if n == 0 {
            log::warn!("cpio archive ends without a trailer at offset {:#x}", offset);
            self.done = true;
            return Ok(None);
        }
        if n < HEADER_SIZE {
            return Err(Error::Truncated {
                offset: stream.position(),
            });
        }
        let crc = match &raw[..6] {
            m if m == MAGIC_NEWC => false,
            m if m == MAGIC_CRC => true,
            _ => return Err(Error::corrupt_header(offset, "bad cpio magic")),
        };
        if self.code == FormatCode::Cpio {
            self.code = if crc {
                FormatCode::CpioCrc
            } else {
                FormatCode::CpioNewc
            };
        }
        let header = Header::parse(&raw, offset)?;

        let namesize = u64::from(header.namesize);
        if namesize == 0 || namesize > MAX_NAME_SIZE {
            return Err(Error::corrupt_header(offset, "cpio name size out of range"));
        }
        let mut name = vec![0u8; namesize as usize];
        stream.read_exact(&mut name)?;
        stream.skip_exact(padding(HEADER_SIZE as u64 + namesize, ALIGN))?;
        while name.last() == Some(&0) {
            name.pop();
        }
        if name == TRAILER {
            self.done = true;
            return Ok(None);
        }

        let filesize = u64::from(header.filesize);
        let mut entry_type = match EntryType::from_mode(header.mode) {
            Some(t) => t,
            None => {
                entry.push_warning(format!(
                    "unknown cpio file type {:#o} read as a regular file",
                    header.mode & crate::entry::AE_IFMT
                ));
                EntryType::File
            }
        };
        let key = (header.dev_major, header.dev_minor, header.ino);
        if entry_type == EntryType::File && header.ino != 0 {
            match self.inodes.get(&key) {
                Some(target) if filesize == 0 && header.nlink > 1 => {
                    entry_type = EntryType::Hardlink;
                    entry.set_hardlink(target.clone());
                }
                Some(_) => {}
                None => {
                    self.inodes.insert(key, name.clone());
                }
            }
        }

        entry.set_pathname(EntryName::from_bytes(name));
        entry.set_type(entry_type);
        entry.set_perm(header.mode & 0o7777);
        entry.set_uid(u64::from(header.uid));
        entry.set_gid(u64::from(header.gid));
        entry.set_mtime(Some(Timestamp::from_unix_secs(i64::from(header.mtime))));
        entry.set_nlink(header.nlink);
        entry.set_ino(u64::from(header.ino));
        entry.set_dev(DeviceNumber::new(header.dev_major, header.dev_minor));
        if matches!(entry_type, EntryType::CharDevice | EntryType::BlockDevice) {
            entry.set_rdev(DeviceNumber::new(header.rdev_major, header.rdev_minor));
        }

        let data_start = stream.position();
        if entry_type == EntryType::Symlink {
            if filesize > MAX_LINK_SIZE {
                return Err(Error::corrupt_header(offset, "cpio symlink target too long"));
            }
            let mut target = vec![0u8; filesize as usize];
            stream.read_exact(&mut target)?;
            stream.skip_exact(padding(filesize, ALIGN))?;
            entry.set_symlink(target);
            entry.set_size(0);
            self.window = DataWindow::new(stream.position(), 0, 0);
        } else {
            entry.set_size(filesize);
            self.window = DataWindow::new(data_start, filesize, padding(filesize, ALIGN));
            if crc {
                self.pending = Some((ByteSum32::new(), header.check));
            }
        }

        self.entry_index = cx.entry_index;
        self.entry_name = entry.name_string();
        Ok(Some(offset))
    }

    fn read_data(&mut self, cx: &mut ReadContext<'_>, buf: &mut [u8]) -> Result<usize> {
        let n = self.window.read(cx.stream, buf)?;
        if let Some((sum, _)) = self.pending.as_mut() {
            sum.update(&buf[..n]);
        }
        if self.window.remaining == 0 {
            self.check_digest()?;
        }
        Ok(n)
    }

    fn skip_data(&mut self, cx: &mut ReadContext<'_>) -> Result<()> {
        self.pending = None;
        self.window.skip(cx.stream)
    }

    fn seek_data(&mut self, cx: &mut ReadContext<'_>, pos: SeekFrom) -> Result<u64> {
        // The running sum no longer covers the data in order
        self.pending = None;
        self.window.seek(cx.stream, pos)
    }

    fn digest(&self) -> Option<EntryDigest> {
        self.verified
    }

    fn encryption_status(&self) -> EncryptionStatus {
        EncryptionStatus::Unsupported
    }
}

/// An entry whose header is held back until its data is complete.
struct Current {
    header: Header,
    name: Vec<u8>,
    /// Data of a crc entry, buffered to compute the checksum.
    data: Vec<u8>,
    written: u64,
}

struct CpioWriter {
    code: FormatCode,
    next_ino: u32,
    /// Inode assigned to each regular file, for hard links.
    inodes: HashMap<Vec<u8>, u32>,
    current: Option<Current>,
}

fn fit_u32(field: &'static str, value: u64) -> Result<u32> {
    u32::try_from(value).map_err(|_| Error::EntryTooLarge {
        format: "cpio",
        field,
        value,
    })
}

impl CpioWriter {
    fn magic(&self) -> &'static [u8; 6] {
        if self.code == FormatCode::CpioCrc {
            MAGIC_CRC
        } else {
            MAGIC_NEWC
        }
    }

    fn build(&mut self, entry: &EntryMetadata) -> Result<(Header, Vec<u8>, Option<Vec<u8>>)> {
        let name = entry
            .pathname()
            .ok_or_else(|| Error::protocol("entry has no pathname"))?
            .as_bytes()
            .to_vec();
        let entry_type = entry.entry_type().unwrap_or(EntryType::File);

        let mut header = Header {
            uid: fit_u32("uid", entry.uid().unwrap_or(0))?,
            gid: fit_u32("gid", entry.gid().unwrap_or(0))?,
            nlink: if entry_type == EntryType::Directory { 2 } else { 1 },
            namesize: fit_u32("pathname", name.len() as u64 + 1)?,
            ..Header::default()
        };
        let mtime = entry.mtime().map_or(0, |t| t.secs());
        header.mtime = u32::try_from(mtime).map_err(|_| Error::EntryTooLarge {
            format: "cpio",
            field: "mtime",
            value: mtime.unsigned_abs(),
        })?;

        let default_perm = if entry_type == EntryType::Directory {
            0o755
        } else {
            0o644
        };
        let perm = entry.perm().unwrap_or(default_perm) & 0o7777;

        let mut link_data = None;
        match entry_type {
            EntryType::File => {
                let size = entry.size().ok_or(Error::UnsupportedFeature {
                    feature: "cpio entries of unknown size",
                })?;
                if self.code == FormatCode::CpioCrc && size > MAX_CRC_ENTRY_SIZE {
                    return Err(Error::EntryTooLarge {
                        format: "cpio",
                        field: "size",
                        value: size,
                    });
                }
                header.filesize = fit_u32("size", size)?;
            }
            EntryType::Symlink => {
                let target = entry
                    .symlink()
                    .ok_or_else(|| Error::protocol("symlink entry without a target"))?
                    .as_bytes()
                    .to_vec();
                header.filesize = fit_u32("link target", target.len() as u64)?;
                link_data = Some(target);
            }
            EntryType::Hardlink => {
                let target = entry
                    .hardlink()
                    .ok_or_else(|| Error::protocol("hardlink entry without a target"))?;
                header.ino = *self.inodes.get(target.as_bytes()).ok_or(
                    Error::UnsupportedFeature {
                        feature: "cpio hard link to an entry not written in this archive",
                    },
                )?;
                header.nlink = 2;
            }
            EntryType::CharDevice | EntryType::BlockDevice => {
                let rdev = entry.rdev().unwrap_or(DeviceNumber::new(0, 0));
                header.rdev_major = rdev.major;
                header.rdev_minor = rdev.minor;
            }
            _ => {}
        }
        // Hard links are stored as regular files sharing an inode
        let mode_type = match entry_type {
            EntryType::Hardlink => EntryType::File,
            t => t,
        };
        header.mode = mode_type.mode_bits() | perm;
        if header.ino == 0 {
            header.ino = self.next_ino;
            self.next_ino = self.next_ino.wrapping_add(1).max(1);
            if entry_type == EntryType::File {
                self.inodes.insert(name.clone(), header.ino);
            }
        }
        Ok((header, name, link_data))
    }
}

impl FormatWriter for CpioWriter {
    fn code(&self) -> FormatCode {
        self.code
    }

    fn write_header(
        &mut self,
        out: &mut WriteStream,
        entry: &EntryMetadata,
        _passphrases: &mut Passphrases,
        _entry_index: usize,
    ) -> Result<Option<u64>> {
        if entry.is_data_encrypted() {
            return Err(Error::UnsupportedFeature {
                feature: "encryption in cpio archives",
            });
        }
        let (mut header, name, link_data) = self.build(entry)?;

        if let Some(target) = link_data {
            if self.code == FormatCode::CpioCrc {
                header.check = ByteSum32::compute(&target);
            }
            let mut bytes = Vec::with_capacity(HEADER_SIZE + name.len() + target.len() + 8);
            header.encode(self.magic(), &name, &mut bytes);
            bytes.extend_from_slice(&target);
            bytes.resize(bytes.len() + padding(target.len() as u64, ALIGN) as usize, 0);
            out.put(&bytes)?;
            self.current = None;
            return Ok(Some(0));
        }

        let size = u64::from(header.filesize);
        if self.code == FormatCode::CpioCrc {
            self.current = Some(Current {
                header,
                name,
                data: Vec::with_capacity(size.min(1 << 20) as usize),
                written: 0,
            });
        } else {
            let mut bytes = Vec::with_capacity(HEADER_SIZE + name.len() + 4);
            header.encode(self.magic(), &name, &mut bytes);
            out.put(&bytes)?;
            self.current = Some(Current {
                header,
                name: Vec::new(),
                data: Vec::new(),
                written: 0,
            });
        }
        Ok(Some(size))
    }

    fn write_data(&mut self, out: &mut WriteStream, data: &[u8]) -> Result<()> {
        let Some(current) = self.current.as_mut() else {
            return Err(Error::protocol("no cpio entry is open"));
        };
        current.written += data.len() as u64;
        if self.code == FormatCode::CpioCrc {
            current.data.extend_from_slice(data);
            Ok(())
        } else {
            out.put(data)
        }
    }

    fn finish_entry(&mut self, out: &mut WriteStream) -> Result<()> {
        let Some(mut current) = self.current.take() else {
            return Ok(());
        };
        if self.code == FormatCode::CpioCrc {
            current.header.check = ByteSum32::compute(&current.data);
            let mut bytes = Vec::with_capacity(HEADER_SIZE + current.name.len() + 4);
            current.header.encode(self.magic(), &current.name, &mut bytes);
            out.put(&bytes)?;
            out.put(&current.data)?;
        }
        out.put_zeros(padding(current.written, ALIGN))
    }

    fn close(&mut self, out: &mut WriteStream) -> Result<()> {
        let header = Header {
            nlink: 1,
            namesize: TRAILER.len() as u32 + 1,
            ..Header::default()
        };
        let mut bytes = Vec::with_capacity(HEADER_SIZE + 12);
        header.encode(self.magic(), TRAILER, &mut bytes);
        out.put(&bytes)
    }
}
