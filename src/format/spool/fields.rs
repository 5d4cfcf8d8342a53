//! Entry header fields: `tag: u8, len: u32 LE, value`.

use crate::entry::{DeviceNumber, EntryMetadata, EntryName, EntryType, SymlinkType};
use crate::timestamp::Timestamp;
use crate::{Error, Result};

pub(super) mod tag {
    pub(super) const PATHNAME: u8 = 1;
    pub(super) const FILETYPE: u8 = 2;
    pub(super) const PERM: u8 = 3;
    pub(super) const SIZE: u8 = 4;
    pub(super) const UID: u8 = 5;
    pub(super) const GID: u8 = 6;
    pub(super) const UNAME: u8 = 7;
    pub(super) const GNAME: u8 = 8;
    pub(super) const ATIME: u8 = 9;
    pub(super) const MTIME: u8 = 10;
    pub(super) const CTIME: u8 = 11;
    pub(super) const BIRTHTIME: u8 = 12;
    pub(super) const SYMLINK: u8 = 13;
    pub(super) const HARDLINK: u8 = 14;
    pub(super) const SYMLINK_TYPE: u8 = 15;
    pub(super) const DEV: u8 = 16;
    pub(super) const INO: u8 = 17;
    pub(super) const NLINK: u8 = 18;
    pub(super) const RDEV: u8 = 19;
    pub(super) const FFLAGS: u8 = 20;
    pub(super) const ENCRYPTION: u8 = 21;
    pub(super) const CHECKSUM: u8 = 22;
}

/// Cipher identifier for AES-256-CBC.
pub(super) const CIPHER_AES256_CBC: u8 = 1;

const CHECKSUM_NONE: u8 = 0;
const CHECKSUM_CRC32: u8 = 1;

/// Per-entry cipher parameters.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(super) struct EncryptionParams {
    pub(super) cipher: u8,
    pub(super) power: u8,
    pub(super) salt: [u8; 16],
    pub(super) iv: [u8; 16],
    pub(super) verifier: [u8; 4],
}

impl EncryptionParams {
    const SIZE: usize = 38;

    fn to_bytes(self) -> [u8; Self::SIZE] {
        let mut out = [0u8; Self::SIZE];
        out[0] = self.cipher;
        out[1] = self.power;
        out[2..18].copy_from_slice(&self.salt);
        out[18..34].copy_from_slice(&self.iv);
        out[34..38].copy_from_slice(&self.verifier);
        out
    }

    fn parse(value: &[u8]) -> Option<Self> {
        if value.len() != Self::SIZE {
            return None;
        }
        Some(Self {
            cipher: value[0],
            power: value[1],
            salt: value[2..18].try_into().ok()?,
            iv: value[18..34].try_into().ok()?,
            verifier: value[34..38].try_into().ok()?,
        })
    }
}

/// Framing properties carried by the header next to the metadata.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub(super) struct Framing {
    pub(super) encryption: Option<EncryptionParams>,
    pub(super) checksum: bool,
}

fn type_code(entry_type: EntryType) -> u8 {
    match entry_type {
        EntryType::File => 1,
        EntryType::Directory => 2,
        EntryType::Symlink => 3,
        EntryType::Hardlink => 4,
        EntryType::CharDevice => 5,
        EntryType::BlockDevice => 6,
        EntryType::Fifo => 7,
        EntryType::Socket => 8,
    }
}

fn type_from_code(code: u8) -> Option<EntryType> {
    Some(match code {
        1 => EntryType::File,
        2 => EntryType::Directory,
        3 => EntryType::Symlink,
        4 => EntryType::Hardlink,
        5 => EntryType::CharDevice,
        6 => EntryType::BlockDevice,
        7 => EntryType::Fifo,
        8 => EntryType::Socket,
        _ => return None,
    })
}

fn put(out: &mut Vec<u8>, tag: u8, value: &[u8]) {
    out.push(tag);
    out.extend_from_slice(&(value.len() as u32).to_le_bytes());
    out.extend_from_slice(value);
}

fn time_bytes(t: Timestamp) -> [u8; 12] {
    let mut out = [0u8; 12];
    out[..8].copy_from_slice(&t.secs().to_le_bytes());
    out[8..].copy_from_slice(&t.nanos().to_le_bytes());
    out
}

fn device_bytes(d: DeviceNumber) -> [u8; 8] {
    let mut out = [0u8; 8];
    out[..4].copy_from_slice(&d.major.to_le_bytes());
    out[4..].copy_from_slice(&d.minor.to_le_bytes());
    out
}

/// Serializes every set attribute of `entry`.
pub(super) fn encode(entry: &EntryMetadata, framing: &Framing) -> Vec<u8> {
    let mut out = Vec::with_capacity(128);
    if let Some(name) = entry.pathname() {
        put(&mut out, tag::PATHNAME, name.as_bytes());
    }
    if let Some(t) = entry.entry_type() {
        put(&mut out, tag::FILETYPE, &[type_code(t)]);
    }
    if let Some(perm) = entry.perm() {
        put(&mut out, tag::PERM, &perm.to_le_bytes());
    }
    if let Some(size) = entry.size() {
        put(&mut out, tag::SIZE, &size.to_le_bytes());
    }
    if let Some(uid) = entry.uid() {
        put(&mut out, tag::UID, &uid.to_le_bytes());
    }
    if let Some(gid) = entry.gid() {
        put(&mut out, tag::GID, &gid.to_le_bytes());
    }
    if let Some(uname) = entry.uname() {
        put(&mut out, tag::UNAME, uname.as_bytes());
    }
    if let Some(gname) = entry.gname() {
        put(&mut out, tag::GNAME, gname.as_bytes());
    }
    for (tag, time) in [
        (tag::ATIME, entry.atime()),
        (tag::MTIME, entry.mtime()),
        (tag::CTIME, entry.ctime()),
        (tag::BIRTHTIME, entry.birthtime()),
    ] {
        if let Some(time) = time {
            put(&mut out, tag, &time_bytes(time));
        }
    }
    if let Some(target) = entry.symlink() {
        put(&mut out, tag::SYMLINK, target.as_bytes());
        put(&mut out, tag::SYMLINK_TYPE, &[entry.symlink_type().to_u8()]);
    }
    if let Some(target) = entry.hardlink() {
        put(&mut out, tag::HARDLINK, target.as_bytes());
    }
    if let Some(dev) = entry.dev() {
        put(&mut out, tag::DEV, &device_bytes(dev));
    }
    if let Some(ino) = entry.ino() {
        put(&mut out, tag::INO, &ino.to_le_bytes());
    }
    if let Some(nlink) = entry.nlink() {
        put(&mut out, tag::NLINK, &nlink.to_le_bytes());
    }
    if let Some(rdev) = entry.rdev() {
        put(&mut out, tag::RDEV, &device_bytes(rdev));
    }
    if let Some(flags) = entry.fflags() {
        let mut value = [0u8; 16];
        value[..8].copy_from_slice(&flags.set.to_le_bytes());
        value[8..].copy_from_slice(&flags.clear.to_le_bytes());
        put(&mut out, tag::FFLAGS, &value);
    }
    if let Some(params) = framing.encryption {
        put(&mut out, tag::ENCRYPTION, &params.to_bytes());
    }
    let checksum = if framing.checksum {
        CHECKSUM_CRC32
    } else {
        CHECKSUM_NONE
    };
    put(&mut out, tag::CHECKSUM, &[checksum]);
    out
}

fn le<const N: usize>(value: &[u8]) -> Option<[u8; N]> {
    value.try_into().ok()
}

fn time_from(value: &[u8]) -> Option<Timestamp> {
    let bytes: [u8; 12] = le(value)?;
    let secs = i64::from_le_bytes(bytes[..8].try_into().ok()?);
    let nanos = u32::from_le_bytes(bytes[8..].try_into().ok()?);
    Timestamp::new(secs, nanos)
}

fn device_from(value: &[u8]) -> Option<DeviceNumber> {
    let bytes: [u8; 8] = le(value)?;
    Some(DeviceNumber::new(
        u32::from_le_bytes(bytes[..4].try_into().ok()?),
        u32::from_le_bytes(bytes[4..].try_into().ok()?),
    ))
}

/// Applies one field; returns false if its value is malformed.
fn apply(tag: u8, value: &[u8], entry: &mut EntryMetadata, framing: &mut Framing) -> bool {
    let u32_value = || le::<4>(value).map(u32::from_le_bytes);
    let u64_value = || le::<8>(value).map(u64::from_le_bytes);
    match tag {
        tag::PATHNAME => entry.set_pathname(EntryName::from_bytes(value)),
        tag::FILETYPE => match value {
            [code] => match type_from_code(*code) {
                Some(t) => entry.set_type(t),
                None => entry.push_warning(format!("unknown spool file type {}", code)),
            },
            _ => return false,
        },
        tag::PERM => match u32_value() {
            Some(perm) => entry.set_perm(perm),
            None => return false,
        },
        tag::SIZE => match u64_value() {
            Some(size) => entry.set_size(size),
            None => return false,
        },
        tag::UID => match u64_value() {
            Some(uid) => entry.set_uid(uid),
            None => return false,
        },
        tag::GID => match u64_value() {
            Some(gid) => entry.set_gid(gid),
            None => return false,
        },
        tag::UNAME => entry.set_uname(String::from_utf8_lossy(value).into_owned()),
        tag::GNAME => entry.set_gname(String::from_utf8_lossy(value).into_owned()),
        tag::ATIME | tag::MTIME | tag::CTIME | tag::BIRTHTIME => {
            let Some(time) = time_from(value) else {
                return false;
            };
            match tag {
                tag::ATIME => entry.set_atime(Some(time)),
                tag::MTIME => entry.set_mtime(Some(time)),
                tag::CTIME => entry.set_ctime(Some(time)),
                _ => entry.set_birthtime(Some(time)),
            }
        }
        tag::SYMLINK => entry.set_symlink(EntryName::from_bytes(value)),
        tag::HARDLINK => entry.set_hardlink(EntryName::from_bytes(value)),
        tag::SYMLINK_TYPE => match value {
            [code] => match SymlinkType::from_u8(*code) {
                Some(t) => entry.set_symlink_type(t),
                None => return false,
            },
            _ => return false,
        },
        tag::DEV => match device_from(value) {
            Some(dev) => entry.set_dev(dev),
            None => return false,
        },
        tag::INO => match u64_value() {
            Some(ino) => entry.set_ino(ino),
            None => return false,
        },
        tag::NLINK => match u32_value() {
            Some(nlink) => entry.set_nlink(nlink),
            None => return false,
        },
        tag::RDEV => match device_from(value) {
            Some(rdev) => entry.set_rdev(rdev),
            None => return false,
        },
        tag::FFLAGS => {
            let Some(bytes) = le::<16>(value) else {
                return false;
            };
            let mut set = [0u8; 8];
            let mut clear = [0u8; 8];
            set.copy_from_slice(&bytes[..8]);
            clear.copy_from_slice(&bytes[8..]);
            entry.set_fflags(u64::from_le_bytes(set), u64::from_le_bytes(clear));
        }
        tag::ENCRYPTION => match EncryptionParams::parse(value) {
            Some(params) => {
                framing.encryption = Some(params);
                entry.set_data_encrypted(true);
            }
            None => return false,
        },
        tag::CHECKSUM => match value {
            [CHECKSUM_NONE] => framing.checksum = false,
            [CHECKSUM_CRC32] => framing.checksum = true,
            _ => return false,
        },
        other => {
            log::warn!("Ignoring unknown spool header field {}", other);
            entry.push_warning(format!("unknown spool header field {} ignored", other));
        }
    }
    true
}

/// Parses a header body into `entry`.
///
/// Malformed optional values become entry warnings. A field that overruns
/// the body fails the entry.
pub(super) fn decode(body: &[u8], offset: u64, entry: &mut EntryMetadata) -> Result<Framing> {
    let mut framing = Framing::default();
    let mut rest = body;
    while !rest.is_empty() {
        if rest.len() < 5 {
            return Err(Error::invalid_entry(offset, "truncated spool header field"));
        }
        let tag = rest[0];
        let len = u32::from_le_bytes([rest[1], rest[2], rest[3], rest[4]]) as usize;
        if rest.len() - 5 < len {
            return Err(Error::invalid_entry(
                offset,
                format!("spool header field {} overruns the header", tag),
            ));
        }
        let value = &rest[5..5 + len];
        rest = &rest[5 + len..];

        if apply(tag, value, entry, &mut framing) {
            continue;
        }
        if tag == tag::ENCRYPTION {
            return Err(Error::invalid_entry(offset, "malformed spool encryption field"));
        }
        log::warn!("Malformed spool header field {} ({} bytes)", tag, len);
        entry.push_warning(format!(
            "spool header field {} has a malformed value of {} bytes",
            tag, len
        ));
    }
    Ok(framing)
}
