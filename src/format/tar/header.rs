//! ustar header blocks.

use crate::entry::EntryType;

pub(crate) const BLOCK_SIZE: usize = 512;

pub(crate) const NAME: (usize, usize) = (0, 100);
pub(crate) const MODE: (usize, usize) = (100, 8);
pub(crate) const UID: (usize, usize) = (108, 8);
pub(crate) const GID: (usize, usize) = (116, 8);
pub(crate) const SIZE: (usize, usize) = (124, 12);
pub(crate) const MTIME: (usize, usize) = (136, 12);
pub(crate) const CHKSUM: (usize, usize) = (148, 8);
pub(crate) const TYPEFLAG: usize = 156;
pub(crate) const LINKNAME: (usize, usize) = (157, 100);
pub(crate) const MAGIC: (usize, usize) = (257, 6);
pub(crate) const VERSION: (usize, usize) = (263, 2);
pub(crate) const UNAME: (usize, usize) = (265, 32);
pub(crate) const GNAME: (usize, usize) = (297, 32);
pub(crate) const DEVMAJOR: (usize, usize) = (329, 8);
pub(crate) const DEVMINOR: (usize, usize) = (337, 8);
pub(crate) const PREFIX: (usize, usize) = (345, 155);

pub(crate) const USTAR_MAGIC: &[u8; 6] = b"ustar\0";
pub(crate) const GNU_MAGIC: &[u8; 8] = b"ustar  \0";

/// Type flags.
pub(crate) mod kind {
    pub(crate) const FILE: u8 = b'0';
    pub(crate) const OLD_FILE: u8 = 0;
    pub(crate) const HARDLINK: u8 = b'1';
    pub(crate) const SYMLINK: u8 = b'2';
    pub(crate) const CHAR: u8 = b'3';
    pub(crate) const BLOCK: u8 = b'4';
    pub(crate) const DIRECTORY: u8 = b'5';
    pub(crate) const FIFO: u8 = b'6';
    pub(crate) const CONTIGUOUS: u8 = b'7';
    pub(crate) const PAX_LOCAL: u8 = b'x';
    pub(crate) const PAX_GLOBAL: u8 = b'g';
    pub(crate) const GNU_LONGNAME: u8 = b'L';
    pub(crate) const GNU_LONGLINK: u8 = b'K';
}

/// Largest value of an octal field of `width` bytes (one byte is the terminator).
pub(crate) fn octal_max(width: usize) -> u64 {
    (1u64 << (3 * (width - 1) as u32)) - 1
}

pub(crate) fn field(block: &[u8; BLOCK_SIZE], (start, len): (usize, usize)) -> &[u8] {
    &block[start..start + len]
}

/// Field bytes up to the first NUL.
pub(crate) fn text(block: &[u8; BLOCK_SIZE], f: (usize, usize)) -> &[u8] {
    let raw = field(block, f);
    let end = raw.iter().position(|&b| b == 0).unwrap_or(raw.len());
    &raw[..end]
}

/// Parses an octal or base-256 numeric field.
///
/// Returns `None` for malformed or negative values.
pub(crate) fn parse_number(raw: &[u8]) -> Option<u64> {
    if raw.first().is_some_and(|&b| b & 0x80 != 0) {
        if raw[0] == 0xFF {
            return None;
        }
        let mut value: u64 = u64::from(raw[0] & 0x7F);
        for &b in &raw[1..] {
            value = value.checked_mul(256)?.checked_add(u64::from(b))?;
        }
        return Some(value);
    }
    let trimmed: Vec<u8> = raw
        .iter()
        .copied()
        .skip_while(|&b| b == b' ')
        .take_while(|&b| b != 0 && b != b' ')
        .collect();
    if trimmed.is_empty() {
        return Some(0);
    }
    let mut value: u64 = 0;
    for b in trimmed {
        if !(b'0'..=b'7').contains(&b) {
            return None;
        }
        value = value.checked_mul(8)?.checked_add(u64::from(b - b'0'))?;
    }
    Some(value)
}

/// Writes `value` as zero-padded octal, or base-256 when `allow_binary` and it does not fit.
///
/// Returns false if the value cannot be represented.
pub(crate) fn put_number(
    block: &mut [u8; BLOCK_SIZE],
    (start, len): (usize, usize),
    value: u64,
    allow_binary: bool,
) -> bool {
    let dest = &mut block[start..start + len];
    if value <= octal_max(len) {
        let digits = format!("{:0width$o}", value, width = len - 1);
        dest[..len - 1].copy_from_slice(digits.as_bytes());
        dest[len - 1] = 0;
        return true;
    }
    if !allow_binary {
        return false;
    }
    let bytes = value.to_be_bytes();
    dest.fill(0);
    let copy = bytes.len().min(len - 1);
    dest[len - copy..].copy_from_slice(&bytes[bytes.len() - copy..]);
    dest[0] |= 0x80;
    true
}

pub(crate) fn put_text(block: &mut [u8; BLOCK_SIZE], (start, len): (usize, usize), value: &[u8]) -> bool {
    if value.len() > len {
        return false;
    }
    block[start..start + value.len()].copy_from_slice(value);
    true
}

/// Computes the header checksum with the checksum field counted as spaces.
///
/// Returns the unsigned and the historic signed sums.
pub(crate) fn checksums(block: &[u8; BLOCK_SIZE]) -> (u64, i64) {
    let mut unsigned = 0u64;
    let mut signed = 0i64;
    for (i, &b) in block.iter().enumerate() {
        let b = if (CHKSUM.0..CHKSUM.0 + CHKSUM.1).contains(&i) {
            b' '
        } else {
            b
        };
        unsigned += u64::from(b);
        signed += i64::from(b as i8);
    }
    (unsigned, signed)
}

/// Verifies the stored checksum.
pub(crate) fn checksum_ok(block: &[u8; BLOCK_SIZE]) -> bool {
    let Some(stored) = parse_number(field(block, CHKSUM)) else {
        return false;
    };
    let (unsigned, signed) = checksums(block);
    stored == unsigned || i64::try_from(stored).is_ok_and(|s| s == signed)
}

/// Fills in the checksum field.
pub(crate) fn seal(block: &mut [u8; BLOCK_SIZE]) {
    let (sum, _) = checksums(block);
    let digits = format!("{:06o}\0 ", sum);
    block[CHKSUM.0..CHKSUM.0 + CHKSUM.1].copy_from_slice(digits.as_bytes());
}

pub(crate) fn is_zero_block(block: &[u8]) -> bool {
    block.iter().all(|&b| b == 0)
}

pub(crate) fn type_for_flag(flag: u8) -> Option<EntryType> {
    match flag {
        kind::FILE | kind::OLD_FILE | kind::CONTIGUOUS => Some(EntryType::File),
        kind::HARDLINK => Some(EntryType::Hardlink),
        kind::SYMLINK => Some(EntryType::Symlink),
        kind::CHAR => Some(EntryType::CharDevice),
        kind::BLOCK => Some(EntryType::BlockDevice),
        kind::DIRECTORY => Some(EntryType::Directory),
        kind::FIFO => Some(EntryType::Fifo),
        _ => None,
    }
}

pub(crate) fn flag_for_type(entry_type: EntryType) -> Option<u8> {
    match entry_type {
        EntryType::File => Some(kind::FILE),
        EntryType::Hardlink => Some(kind::HARDLINK),
        EntryType::Symlink => Some(kind::SYMLINK),
        EntryType::CharDevice => Some(kind::CHAR),
        EntryType::BlockDevice => Some(kind::BLOCK),
        EntryType::Directory => Some(kind::DIRECTORY),
        EntryType::Fifo => Some(kind::FIFO),
        EntryType::Socket => None,
    }
}

/// Splits a path into ustar `(prefix, name)` parts.
pub(crate) fn split_path(path: &[u8]) -> Option<(&[u8], &[u8])> {
    if path.len() <= NAME.1 {
        return Some((&[], path));
    }
    // The prefix may not exceed 155 bytes and the name must be non-empty
    path.iter()
        .enumerate()
        .filter(|&(i, &b)| b == b'/' && i <= PREFIX.1)
        .map(|(i, _)| (&path[..i], &path[i + 1..]))
        .find(|(_, name)| !name.is_empty() && name.len() <= NAME.1)
}
