//! tar: ustar, pax and GNU variants.
//!
//! Reading accepts ustar headers (with the prefix/name split), pax local
//! extended headers, GNU long name and long link headers, and both octal and
//! base-256 numeric fields. pax global headers are consumed and reported as
//! an entry warning.
//!
//! Writing produces pax archives by default: a local extended header is
//! emitted only for values a ustar header cannot hold (long paths, large
//! sizes or ids, sub-second, access and change times). With
//! `tar:format=ustar` such values fail the entry with
//! [`Error::EntryTooLarge`] instead.

mod header;
mod pax;

use std::io::SeekFrom;

use header::{BLOCK_SIZE, kind};

use super::{
    DataWindow, EncryptionStatus, Format, FormatCode, FormatReader, FormatWriter, ReadContext,
    padding,
};
use crate::crypto::Passphrases;
use crate::entry::{DeviceNumber, EntryMetadata, EntryName, EntryType};
use crate::filter::{ReadStream, WriteStream};
use crate::options::ModuleOptions;
use crate::timestamp::Timestamp;
use crate::{Error, Result};

/// Largest extended header body accepted while reading.
const MAX_EXTENSION_SIZE: u64 = 8 * 1024 * 1024;

#[derive(Debug, Clone, Copy)]
pub(crate) struct TarFormat;

impl Format for TarFormat {
    fn family(&self) -> FormatCode {
        FormatCode::Tar
    }

    fn bid(&self, prefix: &[u8]) -> bool {
        if prefix.len() < BLOCK_SIZE {
            return false;
        }
        let mut block = [0u8; BLOCK_SIZE];
        block.copy_from_slice(&prefix[..BLOCK_SIZE]);
        if header::is_zero_block(&block) {
            // An archive holding only the end marker
            return header::is_zero_block(&prefix[..prefix.len().min(2 * BLOCK_SIZE)]);
        }
        header::checksum_ok(&block)
    }

    fn reader(&self, _options: &ModuleOptions<'_>) -> Result<Box<dyn FormatReader>> {
        Ok(Box::new(TarReader {
            code: FormatCode::Tar,
            window: DataWindow::default(),
            done: false,
        }))
    }

    fn writer(
        &self,
        code: FormatCode,
        options: &ModuleOptions<'_>,
    ) -> Result<Box<dyn FormatWriter>> {
        let code = match options.text("format")? {
            Some("ustar") => FormatCode::TarUstar,
            Some("pax") => FormatCode::TarPax,
            Some(other) => {
                return Err(Error::InvalidOption {
                    module: "tar".into(),
                    key: "format".into(),
                    reason: format!("unknown tar variant '{}'", other),
                });
            }
            None if code == FormatCode::TarUstar => FormatCode::TarUstar,
            None => FormatCode::TarPax,
        };
        log::debug!("tar writer: {}", code.name());
        Ok(Box::new(TarWriter {
            code,
            written: 0,
            sequence: 0,
        }))
    }
}

/// Extension headers collected before the entry header they apply to.
#[derive(Debug, Default)]
struct Extensions {
    long_name: Option<Vec<u8>>,
    long_link: Option<Vec<u8>>,
    records: Vec<pax::PaxRecord>,
    warnings: Vec<String>,
}

struct TarReader {
    code: FormatCode,
    window: DataWindow,
    done: bool,
}

fn strip_nuls(mut data: Vec<u8>) -> Vec<u8> {
    while data.last() == Some(&0) {
        data.pop();
    }
    data
}

impl TarReader {
    fn refine(&mut self, code: FormatCode) {
        // pax wins over plain ustar; GNU extensions win over both
        let rank = |c: FormatCode| match c {
            FormatCode::TarGnu => 3,
            FormatCode::TarPax => 2,
            FormatCode::TarUstar => 1,
            _ => 0,
        };
        if rank(code) > rank(self.code) {
            self.code = code;
        }
    }

    fn read_extension(stream: &mut ReadStream, size: u64, offset: u64) -> Result<Vec<u8>> {
        if size > MAX_EXTENSION_SIZE {
            return Err(Error::ResourceLimitExceeded(format!(
                "extended header of {} bytes at offset {:#x}",
                size, offset
            )));
        }
        let mut data = vec![0u8; size as usize];
        stream.read_exact(&mut data)?;
        stream.skip_exact(padding(size, BLOCK_SIZE as u64))?;
        Ok(data)
    }

    fn apply_records(records: &[pax::PaxRecord], entry: &mut EntryMetadata, size: &mut u64) {
        let mut dev_major = None;
        let mut dev_minor = None;
        for record in records {
            let value = &record.value;
            let text = String::from_utf8_lossy(value);
            let time = || Timestamp::parse_decimal(&text);
            let number = || text.parse::<u64>().ok();
            let ok = match record.key.as_str() {
                "path" => {
                    entry.set_pathname(EntryName::from_bytes(value.clone()));
                    true
                }
                "linkpath" => {
                    match entry.entry_type() {
                        Some(EntryType::Hardlink) => entry.set_hardlink(value.clone()),
                        _ => entry.set_symlink(value.clone()),
                    }
                    true
                }
                "uname" => {
                    entry.set_uname(text.clone().into_owned());
                    true
                }
                "gname" => {
                    entry.set_gname(text.clone().into_owned());
                    true
                }
                "size" => number().map(|n| *size = n).is_some(),
                "uid" => number().map(|n| entry.set_uid(n)).is_some(),
                "gid" => number().map(|n| entry.set_gid(n)).is_some(),
                "mtime" => time().map(|t| entry.set_mtime(Some(t))).is_some(),
                "atime" => time().map(|t| entry.set_atime(Some(t))).is_some(),
                "ctime" => time().map(|t| entry.set_ctime(Some(t))).is_some(),
                "LIBARCHIVE.creationtime" => time().map(|t| entry.set_birthtime(Some(t))).is_some(),
                "SCHILY.devmajor" => number().map(|n| dev_major = Some(n)).is_some(),
                "SCHILY.devminor" => number().map(|n| dev_minor = Some(n)).is_some(),
                "comment" | "charset" | "hdrcharset" => true,
                other => {
                    entry.push_warning(format!("unknown pax key '{}' ignored", other));
                    true
                }
            };
            if !ok {
                entry.push_warning(format!(
                    "malformed pax value for '{}': {}",
                    record.key, text
                ));
            }
        }
        if dev_major.is_some() || dev_minor.is_some() {
            let current = entry.rdev().unwrap_or(DeviceNumber { major: 0, minor: 0 });
            entry.set_rdev(DeviceNumber {
                major: dev_major.map_or(current.major, |m| m as u32),
                minor: dev_minor.map_or(current.minor, |m| m as u32),
            });
        }
    }

    fn build_entry(
        &mut self,
        block: &[u8; BLOCK_SIZE],
        offset: u64,
        ext: Extensions,
        entry: &mut EntryMetadata,
    ) -> Result<u64> {
        let flag = block[header::TYPEFLAG];
        let gnu = &block[header::MAGIC.0..header::MAGIC.0 + 8] == header::GNU_MAGIC;
        let ustar = !gnu && header::field(block, header::MAGIC) == header::USTAR_MAGIC;
        if gnu {
            self.refine(FormatCode::TarGnu);
        } else if ustar {
            self.refine(FormatCode::TarUstar);
        }

        let mut size = header::parse_number(header::field(block, header::SIZE))
            .ok_or_else(|| Error::corrupt_header(offset, "malformed size field"))?;

        let name = header::text(block, header::NAME);
        let prefix = if ustar {
            header::text(block, header::PREFIX)
        } else {
            &[]
        };
        let mut path = Vec::with_capacity(prefix.len() + 1 + name.len());
        if !prefix.is_empty() {
            path.extend_from_slice(prefix);
            path.push(b'/');
        }
        path.extend_from_slice(name);
        let path = ext.long_name.unwrap_or(path);
        let link = ext
            .long_link
            .unwrap_or_else(|| header::text(block, header::LINKNAME).to_vec());

        let entry_type = match header::type_for_flag(flag) {
            Some(EntryType::File) if path.last() == Some(&b'/') => EntryType::Directory,
            Some(t) => t,
            None => {
                entry.push_warning(format!(
                    "unknown tar type flag {:?} read as a regular file",
                    flag as char
                ));
                EntryType::File
            }
        };
        entry.set_type(entry_type);
        entry.set_pathname(EntryName::from_bytes(path));
        match entry_type {
            EntryType::Symlink => entry.set_symlink(link),
            EntryType::Hardlink => entry.set_hardlink(link),
            _ => {}
        }

        let number = |f| header::parse_number(header::field(block, f));
        match number(header::MODE) {
            Some(mode) => entry.set_perm((mode & 0o7777) as u32),
            None => entry.push_warning("malformed mode field"),
        }
        match number(header::UID) {
            Some(uid) => entry.set_uid(uid),
            None => entry.push_warning("malformed uid field"),
        }
        match number(header::GID) {
            Some(gid) => entry.set_gid(gid),
            None => entry.push_warning("malformed gid field"),
        }
        match number(header::MTIME) {
            Some(mtime) => {
                entry.set_mtime(Some(Timestamp::from_unix_secs(mtime.min(i64::MAX as u64) as i64)))
            }
            None => entry.push_warning("malformed mtime field"),
        }
        if ustar || gnu {
            let uname = header::text(block, header::UNAME);
            if !uname.is_empty() {
                entry.set_uname(String::from_utf8_lossy(uname).into_owned());
            }
            let gname = header::text(block, header::GNAME);
            if !gname.is_empty() {
                entry.set_gname(String::from_utf8_lossy(gname).into_owned());
            }
            if matches!(entry_type, EntryType::CharDevice | EntryType::BlockDevice) {
                let major = number(header::DEVMAJOR).unwrap_or(0);
                let minor = number(header::DEVMINOR).unwrap_or(0);
                entry.set_rdev(DeviceNumber {
                    major: major as u32,
                    minor: minor as u32,
                });
            }
        }

        if !ext.records.is_empty() {
            self.refine(FormatCode::TarPax);
            Self::apply_records(&ext.records, entry, &mut size);
        }
        for warning in ext.warnings {
            entry.push_warning(warning);
        }
        entry.set_size(size);
        Ok(size)
    }
}

impl FormatReader for TarReader {
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
        let stream = &mut *cx.stream;
        let header_offset = stream.position();
        let mut ext = Extensions::default();
        loop {
            let offset = stream.position();
            let mut block = [0u8; BLOCK_SIZE];
            let n = stream.read_full(&mut block)?;
            if n == 0 && offset == header_offset {
                log::debug!("tar stream ended without an end-of-archive marker");
                self.done = true;
                return Ok(None);
            }
            if n < BLOCK_SIZE {
                return Err(Error::Truncated {
                    offset: stream.position(),
                });
            }
            if header::is_zero_block(&block) {
                self.done = true;
                return Ok(None);
            }
            if !header::checksum_ok(&block) {
                return Err(Error::corrupt_header(offset, "tar header checksum mismatch"));
            }

            let flag = block[header::TYPEFLAG];
            let ext_size = || {
                header::parse_number(header::field(&block, header::SIZE))
                    .ok_or_else(|| Error::corrupt_header(offset, "malformed size field"))
            };
            match flag {
                kind::PAX_LOCAL | kind::PAX_GLOBAL => {
                    let data = Self::read_extension(stream, ext_size()?, offset)?;
                    match pax::parse_records(&data, offset) {
                        Ok(records) if flag == kind::PAX_LOCAL => ext.records.extend(records),
                        Ok(records) => ext.warnings.push(format!(
                            "global pax header with {} record(s) ignored",
                            records.len()
                        )),
                        Err(e) => ext.warnings.push(format!("malformed pax header ignored: {}", e)),
                    }
                }
                kind::GNU_LONGNAME => {
                    let data = Self::read_extension(stream, ext_size()?, offset)?;
                    ext.long_name = Some(strip_nuls(data));
                    self.refine(FormatCode::TarGnu);
                }
                kind::GNU_LONGLINK => {
                    let data = Self::read_extension(stream, ext_size()?, offset)?;
                    ext.long_link = Some(strip_nuls(data));
                    self.refine(FormatCode::TarGnu);
                }
                _ => {
                    let size = self.build_entry(&block, offset, ext, entry)?;
                    self.window =
                        DataWindow::new(stream.position(), size, padding(size, BLOCK_SIZE as u64));
                    return Ok(Some(header_offset));
                }
            }
        }
    }

    fn read_data(&mut self, cx: &mut ReadContext<'_>, buf: &mut [u8]) -> Result<usize> {
        self.window.read(cx.stream, buf)
    }

    fn skip_data(&mut self, cx: &mut ReadContext<'_>) -> Result<()> {
        self.window.skip(cx.stream)
    }

    fn seek_data(&mut self, cx: &mut ReadContext<'_>, pos: SeekFrom) -> Result<u64> {
        self.window.seek(cx.stream, pos)
    }

    fn encryption_status(&self) -> EncryptionStatus {
        EncryptionStatus::Unsupported
    }
}

struct TarWriter {
    code: FormatCode,
    written: u64,
    sequence: u64,
}

impl TarWriter {
    fn is_pax(&self) -> bool {
        self.code == FormatCode::TarPax
    }

    /// Records a value that does not fit ustar, or fails in ustar mode.
    fn overflow(
        &self,
        records: &mut Vec<u8>,
        key: &str,
        value: &[u8],
        field: &'static str,
        measure: u64,
    ) -> Result<()> {
        if !self.is_pax() {
            return Err(Error::EntryTooLarge {
                format: "ustar",
                field,
                value: measure,
            });
        }
        pax::push_record(records, key, value);
        Ok(())
    }

    fn encode(&mut self, entry: &EntryMetadata) -> Result<(Vec<u8>, u64)> {
        let path = entry
            .pathname()
            .ok_or_else(|| Error::protocol("entry has no pathname"))?
            .as_bytes();
        let entry_type = entry.entry_type().unwrap_or(EntryType::File);
        let flag = header::flag_for_type(entry_type).ok_or(Error::UnsupportedFeature {
            feature: "sockets in tar archives",
        })?;
        let size = match entry_type {
            EntryType::File => entry.size().ok_or(Error::UnsupportedFeature {
                feature: "tar entries of unknown size",
            })?,
            _ => 0,
        };

        let mut block = [0u8; BLOCK_SIZE];
        let mut records = Vec::new();

        match header::split_path(path) {
            Some((prefix, name)) => {
                header::put_text(&mut block, header::PREFIX, prefix);
                header::put_text(&mut block, header::NAME, name);
            }
            None => {
                self.overflow(&mut records, "path", path, "pathname", path.len() as u64)?;
                header::put_text(&mut block, header::NAME, &path[..header::NAME.1]);
            }
        }

        let link = match entry_type {
            EntryType::Symlink => Some(
                entry
                    .symlink()
                    .ok_or_else(|| Error::protocol("symlink entry without a target"))?,
            ),
            EntryType::Hardlink => Some(
                entry
                    .hardlink()
                    .ok_or_else(|| Error::protocol("hardlink entry without a target"))?,
            ),
            _ => None,
        };
        if let Some(link) = link {
            let link = link.as_bytes();
            if !header::put_text(&mut block, header::LINKNAME, link) {
                self.overflow(&mut records, "linkpath", link, "link target", link.len() as u64)?;
                header::put_text(&mut block, header::LINKNAME, &link[..header::LINKNAME.1]);
            }
        }

        let default_perm = if entry_type == EntryType::Directory {
            0o755
        } else {
            0o644
        };
        let perm = entry.perm().unwrap_or(default_perm) & 0o7777;
        header::put_number(&mut block, header::MODE, u64::from(perm), false);

        for (field, key, name, value) in [
            (header::UID, "uid", "uid", entry.uid().unwrap_or(0)),
            (header::GID, "gid", "gid", entry.gid().unwrap_or(0)),
        ] {
            if !header::put_number(&mut block, field, value, false) {
                self.overflow(&mut records, key, value.to_string().as_bytes(), name, value)?;
                header::put_number(&mut block, field, value, true);
            }
        }

        if !header::put_number(&mut block, header::SIZE, size, false) {
            self.overflow(&mut records, "size", size.to_string().as_bytes(), "size", size)?;
            header::put_number(&mut block, header::SIZE, size, true);
        }

        let mtime = entry.mtime().unwrap_or(Timestamp::UNIX_EPOCH);
        let secs_fit = mtime.secs() >= 0 && mtime.secs() as u64 <= header::octal_max(header::MTIME.1);
        if !secs_fit {
            self.overflow(
                &mut records,
                "mtime",
                mtime.to_decimal().as_bytes(),
                "mtime",
                mtime.secs().unsigned_abs(),
            )?;
        } else if mtime.nanos() != 0 && self.is_pax() {
            pax::push_record(&mut records, "mtime", mtime.to_decimal().as_bytes());
        }
        let header_secs = if secs_fit { mtime.secs() as u64 } else { 0 };
        header::put_number(&mut block, header::MTIME, header_secs, false);

        if self.is_pax() {
            if let Some(atime) = entry.atime() {
                pax::push_record(&mut records, "atime", atime.to_decimal().as_bytes());
            }
            if let Some(ctime) = entry.ctime() {
                pax::push_record(&mut records, "ctime", ctime.to_decimal().as_bytes());
            }
            if let Some(birth) = entry.birthtime() {
                pax::push_record(
                    &mut records,
                    "LIBARCHIVE.creationtime",
                    birth.to_decimal().as_bytes(),
                );
            }
        }

        for (field, key, name, value) in [
            (header::UNAME, "uname", "uname", entry.uname()),
            (header::GNAME, "gname", "gname", entry.gname()),
        ] {
            if let Some(value) = value {
                if !header::put_text(&mut block, field, value.as_bytes()) {
                    self.overflow(&mut records, key, value.as_bytes(), name, value.len() as u64)?;
                }
            }
        }

        if matches!(entry_type, EntryType::CharDevice | EntryType::BlockDevice) {
            let rdev = entry.rdev().unwrap_or(DeviceNumber { major: 0, minor: 0 });
            for (field, key, value) in [
                (header::DEVMAJOR, "SCHILY.devmajor", rdev.major),
                (header::DEVMINOR, "SCHILY.devminor", rdev.minor),
            ] {
                let value = u64::from(value);
                if !header::put_number(&mut block, field, value, false) {
                    self.overflow(&mut records, key, value.to_string().as_bytes(), "rdev", value)?;
                }
            }
        }

        block[header::TYPEFLAG] = flag;
        block[header::MAGIC.0..header::MAGIC.0 + 6].copy_from_slice(header::USTAR_MAGIC);
        block[header::VERSION.0..header::VERSION.0 + 2].copy_from_slice(b"00");
        header::seal(&mut block);

        let mut out = Vec::with_capacity(3 * BLOCK_SIZE + records.len());
        if !records.is_empty() {
            out.extend_from_slice(&self.extension_header(path, records.len() as u64));
            out.extend_from_slice(&records);
            out.resize(
                out.len() + padding(records.len() as u64, BLOCK_SIZE as u64) as usize,
                0,
            );
        }
        out.extend_from_slice(&block);
        Ok((out, size))
    }

    fn extension_header(&mut self, path: &[u8], size: u64) -> [u8; BLOCK_SIZE] {
        self.sequence += 1;
        let base = path
            .rsplit(|&b| b == b'/')
            .find(|s| !s.is_empty())
            .unwrap_or(b"entry");
        let mut name = format!("PaxHeaders.{}/", self.sequence).into_bytes();
        let room = header::NAME.1 - name.len();
        name.extend_from_slice(&base[..base.len().min(room)]);

        let mut block = [0u8; BLOCK_SIZE];
        header::put_text(&mut block, header::NAME, &name);
        header::put_number(&mut block, header::MODE, 0o644, false);
        header::put_number(&mut block, header::UID, 0, false);
        header::put_number(&mut block, header::GID, 0, false);
        header::put_number(&mut block, header::SIZE, size, true);
        header::put_number(&mut block, header::MTIME, 0, false);
        block[header::TYPEFLAG] = kind::PAX_LOCAL;
        block[header::MAGIC.0..header::MAGIC.0 + 6].copy_from_slice(header::USTAR_MAGIC);
        block[header::VERSION.0..header::VERSION.0 + 2].copy_from_slice(b"00");
        header::seal(&mut block);
        block
    }
}

impl FormatWriter for TarWriter {
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
                feature: "encryption in tar archives",
            });
        }
        let (bytes, size) = self.encode(entry)?;
        out.put(&bytes)?;
        self.written = 0;
        Ok(Some(size))
    }

    fn write_data(&mut self, out: &mut WriteStream, data: &[u8]) -> Result<()> {
        out.put(data)?;
        self.written += data.len() as u64;
        Ok(())
    }

    fn finish_entry(&mut self, out: &mut WriteStream) -> Result<()> {
        out.put_zeros(padding(self.written, BLOCK_SIZE as u64))?;
        self.written = 0;
        Ok(())
    }

    fn close(&mut self, out: &mut WriteStream) -> Result<()> {
        out.put_zeros(2 * BLOCK_SIZE as u64)
    }

    fn pads_output(&self) -> bool {
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::options::OptionSet;

    fn writer(format: &str) -> TarWriter {
        let opts = OptionSet::parse(&format!("tar:format={}", format)).unwrap();
        let w = TarFormat
            .writer(FormatCode::Tar, &opts.for_module("tar"))
            .unwrap();
        assert_eq!(
            w.code(),
            if format == "ustar" {
                FormatCode::TarUstar
            } else {
                FormatCode::TarPax
            }
        );
        TarWriter {
            code: w.code(),
            written: 0,
            sequence: 0,
        }
    }

    #[test]
    fn test_short_entry_has_no_extension() {
        let (bytes, size) = writer("pax")
            .encode(&EntryMetadata::file("a.txt", 5))
            .unwrap();
        assert_eq!(size, 5);
        assert_eq!(bytes.len(), BLOCK_SIZE);
        let mut block = [0u8; BLOCK_SIZE];
        block.copy_from_slice(&bytes);
        assert!(header::checksum_ok(&block));
        assert!(TarFormat.bid(&bytes));
    }

    #[test]
    fn test_long_path_uses_pax_or_fails_ustar() {
        let long = format!("{}.txt", "n".repeat(200));
        let entry = EntryMetadata::file(long.as_str(), 1);
        let (bytes, _) = writer("pax").encode(&entry).unwrap();
        assert_eq!(bytes.len(), 3 * BLOCK_SIZE);
        assert_eq!(bytes[header::TYPEFLAG], kind::PAX_LOCAL);

        let err = writer("ustar").encode(&entry).unwrap_err();
        assert!(matches!(
            err,
            Error::EntryTooLarge {
                format: "ustar",
                field: "pathname",
                ..
            }
        ));
    }

    #[test]
    fn test_subsecond_mtime_needs_pax() {
        let entry = EntryMetadata::file("t", 0).with_mtime(Timestamp::new(1_700_000_000, 5).unwrap());
        let (bytes, _) = writer("pax").encode(&entry).unwrap();
        assert!(bytes.len() > BLOCK_SIZE);
        let (bytes, _) = writer("ustar").encode(&entry).unwrap();
        assert_eq!(bytes.len(), BLOCK_SIZE);
    }

    #[test]
    fn test_unknown_size_rejected() {
        let entry = EntryMetadata::new().with_pathname("x").with_type(EntryType::File);
        assert!(matches!(
            writer("pax").encode(&entry),
            Err(Error::UnsupportedFeature { .. })
        ));
    }

    #[test]
    fn test_unknown_variant_option() {
        let opts = OptionSet::parse("tar:format=v7").unwrap();
        assert!(TarFormat
            .writer(FormatCode::Tar, &opts.for_module("tar"))
            .is_err());
    }

    #[test]
    fn test_bid_on_end_marker_only() {
        assert!(TarFormat.bid(&[0u8; 1024]));
        assert!(!TarFormat.bid(&[0u8; 100]));
        let mut not_tar = vec![0u8; 1024];
        not_tar[700] = 1;
        assert!(!TarFormat.bid(&not_tar));
    }
}
