//! Archive entry metadata.
//!
//! [`EntryMetadata`] is the single record exchanged between callers and the
//! format codecs: readers fill one in per header, writers serialize the one
//! handed to [`ArchiveWriter::write_header`](crate::ArchiveWriter::write_header).
//!
//! Every attribute that a format may or may not carry is an `Option`, so "not
//! present in this archive" is never confused with zero. Formats that cannot
//! represent a field simply leave it unset when reading.
//!
//! # Example
//!
//! ```rust
//! use arcstream::{EntryMetadata, EntryType, Timestamp};
//!
//! let entry = EntryMetadata::file("notes/todo.txt", 42)
//!     .with_perm(0o600)
//!     .with_mtime(Timestamp::from_unix_secs(1_700_000_000))
//!     .with_owner(1000, 1000);
//!
//! assert_eq!(entry.entry_type(), Some(EntryType::File));
//! assert_eq!(entry.mode(), 0o100600);
//! assert_eq!(entry.strmode(), "-rw-------");
//! assert_eq!(entry.size(), Some(42));
//! assert!(entry.atime().is_none());
//! ```

mod name;

pub use name::EntryName;

use crate::timestamp::Timestamp;

/// File type bit mask within a Unix mode.
pub const AE_IFMT: u32 = 0o170000;
/// Regular file.
pub const AE_IFREG: u32 = 0o100000;
/// Symbolic link.
pub const AE_IFLNK: u32 = 0o120000;
/// Socket.
pub const AE_IFSOCK: u32 = 0o140000;
/// Character device.
pub const AE_IFCHR: u32 = 0o020000;
/// Block device.
pub const AE_IFBLK: u32 = 0o060000;
/// Directory.
pub const AE_IFDIR: u32 = 0o040000;
/// Named pipe.
pub const AE_IFIFO: u32 = 0o010000;

/// The kind of filesystem object an entry describes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EntryType {
    /// Regular file.
    File,
    /// Directory.
    Directory,
    /// Symbolic link; the target is in [`EntryMetadata::symlink`].
    Symlink,
    /// Hard link to an earlier entry; the target is in [`EntryMetadata::hardlink`].
    Hardlink,
    /// Character device.
    CharDevice,
    /// Block device.
    BlockDevice,
    /// Named pipe.
    Fifo,
    /// Unix domain socket.
    Socket,
}

impl EntryType {
    /// Returns the `AE_IF*` type bits for this type.
    ///
    /// Hard links have no bits of their own and report as regular files.
    pub const fn mode_bits(self) -> u32 {
        match self {
            EntryType::File | EntryType::Hardlink => AE_IFREG,
            EntryType::Directory => AE_IFDIR,
            EntryType::Symlink => AE_IFLNK,
            EntryType::CharDevice => AE_IFCHR,
            EntryType::BlockDevice => AE_IFBLK,
            EntryType::Fifo => AE_IFIFO,
            EntryType::Socket => AE_IFSOCK,
        }
    }

    /// Maps the type bits of a Unix mode to an entry type.
    pub const fn from_mode(mode: u32) -> Option<Self> {
        match mode & AE_IFMT {
            AE_IFREG => Some(EntryType::File),
            AE_IFDIR => Some(EntryType::Directory),
            AE_IFLNK => Some(EntryType::Symlink),
            AE_IFCHR => Some(EntryType::CharDevice),
            AE_IFBLK => Some(EntryType::BlockDevice),
            AE_IFIFO => Some(EntryType::Fifo),
            AE_IFSOCK => Some(EntryType::Socket),
            _ => None,
        }
    }

    /// Returns true for types that carry a data body.
    pub const fn has_data(self) -> bool {
        matches!(self, EntryType::File)
    }

    fn strmode_char(self) -> char {
        match self {
            EntryType::File => '-',
            EntryType::Hardlink => 'h',
            EntryType::Directory => 'd',
            EntryType::Symlink => 'l',
            EntryType::CharDevice => 'c',
            EntryType::BlockDevice => 'b',
            EntryType::Fifo => 'p',
            EntryType::Socket => 's',
        }
    }
}

/// How a symbolic link target should be interpreted on platforms that care.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum SymlinkType {
    /// Not specified.
    #[default]
    Undefined,
    /// The link points at a file.
    File,
    /// The link points at a directory.
    Directory,
}

impl SymlinkType {
    pub(crate) fn to_u8(self) -> u8 {
        match self {
            SymlinkType::Undefined => 0,
            SymlinkType::File => 1,
            SymlinkType::Directory => 2,
        }
    }

    pub(crate) fn from_u8(value: u8) -> Option<Self> {
        match value {
            0 => Some(SymlinkType::Undefined),
            1 => Some(SymlinkType::File),
            2 => Some(SymlinkType::Directory),
            _ => None,
        }
    }
}

/// A device number split into major and minor parts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct DeviceNumber {
    /// Major number.
    pub major: u32,
    /// Minor number.
    pub minor: u32,
}

impl DeviceNumber {
    /// Creates a device number.
    pub const fn new(major: u32, minor: u32) -> Self {
        Self { major, minor }
    }
}

/// Platform file flags (BSD `chflags`, Linux `chattr`).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct FileFlags {
    /// Flags to set.
    pub set: u64,
    /// Flags to clear.
    pub clear: u64,
}

/// Metadata of one archive member.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct EntryMetadata {
    pathname: Option<EntryName>,
    entry_type: Option<EntryType>,
    perm: Option<u32>,
    size: Option<u64>,
    uid: Option<u64>,
    gid: Option<u64>,
    uname: Option<String>,
    gname: Option<String>,
    atime: Option<Timestamp>,
    mtime: Option<Timestamp>,
    ctime: Option<Timestamp>,
    birthtime: Option<Timestamp>,
    symlink: Option<EntryName>,
    hardlink: Option<EntryName>,
    symlink_type: SymlinkType,
    dev: Option<DeviceNumber>,
    ino: Option<u64>,
    nlink: Option<u32>,
    rdev: Option<DeviceNumber>,
    fflags: Option<FileFlags>,
    data_encrypted: bool,
    metadata_encrypted: bool,
    warnings: Vec<String>,
}

impl EntryMetadata {
    /// Creates an empty record with every attribute unset.
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a regular file entry with permissions `0644`.
    pub fn file(pathname: impl Into<EntryName>, size: u64) -> Self {
        Self::new()
            .with_pathname(pathname)
            .with_type(EntryType::File)
            .with_perm(0o644)
            .with_size(size)
    }

    /// Creates a directory entry with permissions `0755` and size 0.
    pub fn directory(pathname: impl Into<EntryName>) -> Self {
        Self::new()
            .with_pathname(pathname)
            .with_type(EntryType::Directory)
            .with_perm(0o755)
            .with_size(0)
    }

    /// Creates a symbolic link entry with permissions `0777`.
    pub fn new_symlink(pathname: impl Into<EntryName>, target: impl Into<EntryName>) -> Self {
        Self::new()
            .with_pathname(pathname)
            .with_type(EntryType::Symlink)
            .with_perm(0o777)
            .with_size(0)
            .with_symlink(target)
    }

    /// Creates a hard link entry pointing at an earlier member.
    pub fn new_hardlink(pathname: impl Into<EntryName>, target: impl Into<EntryName>) -> Self {
        Self::new()
            .with_pathname(pathname)
            .with_type(EntryType::Hardlink)
            .with_perm(0o644)
            .with_size(0)
            .with_hardlink(target)
    }

    /// Resets every attribute to unset.
    pub fn clear(&mut self) {
        *self = Self::default();
    }

    // Builders

    /// Sets the path name.
    pub fn with_pathname(mut self, pathname: impl Into<EntryName>) -> Self {
        self.pathname = Some(pathname.into());
        self
    }

    /// Sets the entry type.
    pub fn with_type(mut self, entry_type: EntryType) -> Self {
        self.entry_type = Some(entry_type);
        self
    }

    /// Sets the permission bits.
    pub fn with_perm(mut self, perm: u32) -> Self {
        self.perm = Some(perm & 0o7777);
        self
    }

    /// Sets the data size.
    pub fn with_size(mut self, size: u64) -> Self {
        self.size = Some(size);
        self
    }

    /// Sets the numeric owner and group.
    pub fn with_owner(mut self, uid: u64, gid: u64) -> Self {
        self.uid = Some(uid);
        self.gid = Some(gid);
        self
    }

    /// Sets the owner and group names.
    pub fn with_owner_names(mut self, uname: impl Into<String>, gname: impl Into<String>) -> Self {
        self.uname = Some(uname.into());
        self.gname = Some(gname.into());
        self
    }

    /// Sets the modification time.
    pub fn with_mtime(mut self, mtime: Timestamp) -> Self {
        self.mtime = Some(mtime);
        self
    }

    /// Sets the access time.
    pub fn with_atime(mut self, atime: Timestamp) -> Self {
        self.atime = Some(atime);
        self
    }

    /// Sets the status change time.
    pub fn with_ctime(mut self, ctime: Timestamp) -> Self {
        self.ctime = Some(ctime);
        self
    }

    /// Sets the creation time.
    pub fn with_birthtime(mut self, birthtime: Timestamp) -> Self {
        self.birthtime = Some(birthtime);
        self
    }

    /// Sets the symbolic link target.
    pub fn with_symlink(mut self, target: impl Into<EntryName>) -> Self {
        self.symlink = Some(target.into());
        self
    }

    /// Sets the hard link target.
    pub fn with_hardlink(mut self, target: impl Into<EntryName>) -> Self {
        self.hardlink = Some(target.into());
        self
    }

    /// Sets the device number of a character or block device entry.
    pub fn with_rdev(mut self, major: u32, minor: u32) -> Self {
        self.rdev = Some(DeviceNumber::new(major, minor));
        self
    }

    /// Marks the entry data as encrypted.
    pub fn with_data_encrypted(mut self, encrypted: bool) -> Self {
        self.data_encrypted = encrypted;
        self
    }

    // Getters

    /// Returns the path name.
    pub fn pathname(&self) -> Option<&EntryName> {
        self.pathname.as_ref()
    }

    /// Returns the path name as UTF-8 if it is valid UTF-8.
    pub fn pathname_utf8(&self) -> Option<&str> {
        self.pathname.as_ref().and_then(EntryName::as_str)
    }

    /// Returns the entry type.
    pub fn entry_type(&self) -> Option<EntryType> {
        self.entry_type
    }

    /// Returns the permission bits.
    pub fn perm(&self) -> Option<u32> {
        self.perm
    }

    /// Returns the data size, if known.
    pub fn size(&self) -> Option<u64> {
        self.size
    }

    /// Returns the numeric owner id.
    pub fn uid(&self) -> Option<u64> {
        self.uid
    }

    /// Returns the numeric group id.
    pub fn gid(&self) -> Option<u64> {
        self.gid
    }

    /// Returns the owner name.
    pub fn uname(&self) -> Option<&str> {
        self.uname.as_deref()
    }

    /// Returns the group name.
    pub fn gname(&self) -> Option<&str> {
        self.gname.as_deref()
    }

    /// Returns the access time.
    pub fn atime(&self) -> Option<Timestamp> {
        self.atime
    }

    /// Returns the modification time.
    pub fn mtime(&self) -> Option<Timestamp> {
        self.mtime
    }

    /// Returns the status change time.
    pub fn ctime(&self) -> Option<Timestamp> {
        self.ctime
    }

    /// Returns the creation time.
    pub fn birthtime(&self) -> Option<Timestamp> {
        self.birthtime
    }

    /// Returns the symbolic link target.
    pub fn symlink(&self) -> Option<&EntryName> {
        self.symlink.as_ref()
    }

    /// Returns the hard link target.
    pub fn hardlink(&self) -> Option<&EntryName> {
        self.hardlink.as_ref()
    }

    /// Returns the symbolic link type.
    pub fn symlink_type(&self) -> SymlinkType {
        self.symlink_type
    }

    /// Returns the device the entry lived on.
    pub fn dev(&self) -> Option<DeviceNumber> {
        self.dev
    }

    /// Returns the inode number.
    pub fn ino(&self) -> Option<u64> {
        self.ino
    }

    /// Returns the link count.
    pub fn nlink(&self) -> Option<u32> {
        self.nlink
    }

    /// Returns the device number of a device entry.
    pub fn rdev(&self) -> Option<DeviceNumber> {
        self.rdev
    }

    /// Returns the platform file flags.
    pub fn fflags(&self) -> Option<FileFlags> {
        self.fflags
    }

    /// Returns true if the entry data is encrypted.
    pub fn is_data_encrypted(&self) -> bool {
        self.data_encrypted
    }

    /// Returns true if the entry metadata is encrypted.
    pub fn is_metadata_encrypted(&self) -> bool {
        self.metadata_encrypted
    }

    /// Returns true if either data or metadata is encrypted.
    pub fn is_encrypted(&self) -> bool {
        self.data_encrypted || self.metadata_encrypted
    }

    /// Returns the recoverable problems recorded while parsing this entry.
    pub fn warnings(&self) -> &[String] {
        &self.warnings
    }

    /// Returns true for regular files.
    pub fn is_file(&self) -> bool {
        self.entry_type == Some(EntryType::File)
    }

    /// Returns true for directories.
    pub fn is_dir(&self) -> bool {
        self.entry_type == Some(EntryType::Directory)
    }

    /// Returns true for symbolic links.
    pub fn is_symlink(&self) -> bool {
        self.entry_type == Some(EntryType::Symlink)
    }

    /// Returns true for hard links.
    pub fn is_hardlink(&self) -> bool {
        self.entry_type == Some(EntryType::Hardlink) || self.hardlink.is_some()
    }

    /// Returns the full Unix mode: type bits plus permission bits.
    pub fn mode(&self) -> u32 {
        self.entry_type.map(EntryType::mode_bits).unwrap_or(0) | self.perm.unwrap_or(0)
    }

    /// Returns an `ls -l` style mode string such as `drwxr-xr-x`.
    pub fn strmode(&self) -> String {
        let mut out = String::with_capacity(10);
        out.push(self.entry_type.map(EntryType::strmode_char).unwrap_or('?'));
        let perm = self.perm.unwrap_or(0);
        const BITS: [(u32, char); 9] = [
            (0o400, 'r'),
            (0o200, 'w'),
            (0o100, 'x'),
            (0o040, 'r'),
            (0o020, 'w'),
            (0o010, 'x'),
            (0o004, 'r'),
            (0o002, 'w'),
            (0o001, 'x'),
        ];
        for (bit, c) in BITS {
            out.push(if perm & bit != 0 { c } else { '-' });
        }
        // setuid, setgid, sticky overlay the execute columns
        let mut chars: Vec<char> = out.chars().collect();
        if perm & 0o4000 != 0 {
            chars[3] = if perm & 0o100 != 0 { 's' } else { 'S' };
        }
        if perm & 0o2000 != 0 {
            chars[6] = if perm & 0o010 != 0 { 's' } else { 'S' };
        }
        if perm & 0o1000 != 0 {
            chars[9] = if perm & 0o001 != 0 { 't' } else { 'T' };
        }
        chars.into_iter().collect()
    }

    // Setters

    /// Sets the path name.
    pub fn set_pathname(&mut self, pathname: impl Into<EntryName>) {
        self.pathname = Some(pathname.into());
    }

    /// Sets the entry type.
    pub fn set_type(&mut self, entry_type: EntryType) {
        self.entry_type = Some(entry_type);
    }

    /// Sets the permission bits (masked to `0o7777`).
    pub fn set_perm(&mut self, perm: u32) {
        self.perm = Some(perm & 0o7777);
    }

    /// Sets type and permissions from a full Unix mode.
    ///
    /// Unknown type bits leave the type unset.
    pub fn set_mode(&mut self, mode: u32) {
        self.entry_type = EntryType::from_mode(mode);
        self.perm = Some(mode & 0o7777);
    }

    /// Sets the data size.
    pub fn set_size(&mut self, size: u64) {
        self.size = Some(size);
    }

    /// Marks the size as unknown.
    pub fn unset_size(&mut self) {
        self.size = None;
    }

    /// Sets the numeric owner id.
    pub fn set_uid(&mut self, uid: u64) {
        self.uid = Some(uid);
    }

    /// Sets the numeric group id.
    pub fn set_gid(&mut self, gid: u64) {
        self.gid = Some(gid);
    }

    /// Sets the owner name.
    pub fn set_uname(&mut self, uname: impl Into<String>) {
        self.uname = Some(uname.into());
    }

    /// Sets the group name.
    pub fn set_gname(&mut self, gname: impl Into<String>) {
        self.gname = Some(gname.into());
    }

    /// Sets or clears the access time.
    pub fn set_atime(&mut self, atime: Option<Timestamp>) {
        self.atime = atime;
    }

    /// Sets or clears the modification time.
    pub fn set_mtime(&mut self, mtime: Option<Timestamp>) {
        self.mtime = mtime;
    }

    /// Sets or clears the status change time.
    pub fn set_ctime(&mut self, ctime: Option<Timestamp>) {
        self.ctime = ctime;
    }

    /// Sets or clears the creation time.
    pub fn set_birthtime(&mut self, birthtime: Option<Timestamp>) {
        self.birthtime = birthtime;
    }

    /// Sets the symbolic link target.
    pub fn set_symlink(&mut self, target: impl Into<EntryName>) {
        self.symlink = Some(target.into());
    }

    /// Sets the hard link target.
    pub fn set_hardlink(&mut self, target: impl Into<EntryName>) {
        self.hardlink = Some(target.into());
    }

    /// Sets the symbolic link type.
    pub fn set_symlink_type(&mut self, symlink_type: SymlinkType) {
        self.symlink_type = symlink_type;
    }

    /// Sets the device the entry lived on.
    pub fn set_dev(&mut self, dev: DeviceNumber) {
        self.dev = Some(dev);
    }

    /// Sets the inode number.
    pub fn set_ino(&mut self, ino: u64) {
        self.ino = Some(ino);
    }

    /// Sets the link count.
    pub fn set_nlink(&mut self, nlink: u32) {
        self.nlink = Some(nlink);
    }

    /// Sets the device number of a device entry.
    pub fn set_rdev(&mut self, rdev: DeviceNumber) {
        self.rdev = Some(rdev);
    }

    /// Sets the platform file flags.
    pub fn set_fflags(&mut self, set: u64, clear: u64) {
        self.fflags = Some(FileFlags { set, clear });
    }

    /// Marks the entry data as encrypted or not.
    pub fn set_data_encrypted(&mut self, encrypted: bool) {
        self.data_encrypted = encrypted;
    }

    /// Marks the entry metadata as encrypted or not.
    pub fn set_metadata_encrypted(&mut self, encrypted: bool) {
        self.metadata_encrypted = encrypted;
    }

    /// Records a recoverable problem found while parsing this entry.
    pub(crate) fn push_warning(&mut self, warning: impl Into<String>) {
        let warning = warning.into();
        log::warn!("{}: {}", self.display_name(), warning);
        self.warnings.push(warning);
    }

    /// Removes recorded warnings.
    pub fn clear_warnings(&mut self) {
        self.warnings.clear();
    }

    pub(crate) fn display_name(&self) -> String {
        match &self.pathname {
            Some(name) => name.to_string_lossy().into_owned(),
            None => "<unnamed>".to_string(),
        }
    }

    pub(crate) fn name_string(&self) -> Option<String> {
        self.pathname
            .as_ref()
            .map(|n| n.to_string_lossy().into_owned())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_new_entry_has_nothing_set() {
        let entry = EntryMetadata::new();
        assert!(entry.pathname().is_none());
        assert!(entry.size().is_none());
        assert!(entry.mtime().is_none());
        assert_eq!(entry.mode(), 0);
        assert!(!entry.is_encrypted());
    }

    #[test]
    fn test_set_mode_splits_type_and_perm() {
        let mut entry = EntryMetadata::new();
        entry.set_mode(0o040755);
        assert_eq!(entry.entry_type(), Some(EntryType::Directory));
        assert_eq!(entry.perm(), Some(0o755));
        assert_eq!(entry.mode(), 0o040755);
        assert_eq!(entry.strmode(), "drwxr-xr-x");
    }

    #[test]
    fn test_hardlink_reports_regular_mode() {
        let entry = EntryMetadata::new_hardlink("b", "a");
        assert_eq!(entry.mode() & AE_IFMT, AE_IFREG);
        assert!(entry.is_hardlink());
        assert_eq!(entry.hardlink().unwrap(), "a");
    }

    #[test]
    fn test_strmode_special_bits() {
        let entry = EntryMetadata::file("x", 0).with_perm(0o4755);
        assert_eq!(entry.strmode(), "-rwsr-xr-x");
        let entry = EntryMetadata::directory("t").with_perm(0o1776);
        assert_eq!(entry.strmode(), "drwxrwxrwT");
    }

    #[test]
    fn test_clone_as_template() {
        let template = EntryMetadata::new()
            .with_owner(10, 20)
            .with_owner_names("alice", "staff");
        let mut entry = template.clone();
        entry.set_pathname("f");
        assert_eq!(entry.uid(), Some(10));
        assert_eq!(entry.gname(), Some("staff"));
        assert!(template.pathname().is_none());
    }

    #[test]
    fn test_unset_size() {
        let mut entry = EntryMetadata::file("f", 9);
        entry.unset_size();
        assert_eq!(entry.size(), None);
    }

    #[test]
    fn test_unknown_type_bits() {
        assert_eq!(EntryType::from_mode(0o170000), None);
        assert_eq!(EntryType::from_mode(0o140000), Some(EntryType::Socket));
    }

    #[test]
    fn test_symlink_type_codes() {
        for t in [SymlinkType::Undefined, SymlinkType::File, SymlinkType::Directory] {
            assert_eq!(SymlinkType::from_u8(t.to_u8()), Some(t));
        }
        assert_eq!(SymlinkType::from_u8(9), None);
    }
}
