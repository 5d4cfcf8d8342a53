//! Built-in byte sources.

use std::fs::File;
use std::io::{self, BufReader, Read, Seek, SeekFrom};
use std::path::{Path, PathBuf};

use super::ByteSource;

fn not_open() -> io::Error {
    io::Error::new(io::ErrorKind::NotConnected, "source is not open")
}

/// A seekable source backed by a file on disk.
///
/// The file is opened by [`ByteSource::open`], so constructing a
/// `FileSource` for a missing path only fails once the session starts.
pub struct FileSource {
    path: Option<PathBuf>,
    file: Option<BufReader<File>>,
    len: u64,
}

impl std::fmt::Debug for FileSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FileSource")
            .field("path", &self.path)
            .field("open", &self.file.is_some())
            .finish()
    }
}

impl FileSource {
    /// Creates a source that opens `path` when the session starts.
    pub fn new(path: impl AsRef<Path>) -> Self {
        Self {
            path: Some(path.as_ref().to_path_buf()),
            file: None,
            len: 0,
        }
    }

    /// Wraps an already open file. Reading starts at the current position.
    pub fn from_file(file: File) -> io::Result<Self> {
        let len = file.metadata()?.len();
        Ok(Self {
            path: None,
            file: Some(BufReader::new(file)),
            len,
        })
    }

    /// Returns the path this source was created with.
    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    fn file(&mut self) -> io::Result<&mut BufReader<File>> {
        self.file.as_mut().ok_or_else(not_open)
    }
}

impl ByteSource for FileSource {
    fn open(&mut self) -> io::Result<()> {
        if self.file.is_some() {
            return Ok(());
        }
        let path = self.path.as_ref().ok_or_else(not_open)?;
        let file = File::open(path)?;
        self.len = file.metadata()?.len();
        self.file = Some(BufReader::new(file));
        Ok(())
    }

    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        self.file()?.read(buf)
    }

    fn skip(&mut self, n: u64) -> io::Result<u64> {
        let len = self.len;
        let file = self.file()?;
        let pos = file.stream_position()?;
        let target = pos.saturating_add(n).min(len.max(pos));
        file.seek(SeekFrom::Start(target))?;
        Ok(target - pos)
    }

    fn seek(&mut self, pos: SeekFrom) -> io::Result<u64> {
        self.file()?.seek(pos)
    }

    fn can_seek(&self) -> bool {
        true
    }

    fn close(&mut self) -> io::Result<()> {
        self.file = None;
        Ok(())
    }
}

/// A seekable source over an owned byte buffer.
#[derive(Debug, Clone, Default)]
pub struct MemorySource {
    data: Vec<u8>,
    pos: usize,
}

impl MemorySource {
    /// Creates a source over `data`.
    pub fn new(data: impl Into<Vec<u8>>) -> Self {
        Self {
            data: data.into(),
            pos: 0,
        }
    }

    /// Returns the number of unread bytes.
    pub fn remaining(&self) -> usize {
        self.data.len() - self.pos
    }
}

impl ByteSource for MemorySource {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        let n = buf.len().min(self.remaining());
        buf[..n].copy_from_slice(&self.data[self.pos..self.pos + n]);
        self.pos += n;
        Ok(n)
    }

    fn skip(&mut self, n: u64) -> io::Result<u64> {
        let step = n.min(self.remaining() as u64);
        self.pos += step as usize;
        Ok(step)
    }

    fn seek(&mut self, pos: SeekFrom) -> io::Result<u64> {
        let len = self.data.len() as i128;
        let target = match pos {
            SeekFrom::Start(p) => i128::from(p),
            SeekFrom::Current(d) => self.pos as i128 + i128::from(d),
            SeekFrom::End(d) => len + i128::from(d),
        };
        if target < 0 {
            return Err(io::Error::new(
                io::ErrorKind::InvalidInput,
                "seek before start of buffer",
            ));
        }
        // Positions past the end clamp to the end; reads there return 0
        self.pos = target.min(len) as usize;
        Ok(self.pos as u64)
    }

    fn can_seek(&self) -> bool {
        true
    }
}

/// A sequential source over any [`Read`] implementation.
///
/// Seeking is not supported; skipping reads and discards.
pub struct ReaderSource<R> {
    inner: R,
}

impl<R> std::fmt::Debug for ReaderSource<R> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ReaderSource").finish_non_exhaustive()
    }
}

impl<R: Read + Send> ReaderSource<R> {
    /// Wraps a reader.
    pub fn new(inner: R) -> Self {
        Self { inner }
    }

    /// Returns the wrapped reader.
    pub fn into_inner(self) -> R {
        self.inner
    }
}

impl<R: Read + Send> ByteSource for ReaderSource<R> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        self.inner.read(buf)
    }
}

/// A random-access source over any [`Read`] + [`Seek`] implementation.
pub struct SeekableSource<R> {
    inner: R,
}

impl<R> std::fmt::Debug for SeekableSource<R> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SeekableSource").finish_non_exhaustive()
    }
}

impl<R: Read + Seek + Send> SeekableSource<R> {
    /// Wraps a seekable reader.
    pub fn new(inner: R) -> Self {
        Self { inner }
    }

    /// Returns the wrapped reader.
    pub fn into_inner(self) -> R {
        self.inner
    }
}

impl<R: Read + Seek + Send> ByteSource for SeekableSource<R> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        self.inner.read(buf)
    }

    fn skip(&mut self, n: u64) -> io::Result<u64> {
        let pos = self.inner.stream_position()?;
        let end = self.inner.seek(SeekFrom::End(0))?;
        let target = pos.saturating_add(n).min(end.max(pos));
        self.inner.seek(SeekFrom::Start(target))?;
        Ok(target - pos)
    }

    fn seek(&mut self, pos: SeekFrom) -> io::Result<u64> {
        self.inner.seek(pos)
    }

    fn can_seek(&self) -> bool {
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::{Cursor, Write};

    #[test]
    fn test_memory_source_read_skip_seek() {
        let mut src = MemorySource::new(b"0123456789".to_vec());
        let mut buf = [0u8; 3];
        assert_eq!(src.read(&mut buf).unwrap(), 3);
        assert_eq!(&buf, b"012");
        assert_eq!(src.skip(4).unwrap(), 4);
        assert_eq!(src.read(&mut buf).unwrap(), 3);
        assert_eq!(&buf, b"789");
        assert_eq!(src.skip(10).unwrap(), 0);
        assert_eq!(src.seek(SeekFrom::Start(1)).unwrap(), 1);
        assert_eq!(src.read(&mut buf).unwrap(), 3);
        assert_eq!(&buf, b"123");
        assert!(src.seek(SeekFrom::Current(-10)).is_err());
        assert_eq!(src.seek(SeekFrom::End(5)).unwrap(), 10);
    }

    #[test]
    fn test_file_source_skip_clamps_to_length() {
        let mut tmp = tempfile::NamedTempFile::new().unwrap();
        tmp.write_all(b"abcdef").unwrap();
        tmp.flush().unwrap();

        let mut src = FileSource::new(tmp.path());
        src.open().unwrap();
        assert_eq!(src.skip(2).unwrap(), 2);
        let mut buf = [0u8; 2];
        src.read(&mut buf).unwrap();
        assert_eq!(&buf, b"cd");
        assert_eq!(src.skip(100).unwrap(), 2);
        assert_eq!(src.read(&mut buf).unwrap(), 0);
        src.close().unwrap();
    }

    #[test]
    fn test_file_source_missing_path_fails_on_open() {
        let dir = tempfile::tempdir().unwrap();
        let mut src = FileSource::new(dir.path().join("missing.tar"));
        let err = src.open().unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::NotFound);
    }

    #[test]
    fn test_reader_source_is_sequential() {
        let mut src = ReaderSource::new(Cursor::new(vec![1u8, 2, 3, 4]));
        assert!(!src.can_seek());
        assert_eq!(src.skip(3).unwrap(), 3);
        let mut buf = [0u8; 4];
        assert_eq!(src.read(&mut buf).unwrap(), 1);
        assert_eq!(buf[0], 4);
    }

    #[test]
    fn test_seekable_source_skip() {
        let mut src = SeekableSource::new(Cursor::new(vec![9u8; 8]));
        assert_eq!(src.skip(5).unwrap(), 5);
        assert_eq!(src.skip(5).unwrap(), 3);
    }
}
