//! Byte sources and sinks.
//!
//! A [`ByteSource`] is the raw end of a read session and a [`ByteSink`] the
//! raw end of a write session. Both are single capability objects: a custom
//! provider (network stream, tape device, callback bridge) implements the
//! trait once instead of registering separate open/read/seek/close hooks.
//!
//! Failures are reported as `std::io::Error`. A provider that wants its own
//! code and message to reach the caller wraps a
//! [`ProviderError`](crate::ProviderError):
//!
//! ```rust
//! use std::io;
//! use arcstream::ProviderError;
//! use arcstream::io::ByteSource;
//!
//! struct Tape {
//!     remaining: usize,
//! }
//!
//! impl ByteSource for Tape {
//!     fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
//!         if self.remaining == 0 {
//!             return Err(ProviderError::new(7, "tape ended early").into_io());
//!         }
//!         let n = buf.len().min(self.remaining);
//!         buf[..n].fill(0);
//!         self.remaining -= n;
//!         Ok(n)
//!     }
//! }
//! ```
//!
//! Random access is optional. Sources that cannot seek keep the default
//! [`seek`](ByteSource::seek), and the session falls back to forward skipping
//! by reading.

mod sink;
mod source;

pub use sink::{FileSink, MemorySink, WriterSink};
pub use source::{FileSource, MemorySource, ReaderSource, SeekableSource};

use std::io::{self, SeekFrom};

use crate::READ_BUFFER_SIZE;

/// A pull-based byte provider.
pub trait ByteSource: Send {
    /// Prepares the source for reading. Called once before the first read.
    fn open(&mut self) -> io::Result<()> {
        Ok(())
    }

    /// Reads up to `buf.len()` bytes. `Ok(0)` means end of stream.
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize>;

    /// Skips forward up to `n` bytes and returns how many were skipped.
    ///
    /// A result smaller than `n` means the stream ended. The default reads
    /// and discards.
    fn skip(&mut self, n: u64) -> io::Result<u64> {
        skip_by_reading(self, n)
    }

    /// Repositions the source. The default reports `Unsupported`.
    fn seek(&mut self, pos: SeekFrom) -> io::Result<u64> {
        let _ = pos;
        Err(io::Error::new(
            io::ErrorKind::Unsupported,
            "source does not support seeking",
        ))
    }

    /// Returns true if [`seek`](Self::seek) is implemented.
    fn can_seek(&self) -> bool {
        false
    }

    /// Releases the underlying resource. Called once when the session ends.
    fn close(&mut self) -> io::Result<()> {
        Ok(())
    }
}

/// A push-based byte consumer.
pub trait ByteSink: Send {
    /// Prepares the sink for writing. Called once before the first write.
    fn open(&mut self) -> io::Result<()> {
        Ok(())
    }

    /// Writes some bytes and returns how many were accepted.
    fn write(&mut self, buf: &[u8]) -> io::Result<usize>;

    /// Flushes buffered bytes to the underlying medium.
    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }

    /// Releases the underlying resource. Called once when the session ends.
    fn close(&mut self) -> io::Result<()> {
        Ok(())
    }
}

impl<S: ByteSource + ?Sized> ByteSource for Box<S> {
    fn open(&mut self) -> io::Result<()> {
        (**self).open()
    }

    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        (**self).read(buf)
    }

    fn skip(&mut self, n: u64) -> io::Result<u64> {
        (**self).skip(n)
    }

    fn seek(&mut self, pos: SeekFrom) -> io::Result<u64> {
        (**self).seek(pos)
    }

    fn can_seek(&self) -> bool {
        (**self).can_seek()
    }

    fn close(&mut self) -> io::Result<()> {
        (**self).close()
    }
}

impl<S: ByteSink + ?Sized> ByteSink for Box<S> {
    fn open(&mut self) -> io::Result<()> {
        (**self).open()
    }

    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        (**self).write(buf)
    }

    fn flush(&mut self) -> io::Result<()> {
        (**self).flush()
    }

    fn close(&mut self) -> io::Result<()> {
        (**self).close()
    }
}

/// Writes a whole buffer to a sink, retrying short writes.
pub(crate) fn write_all_to<S: ByteSink + ?Sized>(sink: &mut S, mut buf: &[u8]) -> io::Result<()> {
    while !buf.is_empty() {
        match sink.write(buf) {
            Ok(0) => {
                return Err(io::Error::new(
                    io::ErrorKind::WriteZero,
                    "sink accepted no bytes",
                ));
            }
            Ok(n) => buf = &buf[n..],
            Err(e) if e.kind() == io::ErrorKind::Interrupted => {}
            Err(e) => return Err(e),
        }
    }
    Ok(())
}

pub(crate) fn skip_by_reading<S: ByteSource + ?Sized>(source: &mut S, n: u64) -> io::Result<u64> {
    let mut scratch = [0u8; READ_BUFFER_SIZE];
    let mut skipped = 0u64;
    while skipped < n {
        let want = (n - skipped).min(scratch.len() as u64) as usize;
        match source.read(&mut scratch[..want]) {
            Ok(0) => break,
            Ok(read) => skipped += read as u64,
            Err(e) if e.kind() == io::ErrorKind::Interrupted => {}
            Err(e) => return Err(e),
        }
    }
    Ok(skipped)
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Counting {
        left: usize,
    }

    impl ByteSource for Counting {
        fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
            let n = buf.len().min(self.left).min(3);
            self.left -= n;
            Ok(n)
        }
    }

    #[test]
    fn test_default_skip_reads_and_stops_at_eof() {
        let mut src = Counting { left: 10 };
        assert_eq!(src.skip(4).unwrap(), 4);
        assert_eq!(src.skip(100).unwrap(), 6);
        assert_eq!(src.skip(1).unwrap(), 0);
    }

    #[test]
    fn test_default_seek_is_unsupported() {
        let mut src = Counting { left: 1 };
        assert!(!src.can_seek());
        let err = src.seek(SeekFrom::Start(0)).unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::Unsupported);
    }

    struct Trickle(Vec<u8>);

    impl ByteSink for Trickle {
        fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
            let n = buf.len().min(2);
            self.0.extend_from_slice(&buf[..n]);
            Ok(n)
        }
    }

    #[test]
    fn test_write_all_retries_short_writes() {
        let mut sink = Trickle(Vec::new());
        write_all_to(&mut sink, b"hello").unwrap();
        assert_eq!(sink.0, b"hello");
    }
}
