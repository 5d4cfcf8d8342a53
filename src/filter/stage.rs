//! Filter stage plumbing shared by the read and write chains.

use std::fmt;
use std::io::{self, Read, SeekFrom, Write};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};

use crate::error::Error;
use crate::io::{ByteSink, ByteSource, write_all_to};
use crate::{ProviderError, READ_BUFFER_SIZE};

/// Name of the raw stage that talks to the source or sink.
pub(crate) const RAW_STAGE: &str = "none";

/// Acquires a mutex lock, recovering from poisoned state if necessary.
///
/// The guarded source or sink carries no invariants a panic could break
/// half-way; a poisoned lock only means another stage panicked mid-call.
pub(crate) fn lock_or_recover<T: ?Sized>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| {
        log::warn!("filter stage mutex was poisoned, recovering");
        poisoned.into_inner()
    })
}

/// An I/O error annotated with the stage that raised it.
#[derive(Debug)]
pub(crate) struct StageFailure {
    stage: &'static str,
    source: io::Error,
}

impl fmt::Display for StageFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} stage: {}", self.stage, self.source)
    }
}

impl std::error::Error for StageFailure {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        Some(&self.source)
    }
}

/// Tags an error with its stage unless an inner stage or a provider already did.
pub(crate) fn tag(stage: &'static str, err: io::Error) -> io::Error {
    let already = err
        .get_ref()
        .is_some_and(|inner| inner.is::<StageFailure>() || inner.is::<ProviderError>());
    if already {
        return err;
    }
    io::Error::new(err.kind(), StageFailure { stage, source: err })
}

/// Converts an I/O error surfacing from a chain into a session error.
pub(crate) fn stage_error(err: io::Error) -> Error {
    if !err
        .get_ref()
        .is_some_and(|inner| inner.is::<StageFailure>())
    {
        return Error::from(err);
    }
    match err.into_inner().map(|inner| inner.downcast::<StageFailure>()) {
        Some(Ok(failure)) => {
            let StageFailure { stage, source } = *failure;
            if stage == RAW_STAGE {
                Error::from(source)
            } else {
                Error::filter(stage, source)
            }
        }
        _ => Error::Io(io::Error::other("stage error payload lost")),
    }
}

/// A readable stage of the read chain.
pub(crate) trait Stage: Read + Send {
    /// Skips forward up to `n` bytes.
    fn skip(&mut self, n: u64) -> io::Result<u64> {
        let mut scratch = [0u8; READ_BUFFER_SIZE];
        let mut skipped = 0u64;
        while skipped < n {
            let want = (n - skipped).min(scratch.len() as u64) as usize;
            match self.read(&mut scratch[..want]) {
                Ok(0) => break,
                Ok(k) => skipped += k as u64,
                Err(e) if e.kind() == io::ErrorKind::Interrupted => {}
                Err(e) => return Err(e),
            }
        }
        Ok(skipped)
    }

    /// Repositions the stage.
    fn seek(&mut self, pos: SeekFrom) -> io::Result<u64> {
        let _ = pos;
        Err(io::Error::new(
            io::ErrorKind::Unsupported,
            "stage does not support seeking",
        ))
    }

    /// Returns true if [`seek`](Self::seek) works.
    fn can_seek(&self) -> bool {
        false
    }
}

impl<S: Stage + ?Sized> Stage for Box<S> {
    fn skip(&mut self, n: u64) -> io::Result<u64> {
        (**self).skip(n)
    }

    fn seek(&mut self, pos: SeekFrom) -> io::Result<u64> {
        (**self).seek(pos)
    }

    fn can_seek(&self) -> bool {
        (**self).can_seek()
    }
}

pub(crate) type SharedSource = Arc<Mutex<Box<dyn ByteSource>>>;

/// The raw stage: reads the source and counts bytes.
pub(crate) struct SourceStage {
    source: SharedSource,
    bytes: Arc<AtomicU64>,
    seekable: bool,
}

impl SourceStage {
    pub(crate) fn new(source: SharedSource, bytes: Arc<AtomicU64>) -> Self {
        let seekable = lock_or_recover(&source).can_seek();
        Self {
            source,
            bytes,
            seekable,
        }
    }
}

impl Read for SourceStage {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        let n = lock_or_recover(&self.source)
            .read(buf)
            .map_err(|e| tag(RAW_STAGE, e))?;
        self.bytes.fetch_add(n as u64, Ordering::Relaxed);
        Ok(n)
    }
}

impl Stage for SourceStage {
    fn skip(&mut self, n: u64) -> io::Result<u64> {
        let k = lock_or_recover(&self.source)
            .skip(n)
            .map_err(|e| tag(RAW_STAGE, e))?;
        self.bytes.fetch_add(k, Ordering::Relaxed);
        Ok(k)
    }

    fn seek(&mut self, pos: SeekFrom) -> io::Result<u64> {
        lock_or_recover(&self.source)
            .seek(pos)
            .map_err(|e| tag(RAW_STAGE, e))
    }

    fn can_seek(&self) -> bool {
        self.seekable
    }
}

/// A decompression stage: a decoder plus byte accounting and error tagging.
pub(crate) struct DecodedStage {
    inner: Box<dyn Read + Send>,
    name: &'static str,
    bytes: Arc<AtomicU64>,
}

impl DecodedStage {
    pub(crate) fn new(inner: Box<dyn Read + Send>, name: &'static str, bytes: Arc<AtomicU64>) -> Self {
        Self { inner, name, bytes }
    }
}

impl fmt::Debug for DecodedStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DecodedStage")
            .field("name", &self.name)
            .finish_non_exhaustive()
    }
}

impl Read for DecodedStage {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        let n = self.inner.read(buf).map_err(|e| tag(self.name, e))?;
        self.bytes.fetch_add(n as u64, Ordering::Relaxed);
        Ok(n)
    }
}

impl Stage for DecodedStage {}

/// A stage with a look-ahead buffer.
///
/// Peeked bytes are replayed by later reads, so signature probes never
/// consume input irrevocably.
pub(crate) struct PeekReader<R> {
    inner: R,
    buf: Vec<u8>,
    pos: usize,
    eof: bool,
}

impl<R: Stage> PeekReader<R> {
    pub(crate) fn new(inner: R) -> Self {
        Self {
            inner,
            buf: Vec::new(),
            pos: 0,
            eof: false,
        }
    }

    fn buffered(&self) -> usize {
        self.buf.len() - self.pos
    }

    /// Returns up to `n` upcoming bytes without consuming them.
    ///
    /// Fewer than `n` bytes are returned only at end of stream.
    pub(crate) fn peek(&mut self, n: usize) -> io::Result<&[u8]> {
        if self.buffered() < n && self.pos > 0 {
            self.buf.drain(..self.pos);
            self.pos = 0;
        }
        while self.buf.len() < n && !self.eof {
            let old = self.buf.len();
            let want = (n - old).max(READ_BUFFER_SIZE);
            self.buf.resize(old + want, 0);
            match self.inner.read(&mut self.buf[old..]) {
                Ok(0) => {
                    self.buf.truncate(old);
                    self.eof = true;
                }
                Ok(k) => self.buf.truncate(old + k),
                Err(e) if e.kind() == io::ErrorKind::Interrupted => self.buf.truncate(old),
                Err(e) => {
                    self.buf.truncate(old);
                    return Err(e);
                }
            }
        }
        let end = (self.pos + n).min(self.buf.len());
        Ok(&self.buf[self.pos..end])
    }

    fn reset_buffer(&mut self) {
        self.buf.clear();
        self.pos = 0;
        self.eof = false;
    }
}

impl<R: Stage> Read for PeekReader<R> {
    fn read(&mut self, out: &mut [u8]) -> io::Result<usize> {
        if self.buffered() > 0 {
            let n = out.len().min(self.buffered());
            out[..n].copy_from_slice(&self.buf[self.pos..self.pos + n]);
            self.pos += n;
            if self.pos == self.buf.len() {
                self.buf.clear();
                self.pos = 0;
            }
            return Ok(n);
        }
        if self.eof {
            return Ok(0);
        }
        self.inner.read(out)
    }
}

impl<R: Stage> Stage for PeekReader<R> {
    fn skip(&mut self, n: u64) -> io::Result<u64> {
        let from_buf = (self.buffered() as u64).min(n);
        self.pos += from_buf as usize;
        if self.pos == self.buf.len() {
            self.buf.clear();
            self.pos = 0;
        }
        if from_buf == n || self.eof {
            return Ok(from_buf);
        }
        Ok(from_buf + self.inner.skip(n - from_buf)?)
    }

    fn seek(&mut self, pos: SeekFrom) -> io::Result<u64> {
        let target = match pos {
            SeekFrom::Current(delta) => SeekFrom::Current(delta - self.buffered() as i64),
            other => other,
        };
        let new_pos = self.inner.seek(target)?;
        self.reset_buffer();
        Ok(new_pos)
    }

    fn can_seek(&self) -> bool {
        self.inner.can_seek()
    }
}

/// A writable stage of the write chain.
pub(crate) trait StageWriter: Write + Send {
    /// Flushes this stage's trailer, then finishes every stage below it.
    fn finish(self: Box<Self>) -> io::Result<()>;
}

/// A compression stage: an encoder plus byte accounting and error tagging.
pub(crate) struct EncodedStage {
    inner: Box<dyn StageWriter>,
    name: &'static str,
    bytes: Arc<AtomicU64>,
}

impl EncodedStage {
    pub(crate) fn new(inner: Box<dyn StageWriter>, name: &'static str, bytes: Arc<AtomicU64>) -> Self {
        Self { inner, name, bytes }
    }
}

impl Write for EncodedStage {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        let n = self.inner.write(buf).map_err(|e| tag(self.name, e))?;
        self.bytes.fetch_add(n as u64, Ordering::Relaxed);
        Ok(n)
    }

    fn flush(&mut self) -> io::Result<()> {
        self.inner.flush().map_err(|e| tag(self.name, e))
    }
}

impl StageWriter for EncodedStage {
    fn finish(self: Box<Self>) -> io::Result<()> {
        let name = self.name;
        self.inner.finish().map_err(|e| tag(name, e))
    }
}

/// Output blocking of the raw write stage.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct Blocking {
    /// Size of every full write to the sink; 0 writes through unbuffered.
    pub(crate) bytes_per_block: usize,
    /// The final block is padded to a multiple of this; 1 disables padding.
    pub(crate) bytes_in_last_block: usize,
}

impl Blocking {
    /// Every write goes straight to the sink.
    pub(crate) const UNBLOCKED: Blocking = Blocking {
        bytes_per_block: 0,
        bytes_in_last_block: 1,
    };
}

/// Sink state shared between the raw stage and the chain owner.
pub(crate) struct SinkSlot {
    sink: Box<dyn ByteSink>,
    block: Vec<u8>,
    blocking: Blocking,
    discard: bool,
    closed: bool,
}

impl SinkSlot {
    pub(crate) fn new(sink: Box<dyn ByteSink>, blocking: Blocking) -> Self {
        Self {
            sink,
            block: Vec::with_capacity(blocking.bytes_per_block),
            blocking,
            discard: false,
            closed: false,
        }
    }

    fn write(&mut self, mut buf: &[u8]) -> io::Result<usize> {
        let total = buf.len();
        if self.discard {
            return Ok(total);
        }
        if self.closed {
            return Err(io::Error::new(
                io::ErrorKind::NotConnected,
                "sink is already closed",
            ));
        }
        let block_size = self.blocking.bytes_per_block;
        if block_size == 0 {
            write_all_to(&mut self.sink, buf)?;
            return Ok(total);
        }
        while !buf.is_empty() {
            let room = block_size - self.block.len();
            let take = room.min(buf.len());
            self.block.extend_from_slice(&buf[..take]);
            buf = &buf[take..];
            if self.block.len() == block_size {
                write_all_to(&mut self.sink, &self.block)?;
                self.block.clear();
            }
        }
        Ok(total)
    }

    /// Pads and writes the final partial block, then closes the sink.
    fn finish(&mut self) -> io::Result<()> {
        if self.closed {
            return Ok(());
        }
        if !self.block.is_empty() && !self.discard {
            let last = self.blocking.bytes_in_last_block.max(1);
            let padded = self.block.len().div_ceil(last) * last;
            let padded = padded.min(self.blocking.bytes_per_block.max(self.block.len()));
            self.block.resize(padded, 0);
            write_all_to(&mut self.sink, &self.block)?;
            self.block.clear();
        }
        self.closed = true;
        self.sink.flush()?;
        self.sink.close()
    }

    /// Drops buffered output and closes the sink.
    pub(crate) fn abort(&mut self) -> io::Result<()> {
        self.discard = true;
        self.block.clear();
        if self.closed {
            return Ok(());
        }
        self.closed = true;
        self.sink.close()
    }

    pub(crate) fn set_discard(&mut self) {
        self.discard = true;
    }

    pub(crate) fn is_closed(&self) -> bool {
        self.closed
    }
}

pub(crate) type SharedSink = Arc<Mutex<SinkSlot>>;

/// The raw write stage: block-buffers output into the sink.
pub(crate) struct SinkStage {
    slot: SharedSink,
    bytes: Arc<AtomicU64>,
}

impl SinkStage {
    pub(crate) fn new(slot: SharedSink, bytes: Arc<AtomicU64>) -> Self {
        Self { slot, bytes }
    }
}

impl Write for SinkStage {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        let n = lock_or_recover(&self.slot)
            .write(buf)
            .map_err(|e| tag(RAW_STAGE, e))?;
        self.bytes.fetch_add(n as u64, Ordering::Relaxed);
        Ok(n)
    }

    fn flush(&mut self) -> io::Result<()> {
        let mut slot = lock_or_recover(&self.slot);
        if slot.discard || slot.closed {
            return Ok(());
        }
        slot.sink.flush().map_err(|e| tag(RAW_STAGE, e))
    }
}

impl StageWriter for SinkStage {
    fn finish(self: Box<Self>) -> io::Result<()> {
        lock_or_recover(&self.slot)
            .finish()
            .map_err(|e| tag(RAW_STAGE, e))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::io::{MemorySink, MemorySource};

    fn source_stage(data: &[u8]) -> (SourceStage, Arc<AtomicU64>) {
        let bytes = Arc::new(AtomicU64::new(0));
        let source: Box<dyn ByteSource> = Box::new(MemorySource::new(data.to_vec()));
        (
            SourceStage::new(Arc::new(Mutex::new(source)), Arc::clone(&bytes)),
            bytes,
        )
    }

    #[test]
    fn test_peek_does_not_consume() {
        let (stage, _) = source_stage(b"hello world");
        let mut reader = PeekReader::new(stage);
        assert_eq!(reader.peek(5).unwrap(), b"hello");
        assert_eq!(reader.peek(100).unwrap(), b"hello world");
        let mut out = Vec::new();
        reader.read_to_end(&mut out).unwrap();
        assert_eq!(out, b"hello world");
    }

    #[test]
    fn test_peek_short_stream() {
        let (stage, _) = source_stage(b"x");
        let mut reader = PeekReader::new(stage);
        assert_eq!(reader.peek(16).unwrap(), b"x");
        assert_eq!(reader.peek(16).unwrap(), b"x");
    }

    #[test]
    fn test_skip_and_seek_through_buffer() {
        let (stage, bytes) = source_stage(b"0123456789");
        let mut reader = PeekReader::new(stage);
        reader.peek(4).unwrap();
        assert_eq!(reader.skip(6).unwrap(), 6);
        let mut b = [0u8; 2];
        reader.read_exact(&mut b).unwrap();
        assert_eq!(&b, b"67");
        assert!(reader.can_seek());
        reader.seek(SeekFrom::Start(1)).unwrap();
        reader.read_exact(&mut b).unwrap();
        assert_eq!(&b, b"12");
        assert!(bytes.load(Ordering::Relaxed) >= 10);
    }

    #[test]
    fn test_stage_error_unwraps_raw_failures() {
        let err = tag(RAW_STAGE, io::Error::new(io::ErrorKind::BrokenPipe, "gone"));
        assert!(matches!(stage_error(err), Error::Io(_)));

        let err = tag("gzip", io::Error::new(io::ErrorKind::InvalidData, "bad"));
        assert!(matches!(stage_error(err), Error::Filter { filter: "gzip", .. }));

        // The innermost tag wins
        let inner = tag("bzip2", io::Error::new(io::ErrorKind::InvalidData, "crc"));
        let outer = tag("gzip", inner);
        assert!(matches!(stage_error(outer), Error::Filter { filter: "bzip2", .. }));

        let err = tag("gzip", ProviderError::new(9, "net").into_io());
        assert!(matches!(stage_error(err), Error::Provider { code: 9, .. }));
    }

    #[test]
    fn test_sink_blocking_pads_last_block() {
        let sink = MemorySink::new();
        let slot = Arc::new(Mutex::new(SinkSlot::new(
            Box::new(sink.clone()),
            Blocking {
                bytes_per_block: 8,
                bytes_in_last_block: 4,
            },
        )));
        let mut stage: Box<dyn StageWriter> =
            Box::new(SinkStage::new(Arc::clone(&slot), Arc::new(AtomicU64::new(0))));
        stage.write_all(b"0123456789").unwrap();
        assert_eq!(sink.len(), 8);
        stage.finish().unwrap();
        assert_eq!(sink.contents(), b"0123456789\0\0");
        assert!(lock_or_recover(&slot).is_closed());
    }

    #[test]
    fn test_sink_abort_discards() {
        let sink = MemorySink::new();
        let slot = Arc::new(Mutex::new(SinkSlot::new(
            Box::new(sink.clone()),
            Blocking {
                bytes_per_block: 16,
                bytes_in_last_block: 1,
            },
        )));
        let mut stage = SinkStage::new(Arc::clone(&slot), Arc::new(AtomicU64::new(0)));
        stage.write_all(b"abc").unwrap();
        lock_or_recover(&slot).abort().unwrap();
        stage.write_all(b"late").unwrap();
        assert!(sink.is_empty());
    }
}
