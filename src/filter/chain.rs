//! Read and write filter chains.

use std::io::{self, SeekFrom, Write};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use super::stage::{
    Blocking, DecodedStage, EncodedStage, PeekReader, SharedSink, SharedSource, SinkSlot,
    SinkStage, SourceStage, Stage, StageWriter, lock_or_recover, stage_error,
};
use super::{Filter, FilterCode, FilterInfo, MAX_FILTER_DEPTH, PROBE_SIZE, lookup, registry};
use crate::io::{ByteSink, ByteSource};
use crate::options::OptionSet;
use crate::{Error, Result};

/// Byte accounting for one stage.
#[derive(Debug, Clone)]
struct StageRecord {
    code: FilterCode,
    bytes: Arc<AtomicU64>,
}

impl StageRecord {
    fn new(code: FilterCode) -> Self {
        Self {
            code,
            bytes: Arc::new(AtomicU64::new(0)),
        }
    }

    fn info(&self) -> FilterInfo {
        FilterInfo {
            code: self.code,
            name: self.code.name(),
            bytes: self.bytes.load(Ordering::Relaxed),
        }
    }
}

/// The decoded stream handed to a format codec.
///
/// Tracks the absolute decoded offset of the next byte the codec will see.
/// Offsets count from where the source stood when the chain opened.
pub(crate) struct ReadStream {
    inner: PeekReader<Box<dyn Stage>>,
    position: u64,
    /// Source offset of decoded offset 0.
    base: u64,
    seekable: bool,
}

impl ReadStream {
    /// Absolute decoded offset of the next unread byte.
    pub(crate) fn position(&self) -> u64 {
        self.position
    }

    /// Reads up to `buf.len()` bytes; `Ok(0)` at end of stream.
    pub(crate) fn read(&mut self, buf: &mut [u8]) -> Result<usize> {
        loop {
            match io::Read::read(&mut self.inner, buf) {
                Ok(n) => {
                    self.position += n as u64;
                    return Ok(n);
                }
                Err(e) if e.kind() == io::ErrorKind::Interrupted => {}
                Err(e) => return Err(stage_error(e)),
            }
        }
    }

    /// Reads until `buf` is full or the stream ends; returns the byte count.
    pub(crate) fn read_full(&mut self, buf: &mut [u8]) -> Result<usize> {
        let mut filled = 0;
        while filled < buf.len() {
            let n = self.read(&mut buf[filled..])?;
            if n == 0 {
                break;
            }
            filled += n;
        }
        Ok(filled)
    }

    /// Reads exactly `buf.len()` bytes or fails with [`Error::Truncated`].
    pub(crate) fn read_exact(&mut self, buf: &mut [u8]) -> Result<()> {
        let start = self.position;
        if self.read_full(buf)? < buf.len() {
            return Err(Error::Truncated {
                offset: start.max(self.position),
            });
        }
        Ok(())
    }

    /// Returns up to `n` upcoming bytes without consuming them.
    pub(crate) fn peek(&mut self, n: usize) -> Result<&[u8]> {
        self.inner.peek(n).map_err(stage_error)
    }

    /// Skips up to `n` bytes and returns how many were skipped.
    pub(crate) fn skip(&mut self, n: u64) -> Result<u64> {
        let skipped = self.inner.skip(n).map_err(stage_error)?;
        self.position += skipped;
        Ok(skipped)
    }

    /// Skips exactly `n` bytes or fails with [`Error::Truncated`].
    pub(crate) fn skip_exact(&mut self, n: u64) -> Result<()> {
        if self.skip(n)? < n {
            return Err(Error::Truncated {
                offset: self.position,
            });
        }
        Ok(())
    }

    /// Returns true if [`seek_to`](Self::seek_to) is possible: the source
    /// can seek and no filter is installed.
    pub(crate) fn can_seek(&self) -> bool {
        self.seekable
    }

    /// Moves to an absolute decoded offset.
    pub(crate) fn seek_to(&mut self, offset: u64) -> Result<()> {
        if !self.seekable {
            return Err(Error::NotSupported {
                operation: "seek on a filtered or sequential stream",
            });
        }
        let target = self
            .base
            .checked_add(offset)
            .ok_or_else(|| Error::protocol("seek offset overflows the source"))?;
        let actual = self
            .inner
            .seek(SeekFrom::Start(target))
            .map_err(stage_error)?;
        self.position = actual.checked_sub(self.base).ok_or_else(|| {
            Error::protocol("seek landed before the start of the archive")
        })?;
        Ok(())
    }
}

/// The read side of a session's filter chain.
pub(crate) struct ReadChain {
    stream: ReadStream,
    /// Decompression stages, outermost (closest to the source) first.
    stages: Vec<StageRecord>,
    raw: StageRecord,
    source: SharedSource,
    closed: bool,
}

impl ReadChain {
    /// Opens `source` and builds the chain.
    ///
    /// `forced` filters are installed in order without probing. Otherwise the
    /// stream is probed, restricted to `allowed` when given.
    pub(crate) fn open(
        mut source: Box<dyn ByteSource>,
        allowed: Option<&[FilterCode]>,
        forced: &[FilterCode],
    ) -> Result<Self> {
        source.open().map_err(Error::from)?;
        let seekable = source.can_seek();
        // The archive may start part-way into a seekable source.
        let base = if seekable {
            source.seek(SeekFrom::Current(0)).map_err(Error::from)?
        } else {
            0
        };
        let source: SharedSource = Arc::new(Mutex::new(source));
        let raw = StageRecord::new(FilterCode::None);

        let mut chain = Self {
            stream: ReadStream {
                inner: PeekReader::new(Box::new(SourceStage::new(
                    Arc::clone(&source),
                    Arc::clone(&raw.bytes),
                ))),
                position: 0,
                base,
                seekable,
            },
            stages: Vec::new(),
            raw,
            source,
            closed: false,
        };
        if let Err(e) = chain.install_filters(allowed, forced) {
            // The chain is unusable; release the source before reporting.
            if let Err(close_err) = chain.close() {
                log::debug!("Closing source after failed open: {}", close_err);
            }
            return Err(e);
        }
        chain.stream.seekable = seekable && chain.stages.is_empty();
        Ok(chain)
    }

    fn install_filters(
        &mut self,
        allowed: Option<&[FilterCode]>,
        forced: &[FilterCode],
    ) -> Result<()> {
        if !forced.is_empty() {
            if forced.len() > MAX_FILTER_DEPTH {
                return Err(Error::ResourceLimitExceeded(format!(
                    "{} filters requested, at most {} allowed",
                    forced.len(),
                    MAX_FILTER_DEPTH
                )));
            }
            for &code in forced {
                if code == FilterCode::None {
                    continue;
                }
                let filter = lookup(code)?;
                log::debug!("Installing forced {} filter", filter.name());
                self.install(filter)?;
            }
            return Ok(());
        }

        let candidates: Vec<&'static dyn Filter> = registry()
            .into_iter()
            .filter(|f| allowed.is_none_or(|set| set.contains(&f.code())))
            .collect();
        loop {
            let prefix = self.stream.peek(PROBE_SIZE)?;
            let Some(filter) = candidates.iter().copied().find(|f| f.bid(prefix)) else {
                break;
            };
            if self.stages.len() >= MAX_FILTER_DEPTH {
                return Err(Error::ResourceLimitExceeded(format!(
                    "filter chain deeper than {} stages",
                    MAX_FILTER_DEPTH
                )));
            }
            log::debug!(
                "Detected {} filter at depth {}",
                filter.name(),
                self.stages.len()
            );
            self.install(filter)?;
        }
        Ok(())
    }

    fn install(&mut self, filter: &'static dyn Filter) -> Result<()> {
        let record = StageRecord::new(filter.code());
        let placeholder = PeekReader::new(Box::new(EmptyStage) as Box<dyn Stage>);
        let below = std::mem::replace(&mut self.stream.inner, placeholder);
        let decoder = filter
            .decoder(Box::new(below))
            .map_err(|e| stage_error(super::stage::tag(filter.name(), e)))?;
        self.stream.inner = PeekReader::new(Box::new(DecodedStage::new(
            decoder,
            filter.name(),
            Arc::clone(&record.bytes),
        )));
        self.stages.push(record);
        Ok(())
    }

    pub(crate) fn stream(&mut self) -> &mut ReadStream {
        &mut self.stream
    }

    /// Stage statistics, the stage nearest the format first and the raw stage last.
    pub(crate) fn info(&self) -> Vec<FilterInfo> {
        self.stages
            .iter()
            .rev()
            .chain(std::iter::once(&self.raw))
            .map(StageRecord::info)
            .collect()
    }

    /// Closes the source. Later calls are no-ops.
    pub(crate) fn close(&mut self) -> Result<()> {
        if self.closed {
            return Ok(());
        }
        self.closed = true;
        lock_or_recover(&self.source).close().map_err(Error::from)
    }
}

/// Stands in for a stage while it is being moved into a decoder.
struct EmptyStage;

impl io::Read for EmptyStage {
    fn read(&mut self, _buf: &mut [u8]) -> io::Result<usize> {
        Ok(0)
    }
}

impl Stage for EmptyStage {}

/// The stream a format writer serializes into.
pub(crate) struct WriteStream {
    head: Option<Box<dyn StageWriter>>,
    position: u64,
}

impl WriteStream {
    /// Bytes accepted from the format so far.
    pub(crate) fn position(&self) -> u64 {
        self.position
    }

    /// Writes all of `data` into the chain.
    pub(crate) fn put(&mut self, data: &[u8]) -> Result<()> {
        let head = self.head.as_mut().ok_or(Error::SessionFailed)?;
        head.write_all(data).map_err(stage_error)?;
        self.position += data.len() as u64;
        Ok(())
    }

    /// Writes `n` zero bytes.
    pub(crate) fn put_zeros(&mut self, mut n: u64) -> Result<()> {
        const ZEROS: [u8; 512] = [0; 512];
        while n > 0 {
            let step = n.min(ZEROS.len() as u64) as usize;
            self.put(&ZEROS[..step])?;
            n -= step as u64;
        }
        Ok(())
    }
}

impl Write for WriteStream {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        let head = self
            .head
            .as_mut()
            .ok_or_else(|| io::Error::new(io::ErrorKind::NotConnected, "chain is closed"))?;
        let n = head.write(buf)?;
        self.position += n as u64;
        Ok(n)
    }

    fn flush(&mut self) -> io::Result<()> {
        match self.head.as_mut() {
            Some(head) => head.flush(),
            None => Ok(()),
        }
    }
}

/// The write side of a session's filter chain.
pub(crate) struct WriteChain {
    stream: WriteStream,
    /// Compression stages in application order.
    stages: Vec<StageRecord>,
    raw: StageRecord,
    sink: SharedSink,
}

impl WriteChain {
    /// Opens `sink` and stacks `filters` on it; `filters[0]` receives the format output.
    pub(crate) fn open(
        mut sink: Box<dyn ByteSink>,
        filters: &[FilterCode],
        options: &OptionSet,
        blocking: Blocking,
    ) -> Result<Self> {
        let filters: Vec<FilterCode> = filters
            .iter()
            .copied()
            .filter(|&c| c != FilterCode::None)
            .collect();
        // Resolve everything before touching the sink
        let resolved = filters
            .iter()
            .map(|&c| lookup(c))
            .collect::<Result<Vec<_>>>()?;

        sink.open().map_err(Error::from)?;
        let sink: SharedSink = Arc::new(Mutex::new(SinkSlot::new(sink, blocking)));
        let raw = StageRecord::new(FilterCode::None);
        let mut head: Box<dyn StageWriter> =
            Box::new(SinkStage::new(Arc::clone(&sink), Arc::clone(&raw.bytes)));

        let mut stages = Vec::with_capacity(resolved.len());
        for filter in resolved.iter().rev() {
            let record = StageRecord::new(filter.code());
            let module = options.for_module(filter.name());
            let encoder = match filter.encoder(head, &module) {
                Ok(encoder) => encoder,
                Err(e) => {
                    if let Err(abort_err) = lock_or_recover(&sink).abort() {
                        log::warn!("Closing sink after failed encoder setup: {}", abort_err);
                    }
                    return Err(e);
                }
            };
            head = Box::new(EncodedStage::new(
                encoder,
                filter.name(),
                Arc::clone(&record.bytes),
            ));
            stages.push(record);
        }
        stages.reverse();
        log::debug!(
            "Write chain: {}",
            stages
                .iter()
                .map(|s| s.code.name())
                .chain(std::iter::once("none"))
                .collect::<Vec<_>>()
                .join(" -> ")
        );

        Ok(Self {
            stream: WriteStream {
                head: Some(head),
                position: 0,
            },
            stages,
            raw,
            sink,
        })
    }

    pub(crate) fn stream(&mut self) -> &mut WriteStream {
        &mut self.stream
    }

    /// Stage statistics, the stage nearest the format first and the raw stage last.
    pub(crate) fn info(&self) -> Vec<FilterInfo> {
        self.stages
            .iter()
            .chain(std::iter::once(&self.raw))
            .map(StageRecord::info)
            .collect()
    }

    /// Flushes every stage trailer and closes the sink.
    pub(crate) fn finish(&mut self) -> Result<()> {
        match self.stream.head.take() {
            Some(head) => head.finish().map_err(stage_error),
            None => Ok(()),
        }
    }

    /// Drops buffered output and closes the sink without trailers.
    pub(crate) fn abort(&mut self) -> Result<()> {
        lock_or_recover(&self.sink).set_discard();
        // Encoders may emit their trailers on drop; the sink discards them
        drop(self.stream.head.take());
        lock_or_recover(&self.sink).abort().map_err(Error::from)
    }

    /// Returns true once the sink has been closed.
    pub(crate) fn is_closed(&self) -> bool {
        lock_or_recover(&self.sink).is_closed()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::io::{MemorySink, MemorySource};

    #[test]
    fn test_plain_stream_has_only_raw_stage() {
        let mut chain =
            ReadChain::open(Box::new(MemorySource::new(b"plain".to_vec())), None, &[]).unwrap();
        let mut buf = [0u8; 16];
        let n = chain.stream().read_full(&mut buf).unwrap();
        assert_eq!(&buf[..n], b"plain");
        let info = chain.info();
        assert_eq!(info.len(), 1);
        assert_eq!(info[0].code, FilterCode::None);
        assert_eq!(info[0].bytes, 5);
        assert!(chain.stream().can_seek());
        chain.close().unwrap();
        chain.close().unwrap();
    }

    #[test]
    fn test_empty_stream_is_not_an_error() {
        let mut chain = ReadChain::open(Box::new(MemorySource::new(Vec::new())), None, &[]).unwrap();
        assert!(chain.stream().peek(10).unwrap().is_empty());
    }

    #[test]
    fn test_read_exact_reports_truncation() {
        let mut chain =
            ReadChain::open(Box::new(MemorySource::new(vec![1u8; 3])), None, &[]).unwrap();
        let mut buf = [0u8; 4];
        assert!(matches!(
            chain.stream().read_exact(&mut buf),
            Err(Error::Truncated { .. })
        ));
    }

    #[cfg(feature = "deflate")]
    #[test]
    fn test_forced_filter_skips_probing() {
        let mut chain = ReadChain::open(
            Box::new(MemorySource::new(b"not compressed at all".to_vec())),
            None,
            &[FilterCode::Gzip],
        )
        .unwrap();
        let mut buf = [0u8; 8];
        let err = chain.stream().read(&mut buf).unwrap_err();
        assert!(matches!(err, Error::Filter { filter: "gzip", .. }));
        assert!(err.is_fatal());
    }

    #[cfg(feature = "deflate")]
    #[test]
    fn test_write_then_detect_gzip() {
        let sink = MemorySink::new();
        let mut chain = WriteChain::open(
            Box::new(sink.clone()),
            &[FilterCode::Gzip],
            &OptionSet::new(),
            Blocking::UNBLOCKED,
        )
        .unwrap();
        chain.stream().put(b"hello gzip").unwrap();
        assert_eq!(chain.info().len(), 2);
        chain.finish().unwrap();
        assert!(chain.is_closed());
        let info = chain.info();
        assert_eq!(info[0].code, FilterCode::Gzip);
        assert_eq!(info[0].bytes, 10);

        let mut read = ReadChain::open(Box::new(MemorySource::new(sink.contents())), None, &[])
            .unwrap();
        let mut buf = [0u8; 32];
        let n = read.stream().read_full(&mut buf).unwrap();
        assert_eq!(&buf[..n], b"hello gzip");
        assert!(!read.stream().can_seek());
        let names: Vec<&str> = read.info().iter().map(|i| i.name).collect();
        assert_eq!(names, vec!["gzip", "none"]);
    }

    #[cfg(feature = "deflate")]
    #[test]
    fn test_allowed_set_disables_detection() {
        let sink = MemorySink::new();
        let mut chain = WriteChain::open(
            Box::new(sink.clone()),
            &[FilterCode::Gzip],
            &OptionSet::new(),
            Blocking::UNBLOCKED,
        )
        .unwrap();
        chain.stream().put(b"data").unwrap();
        chain.finish().unwrap();

        let read = ReadChain::open(
            Box::new(MemorySource::new(sink.contents())),
            Some(&[FilterCode::Bzip2]),
            &[],
        )
        .unwrap();
        assert_eq!(read.info().len(), 1);
    }

    #[cfg(feature = "deflate")]
    #[test]
    fn test_abort_writes_nothing() {
        let sink = MemorySink::new();
        let mut chain = WriteChain::open(
            Box::new(sink.clone()),
            &[FilterCode::Gzip],
            &OptionSet::new(),
            Blocking {
                bytes_per_block: 10240,
                bytes_in_last_block: 1,
            },
        )
        .unwrap();
        chain.stream().put(&[7u8; 100]).unwrap();
        chain.abort().unwrap();
        assert!(sink.is_empty());
        assert!(chain.is_closed());
    }

    #[cfg(feature = "deflate")]
    #[test]
    fn test_encoder_setup_error_wins_over_close_error() {
        struct StubbornSink;

        impl ByteSink for StubbornSink {
            fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
                Ok(buf.len())
            }

            fn close(&mut self) -> io::Result<()> {
                Err(io::Error::other("close refused"))
            }
        }

        let options = OptionSet::parse("gzip:compression-level=99").unwrap();
        let err = WriteChain::open(
            Box::new(StubbornSink),
            &[FilterCode::Gzip],
            &options,
            Blocking::UNBLOCKED,
        )
        .err()
        .unwrap();
        assert!(matches!(err, Error::InvalidOption { ref key, .. } if key == "compression-level"));
    }
}
