//! LZ4 frame filter.

use std::io::{self, Read, Write};

use lz4_flex::frame::{FrameDecoder, FrameEncoder};

use super::stage::{Stage, StageWriter};
use super::{Filter, FilterCode};
use crate::Result;
use crate::options::ModuleOptions;

const MAGIC: [u8; 4] = [0x04, 0x22, 0x4D, 0x18];

/// LZ4 frame format.
#[derive(Debug, Clone, Copy)]
pub(crate) struct Lz4Filter;

impl Filter for Lz4Filter {
    fn code(&self) -> FilterCode {
        FilterCode::Lz4
    }

    fn min_probe(&self) -> usize {
        MAGIC.len()
    }

    fn matches(&self, prefix: &[u8]) -> bool {
        prefix[..4] == MAGIC
    }

    fn decoder(&self, input: Box<dyn Stage>) -> io::Result<Box<dyn Read + Send>> {
        Ok(Box::new(FrameDecoder::new(input)))
    }

    fn encoder(
        &self,
        output: Box<dyn StageWriter>,
        _options: &ModuleOptions<'_>,
    ) -> Result<Box<dyn StageWriter>> {
        Ok(Box::new(Lz4Writer {
            inner: FrameEncoder::new(output),
        }))
    }
}

struct Lz4Writer {
    inner: FrameEncoder<Box<dyn StageWriter>>,
}

impl Write for Lz4Writer {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.inner.write(buf)
    }

    fn flush(&mut self) -> io::Result<()> {
        self.inner.flush()
    }
}

impl StageWriter for Lz4Writer {
    fn finish(self: Box<Self>) -> io::Result<()> {
        self.inner.finish().map_err(io::Error::other)?.finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_signature() {
        assert!(Lz4Filter.bid(&MAGIC));
        assert!(!Lz4Filter.bid(&[0x04, 0x22, 0x4D, 0x19]));
    }
}
