//! Zstandard filter.

use std::io::{self, Read, Write};

use zstd::stream::read::Decoder as ZstdDecoder;
use zstd::stream::write::Encoder as ZstdEncoder;

use super::stage::{Stage, StageWriter};
use super::{Filter, FilterCode, level_option};
use crate::{Error, Result};
use crate::options::ModuleOptions;

const MAGIC: [u8; 4] = [0x28, 0xB5, 0x2F, 0xFD];

/// Zstandard frames.
#[derive(Debug, Clone, Copy)]
pub(crate) struct ZstdFilter;

impl Filter for ZstdFilter {
    fn code(&self) -> FilterCode {
        FilterCode::Zstd
    }

    fn min_probe(&self) -> usize {
        MAGIC.len()
    }

    fn matches(&self, prefix: &[u8]) -> bool {
        prefix[..4] == MAGIC
    }

    fn decoder(&self, input: Box<dyn Stage>) -> io::Result<Box<dyn Read + Send>> {
        Ok(Box::new(ZstdDecoder::new(input)?))
    }

    fn encoder(
        &self,
        output: Box<dyn StageWriter>,
        options: &ModuleOptions<'_>,
    ) -> Result<Box<dyn StageWriter>> {
        let level = level_option(options, 1, 22, 3)?;
        log::debug!("zstd encoder: level {}", level);
        let inner =
            ZstdEncoder::new(output, level as i32).map_err(|e| Error::filter("zstd", e))?;
        Ok(Box::new(ZstdWriter { inner }))
    }
}

struct ZstdWriter {
    inner: ZstdEncoder<'static, Box<dyn StageWriter>>,
}

impl Write for ZstdWriter {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.inner.write(buf)
    }

    fn flush(&mut self) -> io::Result<()> {
        self.inner.flush()
    }
}

impl StageWriter for ZstdWriter {
    fn finish(self: Box<Self>) -> io::Result<()> {
        self.inner.finish()?.finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_signature() {
        assert!(ZstdFilter.bid(&[0x28, 0xB5, 0x2F, 0xFD, 0x00]));
        assert!(!ZstdFilter.bid(&[0x28, 0xB5, 0x2F, 0xFE]));
    }
}
