//! gzip filter.

use std::io::{self, BufReader, Read, Write};
use std::time::{SystemTime, UNIX_EPOCH};

use flate2::bufread::MultiGzDecoder;
use flate2::write::GzEncoder;
use flate2::{Compression, GzBuilder};

use super::stage::{Stage, StageWriter};
use super::{Filter, FilterCode, level_option};
use crate::Result;
use crate::options::ModuleOptions;

/// gzip (RFC 1952), including concatenated members.
#[derive(Debug, Clone, Copy)]
pub(crate) struct GzipFilter;

impl Filter for GzipFilter {
    fn code(&self) -> FilterCode {
        FilterCode::Gzip
    }

    fn min_probe(&self) -> usize {
        10
    }

    fn matches(&self, prefix: &[u8]) -> bool {
        // ID1 ID2 CM=deflate, and no reserved flag bits
        prefix[0] == 0x1F && prefix[1] == 0x8B && prefix[2] == 0x08 && prefix[3] & 0xE0 == 0
    }

    fn decoder(&self, input: Box<dyn Stage>) -> io::Result<Box<dyn Read + Send>> {
        Ok(Box::new(MultiGzDecoder::new(BufReader::new(input))))
    }

    fn encoder(
        &self,
        output: Box<dyn StageWriter>,
        options: &ModuleOptions<'_>,
    ) -> Result<Box<dyn StageWriter>> {
        let level = level_option(options, 0, 9, 6)?;
        let mtime = if options.flag("timestamp")?.unwrap_or(false) {
            SystemTime::now()
                .duration_since(UNIX_EPOCH)
                .map(|d| u32::try_from(d.as_secs()).unwrap_or(0))
                .unwrap_or(0)
        } else {
            0
        };
        log::debug!("gzip encoder: level {}, mtime {}", level, mtime);
        Ok(Box::new(GzipWriter {
            inner: GzBuilder::new()
                .mtime(mtime)
                .write(output, Compression::new(level)),
        }))
    }
}

struct GzipWriter {
    inner: GzEncoder<Box<dyn StageWriter>>,
}

impl Write for GzipWriter {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.inner.write(buf)
    }

    fn flush(&mut self) -> io::Result<()> {
        self.inner.flush()
    }
}

impl StageWriter for GzipWriter {
    fn finish(self: Box<Self>) -> io::Result<()> {
        self.inner.finish()?.finish()
    }
}
