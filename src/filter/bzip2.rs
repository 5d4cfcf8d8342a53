//! bzip2 filter.

use std::io::{self, Read, Write};

use bzip2::Compression;
use bzip2::read::MultiBzDecoder;
use bzip2::write::BzEncoder;

use super::stage::{Stage, StageWriter};
use super::{Filter, FilterCode, level_option};
use crate::Result;
use crate::options::ModuleOptions;

const BLOCK_MAGIC: [u8; 6] = [0x31, 0x41, 0x59, 0x26, 0x53, 0x59];
const END_MAGIC: [u8; 6] = [0x17, 0x72, 0x45, 0x38, 0x50, 0x90];

/// bzip2 streams, including concatenated ones.
#[derive(Debug, Clone, Copy)]
pub(crate) struct Bzip2Filter;

impl Filter for Bzip2Filter {
    fn code(&self) -> FilterCode {
        FilterCode::Bzip2
    }

    fn min_probe(&self) -> usize {
        10
    }

    fn matches(&self, prefix: &[u8]) -> bool {
        if &prefix[..3] != b"BZh" || !(b'1'..=b'9').contains(&prefix[3]) {
            return false;
        }
        prefix[4..10] == BLOCK_MAGIC || prefix[4..10] == END_MAGIC
    }

    fn decoder(&self, input: Box<dyn Stage>) -> io::Result<Box<dyn Read + Send>> {
        Ok(Box::new(MultiBzDecoder::new(input)))
    }

    fn encoder(
        &self,
        output: Box<dyn StageWriter>,
        options: &ModuleOptions<'_>,
    ) -> Result<Box<dyn StageWriter>> {
        let level = level_option(options, 1, 9, 9)?;
        log::debug!("bzip2 encoder: level {}", level);
        Ok(Box::new(Bzip2Writer {
            inner: BzEncoder::new(output, Compression::new(level)),
        }))
    }
}

struct Bzip2Writer {
    inner: BzEncoder<Box<dyn StageWriter>>,
}

impl Write for Bzip2Writer {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.inner.write(buf)
    }

    fn flush(&mut self) -> io::Result<()> {
        self.inner.flush()
    }
}

impl StageWriter for Bzip2Writer {
    fn finish(self: Box<Self>) -> io::Result<()> {
        self.inner.finish()?.finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_signature() {
        let mut prefix = b"BZh9".to_vec();
        prefix.extend_from_slice(&BLOCK_MAGIC);
        assert!(Bzip2Filter.bid(&prefix));

        let mut empty = b"BZh1".to_vec();
        empty.extend_from_slice(&END_MAGIC);
        assert!(Bzip2Filter.bid(&empty));

        // Level digit out of range
        let mut bad = b"BZh0".to_vec();
        bad.extend_from_slice(&BLOCK_MAGIC);
        assert!(!Bzip2Filter.bid(&bad));

        // Plain text starting with the magic letters
        assert!(!Bzip2Filter.bid(b"BZh9 is not a block"));
    }
}
