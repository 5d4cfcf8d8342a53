//! LZMA "alone" (`.lzma`) filter.
//!
//! The stream starts with a 13-byte header: one properties byte, the
//! dictionary size (u32 LE) and the uncompressed size (u64 LE, all ones when
//! unknown). The encoder always writes an unknown size and ends the stream
//! with an end marker.

use std::io::{self, Read, Write};

use lzma_rust2::{LzmaOptions, LzmaReader, LzmaWriter};

use super::stage::{Stage, StageWriter};
use super::{Filter, FilterCode, level_option};
use crate::options::ModuleOptions;
use crate::{Error, Result};

const HEADER_SIZE: usize = 13;
const UNKNOWN_SIZE: u64 = u64::MAX;

/// LZMA "alone" streams.
#[derive(Debug, Clone, Copy)]
pub(crate) struct LzmaFilter;

/// Accepts the dictionary sizes real encoders produce: 2^n and 2^n + 2^(n-1).
fn plausible_dict_size(dict: u32) -> bool {
    (12..=30).any(|n| dict == 1 << n || dict == (1 << n) + (1 << (n - 1)))
}

fn invalid_data(e: impl std::fmt::Display) -> io::Error {
    io::Error::new(io::ErrorKind::InvalidData, e.to_string())
}

impl Filter for LzmaFilter {
    fn code(&self) -> FilterCode {
        FilterCode::Lzma
    }

    fn min_probe(&self) -> usize {
        HEADER_SIZE + 1
    }

    fn matches(&self, prefix: &[u8]) -> bool {
        // lc/lp/pb packed as (pb * 5 + lp) * 9 + lc
        if prefix[0] > 224 {
            return false;
        }
        let dict = u32::from_le_bytes([prefix[1], prefix[2], prefix[3], prefix[4]]);
        if !plausible_dict_size(dict) {
            return false;
        }
        let mut size = [0u8; 8];
        size.copy_from_slice(&prefix[5..13]);
        let size = u64::from_le_bytes(size);
        if size != UNKNOWN_SIZE && size >= 1 << 56 {
            return false;
        }
        // The range coder's first output byte is always zero
        prefix[13] == 0
    }

    fn decoder(&self, mut input: Box<dyn Stage>) -> io::Result<Box<dyn Read + Send>> {
        let mut header = [0u8; HEADER_SIZE];
        input.read_exact(&mut header)?;
        let props = header[0];
        let dict = u32::from_le_bytes([header[1], header[2], header[3], header[4]]);
        let mut size = [0u8; 8];
        size.copy_from_slice(&header[5..13]);
        let size = u64::from_le_bytes(size);
        log::debug!(
            "lzma stream: props {:#04x}, dict {}, size {}",
            props,
            dict,
            if size == UNKNOWN_SIZE {
                "unknown".to_string()
            } else {
                size.to_string()
            }
        );
        let reader =
            LzmaReader::new_with_props(input, size, props, dict, None).map_err(invalid_data)?;
        Ok(Box::new(reader))
    }

    fn encoder(
        &self,
        mut output: Box<dyn StageWriter>,
        options: &ModuleOptions<'_>,
    ) -> Result<Box<dyn StageWriter>> {
        let level = level_option(options, 0, 9, 6)?;
        let opts = LzmaOptions::with_preset(level);
        let mut header = [0u8; HEADER_SIZE];
        header[0] = opts.get_props();
        header[1..5].copy_from_slice(&opts.dict_size.to_le_bytes());
        header[5..13].copy_from_slice(&UNKNOWN_SIZE.to_le_bytes());
        output
            .write_all(&header)
            .map_err(|e| Error::filter("lzma", e))?;
        log::debug!("lzma encoder: preset {}, dict {}", level, opts.dict_size);
        let inner = LzmaWriter::new_no_header(output, &opts, true)
            .map_err(|e| Error::filter("lzma", invalid_data(e)))?;
        Ok(Box::new(LzmaStreamWriter { inner }))
    }
}

struct LzmaStreamWriter {
    inner: LzmaWriter<Box<dyn StageWriter>>,
}

impl Write for LzmaStreamWriter {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.inner.write(buf)
    }

    fn flush(&mut self) -> io::Result<()> {
        self.inner.flush()
    }
}

impl StageWriter for LzmaStreamWriter {
    fn finish(self: Box<Self>) -> io::Result<()> {
        self.inner
            .finish()
            .map_err(|e| io::Error::other(e.to_string()))?
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn header(props: u8, dict: u32, size: u64) -> Vec<u8> {
        let mut h = vec![props];
        h.extend_from_slice(&dict.to_le_bytes());
        h.extend_from_slice(&size.to_le_bytes());
        h.push(0);
        h
    }

    #[test]
    fn test_signature() {
        assert!(LzmaFilter.bid(&header(0x5D, 1 << 23, UNKNOWN_SIZE)));
        assert!(LzmaFilter.bid(&header(0x5D, (1 << 20) + (1 << 19), 1234)));
        assert!(!LzmaFilter.bid(&header(225, 1 << 23, UNKNOWN_SIZE)));
        assert!(!LzmaFilter.bid(&header(0x5D, 12345, UNKNOWN_SIZE)));
        assert!(!LzmaFilter.bid(&header(0x5D, 1 << 23, 1 << 60)));

        let mut nonzero = header(0x5D, 1 << 23, UNKNOWN_SIZE);
        nonzero[13] = 1;
        assert!(!LzmaFilter.bid(&nonzero));
    }

    #[test]
    fn test_plausible_dict_sizes() {
        assert!(plausible_dict_size(4096));
        assert!(plausible_dict_size(6144));
        assert!(plausible_dict_size(1 << 30));
        assert!(!plausible_dict_size(4097));
        assert!(!plausible_dict_size(2048));
    }
}
