//! raw: the whole decoded stream as a single entry named `data`.
//!
//! The raw format matches any stream, so it only takes part in detection
//! when the caller enables it explicitly.

use super::{Format, FormatCode, FormatReader, FormatWriter, ReadContext};
use crate::crypto::Passphrases;
use crate::entry::{EntryMetadata, EntryType};
use crate::filter::WriteStream;
use crate::options::ModuleOptions;
use crate::{Error, Result};

const ENTRY_NAME: &str = "data";
const SKIP_STEP: u64 = 1 << 20;

#[derive(Debug, Clone, Copy)]
pub(crate) struct RawFormat;

impl Format for RawFormat {
    fn family(&self) -> FormatCode {
        FormatCode::Raw
    }

    fn bid(&self, _prefix: &[u8]) -> bool {
        true
    }

    fn reader(&self, _options: &ModuleOptions<'_>) -> Result<Box<dyn FormatReader>> {
        Ok(Box::new(RawReader { served: false }))
    }

    fn writer(
        &self,
        _code: FormatCode,
        _options: &ModuleOptions<'_>,
    ) -> Result<Box<dyn FormatWriter>> {
        Ok(Box::new(RawWriter { written: false }))
    }
}

struct RawReader {
    served: bool,
}

impl FormatReader for RawReader {
    fn code(&self) -> FormatCode {
        FormatCode::Raw
    }

    fn read_header(
        &mut self,
        cx: &mut ReadContext<'_>,
        entry: &mut EntryMetadata,
    ) -> Result<Option<u64>> {
        if self.served {
            return Ok(None);
        }
        self.served = true;
        entry.set_pathname(ENTRY_NAME);
        entry.set_type(EntryType::File);
        entry.set_perm(0o644);
        Ok(Some(cx.stream.position()))
    }

    fn read_data(&mut self, cx: &mut ReadContext<'_>, buf: &mut [u8]) -> Result<usize> {
        cx.stream.read(buf)
    }

    fn skip_data(&mut self, cx: &mut ReadContext<'_>) -> Result<()> {
        while cx.stream.skip(SKIP_STEP)? > 0 {}
        Ok(())
    }
}

struct RawWriter {
    written: bool,
}

impl FormatWriter for RawWriter {
    fn code(&self) -> FormatCode {
        FormatCode::Raw
    }

    fn write_header(
        &mut self,
        _out: &mut WriteStream,
        entry: &EntryMetadata,
        _passphrases: &mut Passphrases,
        _entry_index: usize,
    ) -> Result<Option<u64>> {
        if self.written {
            return Err(Error::protocol("the raw format holds a single entry"));
        }
        if entry.entry_type().is_some_and(|t| t != EntryType::File) {
            return Err(Error::UnsupportedFeature {
                feature: "non-file entries in the raw format",
            });
        }
        self.written = true;
        Ok(entry.size())
    }

    fn write_data(&mut self, out: &mut WriteStream, data: &[u8]) -> Result<()> {
        out.put(data)
    }

    fn finish_entry(&mut self, _out: &mut WriteStream) -> Result<()> {
        Ok(())
    }

    fn close(&mut self, _out: &mut WriteStream) -> Result<()> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_bids_on_anything() {
        assert!(RawFormat.bid(b""));
        assert!(RawFormat.bid(b"\x00\x01garbage"));
    }

    #[test]
    fn test_single_entry_writer() {
        let mut writer = RawWriter { written: false };
        let sink = crate::io::MemorySink::new();
        let mut chain = crate::filter::WriteChain::open(
            Box::new(sink.clone()),
            &[],
            &crate::options::OptionSet::new(),
            crate::filter::Blocking::UNBLOCKED,
        )
        .unwrap();
        let mut passphrases = Passphrases::default();
        let entry = EntryMetadata::file("x", 3);
        assert_eq!(
            writer
                .write_header(chain.stream(), &entry, &mut passphrases, 0)
                .unwrap(),
            Some(3)
        );
        let err = writer
            .write_header(chain.stream(), &entry, &mut passphrases, 1)
            .unwrap_err();
        assert!(matches!(err, Error::ProtocolViolation(_)));
    }
}
