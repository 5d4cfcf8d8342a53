//! empty: a zero-length stream, read as an archive without entries.

use super::{Format, FormatCode, FormatReader, FormatWriter, ReadContext};
use crate::crypto::Passphrases;
use crate::entry::EntryMetadata;
use crate::filter::WriteStream;
use crate::options::ModuleOptions;
use crate::{Error, Result};

#[derive(Debug, Clone, Copy)]
pub(crate) struct EmptyFormat;

impl Format for EmptyFormat {
    fn family(&self) -> FormatCode {
        FormatCode::Empty
    }

    fn bid(&self, prefix: &[u8]) -> bool {
        prefix.is_empty()
    }

    fn reader(&self, _options: &ModuleOptions<'_>) -> Result<Box<dyn FormatReader>> {
        Ok(Box::new(EmptyCodec))
    }

    fn writer(
        &self,
        _code: FormatCode,
        _options: &ModuleOptions<'_>,
    ) -> Result<Box<dyn FormatWriter>> {
        Ok(Box::new(EmptyCodec))
    }
}

struct EmptyCodec;

impl FormatReader for EmptyCodec {
    fn code(&self) -> FormatCode {
        FormatCode::Empty
    }

    fn read_header(
        &mut self,
        _cx: &mut ReadContext<'_>,
        _entry: &mut EntryMetadata,
    ) -> Result<Option<u64>> {
        Ok(None)
    }

    fn read_data(&mut self, _cx: &mut ReadContext<'_>, _buf: &mut [u8]) -> Result<usize> {
        Ok(0)
    }

    fn skip_data(&mut self, _cx: &mut ReadContext<'_>) -> Result<()> {
        Ok(())
    }
}

impl FormatWriter for EmptyCodec {
    fn code(&self) -> FormatCode {
        FormatCode::Empty
    }

    fn write_header(
        &mut self,
        _out: &mut WriteStream,
        _entry: &EntryMetadata,
        _passphrases: &mut Passphrases,
        _entry_index: usize,
    ) -> Result<Option<u64>> {
        Err(Error::NotSupported {
            operation: "adding entries to an empty archive",
        })
    }

    fn write_data(&mut self, _out: &mut WriteStream, _data: &[u8]) -> Result<()> {
        Err(Error::NotSupported {
            operation: "adding entries to an empty archive",
        })
    }

    fn finish_entry(&mut self, _out: &mut WriteStream) -> Result<()> {
        Ok(())
    }

    fn close(&mut self, _out: &mut WriteStream) -> Result<()> {
        Ok(())
    }
}
