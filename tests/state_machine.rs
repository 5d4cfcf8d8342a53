//! Read-session state machine and error scoping.

mod common;

use std::io::{self, Read, SeekFrom};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use arcstream::io::{ByteSource, MemorySource, ReaderSource, SeekableSource};
use arcstream::{
    ArchiveReader, Error, FormatCode, ProviderError, ReadOptions, Severity, WriteOptions,
};

fn two_files(format: FormatCode) -> Vec<u8> {
    common::write_files(
        WriteOptions::new().format(format),
        &[
            ("first.bin", &common::random_bytes(70_000, 1)),
            ("second.txt", b"second entry"),
        ],
    )
    .unwrap()
}

#[test]
fn test_partially_read_entry_is_skipped() {
    for format in [
        FormatCode::Spool,
        FormatCode::TarPax,
        FormatCode::CpioNewc,
        FormatCode::CpioCrc,
    ] {
        let mut reader = ArchiveReader::open_memory(two_files(format), ReadOptions::new()).unwrap();
        reader.next_header().unwrap().unwrap();
        let mut buf = [0u8; 10];
        assert_eq!(reader.read_data(&mut buf).unwrap(), 10);

        let second = reader.next_header().unwrap().unwrap();
        assert_eq!(common::name_of(&second), "second.txt", "{}", format);
        let mut data = Vec::new();
        reader.read_data_into(&mut data).unwrap();
        assert_eq!(data, b"second entry");
        assert_eq!(reader.file_count(), 2);
    }
}

#[test]
fn test_end_of_archive_is_sticky() {
    let mut reader =
        ArchiveReader::open_memory(two_files(FormatCode::TarUstar), ReadOptions::new()).unwrap();
    while reader.next_header().unwrap().is_some() {}
    assert!(reader.next_header().unwrap().is_none());
    assert!(reader.next_header().unwrap().is_none());
    assert!(reader.entry().is_none());
    assert!(reader.last_error().is_none());
}

#[test]
fn test_end_of_entry_is_repeatable() {
    let mut reader =
        ArchiveReader::open_memory(two_files(FormatCode::Spool), ReadOptions::new()).unwrap();
    reader.next_header().unwrap().unwrap();
    reader.skip_entry_data().unwrap();
    let mut buf = [0u8; 16];
    assert_eq!(reader.read_data(&mut buf).unwrap(), 0);
    assert_eq!(reader.read_data(&mut buf).unwrap(), 0);
}

#[test]
fn test_header_positions_increase() {
    let mut reader =
        ArchiveReader::open_memory(two_files(FormatCode::TarPax), ReadOptions::new()).unwrap();
    reader.next_header().unwrap().unwrap();
    assert_eq!(reader.header_position(), Some(0));
    reader.next_header().unwrap().unwrap();
    // 512-byte header plus 70 000 bytes of data padded to 512
    assert_eq!(reader.header_position(), Some(512 + 70_144));
}

#[test]
fn test_seek_in_contiguous_entry() {
    let payload = common::random_bytes(70_000, 1);
    let mut reader =
        ArchiveReader::open_memory(two_files(FormatCode::TarUstar), ReadOptions::new()).unwrap();
    reader.next_header().unwrap().unwrap();

    assert_eq!(reader.seek_in_entry(SeekFrom::Start(60_000)).unwrap(), 60_000);
    let mut buf = [0u8; 16];
    reader.read_data(&mut buf).unwrap();
    assert_eq!(&buf, &payload[60_000..60_016]);

    assert_eq!(reader.seek_in_entry(SeekFrom::End(-4)).unwrap(), 69_996);
    let mut tail = Vec::new();
    reader.read_data_into(&mut tail).unwrap();
    assert_eq!(tail, &payload[69_996..]);

    // Seeking back after the end makes the entry readable again
    assert_eq!(reader.seek_in_entry(SeekFrom::Start(0)).unwrap(), 0);
    reader.read_data(&mut buf).unwrap();
    assert_eq!(&buf, &payload[..16]);

    let second = reader.next_header().unwrap().unwrap();
    assert_eq!(common::name_of(&second), "second.txt");
}

#[test]
fn test_seek_in_entry_after_preamble() {
    let payload: Vec<u8> = (0..2000u32).map(|i| (i % 251) as u8).collect();
    let archive = common::write_files(
        WriteOptions::new().format(FormatCode::TarUstar),
        &[("embedded.bin", &payload)],
    )
    .unwrap();
    let mut bytes = vec![0xAAu8; 100];
    bytes.extend_from_slice(&archive);
    let mut cursor = io::Cursor::new(bytes);
    cursor.set_position(100);

    let mut reader =
        ArchiveReader::open(SeekableSource::new(cursor), ReadOptions::new()).unwrap();
    reader.next_header().unwrap().unwrap();
    assert_eq!(reader.header_position(), Some(0));

    assert_eq!(reader.seek_in_entry(SeekFrom::Start(1000)).unwrap(), 1000);
    let mut buf = [0u8; 8];
    assert_eq!(reader.read_data(&mut buf).unwrap(), 8);
    assert_eq!(&buf, &payload[1000..1008]);

    assert_eq!(reader.seek_in_entry(SeekFrom::End(-2)).unwrap(), 1998);
    let mut tail = Vec::new();
    reader.read_data_into(&mut tail).unwrap();
    assert_eq!(tail, &payload[1998..]);
    assert!(reader.next_header().unwrap().is_none());
}

#[test]
fn test_seek_not_supported_keeps_entry_readable() {
    // Sequential source
    let bytes = two_files(FormatCode::TarUstar);
    let mut reader =
        ArchiveReader::open_reader(io::Cursor::new(bytes), ReadOptions::new()).unwrap();
    reader.next_header().unwrap().unwrap();
    let err = reader.seek_in_entry(SeekFrom::Start(5)).unwrap_err();
    assert!(matches!(err, Error::NotSupported { .. }));
    let mut data = Vec::new();
    reader.read_data_into(&mut data).unwrap();
    assert_eq!(data.len(), 70_000);

    // Chunked framing
    let mut reader =
        ArchiveReader::open_memory(two_files(FormatCode::Spool), ReadOptions::new()).unwrap();
    reader.next_header().unwrap().unwrap();
    assert!(matches!(
        reader.seek_in_entry(SeekFrom::Start(5)),
        Err(Error::NotSupported { .. })
    ));
    assert_eq!(reader.read_data(&mut [0u8; 4]).unwrap(), 4);
}

#[test]
fn test_entry_reader_is_io_read() {
    let mut reader =
        ArchiveReader::open_memory(two_files(FormatCode::CpioNewc), ReadOptions::new()).unwrap();
    reader.next_header().unwrap().unwrap();
    reader.next_header().unwrap().unwrap();
    let mut text = String::new();
    reader.entry_reader().read_to_string(&mut text).unwrap();
    assert_eq!(text, "second entry");
}

#[test]
fn test_corrupt_spool_header_fails_only_that_entry() {
    let mut bytes = two_files(FormatCode::Spool);
    // Archive header (16) + kind (1) + length (4) + crc (4) + tag (1) + length (4)
    bytes[30] ^= 0xFF;

    let mut reader = ArchiveReader::open_memory(bytes, ReadOptions::new()).unwrap();
    let err = reader.next_header().unwrap_err();
    assert!(matches!(err, Error::InvalidEntry { .. }));
    assert_eq!(err.severity(), Severity::Failed);
    assert!(reader.read_data(&mut [0u8; 4]).is_err());

    let second = reader.next_header().unwrap().unwrap();
    assert_eq!(common::name_of(&second), "second.txt");
    assert_eq!(reader.file_count(), 2);
}

#[test]
fn test_corrupt_tar_checksum_is_fatal() {
    let mut bytes = two_files(FormatCode::TarUstar);
    let second_header = 512 + 70_144;
    bytes[second_header] ^= 0x55;

    let mut reader = ArchiveReader::open_memory(bytes, ReadOptions::new()).unwrap();
    reader.next_header().unwrap().unwrap();
    let err = reader.next_header().unwrap_err();
    assert!(matches!(err, Error::CorruptHeader { .. }));
    assert!(err.is_fatal());
    assert!(matches!(reader.next_header(), Err(Error::SessionFailed)));
    let info = reader.last_error().unwrap();
    assert_eq!(info.severity, Severity::Fatal);
    reader.clear_error();
    assert!(reader.last_error().is_none());
    reader.close().unwrap();
}

#[test]
fn test_truncated_data_is_fatal() {
    let bytes = two_files(FormatCode::TarUstar);
    let cut = bytes[..512 + 1_000].to_vec();
    let mut reader = ArchiveReader::open_memory(cut, ReadOptions::new()).unwrap();
    reader.next_header().unwrap().unwrap();
    let mut sink = Vec::new();
    let err = reader.read_data_into(&mut sink).unwrap_err();
    assert!(matches!(err, Error::Truncated { .. }));
    assert_eq!(sink.len(), 1_000);
}

#[test]
fn test_cpio_without_trailer_ends_cleanly() {
    let bytes = two_files(FormatCode::CpioNewc);
    // Drop the TRAILER!!! record (110-byte header + 11-byte name, padded to 124)
    let cut = bytes[..bytes.len() - 124].to_vec();
    let entries = common::read_all(cut, ReadOptions::new()).unwrap();
    assert_eq!(entries.len(), 2);
}

#[test]
fn test_digest_mismatch_is_entry_scoped() {
    let mut bytes = two_files(FormatCode::CpioCrc);
    // First data byte: 110-byte header + "first.bin\0" padded to 4
    bytes[120] ^= 0x01;

    let mut reader = ArchiveReader::open_memory(bytes, ReadOptions::new()).unwrap();
    reader.next_header().unwrap().unwrap();
    let err = reader.read_data_into(&mut io::sink()).unwrap_err();
    assert!(matches!(err, Error::DigestMismatch { .. }));
    assert!(err.is_entry_scoped());
    assert!(reader.next_header().unwrap().is_some());
}

struct FailingSource {
    data: MemorySource,
    fail_after: usize,
    served: usize,
    closed: Arc<AtomicBool>,
}

impl ByteSource for FailingSource {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        if self.served >= self.fail_after {
            return Err(ProviderError::new(7, "tape ended early").into_io());
        }
        let limit = buf.len().min(self.fail_after - self.served);
        let n = self.data.read(&mut buf[..limit])?;
        self.served += n;
        Ok(n)
    }

    fn close(&mut self) -> io::Result<()> {
        self.closed.store(true, Ordering::SeqCst);
        Ok(())
    }
}

#[test]
fn test_provider_error_reaches_caller() {
    let closed = Arc::new(AtomicBool::new(false));
    let source = FailingSource {
        data: MemorySource::new(two_files(FormatCode::TarUstar)),
        fail_after: 4096,
        served: 0,
        closed: Arc::clone(&closed),
    };
    let mut reader = ArchiveReader::open(source, ReadOptions::new()).unwrap();
    reader.next_header().unwrap().unwrap();
    let err = reader.read_data_into(&mut io::sink()).unwrap_err();
    match &err {
        Error::Provider { code, message, .. } => {
            assert_eq!(*code, 7);
            assert_eq!(message, "tape ended early");
        }
        other => panic!("unexpected error: {other:?}"),
    }
    assert_eq!(reader.last_error().unwrap().code, 7);
    assert!(err.is_fatal());

    drop(reader);
    assert!(closed.load(Ordering::SeqCst));
}

#[test]
fn test_source_closed_when_detection_fails() {
    let closed = Arc::new(AtomicBool::new(false));
    let source = FailingSource {
        data: MemorySource::new(b"definitely not an archive".to_vec()),
        fail_after: usize::MAX,
        served: 0,
        closed: Arc::clone(&closed),
    };
    let err = ArchiveReader::open(source, ReadOptions::new()).unwrap_err();
    assert!(matches!(err, Error::UnrecognizedFormat));
    assert!(closed.load(Ordering::SeqCst));
}

#[test]
fn test_sequential_source() {
    let bytes = two_files(FormatCode::CpioCrc);
    let source = ReaderSource::new(io::Cursor::new(bytes));
    let mut reader = ArchiveReader::open(source, ReadOptions::new()).unwrap();
    let mut names = Vec::new();
    while let Some(entry) = reader.next_header().unwrap() {
        names.push(common::name_of(&entry));
    }
    assert_eq!(names, ["first.bin", "second.txt"]);
}

#[test]
fn test_strict_module_rejects_unknown_key() {
    let err = ArchiveReader::open_memory(
        two_files(FormatCode::Spool),
        ReadOptions::new().options("spool:bogus=1"),
    )
    .unwrap_err();
    assert!(matches!(err, Error::InvalidOption { .. }));

    // Lenient modules ignore unknown keys
    ArchiveReader::open_memory(
        two_files(FormatCode::TarPax),
        ReadOptions::new().options("tar:bogus=1,gzip:whatever"),
    )
    .unwrap();
}
