//! Filter chain integration tests: detection, stacking, hints and statistics.

mod common;

use arcstream::{
    ArchiveReader, ArchiveWriter, EntryMetadata, Error, FilterCode, FormatCode, ReadOptions,
    WriteOptions,
};

fn sample_entries() -> Vec<(&'static str, Vec<u8>)> {
    vec![
        ("text.txt", b"The quick brown fox jumps over the lazy dog\n".repeat(200)),
        ("noise.bin", common::random_bytes(50_000, 11)),
    ]
}

fn roundtrip_with(filters: &[FilterCode], format: FormatCode) -> Vec<FilterCode> {
    let entries = sample_entries();
    let refs: Vec<(&str, &[u8])> = entries.iter().map(|(n, d)| (*n, d.as_slice())).collect();
    let bytes = common::write_files(
        WriteOptions::new().format(format).filters(filters.iter().copied()),
        &refs,
    )
    .unwrap();

    let mut reader = ArchiveReader::open_memory(bytes, ReadOptions::new()).unwrap();
    let mut count = 0;
    while let Some(entry) = reader.next_header().unwrap() {
        let mut data = Vec::new();
        reader.read_data_into(&mut data).unwrap();
        assert_eq!(common::name_of(&entry), entries[count].0);
        assert_eq!(data, entries[count].1);
        count += 1;
    }
    assert_eq!(count, entries.len());
    reader.filters().iter().map(|f| f.code).collect()
}

#[cfg(feature = "deflate")]
#[test]
fn test_gzip_detected() {
    let stages = roundtrip_with(&[FilterCode::Gzip], FormatCode::TarPax);
    assert_eq!(stages, vec![FilterCode::Gzip, FilterCode::None]);
}

#[cfg(feature = "bzip2")]
#[test]
fn test_bzip2_detected() {
    let stages = roundtrip_with(&[FilterCode::Bzip2], FormatCode::CpioNewc);
    assert_eq!(stages, vec![FilterCode::Bzip2, FilterCode::None]);
}

#[cfg(feature = "lzma")]
#[test]
fn test_lzma_detected() {
    let stages = roundtrip_with(&[FilterCode::Lzma], FormatCode::Spool);
    assert_eq!(stages, vec![FilterCode::Lzma, FilterCode::None]);
}

#[cfg(feature = "zstd")]
#[test]
fn test_zstd_detected() {
    let stages = roundtrip_with(&[FilterCode::Zstd], FormatCode::TarUstar);
    assert_eq!(stages, vec![FilterCode::Zstd, FilterCode::None]);
}

#[cfg(feature = "lz4")]
#[test]
fn test_lz4_detected() {
    let stages = roundtrip_with(&[FilterCode::Lz4], FormatCode::TarUstar);
    assert_eq!(stages, vec![FilterCode::Lz4, FilterCode::None]);
}

#[cfg(all(feature = "deflate", feature = "bzip2"))]
#[test]
fn test_stacked_filters_peeled_in_order() {
    // gzip receives the tar stream, bzip2 compresses the gzip stream
    let stages = roundtrip_with(&[FilterCode::Gzip, FilterCode::Bzip2], FormatCode::TarPax);
    assert_eq!(
        stages,
        vec![FilterCode::Gzip, FilterCode::Bzip2, FilterCode::None]
    );
}

#[cfg(feature = "deflate")]
#[test]
fn test_gzip_output_is_deterministic_without_timestamp() {
    let write = || {
        common::write_files(
            WriteOptions::new()
                .format(FormatCode::TarPax)
                .add_filter(FilterCode::Gzip)
                .options("gzip:compression-level=9,gzip:!timestamp"),
            &[("same", b"same bytes")],
        )
        .unwrap()
    };
    let first = write();
    assert_eq!(&first[..3], &[0x1F, 0x8B, 0x08]);
    assert_eq!(first, write());
}

#[cfg(feature = "deflate")]
#[test]
fn test_out_of_range_level_rejected_at_open() {
    let err = ArchiveWriter::create_memory(
        WriteOptions::new()
            .add_filter(FilterCode::Gzip)
            .options("gzip:compression-level=42"),
    )
    .unwrap_err();
    assert!(matches!(err, Error::InvalidOption { .. }));
}

#[cfg(feature = "deflate")]
#[test]
fn test_detection_disabled_by_empty_filter_set() {
    let bytes = common::write_files(
        WriteOptions::new()
            .format(FormatCode::CpioNewc)
            .add_filter(FilterCode::Gzip),
        &[("f", b"abc")],
    )
    .unwrap();

    let err = ArchiveReader::open_memory(bytes.clone(), ReadOptions::new().filters([])).unwrap_err();
    assert!(matches!(err, Error::UnrecognizedFormat));

    // Forcing the stage skips probing and reaches the same archive
    let entries = common::read_all(
        bytes,
        ReadOptions::new().filters([]).append_filter(FilterCode::Gzip),
    )
    .unwrap();
    assert_eq!(entries[0].1, b"abc");
}

#[cfg(feature = "deflate")]
#[test]
fn test_raw_format_under_gzip() {
    let bytes = common::write_archive(
        WriteOptions::new()
            .format(FormatCode::Raw)
            .add_filter(FilterCode::Gzip),
        &[(EntryMetadata::file("ignored", 12), b"just a blob!".as_slice())],
    )
    .unwrap();

    let entries = common::read_all(bytes, ReadOptions::new().format(FormatCode::Raw)).unwrap();
    assert_eq!(entries.len(), 1);
    assert_eq!(common::name_of(&entries[0].0), "data");
    assert_eq!(entries[0].1, b"just a blob!");
}

#[test]
fn test_stream_shorter_than_any_signature_passes_through() {
    let mut reader =
        ArchiveReader::open_memory(vec![0x1F, 0x8B], ReadOptions::new().format(FormatCode::Raw))
            .unwrap();
    assert_eq!(reader.filter_count(), 1);
    assert_eq!(reader.filters()[0].code, FilterCode::None);

    reader.next_header().unwrap().unwrap();
    let mut data = Vec::new();
    reader.read_data_into(&mut data).unwrap();
    assert_eq!(data, [0x1F, 0x8B]);
    assert!(reader.next_header().unwrap().is_none());
}

#[cfg(feature = "deflate")]
#[test]
fn test_stage_statistics() {
    let payload = vec![b'z'; 100_000];
    let (mut writer, sink) = ArchiveWriter::create_memory(
        WriteOptions::new()
            .format(FormatCode::CpioNewc)
            .add_filter(FilterCode::Gzip),
    )
    .unwrap();
    writer
        .write_header(&EntryMetadata::file("z", payload.len() as u64))
        .unwrap();
    writer.write_data(&payload).unwrap();
    writer.finish_entry().unwrap();
    writer.close().unwrap();

    let stats = writer.filters();
    assert_eq!(writer.filter_count(), 2);
    assert_eq!(stats[0].name, "gzip");
    assert_eq!(stats[1].name, "none");
    assert!(stats[0].bytes > payload.len() as u64);
    assert_eq!(stats[1].bytes, sink.len() as u64);
    assert!(stats[1].bytes < stats[0].bytes);

    let mut reader = ArchiveReader::open_memory(sink.take(), ReadOptions::new()).unwrap();
    reader.next_header().unwrap().unwrap();
    let mut data = Vec::new();
    reader.read_data_into(&mut data).unwrap();
    let stats = reader.filters();
    assert_eq!(stats[0].code, FilterCode::Gzip);
    assert!(stats[0].bytes >= payload.len() as u64);
}

#[test]
fn test_unavailable_filter_rejected_before_sink_opens() {
    let missing = FilterCode::ALL.into_iter().find(|c| !c.is_available());
    let Some(code) = missing else {
        return;
    };
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("never.tar");
    let err = ArchiveWriter::create_path(&path, WriteOptions::new().add_filter(code)).unwrap_err();
    assert!(matches!(err, Error::UnsupportedFilter { .. }));
    assert!(!path.exists());
}
