//! Multi-volume sources: archives split across several files.

mod common;

use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use arcstream::io::MemorySource;
use arcstream::volume::MultiVolumeSource;
use arcstream::{ArchiveReader, Error, FormatCode, ReadOptions, WriteOptions};

fn sample_archive(format: FormatCode) -> (Vec<u8>, Vec<u8>) {
    let payload = common::random_bytes(30_000, 5);
    let bytes = common::write_files(
        WriteOptions::new().format(format),
        &[("big.bin", &payload), ("note.txt", b"split across volumes")],
    )
    .unwrap();
    (bytes, payload)
}

/// Writes `data` as `<base>.001`, `<base>.002`, ... of at most `chunk` bytes.
fn split_to_files(dir: &Path, base: &str, data: &[u8], chunk: usize) -> Vec<PathBuf> {
    data.chunks(chunk)
        .enumerate()
        .map(|(i, part)| {
            let path = dir.join(format!("{}.{:03}", base, i + 1));
            std::fs::write(&path, part).unwrap();
            path
        })
        .collect()
}

fn check_entries(reader: &mut ArchiveReader, payload: &[u8]) {
    let first = reader.next_header().unwrap().unwrap();
    assert_eq!(common::name_of(&first), "big.bin");
    let mut data = Vec::new();
    reader.read_data_into(&mut data).unwrap();
    assert_eq!(data, payload);

    let second = reader.next_header().unwrap().unwrap();
    assert_eq!(common::name_of(&second), "note.txt");
    let mut data = Vec::new();
    reader.read_data_into(&mut data).unwrap();
    assert_eq!(data, b"split across volumes");
    assert!(reader.next_header().unwrap().is_none());
}

#[test]
fn test_open_paths_reads_volumes_in_order() {
    let (bytes, payload) = sample_archive(FormatCode::TarPax);
    let dir = tempfile::tempdir().unwrap();
    // Odd chunk size so boundaries fall inside headers and data
    let paths = split_to_files(dir.path(), "archive.tar", &bytes, 7_777);
    assert!(paths.len() > 2);

    let mut reader = ArchiveReader::open_paths(&paths, ReadOptions::new()).unwrap();
    check_entries(&mut reader, &payload);
}

#[test]
fn test_switch_hook_sees_every_boundary() {
    let (bytes, payload) = sample_archive(FormatCode::CpioNewc);
    let switches = Arc::new(Mutex::new(Vec::new()));
    let seen = Arc::clone(&switches);

    let mut source = MultiVolumeSource::new()
        .on_switch(move |old, new| seen.lock().unwrap().push((old, new)));
    for part in bytes.chunks(10_000) {
        source.push(MemorySource::new(part.to_vec()));
    }
    let volumes = source.volume_count();

    let mut reader = ArchiveReader::open(source, ReadOptions::new()).unwrap();
    check_entries(&mut reader, &payload);

    let switches = switches.lock().unwrap();
    assert_eq!(switches.len(), volumes - 1);
    for (i, (old, new)) in switches.iter().enumerate() {
        assert_eq!((*old, *new), (i, i + 1));
    }
}

#[test]
fn test_open_numbered_discovers_volumes() {
    let (bytes, payload) = sample_archive(FormatCode::Spool);
    let dir = tempfile::tempdir().unwrap();
    let paths = split_to_files(dir.path(), "backup.spool", &bytes, 12_000);

    let source = MultiVolumeSource::open_numbered(&paths[0]).unwrap();
    assert_eq!(source.volume_count(), paths.len());
    let mut reader = ArchiveReader::open(source, ReadOptions::new()).unwrap();
    check_entries(&mut reader, &payload);
}

#[test]
fn test_missing_first_volume() {
    let dir = tempfile::tempdir().unwrap();
    let err = MultiVolumeSource::open_numbered(dir.path().join("absent.tar.001")).unwrap_err();
    assert!(matches!(err, Error::VolumeMissing { volume: 1, .. }));
}

#[cfg(feature = "deflate")]
#[test]
fn test_compressed_stream_across_volumes() {
    let payload = common::random_bytes(30_000, 5);
    let bytes = common::write_files(
        WriteOptions::new()
            .format(FormatCode::TarUstar)
            .add_filter(arcstream::FilterCode::Gzip),
        &[("big.bin", &payload), ("note.txt", b"split across volumes")],
    )
    .unwrap();
    let mut source = MultiVolumeSource::new();
    for part in bytes.chunks(1_000) {
        source.push(MemorySource::new(part.to_vec()));
    }
    let mut reader = ArchiveReader::open(source, ReadOptions::new()).unwrap();
    assert_eq!(reader.filter_count(), 2);
    check_entries(&mut reader, &payload);
}
