//! Shared test utilities for integration tests.
//!
//! Note: `#![allow(dead_code)]` is required because each integration test file
//! compiles as a separate crate and may only use a subset of these helpers.

#![allow(dead_code)]

use rand::rngs::StdRng;
use rand::{RngCore, SeedableRng};

use arcstream::{ArchiveReader, ArchiveWriter, EntryMetadata, ReadOptions, WriteOptions};

/// Deterministic pseudo-random payload.
pub fn random_bytes(len: usize, seed: u64) -> Vec<u8> {
    let mut rng = StdRng::seed_from_u64(seed);
    let mut data = vec![0u8; len];
    rng.fill_bytes(&mut data);
    data
}

/// Writes `entries` (metadata plus data) into an in-memory archive.
pub fn write_archive(
    options: WriteOptions,
    entries: &[(EntryMetadata, &[u8])],
) -> arcstream::Result<Vec<u8>> {
    let (mut writer, sink) = ArchiveWriter::create_memory(options)?;
    for (entry, data) in entries {
        writer.write_header(entry)?;
        let mut rest: &[u8] = data;
        while !rest.is_empty() {
            let n = writer.write_data(rest)?;
            assert!(n > 0, "writer stopped accepting data");
            rest = &rest[n..];
        }
        writer.finish_entry()?;
    }
    writer.close()?;
    Ok(sink.take())
}

/// Writes plain files named by `entries`.
pub fn write_files(options: WriteOptions, entries: &[(&str, &[u8])]) -> arcstream::Result<Vec<u8>> {
    let entries: Vec<(EntryMetadata, &[u8])> = entries
        .iter()
        .map(|(name, data)| (EntryMetadata::file(*name, data.len() as u64), *data))
        .collect();
    write_archive(options, &entries)
}

/// Reads every entry with its data.
pub fn read_all(
    bytes: Vec<u8>,
    options: ReadOptions,
) -> arcstream::Result<Vec<(EntryMetadata, Vec<u8>)>> {
    let mut reader = ArchiveReader::open_memory(bytes, options)?;
    let mut out = Vec::new();
    while let Some(entry) = reader.next_header()? {
        let mut data = Vec::new();
        reader.read_data_into(&mut data)?;
        out.push((entry, data));
    }
    reader.close()?;
    Ok(out)
}

/// Pathname of an entry as a `String`.
pub fn name_of(entry: &EntryMetadata) -> String {
    entry
        .pathname()
        .map(|p| p.to_string_lossy().into_owned())
        .unwrap_or_default()
}
