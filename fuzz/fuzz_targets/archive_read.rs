//! Fuzz target for `ArchiveReader` with arbitrary byte input.
//!
//! Exercises filter detection, format bidding and header parsing with
//! malformed or adversarial input, looking for panics and hangs.
//!
//! Run with: cargo +nightly fuzz run archive_read

#![no_main]

use arcstream::{ArchiveReader, ReadOptions};
use libfuzzer_sys::fuzz_target;

fuzz_target!(|data: &[u8]| {
    let Ok(mut reader) = ArchiveReader::open_memory(data.to_vec(), ReadOptions::new()) else {
        return;
    };

    let mut buf = [0u8; 4096];
    for _ in 0..256 {
        match reader.next_header() {
            Ok(Some(entry)) => {
                let _ = entry.pathname();
                let _ = entry.size();
                // Drain at most a few chunks per entry; the rest is skipped by next_header
                for _ in 0..4 {
                    match reader.read_data(&mut buf) {
                        Ok(0) | Err(_) => break,
                        Ok(_) => {}
                    }
                }
            }
            Ok(None) => break,
            Err(e) if e.is_fatal() => break,
            Err(_) => {}
        }
    }
    let _ = reader.close();
});
