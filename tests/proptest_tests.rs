//! Property-based tests using proptest.
//!
//! The round-trip law: N entries written through a write session read back
//! as the same N entries, in order, with equal metadata and identical data.

mod common;

use proptest::prelude::*;

use arcstream::{
    ArchiveReader, EntryMetadata, EntryType, FilterCode, FormatCode, ReadOptions, Timestamp,
    WriteOptions,
};

#[derive(Debug, Clone)]
struct Sample {
    name: String,
    kind: EntryType,
    perm: u32,
    mtime: i64,
    data: Vec<u8>,
}

impl Sample {
    fn metadata(&self) -> EntryMetadata {
        let entry = match self.kind {
            EntryType::Directory => EntryMetadata::directory(format!("{}/", self.name)),
            _ => EntryMetadata::file(self.name.as_str(), self.data.len() as u64),
        };
        entry
            .with_perm(self.perm)
            .with_mtime(Timestamp::from_unix_secs(self.mtime))
            .with_owner(1000, 1000)
    }

    fn payload(&self) -> &[u8] {
        match self.kind {
            EntryType::Directory => &[],
            _ => &self.data,
        }
    }
}

fn sample_strategy() -> impl Strategy<Value = Sample> {
    (
        "[a-z][a-z0-9_.-]{0,20}(/[a-z0-9_-]{1,12}){0,3}",
        prop_oneof![3 => Just(EntryType::File), 1 => Just(EntryType::Directory)],
        0u32..0o7777,
        0i64..=i64::from(u32::MAX),
        proptest::collection::vec(any::<u8>(), 0..4096),
    )
        .prop_map(|(name, kind, perm, mtime, data)| Sample {
            name,
            kind,
            perm,
            mtime,
            data,
        })
}

fn format_strategy() -> impl Strategy<Value = FormatCode> {
    prop_oneof![
        Just(FormatCode::Spool),
        Just(FormatCode::TarUstar),
        Just(FormatCode::TarPax),
        Just(FormatCode::CpioNewc),
        Just(FormatCode::CpioCrc),
    ]
}

fn filter_strategy() -> impl Strategy<Value = Vec<FilterCode>> {
    let available: Vec<FilterCode> = FilterCode::ALL
        .into_iter()
        .filter(|c| *c != FilterCode::None && c.is_available())
        .collect();
    proptest::sample::subsequence(available, 0..=1)
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(48))]

    #[test]
    fn roundtrip_law(
        samples in proptest::collection::vec(sample_strategy(), 0..8),
        format in format_strategy(),
        filters in filter_strategy(),
    ) {
        let entries: Vec<(EntryMetadata, &[u8])> =
            samples.iter().map(|s| (s.metadata(), s.payload())).collect();
        let bytes = common::write_archive(
            WriteOptions::new().format(format).filters(filters.iter().copied()),
            &entries,
        ).unwrap();

        let read = common::read_all(bytes, ReadOptions::new()).unwrap();
        prop_assert_eq!(read.len(), entries.len());
        for ((written, data), (back, back_data)) in entries.iter().zip(&read) {
            prop_assert_eq!(back.pathname(), written.pathname());
            prop_assert_eq!(back.entry_type(), written.entry_type());
            prop_assert_eq!(back.perm(), written.perm());
            prop_assert_eq!(back.mtime(), written.mtime());
            prop_assert_eq!(back.uid(), written.uid());
            prop_assert_eq!(back.size().unwrap_or(0), data.len() as u64);
            prop_assert_eq!(back_data.as_slice(), *data);
        }
    }

    /// Arbitrary bytes never panic the reader.
    #[test]
    fn arbitrary_input_does_not_panic(data in proptest::collection::vec(any::<u8>(), 0..2048)) {
        if let Ok(mut reader) = ArchiveReader::open_memory(data, ReadOptions::new()) {
            let mut buf = [0u8; 512];
            for _ in 0..64 {
                match reader.next_header() {
                    Ok(Some(_)) => {
                        while let Ok(n) = reader.read_data(&mut buf) {
                            if n == 0 {
                                break;
                            }
                        }
                    }
                    Ok(None) => break,
                    Err(e) if e.is_fatal() => break,
                    Err(_) => {}
                }
            }
        }
    }

    /// Option strings either parse or fail with an option error.
    #[test]
    fn option_strings_parse_or_reject(text in "[a-z:=!,]{0,24}") {
        match arcstream::options::OptionSet::parse(&text) {
            Ok(_) => {}
            Err(e) => prop_assert!(matches!(e, arcstream::Error::InvalidOption { .. }), "unexpected error: {:?}", e),
        }
    }
}
