//! Multi-volume sources.
//!
//! An archive split across several files or devices is read through a
//! [`MultiVolumeSource`], which presents the volumes as one continuous
//! [`ByteSource`](crate::io::ByteSource). The filter chain and format codec
//! above it never see the boundaries; the source closes the exhausted volume,
//! opens the next one and reports the switch to an optional hook.
//!
//! # Volume Naming Convention
//!
//! [`MultiVolumeSource::open_numbered`] discovers volumes named
//! `<base>.001`, `<base>.002`, ... The volume number is always 3 digits,
//! padded with zeros.
//!
//! ```rust,no_run
//! use arcstream::volume::MultiVolumeSource;
//! use arcstream::{ArchiveReader, ReadOptions};
//!
//! # fn main() -> arcstream::Result<()> {
//! let source = MultiVolumeSource::open_numbered("backup.tar.001")?
//!     .on_switch(|old, new| eprintln!("volume {} -> {}", old + 1, new + 1));
//! let mut reader = ArchiveReader::open(source, ReadOptions::new())?;
//! while let Some(entry) = reader.next_header()? {
//!     println!("{:?}", entry.pathname());
//! }
//! # Ok(())
//! # }
//! ```

mod source;

pub use source::{MultiVolumeSource, VolumeSwitch};
