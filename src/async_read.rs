//! Driving a read session from async code.
//!
//! Sessions are blocking and single-threaded. [`spawn_reader`] runs one on
//! Tokio's blocking pool and streams what it reads back through a bounded
//! channel, so an async task can consume an archive without blocking its
//! executor.
//!
//! # Example
//!
//! ```rust,no_run
//! use arcstream::async_read::{ReaderEvent, spawn_reader};
//! use arcstream::io::FileSource;
//! use arcstream::ReadOptions;
//!
//! #[tokio::main]
//! async fn main() -> arcstream::Result<()> {
//!     let mut handle = spawn_reader(FileSource::new("backup.tar"), ReadOptions::new());
//!     while let Some(event) = handle.next_event().await {
//!         match event {
//!             ReaderEvent::Header(entry) => println!("{:?}", entry.pathname()),
//!             ReaderEvent::Data(chunk) => println!("  {} bytes", chunk.len()),
//!             ReaderEvent::EntryError(e) => eprintln!("  skipped: {}", e),
//!             ReaderEvent::End => break,
//!         }
//!     }
//!     handle.join().await
//! }
//! ```
//!
//! # Cancellation
//!
//! Dropping the [`ReaderHandle`] (or calling [`ReaderHandle::join`] before
//! the end) stops the worker at its next chunk boundary. The session is
//! closed on the worker thread either way.

use std::io;

use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use crate::entry::EntryMetadata;
use crate::io::ByteSource;
use crate::read::{ArchiveReader, ReadOptions};
use crate::{Error, READ_BUFFER_SIZE, Result};

/// Events in channel capacity.
const EVENT_QUEUE_DEPTH: usize = 16;

/// Largest data chunk sent in one event.
const CHUNK_SIZE: usize = READ_BUFFER_SIZE * 8;

/// One step of a read session.
#[derive(Debug)]
pub enum ReaderEvent {
    /// A new entry. Its data follows as [`ReaderEvent::Data`] events.
    Header(EntryMetadata),
    /// A chunk of the current entry's data.
    Data(Vec<u8>),
    /// The current entry (or its header) failed; the next event belongs to
    /// the following entry.
    EntryError(Error),
    /// The archive ended normally.
    End,
}

/// The consumer side of a spawned read session.
#[derive(Debug)]
pub struct ReaderHandle {
    events: mpsc::Receiver<ReaderEvent>,
    task: JoinHandle<Result<()>>,
}

impl ReaderHandle {
    /// Waits for the next event. `None` once the worker has stopped.
    pub async fn next_event(&mut self) -> Option<ReaderEvent> {
        self.events.recv().await
    }

    /// Returns true once the worker has stopped, whether or not its events
    /// were received.
    pub fn is_finished(&self) -> bool {
        self.task.is_finished()
    }

    /// Stops consuming and waits for the worker to finish.
    ///
    /// Returns the session's fatal error, if any. Undelivered events are
    /// dropped. If the worker was still blocked on a full channel it is
    /// cancelled and this returns [`Error::Cancelled`]; if it had already
    /// queued everything, including [`ReaderEvent::End`], this returns
    /// `Ok(())` even though the events were never received.
    pub async fn join(self) -> Result<()> {
        let Self { events, task } = self;
        drop(events);
        task.await.map_err(|e| Error::Io(io::Error::other(e)))?
    }
}

/// Runs a read session over `source` on the blocking thread pool.
///
/// Must be called from within a Tokio runtime.
pub fn spawn_reader(source: impl ByteSource + 'static, options: ReadOptions) -> ReaderHandle {
    let (tx, events) = mpsc::channel(EVENT_QUEUE_DEPTH);
    let task = tokio::task::spawn_blocking(move || drive(source, options, &tx));
    ReaderHandle { events, task }
}

fn send(tx: &mpsc::Sender<ReaderEvent>, event: ReaderEvent) -> Result<()> {
    tx.blocking_send(event).map_err(|_| Error::Cancelled)
}

fn drive(
    source: impl ByteSource + 'static,
    options: ReadOptions,
    tx: &mpsc::Sender<ReaderEvent>,
) -> Result<()> {
    let mut reader = ArchiveReader::open(source, options)?;
    let mut buf = vec![0u8; CHUNK_SIZE];
    loop {
        let entry = match reader.next_header() {
            Ok(Some(entry)) => entry,
            Ok(None) => break,
            Err(e) if e.is_fatal() => return Err(e),
            Err(e) => {
                send(tx, ReaderEvent::EntryError(e))?;
                continue;
            }
        };
        send(tx, ReaderEvent::Header(entry))?;
        loop {
            match reader.read_data(&mut buf) {
                Ok(0) => break,
                Ok(n) => send(tx, ReaderEvent::Data(buf[..n].to_vec()))?,
                Err(e) if e.is_fatal() => return Err(e),
                Err(e) => {
                    send(tx, ReaderEvent::EntryError(e))?;
                    break;
                }
            }
        }
    }
    log::debug!("Async reader finished after {} entries", reader.file_count());
    send(tx, ReaderEvent::End)?;
    reader.close()
}
