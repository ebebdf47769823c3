use std::fs::{File, OpenOptions};
use std::io::{self, Write};
use std::path::{Path, PathBuf};

use tracing::{debug, info};

use crate::codec::encode_into;
use crate::error::{Error, Result};
use crate::record_queue::RecordQueue;
use crate::value::Value;

/// Logger with synchronous I/O.
///
/// Exposes the same queue discipline as [`AsyncLogger`](crate::AsyncLogger)
/// without a background task: records accumulate on [`put`](Self::put) and
/// reach the file when the caller invokes [`write`](Self::write). For the same
/// sequence of `put` calls both loggers produce byte-identical files.
///
/// There is no stop: call `write` one last time before dropping the logger.
///
/// # Examples
///
/// ```no_run
/// use mpacklog::{record, SyncLogger};
///
/// # fn main() -> mpacklog::Result<()> {
/// let mut logger = SyncLogger::create("run.mpack")?;
/// logger.put(record! { "foo" => 0, "something" => "else" })?;
/// logger.put(record! { "foo" => 1, "something" => "else" })?;
/// logger.write()?;
/// # Ok(())
/// # }
/// ```
#[derive(Debug)]
pub struct SyncLogger {
    path: PathBuf,
    queue: RecordQueue,
    file: File,
    scratch: Vec<u8>,
}

impl SyncLogger {
    /// Creates the output file. Refuses to touch a file that already exists.
    pub fn create(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        let file = OpenOptions::new()
            .write(true)
            .create_new(true)
            .open(&path)
            .map_err(|e| match e.kind() {
                io::ErrorKind::AlreadyExists => {
                    Error::Config(format!("{} already exists", path.display()))
                }
                _ => Error::Io(e),
            })?;
        info!(path = %path.display(), "opened log file");
        Ok(Self {
            path,
            queue: RecordQueue::new(),
            file,
            scratch: Vec::new(),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Queues a record for the next [`write`](Self::write).
    pub fn put(&mut self, record: Value) -> Result<()> {
        if !record.is_record() {
            return Err(Error::InvalidRecord("top-level value must be a map"));
        }
        self.queue
            .enqueue(record)
            .map_err(|_| Error::LoggerClosed)
    }

    /// Queues a record and writes the queue to file right away.
    pub fn put_and_write(&mut self, record: Value) -> Result<()> {
        self.put(record)?;
        self.write()
    }

    /// Number of records waiting for the next write.
    pub fn pending(&self) -> usize {
        self.queue.len()
    }

    /// Drains the queue and appends every record to the file, then flushes.
    ///
    /// The whole batch is handed to the file in one write. With an empty
    /// queue nothing is written.
    pub fn write(&mut self) -> Result<()> {
        let batch = self.queue.drain();
        if batch.is_empty() {
            return Ok(());
        }
        self.scratch.clear();
        for record in &batch {
            encode_into(record, &mut self.scratch);
        }
        self.file.write_all(&self.scratch)?;
        self.file.flush()?;
        debug!(records = batch.len(), bytes = self.scratch.len(), "wrote batch");
        Ok(())
    }
}
