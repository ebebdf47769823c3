use std::collections::VecDeque;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::time::{Duration, SystemTime};

use futures::stream::{self, Stream};
use tokio::fs::File;
use tokio::io::AsyncReadExt;
use tracing::{debug, info};

use crate::codec::StreamDecoder;
use crate::config::WatcherConfig;
use crate::error::{Error, Result};
use crate::value::Value;

/// Picks the log file to open.
///
/// A path to a file is returned as is. For a directory, the file with the
/// given extension and the latest modification time is selected; ties go to
/// the greatest file name. The choice is made once: a watcher never switches
/// to a newer file later on.
pub fn find_log_file(path: impl AsRef<Path>, extension: &str) -> Result<PathBuf> {
    let path = path.as_ref();
    let metadata = fs::metadata(path)
        .map_err(|e| Error::Config(format!("cannot open {}: {}", path.display(), e)))?;
    if metadata.is_file() {
        return Ok(path.to_path_buf());
    }

    let unreadable =
        |e: io::Error| Error::Config(format!("cannot list {}: {}", path.display(), e));
    let mut candidates = Vec::new();
    for entry in fs::read_dir(path).map_err(unreadable)? {
        let candidate = entry.map_err(unreadable)?.path();
        if candidate.extension().and_then(|e| e.to_str()) != Some(extension) {
            continue;
        }
        // Follows symlinks, so a dangling link is reported rather than skipped.
        let metadata = fs::metadata(&candidate).map_err(|e| {
            Error::Config(format!("cannot open {}: {}", candidate.display(), e))
        })?;
        if !metadata.is_file() {
            continue;
        }
        let modified = metadata.modified().unwrap_or(SystemTime::UNIX_EPOCH);
        candidates.push((modified, candidate));
    }

    let (_, newest) = select_newest(candidates).ok_or_else(|| {
        Error::Config(format!(
            "no .{} file in {}",
            extension,
            path.display()
        ))
    })?;
    info!(
        dir = %path.display(),
        file = %newest.display(),
        "opening the most recent log"
    );
    Ok(newest)
}

fn select_newest(candidates: Vec<(SystemTime, PathBuf)>) -> Option<(SystemTime, PathBuf)> {
    candidates
        .into_iter()
        .max_by(|a, b| a.0.cmp(&b.0).then_with(|| a.1.file_name().cmp(&b.1.file_name())))
}

/// Tails a growing log file and yields the values appended to it.
///
/// Each growth check reads everything past the last observed offset and
/// decodes the complete values. Bytes of a value that is still being written
/// are kept and decoding is retried on the next check, so a value is only
/// ever yielded once it is complete, and exactly once.
///
/// Malformed bytes end the sequence with [`Error::Decode`] carrying the byte
/// offset; the watcher does not skip ahead.
#[derive(Debug)]
pub struct FileWatcher {
    path: PathBuf,
    file: File,
    decoder: StreamDecoder,
    chunk: Vec<u8>,
    ready: VecDeque<Value>,
    poll_interval: Duration,
    offset: u64,
}

impl FileWatcher {
    /// Opens a file, or the most recent log file of a directory, for tailing
    /// from its first byte.
    pub async fn open(target: impl AsRef<Path>, config: &WatcherConfig) -> Result<Self> {
        config.validate()?;
        let target = target.as_ref().to_path_buf();
        let extension = config.extension.clone();
        let path = tokio::task::spawn_blocking(move || find_log_file(target, &extension))
            .await
            .map_err(io::Error::other)??;
        let file = File::open(&path).await?;
        Ok(Self {
            path,
            file,
            decoder: StreamDecoder::new(),
            chunk: vec![0; config.read_chunk_size],
            ready: VecDeque::new(),
            poll_interval: config.poll_interval,
            offset: 0,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Bytes read from the file so far.
    pub fn offset(&self) -> u64 {
        self.offset
    }

    /// Performs one growth check and returns the values it completed.
    ///
    /// An empty result means the file did not grow, or only grew by part of
    /// a value.
    pub async fn poll(&mut self) -> Result<Vec<Value>> {
        let mut grown = 0usize;
        loop {
            let n = self.file.read(&mut self.chunk).await?;
            if n == 0 {
                break;
            }
            self.decoder.feed(&self.chunk[..n]);
            grown += n;
        }
        self.offset += grown as u64;

        let mut values: Vec<Value> = self.ready.drain(..).collect();
        loop {
            match self.decoder.next_value() {
                Ok(Some(value)) => values.push(value),
                Ok(None) => break,
                Err(e) if values.is_empty() => return Err(e.into()),
                // The decoder stays on the bad byte; the next check reports it.
                Err(_) => break,
            }
        }
        if grown > 0 {
            debug!(
                bytes = grown,
                values = values.len(),
                pending = self.decoder.buffered(),
                "log file grew"
            );
        }
        Ok(values)
    }

    /// Decodes everything currently in the file and returns the last value.
    pub async fn catch_up(&mut self) -> Result<Option<Value>> {
        Ok(self.poll().await?.pop())
    }

    /// Waits for the next value, checking the file every poll interval.
    pub async fn next(&mut self) -> Result<Value> {
        loop {
            if let Some(value) = self.ready.pop_front() {
                return Ok(value);
            }
            let values = self.poll().await?;
            if values.is_empty() {
                tokio::time::sleep(self.poll_interval).await;
            } else {
                self.ready.extend(values);
            }
        }
    }

    /// Turns the watcher into an endless stream of values.
    ///
    /// The stream ends right after yielding its first error.
    pub fn into_stream(self) -> impl Stream<Item = Result<Value>> {
        stream::unfold(Some(self), |state| async move {
            let mut watcher = state?;
            match watcher.next().await {
                Ok(value) => Some((Ok(value), Some(watcher))),
                Err(e) => Some((Err(e), None)),
            }
        })
    }
}
