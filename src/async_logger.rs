use std::io;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use tokio::fs::File;
use tokio::io::AsyncWriteExt;
use tokio::sync::{mpsc, oneshot, Mutex, Notify};
use tokio::task::JoinHandle;
use tracing::{debug, error, info};

use crate::codec::encode_into;
use crate::error::{Error, Result};
use crate::record_queue::RecordQueue;
use crate::value::Value;

/// Lifecycle of an [`AsyncLogger`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoggerState {
    /// Accepting records; the write loop is running.
    Open,
    /// Stop requested: no new records, the write loop is finishing.
    Stopping,
    /// The write loop has exited and the file is released.
    Closed,
}

type FlushRequest = oneshot::Sender<Result<()>>;

/// State shared between the logger handle and its write loop.
#[derive(Debug)]
struct Shared {
    queue: RecordQueue,
    wakeup: Notify,
    closed: AtomicBool,
}

/// Write-behind logger for cooperative (tokio) producers.
///
/// [`put`](Self::put) only appends to an in-memory queue. A background task,
/// the write loop, waits for records, drains the queue in batches, encodes
/// each batch and appends it to the file with a single write followed by a
/// flush. That task is the only code that touches the file, so records land
/// in the exact order they were put.
///
/// # Examples
///
/// ```no_run
/// use mpacklog::{record, AsyncLogger};
///
/// # async fn run() -> mpacklog::Result<()> {
/// let logger = AsyncLogger::create("run.mpack").await?;
/// for foo in 0..10 {
///     logger.put(record! { "foo" => foo })?;
/// }
/// logger.stop().await?;
/// # Ok(())
/// # }
/// ```
#[derive(Debug)]
pub struct AsyncLogger {
    path: PathBuf,
    shared: Arc<Shared>,
    flush_tx: mpsc::UnboundedSender<FlushRequest>,
    writer: Mutex<Option<JoinHandle<Result<()>>>>,
}

impl AsyncLogger {
    /// Creates (or truncates) the output file and spawns the write loop on
    /// the current tokio runtime.
    pub async fn create(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        let file = File::create(&path).await?;
        info!(path = %path.display(), "opened log file");

        let shared = Arc::new(Shared {
            queue: RecordQueue::new(),
            wakeup: Notify::new(),
            closed: AtomicBool::new(false),
        });
        let (flush_tx, flush_rx) = mpsc::unbounded_channel();
        let writer = tokio::spawn(write_loop(
            shared.clone(),
            BatchWriter::new(file),
            flush_rx,
            path.clone(),
        ));

        Ok(Self {
            path,
            shared,
            flush_tx,
            writer: Mutex::new(Some(writer)),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Queues a record. Never suspends and never performs I/O.
    ///
    /// Fails with [`Error::InvalidRecord`] if the value is not a map and with
    /// [`Error::LoggerClosed`] once a stop was requested or the write loop
    /// terminated.
    pub fn put(&self, record: Value) -> Result<()> {
        if !record.is_record() {
            return Err(Error::InvalidRecord("top-level value must be a map"));
        }
        self.shared
            .queue
            .enqueue(record)
            .map_err(|_| Error::LoggerClosed)?;
        self.shared.wakeup.notify_one();
        Ok(())
    }

    /// Number of records not yet handed to the file.
    pub fn pending(&self) -> usize {
        self.shared.queue.len()
    }

    pub fn state(&self) -> LoggerState {
        if self.shared.closed.load(Ordering::Acquire) {
            LoggerState::Closed
        } else if self.shared.queue.is_closed() {
            LoggerState::Stopping
        } else {
            LoggerState::Open
        }
    }

    /// Writes everything queued so far and waits until it is flushed.
    ///
    /// The write itself still happens on the write loop; this call returns
    /// once that cycle completed. The loop keeps running afterwards.
    pub async fn flush(&self) -> Result<()> {
        if self.state() != LoggerState::Open {
            return Err(Error::LoggerClosed);
        }
        let (ack_tx, ack_rx) = oneshot::channel();
        self.flush_tx
            .send(ack_tx)
            .map_err(|_| Error::LoggerClosed)?;
        ack_rx.await.map_err(|_| Error::LoggerClosed)?
    }

    /// Stops the write loop and waits for it to finish.
    ///
    /// Every record accepted before the stop is written by the loop's final
    /// drain before the file is closed. A write failure that terminated the
    /// loop is returned here. Calling `stop` again returns `Ok(())`.
    ///
    /// Concurrent callers all return only after the final drain: the handle
    /// stays locked until the loop has exited.
    pub async fn stop(&self) -> Result<()> {
        self.shared.queue.close();
        self.shared.wakeup.notify_one();
        let mut writer = self.writer.lock().await;
        let Some(handle) = writer.as_mut() else {
            return Ok(());
        };
        let joined = handle.await;
        *writer = None;
        joined.map_err(|e| Error::Io(io::Error::other(e)))?
    }
}

impl Drop for AsyncLogger {
    fn drop(&mut self) {
        // The detached loop still performs its final drain.
        self.shared.queue.close();
        self.shared.wakeup.notify_one();
    }
}

/// Owns the output file and the scratch buffer batches are encoded into.
struct BatchWriter {
    file: File,
    scratch: Vec<u8>,
}

impl BatchWriter {
    fn new(file: File) -> Self {
        Self {
            file,
            scratch: Vec::new(),
        }
    }

    /// One drain-encode-append-flush cycle. An empty queue writes nothing.
    async fn write_batch(&mut self, queue: &RecordQueue) -> Result<()> {
        let batch = queue.drain();
        if batch.is_empty() {
            return Ok(());
        }
        self.scratch.clear();
        for record in &batch {
            encode_into(record, &mut self.scratch);
        }
        self.file.write_all(&self.scratch).await?;
        self.file.flush().await?;
        debug!(records = batch.len(), bytes = self.scratch.len(), "wrote batch");
        Ok(())
    }
}

async fn write_loop(
    shared: Arc<Shared>,
    mut writer: BatchWriter,
    mut flush_rx: mpsc::UnboundedReceiver<FlushRequest>,
    path: PathBuf,
) -> Result<()> {
    let outcome = drive(&shared, &mut writer, &mut flush_rx).await;

    shared.queue.close();
    shared.closed.store(true, Ordering::Release);
    flush_rx.close();
    if let Err(e) = &outcome {
        // Flushes queued behind the failed write report that failure.
        while let Ok(ack) = flush_rx.try_recv() {
            let _ = ack.send(Err(e.duplicate()));
        }
    }
    // Any other flush request still in the channel observes LoggerClosed.
    drop(flush_rx);

    match &outcome {
        Ok(()) => info!(path = %path.display(), "closed log file"),
        Err(e) => error!(path = %path.display(), error = %e, "write loop failed"),
    }
    outcome
}

async fn drive(
    shared: &Shared,
    writer: &mut BatchWriter,
    flush_rx: &mut mpsc::UnboundedReceiver<FlushRequest>,
) -> Result<()> {
    loop {
        tokio::select! {
            Some(ack) = flush_rx.recv() => {
                match writer.write_batch(&shared.queue).await {
                    Ok(()) => {
                        let _ = ack.send(Ok(()));
                    }
                    Err(e) => {
                        let _ = ack.send(Err(e.duplicate()));
                        return Err(e);
                    }
                }
            }
            _ = shared.wakeup.notified() => {
                writer.write_batch(&shared.queue).await?;
            }
        }

        if shared.queue.is_closed() {
            // Final drain: nothing can be enqueued past this point.
            return writer.write_batch(&shared.queue).await;
        }
    }
}
