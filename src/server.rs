use std::io;
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use bytes::Bytes;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::codec::encode;
use crate::config::ServerConfig;
use crate::error::{Error, Result};
use crate::value::Value;
use crate::watcher::FileWatcher;

/// The last observed record, encoded once and shared by every subscriber.
#[derive(Debug, Clone)]
struct Snapshot {
    record: Arc<Value>,
    encoded: Bytes,
}

impl Snapshot {
    fn new(record: Value) -> Self {
        let encoded = Bytes::from(encode(&record));
        Self {
            record: Arc::new(record),
            encoded,
        }
    }
}

type State = Arc<watch::Sender<Option<Snapshot>>>;

/// Streams the most recent record of a log file to TCP clients.
///
/// The server runs three kinds of tasks: one tails the log file, one accepts
/// connections, and one per connection pushes records. They share a single
/// slot holding the last record. Every new record overwrites the slot and
/// wakes the connection tasks; a connection that is still busy sending only
/// picks up whatever is newest once it is ready (last value wins). Records
/// are never reordered, and nothing is queued per connection.
///
/// On the wire, each record is one encoded value. A client receives the
/// current record as soon as it connects, then every record observed after
/// that. Bytes sent by clients are ignored.
///
/// # Examples
///
/// ```no_run
/// use mpacklog::{LogServer, ServerConfig};
///
/// # async fn run() -> mpacklog::Result<()> {
/// let server = LogServer::bind(ServerConfig::new("logs/").with_port(4747)).await?;
/// server.run().await
/// # }
/// ```
#[derive(Debug)]
pub struct LogServer {
    log_file: PathBuf,
    listener: TcpListener,
    local_addr: SocketAddr,
    watcher: FileWatcher,
    state: State,
    shutdown: CancellationToken,
}

/// Cheap handle to observe or stop a running [`LogServer`].
#[derive(Debug, Clone)]
pub struct ServerHandle {
    local_addr: SocketAddr,
    state: State,
    shutdown: CancellationToken,
}

impl LogServer {
    /// Opens the log, catches up with its current content and binds the
    /// listener.
    ///
    /// The last record already in the file, if any, becomes the initial
    /// state sent to connecting clients.
    pub async fn bind(config: ServerConfig) -> Result<Self> {
        config.validate()?;
        let addr = config.socket_addr()?;

        let mut watcher = FileWatcher::open(&config.log_path, &config.watcher).await?;
        let initial = watcher
            .poll()
            .await?
            .into_iter()
            .rev()
            .find(Value::is_record);

        let listener = TcpListener::bind(addr).await?;
        let local_addr = listener.local_addr()?;
        info!(
            addr = %local_addr,
            log = %watcher.path().display(),
            has_record = initial.is_some(),
            "log server listening"
        );

        let (state, _) = watch::channel(initial.map(Snapshot::new));
        Ok(Self {
            log_file: watcher.path().to_path_buf(),
            listener,
            local_addr,
            watcher,
            state: Arc::new(state),
            shutdown: CancellationToken::new(),
        })
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// The file being served, after directory resolution.
    pub fn log_file(&self) -> &Path {
        &self.log_file
    }

    pub fn last_record(&self) -> Option<Arc<Value>> {
        self.handle().last_record()
    }

    pub fn subscriber_count(&self) -> usize {
        self.handle().subscriber_count()
    }

    /// Token that stops the server once cancelled.
    pub fn shutdown_token(&self) -> CancellationToken {
        self.shutdown.clone()
    }

    pub fn handle(&self) -> ServerHandle {
        ServerHandle {
            local_addr: self.local_addr,
            state: self.state.clone(),
            shutdown: self.shutdown.clone(),
        }
    }

    /// Serves clients until shut down or until the log can no longer be read.
    ///
    /// A failure of the file watcher (I/O error, malformed log) closes every
    /// connection and is returned. Connection failures only drop the
    /// affected client.
    pub async fn run(self) -> Result<()> {
        let LogServer {
            listener,
            watcher,
            state,
            shutdown,
            ..
        } = self;

        let mut watch_task = tokio::spawn(watch_log(watcher, state.clone(), shutdown.clone()));

        let finished = loop {
            tokio::select! {
                _ = shutdown.cancelled() => break None,
                joined = &mut watch_task => break Some(joined),
                accepted = listener.accept() => match accepted {
                    Ok((stream, peer)) => {
                        tokio::spawn(serve_subscriber(
                            stream,
                            peer,
                            state.subscribe(),
                            shutdown.clone(),
                        ));
                    }
                    Err(e) => warn!(error = %e, "failed to accept connection"),
                },
            }
        };

        shutdown.cancel();
        let joined = match finished {
            Some(joined) => joined,
            None => watch_task.await,
        };
        let outcome = joined.map_err(|e| Error::Io(io::Error::other(e)))?;
        match &outcome {
            Ok(()) => info!("log server stopped"),
            Err(e) => error!(error = %e, "log server stopped: cannot follow log"),
        }
        outcome
    }
}

impl ServerHandle {
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    pub fn last_record(&self) -> Option<Arc<Value>> {
        self.state
            .borrow()
            .as_ref()
            .map(|snapshot| snapshot.record.clone())
    }

    /// Number of connected clients.
    pub fn subscriber_count(&self) -> usize {
        self.state.receiver_count()
    }

    pub fn shutdown(&self) {
        self.shutdown.cancel();
    }
}

/// Publishes every record appended to the log.
async fn watch_log(
    mut watcher: FileWatcher,
    state: State,
    shutdown: CancellationToken,
) -> Result<()> {
    loop {
        let value = tokio::select! {
            _ = shutdown.cancelled() => return Ok(()),
            value = watcher.next() => value?,
        };
        if !value.is_record() {
            warn!(
                kind = value.kind(),
                offset = watcher.offset(),
                "skipping value that is not a record"
            );
            continue;
        }
        state.send_replace(Some(Snapshot::new(value)));
    }
}

async fn serve_subscriber(
    stream: TcpStream,
    peer: SocketAddr,
    mut updates: watch::Receiver<Option<Snapshot>>,
    shutdown: CancellationToken,
) {
    info!(%peer, "new connection");
    let (mut reader, mut writer) = stream.into_split();
    let mut discard = [0u8; 1024];
    let mut pending = updates.borrow_and_update().clone();

    loop {
        if let Some(snapshot) = pending.take() {
            tokio::select! {
                _ = shutdown.cancelled() => break,
                sent = writer.write_all(&snapshot.encoded) => {
                    if let Err(e) = sent {
                        warn!(%peer, error = %e, "failed to send record");
                        break;
                    }
                }
            }
        }

        tokio::select! {
            _ = shutdown.cancelled() => break,
            changed = updates.changed() => {
                if changed.is_err() {
                    break;
                }
                pending = updates.borrow_and_update().clone();
            }
            read = reader.read(&mut discard) => match read {
                Ok(0) => {
                    debug!(%peer, "connection closed by peer");
                    break;
                }
                Ok(_) => {}
                Err(e) => {
                    warn!(%peer, error = %e, "connection failed");
                    break;
                }
            },
        }
    }

    info!(%peer, "closing connection");
}
