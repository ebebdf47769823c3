//! # mpacklog
//!
//! Write-behind logging of structured records to MessagePack files, and a
//! server that streams the newest record of a growing log to TCP clients.
//!
//! * **Non-blocking producers**: `put` only appends to an in-memory queue;
//!   encoding and disk I/O happen on a writer that drains the queue in batches
//! * **Plain log format**: a log is a concatenation of MessagePack values, no
//!   header and no framing; any prefix ending on a record boundary is a valid log
//! * **Live tailing**: a file watcher decodes records as they are appended and
//!   tolerates records that are only partially written
//!
//! ## Main Components
//!
//! * [`Value`]: the dynamically-typed record payload, built with [`record!`]
//! * [`codec`]: encoding, stream decoding and [`codec::read_log`]
//! * [`AsyncLogger`]: write-behind logger driven by a tokio task
//! * [`SyncLogger`]: the same queue discipline with explicit, blocking writes
//! * [`FileWatcher`]: tails a log file (or the newest log in a directory)
//! * [`LogServer`] / [`StreamClient`]: push the last record to subscribers
//!
//! ## Quick Start
//!
//! ```no_run
//! use mpacklog::{record, AsyncLogger};
//!
//! #[tokio::main]
//! async fn main() -> mpacklog::Result<()> {
//!     let logger = AsyncLogger::create("run.mpack").await?;
//!     logger.put(record! { "foo" => 0, "something" => "else" })?;
//!     logger.put(record! { "foo" => 1, "something" => "else" })?;
//!     logger.stop().await?;
//!
//!     for record in mpacklog::codec::read_log("run.mpack")? {
//!         println!("{:?}", record?);
//!     }
//!     Ok(())
//! }
//! ```

pub mod async_logger;
pub mod client;
pub mod codec;
pub mod config;
pub mod error;
pub mod record_queue;
pub mod server;
pub mod sync_logger;
pub mod value;
pub mod watcher;

pub use async_logger::{AsyncLogger, LoggerState};
pub use client::StreamClient;
pub use codec::{decode_stream, encode, encode_into, read_log, LogReader, StreamDecoder};
pub use config::{ServerConfig, WatcherConfig};
pub use error::{DecodeError, DecodeErrorKind, Error, Result};
pub use server::{LogServer, ServerHandle};
pub use sync_logger::SyncLogger;
pub use value::{Float, Integer, Value};
pub use watcher::{find_log_file, FileWatcher};
