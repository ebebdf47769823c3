use std::io;

use thiserror::Error;

/// Result type used throughout the crate.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors surfaced by loggers, watchers and the log server.
#[derive(Debug, Error)]
pub enum Error {
    /// Invalid target path, address or option. Reported at startup.
    #[error("configuration error: {0}")]
    Config(String),

    /// A `put` argument that is not a Mapping-rooted value.
    #[error("invalid record: {0}")]
    InvalidRecord(&'static str),

    /// The logger was stopped, or its write loop terminated.
    #[error("logger is closed")]
    LoggerClosed,

    #[error(transparent)]
    Io(#[from] io::Error),

    #[error(transparent)]
    Decode(#[from] DecodeError),
}

impl Error {
    /// Copies an error so it can be reported to more than one waiter.
    ///
    /// `io::Error` is not `Clone`; the copy keeps the kind and message.
    pub(crate) fn duplicate(&self) -> Error {
        match self {
            Error::Config(msg) => Error::Config(msg.clone()),
            Error::InvalidRecord(msg) => Error::InvalidRecord(msg),
            Error::LoggerClosed => Error::LoggerClosed,
            Error::Io(e) => Error::Io(io::Error::new(e.kind(), e.to_string())),
            Error::Decode(e) => Error::Decode(e.clone()),
        }
    }
}

/// Malformed bytes found while decoding a stream.
///
/// `offset` is the absolute position of the offending byte in the stream
/// (or file) being decoded.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("malformed data at byte {offset}: {kind}")]
pub struct DecodeError {
    pub offset: u64,
    pub kind: DecodeErrorKind,
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DecodeErrorKind {
    #[error("reserved marker 0x{0:02x}")]
    ReservedMarker(u8),

    #[error("unsupported extension type (marker 0x{0:02x})")]
    UnsupportedExtension(u8),

    #[error("string is not valid UTF-8")]
    InvalidUtf8,

    #[error("map key is not a string")]
    NonStringKey,

    #[error("nesting exceeds {0} levels")]
    TooDeep(usize),
}
