use std::io;

use thiserror::Error;

use crate::worker::CrawlReport;

/// A frame could not be turned into (or out of) a `WorkerMessage`.
///
/// Always terminates the offending connection on the mothership side.
#[derive(Error, Debug)]
pub enum ProtocolError {
    #[error("frame exceeds {max} bytes")]
    FrameTooLong { max: usize },

    #[error("frame is not valid UTF-8")]
    InvalidUtf8,

    #[error("malformed frame: {0}")]
    Malformed(#[from] serde_json::Error),
}

/// Anything the codec can fail with: a protocol violation or the
/// underlying socket failing.
#[derive(Error, Debug)]
pub enum FrameError {
    #[error(transparent)]
    Protocol(#[from] ProtocolError),

    #[error("IO error: {0}")]
    Io(#[from] io::Error),
}

/// Connect / send / receive failures between a worker and the mothership.
#[derive(Error, Debug)]
pub enum TransportError {
    #[error("not connected to mothership")]
    NotConnected,

    #[error("connect to {addr} failed: {source}")]
    Connect {
        addr: String,
        #[source]
        source: io::Error,
    },

    /// The mothership closed its end; anything written now would be lost.
    #[error("mothership closed the connection")]
    PeerClosed,

    #[error("IO error: {0}")]
    Io(#[from] io::Error),

    #[error("encode failed: {0}")]
    Encode(#[source] ProtocolError),
}

impl From<FrameError> for TransportError {
    fn from(err: FrameError) -> Self {
        match err {
            FrameError::Io(e) => TransportError::Io(e),
            FrameError::Protocol(e) => TransportError::Encode(e),
        }
    }
}

/// A page could not be retrieved.
#[derive(Error, Debug)]
pub enum FetchError {
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("HTTP status {0}")]
    Status(u16),

    #[error("{0}")]
    Other(String),
}

/// Outcome of a worker crawl that did not end cleanly.
#[derive(Error, Debug)]
pub enum WorkerError {
    /// The crawl ran to completion locally but at least one message
    /// never reached the mothership.
    #[error("crawl finished but results were not delivered: {source}")]
    Undelivered {
        report: Box<CrawlReport>,
        #[source]
        source: TransportError,
    },
}

impl WorkerError {
    /// The local crawl report, available even when delivery failed.
    pub fn report(&self) -> &CrawlReport {
        match self {
            WorkerError::Undelivered { report, .. } => report,
        }
    }
}
