//! Error types for a single Nice protocol exchange.
//!
//! Every error is scoped to one request: the load driver turns it into a
//! failed outcome and the probe prints it.

use std::fmt;
use std::time::Duration;
use thiserror::Error;

/// Which part of a frame was being read when the peer went away.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FramePart {
    Header,
    Data,
}

impl fmt::Display for FramePart {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FramePart::Header => write!(f, "header"),
            FramePart::Data => write!(f, "data"),
        }
    }
}

/// Socket operation a timeout applies to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Operation {
    Connect,
    Write,
    Read,
}

impl fmt::Display for Operation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Operation::Connect => write!(f, "connect"),
            Operation::Write => write!(f, "write"),
            Operation::Read => write!(f, "read"),
        }
    }
}

/// Errors produced while framing or exchanging a Nice message.
#[derive(Debug, Error)]
pub enum Error {
    /// Text that cannot be represented in (or decoded from) EUC-KR.
    #[error("{0} is not representable in EUC-KR")]
    Encoding(&'static str),

    /// Payload length does not fit the 10-digit header.
    #[error("payload of {0} bytes does not fit a 10-digit length header")]
    FrameTooLarge(u64),

    #[error("failed to connect to {addr}: {source}")]
    Connect {
        addr: String,
        #[source]
        source: std::io::Error,
    },

    /// Peer closed the connection before a full frame arrived.
    #[error("Connection closed while reading {0}")]
    Closed(FramePart),

    #[error("socket error: {0}")]
    Io(#[from] std::io::Error),

    #[error("{op} timed out after {timeout:?}")]
    Timeout { op: Operation, timeout: Duration },

    /// Length header that is not 10 ASCII digits, or disagrees with the payload.
    #[error("malformed frame: {0}")]
    Protocol(String),
}

/// Coarse classification used for reporting.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    Encoding,
    FrameTooLarge,
    Connection,
    Timeout,
    Protocol,
}

impl Error {
    pub fn kind(&self) -> ErrorKind {
        match self {
            Error::Encoding(_) => ErrorKind::Encoding,
            Error::FrameTooLarge(_) => ErrorKind::FrameTooLarge,
            Error::Connect { .. } | Error::Closed(_) | Error::Io(_) => ErrorKind::Connection,
            Error::Timeout { .. } => ErrorKind::Timeout,
            Error::Protocol(_) => ErrorKind::Protocol,
        }
    }
}

pub type Result<T> = std::result::Result<T, Error>;
