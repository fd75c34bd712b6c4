use std::io;
use thiserror::Error;

/// Violations of the wire framing. These are fatal to the connection.
#[derive(Debug, Error)]
pub enum FramingError {
    #[error("declared payload length {declared} exceeds the maximum of {max} bytes")]
    PayloadTooLarge { declared: u32, max: usize },
    #[error("end of stream while {0}")]
    EndOfStream(&'static str),
    #[error("corrupt compressed stream: {0}")]
    Decompression(String),
    #[error("compression failed: {0}")]
    Compression(String),
    #[error(transparent)]
    Io(#[from] io::Error),
}

#[derive(Debug, Error)]
pub enum HandshakeError {
    /// malformed greeting, status line or header lines
    #[error("bad handshake: {0}")]
    BadHandshake(String),
    /// a well-formed handshake that either side answered with something other than 200
    #[error("handshake rejected with {code} {message}")]
    NoGnutellaOk { code: u16, message: String },
    #[error("connection to self")]
    ConnectionToSelf,
    #[error("handshake timed out")]
    Timeout,
    #[error("connection was closed during the handshake")]
    Closed,
    #[error(transparent)]
    Io(#[from] io::Error),
}

/// Why a connection was closed, as reported to the
///  [ConnectionListener](crate::connection::observer::ConnectionListener).
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum CloseReason {
    /// closed through the API, e.g. by the connection manager
    Requested,
    BadHandshake(String),
    NoGnutellaOk { code: u16, message: String },
    /// I/O failures, timeouts and connections to self
    Transport(String),
    Framing(String),
}

impl From<&HandshakeError> for CloseReason {
    fn from(value: &HandshakeError) -> Self {
        match value {
            HandshakeError::BadHandshake(msg) => CloseReason::BadHandshake(msg.clone()),
            HandshakeError::NoGnutellaOk { code, message } => CloseReason::NoGnutellaOk { code: *code, message: message.clone() },
            HandshakeError::Closed => CloseReason::Requested,
            other => CloseReason::Transport(other.to_string()),
        }
    }
}

impl From<&FramingError> for CloseReason {
    fn from(value: &FramingError) -> Self {
        match value {
            FramingError::Io(e) => CloseReason::Transport(e.to_string()),
            other => CloseReason::Framing(other.to_string()),
        }
    }
}
