use thiserror::Error;

/// Errors that can occur on a peer connection.
#[derive(Debug, Error)]
pub enum PeerError {
    /// Network I/O error.
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    /// The peer sent a handshake whose header is not ours.
    #[error("invalid handshake")]
    InvalidHandshake,

    /// Received a malformed protocol message.
    #[error("invalid message: {0}")]
    InvalidMessage(String),

    /// Received a message tag outside the protocol. The frame has already
    /// been consumed, so callers may skip it and keep reading.
    #[error("unknown message tag: {0}")]
    UnknownMessageTag(u8),

    /// The connection was closed by the peer.
    #[error("connection closed")]
    ConnectionClosed,

    /// Failed reading or writing piece data while serving this connection.
    #[error(transparent)]
    Storage(#[from] crate::storage::StorageError),
}

impl PeerError {
    /// Whether the connection must be torn down after this error.
    ///
    /// Unknown tags are skippable; everything else is fatal to the
    /// connection (but never to its siblings).
    pub fn is_fatal(&self) -> bool {
        !matches!(self, PeerError::UnknownMessageTag(_))
    }
}
