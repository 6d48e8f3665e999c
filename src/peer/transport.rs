use super::error::PeerError;
use super::message::{Handshake, Message, HANDSHAKE_LEN};
use bytes::BytesMut;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::TcpStream;
use tokio::sync::mpsc;

/// Upper bound on a single frame; anything larger is a protocol error long
/// before it could be a legitimate piece.
const MAX_MESSAGE_SIZE: usize = 16 * 1024 * 1024;

/// Owns a freshly-connected socket through the handshake, then splits into
/// a framed reader and a raw write half.
pub struct PeerTransport {
    stream: TcpStream,
    read_buf: BytesMut,
}

impl PeerTransport {
    pub fn new(stream: TcpStream) -> Self {
        Self {
            stream,
            read_buf: BytesMut::with_capacity(32 * 1024),
        }
    }

    /// Sends our handshake, then reads exactly one handshake back.
    ///
    /// Both sides send before either reads, so the write always goes first.
    pub async fn exchange_handshake(&mut self, ours: Handshake) -> Result<Handshake, PeerError> {
        self.stream.write_all(&ours.encode()).await?;

        while self.read_buf.len() < HANDSHAKE_LEN {
            let n = self.stream.read_buf(&mut self.read_buf).await?;
            if n == 0 {
                return Err(PeerError::ConnectionClosed);
            }
        }

        let data = self.read_buf.split_to(HANDSHAKE_LEN);
        Handshake::decode(&data)
    }

    /// Splits the transport, carrying any already-buffered bytes into the
    /// frame reader.
    pub fn into_split(self) -> (FrameReader, OwnedWriteHalf) {
        let (read_half, write_half) = self.stream.into_split();
        (
            FrameReader {
                half: read_half,
                read_buf: self.read_buf,
            },
            write_half,
        )
    }
}

/// Reads length-prefixed frames off the receive side of a connection.
pub struct FrameReader {
    half: OwnedReadHalf,
    read_buf: BytesMut,
}

impl FrameReader {
    /// Reads and decodes one complete frame.
    ///
    /// EOF at a frame boundary reports [`PeerError::ConnectionClosed`];
    /// EOF inside a frame is the same, since the peer is gone either way.
    pub async fn read_message(&mut self) -> Result<Message, PeerError> {
        while self.read_buf.len() < 4 {
            let n = self.half.read_buf(&mut self.read_buf).await?;
            if n == 0 {
                return Err(PeerError::ConnectionClosed);
            }
        }

        let length = u32::from_be_bytes([
            self.read_buf[0],
            self.read_buf[1],
            self.read_buf[2],
            self.read_buf[3],
        ]) as usize;

        if length > MAX_MESSAGE_SIZE {
            return Err(PeerError::InvalidMessage(format!(
                "frame too large: {length}"
            )));
        }

        let total_len = 4 + length;
        while self.read_buf.len() < total_len {
            let n = self.half.read_buf(&mut self.read_buf).await?;
            if n == 0 {
                return Err(PeerError::ConnectionClosed);
            }
        }

        Message::decode(self.read_buf.split_to(total_len).freeze())
    }
}

/// Drains a connection's outbound queue onto the socket.
///
/// All writes for one connection funnel through this single task, so frame
/// encodings never interleave. The task ends when every sender is dropped
/// or the socket dies.
pub async fn writer_task(mut outbound: mpsc::UnboundedReceiver<Message>, mut half: OwnedWriteHalf) {
    while let Some(message) = outbound.recv().await {
        if half.write_all(&message.encode()).await.is_err() {
            break;
        }
    }
}
