use super::error::PeerError;
use bytes::{Buf, BufMut, Bytes, BytesMut};

/// The 18-byte ASCII header opening every handshake.
pub const HANDSHAKE_HEADER: &[u8] = b"P2PFILESHARINGPROJ";
/// Length of the handshake message in bytes.
pub const HANDSHAKE_LEN: usize = 32;

/// Message type identifiers in the wire protocol.
///
/// Each message (except the keep-alive) has a one-byte tag following the
/// length prefix.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum MessageTag {
    /// Stop answering the peer's requests.
    Choke = 0,
    /// Ready to answer the peer's requests.
    Unchoke = 1,
    /// Want pieces from the peer.
    Interested = 2,
    /// Don't want pieces from the peer.
    NotInterested = 3,
    /// Announce a newly-acquired piece.
    Have = 4,
    /// Announce all held pieces.
    Bitfield = 5,
    /// Request a piece.
    Request = 6,
    /// Deliver piece data.
    Piece = 7,
}

impl TryFrom<u8> for MessageTag {
    type Error = PeerError;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            0 => Ok(MessageTag::Choke),
            1 => Ok(MessageTag::Unchoke),
            2 => Ok(MessageTag::Interested),
            3 => Ok(MessageTag::NotInterested),
            4 => Ok(MessageTag::Have),
            5 => Ok(MessageTag::Bitfield),
            6 => Ok(MessageTag::Request),
            7 => Ok(MessageTag::Piece),
            _ => Err(PeerError::UnknownMessageTag(value)),
        }
    }
}

/// The fixed 32-byte handshake.
///
/// Layout: bytes 0..18 are [`HANDSHAKE_HEADER`], bytes 18..28 are zero, and
/// bytes 28..32 carry the sender's peer id big-endian. Both sides send
/// before either reads.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Handshake {
    /// The sender's peer id.
    pub peer_id: i32,
}

impl Handshake {
    pub fn new(peer_id: i32) -> Self {
        Self { peer_id }
    }

    /// Encodes the handshake to bytes for transmission.
    pub fn encode(&self) -> Bytes {
        let mut buf = BytesMut::with_capacity(HANDSHAKE_LEN);
        buf.put_slice(HANDSHAKE_HEADER);
        buf.put_bytes(0, 10);
        buf.put_i32(self.peer_id);
        buf.freeze()
    }

    /// Decodes a handshake, rejecting any buffer whose first 18 bytes are
    /// not [`HANDSHAKE_HEADER`].
    pub fn decode(data: &[u8]) -> Result<Self, PeerError> {
        if data.len() < HANDSHAKE_LEN || &data[..HANDSHAKE_HEADER.len()] != HANDSHAKE_HEADER {
            return Err(PeerError::InvalidHandshake);
        }

        let peer_id = i32::from_be_bytes([data[28], data[29], data[30], data[31]]);
        Ok(Self { peer_id })
    }
}

/// A wire protocol message.
///
/// Messages are length-prefixed: a 4-byte big-endian length followed by a
/// 1-byte tag and the payload. A frame of length 0 is a keep-alive and
/// carries neither tag nor payload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Message {
    /// Empty frame keeping the connection alive.
    KeepAlive,
    /// We stop answering the peer's requests.
    Choke,
    /// We are ready to answer the peer's requests.
    Unchoke,
    /// We want pieces the peer holds.
    Interested,
    /// The peer holds nothing we lack.
    NotInterested,
    /// We now hold this piece.
    Have { piece: u32 },
    /// Every piece we hold, packed most-significant-bit first.
    Bitfield(Bytes),
    /// Ask the peer for one piece.
    Request { piece: u32 },
    /// Piece payload.
    Piece { piece: u32, data: Bytes },
}

impl Message {
    /// Encodes the message, including the 4-byte length prefix.
    pub fn encode(&self) -> Bytes {
        let mut buf = BytesMut::new();

        match self {
            Message::KeepAlive => {
                buf.put_u32(0);
            }
            Message::Choke => {
                buf.put_u32(1);
                buf.put_u8(MessageTag::Choke as u8);
            }
            Message::Unchoke => {
                buf.put_u32(1);
                buf.put_u8(MessageTag::Unchoke as u8);
            }
            Message::Interested => {
                buf.put_u32(1);
                buf.put_u8(MessageTag::Interested as u8);
            }
            Message::NotInterested => {
                buf.put_u32(1);
                buf.put_u8(MessageTag::NotInterested as u8);
            }
            Message::Have { piece } => {
                buf.put_u32(5);
                buf.put_u8(MessageTag::Have as u8);
                buf.put_u32(*piece);
            }
            Message::Bitfield(bits) => {
                buf.put_u32(1 + bits.len() as u32);
                buf.put_u8(MessageTag::Bitfield as u8);
                buf.put_slice(bits);
            }
            Message::Request { piece } => {
                buf.put_u32(5);
                buf.put_u8(MessageTag::Request as u8);
                buf.put_u32(*piece);
            }
            Message::Piece { piece, data } => {
                buf.put_u32(5 + data.len() as u32);
                buf.put_u8(MessageTag::Piece as u8);
                buf.put_u32(*piece);
                buf.put_slice(data);
            }
        }

        buf.freeze()
    }

    /// Decodes one complete frame (length prefix included).
    ///
    /// The caller guarantees `data` holds the whole frame; short payloads
    /// within a frame are protocol errors.
    pub fn decode(mut data: Bytes) -> Result<Self, PeerError> {
        if data.len() < 4 {
            return Err(PeerError::InvalidMessage("truncated length prefix".into()));
        }

        let length = data.get_u32() as usize;

        if length == 0 {
            return Ok(Message::KeepAlive);
        }

        if data.remaining() < length {
            return Err(PeerError::InvalidMessage("truncated frame".into()));
        }

        let tag = MessageTag::try_from(data.get_u8())?;

        match tag {
            MessageTag::Choke => Ok(Message::Choke),
            MessageTag::Unchoke => Ok(Message::Unchoke),
            MessageTag::Interested => Ok(Message::Interested),
            MessageTag::NotInterested => Ok(Message::NotInterested),
            MessageTag::Have => {
                if length < 5 {
                    return Err(PeerError::InvalidMessage("have too short".into()));
                }
                Ok(Message::Have {
                    piece: data.get_u32(),
                })
            }
            MessageTag::Bitfield => Ok(Message::Bitfield(data.copy_to_bytes(length - 1))),
            MessageTag::Request => {
                if length < 5 {
                    return Err(PeerError::InvalidMessage("request too short".into()));
                }
                Ok(Message::Request {
                    piece: data.get_u32(),
                })
            }
            MessageTag::Piece => {
                if length < 5 {
                    return Err(PeerError::InvalidMessage("piece too short".into()));
                }
                let piece = data.get_u32();
                Ok(Message::Piece {
                    piece,
                    data: data.copy_to_bytes(length - 5),
                })
            }
        }
    }
}
