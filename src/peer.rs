//! The peer wire protocol and per-connection state machine.
//!
//! Covers the 32-byte handshake, length-prefixed framing, the eight
//! message kinds, per-neighbor interest and choke bookkeeping, and piece
//! selection against the remote bitfield.

mod bitfield;
mod connection;
mod error;
mod message;
mod state;
mod transport;

pub use bitfield::{Bitfield, RemoteBitfield};
pub use connection::{ConnectionHandler, Direction};
pub use error::PeerError;
pub use message::{Handshake, Message, MessageTag, HANDSHAKE_HEADER, HANDSHAKE_LEN};
pub use state::PeerHandle;
pub use transport::{writer_task, FrameReader, PeerTransport};
