use super::bitfield::RemoteBitfield;
use super::error::PeerError;
use super::message::{Handshake, Message};
use super::state::PeerHandle;
use super::transport::{writer_task, PeerTransport};
use crate::registry::ConnectionRegistry;
use crate::storage::StorageError;
use crate::swarm::SwarmContext;
use std::sync::Arc;
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tracing::debug;

/// Who opened the connection. Decides which side logs the connect event
/// at which moment: the dialer logs before the handshake (it already knows
/// the roster id), the acceptor only after (the id arrives in the
/// handshake).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    Inbound,
    Outbound,
}

/// Deregisters the connection when its task unwinds or returns.
struct Registration<'a> {
    registry: &'a ConnectionRegistry,
    peer_id: i32,
}

impl Drop for Registration<'_> {
    fn drop(&mut self) {
        self.registry.deregister(self.peer_id);
    }
}

/// One live connection's receive-side state machine.
///
/// Owns the framed reader; all sends go through the shared [`PeerHandle`]
/// so they serialize with the scheduler's choke traffic on the writer
/// task. Runs until the socket closes, shutdown is signalled, or the peer
/// commits a protocol violation.
pub struct ConnectionHandler {
    ctx: Arc<SwarmContext>,
    remote_id: i32,
    handle: Arc<PeerHandle>,
    remote_bitfield: RemoteBitfield,
    am_interested: bool,
    they_choking: bool,
}

impl ConnectionHandler {
    /// Spawns the handler task for a fresh socket.
    pub fn spawn(ctx: Arc<SwarmContext>, stream: TcpStream, direction: Direction) {
        let tracker = ctx.tracker.clone();
        tracker.spawn(async move {
            if let Err(err) = Self::run(ctx, stream, direction).await {
                debug!(%err, "connection ended");
            }
        });
    }

    async fn run(
        ctx: Arc<SwarmContext>,
        stream: TcpStream,
        direction: Direction,
    ) -> Result<(), PeerError> {
        // Phase I: handshake. Ours goes out first; a bad header from the
        // other side closes the socket before anything is registered.
        let mut transport = PeerTransport::new(stream);
        let theirs = transport
            .exchange_handshake(Handshake::new(ctx.self_id))
            .await?;
        let remote_id = theirs.peer_id;

        if direction == Direction::Inbound {
            ctx.log.connect_in(remote_id);
        }

        let (mut reader, write_half) = transport.into_split();
        let (outbound, outbound_rx) = mpsc::unbounded_channel();
        ctx.tracker.spawn(writer_task(outbound_rx, write_half));

        let handle = Arc::new(PeerHandle::new(remote_id, outbound));
        ctx.registry.register(handle.clone());
        let _registration = Registration {
            registry: &ctx.registry,
            peer_id: remote_id,
        };

        // Phase II: advertise our pieces, unless we hold none.
        let local = ctx.store.to_bitfield();
        if !local.is_empty() {
            handle.send(Message::Bitfield(local.to_bytes()));
        }

        let mut handler = Self {
            ctx: ctx.clone(),
            remote_id,
            handle,
            remote_bitfield: RemoteBitfield::new(),
            am_interested: false,
            they_choking: true,
        };

        // Phase III: message loop until EOF or shutdown.
        loop {
            let message = tokio::select! {
                _ = ctx.shutdown.cancelled() => break,
                message = reader.read_message() => message,
            };

            match message {
                Ok(message) => handler.dispatch(message).await?,
                Err(PeerError::ConnectionClosed) => break,
                Err(err) if !err.is_fatal() => continue,
                Err(err) => return Err(err),
            }
        }

        Ok(())
    }

    async fn dispatch(&mut self, message: Message) -> Result<(), PeerError> {
        match message {
            Message::KeepAlive => {}
            Message::Bitfield(bits) => self.on_bitfield(&bits),
            Message::Have { piece } => self.on_have(piece),
            Message::Interested => {
                self.ctx.log.received_interested(self.remote_id);
                self.handle.set_they_interested(true);
            }
            Message::NotInterested => {
                self.ctx.log.received_not_interested(self.remote_id);
                self.handle.set_they_interested(false);
            }
            Message::Choke => {
                self.ctx.log.choked_by(self.remote_id);
                self.they_choking = true;
            }
            Message::Unchoke => {
                self.ctx.log.unchoked_by(self.remote_id);
                self.they_choking = false;
                if self.am_interested {
                    self.request_next();
                }
            }
            Message::Request { piece } => self.on_request(piece).await,
            Message::Piece { piece, data } => self.on_piece(piece, &data).await?,
        }
        Ok(())
    }

    /// Lowest-indexed piece we lack that this peer holds, if any.
    fn pick_piece(&self) -> Option<u32> {
        self.remote_bitfield
            .first_missing_from(&self.ctx.store.to_bitfield())
    }

    fn request_next(&mut self) -> bool {
        match self.pick_piece() {
            Some(piece) => {
                self.handle.send(Message::Request { piece });
                true
            }
            None => false,
        }
    }

    fn on_bitfield(&mut self, bits: &[u8]) {
        self.remote_bitfield.replace(bits);

        // Initial interest decision: exactly one of INTERESTED or
        // NOT_INTERESTED goes out in response to the bitfield.
        self.am_interested = self.pick_piece().is_some();
        if self.am_interested {
            self.handle.send(Message::Interested);
            self.request_next();
        } else {
            self.handle.send(Message::NotInterested);
        }
    }

    fn on_have(&mut self, piece: u32) {
        self.ctx.log.received_have(self.remote_id, piece);
        self.remote_bitfield.set(piece as usize);

        // Interest messages go out on transition only.
        let interested = self.pick_piece().is_some();
        if interested != self.am_interested {
            self.am_interested = interested;
            self.handle.send(if interested {
                Message::Interested
            } else {
                Message::NotInterested
            });
        }
    }

    async fn on_request(&mut self, piece: u32) {
        // Requests from a choked neighbor are ignored, not answered.
        if self.handle.am_choking() || !self.ctx.store.have(piece) {
            return;
        }

        match self.ctx.store.read_piece(piece).await {
            Ok(data) => {
                self.handle.send(Message::Piece { piece, data });
            }
            Err(err) => {
                // Transient: drop this request, keep the connection.
                self.ctx.log.error(format!(
                    "failed to read piece {piece} requested by {}: {err}",
                    self.remote_id
                ));
            }
        }
    }

    async fn on_piece(&mut self, piece: u32, data: &[u8]) -> Result<(), PeerError> {
        match self.ctx.store.write_piece(piece, data).await {
            Ok(Some(total_held)) => {
                self.ctx.log.downloaded_piece(piece, self.remote_id, total_held);
                self.handle.add_downloaded(data.len() as u64);
                self.ctx.registry.broadcast(Message::Have { piece });
                if self.ctx.store.is_complete() {
                    self.ctx.log.download_complete();
                }
            }
            // Another connection delivered it first.
            Ok(None) => {}
            Err(err @ StorageError::SizeMismatch { .. }) => return Err(err.into()),
            Err(err @ StorageError::InvalidPieceIndex(_)) => return Err(err.into()),
            Err(err) => {
                self.ctx.log.error(format!(
                    "failed to write piece {piece} from {}: {err}",
                    self.remote_id
                ));
            }
        }

        if self.am_interested && !self.they_choking && !self.request_next() {
            // Nothing useful left from this peer.
            self.am_interested = false;
            self.handle.send(Message::NotInterested);
        }
        Ok(())
    }
}
