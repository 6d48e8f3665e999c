//! The owned swarm: server, dialer, scheduler, watcher, and shutdown.

use crate::config::ConfigBundle;
use crate::log::EventLog;
use crate::peer::{ConnectionHandler, Direction};
use crate::registry::ConnectionRegistry;
use crate::storage::{PieceStore, StorageError};
use std::net::{Ipv4Addr, SocketAddr};
use std::sync::Arc;
use thiserror::Error;
use tokio::net::{TcpSocket, TcpStream};
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::{debug, info, warn};

const LISTEN_BACKLOG: u32 = 16;

#[derive(Debug, Error)]
pub enum SwarmError {
    #[error(transparent)]
    Storage(#[from] StorageError),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

/// Everything a connection handler or scheduler task needs, shared by
/// `Arc`. Individual handlers hold clones; nothing in the process is a
/// global.
pub struct SwarmContext {
    pub self_id: i32,
    pub store: PieceStore,
    pub registry: ConnectionRegistry,
    pub log: EventLog,
    pub shutdown: CancellationToken,
    pub tracker: TaskTracker,
}

/// One peer process's view of the swarm.
pub struct Swarm {
    ctx: Arc<SwarmContext>,
    cfg: ConfigBundle,
}

impl Swarm {
    /// Builds the piece store and event log from a loaded configuration.
    pub fn new(cfg: ConfigBundle) -> Result<Self, SwarmError> {
        let store = PieceStore::new(
            &cfg.paths.target_file,
            cfg.common.file_size,
            cfg.common.piece_size,
            cfg.self_info.has_file,
        )?;
        let log = EventLog::open(cfg.self_id, &cfg.paths.log_file)?;

        let ctx = Arc::new(SwarmContext {
            self_id: cfg.self_id,
            store,
            registry: ConnectionRegistry::new(),
            log,
            shutdown: CancellationToken::new(),
            tracker: TaskTracker::new(),
        });

        Ok(Self { ctx, cfg })
    }

    /// Runs the peer until the swarm finishes or the process is
    /// interrupted, then joins every task.
    pub async fn run(self) -> Result<(), SwarmError> {
        let Self { ctx, cfg } = self;

        info!(
            peer = cfg.self_id,
            port = cfg.self_info.port,
            pieces = ctx.store.piece_count(),
            seeder = cfg.self_info.has_file,
            "starting peer"
        );

        self::accept_loop(ctx.clone(), cfg.self_info.port)?;

        // Dial every peer listed above our own roster row. The dial is
        // logged before the handshake; failures leave the swarm running.
        for peer in cfg.roster.earlier_than(cfg.self_id) {
            match TcpStream::connect((peer.host.as_str(), peer.port)).await {
                Ok(stream) => {
                    ctx.log.connect_out(peer.peer_id);
                    ConnectionHandler::spawn(ctx.clone(), stream, Direction::Outbound);
                }
                Err(err) => {
                    warn!(peer = peer.peer_id, host = %peer.host, %err, "outbound connect failed");
                }
            }
        }

        let scheduler = crate::scheduler::ChokingScheduler::new(
            ctx.clone(),
            cfg.common.preferred_neighbors,
            cfg.common.unchoking_interval,
            cfg.common.optimistic_interval,
        );
        scheduler.spawn();

        crate::watcher::CompletionWatcher::spawn(ctx.clone(), cfg.self_info.has_file);

        tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                info!("interrupted, shutting down");
                ctx.shutdown.cancel();
            }
            _ = ctx.shutdown.cancelled() => {}
        }

        ctx.tracker.close();
        ctx.tracker.wait().await;
        Ok(())
    }
}

/// Binds the listen port with address reuse and spawns the accept loop.
fn accept_loop(ctx: Arc<SwarmContext>, port: u16) -> Result<(), SwarmError> {
    let addr = SocketAddr::from((Ipv4Addr::UNSPECIFIED, port));
    let socket = TcpSocket::new_v4()?;
    socket.set_reuseaddr(true)?;
    socket.bind(addr)?;
    let listener = socket.listen(LISTEN_BACKLOG)?;

    let tracker = ctx.tracker.clone();
    tracker.spawn(async move {
        loop {
            tokio::select! {
                _ = ctx.shutdown.cancelled() => break,
                accepted = listener.accept() => match accepted {
                    Ok((stream, addr)) => {
                        debug!(%addr, "accepted inbound connection");
                        ConnectionHandler::spawn(ctx.clone(), stream, Direction::Inbound);
                    }
                    Err(err) => {
                        // Accept failures are survivable; keep listening.
                        warn!(%err, "accept failed");
                    }
                }
            }
        }
    });

    Ok(())
}
