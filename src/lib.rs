//! pswarm - tit-for-tat peer-to-peer file sharing over a static roster
//!
//! A fixed set of peers, each identified by a small integer, cooperate to
//! transfer one file partitioned into fixed-size pieces. Every peer runs
//! the same process: it dials peers listed above its own roster row,
//! accepts connections from peers listed below, and exchanges an
//! eight-message wire protocol to trade pieces under a choke/unchoke
//! tit-for-tat discipline.
//!
//! # Modules
//!
//! - [`config`] - `Common.cfg` / `PeerInfo.cfg` parsing and path layout
//! - [`log`] - the per-peer protocol event log
//! - [`peer`] - wire codec, framing, and the per-connection state machine
//! - [`registry`] - process-wide table of live connections
//! - [`scheduler`] - preferred-neighbor and optimistic unchoke tasks
//! - [`storage`] - the on-disk piece store
//! - [`swarm`] - the owned swarm value tying everything together
//! - [`watcher`] - swarm-wide completion detection and shutdown

pub mod config;
pub mod log;
pub mod peer;
pub mod registry;
pub mod scheduler;
pub mod storage;
pub mod swarm;
pub mod watcher;

pub use config::{CommonConfig, ConfigBundle, ConfigError, PeerInfo, PeerRoster};
pub use log::EventLog;
pub use peer::{
    Bitfield, ConnectionHandler, Direction, Handshake, Message, MessageTag, PeerError, PeerHandle,
    RemoteBitfield,
};
pub use registry::ConnectionRegistry;
pub use scheduler::ChokingScheduler;
pub use storage::{PieceStore, StorageError};
pub use swarm::{Swarm, SwarmContext, SwarmError};
pub use watcher::CompletionWatcher;
