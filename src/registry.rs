//! Process-wide table of live connections.

use crate::peer::{Message, PeerHandle};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// Maps remote peer id to the live handle owning that connection.
///
/// Handlers register after a successful handshake and deregister on
/// teardown. Everything that iterates connections goes through
/// [`snapshot`](Self::snapshot), which copies the `Arc`s out under the
/// lock and releases it before any of them is touched; no network I/O
/// ever happens while the table is locked.
#[derive(Default)]
pub struct ConnectionRegistry {
    handles: Mutex<HashMap<i32, Arc<PeerHandle>>>,
    ever_registered: AtomicBool,
}

impl ConnectionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&self, handle: Arc<PeerHandle>) {
        self.handles.lock().insert(handle.peer_id(), handle);
        self.ever_registered.store(true, Ordering::Release);
    }

    pub fn deregister(&self, peer_id: i32) {
        self.handles.lock().remove(&peer_id);
    }

    /// Stable copy of every live handle for lock-free iteration.
    pub fn snapshot(&self) -> Vec<Arc<PeerHandle>> {
        self.handles.lock().values().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.handles.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.handles.lock().is_empty()
    }

    /// Whether any connection has ever completed a handshake. Lets the
    /// completion watcher tell "everyone left" apart from "no one has
    /// arrived yet".
    pub fn ever_registered(&self) -> bool {
        self.ever_registered.load(Ordering::Acquire)
    }

    /// Enqueues `message` on every current connection.
    pub fn broadcast(&self, message: Message) {
        for handle in self.snapshot() {
            handle.send(message.clone());
        }
    }
}
