use super::message::Message;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use tokio::sync::mpsc;

/// The scheduler-facing side of one live connection.
///
/// The connection's reader task updates the flags; the choking scheduler
/// samples them and drives choke transitions. Each field is an independent
/// atomic, so no lock is involved. Messages enqueued here are drained by
/// the connection's writer task in order.
pub struct PeerHandle {
    peer_id: i32,
    outbound: mpsc::UnboundedSender<Message>,
    they_interested: AtomicBool,
    am_choking: AtomicBool,
    downloaded: AtomicU64,
}

impl PeerHandle {
    pub fn new(peer_id: i32, outbound: mpsc::UnboundedSender<Message>) -> Self {
        Self {
            peer_id,
            outbound,
            they_interested: AtomicBool::new(false),
            // Everyone starts choked.
            am_choking: AtomicBool::new(true),
            downloaded: AtomicU64::new(0),
        }
    }

    pub fn peer_id(&self) -> i32 {
        self.peer_id
    }

    /// Enqueues a message for the writer task. Returns false once the
    /// connection is gone.
    pub fn send(&self, message: Message) -> bool {
        self.outbound.send(message).is_ok()
    }

    /// Whether the remote has declared interest in our pieces.
    pub fn they_interested(&self) -> bool {
        self.they_interested.load(Ordering::Acquire)
    }

    pub fn set_they_interested(&self, interested: bool) {
        self.they_interested.store(interested, Ordering::Release);
    }

    /// Whether we are currently choking the remote.
    pub fn am_choking(&self) -> bool {
        self.am_choking.load(Ordering::Acquire)
    }

    /// Chokes the remote. Sends CHOKE iff the flag actually flipped;
    /// redundant calls put nothing on the wire.
    pub fn choke(&self) {
        if self
            .am_choking
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
        {
            self.send(Message::Choke);
        }
    }

    /// Unchokes the remote. Sends UNCHOKE iff the flag actually flipped.
    pub fn unchoke(&self) {
        if self
            .am_choking
            .compare_exchange(true, false, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
        {
            self.send(Message::Unchoke);
        }
    }

    /// Credits bytes received from this peer since the last sample.
    pub fn add_downloaded(&self, bytes: u64) {
        self.downloaded.fetch_add(bytes, Ordering::AcqRel);
    }

    /// Reads and resets the download counter; the scheduler calls this
    /// once per preferred-neighbor interval.
    pub fn take_downloaded(&self) -> u64 {
        self.downloaded.swap(0, Ordering::AcqRel)
    }
}
