//! The per-peer protocol event log.
//!
//! Every observable protocol event lands in `log_peer_<id>.log` as one
//! timestamped line, in the order it occurred. This file is the observable
//! artifact of a run; operator diagnostics go through `tracing` instead.

use chrono::Local;
use parking_lot::Mutex;
use std::fs::{File, OpenOptions};
use std::io::{BufWriter, Write};
use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};

/// Line-per-event writer for one peer's log file.
pub struct EventLog {
    self_id: i32,
    out: Mutex<BufWriter<File>>,
    completion_logged: AtomicBool,
}

impl EventLog {
    /// Opens (or appends to) the log file.
    pub fn open(self_id: i32, path: &Path) -> std::io::Result<Self> {
        let file = OpenOptions::new().create(true).append(true).open(path)?;
        Ok(Self {
            self_id,
            out: Mutex::new(BufWriter::new(file)),
            completion_logged: AtomicBool::new(false),
        })
    }

    fn write(&self, level: &str, msg: &str) {
        let ts = Local::now().format("%Y-%m-%d %H:%M:%S");
        let mut out = self.out.lock();
        // Flush per line so the file is current if the process dies.
        let _ = writeln!(out, "[{ts}] [{level}] {msg}");
        let _ = out.flush();
    }

    fn info(&self, msg: String) {
        self.write("INFO", &msg);
    }

    pub fn error(&self, msg: String) {
        self.write("ERROR", &msg);
    }

    /// We dialed `to` successfully (logged before the handshake).
    pub fn connect_out(&self, to: i32) {
        self.info(format!(
            "Peer {} makes a connection to Peer {to}.",
            self.self_id
        ));
    }

    /// An inbound connection handshook as `from`.
    pub fn connect_in(&self, from: i32) {
        self.info(format!(
            "Peer {} is connected from Peer {from}.",
            self.self_id
        ));
    }

    pub fn received_interested(&self, from: i32) {
        self.info(format!(
            "Peer {} received the 'interested' message from {from}.",
            self.self_id
        ));
    }

    pub fn received_not_interested(&self, from: i32) {
        self.info(format!(
            "Peer {} received the 'not interested' message from {from}.",
            self.self_id
        ));
    }

    pub fn received_have(&self, from: i32, piece: u32) {
        self.info(format!(
            "Peer {} received the 'have' message from {from} for the piece {piece}.",
            self.self_id
        ));
    }

    pub fn choked_by(&self, from: i32) {
        self.info(format!("Peer {} is choked by {from}.", self.self_id));
    }

    pub fn unchoked_by(&self, from: i32) {
        self.info(format!("Peer {} is unchoked by {from}.", self.self_id));
    }

    pub fn downloaded_piece(&self, piece: u32, from: i32, total_held: usize) {
        self.info(format!(
            "Peer {} has downloaded the piece {piece} from {from}. \
             Now the number of pieces it has is {total_held}.",
            self.self_id
        ));
    }

    /// Logged at most once per process, whichever of the piece path or the
    /// completion watcher observes completion first.
    pub fn download_complete(&self) {
        if self.completion_logged.swap(true, Ordering::AcqRel) {
            return;
        }
        self.info(format!(
            "Peer {} has downloaded the complete file.",
            self.self_id
        ));
    }

    /// The preferred set, in selection order; may be empty.
    pub fn preferred_neighbors(&self, ids: &[i32]) {
        let list = ids
            .iter()
            .map(|id| id.to_string())
            .collect::<Vec<_>>()
            .join(", ");
        self.info(format!(
            "Peer {} has the preferred neighbors {list}.",
            self.self_id
        ));
    }

    pub fn optimistic_unchoke(&self, id: i32) {
        self.info(format!(
            "Peer {} has the optimistically unchoked neighbor {id}.",
            self.self_id
        ));
    }
}
