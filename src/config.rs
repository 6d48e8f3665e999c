//! Startup configuration: `Common.cfg`, the peer roster, and path layout.
//!
//! Both files are plaintext. `Common.cfg` holds whitespace-separated
//! key/value lines; `PeerInfo.cfg` holds one whitespace-separated row per
//! peer. Roster order is significant: each peer dials every peer listed
//! above its own row.

use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read {path}: {source}")]
    Io {
        path: String,
        source: std::io::Error,
    },

    #[error("{file} line {line}: {reason}")]
    Malformed {
        file: String,
        line: usize,
        reason: String,
    },

    #[error("{file}: missing key {key}")]
    MissingKey { file: String, key: &'static str },

    #[error("peer {0} is not in the roster")]
    UnknownPeer(i32),

    #[error("invalid geometry: file size {file_size}, piece size {piece_size}")]
    InvalidGeometry { file_size: u64, piece_size: u64 },

    #[error("{0} must be positive")]
    InvalidInterval(&'static str),
}

/// Swarm-wide parameters from `Common.cfg`.
#[derive(Debug, Clone)]
pub struct CommonConfig {
    /// `k` in the preferred-neighbor reselection.
    pub preferred_neighbors: usize,
    /// Period of the preferred-neighbor reselection.
    pub unchoking_interval: Duration,
    /// Period of the optimistic unchoke reselection.
    pub optimistic_interval: Duration,
    /// Target filename inside the peer's working directory.
    pub file_name: String,
    /// Total file length in bytes.
    pub file_size: u64,
    /// Piece length in bytes; the last piece may be short.
    pub piece_size: u64,
}

impl CommonConfig {
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let file = path.display().to_string();
        let text = fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: file.clone(),
            source,
        })?;

        let mut preferred_neighbors = None;
        let mut unchoking_interval = None;
        let mut optimistic_interval = None;
        let mut file_name = None;
        let mut file_size = None;
        let mut piece_size = None;

        for (lineno, line) in text.lines().enumerate() {
            let line = line.trim();
            if line.is_empty() {
                continue;
            }
            let mut parts = line.split_whitespace();
            let (Some(key), Some(value)) = (parts.next(), parts.next()) else {
                return Err(ConfigError::Malformed {
                    file: file.clone(),
                    line: lineno + 1,
                    reason: "expected `Key Value`".into(),
                });
            };

            let parse_num = |value: &str| {
                value.parse::<u64>().map_err(|_| ConfigError::Malformed {
                    file: file.clone(),
                    line: lineno + 1,
                    reason: format!("not a number: {value}"),
                })
            };

            // Unrecognized keys are ignored.
            match key {
                "NumberOfPreferredNeighbors" => {
                    preferred_neighbors = Some(parse_num(value)? as usize)
                }
                "UnchokingInterval" => {
                    unchoking_interval = Some(Duration::from_secs(parse_num(value)?))
                }
                "OptimisticUnchokingInterval" => {
                    optimistic_interval = Some(Duration::from_secs(parse_num(value)?))
                }
                "FileName" => file_name = Some(value.to_string()),
                "FileSize" => file_size = Some(parse_num(value)?),
                "PieceSize" => piece_size = Some(parse_num(value)?),
                _ => {}
            }
        }

        let missing = |key| ConfigError::MissingKey {
            file: file.clone(),
            key,
        };
        let cfg = Self {
            preferred_neighbors: preferred_neighbors
                .ok_or_else(|| missing("NumberOfPreferredNeighbors"))?,
            unchoking_interval: unchoking_interval.ok_or_else(|| missing("UnchokingInterval"))?,
            optimistic_interval: optimistic_interval
                .ok_or_else(|| missing("OptimisticUnchokingInterval"))?,
            file_name: file_name.ok_or_else(|| missing("FileName"))?,
            file_size: file_size.ok_or_else(|| missing("FileSize"))?,
            piece_size: piece_size.ok_or_else(|| missing("PieceSize"))?,
        };

        if cfg.piece_size == 0 || cfg.file_size == 0 {
            return Err(ConfigError::InvalidGeometry {
                file_size: cfg.file_size,
                piece_size: cfg.piece_size,
            });
        }
        if cfg.unchoking_interval.is_zero() {
            return Err(ConfigError::InvalidInterval("UnchokingInterval"));
        }
        if cfg.optimistic_interval.is_zero() {
            return Err(ConfigError::InvalidInterval("OptimisticUnchokingInterval"));
        }

        Ok(cfg)
    }

    /// Derived piece count, `ceil(file_size / piece_size)`.
    pub fn piece_count(&self) -> usize {
        self.file_size.div_ceil(self.piece_size) as usize
    }
}

/// One roster row from `PeerInfo.cfg`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PeerInfo {
    pub peer_id: i32,
    pub host: String,
    pub port: u16,
    /// Whether this peer starts as a seeder.
    pub has_file: bool,
}

/// The ordered peer roster.
#[derive(Debug, Clone)]
pub struct PeerRoster {
    rows: Vec<PeerInfo>,
}

impl PeerRoster {
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let file = path.display().to_string();
        let text = fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: file.clone(),
            source,
        })?;

        let mut rows = Vec::new();
        for (lineno, line) in text.lines().enumerate() {
            let line = line.trim();
            if line.is_empty() {
                continue;
            }
            let malformed = |reason: String| ConfigError::Malformed {
                file: file.clone(),
                line: lineno + 1,
                reason,
            };

            let fields: Vec<&str> = line.split_whitespace().collect();
            let [peer_id, host, port, has_file] = fields.as_slice() else {
                return Err(malformed("expected `peerId host port hasFile`".into()));
            };

            rows.push(PeerInfo {
                peer_id: peer_id
                    .parse()
                    .map_err(|_| malformed(format!("bad peer id: {peer_id}")))?,
                host: host.to_string(),
                port: port
                    .parse()
                    .map_err(|_| malformed(format!("bad port: {port}")))?,
                has_file: match *has_file {
                    "1" => true,
                    "0" => false,
                    other => return Err(malformed(format!("bad hasFile flag: {other}"))),
                },
            });
        }

        Ok(Self { rows })
    }

    pub fn rows(&self) -> &[PeerInfo] {
        &self.rows
    }

    pub fn find(&self, peer_id: i32) -> Option<&PeerInfo> {
        self.rows.iter().find(|r| r.peer_id == peer_id)
    }

    /// Peers listed above `peer_id`'s own row; these are the ones it dials.
    pub fn earlier_than(&self, peer_id: i32) -> &[PeerInfo] {
        let own = self
            .rows
            .iter()
            .position(|r| r.peer_id == peer_id)
            .unwrap_or(self.rows.len());
        &self.rows[..own]
    }
}

/// Filesystem layout for one peer process.
#[derive(Debug, Clone)]
pub struct PeerPaths {
    /// `<root>/peer_<id>`, created at startup.
    pub peer_dir: PathBuf,
    /// `<root>/log_peer_<id>.log`.
    pub log_file: PathBuf,
    /// The target file inside `peer_dir`.
    pub target_file: PathBuf,
}

/// Everything a peer process needs at startup.
#[derive(Debug, Clone)]
pub struct ConfigBundle {
    pub self_id: i32,
    pub common: CommonConfig,
    pub roster: PeerRoster,
    pub self_info: PeerInfo,
    pub paths: PeerPaths,
}

impl ConfigBundle {
    /// Loads `Common.cfg` and `PeerInfo.cfg` from `root` and creates the
    /// peer's working directory.
    pub fn load(self_id: i32, root: &Path) -> Result<Self, ConfigError> {
        let common = CommonConfig::from_file(&root.join("Common.cfg"))?;
        let roster = PeerRoster::from_file(&root.join("PeerInfo.cfg"))?;

        let self_info = roster
            .find(self_id)
            .cloned()
            .ok_or(ConfigError::UnknownPeer(self_id))?;

        let peer_dir = root.join(format!("peer_{self_id}"));
        fs::create_dir_all(&peer_dir).map_err(|source| ConfigError::Io {
            path: peer_dir.display().to_string(),
            source,
        })?;

        let paths = PeerPaths {
            target_file: peer_dir.join(&common.file_name),
            log_file: root.join(format!("log_peer_{self_id}.log")),
            peer_dir,
        };

        Ok(Self {
            self_id,
            common,
            roster,
            self_info,
            paths,
        })
    }
}
