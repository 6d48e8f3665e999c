use thiserror::Error;

#[derive(Debug, Error)]
pub enum StorageError {
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("invalid piece index: {0}")]
    InvalidPieceIndex(u32),

    /// Payload length does not match the piece. This is a protocol error
    /// on the part of whoever sent the data, not a disk error.
    #[error("piece {piece} size mismatch: expected {expected} bytes, got {got}")]
    SizeMismatch {
        piece: u32,
        expected: usize,
        got: usize,
    },

    /// File or piece geometry that yields no pieces at all.
    #[error("invalid layout: {0}")]
    InvalidLayout(String),

    /// A seeder was configured but its file is not on disk.
    #[error("seed file missing: {0}")]
    SeedFileMissing(String),
}
