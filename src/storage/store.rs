use super::error::StorageError;
use crate::peer::Bitfield;
use bytes::Bytes;
use parking_lot::Mutex;
use std::io::SeekFrom;
use std::path::{Path, PathBuf};
use tokio::fs::{File, OpenOptions};
use tokio::io::{AsyncReadExt, AsyncSeekExt, AsyncWriteExt};

/// A flat on-disk file viewed as an addressable array of pieces.
///
/// Membership (`have`) lives under a store-level lock and only ever flips
/// from absent to held. Piece bytes on disk are canonical exactly for held
/// pieces; a held piece's file region is immutable from then on, so piece
/// reads go to disk without taking the lock.
pub struct PieceStore {
    path: PathBuf,
    file_size: u64,
    piece_size: u64,
    piece_count: usize,
    have: Mutex<HaveState>,
}

struct HaveState {
    bits: Vec<bool>,
    held: usize,
}

impl PieceStore {
    /// Creates the store.
    ///
    /// A seeder starts with every piece held and its file must already be
    /// on disk; a leecher starts with nothing and the file is created on
    /// first write. Geometry that yields zero pieces is refused.
    pub fn new(
        path: impl Into<PathBuf>,
        file_size: u64,
        piece_size: u64,
        seed: bool,
    ) -> Result<Self, StorageError> {
        let path = path.into();

        if piece_size == 0 || file_size == 0 {
            return Err(StorageError::InvalidLayout(format!(
                "file size {file_size} with piece size {piece_size} yields no pieces"
            )));
        }
        let piece_count = usize::try_from(file_size.div_ceil(piece_size)).map_err(|_| {
            StorageError::InvalidLayout(format!("piece count overflows: {file_size}/{piece_size}"))
        })?;

        if seed && !path.is_file() {
            return Err(StorageError::SeedFileMissing(path.display().to_string()));
        }

        Ok(Self {
            path,
            file_size,
            piece_size,
            piece_count,
            have: Mutex::new(HaveState {
                bits: vec![seed; piece_count],
                held: if seed { piece_count } else { 0 },
            }),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn piece_count(&self) -> usize {
        self.piece_count
    }

    /// Size in bytes of piece `index`; the last piece may be short.
    pub fn piece_size_at(&self, index: u32) -> Result<usize, StorageError> {
        let offset = self.piece_offset(index)?;
        Ok((self.file_size - offset).min(self.piece_size) as usize)
    }

    fn piece_offset(&self, index: u32) -> Result<u64, StorageError> {
        if (index as usize) < self.piece_count {
            Ok(u64::from(index) * self.piece_size)
        } else {
            Err(StorageError::InvalidPieceIndex(index))
        }
    }

    /// Returns current membership of piece `index`.
    pub fn have(&self, index: u32) -> bool {
        let have = self.have.lock();
        (index as usize) < have.bits.len() && have.bits[index as usize]
    }

    /// Number of pieces currently held.
    pub fn held(&self) -> usize {
        self.have.lock().held
    }

    /// True iff every piece is held.
    pub fn is_complete(&self) -> bool {
        let have = self.have.lock();
        have.held == self.piece_count
    }

    /// Snapshot of membership packed for a BITFIELD payload.
    pub fn to_bitfield(&self) -> Bitfield {
        let have = self.have.lock();
        let mut bf = Bitfield::new(self.piece_count);
        for (i, &held) in have.bits.iter().enumerate() {
            if held {
                bf.set(i);
            }
        }
        bf
    }

    /// Reads exactly `piece_size_at(index)` bytes of piece `index`.
    ///
    /// Opens a fresh handle per read; the region is immutable once the
    /// piece is held, so no lock is taken around the disk read.
    pub async fn read_piece(&self, index: u32) -> Result<Bytes, StorageError> {
        let offset = self.piece_offset(index)?;
        let len = self.piece_size_at(index)?;

        let mut file = File::open(&self.path).await?;
        file.seek(SeekFrom::Start(offset)).await?;
        let mut buf = vec![0u8; len];
        file.read_exact(&mut buf).await?;
        Ok(Bytes::from(buf))
    }

    /// Writes piece `index` and records membership.
    ///
    /// Returns `Some(new_held_total)` iff this call was the one that
    /// flipped the piece from absent to held; concurrent duplicates return
    /// `None`. The payload must be exactly `piece_size_at(index)` bytes.
    /// Disk failures do not mark the piece as held.
    pub async fn write_piece(&self, index: u32, data: &[u8]) -> Result<Option<usize>, StorageError> {
        let offset = self.piece_offset(index)?;
        let expected = self.piece_size_at(index)?;
        if data.len() != expected {
            return Err(StorageError::SizeMismatch {
                piece: index,
                expected,
                got: data.len(),
            });
        }

        let mut file = OpenOptions::new()
            .create(true)
            .write(true)
            .truncate(false)
            .open(&self.path)
            .await?;
        file.seek(SeekFrom::Start(offset)).await?;
        file.write_all(data).await?;
        file.flush().await?;

        let mut have = self.have.lock();
        if have.bits[index as usize] {
            Ok(None)
        } else {
            have.bits[index as usize] = true;
            have.held += 1;
            Ok(Some(have.held))
        }
    }
}
