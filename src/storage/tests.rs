use super::*;
use tempfile::TempDir;

fn leecher_store(dir: &TempDir, file_size: u64, piece_size: u64) -> PieceStore {
    PieceStore::new(dir.path().join("test.dat"), file_size, piece_size, false)
        .expect("test store creation")
}

#[test]
fn piece_geometry() {
    let dir = TempDir::new().unwrap();
    let store = leecher_store(&dir, 10, 4);

    assert_eq!(store.piece_count(), 3);
    assert_eq!(store.piece_size_at(0).unwrap(), 4);
    assert_eq!(store.piece_size_at(1).unwrap(), 4);
    // The last piece is short.
    assert_eq!(store.piece_size_at(2).unwrap(), 2);
    assert!(store.piece_size_at(3).is_err());
}

#[test]
fn zero_geometry_is_rejected() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("test.dat");

    assert!(matches!(
        PieceStore::new(&path, 0, 4, false),
        Err(StorageError::InvalidLayout(_))
    ));
    assert!(matches!(
        PieceStore::new(&path, 10, 0, false),
        Err(StorageError::InvalidLayout(_))
    ));
}

#[test]
fn seeder_requires_file_on_disk() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("test.dat");

    assert!(matches!(
        PieceStore::new(&path, 10, 4, true),
        Err(StorageError::SeedFileMissing(_))
    ));

    std::fs::write(&path, vec![7u8; 10]).unwrap();
    let store = PieceStore::new(&path, 10, 4, true).unwrap();
    assert!(store.is_complete());
    assert_eq!(store.held(), 3);
    assert!(store.have(2));
}

#[tokio::test]
async fn write_then_read_round_trips() {
    let dir = TempDir::new().unwrap();
    let store = leecher_store(&dir, 10, 4);

    assert!(!store.have(0));
    let flipped = store.write_piece(0, &[1, 2, 3, 4]).await.unwrap();
    assert_eq!(flipped, Some(1));
    assert!(store.have(0));

    let data = store.read_piece(0).await.unwrap();
    assert_eq!(data.as_ref(), &[1, 2, 3, 4]);
}

#[tokio::test]
async fn short_last_piece_round_trips() {
    let dir = TempDir::new().unwrap();
    let store = leecher_store(&dir, 10, 4);

    store.write_piece(0, &[0; 4]).await.unwrap();
    store.write_piece(1, &[0; 4]).await.unwrap();
    store.write_piece(2, &[8, 9]).await.unwrap();

    assert!(store.is_complete());
    assert_eq!(store.read_piece(2).await.unwrap().as_ref(), &[8, 9]);

    let on_disk = std::fs::read(store.path()).unwrap();
    assert_eq!(on_disk.len(), 10);
    assert_eq!(&on_disk[8..], &[8, 9]);
}

#[tokio::test]
async fn wrong_length_is_a_size_mismatch() {
    let dir = TempDir::new().unwrap();
    let store = leecher_store(&dir, 10, 4);

    let err = store.write_piece(0, &[1, 2, 3]).await.unwrap_err();
    assert!(matches!(
        err,
        StorageError::SizeMismatch {
            piece: 0,
            expected: 4,
            got: 3,
        }
    ));
    // A failed write never marks the piece held.
    assert!(!store.have(0));

    // Piece-sized payload for the short last piece is also wrong.
    let err = store.write_piece(2, &[0; 4]).await.unwrap_err();
    assert!(matches!(err, StorageError::SizeMismatch { piece: 2, .. }));
}

#[tokio::test]
async fn duplicate_write_flips_once() {
    let dir = TempDir::new().unwrap();
    let store = leecher_store(&dir, 10, 4);

    assert_eq!(store.write_piece(1, &[5; 4]).await.unwrap(), Some(1));
    assert_eq!(store.write_piece(1, &[5; 4]).await.unwrap(), None);
    assert!(store.have(1));
    assert_eq!(store.held(), 1);
}

#[tokio::test]
async fn concurrent_duplicate_writes_flip_exactly_once() {
    let dir = TempDir::new().unwrap();
    let store = std::sync::Arc::new(leecher_store(&dir, 10, 4));

    let mut tasks = Vec::new();
    for _ in 0..8 {
        let store = store.clone();
        tasks.push(tokio::spawn(
            async move { store.write_piece(0, &[3; 4]).await },
        ));
    }

    let mut flips = 0;
    for task in tasks {
        if task.await.unwrap().unwrap().is_some() {
            flips += 1;
        }
    }

    assert_eq!(flips, 1);
    assert!(store.have(0));
}

#[tokio::test]
async fn read_missing_piece_index_fails() {
    let dir = TempDir::new().unwrap();
    let store = leecher_store(&dir, 10, 4);

    assert!(matches!(
        store.read_piece(99).await,
        Err(StorageError::InvalidPieceIndex(99))
    ));
}

#[tokio::test]
async fn bitfield_snapshot_tracks_membership() {
    let dir = TempDir::new().unwrap();
    let store = leecher_store(&dir, 20, 2);
    assert_eq!(store.piece_count(), 10);

    let bf = store.to_bitfield();
    assert!(bf.is_empty());
    assert_eq!(bf.as_bytes().len(), 2);

    store.write_piece(0, &[0; 2]).await.unwrap();
    store.write_piece(9, &[0; 2]).await.unwrap();

    let bf = store.to_bitfield();
    assert!(bf.has(0));
    assert!(!bf.has(1));
    assert!(bf.has(9));
    // Piece 0 is the high bit of byte 0; piece 9 sits in byte 1.
    assert_eq!(bf.as_bytes(), &[0x80, 0x40]);
}
