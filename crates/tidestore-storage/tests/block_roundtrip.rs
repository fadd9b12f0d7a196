//! End-to-end tests for the block file set: write, finalize, read back,
//! and corruption detection on the framing.

use tempfile::TempDir;

use tidestore_core::DataPoint;
use tidestore_encoding::{TszEncoder, TszIterator};
use tidestore_storage::{
    block::checkpoint_exists, BlockConfig, BlockReader, BlockWriter, Error,
};

const WINDOW: i64 = 7_200_000_000_000; // two hours in nanoseconds

fn config_in(dir: &TempDir) -> BlockConfig {
    BlockConfig {
        root: dir.path().to_path_buf(),
        ..Default::default()
    }
}

fn data_file_path(dir: &TempDir, shard: u32, block_id: i64) -> std::path::PathBuf {
    dir.path()
        .join(shard.to_string())
        .join(format!("{}.data", block_id))
}

async fn write_block(config: &BlockConfig, shard: u32, start: i64, entries: &[(&str, &[u8])]) {
    let mut writer = BlockWriter::new(WINDOW, config.clone());
    writer.open(shard, start).await.unwrap();
    for (key, payload) in entries {
        writer.write(key, payload).await.unwrap();
    }
    writer.close().await.unwrap();
}

// -------------------------------------------------------------------
// Roundtrips
// -------------------------------------------------------------------

#[tokio::test]
async fn test_empty_block() {
    let dir = TempDir::new().unwrap();
    let config = config_in(&dir);

    write_block(&config, 7, 0, &[]).await;

    let mut reader = BlockReader::new(config);
    reader.open(7, 0).await.unwrap();
    assert_eq!(reader.entries(), 0);
    assert_eq!(reader.entries_read(), 0);
    assert!(matches!(reader.read().await, Err(Error::ZeroSizeIndexEntry)));
    reader.close().await.unwrap();
}

#[tokio::test]
async fn test_single_entry() {
    let dir = TempDir::new().unwrap();
    let config = config_in(&dir);

    write_block(&config, 0, 0, &[("k1", &[0x01, 0x02, 0x03])]).await;

    let mut reader = BlockReader::new(config);
    reader.open(0, 0).await.unwrap();
    assert_eq!(reader.entries(), 1);

    let range = reader.range();
    assert_eq!(range.start, 0);
    assert_eq!(range.end, WINDOW);

    let (key, payload) = reader.read().await.unwrap();
    assert_eq!(key, "k1");
    assert_eq!(payload.as_ref(), &[0x01, 0x02, 0x03]);
    assert_eq!(reader.entries_read(), 1);

    assert!(matches!(reader.read().await, Err(Error::ZeroSizeIndexEntry)));
    reader.close().await.unwrap();
}

#[tokio::test]
async fn test_many_entries_in_order() {
    let dir = TempDir::new().unwrap();
    let config = config_in(&dir);

    let payloads: Vec<(String, Vec<u8>)> = (0..100)
        .map(|i| {
            (
                format!("series-{:03}", i),
                vec![i as u8; (i % 17) as usize + 1],
            )
        })
        .collect();

    let mut writer = BlockWriter::new(WINDOW, config.clone());
    writer.open(3, 1_000).await.unwrap();
    for (key, payload) in &payloads {
        writer.write(key, payload).await.unwrap();
    }
    assert_eq!(writer.entries(), 100);
    writer.close().await.unwrap();

    let mut reader = BlockReader::new(config);
    reader.open(3, 1_000).await.unwrap();
    assert_eq!(reader.entries(), 100);
    for (key, payload) in &payloads {
        let (got_key, got_payload) = reader.read().await.unwrap();
        assert_eq!(&got_key, key);
        assert_eq!(got_payload.as_ref(), payload.as_slice());
    }
    assert_eq!(reader.entries_read(), 100);
    reader.close().await.unwrap();
}

#[tokio::test]
async fn test_write_all_concatenates_chunks() {
    let dir = TempDir::new().unwrap();
    let config = config_in(&dir);

    let mut writer = BlockWriter::new(WINDOW, config.clone());
    writer.open(1, 0).await.unwrap();
    writer
        .write_all("chunked", &[b"head-", b"mid-", b"tail"])
        .await
        .unwrap();
    writer.close().await.unwrap();

    let mut reader = BlockReader::new(config);
    reader.open(1, 0).await.unwrap();
    let (key, payload) = reader.read().await.unwrap();
    assert_eq!(key, "chunked");
    assert_eq!(payload.as_ref(), b"head-mid-tail");
    reader.close().await.unwrap();
}

#[tokio::test]
async fn test_empty_payload_is_noop() {
    let dir = TempDir::new().unwrap();
    let config = config_in(&dir);

    let mut writer = BlockWriter::new(WINDOW, config.clone());
    writer.open(0, 0).await.unwrap();
    writer.write("skipped", b"").await.unwrap();
    writer.write_all("also-skipped", &[b"", b""]).await.unwrap();
    writer.write("kept", b"x").await.unwrap();
    assert_eq!(writer.entries(), 1);
    writer.close().await.unwrap();

    let mut reader = BlockReader::new(config);
    reader.open(0, 0).await.unwrap();
    assert_eq!(reader.entries(), 1);
    let (key, payload) = reader.read().await.unwrap();
    assert_eq!(key, "kept");
    assert_eq!(payload.as_ref(), b"x");
    reader.close().await.unwrap();
}

#[tokio::test]
async fn test_tsz_payload_through_block() {
    // Full pipeline: codec-produced payloads are opaque to the block layer
    // and survive the roundtrip bit-identically.
    let dir = TempDir::new().unwrap();
    let config = config_in(&dir);

    let points: Vec<DataPoint> = (0..50)
        .map(|i| DataPoint::new(i * 60_000_000_000, 100.0 + (i % 5) as f64))
        .collect();
    let mut enc = TszEncoder::new();
    for &dp in &points {
        enc.encode(dp);
    }
    let payload = enc.finish();

    write_block(&config, 9, 500, &[("cpu.user", payload.as_ref())]).await;

    let mut reader = BlockReader::new(config);
    reader.open(9, 500).await.unwrap();
    let (_, got) = reader.read().await.unwrap();
    reader.close().await.unwrap();

    let mut it = TszIterator::new(got);
    let mut decoded = Vec::new();
    while let Some(dp) = it.try_next().unwrap() {
        decoded.push(dp);
    }
    assert_eq!(decoded, points);
}

// -------------------------------------------------------------------
// Checkpoint contract
// -------------------------------------------------------------------

#[tokio::test]
async fn test_checkpoint_created_on_close() {
    let dir = TempDir::new().unwrap();
    let config = config_in(&dir);

    write_block(&config, 4, 123, &[("a", b"1"), ("b", b"2")]).await;
    assert!(checkpoint_exists(dir.path(), 4, 123).await);

    // Checkpoint present implies every declared entry is readable.
    let mut reader = BlockReader::new(config);
    reader.open(4, 123).await.unwrap();
    for _ in 0..reader.entries() {
        reader.read().await.unwrap();
    }
    reader.close().await.unwrap();
}

#[tokio::test]
async fn test_no_checkpoint_without_close() {
    let dir = TempDir::new().unwrap();
    let config = config_in(&dir);

    let mut writer = BlockWriter::new(WINDOW, config.clone());
    writer.open(2, 77).await.unwrap();
    writer.write("a", b"one").await.unwrap();
    writer.write("b", b"two").await.unwrap();
    drop(writer); // simulated crash: close never runs

    assert!(!checkpoint_exists(dir.path(), 2, 77).await);
}

#[tokio::test]
async fn test_checkpoint_absent_for_unknown_block() {
    let dir = TempDir::new().unwrap();
    assert!(!checkpoint_exists(dir.path(), 0, 42).await);
}

// -------------------------------------------------------------------
// Corruption detection
// -------------------------------------------------------------------

#[tokio::test]
async fn test_marker_corruption() {
    let dir = TempDir::new().unwrap();
    let config = config_in(&dir);

    write_block(&config, 0, 0, &[("k1", &[0x01, 0x02, 0x03])]).await;

    // Overwrite byte 0 of the data file: the first record's marker.
    let path = data_file_path(&dir, 0, 0);
    let mut raw = std::fs::read(&path).unwrap();
    raw[0] ^= 0xFF;
    std::fs::write(&path, raw).unwrap();

    let mut reader = BlockReader::new(config);
    reader.open(0, 0).await.unwrap();
    assert!(matches!(reader.read().await, Err(Error::MarkerNotFound)));
    reader.close().await.unwrap();
}

#[tokio::test]
async fn test_idx_corruption() {
    let dir = TempDir::new().unwrap();
    let config = config_in(&dir);

    write_block(&config, 0, 0, &[("k1", b"payload")]).await;

    // Flip the low byte of the framed big-endian ordinal (marker is 4
    // bytes, the idx occupies the next 8).
    let path = data_file_path(&dir, 0, 0);
    let mut raw = std::fs::read(&path).unwrap();
    raw[11] ^= 0x01;
    std::fs::write(&path, raw).unwrap();

    let mut reader = BlockReader::new(config);
    reader.open(0, 0).await.unwrap();
    match reader.read().await {
        Err(Error::WrongIdx { expected, actual }) => {
            assert_eq!(expected, 0);
            assert_eq!(actual, 1);
        }
        other => panic!("expected WrongIdx, got {:?}", other.map(|_| ())),
    }
    reader.close().await.unwrap();
}

#[tokio::test]
async fn test_truncated_data_file_short_read() {
    let dir = TempDir::new().unwrap();
    let config = config_in(&dir);

    write_block(&config, 0, 0, &[("k1", b"a-longer-payload")]).await;

    let path = data_file_path(&dir, 0, 0);
    let len = std::fs::metadata(&path).unwrap().len();
    let file = std::fs::OpenOptions::new().write(true).open(&path).unwrap();
    file.set_len(len - 4).unwrap();

    let mut reader = BlockReader::new(config);
    reader.open(0, 0).await.unwrap();
    assert!(matches!(reader.read().await, Err(Error::ShortRead)));
    reader.close().await.unwrap();
}

#[tokio::test]
async fn test_open_missing_block_fails() {
    let dir = TempDir::new().unwrap();
    let config = config_in(&dir);

    let mut reader = BlockReader::new(config);
    assert!(matches!(reader.open(5, 999).await, Err(Error::Io(_))));
}

// -------------------------------------------------------------------
// Writer reuse
// -------------------------------------------------------------------

#[tokio::test]
async fn test_writer_reopen_for_second_block() {
    let dir = TempDir::new().unwrap();
    let config = config_in(&dir);

    let mut writer = BlockWriter::new(WINDOW, config.clone());
    writer.open(0, 100).await.unwrap();
    writer.write("first", b"1").await.unwrap();
    writer.close().await.unwrap();

    writer.open(0, 200).await.unwrap();
    writer.write("second", b"2").await.unwrap();
    writer.write("third", b"3").await.unwrap();
    writer.close().await.unwrap();

    let mut reader = BlockReader::new(config.clone());
    reader.open(0, 100).await.unwrap();
    assert_eq!(reader.entries(), 1);
    reader.close().await.unwrap();

    let mut reader = BlockReader::new(config);
    reader.open(0, 200).await.unwrap();
    assert_eq!(reader.entries(), 2);
    let (key, _) = reader.read().await.unwrap();
    assert_eq!(key, "second");
    reader.close().await.unwrap();
}
