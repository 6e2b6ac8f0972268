use eegtap::buffers::{SampleBlock, StreamBuffer};
use eegtap::protocol::SIGNAL_CHANNELS;
use eegtap::storage::{ArrayReader, ArrayStore, SessionCatalog, StreamWriter};
use eegtap::{IngestError, Session};
use std::time::Duration;
use tempfile::tempdir;

#[test]
fn test_buffer_blocks_land_in_store_in_order() {
    let dir = tempdir().unwrap();
    let writer = StreamWriter::new(dir.path(), "eeg_data").unwrap();
    let buffer = StreamBuffer::new(SIGNAL_CHANNELS, 4);

    for i in 0..10 {
        buffer.write(&[i as f32; SIGNAL_CHANNELS]);
    }
    while let Some(chunk) = buffer.read_chunk(Duration::from_millis(10)) {
        writer.write_eeg_chunk(&chunk.block).unwrap();
    }
    writer.write_eeg_chunk(&buffer.drain_remainder().unwrap()).unwrap();
    writer.close().unwrap();

    let array = ArrayReader::open(writer.eeg_path()).unwrap().read::<f32>().unwrap();
    assert_eq!(array.shape(), vec![SIGNAL_CHANNELS, 10]);
    let expected: Vec<f32> = (0..10).map(|i| i as f32).collect();
    assert_eq!(array.channel(0), expected.as_slice());
    assert_eq!(array.channel(SIGNAL_CHANNELS - 1), expected.as_slice());
}

#[test]
fn test_trigger_store_is_flat_integers() {
    let dir = tempdir().unwrap();
    let writer = StreamWriter::new(dir.path(), "run").unwrap();

    let block = SampleBlock {
        channels: 1,
        len: 4,
        data: vec![0.0, 3.0, 0.0, 255.0],
    };
    writer.write_trigger_chunk(&block).unwrap();
    writer.close().unwrap();

    let reader = ArrayReader::open(writer.trigger_path()).unwrap();
    assert_eq!(reader.rank(), 1);
    assert!(reader.holds::<i32>());
    let array = reader.read::<i32>().unwrap();
    assert_eq!(array.shape(), vec![4]);
    assert_eq!(array.data, vec![0, 3, 0, 255]);
}

#[test]
fn test_wrong_channel_count_rejected() {
    let dir = tempdir().unwrap();
    let writer = StreamWriter::new(dir.path(), "eeg_data").unwrap();

    let block = SampleBlock {
        channels: 8,
        len: 1,
        data: vec![0.0; 8],
    };
    assert!(matches!(writer.write_eeg_chunk(&block), Err(IngestError::InvalidBlock(_))));
}

#[test]
fn test_write_after_close_rejected() {
    let dir = tempdir().unwrap();
    let writer = StreamWriter::new(dir.path(), "eeg_data").unwrap();
    writer.close().unwrap();

    let block = SampleBlock {
        channels: 1,
        len: 1,
        data: vec![1.0],
    };
    assert!(matches!(writer.write_trigger_chunk(&block), Err(IngestError::StoreClosed(_))));
}

#[test]
fn test_store_files_are_chunked_hdf5() {
    let dir = tempdir().unwrap();
    let writer = StreamWriter::new(dir.path(), "eeg_data").unwrap();
    writer.close().unwrap();

    assert_eq!(writer.eeg_path().extension().unwrap(), "h5");
    let eeg = ArrayReader::open(writer.eeg_path()).unwrap();
    assert_eq!(eeg.shape(), vec![SIGNAL_CHANNELS, 0]);
    assert_eq!(eeg.chunk_len(), Some(1000));
    assert!(eeg.holds::<f32>());

    let trigger = ArrayReader::open(writer.trigger_path()).unwrap();
    assert_eq!(trigger.shape(), vec![0]);
    assert!(trigger.holds::<i32>());
}

#[test]
fn test_reopened_store_keeps_appended_blocks() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("markers.h5");

    let mut store = ArrayStore::<i32>::create(&path, 1, 1, 8).unwrap();
    store.append(&[1, 2, 3], 3).unwrap();
    store.append(&[4], 1).unwrap();
    store.close().unwrap();

    let array = ArrayReader::open(&path).unwrap().read::<i32>().unwrap();
    assert_eq!(array.data, vec![1, 2, 3, 4]);
}

#[test]
fn test_catalog_lists_flat_and_account_sessions() {
    let dir = tempdir().unwrap();
    let catalog = SessionCatalog::new(dir.path()).unwrap();

    let first_dir = dir.path().join("session_a");
    std::fs::create_dir_all(&first_dir).unwrap();
    let first = Session::new("session_a".to_string(), first_dir, None, None);
    catalog.save(&first).unwrap();

    let second_dir = dir.path().join("alice").join("session_b");
    std::fs::create_dir_all(&second_dir).unwrap();
    let mut second = Session::new("session_b".to_string(), second_dir, Some(1), Some("alice".to_string()));
    second.start_time = first.start_time + chrono::Duration::seconds(5);
    catalog.save(&second).unwrap();

    let listed = catalog.list_all().unwrap();
    let ids: Vec<_> = listed.iter().map(|s| s.id.as_str()).collect();
    assert_eq!(ids, vec!["session_a", "session_b"]);
    assert_eq!(listed[1].user_account.as_deref(), Some("alice"));
}
