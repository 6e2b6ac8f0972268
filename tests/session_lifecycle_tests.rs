use eegtap::protocol::SIGNAL_CHANNELS;
use eegtap::storage::{ArrayReader, METADATA_FILE};
use eegtap::{DeviceRole, IngestError, RealtimeStats, RecordingConfig, RecordingState, SessionManager};
use std::path::Path;
use std::sync::Arc;
use std::thread;
use std::time::Duration;
use tempfile::tempdir;

fn manager(root: &Path, block_size: usize) -> SessionManager {
    let mut config = RecordingConfig::with_data_dir(root);
    config.block_size = block_size;
    config.signal_poll_ms = 10;
    config.marker_poll_ms = 5;
    SessionManager::new(config, Arc::new(RealtimeStats::new())).unwrap()
}

#[test]
fn test_double_start_fails_without_side_effects() {
    let dir = tempdir().unwrap();
    let manager = manager(dir.path(), 100);

    let id = manager.start_new_session(None, None).unwrap();
    let err = manager.start_new_session(None, None).unwrap_err();
    assert!(matches!(err, IngestError::AlreadyRecording));

    let status = manager.get_status();
    assert!(status.is_recording);
    assert_eq!(status.current_session.as_deref(), Some(id.as_str()));

    manager.stop_session().unwrap();
}

#[test]
fn test_stop_when_idle_fails() {
    let dir = tempdir().unwrap();
    let manager = manager(dir.path(), 100);

    assert!(matches!(manager.stop_session(), Err(IngestError::NotRecording)));
    assert_eq!(manager.state(), RecordingState::Idle);
    assert!(manager.sessions().is_empty());
}

#[test]
fn test_stop_records_one_finished_session() {
    let dir = tempdir().unwrap();
    let manager = manager(dir.path(), 100);

    let id = manager.start_new_session(Some(7), None).unwrap();
    let signal = manager.active_buffer(DeviceRole::Signal).unwrap();
    let marker = manager.active_buffer(DeviceRole::Marker).unwrap();

    // Two full blocks plus a partial tail
    for i in 0..250 {
        signal.write(&[i as f32; SIGNAL_CHANNELS]);
        marker.write(&[if i % 50 == 0 { 4.0 } else { 0.0 }]);
    }
    thread::sleep(Duration::from_millis(20));

    let stopped = manager.stop_session().unwrap();
    assert_eq!(stopped, id);

    let sessions = manager.sessions();
    assert_eq!(sessions.len(), 1);
    let session = &sessions[0];
    assert!(session.end_time.unwrap() > session.start_time);
    assert_eq!(session.sample_count, 250);
    assert_eq!(session.marker_samples, 250);
    assert!(session.duration > 0.0);
    assert!(session.directory.join(METADATA_FILE).exists());

    let eeg = ArrayReader::open(session.eeg_file.as_ref().unwrap())
        .unwrap()
        .read::<f32>()
        .unwrap();
    assert_eq!(eeg.shape(), vec![SIGNAL_CHANNELS, 250]);
    assert_eq!(eeg.channel(0)[249], 249.0);

    let trigger = ArrayReader::open(session.trigger_file.as_ref().unwrap())
        .unwrap()
        .read::<i32>()
        .unwrap();
    assert_eq!(trigger.len, 250);
    assert_eq!(trigger.data.iter().filter(|&&v| v == 4).count(), 5);

    let status = manager.get_status();
    assert!(!status.is_recording);
    assert!(status.current_session.is_none());
    assert_eq!(status.total_samples, 250);
}

#[test]
fn test_stored_sessions_survive_new_manager() {
    let dir = tempdir().unwrap();
    {
        let manager = manager(dir.path(), 100);
        manager.start_new_session(None, Some("carol")).unwrap();
        manager.stop_session().unwrap();
    }

    let reopened = manager(dir.path(), 100);
    assert!(reopened.sessions().is_empty());
    let stored = reopened.stored_sessions().unwrap();
    assert_eq!(stored.len(), 1);
    assert_eq!(stored[0].user_account.as_deref(), Some("carol"));
    assert_eq!(stored[0].sample_count, 0);
}

#[test]
fn test_status_tracks_persisted_samples_while_recording() {
    let dir = tempdir().unwrap();
    let manager = manager(dir.path(), 10);

    manager.start_new_session(None, None).unwrap();
    let signal = manager.active_buffer(DeviceRole::Signal).unwrap();
    for _ in 0..30 {
        signal.write(&[1.0; SIGNAL_CHANNELS]);
    }

    let mut persisted = 0;
    for _ in 0..100 {
        persisted = manager.get_status().total_samples;
        if persisted == 30 {
            break;
        }
        thread::sleep(Duration::from_millis(10));
    }
    assert_eq!(persisted, 30);
    assert!(manager.get_status().recording_duration > 0.0);

    manager.stop_session().unwrap();
}

#[test]
fn test_start_fails_when_session_dir_cannot_be_created() {
    let dir = tempdir().unwrap();
    let manager = manager(dir.path(), 100);

    // A plain file where the account directory should go
    std::fs::write(dir.path().join("blocked"), b"not a directory").unwrap();

    let err = manager.start_new_session(None, Some("blocked")).unwrap_err();
    assert!(matches!(err, IngestError::Storage { .. }), "{:?}", err);
    assert_eq!(manager.state(), RecordingState::Idle);
    assert!(!manager.is_recording());
    assert!(manager.active_buffer(DeviceRole::Signal).is_none());

    // The manager is still usable afterwards
    manager.start_new_session(None, None).unwrap();
    manager.stop_session().unwrap();
}

#[test]
fn test_stop_flush_keeps_order_when_writer_is_slow_to_exit() {
    let dir = tempdir().unwrap();
    let mut config = RecordingConfig::with_data_dir(dir.path());
    config.block_size = 10;
    config.signal_poll_ms = 50;
    config.marker_poll_ms = 5;
    config.join_timeout_ms = 0;
    let manager = SessionManager::new(config, Arc::new(RealtimeStats::new())).unwrap();

    manager.start_new_session(None, None).unwrap();
    let signal = manager.active_buffer(DeviceRole::Signal).unwrap();
    for i in 0..500 {
        signal.write(&[i as f32; SIGNAL_CHANNELS]);
    }

    manager.stop_session().unwrap();
    let session = &manager.sessions()[0];
    assert_eq!(session.sample_count, 500);

    let eeg = ArrayReader::open(session.eeg_file.as_ref().unwrap())
        .unwrap()
        .read::<f32>()
        .unwrap();
    let expected: Vec<f32> = (0..500).map(|i| i as f32).collect();
    assert_eq!(eeg.channel(0), expected.as_slice());
}
