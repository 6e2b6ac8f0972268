use eegtap::mock::SimulatedDevice;
use eegtap::protocol::{encode_signal_frame, SIGNAL_CHANNELS, START_INSTRUCTION};
use eegtap::{
    DeviceRole, DeviceServer, IngestError, RealtimeStats, RecordingConfig, ServerConfig, SessionManager,
};
use std::io::{ErrorKind, Read, Write};
use std::net::{IpAddr, Shutdown, TcpStream, UdpSocket};
use std::path::Path;
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};
use tempfile::tempdir;

const LOOPBACK: &str = "127.0.0.1";
const UNREACHABLE: &str = "10.255.255.1";

fn server_config(signal_ip: &str, marker_ip: &str, start_port: u16) -> ServerConfig {
    ServerConfig {
        host_ip: LOOPBACK.parse().unwrap(),
        port: 0,
        signal_device_ip: signal_ip.parse().unwrap(),
        marker_device_ip: marker_ip.parse().unwrap(),
        start_command_port: start_port,
        start_command_repeats: 1,
        start_command_interval_ms: 0,
        accept_poll_ms: 10,
        stats_update_interval: 100,
    }
}

fn setup(root: &Path, config: ServerConfig) -> (DeviceServer, Arc<SessionManager>, Arc<RealtimeStats>) {
    let stats = Arc::new(RealtimeStats::new());
    let mut recording = RecordingConfig::with_data_dir(root);
    recording.block_size = 100;
    recording.signal_poll_ms = 10;
    recording.marker_poll_ms = 5;
    let manager = Arc::new(SessionManager::new(recording, stats.clone()).unwrap());
    let server = DeviceServer::new(config, manager.clone(), stats.clone());
    (server, manager, stats)
}

fn wait_for<F: Fn() -> bool>(condition: F) -> bool {
    let deadline = Instant::now() + Duration::from_secs(5);
    while Instant::now() < deadline {
        if condition() {
            return true;
        }
        thread::sleep(Duration::from_millis(10));
    }
    false
}

#[test]
fn test_start_and_stop_are_idempotent() {
    let dir = tempdir().unwrap();
    let (server, _, _) = setup(dir.path(), server_config(UNREACHABLE, UNREACHABLE, 9));

    let addr = server.start().unwrap();
    assert_ne!(addr.port(), 0);
    assert!(server.is_running());
    assert_eq!(server.local_addr(), Some(addr));

    assert!(matches!(server.start(), Err(IngestError::ServerAlreadyRunning)));
    assert!(server.is_running());

    server.stop().unwrap();
    assert!(!server.is_running());
    assert!(matches!(server.stop(), Err(IngestError::ServerNotRunning)));

    // Restartable after a stop
    server.start().unwrap();
    server.stop().unwrap();
}

#[test]
fn test_unknown_peer_is_closed() {
    let dir = tempdir().unwrap();
    let (server, _, stats) = setup(dir.path(), server_config(UNREACHABLE, "10.255.255.2", 9));
    let addr = server.start().unwrap();

    let mut socket = TcpStream::connect(addr).unwrap();
    socket.set_read_timeout(Some(Duration::from_secs(5))).unwrap();

    let mut buf = [0u8; 16];
    match socket.read(&mut buf) {
        Ok(n) => assert_eq!(n, 0),
        Err(e) => assert!(
            !matches!(e.kind(), ErrorKind::WouldBlock | ErrorKind::TimedOut),
            "connection was left open: {}",
            e
        ),
    }

    assert!(!stats.is_connected(DeviceRole::Signal));
    assert!(!stats.is_connected(DeviceRole::Marker));
    server.stop().unwrap();
}

#[test]
fn test_loopback_recording_with_simulated_device() {
    let dir = tempdir().unwrap();
    let start_listener = UdpSocket::bind((LOOPBACK, 0)).unwrap();
    start_listener.set_read_timeout(Some(Duration::from_secs(5))).unwrap();
    let start_port = start_listener.local_addr().unwrap().port();

    let (server, manager, stats) = setup(dir.path(), server_config(LOOPBACK, UNREACHABLE, start_port));
    let addr = server.start().unwrap();
    manager.start_new_session(None, None).unwrap();

    let mut device = SimulatedDevice::connect(addr, DeviceRole::Signal).unwrap();

    // The server answers a recognized device with the start instruction
    let mut buf = [0u8; 8];
    let (n, _) = start_listener.recv_from(&mut buf).unwrap();
    assert_eq!(&buf[..n], &START_INSTRUCTION);

    let report = device.stream(250, 0.0, Some(50)).unwrap();
    assert_eq!(report.sent, 246);
    device.finish().unwrap();

    assert!(wait_for(|| {
        let snapshot = stats.snapshot();
        snapshot.signal.received_count == 246 && !snapshot.signal.connected
    }));
    assert_eq!(stats.snapshot().signal.filled_count, 4);
    assert_eq!(stats.snapshot().signal.last_sequence, 249);

    manager.stop_session().unwrap();
    let session = &manager.sessions()[0];
    assert_eq!(session.sample_count, 250);

    server.stop().unwrap();
}

#[test]
fn test_finished_device_connection_is_released() {
    let dir = tempdir().unwrap();
    let (server, _, stats) = setup(dir.path(), server_config(LOOPBACK, UNREACHABLE, 9));
    let addr = server.start().unwrap();

    for round in 0..3 {
        let mut socket = TcpStream::connect(addr).unwrap();
        socket.write_all(&encode_signal_frame(round, &[1.0; SIGNAL_CHANNELS])).unwrap();
        assert!(wait_for(|| server.open_connections() == 1));

        socket.shutdown(Shutdown::Write).unwrap();
        socket.set_read_timeout(Some(Duration::from_secs(5))).unwrap();

        // The server closes its side once the device stops sending
        let mut buf = [0u8; 16];
        match socket.read(&mut buf) {
            Ok(n) => assert_eq!(n, 0),
            Err(e) => assert!(
                !matches!(e.kind(), ErrorKind::WouldBlock | ErrorKind::TimedOut),
                "connection was left open: {}",
                e
            ),
        }
        assert!(wait_for(|| server.open_connections() == 0));
        assert!(wait_for(|| !stats.is_connected(DeviceRole::Signal)));
    }

    server.stop().unwrap();
    assert_eq!(server.open_connections(), 0);
}

#[test]
fn test_classification_uses_configured_addresses() {
    let dir = tempdir().unwrap();
    let (server, _, _) = setup(dir.path(), server_config(LOOPBACK, UNREACHABLE, 9));

    let loopback: IpAddr = LOOPBACK.parse().unwrap();
    let marker: IpAddr = UNREACHABLE.parse().unwrap();
    assert_eq!(server.classify(loopback), Some(DeviceRole::Signal));
    assert_eq!(server.classify(marker), Some(DeviceRole::Marker));
    assert_eq!(server.classify("10.0.0.9".parse().unwrap()), None);
}
