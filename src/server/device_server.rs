use std::collections::HashMap;
use std::io;
use std::net::{IpAddr, Shutdown, SocketAddr, TcpListener, TcpStream};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::thread::{self, JoinHandle};

use super::client::ClientHandler;
use super::start_command::{send_start_instruction, subnet_broadcast};
use crate::config::ServerConfig;
use crate::error::{IngestError, Result};
use crate::observability::RealtimeStats;
use crate::protocol::DeviceRole;
use crate::session::SessionManager;

#[derive(Default)]
struct ServerState {
    accept_thread: Option<JoinHandle<()>>,
    local_addr: Option<SocketAddr>,
}

/// One live device socket and the thread reading it
struct Connection {
    /// Clone of the reader's socket, used to unblock it on `stop()`
    stream: TcpStream,
    reader: Option<JoinHandle<()>>,
}

/// Live device connections. A reader removes its own entry when its stream
/// ends, so closed sockets are released as soon as the peer goes away.
#[derive(Default)]
struct Connections {
    next_id: u64,
    open: HashMap<u64, Connection>,
}

impl Connections {
    fn insert(&mut self, stream: TcpStream) -> u64 {
        let id = self.next_id;
        self.next_id += 1;
        self.open.insert(id, Connection { stream, reader: None });
        id
    }
}

/// Shared between the server handle and its accept thread
struct Shared {
    config: ServerConfig,
    session_manager: Arc<SessionManager>,
    stats: Arc<RealtimeStats>,
    running: AtomicBool,
    connections: Mutex<Connections>,
}

impl Shared {
    fn classify(&self, ip: IpAddr) -> Option<DeviceRole> {
        if ip == self.config.signal_device_ip {
            Some(DeviceRole::Signal)
        } else if ip == self.config.marker_device_ip {
            Some(DeviceRole::Marker)
        } else {
            None
        }
    }

    fn start_targets(&self) -> Vec<IpAddr> {
        let mut targets = Vec::with_capacity(3);
        if let Some(broadcast) = subnet_broadcast(self.config.host_ip) {
            targets.push(broadcast);
        }
        targets.push(self.config.signal_device_ip);
        targets.push(self.config.marker_device_ip);
        targets
    }

    fn send_start_command(&self) -> io::Result<usize> {
        send_start_instruction(
            self.config.host_ip,
            &self.start_targets(),
            self.config.start_command_port,
            self.config.start_command_repeats,
            self.config.start_command_interval(),
        )
    }

    fn connections(&self) -> MutexGuard<'_, Connections> {
        self.connections
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

/// TCP listener that accepts the two acquisition devices and runs one
/// reader thread per connection.
pub struct DeviceServer {
    shared: Arc<Shared>,
    state: Mutex<ServerState>,
}

impl DeviceServer {
    pub fn new(config: ServerConfig, session_manager: Arc<SessionManager>, stats: Arc<RealtimeStats>) -> Self {
        Self {
            shared: Arc::new(Shared {
                config,
                session_manager,
                stats,
                running: AtomicBool::new(false),
                connections: Mutex::new(Connections::default()),
            }),
            state: Mutex::new(ServerState::default()),
        }
    }

    fn lock(&self) -> MutexGuard<'_, ServerState> {
        self.state
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    pub fn config(&self) -> &ServerConfig {
        &self.shared.config
    }

    /// Bind the listener and start accepting. Returns the bound address.
    pub fn start(&self) -> Result<SocketAddr> {
        let mut state = self.lock();
        if state.accept_thread.is_some() {
            return Err(IngestError::ServerAlreadyRunning);
        }

        let bind_addr = SocketAddr::new(self.shared.config.host_ip, self.shared.config.port);
        let listener = TcpListener::bind(bind_addr)?;
        listener.set_nonblocking(true)?;
        let local_addr = listener.local_addr()?;

        self.shared.running.store(true, Ordering::Release);
        let shared = self.shared.clone();
        let handle = thread::Builder::new()
            .name("eegtap-accept".to_string())
            .spawn(move || accept_loop(listener, shared));

        let handle = match handle {
            Ok(handle) => handle,
            Err(e) => {
                self.shared.running.store(false, Ordering::Release);
                return Err(e.into());
            }
        };

        state.accept_thread = Some(handle);
        state.local_addr = Some(local_addr);
        log::info!("Device server listening on {}", local_addr);
        Ok(local_addr)
    }

    /// Stop accepting, close open device connections and wait for their
    /// reader threads
    pub fn stop(&self) -> Result<()> {
        let handle = {
            let mut state = self.lock();
            let handle = state.accept_thread.take().ok_or(IngestError::ServerNotRunning)?;
            state.local_addr = None;
            handle
        };

        self.shared.running.store(false, Ordering::Release);
        if handle.join().is_err() {
            log::error!("Accept thread panicked");
        }

        let open = std::mem::take(&mut self.shared.connections().open);
        for connection in open.values() {
            let _ = connection.stream.shutdown(Shutdown::Both);
        }
        for reader in open.into_values().filter_map(|c| c.reader) {
            if reader.join().is_err() {
                log::error!("Device reader thread panicked");
            }
        }

        log::info!("Device server stopped");
        Ok(())
    }

    pub fn is_running(&self) -> bool {
        self.lock().accept_thread.is_some()
    }

    pub fn local_addr(&self) -> Option<SocketAddr> {
        self.lock().local_addr
    }

    pub fn is_connected(&self, role: DeviceRole) -> bool {
        self.shared.stats.is_connected(role)
    }

    /// Device sockets currently held open by reader threads
    pub fn open_connections(&self) -> usize {
        self.shared.connections().open.len()
    }

    /// Which device a peer address belongs to, if any
    pub fn classify(&self, ip: IpAddr) -> Option<DeviceRole> {
        self.shared.classify(ip)
    }

    /// Send the UDP start burst to the broadcast address and both devices
    pub fn send_start_command(&self) -> Result<usize> {
        Ok(self.shared.send_start_command()?)
    }
}

impl Drop for DeviceServer {
    fn drop(&mut self) {
        if self.is_running() {
            let _ = self.stop();
        }
    }
}

fn accept_loop(listener: TcpListener, shared: Arc<Shared>) {
    let poll = shared.config.accept_poll();

    while shared.running.load(Ordering::Acquire) {
        match listener.accept() {
            Ok((stream, peer)) => handle_connection(&shared, stream, peer),
            Err(e) if e.kind() == io::ErrorKind::WouldBlock => thread::sleep(poll),
            Err(e) if e.kind() == io::ErrorKind::Interrupted => {}
            Err(e) => {
                log::warn!("Accept failed: {}", e);
                thread::sleep(poll);
            }
        }
    }

    log::debug!("Accept loop exiting");
}

fn handle_connection(shared: &Arc<Shared>, stream: TcpStream, peer: SocketAddr) {
    let role = match shared.classify(peer.ip()) {
        Some(role) => role,
        None => {
            log::warn!("Rejecting connection from unknown peer {}", peer);
            let _ = stream.shutdown(Shutdown::Both);
            return;
        }
    };
    log::info!("{} device connected from {}", role.name(), peer);

    // Accepted sockets may inherit the listener's non-blocking mode
    if let Err(e) = stream.set_nonblocking(false) {
        log::warn!("Cannot switch {} socket to blocking: {}", role.name(), e);
        return;
    }
    let _ = stream.set_nodelay(true);

    if let Err(e) = shared.send_start_command() {
        log::warn!("Start instruction failed: {}", e);
    }

    let handler = ClientHandler::new(
        role,
        shared.session_manager.clone(),
        shared.stats.clone(),
        shared.config.stats_update_interval,
    );

    let control = match stream.try_clone() {
        Ok(control) => control,
        Err(e) => {
            log::warn!("Cannot clone {} socket: {}", role.name(), e);
            return;
        }
    };

    let id = shared.connections().insert(control);
    let reader_shared = shared.clone();
    let spawned = thread::Builder::new()
        .name(format!("eegtap-{}-reader", role.name()))
        .spawn(move || {
            let summary = handler.run(stream);
            log::info!(
                "{} reader finished: {} frames, {} filled",
                handler.role().name(), summary.frames, summary.filled
            );
            reader_shared.connections().open.remove(&id);
        });

    let mut connections = shared.connections();
    match spawned {
        Ok(reader) => {
            // Absent if the reader already finished and removed itself
            if let Some(connection) = connections.open.get_mut(&id) {
                connection.reader = Some(reader);
            }
        }
        Err(e) => {
            log::error!("Cannot spawn {} reader thread: {}", role.name(), e);
            if let Some(connection) = connections.open.remove(&id) {
                let _ = connection.stream.shutdown(Shutdown::Both);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::RecordingConfig;
    use tempfile::tempdir;

    fn server(root: &std::path::Path) -> DeviceServer {
        let stats = Arc::new(RealtimeStats::new());
        let manager = Arc::new(
            SessionManager::new(RecordingConfig::with_data_dir(root), stats.clone()).unwrap(),
        );
        DeviceServer::new(ServerConfig::default(), manager, stats)
    }

    #[test]
    fn test_classify_prefers_signal_address() {
        let dir = tempdir().unwrap();
        let server = server(dir.path());

        assert_eq!(server.classify("192.168.1.102".parse().unwrap()), Some(DeviceRole::Signal));
        assert_eq!(server.classify("192.168.1.103".parse().unwrap()), Some(DeviceRole::Marker));
        assert_eq!(server.classify("192.168.1.50".parse().unwrap()), None);
    }

    #[test]
    fn test_start_targets_include_broadcast() {
        let dir = tempdir().unwrap();
        let server = server(dir.path());

        let targets = server.shared.start_targets();
        assert_eq!(targets[0], "192.168.1.255".parse::<IpAddr>().unwrap());
        assert_eq!(targets.len(), 3);
    }
}
