use chrono::Local;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Instant;

use super::state::RecordingState;
use super::types::{Session, SessionStatus};
use super::writer_thread::{DrainContext, WriterThread};
use crate::buffers::{SampleBlock, StreamBuffer};
use crate::config::RecordingConfig;
use crate::error::{IngestError, Result};
use crate::observability::RealtimeStats;
use crate::protocol::{DeviceRole, SIGNAL_CHANNELS};
use crate::storage::{SessionCatalog, StreamWriter};

/// State guarded by the session manager's lock
#[derive(Default)]
pub(crate) struct SessionInner {
    pub(crate) state: RecordingState,
    pub(crate) current: Option<Session>,
    pub(crate) sessions: Vec<Session>,
    pub(crate) signal_buffer: Option<Arc<StreamBuffer>>,
    pub(crate) marker_buffer: Option<Arc<StreamBuffer>>,
    pub(crate) writer: Option<Arc<StreamWriter>>,
    pub(crate) writer_running: Option<Arc<AtomicBool>>,
    pub(crate) writer_thread: Option<WriterThread>,
    /// Held by whoever moves blocks from the buffers into the writer
    pub(crate) drain_lock: Option<Arc<Mutex<()>>>,
    /// Cumulative signal samples as of the last persisted block
    pub(crate) total_samples: u64,
    pub(crate) start_instant: Option<Instant>,
    pub(crate) writer_error: Option<String>,
}

impl SessionInner {
    fn buffer(&self, role: DeviceRole) -> Option<&Arc<StreamBuffer>> {
        match role {
            DeviceRole::Signal => self.signal_buffer.as_ref(),
            DeviceRole::Marker => self.marker_buffer.as_ref(),
        }
    }
}

/// Owns the active recording: its buffers, writer and writer thread.
///
/// At most one session is active. All state sits behind one lock; reader
/// threads take it only long enough to clone a buffer handle.
pub struct SessionManager {
    config: RecordingConfig,
    catalog: SessionCatalog,
    stats: Arc<RealtimeStats>,
    inner: Arc<Mutex<SessionInner>>,
    packets_received: AtomicU64,
}

impl SessionManager {
    /// Create a manager rooted at `config.data_dir`, creating it if needed
    pub fn new(config: RecordingConfig, stats: Arc<RealtimeStats>) -> Result<Self> {
        let catalog = SessionCatalog::new(&config.data_dir)?;
        Ok(Self {
            config,
            catalog,
            stats,
            inner: Arc::new(Mutex::new(SessionInner::default())),
            packets_received: AtomicU64::new(0),
        })
    }

    fn lock(&self) -> MutexGuard<'_, SessionInner> {
        self.inner
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    pub fn config(&self) -> &RecordingConfig {
        &self.config
    }

    pub fn stats(&self) -> &Arc<RealtimeStats> {
        &self.stats
    }

    pub fn state(&self) -> RecordingState {
        self.lock().state
    }

    pub fn is_recording(&self) -> bool {
        self.lock().state.is_recording()
    }

    /// Begin recording into a fresh session directory.
    ///
    /// Fails with `AlreadyRecording` if a session is active, or `Storage` if
    /// the stores cannot be created; neither changes the manager's state.
    pub fn start_new_session(&self, user_id: Option<i64>, user_account: Option<&str>) -> Result<String> {
        let mut inner = self.lock();
        if !inner.state.can_transition_to(RecordingState::Recording) {
            return Err(IngestError::AlreadyRecording);
        }

        let account = user_account.and_then(account_dir_name);
        let (session_id, session_dir) = self.allocate_session_dir(account.as_deref())?;

        let block_size = self.config.block_size;
        let queue_capacity = self.config.queue_capacity;
        let signal = Arc::new(
            StreamBuffer::with_queue_capacity(SIGNAL_CHANNELS, block_size, queue_capacity)
                .with_overflow_stats(self.stats.clone(), DeviceRole::Signal),
        );
        let marker = Arc::new(
            StreamBuffer::with_queue_capacity(1, block_size, queue_capacity)
                .with_overflow_stats(self.stats.clone(), DeviceRole::Marker),
        );
        let writer = Arc::new(StreamWriter::new(&session_dir, &self.config.file_prefix)?);
        let running = Arc::new(AtomicBool::new(true));
        let drain_lock = Arc::new(Mutex::new(()));

        let thread = WriterThread::spawn(DrainContext {
            signal: signal.clone(),
            marker: marker.clone(),
            writer: writer.clone(),
            running: running.clone(),
            drain_lock: drain_lock.clone(),
            inner: self.inner.clone(),
            signal_poll: self.config.signal_poll(),
            marker_poll: self.config.marker_poll(),
        })?;

        let mut session = Session::new(
            session_id.clone(),
            session_dir.clone(),
            user_id,
            user_account.map(str::to_string),
        );
        session.eeg_file = Some(writer.eeg_path().to_path_buf());
        session.trigger_file = Some(writer.trigger_path().to_path_buf());

        inner.current = Some(session);
        inner.signal_buffer = Some(signal);
        inner.marker_buffer = Some(marker);
        inner.writer = Some(writer);
        inner.writer_running = Some(running);
        inner.writer_thread = Some(thread);
        inner.drain_lock = Some(drain_lock);
        inner.total_samples = 0;
        inner.start_instant = Some(Instant::now());
        inner.writer_error = None;
        inner.state = RecordingState::Recording;
        drop(inner);

        self.packets_received.store(0, Ordering::Relaxed);
        self.stats.begin_recording(&session_id);

        log::info!("Recording started: {} in {:?}", session_id, session_dir);
        Ok(session_id)
    }

    /// Stop the active session, persist its tail and metadata, and return
    /// its id. Fails with `NotRecording` when idle.
    ///
    /// A writer that outlives the join timeout is left detached, but the
    /// drain lock keeps it from writing once the final flush begins.
    pub fn stop_session(&self) -> Result<String> {
        let (session_id, thread, drain_lock) = {
            let mut inner = self.lock();
            if !inner.state.can_transition_to(RecordingState::Idle) {
                return Err(IngestError::NotRecording);
            }

            if let Some(running) = &inner.writer_running {
                running.store(false, Ordering::Release);
            }
            inner.state = RecordingState::Idle;

            let id = inner.current.as_ref().map(|s| s.id.clone()).unwrap_or_default();
            (id, inner.writer_thread.take(), inner.drain_lock.take())
        };

        // Joined outside the lock: the writer takes it to publish sample counts
        if let Some(thread) = thread {
            thread.join_timeout(self.config.join_timeout());
        }

        // Drain lock before the session lock, same order as the writer
        let drain_guard = drain_lock
            .as_ref()
            .map(|lock| lock.lock().unwrap_or_else(|poisoned| poisoned.into_inner()));
        let mut inner = self.lock();
        let signal = inner.signal_buffer.take();
        let marker = inner.marker_buffer.take();
        let writer = inner.writer.take();
        inner.writer_running = None;

        let mut failure: Option<IngestError> = None;
        if let Some(writer) = &writer {
            if let Some(signal) = &signal {
                if let Err(e) = flush_buffer(signal, |block| writer.write_eeg_chunk(block)) {
                    failure.get_or_insert(e);
                }
            }
            if let Some(marker) = &marker {
                if let Err(e) = flush_buffer(marker, |block| writer.write_trigger_chunk(block)) {
                    failure.get_or_insert(e);
                }
            }
            if let Err(e) = writer.close() {
                failure.get_or_insert(e);
            }
        }

        let samples = signal
            .as_ref()
            .map(|b| b.total_samples())
            .unwrap_or(inner.total_samples);
        let marker_samples = marker.as_ref().map(|b| b.total_samples()).unwrap_or(0);
        let duration = inner
            .start_instant
            .take()
            .map(|t| t.elapsed().as_secs_f64())
            .unwrap_or(0.0);
        inner.total_samples = samples;

        if let Some(mut session) = inner.current.take() {
            session.end_time = Some(Local::now());
            session.sample_count = samples;
            session.marker_samples = marker_samples;
            session.duration = duration;

            if let Err(e) = self.catalog.save(&session) {
                failure.get_or_insert(e);
            }
            inner.sessions.push(session);
        }
        drop(inner);
        drop(drain_guard);

        self.stats.end_recording();

        match failure {
            Some(e) => {
                log::error!("Recording {} stopped with storage failure: {}", session_id, e);
                Err(e)
            }
            None => {
                log::info!(
                    "Recording stopped: {} ({} samples, {:.1}s)",
                    session_id, samples, duration
                );
                Ok(session_id)
            }
        }
    }

    pub fn get_status(&self) -> SessionStatus {
        let inner = self.lock();
        let recording = inner.state.is_recording();

        let dropped_blocks = inner.signal_buffer.as_ref().map(|b| b.dropped_blocks()).unwrap_or(0)
            + inner.marker_buffer.as_ref().map(|b| b.dropped_blocks()).unwrap_or(0);

        SessionStatus {
            is_recording: recording,
            current_session: inner.current.as_ref().map(|s| s.id.clone()),
            session_dir: inner.current.as_ref().map(|s| s.directory.clone()),
            signal_connected: self.stats.is_connected(DeviceRole::Signal),
            marker_connected: self.stats.is_connected(DeviceRole::Marker),
            total_samples: inner.total_samples,
            recording_duration: match (recording, inner.start_instant) {
                (true, Some(start)) => start.elapsed().as_secs_f64(),
                _ => 0.0,
            },
            packets_received: self.packets_received.load(Ordering::Relaxed),
            dropped_blocks,
            queue_size: inner.signal_buffer.as_ref().map(|b| b.queue_len()).unwrap_or(0),
            writer_error: inner.writer_error.clone(),
        }
    }

    /// Buffer a reader thread should write into, if a recording is active
    pub fn active_buffer(&self, role: DeviceRole) -> Option<Arc<StreamBuffer>> {
        let inner = self.lock();
        if !inner.state.is_recording() {
            return None;
        }
        inner.buffer(role).cloned()
    }

    /// Count one real signal packet that went into the active buffer
    pub fn record_packet_received(&self) {
        self.packets_received.fetch_add(1, Ordering::Relaxed);
    }

    /// Live copy of the unflushed tail of a stream's buffer
    pub fn current_data(&self, role: DeviceRole, last_n: Option<usize>) -> Option<SampleBlock> {
        let buffer = self.lock().buffer(role).cloned()?;
        Some(buffer.get_current_data(last_n))
    }

    /// Sessions completed since this manager was created
    pub fn sessions(&self) -> Vec<Session> {
        self.lock().sessions.clone()
    }

    /// Every session with metadata under the data root, including ones
    /// recorded by earlier processes
    pub fn stored_sessions(&self) -> Result<Vec<Session>> {
        self.catalog.list_all()
    }

    fn allocate_session_dir(&self, account: Option<&str>) -> Result<(String, PathBuf)> {
        let base = match account {
            Some(account) => self.config.data_dir.join(account),
            None => self.config.data_dir.clone(),
        };

        let stamp = format!("session_{}", Local::now().format("%Y%m%d_%H%M%S"));
        let mut session_id = stamp.clone();
        let mut suffix = 1;
        while base.join(&session_id).exists() {
            session_id = format!("{}_{}", stamp, suffix);
            suffix += 1;
        }

        let dir = base.join(&session_id);
        std::fs::create_dir_all(&dir).map_err(|e| IngestError::storage(&dir, e))?;
        Ok((session_id, dir))
    }

    pub fn data_dir(&self) -> &Path {
        &self.config.data_dir
    }
}

impl Drop for SessionManager {
    fn drop(&mut self) {
        if self.is_recording() {
            if let Err(e) = self.stop_session() {
                log::error!("Failed to stop session on shutdown: {}", e);
            }
        }
    }
}

/// Write any full blocks still queued, then the sub-block tail
fn flush_buffer<F>(buffer: &StreamBuffer, mut write: F) -> Result<()>
where
    F: FnMut(&SampleBlock) -> Result<()>,
{
    while let Some(chunk) = buffer.try_read_chunk() {
        write(&chunk.block)?;
    }
    if let Some(tail) = buffer.drain_remainder() {
        write(&tail)?;
    }
    Ok(())
}

/// Account names become directory names; anything that could escape the
/// data root is rejected
fn account_dir_name(account: &str) -> Option<String> {
    let cleaned: String = account
        .trim()
        .chars()
        .map(|c| if c.is_alphanumeric() || matches!(c, '-' | '_' | '.' | '@') { c } else { '_' })
        .collect();

    match cleaned.as_str() {
        "" | "." | ".." => None,
        _ => Some(cleaned),
    }
}
