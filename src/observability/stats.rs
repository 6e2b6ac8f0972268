use serde::{Deserialize, Serialize};
use std::sync::Mutex;
use std::time::Instant;

use crate::protocol::DeviceRole;

/// Per-stream counters as reported to the control surface
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct StreamStats {
    pub connected: bool,
    pub last_sequence: u32,
    pub received_count: u64,
    /// `(filled + dropped) / (received + filled) * 100`, capped at 100
    pub loss_rate_percent: f64,
    pub filled_count: u64,
    /// Samples discarded because the writer queue was full
    #[serde(default)]
    pub dropped_samples: u64,
    /// Last non-zero marker seen; always 0 for the signal stream
    pub last_marker_value: u8,
}

impl StreamStats {
    fn record(&mut self, sequence: u32, received: u64, filled: u64) {
        self.last_sequence = sequence;
        self.received_count = received;
        self.filled_count = filled;
        self.recompute_loss();
    }

    fn recompute_loss(&mut self) {
        let total = self.received_count + self.filled_count;
        let lost = self.filled_count + self.dropped_samples;
        self.loss_rate_percent = if total > 0 {
            (100.0 * lost as f64 / total as f64).min(100.0)
        } else {
            0.0
        };
    }
}

/// Snapshot of both streams plus the recording flag
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct StatsSnapshot {
    pub signal: StreamStats,
    pub marker: StreamStats,
    pub recording: bool,
    pub session_id: String,
    /// Seconds since the current recording started
    pub duration: f64,
}

#[derive(Default)]
struct StatsInner {
    signal: StreamStats,
    marker: StreamStats,
    recording: bool,
    session_id: String,
    start_time: Option<Instant>,
}

impl StatsInner {
    fn stream_mut(&mut self, role: DeviceRole) -> &mut StreamStats {
        match role {
            DeviceRole::Signal => &mut self.signal,
            DeviceRole::Marker => &mut self.marker,
        }
    }
}

/// Thread-safe realtime counters shared by the reader threads, the session
/// manager and whoever queries status.
///
/// Readers call [`RealtimeStats::update_stream`] periodically rather than
/// per frame, so the single lock here sees little contention.
#[derive(Default)]
pub struct RealtimeStats {
    inner: Mutex<StatsInner>,
}

impl RealtimeStats {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, StatsInner> {
        self.inner
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    pub fn set_connected(&self, role: DeviceRole, connected: bool) {
        self.lock().stream_mut(role).connected = connected;
    }

    pub fn is_connected(&self, role: DeviceRole) -> bool {
        let inner = self.lock();
        match role {
            DeviceRole::Signal => inner.signal.connected,
            DeviceRole::Marker => inner.marker.connected,
        }
    }

    /// Record the latest counters for one stream and recompute its loss rate
    pub fn update_stream(&self, role: DeviceRole, sequence: u32, received: u64, filled: u64) {
        self.lock().stream_mut(role).record(sequence, received, filled);
    }

    /// Count samples a stream buffer discarded on queue overflow
    pub fn record_dropped(&self, role: DeviceRole, samples: u64) {
        let mut inner = self.lock();
        let stream = inner.stream_mut(role);
        stream.dropped_samples += samples;
        stream.recompute_loss();
    }

    /// Remember a marker value; zero markers are ignored
    pub fn record_marker(&self, value: u8) {
        if value != 0 {
            self.lock().marker.last_marker_value = value;
        }
    }

    pub fn begin_recording(&self, session_id: &str) {
        let mut inner = self.lock();
        inner.recording = true;
        inner.session_id = session_id.to_string();
        inner.signal.dropped_samples = 0;
        inner.marker.dropped_samples = 0;
        inner.start_time = Some(Instant::now());
    }

    pub fn end_recording(&self) {
        let mut inner = self.lock();
        inner.recording = false;
        inner.start_time = None;
    }

    pub fn snapshot(&self) -> StatsSnapshot {
        let inner = self.lock();
        StatsSnapshot {
            signal: inner.signal.clone(),
            marker: inner.marker.clone(),
            recording: inner.recording,
            session_id: inner.session_id.clone(),
            duration: inner
                .start_time
                .map(|t| t.elapsed().as_secs_f64())
                .unwrap_or(0.0),
        }
    }

    /// Clear every counter; connection flags survive since sockets do
    pub fn reset(&self) {
        let mut inner = self.lock();
        let signal_connected = inner.signal.connected;
        let marker_connected = inner.marker.connected;
        *inner = StatsInner::default();
        inner.signal.connected = signal_connected;
        inner.marker.connected = marker_connected;
    }
}
