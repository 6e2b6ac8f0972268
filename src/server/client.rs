use std::io::{self, Read};
use std::sync::Arc;

use crate::observability::RealtimeStats;
use crate::protocol::{DeviceRole, Frame, FrameReader, SIGNAL_CHANNELS};
use crate::session::SessionManager;

/// Sequence-gap detector for one device stream
#[derive(Debug, Default, Clone)]
pub struct LossTracker {
    last_sequence: Option<u32>,
}

impl LossTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of frames missing between the previous sequence and `sequence`.
    ///
    /// Signed: a backwards jump (device restart, wraparound) is not a gap.
    pub fn observe(&mut self, sequence: u32) -> u64 {
        let gap = match self.last_sequence {
            Some(last) => sequence as i64 - last as i64 - 1,
            None => 0,
        };
        self.last_sequence = Some(sequence);
        gap.max(0) as u64
    }

    pub fn last_sequence(&self) -> Option<u32> {
        self.last_sequence
    }
}

/// Totals for one connection once its stream ends
#[derive(Debug, Clone, Default, PartialEq)]
pub struct StreamSummary {
    pub frames: u64,
    pub filled: u64,
    pub last_sequence: Option<u32>,
}

/// Per-connection loop: parse frames, compensate for loss, feed the active
/// buffer and keep the stats current
pub struct ClientHandler {
    role: DeviceRole,
    session_manager: Arc<SessionManager>,
    stats: Arc<RealtimeStats>,
    update_interval: u64,
}

impl ClientHandler {
    pub fn new(
        role: DeviceRole,
        session_manager: Arc<SessionManager>,
        stats: Arc<RealtimeStats>,
        update_interval: u64,
    ) -> Self {
        Self {
            role,
            session_manager,
            stats,
            update_interval: update_interval.max(1),
        }
    }

    pub fn role(&self) -> DeviceRole {
        self.role
    }

    /// Consume `reader` until the peer closes or errors
    pub fn run<R: Read>(&self, reader: R) -> StreamSummary {
        self.stats.set_connected(self.role, true);

        let mut frames = FrameReader::new(reader, self.role);
        let mut tracker = LossTracker::new();
        let channels = self.role.channels();
        // Per-frame scratch space; nothing on the hot path allocates
        let mut current = [0.0f32; SIGNAL_CHANNELS];
        let mut last = [0.0f32; SIGNAL_CHANNELS];
        let zeros = [0.0f32; SIGNAL_CHANNELS];
        let mut have_last = false;
        let mut received: u64 = 0;
        let mut filled: u64 = 0;

        loop {
            let frame = match frames.read_frame() {
                Ok(frame) => frame,
                Err(e) if e.kind() == io::ErrorKind::UnexpectedEof => {
                    log::info!("{} device disconnected", self.role.name());
                    break;
                }
                Err(e) => {
                    log::info!("{} device connection lost: {}", self.role.name(), e);
                    break;
                }
            };

            received += 1;
            let gap = tracker.observe(frame.sequence);
            frame.copy_sample(&mut current[..channels]);

            if let Some(buffer) = self.session_manager.active_buffer(self.role) {
                if gap > 0 {
                    // Signal gaps repeat the last real sample, marker gaps are silent
                    let synthetic = match self.role {
                        DeviceRole::Signal if have_last => &last[..channels],
                        _ => &zeros[..channels],
                    };
                    for _ in 0..gap {
                        buffer.write(synthetic);
                    }
                    filled += gap;
                    log::debug!(
                        "{} stream gap of {} before seq {}",
                        self.role.name(), gap, frame.sequence
                    );
                }
                buffer.write(&current[..channels]);
                if self.role == DeviceRole::Signal {
                    self.session_manager.record_packet_received();
                }
            }

            self.observe_marker(&frame);
            last[..channels].copy_from_slice(&current[..channels]);
            have_last = true;

            if received % self.update_interval == 0 {
                self.stats.update_stream(self.role, frame.sequence, received, filled);
            }
        }

        if let Some(sequence) = tracker.last_sequence() {
            self.stats.update_stream(self.role, sequence, received, filled);
        }
        self.stats.set_connected(self.role, false);

        StreamSummary {
            frames: received,
            filled,
            last_sequence: tracker.last_sequence(),
        }
    }

    fn observe_marker(&self, frame: &Frame) {
        if let Some(marker) = frame.marker() {
            self.stats.record_marker(marker);
        }
    }
}
