use std::sync::Arc;

use super::{RealtimeStats, StreamStats};

/// Renders the realtime stats as a short human-readable report
pub struct StatsMonitor {
    stats: Arc<RealtimeStats>,
}

impl StatsMonitor {
    pub fn new(stats: Arc<RealtimeStats>) -> Self {
        Self { stats }
    }

    pub fn generate_report(&self) -> String {
        let snapshot = self.stats.snapshot();

        let mut report = String::from("=== Ingest Stats ===\n");
        if snapshot.recording {
            report.push_str(&format!(
                "Recording {} ({:.1}s)\n",
                snapshot.session_id, snapshot.duration
            ));
        } else {
            report.push_str("Not recording\n");
        }

        report.push_str(&stream_line("eeg", &snapshot.signal));
        report.push_str(&stream_line("trigger", &snapshot.marker));
        if snapshot.marker.last_marker_value != 0 {
            report.push_str(&format!("  last marker: {}\n", snapshot.marker.last_marker_value));
        }

        report
    }

    pub fn stats(&self) -> &Arc<RealtimeStats> {
        &self.stats
    }
}

fn stream_line(name: &str, stream: &StreamStats) -> String {
    if !stream.connected && stream.received_count == 0 {
        return format!("[{}] disconnected\n", name);
    }

    format!(
        "[{}] {} seq={} received={} filled={} dropped={} loss={:.2}%\n",
        name,
        if stream.connected { "connected" } else { "disconnected" },
        stream.last_sequence,
        stream.received_count,
        stream.filled_count,
        stream.dropped_samples,
        stream.loss_rate_percent
    )
}
