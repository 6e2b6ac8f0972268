use chrono::{DateTime, Local};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// One recording session.
///
/// Mutated only by the session manager while recording; once stopped the
/// record is frozen, kept in the session list and written to disk.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Session {
    pub id: String,

    #[serde(rename = "dir")]
    pub directory: PathBuf,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user_id: Option<i64>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user_account: Option<String>,

    pub start_time: DateTime<Local>,

    pub end_time: Option<DateTime<Local>>,

    /// Signal samples written, real and loss-filled alike
    #[serde(rename = "samples")]
    pub sample_count: u64,

    #[serde(default)]
    pub marker_samples: u64,

    /// Seconds between start and stop
    pub duration: f64,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub eeg_file: Option<PathBuf>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub trigger_file: Option<PathBuf>,
}

impl Session {
    pub fn new(id: String, directory: PathBuf, user_id: Option<i64>, user_account: Option<String>) -> Self {
        Self {
            id,
            directory,
            user_id,
            user_account,
            start_time: Local::now(),
            end_time: None,
            sample_count: 0,
            marker_samples: 0,
            duration: 0.0,
            eeg_file: None,
            trigger_file: None,
        }
    }

    pub fn is_finished(&self) -> bool {
        self.end_time.is_some()
    }
}

/// Point-in-time view of the session manager for the control surface
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SessionStatus {
    pub is_recording: bool,
    pub current_session: Option<String>,
    pub session_dir: Option<PathBuf>,
    pub signal_connected: bool,
    pub marker_connected: bool,
    pub total_samples: u64,
    pub recording_duration: f64,
    pub packets_received: u64,
    /// Blocks discarded because the writer fell behind
    pub dropped_blocks: u64,
    /// Full signal blocks waiting for the writer
    pub queue_size: usize,
    pub writer_error: Option<String>,
}
