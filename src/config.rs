use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::env;
use std::fs;
use std::net::{IpAddr, Ipv4Addr};
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::buffers::{DEFAULT_BLOCK_SIZE, DEFAULT_QUEUE_CAPACITY};

/// TCP listener and device addressing
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    /// Address the TCP server binds to; also the source of the UDP start burst
    pub host_ip: IpAddr,
    pub port: u16,
    /// Peer address of the EEG amplifier
    pub signal_device_ip: IpAddr,
    /// Peer address of the trigger box
    pub marker_device_ip: IpAddr,
    /// UDP port the boxes listen on for the start instruction
    pub start_command_port: u16,
    pub start_command_repeats: u32,
    pub start_command_interval_ms: u64,
    /// How often the accept loop checks for `stop()`
    pub accept_poll_ms: u64,
    /// Frames between stats updates from a reader thread
    pub stats_update_interval: u64,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host_ip: IpAddr::V4(Ipv4Addr::new(192, 168, 1, 101)),
            port: 5001,
            signal_device_ip: IpAddr::V4(Ipv4Addr::new(192, 168, 1, 102)),
            marker_device_ip: IpAddr::V4(Ipv4Addr::new(192, 168, 1, 103)),
            start_command_port: 8080,
            start_command_repeats: 5,
            start_command_interval_ms: 100,
            accept_poll_ms: 50,
            stats_update_interval: 2000,
        }
    }
}

impl ServerConfig {
    pub fn start_command_interval(&self) -> Duration {
        Duration::from_millis(self.start_command_interval_ms)
    }

    pub fn accept_poll(&self) -> Duration {
        Duration::from_millis(self.accept_poll_ms)
    }
}

/// Buffering and persistence settings for each session
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RecordingConfig {
    /// Root under which session directories are created
    pub data_dir: PathBuf,
    pub file_prefix: String,
    /// Samples per block handed to the writer
    pub block_size: usize,
    /// Full blocks that may wait for the writer before new ones are dropped
    pub queue_capacity: usize,
    pub signal_poll_ms: u64,
    pub marker_poll_ms: u64,
    /// Upper bound on waiting for the writer thread at stop
    pub join_timeout_ms: u64,
}

impl Default for RecordingConfig {
    fn default() -> Self {
        Self {
            data_dir: PathBuf::from("data"),
            file_prefix: "eeg_data".to_string(),
            block_size: DEFAULT_BLOCK_SIZE,
            queue_capacity: DEFAULT_QUEUE_CAPACITY,
            signal_poll_ms: 500,
            marker_poll_ms: 100,
            join_timeout_ms: 5000,
        }
    }
}

impl RecordingConfig {
    pub fn with_data_dir(data_dir: impl Into<PathBuf>) -> Self {
        Self {
            data_dir: data_dir.into(),
            ..Self::default()
        }
    }

    pub fn signal_poll(&self) -> Duration {
        Duration::from_millis(self.signal_poll_ms)
    }

    pub fn marker_poll(&self) -> Duration {
        Duration::from_millis(self.marker_poll_ms)
    }

    pub fn join_timeout(&self) -> Duration {
        Duration::from_millis(self.join_timeout_ms)
    }
}

/// Top-level configuration file format
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct IngestConfig {
    pub server: ServerConfig,
    pub recording: RecordingConfig,
    /// Start the TCP server as soon as the process comes up
    pub auto_start: bool,
}

impl IngestConfig {
    /// Load from an optional JSON file, then apply environment overrides
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let mut config = match path {
            Some(path) => {
                let content = fs::read_to_string(path)
                    .with_context(|| format!("Failed to read config file {:?}", path))?;
                serde_json::from_str(&content)
                    .with_context(|| format!("Failed to parse config JSON {:?}", path))?
            }
            None => Self::default(),
        };

        config.apply_env(|key| env::var(key).ok())?;
        Ok(config)
    }

    /// Override fields from `EEG_*` variables resolved through `lookup`
    pub fn apply_env<F>(&mut self, lookup: F) -> Result<()>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(v) = lookup("EEG_HOST_IP") {
            self.server.host_ip = v.parse().with_context(|| format!("Invalid EEG_HOST_IP: {}", v))?;
        }
        if let Some(v) = lookup("EEG_SERVER_PORT") {
            self.server.port = v.parse().with_context(|| format!("Invalid EEG_SERVER_PORT: {}", v))?;
        }
        if let Some(v) = lookup("EEG_DEVICE_IP") {
            self.server.signal_device_ip = v.parse().with_context(|| format!("Invalid EEG_DEVICE_IP: {}", v))?;
        }
        if let Some(v) = lookup("EEG_TRIGGER_IP") {
            self.server.marker_device_ip = v.parse().with_context(|| format!("Invalid EEG_TRIGGER_IP: {}", v))?;
        }
        if let Some(v) = lookup("EEG_DATA_DIR") {
            self.recording.data_dir = PathBuf::from(v);
        }
        if let Some(v) = lookup("EEG_AUTO_START") {
            self.auto_start = matches!(v.trim().to_lowercase().as_str(), "1" | "true" | "yes" | "on");
        }
        Ok(())
    }
}
