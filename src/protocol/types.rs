use serde::{Deserialize, Serialize};

/// Number of EEG channels carried by every signal frame
pub const SIGNAL_CHANNELS: usize = 32;

/// Bytes per encoded channel sample
pub const BYTES_PER_SAMPLE: usize = 3;

/// Sync bytes that open a signal-source frame
pub const SIGNAL_SYNC: [u8; 2] = [0xA1, 0x05];

/// Sync bytes that open a marker-source frame
pub const MARKER_SYNC: [u8; 2] = [0xAA, 0x56];

/// UDP payload that tells both boxes to start streaming
pub const START_INSTRUCTION: [u8; 3] = [0xBB, 0x66, 0x01];

/// Microvolts per ADC count
pub const MICROVOLTS_PER_COUNT: f64 = 0.02483;

/// Offset that turns the 24-bit unsigned wire value into a signed count
pub const SIGNED_OFFSET: i32 = 1 << 23;

pub const RESERVED_LEN: usize = 1;
pub const INDEX_LEN: usize = 4;

/// Physical device role; each role has its own TCP connection and sync bytes
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DeviceRole {
    /// 32-channel amplifier producing continuous samples
    Signal,
    /// Trigger box producing sparse event markers
    Marker,
}

impl DeviceRole {
    pub fn sync_bytes(&self) -> [u8; 2] {
        match self {
            Self::Signal => SIGNAL_SYNC,
            Self::Marker => MARKER_SYNC,
        }
    }

    /// Payload length following the 4-byte index
    pub fn payload_len(&self) -> usize {
        match self {
            Self::Signal => SIGNAL_CHANNELS * BYTES_PER_SAMPLE,
            Self::Marker => BYTES_PER_SAMPLE,
        }
    }

    /// Full frame length on the wire, sync bytes included
    pub fn frame_len(&self) -> usize {
        2 + RESERVED_LEN + INDEX_LEN + self.payload_len()
    }

    /// Channels stored per sample for this role's stream
    pub fn channels(&self) -> usize {
        match self {
            Self::Signal => SIGNAL_CHANNELS,
            Self::Marker => 1,
        }
    }

    pub fn from_sync(bytes: [u8; 2]) -> Option<Self> {
        match bytes {
            SIGNAL_SYNC => Some(Self::Signal),
            MARKER_SYNC => Some(Self::Marker),
            _ => None,
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            Self::Signal => "eeg",
            Self::Marker => "trigger",
        }
    }
}

impl std::fmt::Display for DeviceRole {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

impl std::str::FromStr for DeviceRole {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "signal" | "eeg" => Ok(Self::Signal),
            "marker" | "trigger" => Ok(Self::Marker),
            other => Err(format!("unknown device role: {}", other)),
        }
    }
}

/// Decoded frame payload
#[derive(Debug, Clone, PartialEq)]
pub enum FramePayload {
    /// Per-channel values in microvolts
    Signal([f32; SIGNAL_CHANNELS]),
    /// Marker value carried in the reserved byte
    Marker(u8),
}

/// One decoded frame
#[derive(Debug, Clone, PartialEq)]
pub struct Frame {
    pub sequence: u32,
    pub payload: FramePayload,
}

impl Frame {
    pub fn role(&self) -> DeviceRole {
        match self.payload {
            FramePayload::Signal(_) => DeviceRole::Signal,
            FramePayload::Marker(_) => DeviceRole::Marker,
        }
    }

    /// Copy the sample values, as written into a stream buffer, into the
    /// front of `out` and return how many were written
    pub fn copy_sample(&self, out: &mut [f32]) -> usize {
        match &self.payload {
            FramePayload::Signal(values) => {
                let n = values.len().min(out.len());
                out[..n].copy_from_slice(&values[..n]);
                n
            }
            FramePayload::Marker(value) => match out.first_mut() {
                Some(slot) => {
                    *slot = *value as f32;
                    1
                }
                None => 0,
            },
        }
    }

    pub fn marker(&self) -> Option<u8> {
        match self.payload {
            FramePayload::Marker(value) => Some(value),
            FramePayload::Signal(_) => None,
        }
    }
}
