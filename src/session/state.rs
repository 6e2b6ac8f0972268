use serde::{Deserialize, Serialize};

/// Session manager lifecycle
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum RecordingState {
    #[default]
    Idle,
    Recording,
}

impl RecordingState {
    /// Check if transition from current state to target state is valid
    pub fn can_transition_to(&self, target: RecordingState) -> bool {
        use RecordingState::*;

        matches!((self, target), (Idle, Recording) | (Recording, Idle))
    }

    pub fn is_recording(&self) -> bool {
        *self == RecordingState::Recording
    }

    /// Get human-readable state name
    pub fn name(&self) -> &str {
        match self {
            Self::Idle => "Idle",
            Self::Recording => "Recording",
        }
    }
}
