pub mod buffers;
pub mod config;
pub mod error;
pub mod mock;
pub mod observability;
pub mod protocol;
pub mod server;
pub mod session;
pub mod storage;

pub use buffers::{SampleBlock, StreamBuffer};
pub use config::{IngestConfig, RecordingConfig, ServerConfig};
pub use error::{IngestError, Result};
pub use observability::{RealtimeStats, StatsMonitor, StatsSnapshot};
pub use protocol::{DeviceRole, Frame, FrameParser, FramePayload};
pub use server::{ClientHandler, DeviceServer};
pub use session::{RecordingState, Session, SessionManager, SessionStatus};
pub use storage::{ArrayReader, SessionCatalog, StreamWriter};
