pub mod stats;
pub mod monitor;

pub use stats::{RealtimeStats, StatsSnapshot, StreamStats};
pub use monitor::StatsMonitor;
