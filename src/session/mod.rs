pub mod types;
pub mod state;
pub mod manager;
mod writer_thread;

pub use types::{Session, SessionStatus};
pub use state::RecordingState;
pub use manager::SessionManager;
