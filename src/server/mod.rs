pub mod client;
pub mod device_server;
pub mod start_command;

pub use client::{ClientHandler, LossTracker, StreamSummary};
pub use device_server::DeviceServer;
pub use start_command::{send_start_instruction, subnet_broadcast};
