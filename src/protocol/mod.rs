pub mod types;
pub mod parser;
pub mod encoder;

pub use types::{
    DeviceRole, Frame, FramePayload,
    SIGNAL_CHANNELS, SIGNAL_SYNC, MARKER_SYNC, START_INSTRUCTION, MICROVOLTS_PER_COUNT,
};
pub use parser::{FrameParser, FrameReader, ParserState};
pub use encoder::{encode_marker_frame, encode_signal_frame};
