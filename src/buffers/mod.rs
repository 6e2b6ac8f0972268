pub mod stream_buffer;

pub use stream_buffer::{
    Chunk, SampleBlock, StreamBuffer, DEFAULT_BLOCK_SIZE, DEFAULT_QUEUE_CAPACITY,
};
