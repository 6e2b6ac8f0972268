pub mod array_store;
pub mod stream_writer;
pub mod metadata;

pub use array_store::{ArrayReader, ArrayStore, StoredArray, DATASET};
pub use stream_writer::StreamWriter;
pub use metadata::{SessionCatalog, METADATA_FILE};
