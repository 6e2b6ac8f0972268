use std::path::PathBuf;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum IngestError {
    #[error("Already recording")]
    AlreadyRecording,

    #[error("Not recording")]
    NotRecording,

    #[error("Server already running")]
    ServerAlreadyRunning,

    #[error("Server not running")]
    ServerNotRunning,

    #[error("Storage failure at {path:?}: {source}")]
    Storage {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("HDF5 failure at {path:?}: {source}")]
    Store {
        path: PathBuf,
        #[source]
        source: hdf5::Error,
    },

    #[error("Store is closed: {0:?}")]
    StoreClosed(PathBuf),

    #[error("Store rejected further appends after a failed write: {0:?}")]
    StoreFailed(PathBuf),

    #[error("Invalid block: {0}")]
    InvalidBlock(String),

    #[error("Corrupt store {path:?}: {reason}")]
    CorruptStore { path: PathBuf, reason: String },

    #[error("Failed to serialize metadata: {0}")]
    Metadata(#[from] serde_json::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl IngestError {
    pub(crate) fn storage(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Storage {
            path: path.into(),
            source,
        }
    }

    pub(crate) fn store(path: impl Into<PathBuf>, source: hdf5::Error) -> Self {
        Self::Store {
            path: path.into(),
            source,
        }
    }
}

pub type Result<T> = std::result::Result<T, IngestError>;
