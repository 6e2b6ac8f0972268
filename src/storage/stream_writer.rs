use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use super::array_store::ArrayStore;
use crate::buffers::SampleBlock;
use crate::error::{IngestError, Result};
use crate::protocol::SIGNAL_CHANNELS;

const CHUNK_LEN: usize = 1000;

struct Stores {
    eeg: ArrayStore<f32>,
    trigger: ArrayStore<i32>,
}

/// Durable per-session writer owning one signal store and one marker store.
///
/// Every write is flushed before it returns, so a crash loses at most the
/// block being written.
pub struct StreamWriter {
    save_dir: PathBuf,
    eeg_path: PathBuf,
    trigger_path: PathBuf,
    stores: Mutex<Stores>,
}

impl StreamWriter {
    /// Create both stores under `save_dir`, named `{prefix}_eeg_{ts}.h5`
    /// and `{prefix}_trigger_{ts}.h5`
    pub fn new(save_dir: impl AsRef<Path>, file_prefix: &str) -> Result<Self> {
        let save_dir = save_dir.as_ref().to_path_buf();
        fs::create_dir_all(&save_dir).map_err(|e| IngestError::storage(&save_dir, e))?;

        let timestamp = chrono::Local::now().format("%Y%m%d_%H%M%S");
        let eeg_path = save_dir.join(format!("{}_eeg_{}.h5", file_prefix, timestamp));
        let trigger_path = save_dir.join(format!("{}_trigger_{}.h5", file_prefix, timestamp));

        let eeg = ArrayStore::<f32>::create(&eeg_path, 2, SIGNAL_CHANNELS, CHUNK_LEN)?;
        let trigger = ArrayStore::<i32>::create(&trigger_path, 1, 1, CHUNK_LEN)?;

        log::debug!("Opened stores {:?} and {:?}", eeg_path, trigger_path);

        Ok(Self {
            save_dir,
            eeg_path,
            trigger_path,
            stores: Mutex::new(Stores { eeg, trigger }),
        })
    }

    pub fn save_dir(&self) -> &Path {
        &self.save_dir
    }

    pub fn eeg_path(&self) -> &Path {
        &self.eeg_path
    }

    pub fn trigger_path(&self) -> &Path {
        &self.trigger_path
    }

    /// Append a `[32, N]` block to the signal store
    pub fn write_eeg_chunk(&self, block: &SampleBlock) -> Result<()> {
        if block.channels != SIGNAL_CHANNELS {
            return Err(IngestError::InvalidBlock(format!(
                "signal block has {} channels, expected {}",
                block.channels, SIGNAL_CHANNELS
            )));
        }

        let mut stores = self.stores
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        stores.eeg.append(&block.data, block.len)
    }

    /// Append a marker block to the marker store; only channel 0 is kept
    pub fn write_trigger_chunk(&self, block: &SampleBlock) -> Result<()> {
        if block.channels == 0 {
            return Err(IngestError::InvalidBlock("marker block has no channels".to_string()));
        }
        let values: Vec<i32> = block.channel(0).iter().map(|&v| v.round() as i32).collect();

        let mut stores = self.stores
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        stores.trigger.append(&values, block.len)
    }

    /// Samples persisted so far as `(signal, marker)`
    pub fn lengths(&self) -> (u64, u64) {
        let stores = self.stores
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        (stores.eeg.len(), stores.trigger.len())
    }

    /// Finalise both stores. Both are attempted even if the first fails.
    pub fn close(&self) -> Result<()> {
        let mut stores = self.stores
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        let eeg = stores.eeg.close();
        let trigger = stores.trigger.close();
        eeg.and(trigger)
    }
}
