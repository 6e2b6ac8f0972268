use hdf5::{Dataset, Extent, File, H5Type};
use std::path::{Path, PathBuf};

use crate::error::{IngestError, Result};

/// Name of the single dataset inside every store file
pub const DATASET: &str = "data";

/// gzip level for chunk compression
const DEFLATE_LEVEL: u8 = 4;

struct OpenStore {
    file: File,
    dataset: Dataset,
}

/// HDF5 file holding one chunked, gzip-compressed dataset that grows along
/// its last dimension.
///
/// Rank 1 stores are `[N]`, rank 2 stores are `[channels, N]`. Every append
/// resizes the dataset, writes the new columns and flushes the file. An
/// append that fails shrinks the dataset back to its previous length and
/// leaves the store failed, so a later append can never land after a
/// half-written block.
pub struct ArrayStore<T: H5Type + Copy> {
    path: PathBuf,
    rank: u8,
    channels: usize,
    open: Option<OpenStore>,
    failed: bool,
    len: u64,
    _marker: std::marker::PhantomData<T>,
}

impl<T: H5Type + Copy> ArrayStore<T> {
    /// Create a new empty store at `path`, truncating anything there
    pub fn create(path: impl AsRef<Path>, rank: u8, channels: usize, chunk_len: usize) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        let chunk_len = chunk_len.max(1);

        let file = File::create(&path).map_err(|e| IngestError::store(&path, e))?;
        let created = if rank == 1 {
            file.new_dataset::<T>()
                .shape(Extent::resizable(0))
                .chunk((chunk_len,))
                .deflate(DEFLATE_LEVEL)
                .create(DATASET)
        } else {
            file.new_dataset::<T>()
                .shape((channels, 0..))
                .chunk((channels, chunk_len))
                .deflate(DEFLATE_LEVEL)
                .create(DATASET)
        };
        let dataset = created.map_err(|e| IngestError::store(&path, e))?;
        file.flush().map_err(|e| IngestError::store(&path, e))?;

        Ok(Self {
            path,
            rank: if rank == 1 { 1 } else { 2 },
            channels: if rank == 1 { 1 } else { channels },
            open: Some(OpenStore { file, dataset }),
            failed: false,
            len: 0,
            _marker: std::marker::PhantomData,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn rank(&self) -> u8 {
        self.rank
    }

    pub fn channels(&self) -> usize {
        self.channels
    }

    /// Current length of the growable dimension
    pub fn len(&self) -> u64 {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Append `samples` columns given channel-major in `data`
    pub fn append(&mut self, data: &[T], samples: usize) -> Result<()> {
        if data.len() != self.channels * samples {
            return Err(IngestError::InvalidBlock(format!(
                "expected {} values for {} samples x {} channels, got {}",
                self.channels * samples,
                samples,
                self.channels,
                data.len()
            )));
        }
        if samples == 0 {
            return Ok(());
        }

        let rank = self.rank;
        self.commit(samples, |dataset, old, new| {
            if rank == 1 {
                return dataset.write_slice(data, old..new);
            }
            for (ch, row) in data.chunks_exact(samples).enumerate() {
                dataset.write_slice(row, (ch, old..new))?;
            }
            Ok(())
        })
    }

    /// Grow the dataset by `samples`, fill the new region with `write` and
    /// flush. On any failure the dataset is shrunk back and the store
    /// refuses further appends.
    fn commit<F>(&mut self, samples: usize, write: F) -> Result<()>
    where
        F: FnOnce(&Dataset, usize, usize) -> hdf5::Result<()>,
    {
        if self.failed {
            return Err(IngestError::StoreFailed(self.path.clone()));
        }
        let store = self.open
            .as_ref()
            .ok_or_else(|| IngestError::StoreClosed(self.path.clone()))?;

        let old = self.len as usize;
        let new = old + samples;
        let outcome = resize(&store.dataset, self.rank, self.channels, new)
            .and_then(|_| write(&store.dataset, old, new))
            .and_then(|_| store.file.flush());

        if let Err(e) = outcome {
            if let Err(rollback) = resize(&store.dataset, self.rank, self.channels, old) {
                log::error!("Failed to roll back {:?} to {} samples: {}", self.path, old, rollback);
            }
            self.failed = true;
            return Err(IngestError::store(&self.path, e));
        }

        self.len = new as u64;
        Ok(())
    }

    /// Flush and release the file; later appends fail with `StoreClosed`
    pub fn close(&mut self) -> Result<()> {
        if let Some(store) = self.open.take() {
            store.file.flush().map_err(|e| IngestError::store(&self.path, e))?;
        }
        Ok(())
    }

    pub fn is_closed(&self) -> bool {
        self.open.is_none()
    }

    /// True once an append has failed
    pub fn is_failed(&self) -> bool {
        self.failed
    }
}

fn resize(dataset: &Dataset, rank: u8, channels: usize, len: usize) -> hdf5::Result<()> {
    if rank == 1 {
        dataset.resize(len)
    } else {
        dataset.resize((channels, len))
    }
}

/// Fully materialised array, channel-major
#[derive(Debug, Clone, PartialEq)]
pub struct StoredArray<T> {
    pub rank: u8,
    pub channels: usize,
    pub len: usize,
    pub data: Vec<T>,
}

impl<T> StoredArray<T> {
    pub fn channel(&self, ch: usize) -> &[T] {
        &self.data[ch * self.len..(ch + 1) * self.len]
    }

    pub fn shape(&self) -> Vec<usize> {
        if self.rank == 1 {
            vec![self.len]
        } else {
            vec![self.channels, self.len]
        }
    }
}

/// Read access to a store file
pub struct ArrayReader {
    path: PathBuf,
    _file: File,
    dataset: Dataset,
}

impl ArrayReader {
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        let file = File::open(&path).map_err(|e| IngestError::store(&path, e))?;
        let dataset = file.dataset(DATASET).map_err(|e| IngestError::store(&path, e))?;

        Ok(Self { path, _file: file, dataset })
    }

    pub fn shape(&self) -> Vec<usize> {
        self.dataset.shape()
    }

    pub fn rank(&self) -> usize {
        self.dataset.ndim()
    }

    /// Samples per chunk along the growable dimension
    pub fn chunk_len(&self) -> Option<usize> {
        self.dataset.chunk().and_then(|chunk| chunk.last().copied())
    }

    /// Whether the dataset's element type is exactly `T`
    pub fn holds<T: H5Type>(&self) -> bool {
        self.dataset
            .dtype()
            .map(|dtype| dtype.is::<T>())
            .unwrap_or(false)
    }

    pub fn read<T: H5Type + Copy>(&self) -> Result<StoredArray<T>> {
        if !self.holds::<T>() {
            return Err(IngestError::CorruptStore {
                path: self.path.clone(),
                reason: "element type does not match the requested type".to_string(),
            });
        }

        let shape = self.shape();
        let (rank, channels, len) = match shape.as_slice() {
            [len] => (1, 1, *len),
            [channels, len] => (2, *channels, *len),
            other => {
                return Err(IngestError::CorruptStore {
                    path: self.path.clone(),
                    reason: format!("unsupported shape {:?}", other),
                })
            }
        };

        let data = self.dataset
            .read_raw::<T>()
            .map_err(|e| IngestError::store(&self.path, e))?;

        Ok(StoredArray { rank, channels, len, data })
    }
}
