use crossbeam_channel::{bounded, Receiver, RecvTimeoutError, Sender, TrySendError};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use crate::observability::RealtimeStats;
use crate::protocol::DeviceRole;

pub const DEFAULT_BLOCK_SIZE: usize = 1000;
pub const DEFAULT_QUEUE_CAPACITY: usize = 100;

/// Channel-major block of samples: `data[ch * len + slot]`
#[derive(Debug, Clone, PartialEq)]
pub struct SampleBlock {
    pub channels: usize,
    pub len: usize,
    pub data: Vec<f32>,
}

impl SampleBlock {
    pub fn empty(channels: usize) -> Self {
        Self {
            channels,
            len: 0,
            data: Vec::new(),
        }
    }

    pub fn channel(&self, ch: usize) -> &[f32] {
        &self.data[ch * self.len..(ch + 1) * self.len]
    }

    /// All channel values of one slot
    pub fn sample(&self, slot: usize) -> Vec<f32> {
        (0..self.channels).map(|ch| self.data[ch * self.len + slot]).collect()
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }
}

/// A full block handed off to the writer, tagged with the buffer's
/// cumulative sample count at the moment it filled
#[derive(Debug, Clone)]
pub struct Chunk {
    pub block: SampleBlock,
    pub total_samples: u64,
}

struct WriteState {
    /// `[channel, slot]` storage, channel-major
    data: Vec<f32>,
    write_idx: usize,
    total_samples: u64,
}

/// Fixed-capacity real-time write target.
///
/// Producers call [`StreamBuffer::write`] once per sample. Each time the
/// block fills it is copied onto a bounded queue; when the queue is full the
/// block is dropped rather than blocking the producer. Dropped samples are
/// charged to the stream's loss in [`RealtimeStats`] when a sink is attached.
pub struct StreamBuffer {
    channels: usize,
    capacity: usize,
    state: Mutex<WriteState>,
    queue_tx: Sender<Chunk>,
    queue_rx: Receiver<Chunk>,
    dropped_blocks: AtomicU64,
    overflow: Option<(Arc<RealtimeStats>, DeviceRole)>,
}

impl StreamBuffer {
    pub fn new(channels: usize, capacity: usize) -> Self {
        Self::with_queue_capacity(channels, capacity, DEFAULT_QUEUE_CAPACITY)
    }

    pub fn with_queue_capacity(channels: usize, capacity: usize, queue_capacity: usize) -> Self {
        let capacity = capacity.max(1);
        let (queue_tx, queue_rx) = bounded(queue_capacity);
        Self {
            channels,
            capacity,
            state: Mutex::new(WriteState {
                data: vec![0.0; channels * capacity],
                write_idx: 0,
                total_samples: 0,
            }),
            queue_tx,
            queue_rx,
            dropped_blocks: AtomicU64::new(0),
            overflow: None,
        }
    }

    /// Report dropped blocks as lost samples of `role`
    pub fn with_overflow_stats(mut self, stats: Arc<RealtimeStats>, role: DeviceRole) -> Self {
        self.overflow = Some((stats, role));
        self
    }

    pub fn channels(&self) -> usize {
        self.channels
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Append one sample.
    ///
    /// A sample with exactly `channels` values fills the slot; anything
    /// shorter only fills its leading channels and leaves the rest at zero.
    pub fn write(&self, sample: &[f32]) {
        let mut state = self.state
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());

        let slot = state.write_idx;
        for ch in 0..self.channels {
            state.data[ch * self.capacity + slot] = sample.get(ch).copied().unwrap_or(0.0);
        }

        state.write_idx += 1;
        state.total_samples += 1;

        if state.write_idx >= self.capacity {
            let chunk = Chunk {
                block: SampleBlock {
                    channels: self.channels,
                    len: self.capacity,
                    data: state.data.clone(),
                },
                total_samples: state.total_samples,
            };

            state.write_idx = 0;
            if let Err(TrySendError::Full(_)) = self.queue_tx.try_send(chunk) {
                drop(state);
                self.on_overflow();
            }
        }
    }

    fn on_overflow(&self) {
        let dropped = self.dropped_blocks.fetch_add(1, Ordering::Relaxed) + 1;
        log::warn!("Stream buffer queue full, dropped block ({} dropped so far)", dropped);
        if let Some((stats, role)) = &self.overflow {
            stats.record_dropped(*role, self.capacity as u64);
        }
    }

    /// Dequeue the next full block, waiting up to `timeout`
    pub fn read_chunk(&self, timeout: Duration) -> Option<Chunk> {
        match self.queue_rx.recv_timeout(timeout) {
            Ok(chunk) => Some(chunk),
            Err(RecvTimeoutError::Timeout) | Err(RecvTimeoutError::Disconnected) => None,
        }
    }

    /// Dequeue a full block only if one is already waiting
    pub fn try_read_chunk(&self) -> Option<Chunk> {
        self.queue_rx.try_recv().ok()
    }

    /// Copy of the last `last_n` buffered-but-unflushed samples (all of them
    /// when `None`), without touching write state
    pub fn get_current_data(&self, last_n: Option<usize>) -> SampleBlock {
        let state = self.state
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());

        let end = state.write_idx;
        let start = match last_n {
            Some(n) if n < end => end - n,
            _ => 0,
        };
        self.copy_range(&state, start, end)
    }

    /// Take the partial tail that never filled a block and reset the index
    pub fn drain_remainder(&self) -> Option<SampleBlock> {
        let mut state = self.state
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());

        if state.write_idx == 0 {
            return None;
        }
        let block = self.copy_range(&state, 0, state.write_idx);
        state.write_idx = 0;
        Some(block)
    }

    fn copy_range(&self, state: &WriteState, start: usize, end: usize) -> SampleBlock {
        let len = end - start;
        let mut data = Vec::with_capacity(self.channels * len);
        for ch in 0..self.channels {
            let row = ch * self.capacity;
            data.extend_from_slice(&state.data[row + start..row + end]);
        }
        SampleBlock {
            channels: self.channels,
            len,
            data,
        }
    }

    /// Position of the next write inside the live block
    pub fn write_idx(&self) -> usize {
        self.state
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .write_idx
    }

    /// Every sample ever written, including those in dropped blocks
    pub fn total_samples(&self) -> u64 {
        self.state
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .total_samples
    }

    /// Full blocks waiting for the writer
    pub fn queue_len(&self) -> usize {
        self.queue_rx.len()
    }

    pub fn dropped_blocks(&self) -> u64 {
        self.dropped_blocks.load(Ordering::Relaxed)
    }
}
