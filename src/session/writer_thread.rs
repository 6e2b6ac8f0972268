use crossbeam_channel::{bounded, Receiver, RecvTimeoutError};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use super::manager::SessionInner;
use crate::buffers::StreamBuffer;
use crate::error::IngestError;
use crate::storage::StreamWriter;

/// Everything the drain loop touches, moved into the thread at spawn
pub(crate) struct DrainContext {
    pub signal: Arc<StreamBuffer>,
    pub marker: Arc<StreamBuffer>,
    pub writer: Arc<StreamWriter>,
    pub running: Arc<AtomicBool>,
    pub drain_lock: Arc<Mutex<()>>,
    pub inner: Arc<Mutex<SessionInner>>,
    pub signal_poll: Duration,
    pub marker_poll: Duration,
}

/// Handle to the background writer.
///
/// `std` offers no join with a timeout, so the thread reports completion on
/// a channel and `join_timeout` waits on that instead.
pub(crate) struct WriterThread {
    handle: JoinHandle<()>,
    done_rx: Receiver<()>,
}

impl WriterThread {
    pub fn spawn(ctx: DrainContext) -> std::io::Result<Self> {
        let (done_tx, done_rx) = bounded(1);
        let handle = thread::Builder::new()
            .name("eegtap-writer".to_string())
            .spawn(move || {
                drain_loop(&ctx);
                let _ = done_tx.send(());
            })?;

        Ok(Self { handle, done_rx })
    }

    /// Wait up to `timeout` for the loop to exit. Returns false if it is
    /// still running, in which case the thread is left detached.
    pub fn join_timeout(self, timeout: Duration) -> bool {
        match self.done_rx.recv_timeout(timeout) {
            Ok(()) | Err(RecvTimeoutError::Disconnected) => {
                if self.handle.join().is_err() {
                    log::error!("Writer thread panicked");
                }
                true
            }
            Err(RecvTimeoutError::Timeout) => {
                log::warn!("Writer thread did not stop within {:?}, detaching", timeout);
                false
            }
        }
    }
}

/// Round-robin drain of both buffers until the running flag clears.
///
/// The signal queue gets the longer poll; the marker queue is checked every
/// iteration regardless, so neither stream starves. Each dequeue-and-write
/// happens under the drain lock with the running flag re-checked, so once
/// the final flush holds the lock this loop never writes again.
fn drain_loop(ctx: &DrainContext) {
    log::debug!("Writer thread started");

    while ctx.running.load(Ordering::Acquire) {
        if !drain_once(ctx) {
            break;
        }
    }

    log::debug!("Writer thread exiting");
}

/// One pass over both buffers; false once the loop should stop
fn drain_once(ctx: &DrainContext) -> bool {
    {
        let _drain = ctx.drain_lock
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        if !ctx.running.load(Ordering::Acquire) {
            return false;
        }
        if let Some(chunk) = ctx.signal.read_chunk(ctx.signal_poll) {
            if let Err(e) = ctx.writer.write_eeg_chunk(&chunk.block) {
                fail(ctx, e);
                return false;
            }
            let mut inner = ctx.inner
                .lock()
                .unwrap_or_else(|poisoned| poisoned.into_inner());
            inner.total_samples = chunk.total_samples;
        }
    }

    let _drain = ctx.drain_lock
        .lock()
        .unwrap_or_else(|poisoned| poisoned.into_inner());
    if !ctx.running.load(Ordering::Acquire) {
        return false;
    }
    if let Some(chunk) = ctx.marker.read_chunk(ctx.marker_poll) {
        if let Err(e) = ctx.writer.write_trigger_chunk(&chunk.block) {
            fail(ctx, e);
            return false;
        }
    }
    true
}

fn fail(ctx: &DrainContext, error: IngestError) {
    log::error!("Stream writer failed, persistence stopped for this session: {}", error);
    ctx.running.store(false, Ordering::Release);
    let mut inner = ctx.inner
        .lock()
        .unwrap_or_else(|poisoned| poisoned.into_inner());
    inner.writer_error = Some(error.to_string());
}
