//! Background log flusher
//!
//! For `SyncStrategy::EverySecond` a record is synced by the next append
//! that finds the window elapsed, or by this worker if no append comes,
//! which keeps the loss window bounded on an idle engine.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use crossbeam::channel::{self, Sender};
use crossbeam::select;
use parking_lot::Mutex;

use crate::wal::AppendLog;

fn sync_pending(log: &Mutex<AppendLog>, degraded: &AtomicBool) {
    if degraded.load(Ordering::Acquire) {
        return;
    }
    let mut log = log.lock();
    if log.unsynced_count() == 0 {
        return;
    }
    if let Err(e) = log.sync() {
        tracing::error!("Background log sync failed, refusing writes: {}", e);
        degraded.store(true, Ordering::Release);
    }
}

/// Handle to the flusher thread; stops it on drop
pub(crate) struct Flusher {
    shutdown: Option<Sender<()>>,
    handle: Option<JoinHandle<()>>,
}

impl Flusher {
    /// Spawn a worker that syncs `log` every `period` when records are pending
    pub(crate) fn start(
        log: Arc<Mutex<AppendLog>>,
        degraded: Arc<AtomicBool>,
        period: Duration,
    ) -> std::io::Result<Self> {
        let (shutdown_tx, shutdown_rx) = channel::bounded::<()>(1);
        let ticker = channel::tick(period);

        let handle = thread::Builder::new()
            .name("quillkv-flusher".to_string())
            .spawn(move || loop {
                select! {
                    recv(ticker) -> _ => sync_pending(&log, &degraded),
                    recv(shutdown_rx) -> _ => {
                        tracing::debug!("Log flusher stopping");
                        return;
                    }
                }
            })?;

        tracing::debug!("Log flusher started ({:?} period)", period);

        Ok(Self {
            shutdown: Some(shutdown_tx),
            handle: Some(handle),
        })
    }

    /// Stop the worker and wait for it to exit
    pub(crate) fn stop(&mut self) {
        if let Some(shutdown) = self.shutdown.take() {
            let _ = shutdown.send(());
        }
        if let Some(handle) = self.handle.take() {
            if handle.join().is_err() {
                tracing::warn!("Log flusher thread panicked");
            }
        }
    }
}

impl Drop for Flusher {
    fn drop(&mut self) {
        self.stop();
    }
}
