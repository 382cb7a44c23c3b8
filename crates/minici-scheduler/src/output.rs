//! Coalescing writer for build output.
//!
//! Chunks are buffered in memory and appended to the store by a periodic
//! flush task, at most once per interval however many chunks arrive.
//! Callers flush synchronously at step boundaries and on finish.

use minici_core::BuildId;
use minici_db::{BuildStore, DbResult, with_retry};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};
use std::time::Duration;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, warn};

struct Inner {
    build_id: BuildId,
    store: Arc<dyn BuildStore>,
    pending: Mutex<String>,
    /// Sequence number of the last pushed chunk.
    written: AtomicU64,
    /// Sequence number of the last chunk known to be persisted.
    persisted: AtomicU64,
    /// Serialises flushes so batches reach the store in push order.
    flush_lock: tokio::sync::Mutex<()>,
}

impl Inner {
    fn pending(&self) -> MutexGuard<'_, String> {
        self.pending.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn is_dirty(&self) -> bool {
        self.written.load(Ordering::SeqCst) > self.persisted.load(Ordering::SeqCst)
    }

    async fn flush(&self) -> DbResult<()> {
        let _guard = self.flush_lock.lock().await;

        let (batch, sequence) = {
            let mut pending = self.pending();
            (std::mem::take(&mut *pending), self.written.load(Ordering::SeqCst))
        };
        if batch.is_empty() {
            return Ok(());
        }

        match self.store.append_output(self.build_id, &batch).await {
            Ok(()) => {
                self.persisted.fetch_max(sequence, Ordering::SeqCst);
                debug!(build_id = %self.build_id, bytes = batch.len(), "Flushed output");
                Ok(())
            }
            Err(e) => {
                // Put the batch back ahead of anything pushed meanwhile.
                self.pending().insert_str(0, &batch);
                Err(e)
            }
        }
    }
}

struct Flusher {
    stop: oneshot::Sender<()>,
    handle: JoinHandle<()>,
}

/// Buffers output for one build and persists it in coalesced batches.
pub struct OutputWriter {
    inner: Arc<Inner>,
    flusher: Mutex<Option<Flusher>>,
}

impl OutputWriter {
    /// Start a writer whose background flush runs every `interval`.
    pub fn start(build_id: BuildId, store: Arc<dyn BuildStore>, interval: Duration) -> Self {
        let inner = Arc::new(Inner {
            build_id,
            store,
            pending: Mutex::new(String::new()),
            written: AtomicU64::new(0),
            persisted: AtomicU64::new(0),
            flush_lock: tokio::sync::Mutex::new(()),
        });

        let (stop, stop_rx) = oneshot::channel();
        let handle = tokio::spawn(run_flusher(Arc::downgrade(&inner), interval, stop_rx));

        Self {
            inner,
            flusher: Mutex::new(Some(Flusher { stop, handle })),
        }
    }

    pub fn build_id(&self) -> BuildId {
        self.inner.build_id
    }

    /// Buffer a chunk. Never touches the store.
    pub fn push(&self, chunk: &str) {
        if chunk.is_empty() {
            return;
        }
        let mut pending = self.inner.pending();
        pending.push_str(chunk);
        self.inner.written.fetch_add(1, Ordering::SeqCst);
    }

    /// Whether some pushed output has not been persisted yet.
    pub fn is_dirty(&self) -> bool {
        self.inner.is_dirty()
    }

    /// Persist everything pushed so far.
    pub async fn flush(&self) -> DbResult<()> {
        self.inner.flush().await
    }

    /// Stop the background flush and persist what is left, retrying
    /// transient failures.
    pub async fn finish(&self) -> DbResult<()> {
        let flusher = self
            .flusher
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if let Some(Flusher { stop, handle }) = flusher {
            let _ = stop.send(());
            if let Err(e) = handle.await {
                warn!(build_id = %self.inner.build_id, error = %e, "Output flusher ended abnormally");
            }
        }
        with_retry("output flush", || self.inner.flush()).await
    }
}

impl Drop for OutputWriter {
    fn drop(&mut self) {
        let flusher = self
            .flusher
            .get_mut()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if let Some(Flusher { stop, .. }) = flusher {
            let _ = stop.send(());
        }
    }
}

async fn run_flusher(inner: Weak<Inner>, interval: Duration, mut stop: oneshot::Receiver<()>) {
    let mut ticker = tokio::time::interval(interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    ticker.tick().await;

    loop {
        tokio::select! {
            _ = &mut stop => break,
            _ = ticker.tick() => {
                let Some(inner) = inner.upgrade() else { break };
                if inner.is_dirty() {
                    if let Err(e) = inner.flush().await {
                        warn!(build_id = %inner.build_id, error = %e, "Periodic output flush failed");
                    }
                }
            }
        }
    }
}
