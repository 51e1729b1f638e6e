//! A reader-writer lock with writer priority.
//!
//! `tokio::sync::RwLock` already grants lock requests in the order they
//! queue, which keeps a writer from starving once it's waiting — but it
//! does nothing to stop a steady stream of *new* readers from every one
//! jumping the queue before that writer ever gets in line. A long query
//! stream can otherwise make ingestion wait indefinitely. `WriterPriorityLock`
//! adds a pending-writer counter: once a writer has announced intent to
//! acquire the lock, newly arriving readers queue behind it rather than
//! stacking up ahead of it.

use std::sync::atomic::{AtomicUsize, Ordering};

use tokio::sync::{Notify, RwLock, RwLockReadGuard, RwLockWriteGuard};

/// Reader-writer lock where a writer waiting to acquire blocks new reader
/// acquisitions that arrive after it, preventing reader-stream starvation
/// of the writer.
pub struct WriterPriorityLock<T> {
    inner: RwLock<T>,
    pending_writers: AtomicUsize,
    no_pending_writers: Notify,
}

impl<T> WriterPriorityLock<T> {
    pub fn new(value: T) -> Self {
        Self {
            inner: RwLock::new(value),
            pending_writers: AtomicUsize::new(0),
            no_pending_writers: Notify::new(),
        }
    }

    /// Acquire a shared read guard. Blocks while a writer is pending, even
    /// if the underlying lock is momentarily available for reading.
    pub async fn read(&self) -> RwLockReadGuard<'_, T> {
        loop {
            // Register interest before checking the counter so a writer
            // that clears it between the check and the wait can't be
            // missed (`Notify::notified()` buffers a wakeup that predates
            // the `.await`).
            let notified = self.no_pending_writers.notified();
            if self.pending_writers.load(Ordering::Acquire) == 0 {
                return self.inner.read().await;
            }
            notified.await;
        }
    }

    /// Acquire the exclusive write guard, announcing intent immediately
    /// so readers that arrive while this call is waiting queue behind it.
    pub async fn write(&self) -> RwLockWriteGuard<'_, T> {
        self.pending_writers.fetch_add(1, Ordering::AcqRel);
        let guard = self.inner.write().await;
        if self.pending_writers.fetch_sub(1, Ordering::AcqRel) == 1 {
            self.no_pending_writers.notify_waiters();
        }
        guard
    }

    pub fn pending_writers(&self) -> usize {
        self.pending_writers.load(Ordering::Acquire)
    }
}
