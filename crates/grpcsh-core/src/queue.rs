//! Work-queue signal discipline between the front end and a call's worker.
//!
//! The front end appends messages to a call's pending buffer and then
//! [`signal`](WorkQueue::signal)s the queue; a streaming worker
//! [`acquire`](WorkQueue::acquire)s one token per drain and acknowledges it
//! with [`task_done`](WorkQueue::task_done) once the batch is on the wire.
//! One signal means "at least one unit of work is available" - a single
//! drain moves everything buffered since the last one, however many signals
//! arrived in between for the same buffer.
//!
//! [`join`](WorkQueue::join) blocks until every signalled unit has been
//! acknowledged, which is what a bounded `wait` on a call amounts to. It
//! deliberately says nothing about success or failure.

use std::sync::atomic::{AtomicUsize, Ordering};
use tokio::sync::Notify;

/// Counting signal queue with unfinished-task accounting.
#[derive(Debug, Default)]
pub struct WorkQueue {
    /// Signals produced but not yet picked up by the worker.
    queued: AtomicUsize,
    /// Signals picked up or pending whose work has not been acknowledged.
    unfinished: AtomicUsize,
    work: Notify,
    done: Notify,
}

impl WorkQueue {
    pub fn new() -> Self {
        Self::default()
    }

    /// Announces one unit of available work and wakes the worker.
    pub fn signal(&self) {
        self.queued.fetch_add(1, Ordering::SeqCst);
        self.unfinished.fetch_add(1, Ordering::SeqCst);
        self.work.notify_one();
    }

    /// Consumes one signal without blocking. Returns `false` when none are
    /// pending.
    pub fn try_acquire(&self) -> bool {
        self.queued
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok()
    }

    /// Suspends until a signal is available, then consumes it.
    pub async fn acquire(&self) {
        loop {
            // Arm the notification before checking so a signal racing with
            // the check cannot be lost.
            let notified = self.work.notified();
            if self.try_acquire() {
                return;
            }
            notified.await;
        }
    }

    /// Acknowledges one previously acquired unit of work.
    pub fn task_done(&self) {
        // A reset may already have dropped the count to zero.
        let _ = self
            .unfinished
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1));
        if self.unfinished.load(Ordering::SeqCst) == 0 {
            self.done.notify_waiters();
        }
    }

    /// Suspends until every signalled unit has been acknowledged.
    pub async fn join(&self) {
        loop {
            let notified = self.done.notified();
            if self.unfinished.load(Ordering::SeqCst) == 0 {
                return;
            }
            notified.await;
        }
    }

    /// Number of signalled units not yet acknowledged.
    pub fn unfinished(&self) -> usize {
        self.unfinished.load(Ordering::SeqCst)
    }

    /// Drops all outstanding signals and releases any joiners. Called when a
    /// worker terminates and nothing will ever drain the queue again.
    pub fn reset(&self) {
        self.queued.store(0, Ordering::SeqCst);
        self.unfinished.store(0, Ordering::SeqCst);
        self.done.notify_waiters();
    }
}
