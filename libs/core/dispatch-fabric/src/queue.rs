//! Bounded FIFO job queue between producers and the worker pool.
//!
//! Producers get backpressure (`QueueFull` from the non-blocking path, an
//! awaited send from the blocking path); consumers share one receiver and
//! observe end-of-stream once the queue is closed and drained.

use crate::error::DispatchError;
use crate::job::Job;
use crate::scope::Scope;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::RwLock;
use tokio::sync::mpsc;
use tokio::sync::Mutex;

/// Bounded MPMC job channel.
///
/// Closing drops the producer side, so workers drain whatever is buffered
/// and then see `None`; a worker blocked on an empty queue wakes immediately.
#[derive(Debug)]
pub struct JobQueue {
    tx: RwLock<Option<mpsc::Sender<Job>>>,
    rx: Mutex<mpsc::Receiver<Job>>,
    depth: AtomicUsize,
    capacity: usize,
}

impl JobQueue {
    /// Create a queue buffering at most `capacity` jobs.
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        let (tx, rx) = mpsc::channel(capacity);
        Self {
            tx: RwLock::new(Some(tx)),
            rx: Mutex::new(rx),
            depth: AtomicUsize::new(0),
            capacity,
        }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Jobs currently buffered.
    pub fn len(&self) -> usize {
        self.depth.load(Ordering::SeqCst)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn is_closed(&self) -> bool {
        self.tx.read().unwrap().is_none()
    }

    /// Non-blocking submit.
    ///
    /// Returns `QueueFull` when the buffer is at capacity and `QueueClosed`
    /// after `close`; the caller decides whether to back off or give up.
    pub fn submit(&self, job: Job) -> Result<(), DispatchError> {
        let guard = self.tx.read().unwrap();
        let tx = guard.as_ref().ok_or(DispatchError::QueueClosed)?;

        match tx.try_send(job) {
            Ok(()) => {
                self.depth.fetch_add(1, Ordering::SeqCst);
                crate::metrics::set_queue_depth(self.len());
                Ok(())
            }
            Err(mpsc::error::TrySendError::Full(_)) => {
                crate::metrics::record_queue_rejection();
                Err(DispatchError::QueueFull)
            }
            Err(mpsc::error::TrySendError::Closed(_)) => Err(DispatchError::QueueClosed),
        }
    }

    /// Blocking submit: waits for capacity, racing scope cancellation.
    pub async fn submit_blocking(&self, scope: &Scope, job: Job) -> Result<(), DispatchError> {
        // Clone the sender out so the lock is not held across the await.
        let tx = {
            let guard = self.tx.read().unwrap();
            guard.as_ref().cloned().ok_or(DispatchError::QueueClosed)?
        };

        tokio::select! {
            biased;
            _ = scope.cancelled() => Err(DispatchError::Cancelled),
            res = tx.send(job) => match res {
                Ok(()) => {
                    self.depth.fetch_add(1, Ordering::SeqCst);
                    crate::metrics::set_queue_depth(self.len());
                    Ok(())
                }
                Err(_) => Err(DispatchError::QueueClosed),
            },
        }
    }

    /// Dequeue the next job.
    ///
    /// `Ok(None)` means the queue was closed and fully drained; `Cancelled`
    /// means the scope fired while waiting.
    pub async fn receive(&self, scope: &Scope) -> Result<Option<Job>, DispatchError> {
        let mut rx = tokio::select! {
            biased;
            _ = scope.cancelled() => return Err(DispatchError::Cancelled),
            guard = self.rx.lock() => guard,
        };

        tokio::select! {
            biased;
            _ = scope.cancelled() => Err(DispatchError::Cancelled),
            job = rx.recv() => {
                if job.is_some() {
                    self.depth.fetch_sub(1, Ordering::SeqCst);
                    crate::metrics::set_queue_depth(self.len());
                }
                Ok(job)
            }
        }
    }

    /// Pop everything still buffered, without waiting.
    ///
    /// Used on the cancellation path so queued jobs can be finalized with a
    /// terminal message instead of silently disappearing.
    pub async fn drain(&self) -> Vec<Job> {
        let mut rx = self.rx.lock().await;
        let mut drained = Vec::new();
        while let Ok(job) = rx.try_recv() {
            self.depth.fetch_sub(1, Ordering::SeqCst);
            drained.push(job);
        }
        crate::metrics::set_queue_depth(self.len());
        drained
    }

    /// Signal that no more submissions will arrive. Idempotent.
    ///
    /// Consumers drain the remaining buffer and then observe end-of-stream.
    pub fn close(&self) {
        self.tx.write().unwrap().take();
    }
}
