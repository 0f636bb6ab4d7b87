//! Token-bucket admission control.
//!
//! The bucket is a bounded channel of unit tokens: channel semantics give
//! mutual exclusion without a lock, and a full channel discards refills to
//! preserve the capacity invariant. A background refiller adds one token
//! every `1s / rate`; the bucket starts full so a cold fabric allows an
//! immediate burst.

use crate::error::DispatchError;
use crate::scope::Scope;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::sync::Mutex;
use tracing::debug;

/// Token-bucket rate limiter.
///
/// One `acquire` consumes exactly one token. Tokens never exceed the
/// configured burst capacity.
#[derive(Debug)]
pub struct RateLimiter {
    tokens: Mutex<mpsc::Receiver<()>>,
    shutdown: Scope,
    rate: f64,
    capacity: usize,
}

impl RateLimiter {
    /// Create a limiter admitting `rate_per_second` operations with a
    /// `capacity`-sized initial burst.
    ///
    /// Non-positive rates are coerced to 1.0. The refiller task is bound to
    /// `scope`, so cancelling the scope releases it without an explicit
    /// [`RateLimiter::stop`].
    pub fn new(rate_per_second: f64, capacity: usize, scope: &Scope) -> Self {
        let rate = if rate_per_second > 0.0 {
            rate_per_second
        } else {
            1.0
        };
        let capacity = capacity.max(1);
        let (tx, rx) = mpsc::channel(capacity);

        // Pre-fill until full: a cold bucket allows a capacity-sized burst.
        while tx.try_send(()).is_ok() {}

        let shutdown = scope.child();
        let refiller_scope = shutdown.clone();
        let refill_every = Duration::from_secs_f64(1.0 / rate);
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(refill_every);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            // The first tick completes immediately; consume it so refills
            // start one interval after construction.
            ticker.tick().await;
            loop {
                tokio::select! {
                    biased;
                    _ = refiller_scope.cancelled() => break,
                    _ = ticker.tick() => {
                        // Full bucket: discard the token, capacity holds.
                        let _ = tx.try_send(());
                    }
                }
            }
            debug!("rate limiter refiller stopped");
        });

        Self {
            tokens: Mutex::new(rx),
            shutdown,
            rate,
            capacity,
        }
    }

    pub fn rate(&self) -> f64 {
        self.rate
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Wait for a token, racing scope cancellation.
    ///
    /// When a token and a cancellation are both ready, cancellation wins.
    pub async fn acquire(&self, scope: &Scope) -> Result<(), DispatchError> {
        let mut tokens = tokio::select! {
            biased;
            _ = scope.cancelled() => return Err(DispatchError::Cancelled),
            _ = self.shutdown.cancelled() => return Err(DispatchError::Cancelled),
            guard = self.tokens.lock() => guard,
        };

        tokio::select! {
            biased;
            _ = scope.cancelled() => Err(DispatchError::Cancelled),
            _ = self.shutdown.cancelled() => Err(DispatchError::Cancelled),
            token = tokens.recv() => match token {
                Some(()) => Ok(()),
                // Refiller gone: the limiter was stopped.
                None => Err(DispatchError::Cancelled),
            },
        }
    }

    /// Take a token without waiting. Returns false when none are available
    /// (or another task currently holds the bucket).
    pub fn try_acquire(&self) -> bool {
        match self.tokens.try_lock() {
            Ok(mut tokens) => tokens.try_recv().is_ok(),
            Err(_) => false,
        }
    }

    /// Release the refiller. Subsequent `acquire` calls return `Cancelled`.
    pub fn stop(&self) {
        self.shutdown.cancel();
    }
}
