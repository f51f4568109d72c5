//! Trigger coalescing for analysis requests
//!
//! Every trigger bumps a generation counter and waits out the quiet period.
//! Only the trigger whose generation is still current afterwards proceeds, so
//! a burst of threshold changes produces one backend call.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

#[derive(Debug, Clone)]
pub struct Debouncer {
    delay: Duration,
    generation: Arc<AtomicU64>,
}

impl Debouncer {
    pub fn new(delay: Duration) -> Self {
        Self {
            delay,
            generation: Arc::new(AtomicU64::new(0)),
        }
    }

    pub fn delay(&self) -> Duration {
        self.delay
    }

    /// Register a trigger and wait for quiescence.
    ///
    /// Returns `true` when no newer trigger arrived during the wait.
    pub async fn settle(&self) -> bool {
        let mine = self.generation.fetch_add(1, Ordering::SeqCst) + 1;
        tokio::time::sleep(self.delay).await;
        self.generation.load(Ordering::SeqCst) == mine
    }

    /// Drop any pending trigger
    pub fn cancel(&self) {
        self.generation.fetch_add(1, Ordering::SeqCst);
    }
}
