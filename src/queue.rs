//! Concurrency-bounded execution queue for connections.
//!
//! A [`Queue`] is a semaphore-gated slot pool: each running connection holds
//! one permit for the duration of its transport operation. The queue object
//! is externally owned and shared; contexts and driver tasks hold `Arc`
//! clones, so the queue stays alive until the last connection using it has
//! reached a terminal state.

use std::sync::Arc;
use tokio::sync::{OwnedSemaphorePermit, Semaphore};

/// A named, concurrency-bounded queue that connections are scheduled on.
///
/// The queue does not run the network I/O itself; it only bounds how many
/// driver tasks may be in their transport phase at once.
#[derive(Debug)]
pub struct Queue {
    name: String,
    max_concurrent: usize,
    slots: Arc<Semaphore>,
}

impl Queue {
    /// Create a queue allowing at most `max_concurrent` connections to run
    /// at once.
    ///
    /// A `max_concurrent` of zero is clamped to one; a zero-width queue
    /// would never schedule anything.
    pub fn new(max_concurrent: usize) -> Arc<Self> {
        Self::named("queue", max_concurrent)
    }

    /// Create a named queue; the name shows up in tracing output.
    pub fn named(name: &str, max_concurrent: usize) -> Arc<Self> {
        let max_concurrent = max_concurrent.max(1);
        Arc::new(Self {
            name: name.to_string(),
            max_concurrent,
            slots: Arc::new(Semaphore::new(max_concurrent)),
        })
    }

    /// The queue's name
    pub fn name(&self) -> &str {
        &self.name
    }

    /// The concurrency bound this queue was created with
    pub fn max_concurrent(&self) -> usize {
        self.max_concurrent
    }

    /// Number of slots currently free
    pub fn available_slots(&self) -> usize {
        self.slots.available_permits()
    }

    /// Wait for a free slot.
    ///
    /// Returns `None` only if the semaphore was closed, which this crate
    /// never does; callers treat that as cancellation.
    pub(crate) async fn acquire(&self) -> Option<OwnedSemaphorePermit> {
        self.slots.clone().acquire_owned().await.ok()
    }
}
