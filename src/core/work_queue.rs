//! Serial work queue.
//!
//! Serializes every mutation of one correlation manager without dedicating a
//! thread to it. Whichever thread finds the queue idle becomes the drainer and
//! runs items in FIFO order; any other producer just appends and returns.

use std::collections::VecDeque;
use std::panic::{catch_unwind, AssertUnwindSafe};

use anyhow::Result;
use parking_lot::Mutex;
use tracing::{debug, error};

/// A unit of work run by the draining thread
pub type WorkItem = Box<dyn FnOnce() -> Result<()> + Send + 'static>;

#[derive(Default)]
struct QueueState {
    items: VecDeque<WorkItem>,
    running: bool,
    draining: bool,
}

/// FIFO queue in which at most one thread executes items at any time
#[derive(Default)]
pub struct SerialWorkQueue {
    state: Mutex<QueueState>,
}

impl SerialWorkQueue {
    /// Create an empty queue that has not been started
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a queue holding one item; nothing runs until [`start`](Self::start)
    pub fn with_initial<F>(work: F) -> Self
    where
        F: FnOnce() -> Result<()> + Send + 'static,
    {
        let queue = Self::new();
        queue.state.lock().items.push_back(Box::new(work));
        queue
    }

    /// Start draining on the calling thread. Calling it again is a no-op.
    pub fn start(&self) {
        let first = {
            let mut state = self.state.lock();
            if state.running {
                return;
            }
            state.running = true;
            state.take_first()
        };

        if let Some(item) = first {
            self.drain(item);
        }
    }

    /// Append `work`. If nobody is draining, the caller drains until empty.
    pub fn queue_and_run<F>(&self, work: F)
    where
        F: FnOnce() -> Result<()> + Send + 'static,
    {
        let first = {
            let mut state = self.state.lock();
            state.items.push_back(Box::new(work));

            // not started yet, or another thread owns the drain
            if !state.running || state.draining {
                return;
            }

            state.take_first()
        };

        if let Some(item) = first {
            self.drain(item);
        }
    }

    /// Number of items waiting, including the one being run
    pub fn len(&self) -> usize {
        let state = self.state.lock();
        state.items.len() + usize::from(state.draining)
    }

    /// True when nothing is queued or draining
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn drain(&self, first: WorkItem) {
        let mut next = Some(first);

        while let Some(item) = next {
            run_item(item);

            // re-check under the enqueue lock so a concurrent append is not missed
            let mut state = self.state.lock();
            next = state.items.pop_front();
            if next.is_none() {
                state.draining = false;
            }
        }

        debug!("work queue drained");
    }
}

impl QueueState {
    /// Claim the drain and take the head item, if any
    fn take_first(&mut self) -> Option<WorkItem> {
        let item = self.items.pop_front();
        self.draining = item.is_some();
        item
    }
}

fn run_item(item: WorkItem) {
    match catch_unwind(AssertUnwindSafe(item)) {
        Ok(Ok(())) => {}
        Ok(Err(e)) => error!(error = %e, "work item failed"),
        Err(panic) => {
            let msg = panic
                .downcast_ref::<&str>()
                .map(|s| s.to_string())
                .or_else(|| panic.downcast_ref::<String>().cloned())
                .unwrap_or_else(|| "unknown panic".to_string());
            error!(panic = %msg, "work item panicked");
        }
    }
}

impl std::fmt::Debug for SerialWorkQueue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = self.state.lock();
        f.debug_struct("SerialWorkQueue")
            .field("pending", &state.items.len())
            .field("running", &state.running)
            .field("draining", &state.draining)
            .finish()
    }
}
