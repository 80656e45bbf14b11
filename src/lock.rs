/// Serializes grouping attempts so the query-then-create step in the
/// engine can never run twice at once for the same definition.
use tokio::sync::{Mutex, MutexGuard};

/// FIFO async lock: waiters are served in the order they arrived.
#[derive(Debug, Default)]
pub struct GroupingLock {
    inner: Mutex<()>,
}

/// Held for one full grouping run; released on drop, on every exit path.
#[derive(Debug)]
pub struct GroupingGuard<'a> {
    _guard: MutexGuard<'a, ()>,
}

impl GroupingLock {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn acquire(&self) -> GroupingGuard<'_> {
        GroupingGuard {
            _guard: self.inner.lock().await,
        }
    }

    pub fn is_held(&self) -> bool {
        self.inner.try_lock().is_err()
    }
}
