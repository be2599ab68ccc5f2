//! Registry of running CGI children.

use std::collections::HashMap;
use std::process::Child;
use std::sync::atomic::{AtomicU64, Ordering};

use parking_lot::Mutex;

/// Running children, keyed by an invocation id.
///
/// A child is registered right after spawn and released by its invocation
/// before it is reaped. [`kill_all`](ChildTracker::kill_all) is the forced
/// shutdown path.
#[derive(Debug, Default)]
pub struct ChildTracker {
    children: Mutex<HashMap<u64, Child>>,
    next_id: AtomicU64,
}

impl ChildTracker {
    /// Create an empty tracker.
    pub fn new() -> Self {
        Self::default()
    }

    /// Start tracking a child. Returns its id.
    pub fn register(&self, child: Child) -> u64 {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        self.children.lock().insert(id, child);
        id
    }

    /// Stop tracking a child and hand it back for reaping.
    pub fn release(&self, id: u64) -> Option<Child> {
        self.children.lock().remove(&id)
    }

    /// Kill one tracked child. It stays tracked until released.
    pub fn kill(&self, id: u64) -> bool {
        match self.children.lock().get_mut(&id) {
            Some(child) => child.kill().is_ok(),
            None => false,
        }
    }

    /// Kill every tracked child. Returns how many were signalled.
    pub fn kill_all(&self) -> usize {
        let mut children = self.children.lock();
        let mut killed = 0;
        for (id, child) in children.iter_mut() {
            match child.kill() {
                Ok(()) => killed += 1,
                Err(e) => tracing::debug!(id, error = %e, "Failed to kill CGI child"),
            }
        }
        killed
    }

    /// Number of running children.
    pub fn len(&self) -> usize {
        self.children.lock().len()
    }

    /// Whether no child is running.
    pub fn is_empty(&self) -> bool {
        self.children.lock().is_empty()
    }
}
