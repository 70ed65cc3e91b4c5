//! Observer registries for connection-state and message fan-out
//!
//! Callbacks are not comparable in Rust, so registration hands back an
//! opaque [`ListenerId`] used for removal. Notification snapshots the
//! membership first: every observer registered at that moment is invoked
//! exactly once, and late removals take effect from the next event on.

use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use parking_lot::RwLock;
use tracing::warn;

/// Token identifying one registered observer
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ListenerId(u64);

type Callback<T> = Arc<dyn Fn(&T) + Send + Sync + 'static>;

/// A set of observer callbacks for one event type
pub struct ListenerSet<T> {
    entries: RwLock<Vec<(ListenerId, Callback<T>)>>,
    next_id: AtomicU64,
}

impl<T> Default for ListenerSet<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> ListenerSet<T> {
    pub fn new() -> Self {
        Self {
            entries: RwLock::new(Vec::new()),
            next_id: AtomicU64::new(1),
        }
    }

    /// Register an observer, returning its removal token
    pub fn add(&self, callback: impl Fn(&T) + Send + Sync + 'static) -> ListenerId {
        let id = ListenerId(self.next_id.fetch_add(1, Ordering::Relaxed));
        self.entries.write().push((id, Arc::new(callback)));
        id
    }

    /// Remove an observer; returns whether it was registered
    pub fn remove(&self, id: ListenerId) -> bool {
        let mut entries = self.entries.write();
        let before = entries.len();
        entries.retain(|(entry_id, _)| *entry_id != id);
        entries.len() != before
    }

    /// Number of registered observers
    pub fn len(&self) -> usize {
        self.entries.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.read().is_empty()
    }

    /// Invoke every currently registered observer with `event`.
    ///
    /// Each invocation is isolated: a panicking observer is logged and the
    /// remaining observers still run.
    pub fn notify(&self, event: &T) {
        let snapshot: Vec<Callback<T>> = self
            .entries
            .read()
            .iter()
            .map(|(_, callback)| callback.clone())
            .collect();

        for callback in snapshot {
            if catch_unwind(AssertUnwindSafe(|| callback(event))).is_err() {
                warn!("observer panicked during notification; continuing with remaining observers");
            }
        }
    }
}

// ─────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────
