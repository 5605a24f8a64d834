//! Subscription handles.
//!
//! Every callback registered with a cell or channel is guarded by a
//! [`Subscription`]. Dropping the handle detaches the callback, so the
//! lifetime of an observer is the lifetime of the value that owns its
//! handle. The coordinator relies on this to release all rule wiring when it
//! is dropped.

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};

/// Key of one callback in a cell's or notification center's observer table.
///
/// Ids are never reused, so a stale [`Subscription`] cannot detach a callback
/// registered after it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SubscriberId(u64);

impl SubscriberId {
    /// Allocate the next callback id from a process-wide counter.
    pub fn new() -> Self {
        static COUNTER: AtomicU64 = AtomicU64::new(0);
        Self(COUNTER.fetch_add(1, Ordering::Relaxed))
    }
}

impl Default for SubscriberId {
    fn default() -> Self {
        Self::new()
    }
}

/// RAII guard for a registered callback.
///
/// The guard runs its cancel function exactly once: on [`Subscription::cancel`]
/// or on drop, whichever comes first.
#[must_use = "dropping a Subscription immediately detaches its callback"]
pub struct Subscription {
    cancel: Option<Box<dyn FnOnce() + Send + Sync>>,
}

impl Subscription {
    /// Wrap a cancel function.
    pub fn new<F>(cancel: F) -> Self
    where
        F: FnOnce() + Send + Sync + 'static,
    {
        Self {
            cancel: Some(Box::new(cancel)),
        }
    }

    /// A subscription that guards nothing.
    pub fn empty() -> Self {
        Self { cancel: None }
    }

    /// Detach now instead of waiting for drop.
    pub fn cancel(mut self) {
        self.run_cancel();
    }

    /// Whether the cancel function is still pending.
    pub fn is_active(&self) -> bool {
        self.cancel.is_some()
    }

    fn run_cancel(&mut self) {
        if let Some(cancel) = self.cancel.take() {
            cancel();
        }
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        self.run_cancel();
    }
}

impl fmt::Debug for Subscription {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Subscription")
            .field("active", &self.is_active())
            .finish()
    }
}
