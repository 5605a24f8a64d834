//! In-process notification hub.
//!
//! Observers register for a notification name and receive every
//! [`Notification`] posted under it. Registration returns a
//! [`NotificationToken`]; dropping the token removes the observer, so a
//! coordinator that keeps its tokens unsubscribes everything when it goes
//! away.

use std::fmt;
use std::sync::{Arc, OnceLock, Weak};

use dashmap::DashMap;
use indexmap::IndexMap;
use serde_json::Value;
use smallvec::SmallVec;
use tracing::trace;

use crate::state::{SubscriberId, Subscription};

/// A posted event.
#[derive(Debug, Clone, PartialEq)]
pub struct Notification {
    /// Name the notification was posted under.
    pub name: String,
    /// Optional structured payload.
    pub payload: Option<Value>,
}

type Observer = Arc<dyn Fn(&Notification) + Send + Sync>;

type ObserverTable = DashMap<String, IndexMap<SubscriberId, Observer>>;

/// Keeps an observer registered. Dropping it unregisters the observer.
#[must_use = "dropping a NotificationToken immediately removes its observer"]
pub struct NotificationToken {
    name: String,
    _subscription: Subscription,
}

impl NotificationToken {
    /// Name the observer listens to.
    pub fn name(&self) -> &str {
        &self.name
    }
}

impl fmt::Debug for NotificationToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("NotificationToken")
            .field("name", &self.name)
            .finish()
    }
}

/// Name-keyed event hub. Clones share the same observer table.
#[derive(Clone, Default)]
pub struct NotificationCenter {
    observers: Arc<ObserverTable>,
}

static GLOBAL: OnceLock<NotificationCenter> = OnceLock::new();

impl NotificationCenter {
    /// Create an empty center.
    pub fn new() -> Self {
        Self::default()
    }

    /// The process-wide default center.
    pub fn global() -> &'static NotificationCenter {
        GLOBAL.get_or_init(NotificationCenter::new)
    }

    /// Register `observer` for notifications posted under `name`.
    pub fn observe<F>(&self, name: impl Into<String>, observer: F) -> NotificationToken
    where
        F: Fn(&Notification) + Send + Sync + 'static,
    {
        let name = name.into();
        let id = SubscriberId::new();
        self.observers
            .entry(name.clone())
            .or_default()
            .insert(id, Arc::new(observer));

        let weak: Weak<ObserverTable> = Arc::downgrade(&self.observers);
        let key = name.clone();
        let subscription = Subscription::new(move || {
            if let Some(observers) = weak.upgrade() {
                let removed = observers
                    .get_mut(&key)
                    .and_then(|mut table| table.shift_remove(&id));
                drop(removed);
                observers.remove_if(&key, |_, table| table.is_empty());
            }
        });

        NotificationToken {
            name,
            _subscription: subscription,
        }
    }

    /// Deliver a notification to every observer of `name`, in registration
    /// order. Returns the number of observers reached.
    pub fn post(&self, name: &str, payload: Option<Value>) -> usize {
        let observers: SmallVec<[Observer; 4]> = match self.observers.get(name) {
            Some(table) => table.values().cloned().collect(),
            None => return 0,
        };

        let notification = Notification {
            name: name.to_owned(),
            payload,
        };
        trace!(name, observers = observers.len(), "posting notification");
        for observer in &observers {
            observer(&notification);
        }
        observers.len()
    }

    /// Number of observers registered for `name`.
    pub fn observer_count(&self, name: &str) -> usize {
        self.observers.get(name).map(|table| table.len()).unwrap_or(0)
    }
}

impl fmt::Debug for NotificationCenter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("NotificationCenter")
            .field("names", &self.observers.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use parking_lot::Mutex;
    use serde_json::json;
    use std::sync::atomic::{AtomicI32, Ordering};

    #[test]
    fn post_reaches_observers_of_that_name() {
        let center = NotificationCenter::new();
        let count = Arc::new(AtomicI32::new(0));
        let count_clone = count.clone();

        let _token = center.observe("did-become-active", move |_| {
            count_clone.fetch_add(1, Ordering::SeqCst);
        });

        assert_eq!(center.post("did-become-active", None), 1);
        assert_eq!(center.post("will-resign-active", None), 0);
        assert_eq!(count.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn observers_receive_payload_in_order() {
        let center = NotificationCenter::new();
        let seen = Arc::new(Mutex::new(Vec::new()));

        let first = seen.clone();
        let _a = center.observe("theme", move |n| first.lock().push(("a", n.payload.clone())));
        let second = seen.clone();
        let _b = center.observe("theme", move |n| second.lock().push(("b", n.payload.clone())));

        center.post("theme", Some(json!("dark")));

        assert_eq!(
            *seen.lock(),
            vec![("a", Some(json!("dark"))), ("b", Some(json!("dark")))]
        );
    }

    #[test]
    fn dropping_token_unsubscribes() {
        let center = NotificationCenter::new();
        let count = Arc::new(AtomicI32::new(0));
        let count_clone = count.clone();

        let token = center.observe("tick", move |_| {
            count_clone.fetch_add(1, Ordering::SeqCst);
        });
        assert_eq!(token.name(), "tick");
        assert_eq!(center.observer_count("tick"), 1);

        drop(token);
        center.post("tick", None);

        assert_eq!(count.load(Ordering::SeqCst), 0);
        assert_eq!(center.observer_count("tick"), 0);
    }

    #[test]
    fn observer_may_unsubscribe_during_post() {
        let center = NotificationCenter::new();
        let slot: Arc<Mutex<Option<NotificationToken>>> = Arc::new(Mutex::new(None));

        let inner = slot.clone();
        let token = center.observe("once", move |_| {
            inner.lock().take();
        });
        *slot.lock() = Some(token);

        assert_eq!(center.post("once", None), 1);
        assert_eq!(center.observer_count("once"), 0);
    }
}
