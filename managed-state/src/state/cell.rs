//! Observable Value Cell
//!
//! An [`ObservableCell`] holds the current snapshot of a value and tells its
//! subscribers when that snapshot changes.
//!
//! # How Cells Work
//!
//! 1. `set` compares the new value with the stored one. Equal values are
//!    dropped silently (duplicate suppression).
//!
//! 2. A changed value is stored and queued for delivery.
//!
//! 3. The caller that finds no delivery in progress drains the queue,
//!    invoking every live subscriber with each queued value in subscription
//!    order.
//!
//! # Re-entrancy
//!
//! Subscribers may call `set` on the cell that is notifying them. The nested
//! value is queued behind the one being delivered instead of recursing, so
//! every subscriber sees values in commit order and the publishing machinery
//! itself never grows the stack. A logic loop (a subscriber that always
//! writes a new value) still loops; that is the caller's problem.
//!
//! # Thread Safety
//!
//! Value, subscriber table and delivery queue sit behind `parking_lot`
//! locks. No lock is held while a subscriber runs. When two threads publish
//! at once, the thread already delivering also delivers the other thread's
//! value.

use std::collections::VecDeque;
use std::fmt::{self, Debug};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Weak};

use futures_util::stream::{self, BoxStream, StreamExt};
use indexmap::IndexMap;
use parking_lot::{Mutex, RwLock};
use smallvec::SmallVec;
use tokio::sync::mpsc;

use super::lens::FieldLens;
use super::subscription::{SubscriberId, Subscription};

/// Counter for generating unique cell IDs.
static CELL_ID_COUNTER: AtomicU64 = AtomicU64::new(0);

fn next_cell_id() -> u64 {
    CELL_ID_COUNTER.fetch_add(1, Ordering::Relaxed)
}

type Callback<T> = Arc<dyn Fn(&T) + Send + Sync>;

struct CellShared<T> {
    id: u64,
    value: RwLock<T>,
    /// Insertion-ordered so delivery follows subscription order.
    subscribers: RwLock<IndexMap<SubscriberId, Callback<T>>>,
    pending: Mutex<VecDeque<T>>,
    publishing: AtomicBool,
}

impl<T> CellShared<T> {
    fn next_pending(&self) -> Option<T> {
        self.pending.lock().pop_front()
    }

    fn has_pending(&self) -> bool {
        !self.pending.lock().is_empty()
    }

    fn is_subscribed(&self, id: SubscriberId) -> bool {
        self.subscribers.read().contains_key(&id)
    }

    /// Drain the delivery queue unless another call is already doing it.
    fn deliver(&self) {
        loop {
            if self.publishing.swap(true, Ordering::SeqCst) {
                return;
            }
            {
                let _guard = PublishingGuard(&self.publishing);
                while let Some(value) = self.next_pending() {
                    let callbacks: SmallVec<[(SubscriberId, Callback<T>); 4]> = self
                        .subscribers
                        .read()
                        .iter()
                        .map(|(id, callback)| (*id, Arc::clone(callback)))
                        .collect();

                    for (id, callback) in callbacks {
                        // An earlier callback may have unsubscribed this one.
                        if self.is_subscribed(id) {
                            callback(&value);
                        }
                    }
                }
            }
            // A value queued between the last pop and the guard release
            // would otherwise be stranded.
            if !self.has_pending() {
                return;
            }
        }
    }
}

/// Clears the publishing flag even if a subscriber panics.
struct PublishingGuard<'a>(&'a AtomicBool);

impl Drop for PublishingGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::SeqCst);
    }
}

/// A value container that publishes changes to its subscribers.
///
/// Clones share the same value and subscriber table.
///
/// # Example
///
/// ```rust,ignore
/// let cell = ObservableCell::new(0);
/// let _sub = cell.subscribe(|v| println!("now {v}"));
///
/// cell.set(1); // prints "now 1"
/// cell.set(1); // duplicate, nothing printed
/// ```
pub struct ObservableCell<T>
where
    T: Clone + PartialEq + Send + Sync + 'static,
{
    shared: Arc<CellShared<T>>,
}

impl<T> ObservableCell<T>
where
    T: Clone + PartialEq + Send + Sync + 'static,
{
    /// Create a cell holding `value`.
    pub fn new(value: T) -> Self {
        Self {
            shared: Arc::new(CellShared {
                id: next_cell_id(),
                value: RwLock::new(value),
                subscribers: RwLock::new(IndexMap::new()),
                pending: Mutex::new(VecDeque::new()),
                publishing: AtomicBool::new(false),
            }),
        }
    }

    /// Get the cell's unique ID.
    pub fn id(&self) -> u64 {
        self.shared.id
    }

    /// Get a copy of the current value.
    pub fn get(&self) -> T {
        self.shared.value.read().clone()
    }

    /// Borrow the current value for the duration of `f`.
    ///
    /// `f` must not call `set` on this cell.
    pub fn with<R>(&self, f: impl FnOnce(&T) -> R) -> R {
        f(&*self.shared.value.read())
    }

    /// Store `value` and notify subscribers if it differs from the current
    /// value. Returns whether anything was published.
    pub fn set(&self, value: T) -> bool {
        {
            let mut guard = self.shared.value.write();
            if *guard == value {
                return false;
            }
            *guard = value.clone();
            // Queue under the write lock: delivery order must match store order.
            self.shared.pending.lock().push_back(value);
        }

        self.shared.deliver();
        true
    }

    /// Derive a new value from the current one and `set` it.
    pub fn update<F>(&self, f: F) -> bool
    where
        F: FnOnce(&T) -> T,
    {
        let next = {
            let guard = self.shared.value.read();
            f(&*guard)
        };
        self.set(next)
    }

    /// Register a callback invoked with every published value.
    ///
    /// The callback is not invoked with the current value.
    pub fn subscribe<F>(&self, on_change: F) -> Subscription
    where
        F: Fn(&T) + Send + Sync + 'static,
    {
        let id = SubscriberId::new();
        self.shared
            .subscribers
            .write()
            .insert(id, Arc::new(on_change));

        let weak: Weak<CellShared<T>> = Arc::downgrade(&self.shared);
        Subscription::new(move || {
            if let Some(shared) = weak.upgrade() {
                // Drop the callback after releasing the lock.
                let removed = shared.subscribers.write().shift_remove(&id);
                drop(removed);
            }
        })
    }

    /// Published values as an async stream.
    ///
    /// The stream holds its own subscription and ends once the cell is gone.
    pub fn changes(&self) -> BoxStream<'static, T> {
        let (tx, rx) = mpsc::unbounded_channel();
        let subscription = self.subscribe(move |value: &T| {
            let _ = tx.send(value.clone());
        });

        stream::unfold((rx, subscription), |(mut rx, subscription)| async move {
            let next = rx.recv().await?;
            Some((next, (rx, subscription)))
        })
        .boxed()
    }

    /// A derived cell tracking one field of this cell's value.
    ///
    /// The derived cell publishes only when the selected field changes.
    pub fn map<L>(&self, lens: L) -> FieldView<L::Field>
    where
        L: FieldLens<T>,
        L::Field: Clone + PartialEq + Send + Sync + 'static,
    {
        let field = ObservableCell::new(self.with(|value| lens.get_field(value)));
        let target = field.clone();
        let link = self.subscribe(move |value: &T| {
            target.set(lens.get_field(value));
        });

        FieldView {
            cell: field,
            _link: link,
        }
    }

    /// Get the number of live subscribers.
    pub fn subscriber_count(&self) -> usize {
        self.shared.subscribers.read().len()
    }
}

impl<T> Clone for ObservableCell<T>
where
    T: Clone + PartialEq + Send + Sync + 'static,
{
    fn clone(&self) -> Self {
        Self {
            shared: Arc::clone(&self.shared),
        }
    }
}

impl<T> Debug for ObservableCell<T>
where
    T: Clone + PartialEq + Send + Sync + Debug + 'static,
{
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ObservableCell")
            .field("id", &self.shared.id)
            .field("value", &*self.shared.value.read())
            .field("subscriber_count", &self.subscriber_count())
            .finish()
    }
}

/// A live view of one field of an [`ObservableCell`].
///
/// Notifies only when the field's own value changes. Dropping the view
/// detaches it from its source.
pub struct FieldView<F>
where
    F: Clone + PartialEq + Send + Sync + 'static,
{
    cell: ObservableCell<F>,
    _link: Subscription,
}

impl<F> FieldView<F>
where
    F: Clone + PartialEq + Send + Sync + 'static,
{
    /// Current field value.
    pub fn get(&self) -> F {
        self.cell.get()
    }

    /// Observe field changes.
    pub fn subscribe<C>(&self, on_change: C) -> Subscription
    where
        C: Fn(&F) + Send + Sync + 'static,
    {
        self.cell.subscribe(on_change)
    }

    /// Field changes as an async stream.
    ///
    /// The stream ends when the view is dropped.
    pub fn changes(&self) -> BoxStream<'static, F> {
        self.cell.changes()
    }

    /// The cell backing this view.
    pub fn cell(&self) -> &ObservableCell<F> {
        &self.cell
    }
}

impl<F> Debug for FieldView<F>
where
    F: Clone + PartialEq + Send + Sync + Debug + 'static,
{
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FieldView").field("value", &self.get()).finish()
    }
}

// ----------------------------------------------------------------------------
// Tests
// ----------------------------------------------------------------------------
