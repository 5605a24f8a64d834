//! State Coordinator
//!
//! [`ManagedState`] owns one model snapshot and everything wired to it.
//!
//! # Construction
//!
//! 1. Store the initial snapshot with `accepting` off.
//! 2. Point the action channel's drain at `receive`.
//! 3. Install the model's binding rules, then a hook that pushes a rescan
//!    signal into the channel whenever the snapshot changes outside a batch.
//! 4. Install the model's notification rules.
//! 5. Turn `accepting` on.
//! 6. Deliver whatever the binding rules sent during construction as the
//!    first batch. From then on their receiver feeds the channel directly.
//!
//! # Batches
//!
//! `receive` copies the snapshot, applies every action of the batch in
//! order (skipping rescan signals), runs `post_actions_processing` once and
//! publishes the copy. Observers therefore see either the previous snapshot
//! or the finished one, never a half-applied batch.
//!
//! `accepting` is off while a batch runs, so the rescan hook ignores the
//! batch's own publish. If a subscriber rewrote the snapshot during that
//! publish, `receive` queues the rescan itself. Actions sent during a batch
//! are still queued; they go out with the next one.
//!
//! # Threads
//!
//! Batches and direct field writes run under a re-entrant mutation guard.
//! Two threads never commit concurrently, while a subscriber running inside
//! a commit may still write back on the same thread.

use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use parking_lot::{Mutex, ReentrantMutex};
use tracing::debug;

use super::cell::{FieldView, ObservableCell};
use super::channel::{ActionChannel, Batch};
use super::lens::FieldLens;
use super::model::Model;
use super::receiver::{ActionReceiver, ActionSender};
use super::subscription::Subscription;
use crate::config::{CoordinatorConfig, FlushPolicy};
use crate::error::StateError;
use crate::notify::NotificationToken;

pub(crate) struct Inner<M: Model> {
    cell: ObservableCell<M>,
    channel: ActionChannel<M::Action>,
    accepting: AtomicBool,
    mutation: ReentrantMutex<()>,
    config: CoordinatorConfig,
    subscriptions: Mutex<Vec<Subscription>>,
    tokens: Mutex<Vec<NotificationToken>>,
}

/// Turns `accepting` off for a scope and restores the previous value.
struct Suspended<'a> {
    flag: &'a AtomicBool,
    previous: bool,
}

impl<'a> Suspended<'a> {
    fn new(flag: &'a AtomicBool) -> Self {
        let previous = flag.swap(false, Ordering::SeqCst);
        Self { flag, previous }
    }
}

impl Drop for Suspended<'_> {
    fn drop(&mut self) {
        self.flag.store(self.previous, Ordering::SeqCst);
    }
}

impl<M: Model> Inner<M> {
    fn receive(&self, batch: Batch<M::Action>) {
        let _mutation = self.mutation.lock();
        let _suspended = Suspended::new(&self.accepting);

        let size = batch.len();
        let mut applied = 0usize;
        let mut working = self.cell.get();
        for action in batch.into_iter().flatten() {
            working.apply(action);
            applied += 1;
        }
        working.post_actions_processing();

        let changed = self.cell.set(working.clone());
        debug!(size, applied, changed, "batch committed");

        // Subscribers may have written during the commit while the rescan
        // hook was muted.
        if self.cell.with(|current| *current != working) {
            debug!("model rewritten during commit; rescan queued");
            self.channel.push(None);
        }
    }

    pub(crate) fn modify<F>(&self, mutate: F) -> bool
    where
        F: FnOnce(&mut M),
    {
        let _mutation = self.mutation.lock();
        let mut working = self.cell.get();
        mutate(&mut working);
        self.cell.set(working)
    }

    fn retain(&self, subscription: Subscription) {
        self.subscriptions.lock().push(subscription);
    }
}

impl<M: Model> Drop for Inner<M> {
    fn drop(&mut self) {
        let tokens = std::mem::take(self.tokens.get_mut());
        let subscriptions = std::mem::take(self.subscriptions.get_mut());
        debug!(
            tokens = tokens.len(),
            subscriptions = subscriptions.len(),
            "releasing coordinator"
        );
        drop(tokens);
        drop(subscriptions);
    }
}

/// Coordinator for a value-type [`Model`].
///
/// # Example
///
/// ```rust,ignore
/// let state = ManagedState::with_config(
///     Counter { number: 0, text: "0".into() },
///     CoordinatorConfig::manual(),
/// );
///
/// for _ in 0..4 {
///     state.send(CounterAction::Increment);
/// }
/// state.flush();
///
/// assert_eq!(state.value().text, "4");
/// ```
pub struct ManagedState<M: Model> {
    pub(crate) inner: Arc<Inner<M>>,
}

impl<M: Model> ManagedState<M> {
    /// Create a coordinator with the default configuration.
    ///
    /// The default debounce works with or without a tokio runtime on the
    /// calling thread.
    ///
    /// # Panics
    ///
    /// If `M::SHARED_IDENTITY` is set.
    pub fn new(initial: M) -> Self {
        Self::with_config(initial, CoordinatorConfig::default())
    }

    /// Create a coordinator with an explicit configuration.
    ///
    /// # Panics
    ///
    /// If `M::SHARED_IDENTITY` is set. No rule has been installed at that
    /// point.
    pub fn with_config(initial: M, config: CoordinatorConfig) -> Self {
        if M::SHARED_IDENTITY {
            panic!(
                "{}",
                StateError::SharedIdentity {
                    model: std::any::type_name::<M>(),
                }
            );
        }

        let state = Self {
            inner: Arc::new(Inner {
                cell: ObservableCell::new(initial),
                channel: ActionChannel::new(config.flush),
                accepting: AtomicBool::new(false),
                mutation: ReentrantMutex::new(()),
                config,
                subscriptions: Mutex::new(Vec::new()),
                tokens: Mutex::new(Vec::new()),
            }),
        };
        let inner = &state.inner;

        let weak = Arc::downgrade(inner);
        inner.channel.set_drain(move |batch| {
            if let Some(inner) = weak.upgrade() {
                inner.receive(batch);
            }
        });

        let receiver = ActionReceiver::buffering(inner.channel.downgrade());
        let bindings = M::binding_rules(&inner.cell, &receiver);
        let binding_count = bindings.len();
        inner.subscriptions.lock().extend(bindings);

        let weak = Arc::downgrade(inner);
        let rescan = inner.cell.subscribe(move |_: &M| {
            if let Some(inner) = weak.upgrade() {
                if inner.accepting.load(Ordering::SeqCst) {
                    inner.channel.push(None);
                }
            }
        });
        inner.retain(rescan);

        let tokens = M::notification_rules(&state);
        let token_count = tokens.len();
        inner.tokens.lock().extend(tokens);

        inner.accepting.store(true, Ordering::SeqCst);

        let first_run: Batch<M::Action> =
            receiver.finish_first_run().into_iter().map(Some).collect();
        debug!(
            model = std::any::type_name::<M>(),
            bindings = binding_count,
            notifications = token_count,
            first_run = first_run.len(),
            "coordinator ready"
        );
        inner.receive(first_run);

        state
    }

    /// Current snapshot.
    pub fn value(&self) -> M {
        self.inner.cell.get()
    }

    /// Borrow the current snapshot for the duration of `f`.
    pub fn with<R>(&self, f: impl FnOnce(&M) -> R) -> R {
        self.inner.cell.with(f)
    }

    /// Queue an action for the next batch. Never waits for delivery.
    pub fn send(&self, action: M::Action) {
        self.inner.channel.push(Some(action));
    }

    /// A weak handle for sending actions from rules, tasks or other threads.
    pub fn sender(&self) -> ActionSender<M::Action> {
        ActionSender::new(self.inner.channel.downgrade())
    }

    /// Deliver queued actions now. Returns the number of batches delivered.
    pub fn flush(&self) -> usize {
        self.inner.channel.flush()
    }

    /// Number of queued actions and rescan signals.
    pub fn pending(&self) -> usize {
        self.inner.channel.pending()
    }

    /// Whether the coordinator is between batches.
    pub fn is_accepting(&self) -> bool {
        self.inner.accepting.load(Ordering::SeqCst)
    }

    /// Observe every published snapshot.
    pub fn subscribe<F>(&self, on_change: F) -> Subscription
    where
        F: Fn(&M) + Send + Sync + 'static,
    {
        self.inner.cell.subscribe(on_change)
    }

    /// The published snapshot cell.
    pub fn cell(&self) -> &ObservableCell<M> {
        &self.inner.cell
    }

    /// Read one field.
    pub fn get<L: FieldLens<M>>(&self, lens: L) -> L::Field {
        self.inner.cell.with(|model| lens.get_field(model))
    }

    /// Write one field directly, outside any batch.
    ///
    /// The change is published at once; post-processing catches up on the
    /// next flush. Returns whether the snapshot changed.
    pub fn set<L: FieldLens<M>>(&self, lens: L, value: L::Field) -> bool {
        self.inner.modify(|model| lens.set_field(model, value))
    }

    /// Mutate the snapshot directly, outside any batch.
    pub fn modify<F>(&self, mutate: F) -> bool
    where
        F: FnOnce(&mut M),
    {
        self.inner.modify(mutate)
    }

    /// A live view of one field that notifies only when that field changes.
    pub fn observe<L>(&self, lens: L) -> FieldView<L::Field>
    where
        L: FieldLens<M>,
        L::Field: Clone + PartialEq + Send + Sync + 'static,
    {
        self.inner.cell.map(lens)
    }

    /// Configuration this coordinator was built with.
    pub fn config(&self) -> CoordinatorConfig {
        self.inner.config
    }

    /// Flush policy actually in effect.
    pub fn flush_policy(&self) -> FlushPolicy {
        self.inner.channel.policy()
    }

    pub(crate) fn retain(&self, subscription: Subscription) {
        self.inner.retain(subscription);
    }
}

impl<M> fmt::Debug for ManagedState<M>
where
    M: Model + fmt::Debug,
{
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ManagedState")
            .field("value", &self.value())
            .field("pending", &self.pending())
            .field("accepting", &self.is_accepting())
            .finish()
    }
}

// ----------------------------------------------------------------------------
// Tests
// ----------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::lens;
    use std::sync::atomic::AtomicI32;

    #[derive(Debug, Clone, PartialEq)]
    struct Tally {
        total: i32,
        label: String,
    }

    enum TallyAction {
        Add(i32),
    }

    static POST_RUNS: AtomicI32 = AtomicI32::new(0);

    impl Model for Tally {
        type Action = TallyAction;

        fn apply(&mut self, action: TallyAction) {
            match action {
                TallyAction::Add(n) => self.total += n,
            }
        }

        fn post_actions_processing(&mut self) {
            POST_RUNS.fetch_add(1, Ordering::SeqCst);
            self.label = format!("total {}", self.total);
        }
    }

    fn tally() -> ManagedState<Tally> {
        ManagedState::with_config(
            Tally {
                total: 0,
                label: "total 0".into(),
            },
            CoordinatorConfig::manual(),
        )
    }

    #[test]
    fn batch_applies_actions_in_order() {
        let state = tally();
        state.send(TallyAction::Add(2));
        state.send(TallyAction::Add(5));
        assert_eq!(state.pending(), 2);
        assert_eq!(state.value().total, 0);

        assert_eq!(state.flush(), 1);
        assert_eq!(state.value().total, 7);
        assert_eq!(state.value().label, "total 7");
    }

    #[test]
    fn accepting_after_construction() {
        let state = tally();
        assert!(state.is_accepting());
        assert_eq!(state.pending(), 0);
    }

    #[test]
    fn accepting_is_off_while_batch_runs() {
        let state = tally();
        let seen = Arc::new(AtomicBool::new(true));

        let flag = seen.clone();
        let weak = Arc::downgrade(&state.inner);
        let _sub = state.subscribe(move |_| {
            if let Some(inner) = weak.upgrade() {
                flag.store(inner.accepting.load(Ordering::SeqCst), Ordering::SeqCst);
            }
        });

        state.send(TallyAction::Add(1));
        state.flush();

        assert!(!seen.load(Ordering::SeqCst));
        assert!(state.is_accepting());
    }

    #[test]
    fn default_rules_install_only_rescan_hook() {
        let state = tally();
        assert_eq!(state.cell().subscriber_count(), 1);
    }

    #[test]
    fn commit_does_not_queue_rescan() {
        let state = tally();
        state.send(TallyAction::Add(1));
        state.flush();
        assert_eq!(state.pending(), 0);
    }

    #[test]
    fn direct_write_queues_rescan() {
        let state = tally();
        assert!(state.set(lens!(Tally, total), 3));
        assert_eq!(state.pending(), 1);
        assert_eq!(state.value().label, "total 0");

        state.flush();
        assert_eq!(state.value().label, "total 3");
    }

    #[test]
    fn unchanged_write_publishes_nothing() {
        let state = tally();
        assert!(!state.set(lens!(Tally, total), 0));
        assert_eq!(state.pending(), 0);
    }

    #[test]
    fn empty_flush_runs_post_processing() {
        let state = tally();
        let before = POST_RUNS.load(Ordering::SeqCst);
        state.flush();
        assert!(POST_RUNS.load(Ordering::SeqCst) > before);
        assert_eq!(state.value().total, 0);
    }

    #[test]
    fn get_reads_field() {
        let state = tally();
        state.send(TallyAction::Add(4));
        state.flush();
        assert_eq!(state.get(lens!(Tally, total)), 4);
    }

    #[test]
    fn send_during_commit_goes_to_next_batch() {
        let state = tally();
        let sender = state.sender();
        let _echo = state.subscribe(move |model: &Tally| {
            if model.total == 1 {
                sender.send(TallyAction::Add(10)).unwrap();
            }
        });

        state.send(TallyAction::Add(1));
        state.flush();
        assert_eq!(state.value().total, 1);
        assert_eq!(state.pending(), 1);

        state.flush();
        assert_eq!(state.value().total, 11);
    }

    #[test]
    fn sender_fails_after_release() {
        let state = tally();
        let sender = state.sender();
        drop(state);
        assert!(matches!(
            sender.send(TallyAction::Add(1)),
            Err(StateError::Released)
        ));
    }
}
