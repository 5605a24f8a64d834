//! The contract a model type fulfils.

use super::cell::ObservableCell;
use super::coordinator::ManagedState;
use super::receiver::ActionReceiver;
use super::subscription::Subscription;
use crate::notify::NotificationToken;

/// Application state driven by a [`ManagedState`] coordinator.
///
/// A model is a plain value. The coordinator keeps one published snapshot,
/// applies each batch of actions to a private copy, and publishes the copy
/// when the batch is done.
///
/// # Example
///
/// ```rust,ignore
/// #[derive(Clone, PartialEq)]
/// struct Counter { number: i64, text: String }
///
/// enum CounterAction { Increment }
///
/// impl Model for Counter {
///     type Action = CounterAction;
///
///     fn apply(&mut self, action: CounterAction) {
///         match action {
///             CounterAction::Increment => self.number += 1,
///         }
///     }
///
///     fn post_actions_processing(&mut self) {
///         self.text = self.number.to_string();
///     }
/// }
/// ```
pub trait Model: Clone + PartialEq + Send + Sync + 'static {
    /// Discrete transition requests understood by this model.
    type Action: Send + 'static;

    /// Set to `true` for types whose clones alias the same storage
    /// (`Arc<Mutex<_>>` wrappers and the like). The coordinator refuses such
    /// models: a batch could not be applied to an isolated working copy.
    const SHARED_IDENTITY: bool = false;

    /// Apply one action to this value.
    fn apply(&mut self, action: Self::Action);

    /// Derive computed fields. Runs once per batch, after every action in
    /// the batch has been applied, including for empty batches.
    fn post_actions_processing(&mut self) {}

    /// State-to-event wiring, installed once at construction.
    ///
    /// Receives the coordinator's published cell and a receiver for
    /// actions; anything sent before construction finishes is delivered as
    /// the first batch. The returned subscriptions live as long as the
    /// coordinator. The default installs nothing.
    fn binding_rules(
        _state: &ObservableCell<Self>,
        _actions: &ActionReceiver<Self::Action>,
    ) -> Vec<Subscription> {
        Vec::new()
    }

    /// External-event wiring, installed once at construction after the
    /// binding rules. Clone a [`ManagedState::sender`] into observers; the
    /// returned tokens live as long as the coordinator.
    fn notification_rules(_coordinator: &ManagedState<Self>) -> Vec<NotificationToken> {
        Vec::new()
    }
}
