//! Managed State
//!
//! This crate lets value-type application models drive UI updates
//! declaratively from inside an imperative UI layer.
//! It provides:
//!
//! - Observable cells with duplicate suppression
//! - An action channel that batches triggers from many sources
//! - The [`ManagedState`] coordinator that commits each batch atomically
//! - Declarative binding and notification rules supplied by the model
//! - A small notification center with auto-unsubscribing tokens
//!
//! # Architecture
//!
//! - `state`: cells, lenses, the action channel and the coordinator
//! - `notify`: the notification center used by notification rules
//! - `config`: coordinator configuration (flush policy)
//! - `error`: the crate's error type
//!
//! # Example
//!
//! ```rust,ignore
//! use managed_state::{lens, CoordinatorConfig, ManagedState, Model};
//!
//! #[derive(Clone, PartialEq)]
//! struct Counter { number: i64, text: String }
//!
//! enum CounterAction { Increment }
//!
//! impl Model for Counter {
//!     type Action = CounterAction;
//!
//!     fn apply(&mut self, action: CounterAction) {
//!         match action {
//!             CounterAction::Increment => self.number += 1,
//!         }
//!     }
//!
//!     fn post_actions_processing(&mut self) {
//!         self.text = self.number.to_string();
//!     }
//! }
//!
//! let state = ManagedState::with_config(
//!     Counter { number: 0, text: "0".into() },
//!     CoordinatorConfig::manual(),
//! );
//! let text = state.observe(lens!(Counter, text));
//!
//! state.send(CounterAction::Increment);
//! state.send(CounterAction::Increment);
//! state.flush();
//!
//! assert_eq!(text.get(), "2");
//! ```

pub mod config;
pub mod error;
pub mod notify;
pub mod state;

pub use config::{CoordinatorConfig, FlushPolicy};
pub use error::{Result, StateError};
pub use notify::{Notification, NotificationCenter, NotificationToken};
pub use state::{
    ActionChannel, ActionReceiver, ActionSender, Batch, ComposedLens, FieldLens, FieldView, Lens,
    ManagedState, Model, ObservableCell, ScopedCell, SubscriberId, Subscription,
};
