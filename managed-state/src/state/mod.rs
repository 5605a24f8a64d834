//! State Coordination
//!
//! This module implements the batching state coordinator and the pieces it
//! is assembled from.
//!
//! # Concepts
//!
//! ## Cells
//!
//! An [`ObservableCell`] holds the current snapshot of a value and notifies
//! subscribers when a *different* value is stored. Equal values are
//! suppressed, so observers only hear about real changes.
//!
//! ## Actions and batches
//!
//! Producers never mutate a model directly. They push actions into an
//! [`ActionChannel`], which hands them to the coordinator in ordered
//! batches. The flush trigger (manual or debounced) is configuration.
//!
//! ## The coordinator
//!
//! [`ManagedState`] applies each batch to a private copy of the model, runs
//! the model's post-processing hook once, and publishes the copy. The model
//! type also declares binding rules (state changes to actions) and
//! notification rules (external events to actions); both are installed at
//! construction and released with the coordinator.
//!
//! ## Lenses
//!
//! Field access goes through [`Lens`] values: read a field, write it
//! directly, observe it, or scope a child cell or coordinator to it.

mod cell;
mod channel;
mod coordinator;
mod lens;
mod model;
mod receiver;
mod scoped;
mod subscription;

pub use cell::{FieldView, ObservableCell};
pub use channel::{ActionChannel, Batch};
pub use coordinator::ManagedState;
pub use lens::{ComposedLens, FieldLens, Lens};
pub use model::Model;
pub use receiver::{ActionReceiver, ActionSender};
pub use scoped::ScopedCell;
pub use subscription::{SubscriberId, Subscription};
