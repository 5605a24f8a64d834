//! Child cells and child coordinators scoped to one field of a parent.
//!
//! A child starts from the parent's current field value and owns its own
//! snapshot from then on. Every change of the child is written back into
//! the parent field as a direct write, so the parent republishes and runs
//! its post-processing on the next flush. Nothing flows the other way: the
//! parent changing that field does not reach the child.
//!
//! Children reference the parent weakly. A child outliving its parent keeps
//! working on its own; its writes simply go nowhere.

use std::fmt;
use std::sync::{Arc, Weak};

use futures_util::stream::BoxStream;

use super::cell::ObservableCell;
use super::coordinator::{Inner, ManagedState};
use super::lens::FieldLens;
use super::model::Model;
use super::subscription::Subscription;

fn write_back<M, L>(parent: &Weak<Inner<M>>, lens: L, value: L::Field)
where
    M: Model,
    L: FieldLens<M>,
{
    if let Some(parent) = parent.upgrade() {
        parent.modify(|model| lens.set_field(model, value));
    }
}

impl<M: Model> ManagedState<M> {
    /// A child coordinator managing one field of this model.
    ///
    /// The child has its own action channel, configured like this one, and
    /// writes each committed snapshot back into the field.
    pub fn scoped<L>(&self, lens: L) -> ManagedState<L::Field>
    where
        L: FieldLens<M>,
        L::Field: Model,
    {
        let child = ManagedState::with_config(self.get(lens), self.config());

        let parent = Arc::downgrade(&self.inner);
        let link = child.subscribe(move |value: &L::Field| {
            write_back(&parent, lens, value.clone());
        });
        child.retain(link);

        // The child's first batch may already have post-processed the value.
        let current = child.value();
        if self.get(lens) != current {
            self.set(lens, current);
        }

        child
    }

    /// A child cell holding one field of this model.
    pub fn scoped_cell<L>(&self, lens: L) -> ScopedCell<L::Field>
    where
        L: FieldLens<M>,
        L::Field: Clone + PartialEq + Send + Sync + 'static,
    {
        let cell = ObservableCell::new(self.get(lens));

        let parent = Arc::downgrade(&self.inner);
        let link = cell.subscribe(move |value: &L::Field| {
            write_back(&parent, lens, value.clone());
        });

        ScopedCell { cell, _link: link }
    }
}

/// A cell bound to one field of a parent coordinator.
///
/// Writes to the cell are published to its own subscribers and copied into
/// the parent field. Dropping the cell stops the write-back.
pub struct ScopedCell<F>
where
    F: Clone + PartialEq + Send + Sync + 'static,
{
    cell: ObservableCell<F>,
    _link: Subscription,
}

impl<F> ScopedCell<F>
where
    F: Clone + PartialEq + Send + Sync + 'static,
{
    /// Current value.
    pub fn get(&self) -> F {
        self.cell.get()
    }

    /// Store a new value. Returns whether it changed.
    pub fn set(&self, value: F) -> bool {
        self.cell.set(value)
    }

    /// Derive a new value from the current one.
    pub fn update(&self, f: impl FnOnce(&F) -> F) -> bool {
        self.cell.update(f)
    }

    /// Observe changes of this cell.
    pub fn subscribe<C>(&self, on_change: C) -> Subscription
    where
        C: Fn(&F) + Send + Sync + 'static,
    {
        self.cell.subscribe(on_change)
    }

    /// Changes of this cell as an async stream.
    pub fn changes(&self) -> BoxStream<'static, F> {
        self.cell.changes()
    }
}

impl<F> fmt::Debug for ScopedCell<F>
where
    F: Clone + PartialEq + Send + Sync + fmt::Debug + 'static,
{
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ScopedCell").field("value", &self.get()).finish()
    }
}
