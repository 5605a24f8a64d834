//! Notification wiring.
//!
//! External asynchronous events (application lifecycle, theme changes and
//! the like) reach a model through its notification rules. Those rules
//! observe a [`NotificationCenter`] and forward what they see as actions.
//! The returned [`NotificationToken`]s are owned by the coordinator and
//! released with it.

mod center;

pub use center::{Notification, NotificationCenter, NotificationToken};
