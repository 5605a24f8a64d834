//! Action handles given to rules and other producers.
//!
//! Both handles reference the action channel weakly. A rule closure that
//! captures one never keeps its coordinator alive, and sending through a
//! handle that outlived its coordinator reports [`StateError::Released`].

use std::fmt;
use std::sync::Arc;

use parking_lot::Mutex;
use tracing::trace;

use super::channel::WeakChannel;
use crate::error::{Result, StateError};

/// Cloneable, thread-safe handle for sending actions to a coordinator.
pub struct ActionSender<A: Send + 'static> {
    channel: WeakChannel<A>,
}

impl<A: Send + 'static> ActionSender<A> {
    pub(crate) fn new(channel: WeakChannel<A>) -> Self {
        Self { channel }
    }

    /// Queue `action` for the next batch.
    pub fn send(&self, action: A) -> Result<()> {
        let channel = self.channel.upgrade().ok_or(StateError::Released)?;
        channel.push(Some(action));
        Ok(())
    }

    /// Whether the coordinator behind this handle is still alive.
    pub fn is_connected(&self) -> bool {
        self.channel.upgrade().is_some()
    }
}

impl<A: Send + 'static> Clone for ActionSender<A> {
    fn clone(&self) -> Self {
        Self {
            channel: self.channel.clone(),
        }
    }
}

impl<A: Send + 'static> fmt::Debug for ActionSender<A> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ActionSender")
            .field("connected", &self.is_connected())
            .finish()
    }
}

struct ReceiverShared<A: Send + 'static> {
    /// `Some` while the coordinator is still being built.
    first_run: Mutex<Option<Vec<A>>>,
    sender: ActionSender<A>,
}

/// The action handle passed to binding rules.
///
/// Actions sent while the coordinator is still installing its rules are held
/// back and delivered together as the first batch. Afterwards the receiver
/// forwards straight into the action channel.
pub struct ActionReceiver<A: Send + 'static> {
    shared: Arc<ReceiverShared<A>>,
}

impl<A: Send + 'static> ActionReceiver<A> {
    pub(crate) fn buffering(channel: WeakChannel<A>) -> Self {
        Self {
            shared: Arc::new(ReceiverShared {
                first_run: Mutex::new(Some(Vec::new())),
                sender: ActionSender::new(channel),
            }),
        }
    }

    /// Emit an action.
    pub fn send(&self, action: A) -> Result<()> {
        {
            let mut first_run = self.shared.first_run.lock();
            if let Some(buffer) = first_run.as_mut() {
                buffer.push(action);
                trace!(buffered = buffer.len(), "action held for first batch");
                return Ok(());
            }
        }
        self.shared.sender.send(action)
    }

    /// A plain sender to the same channel, skipping the first-run buffer.
    pub fn sender(&self) -> ActionSender<A> {
        self.shared.sender.clone()
    }

    /// Whether construction is still in progress.
    pub fn is_buffering(&self) -> bool {
        self.shared.first_run.lock().is_some()
    }

    /// Stop buffering and hand back what was collected.
    pub(crate) fn finish_first_run(&self) -> Vec<A> {
        self.shared.first_run.lock().take().unwrap_or_default()
    }
}

impl<A: Send + 'static> Clone for ActionReceiver<A> {
    fn clone(&self) -> Self {
        Self {
            shared: Arc::clone(&self.shared),
        }
    }
}

impl<A: Send + 'static> fmt::Debug for ActionReceiver<A> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ActionReceiver")
            .field("buffering", &self.is_buffering())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::FlushPolicy;
    use crate::state::channel::ActionChannel;

    #[test]
    fn receiver_buffers_until_first_run_finishes() {
        let channel = ActionChannel::new(FlushPolicy::Manual);
        let receiver = ActionReceiver::buffering(channel.downgrade());

        receiver.send(1).unwrap();
        receiver.send(2).unwrap();
        assert_eq!(channel.pending(), 0);
        assert!(receiver.is_buffering());

        assert_eq!(receiver.finish_first_run(), vec![1, 2]);
        assert!(!receiver.is_buffering());

        receiver.send(3).unwrap();
        assert_eq!(channel.pending(), 1);
    }

    #[test]
    fn sender_reports_released_channel() {
        let channel = ActionChannel::<i32>::new(FlushPolicy::Manual);
        let sender = ActionSender::new(channel.downgrade());
        assert!(sender.is_connected());

        drop(channel);
        assert!(!sender.is_connected());
        assert!(matches!(sender.send(1), Err(StateError::Released)));
    }
}
