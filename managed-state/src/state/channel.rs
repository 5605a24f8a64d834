//! Action Channel
//!
//! A fan-in queue. Any number of producers push actions; one drain receives
//! them as ordered batches.
//!
//! # Batching Rules
//!
//! - Push order is preserved inside a batch.
//! - A flush always hands the drain whatever is buffered, even nothing.
//! - Values pushed while the drain is running land in the next batch: the
//!   buffer is swapped out before the drain is called.
//! - Deliveries never nest. A flush requested while one is in flight (from
//!   the drain itself or from another thread) makes the in-flight delivery
//!   loop once more instead.
//!
//! # Flush Triggers
//!
//! [`FlushPolicy::Manual`] delivers only on [`ActionChannel::flush`].
//! [`FlushPolicy::Debounce`] arms a tokio timer on each push and flushes
//! once pushes stop for the window. Timer tasks hold a weak reference, so a
//! dropped channel never fires. Channels created outside a tokio runtime
//! arm their timers on one lazily started background runtime.

use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, OnceLock, Weak};
use std::time::Duration;

use parking_lot::{Mutex, RwLock};
use tokio::runtime::{Builder, Handle, Runtime};
use tokio::time::Instant;
use tracing::{debug, trace, warn};

use crate::config::FlushPolicy;

/// An ordered group of pushed values. `None` entries are rescan signals.
pub type Batch<A> = Vec<Option<A>>;

type Drain<A> = Arc<dyn Fn(Batch<A>) + Send + Sync>;

struct TimerState {
    deadline: Instant,
    armed: bool,
}

struct ChannelShared<A> {
    buffer: Mutex<Batch<A>>,
    drain: RwLock<Option<Drain<A>>>,
    delivering: AtomicBool,
    redeliver: AtomicBool,
    policy: FlushPolicy,
    runtime: Option<Handle>,
    timer: Mutex<TimerState>,
}

/// Clears the delivering flag even if the drain panics.
struct DeliveringGuard<'a>(&'a AtomicBool);

impl Drop for DeliveringGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::SeqCst);
    }
}

/// Fan-in queue delivering batches to a single drain.
///
/// Clones share the same buffer and drain.
pub struct ActionChannel<A: Send + 'static> {
    shared: Arc<ChannelShared<A>>,
}

impl<A: Send + 'static> ActionChannel<A> {
    /// Create a channel with the given flush policy.
    ///
    /// A debounce policy captures the current tokio runtime. Outside a
    /// runtime its timers run on a shared background runtime, started on
    /// first use. Only if that runtime cannot be built does the channel
    /// fall back to manual flushing.
    pub fn new(policy: FlushPolicy) -> Self {
        let (policy, runtime) = match policy {
            FlushPolicy::Manual => (FlushPolicy::Manual, None),
            FlushPolicy::Debounce(window) => match timer_runtime() {
                Some(handle) => (FlushPolicy::Debounce(window), Some(handle)),
                None => (FlushPolicy::Manual, None),
            },
        };

        Self {
            shared: Arc::new(ChannelShared {
                buffer: Mutex::new(Vec::new()),
                drain: RwLock::new(None),
                delivering: AtomicBool::new(false),
                redeliver: AtomicBool::new(false),
                policy,
                runtime,
                timer: Mutex::new(TimerState {
                    deadline: Instant::now(),
                    armed: false,
                }),
            }),
        }
    }

    /// The policy in effect after runtime detection.
    pub fn policy(&self) -> FlushPolicy {
        self.shared.policy
    }

    /// Install the drain, replacing any previous one.
    pub fn set_drain<F>(&self, drain: F)
    where
        F: Fn(Batch<A>) + Send + Sync + 'static,
    {
        *self.shared.drain.write() = Some(Arc::new(drain));
    }

    /// Buffer a value for the next batch.
    pub fn push(&self, value: Option<A>) {
        let pending = {
            let mut buffer = self.shared.buffer.lock();
            buffer.push(value);
            buffer.len()
        };
        trace!(pending, "action pushed");

        if let (FlushPolicy::Debounce(window), Some(runtime)) =
            (self.shared.policy, self.shared.runtime.as_ref())
        {
            schedule_flush(&self.shared, window, runtime);
        }
    }

    /// Number of values waiting for the next batch.
    pub fn pending(&self) -> usize {
        self.shared.buffer.lock().len()
    }

    /// Whether a batch is being delivered right now.
    pub fn is_delivering(&self) -> bool {
        self.shared.delivering.load(Ordering::SeqCst)
    }

    /// Deliver the buffered values to the drain.
    ///
    /// Returns the number of batches this call delivered. Zero means either
    /// no drain is installed or another delivery was in flight and will
    /// pick the request up.
    pub fn flush(&self) -> usize {
        flush_shared(&self.shared)
    }

    pub(crate) fn downgrade(&self) -> WeakChannel<A> {
        WeakChannel {
            shared: Arc::downgrade(&self.shared),
        }
    }
}

impl<A: Send + 'static> Clone for ActionChannel<A> {
    fn clone(&self) -> Self {
        Self {
            shared: Arc::clone(&self.shared),
        }
    }
}

impl<A: Send + 'static> fmt::Debug for ActionChannel<A> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ActionChannel")
            .field("policy", &self.shared.policy)
            .field("pending", &self.pending())
            .field("delivering", &self.is_delivering())
            .finish()
    }
}

/// Non-owning reference to a channel.
pub(crate) struct WeakChannel<A> {
    shared: Weak<ChannelShared<A>>,
}

impl<A: Send + 'static> WeakChannel<A> {
    pub(crate) fn upgrade(&self) -> Option<ActionChannel<A>> {
        self.shared.upgrade().map(|shared| ActionChannel { shared })
    }
}

impl<A> Clone for WeakChannel<A> {
    fn clone(&self) -> Self {
        Self {
            shared: Weak::clone(&self.shared),
        }
    }
}

/// Runtime hosting debounce timers for channels built outside tokio.
static BACKGROUND: OnceLock<Option<Runtime>> = OnceLock::new();

fn timer_runtime() -> Option<Handle> {
    if let Ok(handle) = Handle::try_current() {
        return Some(handle);
    }

    let background = BACKGROUND.get_or_init(|| {
        match Builder::new_multi_thread()
            .worker_threads(1)
            .thread_name("managed-state-timer")
            .enable_time()
            .build()
        {
            Ok(runtime) => {
                debug!("background timer runtime started");
                Some(runtime)
            }
            Err(error) => {
                warn!(%error, "cannot start background timer runtime; flushing manually");
                None
            }
        }
    });
    background.as_ref().map(|runtime| runtime.handle().clone())
}

fn flush_shared<A: Send + 'static>(shared: &ChannelShared<A>) -> usize {
    let mut delivered = 0;
    loop {
        // Raise the request before trying to claim delivery so an in-flight
        // delivery cannot miss it.
        shared.redeliver.store(true, Ordering::SeqCst);
        if shared.delivering.swap(true, Ordering::SeqCst) {
            return delivered;
        }

        {
            let _guard = DeliveringGuard(&shared.delivering);
            while shared.redeliver.swap(false, Ordering::SeqCst) {
                delivered += deliver_once(shared);
            }
        }

        if !shared.redeliver.load(Ordering::SeqCst) {
            return delivered;
        }
    }
}

fn deliver_once<A: Send + 'static>(shared: &ChannelShared<A>) -> usize {
    let Some(drain) = shared.drain.read().clone() else {
        return 0;
    };
    let batch = std::mem::take(&mut *shared.buffer.lock());
    trace!(size = batch.len(), "delivering batch");
    drain(batch);
    1
}

fn schedule_flush<A: Send + 'static>(
    shared: &Arc<ChannelShared<A>>,
    window: Duration,
    runtime: &Handle,
) {
    {
        let mut timer = shared.timer.lock();
        timer.deadline = Instant::now() + window;
        if timer.armed {
            return;
        }
        timer.armed = true;
    }
    trace!(?window, "flush scheduled");

    let weak = Arc::downgrade(shared);
    runtime.spawn(async move {
        loop {
            let deadline = match weak.upgrade() {
                Some(shared) => shared.timer.lock().deadline,
                None => return,
            };
            tokio::time::sleep_until(deadline).await;

            let Some(shared) = weak.upgrade() else {
                return;
            };
            {
                let mut timer = shared.timer.lock();
                if timer.deadline > Instant::now() {
                    // Pushed again while sleeping.
                    continue;
                }
                timer.armed = false;
            }
            flush_shared(&shared);
            return;
        }
    });
}

// ----------------------------------------------------------------------------
// Tests
// ----------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;

    fn recording(channel: &ActionChannel<i32>) -> Arc<Mutex<Vec<Batch<i32>>>> {
        let batches = Arc::new(Mutex::new(Vec::new()));
        let sink = batches.clone();
        channel.set_drain(move |batch| sink.lock().push(batch));
        batches
    }

    #[test]
    fn flush_delivers_in_push_order() {
        let channel = ActionChannel::new(FlushPolicy::Manual);
        let batches = recording(&channel);

        channel.push(Some(1));
        channel.push(None);
        channel.push(Some(2));
        assert_eq!(channel.pending(), 3);

        assert_eq!(channel.flush(), 1);
        assert_eq!(*batches.lock(), vec![vec![Some(1), None, Some(2)]]);
        assert_eq!(channel.pending(), 0);
    }

    #[test]
    fn empty_flush_still_delivers() {
        let channel = ActionChannel::new(FlushPolicy::Manual);
        let batches = recording(&channel);

        channel.flush();
        assert_eq!(*batches.lock(), vec![Vec::<Option<i32>>::new()]);
    }

    #[test]
    fn flush_without_drain_keeps_buffer() {
        let channel = ActionChannel::new(FlushPolicy::Manual);
        channel.push(Some(1));

        assert_eq!(channel.flush(), 0);
        assert_eq!(channel.pending(), 1);
    }

    #[test]
    fn pushes_during_delivery_wait_for_next_batch() {
        let channel = ActionChannel::new(FlushPolicy::Manual);
        let batches = Arc::new(Mutex::new(Vec::new()));

        let sink = batches.clone();
        let producer = channel.clone();
        channel.set_drain(move |batch: Batch<i32>| {
            if batch.contains(&Some(1)) {
                producer.push(Some(99));
            }
            sink.lock().push(batch);
        });

        channel.push(Some(1));
        channel.flush();
        assert_eq!(*batches.lock(), vec![vec![Some(1)]]);
        assert_eq!(channel.pending(), 1);

        channel.flush();
        assert_eq!(batches.lock()[1], vec![Some(99)]);
    }

    #[test]
    fn reentrant_flush_does_not_nest() {
        let channel = ActionChannel::new(FlushPolicy::Manual);
        let depth = Arc::new(AtomicUsize::new(0));
        let max_depth = Arc::new(AtomicUsize::new(0));
        let calls = Arc::new(AtomicUsize::new(0));

        let inner = channel.clone();
        let (d, m, c) = (depth.clone(), max_depth.clone(), calls.clone());
        channel.set_drain(move |_batch: Batch<i32>| {
            let now = d.fetch_add(1, Ordering::SeqCst) + 1;
            m.fetch_max(now, Ordering::SeqCst);
            if c.fetch_add(1, Ordering::SeqCst) == 0 {
                assert_eq!(inner.flush(), 0);
            }
            d.fetch_sub(1, Ordering::SeqCst);
        });

        assert_eq!(channel.flush(), 2);
        assert_eq!(max_depth.load(Ordering::SeqCst), 1);
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn debounce_outside_runtime_uses_background_timer() {
        let channel = ActionChannel::new(FlushPolicy::Debounce(Duration::from_millis(1)));
        assert_eq!(channel.policy(), FlushPolicy::Debounce(Duration::from_millis(1)));
        let batches = recording(&channel);

        channel.push(Some(7));
        for _ in 0..200 {
            if !batches.lock().is_empty() {
                break;
            }
            std::thread::sleep(Duration::from_millis(5));
        }

        assert_eq!(*batches.lock(), vec![vec![Some(7)]]);
        assert_eq!(channel.pending(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn debounce_collects_burst_into_one_batch() {
        let channel = ActionChannel::new(FlushPolicy::Debounce(Duration::from_millis(5)));
        let batches = recording(&channel);

        channel.push(Some(1));
        tokio::time::sleep(Duration::from_millis(3)).await;
        channel.push(Some(2));
        tokio::time::sleep(Duration::from_millis(3)).await;
        assert!(batches.lock().is_empty());

        tokio::time::sleep(Duration::from_millis(10)).await;
        assert_eq!(*batches.lock(), vec![vec![Some(1), Some(2)]]);
    }

    #[tokio::test(start_paused = true)]
    async fn dropped_channel_never_fires() {
        let channel = ActionChannel::new(FlushPolicy::Debounce(Duration::from_millis(5)));
        let batches = recording(&channel);

        channel.push(Some(1));
        drop(channel);
        tokio::time::sleep(Duration::from_millis(20)).await;

        assert!(batches.lock().is_empty());
    }
}
