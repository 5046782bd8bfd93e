//! Single-slot, latest-value-wins delivery from a pipeline to its consumer.
//!
//! The producer never blocks: publishing over an unread value replaces it and
//! counts the replaced one as dropped.

use std::sync::{Arc, Condvar, Mutex, MutexGuard};
use std::time::Duration;

struct SlotState<T> {
    value: Option<T>,
    published: u64,
    dropped: u64,
    closed: bool,
}

struct Slot<T> {
    state: Mutex<SlotState<T>>,
    ready: Condvar,
}

impl<T> Slot<T> {
    // Every write leaves the slot consistent, so a poisoned lock is still usable.
    fn lock(&self) -> MutexGuard<'_, SlotState<T>> {
        self.state
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

/// Delivery counters for one channel.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct ChannelStats {
    pub published: u64,
    pub dropped: u64,
}

pub struct SnapshotSender<T> {
    slot: Arc<Slot<T>>,
}

pub struct SnapshotReceiver<T> {
    slot: Arc<Slot<T>>,
}

/// Create a connected sender/receiver pair.
pub fn latest<T>() -> (SnapshotSender<T>, SnapshotReceiver<T>) {
    let slot = Arc::new(Slot {
        state: Mutex::new(SlotState {
            value: None,
            published: 0,
            dropped: 0,
            closed: false,
        }),
        ready: Condvar::new(),
    });
    (
        SnapshotSender { slot: slot.clone() },
        SnapshotReceiver { slot },
    )
}

impl<T> SnapshotSender<T> {
    pub fn publish(&self, value: T) {
        let mut state = self.slot.lock();
        if state.value.replace(value).is_some() {
            state.dropped += 1;
        }
        state.published += 1;
        drop(state);
        self.slot.ready.notify_one();
    }

    pub fn stats(&self) -> ChannelStats {
        stats_of(&self.slot)
    }
}

impl<T> Drop for SnapshotSender<T> {
    fn drop(&mut self) {
        self.slot.lock().closed = true;
        self.slot.ready.notify_all();
    }
}

impl<T> SnapshotReceiver<T> {
    /// Take the pending value, if any.
    pub fn try_take(&self) -> Option<T> {
        self.slot.lock().value.take()
    }

    /// Wait up to `timeout` for a value. Returns `None` on timeout.
    ///
    /// A closed, empty slot still waits out the whole timeout, so a consumer
    /// polling several receivers keeps its pace after one pipeline has ended.
    /// Use `is_closed` to notice the end.
    pub fn recv_timeout(&self, timeout: Duration) -> Option<T> {
        let state = self.slot.lock();
        let (mut state, _) = self
            .slot
            .ready
            .wait_timeout_while(state, timeout, |s| s.value.is_none())
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        state.value.take()
    }

    /// True once the sender has been dropped. A last value may still be pending.
    pub fn is_closed(&self) -> bool {
        self.slot.lock().closed
    }

    pub fn stats(&self) -> ChannelStats {
        stats_of(&self.slot)
    }
}

fn stats_of<T>(slot: &Slot<T>) -> ChannelStats {
    let state = slot.lock();
    ChannelStats {
        published: state.published,
        dropped: state.dropped,
    }
}
