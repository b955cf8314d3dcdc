//! Lifecycle signaling between the broker layer and the reconnect loop
//!
//! A [`SignalMailbox`] is a single-slot channel carrying the most recent
//! [`LifecycleSignal`]. Senders never block. The slot coalesces: a second
//! loss notification replaces a pending one, and a stop request replaces
//! anything. The one rule enforced here is that a pending stop is never
//! overwritten by a later loss notification, so a stop request cannot be
//! masked by a connection dying at the same moment.

use std::sync::{Arc, Mutex, MutexGuard};
use tokio::sync::Notify;

/// Event that moves the reconnect loop out of its current wait
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LifecycleSignal {
    /// The active broker connection died; reconnect.
    Lost,
    /// An external stop was requested; shut down.
    Stopped,
}

#[derive(Default)]
struct MailboxInner {
    slot: Mutex<Option<LifecycleSignal>>,
    bell: Notify,
}

/// Single-slot, last-intent-wins mailbox (stop always wins)
#[derive(Clone, Default)]
pub struct SignalMailbox {
    inner: Arc<MailboxInner>,
}

impl SignalMailbox {
    pub fn new() -> Self {
        Self::default()
    }

    fn slot(&self) -> MutexGuard<'_, Option<LifecycleSignal>> {
        match self.inner.slot.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    /// Record a connection loss unless a stop is already pending.
    pub fn notify_lost(&self) {
        {
            let mut slot = self.slot();
            if !matches!(*slot, Some(LifecycleSignal::Stopped)) {
                *slot = Some(LifecycleSignal::Lost);
            }
        }
        self.inner.bell.notify_one();
    }

    /// Record a stop request. Idempotent; overwrites a pending loss.
    pub fn request_stop(&self) {
        *self.slot() = Some(LifecycleSignal::Stopped);
        self.inner.bell.notify_one();
    }

    /// True if a stop request is pending and not yet consumed.
    pub fn stop_pending(&self) -> bool {
        matches!(*self.slot(), Some(LifecycleSignal::Stopped))
    }

    /// Take the pending signal, waiting until one arrives.
    ///
    /// Intended for a single consumer; `Notify` keeps a permit when nobody is
    /// waiting, so a signal sent between the slot check and the wait is not
    /// missed.
    pub async fn recv(&self) -> LifecycleSignal {
        loop {
            if let Some(signal) = self.slot().take() {
                return signal;
            }
            self.inner.bell.notified().await;
        }
    }
}
