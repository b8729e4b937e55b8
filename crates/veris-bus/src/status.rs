//! Best-effort fan-out of substate events, keyed by protocol instance.

use parking_lot::Mutex;
use std::collections::HashMap;
use tokio::sync::mpsc;
use tracing::debug;
use veris_psm::SubState;
use veris_types::StateKey;

/// Buffer of one listener channel.
///
/// Sized for a full protocol run (the longest family persists six entries)
/// plus headroom; a consumer further behind than this loses events, which
/// the delivery contract allows.
const LISTENER_BUFFER: usize = 16;

/// Identifies one listener registration within its key.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ListenerId(u64);

impl ListenerId {
    pub(crate) fn from_raw(raw: u64) -> Self {
        Self(raw)
    }
}

/// Non-blocking fan-out index: `StateKey` → listener channels.
#[derive(Debug, Default)]
pub(crate) struct FanOut {
    inner: Mutex<FanOutInner>,
}

#[derive(Debug, Default)]
struct FanOutInner {
    next_id: u64,
    listeners: HashMap<StateKey, Vec<(ListenerId, mpsc::Sender<SubState>)>>,
}

impl FanOut {
    pub(crate) fn add(&self, key: &StateKey) -> (ListenerId, mpsc::Receiver<SubState>) {
        let (tx, rx) = mpsc::channel(LISTENER_BUFFER);
        let mut inner = self.inner.lock();
        inner.next_id += 1;
        let id = ListenerId(inner.next_id);
        inner.listeners.entry(key.clone()).or_default().push((id, tx));
        (id, rx)
    }

    pub(crate) fn remove(&self, key: &StateKey, id: ListenerId) {
        let mut inner = self.inner.lock();
        if let Some(list) = inner.listeners.get_mut(key) {
            list.retain(|(lid, _)| *lid != id);
            if list.is_empty() {
                inner.listeners.remove(key);
            }
        }
    }

    /// Posts one event to every listener of the key.
    ///
    /// `try_send` keeps the engine from ever blocking on a consumer; a full
    /// or closed channel drops the event for that listener only. Closed
    /// channels are pruned in passing.
    pub(crate) fn broadcast(&self, key: &StateKey, sub: SubState) {
        let mut inner = self.inner.lock();
        let Some(list) = inner.listeners.get_mut(key) else {
            return;
        };
        list.retain(|(id, tx)| match tx.try_send(sub) {
            Ok(()) => true,
            Err(mpsc::error::TrySendError::Full(_)) => {
                debug!(%key, listener = ?id, %sub, "listener full, event dropped");
                true
            }
            Err(mpsc::error::TrySendError::Closed(_)) => false,
        });
        if list.is_empty() {
            inner.listeners.remove(key);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use veris_types::{Did, Nonce};

    fn key() -> StateKey {
        StateKey::new(Did::new("w"), Nonce::adopt("n"))
    }

    #[tokio::test]
    async fn delivery_preserves_post_order() {
        let fan = FanOut::default();
        let (_id, mut rx) = fan.add(&key());

        fan.broadcast(&key(), SubState::SENDING);
        fan.broadcast(&key(), SubState::WAITING);
        fan.broadcast(&key(), SubState::READY_ACK);

        assert_eq!(rx.recv().await, Some(SubState::SENDING));
        assert_eq!(rx.recv().await, Some(SubState::WAITING));
        assert_eq!(rx.recv().await, Some(SubState::READY_ACK));
    }

    #[tokio::test]
    async fn full_listener_drops_excess_without_blocking() {
        let fan = FanOut::default();
        let (_id, mut rx) = fan.add(&key());

        for _ in 0..(LISTENER_BUFFER + 4) {
            fan.broadcast(&key(), SubState::SENDING);
        }

        let mut received = 0;
        while rx.try_recv().is_ok() {
            received += 1;
        }
        assert_eq!(received, LISTENER_BUFFER);
    }

    #[tokio::test]
    async fn dropped_receiver_is_pruned() {
        let fan = FanOut::default();
        let (_id, rx) = fan.add(&key());
        drop(rx);

        fan.broadcast(&key(), SubState::SENDING);
        assert!(fan.inner.lock().listeners.is_empty());
    }
}
