//! Per-key exclusion for PSM transitions.

use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::OwnedMutexGuard;
use veris_types::StateKey;

/// A lock map serializing transitions per [`StateKey`].
///
/// No two handlers may persist entries concurrently for the same
/// `(worker DID, nonce)`; the engine acquires the key's lock for the whole
/// transition (load, handler, persist, send). Different keys proceed
/// concurrently with no ordering between them.
///
/// # Example
///
/// ```no_run
/// use veris_psm::KeyLocks;
/// use veris_types::{Did, Nonce, StateKey};
///
/// # async fn example() {
/// let locks = KeyLocks::new();
/// let key = StateKey::new(Did::new("w"), Nonce::adopt("n"));
/// let guard = locks.lock(&key).await;
/// // transition runs here; a second lock(&key) waits until guard drops
/// drop(guard);
/// # }
/// ```
#[derive(Debug, Default)]
pub struct KeyLocks {
    inner: Mutex<HashMap<StateKey, Arc<tokio::sync::Mutex<()>>>>,
}

impl KeyLocks {
    /// Creates an empty lock map.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Acquires the exclusion for one key, waiting if a transition for the
    /// same key is in flight.
    pub async fn lock(&self, key: &StateKey) -> OwnedMutexGuard<()> {
        let entry = {
            let mut map = self.inner.lock();
            Arc::clone(map.entry(key.clone()).or_default())
        };
        entry.lock_owned().await
    }
}
