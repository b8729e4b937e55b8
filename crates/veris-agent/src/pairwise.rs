//! The pairwise map of one worker EA.

use crate::{AgentError, SecurePipe};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::debug;
use veris_types::Did;

/// One established pairwise: two DIDs and the pipe between them.
pub struct Pairwise {
    /// Our DID of the pair.
    pub my_did: Did,
    /// The peer's DID.
    pub their_did: Did,
    /// Human-readable connection label; doubles as the connection id.
    pub label: String,
    /// The secure pipe bound to this pair.
    pub pipe: Arc<dyn SecurePipe>,
}

impl std::fmt::Debug for Pairwise {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Pairwise")
            .field("my_did", &self.my_did)
            .field("their_did", &self.their_did)
            .field("label", &self.label)
            .finish_non_exhaustive()
    }
}

/// Double-indexed pairwise map: by our DID and by label.
///
/// Readers and writers share one exclusion; lookups are O(1). Deletion is
/// unsupported; a pairwise lives as long as its worker.
#[derive(Debug, Default)]
pub struct PairwiseMap {
    inner: Mutex<PairwiseIndex>,
}

#[derive(Debug, Default)]
struct PairwiseIndex {
    by_did: HashMap<Did, Arc<Pairwise>>,
    by_label: HashMap<String, Arc<Pairwise>>,
}

impl PairwiseMap {
    /// Creates an empty map.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a pairwise, indexing it under both keys.
    ///
    /// Adding the identical `(my DID, their DID, label)` triple again is a
    /// no-op returning the existing entry.
    ///
    /// # Errors
    ///
    /// [`AgentError::PairwiseConflict`] when the label or our DID is
    /// already bound to a different pair.
    pub fn add(
        &self,
        my_did: Did,
        their_did: Did,
        label: impl Into<String>,
        pipe: Arc<dyn SecurePipe>,
    ) -> Result<Arc<Pairwise>, AgentError> {
        let label = label.into();
        let mut inner = self.inner.lock();

        if let Some(existing) = inner.by_did.get(&my_did) {
            if existing.their_did == their_did && existing.label == label {
                return Ok(Arc::clone(existing));
            }
            return Err(AgentError::PairwiseConflict { my_did, label });
        }
        if inner.by_label.contains_key(&label) {
            return Err(AgentError::PairwiseConflict { my_did, label });
        }

        let pw = Arc::new(Pairwise {
            my_did: my_did.clone(),
            their_did,
            label: label.clone(),
            pipe,
        });
        inner.by_did.insert(my_did, Arc::clone(&pw));
        inner.by_label.insert(label.clone(), Arc::clone(&pw));
        debug!(label, "pairwise added");
        Ok(pw)
    }

    /// Looks a pairwise up by our DID.
    #[must_use]
    pub fn by_did(&self, my_did: &Did) -> Option<Arc<Pairwise>> {
        self.inner.lock().by_did.get(my_did).cloned()
    }

    /// Looks a pairwise up by label.
    #[must_use]
    pub fn by_label(&self, label: &str) -> Option<Arc<Pairwise>> {
        self.inner.lock().by_label.get(label).cloned()
    }

    /// Finds the pairwise whose peer DID matches the unpacked sender key.
    ///
    /// Routing only; a scan, not an index. The two indexed keys stay
    /// `my_did` and label.
    #[must_use]
    pub fn find_by_their_did(&self, their_did: &Did) -> Option<Arc<Pairwise>> {
        self.inner
            .lock()
            .by_did
            .values()
            .find(|pw| &pw.their_did == their_did)
            .cloned()
    }

    /// Number of pairwise entries.
    #[must_use]
    pub fn len(&self) -> usize {
        self.inner.lock().by_did.len()
    }

    /// Returns `true` when no pairwise exists yet.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
