//! Durable storage for PSM records and protocol representations.
//!
//! Records are stored as JSON documents, one file per key:
//!
//! ```text
//! <base>/
//! ├── psm/     one PSM log per (worker DID, nonce)
//! ├── creds/   issue-credential representations
//! └── proofs/  present-proof representations
//! ```
//!
//! Writes are atomic: the document is written to a temp file, fsynced, then
//! renamed over the final path. A partially written record is never
//! observable, and when a store call returns the entry is durable; callers
//! may then emit bus events.

use crate::{IssueCredRep, PresentProofRep, Psm, StoreError};
use async_trait::async_trait;
use parking_lot::RwLock;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use tokio::fs;
use tokio::io::AsyncWriteExt;
use uuid::Uuid;
use veris_types::StateKey;

/// Namespace for deriving record file names from state keys (UUID v5).
const STORE_NAMESPACE: Uuid = uuid::uuid!("4f7a2d6e-9c1b-4c80-8e55-2b0f6a3d91c4");

/// Storage abstraction for PSM records and per-family representations.
///
/// Implementations must be `Send + Sync` and atomic per write: either the
/// whole record is durable or nothing changed. Serialization of writes per
/// key is the caller's job (the engine holds a [`KeyLocks`](crate::KeyLocks)
/// guard around load-modify-save).
#[async_trait]
pub trait PsmStore: Send + Sync {
    /// Persists a PSM record, overwriting any previous version.
    async fn save_psm(&self, psm: &Psm) -> Result<(), StoreError>;

    /// Loads a PSM record.
    ///
    /// # Errors
    ///
    /// [`StoreError::NotFound`] when no record exists for the key.
    async fn load_psm(&self, key: &StateKey) -> Result<Psm, StoreError>;

    /// Loads a PSM record, mapping a missing record to `None`.
    async fn try_load_psm(&self, key: &StateKey) -> Result<Option<Psm>, StoreError> {
        match self.load_psm(key).await {
            Ok(psm) => Ok(Some(psm)),
            Err(StoreError::NotFound(_)) => Ok(None),
            Err(e) => Err(e),
        }
    }

    /// Persists an issue-credential representation.
    async fn save_cred_rep(&self, rep: &IssueCredRep) -> Result<(), StoreError>;

    /// Loads an issue-credential representation.
    async fn load_cred_rep(&self, key: &StateKey) -> Result<IssueCredRep, StoreError>;

    /// Persists a present-proof representation.
    async fn save_proof_rep(&self, rep: &PresentProofRep) -> Result<(), StoreError>;

    /// Loads a present-proof representation.
    async fn load_proof_rep(&self, key: &StateKey) -> Result<PresentProofRep, StoreError>;
}

/// In-memory store for tests and ephemeral agents.
#[derive(Debug, Default)]
pub struct MemoryStore {
    psms: RwLock<HashMap<StateKey, Psm>>,
    cred_reps: RwLock<HashMap<StateKey, IssueCredRep>>,
    proof_reps: RwLock<HashMap<StateKey, PresentProofRep>>,
}

impl MemoryStore {
    /// Creates an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl PsmStore for MemoryStore {
    async fn save_psm(&self, psm: &Psm) -> Result<(), StoreError> {
        self.psms.write().insert(psm.key.clone(), psm.clone());
        Ok(())
    }

    async fn load_psm(&self, key: &StateKey) -> Result<Psm, StoreError> {
        self.psms
            .read()
            .get(key)
            .cloned()
            .ok_or_else(|| StoreError::NotFound(key.clone()))
    }

    async fn save_cred_rep(&self, rep: &IssueCredRep) -> Result<(), StoreError> {
        self.cred_reps.write().insert(rep.key.clone(), rep.clone());
        Ok(())
    }

    async fn load_cred_rep(&self, key: &StateKey) -> Result<IssueCredRep, StoreError> {
        self.cred_reps
            .read()
            .get(key)
            .cloned()
            .ok_or_else(|| StoreError::NotFound(key.clone()))
    }

    async fn save_proof_rep(&self, rep: &PresentProofRep) -> Result<(), StoreError> {
        self.proof_reps.write().insert(rep.key.clone(), rep.clone());
        Ok(())
    }

    async fn load_proof_rep(&self, key: &StateKey) -> Result<PresentProofRep, StoreError> {
        self.proof_reps
            .read()
            .get(key)
            .cloned()
            .ok_or_else(|| StoreError::NotFound(key.clone()))
    }
}

/// File-backed store, one JSON document per record.
///
/// File names are UUID v5 digests of the key, so arbitrary DID and nonce
/// strings never leak into paths.
#[derive(Debug, Clone)]
pub struct FileStore {
    base: PathBuf,
}

impl FileStore {
    /// Opens (and creates if missing) a store rooted at `base`.
    ///
    /// # Errors
    ///
    /// [`StoreError::DirectoryCreation`] when a subdirectory cannot be
    /// created.
    pub fn new(base: impl Into<PathBuf>) -> Result<Self, StoreError> {
        let base = base.into();
        for sub in ["psm", "creds", "proofs"] {
            let dir = base.join(sub);
            if !dir.exists() {
                std::fs::create_dir_all(&dir).map_err(|source| {
                    StoreError::DirectoryCreation { path: dir.clone(), source }
                })?;
            }
        }
        Ok(Self { base })
    }

    fn record_path(&self, sub: &str, key: &StateKey) -> PathBuf {
        let name = Uuid::new_v5(&STORE_NAMESPACE, key.to_string().as_bytes());
        self.base.join(sub).join(format!("{name}.json"))
    }

    async fn write_atomic(path: &Path, json: &[u8]) -> Result<(), StoreError> {
        let tmp = path.with_extension("json.tmp");
        let mut file = fs::File::create(&tmp).await?;
        file.write_all(json).await?;
        // Durability contract: the entry is on disk before any bus event
        // derived from it is observable.
        file.sync_all().await?;
        drop(file);
        fs::rename(&tmp, path).await?;
        Ok(())
    }

    async fn save<T: serde::Serialize>(
        &self,
        sub: &str,
        key: &StateKey,
        value: &T,
    ) -> Result<(), StoreError> {
        let json = serde_json::to_vec_pretty(value)?;
        Self::write_atomic(&self.record_path(sub, key), &json).await
    }

    async fn load<T: serde::de::DeserializeOwned>(
        &self,
        sub: &str,
        key: &StateKey,
    ) -> Result<T, StoreError> {
        let path = self.record_path(sub, key);
        if !path.exists() {
            return Err(StoreError::NotFound(key.clone()));
        }
        let json = fs::read(&path).await?;
        Ok(serde_json::from_slice(&json)?)
    }
}

#[async_trait]
impl PsmStore for FileStore {
    async fn save_psm(&self, psm: &Psm) -> Result<(), StoreError> {
        self.save("psm", &psm.key, psm).await
    }

    async fn load_psm(&self, key: &StateKey) -> Result<Psm, StoreError> {
        self.load("psm", key).await
    }

    async fn save_cred_rep(&self, rep: &IssueCredRep) -> Result<(), StoreError> {
        self.save("creds", &rep.key, rep).await
    }

    async fn load_cred_rep(&self, key: &StateKey) -> Result<IssueCredRep, StoreError> {
        self.load("creds", key).await
    }

    async fn save_proof_rep(&self, rep: &PresentProofRep) -> Result<(), StoreError> {
        self.save("proofs", &rep.key, rep).await
    }

    async fn load_proof_rep(&self, key: &StateKey) -> Result<PresentProofRep, StoreError> {
        self.load("proofs", key).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{PsmState, SubState, Task, TaskData};
    use veris_types::{Did, Nonce, Role};

    fn key(nonce: &str) -> StateKey {
        StateKey::new(Did::new("worker-1"), Nonce::adopt(nonce))
    }

    fn sample_psm(nonce: &str) -> Psm {
        let task = Task::new("conn-1", Role::Initiator, TaskData::TrustPing);
        let mut psm = Psm::new(key(nonce), Role::Initiator, "conn-1");
        psm.append(PsmState::new(SubState::SENDING, "trust-ping/ping", task));
        psm
    }

    #[tokio::test]
    async fn memory_store_round_trip() {
        let store = MemoryStore::new();
        let psm = sample_psm("n-1");
        store.save_psm(&psm).await.unwrap();

        let loaded = store.load_psm(&key("n-1")).await.unwrap();
        assert_eq!(loaded, psm);
    }

    #[tokio::test]
    async fn memory_store_missing_is_not_found() {
        let store = MemoryStore::new();
        let err = store.load_psm(&key("nope")).await.unwrap_err();
        assert!(matches!(err, StoreError::NotFound(_)));
        assert!(store.try_load_psm(&key("nope")).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn file_store_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileStore::new(dir.path()).unwrap();

        let mut psm = sample_psm("n-2");
        store.save_psm(&psm).await.unwrap();

        // overwrite with an appended state, as the engine does
        let task = psm.current_task().unwrap().clone();
        psm.append(PsmState::new(SubState::WAITING, "trust-ping/pong", task));
        store.save_psm(&psm).await.unwrap();

        let loaded = store.load_psm(&key("n-2")).await.unwrap();
        assert_eq!(loaded.states.len(), 2);
        assert_eq!(loaded.last_state().unwrap().sub, SubState::WAITING);
    }

    #[tokio::test]
    async fn file_store_no_temp_files_left() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileStore::new(dir.path()).unwrap();
        store.save_psm(&sample_psm("n-3")).await.unwrap();

        let leftovers: Vec<_> = std::fs::read_dir(dir.path().join("psm"))
            .unwrap()
            .filter_map(Result::ok)
            .filter(|e| e.path().extension().is_some_and(|x| x == "tmp"))
            .collect();
        assert!(leftovers.is_empty());
    }

    #[tokio::test]
    async fn file_store_reps_are_separate_namespaces() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileStore::new(dir.path()).unwrap();

        let rep = IssueCredRep {
            key: key("n-4"),
            cred_def_id: "cd:1".into(),
            values: String::new(),
            cred_offer: "offer-blob".into(),
            attributes: vec![],
        };
        store.save_cred_rep(&rep).await.unwrap();

        assert!(store.load_psm(&key("n-4")).await.is_err());
        let loaded = store.load_cred_rep(&key("n-4")).await.unwrap();
        assert_eq!(loaded.cred_def_id, "cd:1");
    }
}
