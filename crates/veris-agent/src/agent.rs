//! Cloud agents, worker EAs, and the agency-wide registry.

use crate::{PairwiseMap, SecurePipe, ServiceAgent};
use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::info;
use veris_types::Did;

use crate::AgentError;

/// The worker EA: the cloud-resident stand-in for one mobile EA.
///
/// The worker stays online when the device is not: it owns the pairwise
/// map and is the recipient of every inbound envelope for its agent. It
/// keeps only the CA's DID as a back reference; the CA owns the worker.
pub struct Worker {
    /// The worker's own DID; recipient key of inbound envelopes and the
    /// DID half of every [`StateKey`](veris_types::StateKey).
    pub did: Did,
    /// Lookup back-reference to the owning CA.
    pub ca_did: Did,
    /// Cloud transport pipe, attached at creation. Inbound envelopes for
    /// this worker are unpacked through it.
    pub pipe: Arc<dyn SecurePipe>,
    /// Pairwise secure channels of this worker.
    pub pairwise: PairwiseMap,
}

impl Worker {
    /// Creates a worker with an empty pairwise map.
    #[must_use]
    pub fn new(did: Did, ca_did: Did, pipe: Arc<dyn SecurePipe>) -> Self {
        Self {
            did,
            ca_did,
            pipe,
            pairwise: PairwiseMap::new(),
        }
    }
}

impl std::fmt::Debug for Worker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Worker")
            .field("did", &self.did)
            .field("ca_did", &self.ca_did)
            .field("pairwise", &self.pairwise.len())
            .finish()
    }
}

/// One cloud agent (CA) and its worker.
///
/// A CA is the gateway to the world for the EA it serves; it is a
/// singleton per served EA (enforced by [`AgentRegistry::register`]). The
/// `(CA DID, worker DID)` pair is stable for the agent's lifetime.
pub struct CloudAgent {
    /// Root DID of the served EA; registry identity.
    pub root_did: Did,
    /// The CA's own DID.
    pub did: Did,
    /// The worker this CA created and owns.
    pub worker: Arc<Worker>,
    /// Decision authority for user-action states.
    pub sa: ServiceAgent,
    /// Public service endpoint peers reach the worker at; connect
    /// request/response bodies carry it.
    pub endpoint: String,
}

impl CloudAgent {
    /// Creates a CA and its worker, attaching the worker's transport pipe.
    #[must_use]
    pub fn new(
        root_did: Did,
        ca_did: Did,
        worker_did: Did,
        worker_pipe: Arc<dyn SecurePipe>,
        sa: ServiceAgent,
    ) -> Self {
        let worker = Arc::new(Worker::new(worker_did, ca_did.clone(), worker_pipe));
        Self {
            root_did,
            did: ca_did,
            worker,
            sa,
            endpoint: String::new(),
        }
    }

    /// Sets the public service endpoint.
    #[must_use]
    pub fn with_endpoint(mut self, endpoint: impl Into<String>) -> Self {
        self.endpoint = endpoint.into();
        self
    }

    /// The worker's DID.
    #[must_use]
    pub fn worker_did(&self) -> &Did {
        &self.worker.did
    }

    /// Returns `true` when this agent's SA accepts without asking.
    #[must_use]
    pub fn auto_permission(&self) -> bool {
        self.sa.auto_permission()
    }
}

impl std::fmt::Debug for CloudAgent {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CloudAgent")
            .field("root_did", &self.root_did)
            .field("did", &self.did)
            .field("worker", &self.worker.did)
            .finish_non_exhaustive()
    }
}

/// All agents this agency serves, indexed for routing.
///
/// Two indices: by root DID (identity, singleton enforcement) and by
/// worker DID (envelope routing).
#[derive(Debug, Default)]
pub struct AgentRegistry {
    inner: RwLock<RegistryIndex>,
}

#[derive(Debug, Default)]
struct RegistryIndex {
    by_root: HashMap<Did, Arc<CloudAgent>>,
    by_worker: HashMap<Did, Arc<CloudAgent>>,
}

impl AgentRegistry {
    /// Creates an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers an agent, enforcing one CA per root DID.
    ///
    /// # Errors
    ///
    /// [`AgentError::DuplicateAgent`] when an agent for the root DID is
    /// already registered.
    pub fn register(&self, agent: CloudAgent) -> Result<Arc<CloudAgent>, AgentError> {
        let mut inner = self.inner.write();
        if inner.by_root.contains_key(&agent.root_did) {
            return Err(AgentError::DuplicateAgent(agent.root_did));
        }
        let agent = Arc::new(agent);
        info!(root = %agent.root_did, worker = %agent.worker.did, "agent registered");
        inner.by_root.insert(agent.root_did.clone(), Arc::clone(&agent));
        inner.by_worker.insert(agent.worker.did.clone(), Arc::clone(&agent));
        Ok(agent)
    }

    /// Identity lookup by root DID.
    #[must_use]
    pub fn by_root(&self, root_did: &Did) -> Option<Arc<CloudAgent>> {
        self.inner.read().by_root.get(root_did).cloned()
    }

    /// Routing lookup: resolves the agent whose worker owns the recipient
    /// DID.
    ///
    /// # Errors
    ///
    /// [`AgentError::UnknownRecipient`] when no worker matches.
    pub fn resolve_recipient(&self, recipient: &Did) -> Result<Arc<CloudAgent>, AgentError> {
        self.inner
            .read()
            .by_worker
            .get(recipient)
            .cloned()
            .ok_or_else(|| AgentError::UnknownRecipient(recipient.clone()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::PlainPipe;

    fn agent(root: &str, ca: &str, worker: &str) -> CloudAgent {
        CloudAgent::new(
            Did::new(root),
            Did::new(ca),
            Did::new(worker),
            PlainPipe::between(worker, ca),
            ServiceAgent::Permissive,
        )
    }

    #[test]
    fn worker_keeps_ca_back_reference() {
        let a = agent("root-1", "ca-1", "w-1");
        assert_eq!(a.worker.ca_did, Did::new("ca-1"));
        assert_eq!(a.worker_did(), &Did::new("w-1"));
    }

    #[test]
    fn registry_enforces_singleton_per_root() {
        let registry = AgentRegistry::new();
        registry.register(agent("root-1", "ca-1", "w-1")).unwrap();

        let err = registry
            .register(agent("root-1", "ca-2", "w-2"))
            .unwrap_err();
        assert!(matches!(err, AgentError::DuplicateAgent(_)));
    }

    #[test]
    fn resolve_recipient_by_worker_did() {
        let registry = AgentRegistry::new();
        registry.register(agent("root-1", "ca-1", "w-1")).unwrap();

        let found = registry.resolve_recipient(&Did::new("w-1")).unwrap();
        assert_eq!(found.root_did, Did::new("root-1"));

        let err = registry.resolve_recipient(&Did::new("stranger")).unwrap_err();
        assert!(matches!(err, AgentError::UnknownRecipient(_)));
    }

    #[test]
    fn auto_permission_tracks_sa_variant() {
        assert!(agent("r", "c", "w").auto_permission());

        let rpc = CloudAgent::new(
            Did::new("r2"),
            Did::new("c2"),
            Did::new("w2"),
            PlainPipe::between("w2", "c2"),
            ServiceAgent::Rpc { client_id: veris_types::ClientId::new("cli") },
        );
        assert!(!rpc.auto_permission());
    }
}
