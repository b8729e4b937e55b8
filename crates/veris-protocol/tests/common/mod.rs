//! Two-agency loopback harness.
#![allow(dead_code)] // each test binary uses its own slice of the harness
//!
//! Builds complete agencies (store, bus, engine, registry, one agent) and
//! wires their transports together in process: an outbound envelope is
//! routed straight into the recipient agency on a spawned task, the way a
//! network delivery would arrive.

use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use veris_agent::testing::{PlainPipe, PlainPipeFactory, StubAnoncreds};
use veris_agent::{
    AgentError, AgentRegistry, CloudAgent, Envelope, Outbound, ServiceAgent,
};
use veris_bus::NotificationBus;
use veris_protocol::{route, Engine, ProtocolRegistry, ProtocolState, RunState};
use veris_psm::{MemoryStore, SubState};
use veris_types::{Did, StateKey};

/// Routing fabric connecting agencies by worker DID.
#[derive(Default)]
pub struct Net {
    sides: Mutex<HashMap<Did, SideRef>>,
}

#[derive(Clone)]
struct SideRef {
    agents: Arc<AgentRegistry>,
    registry: Arc<ProtocolRegistry>,
    engine: Arc<Engine>,
}

impl Net {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    fn attach(&self, worker: Did, side: SideRef) {
        self.sides.lock().insert(worker, side);
    }
}

/// Transport delivering envelopes into the recipient agency in process.
pub struct LoopbackOutbound {
    net: Arc<Net>,
}

#[async_trait]
impl Outbound for LoopbackOutbound {
    async fn send(&self, _connection_id: &str, envelope: Envelope) -> Result<(), AgentError> {
        let side = self
            .net
            .sides
            .lock()
            .get(&envelope.recipient)
            .cloned()
            .ok_or_else(|| AgentError::Transport(format!("no route to {}", envelope.recipient)))?;
        tokio::spawn(async move {
            if let Err(e) = route(envelope, &side.agents, &side.registry, &side.engine).await {
                tracing::warn!(%e, "loopback delivery failed");
            }
        });
        Ok(())
    }
}

/// One complete agency with a single registered agent.
pub struct Party {
    pub agents: Arc<AgentRegistry>,
    pub registry: Arc<ProtocolRegistry>,
    pub engine: Arc<Engine>,
    pub agent: Arc<CloudAgent>,
    pub bus: NotificationBus,
}

impl Party {
    /// The worker DID of the party's agent.
    pub fn worker_did(&self) -> Did {
        self.agent.worker.did.clone()
    }

    /// The persisted substate sequence of one instance.
    pub async fn entries(&self, key: &StateKey) -> Vec<SubState> {
        let psm = self.engine.store().load_psm(key).await.expect("psm exists");
        psm.states.iter().map(|s| s.sub).collect()
    }

    /// The payload types of the persisted sequence.
    pub async fn entry_types(&self, key: &StateKey) -> Vec<String> {
        let psm = self.engine.store().load_psm(key).await.expect("psm exists");
        psm.states.iter().map(|s| s.payload_type.clone()).collect()
    }
}

/// Builds a party over an arbitrary transport, detached from any fabric.
///
/// `values` seeds the stub wallet's revealed attributes.
pub fn party_with_outbound(
    name: &str,
    sa: ServiceAgent,
    outbound: Arc<dyn Outbound>,
    values: &[(&str, &str)],
) -> Party {
    let worker = format!("w-{name}");
    let ca = format!("ca-{name}");
    let root = format!("root-{name}");

    let bus = NotificationBus::new();
    let wallet = StubAnoncreds::new(
        values
            .iter()
            .map(|(k, v)| ((*k).to_string(), (*v).to_string())),
    );
    let engine = Arc::new(
        Engine::new(
            Arc::new(MemoryStore::new()),
            bus.clone(),
            outbound,
            wallet,
            Arc::new(PlainPipeFactory),
        )
        .with_sa_deadline(Duration::from_secs(2)),
    );

    let agents = Arc::new(AgentRegistry::new());
    let agent = agents
        .register(CloudAgent::new(
            Did::new(root),
            Did::new(ca.clone()),
            Did::new(worker.clone()),
            PlainPipe::between(worker, ca),
            sa,
        ))
        .expect("fresh registry");
    let registry = Arc::new(ProtocolRegistry::with_builtin_families());

    Party { agents, registry, engine, agent, bus }
}

/// Builds a party attached to the fabric.
pub fn party(name: &str, sa: ServiceAgent, net: &Arc<Net>, values: &[(&str, &str)]) -> Party {
    let outbound = Arc::new(LoopbackOutbound { net: Arc::clone(net) });
    let built = party_with_outbound(name, sa, outbound, values);
    net.attach(
        built.worker_did(),
        SideRef {
            agents: Arc::clone(&built.agents),
            registry: Arc::clone(&built.registry),
            engine: Arc::clone(&built.engine),
        },
    );
    built
}

/// Establishes a pairwise between two parties under one label.
pub fn connect(left: &Party, right: &Party, label: &str) {
    let lw = left.worker_did();
    let rw = right.worker_did();
    left.agent
        .worker
        .pairwise
        .add(
            lw.clone(),
            rw.clone(),
            label,
            PlainPipe::between(lw.as_str(), rw.as_str()),
        )
        .expect("left pairwise");
    right
        .agent
        .worker
        .pairwise
        .add(
            rw.clone(),
            lw.clone(),
            label,
            PlainPipe::between(rw.as_str(), lw.as_str()),
        )
        .expect("right pairwise");
}

/// Drains a run stream until its terminal event, collecting everything.
pub async fn drain(
    mut rx: tokio::sync::mpsc::Receiver<ProtocolState>,
) -> Vec<ProtocolState> {
    let mut events = Vec::new();
    let deadline = Duration::from_secs(5);
    loop {
        match tokio::time::timeout(deadline, rx.recv()).await {
            Ok(Some(event)) => {
                let state = event.state;
                events.push(event);
                if matches!(state, RunState::Ok | RunState::Nack | RunState::Err) {
                    return events;
                }
            }
            Ok(None) => return events,
            Err(_) => panic!("run stream produced no terminal event"),
        }
    }
}

/// Waits until the instance's record reaches a terminal state.
pub async fn wait_terminal(party: &Party, key: &StateKey) {
    let deadline = tokio::time::Instant::now() + Duration::from_secs(5);
    loop {
        if let Ok(Some(psm)) = party.engine.store().try_load_psm(key).await {
            if psm.is_terminal() {
                return;
            }
        }
        assert!(
            tokio::time::Instant::now() < deadline,
            "instance never reached a terminal state"
        );
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
}
