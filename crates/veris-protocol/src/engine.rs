//! The PSM engine.
//!
//! Drives one state machine per protocol instance. Every transition runs
//! under the instance's key lock, appends exactly one entry per persisted
//! step, and posts the new substate on the bus only after the store call
//! returned, so the entry is durable before anyone observes it.
//!
//! Three entry points mirror the three ways an instance advances:
//!
//! - [`Engine::start_psm`]: a local task opens the instance,
//! - [`Engine::exec_psm`]: an inbound peer message drives it,
//! - [`Engine::resume_psm`]: a user decision unblocks a paused instance.
//!
//! # Failure semantics
//!
//! Transport sends are retried zero times: a send error appends a terminal
//! `FAILURE` entry and surfaces [`ProtocolError::TransportFailure`]; the
//! peer re-drives or times out. Handler errors behave the same. Store
//! errors are fatal to the in-flight transition and propagate with no
//! compensating entry; handlers must be idempotent up to their first
//! successful persistence.

use crate::{MessageType, MsgBody, Packet, ProtocolError, ProtocolMsg};
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};
use veris_agent::{AgentError, Anoncreds, CloudAgent, Outbound, PipeFactory, Worker};
use veris_bus::{NotificationBus, QuestionKind};
use veris_psm::{KeyLocks, Psm, PsmState, PsmStore, SubState, Task};
use veris_types::StateKey;

/// Default deadline for one service-agent question.
const SA_DEADLINE_SECS: u64 = 60;

/// Inputs of [`Engine::start_psm`].
pub struct Initial<'a> {
    /// Type of the opening outbound message.
    pub send_next: MessageType,
    /// Type the instance waits for afterwards; [`MessageType::Terminate`]
    /// finishes the instance right after the send.
    pub waiting_next: MessageType,
    /// The agent opening the instance.
    pub agent: &'a CloudAgent,
    /// The task; its nonce becomes the instance key.
    pub task: Task,
}

/// Inputs of [`Engine::exec_psm`].
pub struct Transition {
    /// The inbound message driving the transition.
    pub packet: Packet,
    /// Type of the reply; [`MessageType::Terminate`] sends nothing and
    /// finishes the instance.
    pub send_next: MessageType,
    /// Type waited for after the reply; [`MessageType::Terminate`]
    /// finishes the instance after the send.
    pub waiting_next: MessageType,
    /// Task for protocol-opening messages, when no record exists yet.
    pub task: Option<Task>,
}

/// Inputs of [`Engine::resume_psm`] for the accept path and the reject
/// message type.
pub struct Continuation {
    /// Reply type when the user accepted.
    pub send_next: MessageType,
    /// Type waited for after the accept reply.
    pub waiting_next: MessageType,
    /// Rejection type sent when the user declined.
    pub nack_next: MessageType,
}

/// The protocol state machine engine.
///
/// Owns the store, the per-key locks, and the external collaborators the
/// processors need. One engine serves the whole agency; instances are
/// isolated by their key locks.
pub struct Engine {
    store: Arc<dyn PsmStore>,
    bus: NotificationBus,
    locks: KeyLocks,
    outbound: Arc<dyn Outbound>,
    wallet: Arc<dyn Anoncreds>,
    pipes: Arc<dyn PipeFactory>,
    sa_deadline: Duration,
}

impl Engine {
    /// Creates an engine over its collaborators.
    #[must_use]
    pub fn new(
        store: Arc<dyn PsmStore>,
        bus: NotificationBus,
        outbound: Arc<dyn Outbound>,
        wallet: Arc<dyn Anoncreds>,
        pipes: Arc<dyn PipeFactory>,
    ) -> Self {
        Self {
            store,
            bus,
            locks: KeyLocks::new(),
            outbound,
            wallet,
            pipes,
            sa_deadline: Duration::from_secs(SA_DEADLINE_SECS),
        }
    }

    /// Overrides the service-agent question deadline.
    #[must_use]
    pub fn with_sa_deadline(mut self, deadline: Duration) -> Self {
        self.sa_deadline = deadline;
        self
    }

    /// The PSM store.
    #[must_use]
    pub fn store(&self) -> &Arc<dyn PsmStore> {
        &self.store
    }

    /// The notification bus.
    #[must_use]
    pub fn bus(&self) -> &NotificationBus {
        &self.bus
    }

    /// The wallet contract.
    #[must_use]
    pub fn wallet(&self) -> &Arc<dyn Anoncreds> {
        &self.wallet
    }

    /// The pipe factory.
    #[must_use]
    pub fn pipes(&self) -> &Arc<dyn PipeFactory> {
        &self.pipes
    }

    /// Asks the agent's service agent one question, resolving failures to
    /// NACK per the fail-safe contract.
    pub async fn ask_sa(
        &self,
        agent: &CloudAgent,
        connection_id: &str,
        kind: QuestionKind,
    ) -> veris_agent::SaVerdict {
        agent
            .sa
            .call(&agent.worker.did, connection_id, kind, &self.bus, self.sa_deadline)
            .await
    }

    /// Opens a new protocol instance.
    ///
    /// `setup` fills the protocol-specific fields of the opening message;
    /// a setup error aborts with no PSM entry written.
    ///
    /// # Errors
    ///
    /// - [`ProtocolError::DuplicateProtocol`] when the key already has a
    ///   record (nothing is written),
    /// - [`ProtocolError::TransportFailure`] when the send fails (the
    ///   record then ends `SENDING, FAILURE`),
    /// - [`ProtocolError::PersistenceFailure`] on store errors.
    pub async fn start_psm<F, Fut>(&self, initial: Initial<'_>, setup: F) -> Result<(), ProtocolError>
    where
        F: FnOnce(StateKey, ProtocolMsg) -> Fut,
        Fut: Future<Output = Result<ProtocolMsg, ProtocolError>>,
    {
        let worker = &initial.agent.worker;
        let key = initial.task.state_key(&worker.did);
        let _guard = self.locks.lock(&key).await;

        if self.store.try_load_psm(&key).await?.is_some() {
            return Err(ProtocolError::DuplicateProtocol(key));
        }

        let out = ProtocolMsg::new(initial.send_next, key.nonce.clone());
        let out = setup(key.clone(), out).await?;

        info!(%key, send = %initial.send_next, "protocol start");
        let mut psm = Psm::new(
            key,
            initial.task.header.role,
            initial.task.header.connection_id.clone(),
        );
        psm.append(PsmState::new(
            SubState::SENDING,
            initial.send_next.wire_name(),
            initial.task.clone(),
        ));
        self.commit(&psm).await?;

        if let Err(e) = self.send_via(worker, &psm.connection_id, &out).await {
            psm.append(PsmState::new(
                SubState::FAILURE,
                initial.send_next.wire_name(),
                initial.task,
            ));
            self.commit(&psm).await?;
            return Err(e);
        }

        self.append_after_send(&mut psm, initial.waiting_next, true, initial.task, false)
            .await
    }

    /// Drives one instance for one inbound message.
    ///
    /// `in_out` is the protocol's business logic: it receives the
    /// connection id, the inbound message, and the prepared reply, and
    /// returns the finished reply plus the ACK bit.
    ///
    /// Duplicate or unexpected inbound messages (wrong type while
    /// `WAITING`, or anything while a user decision is pending) are
    /// logged and ignored with zero state change.
    ///
    /// # Errors
    ///
    /// - [`ProtocolError::ProtocolClosed`] for a terminal instance, or for
    ///   a thread id matching no record when the message does not open one,
    /// - [`ProtocolError::TransportFailure`] / handler errors append a
    ///   `FAILURE` entry and propagate,
    /// - [`ProtocolError::PersistenceFailure`] on store errors.
    pub async fn exec_psm<F, Fut>(&self, transition: Transition, in_out: F) -> Result<(), ProtocolError>
    where
        F: FnOnce(String, ProtocolMsg, ProtocolMsg) -> Fut,
        Fut: Future<Output = Result<(ProtocolMsg, bool), ProtocolError>>,
    {
        let worker = &transition.packet.receiver.worker;
        let inbound = transition.packet.payload.clone();
        let key = StateKey::new(worker.did.clone(), inbound.thread_id.clone());
        let _guard = self.locks.lock(&key).await;

        let mut psm = match self.store.try_load_psm(&key).await? {
            Some(psm) => {
                if psm.is_terminal() {
                    return Err(ProtocolError::ProtocolClosed(key));
                }
                if psm.pending_user_action() {
                    debug!(%key, msg_type = %inbound.msg_type, "inbound while user action pending, ignored");
                    return Ok(());
                }
                if let Some(waiting) = psm.waiting_for() {
                    if waiting != inbound.msg_type.wire_name() {
                        debug!(%key, got = %inbound.msg_type, waiting, "unexpected inbound, ignored");
                        return Ok(());
                    }
                }
                psm
            }
            None => {
                // Unknown thread id: only protocol-opening messages (those
                // arriving with a task) may create a record.
                let Some(task) = transition.task.clone() else {
                    return Err(ProtocolError::ProtocolClosed(key));
                };
                Psm::new(key.clone(), task.header.role, task.header.connection_id.clone())
            }
        };

        let task = match (&transition.task, psm.current_task()) {
            (Some(task), _) => task.clone(),
            (None, Some(current)) => current.clone(),
            (None, None) => return Err(ProtocolError::ProtocolClosed(key)),
        };

        psm.append(PsmState::new(
            SubState::SENDING,
            inbound.msg_type.wire_name(),
            task.clone(),
        ));
        self.commit(&psm).await?;

        let out = ProtocolMsg::new(transition.send_next, key.nonce.clone());
        let (out, ack) = match in_out(psm.connection_id.clone(), inbound, out).await {
            Ok(result) => result,
            Err(e) => {
                warn!(%key, %e, "handler failed, protocol ends in failure");
                psm.append(PsmState::new(SubState::FAILURE, "", task));
                self.commit(&psm).await?;
                return Err(e);
            }
        };

        if transition.send_next == MessageType::Terminate {
            let sub = if ack { SubState::READY_ACK } else { SubState::READY_NACK };
            psm.append(PsmState::new(sub, "", task));
            return self.commit(&psm).await;
        }

        if let Err(e) = self.send_via(worker, &psm.connection_id, &out).await {
            psm.append(PsmState::new(SubState::FAILURE, transition.send_next.wire_name(), task));
            self.commit(&psm).await?;
            return Err(e);
        }

        self.append_after_send(&mut psm, transition.waiting_next, ack, task, false)
            .await
    }

    /// Pauses an instance on a user decision.
    ///
    /// Persists receipt of the inbound message plus a `WAITING` entry
    /// flagged pending-user-action, and posts the user-action notification.
    /// [`Engine::resume_psm`] picks the instance back up.
    pub async fn wait_user_action(
        &self,
        packet: &Packet,
        task: Option<Task>,
    ) -> Result<(), ProtocolError> {
        let worker = &packet.receiver.worker;
        let inbound = &packet.payload;
        let key = StateKey::new(worker.did.clone(), inbound.thread_id.clone());
        let _guard = self.locks.lock(&key).await;

        let mut psm = match self.store.try_load_psm(&key).await? {
            Some(psm) => {
                if psm.is_terminal() {
                    return Err(ProtocolError::ProtocolClosed(key));
                }
                psm
            }
            None => {
                let Some(task) = task.clone() else {
                    return Err(ProtocolError::ProtocolClosed(key));
                };
                Psm::new(key.clone(), task.header.role, task.header.connection_id.clone())
            }
        };

        let task = match (task, psm.current_task()) {
            (Some(task), _) => task,
            (None, Some(current)) => current.clone(),
            (None, None) => return Err(ProtocolError::ProtocolClosed(key)),
        };

        psm.append(PsmState::new(
            SubState::SENDING,
            inbound.msg_type.wire_name(),
            task.clone(),
        ));
        self.commit(&psm).await?;

        info!(%key, msg_type = %inbound.msg_type, "pausing for user action");
        psm.append(
            PsmState::new(SubState::WAITING, inbound.msg_type.wire_name(), task).with_user_action(),
        );
        self.commit(&psm).await?;
        self.bus.broadcast_user_action(&psm.key, SubState::WAITING);
        Ok(())
    }

    /// Resumes an instance paused on a user decision.
    ///
    /// On accept, `build_reply` fills the reply and the instance proceeds
    /// to wait for `continuation.waiting_next`. On decline, the engine
    /// sends `continuation.nack_next` and finishes in `READY_NACK`.
    ///
    /// # Errors
    ///
    /// [`ProtocolError::ProtocolClosed`] when no record exists or the
    /// instance is not pending a user action.
    pub async fn resume_psm<F, Fut>(
        &self,
        agent: &CloudAgent,
        key: &StateKey,
        ack: bool,
        continuation: Continuation,
        build_reply: F,
    ) -> Result<(), ProtocolError>
    where
        F: FnOnce(ProtocolMsg) -> Fut,
        Fut: Future<Output = Result<ProtocolMsg, ProtocolError>>,
    {
        let worker = &agent.worker;
        let _guard = self.locks.lock(key).await;

        let Some(mut psm) = self.store.try_load_psm(key).await? else {
            return Err(ProtocolError::ProtocolClosed(key.clone()));
        };
        if !psm.pending_user_action() {
            return Err(ProtocolError::ProtocolClosed(key.clone()));
        }
        let Some(task) = psm.current_task().cloned() else {
            return Err(ProtocolError::ProtocolClosed(key.clone()));
        };

        info!(%key, ack, "resuming after user decision");
        if ack {
            let out = ProtocolMsg::new(continuation.send_next, key.nonce.clone());
            let out = match build_reply(out).await {
                Ok(out) => out,
                Err(e) => {
                    psm.append(PsmState::new(SubState::FAILURE, "", task));
                    self.commit(&psm).await?;
                    return Err(e);
                }
            };
            psm.append(PsmState::new(
                SubState::SENDING,
                continuation.send_next.wire_name(),
                task.clone(),
            ));
            self.commit(&psm).await?;
            if let Err(e) = self.send_via(worker, &psm.connection_id, &out).await {
                psm.append(PsmState::new(
                    SubState::FAILURE,
                    continuation.send_next.wire_name(),
                    task,
                ));
                self.commit(&psm).await?;
                return Err(e);
            }
            self.append_after_send(&mut psm, continuation.waiting_next, true, task, false)
                .await
        } else {
            let out = ProtocolMsg::new(continuation.nack_next, key.nonce.clone())
                .with_body(MsgBody::Nack { reason: "user declined".into() });
            psm.append(PsmState::new(
                SubState::SENDING,
                continuation.nack_next.wire_name(),
                task.clone(),
            ));
            self.commit(&psm).await?;
            if let Err(e) = self.send_via(worker, &psm.connection_id, &out).await {
                psm.append(PsmState::new(
                    SubState::FAILURE,
                    continuation.nack_next.wire_name(),
                    task,
                ));
                self.commit(&psm).await?;
                return Err(e);
            }
            psm.append(PsmState::new(SubState::READY_NACK, "", task));
            self.commit(&psm).await
        }
    }

    /// Overlays `ARCHIVING` on the instance's current state.
    ///
    /// The only in-place mutation the record permits: terminal states are
    /// absorbing but releasable by the owner.
    ///
    /// # Errors
    ///
    /// [`ProtocolError::PersistenceFailure`] on store errors; a missing
    /// record maps to [`ProtocolError::ProtocolClosed`].
    pub async fn release(&self, key: &StateKey) -> Result<(), ProtocolError> {
        let _guard = self.locks.lock(key).await;
        let Some(mut psm) = self.store.try_load_psm(key).await? else {
            return Err(ProtocolError::ProtocolClosed(key.clone()));
        };
        if let Some(last) = psm.states.last_mut() {
            last.sub |= SubState::ARCHIVING;
        }
        self.store.save_psm(&psm).await?;
        info!(%key, "released");
        Ok(())
    }

    /// Appends the post-send entry: `WAITING`, or the terminal state when
    /// nothing further is expected.
    async fn append_after_send(
        &self,
        psm: &mut Psm,
        waiting_next: MessageType,
        ack: bool,
        task: Task,
        user_action: bool,
    ) -> Result<(), ProtocolError> {
        if waiting_next == MessageType::Terminate {
            let sub = if ack { SubState::READY_ACK } else { SubState::READY_NACK };
            psm.append(PsmState::new(sub, "", task));
        } else {
            let mut state = PsmState::new(SubState::WAITING, waiting_next.wire_name(), task);
            if user_action {
                state = state.with_user_action();
            }
            psm.append(state);
        }
        self.commit(psm).await
    }

    /// Persists the record, then posts its new substate. Order matters:
    /// the entry is fsynced before the event is observable.
    async fn commit(&self, psm: &Psm) -> Result<(), ProtocolError> {
        self.store.save_psm(psm).await?;
        if let Some(last) = psm.last_state() {
            debug!(key = %psm.key, sub = %last.sub, "transition persisted");
            self.bus.broadcast_status(&psm.key, last.sub);
        }
        Ok(())
    }

    /// Packs a message over the connection's pairwise pipe and sends it.
    async fn send_via(
        &self,
        worker: &Worker,
        connection_id: &str,
        msg: &ProtocolMsg,
    ) -> Result<(), ProtocolError> {
        let pairwise = worker.pairwise.by_label(connection_id).ok_or_else(|| {
            ProtocolError::from_agent(AgentError::PairwiseNotFound(connection_id.to_string()))
        })?;
        let bytes = serde_json::to_vec(msg)
            .map_err(|e| ProtocolError::HandlerFailure(e.to_string()))?;
        let envelope = pairwise
            .pipe
            .pack(&bytes)
            .await
            .map_err(ProtocolError::from_agent)?;
        self.outbound
            .send(connection_id, envelope)
            .await
            .map_err(ProtocolError::from_agent)
    }
}

impl std::fmt::Debug for Engine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Engine")
            .field("sa_deadline", &self.sa_deadline)
            .finish_non_exhaustive()
    }
}
