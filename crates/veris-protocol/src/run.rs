//! Engine-level protocol surfaces.
//!
//! These are the operations the host's RPC server exposes: start a
//! protocol and stream its transitions, resume a paused one, snapshot its
//! status, release a finished one. The streaming surface is a plain
//! channel; the RPC skeleton is the host's concern.

use crate::{families, Engine, FamilyStatus, ProtocolError, ProtocolRegistry};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tracing::{debug, warn};
use veris_agent::CloudAgent;
use veris_psm::{SubState, Task};
use veris_types::{Role, StateKey};

/// Buffer of one run stream.
const RUN_STREAM_BUFFER: usize = 16;

/// Client-visible state of one protocol instance.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RunState {
    /// The instance is progressing.
    Running,
    /// A user decision is pending; resume with ACK or NACK.
    WaitAction,
    /// Terminal: accepted.
    Ok,
    /// Terminal: rejected.
    Nack,
    /// Terminal: failed.
    Err,
}

/// One event of a run stream, or the snapshot head of a status.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProtocolState {
    /// Instance the event concerns.
    pub key: StateKey,
    /// The client-visible state.
    pub state: RunState,
}

/// Status snapshot of one instance.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProtocolStatus {
    /// Current client-visible state.
    pub state: ProtocolState,
    /// Which side this agent plays.
    pub role: Role,
    /// Pairwise connection the instance runs over.
    pub connection_id: String,
    /// Family-specific detail from the family's status provider.
    pub family: FamilyStatus,
}

/// Maps a persisted substate to the client-visible state; `true` means
/// terminal.
fn run_state_of(sub: SubState) -> (RunState, bool) {
    match sub.pure() {
        SubState::READY => {
            if sub.is_ack() {
                (RunState::Ok, true)
            } else {
                (RunState::Nack, true)
            }
        }
        SubState::FAILURE => (RunState::Err, true),
        _ => (RunState::Running, false),
    }
}

/// Starts a task through its family's starter.
///
/// # Errors
///
/// [`ProtocolError::NoHandler`] for an unregistered family; otherwise
/// whatever the starter surfaces.
pub async fn start_task(
    engine: &Engine,
    registry: &ProtocolRegistry,
    agent: &CloudAgent,
    task: Task,
) -> Result<(), ProtocolError> {
    let family = families::family_of(&task.data);
    let processor = registry.processor(family).ok_or_else(|| ProtocolError::NoHandler {
        family: family.name().into(),
        message_type: "start".into(),
    })?;
    // The creator validates the inputs and normalizes the nonce (connect
    // adopts the invitation id) before anything persists.
    let task = processor.create_task(task.header, task.data)?;
    processor.start(engine, agent, task).await
}

/// Starts a protocol and streams every state transition until terminal.
///
/// `WaitAction` is emitted whenever a user decision becomes pending. The
/// stream ends after the terminal event, or silently when `deadline`
/// elapses; transitions already persisted remain, and the instance
/// continues unmonitored.
///
/// # Errors
///
/// [`ProtocolError::NoHandler`] when the task's family is unregistered.
pub fn run(
    engine: Arc<Engine>,
    registry: Arc<ProtocolRegistry>,
    agent: Arc<CloudAgent>,
    task: Task,
    deadline: Duration,
) -> Result<mpsc::Receiver<ProtocolState>, ProtocolError> {
    let family = families::family_of(&task.data);
    let processor = registry.processor(family).ok_or_else(|| ProtocolError::NoHandler {
        family: family.name().into(),
        message_type: "start".into(),
    })?;
    let task = processor.create_task(task.header, task.data)?;

    let key = task.state_key(&agent.worker.did);
    let bus = engine.bus().clone();
    let (status_id, mut status_rx) = bus.add_status_listener(&key);
    let (action_id, mut action_rx) = bus.add_user_action_listener(&key);
    let (tx, rx) = mpsc::channel(RUN_STREAM_BUFFER);

    tokio::spawn(async move {
        if let Err(e) = processor.start(&engine, &agent, task).await {
            warn!(%key, %e, "protocol start failed");
            let _ = tx.send(ProtocolState { key: key.clone(), state: RunState::Err }).await;
        } else {
            let end = tokio::time::Instant::now() + deadline;
            loop {
                tokio::select! {
                    () = tokio::time::sleep_until(end) => {
                        debug!(%key, "run deadline elapsed, detaching");
                        break;
                    }
                    sub = status_rx.recv() => {
                        let Some(sub) = sub else { break };
                        let (state, terminal) = run_state_of(sub);
                        if tx.send(ProtocolState { key: key.clone(), state }).await.is_err() {
                            break;
                        }
                        if terminal {
                            break;
                        }
                    }
                    action = action_rx.recv() => {
                        let Some(_) = action else { break };
                        let event = ProtocolState { key: key.clone(), state: RunState::WaitAction };
                        if tx.send(event).await.is_err() {
                            break;
                        }
                    }
                }
            }
        }
        bus.rm_status_listener(&key, status_id);
        bus.rm_user_action_listener(&key, action_id);
    });

    Ok(rx)
}

/// Re-enters a PSM paused on a user decision with the user's verdict.
///
/// # Errors
///
/// [`ProtocolError::ProtocolClosed`] when the instance does not exist or
/// is not pending a decision.
pub async fn resume(
    engine: &Engine,
    registry: &ProtocolRegistry,
    agent: &CloudAgent,
    key: &StateKey,
    ack: bool,
) -> Result<(), ProtocolError> {
    let psm = engine.store().load_psm(key).await?;
    let Some(task) = psm.current_task() else {
        return Err(ProtocolError::ProtocolClosed(key.clone()));
    };
    let family = families::family_of(&task.data);
    let processor = registry.processor(family).ok_or_else(|| ProtocolError::NoHandler {
        family: family.name().into(),
        message_type: "resume".into(),
    })?;
    processor.resume(engine, agent, key, ack).await
}

/// Snapshots the current state of an instance plus its family detail.
///
/// # Errors
///
/// [`ProtocolError::PersistenceFailure`] with a not-found store error when
/// the instance does not exist.
pub async fn status(
    engine: &Engine,
    registry: &ProtocolRegistry,
    key: &StateKey,
) -> Result<ProtocolStatus, ProtocolError> {
    let psm = engine.store().load_psm(key).await?;

    let state = if psm.pending_user_action() {
        RunState::WaitAction
    } else {
        psm.last_state()
            .map_or(RunState::Running, |last| run_state_of(last.sub).0)
    };

    let family_detail = match psm.current_task() {
        Some(task) => {
            let family = families::family_of(&task.data);
            match registry.processor(family) {
                Some(processor) => processor
                    .fill_status(engine, key)
                    .await
                    .unwrap_or_else(|e| {
                        debug!(%key, %e, "no family status detail");
                        FamilyStatus::None
                    }),
                None => FamilyStatus::None,
            }
        }
        None => FamilyStatus::None,
    };

    Ok(ProtocolStatus {
        state: ProtocolState { key: key.clone(), state },
        role: psm.role,
        connection_id: psm.connection_id.clone(),
        family: family_detail,
    })
}
