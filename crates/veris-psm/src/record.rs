//! The append-only PSM record.

use crate::{SubState, Task};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use veris_types::{Role, StateKey};

/// One entry of the PSM log.
///
/// Every transition appends exactly one entry; entries are never rewritten.
/// The entry snapshots everything a cold restart needs: the substate, the
/// task, and the payload type in flight.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PsmState {
    /// Substate bits after the transition.
    pub sub: SubState,
    /// When the transition was persisted.
    pub at: DateTime<Utc>,
    /// Wire type of the payload this entry concerns. For `WAITING` entries
    /// this is the type being waited for; for `SENDING` entries the type
    /// sent or received.
    pub payload_type: String,
    /// The task, re-serialized so handler context survives restarts.
    pub task: Task,
    /// Set when the instance is blocked on a user decision.
    pub pending_user_action: bool,
}

impl PsmState {
    /// Creates an entry timestamped now.
    #[must_use]
    pub fn new(sub: SubState, payload_type: impl Into<String>, task: Task) -> Self {
        Self {
            sub,
            at: Utc::now(),
            payload_type: payload_type.into(),
            task,
            pending_user_action: false,
        }
    }

    /// Marks the entry as blocked on a user decision.
    #[must_use]
    pub fn with_user_action(mut self) -> Self {
        self.pending_user_action = true;
        self
    }
}

/// The durable record of one protocol instance.
///
/// Append-only: the last entry is the authoritative current state, and at
/// most one entry in the log is terminal, the last one. The engine holds a
/// per-key exclusion while appending, so the log is strictly serial and
/// monotonic in time.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Psm {
    /// `(worker DID, nonce)` of the instance.
    pub key: StateKey,
    /// Which side this agent plays.
    pub role: Role,
    /// Pairwise connection the instance runs over.
    pub connection_id: String,
    /// The log, oldest first.
    pub states: Vec<PsmState>,
}

impl Psm {
    /// Creates an empty record.
    #[must_use]
    pub fn new(key: StateKey, role: Role, connection_id: impl Into<String>) -> Self {
        Self {
            key,
            role,
            connection_id: connection_id.into(),
            states: Vec::new(),
        }
    }

    /// The authoritative current state, `None` for an empty record.
    #[must_use]
    pub fn last_state(&self) -> Option<&PsmState> {
        self.states.last()
    }

    /// Returns `true` when the current state is terminal
    /// (`pure()` is `READY` or `FAILURE`).
    #[must_use]
    pub fn is_terminal(&self) -> bool {
        self.last_state().is_some_and(|s| s.sub.is_terminal())
    }

    /// Returns `true` when the instance is blocked on a user decision.
    #[must_use]
    pub fn pending_user_action(&self) -> bool {
        self.last_state().is_some_and(|s| s.pending_user_action)
    }

    /// The payload type currently waited for, when `WAITING`.
    #[must_use]
    pub fn waiting_for(&self) -> Option<&str> {
        self.last_state()
            .filter(|s| s.sub.contains(SubState::WAITING))
            .map(|s| s.payload_type.as_str())
    }

    /// The task attached to the latest entry.
    #[must_use]
    pub fn current_task(&self) -> Option<&Task> {
        self.last_state().map(|s| &s.task)
    }

    /// Appends one entry.
    ///
    /// The caller (the engine, under the per-key lock) is responsible for
    /// persisting the record afterwards; this only mutates the in-memory
    /// copy.
    pub fn append(&mut self, state: PsmState) {
        self.states.push(state);
    }
}

impl std::fmt::Display for Psm {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let sub = self
            .last_state()
            .map_or_else(|| "empty".to_string(), |s| s.sub.to_string());
        write!(f, "{} [{}] {}", self.key, self.role, sub)
    }
}
