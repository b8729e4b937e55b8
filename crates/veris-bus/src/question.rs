//! The question/answer broker.
//!
//! A question is posted for one agent and client; any subscriber for that
//! `(agent DID, client id)` may answer it. The broker correlates answers to
//! waiters by question id and guarantees at most one answer is delivered
//! per question; duplicates and late answers are dropped.

use crate::{BusError, ListenerId};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::time::Duration;
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, warn};
use veris_types::{ClientId, Did, RevealedAttribute};

/// Buffer of one answerer channel.
const ANSWERER_BUFFER: usize = 16;

/// Addresses the question stream of one agent and client.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct AgentKey {
    /// Worker DID of the agent the question concerns.
    pub agent_did: Did,
    /// Client consuming the stream.
    pub client_id: ClientId,
}

impl AgentKey {
    /// Creates an agent key.
    #[must_use]
    pub fn new(agent_did: Did, client_id: ClientId) -> Self {
        Self { agent_did, client_id }
    }
}

/// What is being asked.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum QuestionKind {
    /// Liveness question; the answerer echoes readiness.
    Ping {
        /// Free-form ping payload.
        info: String,
    },
    /// Should this credential proposal be accepted?
    IssuePropose {
        /// Credential definition proposed against.
        cred_def_id: String,
        /// Proposed attribute values, as coded preview values.
        values: String,
    },
    /// Should this proof proposal be accepted?
    ProofPropose {
        /// Names of the proposed attributes.
        attribute_names: Vec<String>,
    },
    /// Are these revealed proof values acceptable?
    ProofValues {
        /// Attributes the presentation revealed.
        attributes: Vec<RevealedAttribute>,
    },
}

/// A question pending a user decision.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AgentQuestion {
    /// Correlation id; the answer must carry the same id.
    pub id: String,
    /// Whose stream the question goes to.
    pub key: AgentKey,
    /// Pairwise connection the underlying protocol runs over.
    pub connection_id: String,
    /// The question payload.
    pub kind: QuestionKind,
}

impl AgentQuestion {
    /// Creates a question.
    #[must_use]
    pub fn new(
        id: impl Into<String>,
        key: AgentKey,
        connection_id: impl Into<String>,
        kind: QuestionKind,
    ) -> Self {
        Self {
            id: id.into(),
            key,
            connection_id: connection_id.into(),
            kind,
        }
    }
}

/// The decision for one question.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AgentAnswer {
    /// Id of the question being answered.
    pub id: String,
    /// Whose stream the answer came from.
    pub key: AgentKey,
    /// The decision: `true` accepts, `false` rejects.
    pub ready: bool,
    /// Free-form answer payload.
    pub info: String,
}

#[derive(Debug, Default)]
pub(crate) struct QuestionBroker {
    inner: Mutex<BrokerInner>,
}

#[derive(Debug, Default)]
struct BrokerInner {
    next_id: u64,
    answerers: HashMap<AgentKey, Vec<(ListenerId, mpsc::Sender<AgentQuestion>)>>,
    pending: HashMap<String, oneshot::Sender<AgentAnswer>>,
}

impl QuestionBroker {
    pub(crate) fn add_answerer(
        &self,
        key: &AgentKey,
    ) -> (ListenerId, mpsc::Receiver<AgentQuestion>) {
        let (tx, rx) = mpsc::channel(ANSWERER_BUFFER);
        let mut inner = self.inner.lock();
        inner.next_id += 1;
        let id = ListenerId::from_raw(inner.next_id);
        inner.answerers.entry(key.clone()).or_default().push((id, tx));
        (id, rx)
    }

    pub(crate) fn rm_answerer(&self, key: &AgentKey, id: ListenerId) {
        let mut inner = self.inner.lock();
        if let Some(list) = inner.answerers.get_mut(key) {
            list.retain(|(lid, _)| *lid != id);
            if list.is_empty() {
                inner.answerers.remove(key);
            }
        }
    }

    pub(crate) async fn send_question(
        &self,
        question: AgentQuestion,
        deadline: Duration,
    ) -> Result<AgentAnswer, BusError> {
        let question_id = question.id.clone();
        let (tx, rx) = oneshot::channel();
        {
            let mut inner = self.inner.lock();
            inner.pending.insert(question_id.clone(), tx);

            if let Some(list) = inner.answerers.get_mut(&question.key) {
                list.retain(|(id, qtx)| match qtx.try_send(question.clone()) {
                    Ok(()) => true,
                    Err(mpsc::error::TrySendError::Full(_)) => {
                        debug!(question = %question.id, answerer = ?id, "answerer full, question dropped");
                        true
                    }
                    Err(mpsc::error::TrySendError::Closed(_)) => false,
                });
            }
        }

        match tokio::time::timeout(deadline, rx).await {
            Ok(Ok(answer)) => Ok(answer),
            // All senders dropped: broker teardown. Treat as cancellation.
            Ok(Err(_)) => Err(BusError::Cancelled(question_id)),
            Err(_) => {
                self.inner.lock().pending.remove(&question_id);
                Err(BusError::Cancelled(question_id))
            }
        }
    }

    pub(crate) fn send_answer(&self, answer: AgentAnswer) {
        let waiter = self.inner.lock().pending.remove(&answer.id);
        match waiter {
            Some(tx) => {
                // The waiter may have just timed out; dropping the answer
                // then is exactly the contract.
                let _ = tx.send(answer);
            }
            None => warn!(question = %answer.id, "answer with no pending question dropped"),
        }
    }
}
