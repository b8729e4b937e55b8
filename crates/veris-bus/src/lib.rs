//! Notification bus: status fan-out and question/answer brokering.
//!
//! The bus is how the PSM engine talks to everyone watching a protocol
//! instance:
//!
//! ```text
//! ┌────────────┐  SubState events   ┌──────────────────────────┐
//! │ PSM engine │ ─────────────────► │ status listeners (by key) │
//! │            │  user-action evts  ├──────────────────────────┤
//! │            │ ─────────────────► │ action listeners (by key) │
//! │            │                    └──────────────────────────┘
//! │            │  AgentQuestion     ┌──────────────────────────┐
//! │            │ ─────────────────► │ answerers (by agent+client)│
//! │            │ ◄───────────────── │ AgentAnswer (by question) │
//! └────────────┘                    └──────────────────────────┘
//! ```
//!
//! # Delivery contract
//!
//! Fan-out delivery is best-effort and non-blocking: every event for which
//! the listener's channel has room at post time is delivered in post order;
//! a slow consumer loses intermediate events, never blocks the engine.
//! Question/answer delivery is exactly-once per question id: the first
//! answer reaches the pending waiter, duplicates are dropped.
//!
//! The bus is a value with shared interior. Clone it freely; all clones
//! address the same listener indices.

mod error;
mod question;
mod status;

pub use error::BusError;
pub use question::{AgentAnswer, AgentKey, AgentQuestion, QuestionKind};
pub use status::ListenerId;

use std::sync::Arc;
use std::time::Duration;
use veris_psm::SubState;
use veris_types::StateKey;

/// The process-wide notification bus.
///
/// One instance is shared between the engine, the run/status surfaces, and
/// the question-stream server. Construct it once at host startup and pass
/// the handle through construction; there is no global.
#[derive(Debug, Clone, Default)]
pub struct NotificationBus {
    status: Arc<status::FanOut>,
    user_actions: Arc<status::FanOut>,
    questions: Arc<question::QuestionBroker>,
}

impl NotificationBus {
    /// Creates an empty bus.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Subscribes to every substate transition of one protocol instance.
    ///
    /// Returns the listener id (for [`Self::rm_status_listener`]) and the
    /// receiving end. Events posted while the channel is full are dropped
    /// for this listener only.
    pub fn add_status_listener(
        &self,
        key: &StateKey,
    ) -> (ListenerId, tokio::sync::mpsc::Receiver<SubState>) {
        self.status.add(key)
    }

    /// Removes a status listener.
    pub fn rm_status_listener(&self, key: &StateKey, id: ListenerId) {
        self.status.remove(key, id);
    }

    /// Subscribes to user-action notifications of one protocol instance.
    pub fn add_user_action_listener(
        &self,
        key: &StateKey,
    ) -> (ListenerId, tokio::sync::mpsc::Receiver<SubState>) {
        self.user_actions.add(key)
    }

    /// Removes a user-action listener.
    pub fn rm_user_action_listener(&self, key: &StateKey, id: ListenerId) {
        self.user_actions.remove(key, id);
    }

    /// Posts a substate transition to the instance's status listeners.
    pub fn broadcast_status(&self, key: &StateKey, sub: SubState) {
        self.status.broadcast(key, sub);
    }

    /// Posts a user-action notification to the instance's action listeners.
    pub fn broadcast_user_action(&self, key: &StateKey, sub: SubState) {
        self.user_actions.broadcast(key, sub);
    }

    /// Subscribes an answerer for every question addressed to
    /// `(agent DID, client id)`.
    pub fn add_answerer(
        &self,
        key: &AgentKey,
    ) -> (ListenerId, tokio::sync::mpsc::Receiver<AgentQuestion>) {
        self.questions.add_answerer(key)
    }

    /// Removes an answerer.
    pub fn rm_answerer(&self, key: &AgentKey, id: ListenerId) {
        self.questions.rm_answerer(key, id);
    }

    /// Posts a question and waits for its correlated answer.
    ///
    /// Blocks until an [`AgentAnswer`] with the question's id arrives or
    /// `deadline` elapses. On expiry the pending slot is dropped and a late
    /// answer is discarded.
    ///
    /// # Errors
    ///
    /// [`BusError::Cancelled`] when the deadline elapses.
    pub async fn send_question(
        &self,
        question: AgentQuestion,
        deadline: Duration,
    ) -> Result<AgentAnswer, BusError> {
        self.questions.send_question(question, deadline).await
    }

    /// Delivers an answer to the question's pending waiter.
    ///
    /// An answer whose id matches no pending question (already answered,
    /// already cancelled, or never asked) is dropped.
    pub fn send_answer(&self, answer: AgentAnswer) {
        self.questions.send_answer(answer);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use veris_types::{ClientId, Did, Nonce};

    fn key(nonce: &str) -> StateKey {
        StateKey::new(Did::new("w"), Nonce::adopt(nonce))
    }

    #[tokio::test]
    async fn status_fan_out_reaches_every_listener() {
        let bus = NotificationBus::new();
        let (_ia, mut a) = bus.add_status_listener(&key("n-1"));
        let (_ib, mut b) = bus.add_status_listener(&key("n-1"));

        bus.broadcast_status(&key("n-1"), SubState::SENDING);

        assert_eq!(a.recv().await, Some(SubState::SENDING));
        assert_eq!(b.recv().await, Some(SubState::SENDING));
    }

    #[tokio::test]
    async fn events_are_keyed_per_instance() {
        let bus = NotificationBus::new();
        let (_i, mut other) = bus.add_status_listener(&key("n-2"));

        bus.broadcast_status(&key("n-1"), SubState::READY_ACK);

        assert!(other.try_recv().is_err());
    }

    #[tokio::test]
    async fn removed_listener_gets_nothing() {
        let bus = NotificationBus::new();
        let (id, mut rx) = bus.add_status_listener(&key("n-3"));
        bus.rm_status_listener(&key("n-3"), id);

        bus.broadcast_status(&key("n-3"), SubState::FAILURE);
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn clones_share_indices() {
        let bus = NotificationBus::new();
        let clone = bus.clone();
        let (_i, mut rx) = bus.add_status_listener(&key("n-4"));

        clone.broadcast_status(&key("n-4"), SubState::WAITING);
        assert_eq!(rx.recv().await, Some(SubState::WAITING));
    }

    #[tokio::test]
    async fn question_answer_round_trip() {
        let bus = NotificationBus::new();
        let agent = AgentKey::new(Did::new("agent-1"), ClientId::new("client-1"));
        let (_id, mut questions) = bus.add_answerer(&agent);

        let answering_bus = bus.clone();
        tokio::spawn(async move {
            let q = questions.recv().await.unwrap();
            answering_bus.send_answer(AgentAnswer {
                id: q.id,
                key: q.key,
                ready: true,
                info: "ok".into(),
            });
        });

        let q = AgentQuestion::new("q-1", agent, "conn-1", QuestionKind::Ping { info: "hi".into() });
        let answer = bus.send_question(q, Duration::from_secs(1)).await.unwrap();
        assert!(answer.ready);
        assert_eq!(answer.info, "ok");
    }
}
