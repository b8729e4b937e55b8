//! Tasks: the serialized inputs of a protocol instance.
//!
//! A task carries what a starter needs: the role, the connection, and the
//! family-specific payload. Tasks are persisted inside every PSM entry so a
//! cold restart can rebuild handler context from the record alone.

use serde::{Deserialize, Serialize};
use veris_types::{CredentialAttribute, Did, Nonce, ProofAttribute, ProofPredicate, Role};

/// Connection invitation received out of band.
///
/// The invitation id doubles as the protocol nonce: the peer chose it, and
/// correlation must use the id the peer first sent.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConnectInvitation {
    /// Invitation id, adopted as the protocol thread id.
    pub id: String,
    /// Label the inviter displays for itself.
    pub label: String,
    /// Service endpoint of the inviter.
    pub endpoint: String,
    /// Recipient key for the first encrypted envelope.
    pub recipient_key: String,
}

/// Common fields of every task.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TaskHeader {
    /// Protocol thread id; becomes the [`StateKey`](veris_types::StateKey)
    /// nonce.
    pub nonce: Nonce,
    /// Pairwise connection the protocol runs over.
    pub connection_id: String,
    /// Which side this agent plays.
    pub role: Role,
}

/// Family-specific task payload.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "family", rename_all = "snake_case")]
pub enum TaskData {
    /// Establish a new pairwise connection from an invitation.
    Connect {
        /// The out-of-band invitation to answer.
        invitation: ConnectInvitation,
        /// Our label, shown to the peer.
        label: String,
    },
    /// Issue or receive a credential.
    IssueCredential {
        /// Credential definition the credential is issued against.
        cred_def_id: String,
        /// Attribute values to issue.
        attributes: Vec<CredentialAttribute>,
        /// Free-form comment carried in propose/offer messages.
        comment: String,
    },
    /// Request or present a proof.
    PresentProof {
        /// Attributes the verifier wants revealed.
        attributes: Vec<ProofAttribute>,
        /// Predicates the verifier wants proved.
        predicates: Vec<ProofPredicate>,
        /// Free-form comment.
        comment: String,
    },
    /// Liveness check over the pairwise.
    TrustPing,
    /// One-way text message.
    BasicMessage {
        /// Message content.
        content: String,
    },
}

impl TaskData {
    /// Name of the protocol family this payload belongs to.
    #[must_use]
    pub fn family_name(&self) -> &'static str {
        match self {
            Self::Connect { .. } => "connect",
            Self::IssueCredential { .. } => "issue-credential",
            Self::PresentProof { .. } => "present-proof",
            Self::TrustPing => "trust-ping",
            Self::BasicMessage { .. } => "basic-message",
        }
    }
}

/// One protocol task: header plus family payload.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Task {
    /// Common fields.
    pub header: TaskHeader,
    /// Family payload.
    pub data: TaskData,
}

impl Task {
    /// Creates a task with a fresh nonce.
    #[must_use]
    pub fn new(connection_id: impl Into<String>, role: Role, data: TaskData) -> Self {
        Self {
            header: TaskHeader {
                nonce: Nonce::new(),
                connection_id: connection_id.into(),
                role,
            },
            data,
        }
    }

    /// Creates a connect task.
    ///
    /// The invitation id is adopted as the nonce; the peer picked the
    /// thread id and every message of the instance must carry it.
    #[must_use]
    pub fn connect(
        connection_id: impl Into<String>,
        invitation: ConnectInvitation,
        label: impl Into<String>,
    ) -> Self {
        Self {
            header: TaskHeader {
                nonce: Nonce::adopt(invitation.id.clone()),
                connection_id: connection_id.into(),
                role: Role::Initiator,
            },
            data: TaskData::Connect {
                invitation,
                label: label.into(),
            },
        }
    }

    /// The nonce, i.e. the protocol thread id.
    #[must_use]
    pub fn nonce(&self) -> &Nonce {
        &self.header.nonce
    }

    /// Builds the state key for this task under the given worker.
    #[must_use]
    pub fn state_key(&self, worker_did: &Did) -> veris_types::StateKey {
        veris_types::StateKey::new(worker_did.clone(), self.header.nonce.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn connect_adopts_invitation_id() {
        let invitation = ConnectInvitation {
            id: "inv-77".into(),
            label: "issuer".into(),
            endpoint: "https://agency.example/a2a".into(),
            recipient_key: "vk-1".into(),
        };
        let task = Task::connect("conn-1", invitation, "holder");
        assert_eq!(task.nonce().as_str(), "inv-77");
        assert_eq!(task.header.role, Role::Initiator);
    }

    #[test]
    fn new_task_gets_fresh_nonce() {
        let a = Task::new("conn-1", Role::Initiator, TaskData::TrustPing);
        let b = Task::new("conn-1", Role::Initiator, TaskData::TrustPing);
        assert_ne!(a.nonce(), b.nonce());
    }

    #[test]
    fn task_round_trips_through_json() {
        let task = Task::new(
            "conn-9",
            Role::Addressee,
            TaskData::IssueCredential {
                cred_def_id: "cd:1".into(),
                attributes: vec![CredentialAttribute::new("email", "a@b")],
                comment: String::new(),
            },
        );
        let json = serde_json::to_string(&task).unwrap();
        let back: Task = serde_json::from_str(&json).unwrap();
        assert_eq!(back, task);
        assert_eq!(back.data.family_name(), "issue-credential");
    }
}
