//! Typed protocol messages.
//!
//! The concrete Aries wire format is an external concern; the agency works
//! with typed payloads carrying named fields. Every message of a protocol
//! instance carries the instance's thread id, the nonce of its
//! [`StateKey`](veris_types::StateKey).

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use veris_types::{CredentialAttribute, Nonce, ProofAttribute, ProofRequest, RevealedAttribute};

/// The five protocol families the agency speaks.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ProtocolFamily {
    /// Pairwise establishment.
    Connect,
    /// Credential issuance.
    IssueCredential,
    /// Proof presentation.
    PresentProof,
    /// Liveness ping.
    TrustPing,
    /// One-way text message.
    BasicMessage,
}

impl ProtocolFamily {
    /// The family's wire name.
    #[must_use]
    pub fn name(self) -> &'static str {
        match self {
            Self::Connect => "connect",
            Self::IssueCredential => "issue-credential",
            Self::PresentProof => "present-proof",
            Self::TrustPing => "trust-ping",
            Self::BasicMessage => "basic-message",
        }
    }
}

impl std::fmt::Display for ProtocolFamily {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

/// Every message type the agency routes, plus the [`Terminate`] sentinel.
///
/// [`Terminate`]: Self::Terminate
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum MessageType {
    /// connect: out-of-band invitation.
    ConnInvitation,
    /// connect: connection request.
    ConnRequest,
    /// connect: connection response.
    ConnResponse,
    /// connect: completion ack.
    ConnComplete,
    /// issue-credential: holder proposes.
    CredPropose,
    /// issue-credential: issuer offers.
    CredOffer,
    /// issue-credential: holder requests.
    CredRequest,
    /// issue-credential: issuer issues.
    CredIssue,
    /// issue-credential: holder acks.
    CredAck,
    /// issue-credential: rejection.
    CredNack,
    /// present-proof: prover proposes.
    ProofPropose,
    /// present-proof: verifier requests.
    ProofRequest,
    /// present-proof: prover presents.
    ProofPresentation,
    /// present-proof: verifier acks.
    ProofAck,
    /// present-proof: rejection.
    ProofNack,
    /// trust-ping: ping.
    Ping,
    /// trust-ping: pong.
    Pong,
    /// basic-message: the message.
    BasicMessage,
    /// Sentinel: the transition sends nothing and the machine terminates.
    Terminate,
}

impl MessageType {
    /// The family the type belongs to; `None` for [`Self::Terminate`].
    #[must_use]
    pub fn family(self) -> Option<ProtocolFamily> {
        match self {
            Self::ConnInvitation | Self::ConnRequest | Self::ConnResponse | Self::ConnComplete => {
                Some(ProtocolFamily::Connect)
            }
            Self::CredPropose
            | Self::CredOffer
            | Self::CredRequest
            | Self::CredIssue
            | Self::CredAck
            | Self::CredNack => Some(ProtocolFamily::IssueCredential),
            Self::ProofPropose
            | Self::ProofRequest
            | Self::ProofPresentation
            | Self::ProofAck
            | Self::ProofNack => Some(ProtocolFamily::PresentProof),
            Self::Ping | Self::Pong => Some(ProtocolFamily::TrustPing),
            Self::BasicMessage => Some(ProtocolFamily::BasicMessage),
            Self::Terminate => None,
        }
    }

    /// `family/type` wire name, recorded in PSM entries.
    #[must_use]
    pub fn wire_name(self) -> &'static str {
        match self {
            Self::ConnInvitation => "connect/invitation",
            Self::ConnRequest => "connect/request",
            Self::ConnResponse => "connect/response",
            Self::ConnComplete => "connect/complete",
            Self::CredPropose => "issue-credential/propose",
            Self::CredOffer => "issue-credential/offer",
            Self::CredRequest => "issue-credential/request",
            Self::CredIssue => "issue-credential/issue",
            Self::CredAck => "issue-credential/ack",
            Self::CredNack => "issue-credential/nack",
            Self::ProofPropose => "present-proof/propose",
            Self::ProofRequest => "present-proof/request",
            Self::ProofPresentation => "present-proof/presentation",
            Self::ProofAck => "present-proof/ack",
            Self::ProofNack => "present-proof/nack",
            Self::Ping => "trust-ping/ping",
            Self::Pong => "trust-ping/pong",
            Self::BasicMessage => "basic-message/message",
            Self::Terminate => "terminate",
        }
    }
}

impl std::fmt::Display for MessageType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.wire_name())
    }
}

/// Named-field payload of one message.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum MsgBody {
    /// No payload (acks, pongs, completion).
    #[default]
    Empty,
    /// connect/request.
    ConnRequest {
        /// Requester's label.
        label: String,
        /// Requester's pairwise DID.
        did: String,
        /// Requester's service endpoint.
        endpoint: String,
    },
    /// connect/response.
    ConnResponse {
        /// Responder's pairwise DID.
        did: String,
        /// Responder's service endpoint.
        endpoint: String,
    },
    /// issue-credential/propose.
    CredPropose {
        /// Credential definition proposed against.
        cred_def_id: String,
        /// Proposed attribute values.
        preview: Vec<CredentialAttribute>,
        /// Free-form comment.
        comment: String,
    },
    /// issue-credential/offer.
    CredOffer {
        /// Credential definition offered against.
        cred_def_id: String,
        /// Wallet-produced offer blob, opaque here.
        offer: String,
        /// Offered attribute values.
        preview: Vec<CredentialAttribute>,
    },
    /// issue-credential/request.
    CredRequest {
        /// Wallet-produced request blob, opaque here.
        request: String,
    },
    /// issue-credential/issue.
    CredIssue {
        /// The issued credential blob, opaque here.
        credential: String,
    },
    /// present-proof/propose.
    ProofPropose {
        /// Proposed attributes.
        attributes: Vec<ProofAttribute>,
        /// Free-form comment.
        comment: String,
    },
    /// present-proof/request.
    ProofRequest {
        /// The request the prover must answer.
        request: ProofRequest,
    },
    /// present-proof/presentation.
    ProofPresentation {
        /// Revealed attribute values.
        revealed: Vec<RevealedAttribute>,
    },
    /// Generic rejection (cred/nack, proof/nack).
    Nack {
        /// Why the step was rejected.
        reason: String,
    },
    /// trust-ping/ping.
    Ping {
        /// Free-form ping payload.
        info: String,
    },
    /// basic-message/message.
    Basic {
        /// Message text.
        content: String,
        /// Sender-side timestamp.
        sent_at: DateTime<Utc>,
    },
}

/// One typed protocol message in flight.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProtocolMsg {
    /// Message type.
    pub msg_type: MessageType,
    /// Thread id; equals the instance's nonce, always.
    pub thread_id: Nonce,
    /// Named-field payload.
    pub body: MsgBody,
}

impl ProtocolMsg {
    /// Creates a message with an empty body.
    #[must_use]
    pub fn new(msg_type: MessageType, thread_id: Nonce) -> Self {
        Self {
            msg_type,
            thread_id,
            body: MsgBody::Empty,
        }
    }

    /// Sets the body.
    #[must_use]
    pub fn with_body(mut self, body: MsgBody) -> Self {
        self.body = body;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn every_type_has_a_family_except_terminate() {
        assert_eq!(MessageType::CredOffer.family(), Some(ProtocolFamily::IssueCredential));
        assert_eq!(MessageType::Pong.family(), Some(ProtocolFamily::TrustPing));
        assert_eq!(MessageType::Terminate.family(), None);
    }

    #[test]
    fn wire_names_carry_the_family() {
        assert_eq!(MessageType::ProofPresentation.wire_name(), "present-proof/presentation");
        assert_eq!(MessageType::ConnRequest.wire_name(), "connect/request");
    }

    #[test]
    fn message_round_trips_through_json() {
        let msg = ProtocolMsg::new(MessageType::Ping, Nonce::adopt("n-1"))
            .with_body(MsgBody::Ping { info: "hello".into() });
        let bytes = serde_json::to_vec(&msg).unwrap();
        let back: ProtocolMsg = serde_json::from_slice(&bytes).unwrap();
        assert_eq!(back, msg);
        assert_eq!(back.thread_id.as_str(), "n-1");
    }
}
