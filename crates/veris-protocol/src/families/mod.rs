//! The built-in protocol families.
//!
//! One processor per family, each owning its creator, starter, handlers,
//! continuator, and status provider. State sequences per side:
//!
//! | Family | Initiator sends | Waits for | Terminal |
//! |--------|-----------------|-----------|----------|
//! | connect | Request (answering an invitation) | Response | Complete |
//! | issue-credential (issuer) | Offer, or accepts Propose | Request | Issue → ACK |
//! | issue-credential (holder) | Propose, or accepts Offer | Issue | ACK |
//! | present-proof (verifier) | Request, or accepts Propose | Presentation | ACK |
//! | present-proof (prover) | Propose, or accepts Request | Request | ACK |
//! | trust-ping | Ping | Pong | Pong received |
//! | basic-message | Message | — | Sent |

mod basic_message;
mod connect;
mod issue_credential;
mod present_proof;
mod trust_ping;

pub use basic_message::BasicMessageProcessor;
pub use connect::ConnectProcessor;
pub use issue_credential::IssueCredentialProcessor;
pub use present_proof::PresentProofProcessor;
pub use trust_ping::TrustPingProcessor;

use crate::{ProtocolFamily, ProtocolProcessor};
use std::sync::Arc;
use veris_psm::TaskData;

/// All five built-in processors.
#[must_use]
pub fn builtin() -> Vec<Arc<dyn ProtocolProcessor>> {
    vec![
        Arc::new(ConnectProcessor),
        Arc::new(IssueCredentialProcessor),
        Arc::new(PresentProofProcessor),
        Arc::new(TrustPingProcessor),
        Arc::new(BasicMessageProcessor),
    ]
}

/// The family a task belongs to.
#[must_use]
pub fn family_of(data: &TaskData) -> ProtocolFamily {
    match data {
        TaskData::Connect { .. } => ProtocolFamily::Connect,
        TaskData::IssueCredential { .. } => ProtocolFamily::IssueCredential,
        TaskData::PresentProof { .. } => ProtocolFamily::PresentProof,
        TaskData::TrustPing => ProtocolFamily::TrustPing,
        TaskData::BasicMessage { .. } => ProtocolFamily::BasicMessage,
    }
}
