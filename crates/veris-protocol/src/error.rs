//! The protocol-layer error taxonomy.

use thiserror::Error;
use veris_agent::AgentError;
use veris_psm::StoreError;
use veris_types::{ErrorCode, StateKey};

/// Errors of the router, registry, and engine.
///
/// Propagation policy:
///
/// - Routing errors (`UnknownRecipient`, `NoHandler`) return to the
///   transport and never touch the PSM.
/// - Transport, handler, and callback errors inside a transition produce a
///   `FAILURE` entry and a bus event; the run stream surfaces `Err`.
/// - Persistence errors propagate with no compensating entry; the store
///   is assumed inconsistent for that key and needs an operator.
#[derive(Debug, Error)]
pub enum ProtocolError {
    /// No worker EA matches the envelope's recipient key.
    #[error("unknown recipient: {0}")]
    UnknownRecipient(String),

    /// No handler is registered for the protocol family and message type.
    #[error("no handler for {family}/{message_type}")]
    NoHandler {
        /// Family name of the inbound message.
        family: String,
        /// Wire type that had no handler.
        message_type: String,
    },

    /// `start_psm` was called for a key that already has a record.
    #[error("protocol already started for {0}")]
    DuplicateProtocol(StateKey),

    /// An inbound message arrived for a terminal PSM, or its thread id
    /// matches no active instance and the message does not open one.
    #[error("protocol closed for {0}")]
    ProtocolClosed(StateKey),

    /// The pipe failed to send; the protocol transitioned to `FAILURE`.
    #[error("transport failure: {0}")]
    TransportFailure(String),

    /// The store failed mid-transition. Fatal for the key.
    #[error("persistence failure: {0}")]
    PersistenceFailure(#[from] StoreError),

    /// The handler's business logic failed; the protocol transitioned to
    /// `FAILURE`.
    #[error("handler failure: {0}")]
    HandlerFailure(String),

    /// The service agent did not answer or answered malformed. Resolved as
    /// NACK inside transitions; surfaced only by direct callers.
    #[error("callback failure: {0}")]
    CallbackFailure(String),

    /// The caller's deadline elapsed.
    #[error("cancelled: {0}")]
    Cancelled(String),

    /// A protocol family was re-registered with a different descriptor.
    /// Init-time error only; the registry is immutable afterwards.
    #[error("conflicting registration for family {0}")]
    RegistryConflict(String),
}

impl ProtocolError {
    pub(crate) fn from_agent(e: AgentError) -> Self {
        match e {
            AgentError::UnknownRecipient(did) => Self::UnknownRecipient(did.to_string()),
            AgentError::Transport(msg) | AgentError::Envelope(msg) => Self::TransportFailure(msg),
            // Permanent for the connection; never the recoverable
            // transport variant.
            e @ AgentError::PairwiseNotFound(_) => Self::HandlerFailure(e.to_string()),
            other => Self::HandlerFailure(other.to_string()),
        }
    }
}

impl ErrorCode for ProtocolError {
    fn code(&self) -> &'static str {
        match self {
            Self::UnknownRecipient(_) => "PROT_UNKNOWN_RECIPIENT",
            Self::NoHandler { .. } => "PROT_NO_HANDLER",
            Self::DuplicateProtocol(_) => "PROT_DUPLICATE",
            Self::ProtocolClosed(_) => "PROT_CLOSED",
            Self::TransportFailure(_) => "PROT_TRANSPORT_FAILURE",
            Self::PersistenceFailure(_) => "PROT_PERSISTENCE_FAILURE",
            Self::HandlerFailure(_) => "PROT_HANDLER_FAILURE",
            Self::CallbackFailure(_) => "PROT_CALLBACK_FAILURE",
            Self::Cancelled(_) => "PROT_CANCELLED",
            Self::RegistryConflict(_) => "PROT_REGISTRY_CONFLICT",
        }
    }

    fn is_recoverable(&self) -> bool {
        matches!(self, Self::TransportFailure(_) | Self::Cancelled(_))
    }
}
