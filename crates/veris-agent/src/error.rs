//! Agent-layer error types.

use thiserror::Error;
use veris_types::{Did, ErrorCode};

/// Errors from agents, pairwise channels, and transport.
#[derive(Debug, Error)]
pub enum AgentError {
    /// No worker EA in this agency matches the envelope's recipient key.
    #[error("unknown recipient {0}")]
    UnknownRecipient(Did),

    /// The pipe failed to send or receive. Not retried at this layer; the
    /// protocol transitions to failure and the peer re-drives or times out.
    #[error("transport failure: {0}")]
    Transport(String),

    /// The pipe failed to pack or unpack an envelope.
    #[error("envelope failure: {0}")]
    Envelope(String),

    /// A pairwise with the same label or DID already exists with different
    /// endpoints.
    #[error("pairwise conflict for label '{label}' on {my_did}")]
    PairwiseConflict {
        /// Our DID of the conflicting pairwise.
        my_did: Did,
        /// Label of the conflicting pairwise.
        label: String,
    },

    /// No pairwise matches the requested connection.
    #[error("no pairwise for connection '{0}'")]
    PairwiseNotFound(String),

    /// A cloud agent for the root DID is already registered; each CA is a
    /// singleton per served EA.
    #[error("agent for root {0} already registered")]
    DuplicateAgent(Did),

    /// The service-agent configuration names both an endpoint and an RPC
    /// client; the host must pick one.
    #[error("SA configuration sets both endpoint and rpc client")]
    SaConfigConflict,
}

impl ErrorCode for AgentError {
    fn code(&self) -> &'static str {
        match self {
            Self::UnknownRecipient(_) => "AGENT_UNKNOWN_RECIPIENT",
            Self::Transport(_) => "AGENT_TRANSPORT",
            Self::Envelope(_) => "AGENT_ENVELOPE",
            Self::PairwiseConflict { .. } => "AGENT_PAIRWISE_CONFLICT",
            Self::PairwiseNotFound(_) => "AGENT_PAIRWISE_NOT_FOUND",
            Self::DuplicateAgent(_) => "AGENT_DUPLICATE",
            Self::SaConfigConflict => "AGENT_SA_CONFIG_CONFLICT",
        }
    }

    fn is_recoverable(&self) -> bool {
        matches!(self, Self::Transport(_))
    }
}
