//! Per-family protocol representations.
//!
//! A representation holds the family-specific artifacts a protocol instance
//! accumulates: the credential offer blob, the proof-request JSON, the
//! revealed attributes. Records are created by starters and mutated only by
//! that family's handlers, keyed by the same `(worker DID, nonce)` as the
//! PSM record itself.

use serde::{Deserialize, Serialize};
use veris_types::{CredentialAttribute, ProofRequest, RevealedAttribute, StateKey};

/// Artifacts of one issue-credential instance.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IssueCredRep {
    /// Instance key.
    pub key: StateKey,
    /// Credential definition issued against.
    pub cred_def_id: String,
    /// Attribute values as coded preview values.
    pub values: String,
    /// Wallet-produced credential offer blob. Empty on the holder side
    /// until the offer arrives.
    pub cred_offer: String,
    /// The attributes issued or requested.
    pub attributes: Vec<CredentialAttribute>,
}

/// Artifacts of one present-proof instance.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PresentProofRep {
    /// Instance key.
    pub key: StateKey,
    /// Free-form values recorded by the starter.
    pub values: String,
    /// The proof request, present on the verifier side from the start and
    /// on the prover side once the request arrives.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub proof_request: Option<ProofRequest>,
    /// `true` when this side opened with a propose.
    pub we_proposed: bool,
    /// Attributes revealed by the presentation; filled by the verifier's
    /// presentation handler.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub attributes: Vec<RevealedAttribute>,
}
