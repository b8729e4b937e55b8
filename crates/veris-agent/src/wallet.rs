//! The anonymous-credential wallet contract.
//!
//! Key storage, master secrets, and the credential cryptography are an
//! external collaborator. This trait is the exact slice of it the protocol
//! processors consume: every blob is opaque to the agency and only flows
//! between wallet calls, protocol messages, and persisted representations.

use crate::AgentError;
use async_trait::async_trait;
use veris_types::{ProofRequest, RevealedAttribute};

/// Wallet operations the protocol families need.
///
/// All operations may block on external I/O and are therefore async.
#[async_trait]
pub trait Anoncreds: Send + Sync {
    /// Issuer: creates a credential offer for a credential definition.
    async fn create_cred_offer(&self, cred_def_id: &str) -> Result<String, AgentError>;

    /// Holder: creates a credential request answering an offer.
    async fn create_cred_request(&self, cred_offer: &str) -> Result<String, AgentError>;

    /// Issuer: issues the credential for a request, with coded values.
    async fn issue_credential(
        &self,
        cred_offer: &str,
        cred_request: &str,
        values: &str,
    ) -> Result<String, AgentError>;

    /// Holder: stores an issued credential.
    async fn store_credential(&self, credential: &str) -> Result<(), AgentError>;

    /// Prover: builds a presentation for a proof request, revealing the
    /// requested attributes.
    async fn create_presentation(
        &self,
        request: &ProofRequest,
    ) -> Result<Vec<RevealedAttribute>, AgentError>;

    /// Verifier: cryptographically verifies a presentation.
    async fn verify_presentation(
        &self,
        request: &ProofRequest,
        revealed: &[RevealedAttribute],
    ) -> Result<bool, AgentError>;
}
