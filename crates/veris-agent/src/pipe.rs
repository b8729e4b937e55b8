//! Secure-pipe and transport contracts.
//!
//! Cryptography is an external collaborator: the wallet owns keys and the
//! pipe owns pack/unpack of DIDComm envelopes. These traits are the exact
//! surface the agency consumes; hosts plug in the real implementations,
//! tests plug in loopback doubles.

use crate::AgentError;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use veris_types::Did;

/// An encrypted envelope in flight.
///
/// The payload is opaque to the core; only the outer recipient DID is
/// readable, and the router keys on it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Envelope {
    /// DID of the worker EA the envelope is addressed to.
    pub recipient: Did,
    /// Encrypted payload bytes.
    pub payload: Vec<u8>,
}

/// Pack/unpack over one pairwise.
///
/// A pipe is bound to a pairwise: `my_did` decrypts what `their_did`
/// packed and vice versa.
#[async_trait]
pub trait SecurePipe: Send + Sync {
    /// Our DID of the pairwise.
    fn my_did(&self) -> &Did;

    /// The peer's DID of the pairwise.
    fn their_did(&self) -> &Did;

    /// Encrypts plaintext for the peer.
    ///
    /// # Errors
    ///
    /// [`AgentError::Envelope`] when the wallet rejects the operation.
    async fn pack(&self, plaintext: &[u8]) -> Result<Envelope, AgentError>;

    /// Decrypts an envelope addressed to us.
    ///
    /// Returns the plaintext and the sender's key DID, which routing uses
    /// to resolve the pairwise the message arrived over.
    ///
    /// # Errors
    ///
    /// [`AgentError::Envelope`] when the envelope is not for this pairwise
    /// or fails to decrypt.
    async fn unpack(&self, envelope: &Envelope) -> Result<(Vec<u8>, Did), AgentError>;
}

/// Delivery of packed envelopes to the peer's endpoint.
///
/// Send errors are not retried here: the PSM transitions to failure and
/// the peer is expected to re-drive or time out.
#[async_trait]
pub trait Outbound: Send + Sync {
    /// Delivers one envelope over the named pairwise connection.
    ///
    /// # Errors
    ///
    /// [`AgentError::Transport`] when delivery fails.
    async fn send(&self, connection_id: &str, envelope: Envelope) -> Result<(), AgentError>;
}

/// Creation of new secure pipes when a pairwise is being established.
///
/// The connect family needs a pipe before the pairwise exists: the wallet
/// derives keys for the peer named by an invitation or a connection
/// request, and hands back the pipe bound to them.
#[async_trait]
pub trait PipeFactory: Send + Sync {
    /// Builds the pipe from `worker` to the peer reachable at `endpoint`
    /// under `their` DID (or recipient key).
    ///
    /// # Errors
    ///
    /// [`AgentError::Envelope`] when the wallet cannot derive the pair.
    async fn pipe_to(
        &self,
        worker: &Did,
        their: &Did,
        endpoint: &str,
    ) -> Result<std::sync::Arc<dyn SecurePipe>, AgentError>;
}
