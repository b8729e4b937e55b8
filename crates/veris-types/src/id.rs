//! Identifier types for the agency.
//!
//! DIDs are opaque strings: the agency never parses a DID method, it only
//! routes and indexes by them. Nonces (protocol thread ids) are UUID-based
//! unless adopted from a peer, which happens for connection invitations
//! where the invitation id *is* the protocol nonce.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// A decentralized identifier.
///
/// Opaque to the agency: a DID names a key holder and nothing more. The
/// wallet (an external collaborator) owns key material; veris only indexes
/// pairwise maps and protocol state by DID value.
///
/// # Example
///
/// ```
/// use veris_types::Did;
///
/// let ca = Did::new("TNGkXBc7mq22HoQ2");
/// assert_eq!(ca.as_str(), "TNGkXBc7mq22HoQ2");
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Did(String);

impl Did {
    /// Wraps a DID string.
    #[must_use]
    pub fn new(did: impl Into<String>) -> Self {
        Self(did.into())
    }

    /// Returns the DID as a string slice.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for Did {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "did:{}", self.0)
    }
}

impl From<&str> for Did {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

/// Protocol thread id, shared end-to-end by one protocol instance.
///
/// The initiator chooses the nonce; every subsequent message of the instance
/// carries it as its thread id. For connection invitations the peer already
/// chose an id, so the nonce is *adopted* from the invitation instead of
/// generated; correlation must use the id the peer first sent.
///
/// # Example
///
/// ```
/// use veris_types::Nonce;
///
/// let fresh = Nonce::new();
/// let adopted = Nonce::adopt("d8a14bfe-1325-4c2a-8a29-32fc27b463e5");
/// assert_ne!(fresh, adopted);
/// assert_eq!(adopted.as_str(), "d8a14bfe-1325-4c2a-8a29-32fc27b463e5");
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Nonce(String);

#[allow(clippy::new_without_default)] // a Default would hide that every new() is a fresh instance
impl Nonce {
    /// Generates a fresh random nonce (UUID v4).
    #[must_use]
    pub fn new() -> Self {
        Self(Uuid::new_v4().to_string())
    }

    /// Adopts an id chosen by the peer (invitation id reuse).
    #[must_use]
    pub fn adopt(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Returns the nonce as a string slice.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for Nonce {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "thr:{}", self.0)
    }
}

/// Identifier for one client of the question stream.
///
/// A single agent may serve several concurrent clients (mobile app, admin
/// console); questions are fanned out per `(agent DID, client id)`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ClientId(String);

impl ClientId {
    /// Wraps a client id string.
    #[must_use]
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Returns the client id as a string slice.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for ClientId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "client:{}", self.0)
    }
}

/// Key of one protocol state machine instance.
///
/// `(worker DID, nonce)` uniquely identifies a protocol instance inside the
/// agency. Exactly one worker EA owns an active instance; all persisted
/// state and all bus events for the instance are keyed by this pair.
///
/// # Example
///
/// ```
/// use veris_types::{Did, Nonce, StateKey};
///
/// let key = StateKey::new(Did::new("worker-1"), Nonce::adopt("n-1"));
/// assert_eq!(key.to_string(), "did:worker-1/thr:n-1");
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct StateKey {
    /// DID of the worker EA that owns the instance.
    pub did: Did,
    /// Protocol thread id.
    pub nonce: Nonce,
}

impl StateKey {
    /// Creates a state key.
    #[must_use]
    pub fn new(did: Did, nonce: Nonce) -> Self {
        Self { did, nonce }
    }
}

impl std::fmt::Display for StateKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}/{}", self.did, self.nonce)
    }
}
