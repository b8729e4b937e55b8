//! Protocol role.

use serde::{Deserialize, Serialize};

/// Which side of a protocol instance this agent plays.
///
/// The initiator chose the nonce and sent the opening message; the addressee
/// received it. Several type-id lookups depend on the role: for the issue
/// credential family the initiator is the issuer sending an offer while the
/// addressee is the holder proposing, and for present proof the initiator is
/// the verifier requesting while the addressee is the prover proposing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Role {
    /// This agent opened the protocol instance.
    Initiator,
    /// The remote peer opened the protocol instance.
    Addressee,
}

impl Role {
    /// Returns `true` for [`Role::Initiator`].
    #[must_use]
    pub fn is_initiator(self) -> bool {
        matches!(self, Self::Initiator)
    }
}

impl std::fmt::Display for Role {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Initiator => write!(f, "initiator"),
            Self::Addressee => write!(f, "addressee"),
        }
    }
}
