//! Credential and proof attribute payload types.
//!
//! These are the named-field payloads tasks and protocol representations
//! carry. The anonymous-credential primitives themselves (blinding, proofs)
//! live in the wallet, an external collaborator; veris moves these values
//! between tasks, protocol messages, and persisted records.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// One attribute of a credential to be issued.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CredentialAttribute {
    /// Attribute name, e.g. `email`.
    pub name: String,
    /// Attribute value as a string.
    pub value: String,
    /// MIME type of the value. Some peer implementations require it, so
    /// starters default a missing type to `text/plain`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mime_type: Option<String>,
}

impl CredentialAttribute {
    /// Creates a plain-text attribute.
    #[must_use]
    pub fn new(name: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            value: value.into(),
            mime_type: None,
        }
    }
}

/// One attribute a verifier wants proved.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProofAttribute {
    /// Explicit referent id. Generated (`attr_referent_N`) when absent.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    /// Attribute name, e.g. `email`.
    pub name: String,
    /// Restrict the proof to credentials of this definition.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cred_def_id: Option<String>,
}

impl ProofAttribute {
    /// Creates an unrestricted proof attribute.
    #[must_use]
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            id: None,
            name: name.into(),
            cred_def_id: None,
        }
    }
}

/// One predicate a verifier wants proved (e.g. `age >= 18`).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProofPredicate {
    /// Explicit referent id. Generated (`predicate_N`) when absent.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    /// Attribute name the predicate ranges over.
    pub name: String,
    /// Predicate type, e.g. `>=`.
    pub p_type: String,
    /// Predicate bound.
    pub p_value: i64,
}

/// Requested attribute inside a [`ProofRequest`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AttrInfo {
    /// Attribute name.
    pub name: String,
    /// Credential-definition restrictions; empty means unrestricted.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub restrictions: Vec<RestrictionFilter>,
}

/// Requested predicate inside a [`ProofRequest`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PredicateInfo {
    /// Attribute name the predicate ranges over.
    pub name: String,
    /// Predicate type, e.g. `>=`.
    pub p_type: String,
    /// Predicate bound.
    pub p_value: i64,
}

/// Restriction on which credentials may satisfy a requested attribute.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RestrictionFilter {
    /// Credential definition id the credential must come from.
    pub cred_def_id: String,
}

/// A proof request as sent to the prover.
///
/// Referents are stored in ordered maps so a request generated twice from
/// the same task serializes identically.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProofRequest {
    /// Human-readable request name.
    pub name: String,
    /// Request format version.
    pub version: String,
    /// Proof-level nonce. Distinct from the protocol thread id: the Aries
    /// message format forbids sharing one nonce between proof and thread.
    pub nonce: String,
    /// Requested attributes by referent.
    pub requested_attributes: BTreeMap<String, AttrInfo>,
    /// Requested predicates by referent.
    pub requested_predicates: BTreeMap<String, PredicateInfo>,
}

/// An attribute value revealed by a presentation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RevealedAttribute {
    /// Referent the value answers.
    pub referent: String,
    /// Attribute name.
    pub name: String,
    /// Raw revealed value.
    pub value: String,
}
