//! Cloud agents and their collaborators.
//!
//! Every served edge agent (EA) is represented in the agency by a pair:
//!
//! ```text
//! ┌───────────────────────────────────────────────┐
//! │ CloudAgent (CA)     root DID, CA DID          │
//! │   owns ──► Worker (w-EA)   worker DID         │
//! │              │  pairwise map (by DID / label) │
//! │              │  secure pipes to peers         │
//! │   sa: ServiceAgent (decision authority)       │
//! └───────────────────────────────────────────────┘
//! ```
//!
//! The CA exclusively owns the worker's lifecycle; the worker keeps only
//! the CA's DID as a lookup back-reference. A CA is a singleton per served
//! EA; the [`AgentRegistry`] enforces this by root DID at registration.
//!
//! Cryptography lives elsewhere: the [`SecurePipe`] and [`Outbound`] traits
//! are the contracts the agency consumes from the wallet/pipe layer, and
//! everything here treats envelope payloads as opaque bytes.

mod agent;
mod config;
mod error;
mod pairwise;
mod pipe;
mod sa;
pub mod testing;
mod wallet;

pub use agent::{AgentRegistry, CloudAgent, Worker};
pub use config::{SaConfig, PERMISSIVE_SA};
pub use error::AgentError;
pub use pairwise::{Pairwise, PairwiseMap};
pub use pipe::{Envelope, Outbound, PipeFactory, SecurePipe};
pub use sa::{SaVerdict, ServiceAgent};
pub use wallet::Anoncreds;
