//! Protocol registry, router, and the PSM engine.
//!
//! This crate is where an envelope becomes a state transition:
//!
//! ```text
//!            ┌────────┐   lookup    ┌──────────┐
//! envelope ─►│ router │ ──────────► │ registry │
//!            └───┬────┘             └────┬─────┘
//!                │ Packet                │ processor
//!                ▼                       ▼
//!            ┌──────────────────────────────────┐
//!            │ engine: start / exec / resume    │
//!            │  per-key lock · append · fsync   │
//!            └───────┬──────────────────┬───────┘
//!                    │ events           │ envelopes
//!                    ▼                  ▼
//!               notification bus     outbound
//! ```
//!
//! The router is a pure dispatcher. The registry maps each protocol
//! family to its processor and is immutable after initialization. The
//! engine serializes transitions per `(worker DID, nonce)`, persists
//! every transition before anyone can observe it, and consults the
//! service agent at user-action states.
//!
//! # Hosting
//!
//! The host builds one [`Engine`] over its store, bus, and external
//! collaborators, one [`ProtocolRegistry`] (usually
//! [`ProtocolRegistry::with_builtin_families`]), and hands both to its
//! RPC server, which calls [`run`], [`resume`], [`status`], and
//! [`Engine::release`].

mod engine;
mod error;
pub mod families;
mod msg;
mod packet;
mod registry;
mod router;
mod run;

pub use engine::{Continuation, Engine, Initial, Transition};
pub use error::ProtocolError;
pub use msg::{MessageType, MsgBody, ProtocolFamily, ProtocolMsg};
pub use packet::Packet;
pub use registry::{FamilyStatus, ProcessorDescriptor, ProtocolProcessor, ProtocolRegistry};
pub use router::route;
pub use run::{resume, run, start_task, status, ProtocolState, ProtocolStatus, RunState};
