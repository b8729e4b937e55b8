//! Protocol state machine records and durable storage.
//!
//! One PSM record exists per protocol instance, keyed by
//! [`StateKey`](veris_types::StateKey). The record is an append-only log of
//! [`PsmState`] entries; the last entry is the authoritative current state.
//! The engine (in `veris-protocol`) drives transitions; this crate owns what
//! a transition *is* and how it is made durable.
//!
//! # Substates
//!
//! ```text
//!            ┌─────────┐   send ok    ┌─────────┐  inbound   ┌─────────┐
//!  start ───►│ SENDING │─────────────►│ WAITING │───────────►│ SENDING │──┐
//!            └────┬────┘              └─────────┘            └────┬────┘  │
//!                 │ send/handler error                           ...      │
//!                 ▼                                                       ▼
//!            ┌─────────┐                              ┌───────────────────────┐
//!            │ FAILURE │                              │ READY_ACK / READY_NACK │
//!            └─────────┘                              └───────────────────────┘
//! ```
//!
//! `READY_ACK` and `READY_NACK` are absorbing for protocol logic; an
//! `ARCHIVING` overlay may still be added on top of any terminal state.
//!
//! # Durability
//!
//! [`PsmStore`] implementations must make every write atomic: a partially
//! written record is never observable. [`FileStore`] writes to a temp file,
//! fsyncs, then renames; [`MemoryStore`] backs tests. Callers emit bus
//! events only after the store call returns.

mod error;
mod locks;
mod record;
mod reps;
mod store;
mod substate;
mod task;

pub use error::StoreError;
pub use locks::KeyLocks;
pub use record::{Psm, PsmState};
pub use reps::{IssueCredRep, PresentProofRep};
pub use store::{FileStore, MemoryStore, PsmStore};
pub use substate::SubState;
pub use task::{ConnectInvitation, Task, TaskData, TaskHeader};
