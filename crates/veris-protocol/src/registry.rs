//! The protocol registry.
//!
//! One processor per family, registered at startup and immutable
//! afterwards. The host builds the registry, registers its processors, and
//! shares it read-only; runtime lookup takes no lock.

use crate::{Engine, MessageType, Packet, ProtocolError, ProtocolFamily};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use tracing::info;
use veris_agent::CloudAgent;
use veris_psm::{Task, TaskData, TaskHeader};
use veris_types::{RevealedAttribute, StateKey};

/// Family-specific slice of a protocol status snapshot.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "family", rename_all = "snake_case")]
pub enum FamilyStatus {
    /// No family detail available.
    None,
    /// issue-credential detail.
    IssueCredential {
        /// Credential definition of the instance.
        cred_def_id: String,
        /// Attributes issued or requested.
        attributes: Vec<veris_types::CredentialAttribute>,
    },
    /// present-proof detail.
    PresentProof {
        /// Attributes the presentation revealed so far.
        attributes: Vec<RevealedAttribute>,
    },
    /// connect detail.
    Connect {
        /// Label of the established pairwise.
        label: String,
    },
}

/// Registration identity of a processor.
///
/// Handler functions are not comparable, so idempotent registration is
/// defined over this descriptor: re-registering an identical descriptor is
/// a no-op, a differing one is an init-time error.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProcessorDescriptor {
    /// The family served.
    pub family: ProtocolFamily,
    /// Message types handled, sorted.
    pub handled: Vec<MessageType>,
    /// Whether the family supports resume after a user action.
    pub resumable: bool,
    /// Whether the family fills protocol status detail.
    pub provides_status: bool,
}

impl ProcessorDescriptor {
    /// Creates a descriptor; `handled` is sorted for stable comparison.
    #[must_use]
    pub fn new(
        family: ProtocolFamily,
        mut handled: Vec<MessageType>,
        resumable: bool,
        provides_status: bool,
    ) -> Self {
        handled.sort();
        Self {
            family,
            handled,
            resumable,
            provides_status,
        }
    }
}

/// One protocol family's behavior: creator, starter, handlers,
/// continuator, and status provider in a single object.
#[async_trait]
pub trait ProtocolProcessor: Send + Sync {
    /// The family this processor serves.
    fn family(&self) -> ProtocolFamily;

    /// Registration identity.
    fn descriptor(&self) -> ProcessorDescriptor;

    /// Creator: validates inputs and builds the task a starter runs.
    ///
    /// # Errors
    ///
    /// [`ProtocolError::HandlerFailure`] when `data` does not belong to
    /// this family or misses required fields for the role.
    fn create_task(&self, header: TaskHeader, data: TaskData) -> Result<Task, ProtocolError>;

    /// Starter: opens a new protocol instance for a local task.
    async fn start(
        &self,
        engine: &Engine,
        agent: &CloudAgent,
        task: Task,
    ) -> Result<(), ProtocolError>;

    /// Handler: drives the instance for one inbound message.
    async fn handle(&self, engine: &Engine, packet: Packet) -> Result<(), ProtocolError>;

    /// Continuator: resumes an instance paused on a user decision.
    async fn resume(
        &self,
        engine: &Engine,
        agent: &CloudAgent,
        key: &StateKey,
        ack: bool,
    ) -> Result<(), ProtocolError>;

    /// Status provider: fills the family detail of a status snapshot.
    async fn fill_status(
        &self,
        engine: &Engine,
        key: &StateKey,
    ) -> Result<FamilyStatus, ProtocolError>;
}

/// Process-wide mapping from family to processor.
///
/// Mutable only while the host initializes it; lookups afterwards are
/// read-only on the immutable map.
#[derive(Default)]
pub struct ProtocolRegistry {
    entries: HashMap<ProtocolFamily, Arc<dyn ProtocolProcessor>>,
}

impl ProtocolRegistry {
    /// Creates an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a registry with all five built-in families registered.
    #[must_use]
    pub fn with_builtin_families() -> Self {
        let mut registry = Self::new();
        for processor in crate::families::builtin() {
            registry
                .register(processor)
                .unwrap_or_else(|_| unreachable!("builtin families register once"));
        }
        registry
    }

    /// Registers a processor for its family.
    ///
    /// Re-registering an identical descriptor is a no-op.
    ///
    /// # Errors
    ///
    /// [`ProtocolError::RegistryConflict`] when the family is already
    /// registered with a different descriptor.
    pub fn register(&mut self, processor: Arc<dyn ProtocolProcessor>) -> Result<(), ProtocolError> {
        let family = processor.family();
        if let Some(existing) = self.entries.get(&family) {
            if existing.descriptor() == processor.descriptor() {
                return Ok(());
            }
            return Err(ProtocolError::RegistryConflict(family.name().to_string()));
        }
        info!(%family, "protocol family registered");
        self.entries.insert(family, processor);
        Ok(())
    }

    /// Looks up the processor of a family.
    #[must_use]
    pub fn processor(&self, family: ProtocolFamily) -> Option<Arc<dyn ProtocolProcessor>> {
        self.entries.get(&family).cloned()
    }

    /// Looks up the handler for an inbound message.
    ///
    /// # Errors
    ///
    /// [`ProtocolError::NoHandler`] when the family is unregistered or the
    /// processor does not handle the message type.
    pub fn handler_for(
        &self,
        family: ProtocolFamily,
        msg_type: MessageType,
    ) -> Result<Arc<dyn ProtocolProcessor>, ProtocolError> {
        let no_handler = || ProtocolError::NoHandler {
            family: family.name().to_string(),
            message_type: msg_type.wire_name().to_string(),
        };
        let processor = self.entries.get(&family).ok_or_else(no_handler)?;
        if !processor.descriptor().handled.contains(&msg_type) {
            return Err(no_handler());
        }
        Ok(Arc::clone(processor))
    }

    /// Number of registered families.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Returns `true` when nothing is registered.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl std::fmt::Debug for ProtocolRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProtocolRegistry")
            .field("families", &self.entries.keys().collect::<Vec<_>>())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct DummyProcessor {
        family: ProtocolFamily,
        handled: Vec<MessageType>,
    }

    #[async_trait]
    impl ProtocolProcessor for DummyProcessor {
        fn family(&self) -> ProtocolFamily {
            self.family
        }

        fn descriptor(&self) -> ProcessorDescriptor {
            ProcessorDescriptor::new(self.family, self.handled.clone(), false, false)
        }

        fn create_task(&self, header: TaskHeader, data: TaskData) -> Result<Task, ProtocolError> {
            Ok(Task { header, data })
        }

        async fn start(
            &self,
            _engine: &Engine,
            _agent: &CloudAgent,
            _task: Task,
        ) -> Result<(), ProtocolError> {
            Ok(())
        }

        async fn handle(&self, _engine: &Engine, _packet: Packet) -> Result<(), ProtocolError> {
            Ok(())
        }

        async fn resume(
            &self,
            _engine: &Engine,
            _agent: &CloudAgent,
            _key: &StateKey,
            _ack: bool,
        ) -> Result<(), ProtocolError> {
            Ok(())
        }

        async fn fill_status(
            &self,
            _engine: &Engine,
            _key: &StateKey,
        ) -> Result<FamilyStatus, ProtocolError> {
            Ok(FamilyStatus::None)
        }
    }

    fn ping_processor(handled: Vec<MessageType>) -> Arc<dyn ProtocolProcessor> {
        Arc::new(DummyProcessor { family: ProtocolFamily::TrustPing, handled })
    }

    #[test]
    fn identical_reregistration_is_a_no_op() {
        let mut registry = ProtocolRegistry::new();
        registry
            .register(ping_processor(vec![MessageType::Ping, MessageType::Pong]))
            .unwrap();
        registry
            .register(ping_processor(vec![MessageType::Pong, MessageType::Ping]))
            .unwrap();
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn differing_reregistration_is_an_error() {
        let mut registry = ProtocolRegistry::new();
        registry
            .register(ping_processor(vec![MessageType::Ping, MessageType::Pong]))
            .unwrap();

        let err = registry
            .register(ping_processor(vec![MessageType::Ping]))
            .unwrap_err();
        assert!(matches!(err, ProtocolError::RegistryConflict(_)));
    }

    #[test]
    fn handler_lookup_checks_the_message_type() {
        let mut registry = ProtocolRegistry::new();
        registry
            .register(ping_processor(vec![MessageType::Ping]))
            .unwrap();

        assert!(registry
            .handler_for(ProtocolFamily::TrustPing, MessageType::Ping)
            .is_ok());
        assert!(matches!(
            registry.handler_for(ProtocolFamily::TrustPing, MessageType::Pong),
            Err(ProtocolError::NoHandler { .. })
        ));
        assert!(matches!(
            registry.handler_for(ProtocolFamily::Connect, MessageType::ConnRequest),
            Err(ProtocolError::NoHandler { .. })
        ));
    }

    #[test]
    fn builtin_families_cover_all_five() {
        let registry = ProtocolRegistry::with_builtin_families();
        assert_eq!(registry.len(), 5);
        for family in [
            ProtocolFamily::Connect,
            ProtocolFamily::IssueCredential,
            ProtocolFamily::PresentProof,
            ProtocolFamily::TrustPing,
            ProtocolFamily::BasicMessage,
        ] {
            assert!(registry.processor(family).is_some(), "{family} missing");
        }
    }
}
