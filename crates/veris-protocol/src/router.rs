//! The message router.
//!
//! A pure dispatcher: resolves the recipient agent, has the worker's pipe
//! decrypt the envelope, finds the handler, and hands over a [`Packet`].
//! The router never mutates persistent state; every routing failure
//! returns to the transport without touching any PSM.

use crate::{Engine, Packet, ProtocolError, ProtocolMsg, ProtocolRegistry};
use tracing::debug;
use veris_agent::{AgentRegistry, Envelope};

/// Routes one inbound envelope to its protocol handler.
///
/// # Errors
///
/// - [`ProtocolError::UnknownRecipient`] when no worker EA matches the
///   envelope's recipient key,
/// - [`ProtocolError::NoHandler`] for an unknown family or message type,
/// - whatever the handler itself surfaces.
pub async fn route(
    envelope: Envelope,
    agents: &AgentRegistry,
    registry: &ProtocolRegistry,
    engine: &Engine,
) -> Result<(), ProtocolError> {
    let agent = agents
        .resolve_recipient(&envelope.recipient)
        .map_err(ProtocolError::from_agent)?;

    let (plaintext, sender) = agent
        .worker
        .pipe
        .unpack(&envelope)
        .await
        .map_err(ProtocolError::from_agent)?;

    let payload: ProtocolMsg = serde_json::from_slice(&plaintext)
        .map_err(|e| ProtocolError::HandlerFailure(format!("malformed inner message: {e}")))?;

    let family = payload.msg_type.family().ok_or_else(|| ProtocolError::NoHandler {
        family: "none".to_string(),
        message_type: payload.msg_type.wire_name().to_string(),
    })?;
    let processor = registry.handler_for(family, payload.msg_type)?;

    let connection_id = agent
        .worker
        .pairwise
        .find_by_their_did(&sender)
        .map(|pw| pw.label.clone());

    debug!(
        msg_type = %payload.msg_type,
        thread = %payload.thread_id,
        worker = %agent.worker.did,
        "routing inbound message"
    );
    let packet = Packet::new(payload, agent, sender, connection_id);
    processor.handle(engine, packet).await
}
