//! The unit handed from the router to a protocol handler.

use crate::ProtocolMsg;
use std::sync::Arc;
use veris_agent::CloudAgent;
use veris_types::Did;

/// One decrypted inbound message plus its receiving agent.
#[derive(Clone)]
pub struct Packet {
    /// The typed inner message.
    pub payload: ProtocolMsg,
    /// The agent whose worker received the envelope.
    pub receiver: Arc<CloudAgent>,
    /// Sender key DID the pipe recovered while unpacking.
    pub sender: Did,
    /// Label of the pairwise the message arrived over; `None` when no
    /// pairwise exists yet (protocol-opening connect messages).
    pub connection_id: Option<String>,
}

impl Packet {
    /// Creates a packet.
    #[must_use]
    pub fn new(
        payload: ProtocolMsg,
        receiver: Arc<CloudAgent>,
        sender: Did,
        connection_id: Option<String>,
    ) -> Self {
        Self {
            payload,
            receiver,
            sender,
            connection_id,
        }
    }

    /// The connection id, or a handler failure naming the message.
    ///
    /// # Errors
    ///
    /// [`crate::ProtocolError::HandlerFailure`] when the message arrived
    /// over no known pairwise but its handler requires one.
    pub fn require_connection(&self) -> Result<String, crate::ProtocolError> {
        self.connection_id.clone().ok_or_else(|| {
            crate::ProtocolError::HandlerFailure(format!(
                "{} arrived over no known pairwise",
                self.payload.msg_type
            ))
        })
    }
}

impl std::fmt::Debug for Packet {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Packet")
            .field("type", &self.payload.msg_type)
            .field("thread", &self.payload.thread_id)
            .field("receiver", &self.receiver.worker.did)
            .field("sender", &self.sender)
            .finish_non_exhaustive()
    }
}
