//! Basic-message family: one-way text.

use crate::{
    Engine, FamilyStatus, Initial, MessageType, MsgBody, Packet, ProcessorDescriptor,
    ProtocolError, ProtocolFamily, ProtocolProcessor, Transition,
};
use async_trait::async_trait;
use chrono::Utc;
use veris_agent::CloudAgent;
use veris_psm::{Task, TaskData, TaskHeader};
use veris_types::{Nonce, Role, StateKey};

/// Processor for the basic-message family.
///
/// Fire-and-forget: the sender's machine finishes right after the send,
/// the receiver's right after receipt. There is no reply on the wire.
pub struct BasicMessageProcessor;

#[async_trait]
impl ProtocolProcessor for BasicMessageProcessor {
    fn family(&self) -> ProtocolFamily {
        ProtocolFamily::BasicMessage
    }

    fn descriptor(&self) -> ProcessorDescriptor {
        ProcessorDescriptor::new(
            ProtocolFamily::BasicMessage,
            vec![MessageType::BasicMessage],
            false,
            false,
        )
    }

    fn create_task(&self, header: TaskHeader, data: TaskData) -> Result<Task, ProtocolError> {
        if !matches!(data, TaskData::BasicMessage { .. }) {
            return Err(ProtocolError::HandlerFailure(
                "basic-message task with foreign payload".into(),
            ));
        }
        Ok(Task { header, data })
    }

    async fn start(
        &self,
        engine: &Engine,
        agent: &CloudAgent,
        task: Task,
    ) -> Result<(), ProtocolError> {
        let TaskData::BasicMessage { content } = task.data.clone() else {
            return Err(ProtocolError::HandlerFailure("not a basic-message task".into()));
        };
        engine
            .start_psm(
                Initial {
                    send_next: MessageType::BasicMessage,
                    waiting_next: MessageType::Terminate,
                    agent,
                    task,
                },
                |_key, msg| async move {
                    Ok(msg.with_body(MsgBody::Basic { content, sent_at: Utc::now() }))
                },
            )
            .await
    }

    async fn handle(&self, engine: &Engine, packet: Packet) -> Result<(), ProtocolError> {
        let connection_id = packet.require_connection()?;
        let MsgBody::Basic { content, .. } = packet.payload.body.clone() else {
            return Err(ProtocolError::HandlerFailure("basic-message without body".into()));
        };
        let task = Task {
            header: TaskHeader {
                nonce: Nonce::adopt(packet.payload.thread_id.as_str()),
                connection_id,
                role: Role::Addressee,
            },
            data: TaskData::BasicMessage { content },
        };
        engine
            .exec_psm(
                Transition {
                    packet,
                    send_next: MessageType::Terminate,
                    waiting_next: MessageType::Terminate,
                    task: Some(task),
                },
                |_conn, _inbound, out| async move { Ok((out, true)) },
            )
            .await
    }

    async fn resume(
        &self,
        _engine: &Engine,
        _agent: &CloudAgent,
        key: &StateKey,
        _ack: bool,
    ) -> Result<(), ProtocolError> {
        Err(ProtocolError::ProtocolClosed(key.clone()))
    }

    async fn fill_status(
        &self,
        _engine: &Engine,
        _key: &StateKey,
    ) -> Result<FamilyStatus, ProtocolError> {
        Ok(FamilyStatus::None)
    }
}
