//! Trust-ping family: liveness over a pairwise.

use crate::{
    Engine, FamilyStatus, Initial, MessageType, MsgBody, Packet, ProcessorDescriptor,
    ProtocolError, ProtocolFamily, ProtocolProcessor, Transition,
};
use async_trait::async_trait;
use veris_agent::CloudAgent;
use veris_psm::{Task, TaskData, TaskHeader};
use veris_types::{Nonce, Role, StateKey};

/// Processor for the trust-ping family.
///
/// The initiator sends a ping and finishes on the pong; the addressee
/// pongs and finishes immediately after the send. No user action is ever
/// pending.
pub struct TrustPingProcessor;

#[async_trait]
impl ProtocolProcessor for TrustPingProcessor {
    fn family(&self) -> ProtocolFamily {
        ProtocolFamily::TrustPing
    }

    fn descriptor(&self) -> ProcessorDescriptor {
        ProcessorDescriptor::new(
            ProtocolFamily::TrustPing,
            vec![MessageType::Ping, MessageType::Pong],
            false,
            false,
        )
    }

    fn create_task(&self, header: TaskHeader, data: TaskData) -> Result<Task, ProtocolError> {
        if !matches!(data, TaskData::TrustPing) {
            return Err(ProtocolError::HandlerFailure(
                "trust-ping task with foreign payload".into(),
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
        engine
            .start_psm(
                Initial {
                    send_next: MessageType::Ping,
                    waiting_next: MessageType::Pong,
                    agent,
                    task,
                },
                |_key, msg| async move { Ok(msg.with_body(MsgBody::Ping { info: String::new() })) },
            )
            .await
    }

    async fn handle(&self, engine: &Engine, packet: Packet) -> Result<(), ProtocolError> {
        match packet.payload.msg_type {
            MessageType::Ping => {
                let connection_id = packet.require_connection()?;
                let task = Task {
                    header: TaskHeader {
                        nonce: Nonce::adopt(packet.payload.thread_id.as_str()),
                        connection_id,
                        role: Role::Addressee,
                    },
                    data: TaskData::TrustPing,
                };
                engine
                    .exec_psm(
                        Transition {
                            packet,
                            send_next: MessageType::Pong,
                            waiting_next: MessageType::Terminate,
                            task: Some(task),
                        },
                        |_conn, _inbound, out| async move { Ok((out, true)) },
                    )
                    .await
            }
            MessageType::Pong => {
                engine
                    .exec_psm(
                        Transition {
                            packet,
                            send_next: MessageType::Terminate,
                            waiting_next: MessageType::Terminate,
                            task: None,
                        },
                        |_conn, _inbound, out| async move { Ok((out, true)) },
                    )
                    .await
            }
            other => Err(ProtocolError::NoHandler {
                family: ProtocolFamily::TrustPing.name().into(),
                message_type: other.wire_name().into(),
            }),
        }
    }

    async fn resume(
        &self,
        _engine: &Engine,
        _agent: &CloudAgent,
        key: &StateKey,
        _ack: bool,
    ) -> Result<(), ProtocolError> {
        // No ping state waits on a user decision.
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
