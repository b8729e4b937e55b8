//! Connect family: pairwise establishment from an out-of-band invitation.
//!
//! The invitation id is the protocol nonce: the peer chose the thread id
//! and every message of the instance must carry it.

use crate::{
    Engine, FamilyStatus, Initial, MessageType, MsgBody, Packet, ProcessorDescriptor,
    ProtocolError, ProtocolFamily, ProtocolProcessor, Transition,
};
use async_trait::async_trait;
use veris_agent::CloudAgent;
use veris_psm::{ConnectInvitation, Task, TaskData, TaskHeader};
use veris_types::{Did, Nonce, Role, StateKey};

/// Processor for the connect family.
pub struct ConnectProcessor;

impl ConnectProcessor {
    /// Derives the pairwise pipe for a peer and indexes it under the
    /// connection label.
    async fn establish_pairwise(
        engine: &Engine,
        agent: &CloudAgent,
        their: &Did,
        endpoint: &str,
        label: &str,
    ) -> Result<(), ProtocolError> {
        let worker = &agent.worker;
        let pipe = engine
            .pipes()
            .pipe_to(&worker.did, their, endpoint)
            .await
            .map_err(ProtocolError::from_agent)?;
        let my_did = pipe.my_did().clone();
        worker
            .pairwise
            .add(my_did, their.clone(), label, pipe)
            .map_err(ProtocolError::from_agent)?;
        Ok(())
    }
}

#[async_trait]
impl ProtocolProcessor for ConnectProcessor {
    fn family(&self) -> ProtocolFamily {
        ProtocolFamily::Connect
    }

    fn descriptor(&self) -> ProcessorDescriptor {
        ProcessorDescriptor::new(
            ProtocolFamily::Connect,
            vec![
                MessageType::ConnRequest,
                MessageType::ConnResponse,
                MessageType::ConnComplete,
            ],
            false,
            true,
        )
    }

    fn create_task(&self, header: TaskHeader, data: TaskData) -> Result<Task, ProtocolError> {
        let TaskData::Connect { invitation, label } = data else {
            return Err(ProtocolError::HandlerFailure(
                "connect task with foreign payload".into(),
            ));
        };
        // Correlate strictly by the id the peer first sent.
        let header = TaskHeader {
            nonce: Nonce::adopt(invitation.id.clone()),
            ..header
        };
        Ok(Task {
            header,
            data: TaskData::Connect { invitation, label },
        })
    }

    async fn start(
        &self,
        engine: &Engine,
        agent: &CloudAgent,
        task: Task,
    ) -> Result<(), ProtocolError> {
        let TaskData::Connect { invitation, label } = task.data.clone() else {
            return Err(ProtocolError::HandlerFailure("not a connect task".into()));
        };
        Self::establish_pairwise(
            engine,
            agent,
            &Did::new(invitation.recipient_key.clone()),
            &invitation.endpoint,
            &task.header.connection_id,
        )
        .await?;

        let our_label = label;
        let our_did = agent.worker.did.clone();
        let our_endpoint = agent.endpoint.clone();
        engine
            .start_psm(
                Initial {
                    send_next: MessageType::ConnRequest,
                    waiting_next: MessageType::ConnResponse,
                    agent,
                    task,
                },
                |_key, msg| async move {
                    Ok(msg.with_body(MsgBody::ConnRequest {
                        label: our_label,
                        did: our_did.as_str().to_string(),
                        endpoint: our_endpoint,
                    }))
                },
            )
            .await
    }

    async fn handle(&self, engine: &Engine, packet: Packet) -> Result<(), ProtocolError> {
        match packet.payload.msg_type {
            MessageType::ConnRequest => {
                let MsgBody::ConnRequest { label, did, endpoint } = packet.payload.body.clone()
                else {
                    return Err(ProtocolError::HandlerFailure("connect request without body".into()));
                };
                let agent = &packet.receiver;
                Self::establish_pairwise(engine, agent, &Did::new(did.clone()), &endpoint, &label)
                    .await?;

                let thread = packet.payload.thread_id.as_str().to_string();
                let task = Task {
                    header: TaskHeader {
                        nonce: Nonce::adopt(thread.clone()),
                        connection_id: label.clone(),
                        role: Role::Addressee,
                    },
                    data: TaskData::Connect {
                        invitation: ConnectInvitation {
                            id: thread,
                            label: label.clone(),
                            endpoint,
                            recipient_key: did,
                        },
                        label,
                    },
                };
                let our_did = packet.receiver.worker.did.clone();
                let our_endpoint = packet.receiver.endpoint.clone();
                engine
                    .exec_psm(
                        Transition {
                            packet,
                            send_next: MessageType::ConnResponse,
                            waiting_next: MessageType::ConnComplete,
                            task: Some(task),
                        },
                        |_conn, _inbound, out| async move {
                            let out = out.with_body(MsgBody::ConnResponse {
                                did: our_did.as_str().to_string(),
                                endpoint: our_endpoint,
                            });
                            Ok((out, true))
                        },
                    )
                    .await
            }
            MessageType::ConnResponse => {
                engine
                    .exec_psm(
                        Transition {
                            packet,
                            send_next: MessageType::ConnComplete,
                            waiting_next: MessageType::Terminate,
                            task: None,
                        },
                        |_conn, _inbound, out| async move { Ok((out, true)) },
                    )
                    .await
            }
            MessageType::ConnComplete => {
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
                family: ProtocolFamily::Connect.name().into(),
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
        // Connecting never waits on a user decision.
        Err(ProtocolError::ProtocolClosed(key.clone()))
    }

    async fn fill_status(
        &self,
        engine: &Engine,
        key: &StateKey,
    ) -> Result<FamilyStatus, ProtocolError> {
        let psm = engine.store().load_psm(key).await?;
        Ok(FamilyStatus::Connect { label: psm.connection_id })
    }
}
