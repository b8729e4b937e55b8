//! Present-proof family.
//!
//! The verifier side starts with a proof request (or accepts a prover's
//! propose after asking the service agent, which supplies the request);
//! the prover side starts with a propose (or answers a request, pausing
//! for a user decision unless the agent auto-accepts). The verifier asks
//! the service agent again once the presentation's revealed values are on
//! the table.

use crate::{
    Continuation, Engine, FamilyStatus, Initial, MessageType, MsgBody, Packet,
    ProcessorDescriptor, ProtocolError, ProtocolFamily, ProtocolProcessor, Transition,
};
use async_trait::async_trait;
use std::collections::BTreeMap;
use tracing::debug;
use uuid::Uuid;
use veris_agent::CloudAgent;
use veris_bus::QuestionKind;
use veris_psm::{PresentProofRep, StoreError, Task, TaskData, TaskHeader};
use veris_types::{
    AttrInfo, Nonce, PredicateInfo, ProofAttribute, ProofPredicate, ProofRequest,
    RestrictionFilter, Role, StateKey,
};

/// Processor for the present-proof family.
pub struct PresentProofProcessor;

/// Builds the proof request a verifier sends.
///
/// Referents are `attr_referent_N` / `predicate_N` unless the attribute
/// carries an explicit id. The proof-level nonce is fresh: it cannot be
/// shared with the protocol thread id.
fn generate_proof_request(attrs: &[ProofAttribute], predicates: &[ProofPredicate]) -> ProofRequest {
    let mut requested_attributes = BTreeMap::new();
    for (i, attr) in attrs.iter().enumerate() {
        let referent = attr
            .id
            .clone()
            .unwrap_or_else(|| format!("attr_referent_{}", i + 1));
        let restrictions = attr
            .cred_def_id
            .iter()
            .map(|id| RestrictionFilter { cred_def_id: id.clone() })
            .collect();
        requested_attributes.insert(
            referent,
            AttrInfo { name: attr.name.clone(), restrictions },
        );
    }
    let mut requested_predicates = BTreeMap::new();
    for (i, predicate) in predicates.iter().enumerate() {
        let referent = predicate
            .id
            .clone()
            .unwrap_or_else(|| format!("predicate_{}", i + 1));
        requested_predicates.insert(
            referent,
            PredicateInfo {
                name: predicate.name.clone(),
                p_type: predicate.p_type.clone(),
                p_value: predicate.p_value,
            },
        );
    }
    ProofRequest {
        name: "ProofReq".into(),
        version: "0.1".into(),
        nonce: Uuid::new_v4().simple().to_string(),
        requested_attributes,
        requested_predicates,
    }
}

#[async_trait]
impl ProtocolProcessor for PresentProofProcessor {
    fn family(&self) -> ProtocolFamily {
        ProtocolFamily::PresentProof
    }

    fn descriptor(&self) -> ProcessorDescriptor {
        ProcessorDescriptor::new(
            ProtocolFamily::PresentProof,
            vec![
                MessageType::ProofPropose,
                MessageType::ProofRequest,
                MessageType::ProofPresentation,
                MessageType::ProofAck,
                MessageType::ProofNack,
            ],
            true,
            true,
        )
    }

    fn create_task(&self, header: TaskHeader, data: TaskData) -> Result<Task, ProtocolError> {
        let TaskData::PresentProof { attributes, predicates, comment } = data else {
            return Err(ProtocolError::HandlerFailure(
                "present-proof task with foreign payload".into(),
            ));
        };
        if attributes.is_empty() && predicates.is_empty() {
            return Err(ProtocolError::HandlerFailure("proof attributes missing".into()));
        }
        Ok(Task {
            header,
            data: TaskData::PresentProof { attributes, predicates, comment },
        })
    }

    async fn start(
        &self,
        engine: &Engine,
        agent: &CloudAgent,
        task: Task,
    ) -> Result<(), ProtocolError> {
        let TaskData::PresentProof { attributes, predicates, comment } = task.data.clone() else {
            return Err(ProtocolError::HandlerFailure("not a present-proof task".into()));
        };
        let store = engine.store().clone();
        match task.header.role {
            // Verifier: request a proof.
            Role::Initiator => {
                engine
                    .start_psm(
                        Initial {
                            send_next: MessageType::ProofRequest,
                            waiting_next: MessageType::ProofPresentation,
                            agent,
                            task,
                        },
                        |key, msg| async move {
                            let request = generate_proof_request(&attributes, &predicates);
                            let rep = PresentProofRep {
                                key,
                                values: comment,
                                proof_request: Some(request.clone()),
                                we_proposed: false,
                                attributes: vec![],
                            };
                            store.save_proof_rep(&rep).await?;
                            Ok(msg.with_body(MsgBody::ProofRequest { request }))
                        },
                    )
                    .await
            }
            // Prover: propose a presentation.
            Role::Addressee => {
                engine
                    .start_psm(
                        Initial {
                            send_next: MessageType::ProofPropose,
                            waiting_next: MessageType::ProofRequest,
                            agent,
                            task,
                        },
                        |key, msg| async move {
                            let rep = PresentProofRep {
                                key,
                                values: comment.clone(),
                                proof_request: None,
                                we_proposed: true,
                                attributes: vec![],
                            };
                            store.save_proof_rep(&rep).await?;
                            Ok(msg.with_body(MsgBody::ProofPropose { attributes, comment }))
                        },
                    )
                    .await
            }
        }
    }

    async fn handle(&self, engine: &Engine, packet: Packet) -> Result<(), ProtocolError> {
        let worker_did = packet.receiver.worker.did.clone();
        let key = StateKey::new(worker_did, packet.payload.thread_id.clone());

        match packet.payload.msg_type {
            // Verifier side: a prover proposed; the SA supplies (or
            // refuses) the proof request.
            MessageType::ProofPropose => {
                let MsgBody::ProofPropose { attributes, comment } = packet.payload.body.clone()
                else {
                    return Err(ProtocolError::HandlerFailure("propose without body".into()));
                };
                let connection_id = packet.require_connection()?;
                let task = Task {
                    header: TaskHeader {
                        nonce: Nonce::adopt(packet.payload.thread_id.as_str()),
                        connection_id: connection_id.clone(),
                        role: Role::Initiator,
                    },
                    data: TaskData::PresentProof {
                        attributes: attributes.clone(),
                        predicates: vec![],
                        comment,
                    },
                };

                let verdict = engine
                    .ask_sa(
                        &packet.receiver,
                        &connection_id,
                        QuestionKind::ProofPropose {
                            attribute_names: attributes.iter().map(|a| a.name.clone()).collect(),
                        },
                    )
                    .await;

                if !verdict.ready {
                    debug!(%key, "SA rejected proof propose");
                    return engine
                        .exec_psm(
                            Transition {
                                packet,
                                send_next: MessageType::ProofNack,
                                waiting_next: MessageType::Terminate,
                                task: Some(task),
                            },
                            |_conn, _inbound, out| async move {
                                let out = out.with_body(MsgBody::Nack {
                                    reason: "proposal rejected".into(),
                                });
                                Ok((out, false))
                            },
                        )
                        .await;
                }

                let request = verdict
                    .proof_request
                    .unwrap_or_else(|| generate_proof_request(&attributes, &[]));
                let store = engine.store().clone();
                let rep_key = key.clone();
                engine
                    .exec_psm(
                        Transition {
                            packet,
                            send_next: MessageType::ProofRequest,
                            waiting_next: MessageType::ProofPresentation,
                            task: Some(task),
                        },
                        |_conn, _inbound, out| async move {
                            let rep = PresentProofRep {
                                key: rep_key,
                                values: String::new(),
                                proof_request: Some(request.clone()),
                                we_proposed: false,
                                attributes: vec![],
                            };
                            store.save_proof_rep(&rep).await?;
                            Ok((out.with_body(MsgBody::ProofRequest { request }), true))
                        },
                    )
                    .await
            }

            // Prover side: a request arrived; present now or pause for
            // the user.
            MessageType::ProofRequest => {
                let MsgBody::ProofRequest { request } = packet.payload.body.clone() else {
                    return Err(ProtocolError::HandlerFailure("request without body".into()));
                };
                let connection_id = packet.require_connection()?;
                let task = Task {
                    header: TaskHeader {
                        nonce: Nonce::adopt(packet.payload.thread_id.as_str()),
                        connection_id,
                        role: Role::Addressee,
                    },
                    data: TaskData::PresentProof {
                        attributes: request
                            .requested_attributes
                            .values()
                            .map(|info| ProofAttribute::new(info.name.clone()))
                            .collect(),
                        predicates: vec![],
                        comment: String::new(),
                    },
                };

                // Persist the request so the resume path can rebuild the
                // presentation without the message.
                let store = engine.store();
                let mut rep = match store.load_proof_rep(&key).await {
                    Ok(rep) => rep,
                    Err(StoreError::NotFound(_)) => PresentProofRep {
                        key: key.clone(),
                        values: String::new(),
                        proof_request: None,
                        we_proposed: false,
                        attributes: vec![],
                    },
                    Err(e) => return Err(e.into()),
                };
                rep.proof_request = Some(request.clone());
                store.save_proof_rep(&rep).await?;

                if packet.receiver.auto_permission() {
                    let wallet = engine.wallet().clone();
                    engine
                        .exec_psm(
                            Transition {
                                packet,
                                send_next: MessageType::ProofPresentation,
                                waiting_next: MessageType::ProofAck,
                                task: Some(task),
                            },
                            |_conn, _inbound, out| async move {
                                let revealed = wallet
                                    .create_presentation(&request)
                                    .await
                                    .map_err(ProtocolError::from_agent)?;
                                Ok((out.with_body(MsgBody::ProofPresentation { revealed }), true))
                            },
                        )
                        .await
                } else {
                    engine.wait_user_action(&packet, Some(task)).await
                }
            }

            // Verifier side: the presentation arrived; verify, then ask
            // the SA about the revealed values.
            MessageType::ProofPresentation => {
                let MsgBody::ProofPresentation { revealed } = packet.payload.body.clone() else {
                    return Err(ProtocolError::HandlerFailure("presentation without body".into()));
                };
                let connection_id = packet.require_connection()?;
                let store = engine.store().clone();

                let mut rep = store.load_proof_rep(&key).await?;
                let Some(request) = rep.proof_request.clone() else {
                    return Err(ProtocolError::HandlerFailure("no proof request on record".into()));
                };
                let valid = engine
                    .wallet()
                    .verify_presentation(&request, &revealed)
                    .await
                    .map_err(ProtocolError::from_agent)?;

                let accepted = if valid {
                    engine
                        .ask_sa(
                            &packet.receiver,
                            &connection_id,
                            QuestionKind::ProofValues { attributes: revealed.clone() },
                        )
                        .await
                        .ready
                } else {
                    debug!(%key, "presentation failed verification");
                    false
                };

                rep.attributes = revealed;
                store.save_proof_rep(&rep).await?;

                let (send_next, reason) = if accepted {
                    (MessageType::ProofAck, None)
                } else {
                    (MessageType::ProofNack, Some("presentation rejected".to_string()))
                };
                engine
                    .exec_psm(
                        Transition {
                            packet,
                            send_next,
                            waiting_next: MessageType::Terminate,
                            task: None,
                        },
                        |_conn, _inbound, out| async move {
                            let out = match reason {
                                Some(reason) => out.with_body(MsgBody::Nack { reason }),
                                None => out,
                            };
                            Ok((out, accepted))
                        },
                    )
                    .await
            }

            // Prover side: terminal acks.
            MessageType::ProofAck => {
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
            MessageType::ProofNack => {
                engine
                    .exec_psm(
                        Transition {
                            packet,
                            send_next: MessageType::Terminate,
                            waiting_next: MessageType::Terminate,
                            task: None,
                        },
                        |_conn, _inbound, out| async move { Ok((out, false)) },
                    )
                    .await
            }

            other => Err(ProtocolError::NoHandler {
                family: ProtocolFamily::PresentProof.name().into(),
                message_type: other.wire_name().into(),
            }),
        }
    }

    async fn resume(
        &self,
        engine: &Engine,
        agent: &CloudAgent,
        key: &StateKey,
        ack: bool,
    ) -> Result<(), ProtocolError> {
        let store = engine.store().clone();
        let wallet = engine.wallet().clone();
        let rep_key = key.clone();
        engine
            .resume_psm(
                agent,
                key,
                ack,
                Continuation {
                    send_next: MessageType::ProofPresentation,
                    waiting_next: MessageType::ProofAck,
                    nack_next: MessageType::ProofNack,
                },
                |out| async move {
                    let rep = store.load_proof_rep(&rep_key).await?;
                    let Some(request) = rep.proof_request else {
                        return Err(ProtocolError::HandlerFailure(
                            "no proof request on record".into(),
                        ));
                    };
                    let revealed = wallet
                        .create_presentation(&request)
                        .await
                        .map_err(ProtocolError::from_agent)?;
                    Ok(out.with_body(MsgBody::ProofPresentation { revealed }))
                },
            )
            .await
    }

    async fn fill_status(
        &self,
        engine: &Engine,
        key: &StateKey,
    ) -> Result<FamilyStatus, ProtocolError> {
        let rep = engine.store().load_proof_rep(key).await?;
        Ok(FamilyStatus::PresentProof { attributes: rep.attributes })
    }
}
