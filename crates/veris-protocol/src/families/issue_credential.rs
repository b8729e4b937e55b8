//! Issue-credential family.
//!
//! The issuer side starts with an offer (or accepts a holder's propose
//! after asking the service agent); the holder side starts with a propose
//! (or accepts an issuer's offer, pausing for a user decision unless the
//! agent auto-accepts). Artifacts accumulate in the instance's
//! [`IssueCredRep`].

use crate::{
    Continuation, Engine, FamilyStatus, Initial, MessageType, MsgBody, Packet,
    ProcessorDescriptor, ProtocolError, ProtocolFamily, ProtocolProcessor, Transition,
};
use async_trait::async_trait;
use std::collections::BTreeMap;
use tracing::debug;
use veris_agent::CloudAgent;
use veris_bus::QuestionKind;
use veris_psm::{IssueCredRep, StoreError, Task, TaskData, TaskHeader};
use veris_types::{CredentialAttribute, Nonce, Role, StateKey};

/// Processor for the issue-credential family.
pub struct IssueCredentialProcessor;

/// Encodes preview attributes as the coded-values document wallets expect.
fn coded_values(attrs: &[CredentialAttribute]) -> String {
    let map: BTreeMap<&str, &str> = attrs.iter().map(|a| (a.name.as_str(), a.value.as_str())).collect();
    serde_json::to_string(&map).unwrap_or_default()
}

/// Some peer implementations require a MIME type on every attribute.
fn default_mime_types(attrs: &mut [CredentialAttribute]) {
    for attr in attrs {
        if attr.mime_type.is_none() {
            attr.mime_type = Some("text/plain".to_string());
        }
    }
}

#[async_trait]
impl ProtocolProcessor for IssueCredentialProcessor {
    fn family(&self) -> ProtocolFamily {
        ProtocolFamily::IssueCredential
    }

    fn descriptor(&self) -> ProcessorDescriptor {
        ProcessorDescriptor::new(
            ProtocolFamily::IssueCredential,
            vec![
                MessageType::CredPropose,
                MessageType::CredOffer,
                MessageType::CredRequest,
                MessageType::CredIssue,
                MessageType::CredAck,
                MessageType::CredNack,
            ],
            true,
            true,
        )
    }

    fn create_task(&self, header: TaskHeader, data: TaskData) -> Result<Task, ProtocolError> {
        let TaskData::IssueCredential { cred_def_id, attributes, comment } = data else {
            return Err(ProtocolError::HandlerFailure(
                "issue-credential task with foreign payload".into(),
            ));
        };
        if cred_def_id.is_empty() {
            return Err(ProtocolError::HandlerFailure("cred def id missing".into()));
        }
        if attributes.is_empty() {
            return Err(ProtocolError::HandlerFailure("credential attributes missing".into()));
        }
        Ok(Task {
            header,
            data: TaskData::IssueCredential { cred_def_id, attributes, comment },
        })
    }

    async fn start(
        &self,
        engine: &Engine,
        agent: &CloudAgent,
        mut task: Task,
    ) -> Result<(), ProtocolError> {
        let TaskData::IssueCredential { cred_def_id, mut attributes, comment } = task.data.clone()
        else {
            return Err(ProtocolError::HandlerFailure("not an issue-credential task".into()));
        };
        default_mime_types(&mut attributes);
        task.data = TaskData::IssueCredential {
            cred_def_id: cred_def_id.clone(),
            attributes: attributes.clone(),
            comment: comment.clone(),
        };

        let store = engine.store().clone();
        let wallet = engine.wallet().clone();
        match task.header.role {
            // Issuer: send the offer to the holder.
            Role::Initiator => {
                engine
                    .start_psm(
                        Initial {
                            send_next: MessageType::CredOffer,
                            waiting_next: MessageType::CredRequest,
                            agent,
                            task,
                        },
                        |key, msg| async move {
                            let offer = wallet
                                .create_cred_offer(&cred_def_id)
                                .await
                                .map_err(ProtocolError::from_agent)?;
                            let rep = IssueCredRep {
                                key,
                                cred_def_id: cred_def_id.clone(),
                                values: coded_values(&attributes),
                                cred_offer: offer.clone(),
                                attributes: attributes.clone(),
                            };
                            store.save_cred_rep(&rep).await?;
                            Ok(msg.with_body(MsgBody::CredOffer {
                                cred_def_id,
                                offer,
                                preview: attributes,
                            }))
                        },
                    )
                    .await
            }
            // Holder: propose to the issuer.
            Role::Addressee => {
                engine
                    .start_psm(
                        Initial {
                            send_next: MessageType::CredPropose,
                            waiting_next: MessageType::CredOffer,
                            agent,
                            task,
                        },
                        |key, msg| async move {
                            let rep = IssueCredRep {
                                key,
                                cred_def_id: cred_def_id.clone(),
                                values: coded_values(&attributes),
                                cred_offer: String::new(),
                                attributes: attributes.clone(),
                            };
                            store.save_cred_rep(&rep).await?;
                            Ok(msg.with_body(MsgBody::CredPropose {
                                cred_def_id,
                                preview: attributes,
                                comment,
                            }))
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
            // Issuer side: a holder proposed; ask the SA, then offer or
            // reject.
            MessageType::CredPropose => {
                let MsgBody::CredPropose { cred_def_id, preview, comment } =
                    packet.payload.body.clone()
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
                    data: TaskData::IssueCredential {
                        cred_def_id: cred_def_id.clone(),
                        attributes: preview.clone(),
                        comment,
                    },
                };

                let verdict = engine
                    .ask_sa(
                        &packet.receiver,
                        &connection_id,
                        QuestionKind::IssuePropose {
                            cred_def_id: cred_def_id.clone(),
                            values: coded_values(&preview),
                        },
                    )
                    .await;

                if !verdict.ready {
                    debug!(%key, "SA rejected credential propose");
                    return engine
                        .exec_psm(
                            Transition {
                                packet,
                                send_next: MessageType::CredNack,
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

                let store = engine.store().clone();
                let wallet = engine.wallet().clone();
                let rep_key = key.clone();
                engine
                    .exec_psm(
                        Transition {
                            packet,
                            send_next: MessageType::CredOffer,
                            waiting_next: MessageType::CredRequest,
                            task: Some(task),
                        },
                        |_conn, _inbound, out| async move {
                            let offer = wallet
                                .create_cred_offer(&cred_def_id)
                                .await
                                .map_err(ProtocolError::from_agent)?;
                            let rep = IssueCredRep {
                                key: rep_key,
                                cred_def_id: cred_def_id.clone(),
                                values: coded_values(&preview),
                                cred_offer: offer.clone(),
                                attributes: preview.clone(),
                            };
                            store.save_cred_rep(&rep).await?;
                            Ok((
                                out.with_body(MsgBody::CredOffer {
                                    cred_def_id,
                                    offer,
                                    preview,
                                }),
                                true,
                            ))
                        },
                    )
                    .await
            }

            // Holder side: an offer arrived; accept now or pause for the
            // user.
            MessageType::CredOffer => {
                let MsgBody::CredOffer { cred_def_id, offer, preview } =
                    packet.payload.body.clone()
                else {
                    return Err(ProtocolError::HandlerFailure("offer without body".into()));
                };
                let connection_id = packet.require_connection()?;
                let task = Task {
                    header: TaskHeader {
                        nonce: Nonce::adopt(packet.payload.thread_id.as_str()),
                        connection_id,
                        role: Role::Addressee,
                    },
                    data: TaskData::IssueCredential {
                        cred_def_id: cred_def_id.clone(),
                        attributes: preview.clone(),
                        comment: String::new(),
                    },
                };

                // The rep carries the offer blob forward; on the resume
                // path it is all the continuator has.
                let store = engine.store();
                let mut rep = match store.load_cred_rep(&key).await {
                    Ok(rep) => rep,
                    Err(StoreError::NotFound(_)) => IssueCredRep {
                        key: key.clone(),
                        cred_def_id: cred_def_id.clone(),
                        values: coded_values(&preview),
                        cred_offer: String::new(),
                        attributes: preview.clone(),
                    },
                    Err(e) => return Err(e.into()),
                };
                rep.cred_offer = offer;
                rep.cred_def_id = cred_def_id;
                store.save_cred_rep(&rep).await?;

                if packet.receiver.auto_permission() {
                    let wallet = engine.wallet().clone();
                    let offer_blob = rep.cred_offer.clone();
                    engine
                        .exec_psm(
                            Transition {
                                packet,
                                send_next: MessageType::CredRequest,
                                waiting_next: MessageType::CredIssue,
                                task: Some(task),
                            },
                            |_conn, _inbound, out| async move {
                                let request = wallet
                                    .create_cred_request(&offer_blob)
                                    .await
                                    .map_err(ProtocolError::from_agent)?;
                                Ok((out.with_body(MsgBody::CredRequest { request }), true))
                            },
                        )
                        .await
                } else {
                    engine.wait_user_action(&packet, Some(task)).await
                }
            }

            // Issuer side: the holder requested; issue the credential.
            MessageType::CredRequest => {
                let MsgBody::CredRequest { request } = packet.payload.body.clone() else {
                    return Err(ProtocolError::HandlerFailure("request without body".into()));
                };
                let store = engine.store().clone();
                let wallet = engine.wallet().clone();
                let rep_key = key;
                engine
                    .exec_psm(
                        Transition {
                            packet,
                            send_next: MessageType::CredIssue,
                            waiting_next: MessageType::CredAck,
                            task: None,
                        },
                        |_conn, _inbound, out| async move {
                            let rep = store.load_cred_rep(&rep_key).await?;
                            let credential = wallet
                                .issue_credential(&rep.cred_offer, &request, &rep.values)
                                .await
                                .map_err(ProtocolError::from_agent)?;
                            Ok((out.with_body(MsgBody::CredIssue { credential }), true))
                        },
                    )
                    .await
            }

            // Holder side: the credential arrived; store it and ack.
            MessageType::CredIssue => {
                let MsgBody::CredIssue { credential } = packet.payload.body.clone() else {
                    return Err(ProtocolError::HandlerFailure("issue without body".into()));
                };
                let wallet = engine.wallet().clone();
                engine
                    .exec_psm(
                        Transition {
                            packet,
                            send_next: MessageType::CredAck,
                            waiting_next: MessageType::Terminate,
                            task: None,
                        },
                        |_conn, _inbound, out| async move {
                            wallet
                                .store_credential(&credential)
                                .await
                                .map_err(ProtocolError::from_agent)?;
                            Ok((out, true))
                        },
                    )
                    .await
            }

            // Issuer side: final ack.
            MessageType::CredAck => {
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

            // Either side: the peer rejected.
            MessageType::CredNack => {
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
                family: ProtocolFamily::IssueCredential.name().into(),
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
                    send_next: MessageType::CredRequest,
                    waiting_next: MessageType::CredIssue,
                    nack_next: MessageType::CredNack,
                },
                |out| async move {
                    let rep = store.load_cred_rep(&rep_key).await?;
                    let request = wallet
                        .create_cred_request(&rep.cred_offer)
                        .await
                        .map_err(ProtocolError::from_agent)?;
                    Ok(out.with_body(MsgBody::CredRequest { request }))
                },
            )
            .await
    }

    async fn fill_status(
        &self,
        engine: &Engine,
        key: &StateKey,
    ) -> Result<FamilyStatus, ProtocolError> {
        let rep = engine.store().load_cred_rep(key).await?;
        Ok(FamilyStatus::IssueCredential {
            cred_def_id: rep.cred_def_id,
            attributes: rep.attributes,
        })
    }
}
