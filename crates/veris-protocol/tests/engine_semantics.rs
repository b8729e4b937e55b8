//! Engine-level semantics: duplicate starts, transport failures, closed
//! instances, and ignored duplicates.

mod common;

use common::{connect, party, party_with_outbound, Net};
use std::sync::Arc;
use std::time::Duration;
use veris_agent::testing::{FailingOutbound, RecordingOutbound};
use veris_agent::ServiceAgent;
use veris_bus::QuestionKind;
use veris_protocol::{start_task, ProtocolError};
use veris_psm::{SubState, Task, TaskData};
use veris_types::{CredentialAttribute, Role, StateKey};

fn issue_task(connection: &str) -> Task {
    Task::new(
        connection,
        Role::Initiator,
        TaskData::IssueCredential {
            cred_def_id: "cd:1".into(),
            attributes: vec![CredentialAttribute::new("email", "a@b")],
            comment: String::new(),
        },
    )
}

#[tokio::test]
async fn duplicate_start_fails_and_writes_nothing_new() {
    let recorder = RecordingOutbound::new();
    let solo = party_with_outbound("solo", ServiceAgent::Permissive, recorder, &[]);
    let peer = party_with_outbound("peer", ServiceAgent::Permissive, RecordingOutbound::new(), &[]);
    connect(&solo, &peer, "conn-1");

    let task = issue_task("conn-1");
    let key = task.state_key(&solo.worker_did());

    start_task(&solo.engine, &solo.registry, &solo.agent, task.clone())
        .await
        .expect("first start");
    let before = solo.entries(&key).await;
    assert_eq!(before, vec![SubState::SENDING, SubState::WAITING]);

    let err = start_task(&solo.engine, &solo.registry, &solo.agent, task)
        .await
        .expect_err("second start with the same nonce");
    assert!(matches!(err, ProtocolError::DuplicateProtocol(_)));

    assert_eq!(solo.entries(&key).await, before);
}

#[tokio::test]
async fn transport_failure_during_start_ends_in_failure() {
    let solo = party_with_outbound(
        "solo",
        ServiceAgent::Permissive,
        Arc::new(FailingOutbound),
        &[],
    );
    let peer = party_with_outbound("peer", ServiceAgent::Permissive, RecordingOutbound::new(), &[]);
    connect(&solo, &peer, "conn-1");

    let task = issue_task("conn-1");
    let key = task.state_key(&solo.worker_did());
    let (_lid, mut status_rx) = solo.bus.add_status_listener(&key);

    let err = start_task(&solo.engine, &solo.registry, &solo.agent, task)
        .await
        .expect_err("send fails");
    assert!(matches!(err, ProtocolError::TransportFailure(_)));

    // Exactly two entries: the attempt, then the failure.
    assert_eq!(
        solo.entries(&key).await,
        vec![SubState::SENDING, SubState::FAILURE]
    );

    // Both transitions were announced, failure last.
    assert_eq!(status_rx.recv().await, Some(SubState::SENDING));
    assert_eq!(status_rx.recv().await, Some(SubState::FAILURE));
}

#[tokio::test]
async fn inbound_for_a_terminal_instance_is_rejected_with_no_entry() {
    let net = Net::new();
    let issuer = party("issuer", ServiceAgent::Permissive, &net, &[]);
    let holder = party("holder", ServiceAgent::Permissive, &net, &[]);
    connect(&issuer, &holder, "conn-1");

    let task = issue_task("conn-1");
    let key = task.state_key(&issuer.worker_did());

    let rx = veris_protocol::run(
        Arc::clone(&issuer.engine),
        Arc::clone(&issuer.registry),
        Arc::clone(&issuer.agent),
        task,
        Duration::from_secs(5),
    )
    .expect("run starts");
    common::drain(rx).await;

    let len_before = issuer.entries(&key).await.len();

    // Replay the holder's final ack by hand.
    let err = issuer
        .engine
        .exec_psm(
            veris_protocol::Transition {
                packet: veris_protocol::Packet::new(
                    veris_protocol::ProtocolMsg::new(
                        veris_protocol::MessageType::CredAck,
                        key.nonce.clone(),
                    ),
                    Arc::clone(&issuer.agent),
                    holder.worker_did(),
                    Some("conn-1".into()),
                ),
                send_next: veris_protocol::MessageType::Terminate,
                waiting_next: veris_protocol::MessageType::Terminate,
                task: None,
            },
            |_conn, _inbound, out| async move { Ok((out, true)) },
        )
        .await
        .expect_err("terminal instance");
    assert!(matches!(err, ProtocolError::ProtocolClosed(_)));
    assert_eq!(issuer.entries(&key).await.len(), len_before);
}

#[tokio::test]
async fn unexpected_message_type_while_waiting_is_ignored() {
    let recorder = RecordingOutbound::new();
    let solo = party_with_outbound("solo", ServiceAgent::Permissive, recorder, &[]);
    let peer = party_with_outbound("peer", ServiceAgent::Permissive, RecordingOutbound::new(), &[]);
    connect(&solo, &peer, "conn-1");

    let task = issue_task("conn-1");
    let key = task.state_key(&solo.worker_did());
    start_task(&solo.engine, &solo.registry, &solo.agent, task)
        .await
        .expect("start");

    // Waiting for a credential request; a propose for the same thread is
    // not it.
    let result = solo
        .engine
        .exec_psm(
            veris_protocol::Transition {
                packet: veris_protocol::Packet::new(
                    veris_protocol::ProtocolMsg::new(
                        veris_protocol::MessageType::CredPropose,
                        key.nonce.clone(),
                    ),
                    Arc::clone(&solo.agent),
                    peer.worker_did(),
                    Some("conn-1".into()),
                ),
                send_next: veris_protocol::MessageType::CredOffer,
                waiting_next: veris_protocol::MessageType::CredRequest,
                task: None,
            },
            |_conn, _inbound, out| async move { Ok((out, true)) },
        )
        .await;

    assert!(result.is_ok());
    assert_eq!(
        solo.entries(&key).await,
        vec![SubState::SENDING, SubState::WAITING]
    );
}

#[tokio::test]
async fn unknown_thread_id_is_rejected_for_non_opening_messages() {
    let solo = party_with_outbound(
        "solo",
        ServiceAgent::Permissive,
        RecordingOutbound::new(),
        &[],
    );
    let peer = party_with_outbound("peer", ServiceAgent::Permissive, RecordingOutbound::new(), &[]);
    connect(&solo, &peer, "conn-1");

    let stray = StateKey::new(solo.worker_did(), veris_types::Nonce::adopt("never-seen"));
    let err = solo
        .engine
        .exec_psm(
            veris_protocol::Transition {
                packet: veris_protocol::Packet::new(
                    veris_protocol::ProtocolMsg::new(
                        veris_protocol::MessageType::CredIssue,
                        stray.nonce.clone(),
                    ),
                    Arc::clone(&solo.agent),
                    peer.worker_did(),
                    Some("conn-1".into()),
                ),
                send_next: veris_protocol::MessageType::CredAck,
                waiting_next: veris_protocol::MessageType::Terminate,
                task: None,
            },
            |_conn, _inbound, out| async move { Ok((out, true)) },
        )
        .await
        .expect_err("no record, no task");
    assert!(matches!(err, ProtocolError::ProtocolClosed(_)));
    assert!(solo.engine.store().try_load_psm(&stray).await.unwrap().is_none());
}

#[tokio::test]
async fn release_overlays_archiving_without_a_new_entry() {
    let net = Net::new();
    let issuer = party("issuer", ServiceAgent::Permissive, &net, &[]);
    let holder = party("holder", ServiceAgent::Permissive, &net, &[]);
    connect(&issuer, &holder, "conn-1");

    let task = issue_task("conn-1");
    let key = task.state_key(&issuer.worker_did());
    let rx = veris_protocol::run(
        Arc::clone(&issuer.engine),
        Arc::clone(&issuer.registry),
        Arc::clone(&issuer.agent),
        task,
        Duration::from_secs(5),
    )
    .expect("run starts");
    common::drain(rx).await;

    let len_before = issuer.entries(&key).await.len();
    issuer.engine.release(&key).await.expect("release");

    let subs = issuer.entries(&key).await;
    assert_eq!(subs.len(), len_before);
    let last = *subs.last().unwrap();
    assert!(last.contains(SubState::ARCHIVING));
    assert_eq!(last.pure(), SubState::READY);
    assert!(last.is_ack());
}

#[tokio::test]
async fn permissive_sa_ping_answers_without_touching_any_psm() {
    let solo = party_with_outbound(
        "solo",
        ServiceAgent::Permissive,
        RecordingOutbound::new(),
        &[],
    );

    let verdict = solo
        .engine
        .ask_sa(
            &solo.agent,
            "conn-1",
            QuestionKind::Ping { info: "hello".into() },
        )
        .await;

    assert!(verdict.ready);
    assert_eq!(verdict.info, "SA ping OK");

    // No protocol instance was created by the callback.
    let key = StateKey::new(solo.worker_did(), veris_types::Nonce::adopt("hello"));
    assert!(solo.engine.store().try_load_psm(&key).await.unwrap().is_none());
}
