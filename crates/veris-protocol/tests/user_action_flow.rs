//! Pausing on a user decision and resuming with ACK or NACK.

mod common;

use common::{connect, drain, party, wait_terminal, Net};
use std::sync::Arc;
use std::time::Duration;
use veris_agent::ServiceAgent;
use veris_protocol::{resume, run, RunState};
use veris_psm::{SubState, Task, TaskData};
use veris_types::{ClientId, CredentialAttribute, Role, StateKey};

fn issue_task(connection: &str, role: Role) -> Task {
    Task::new(
        connection,
        role,
        TaskData::IssueCredential {
            cred_def_id: "cd:1".into(),
            attributes: vec![CredentialAttribute::new("email", "a@b")],
            comment: String::new(),
        },
    )
}

/// A holder whose SA is not auto-accepting pauses on the offer.
async fn paused_holder() -> (common::Party, common::Party, StateKey, Vec<RunState>) {
    let net = Net::new();
    let issuer = party("issuer", ServiceAgent::Permissive, &net, &[]);
    let holder = party(
        "holder",
        ServiceAgent::Rpc { client_id: ClientId::new("cli-1") },
        &net,
        &[],
    );
    connect(&issuer, &holder, "conn-1");

    let task = issue_task("conn-1", Role::Addressee);
    let key = task.state_key(&holder.worker_did());

    let mut rx = run(
        Arc::clone(&holder.engine),
        Arc::clone(&holder.registry),
        Arc::clone(&holder.agent),
        task,
        Duration::from_secs(5),
    )
    .expect("run starts");

    // Collect events until WAIT_ACTION shows up, then detach the stream;
    // the callers observe the rest through the store.
    let mut seen = Vec::new();
    loop {
        let event = tokio::time::timeout(Duration::from_secs(5), rx.recv())
            .await
            .expect("stream alive")
            .expect("stream open");
        seen.push(event.state);
        if event.state == RunState::WaitAction {
            break;
        }
        assert_eq!(event.state, RunState::Running, "must not finish before the pause");
    }
    drop(rx);

    (issuer, holder, key, seen)
}

#[tokio::test]
async fn offer_pauses_until_the_user_accepts() {
    let (issuer, holder, key, _seen) = paused_holder().await;

    let psm = holder.engine.store().load_psm(&key).await.unwrap();
    assert!(psm.pending_user_action());
    assert_eq!(psm.last_state().unwrap().sub, SubState::WAITING);

    resume(&holder.engine, &holder.registry, &holder.agent, &key, true)
        .await
        .expect("resume with ack");

    wait_terminal(&holder, &key).await;
    let psm = holder.engine.store().load_psm(&key).await.unwrap();
    assert_eq!(psm.last_state().unwrap().sub, SubState::READY_ACK);

    let issuer_key = StateKey::new(issuer.worker_did(), key.nonce.clone());
    wait_terminal(&issuer, &issuer_key).await;
    let issuer_psm = issuer.engine.store().load_psm(&issuer_key).await.unwrap();
    assert_eq!(issuer_psm.last_state().unwrap().sub, SubState::READY_ACK);
}

#[tokio::test]
async fn offer_pauses_until_the_user_declines() {
    let (issuer, holder, key, _seen) = paused_holder().await;

    resume(&holder.engine, &holder.registry, &holder.agent, &key, false)
        .await
        .expect("resume with nack");

    wait_terminal(&holder, &key).await;
    let psm = holder.engine.store().load_psm(&key).await.unwrap();
    assert_eq!(psm.last_state().unwrap().sub, SubState::READY_NACK);

    // The issuer hears the rejection as a credential NACK.
    let issuer_key = StateKey::new(issuer.worker_did(), key.nonce.clone());
    wait_terminal(&issuer, &issuer_key).await;
    let issuer_psm = issuer.engine.store().load_psm(&issuer_key).await.unwrap();
    assert_eq!(issuer_psm.last_state().unwrap().sub, SubState::READY_NACK);
}

#[tokio::test]
async fn inbound_messages_are_ignored_while_paused() {
    let (_issuer, holder, key, _seen) = paused_holder().await;

    let len_before = holder.entries(&key).await.len();

    // A duplicate offer arrives while the user is thinking.
    let result = holder
        .engine
        .exec_psm(
            veris_protocol::Transition {
                packet: veris_protocol::Packet::new(
                    veris_protocol::ProtocolMsg::new(
                        veris_protocol::MessageType::CredOffer,
                        key.nonce.clone(),
                    ),
                    Arc::clone(&holder.agent),
                    veris_types::Did::new("w-issuer"),
                    Some("conn-1".into()),
                ),
                send_next: veris_protocol::MessageType::CredRequest,
                waiting_next: veris_protocol::MessageType::CredIssue,
                task: None,
            },
            |_conn, _inbound, out| async move { Ok((out, true)) },
        )
        .await;

    assert!(result.is_ok());
    assert_eq!(holder.entries(&key).await.len(), len_before);
}

#[tokio::test]
async fn resume_of_a_non_paused_instance_is_rejected() {
    let net = Net::new();
    let issuer = party("issuer", ServiceAgent::Permissive, &net, &[]);
    let holder = party("holder", ServiceAgent::Permissive, &net, &[]);
    connect(&issuer, &holder, "conn-1");

    let task = issue_task("conn-1", Role::Addressee);
    let key = task.state_key(&holder.worker_did());
    let rx = run(
        Arc::clone(&holder.engine),
        Arc::clone(&holder.registry),
        Arc::clone(&holder.agent),
        task,
        Duration::from_secs(5),
    )
    .expect("run starts");
    drain(rx).await;

    let err = resume(&holder.engine, &holder.registry, &holder.agent, &key, true)
        .await
        .expect_err("nothing is pending");
    assert!(matches!(err, veris_protocol::ProtocolError::ProtocolClosed(_)));
}
