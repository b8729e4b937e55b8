//! Two-party issue-credential flows over the loopback fabric.

mod common;

use common::{connect, drain, party, wait_terminal, Net};
use std::sync::Arc;
use std::time::Duration;
use veris_agent::ServiceAgent;
use veris_protocol::{run, status, FamilyStatus, RunState};
use veris_psm::{SubState, Task, TaskData};
use veris_types::{CredentialAttribute, Role, StateKey};

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

#[tokio::test]
async fn holder_initiated_issue_with_auto_accept() {
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

    let events = drain(rx).await;
    assert_eq!(events.last().unwrap().state, RunState::Ok);

    // The exact persisted substate sequence on the holder side.
    let subs = holder.entries(&key).await;
    assert_eq!(
        subs,
        vec![
            SubState::SENDING,
            SubState::WAITING,
            SubState::SENDING,
            SubState::WAITING,
            SubState::SENDING,
            SubState::READY_ACK,
        ]
    );
    let types = holder.entry_types(&key).await;
    assert_eq!(types[1], "issue-credential/offer");
    assert_eq!(types[3], "issue-credential/issue");

    // Family detail in the final status.
    let snapshot = status(&holder.engine, &holder.registry, &key)
        .await
        .expect("status");
    assert_eq!(snapshot.state.state, RunState::Ok);
    let FamilyStatus::IssueCredential { cred_def_id, attributes } = snapshot.family else {
        panic!("missing issue-credential detail");
    };
    assert_eq!(cred_def_id, "cd:1");
    assert_eq!(attributes.len(), 1);
    assert_eq!(attributes[0].name, "email");
}

#[tokio::test]
async fn propose_to_ack_persists_exactly_six_entries_on_the_issuer() {
    let net = Net::new();
    let issuer = party("issuer", ServiceAgent::Permissive, &net, &[]);
    let holder = party("holder", ServiceAgent::Permissive, &net, &[]);
    connect(&issuer, &holder, "conn-1");

    let task = issue_task("conn-1", Role::Addressee);
    let holder_key = task.state_key(&holder.worker_did());
    let issuer_key = StateKey::new(issuer.worker_did(), holder_key.nonce.clone());

    let rx = run(
        Arc::clone(&holder.engine),
        Arc::clone(&holder.registry),
        Arc::clone(&holder.agent),
        task,
        Duration::from_secs(5),
    )
    .expect("run starts");
    drain(rx).await;
    wait_terminal(&issuer, &issuer_key).await;

    // Propose → (accept) → Offer → Request → Issue → ACK, in order.
    let subs = issuer.entries(&issuer_key).await;
    assert_eq!(subs.len(), 6);
    assert_eq!(subs[0], SubState::SENDING);
    assert_eq!(subs[5], SubState::READY_ACK);
    assert!(subs.iter().take(5).all(|s| !s.is_terminal()));

    // Timestamps are monotonic within the record.
    let psm = issuer.engine.store().load_psm(&issuer_key).await.unwrap();
    for pair in psm.states.windows(2) {
        assert!(pair[0].at <= pair[1].at);
    }
}

#[tokio::test]
async fn issuer_initiated_offer_reaches_ack_both_sides() {
    let net = Net::new();
    let issuer = party("issuer", ServiceAgent::Permissive, &net, &[]);
    let holder = party("holder", ServiceAgent::Permissive, &net, &[]);
    connect(&issuer, &holder, "conn-1");

    let task = issue_task("conn-1", Role::Initiator);
    let issuer_key = task.state_key(&issuer.worker_did());
    let holder_key = StateKey::new(holder.worker_did(), issuer_key.nonce.clone());

    let rx = run(
        Arc::clone(&issuer.engine),
        Arc::clone(&issuer.registry),
        Arc::clone(&issuer.agent),
        task,
        Duration::from_secs(5),
    )
    .expect("run starts");

    let events = drain(rx).await;
    assert_eq!(events.last().unwrap().state, RunState::Ok);
    wait_terminal(&holder, &holder_key).await;

    let holder_psm = holder.engine.store().load_psm(&holder_key).await.unwrap();
    assert_eq!(holder_psm.last_state().unwrap().sub, SubState::READY_ACK);
    assert_eq!(holder_psm.role, Role::Addressee);
}

#[tokio::test]
async fn thread_id_equals_the_task_nonce_end_to_end() {
    let net = Net::new();
    let issuer = party("issuer", ServiceAgent::Permissive, &net, &[]);
    let holder = party("holder", ServiceAgent::Permissive, &net, &[]);
    connect(&issuer, &holder, "conn-1");

    let task = issue_task("conn-1", Role::Initiator);
    let nonce = task.nonce().clone();

    let rx = run(
        Arc::clone(&issuer.engine),
        Arc::clone(&issuer.registry),
        Arc::clone(&issuer.agent),
        task,
        Duration::from_secs(5),
    )
    .expect("run starts");
    drain(rx).await;

    // The holder's record exists under the very same nonce.
    let holder_key = StateKey::new(holder.worker_did(), nonce);
    wait_terminal(&holder, &holder_key).await;
}
