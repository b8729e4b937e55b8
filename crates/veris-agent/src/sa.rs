//! The service-agent (SA) callback.
//!
//! At designated states (credential-offer accept-propose, proof
//! accept-propose, proof accept-values, ping) the engine must consult an
//! external authority before advancing. Three implementations exist,
//! selected per agent at configuration time:
//!
//! | Variant | Authority |
//! |---------|-----------|
//! | [`ServiceAgent::Permissive`] | in-process, accepts everything |
//! | [`ServiceAgent::Endpoint`] | legacy HTTP endpoint |
//! | [`ServiceAgent::Rpc`] | question/answer over the notification bus |
//!
//! # Fail-safe contract
//!
//! A callback failure never aborts the protocol. An unreachable endpoint,
//! a malformed reply, or an expired deadline all resolve to a NACK verdict
//! (`ready = false`) so the protocol continues and the remote peer learns
//! of the rejection. A rejection is a value here, never an error.

use crate::AgentError;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::time::Duration;
use tracing::{debug, warn};
use uuid::Uuid;
use veris_bus::{AgentKey, AgentQuestion, NotificationBus, QuestionKind};
use veris_types::{AttrInfo, ClientId, Did, ProofRequest};

/// Timeout of one endpoint round trip.
const ENDPOINT_TIMEOUT_SECS: u64 = 30;

/// The decision an SA call resolves to.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SaVerdict {
    /// `true` accepts the pending step, `false` rejects it.
    pub ready: bool,
    /// Free-form info echoed to the protocol.
    pub info: String,
    /// For proof accept-propose: the request the verifier should send.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub proof_request: Option<ProofRequest>,
}

impl SaVerdict {
    /// An accepting verdict.
    #[must_use]
    pub fn ack(info: impl Into<String>) -> Self {
        Self {
            ready: true,
            info: info.into(),
            proof_request: None,
        }
    }

    /// A rejecting verdict.
    #[must_use]
    pub fn nack(info: impl Into<String>) -> Self {
        Self {
            ready: false,
            info: info.into(),
            proof_request: None,
        }
    }
}

/// Typed reply of the legacy HTTP endpoint.
#[derive(Debug, Deserialize)]
struct EndpointReply {
    ready: bool,
    #[serde(default)]
    info: String,
    /// Set by endpoints signalling their own connection problems; treated
    /// as a failed call.
    #[serde(default)]
    connection_error: Option<String>,
}

/// The pluggable decision authority of one cloud agent.
#[derive(Debug, Clone)]
pub enum ServiceAgent {
    /// Auto-accepts every question. Tests and low-trust bootstrap.
    Permissive,
    /// Posts questions to a stored URL and awaits a typed reply.
    Endpoint {
        /// The endpoint answering questions.
        url: String,
    },
    /// Publishes questions on the bus for a client to answer.
    Rpc {
        /// Client addressed on the question stream.
        client_id: ClientId,
    },
}

impl ServiceAgent {
    /// Returns `true` when this SA accepts without asking anyone.
    #[must_use]
    pub fn auto_permission(&self) -> bool {
        matches!(self, Self::Permissive)
    }

    /// Asks the authority one question and resolves it to a verdict.
    ///
    /// Never fails: any transport, format, or deadline problem resolves to
    /// a NACK verdict per the fail-safe contract.
    pub async fn call(
        &self,
        worker_did: &Did,
        connection_id: &str,
        kind: QuestionKind,
        bus: &NotificationBus,
        deadline: Duration,
    ) -> SaVerdict {
        match self {
            Self::Permissive => Self::permissive(kind),
            Self::Endpoint { url } => match Self::call_endpoint(url, &kind).await {
                Ok(verdict) => verdict,
                Err(e) => {
                    // Usually the SA is absent or the network failed. The
                    // protocol must continue so the other end learns.
                    warn!(%e, url, "SA endpoint call failed, resolving to NACK");
                    SaVerdict::nack(e.to_string())
                }
            },
            Self::Rpc { client_id } => {
                let question = AgentQuestion::new(
                    Uuid::new_v4().to_string(),
                    AgentKey::new(worker_did.clone(), client_id.clone()),
                    connection_id,
                    kind,
                );
                match bus.send_question(question, deadline).await {
                    Ok(answer) => SaVerdict {
                        ready: answer.ready,
                        info: answer.info,
                        proof_request: None,
                    },
                    Err(e) => {
                        warn!(%e, "SA question unanswered, resolving to NACK");
                        SaVerdict::nack("no answer before deadline")
                    }
                }
            }
        }
    }

    fn permissive(kind: QuestionKind) -> SaVerdict {
        debug!(?kind, "permissive SA call");
        match kind {
            QuestionKind::Ping { .. } => SaVerdict::ack("SA ping OK"),
            QuestionKind::IssuePropose { .. } => SaVerdict::ack(""),
            QuestionKind::ProofPropose { attribute_names } => SaVerdict {
                ready: true,
                info: String::new(),
                proof_request: Some(proof_request_for(&attribute_names)),
            },
            QuestionKind::ProofValues { .. } => SaVerdict::ack(""),
        }
    }

    async fn call_endpoint(url: &str, kind: &QuestionKind) -> Result<SaVerdict, AgentError> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(ENDPOINT_TIMEOUT_SECS))
            .build()
            .map_err(|e| AgentError::Transport(e.to_string()))?;

        let response = client
            .post(url)
            .json(kind)
            .send()
            .await
            .map_err(|e| AgentError::Transport(e.to_string()))?;

        if !response.status().is_success() {
            return Err(AgentError::Transport(format!(
                "SA endpoint returned {}",
                response.status()
            )));
        }

        let reply: EndpointReply = response
            .json()
            .await
            .map_err(|e| AgentError::Transport(e.to_string()))?;

        if let Some(msg) = reply.connection_error {
            return Err(AgentError::Transport(format!("SA endpoint: {msg}")));
        }

        Ok(SaVerdict {
            ready: reply.ready,
            info: reply.info,
            proof_request: None,
        })
    }
}

/// Builds an unrestricted proof request over the proposed attribute names.
fn proof_request_for(names: &[String]) -> ProofRequest {
    let mut requested = BTreeMap::new();
    for (i, name) in names.iter().enumerate() {
        requested.insert(
            format!("attr_referent_{}", i + 1),
            AttrInfo {
                name: name.clone(),
                restrictions: vec![],
            },
        );
    }
    ProofRequest {
        name: "ProofReq".into(),
        version: "0.1".into(),
        nonce: Uuid::new_v4().simple().to_string(),
        requested_attributes: requested,
        requested_predicates: BTreeMap::new(),
    }
}
