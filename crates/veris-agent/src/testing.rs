//! Test doubles for the external collaborators.
//!
//! Protocol and engine tests need a pipe, a transport, and a wallet without
//! any cryptography behind them. These doubles keep the contracts honest:
//! the pipe round-trips bytes, the wallet hands out tagged blobs, and the
//! failing transport produces the exact error surface a real send failure
//! would.

use crate::{AgentError, Anoncreds, Envelope, Outbound, PipeFactory, SecurePipe};
use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;
use veris_types::{Did, ProofRequest, RevealedAttribute};

/// Identity pipe: pack frames plaintext with the sender DID, unpack
/// unframes it; the shape of authcrypt without the cryptography.
pub struct PlainPipe {
    my_did: Did,
    their_did: Did,
}

/// Cleartext stand-in for an authcrypt frame.
#[derive(serde::Serialize, serde::Deserialize)]
struct Frame {
    sender: String,
    data: Vec<u8>,
}

impl PlainPipe {
    /// Creates a pipe between two DIDs.
    #[must_use]
    pub fn between(my: impl Into<String>, their: impl Into<String>) -> Arc<Self> {
        Arc::new(Self {
            my_did: Did::new(my),
            their_did: Did::new(their),
        })
    }
}

#[async_trait]
impl SecurePipe for PlainPipe {
    fn my_did(&self) -> &Did {
        &self.my_did
    }

    fn their_did(&self) -> &Did {
        &self.their_did
    }

    async fn pack(&self, plaintext: &[u8]) -> Result<Envelope, AgentError> {
        let frame = Frame {
            sender: self.my_did.as_str().to_string(),
            data: plaintext.to_vec(),
        };
        Ok(Envelope {
            recipient: self.their_did.clone(),
            payload: serde_json::to_vec(&frame)
                .map_err(|e| AgentError::Envelope(e.to_string()))?,
        })
    }

    async fn unpack(&self, envelope: &Envelope) -> Result<(Vec<u8>, Did), AgentError> {
        let frame: Frame = serde_json::from_slice(&envelope.payload)
            .map_err(|e| AgentError::Envelope(e.to_string()))?;
        Ok((frame.data, Did::new(frame.sender)))
    }
}

/// Factory handing out [`PlainPipe`]s.
#[derive(Debug, Default)]
pub struct PlainPipeFactory;

#[async_trait]
impl PipeFactory for PlainPipeFactory {
    async fn pipe_to(
        &self,
        worker: &Did,
        their: &Did,
        _endpoint: &str,
    ) -> Result<Arc<dyn SecurePipe>, AgentError> {
        Ok(PlainPipe::between(worker.as_str(), their.as_str()))
    }
}

/// Transport that records what it would have sent.
#[derive(Debug, Default)]
pub struct RecordingOutbound {
    sent: Mutex<Vec<(String, Envelope)>>,
}

impl RecordingOutbound {
    /// Creates an empty recorder.
    #[must_use]
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Everything sent so far, in send order.
    #[must_use]
    pub fn sent(&self) -> Vec<(String, Envelope)> {
        self.sent.lock().clone()
    }
}

#[async_trait]
impl Outbound for RecordingOutbound {
    async fn send(&self, connection_id: &str, envelope: Envelope) -> Result<(), AgentError> {
        self.sent.lock().push((connection_id.to_string(), envelope));
        Ok(())
    }
}

/// Transport where every send fails.
#[derive(Debug, Default)]
pub struct FailingOutbound;

#[async_trait]
impl Outbound for FailingOutbound {
    async fn send(&self, _connection_id: &str, _envelope: Envelope) -> Result<(), AgentError> {
        Err(AgentError::Transport("injected send failure".into()))
    }
}

/// Wallet double producing tagged, human-readable blobs.
///
/// Presentation values come from the attribute map given at construction;
/// attributes the map does not know reveal as `unknown`.
pub struct StubAnoncreds {
    values: HashMap<String, String>,
}

impl StubAnoncreds {
    /// Creates a wallet double revealing the given attribute values.
    #[must_use]
    pub fn new(values: impl IntoIterator<Item = (String, String)>) -> Arc<Self> {
        Arc::new(Self {
            values: values.into_iter().collect(),
        })
    }

    /// A wallet double with no attribute values.
    #[must_use]
    pub fn empty() -> Arc<Self> {
        Self::new([])
    }
}

#[async_trait]
impl Anoncreds for StubAnoncreds {
    async fn create_cred_offer(&self, cred_def_id: &str) -> Result<String, AgentError> {
        Ok(format!("offer:{cred_def_id}"))
    }

    async fn create_cred_request(&self, cred_offer: &str) -> Result<String, AgentError> {
        Ok(format!("request[{cred_offer}]"))
    }

    async fn issue_credential(
        &self,
        cred_offer: &str,
        _cred_request: &str,
        values: &str,
    ) -> Result<String, AgentError> {
        Ok(format!("cred[{cred_offer}]{{{values}}}"))
    }

    async fn store_credential(&self, _credential: &str) -> Result<(), AgentError> {
        Ok(())
    }

    async fn create_presentation(
        &self,
        request: &ProofRequest,
    ) -> Result<Vec<RevealedAttribute>, AgentError> {
        Ok(request
            .requested_attributes
            .iter()
            .map(|(referent, info)| RevealedAttribute {
                referent: referent.clone(),
                name: info.name.clone(),
                value: self
                    .values
                    .get(&info.name)
                    .cloned()
                    .unwrap_or_else(|| "unknown".to_string()),
            })
            .collect())
    }

    async fn verify_presentation(
        &self,
        request: &ProofRequest,
        revealed: &[RevealedAttribute],
    ) -> Result<bool, AgentError> {
        // Structural check only: every requested referent answered.
        Ok(request
            .requested_attributes
            .keys()
            .all(|referent| revealed.iter().any(|r| &r.referent == referent)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeMap;
    use veris_types::AttrInfo;

    #[tokio::test]
    async fn plain_pipe_round_trips_and_names_the_sender() {
        let pipe = PlainPipe::between("me", "you");
        let envelope = pipe.pack(b"payload").await.unwrap();
        assert_eq!(envelope.recipient, Did::new("you"));

        let (data, sender) = pipe.unpack(&envelope).await.unwrap();
        assert_eq!(data, b"payload");
        assert_eq!(sender, Did::new("me"));
    }

    #[tokio::test]
    async fn stub_wallet_presents_known_values() {
        let wallet = StubAnoncreds::new([("email".to_string(), "a@b".to_string())]);
        let mut attrs = BTreeMap::new();
        attrs.insert(
            "attr_referent_1".to_string(),
            AttrInfo { name: "email".into(), restrictions: vec![] },
        );
        let request = ProofRequest {
            name: "ProofReq".into(),
            version: "0.1".into(),
            nonce: "1".into(),
            requested_attributes: attrs,
            requested_predicates: BTreeMap::new(),
        };

        let revealed = wallet.create_presentation(&request).await.unwrap();
        assert_eq!(revealed.len(), 1);
        assert_eq!(revealed[0].value, "a@b");
        assert!(wallet.verify_presentation(&request, &revealed).await.unwrap());
    }

    #[tokio::test]
    async fn failing_outbound_fails() {
        let out = FailingOutbound;
        let err = out
            .send("conn", Envelope { recipient: Did::new("x"), payload: vec![] })
            .await
            .unwrap_err();
        assert!(matches!(err, AgentError::Transport(_)));
    }
}
