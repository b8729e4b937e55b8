//! The service-agent configuration boundary.
//!
//! String implementation ids exist only here. The rest of the system works
//! with the [`ServiceAgent`] tagged variant; hosts deserialize an
//! [`SaConfig`] and resolve it once at agent construction.

use crate::{AgentError, ServiceAgent};
use serde::{Deserialize, Serialize};
use veris_types::ClientId;

/// Implementation id of the in-process auto-accepting SA.
pub const PERMISSIVE_SA: &str = "permissive_sa";

/// Client id used when nothing selects an SA explicitly.
const DEFAULT_RPC_CLIENT: &str = "grpc";

/// Host-side SA selection for one agent.
///
/// At most one selector may be set. Setting both `endpoint` and
/// `rpc_client_id` is rejected: the legacy implementation left the
/// precedence ambiguous and this boundary refuses to guess.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SaConfig {
    /// Named in-process implementation (`permissive_sa`).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub impl_id: Option<String>,
    /// Legacy HTTP endpoint answering questions.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub endpoint: Option<String>,
    /// Client answering questions over the bus.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rpc_client_id: Option<String>,
}

impl SaConfig {
    /// Resolves the configuration into the runtime variant.
    ///
    /// An empty configuration defaults to the RPC SA with the default
    /// client id. The question stream is the supported surface, the
    /// endpoint exists for legacy hosts.
    ///
    /// # Errors
    ///
    /// [`AgentError::SaConfigConflict`] when both `endpoint` and
    /// `rpc_client_id` are set.
    pub fn resolve(&self) -> Result<ServiceAgent, AgentError> {
        if self.endpoint.is_some() && self.rpc_client_id.is_some() {
            return Err(AgentError::SaConfigConflict);
        }
        if let Some(id) = &self.impl_id {
            if id == PERMISSIVE_SA {
                return Ok(ServiceAgent::Permissive);
            }
        }
        if let Some(url) = &self.endpoint {
            return Ok(ServiceAgent::Endpoint { url: url.clone() });
        }
        let client = self
            .rpc_client_id
            .clone()
            .unwrap_or_else(|| DEFAULT_RPC_CLIENT.to_string());
        Ok(ServiceAgent::Rpc { client_id: ClientId::new(client) })
    }
}
