//! Wire messages exchanged between a miniapp context and the host.
//!
//! Every message travels inside a [`Frame`] that names the protocol it
//! belongs to and the origin it is addressed to, so several facades can share
//! one physical port without cross-talk.

use crate::error::{ProviderRpcError, RpcResult};
use serde::{Deserialize, Deserializer, Serialize};
use std::fmt;
use std::str::FromStr;
use tracing::debug;

/// Discriminator carried by every frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ProtocolTag {
    /// The native Bio provider.
    #[serde(rename = "bio-provider")]
    Bio,
    /// The EVM-compatible provider.
    #[serde(rename = "ethereum-provider")]
    Ethereum,
    /// The Tron-compatible provider pair.
    #[serde(rename = "tron-provider")]
    Tron,
}

impl ProtocolTag {
    /// All protocol tags.
    pub const ALL: [Self; 3] = [Self::Bio, Self::Ethereum, Self::Tron];

    /// Wire name of the tag.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Bio => "bio-provider",
            Self::Ethereum => "ethereum-provider",
            Self::Tron => "tron-provider",
        }
    }
}

impl fmt::Display for ProtocolTag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ProtocolTag {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|tag| tag.as_str() == s)
            .ok_or_else(|| format!("unknown protocol tag '{s}'"))
    }
}

/// A request sent by a facade: `{id, method, params}`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RpcRequest {
    /// Correlation id, unique for the lifetime of the channel.
    pub id: String,
    /// Method name.
    pub method: String,
    /// Method parameters.
    #[serde(default)]
    pub params: serde_json::Value,
}

impl RpcRequest {
    /// Create a request.
    #[must_use]
    pub fn new(id: impl Into<String>, method: impl Into<String>, params: serde_json::Value) -> Self {
        Self {
            id: id.into(),
            method: method.into(),
            params,
        }
    }
}

/// A response sent by the host: `{id, result}` or `{id, error}`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RpcResponse {
    /// Id of the request being answered.
    pub id: String,
    /// Success value.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<serde_json::Value>,
    /// Failure value. An error object without a usable `code` still fails
    /// the request, as an internal error.
    #[serde(
        default,
        deserialize_with = "lenient_error",
        skip_serializing_if = "Option::is_none"
    )]
    pub error: Option<ProviderRpcError>,
}

fn lenient_error<'de, D>(deserializer: D) -> Result<Option<ProviderRpcError>, D::Error>
where
    D: Deserializer<'de>,
{
    let Some(raw) = Option::<serde_json::Value>::deserialize(deserializer)? else {
        return Ok(None);
    };
    let error = serde_json::from_value(raw.clone()).unwrap_or_else(|e| {
        debug!(error = %e, %raw, "unrecognized error object in response");
        ProviderRpcError::internal()
    });
    Ok(Some(error))
}

impl RpcResponse {
    /// Successful response.
    #[must_use]
    pub fn success(id: impl Into<String>, result: serde_json::Value) -> Self {
        Self {
            id: id.into(),
            result: Some(result),
            error: None,
        }
    }

    /// Failed response.
    #[must_use]
    pub fn failure(id: impl Into<String>, error: ProviderRpcError) -> Self {
        Self {
            id: id.into(),
            result: None,
            error: Some(error),
        }
    }

    /// Build a response from a settled outcome.
    #[must_use]
    pub fn from_outcome(id: impl Into<String>, outcome: RpcResult<serde_json::Value>) -> Self {
        match outcome {
            Ok(value) => Self::success(id, value),
            Err(error) => Self::failure(id, error),
        }
    }

    /// Convert into the settled outcome. A `null` result arrives as `None`
    /// and is restored to `Value::Null`.
    pub fn into_outcome(self) -> RpcResult<serde_json::Value> {
        match self.error {
            Some(error) => Err(error),
            None => Ok(self.result.unwrap_or(serde_json::Value::Null)),
        }
    }
}

/// A host-pushed event: `{event, payload}`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EventMessage {
    /// Event name.
    pub event: String,
    /// Event payload.
    #[serde(default)]
    pub payload: serde_json::Value,
}

impl EventMessage {
    /// Create an event message.
    #[must_use]
    pub fn new(event: impl Into<String>, payload: serde_json::Value) -> Self {
        Self {
            event: event.into(),
            payload,
        }
    }
}

/// Any message that can appear inside a frame.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum WireMessage {
    /// Facade to host.
    Request(RpcRequest),
    /// Host to facade.
    Response(RpcResponse),
    /// Host to facade, unacknowledged.
    Event(EventMessage),
}

/// Envelope around every message on a port.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Frame {
    /// Protocol the message belongs to.
    pub protocol: ProtocolTag,
    /// Origin the sender addressed the frame to.
    pub target_origin: String,
    /// The message itself.
    pub message: WireMessage,
}

/// Names of the lifecycle events pushed by the host.
pub mod events {
    /// The provider became able to serve requests.
    pub const CONNECT: &str = "connect";
    /// The provider lost its connection.
    pub const DISCONNECT: &str = "disconnect";
    /// The set of connected accounts changed.
    pub const ACCOUNTS_CHANGED: &str = "accountsChanged";
    /// The active chain changed.
    pub const CHAIN_CHANGED: &str = "chainChanged";
}
