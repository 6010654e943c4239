//! Unified error types for biobridge.
//!
//! Two families live here:
//!
//! - [`ProviderRpcError`] is the only error that ever crosses the wire. Its
//!   [`ErrorCode`] is drawn from a fixed, published table; anything the host
//!   cannot classify collapses to [`ErrorCode::InternalError`].
//! - [`BridgeError`] and its per-module siblings are local errors raised by
//!   the Rust API itself (attach twice, closed port, bad config file, ...).

use serde::{Deserialize, Serialize};
use std::fmt;

// ============================================================================
// Wire Error Codes
// ============================================================================

/// The published provider error code table.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "i64", into = "i64")]
pub enum ErrorCode {
    /// The user rejected the request.
    UserRejected,
    /// The requested method and/or account has not been authorized.
    Unauthorized,
    /// The provider does not support the requested method.
    UnsupportedMethod,
    /// The provider is disconnected from all chains.
    Disconnected,
    /// The provider is not connected to the requested chain.
    ChainDisconnected,
    /// Internal JSON-RPC error.
    InternalError,
    /// Invalid method parameters.
    InvalidParams,
    /// The method does not exist.
    MethodNotFound,
}

impl ErrorCode {
    /// Every code in the table, in publication order.
    pub const ALL: [Self; 8] = [
        Self::UserRejected,
        Self::Unauthorized,
        Self::UnsupportedMethod,
        Self::Disconnected,
        Self::ChainDisconnected,
        Self::InternalError,
        Self::InvalidParams,
        Self::MethodNotFound,
    ];

    /// Numeric value of the code.
    #[must_use]
    pub const fn as_i64(self) -> i64 {
        match self {
            Self::UserRejected => 4001,
            Self::Unauthorized => 4100,
            Self::UnsupportedMethod => 4200,
            Self::Disconnected => 4900,
            Self::ChainDisconnected => 4901,
            Self::InternalError => -32603,
            Self::InvalidParams => -32602,
            Self::MethodNotFound => -32601,
        }
    }

    /// Default human-readable message for the code.
    #[must_use]
    pub const fn default_message(self) -> &'static str {
        match self {
            Self::UserRejected => "User rejected the request",
            Self::Unauthorized => "The requested method has not been authorized by the user",
            Self::UnsupportedMethod => "The provider does not support the requested method",
            Self::Disconnected => "The provider is disconnected",
            Self::ChainDisconnected => "The provider is not connected to the requested chain",
            Self::InternalError => "Internal error",
            Self::InvalidParams => "Invalid method parameters",
            Self::MethodNotFound => "The method does not exist",
        }
    }
}

impl From<i64> for ErrorCode {
    fn from(code: i64) -> Self {
        Self::ALL
            .into_iter()
            .find(|known| known.as_i64() == code)
            .unwrap_or(Self::InternalError)
    }
}

impl From<ErrorCode> for i64 {
    fn from(code: ErrorCode) -> Self {
        code.as_i64()
    }
}

impl fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_i64())
    }
}

// ============================================================================
// Wire Error
// ============================================================================

/// Error object carried by a response: `{code, message, data?}`.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error, Serialize, Deserialize)]
#[error("{message} (code {code})")]
pub struct ProviderRpcError {
    /// Error code from the published table.
    pub code: ErrorCode,
    /// Human-readable message.
    pub message: String,
    /// Optional structured detail.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<serde_json::Value>,
}

impl ProviderRpcError {
    /// Create an error with the code's default message.
    #[must_use]
    pub fn new(code: ErrorCode) -> Self {
        Self {
            code,
            message: code.default_message().to_string(),
            data: None,
        }
    }

    /// Create an error with a custom message.
    #[must_use]
    pub fn with_message(code: ErrorCode, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
            data: None,
        }
    }

    /// Attach structured data.
    #[must_use]
    pub fn with_data(mut self, data: serde_json::Value) -> Self {
        self.data = Some(data);
        self
    }

    /// 4001.
    #[must_use]
    pub fn user_rejected() -> Self {
        Self::new(ErrorCode::UserRejected)
    }

    /// 4100.
    #[must_use]
    pub fn unauthorized() -> Self {
        Self::new(ErrorCode::Unauthorized)
    }

    /// 4200 for the named method.
    #[must_use]
    pub fn unsupported_method(method: &str) -> Self {
        Self::with_message(
            ErrorCode::UnsupportedMethod,
            format!("The provider does not support the method '{method}'"),
        )
    }

    /// 4900.
    #[must_use]
    pub fn disconnected() -> Self {
        Self::new(ErrorCode::Disconnected)
    }

    /// 4901.
    #[must_use]
    pub fn chain_disconnected() -> Self {
        Self::new(ErrorCode::ChainDisconnected)
    }

    /// -32603 with the generic message.
    #[must_use]
    pub fn internal() -> Self {
        Self::new(ErrorCode::InternalError)
    }

    /// -32602 with a description of what was wrong.
    #[must_use]
    pub fn invalid_params(detail: impl Into<String>) -> Self {
        Self::with_message(ErrorCode::InvalidParams, detail)
    }

    /// -32601 for the named method.
    #[must_use]
    pub fn method_not_found(method: &str) -> Self {
        Self::with_message(
            ErrorCode::MethodNotFound,
            format!("The method '{method}' does not exist"),
        )
    }

    /// A confirmation prompt of the given kind is already active.
    ///
    /// Uses -32603 so the code stays within the table; callers distinguish it
    /// through [`is_busy`](Self::is_busy).
    #[must_use]
    pub fn busy(prompt: &str) -> Self {
        Self::with_message(
            ErrorCode::InternalError,
            format!("A {prompt} confirmation is already pending"),
        )
        .with_data(serde_json::json!({ "reason": "busy", "prompt": prompt }))
    }

    /// Whether this is a busy rejection produced by [`busy`](Self::busy).
    #[must_use]
    pub fn is_busy(&self) -> bool {
        self.code == ErrorCode::InternalError
            && self
                .data
                .as_ref()
                .and_then(|d| d.get("reason"))
                .and_then(serde_json::Value::as_str)
                == Some("busy")
    }
}

impl From<ErrorCode> for ProviderRpcError {
    fn from(code: ErrorCode) -> Self {
        Self::new(code)
    }
}

/// Result of a provider request.
pub type RpcResult<T> = std::result::Result<T, ProviderRpcError>;

// ============================================================================
// Main Error Type
// ============================================================================

/// The main error type for local biobridge operations.
#[derive(Debug, thiserror::Error)]
pub enum BridgeError {
    /// Transport / port error.
    #[error("transport: {0}")]
    Transport(#[from] TransportError),

    /// Configuration error.
    #[error("config: {0}")]
    Config(#[from] ConfigError),

    /// A provider request failed.
    #[error("rpc: {0}")]
    Rpc(#[from] ProviderRpcError),

    /// The bridge already serves a miniapp.
    #[error("bridge already attached to '{0}'")]
    AlreadyAttached(String),

    /// The bridge is not attached.
    #[error("bridge is not attached")]
    NotAttached,

    /// The provider slot already holds a runtime.
    #[error("provider slot already initialized")]
    SlotOccupied,
}

impl BridgeError {
    /// Create a config error from a string.
    #[inline]
    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config(ConfigError::Invalid(msg.into()))
    }
}

/// Result type alias for biobridge operations.
pub type Result<T> = std::result::Result<T, BridgeError>;

// ============================================================================
// Transport Errors
// ============================================================================

/// Error type for port and transport operations.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum TransportError {
    /// The port has been closed.
    #[error("port closed")]
    Closed,

    /// The frame could not be encoded.
    #[error("encode failed: {0}")]
    Encode(String),
}

/// Result type for transport operations.
pub type TransportResult<T> = std::result::Result<T, TransportError>;

// ============================================================================
// Configuration Errors
// ============================================================================

/// Error type for configuration operations.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// IO error.
    #[error("io: {0}")]
    Io(#[from] std::io::Error),

    /// JSON parsing error.
    #[error("parse: {0}")]
    Parse(#[from] serde_json::Error),

    /// Invalid value.
    #[error("invalid: {0}")]
    Invalid(String),
}

impl ConfigError {
    /// Create an invalid value error.
    #[inline]
    pub fn invalid(msg: impl Into<String>) -> Self {
        Self::Invalid(msg.into())
    }
}

/// Result type for configuration operations.
pub type ConfigResult<T> = std::result::Result<T, ConfigError>;
