//! Interfaces the surrounding wallet application implements.
//!
//! The bridge never touches keys or renders UI. Privileged work is handed to
//! these collaborators, which settle exactly once: `Some` on approval,
//! `None` when the user cancels, `Err` when the host itself fails.

use crate::permission::Capability;
use crate::types::{
    Account, AppInfo, BalanceQuery, BroadcastParams, SignMessageParams, SignTransactionParams,
    SignTypedDataParams, TransferParams, TransferReceipt,
};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::sync::Arc;

/// Failure inside a collaborator.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum CollaboratorError {
    /// The host could not complete the operation. Logged, never sent.
    #[error("host failure: {0}")]
    Failed(String),

    /// The host rejected the params as malformed.
    #[error("invalid params: {0}")]
    InvalidParams(String),
}

impl CollaboratorError {
    /// Create a host failure.
    #[inline]
    pub fn failed(msg: impl Into<String>) -> Self {
        Self::Failed(msg.into())
    }
}

/// Result type of collaborator calls.
pub type CollaboratorResult<T> = std::result::Result<T, CollaboratorError>;

/// Why the account picker is shown.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PickPurpose {
    /// Connect an account to the app.
    Connect,
    /// Switch the connected account.
    Select,
    /// Pick any address, without connecting it.
    PickWallet,
}

/// Options passed to the account picker.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AccountPickRequest {
    /// Why the picker is shown.
    pub purpose: PickPurpose,
    /// Restrict the choice to one chain.
    pub chain: Option<String>,
}

/// What a signing confirmation is asked to sign.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum SigningRequest {
    /// A message.
    Message(SignMessageParams),
    /// Structured data.
    TypedData(SignTypedDataParams),
    /// A transaction.
    Transaction(SignTransactionParams),
}

impl SigningRequest {
    /// Address whose key signs.
    #[must_use]
    pub fn address(&self) -> &str {
        match self {
            Self::Message(p) => &p.address,
            Self::TypedData(p) => &p.address,
            Self::Transaction(p) => &p.address,
        }
    }
}

/// Shows the account picker.
#[async_trait]
pub trait AccountPicker: Send + Sync {
    /// Let the user choose an account. `None` means cancelled.
    async fn pick(
        &self,
        request: &AccountPickRequest,
        app: &AppInfo,
    ) -> CollaboratorResult<Option<Account>>;
}

/// Shows signing confirmations and signs on approval.
#[async_trait]
pub trait SigningConfirmation: Send + Sync {
    /// Ask the user to sign. Returns the signature (or signed transaction).
    async fn confirm_signing(
        &self,
        request: &SigningRequest,
        app: &AppInfo,
    ) -> CollaboratorResult<Option<serde_json::Value>>;
}

/// Shows transfer confirmations and broadcasts on approval.
#[async_trait]
pub trait TransferConfirmation: Send + Sync {
    /// Ask the user to approve a transfer.
    async fn confirm_transfer(
        &self,
        params: &TransferParams,
        app: &AppInfo,
    ) -> CollaboratorResult<Option<TransferReceipt>>;
}

/// Asks the user to grant capabilities to an app.
#[async_trait]
pub trait PermissionRequest: Send + Sync {
    /// Whether the user grants `capabilities` to the app.
    async fn request_permission(
        &self,
        app_id: &str,
        app_name: &str,
        capabilities: &[Capability],
    ) -> bool;
}

/// Non-interactive wallet queries.
#[async_trait]
pub trait HostWallet: Send + Sync {
    /// Current host chain id.
    async fn chain_id(&self) -> CollaboratorResult<String>;

    /// Balance in the chain's smallest unit, as a decimal string.
    async fn balance(&self, query: &BalanceQuery) -> CollaboratorResult<String>;

    /// Build an unsigned transaction.
    async fn create_transaction(
        &self,
        params: &TransferParams,
    ) -> CollaboratorResult<serde_json::Value>;

    /// Broadcast a signed transaction.
    async fn broadcast(&self, params: &BroadcastParams) -> CollaboratorResult<TransferReceipt>;

    /// Dismiss the splash screen shown while the app loads.
    async fn close_splash_screen(&self) -> CollaboratorResult<()> {
        Ok(())
    }
}

/// The collaborators a bridge dispatches to.
#[derive(Clone)]
pub struct Collaborators {
    /// Account picker.
    pub account_picker: Arc<dyn AccountPicker>,
    /// Signing confirmation.
    pub signing: Arc<dyn SigningConfirmation>,
    /// Transfer confirmation.
    pub transfer: Arc<dyn TransferConfirmation>,
    /// Wallet queries.
    pub wallet: Arc<dyn HostWallet>,
}

impl std::fmt::Debug for Collaborators {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Collaborators").finish_non_exhaustive()
    }
}

impl Collaborators {
    /// Bundle collaborators.
    #[must_use]
    pub fn new(
        account_picker: Arc<dyn AccountPicker>,
        signing: Arc<dyn SigningConfirmation>,
        transfer: Arc<dyn TransferConfirmation>,
        wallet: Arc<dyn HostWallet>,
    ) -> Self {
        Self {
            account_picker,
            signing,
            transfer,
            wallet,
        }
    }
}
