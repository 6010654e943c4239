//! Domain types shared by the facades and the host bridge.
//!
//! These are the canonical parameter and result shapes of the Bio method
//! catalogue. Facades translate their own calling conventions into them and
//! the host dispatcher validates incoming params against them.

use crate::chain;
use crate::provider::tron::TronAddress;
use serde::{Deserialize, Serialize};

/// Snapshot of a wallet account exposed to a miniapp.
///
/// Never a live reference into host state: changes reach the miniapp only
/// through `accountsChanged` events.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Account {
    /// Address in the chain's native format.
    pub address: String,
    /// Host chain id.
    pub chain: String,
    /// Optional user-facing label.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    /// Public key, hex encoded.
    pub public_key: String,
}

impl Account {
    /// Create an account snapshot.
    #[must_use]
    pub fn new(
        address: impl Into<String>,
        chain: impl Into<String>,
        public_key: impl Into<String>,
    ) -> Self {
        Self {
            address: address.into(),
            chain: chain.into(),
            name: None,
            public_key: public_key.into(),
        }
    }

    /// Set the label.
    #[must_use]
    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    /// Whether the account belongs to the given chain (case-insensitive).
    #[must_use]
    pub fn is_on(&self, chain: &str) -> bool {
        self.chain.eq_ignore_ascii_case(chain)
    }

    /// Whether the account has the given address. EVM-style `0x` addresses
    /// compare case-insensitively; Tron addresses match in either base58 or
    /// hex form.
    #[must_use]
    pub fn has_address(&self, address: &str) -> bool {
        if self.address.starts_with("0x") {
            return self.address.eq_ignore_ascii_case(address);
        }
        if self.address == address {
            return true;
        }
        self.is_on(chain::TRON)
            && matches!(
                (TronAddress::parse(&self.address), TronAddress::parse(address)),
                (Some(ours), Some(theirs)) if ours.hex == theirs.hex
            )
    }
}

/// Identity of the miniapp a request comes from.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AppInfo {
    /// Stable miniapp id.
    pub id: String,
    /// Display name.
    pub name: String,
    /// Origin the miniapp is served from.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub origin: Option<String>,
    /// Icon URL.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub icon: Option<String>,
}

impl AppInfo {
    /// Create app info.
    #[must_use]
    pub fn new(id: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            origin: None,
            icon: None,
        }
    }

    /// Set the origin.
    #[must_use]
    pub fn with_origin(mut self, origin: impl Into<String>) -> Self {
        self.origin = Some(origin.into());
        self
    }
}

/// Params of request-accounts, accounts, select-account and pick-wallet.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AccountQuery {
    /// Restrict to one chain.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub chain: Option<String>,
}

impl AccountQuery {
    /// Query accounts of one chain.
    #[must_use]
    pub fn chain(chain: impl Into<String>) -> Self {
        Self {
            chain: Some(chain.into()),
        }
    }

    /// Whether an account satisfies the query.
    #[must_use]
    pub fn matches(&self, account: &Account) -> bool {
        self.chain.as_deref().is_none_or(|c| account.is_on(c))
    }
}

/// Params of sign-message.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SignMessageParams {
    /// Message to sign (UTF-8 text or `0x` hex).
    pub message: String,
    /// Signing account address.
    pub address: String,
}

/// Params of sign-typed-data.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SignTypedDataParams {
    /// Structured data to sign.
    pub data: serde_json::Value,
    /// Signing account address.
    pub address: String,
}

/// Params of create-transaction and send-transaction.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TransferParams {
    /// Sender address.
    pub from: String,
    /// Recipient address.
    pub to: String,
    /// Amount in the chain's smallest unit, as a decimal string.
    pub amount: String,
    /// Host chain id.
    pub chain: String,
    /// Token contract or asset symbol; native asset when absent.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub asset: Option<String>,
    /// Contract call data or memo.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<String>,
}

/// Params of sign-transaction.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SignTransactionParams {
    /// Signing account address.
    pub address: String,
    /// Host chain id.
    pub chain: String,
    /// Unsigned transaction, chain specific.
    pub transaction: serde_json::Value,
}

/// Params of broadcast-transaction.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BroadcastParams {
    /// Host chain id.
    pub chain: String,
    /// Signed transaction, chain specific.
    pub signed_transaction: serde_json::Value,
}

/// Params of get-balance.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BalanceQuery {
    /// Address to query.
    pub address: String,
    /// Host chain id.
    pub chain: String,
    /// Token contract or asset symbol; native asset when absent.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub asset: Option<String>,
}

/// Result of send-transaction and broadcast-transaction.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TransferReceipt {
    /// Hash of the broadcast transaction.
    pub tx_hash: String,
}
