//! The canonical Bio method catalogue.
//!
//! Method names arrive as strings; [`Method::from_str`] is the only way into
//! the typed world, so any name outside the catalogue falls through to
//! method-not-found before dispatch begins.

use crate::permission::Capability;
use std::fmt;
use std::str::FromStr;

/// A method of the native Bio provider.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Method {
    /// Ask the user to connect accounts.
    RequestAccounts,
    /// Accounts connected in this session.
    Accounts,
    /// Ask the user to switch the connected account.
    SelectAccount,
    /// Ask the user to pick any wallet address (not necessarily connected).
    PickWallet,
    /// Sign an arbitrary message.
    SignMessage,
    /// Sign structured data.
    SignTypedData,
    /// Build an unsigned transaction.
    CreateTransaction,
    /// Sign a transaction after confirmation.
    SignTransaction,
    /// Confirm, sign and broadcast a transfer.
    SendTransaction,
    /// Broadcast an already signed transaction.
    BroadcastTransaction,
    /// Current host chain id.
    ChainId,
    /// Balance of an address.
    GetBalance,
    /// Dismiss the host splash screen.
    CloseSplashScreen,
}

impl Method {
    /// Every method in the catalogue.
    pub const ALL: [Self; 13] = [
        Self::RequestAccounts,
        Self::Accounts,
        Self::SelectAccount,
        Self::PickWallet,
        Self::SignMessage,
        Self::SignTypedData,
        Self::CreateTransaction,
        Self::SignTransaction,
        Self::SendTransaction,
        Self::BroadcastTransaction,
        Self::ChainId,
        Self::GetBalance,
        Self::CloseSplashScreen,
    ];

    /// Wire name.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::RequestAccounts => "bio_requestAccounts",
            Self::Accounts => "bio_accounts",
            Self::SelectAccount => "bio_selectAccount",
            Self::PickWallet => "bio_pickWallet",
            Self::SignMessage => "bio_signMessage",
            Self::SignTypedData => "bio_signTypedData",
            Self::CreateTransaction => "bio_createTransaction",
            Self::SignTransaction => "bio_signTransaction",
            Self::SendTransaction => "bio_sendTransaction",
            Self::BroadcastTransaction => "bio_broadcastTransaction",
            Self::ChainId => "bio_chainId",
            Self::GetBalance => "bio_getBalance",
            Self::CloseSplashScreen => "bio_closeSplashScreen",
        }
    }

    /// Capability the app must hold before the method is dispatched.
    #[must_use]
    pub const fn required_capability(self) -> Option<Capability> {
        match self {
            Self::RequestAccounts | Self::SelectAccount | Self::PickWallet => {
                Some(Capability::Accounts)
            }
            Self::SignMessage | Self::SignTypedData | Self::SignTransaction => {
                Some(Capability::Sign)
            }
            Self::CreateTransaction | Self::SendTransaction | Self::BroadcastTransaction => {
                Some(Capability::Transact)
            }
            Self::Accounts | Self::ChainId | Self::GetBalance | Self::CloseSplashScreen => None,
        }
    }
}

impl fmt::Display for Method {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Error returned for names outside the catalogue.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unknown method '{0}'")]
pub struct UnknownMethod(pub String);

impl FromStr for Method {
    type Err = UnknownMethod;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|m| m.as_str() == s)
            .ok_or_else(|| UnknownMethod(s.to_string()))
    }
}
