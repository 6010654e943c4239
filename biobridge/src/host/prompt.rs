//! One confirmation UI per prompt kind.
//!
//! Each kind has a slot guarded by a fair async mutex. Under
//! [`ConfirmationPolicy::Queue`] a second request waits for the slot in
//! arrival order; under [`ConfirmationPolicy::RejectBusy`] it is rejected at
//! once. An open prompt is never replaced.

use crate::config::ConfirmationPolicy;
use crate::error::{ProviderRpcError, RpcResult};
use crate::method::Method;
use std::fmt;
use std::sync::Arc;
use tokio::sync::{Mutex, OwnedMutexGuard};
use tracing::trace;

/// Kinds of confirmation UI.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PromptKind {
    /// Capability grant prompt.
    Permission,
    /// Account picker.
    AccountPicker,
    /// Message, typed-data and transaction signing.
    Signing,
    /// Transfer confirmation.
    Transfer,
}

impl PromptKind {
    /// Name used in busy errors and logs.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Permission => "permission",
            Self::AccountPicker => "account_picker",
            Self::Signing => "signing",
            Self::Transfer => "transfer",
        }
    }

    /// Prompt a method shows, if any.
    #[must_use]
    pub const fn for_method(method: Method) -> Option<Self> {
        match method {
            Method::RequestAccounts | Method::SelectAccount | Method::PickWallet => {
                Some(Self::AccountPicker)
            }
            Method::SignMessage | Method::SignTypedData | Method::SignTransaction => {
                Some(Self::Signing)
            }
            Method::SendTransaction => Some(Self::Transfer),
            Method::Accounts
            | Method::CreateTransaction
            | Method::BroadcastTransaction
            | Method::ChainId
            | Method::GetBalance
            | Method::CloseSplashScreen => None,
        }
    }

    const fn index(self) -> usize {
        match self {
            Self::Permission => 0,
            Self::AccountPicker => 1,
            Self::Signing => 2,
            Self::Transfer => 3,
        }
    }
}

impl fmt::Display for PromptKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Held while a prompt is open; dropping it frees the slot.
#[derive(Debug)]
pub struct PromptGuard {
    kind: PromptKind,
    _slot: OwnedMutexGuard<()>,
}

impl Drop for PromptGuard {
    fn drop(&mut self) {
        trace!(prompt = %self.kind, "prompt slot released");
    }
}

/// Prompt slots of one bridge.
#[derive(Debug)]
pub struct PromptSlots {
    policy: ConfirmationPolicy,
    slots: [Arc<Mutex<()>>; 4],
}

impl PromptSlots {
    /// Create free slots under a policy.
    #[must_use]
    pub fn new(policy: ConfirmationPolicy) -> Self {
        Self {
            policy,
            slots: std::array::from_fn(|_| Arc::new(Mutex::new(()))),
        }
    }

    /// Policy in force.
    #[must_use]
    pub const fn policy(&self) -> ConfirmationPolicy {
        self.policy
    }

    /// Take the slot for a prompt kind, waiting or failing per the policy.
    pub async fn acquire(&self, kind: PromptKind) -> RpcResult<PromptGuard> {
        let slot = Arc::clone(&self.slots[kind.index()]);
        let guard = match self.policy {
            ConfirmationPolicy::Queue => slot.lock_owned().await,
            ConfirmationPolicy::RejectBusy => slot
                .try_lock_owned()
                .map_err(|_| ProviderRpcError::busy(kind.as_str()))?,
        };
        trace!(prompt = %kind, "prompt slot acquired");
        Ok(PromptGuard {
            kind,
            _slot: guard,
        })
    }

    /// Whether a prompt of this kind is open.
    #[must_use]
    pub fn is_busy(&self, kind: PromptKind) -> bool {
        self.slots[kind.index()].try_lock().is_err()
    }
}
