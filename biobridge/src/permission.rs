//! Per-miniapp capability grants.
//!
//! The [`PermissionGate`] owns the capability set of one attach cycle and is
//! consulted synchronously before a privileged method is dispatched. Whether
//! grants outlive the cycle is decided by an injected [`GrantPolicy`].

use crate::method::Method;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeSet, HashMap};
use std::fmt;
use std::sync::{PoisonError, RwLock};
use tracing::debug;

/// A privileged capability a miniapp can be granted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Capability {
    /// Learn and connect wallet accounts.
    Accounts,
    /// Request message, typed-data and transaction signatures.
    Sign,
    /// Create, send and broadcast transactions.
    Transact,
}

impl Capability {
    /// Wire name.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Accounts => "accounts",
            Self::Sign => "sign",
            Self::Transact => "transact",
        }
    }
}

impl fmt::Display for Capability {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Outcome of a gate check.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GateDecision {
    /// The method may be dispatched right away.
    Allowed,
    /// The capability must be granted first.
    NeedsGrant(Capability),
}

/// Capability set of one miniapp for one attach cycle.
#[derive(Debug)]
pub struct PermissionGate {
    app_id: String,
    granted: RwLock<BTreeSet<Capability>>,
}

impl PermissionGate {
    /// Create a gate seeded with an initial grant set.
    #[must_use]
    pub fn new(app_id: impl Into<String>, granted: impl IntoIterator<Item = Capability>) -> Self {
        Self {
            app_id: app_id.into(),
            granted: RwLock::new(granted.into_iter().collect()),
        }
    }

    /// The app this gate belongs to.
    #[must_use]
    pub fn app_id(&self) -> &str {
        &self.app_id
    }

    /// Whether a capability is granted.
    #[must_use]
    pub fn is_granted(&self, capability: Capability) -> bool {
        self.granted
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .contains(&capability)
    }

    /// Decide whether a method may be dispatched.
    #[must_use]
    pub fn check(&self, method: Method) -> GateDecision {
        match method.required_capability() {
            Some(cap) if !self.is_granted(cap) => GateDecision::NeedsGrant(cap),
            _ => GateDecision::Allowed,
        }
    }

    /// Record granted capabilities.
    pub fn grant(&self, capabilities: &[Capability]) {
        let mut granted = self.granted.write().unwrap_or_else(PoisonError::into_inner);
        granted.extend(capabilities.iter().copied());
        debug!(app_id = %self.app_id, ?capabilities, "capabilities granted");
    }

    /// Snapshot of the granted set, in stable order.
    #[must_use]
    pub fn granted(&self) -> Vec<Capability> {
        self.granted
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .copied()
            .collect()
    }
}

/// Host policy deciding whether grants outlive an attach cycle.
#[async_trait]
pub trait GrantPolicy: Send + Sync {
    /// Grants remembered for an app from earlier cycles.
    async fn load(&self, app_id: &str) -> Vec<Capability>;

    /// Called whenever the user approves new capabilities.
    async fn record(&self, app_id: &str, capabilities: &[Capability]);
}

/// Grants live only as long as the attach cycle.
#[derive(Debug, Clone, Copy, Default)]
pub struct SessionGrants;

#[async_trait]
impl GrantPolicy for SessionGrants {
    async fn load(&self, _app_id: &str) -> Vec<Capability> {
        Vec::new()
    }

    async fn record(&self, _app_id: &str, _capabilities: &[Capability]) {}
}

/// Grants remembered in memory across attach cycles.
#[derive(Debug, Default)]
pub struct MemoryGrantStore {
    grants: tokio::sync::RwLock<HashMap<String, BTreeSet<Capability>>>,
}

impl MemoryGrantStore {
    /// Create an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Forget everything recorded for an app.
    pub async fn forget(&self, app_id: &str) -> bool {
        self.grants.write().await.remove(app_id).is_some()
    }
}

#[async_trait]
impl GrantPolicy for MemoryGrantStore {
    async fn load(&self, app_id: &str) -> Vec<Capability> {
        self.grants
            .read()
            .await
            .get(app_id)
            .map(|caps| caps.iter().copied().collect())
            .unwrap_or_default()
    }

    async fn record(&self, app_id: &str, capabilities: &[Capability]) {
        self.grants
            .write()
            .await
            .entry(app_id.to_string())
            .or_default()
            .extend(capabilities.iter().copied());
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_gate_check() {
        let gate = PermissionGate::new("app", [Capability::Accounts]);
        assert_eq!(gate.check(Method::RequestAccounts), GateDecision::Allowed);
        assert_eq!(gate.check(Method::ChainId), GateDecision::Allowed);
        assert_eq!(
            gate.check(Method::SignMessage),
            GateDecision::NeedsGrant(Capability::Sign)
        );

        gate.grant(&[Capability::Sign]);
        assert_eq!(gate.check(Method::SignMessage), GateDecision::Allowed);
        assert_eq!(gate.granted(), vec![Capability::Accounts, Capability::Sign]);
    }

    #[test]
    fn test_capability_wire_names() {
        assert_eq!(serde_json::to_value(Capability::Transact).unwrap(), "transact");
        let cap: Capability = serde_json::from_str("\"sign\"").unwrap();
        assert_eq!(cap, Capability::Sign);
    }

    #[tokio::test]
    async fn test_session_grants_forget() {
        let policy = SessionGrants;
        policy.record("app", &[Capability::Sign]).await;
        assert!(policy.load("app").await.is_empty());
    }

    #[tokio::test]
    async fn test_memory_store_remembers() {
        let store = MemoryGrantStore::new();
        store.record("app", &[Capability::Sign]).await;
        store.record("app", &[Capability::Accounts, Capability::Sign]).await;
        assert_eq!(
            store.load("app").await,
            vec![Capability::Accounts, Capability::Sign]
        );
        assert!(store.load("other").await.is_empty());
        assert!(store.forget("app").await);
        assert!(store.load("app").await.is_empty());
    }
}
