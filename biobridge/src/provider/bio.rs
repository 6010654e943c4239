//! The native Bio provider.
//!
//! `request({method, params})` passes canonical methods straight through;
//! every other facade is a translation into this vocabulary.

use super::{ConnectionFlag, ProviderCore, RequestArguments, decode};
use crate::emitter::{EventEmitter, ListenerId};
use crate::error::RpcResult;
use crate::method::Method;
use crate::protocol::events;
use crate::types::Account;
use serde::de::DeserializeOwned;
use std::sync::{Arc, PoisonError, RwLock};
use tracing::debug;

#[derive(Debug, Default)]
struct BioState {
    connected: ConnectionFlag,
    accounts: RwLock<Vec<Account>>,
    chain: RwLock<Option<String>>,
}

impl BioState {
    fn set_accounts(&self, accounts: Vec<Account>) {
        *self.accounts.write().unwrap_or_else(PoisonError::into_inner) = accounts;
    }

    fn set_chain(&self, chain: Option<String>) {
        *self.chain.write().unwrap_or_else(PoisonError::into_inner) = chain;
    }
}

/// The native Bio provider facade.
#[derive(Debug, Clone)]
pub struct BioProvider {
    core: Arc<ProviderCore>,
    events: EventEmitter,
    state: Arc<BioState>,
}

impl BioProvider {
    /// Build the facade on a core.
    #[must_use]
    pub fn new(core: Arc<ProviderCore>) -> Self {
        let provider = Self {
            core,
            events: EventEmitter::new(),
            state: Arc::new(BioState::default()),
        };
        provider.bind_events();
        provider
    }

    fn bind_events(&self) {
        let raw = self.core.events();

        let (state, out) = (Arc::clone(&self.state), self.events.clone());
        raw.on(events::CONNECT, move |payload| {
            state.connected.set(true);
            if let Some(chain) = payload.get("chainId").and_then(serde_json::Value::as_str) {
                state.set_chain(Some(chain.to_string()));
            }
            out.emit(events::CONNECT, payload);
        });

        let (state, out) = (Arc::clone(&self.state), self.events.clone());
        raw.on(events::DISCONNECT, move |payload| {
            state.connected.set(false);
            out.emit(events::DISCONNECT, payload);
        });

        let (state, out) = (Arc::clone(&self.state), self.events.clone());
        raw.on(events::ACCOUNTS_CHANGED, move |payload| {
            match serde_json::from_value::<Vec<Account>>(payload.clone()) {
                Ok(accounts) => state.set_accounts(accounts),
                Err(e) => debug!(error = %e, "ignoring malformed accountsChanged payload"),
            }
            out.emit(events::ACCOUNTS_CHANGED, payload);
        });

        let (state, out) = (Arc::clone(&self.state), self.events.clone());
        raw.on(events::CHAIN_CHANGED, move |payload| {
            state.set_chain(payload.as_str().map(str::to_string));
            out.emit(events::CHAIN_CHANGED, payload);
        });
    }

    /// Send a request in the canonical vocabulary.
    pub async fn request(&self, args: RequestArguments) -> RpcResult<serde_json::Value> {
        let result = self.core.request(&args.method, args.params).await?;
        self.observe(&args.method, &result);
        Ok(result)
    }

    /// Send a catalogue method and decode its result.
    pub async fn request_as<T: DeserializeOwned>(
        &self,
        method: Method,
        params: serde_json::Value,
    ) -> RpcResult<T> {
        let result = self
            .request(RequestArguments::new(method.as_str(), params))
            .await?;
        decode(result)
    }

    fn observe(&self, method: &str, result: &serde_json::Value) {
        match method.parse::<Method>() {
            Ok(Method::RequestAccounts | Method::Accounts) => {
                if let Ok(accounts) = serde_json::from_value::<Vec<Account>>(result.clone()) {
                    if !accounts.is_empty() {
                        self.state.connected.set(true);
                    }
                    self.state.set_accounts(accounts);
                }
            }
            Ok(Method::SelectAccount) => {
                if let Ok(account) = serde_json::from_value::<Account>(result.clone()) {
                    self.state.connected.set(true);
                    let mut accounts = self.accounts();
                    accounts.retain(|a| a != &account);
                    accounts.insert(0, account);
                    self.state.set_accounts(accounts);
                }
            }
            Ok(Method::ChainId) => {
                self.state.set_chain(result.as_str().map(str::to_string));
            }
            _ => {}
        }
    }

    /// Whether the provider has connected.
    #[must_use]
    pub fn is_connected(&self) -> bool {
        self.state.connected.get()
    }

    /// Cached accounts from the last accounts response or push.
    #[must_use]
    pub fn accounts(&self) -> Vec<Account> {
        self.state
            .accounts
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Cached host chain id.
    #[must_use]
    pub fn chain(&self) -> Option<String> {
        self.state
            .chain
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Subscribe to an event.
    pub fn on<F>(&self, event: &str, listener: F) -> ListenerId
    where
        F: Fn(&serde_json::Value) + Send + Sync + 'static,
    {
        self.events.on(event, listener)
    }

    /// Subscribe to the next occurrence of an event.
    pub fn once<F>(&self, event: &str, listener: F) -> ListenerId
    where
        F: Fn(&serde_json::Value) + Send + Sync + 'static,
    {
        self.events.once(event, listener)
    }

    /// Unsubscribe a listener.
    pub fn off(&self, event: &str, id: ListenerId) -> bool {
        self.events.off(event, id)
    }

    /// Remove listeners of one event, or of every event.
    pub fn remove_all_listeners(&self, event: Option<&str>) {
        self.events.remove_all_listeners(event);
    }

    /// The core this facade runs on.
    #[must_use]
    pub fn core(&self) -> &Arc<ProviderCore> {
        &self.core
    }
}

#[cfg(test)]
mod tests {
    use super::super::test_support::{app_transport, pair};
    use super::*;
    use crate::error::{ErrorCode, ProviderRpcError};
    use crate::protocol::{ProtocolTag, RpcResponse};
    use serde_json::json;
    use std::time::Duration;

    fn provider(port: crate::port::MessagePort) -> BioProvider {
        BioProvider::new(ProviderCore::spawn(
            app_transport(port, ProtocolTag::Bio),
            ProtocolTag::Bio,
        ))
    }

    #[tokio::test]
    async fn test_chain_id_round_trip() {
        let (app, mut host) = pair();
        let bio = provider(app);

        let call = tokio::spawn({
            let bio = bio.clone();
            async move { bio.request(RequestArguments::method("bio_chainId")).await }
        });
        let (protocol, req) = host.next_request().await;
        host.reply(protocol, RpcResponse::success(req.id, json!("bfmeta")));

        assert_eq!(call.await.unwrap().unwrap(), json!("bfmeta"));
        assert_eq!(bio.chain().as_deref(), Some("bfmeta"));
    }

    #[tokio::test]
    async fn test_connected_after_accounts() {
        let (app, mut host) = pair();
        let bio = provider(app);
        assert!(!bio.is_connected());

        let call = tokio::spawn({
            let bio = bio.clone();
            async move {
                bio.request_as::<Vec<Account>>(Method::RequestAccounts, json!({}))
                    .await
            }
        });
        let (protocol, req) = host.next_request().await;
        let account = Account::new("bAddr", "bfmeta", "pk");
        host.reply(
            protocol,
            RpcResponse::success(req.id, serde_json::to_value(vec![account.clone()]).unwrap()),
        );

        assert_eq!(call.await.unwrap().unwrap(), vec![account.clone()]);
        assert!(bio.is_connected());
        assert_eq!(bio.accounts(), vec![account]);
    }

    #[tokio::test]
    async fn test_rejection_surfaces_code() {
        let (app, mut host) = pair();
        let bio = provider(app);

        let call = tokio::spawn({
            let bio = bio.clone();
            async move {
                bio.request(RequestArguments::new("bio_signMessage", json!({})))
                    .await
            }
        });
        let (protocol, req) = host.next_request().await;
        host.reply(
            protocol,
            RpcResponse::failure(req.id, ProviderRpcError::user_rejected()),
        );
        assert_eq!(call.await.unwrap().unwrap_err().code, ErrorCode::UserRejected);
        assert!(!bio.is_connected());
    }

    #[tokio::test]
    async fn test_events_update_state_before_listeners_run() {
        let (app, host) = pair();
        let bio = provider(app);
        let (tx, mut rx) = tokio::sync::mpsc::unbounded_channel();
        let observer = bio.clone();
        bio.on(events::CONNECT, move |_| {
            let _ = tx.send(observer.is_connected());
        });

        host.push(ProtocolTag::Bio, events::CONNECT, json!({"chainId": "bfmeta"}));
        let seen = tokio::time::timeout(Duration::from_secs(1), rx.recv())
            .await
            .unwrap()
            .unwrap();
        assert!(seen);
        assert_eq!(bio.chain().as_deref(), Some("bfmeta"));
    }
}
