//! The trusted side of the bridge.
//!
//! A [`HostBridge`] attaches to one miniapp port at a time. Inbound requests
//! are dispatched on their own tasks so a slow confirmation never blocks an
//! unrelated call; privileged work goes to the [`Collaborators`] supplied by
//! the wallet application.
//!
//! # Lifecycle
//!
//! ```text
//! detached -> attach() -> attached -> detach() -> detached
//!                           |
//!                           +-- per request: idle -> awaiting_permission?
//!                                            -> awaiting_handler -> responded
//! ```
//!
//! `detach()` closes the port. The facades on the other end observe the
//! close and reject everything still pending with a disconnect.

pub mod collaborators;
mod dispatch;
pub mod prompt;
mod stats;

pub use collaborators::{
    AccountPickRequest, AccountPicker, CollaboratorError, CollaboratorResult, Collaborators,
    HostWallet, PermissionRequest, PickPurpose, SigningConfirmation, SigningRequest,
    TransferConfirmation,
};
pub use prompt::{PromptGuard, PromptKind, PromptSlots};
pub use stats::BridgeStats;

use crate::config::BridgeConfig;
use crate::error::{BridgeError, ProviderRpcError, Result};
use crate::permission::{Capability, GrantPolicy, PermissionGate, SessionGrants};
use crate::port::MessagePort;
use crate::protocol::{ProtocolTag, RpcRequest, RpcResponse, WireMessage, events};
use crate::transport::{Inbound, OriginAllowlist, Transport, TransportConfig};
use crate::types::{Account, AppInfo};
use dispatch::{Session, Shared, dispatch, serve_protocols};
use serde_json::{Value, json};
use stats::StatsCounters;
use std::sync::{Arc, Mutex, PoisonError, RwLock};
use tokio::task::{JoinHandle, JoinSet};
use tracing::{debug, info, trace};

/// Lifecycle events the host pushes to an attached miniapp.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HostEvent {
    /// The wallet is ready on a chain.
    Connect {
        /// Host chain id.
        chain: String,
    },
    /// The wallet disconnected from the app.
    Disconnect,
    /// The app's connected accounts changed. The list replaces the previous one.
    AccountsChanged(Vec<Account>),
    /// The wallet switched chains.
    ChainChanged(String),
}

impl HostEvent {
    /// Wire event name.
    #[must_use]
    pub const fn name(&self) -> &'static str {
        match self {
            Self::Connect { .. } => events::CONNECT,
            Self::Disconnect => events::DISCONNECT,
            Self::AccountsChanged(_) => events::ACCOUNTS_CHANGED,
            Self::ChainChanged(_) => events::CHAIN_CHANGED,
        }
    }

    fn payload(&self) -> Value {
        match self {
            Self::Connect { chain } => json!({ "chainId": chain }),
            Self::Disconnect => {
                serde_json::to_value(ProviderRpcError::disconnected()).unwrap_or(Value::Null)
            }
            Self::AccountsChanged(accounts) => json!(accounts),
            Self::ChainChanged(chain) => json!(chain),
        }
    }
}

/// Whether the bridge serves a miniapp.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BridgeState {
    /// No miniapp attached.
    Detached,
    /// Serving the given app.
    Attached(AppInfo),
}

struct Attachment {
    session: Arc<Session>,
    task: JoinHandle<()>,
}

impl Attachment {
    fn is_live(&self) -> bool {
        self.session.is_active() && !self.task.is_finished()
    }
}

impl Drop for Attachment {
    fn drop(&mut self) {
        self.task.abort();
    }
}

/// Host side dispatcher.
pub struct HostBridge {
    config: Arc<BridgeConfig>,
    collaborators: Collaborators,
    permission: Arc<RwLock<Option<Arc<dyn PermissionRequest>>>>,
    grants: Arc<dyn GrantPolicy>,
    prompts: Arc<PromptSlots>,
    stats: Arc<StatsCounters>,
    attachment: Mutex<Option<Attachment>>,
}

impl std::fmt::Debug for HostBridge {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HostBridge")
            .field("state", &self.state())
            .field("policy", &self.prompts.policy())
            .finish_non_exhaustive()
    }
}

impl HostBridge {
    /// Create a detached bridge.
    #[must_use]
    pub fn new(config: BridgeConfig, collaborators: Collaborators) -> Self {
        let prompts = Arc::new(PromptSlots::new(config.confirmation_policy));
        Self {
            config: Arc::new(config),
            collaborators,
            permission: Arc::new(RwLock::new(None)),
            grants: Arc::new(SessionGrants),
            prompts,
            stats: Arc::new(StatsCounters::default()),
            attachment: Mutex::new(None),
        }
    }

    /// Use a grant policy other than per-session grants.
    #[must_use]
    pub fn with_grant_policy(mut self, grants: Arc<dyn GrantPolicy>) -> Self {
        self.grants = grants;
        self
    }

    /// Install the collaborator asked to approve missing capabilities.
    ///
    /// Without one, every ungranted capability is denied.
    pub fn set_permission_request_callback(&self, callback: Arc<dyn PermissionRequest>) {
        *self
            .permission
            .write()
            .unwrap_or_else(PoisonError::into_inner) = Some(callback);
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Option<Attachment>> {
        self.attachment.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn live_session(&self) -> Option<Arc<Session>> {
        self.lock()
            .as_ref()
            .filter(|a| a.is_live())
            .map(|a| Arc::clone(&a.session))
    }

    fn shared(&self) -> Shared {
        Shared {
            config: Arc::clone(&self.config),
            collaborators: self.collaborators.clone(),
            permission: Arc::clone(&self.permission),
            grants: Arc::clone(&self.grants),
            prompts: Arc::clone(&self.prompts),
            stats: Arc::clone(&self.stats),
        }
    }

    /// Start serving a miniapp on `port`.
    ///
    /// `granted` seeds the app's capabilities, together with whatever the
    /// grant policy remembers. Fails while another app is attached, or when
    /// `port` does not live in the configured host origin.
    pub async fn attach(
        &self,
        port: MessagePort,
        app: AppInfo,
        granted: impl IntoIterator<Item = Capability>,
    ) -> Result<()> {
        if let Some(session) = self.live_session() {
            return Err(BridgeError::AlreadyAttached(session.app.id.clone()));
        }
        if port.origin() != self.config.host_origin {
            return Err(BridgeError::config(format!(
                "port origin '{}' does not match host origin '{}'",
                port.origin(),
                self.config.host_origin
            )));
        }

        let remembered = self.grants.load(&app.id).await;
        let gate = PermissionGate::new(app.id.clone(), granted.into_iter().chain(remembered));
        let target_origin = port.peer_origin().to_string();
        let transport_config = TransportConfig::with_protocols(serve_protocols(&self.config))
            .allowed_origins(OriginAllowlist::from_origins(
                self.config.allowed_origins.iter().cloned(),
            ))
            .target_origin(target_origin);
        let transport = Transport::new(port, transport_config);
        let inbound = transport.on_inbound_message();

        let mut slot = self.lock();
        if let Some(current) = slot.as_ref().filter(|a| a.is_live()) {
            return Err(BridgeError::AlreadyAttached(current.session.app.id.clone()));
        }
        let session = Arc::new(Session::new(app, gate, transport));
        info!(
            app_id = %session.app.id,
            granted = ?session.gate.granted(),
            "bridge attached"
        );
        let task = tokio::spawn(serve(
            Arc::new(self.shared()),
            Arc::clone(&session),
            inbound,
        ));
        *slot = Some(Attachment { session, task });
        Ok(())
    }

    /// Stop serving the attached miniapp and close its port.
    ///
    /// In-flight handlers are dropped; their facades reject with a disconnect.
    pub fn detach(&self) -> Result<()> {
        let Some(attachment) = self.lock().take() else {
            return Err(BridgeError::NotAttached);
        };
        attachment.session.deactivate();
        attachment.task.abort();
        attachment.session.transport.close();
        info!(app_id = %attachment.session.app.id, "bridge detached");
        Ok(())
    }

    /// Push a lifecycle event to the attached miniapp.
    pub fn emit(&self, event: HostEvent) -> Result<()> {
        let session = self.live_session().ok_or(BridgeError::NotAttached)?;
        match &event {
            HostEvent::AccountsChanged(accounts) => session.set_connected(accounts.clone()),
            HostEvent::Disconnect => session.set_connected(Vec::new()),
            HostEvent::Connect { .. } | HostEvent::ChainChanged(_) => {}
        }
        debug!(app_id = %session.app.id, event = event.name(), "pushing event");
        session.push(event.name(), &event.payload());
        Ok(())
    }

    /// Current lifecycle state.
    #[must_use]
    pub fn state(&self) -> BridgeState {
        self.live_session()
            .map_or(BridgeState::Detached, |s| BridgeState::Attached(s.app.clone()))
    }

    /// Capabilities held by the attached app.
    #[must_use]
    pub fn granted(&self) -> Option<Vec<Capability>> {
        self.live_session().map(|s| s.gate.granted())
    }

    /// Accounts connected in the current attach cycle.
    #[must_use]
    pub fn connected_accounts(&self) -> Vec<Account> {
        self.live_session()
            .map(|s| s.connected())
            .unwrap_or_default()
    }

    /// Protocols this bridge serves.
    #[must_use]
    pub fn protocols(&self) -> Vec<ProtocolTag> {
        serve_protocols(&self.config)
    }

    /// Activity counters.
    #[must_use]
    pub fn stats(&self) -> BridgeStats {
        self.stats.snapshot()
    }
}

/// Dispatch loop of one attach cycle.
async fn serve(shared: Arc<Shared>, session: Arc<Session>, mut inbound: Inbound) {
    let mut tasks = JoinSet::new();
    while let Some((protocol, message)) = inbound.recv().await {
        while tasks.try_join_next().is_some() {}

        let WireMessage::Request(request) = message else {
            trace!(%protocol, "ignoring non-request message");
            continue;
        };
        if !session.is_active() {
            break;
        }
        shared.stats.received();
        debug!(
            app_id = %session.app.id,
            request_id = %request.id,
            method = %request.method,
            %protocol,
            "request received"
        );
        tasks.spawn(handle(
            Arc::clone(&shared),
            Arc::clone(&session),
            protocol,
            request,
        ));
    }
    session.deactivate();
    debug!(app_id = %session.app.id, in_flight = tasks.len(), "dispatch loop ended");
}

async fn handle(
    shared: Arc<Shared>,
    session: Arc<Session>,
    protocol: ProtocolTag,
    request: RpcRequest,
) {
    let outcome = dispatch(&shared, &session, &request).await;
    if !session.is_active() {
        debug!(request_id = %request.id, "attach cycle ended, dropping response");
        return;
    }
    match &outcome {
        Ok(_) => debug!(request_id = %request.id, method = %request.method, "request resolved"),
        Err(e) => debug!(
            request_id = %request.id,
            method = %request.method,
            code = e.code.as_i64(),
            "request rejected"
        ),
    }
    shared.stats.settled(outcome.is_ok());
    let response = RpcResponse::from_outcome(request.id, outcome);
    if let Err(e) = session
        .transport
        .post_outbound(protocol, WireMessage::Response(response))
    {
        debug!(error = %e, "failed to post response");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorCode;
    use crate::port::message_channel;
    use crate::provider::{BioProvider, ProviderCore, RequestArguments};
    use crate::types::{BalanceQuery, BroadcastParams, TransferParams, TransferReceipt};
    use async_trait::async_trait;
    use std::time::Duration;

    struct StubWallet;

    #[async_trait]
    impl AccountPicker for StubWallet {
        async fn pick(
            &self,
            _request: &AccountPickRequest,
            _app: &AppInfo,
        ) -> CollaboratorResult<Option<Account>> {
            Ok(Some(Account::new("bAddr", "bfmeta", "02aa")))
        }
    }

    #[async_trait]
    impl SigningConfirmation for StubWallet {
        async fn confirm_signing(
            &self,
            _request: &SigningRequest,
            _app: &AppInfo,
        ) -> CollaboratorResult<Option<Value>> {
            Ok(Some(json!("sig")))
        }
    }

    #[async_trait]
    impl TransferConfirmation for StubWallet {
        async fn confirm_transfer(
            &self,
            _params: &TransferParams,
            _app: &AppInfo,
        ) -> CollaboratorResult<Option<TransferReceipt>> {
            Ok(None)
        }
    }

    #[async_trait]
    impl HostWallet for StubWallet {
        async fn chain_id(&self) -> CollaboratorResult<String> {
            Ok("bfmeta".into())
        }

        async fn balance(&self, _query: &BalanceQuery) -> CollaboratorResult<String> {
            Err(CollaboratorError::failed("node unreachable"))
        }

        async fn create_transaction(&self, _params: &TransferParams) -> CollaboratorResult<Value> {
            Ok(json!({}))
        }

        async fn broadcast(&self, _params: &BroadcastParams) -> CollaboratorResult<TransferReceipt> {
            Ok(TransferReceipt { tx_hash: "h".into() })
        }
    }

    fn bridge(config: BridgeConfig) -> HostBridge {
        let wallet = Arc::new(StubWallet);
        HostBridge::new(
            config,
            Collaborators::new(wallet.clone(), wallet.clone(), wallet.clone(), wallet),
        )
    }

    async fn attached(config: BridgeConfig, granted: &[Capability]) -> (HostBridge, BioProvider) {
        let (app, host) = message_channel("https://app.example", config.host_origin.clone());
        let bridge = bridge(config);
        bridge
            .attach(host, AppInfo::new("app", "App"), granted.iter().copied())
            .await
            .unwrap();
        let transport = Transport::new(app, TransportConfig::new(ProtocolTag::Bio));
        let bio = BioProvider::new(ProviderCore::spawn(transport, ProtocolTag::Bio));
        (bridge, bio)
    }

    async fn call(bio: &BioProvider, method: &str, params: Value) -> crate::error::RpcResult<Value> {
        tokio::time::timeout(
            Duration::from_secs(2),
            bio.request(RequestArguments::new(method, params)),
        )
        .await
        .unwrap()
    }

    #[tokio::test]
    async fn test_attach_lifecycle() {
        let (bridge, _bio) = attached(BridgeConfig::default(), &[]).await;
        assert!(matches!(bridge.state(), BridgeState::Attached(ref app) if app.id == "app"));

        let (_, other) = message_channel("a", "b");
        let err = bridge
            .attach(other, AppInfo::new("other", "Other"), [])
            .await
            .unwrap_err();
        assert!(matches!(err, BridgeError::AlreadyAttached(ref id) if id == "app"));

        bridge.detach().unwrap();
        assert_eq!(bridge.state(), BridgeState::Detached);
        assert!(matches!(bridge.detach(), Err(BridgeError::NotAttached)));
        assert!(matches!(
            bridge.emit(HostEvent::ChainChanged("tron".into())),
            Err(BridgeError::NotAttached)
        ));
    }

    #[tokio::test]
    async fn test_attach_requires_host_origin() {
        let bridge = bridge(BridgeConfig::default());
        let (_app, host) = message_channel("https://app.example", "https://elsewhere.example");
        let err = bridge
            .attach(host, AppInfo::new("app", "App"), [])
            .await
            .unwrap_err();
        assert!(matches!(err, BridgeError::Config(_)));
        assert_eq!(bridge.state(), BridgeState::Detached);
    }

    #[tokio::test]
    async fn test_unknown_and_disabled_methods() {
        let config = BridgeConfig {
            disabled_methods: vec!["bio_closeSplashScreen".into()],
            ..BridgeConfig::default()
        };
        let (bridge, bio) = attached(config, &[]).await;

        let err = call(&bio, "bio_teleport", Value::Null).await.unwrap_err();
        assert_eq!(err.code, ErrorCode::MethodNotFound);
        let err = call(&bio, "bio_closeSplashScreen", Value::Null)
            .await
            .unwrap_err();
        assert_eq!(err.code, ErrorCode::UnsupportedMethod);
        assert_eq!(call(&bio, "bio_chainId", Value::Null).await.unwrap(), json!("bfmeta"));

        let stats = bridge.stats();
        assert_eq!(stats.received, 3);
        assert_eq!(stats.responded, 1);
        assert_eq!(stats.rejected, 2);
    }

    #[tokio::test]
    async fn test_host_failure_is_internal_error() {
        let (_bridge, bio) = attached(BridgeConfig::default(), &[]).await;
        let err = call(
            &bio,
            "bio_getBalance",
            json!({"address": "bAddr", "chain": "bfmeta"}),
        )
        .await
        .unwrap_err();
        assert_eq!(err.code, ErrorCode::InternalError);
        assert!(!err.message.contains("node unreachable"));
    }

    #[tokio::test]
    async fn test_missing_callback_denies() {
        let (bridge, bio) = attached(BridgeConfig::default(), &[]).await;
        let err = call(&bio, "bio_requestAccounts", json!({})).await.unwrap_err();
        assert_eq!(err.code, ErrorCode::Unauthorized);
        assert_eq!(bridge.stats().permission_prompts, 0);
    }

    #[tokio::test]
    async fn test_signing_requires_connected_address() {
        let (bridge, bio) = attached(
            BridgeConfig::default(),
            &[Capability::Accounts, Capability::Sign],
        )
        .await;

        let sign = json!({"message": "hi", "address": "bAddr"});
        let err = call(&bio, "bio_signMessage", sign.clone()).await.unwrap_err();
        assert_eq!(err.code, ErrorCode::Unauthorized);

        call(&bio, "bio_requestAccounts", json!({})).await.unwrap();
        assert_eq!(bridge.connected_accounts().len(), 1);
        assert_eq!(call(&bio, "bio_signMessage", sign).await.unwrap(), json!("sig"));
    }

    #[tokio::test]
    async fn test_hex_tron_account_signs_by_base58() {
        let (bridge, bio) = attached(BridgeConfig::default(), &[Capability::Sign]).await;
        bridge
            .emit(HostEvent::AccountsChanged(vec![Account::new(
                "410000000000000000000000000000000000000000",
                "tron",
                "02cc",
            )]))
            .unwrap();

        let sign = json!({"message": "hi", "address": "T9yD14Nj9j7xAB4dbGeiX9h8unkKHxuWwb"});
        assert_eq!(call(&bio, "bio_signMessage", sign).await.unwrap(), json!("sig"));
    }

    #[tokio::test]
    async fn test_declined_transfer_is_user_rejected() {
        let (_bridge, bio) = attached(
            BridgeConfig::default(),
            &[Capability::Accounts, Capability::Transact],
        )
        .await;
        call(&bio, "bio_requestAccounts", json!({})).await.unwrap();

        let err = call(
            &bio,
            "bio_sendTransaction",
            json!({"from": "bAddr", "to": "bOther", "amount": "1", "chain": "bfmeta"}),
        )
        .await
        .unwrap_err();
        assert_eq!(err.code, ErrorCode::UserRejected);
    }

    #[tokio::test]
    async fn test_host_accounts_event_replaces_connected() {
        let (bridge, bio) = attached(BridgeConfig::default(), &[Capability::Accounts]).await;
        call(&bio, "bio_requestAccounts", json!({})).await.unwrap();

        bridge.emit(HostEvent::AccountsChanged(Vec::new())).unwrap();
        assert!(bridge.connected_accounts().is_empty());
        assert_eq!(call(&bio, "bio_accounts", Value::Null).await.unwrap(), json!([]));
    }
}
