//! Request dispatch for one attach cycle.
//!
//! Each inbound request runs through the same phases: resolve the method,
//! consult the permission gate (prompting if needed), validate params, open
//! the prompt slot, and invoke the collaborator. Every outcome is normalized
//! to a wire error before it leaves this module.

use super::collaborators::{
    AccountPickRequest, CollaboratorError, Collaborators, PermissionRequest, PickPurpose,
    SigningRequest,
};
use super::prompt::{PromptKind, PromptSlots};
use super::stats::StatsCounters;
use crate::config::BridgeConfig;
use crate::error::{ErrorCode, ProviderRpcError, RpcResult};
use crate::method::Method;
use crate::permission::{Capability, GateDecision, GrantPolicy, PermissionGate};
use crate::protocol::{EventMessage, ProtocolTag, RpcRequest, WireMessage, events};
use crate::transport::Transport;
use crate::types::{
    Account, AccountQuery, AppInfo, BalanceQuery, BroadcastParams, SignMessageParams,
    SignTransactionParams, SignTypedDataParams, TransferParams,
};
use serde::Serialize;
use serde::de::DeserializeOwned;
use serde_json::{Value, json};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, PoisonError, RwLock};
use tracing::{debug, error, info, warn};

/// State shared by every attach cycle of a bridge.
pub(crate) struct Shared {
    pub(crate) config: Arc<BridgeConfig>,
    pub(crate) collaborators: Collaborators,
    pub(crate) permission: Arc<RwLock<Option<Arc<dyn PermissionRequest>>>>,
    pub(crate) grants: Arc<dyn GrantPolicy>,
    pub(crate) prompts: Arc<PromptSlots>,
    pub(crate) stats: Arc<StatsCounters>,
}

impl Shared {
    fn permission_callback(&self) -> Option<Arc<dyn PermissionRequest>> {
        self.permission
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }
}

/// State of one attach cycle.
pub(crate) struct Session {
    pub(crate) app: AppInfo,
    pub(crate) gate: PermissionGate,
    pub(crate) transport: Transport,
    connected: RwLock<Vec<Account>>,
    active: AtomicBool,
}

impl Session {
    pub(crate) fn new(app: AppInfo, gate: PermissionGate, transport: Transport) -> Self {
        Self {
            app,
            gate,
            transport,
            connected: RwLock::new(Vec::new()),
            active: AtomicBool::new(true),
        }
    }

    pub(crate) fn is_active(&self) -> bool {
        self.active.load(Ordering::Acquire)
    }

    pub(crate) fn deactivate(&self) {
        self.active.store(false, Ordering::Release);
    }

    pub(crate) fn connected(&self) -> Vec<Account> {
        self.connected
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    pub(crate) fn set_connected(&self, accounts: Vec<Account>) {
        *self.connected.write().unwrap_or_else(PoisonError::into_inner) = accounts;
    }

    fn is_connected_address(&self, address: &str) -> bool {
        self.connected
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .any(|a| a.has_address(address))
    }

    /// Add an account, or move it to the front if already connected.
    fn connect(&self, account: &Account) -> Vec<Account> {
        let mut connected = self.connected.write().unwrap_or_else(PoisonError::into_inner);
        connected.retain(|a| !(a.has_address(&account.address) && a.is_on(&account.chain)));
        connected.insert(0, account.clone());
        connected.clone()
    }

    /// Push an event on every served protocol.
    pub(crate) fn push(&self, event: &str, payload: &Value) {
        for &protocol in self.transport.protocols() {
            let message = WireMessage::Event(EventMessage::new(event, payload.clone()));
            if let Err(e) = self.transport.post_outbound(protocol, message) {
                debug!(%protocol, event, error = %e, "failed to push event");
            }
        }
    }
}

/// Params arrive as an object, a one-element array wrapping it, or nothing.
fn parse_params<T: DeserializeOwned>(params: &Value) -> RpcResult<T> {
    let object = match params {
        Value::Null => json!({}),
        Value::Array(items) => match items.as_slice() {
            [] => json!({}),
            [only] => only.clone(),
            _ => return Err(ProviderRpcError::invalid_params("expected a params object")),
        },
        other => other.clone(),
    };
    serde_json::from_value(object).map_err(|e| ProviderRpcError::invalid_params(e.to_string()))
}

fn to_result<T: Serialize>(value: &T) -> RpcResult<Value> {
    serde_json::to_value(value).map_err(|_| ProviderRpcError::internal())
}

fn denied(capability: Capability) -> ProviderRpcError {
    ProviderRpcError::unauthorized().with_data(json!({ "capabilities": [capability] }))
}

/// Run one request to completion.
pub(crate) async fn dispatch(
    shared: &Shared,
    session: &Session,
    request: &RpcRequest,
) -> RpcResult<Value> {
    let Ok(method) = request.method.parse::<Method>() else {
        return Err(ProviderRpcError::method_not_found(&request.method));
    };
    if shared.config.is_disabled(method) {
        return Err(ProviderRpcError::unsupported_method(method.as_str()));
    }
    authorize(shared, session, method).await?;
    let ctx = Handler {
        shared,
        session,
        method,
    };
    ctx.run(&request.params).await
}

/// Consult the gate, prompting for a missing capability.
async fn authorize(shared: &Shared, session: &Session, method: Method) -> RpcResult<()> {
    let GateDecision::NeedsGrant(capability) = session.gate.check(method) else {
        return Ok(());
    };
    let app_id = session.app.id.as_str();
    let Some(callback) = shared.permission_callback() else {
        warn!(app_id, %method, %capability, "no permission callback, denying");
        return Err(denied(capability));
    };

    let _prompt = shared.prompts.acquire(PromptKind::Permission).await?;
    // An earlier prompt may have granted it while this one waited.
    if session.gate.is_granted(capability) {
        return Ok(());
    }
    if !session.is_active() {
        return Err(ProviderRpcError::disconnected());
    }

    shared.stats.permission_prompt();
    info!(app_id, %method, %capability, "requesting permission");
    let approved = callback
        .request_permission(app_id, &session.app.name, &[capability])
        .await;
    if !approved {
        info!(app_id, %capability, "permission denied");
        return Err(denied(capability));
    }

    session.gate.grant(&[capability]);
    shared.grants.record(app_id, &session.gate.granted()).await;
    info!(app_id, %capability, "permission granted");
    Ok(())
}

struct Handler<'a> {
    shared: &'a Shared,
    session: &'a Session,
    method: Method,
}

impl Handler<'_> {
    fn collaborators(&self) -> &Collaborators {
        &self.shared.collaborators
    }

    fn app(&self) -> &AppInfo {
        &self.session.app
    }

    /// Map a collaborator failure onto the wire, logging the raw error.
    fn host_failure(&self, e: CollaboratorError) -> ProviderRpcError {
        match e {
            CollaboratorError::InvalidParams(msg) => ProviderRpcError::invalid_params(msg),
            CollaboratorError::Failed(msg) => {
                error!(app_id = %self.app().id, method = %self.method, error = %msg, "host failure");
                ProviderRpcError::internal()
            }
        }
    }

    fn require_connected(&self, address: &str) -> RpcResult<()> {
        if self.session.is_connected_address(address) {
            Ok(())
        } else {
            debug!(app_id = %self.app().id, address, "address not connected");
            Err(ProviderRpcError::with_message(
                ErrorCode::Unauthorized,
                format!("Address '{address}' is not connected"),
            ))
        }
    }

    async fn open_prompt(&self) -> RpcResult<Option<super::prompt::PromptGuard>> {
        let Some(kind) = PromptKind::for_method(self.method) else {
            return Ok(None);
        };
        if self.shared.prompts.is_busy(kind) {
            debug!(app_id = %self.app().id, method = %self.method, prompt = %kind, "prompt already open");
        }
        Ok(Some(self.shared.prompts.acquire(kind).await?))
    }

    async fn run(&self, params: &Value) -> RpcResult<Value> {
        match self.method {
            Method::RequestAccounts => self.request_accounts(parse_params(params)?).await,
            Method::Accounts => {
                let query: AccountQuery = parse_params(params)?;
                let accounts: Vec<Account> = self
                    .session
                    .connected()
                    .into_iter()
                    .filter(|a| query.matches(a))
                    .collect();
                to_result(&accounts)
            }
            Method::SelectAccount => {
                let query: AccountQuery = parse_params(params)?;
                let account = self.pick(PickPurpose::Select, query.chain).await?;
                let connected = self.session.connect(&account);
                self.session
                    .push(events::ACCOUNTS_CHANGED, &to_result(&connected)?);
                to_result(&account)
            }
            Method::PickWallet => {
                let query: AccountQuery = parse_params(params)?;
                let account = self.pick(PickPurpose::PickWallet, query.chain).await?;
                to_result(&account)
            }
            Method::SignMessage => {
                let params: SignMessageParams = parse_params(params)?;
                self.sign(SigningRequest::Message(params)).await
            }
            Method::SignTypedData => {
                let params: SignTypedDataParams = parse_params(params)?;
                self.sign(SigningRequest::TypedData(params)).await
            }
            Method::SignTransaction => {
                let params: SignTransactionParams = parse_params(params)?;
                self.sign(SigningRequest::Transaction(params)).await
            }
            Method::CreateTransaction => {
                let params: TransferParams = parse_params(params)?;
                self.require_connected(&params.from)?;
                self.collaborators()
                    .wallet
                    .create_transaction(&params)
                    .await
                    .map_err(|e| self.host_failure(e))
            }
            Method::SendTransaction => {
                let params: TransferParams = parse_params(params)?;
                self.require_connected(&params.from)?;
                let _prompt = self.open_prompt().await?;
                let receipt = self
                    .collaborators()
                    .transfer
                    .confirm_transfer(&params, self.app())
                    .await
                    .map_err(|e| self.host_failure(e))?
                    .ok_or_else(ProviderRpcError::user_rejected)?;
                to_result(&receipt)
            }
            Method::BroadcastTransaction => {
                let params: BroadcastParams = parse_params(params)?;
                let receipt = self
                    .collaborators()
                    .wallet
                    .broadcast(&params)
                    .await
                    .map_err(|e| self.host_failure(e))?;
                to_result(&receipt)
            }
            Method::ChainId => {
                let chain = self
                    .collaborators()
                    .wallet
                    .chain_id()
                    .await
                    .map_err(|e| self.host_failure(e))?;
                Ok(Value::String(chain))
            }
            Method::GetBalance => {
                let query: BalanceQuery = parse_params(params)?;
                let balance = self
                    .collaborators()
                    .wallet
                    .balance(&query)
                    .await
                    .map_err(|e| self.host_failure(e))?;
                Ok(Value::String(balance))
            }
            Method::CloseSplashScreen => {
                self.collaborators()
                    .wallet
                    .close_splash_screen()
                    .await
                    .map_err(|e| self.host_failure(e))?;
                Ok(Value::Null)
            }
        }
    }

    async fn request_accounts(&self, query: AccountQuery) -> RpcResult<Value> {
        let already: Vec<Account> = self
            .session
            .connected()
            .into_iter()
            .filter(|a| query.matches(a))
            .collect();
        if !already.is_empty() {
            debug!(app_id = %self.app().id, "accounts already connected");
            return to_result(&already);
        }

        let account = self.pick(PickPurpose::Connect, query.chain).await?;
        let connected = self.session.connect(&account);
        self.session
            .push(events::ACCOUNTS_CHANGED, &to_result(&connected)?);
        to_result(&vec![account])
    }

    async fn pick(&self, purpose: PickPurpose, chain: Option<String>) -> RpcResult<Account> {
        let _prompt = self.open_prompt().await?;
        let request = AccountPickRequest { purpose, chain };
        self.collaborators()
            .account_picker
            .pick(&request, self.app())
            .await
            .map_err(|e| self.host_failure(e))?
            .ok_or_else(ProviderRpcError::user_rejected)
    }

    async fn sign(&self, request: SigningRequest) -> RpcResult<Value> {
        self.require_connected(request.address())?;
        let _prompt = self.open_prompt().await?;
        self.collaborators()
            .signing
            .confirm_signing(&request, self.app())
            .await
            .map_err(|e| self.host_failure(e))?
            .ok_or_else(ProviderRpcError::user_rejected)
    }
}

/// Protocols a bridge serves; an empty list serves all of them.
pub(crate) fn serve_protocols(config: &BridgeConfig) -> Vec<ProtocolTag> {
    if config.protocols.is_empty() {
        ProtocolTag::ALL.to_vec()
    } else {
        config.protocols.clone()
    }
}
