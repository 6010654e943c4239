//! Tron-compatible provider pair.
//!
//! [`TronLink`] mirrors the extension's account/request surface. [`TronWeb`],
//! reached through [`TronLink::tron_web`], carries the classic balance, sign
//! and broadcast calls and the default address pushed down by the host. Both
//! share one core and one state.

pub mod address;

pub use address::{TronAddress, from_hex, is_address, to_hex};

use super::{ConnectionFlag, ProviderCore, RequestArguments, decode};
use crate::chain::TRON;
use crate::emitter::{EventEmitter, ListenerId};
use crate::error::{ErrorCode, ProviderRpcError, RpcResult};
use crate::method::Method;
use crate::protocol::events;
use crate::types::{
    Account, AccountQuery, BalanceQuery, BroadcastParams, SignMessageParams,
    SignTransactionParams, TransferParams, TransferReceipt,
};
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, PoisonError, RwLock};
use tracing::debug;

#[derive(Debug, Default)]
struct TronState {
    connected: ConnectionFlag,
    ready: AtomicBool,
    default_address: RwLock<Option<TronAddress>>,
}

impl TronState {
    /// Adopt the first Tron account of a host list as default address.
    fn adopt(&self, accounts: &[Account]) -> Option<TronAddress> {
        let address = accounts
            .iter()
            .filter(|a| a.is_on(TRON))
            .find_map(|a| TronAddress::parse(&a.address));
        self.ready.store(address.is_some(), Ordering::Release);
        *self
            .default_address
            .write()
            .unwrap_or_else(PoisonError::into_inner) = address.clone();
        address
    }

    fn default_address(&self) -> Option<TronAddress> {
        self.default_address
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }
}

/// Answer of `tron_requestAccounts`, in the extension's `{code, message}` shape.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TronLinkReply {
    /// `200` on success, `4001` when the user declined.
    pub code: i64,
    /// Human readable outcome.
    pub message: String,
}

/// Result of a broadcast, in TronWeb's shape.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BroadcastResult {
    /// Whether the node accepted the transaction.
    pub result: bool,
    /// Transaction id.
    pub txid: String,
}

impl From<TransferReceipt> for BroadcastResult {
    fn from(receipt: TransferReceipt) -> Self {
        Self {
            result: true,
            txid: receipt.tx_hash,
        }
    }
}

/// TronLink-compatible object.
#[derive(Debug, Clone)]
pub struct TronLink {
    core: Arc<ProviderCore>,
    events: EventEmitter,
    state: Arc<TronState>,
    tron_web: TronWeb,
}

impl TronLink {
    /// Build the pair on a core.
    #[must_use]
    pub fn new(core: Arc<ProviderCore>) -> Self {
        let state = Arc::new(TronState::default());
        let tron_web = TronWeb {
            core: Arc::clone(&core),
            state: Arc::clone(&state),
        };
        let link = Self {
            core,
            events: EventEmitter::new(),
            state,
            tron_web,
        };
        link.bind_events();
        link
    }

    fn bind_events(&self) {
        let raw = self.core.events();

        let (state, out) = (Arc::clone(&self.state), self.events.clone());
        raw.on(events::CONNECT, move |payload| {
            state.connected.set(true);
            out.emit(events::CONNECT, payload);
        });

        let (state, out) = (Arc::clone(&self.state), self.events.clone());
        raw.on(events::DISCONNECT, move |payload| {
            state.connected.set(false);
            state.ready.store(false, Ordering::Release);
            out.emit(events::DISCONNECT, payload);
        });

        let (state, out) = (Arc::clone(&self.state), self.events.clone());
        raw.on(events::ACCOUNTS_CHANGED, move |payload| {
            let Ok(accounts) = serde_json::from_value::<Vec<Account>>(payload.clone()) else {
                debug!("ignoring malformed accountsChanged payload");
                return;
            };
            let address = state.adopt(&accounts);
            let base58: Vec<String> = address.into_iter().map(|a| a.base58).collect();
            out.emit(events::ACCOUNTS_CHANGED, &json!(base58));
        });

        let out = self.events.clone();
        raw.on(events::CHAIN_CHANGED, move |payload| {
            out.emit(events::CHAIN_CHANGED, payload);
        });
    }

    /// `tronLink.request({method})`. Only `tron_requestAccounts` is served.
    pub async fn request(&self, args: RequestArguments) -> RpcResult<TronLinkReply> {
        if args.method != "tron_requestAccounts" {
            return Err(ProviderRpcError::unsupported_method(&args.method));
        }
        let params = serde_json::to_value(AccountQuery::chain(TRON))
            .map_err(|_| ProviderRpcError::internal())?;
        match self
            .core
            .request(Method::RequestAccounts.as_str(), params)
            .await
        {
            Ok(result) => {
                let accounts: Vec<Account> = decode(result)?;
                if self.state.adopt(&accounts).is_none() {
                    return Err(ProviderRpcError::with_message(
                        ErrorCode::Unauthorized,
                        "No Tron account available",
                    ));
                }
                self.state.connected.set(true);
                Ok(TronLinkReply {
                    code: 200,
                    message: "The site is already in the whitelist".to_string(),
                })
            }
            Err(e) if e.code == ErrorCode::UserRejected => Ok(TronLinkReply {
                code: e.code.as_i64(),
                message: e.message,
            }),
            Err(e) => Err(e),
        }
    }

    /// Whether a default address has been received.
    #[must_use]
    pub fn ready(&self) -> bool {
        self.state.ready.load(Ordering::Acquire)
    }

    /// Whether the provider has connected.
    #[must_use]
    pub fn is_connected(&self) -> bool {
        self.state.connected.get()
    }

    /// The TronWeb object built on this link.
    #[must_use]
    pub const fn tron_web(&self) -> &TronWeb {
        &self.tron_web
    }

    /// Subscribe to an event.
    pub fn on<F>(&self, event: &str, listener: F) -> ListenerId
    where
        F: Fn(&Value) + Send + Sync + 'static,
    {
        self.events.on(event, listener)
    }

    /// Unsubscribe a listener.
    pub fn off(&self, event: &str, id: ListenerId) -> bool {
        self.events.off(event, id)
    }

    /// Remove listeners of one event, or of every event.
    pub fn remove_all_listeners(&self, event: Option<&str>) {
        self.events.remove_all_listeners(event);
    }

    /// The core this pair runs on.
    #[must_use]
    pub fn core(&self) -> &Arc<ProviderCore> {
        &self.core
    }
}

/// TronWeb-compatible object.
#[derive(Debug, Clone)]
pub struct TronWeb {
    core: Arc<ProviderCore>,
    state: Arc<TronState>,
}

impl TronWeb {
    /// Default address, set once the host has pushed accounts.
    #[must_use]
    pub fn default_address(&self) -> Option<TronAddress> {
        self.state.default_address()
    }

    /// The `trx` namespace.
    #[must_use]
    pub const fn trx(&self) -> Trx<'_> {
        Trx { web: self }
    }

    fn require_default(&self) -> RpcResult<TronAddress> {
        self.default_address()
            .ok_or_else(|| ProviderRpcError::with_message(ErrorCode::Unauthorized, "No default address"))
    }

    async fn call<P: Serialize>(&self, method: Method, params: &P) -> RpcResult<Value> {
        let params = serde_json::to_value(params).map_err(|_| ProviderRpcError::internal())?;
        self.core.request(method.as_str(), params).await
    }
}

/// `tronWeb.trx`: balance, signing and broadcast.
#[derive(Debug, Clone, Copy)]
pub struct Trx<'a> {
    web: &'a TronWeb,
}

impl Trx<'_> {
    /// Balance in sun of `address`, or of the default address.
    pub async fn get_balance(&self, address: Option<&str>) -> RpcResult<u64> {
        let address = match address {
            Some(a) => TronAddress::parse(a)
                .ok_or_else(|| ProviderRpcError::invalid_params("invalid Tron address"))?
                .base58,
            None => self.web.require_default()?.base58,
        };
        let query = BalanceQuery {
            address,
            chain: TRON.to_string(),
            asset: None,
        };
        let result = self.web.call(Method::GetBalance, &query).await?;
        match result {
            Value::Number(n) => n.as_u64().ok_or_else(ProviderRpcError::internal),
            Value::String(s) => s.parse().map_err(|_| ProviderRpcError::internal()),
            _ => Err(ProviderRpcError::internal()),
        }
    }

    /// Sign an unsigned transaction with the default address.
    pub async fn sign(&self, transaction: Value) -> RpcResult<Value> {
        let params = SignTransactionParams {
            address: self.web.require_default()?.base58,
            chain: TRON.to_string(),
            transaction,
        };
        self.web.call(Method::SignTransaction, &params).await
    }

    /// Sign a plain message with the default address.
    pub async fn sign_message_v2(&self, message: &str) -> RpcResult<String> {
        let params = SignMessageParams {
            message: message.to_string(),
            address: self.web.require_default()?.base58,
        };
        decode(self.web.call(Method::SignMessage, &params).await?)
    }

    /// Send `amount` sun of TRX from the default address.
    pub async fn send_transaction(&self, to: &str, amount: u64) -> RpcResult<BroadcastResult> {
        let to = TronAddress::parse(to)
            .ok_or_else(|| ProviderRpcError::invalid_params("invalid Tron address"))?;
        let params = TransferParams {
            from: self.web.require_default()?.base58,
            to: to.base58,
            amount: amount.to_string(),
            chain: TRON.to_string(),
            asset: None,
            data: None,
        };
        let receipt: TransferReceipt =
            decode(self.web.call(Method::SendTransaction, &params).await?)?;
        Ok(receipt.into())
    }

    /// Broadcast an already signed transaction.
    pub async fn send_raw_transaction(&self, signed: Value) -> RpcResult<BroadcastResult> {
        let params = BroadcastParams {
            chain: TRON.to_string(),
            signed_transaction: signed,
        };
        let receipt: TransferReceipt =
            decode(self.web.call(Method::BroadcastTransaction, &params).await?)?;
        Ok(receipt.into())
    }
}
