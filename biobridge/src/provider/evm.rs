//! EVM-compatible provider.
//!
//! Translates the classic `eth_*` JSON-RPC surface onto canonical Bio
//! methods. Chain ids leave this facade as hex strings; accounts are limited
//! to EVM-compatible chains and exposed as EIP-55 checksummed addresses.

use super::{ConnectionFlag, ProviderCore, RequestArguments, decode};
use crate::chain;
use crate::emitter::{EventEmitter, ListenerId};
use crate::error::{ProviderRpcError, RpcResult};
use crate::method::Method;
use crate::protocol::events;
use crate::types::{
    Account, AccountQuery, BalanceQuery, SignMessageParams, SignTransactionParams,
    SignTypedDataParams, TransferParams, TransferReceipt,
};
use alloy::primitives::{Address, U256};
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use std::sync::{Arc, PoisonError, RwLock};
use tracing::debug;

/// Methods this facade translates. Anything else rejects with 4200.
pub const SUPPORTED_METHODS: &[&str] = &[
    "eth_requestAccounts",
    "eth_accounts",
    "eth_chainId",
    "net_version",
    "eth_coinbase",
    "personal_sign",
    "eth_sign",
    "eth_signTypedData",
    "eth_signTypedData_v3",
    "eth_signTypedData_v4",
    "eth_sendTransaction",
    "eth_signTransaction",
    "eth_getBalance",
];

const DEFAULT_CHAIN: &str = "ethereum";

/// A JSON-RPC 2.0 request, as taken by the legacy `sendAsync`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JsonRpcPayload {
    /// Protocol version, `"2.0"`.
    #[serde(default = "jsonrpc_version")]
    pub jsonrpc: String,
    /// Caller-chosen id, echoed back.
    #[serde(default)]
    pub id: Value,
    /// Method name.
    pub method: String,
    /// Positional params.
    #[serde(default)]
    pub params: Value,
}

/// A JSON-RPC 2.0 response.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JsonRpcResponse {
    /// Protocol version, `"2.0"`.
    pub jsonrpc: String,
    /// Id of the payload this answers.
    pub id: Value,
    /// Result on success.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<Value>,
    /// Error on failure.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<ProviderRpcError>,
}

fn jsonrpc_version() -> String {
    "2.0".to_string()
}

#[derive(Debug, Default)]
struct EvmState {
    connected: ConnectionFlag,
    chain_id: RwLock<Option<String>>,
    accounts: RwLock<Vec<String>>,
}

impl EvmState {
    fn set_chain_id(&self, chain_id: Option<String>) {
        *self.chain_id.write().unwrap_or_else(PoisonError::into_inner) = chain_id;
    }

    fn set_accounts(&self, accounts: Vec<String>) {
        *self.accounts.write().unwrap_or_else(PoisonError::into_inner) = accounts;
    }
}

/// Checksummed addresses of the EVM accounts in a host account list.
fn evm_addresses(accounts: &[Account]) -> Vec<String> {
    accounts
        .iter()
        .filter(|a| chain::is_evm_chain(&a.chain))
        .filter_map(|a| checksum(&a.address))
        .collect()
}

/// EIP-55 form of an address, or `None` when it is not an EVM address.
#[must_use]
pub fn checksum(address: &str) -> Option<String> {
    address
        .parse::<Address>()
        .ok()
        .map(|a| a.to_checksum(None))
}

fn parse_address(value: &Value) -> RpcResult<String> {
    value
        .as_str()
        .and_then(checksum)
        .ok_or_else(|| ProviderRpcError::invalid_params("expected an EVM address"))
}

/// Hex or decimal quantity string to a decimal string.
fn quantity_to_decimal(value: &str) -> RpcResult<String> {
    value
        .parse::<U256>()
        .map(|v| v.to_string())
        .map_err(|_| ProviderRpcError::invalid_params(format!("invalid quantity '{value}'")))
}

/// Host balance (decimal string or number) to a hex quantity.
fn balance_to_hex(value: &Value) -> RpcResult<String> {
    let raw = match value {
        Value::String(s) => s.clone(),
        Value::Number(n) => n.to_string(),
        _ => return Err(ProviderRpcError::internal()),
    };
    raw.parse::<U256>()
        .map(|v| format!("{v:#x}"))
        .map_err(|_| ProviderRpcError::internal())
}

fn positional(params: &Value) -> Vec<Value> {
    match params {
        Value::Array(items) => items.clone(),
        Value::Null => Vec::new(),
        other => vec![other.clone()],
    }
}

fn param(params: &[Value], index: usize) -> RpcResult<&Value> {
    params
        .get(index)
        .ok_or_else(|| ProviderRpcError::invalid_params(format!("missing param {index}")))
}

/// Split typed-data params into `(address, data)` whatever their order.
///
/// `eth_signTypedData` puts the data first; the v3 and v4 variants put the
/// address first and pass the data as a JSON string.
fn split_typed_data(params: &[Value]) -> RpcResult<(String, Value)> {
    let first = param(params, 0)?;
    let second = param(params, 1)?;
    let (address, data) = match parse_address(first) {
        Ok(address) => (address, second),
        Err(_) => (parse_address(second)?, first),
    };
    let data = match data {
        Value::String(s) => serde_json::from_str(s).unwrap_or_else(|_| data.clone()),
        other => other.clone(),
    };
    Ok((address, data))
}

#[derive(Debug, Deserialize)]
struct EvmTransaction {
    from: String,
    #[serde(default)]
    to: Option<String>,
    #[serde(default)]
    value: Option<String>,
    #[serde(default, alias = "input")]
    data: Option<String>,
}

/// EVM provider facade.
#[derive(Debug, Clone)]
pub struct EthereumProvider {
    core: Arc<ProviderCore>,
    events: EventEmitter,
    state: Arc<EvmState>,
}

impl EthereumProvider {
    /// Build the facade on a core.
    #[must_use]
    pub fn new(core: Arc<ProviderCore>) -> Self {
        let provider = Self {
            core,
            events: EventEmitter::new(),
            state: Arc::new(EvmState::default()),
        };
        provider.bind_events();
        provider
    }

    fn bind_events(&self) {
        let raw = self.core.events();

        let (state, out) = (Arc::clone(&self.state), self.events.clone());
        raw.on(events::CONNECT, move |payload| {
            state.connected.set(true);
            let host = payload.get("chainId").and_then(Value::as_str);
            match host.and_then(chain::host_to_hex) {
                Some(hex) => {
                    state.set_chain_id(Some(hex.clone()));
                    out.emit(events::CONNECT, &json!({ "chainId": hex }));
                }
                None => emit_chain_disconnect(&state, &out),
            }
        });

        let (state, out) = (Arc::clone(&self.state), self.events.clone());
        raw.on(events::DISCONNECT, move |payload| {
            state.connected.set(false);
            out.emit(events::DISCONNECT, payload);
        });

        let (state, out) = (Arc::clone(&self.state), self.events.clone());
        raw.on(events::ACCOUNTS_CHANGED, move |payload| {
            let Ok(accounts) = serde_json::from_value::<Vec<Account>>(payload.clone()) else {
                debug!("ignoring malformed accountsChanged payload");
                return;
            };
            let addresses = evm_addresses(&accounts);
            state.set_accounts(addresses.clone());
            out.emit(events::ACCOUNTS_CHANGED, &json!(addresses));
        });

        let (state, out) = (Arc::clone(&self.state), self.events.clone());
        raw.on(events::CHAIN_CHANGED, move |payload| {
            match payload.as_str().and_then(chain::host_to_hex) {
                Some(hex) => {
                    state.set_chain_id(Some(hex.clone()));
                    out.emit(events::CHAIN_CHANGED, &json!(hex));
                }
                None => emit_chain_disconnect(&state, &out),
            }
        });
    }

    /// EIP-1193 `request`.
    pub async fn request(&self, args: RequestArguments) -> RpcResult<Value> {
        let params = positional(&args.params);
        match args.method.as_str() {
            "eth_requestAccounts" => {
                let accounts = self.accounts_via(Method::RequestAccounts).await?;
                Ok(json!(accounts))
            }
            "eth_accounts" => Ok(json!(self.accounts_via(Method::Accounts).await?)),
            "eth_coinbase" => {
                let accounts = self.accounts_via(Method::Accounts).await?;
                Ok(accounts.into_iter().next().map_or(Value::Null, Value::String))
            }
            "eth_chainId" => {
                let (_, hex) = self.current_chain().await?;
                Ok(json!(hex))
            }
            "net_version" => {
                let (host, _) = self.current_chain().await?;
                let id = chain::evm_chain_id(host).ok_or_else(ProviderRpcError::chain_disconnected)?;
                Ok(json!(id.to_string()))
            }
            "personal_sign" => {
                let message = param(&params, 0)?.clone();
                let address = parse_address(param(&params, 1)?)?;
                self.sign_message(message, address).await
            }
            "eth_sign" => {
                let address = parse_address(param(&params, 0)?)?;
                let message = param(&params, 1)?.clone();
                self.sign_message(message, address).await
            }
            "eth_signTypedData" | "eth_signTypedData_v3" | "eth_signTypedData_v4" => {
                let (address, data) = split_typed_data(&params)?;
                self.core
                    .request(
                        Method::SignTypedData.as_str(),
                        to_params(&SignTypedDataParams { data, address })?,
                    )
                    .await
            }
            "eth_sendTransaction" => {
                let tx: EvmTransaction = serde_json::from_value(param(&params, 0)?.clone())
                    .map_err(|e| ProviderRpcError::invalid_params(e.to_string()))?;
                let (host, _) = self.current_chain().await?;
                let transfer = TransferParams {
                    from: parse_address(&json!(tx.from))?,
                    to: parse_address(&json!(tx.to.unwrap_or_default()))?,
                    amount: quantity_to_decimal(tx.value.as_deref().unwrap_or("0x0"))?,
                    chain: host.to_string(),
                    asset: None,
                    data: tx.data,
                };
                let result = self
                    .core
                    .request(Method::SendTransaction.as_str(), to_params(&transfer)?)
                    .await?;
                let receipt: TransferReceipt = decode(result)?;
                Ok(json!(receipt.tx_hash))
            }
            "eth_signTransaction" => {
                let transaction = param(&params, 0)?.clone();
                let from = transaction
                    .get("from")
                    .ok_or_else(|| ProviderRpcError::invalid_params("transaction has no 'from'"))?;
                let address = parse_address(from)?;
                let (host, _) = self.current_chain().await?;
                let sign = SignTransactionParams {
                    address,
                    chain: host.to_string(),
                    transaction,
                };
                self.core
                    .request(Method::SignTransaction.as_str(), to_params(&sign)?)
                    .await
            }
            "eth_getBalance" => {
                let address = parse_address(param(&params, 0)?)?;
                let (host, _) = self.current_chain().await?;
                let query = BalanceQuery {
                    address,
                    chain: host.to_string(),
                    asset: None,
                };
                let result = self
                    .core
                    .request(Method::GetBalance.as_str(), to_params(&query)?)
                    .await?;
                Ok(json!(balance_to_hex(&result)?))
            }
            other => Err(ProviderRpcError::unsupported_method(other)),
        }
    }

    async fn sign_message(&self, message: Value, address: String) -> RpcResult<Value> {
        let message = match message {
            Value::String(s) => s,
            _ => return Err(ProviderRpcError::invalid_params("message must be a string")),
        };
        self.core
            .request(
                Method::SignMessage.as_str(),
                to_params(&SignMessageParams { message, address })?,
            )
            .await
    }

    async fn accounts_via(&self, method: Method) -> RpcResult<Vec<String>> {
        // Until a chain is known, ask for mainnet accounts.
        let host = self
            .chain_id()
            .as_deref()
            .and_then(chain::hex_to_host)
            .unwrap_or(DEFAULT_CHAIN);
        let query = AccountQuery::chain(host);
        let result = self.core.request(method.as_str(), to_params(&query)?).await?;
        let accounts: Vec<Account> = decode(result)?;
        let addresses = evm_addresses(&accounts);
        if !addresses.is_empty() {
            self.state.connected.set(true);
        }
        self.state.set_accounts(addresses.clone());
        Ok(addresses)
    }

    /// Ask the host for its chain; fails with 4901 on a non-EVM chain.
    async fn current_chain(&self) -> RpcResult<(&'static str, String)> {
        let result = self.core.request(Method::ChainId.as_str(), Value::Null).await?;
        let host: String = decode(result)?;
        let mapped = chain::chain_info(&host)
            .and_then(|info| info.evm_hex_chain_id().map(|hex| (info.id, hex)));
        match mapped {
            Some((id, hex)) => {
                self.state.set_chain_id(Some(hex.clone()));
                Ok((id, hex))
            }
            None => {
                self.state.set_chain_id(None);
                Err(ProviderRpcError::chain_disconnected())
            }
        }
    }

    /// Legacy `send(method, params)`.
    pub async fn send(&self, method: &str, params: Value) -> RpcResult<Value> {
        self.request(RequestArguments::new(method, params)).await
    }

    /// Legacy `sendAsync`, answering in JSON-RPC 2.0 shape.
    pub async fn send_async(&self, payload: JsonRpcPayload) -> JsonRpcResponse {
        let outcome = self
            .request(RequestArguments::new(payload.method, payload.params))
            .await;
        let (result, error) = match outcome {
            Ok(result) => (Some(result), None),
            Err(error) => (None, Some(error)),
        };
        JsonRpcResponse {
            jsonrpc: jsonrpc_version(),
            id: payload.id,
            result,
            error,
        }
    }

    /// Legacy `enable()`, same as `eth_requestAccounts`.
    pub async fn enable(&self) -> RpcResult<Vec<String>> {
        self.accounts_via(Method::RequestAccounts).await
    }

    /// Cached hex chain id, kept current by `chainChanged`.
    #[must_use]
    pub fn chain_id(&self) -> Option<String> {
        self.state
            .chain_id
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Cached decimal network id.
    #[must_use]
    pub fn network_version(&self) -> Option<String> {
        self.chain_id()
            .as_deref()
            .and_then(chain::hex_to_decimal)
            .map(|id| id.to_string())
    }

    /// Cached selected address, kept current by `accountsChanged`.
    #[must_use]
    pub fn selected_address(&self) -> Option<String> {
        self.state
            .accounts
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .first()
            .cloned()
    }

    /// Whether the provider has connected.
    #[must_use]
    pub fn is_connected(&self) -> bool {
        self.state.connected.get()
    }

    /// Subscribe to an event.
    pub fn on<F>(&self, event: &str, listener: F) -> ListenerId
    where
        F: Fn(&Value) + Send + Sync + 'static,
    {
        self.events.on(event, listener)
    }

    /// Subscribe to the next occurrence of an event.
    pub fn once<F>(&self, event: &str, listener: F) -> ListenerId
    where
        F: Fn(&Value) + Send + Sync + 'static,
    {
        self.events.once(event, listener)
    }

    /// Unsubscribe a listener.
    pub fn off(&self, event: &str, id: ListenerId) -> bool {
        self.events.off(event, id)
    }

    /// Alias of [`off`](Self::off).
    pub fn remove_listener(&self, event: &str, id: ListenerId) -> bool {
        self.off(event, id)
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

fn emit_chain_disconnect(state: &EvmState, out: &EventEmitter) {
    state.set_chain_id(None);
    let error = ProviderRpcError::chain_disconnected();
    out.emit(
        events::DISCONNECT,
        &serde_json::to_value(&error).unwrap_or(Value::Null),
    );
}

fn to_params<T: Serialize>(params: &T) -> RpcResult<Value> {
    serde_json::to_value(params).map_err(|_| ProviderRpcError::internal())
}
