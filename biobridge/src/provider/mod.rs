//! Provider facades and the core they share.
//!
//! Every facade sits on a [`ProviderCore`]: one transport bound to the
//! facade's protocol tag, one correlator, one raw event emitter, and a pump
//! task routing inbound responses and events. Facades only translate calling
//! conventions; none of them owns a pending map of its own.

pub mod bio;
pub mod evm;
pub mod tron;

pub use bio::BioProvider;
pub use evm::{EthereumProvider, JsonRpcPayload, JsonRpcResponse};
pub use tron::{TronLink, TronWeb};

use crate::correlator::Correlator;
use crate::emitter::EventEmitter;
use crate::error::{ProviderRpcError, RpcResult};
use crate::protocol::{ProtocolTag, WireMessage, events};
use crate::transport::{Inbound, Transport};
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use tokio::task::JoinHandle;
use tracing::{debug, trace};

/// Arguments of a `request` call: `{method, params}`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RequestArguments {
    /// Method name.
    pub method: String,
    /// Method params.
    #[serde(default)]
    pub params: serde_json::Value,
}

impl RequestArguments {
    /// Create request arguments.
    #[must_use]
    pub fn new(method: impl Into<String>, params: serde_json::Value) -> Self {
        Self {
            method: method.into(),
            params,
        }
    }

    /// Arguments without params.
    #[must_use]
    pub fn method(method: impl Into<String>) -> Self {
        Self::new(method, serde_json::Value::Null)
    }
}

/// Transport, correlator and raw event stream shared by facades.
pub struct ProviderCore {
    protocol: ProtocolTag,
    transport: Transport,
    correlator: Arc<Correlator>,
    events: EventEmitter,
    torn_down: Arc<AtomicBool>,
    pump: Mutex<Option<JoinHandle<()>>>,
}

impl std::fmt::Debug for ProviderCore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProviderCore")
            .field("protocol", &self.protocol)
            .field("pending", &self.correlator.pending_count())
            .field("torn_down", &self.is_torn_down())
            .finish_non_exhaustive()
    }
}

impl ProviderCore {
    /// Start a core on a transport. Must be called inside a tokio runtime.
    #[must_use]
    pub fn spawn(transport: Transport, protocol: ProtocolTag) -> Arc<Self> {
        let correlator = Arc::new(Correlator::new());
        let events = EventEmitter::new();
        let torn_down = Arc::new(AtomicBool::new(false));

        // Subscribe before spawning so nothing posted in between is lost.
        let inbound = transport.on_inbound_message();
        let pump = tokio::spawn(run_pump(
            inbound,
            Arc::clone(&correlator),
            events.clone(),
            Arc::clone(&torn_down),
        ));
        debug!(%protocol, "provider core started");

        Arc::new(Self {
            protocol,
            transport,
            correlator,
            events,
            torn_down,
            pump: Mutex::new(Some(pump)),
        })
    }

    /// Protocol tag of this core.
    #[must_use]
    pub const fn protocol(&self) -> ProtocolTag {
        self.protocol
    }

    /// Raw host events, before facade translation.
    #[must_use]
    pub const fn events(&self) -> &EventEmitter {
        &self.events
    }

    /// Send a canonical request and wait for its response.
    pub async fn request(
        &self,
        method: &str,
        params: serde_json::Value,
    ) -> RpcResult<serde_json::Value> {
        self.correlator
            .send(&self.transport, self.protocol, method, params)
            .await
    }

    /// Requests still awaiting a response.
    #[must_use]
    pub fn pending_count(&self) -> usize {
        self.correlator.pending_count()
    }

    /// Whether the core has been torn down.
    #[must_use]
    pub fn is_torn_down(&self) -> bool {
        self.torn_down.load(Ordering::Acquire)
    }

    /// Stop the pump and reject every pending request with a disconnect.
    pub fn teardown(&self) {
        if let Some(pump) = self
            .pump
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take()
        {
            pump.abort();
        }
        finish(&self.correlator, &self.events, &self.torn_down);
    }
}

impl Drop for ProviderCore {
    fn drop(&mut self) {
        if let Some(pump) = self
            .pump
            .get_mut()
            .unwrap_or_else(PoisonError::into_inner)
            .take()
        {
            pump.abort();
        }
    }
}

async fn run_pump(
    mut inbound: Inbound,
    correlator: Arc<Correlator>,
    events: EventEmitter,
    torn_down: Arc<AtomicBool>,
) {
    while let Some((protocol, message)) = inbound.recv().await {
        match message {
            WireMessage::Response(response) => {
                correlator.settle(response);
            }
            WireMessage::Event(event) => {
                trace!(%protocol, event = %event.event, "host event");
                events.emit(&event.event, &event.payload);
            }
            WireMessage::Request(request) => {
                trace!(%protocol, method = %request.method, "ignoring request on facade side");
            }
        }
    }
    finish(&correlator, &events, &torn_down);
}

/// Runs once per core, whichever of teardown or port close comes first.
fn finish(correlator: &Correlator, events: &EventEmitter, torn_down: &AtomicBool) {
    if torn_down.swap(true, Ordering::AcqRel) {
        return;
    }
    let error = ProviderRpcError::disconnected();
    let rejected = correlator.reject_all(&error);
    debug!(rejected, "provider core torn down");
    let payload = serde_json::to_value(&error).unwrap_or(serde_json::Value::Null);
    events.emit(events::DISCONNECT, &payload);
}

/// Connection flag shared between a facade and its event listeners.
#[derive(Debug, Default)]
pub(crate) struct ConnectionFlag(AtomicBool);

impl ConnectionFlag {
    pub(crate) fn get(&self) -> bool {
        self.0.load(Ordering::Acquire)
    }

    pub(crate) fn set(&self, connected: bool) {
        self.0.store(connected, Ordering::Release);
    }
}

/// Decode a canonical result into a typed value; mismatches are host faults.
pub(crate) fn decode<T: serde::de::DeserializeOwned>(value: serde_json::Value) -> RpcResult<T> {
    serde_json::from_value(value).map_err(|e| {
        debug!(error = %e, "unexpected result shape from host");
        ProviderRpcError::internal()
    })
}
