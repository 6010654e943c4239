//! Request/response correlation for the facade side of a channel.
//!
//! Each outbound request parks a oneshot sender in the pending map under a
//! fresh id. A matching response settles and removes it; a response with an
//! unknown id settles nothing. There is no timeout: signing and transfer
//! prompts may wait on a human indefinitely. The only cancellation path is
//! [`Correlator::reject_all`], called on channel teardown.

use crate::error::{ProviderRpcError, RpcResult};
use crate::protocol::{ProtocolTag, RpcRequest, RpcResponse, WireMessage};
use crate::transport::Transport;
use crate::util::generate_id;
use std::collections::HashMap;
use std::sync::{Mutex, PoisonError};
use tokio::sync::oneshot;
use tracing::{debug, trace};

type Settle = oneshot::Sender<RpcResult<serde_json::Value>>;

#[derive(Debug)]
struct PendingRequest {
    method: String,
    tx: Settle,
}

#[derive(Debug, Default)]
struct PendingMap {
    entries: HashMap<String, PendingRequest>,
    closed: bool,
}

/// Handle to the eventual outcome of a registered request.
#[derive(Debug)]
pub struct PendingResponse {
    rx: oneshot::Receiver<RpcResult<serde_json::Value>>,
}

impl PendingResponse {
    /// Wait for the request to settle.
    ///
    /// A dropped sender can only mean the correlator itself went away, which
    /// is reported as a disconnect.
    pub async fn wait(self) -> RpcResult<serde_json::Value> {
        self.rx
            .await
            .unwrap_or_else(|_| Err(ProviderRpcError::disconnected()))
    }
}

/// Pending-request map owned by one facade core.
#[derive(Debug, Default)]
pub struct Correlator {
    pending: Mutex<PendingMap>,
}

impl Correlator {
    /// Create an empty correlator.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, PendingMap> {
        self.pending.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Register a request and return its id and settlement handle.
    ///
    /// Fails with a disconnect once the correlator has been closed.
    pub fn register(&self, method: &str) -> RpcResult<(String, PendingResponse)> {
        let mut map = self.lock();
        if map.closed {
            return Err(ProviderRpcError::disconnected());
        }
        let (tx, rx) = oneshot::channel();
        let id = loop {
            let candidate = generate_id("req");
            if !map.entries.contains_key(&candidate) {
                break candidate;
            }
        };
        map.entries.insert(
            id.clone(),
            PendingRequest {
                method: method.to_string(),
                tx,
            },
        );
        Ok((id, PendingResponse { rx }))
    }

    /// Register, post and await a request over a transport.
    pub async fn send(
        &self,
        transport: &Transport,
        protocol: ProtocolTag,
        method: &str,
        params: serde_json::Value,
    ) -> RpcResult<serde_json::Value> {
        let (id, pending) = self.register(method)?;
        let request = WireMessage::Request(RpcRequest::new(id.clone(), method, params));
        if let Err(e) = transport.post_outbound(protocol, request) {
            debug!(request_id = %id, method, error = %e, "failed to post request");
            self.cancel(&id);
            return Err(ProviderRpcError::disconnected());
        }
        trace!(request_id = %id, method, %protocol, "request posted");
        pending.wait().await
    }

    /// Settle the request a response refers to.
    ///
    /// Returns `false` when the id is not pending (stale or duplicate).
    pub fn settle(&self, response: RpcResponse) -> bool {
        let Some(entry) = self.lock().entries.remove(&response.id) else {
            trace!(request_id = %response.id, "ignoring response for unknown request");
            return false;
        };
        trace!(request_id = %response.id, method = %entry.method, "request settled");
        // The caller may have stopped waiting; nothing to do then.
        let _ = entry.tx.send(response.into_outcome());
        true
    }

    /// Drop a pending request, rejecting it with a disconnect.
    pub fn cancel(&self, id: &str) -> bool {
        let Some(entry) = self.lock().entries.remove(id) else {
            return false;
        };
        let _ = entry.tx.send(Err(ProviderRpcError::disconnected()));
        true
    }

    /// Close the correlator and reject every pending request with `error`.
    ///
    /// Returns the number of requests rejected. Later registrations fail.
    pub fn reject_all(&self, error: &ProviderRpcError) -> usize {
        let drained: Vec<(String, PendingRequest)> = {
            let mut map = self.lock();
            map.closed = true;
            map.entries.drain().collect()
        };
        let count = drained.len();
        for (id, entry) in drained {
            debug!(request_id = %id, method = %entry.method, "rejecting pending request");
            let _ = entry.tx.send(Err(error.clone()));
        }
        count
    }

    /// Number of requests awaiting a response.
    #[must_use]
    pub fn pending_count(&self) -> usize {
        self.lock().entries.len()
    }

    /// Whether [`reject_all`](Self::reject_all) has been called.
    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.lock().closed
    }
}
