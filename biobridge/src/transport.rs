//! Transport channel: frames on top of a [`MessagePort`].
//!
//! Outbound messages are wrapped in a [`Frame`] carrying the protocol tag and
//! target origin. Inbound traffic is accepted only when the stamped origin is
//! allow-listed, the frame parses, and its protocol is one this transport
//! serves. Everything else is transport noise and is dropped without a
//! reply, so a probing context learns nothing about the channel.

use crate::error::{TransportError, TransportResult};
use crate::port::{ANY_ORIGIN, MessagePort, PortMessage};
use crate::protocol::{Frame, ProtocolTag, WireMessage};
use tokio::sync::mpsc;
use tracing::trace;

/// Origins a transport accepts messages from.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct OriginAllowlist {
    origins: Vec<String>,
}

impl OriginAllowlist {
    /// Create an empty allowlist.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Add an allowed origin.
    #[must_use]
    pub fn allow(mut self, origin: impl Into<String>) -> Self {
        self.origins.push(origin.into());
        self
    }

    /// Build from a list of origins.
    #[must_use]
    pub fn from_origins<I, S>(origins: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            origins: origins.into_iter().map(Into::into).collect(),
        }
    }

    /// Check if an origin is allowed.
    #[must_use]
    pub fn is_allowed(&self, origin: &str) -> bool {
        self.origins.iter().any(|o| o == origin)
    }

    /// Whether no origin has been configured.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.origins.is_empty()
    }
}

/// Transport configuration.
#[derive(Debug, Clone)]
pub struct TransportConfig {
    /// Protocol tags served by this transport.
    pub protocols: Vec<ProtocolTag>,
    /// Accepted sender origins. Empty means "the port's peer origin only".
    pub allowed_origins: OriginAllowlist,
    /// Origin declared on outbound frames.
    pub target_origin: String,
}

impl TransportConfig {
    /// Serve a single protocol, addressing frames to any origin and
    /// accepting only the peer origin.
    #[must_use]
    pub fn new(protocol: ProtocolTag) -> Self {
        Self {
            protocols: vec![protocol],
            allowed_origins: OriginAllowlist::new(),
            target_origin: ANY_ORIGIN.to_string(),
        }
    }

    /// Serve several protocols.
    #[must_use]
    pub fn with_protocols(protocols: impl IntoIterator<Item = ProtocolTag>) -> Self {
        Self {
            protocols: protocols.into_iter().collect(),
            allowed_origins: OriginAllowlist::new(),
            target_origin: ANY_ORIGIN.to_string(),
        }
    }

    /// Set the accepted origins.
    #[must_use]
    pub fn allowed_origins(mut self, allowlist: OriginAllowlist) -> Self {
        self.allowed_origins = allowlist;
        self
    }

    /// Set the declared target origin.
    #[must_use]
    pub fn target_origin(mut self, origin: impl Into<String>) -> Self {
        self.target_origin = origin.into();
        self
    }
}

/// A framed, origin-checked channel over a message port.
#[derive(Debug, Clone)]
pub struct Transport {
    port: MessagePort,
    protocols: Vec<ProtocolTag>,
    allowlist: OriginAllowlist,
    target_origin: String,
}

impl Transport {
    /// Bind a transport to a port.
    #[must_use]
    pub fn new(port: MessagePort, config: TransportConfig) -> Self {
        let allowlist = if config.allowed_origins.is_empty() {
            OriginAllowlist::new().allow(port.peer_origin())
        } else {
            config.allowed_origins
        };
        Self {
            port,
            protocols: config.protocols,
            allowlist,
            target_origin: config.target_origin,
        }
    }

    /// Protocols served.
    #[must_use]
    pub fn protocols(&self) -> &[ProtocolTag] {
        &self.protocols
    }

    /// The underlying port.
    #[must_use]
    pub const fn port(&self) -> &MessagePort {
        &self.port
    }

    /// Send a message under the given protocol tag.
    pub fn post_outbound(&self, protocol: ProtocolTag, message: WireMessage) -> TransportResult<()> {
        let frame = Frame {
            protocol,
            target_origin: self.target_origin.clone(),
            message,
        };
        let data =
            serde_json::to_value(&frame).map_err(|e| TransportError::Encode(e.to_string()))?;
        self.port.post_message(data, &self.target_origin)
    }

    /// Start receiving validated inbound messages.
    #[must_use]
    pub fn on_inbound_message(&self) -> Inbound {
        Inbound {
            rx: self.port.subscribe(),
            protocols: self.protocols.clone(),
            allowlist: self.allowlist.clone(),
        }
    }

    /// Close the underlying port.
    pub fn close(&self) {
        self.port.close();
    }

    /// Whether the underlying port is closed.
    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.port.is_closed()
    }
}

/// Stream of validated inbound messages.
#[derive(Debug)]
pub struct Inbound {
    rx: mpsc::UnboundedReceiver<PortMessage>,
    protocols: Vec<ProtocolTag>,
    allowlist: OriginAllowlist,
}

impl Inbound {
    /// Next accepted message, or `None` once the port is closed.
    pub async fn recv(&mut self) -> Option<(ProtocolTag, WireMessage)> {
        loop {
            let msg = self.rx.recv().await?;
            if let Some(accepted) = self.accept(msg) {
                return Some(accepted);
            }
        }
    }

    fn accept(&self, msg: PortMessage) -> Option<(ProtocolTag, WireMessage)> {
        if !self.allowlist.is_allowed(&msg.origin) {
            trace!(origin = %msg.origin, "dropping message from unexpected origin");
            return None;
        }
        let frame: Frame = match serde_json::from_value(msg.data) {
            Ok(frame) => frame,
            Err(e) => {
                trace!(origin = %msg.origin, error = %e, "dropping malformed frame");
                return None;
            }
        };
        if !self.protocols.contains(&frame.protocol) {
            trace!(protocol = %frame.protocol, "dropping frame for another protocol");
            return None;
        }
        Some((frame.protocol, frame.message))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::port::message_channel;
    use crate::protocol::{EventMessage, RpcRequest};
    use serde_json::json;
    use std::time::Duration;

    async fn next(inbound: &mut Inbound) -> Option<(ProtocolTag, WireMessage)> {
        tokio::time::timeout(Duration::from_millis(100), inbound.recv())
            .await
            .ok()
            .flatten()
    }

    #[tokio::test]
    async fn test_round_trip() {
        let (app, host) = message_channel("app", "host");
        let app_tx = Transport::new(app, TransportConfig::new(ProtocolTag::Bio));
        let host_tx = Transport::new(host, TransportConfig::with_protocols(ProtocolTag::ALL));
        let mut inbound = host_tx.on_inbound_message();

        let req = WireMessage::Request(RpcRequest::new("1", "bio_chainId", json!([])));
        app_tx.post_outbound(ProtocolTag::Bio, req.clone()).unwrap();

        assert_eq!(next(&mut inbound).await, Some((ProtocolTag::Bio, req)));
    }

    #[tokio::test]
    async fn test_protocols_do_not_cross_talk() {
        let (app, host) = message_channel("app", "host");
        let evm = Transport::new(app.clone(), TransportConfig::new(ProtocolTag::Ethereum));
        let tron = Transport::new(app, TransportConfig::new(ProtocolTag::Tron));
        let host_tx = Transport::new(host, TransportConfig::with_protocols(ProtocolTag::ALL));
        let mut evm_in = evm.on_inbound_message();
        let mut tron_in = tron.on_inbound_message();

        let event = WireMessage::Event(EventMessage::new("chainChanged", json!("tron")));
        host_tx.post_outbound(ProtocolTag::Tron, event.clone()).unwrap();

        assert_eq!(next(&mut tron_in).await, Some((ProtocolTag::Tron, event)));
        assert_eq!(next(&mut evm_in).await, None);
    }

    #[tokio::test]
    async fn test_unexpected_origin_is_dropped() {
        let (app, host) = message_channel("https://evil.example", "host");
        let host_tx = Transport::new(
            host,
            TransportConfig::new(ProtocolTag::Bio)
                .allowed_origins(OriginAllowlist::new().allow("https://app.example")),
        );
        let app_tx = Transport::new(app, TransportConfig::new(ProtocolTag::Bio));
        let mut inbound = host_tx.on_inbound_message();

        app_tx
            .post_outbound(
                ProtocolTag::Bio,
                WireMessage::Request(RpcRequest::new("1", "bio_accounts", json!({}))),
            )
            .unwrap();
        assert_eq!(next(&mut inbound).await, None);
    }

    #[tokio::test]
    async fn test_malformed_frames_are_skipped() {
        let (app, host) = message_channel("app", "host");
        let host_tx = Transport::new(host, TransportConfig::new(ProtocolTag::Bio));
        let mut inbound = host_tx.on_inbound_message();

        app.post_message(json!("garbage"), ANY_ORIGIN).unwrap();
        app.post_message(json!({"protocol": "bio-provider"}), ANY_ORIGIN)
            .unwrap();
        let app_tx = Transport::new(app, TransportConfig::new(ProtocolTag::Bio));
        let event = WireMessage::Event(EventMessage::new("x", json!(null)));
        app_tx.post_outbound(ProtocolTag::Bio, event.clone()).unwrap();

        assert_eq!(next(&mut inbound).await, Some((ProtocolTag::Bio, event)));
    }

    #[test]
    fn test_allowlist() {
        let list = OriginAllowlist::from_origins(["a", "b"]);
        assert!(list.is_allowed("a"));
        assert!(!list.is_allowed("c"));
        assert!(OriginAllowlist::new().is_empty());
    }
}
