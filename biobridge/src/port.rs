//! In-process message ports connecting a miniapp context to its host.
//!
//! A [`message_channel`] yields two entangled [`MessagePort`]s, one per
//! context. Posting on one end fans the message out to every subscriber of
//! the other end, in FIFO order, stamped with the sender's origin. The
//! sender never chooses the origin it is reported under.

use crate::error::{TransportError, TransportResult};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use tokio::sync::mpsc;
use tracing::{debug, trace};

/// Wildcard target origin.
pub const ANY_ORIGIN: &str = "*";

/// A message as observed by the receiving end.
#[derive(Debug, Clone, PartialEq)]
pub struct PortMessage {
    /// Origin of the sending context.
    pub origin: String,
    /// Raw payload.
    pub data: serde_json::Value,
}

/// Port statistics.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct PortStats {
    /// Messages posted from this end.
    pub posted: u64,
    /// Messages delivered to this end's subscribers.
    pub delivered: u64,
    /// Posts not delivered because the target origin did not match.
    pub misaddressed: u64,
}

#[derive(Debug)]
struct PortEnd {
    origin: String,
    subscribers: Mutex<Vec<mpsc::UnboundedSender<PortMessage>>>,
    posted: AtomicU64,
    delivered: AtomicU64,
    misaddressed: AtomicU64,
}

impl PortEnd {
    fn new(origin: String) -> Self {
        Self {
            origin,
            subscribers: Mutex::new(Vec::new()),
            posted: AtomicU64::new(0),
            delivered: AtomicU64::new(0),
            misaddressed: AtomicU64::new(0),
        }
    }

    fn deliver(&self, msg: &PortMessage) {
        let mut subscribers = self
            .subscribers
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        subscribers.retain(|tx| tx.send(msg.clone()).is_ok());
        if !subscribers.is_empty() {
            self.delivered.fetch_add(1, Ordering::Relaxed);
        }
    }

    fn clear(&self) {
        self.subscribers
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clear();
    }
}

#[derive(Debug)]
struct Link {
    closed: AtomicBool,
    ends: [PortEnd; 2],
}

/// One end of an entangled port pair.
#[derive(Clone)]
pub struct MessagePort {
    link: Arc<Link>,
    side: usize,
}

impl std::fmt::Debug for MessagePort {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MessagePort")
            .field("origin", &self.origin())
            .field("peer_origin", &self.peer_origin())
            .field("closed", &self.is_closed())
            .finish()
    }
}

/// Create an entangled pair: the first port lives in `origin_a`, the second
/// in `origin_b`.
#[must_use]
pub fn message_channel(
    origin_a: impl Into<String>,
    origin_b: impl Into<String>,
) -> (MessagePort, MessagePort) {
    let link = Arc::new(Link {
        closed: AtomicBool::new(false),
        ends: [PortEnd::new(origin_a.into()), PortEnd::new(origin_b.into())],
    });
    (
        MessagePort {
            link: Arc::clone(&link),
            side: 0,
        },
        MessagePort { link, side: 1 },
    )
}

impl MessagePort {
    fn local(&self) -> &PortEnd {
        &self.link.ends[self.side]
    }

    fn peer(&self) -> &PortEnd {
        &self.link.ends[1 - self.side]
    }

    /// Origin of the context owning this end.
    #[must_use]
    pub fn origin(&self) -> &str {
        &self.local().origin
    }

    /// Origin of the context owning the other end.
    #[must_use]
    pub fn peer_origin(&self) -> &str {
        &self.peer().origin
    }

    /// Whether the link has been closed.
    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.link.closed.load(Ordering::Acquire)
    }

    /// Post a message to the other end.
    ///
    /// When `target_origin` is neither [`ANY_ORIGIN`] nor the peer's origin
    /// the message is silently not delivered.
    pub fn post_message(&self, data: serde_json::Value, target_origin: &str) -> TransportResult<()> {
        if self.is_closed() {
            return Err(TransportError::Closed);
        }
        self.local().posted.fetch_add(1, Ordering::Relaxed);

        let peer = self.peer();
        if target_origin != ANY_ORIGIN && target_origin != peer.origin {
            trace!(
                from = %self.origin(),
                target = %target_origin,
                "target origin mismatch, message not delivered"
            );
            peer.misaddressed.fetch_add(1, Ordering::Relaxed);
            return Ok(());
        }

        peer.deliver(&PortMessage {
            origin: self.origin().to_string(),
            data,
        });
        Ok(())
    }

    /// Subscribe to messages arriving at this end.
    ///
    /// The receiver ends when the link is closed.
    pub fn subscribe(&self) -> mpsc::UnboundedReceiver<PortMessage> {
        let (tx, rx) = mpsc::unbounded_channel();
        let mut subscribers = self
            .local()
            .subscribers
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        // Checked under the lock so a concurrent close() cannot miss it.
        if !self.is_closed() {
            subscribers.push(tx);
        }
        rx
    }

    /// Close both ends of the link. Idempotent.
    pub fn close(&self) {
        if self.link.closed.swap(true, Ordering::AcqRel) {
            return;
        }
        for end in &self.link.ends {
            end.clear();
        }
        debug!(origin = %self.origin(), peer = %self.peer_origin(), "message port closed");
    }

    /// Statistics for this end.
    #[must_use]
    pub fn stats(&self) -> PortStats {
        let end = self.local();
        PortStats {
            posted: end.posted.load(Ordering::Relaxed),
            delivered: end.delivered.load(Ordering::Relaxed),
            misaddressed: end.misaddressed.load(Ordering::Relaxed),
        }
    }
}
