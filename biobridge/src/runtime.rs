//! The miniapp side runtime.
//!
//! [`MiniappRuntime::init`] builds every facade over one port when the
//! sandbox starts, and [`MiniappRuntime::destroy`] tears them down when it
//! stops. The well-known provider slot is explicit: it is filled once and
//! emptied on teardown, never re-created behind the caller's back.

use crate::config::RuntimeConfig;
use crate::error::{BridgeError, Result};
use crate::port::MessagePort;
use crate::protocol::ProtocolTag;
use crate::provider::{BioProvider, EthereumProvider, ProviderCore, TronLink, TronWeb};
use crate::transport::{OriginAllowlist, Transport, TransportConfig};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use tracing::{debug, info};

/// All facades of one sandboxed miniapp.
#[derive(Debug)]
pub struct MiniappRuntime {
    port: MessagePort,
    bio: BioProvider,
    ethereum: EthereumProvider,
    tron_link: TronLink,
    destroyed: AtomicBool,
}

impl MiniappRuntime {
    /// Build every facade over `port`. Must be called inside a tokio runtime.
    #[must_use]
    pub fn init(port: MessagePort, config: &RuntimeConfig) -> Self {
        let core = |protocol: ProtocolTag| {
            let transport_config = TransportConfig::new(protocol)
                .allowed_origins(OriginAllowlist::new().allow(config.host_origin.clone()))
                .target_origin(config.target_origin.clone());
            ProviderCore::spawn(Transport::new(port.clone(), transport_config), protocol)
        };
        let runtime = Self {
            bio: BioProvider::new(core(ProtocolTag::Bio)),
            ethereum: EthereumProvider::new(core(ProtocolTag::Ethereum)),
            tron_link: TronLink::new(core(ProtocolTag::Tron)),
            port,
            destroyed: AtomicBool::new(false),
        };
        info!(
            origin = %config.miniapp_origin,
            host = %config.host_origin,
            "miniapp runtime initialized"
        );
        runtime
    }

    /// The native Bio provider.
    #[must_use]
    pub const fn bio(&self) -> &BioProvider {
        &self.bio
    }

    /// The EVM provider.
    #[must_use]
    pub const fn ethereum(&self) -> &EthereumProvider {
        &self.ethereum
    }

    /// The TronLink object.
    #[must_use]
    pub const fn tron_link(&self) -> &TronLink {
        &self.tron_link
    }

    /// The TronWeb object.
    #[must_use]
    pub const fn tron_web(&self) -> &TronWeb {
        self.tron_link.tron_web()
    }

    /// Tear down every facade and close the port.
    ///
    /// Pending requests reject with a disconnect. Idempotent.
    pub fn destroy(&self) {
        if self.destroyed.swap(true, Ordering::AcqRel) {
            return;
        }
        let pending = self.bio.core().pending_count()
            + self.ethereum.core().pending_count()
            + self.tron_link.core().pending_count();
        self.bio.core().teardown();
        self.ethereum.core().teardown();
        self.tron_link.core().teardown();
        self.port.close();
        info!(pending, "miniapp runtime destroyed");
    }

    /// Whether [`destroy`](Self::destroy) has run.
    #[must_use]
    pub fn is_destroyed(&self) -> bool {
        self.destroyed.load(Ordering::Acquire)
    }
}

/// Holds at most one runtime.
#[derive(Debug, Default)]
pub struct ProviderSlot {
    runtime: Mutex<Option<Arc<MiniappRuntime>>>,
}

impl ProviderSlot {
    /// An empty slot.
    #[must_use]
    pub const fn new() -> Self {
        Self {
            runtime: Mutex::new(None),
        }
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Option<Arc<MiniappRuntime>>> {
        self.runtime.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Fill the slot. Fails if it already holds a runtime.
    pub fn install(&self, runtime: MiniappRuntime) -> Result<Arc<MiniappRuntime>> {
        let mut slot = self.lock();
        if slot.is_some() {
            return Err(BridgeError::SlotOccupied);
        }
        let runtime = Arc::new(runtime);
        *slot = Some(Arc::clone(&runtime));
        debug!("provider slot filled");
        Ok(runtime)
    }

    /// The installed runtime.
    #[must_use]
    pub fn get(&self) -> Option<Arc<MiniappRuntime>> {
        self.lock().clone()
    }

    /// Empty the slot without destroying the runtime.
    pub fn take(&self) -> Option<Arc<MiniappRuntime>> {
        self.lock().take()
    }

    /// Empty the slot and destroy the runtime. Returns whether one was installed.
    pub fn teardown(&self) -> bool {
        let Some(runtime) = self.take() else {
            return false;
        };
        runtime.destroy();
        true
    }
}

static GLOBAL_SLOT: ProviderSlot = ProviderSlot::new();

/// The process-wide provider slot.
#[must_use]
pub fn global_slot() -> &'static ProviderSlot {
    &GLOBAL_SLOT
}
