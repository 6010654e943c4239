//! Biobridge - a permissioned RPC bridge between sandboxed wallet miniapps
//! and their host wallet.
//!
//! Miniapps never touch keys or host state. They talk to the wallet through
//! provider facades that post framed requests over a message port; the host
//! side dispatches those requests to human-in-the-loop collaborators after
//! checking the app's granted capabilities.
//!
//! # Architecture
//!
//! - **Chain ids** ([`chain`]) - Pure host id / EVM id / display name tables
//! - **Port** ([`port`]) - Entangled message port pair with stamped origins
//! - **Transport** ([`transport`]) - Origin allowlist and protocol tagging
//! - **Correlator** ([`correlator`]) - Pending-request map, settled by id
//! - **Emitter** ([`emitter`]) - Host event subscriptions per facade
//! - **Providers** ([`provider`]) - Bio, EVM and Tron facades on a shared core
//! - **Permissions** ([`permission`]) - Capability gate and grant policies
//! - **Host** ([`host`]) - Attach/detach lifecycle and request dispatch
//! - **Runtime** ([`runtime`]) - Explicit init and teardown of the facades
//!
//! # Quick Start
//!
//! ```rust,ignore
//! use biobridge::prelude::*;
//!
//! #[tokio::main]
//! async fn main() -> Result<()> {
//!     let settings = BridgeSettings::default();
//!     let (miniapp, host) = message_channel(
//!         settings.runtime.miniapp_origin.clone(),
//!         settings.bridge.host_origin.clone(),
//!     );
//!
//!     let bridge = HostBridge::new(settings.bridge.clone(), collaborators());
//!     bridge.attach(host, AppInfo::new("app", "My App"), []).await?;
//!
//!     let runtime = MiniappRuntime::init(miniapp, &settings.runtime);
//!     let chain = runtime.bio().request(RequestArguments::method("bio_chainId")).await?;
//!     Ok(())
//! }
//! ```

pub mod chain;
pub mod config;
pub mod correlator;
pub mod emitter;
pub mod error;
pub mod host;
pub mod method;
pub mod permission;
pub mod port;
pub mod protocol;
pub mod provider;
pub mod runtime;
pub mod transport;
pub mod types;
pub mod util;

/// Prelude module for convenient imports.
pub mod prelude {
    // Error types
    pub use crate::error::{
        BridgeError, ConfigError, ConfigResult, ErrorCode, ProviderRpcError, Result, RpcResult,
        TransportError, TransportResult,
    };

    // Config
    pub use crate::config::{
        BridgeConfig, BridgeSettings, ConfigIssue, ConfirmationPolicy, IssueLevel, RuntimeConfig,
        config_path, init_config, load_config, save_config,
    };

    // Wire
    pub use crate::method::Method;
    pub use crate::port::{MessagePort, message_channel};
    pub use crate::protocol::{Frame, ProtocolTag, RpcRequest, RpcResponse, WireMessage};
    pub use crate::transport::{OriginAllowlist, Transport, TransportConfig};

    // Permissions
    pub use crate::permission::{
        Capability, GrantPolicy, MemoryGrantStore, PermissionGate, SessionGrants,
    };

    // Host
    pub use crate::host::{
        AccountPickRequest, AccountPicker, BridgeState, BridgeStats, CollaboratorError,
        CollaboratorResult, Collaborators, HostBridge, HostEvent, HostWallet, PermissionRequest,
        PickPurpose, SigningConfirmation, SigningRequest, TransferConfirmation,
    };

    // Providers
    pub use crate::provider::{
        BioProvider, EthereumProvider, JsonRpcPayload, JsonRpcResponse, ProviderCore,
        RequestArguments, TronLink, TronWeb,
    };
    pub use crate::runtime::{MiniappRuntime, ProviderSlot, global_slot};

    // Domain types
    pub use crate::types::{
        Account, AccountQuery, AppInfo, BalanceQuery, BroadcastParams, SignMessageParams,
        SignTransactionParams, SignTypedDataParams, TransferParams, TransferReceipt,
    };
}
