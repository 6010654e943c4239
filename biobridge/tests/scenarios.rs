//! End-to-end scenarios: a real host bridge serving a real miniapp runtime
//! over one in-memory port pair.

use async_trait::async_trait;
use biobridge::prelude::*;
use serde_json::{Value, json};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::{Semaphore, mpsc};
use tokio_test::{assert_err, assert_ok};

const MINIAPP: &str = "https://miniapp.local";
const HOST: &str = "https://wallet.local";
const EVM_ADDRESS: &str = "0x5aaeb6053f3e94c9b9a09f33669435e7ef1beaed";
const EVM_CHECKSUMMED: &str = "0x5aAeb6053F3E94C9b9A09f33669435E7Ef1BeAed";
const TRON_ADDRESS: &str = "T9yD14Nj9j7xAB4dbGeiX9h8unkKHxuWwb";

fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter("biobridge=debug")
        .with_test_writer()
        .try_init();
}

async fn within<F: std::future::Future>(future: F) -> F::Output {
    tokio::time::timeout(Duration::from_secs(2), future)
        .await
        .expect("scenario step timed out")
}

/// A wallet that approves everything, counting what it was asked to do.
///
/// Signing can be held: each confirmation then waits for a permit, and
/// reports on `entered` when it starts waiting.
struct ScriptedWallet {
    accounts: Vec<Account>,
    chain: Mutex<String>,
    signing_calls: AtomicUsize,
    active_signing: AtomicUsize,
    max_active_signing: AtomicUsize,
    release: Semaphore,
    entered: mpsc::UnboundedSender<()>,
}

impl ScriptedWallet {
    fn new(hold_signing: bool) -> (Arc<Self>, mpsc::UnboundedReceiver<()>) {
        let (entered, rx) = mpsc::unbounded_channel();
        let permits = if hold_signing { 0 } else { Semaphore::MAX_PERMITS };
        let wallet = Self {
            accounts: vec![
                Account::new("bAddr", "bfmeta", "02aa").with_name("Main"),
                Account::new(EVM_ADDRESS, "ethereum", "02bb"),
                Account::new(TRON_ADDRESS, "tron", "02cc"),
            ],
            chain: Mutex::new("bfmeta".into()),
            signing_calls: AtomicUsize::new(0),
            active_signing: AtomicUsize::new(0),
            max_active_signing: AtomicUsize::new(0),
            release: Semaphore::new(permits),
            entered,
        };
        (Arc::new(wallet), rx)
    }

    fn set_chain(&self, chain: &str) {
        *self.chain.lock().unwrap() = chain.to_string();
    }

    fn signing_calls(&self) -> usize {
        self.signing_calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl AccountPicker for ScriptedWallet {
    async fn pick(
        &self,
        request: &AccountPickRequest,
        _app: &AppInfo,
    ) -> CollaboratorResult<Option<Account>> {
        let account = match request.chain.as_deref() {
            Some(chain) => self.accounts.iter().find(|a| a.is_on(chain)),
            None => self.accounts.first(),
        };
        Ok(account.cloned())
    }
}

#[async_trait]
impl SigningConfirmation for ScriptedWallet {
    async fn confirm_signing(
        &self,
        request: &SigningRequest,
        _app: &AppInfo,
    ) -> CollaboratorResult<Option<Value>> {
        self.signing_calls.fetch_add(1, Ordering::SeqCst);
        let active = self.active_signing.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_active_signing.fetch_max(active, Ordering::SeqCst);
        let _ = self.entered.send(());

        let permit = self
            .release
            .acquire()
            .await
            .map_err(|_| CollaboratorError::failed("wallet shut down"))?;
        permit.forget();

        self.active_signing.fetch_sub(1, Ordering::SeqCst);
        Ok(Some(json!(format!("sig:{}", request.address()))))
    }
}

#[async_trait]
impl TransferConfirmation for ScriptedWallet {
    async fn confirm_transfer(
        &self,
        params: &TransferParams,
        _app: &AppInfo,
    ) -> CollaboratorResult<Option<TransferReceipt>> {
        Ok(Some(TransferReceipt {
            tx_hash: format!("tx:{}:{}", params.to, params.amount),
        }))
    }
}

#[async_trait]
impl HostWallet for ScriptedWallet {
    async fn chain_id(&self) -> CollaboratorResult<String> {
        Ok(self.chain.lock().unwrap().clone())
    }

    async fn balance(&self, query: &BalanceQuery) -> CollaboratorResult<String> {
        match query.chain.as_str() {
            "tron" => Ok("1500000".into()),
            _ => Ok("1000000000000000000".into()),
        }
    }

    async fn create_transaction(&self, params: &TransferParams) -> CollaboratorResult<Value> {
        Ok(json!({"from": params.from, "to": params.to, "amount": params.amount}))
    }

    async fn broadcast(&self, params: &BroadcastParams) -> CollaboratorResult<TransferReceipt> {
        Ok(TransferReceipt {
            tx_hash: format!("raw:{}", params.chain),
        })
    }
}

/// Permission callback answering every prompt the same way.
struct ScriptedPermissions {
    approve: bool,
    prompts: AtomicUsize,
}

impl ScriptedPermissions {
    fn new(approve: bool) -> Arc<Self> {
        Arc::new(Self {
            approve,
            prompts: AtomicUsize::new(0),
        })
    }

    fn prompts(&self) -> usize {
        self.prompts.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl PermissionRequest for ScriptedPermissions {
    async fn request_permission(
        &self,
        _app_id: &str,
        _app_name: &str,
        _capabilities: &[Capability],
    ) -> bool {
        self.prompts.fetch_add(1, Ordering::SeqCst);
        self.approve
    }
}

struct Harness {
    bridge: HostBridge,
    runtime: MiniappRuntime,
    wallet: Arc<ScriptedWallet>,
    entered: mpsc::UnboundedReceiver<()>,
}

struct Setup {
    policy: ConfirmationPolicy,
    granted: Vec<Capability>,
    permissions: Option<Arc<ScriptedPermissions>>,
    hold_signing: bool,
}

impl Default for Setup {
    fn default() -> Self {
        Self {
            policy: ConfirmationPolicy::Queue,
            granted: vec![Capability::Accounts, Capability::Sign, Capability::Transact],
            permissions: None,
            hold_signing: false,
        }
    }
}

fn settings() -> BridgeSettings {
    let mut settings = BridgeSettings::default();
    settings.bridge.host_origin = HOST.into();
    settings.bridge.allowed_origins = vec![MINIAPP.into()];
    settings.runtime.miniapp_origin = MINIAPP.into();
    settings.runtime.host_origin = HOST.into();
    settings.runtime.target_origin = HOST.into();
    settings
}

async fn harness(setup: Setup) -> Harness {
    init_tracing();
    let mut settings = settings();
    settings.bridge.confirmation_policy = setup.policy;

    let (wallet, entered) = ScriptedWallet::new(setup.hold_signing);
    let bridge = HostBridge::new(
        settings.bridge.clone(),
        Collaborators::new(wallet.clone(), wallet.clone(), wallet.clone(), wallet.clone()),
    );
    if let Some(permissions) = setup.permissions {
        bridge.set_permission_request_callback(permissions);
    }

    let (miniapp, host) = message_channel(MINIAPP, HOST);
    bridge
        .attach(host, AppInfo::new("demo", "Demo App"), setup.granted)
        .await
        .unwrap();
    let runtime = MiniappRuntime::init(miniapp, &settings.runtime);
    Harness {
        bridge,
        runtime,
        wallet,
        entered,
    }
}

fn sign_transaction_params() -> Value {
    json!({"address": "bAddr", "chain": "bfmeta", "transaction": {"nonce": 1}})
}

#[tokio::test]
async fn chain_id_reaches_the_host_wallet() {
    let h = harness(Setup::default()).await;

    let chain = within(h.runtime.bio().request(RequestArguments::method("bio_chainId"))).await;
    assert_eq!(assert_ok!(chain), json!("bfmeta"));
    assert_eq!(h.runtime.bio().chain().as_deref(), Some("bfmeta"));
}

#[tokio::test]
async fn host_chain_switch_reaches_the_evm_facade() {
    let h = harness(Setup::default()).await;
    let (tx, mut rx) = mpsc::unbounded_channel();
    h.runtime.ethereum().on("chainChanged", move |payload| {
        let _ = tx.send(payload.clone());
    });

    h.wallet.set_chain("binance");
    h.bridge
        .emit(HostEvent::ChainChanged("binance".into()))
        .unwrap();

    assert_eq!(within(rx.recv()).await, Some(json!("0x38")));
    assert_eq!(h.runtime.ethereum().chain_id().as_deref(), Some("0x38"));
    assert_eq!(h.runtime.ethereum().network_version().as_deref(), Some("56"));
}

#[tokio::test]
async fn non_evm_chain_disconnects_the_evm_facade() {
    let h = harness(Setup::default()).await;
    let (tx, mut rx) = mpsc::unbounded_channel();
    h.runtime.ethereum().on("disconnect", move |payload| {
        let _ = tx.send(payload.clone());
    });

    h.bridge.emit(HostEvent::ChainChanged("tron".into())).unwrap();

    let payload = within(rx.recv()).await.unwrap();
    assert_eq!(payload["code"], 4901);
    assert!(h.runtime.ethereum().chain_id().is_none());

    let err = within(h.runtime.ethereum().request(RequestArguments::method("eth_chainId"))).await;
    assert_eq!(assert_err!(err).code, ErrorCode::ChainDisconnected);
}

#[tokio::test]
async fn detach_rejects_a_pending_signature() {
    let mut h = harness(Setup {
        hold_signing: true,
        ..Setup::default()
    })
    .await;
    let bio = h.runtime.bio().clone();
    within(bio.request(RequestArguments::new("bio_requestAccounts", json!({}))))
        .await
        .unwrap();

    let pending = tokio::spawn({
        let bio = bio.clone();
        async move {
            bio.request(RequestArguments::new(
                "bio_signMessage",
                json!({"message": "hello", "address": "bAddr"}),
            ))
            .await
        }
    });
    within(h.entered.recv()).await.unwrap();

    h.bridge.detach().unwrap();
    let err = within(pending).await.unwrap().unwrap_err();
    assert_eq!(err.code, ErrorCode::Disconnected);
    assert_eq!(bio.core().pending_count(), 0);
    assert_eq!(h.bridge.state(), BridgeState::Detached);
}

#[tokio::test]
async fn denied_permission_never_reaches_the_signer() {
    let permissions = ScriptedPermissions::new(false);
    let h = harness(Setup {
        granted: vec![Capability::Accounts],
        permissions: Some(permissions.clone()),
        ..Setup::default()
    })
    .await;
    let bio = h.runtime.bio();
    within(bio.request(RequestArguments::new("bio_requestAccounts", json!({}))))
        .await
        .unwrap();

    let err = within(bio.request(RequestArguments::new(
        "bio_signMessage",
        json!({"message": "hello", "address": "bAddr"}),
    )))
    .await
    .unwrap_err();
    assert_eq!(err.code, ErrorCode::Unauthorized);
    assert_eq!(err.data.unwrap()["capabilities"], json!(["sign"]));
    assert_eq!(permissions.prompts(), 1);
    assert_eq!(h.wallet.signing_calls(), 0);
    assert_eq!(h.bridge.granted(), Some(vec![Capability::Accounts]));
}

#[tokio::test]
async fn approved_permission_is_asked_once() {
    let permissions = ScriptedPermissions::new(true);
    let h = harness(Setup {
        granted: Vec::new(),
        permissions: Some(permissions.clone()),
        ..Setup::default()
    })
    .await;
    let bio = h.runtime.bio();
    within(bio.request(RequestArguments::new("bio_requestAccounts", json!({}))))
        .await
        .unwrap();

    let sign = json!({"message": "hello", "address": "bAddr"});
    for _ in 0..2 {
        let signature = within(bio.request(RequestArguments::new("bio_signMessage", sign.clone())))
            .await
            .unwrap();
        assert_eq!(signature, json!("sig:bAddr"));
    }
    // accounts, then sign
    assert_eq!(permissions.prompts(), 2);
    assert_eq!(h.bridge.stats().permission_prompts, 2);
}

async fn two_concurrent_signatures(
    h: &mut Harness,
) -> (
    tokio::task::JoinHandle<RpcResult<Value>>,
    tokio::task::JoinHandle<RpcResult<Value>>,
) {
    let bio = h.runtime.bio().clone();
    within(bio.request(RequestArguments::new("bio_requestAccounts", json!({}))))
        .await
        .unwrap();

    let spawn_sign = || {
        let bio = bio.clone();
        tokio::spawn(async move {
            bio.request(RequestArguments::new(
                "bio_signTransaction",
                sign_transaction_params(),
            ))
            .await
        })
    };
    let first = spawn_sign();
    within(h.entered.recv()).await.unwrap();
    let second = spawn_sign();
    (first, second)
}

#[tokio::test]
async fn queued_confirmations_run_one_at_a_time() {
    let mut h = harness(Setup {
        hold_signing: true,
        ..Setup::default()
    })
    .await;
    let (first, second) = two_concurrent_signatures(&mut h).await;

    // The second confirmation waits for the first to settle.
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert_eq!(h.wallet.signing_calls(), 1);

    h.wallet.release.add_permits(2);
    let results = within(futures::future::join_all([first, second])).await;
    for result in results {
        assert_eq!(result.unwrap().unwrap(), json!("sig:bAddr"));
    }
    assert_eq!(h.wallet.signing_calls(), 2);
    assert_eq!(h.wallet.max_active_signing.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn busy_policy_rejects_the_second_confirmation() {
    let mut h = harness(Setup {
        policy: ConfirmationPolicy::RejectBusy,
        hold_signing: true,
        ..Setup::default()
    })
    .await;
    let (first, second) = two_concurrent_signatures(&mut h).await;

    let err = within(second).await.unwrap().unwrap_err();
    assert!(err.is_busy());
    assert_eq!(err.code, ErrorCode::InternalError);

    h.wallet.release.add_permits(1);
    assert_eq!(within(first).await.unwrap().unwrap(), json!("sig:bAddr"));
    assert_eq!(h.wallet.signing_calls(), 1);
}

#[tokio::test]
async fn evm_facade_end_to_end() {
    let h = harness(Setup::default()).await;
    h.wallet.set_chain("ethereum");
    let eth = h.runtime.ethereum();

    let accounts = within(eth.enable()).await.unwrap();
    assert_eq!(accounts, vec![EVM_CHECKSUMMED.to_string()]);
    assert_eq!(eth.selected_address().as_deref(), Some(EVM_CHECKSUMMED));

    let chain = within(eth.request(RequestArguments::method("eth_chainId"))).await;
    assert_eq!(chain.unwrap(), json!("0x1"));

    let signature = within(eth.request(RequestArguments::new(
        "personal_sign",
        json!(["0x68656c6c6f", EVM_CHECKSUMMED]),
    )))
    .await
    .unwrap();
    assert_eq!(signature, json!(format!("sig:{EVM_CHECKSUMMED}")));

    let balance = within(eth.request(RequestArguments::new(
        "eth_getBalance",
        json!([EVM_ADDRESS, "latest"]),
    )))
    .await
    .unwrap();
    assert_eq!(balance, json!("0xde0b6b3a7640000"));

    let response = within(eth.send_async(JsonRpcPayload {
        jsonrpc: "2.0".into(),
        id: json!(7),
        method: "eth_mine".into(),
        params: Value::Null,
    }))
    .await;
    assert_eq!(response.id, json!(7));
    assert_eq!(response.error.unwrap().code, ErrorCode::UnsupportedMethod);
}

#[tokio::test]
async fn tron_pair_end_to_end() {
    let h = harness(Setup::default()).await;
    let link = h.runtime.tron_link();

    let reply = within(link.request(RequestArguments::method("tron_requestAccounts")))
        .await
        .unwrap();
    assert_eq!(reply.code, 200);
    assert!(link.ready());

    let web = h.runtime.tron_web();
    assert_eq!(web.default_address().unwrap().base58, TRON_ADDRESS);
    assert_eq!(within(web.trx().get_balance(None)).await.unwrap(), 1_500_000);

    let signature = within(web.trx().sign_message_v2("hello")).await.unwrap();
    assert_eq!(signature, format!("sig:{TRON_ADDRESS}"));

    let sent = within(web.trx().send_transaction(TRON_ADDRESS, 10)).await.unwrap();
    assert!(sent.result);
    assert_eq!(sent.txid, format!("tx:{TRON_ADDRESS}:10"));

    let raw = within(web.trx().send_raw_transaction(json!({"signature": ["00"]})))
        .await
        .unwrap();
    assert_eq!(raw.txid, "raw:tron");
}

#[tokio::test]
async fn foreign_origin_is_ignored() {
    init_tracing();
    let (wallet, _entered) = ScriptedWallet::new(false);
    let bridge = HostBridge::new(
        settings().bridge,
        Collaborators::new(wallet.clone(), wallet.clone(), wallet.clone(), wallet),
    );

    let (intruder, host) = message_channel("https://evil.example", HOST);
    bridge
        .attach(host, AppInfo::new("demo", "Demo App"), [])
        .await
        .unwrap();

    let mut replies = intruder.subscribe();
    let frame = Frame {
        protocol: ProtocolTag::Bio,
        target_origin: HOST.into(),
        message: WireMessage::Request(RpcRequest::new("1", "bio_chainId", Value::Null)),
    };
    intruder
        .post_message(serde_json::to_value(frame).unwrap(), HOST)
        .unwrap();

    let outcome = tokio::time::timeout(Duration::from_millis(100), replies.recv()).await;
    assert!(outcome.is_err(), "no reply is sent to a foreign origin");
    assert_eq!(bridge.stats().received, 0);
}

#[tokio::test]
async fn remembered_grants_survive_reattach() -> anyhow::Result<()> {
    init_tracing();
    let settings = settings();
    let (wallet, _entered) = ScriptedWallet::new(false);
    let permissions = ScriptedPermissions::new(true);
    let bridge = HostBridge::new(
        settings.bridge.clone(),
        Collaborators::new(wallet.clone(), wallet.clone(), wallet.clone(), wallet.clone()),
    )
    .with_grant_policy(Arc::new(MemoryGrantStore::new()));
    bridge.set_permission_request_callback(permissions.clone());

    for _ in 0..2 {
        let (miniapp, host) = message_channel(MINIAPP, HOST);
        bridge
            .attach(host, AppInfo::new("demo", "Demo App"), [])
            .await?;
        let runtime = MiniappRuntime::init(miniapp, &settings.runtime);
        within(
            runtime
                .bio()
                .request(RequestArguments::new("bio_requestAccounts", json!({}))),
        )
        .await?;
        runtime.destroy();
        bridge.detach()?;
    }

    assert_eq!(permissions.prompts(), 1);
    Ok(())
}

#[tokio::test]
async fn accounts_push_reaches_every_facade() {
    let h = harness(Setup::default()).await;
    let (tx, mut rx) = mpsc::unbounded_channel();
    h.runtime.tron_link().on("accountsChanged", move |payload| {
        let _ = tx.send(payload.clone());
    });

    within(
        h.runtime
            .bio()
            .request(RequestArguments::new("bio_selectAccount", json!({"chain": "tron"}))),
    )
    .await
    .unwrap();

    assert_eq!(within(rx.recv()).await, Some(json!([TRON_ADDRESS])));
    assert!(h.runtime.tron_link().ready());
    assert_eq!(h.bridge.connected_accounts().len(), 1);
}
