//! Interactive demo: a console wallet serving a scripted miniapp.
//!
//! Every prompt the bridge raises is shown on stdout and answered on stdin,
//! unless auto-approve is on.

use async_trait::async_trait;
use biobridge::prelude::*;
use serde_json::{Value, json};
use std::io::{self, Write};
use std::sync::{Arc, Mutex, PoisonError};

/// Ask a yes/no question on the terminal. Anything but `y` declines.
async fn ask(title: &str, detail: &str, auto_approve: bool) -> bool {
    println!("\n{}", "=".repeat(60));
    println!("{title}");
    println!("{}", "=".repeat(60));
    println!("{detail}");
    println!("{}", "-".repeat(60));
    if auto_approve {
        println!("Approved (auto)");
        return true;
    }
    print!("Approve? [y]es / [n]o > ");
    let _ = io::stdout().flush();

    let input = tokio::task::spawn_blocking(|| {
        let mut input = String::new();
        io::stdin().read_line(&mut input).ok().map(|_| input)
    })
    .await
    .ok()
    .flatten();

    let approved = matches!(
        input.as_deref().map(str::trim).map(str::to_lowercase).as_deref(),
        Some("y" | "yes")
    );
    println!("{}", if approved { "Approved" } else { "Declined" });
    approved
}

/// A wallet that keeps its accounts in memory and asks the terminal.
struct ConsoleWallet {
    accounts: Vec<Account>,
    chain: Mutex<String>,
    auto_approve: bool,
}

impl ConsoleWallet {
    fn new(auto_approve: bool) -> Self {
        Self {
            accounts: vec![
                Account::new("bDemoAddress1", "bfmeta", "02a1").with_name("BFMeta main"),
                Account::new(
                    "0x5aaeb6053f3e94c9b9a09f33669435e7ef1beaed",
                    "ethereum",
                    "02b2",
                )
                .with_name("Ethereum main"),
                Account::new(
                    "0xfb6916095ca1df60bb79ce92ce3ea74c37c5d359",
                    "binance",
                    "02c3",
                )
                .with_name("BSC main"),
                Account::new("T9yD14Nj9j7xAB4dbGeiX9h8unkKHxuWwb", "tron", "02d4")
                    .with_name("Tron main"),
            ],
            chain: Mutex::new("bfmeta".to_string()),
            auto_approve,
        }
    }

    fn chain(&self) -> String {
        self.chain
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    fn switch_chain(&self, chain: &str) {
        *self.chain.lock().unwrap_or_else(PoisonError::into_inner) = chain.to_string();
    }
}

#[async_trait]
impl AccountPicker for ConsoleWallet {
    async fn pick(
        &self,
        request: &AccountPickRequest,
        app: &AppInfo,
    ) -> CollaboratorResult<Option<Account>> {
        let Some(account) = self
            .accounts
            .iter()
            .find(|a| request.chain.as_deref().is_none_or(|c| a.is_on(c)))
        else {
            return Ok(None);
        };
        let detail = format!(
            "{} asks for an account ({:?}).\nOffer: {} on {}",
            app.name, request.purpose, account.address, account.chain
        );
        Ok(ask("ACCOUNT REQUEST", &detail, self.auto_approve)
            .await
            .then(|| account.clone()))
    }
}

#[async_trait]
impl SigningConfirmation for ConsoleWallet {
    async fn confirm_signing(
        &self,
        request: &SigningRequest,
        app: &AppInfo,
    ) -> CollaboratorResult<Option<Value>> {
        let payload = serde_json::to_string_pretty(request)
            .map_err(|e| CollaboratorError::failed(e.to_string()))?;
        let detail = format!("{} asks to sign with {}:\n{payload}", app.name, request.address());
        if !ask("SIGNATURE REQUEST", &detail, self.auto_approve).await {
            return Ok(None);
        }
        // Demo signature: not a real key operation.
        let digest = payload.bytes().fold(0u64, |acc, b| {
            acc.wrapping_mul(31).wrapping_add(u64::from(b))
        });
        Ok(Some(json!(format!("0x{digest:016x}"))))
    }
}

#[async_trait]
impl TransferConfirmation for ConsoleWallet {
    async fn confirm_transfer(
        &self,
        params: &TransferParams,
        app: &AppInfo,
    ) -> CollaboratorResult<Option<TransferReceipt>> {
        let detail = format!(
            "{} asks to send {} from {} to {} on {}",
            app.name, params.amount, params.from, params.to, params.chain
        );
        if !ask("TRANSFER REQUEST", &detail, self.auto_approve).await {
            return Ok(None);
        }
        Ok(Some(TransferReceipt {
            tx_hash: biobridge::util::generate_id("tx"),
        }))
    }
}

#[async_trait]
impl PermissionRequest for ConsoleWallet {
    async fn request_permission(
        &self,
        _app_id: &str,
        app_name: &str,
        capabilities: &[Capability],
    ) -> bool {
        let names: Vec<&str> = capabilities.iter().map(|c| c.as_str()).collect();
        let detail = format!("{app_name} asks for: {}", names.join(", "));
        ask("PERMISSION REQUEST", &detail, self.auto_approve).await
    }
}

#[async_trait]
impl HostWallet for ConsoleWallet {
    async fn chain_id(&self) -> CollaboratorResult<String> {
        Ok(self.chain())
    }

    async fn balance(&self, query: &BalanceQuery) -> CollaboratorResult<String> {
        if !self.accounts.iter().any(|a| a.has_address(&query.address)) {
            return Err(CollaboratorError::InvalidParams(format!(
                "unknown address '{}'",
                query.address
            )));
        }
        Ok(match query.chain.as_str() {
            "tron" => "25000000".to_string(),
            "ethereum" | "binance" => "1500000000000000000".to_string(),
            _ => "100000000".to_string(),
        })
    }

    async fn create_transaction(&self, params: &TransferParams) -> CollaboratorResult<Value> {
        Ok(json!({
            "from": params.from,
            "to": params.to,
            "amount": params.amount,
            "chain": params.chain,
        }))
    }

    async fn broadcast(&self, _params: &BroadcastParams) -> CollaboratorResult<TransferReceipt> {
        Ok(TransferReceipt {
            tx_hash: biobridge::util::generate_id("tx"),
        })
    }

    async fn close_splash_screen(&self) -> CollaboratorResult<()> {
        println!("(splash screen closed)");
        Ok(())
    }
}

fn show(step: &str, outcome: &std::result::Result<impl std::fmt::Debug, ProviderRpcError>) {
    match outcome {
        Ok(value) => println!("  {step:<28} -> {value:?}"),
        Err(e) => println!("  {step:<28} -> error {} ({})", e.code, e.message),
    }
}

/// Attach a console wallet to a scripted miniapp and walk every facade.
pub async fn run(settings: BridgeSettings, app_id: String, auto_approve: bool) -> Result<()> {
    for issue in settings.validate() {
        tracing::warn!("{issue}");
    }

    let wallet = Arc::new(ConsoleWallet::new(auto_approve));
    let bridge = HostBridge::new(
        settings.bridge.clone(),
        Collaborators::new(wallet.clone(), wallet.clone(), wallet.clone(), wallet.clone()),
    );
    bridge.set_permission_request_callback(wallet.clone());

    let (miniapp, host) = message_channel(
        settings.runtime.miniapp_origin.clone(),
        settings.bridge.host_origin.clone(),
    );
    let app = AppInfo::new(app_id, "Demo Miniapp").with_origin(settings.runtime.miniapp_origin.clone());
    bridge.attach(host, app, []).await?;

    let runtime = global_slot().install(MiniappRuntime::init(miniapp, &settings.runtime))?;
    runtime.ethereum().on("chainChanged", |chain| {
        println!("  [ethereum] chainChanged {chain}");
    });
    runtime.tron_link().on("accountsChanged", |accounts| {
        println!("  [tron] accountsChanged {accounts}");
    });

    println!("Biobridge demo | policy: {:?}", settings.bridge.confirmation_policy);
    println!("\nBio provider");
    let bio = runtime.bio();
    show(
        "bio_closeSplashScreen",
        &bio.request(RequestArguments::method("bio_closeSplashScreen")).await,
    );
    show("bio_chainId", &bio.request(RequestArguments::method("bio_chainId")).await);
    let accounts = bio
        .request_as::<Vec<Account>>(Method::RequestAccounts, json!({}))
        .await;
    show("bio_requestAccounts", &accounts);
    if let Some(account) = accounts.ok().and_then(|a| a.into_iter().next()) {
        show(
            "bio_signMessage",
            &bio.request(RequestArguments::new(
                "bio_signMessage",
                json!({"message": "hello from the demo", "address": account.address}),
            ))
            .await,
        );
        show(
            "bio_getBalance",
            &bio.request(RequestArguments::new(
                "bio_getBalance",
                json!({"address": account.address, "chain": account.chain}),
            ))
            .await,
        );
    }

    println!("\nEthereum provider");
    wallet.switch_chain("binance");
    bridge.emit(HostEvent::ChainChanged("binance".to_string()))?;
    let eth = runtime.ethereum();
    show("eth_chainId", &eth.request(RequestArguments::method("eth_chainId")).await);
    let addresses = eth.enable().await;
    show("eth_requestAccounts", &addresses);
    if let Some(address) = addresses.ok().and_then(|a| a.into_iter().next()) {
        show(
            "personal_sign",
            &eth.request(RequestArguments::new(
                "personal_sign",
                json!(["0x68656c6c6f", address]),
            ))
            .await,
        );
        show(
            "eth_getBalance",
            &eth.request(RequestArguments::new("eth_getBalance", json!([address, "latest"])))
                .await,
        );
    }

    println!("\nTron provider");
    let link = runtime.tron_link();
    show(
        "tron_requestAccounts",
        &link.request(RequestArguments::method("tron_requestAccounts")).await,
    );
    let trx = runtime.tron_web().trx();
    show("trx.getBalance", &trx.get_balance(None).await);
    show("trx.signMessageV2", &trx.sign_message_v2("hello tron").await);

    global_slot().teardown();
    bridge.detach()?;

    let stats = bridge.stats();
    println!("\nBridge stats");
    println!("  Received:           {}", stats.received);
    println!("  Responded:          {}", stats.responded);
    println!("  Rejected:           {}", stats.rejected);
    println!("  Permission prompts: {}", stats.permission_prompts);
    Ok(())
}
