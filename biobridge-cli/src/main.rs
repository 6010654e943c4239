//! Biobridge CLI - tools around the miniapp wallet bridge
//!
//! Manages the settings file, inspects chain ids and Tron addresses, and runs
//! an interactive demo host with a miniapp attached.

#![allow(clippy::print_stdout)] // CLI program intentionally uses stdout

mod demo;

use biobridge::chain;
use biobridge::config::{
    BridgeSettings, ConfirmationPolicy, IssueLevel, config_path, init_config, load_config,
};
use biobridge::error::{BridgeError, Result};
use biobridge::provider::tron::TronAddress;
use clap::{Args, Parser, Subcommand};
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use tracing::Level;
use tracing_subscriber::EnvFilter;

/// Biobridge - permissioned RPC bridge between wallet miniapps and their host
#[derive(Parser)]
#[command(name = "biobridge")]
#[command(author, version, about, long_about = None)]
#[command(propagate_version = true)]
struct Cli {
    /// Verbosity level (-v, -vv, -vvv)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,

    /// Configuration file path
    #[arg(short, long, env = "BIOBRIDGE_CONFIG", global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Write a default configuration file
    Init(InitArgs),

    /// Manage configuration
    Config(ConfigArgs),

    /// Resolve a chain id, display name or EVM id
    Chain(ChainArgs),

    /// Convert a Tron address between base58 and hex
    TronAddress(TronAddressArgs),

    /// Run a demo host with a miniapp attached
    Demo(DemoArgs),
}

/// Arguments for the init command
#[derive(Args)]
struct InitArgs {
    /// Force overwrite existing configuration
    #[arg(short, long)]
    force: bool,
}

/// Arguments for the config command
#[derive(Args)]
struct ConfigArgs {
    #[command(subcommand)]
    command: ConfigCommands,
}

#[derive(Subcommand)]
enum ConfigCommands {
    /// Show current configuration
    Show,
    /// Show configuration file path
    Path,
    /// Validate configuration
    Validate,
}

/// Arguments for the chain command
#[derive(Args)]
struct ChainArgs {
    /// Host id (`binance`), display name (`BSC`), decimal (`56`) or hex (`0x38`)
    reference: Option<String>,

    /// List every known chain
    #[arg(short, long)]
    list: bool,
}

/// Arguments for the tron-address command
#[derive(Args)]
struct TronAddressArgs {
    /// Base58 (`T...`) or hex (`41...`) address
    address: String,
}

/// Arguments for the demo command
#[derive(Args)]
struct DemoArgs {
    /// Approve every prompt without asking
    #[arg(short = 'y', long)]
    auto_approve: bool,

    /// Overlapping prompt policy (overrides config)
    #[arg(short, long)]
    policy: Option<ConfirmationPolicy>,

    /// Miniapp id shown in prompts
    #[arg(long, default_value = "demo")]
    app_id: String,
}

fn main() -> ExitCode {
    let cli = Cli::parse();

    // Initialize logging based on verbosity
    init_logging(cli.verbose);

    let rt = match tokio::runtime::Runtime::new() {
        Ok(rt) => rt,
        Err(e) => {
            tracing::error!("failed to create tokio runtime: {e}");
            return ExitCode::FAILURE;
        }
    };

    match rt.block_on(run(cli)) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            tracing::error!("{e}");
            ExitCode::FAILURE
        }
    }
}

/// Initialize logging with the given verbosity level.
fn init_logging(verbosity: u8) {
    let level = match verbosity {
        0 => Level::WARN,
        1 => Level::INFO,
        2 => Level::DEBUG,
        _ => Level::TRACE,
    };

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        EnvFilter::new(format!(
            "biobridge={level},biobridge_cli={level},{}",
            if verbosity >= 3 { "debug" } else { "warn" }
        ))
    });

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(verbosity >= 2)
        .init();
}

/// Main async entry point.
async fn run(cli: Cli) -> Result<()> {
    let config_file = cli.config.unwrap_or_else(config_path);
    match cli.command {
        Commands::Init(args) => cmd_init(args, &config_file).await,
        Commands::Config(args) => cmd_config(args, &config_file).await,
        Commands::Chain(args) => cmd_chain(&args),
        Commands::TronAddress(args) => cmd_tron_address(&args),
        Commands::Demo(args) => {
            let mut settings = load_settings(&config_file).await?;
            if let Some(policy) = args.policy {
                settings.bridge.confirmation_policy = policy;
            }
            demo::run(settings, args.app_id, args.auto_approve).await
        }
    }
}

/// Settings from `path`, or the defaults when the file does not exist.
async fn load_settings(path: &Path) -> Result<BridgeSettings> {
    if path.exists() {
        Ok(load_config(path).await?)
    } else {
        tracing::debug!(path = %path.display(), "no config file, using defaults");
        Ok(BridgeSettings::default())
    }
}

/// Initialize configuration.
async fn cmd_init(args: InitArgs, config_file: &Path) -> Result<()> {
    let written = init_config(config_file, args.force)
        .await
        .map_err(|e| BridgeError::config(format!("failed to initialize config: {e}")))?;

    if written {
        println!("Configuration created: {}", config_file.display());
        println!();
        println!("Next steps:");
        println!("  1. biobridge config validate");
        println!("  2. biobridge demo");
    } else {
        println!("Configuration already exists at: {}", config_file.display());
        println!("Use --force to overwrite.");
    }
    Ok(())
}

/// Configuration management.
async fn cmd_config(args: ConfigArgs, config_file: &Path) -> Result<()> {
    match args.command {
        ConfigCommands::Path => {
            println!("{}", config_file.display());
        }
        ConfigCommands::Show => {
            if config_file.exists() {
                let content = tokio::fs::read_to_string(config_file)
                    .await
                    .map_err(|e| BridgeError::config(format!("failed to read config: {e}")))?;
                println!("{content}");
            } else {
                println!("Configuration file does not exist.");
                println!("Run 'biobridge init' to create one.");
            }
        }
        ConfigCommands::Validate => {
            if !config_file.exists() {
                println!("error: configuration file does not exist");
                return Ok(());
            }

            let settings = match load_config(config_file).await {
                Ok(settings) => settings,
                Err(e) => {
                    println!("error: {e}");
                    return Ok(());
                }
            };
            let issues = settings.validate();
            for issue in &issues {
                println!("{issue}");
            }
            if issues.iter().any(|i| i.level == IssueLevel::Error) {
                return Err(BridgeError::config("configuration is invalid"));
            }
            println!("Configuration is valid");
        }
    }

    Ok(())
}

/// Chain id lookup.
fn cmd_chain(args: &ChainArgs) -> Result<()> {
    if args.list || args.reference.is_none() {
        println!("{:<12} {:<16} {:>8}  HEX", "ID", "NAME", "EVM");
        for info in chain::supported_chains() {
            let evm = info.evm_chain_id.map_or_else(|| "-".to_string(), |id| id.to_string());
            let hex = info.evm_hex_chain_id().unwrap_or_else(|| "-".to_string());
            println!("{:<12} {:<16} {evm:>8}  {hex}", info.id, info.name);
        }
        return Ok(());
    }

    let reference = args.reference.as_deref().unwrap_or_default();
    let Some(info) = chain::resolve(reference) else {
        println!("Unknown chain '{reference}'. Run 'biobridge chain --list' for known ids.");
        return Ok(());
    };
    println!("Chain:   {}", info.id);
    println!("Name:    {}", info.name);
    match info.evm_chain_id {
        Some(id) => {
            println!("EVM id:  {id}");
            println!("Hex id:  {}", info.evm_hex_chain_id().unwrap_or_default());
        }
        None => println!("EVM id:  - (not an EVM chain)"),
    }
    Ok(())
}

/// Tron address conversion.
fn cmd_tron_address(args: &TronAddressArgs) -> Result<()> {
    let address = TronAddress::parse(&args.address)
        .ok_or_else(|| BridgeError::config(format!("'{}' is not a Tron address", args.address)))?;
    println!("Base58:  {}", address.base58);
    println!("Hex:     {}", address.hex);
    Ok(())
}
