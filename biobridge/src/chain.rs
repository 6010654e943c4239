//! Chain identifier normalization.
//!
//! The host names chains with short symbolic ids (`"bfmeta"`, `"binance"`),
//! EVM tooling uses EIP-155 numeric ids, and EVM providers expose those ids as
//! `0x`-prefixed hex strings. Every function here is pure and table driven:
//! unknown input yields `None`, never a panic.

/// Static description of a chain the wallet knows about.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChainInfo {
    /// Host chain id.
    pub id: &'static str,
    /// Display name.
    pub name: &'static str,
    /// EIP-155 chain id, for EVM-compatible chains.
    pub evm_chain_id: Option<u64>,
}

impl ChainInfo {
    /// Whether the chain speaks the EVM provider convention.
    #[must_use]
    pub const fn is_evm(&self) -> bool {
        self.evm_chain_id.is_some()
    }

    /// EIP-155 id as a hex string (`0x38` for 56).
    #[must_use]
    pub fn evm_hex_chain_id(&self) -> Option<String> {
        self.evm_chain_id.map(format_hex)
    }
}

const CHAINS: &[ChainInfo] = &[
    ChainInfo {
        id: "ethereum",
        name: "Ethereum",
        evm_chain_id: Some(1),
    },
    ChainInfo {
        id: "binance",
        name: "BNB Smart Chain",
        evm_chain_id: Some(56),
    },
    ChainInfo {
        id: "tron",
        name: "Tron",
        evm_chain_id: None,
    },
    ChainInfo {
        id: "bitcoin",
        name: "Bitcoin",
        evm_chain_id: None,
    },
    ChainInfo {
        id: "bfmeta",
        name: "BFMeta",
        evm_chain_id: None,
    },
    ChainInfo {
        id: "bfchainv2",
        name: "BFChain V2",
        evm_chain_id: None,
    },
    ChainInfo {
        id: "btgmeta",
        name: "BTGMeta",
        evm_chain_id: None,
    },
    ChainInfo {
        id: "ccchain",
        name: "CCChain",
        evm_chain_id: None,
    },
    ChainInfo {
        id: "pmchain",
        name: "PMChain",
        evm_chain_id: None,
    },
];

/// Host id of the Tron chain.
pub const TRON: &str = "tron";

fn format_hex(id: u64) -> String {
    format!("{id:#x}")
}

/// All chains known to the normalizer.
pub fn supported_chains() -> impl Iterator<Item = &'static ChainInfo> {
    CHAINS.iter()
}

/// Look up a chain by host id (case-insensitive).
#[must_use]
pub fn chain_info(host_id: &str) -> Option<&'static ChainInfo> {
    CHAINS.iter().find(|c| c.id.eq_ignore_ascii_case(host_id))
}

/// Whether the host id names an EVM-compatible chain.
#[must_use]
pub fn is_evm_chain(host_id: &str) -> bool {
    chain_info(host_id).is_some_and(ChainInfo::is_evm)
}

/// Host id to EIP-155 decimal id.
#[must_use]
pub fn evm_chain_id(host_id: &str) -> Option<u64> {
    chain_info(host_id).and_then(|c| c.evm_chain_id)
}

/// EIP-155 decimal id to host id.
#[must_use]
pub fn host_chain_from_evm(chain_id: u64) -> Option<&'static str> {
    CHAINS
        .iter()
        .find(|c| c.evm_chain_id == Some(chain_id))
        .map(|c| c.id)
}

/// Decimal id to hex string, for supported EVM chains only.
#[must_use]
pub fn decimal_to_hex(chain_id: u64) -> Option<String> {
    host_chain_from_evm(chain_id).map(|_| format_hex(chain_id))
}

/// Hex string (`0x`/`0X` prefix required) to decimal id, for supported EVM
/// chains only.
#[must_use]
pub fn hex_to_decimal(hex: &str) -> Option<u64> {
    let digits = hex
        .strip_prefix("0x")
        .or_else(|| hex.strip_prefix("0X"))?;
    if digits.is_empty() {
        return None;
    }
    let id = u64::from_str_radix(digits, 16).ok()?;
    host_chain_from_evm(id).map(|_| id)
}

/// Host id to hex chain id.
#[must_use]
pub fn host_to_hex(host_id: &str) -> Option<String> {
    evm_chain_id(host_id).map(format_hex)
}

/// Hex chain id to host id.
#[must_use]
pub fn hex_to_host(hex: &str) -> Option<&'static str> {
    hex_to_decimal(hex).and_then(host_chain_from_evm)
}

/// Host id to display name.
#[must_use]
pub fn display_name(host_id: &str) -> Option<&'static str> {
    chain_info(host_id).map(|c| c.name)
}

/// Display name to host id (case-insensitive).
#[must_use]
pub fn host_from_display_name(name: &str) -> Option<&'static str> {
    CHAINS
        .iter()
        .find(|c| c.name.eq_ignore_ascii_case(name))
        .map(|c| c.id)
}

/// Resolve any representation: host id, display name, decimal or hex EVM id.
#[must_use]
pub fn resolve(reference: &str) -> Option<&'static ChainInfo> {
    let reference = reference.trim();
    if let Some(info) = chain_info(reference) {
        return Some(info);
    }
    let host = if reference.starts_with("0x") || reference.starts_with("0X") {
        hex_to_host(reference)
    } else if let Ok(id) = reference.parse::<u64>() {
        host_chain_from_evm(id)
    } else {
        host_from_display_name(reference)
    };
    host.and_then(chain_info)
}
