//! Tron address conversion.
//!
//! A Tron address is 21 bytes: the `0x41` network prefix followed by a
//! 20-byte account id. Wallets show it as Base58Check (`T...`); raw APIs use
//! the hex form (`41...`). Conversion needs no network state.

use serde::{Deserialize, Serialize};

/// Network prefix byte of mainnet addresses.
pub const ADDRESS_PREFIX: u8 = 0x41;

const ADDRESS_LEN: usize = 21;

/// Both representations of one address.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TronAddress {
    /// Base58Check form.
    pub base58: String,
    /// Hex form, `41` prefixed, lowercase.
    pub hex: String,
}

impl TronAddress {
    /// Build from either representation.
    #[must_use]
    pub fn parse(address: &str) -> Option<Self> {
        if let Some(hex) = to_hex(address) {
            return Some(Self {
                base58: address.to_string(),
                hex,
            });
        }
        let base58 = from_hex(address)?;
        let hex = to_hex(&base58)?;
        Some(Self { base58, hex })
    }
}

fn decode_base58(address: &str) -> Option<Vec<u8>> {
    let bytes = bs58::decode(address)
        .with_check(Some(ADDRESS_PREFIX))
        .into_vec()
        .ok()?;
    (bytes.len() == ADDRESS_LEN).then_some(bytes)
}

/// Base58Check address to its hex form.
#[must_use]
pub fn to_hex(address: &str) -> Option<String> {
    decode_base58(address).map(hex::encode)
}

/// Hex address (`41...`, or an EVM-style `0x...` account id) to Base58Check.
#[must_use]
pub fn from_hex(address: &str) -> Option<String> {
    let raw = address
        .strip_prefix("0x")
        .or_else(|| address.strip_prefix("0X"));
    let bytes = match raw {
        Some(account_id) => {
            let id = hex::decode(account_id).ok()?;
            if id.len() != ADDRESS_LEN - 1 {
                return None;
            }
            let mut bytes = Vec::with_capacity(ADDRESS_LEN);
            bytes.push(ADDRESS_PREFIX);
            bytes.extend(id);
            bytes
        }
        None => hex::decode(address).ok()?,
    };
    if bytes.len() != ADDRESS_LEN || bytes[0] != ADDRESS_PREFIX {
        return None;
    }
    Some(bs58::encode(bytes).with_check().into_string())
}

/// Whether a string is a valid Base58Check Tron address.
#[must_use]
pub fn is_address(address: &str) -> bool {
    decode_base58(address).is_some()
}
