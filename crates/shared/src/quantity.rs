//! Hex-encoded integer quantities as they come back from the contract.
//!
//! Contract reads report integers either as a bare `"0x…"` string or as a
//! big-number object of the form `{ "_hex": "0x…", "_isBigNumber": true }`.
//! Both shapes go through [`decode_quantity`], which rejects anything that is
//! not a `0x`-prefixed run of hex digits fitting in 256 bits.

use alloy_primitives::U256;
use serde::{Deserialize, Deserializer, Serialize};
use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum QuantityError {
    #[error("hex quantity is empty")]
    Empty,
    #[error("hex quantity '{0}' is missing the 0x prefix")]
    MissingPrefix(String),
    #[error("hex quantity '{input}' contains invalid digit '{found}'")]
    InvalidDigit { input: String, found: char },
    #[error("hex quantity '{0}' does not fit in 256 bits")]
    Overflow(String),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum HexQuantity {
    BigNumber {
        #[serde(rename = "_hex")]
        hex: String,
    },
    Hex(String),
}

impl HexQuantity {
    pub fn as_hex(&self) -> &str {
        match self {
            HexQuantity::BigNumber { hex } => hex,
            HexQuantity::Hex(hex) => hex,
        }
    }

    pub fn decode(&self) -> Result<U256, QuantityError> {
        decode_quantity(self.as_hex())
    }
}

impl From<U256> for HexQuantity {
    fn from(value: U256) -> Self {
        HexQuantity::Hex(encode_quantity(value))
    }
}

pub fn decode_quantity(raw: &str) -> Result<U256, QuantityError> {
    if raw.is_empty() {
        return Err(QuantityError::Empty);
    }

    let digits = raw
        .strip_prefix("0x")
        .or_else(|| raw.strip_prefix("0X"))
        .ok_or_else(|| QuantityError::MissingPrefix(raw.to_string()))?;
    if digits.is_empty() {
        return Err(QuantityError::Empty);
    }

    if let Some(found) = digits.chars().find(|c| !c.is_ascii_hexdigit()) {
        return Err(QuantityError::InvalidDigit {
            input: raw.to_string(),
            found,
        });
    }

    let significant = digits.trim_start_matches('0');
    if significant.is_empty() {
        return Ok(U256::ZERO);
    }
    U256::from_str_radix(significant, 16).map_err(|_| QuantityError::Overflow(raw.to_string()))
}

pub fn encode_quantity(value: U256) -> String {
    format!("0x{value:x}")
}

/// Serde adapter for integer fields that may arrive in either quantity shape.
pub fn deserialize_quantity<'de, D>(deserializer: D) -> Result<U256, D::Error>
where
    D: Deserializer<'de>,
{
    let quantity = HexQuantity::deserialize(deserializer)?;
    quantity.decode().map_err(serde::de::Error::custom)
}
