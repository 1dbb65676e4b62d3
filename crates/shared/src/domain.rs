use alloy_primitives::{Address, U256};
use serde::{Deserialize, Serialize};

use crate::quantity::deserialize_quantity;

/// One wei per ether, i.e. 10^18.
pub const WEI_PER_ETHER: U256 = U256::from_limbs([1_000_000_000_000_000_000, 0, 0, 0]);

/// An offer to sell power, as stored by the market contract.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Listing {
    #[serde(deserialize_with = "deserialize_quantity")]
    pub id: U256,
    pub sender: Address,
    pub power_source: String,
    #[serde(deserialize_with = "deserialize_quantity")]
    pub amount_of_power: U256,
    #[serde(rename = "pricePerKW", deserialize_with = "deserialize_quantity")]
    pub price_per_kw: U256,
    #[serde(deserialize_with = "deserialize_quantity")]
    pub duration: U256,
    #[serde(deserialize_with = "deserialize_quantity")]
    pub time_to_start: U256,
}

/// A completed purchase with its hex quantities decoded.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Purchase {
    pub sender: Address,
    pub receiver: Address,
    pub amount_of_power: U256,
    #[serde(rename = "pricePerKW")]
    pub price_per_kw: U256,
    pub paid_amount: U256,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ListingDraft {
    pub power_source: String,
    pub amount_of_power: u64,
    pub price_per_kw: u64,
    pub duration: u64,
    pub time_to_start: u64,
}

impl ListingDraft {
    pub fn validate(&self) -> Result<(), String> {
        if self.power_source.trim().is_empty() {
            return Err("power source must not be empty".to_string());
        }
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PurchaseOrder {
    pub receiver_address: Address,
    pub amount_of_power: u64,
    pub price_per_kw: u64,
}

impl PurchaseOrder {
    /// Total payment in wei: `amount_of_power * price_per_kw` ether.
    pub fn total_price_wei(&self) -> U256 {
        U256::from(self.amount_of_power) * U256::from(self.price_per_kw) * WEI_PER_ETHER
    }
}
