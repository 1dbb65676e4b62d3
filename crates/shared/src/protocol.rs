use alloy_primitives::{Address, U256};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

use crate::{
    domain::Purchase,
    quantity::{deserialize_quantity, encode_quantity, HexQuantity, QuantityError},
};

/// Gas allowance for a plain value transfer (21000).
pub const TRANSFER_GAS_LIMIT: &str = "0x5208";

/// Key of the local slot mirroring the contract's transaction count.
pub const TRANSACTION_COUNT_KEY: &str = "transactionCount";

pub mod contract_fn {
    pub const ADD_LISTING: &str = "addToAvailableOptions";
    pub const RECORD_PURCHASE: &str = "addToBlockchain";
    pub const ALL_PURCHASES: &str = "getAllTransactions";
    pub const ALL_LISTINGS: &str = "getAvailableOptions";
    pub const TRANSACTION_COUNT: &str = "getTransactionCount";
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransactionRequest {
    pub from: Address,
    pub to: Address,
    pub gas: String,
    pub value: String,
}

impl TransactionRequest {
    pub fn transfer(from: Address, to: Address, value: U256) -> Self {
        Self {
            from,
            to,
            gas: TRANSFER_GAS_LIMIT.to_string(),
            value: encode_quantity(value),
        }
    }
}

/// Requests understood by an injected wallet provider.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WalletRequest {
    /// Already-authorized accounts, without prompting the user.
    Accounts,
    /// Prompts the user to authorize account access.
    RequestAccounts,
    SendTransaction(TransactionRequest),
}

impl WalletRequest {
    pub fn method(&self) -> &'static str {
        match self {
            WalletRequest::Accounts => "eth_accounts",
            WalletRequest::RequestAccounts => "eth_requestAccounts",
            WalletRequest::SendTransaction(_) => "eth_sendTransaction",
        }
    }

    pub fn params(&self) -> Value {
        match self {
            WalletRequest::Accounts | WalletRequest::RequestAccounts => json!([]),
            WalletRequest::SendTransaction(tx) => json!([tx]),
        }
    }
}

/// Purchase record exactly as the contract reports it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RawPurchase {
    pub sender: Address,
    pub receiver: Address,
    pub amount_of_power: HexQuantity,
    #[serde(rename = "pricePerKW", deserialize_with = "deserialize_quantity")]
    pub price_per_kw: U256,
    pub parsed_amount: HexQuantity,
}

impl RawPurchase {
    pub fn decode(&self) -> Result<Purchase, QuantityError> {
        Ok(Purchase {
            sender: self.sender,
            receiver: self.receiver,
            amount_of_power: self.amount_of_power.decode()?,
            price_per_kw: self.price_per_kw,
            paid_amount: self.parsed_amount.decode()?,
        })
    }
}

/// Arguments of the contract's purchase-recording call.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PurchaseRecord {
    pub receiver: Address,
    pub amount_of_power: U256,
    pub price_per_kw: U256,
    pub paid_amount: U256,
}

impl PurchaseRecord {
    pub fn contract_args(&self) -> Value {
        json!([
            self.receiver,
            encode_quantity(self.amount_of_power),
            encode_quantity(self.price_per_kw),
            encode_quantity(self.paid_amount),
        ])
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TransactionReceipt {
    pub transaction_hash: String,
    #[serde(default)]
    pub block_number: Option<String>,
    #[serde(default)]
    pub status: Option<String>,
}

impl TransactionReceipt {
    /// Receipts without a status field predate status codes and count as success.
    pub fn succeeded(&self) -> bool {
        !matches!(self.status.as_deref(), Some("0x0") | Some("0x00"))
    }
}
