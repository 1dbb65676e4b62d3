use std::{sync::Arc, time::Duration};

use alloy_primitives::{Address, U256};
use anyhow::{anyhow, Result};
use async_trait::async_trait;
use serde_json::{json, Value};
use shared::{
    domain::{Listing, ListingDraft},
    protocol::{contract_fn, PurchaseRecord, RawPurchase, TransactionReceipt},
    quantity::{encode_quantity, HexQuantity},
};
use tracing::debug;

use crate::transport::RpcTransport;

pub const DEFAULT_RECEIPT_POLL_INTERVAL: Duration = Duration::from_secs(2);

/// A submitted contract write awaiting confirmation.
#[async_trait]
pub trait PendingTransaction: Send + Sync {
    fn hash(&self) -> &str;
    async fn wait(&self) -> Result<TransactionReceipt>;
}

/// Typed proxy for the deployed power market contract.
#[async_trait]
pub trait MarketContract: Send + Sync {
    async fn add_listing(&self, draft: &ListingDraft) -> Result<Box<dyn PendingTransaction>>;
    async fn record_purchase(&self, record: &PurchaseRecord)
        -> Result<Box<dyn PendingTransaction>>;
    async fn all_purchases(&self) -> Result<Vec<RawPurchase>>;
    async fn all_listings(&self) -> Result<Vec<Listing>>;
    async fn transaction_count(&self) -> Result<U256>;
}

/// Contract client speaking to a contract gateway over JSON-RPC.
///
/// Reads go through `contract_call` and writes through `contract_send`, both
/// taking `[contractAddress, functionName, args]`. A write answers with the
/// transaction hash, which is then polled with `eth_getTransactionReceipt`.
pub struct RpcMarketContract {
    transport: Arc<RpcTransport>,
    address: Address,
    poll_interval: Duration,
}

impl RpcMarketContract {
    pub fn new(transport: Arc<RpcTransport>, address: Address) -> Self {
        Self {
            transport,
            address,
            poll_interval: DEFAULT_RECEIPT_POLL_INTERVAL,
        }
    }

    pub fn with_poll_interval(mut self, poll_interval: Duration) -> Self {
        self.poll_interval = poll_interval;
        self
    }

    pub fn address(&self) -> Address {
        self.address
    }

    async fn read<T: serde::de::DeserializeOwned>(&self, function: &str) -> Result<T> {
        self.transport
            .call("contract_call", json!([self.address, function, []]))
            .await
    }

    async fn send(&self, function: &str, args: Value) -> Result<Box<dyn PendingTransaction>> {
        let hash: String = self
            .transport
            .call("contract_send", json!([self.address, function, args]))
            .await?;
        debug!(function, %hash, "contract: write submitted");
        Ok(Box::new(RpcPendingTransaction {
            transport: Arc::clone(&self.transport),
            hash,
            poll_interval: self.poll_interval,
        }))
    }
}

fn listing_args(draft: &ListingDraft) -> Value {
    json!([
        draft.power_source,
        encode_quantity(U256::from(draft.amount_of_power)),
        encode_quantity(U256::from(draft.price_per_kw)),
        encode_quantity(U256::from(draft.duration)),
        encode_quantity(U256::from(draft.time_to_start)),
    ])
}

#[async_trait]
impl MarketContract for RpcMarketContract {
    async fn add_listing(&self, draft: &ListingDraft) -> Result<Box<dyn PendingTransaction>> {
        self.send(contract_fn::ADD_LISTING, listing_args(draft)).await
    }

    async fn record_purchase(
        &self,
        record: &PurchaseRecord,
    ) -> Result<Box<dyn PendingTransaction>> {
        self.send(contract_fn::RECORD_PURCHASE, record.contract_args())
            .await
    }

    async fn all_purchases(&self) -> Result<Vec<RawPurchase>> {
        self.read(contract_fn::ALL_PURCHASES).await
    }

    async fn all_listings(&self) -> Result<Vec<Listing>> {
        self.read(contract_fn::ALL_LISTINGS).await
    }

    async fn transaction_count(&self) -> Result<U256> {
        let count: HexQuantity = self.read(contract_fn::TRANSACTION_COUNT).await?;
        Ok(count.decode()?)
    }
}

struct RpcPendingTransaction {
    transport: Arc<RpcTransport>,
    hash: String,
    poll_interval: Duration,
}

#[async_trait]
impl PendingTransaction for RpcPendingTransaction {
    fn hash(&self) -> &str {
        &self.hash
    }

    async fn wait(&self) -> Result<TransactionReceipt> {
        loop {
            let receipt: Option<TransactionReceipt> = self
                .transport
                .call("eth_getTransactionReceipt", json!([self.hash]))
                .await?;

            match receipt {
                Some(receipt) if receipt.succeeded() => return Ok(receipt),
                Some(_) => return Err(anyhow!("transaction {} reverted", self.hash)),
                None => tokio::time::sleep(self.poll_interval).await,
            }
        }
    }
}
