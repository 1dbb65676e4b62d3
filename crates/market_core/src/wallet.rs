use std::sync::Arc;

use anyhow::Result;
use async_trait::async_trait;
use serde_json::Value;
use shared::protocol::WalletRequest;
use tokio::sync::broadcast;

use crate::transport::RpcTransport;

/// An injected wallet: owns the user's identity and signs transactions.
#[async_trait]
pub trait WalletProvider: Send + Sync {
    async fn request(&self, request: &WalletRequest) -> Result<Value>;

    /// Account lists pushed by the wallet when the user switches or revokes
    /// accounts. Wallets that cannot push return `None`.
    fn account_changes(&self) -> Option<broadcast::Receiver<Vec<String>>> {
        None
    }
}

/// Wallet reached through a JSON-RPC endpoint exposing the `eth_*` account
/// and transaction methods (a node with unlocked accounts, or a signer proxy).
pub struct JsonRpcWallet {
    transport: Arc<RpcTransport>,
}

impl JsonRpcWallet {
    pub fn new(transport: Arc<RpcTransport>) -> Self {
        Self { transport }
    }
}

#[async_trait]
impl WalletProvider for JsonRpcWallet {
    async fn request(&self, request: &WalletRequest) -> Result<Value> {
        self.transport
            .call(request.method(), request.params())
            .await
    }
}
