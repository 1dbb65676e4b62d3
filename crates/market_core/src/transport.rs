//! JSON-RPC 2.0 over HTTP, shared by the wallet and contract clients.

use std::sync::atomic::{AtomicU64, Ordering};

use anyhow::{anyhow, Context, Result};
use reqwest::Client;
use serde::{de::DeserializeOwned, Deserialize, Serialize};
use serde_json::Value;
use shared::error::{RpcError, RpcErrorObject};
use tracing::debug;

#[derive(Debug, Serialize)]
struct RpcRequest<'a> {
    jsonrpc: &'static str,
    method: &'a str,
    params: Value,
    id: u64,
}

#[derive(Debug, Deserialize)]
struct RpcResponse {
    #[serde(default)]
    result: Option<Value>,
    #[serde(default)]
    error: Option<RpcErrorObject>,
    #[serde(default)]
    id: Option<Value>,
}

pub struct RpcTransport {
    http: Client,
    url: String,
    next_id: AtomicU64,
}

impl RpcTransport {
    pub fn new(url: impl Into<String>) -> Self {
        Self::with_client(Client::new(), url)
    }

    pub fn with_client(http: Client, url: impl Into<String>) -> Self {
        Self {
            http,
            url: url.into(),
            next_id: AtomicU64::new(1),
        }
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    /// Issues one call; an `error` member in the reply becomes an [`RpcError`].
    pub async fn call<T: DeserializeOwned>(&self, method: &str, params: Value) -> Result<T> {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        debug!(method, id, url = %self.url, "rpc: sending request");

        let response: RpcResponse = self
            .http
            .post(&self.url)
            .json(&RpcRequest {
                jsonrpc: "2.0",
                method,
                params,
                id,
            })
            .send()
            .await
            .with_context(|| format!("failed to reach rpc endpoint {}", self.url))?
            .error_for_status()?
            .json()
            .await
            .with_context(|| format!("invalid rpc response for {method}"))?;

        if let Some(error) = response.error {
            debug!(method, id, code = error.code, "rpc: error response");
            return Err(RpcError::from(error).into());
        }

        if let Some(reply_id) = &response.id {
            if reply_id.as_u64() != Some(id) {
                return Err(anyhow!(
                    "rpc response id mismatch for {method}: expected {id}, got {reply_id}"
                ));
            }
        }

        serde_json::from_value(response.result.unwrap_or(Value::Null))
            .with_context(|| format!("unexpected result shape for {method}"))
    }
}

#[cfg(test)]
#[path = "tests/transport_tests.rs"]
mod tests;
