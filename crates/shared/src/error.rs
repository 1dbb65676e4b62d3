use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

/// Code a wallet uses when the user declines a request (EIP-1193).
pub const USER_REJECTED_CODE: i64 = 4001;

/// JSON-RPC error object as it travels on the wire.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RpcErrorObject {
    pub code: i64,
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
}

impl RpcErrorObject {
    pub fn new(code: i64, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
            data: None,
        }
    }
}

#[derive(Debug, Clone, Error)]
#[error("rpc error {code}: {message}")]
pub struct RpcError {
    pub code: i64,
    pub message: String,
}

impl RpcError {
    pub fn new(code: i64, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
        }
    }

    pub fn is_user_rejection(&self) -> bool {
        self.code == USER_REJECTED_CODE
    }
}

impl From<RpcErrorObject> for RpcError {
    fn from(value: RpcErrorObject) -> Self {
        Self {
            code: value.code,
            message: value.message,
        }
    }
}

impl From<RpcError> for RpcErrorObject {
    fn from(value: RpcError) -> Self {
        Self {
            code: value.code,
            message: value.message,
            data: None,
        }
    }
}
