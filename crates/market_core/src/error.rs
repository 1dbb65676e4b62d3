use shared::quantity::QuantityError;
use thiserror::Error;

pub type MarketResult<T> = std::result::Result<T, MarketError>;

#[derive(Debug, Error)]
pub enum MarketError {
    #[error("no wallet provider is available")]
    WalletUnavailable,
    #[error("no wallet account is connected")]
    NotConnected,
    #[error("wallet returned no accounts")]
    NoAccounts,
    #[error("wallet rejected the request: {0}")]
    WalletRejected(String),
    #[error("wallet returned an invalid account: {0}")]
    InvalidAccount(String),
    #[error("invalid listing: {0}")]
    InvalidListing(String),
    #[error("contract call failed: {0}")]
    Contract(String),
    #[error("transaction confirmation failed: {0}")]
    Confirmation(String),
    #[error("failed to decode contract quantity: {0}")]
    Decode(#[from] QuantityError),
    #[error("transfer {transfer_hash} succeeded but recording the purchase failed: {reason}")]
    PartialPurchase {
        transfer_hash: String,
        reason: String,
    },
    #[error("local storage failed: {0}")]
    Storage(String),
}
