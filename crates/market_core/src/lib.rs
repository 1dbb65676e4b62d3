use std::sync::{
    atomic::{AtomicU64, Ordering},
    Arc,
};

use alloy_primitives::{Address, U256};
use serde_json::Value;
use shared::{
    domain::{Listing, ListingDraft, Purchase, PurchaseOrder},
    error::RpcError,
    protocol::{PurchaseRecord, TransactionRequest, WalletRequest, TRANSACTION_COUNT_KEY},
};
use storage::KeyValueStore;
use tokio::{
    sync::{broadcast, RwLock},
    task::JoinHandle,
};
use tracing::{debug, error, info, warn};

pub mod contract;
pub mod error;
pub mod state;
pub mod transport;
pub mod wallet;

pub use contract::{MarketContract, PendingTransaction, RpcMarketContract};
pub use error::{MarketError, MarketResult};
pub use state::{MarketState, StateChange};
pub use transport::RpcTransport;
pub use wallet::{JsonRpcWallet, WalletProvider};

use state::{ReadTicket, StateCell};

pub const MISSING_WALLET_NOTICE: &str = "Please install a wallet provider.";

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MarketEvent {
    AccountChanged(Option<Address>),
    LoadingChanged(bool),
    ListingsUpdated(Vec<Listing>),
    PurchasesUpdated(Vec<Purchase>),
    TransactionSubmitted { hash: String },
    TransactionConfirmed { hash: String },
    RefreshStarted,
    RefreshFinished,
    /// Message meant for the user, e.g. that no wallet is installed.
    Notice(String),
    Error(String),
}

/// Session and contract orchestrator behind the marketplace views.
///
/// Owns the current account, the loading flag and the listing and purchase
/// snapshots; every mutation goes through [`StateChange`] and is published
/// on the event channel.
pub struct MarketClient {
    wallet: Option<Arc<dyn WalletProvider>>,
    contract: Arc<dyn MarketContract>,
    store: Arc<dyn KeyValueStore>,
    state: RwLock<StateCell>,
    read_sequence: AtomicU64,
    events: broadcast::Sender<MarketEvent>,
}

impl MarketClient {
    /// Client without a wallet provider; writes and reads become no-ops.
    pub fn new(contract: Arc<dyn MarketContract>, store: Arc<dyn KeyValueStore>) -> Arc<Self> {
        Self::new_with_dependencies(None, contract, store)
    }

    pub fn new_with_wallet(
        wallet: Arc<dyn WalletProvider>,
        contract: Arc<dyn MarketContract>,
        store: Arc<dyn KeyValueStore>,
    ) -> Arc<Self> {
        Self::new_with_dependencies(Some(wallet), contract, store)
    }

    pub fn new_with_dependencies(
        wallet: Option<Arc<dyn WalletProvider>>,
        contract: Arc<dyn MarketContract>,
        store: Arc<dyn KeyValueStore>,
    ) -> Arc<Self> {
        let (events, _) = broadcast::channel(256);
        Arc::new(Self {
            wallet,
            contract,
            store,
            state: RwLock::new(StateCell::default()),
            read_sequence: AtomicU64::new(0),
            events,
        })
    }

    pub fn subscribe_events(&self) -> broadcast::Receiver<MarketEvent> {
        self.events.subscribe()
    }

    pub fn has_wallet(&self) -> bool {
        self.wallet.is_some()
    }

    pub async fn snapshot(&self) -> MarketState {
        self.state.read().await.state().clone()
    }

    pub async fn account(&self) -> Option<Address> {
        self.state.read().await.state().account
    }

    pub async fn is_loading(&self) -> bool {
        self.state.read().await.state().loading
    }

    pub async fn listings(&self) -> Option<Vec<Listing>> {
        self.state.read().await.state().listings.clone()
    }

    pub async fn purchases(&self) -> Option<Vec<Purchase>> {
        self.state.read().await.state().purchases.clone()
    }

    async fn apply(&self, change: StateChange) {
        let event = self.state.write().await.apply(change);
        if let Some(event) = event {
            let _ = self.events.send(event);
        }
    }

    fn emit(&self, event: MarketEvent) {
        let _ = self.events.send(event);
    }

    fn next_ticket(&self) -> ReadTicket {
        self.read_sequence.fetch_add(1, Ordering::Relaxed)
    }

    fn notify_missing_wallet(&self) {
        warn!("wallet: no provider available");
        self.emit(MarketEvent::Notice(MISSING_WALLET_NOTICE.to_string()));
    }

    /// Prompts the wallet for account access and adopts the first account.
    pub async fn connect_wallet(&self) -> MarketResult<()> {
        let Some(wallet) = self.wallet.as_ref() else {
            self.notify_missing_wallet();
            return Ok(());
        };

        let response = wallet
            .request(&WalletRequest::RequestAccounts)
            .await
            .map_err(|err| wallet_rejection("eth_requestAccounts", err))?;
        let account = first_account(response)?.ok_or(MarketError::NoAccounts)?;

        info!(%account, "wallet: connected");
        self.apply(StateChange::AccountAdopted(account)).await;
        self.refresh().await;
        Ok(())
    }

    /// Adopts an already-authorized account without prompting the user.
    pub async fn check_existing_connection(&self) -> Option<Address> {
        let Some(wallet) = self.wallet.as_ref() else {
            self.notify_missing_wallet();
            return None;
        };

        let accounts = match wallet.request(&WalletRequest::Accounts).await {
            Ok(response) => first_account(response),
            Err(err) => Err(wallet_rejection("eth_accounts", err)),
        };

        match accounts {
            Ok(Some(account)) => {
                debug!(%account, "wallet: found authorized account");
                self.apply(StateChange::AccountAdopted(account)).await;
                self.fetch_available_listings().await;
                Some(account)
            }
            Ok(None) => {
                info!("wallet: no authorized accounts found");
                None
            }
            Err(err) => {
                self.report_failure("check existing connection", &err);
                None
            }
        }
    }

    /// Submits a new listing and waits for its confirmation.
    ///
    /// The listing snapshot is not refreshed afterwards. If confirmation
    /// fails, the loading flag stays set.
    pub async fn submit_listing(&self, draft: ListingDraft) -> MarketResult<()> {
        if self.wallet.is_none() {
            info!("wallet: no provider available, listing not submitted");
            return Ok(());
        }
        draft.validate().map_err(MarketError::InvalidListing)?;

        self.apply(StateChange::LoadingSet(true)).await;
        let pending = self.contract.add_listing(&draft).await.map_err(|err| {
            error!(error = %err, "contract: addToAvailableOptions failed");
            MarketError::Contract(err.to_string())
        })?;
        let hash = pending.hash().to_string();
        info!(%hash, power_source = %draft.power_source, "contract: listing submitted");
        self.emit(MarketEvent::TransactionSubmitted { hash: hash.clone() });

        pending.wait().await.map_err(|err| {
            error!(%hash, error = %err, "contract: listing confirmation failed");
            MarketError::Confirmation(err.to_string())
        })?;
        self.emit(MarketEvent::TransactionConfirmed { hash });

        self.apply(StateChange::LoadingSet(false)).await;
        Ok(())
    }

    /// Pays the receiver directly, then records the purchase on the contract.
    ///
    /// The two steps are not atomic: a transfer that went through followed by
    /// a failed recording surfaces as [`MarketError::PartialPurchase`].
    pub async fn buy_power(&self, order: PurchaseOrder) -> MarketResult<()> {
        let Some(wallet) = self.wallet.as_ref() else {
            info!("wallet: no provider available, purchase not sent");
            return Ok(());
        };
        let from = self.account().await.ok_or(MarketError::NotConnected)?;

        self.apply(StateChange::LoadingSet(true)).await;
        let paid_amount = order.total_price_wei();
        let transfer = TransactionRequest::transfer(from, order.receiver_address, paid_amount);

        let response = wallet
            .request(&WalletRequest::SendTransaction(transfer))
            .await
            .map_err(|err| wallet_rejection("eth_sendTransaction", err))?;
        let transfer_hash = match response {
            Value::String(hash) => hash,
            other => other.to_string(),
        };
        info!(
            %transfer_hash,
            receiver = %order.receiver_address,
            value = %paid_amount,
            "wallet: transfer accepted"
        );
        self.emit(MarketEvent::TransactionSubmitted {
            hash: transfer_hash.clone(),
        });

        let record = PurchaseRecord {
            receiver: order.receiver_address,
            amount_of_power: U256::from(order.amount_of_power),
            price_per_kw: U256::from(order.price_per_kw),
            paid_amount,
        };
        let partial = |reason: String| {
            error!(%transfer_hash, %reason, "contract: purchase not recorded after transfer");
            MarketError::PartialPurchase {
                transfer_hash: transfer_hash.clone(),
                reason,
            }
        };

        let pending = self
            .contract
            .record_purchase(&record)
            .await
            .map_err(|err| partial(err.to_string()))?;
        let record_hash = pending.hash().to_string();
        self.emit(MarketEvent::TransactionSubmitted {
            hash: record_hash.clone(),
        });
        pending
            .wait()
            .await
            .map_err(|err| partial(err.to_string()))?;
        info!(%record_hash, "contract: purchase recorded");
        self.emit(MarketEvent::TransactionConfirmed { hash: record_hash });

        self.apply(StateChange::LoadingSet(false)).await;
        self.refresh().await;
        Ok(())
    }

    /// Replaces the purchase snapshot and returns it; `None` on any failure.
    pub async fn fetch_all_purchases(&self) -> Option<Vec<Purchase>> {
        if self.wallet.is_none() {
            info!("wallet: no provider available, purchases not fetched");
            return None;
        }

        let ticket = self.next_ticket();
        let result = match self.contract.all_purchases().await {
            Ok(raw) => raw
                .iter()
                .map(|purchase| purchase.decode().map_err(MarketError::from))
                .collect::<MarketResult<Vec<_>>>(),
            Err(err) => Err(MarketError::Contract(err.to_string())),
        };

        match result {
            Ok(purchases) => {
                debug!(count = purchases.len(), ticket, "contract: purchases fetched");
                self.apply(StateChange::PurchasesReplaced {
                    ticket,
                    purchases: purchases.clone(),
                })
                .await;
                Some(purchases)
            }
            Err(err) => {
                self.report_failure("fetch purchases", &err);
                None
            }
        }
    }

    /// Replaces the listing snapshot and returns it; `None` on any failure.
    pub async fn fetch_available_listings(&self) -> Option<Vec<Listing>> {
        if self.wallet.is_none() {
            info!("wallet: no provider available, listings not fetched");
            return None;
        }

        let ticket = self.next_ticket();
        match self.contract.all_listings().await {
            Ok(listings) => {
                debug!(count = listings.len(), ticket, "contract: listings fetched");
                self.apply(StateChange::ListingsReplaced {
                    ticket,
                    listings: listings.clone(),
                })
                .await;
                Some(listings)
            }
            Err(err) => {
                self.report_failure("fetch listings", &MarketError::Contract(err.to_string()));
                None
            }
        }
    }

    /// Mirrors the contract's transaction count into the local store.
    pub async fn sync_transaction_count(&self) -> MarketResult<()> {
        if self.wallet.is_none() {
            info!("wallet: no provider available, transaction count not synced");
            return Ok(());
        }

        let count = self.contract.transaction_count().await.map_err(|err| {
            error!(error = %err, "contract: getTransactionCount failed");
            MarketError::Contract(err.to_string())
        })?;
        self.store
            .put(TRANSACTION_COUNT_KEY, &count.to_string())
            .await
            .map_err(|err| MarketError::Storage(err.to_string()))?;
        debug!(%count, "storage: transaction count synced");
        Ok(())
    }

    /// Startup sequence: the four loads run concurrently, in no set order.
    pub async fn initialize(&self) {
        let (_, count, _, _) = tokio::join!(
            self.check_existing_connection(),
            self.sync_transaction_count(),
            self.fetch_all_purchases(),
            self.fetch_available_listings(),
        );
        if let Err(err) = count {
            self.report_failure("sync transaction count", &err);
        }
    }

    /// Re-runs the startup sequence after a confirmed write.
    pub async fn refresh(&self) {
        self.emit(MarketEvent::RefreshStarted);
        self.initialize().await;
        self.emit(MarketEvent::RefreshFinished);
    }

    /// Follows wallet-side account switches; `None` if the wallet cannot push them.
    pub fn watch_account_changes(self: &Arc<Self>) -> Option<JoinHandle<()>> {
        let mut changes = self.wallet.as_ref()?.account_changes()?;
        let client = Arc::clone(self);
        Some(tokio::spawn(async move {
            loop {
                match changes.recv().await {
                    Ok(accounts) => client.handle_accounts_changed(accounts).await,
                    Err(broadcast::error::RecvError::Lagged(skipped)) => {
                        warn!(skipped, "wallet: account change events lagged");
                    }
                    Err(broadcast::error::RecvError::Closed) => break,
                }
            }
        }))
    }

    async fn handle_accounts_changed(&self, accounts: Vec<String>) {
        let Some(first) = accounts.first() else {
            info!("wallet: accounts revoked, session disconnected");
            self.apply(StateChange::AccountCleared).await;
            return;
        };

        match first.parse::<Address>() {
            Ok(account) => {
                info!(%account, "wallet: account switched");
                self.apply(StateChange::AccountAdopted(account)).await;
                self.fetch_available_listings().await;
            }
            Err(_) => {
                self.report_failure(
                    "account change",
                    &MarketError::InvalidAccount(first.clone()),
                );
            }
        }
    }

    fn report_failure(&self, operation: &str, err: &MarketError) {
        warn!(operation, error = %err, "market: operation failed");
        self.emit(MarketEvent::Error(format!("{operation}: {err}")));
    }
}

fn wallet_rejection(method: &str, err: anyhow::Error) -> MarketError {
    if err
        .downcast_ref::<RpcError>()
        .is_some_and(RpcError::is_user_rejection)
    {
        info!(method, "wallet: user rejected request");
    } else {
        error!(method, error = %err, "wallet: request failed");
    }
    MarketError::WalletRejected(err.to_string())
}

fn first_account(response: Value) -> MarketResult<Option<Address>> {
    let accounts: Vec<String> = serde_json::from_value(response)
        .map_err(|err| MarketError::InvalidAccount(err.to_string()))?;
    accounts
        .first()
        .map(|raw| {
            raw.parse::<Address>()
                .map_err(|_| MarketError::InvalidAccount(raw.clone()))
        })
        .transpose()
}

#[cfg(test)]
#[path = "tests/lib_tests.rs"]
mod tests;
