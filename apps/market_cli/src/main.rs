mod config;

use std::{path::PathBuf, sync::Arc, time::Duration};

use alloy_primitives::Address;
use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use market_core::{
    JsonRpcWallet, MarketClient, MarketError, MarketEvent, RpcMarketContract, RpcTransport,
    WalletProvider,
};
use shared::{
    domain::{ListingDraft, PurchaseOrder},
    protocol::TRANSACTION_COUNT_KEY,
};
use storage::Storage;
use tokio::sync::broadcast;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use crate::config::{load_settings, prepare_database_url};

const DEFAULT_LOG_FILTER: &str = "market_core=info,market_cli=info,sqlx=warn";

#[derive(Parser, Debug)]
#[command(name = "market", about = "Buy and sell power allocations on the market contract")]
struct Cli {
    #[arg(long, default_value = "market.toml")]
    config: PathBuf,
    #[arg(long)]
    rpc_url: Option<String>,
    #[arg(long)]
    wallet_url: Option<String>,
    #[arg(long)]
    contract: Option<String>,
    #[arg(long)]
    database_url: Option<String>,
    /// Run as if no wallet provider were installed.
    #[arg(long)]
    no_wallet: bool,
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Ask the wallet for account access.
    Connect,
    /// Run the startup loads and print the session.
    Status,
    Listings,
    Purchases,
    /// Offer power for sale.
    ListPower {
        #[arg(long)]
        source: String,
        #[arg(long)]
        amount: u64,
        #[arg(long)]
        price: u64,
        #[arg(long, default_value_t = 0)]
        duration: u64,
        #[arg(long, default_value_t = 0)]
        start: u64,
    },
    /// Pay a seller and record the purchase.
    Buy {
        #[arg(long)]
        receiver: String,
        #[arg(long)]
        amount: u64,
        #[arg(long)]
        price: u64,
    },
    /// Follow account switches and refresh periodically until interrupted.
    Watch {
        #[arg(long, default_value_t = 15)]
        interval_secs: u64,
    },
}

fn init_tracing() {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(DEFAULT_LOG_FILTER));
    tracing_subscriber::fmt().with_env_filter(filter).init();
}

#[tokio::main]
async fn main() -> Result<()> {
    init_tracing();
    let cli = Cli::parse();

    let mut settings = load_settings(&cli.config)?;
    if let Some(v) = cli.rpc_url.clone() {
        settings.rpc_url = v;
    }
    if let Some(v) = cli.wallet_url.clone() {
        settings.wallet_url = Some(v);
    }
    if let Some(v) = cli.contract.clone() {
        settings.contract_address = Some(v);
    }
    if let Some(v) = cli.database_url.clone() {
        settings.database_url = v;
    }
    if cli.no_wallet {
        settings.use_wallet = false;
    }
    let endpoints = settings.validate()?;

    let storage = Storage::new(&prepare_database_url(&settings.database_url)).await?;
    let contract = RpcMarketContract::new(
        Arc::new(RpcTransport::new(endpoints.rpc_url.as_str())),
        endpoints.contract_address,
    )
    .with_poll_interval(endpoints.receipt_poll_interval);
    let wallet = settings.use_wallet.then(|| {
        Arc::new(JsonRpcWallet::new(Arc::new(RpcTransport::new(
            endpoints.wallet_url.as_str(),
        )))) as Arc<dyn WalletProvider>
    });
    info!(
        rpc_url = %endpoints.rpc_url,
        contract = %endpoints.contract_address,
        wallet = wallet.is_some(),
        "market: client configured"
    );

    let client = MarketClient::new_with_dependencies(
        wallet,
        Arc::new(contract),
        Arc::new(storage.clone()),
    );
    let printer = tokio::spawn(print_events(client.subscribe_events()));

    let outcome = run(cli.command, &client, &storage).await;
    // The printer stops once the last sender, owned by the client, is gone.
    drop(client);
    if let Err(err) = printer.await {
        warn!(error = %err, "market: event printer stopped abnormally");
    }
    outcome
}

async fn run(command: Command, client: &Arc<MarketClient>, storage: &Storage) -> Result<()> {
    match command {
        Command::Connect => {
            client.connect_wallet().await?;
            match client.account().await {
                Some(account) => println!("connected account={account}"),
                None => println!("not connected"),
            }
        }
        Command::Status => {
            storage.health_check().await?;
            client.initialize().await;
            let state = client.snapshot().await;
            let count = storage
                .load_entry(TRANSACTION_COUNT_KEY)
                .await?
                .map(|entry| entry.value);
            println!(
                "account={} loading={} listings={} purchases={} transaction_count={}",
                state
                    .account
                    .map(|account| account.to_string())
                    .unwrap_or_else(|| "-".into()),
                state.loading,
                state.listings.as_ref().map_or(0, Vec::len),
                state.purchases.as_ref().map_or(0, Vec::len),
                count.as_deref().unwrap_or("-"),
            );
        }
        Command::Listings => {
            let listings = client.fetch_available_listings().await.unwrap_or_default();
            println!("{}", serde_json::to_string_pretty(&listings)?);
        }
        Command::Purchases => {
            let purchases = client.fetch_all_purchases().await.unwrap_or_default();
            println!("{}", serde_json::to_string_pretty(&purchases)?);
        }
        Command::ListPower {
            source,
            amount,
            price,
            duration,
            start,
        } => {
            client
                .submit_listing(ListingDraft {
                    power_source: source,
                    amount_of_power: amount,
                    price_per_kw: price,
                    duration,
                    time_to_start: start,
                })
                .await?;
            println!("listing submitted");
        }
        Command::Buy {
            receiver,
            amount,
            price,
        } => {
            let receiver_address = receiver
                .trim()
                .parse::<Address>()
                .with_context(|| format!("invalid receiver address '{receiver}'"))?;
            client.check_existing_connection().await;
            client
                .buy_power(PurchaseOrder {
                    receiver_address,
                    amount_of_power: amount,
                    price_per_kw: price,
                })
                .await?;
            println!("purchase recorded");
        }
        Command::Watch { interval_secs } => watch(client, interval_secs).await?,
    }

    Ok(())
}

async fn watch(client: &Arc<MarketClient>, interval_secs: u64) -> Result<()> {
    if !client.has_wallet() {
        return Err(MarketError::WalletUnavailable.into());
    }

    client.initialize().await;
    let watcher = client.watch_account_changes();
    if watcher.is_none() {
        info!("wallet: account changes are not pushed, relying on periodic refresh");
    }

    let mut ticker = tokio::time::interval(Duration::from_secs(interval_secs.max(1)));
    ticker.tick().await;
    loop {
        tokio::select! {
            _ = ticker.tick() => client.refresh().await,
            signal = tokio::signal::ctrl_c() => {
                signal.context("failed to listen for ctrl-c")?;
                break;
            }
        }
    }

    if let Some(watcher) = watcher {
        watcher.abort();
    }
    Ok(())
}

async fn print_events(mut events: broadcast::Receiver<MarketEvent>) {
    loop {
        match events.recv().await {
            Ok(MarketEvent::Notice(message)) => println!("{message}"),
            Ok(MarketEvent::Error(message)) => warn!(%message, "market: error event"),
            Ok(MarketEvent::ListingsUpdated(listings)) => {
                info!(count = listings.len(), "market: listings updated")
            }
            Ok(MarketEvent::PurchasesUpdated(purchases)) => {
                info!(count = purchases.len(), "market: purchases updated")
            }
            Ok(event) => info!(?event, "market: event"),
            Err(broadcast::error::RecvError::Lagged(skipped)) => {
                warn!(skipped, "market: event printer lagged");
            }
            Err(broadcast::error::RecvError::Closed) => break,
        }
    }
}
