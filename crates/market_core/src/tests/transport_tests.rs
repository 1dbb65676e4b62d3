use std::{sync::Arc, time::Duration};

use alloy_primitives::{Address, U256};
use axum::{extract::State, routing::post, Json, Router};
use serde_json::{json, Value};
use shared::{
    domain::ListingDraft,
    error::{RpcError, RpcErrorObject, USER_REJECTED_CODE},
    protocol::{PurchaseRecord, TransactionRequest, WalletRequest},
};
use tokio::sync::Mutex;

use super::RpcTransport;
use crate::{
    contract::{MarketContract, RpcMarketContract},
    wallet::{JsonRpcWallet, WalletProvider},
};

type Reply = Arc<dyn Fn(&str, &Value, usize) -> Result<Value, RpcErrorObject> + Send + Sync>;
type Seen = Arc<Mutex<Vec<Value>>>;

#[derive(Clone)]
struct FakeNode {
    seen: Seen,
    reply: Reply,
}

async fn handle(State(node): State<FakeNode>, Json(request): Json<Value>) -> Json<Value> {
    let method = request["method"].as_str().unwrap_or_default().to_string();
    let nth = {
        let mut seen = node.seen.lock().await;
        let nth = seen
            .iter()
            .filter(|earlier| earlier["method"] == method.as_str())
            .count();
        seen.push(request.clone());
        nth
    };

    let mut body = json!({ "jsonrpc": "2.0", "id": request["id"] });
    match (node.reply)(&method, &request["params"], nth) {
        Ok(result) => body["result"] = result,
        Err(error) => body["error"] = json!(error),
    }
    Json(body)
}

async fn spawn_node<F>(reply: F) -> (Arc<RpcTransport>, Seen)
where
    F: Fn(&str, &Value, usize) -> Result<Value, RpcErrorObject> + Send + Sync + 'static,
{
    let seen = Seen::default();
    let node = FakeNode {
        seen: Arc::clone(&seen),
        reply: Arc::new(reply),
    };
    let app = Router::new().route("/", post(handle)).with_state(node);
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
        .await
        .expect("bind");
    let addr = listener.local_addr().expect("local addr");
    tokio::spawn(async move {
        axum::serve(listener, app).await.expect("serve");
    });

    (Arc::new(RpcTransport::new(format!("http://{addr}/"))), seen)
}

fn contract_address() -> Address {
    Address::repeat_byte(0xcc)
}

fn account(byte: u8) -> String {
    format!("0x{}", format!("{byte:02x}").repeat(20))
}

#[tokio::test]
async fn call_sends_jsonrpc_envelope_and_decodes_result() {
    let (transport, seen) = spawn_node(|_, _, _| Ok(json!("0x1"))).await;

    let chain: String = transport
        .call("eth_chainId", json!([]))
        .await
        .expect("call");

    assert_eq!(chain, "0x1");
    let seen = seen.lock().await;
    assert_eq!(seen.len(), 1);
    assert_eq!(seen[0]["jsonrpc"], "2.0");
    assert_eq!(seen[0]["method"], "eth_chainId");
    assert!(seen[0]["id"].is_u64());
}

#[tokio::test]
async fn error_member_becomes_rpc_error() {
    let (transport, _) = spawn_node(|_, _, _| {
        Err(RpcErrorObject::new(
            USER_REJECTED_CODE,
            "User rejected the request.",
        ))
    })
    .await;

    let err = transport
        .call::<Value>("eth_requestAccounts", json!([]))
        .await
        .expect_err("rejected");

    let rpc = err.downcast_ref::<RpcError>().expect("typed rpc error");
    assert!(rpc.is_user_rejection());
    assert_eq!(rpc.message, "User rejected the request.");
}

#[tokio::test]
async fn unreachable_endpoint_fails_with_context() {
    let transport = RpcTransport::new("http://127.0.0.1:9/");

    let err = transport
        .call::<Value>("eth_accounts", json!([]))
        .await
        .expect_err("nothing listens on the discard port");

    assert!(err.to_string().contains("failed to reach rpc endpoint"));
}

#[tokio::test]
async fn wallet_forwards_account_requests() {
    let (transport, seen) =
        spawn_node(|method, _, _| match method {
            "eth_accounts" => Ok(json!([account(1), account(2)])),
            other => Err(RpcErrorObject::new(-32601, format!("unknown method {other}"))),
        })
        .await;
    let wallet = JsonRpcWallet::new(transport);

    let accounts = wallet
        .request(&WalletRequest::Accounts)
        .await
        .expect("accounts");

    assert_eq!(accounts, json!([account(1), account(2)]));
    assert_eq!(seen.lock().await[0]["params"], json!([]));
}

#[tokio::test]
async fn wallet_sends_transfer_as_single_transaction_object() {
    let (transport, seen) = spawn_node(|_, _, _| Ok(json!("0xfeed"))).await;
    let wallet = JsonRpcWallet::new(transport);
    let transfer = TransactionRequest::transfer(
        Address::repeat_byte(1),
        Address::repeat_byte(0xab),
        U256::from(20_000_000_000_000_000_000u128),
    );

    let hash = wallet
        .request(&WalletRequest::SendTransaction(transfer))
        .await
        .expect("send");

    assert_eq!(hash, json!("0xfeed"));
    let seen = seen.lock().await;
    let tx = &seen[0]["params"][0];
    assert_eq!(seen[0]["method"], "eth_sendTransaction");
    assert_eq!(tx["gas"], "0x5208");
    assert_eq!(tx["value"], "0x1158e460913d00000");
    let to: Address = tx["to"].as_str().expect("to").parse().expect("address");
    assert_eq!(to, Address::repeat_byte(0xab));
}

#[tokio::test]
async fn contract_reads_listings_through_gateway() {
    let seller = account(0xaa);
    let reply_seller = seller.clone();
    let (transport, seen) = spawn_node(move |_, _, _| {
        Ok(json!([{
            "id": { "_hex": "0x01", "_isBigNumber": true },
            "sender": reply_seller,
            "powerSource": "wind",
            "amountOfPower": { "_hex": "0x64", "_isBigNumber": true },
            "pricePerKW": "0x3",
            "duration": { "_hex": "0x3c", "_isBigNumber": true },
            "timeToStart": "0x0",
        }]))
    })
    .await;
    let contract = RpcMarketContract::new(transport, contract_address());

    let listings = contract.all_listings().await.expect("listings");

    assert_eq!(listings.len(), 1);
    assert_eq!(listings[0].power_source, "wind");
    assert_eq!(listings[0].amount_of_power, U256::from(100u64));
    assert_eq!(listings[0].duration, U256::from(60u64));
    assert_eq!(listings[0].sender, seller.parse::<Address>().expect("seller"));

    let seen = seen.lock().await;
    assert_eq!(seen[0]["method"], "contract_call");
    assert_eq!(seen[0]["params"][1], "getAvailableOptions");
    assert_eq!(seen[0]["params"][2], json!([]));
    let target: Address = seen[0]["params"][0]
        .as_str()
        .expect("address")
        .parse()
        .expect("parse");
    assert_eq!(target, contract_address());
}

#[tokio::test]
async fn contract_transaction_count_decodes_big_number() {
    let (transport, _) =
        spawn_node(|_, _, _| Ok(json!({ "_hex": "0x2a", "_isBigNumber": true }))).await;
    let contract = RpcMarketContract::new(transport, contract_address());

    let count = contract.transaction_count().await.expect("count");

    assert_eq!(count, U256::from(42u64));
}

#[tokio::test]
async fn contract_transaction_count_rejects_malformed_quantity() {
    let (transport, _) = spawn_node(|_, _, _| Ok(json!("forty-two"))).await;
    let contract = RpcMarketContract::new(transport, contract_address());

    assert!(contract.transaction_count().await.is_err());
}

#[tokio::test]
async fn record_purchase_polls_until_receipt_arrives() {
    let (transport, seen) = spawn_node(|method, params, nth| match method {
        "contract_send" => Ok(json!("0xabc")),
        "eth_getTransactionReceipt" if nth == 0 => Ok(Value::Null),
        "eth_getTransactionReceipt" => Ok(json!({
            "transactionHash": params[0],
            "blockNumber": "0x10",
            "status": "0x1",
        })),
        other => Err(RpcErrorObject::new(-32601, format!("unknown method {other}"))),
    })
    .await;
    let contract = RpcMarketContract::new(transport, contract_address())
        .with_poll_interval(Duration::from_millis(10));
    let record = PurchaseRecord {
        receiver: Address::repeat_byte(0xab),
        amount_of_power: U256::from(10u64),
        price_per_kw: U256::from(2u64),
        paid_amount: U256::from(20_000_000_000_000_000_000u128),
    };

    let pending = contract.record_purchase(&record).await.expect("send");
    assert_eq!(pending.hash(), "0xabc");
    let receipt = pending.wait().await.expect("confirmed");

    assert_eq!(receipt.transaction_hash, "0xabc");
    assert_eq!(receipt.block_number.as_deref(), Some("0x10"));
    let seen = seen.lock().await;
    assert_eq!(seen[0]["params"][1], "addToBlockchain");
    assert_eq!(
        seen[0]["params"][2].as_array().map(|args| args[1..].to_vec()),
        Some(vec![json!("0xa"), json!("0x2"), json!("0x1158e460913d00000")])
    );
    let polls = seen
        .iter()
        .filter(|request| request["method"] == "eth_getTransactionReceipt")
        .count();
    assert_eq!(polls, 2);
}

#[tokio::test]
async fn reverted_listing_fails_confirmation() {
    let (transport, _) = spawn_node(|method, params, _| match method {
        "contract_send" => Ok(json!("0xdead")),
        _ => Ok(json!({ "transactionHash": params[0], "status": "0x0" })),
    })
    .await;
    let contract = RpcMarketContract::new(transport, contract_address())
        .with_poll_interval(Duration::from_millis(10));
    let draft = ListingDraft {
        power_source: "solar".into(),
        amount_of_power: 5,
        price_per_kw: 1,
        duration: 30,
        time_to_start: 0,
    };

    let pending = contract.add_listing(&draft).await.expect("send");
    let err = pending.wait().await.expect_err("reverted");

    assert!(err.to_string().contains("0xdead reverted"));
}
