//! Wallet-connect payments against a scripted wallet.

mod common;

use common::{client, MockPool};
use nostr_apps::{Error, WalletInfo};
use nostr_sdk::nips::nip04;
use nostr_sdk::prelude::*;
use serde_json::{json, Value};

const INVOICE: &str = "lnbc10u1pvjluezpp5qqqsyqcyq5rqwzqfqqqsyqcyq5rqwzqfqqqsyqcyq5rqwzqfqypq";
const WALLET_RELAY: &str = "wss://wallet.example";

fn wallet_for(keys: &Keys) -> WalletInfo {
    WalletInfo {
        relay: WALLET_RELAY.to_string(),
        public_key: keys.public_key(),
    }
}

/// A wallet that answers every request with `reply`.
fn scripted_wallet(pool: &MockPool, wallet: Keys, reply: Value) {
    pool.respond_with(move |request| {
        let plain = nip04::decrypt(wallet.secret_key(), &request.pubkey, &request.content).unwrap();
        let body: Value = serde_json::from_str(&plain).unwrap();
        assert_eq!(body["method"], "pay_invoice");
        assert_eq!(body["params"]["invoice"], INVOICE);

        let content =
            nip04::encrypt(wallet.secret_key(), &request.pubkey, reply.to_string()).unwrap();
        let response = EventBuilder::new(Kind::from(23195), content)
            .tags([Tag::event(request.id), Tag::public_key(request.pubkey)])
            .sign_with_keys(&wallet)
            .unwrap();
        vec![response]
    });
}

#[tokio::test]
async fn paid_invoice_returns_preimage() {
    let wallet = Keys::generate();
    let pool = MockPool::new();
    pool.set_auto_eose(true);
    scripted_wallet(
        &pool,
        wallet.clone(),
        json!({"result_type": "pay_invoice", "result": {"preimage": "0123abcd"}}),
    );
    let client = client(&pool);

    let receipt = client
        .send_payment(&Keys::generate(), &wallet_for(&wallet), INVOICE)
        .await
        .unwrap();
    assert_eq!(receipt.preimage, "0123abcd");

    assert_eq!(pool.ensured(), vec![WALLET_RELAY.to_string()]);
    let published = pool.published();
    assert_eq!(published.len(), 1);
    assert_eq!(published[0].kind, Kind::from(23194));
    assert!(pool.is_stopped(0));
}

#[tokio::test]
async fn wallet_error_is_surfaced() {
    let wallet = Keys::generate();
    let pool = MockPool::new();
    pool.set_auto_eose(true);
    scripted_wallet(
        &pool,
        wallet.clone(),
        json!({
            "result_type": "pay_invoice",
            "error": {"code": "INSUFFICIENT_BALANCE", "message": "insufficient balance"}
        }),
    );
    let client = client(&pool);

    let err = client
        .send_payment(&Keys::generate(), &wallet_for(&wallet), INVOICE)
        .await
        .unwrap_err();
    assert!(matches!(err, Error::PaymentRejected(m) if m == "insufficient balance"));
}

#[tokio::test]
async fn unexpected_reply_is_invalid() {
    let wallet = Keys::generate();
    let pool = MockPool::new();
    pool.set_auto_eose(true);
    scripted_wallet(
        &pool,
        wallet.clone(),
        json!({"result_type": "get_balance", "result": {"balance": 21}}),
    );
    let client = client(&pool);

    let err = client
        .send_payment(&Keys::generate(), &wallet_for(&wallet), INVOICE)
        .await
        .unwrap_err();
    assert!(matches!(err, Error::InvalidPaymentReply));
}

#[tokio::test(start_paused = true)]
async fn silent_wallet_times_out_and_unsubscribes() {
    let wallet = Keys::generate();
    let pool = MockPool::new();
    pool.set_auto_eose(true);
    let client = client(&pool);

    let err = client
        .send_payment(&Keys::generate(), &wallet_for(&wallet), INVOICE)
        .await
        .unwrap_err();
    assert!(matches!(err, Error::PaymentTimeout));
    assert_eq!(err.to_string(), "Timeout error, payment might have failed");
    assert_eq!(pool.published().len(), 1);
    assert!(pool.is_stopped(0));
}
