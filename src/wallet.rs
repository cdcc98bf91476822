//! Wallet-connect invoice payment.
//!
//! The request is an encrypted `pay_invoice` call sent to the wallet's
//! service key on the wallet's relay. The reply subscription is opened
//! before the request is published so that a fast reply cannot be missed.

use nostr_core::kinds::{KIND_WALLET_REPLY, KIND_WALLET_REQUEST};
use nostr_core::tags::tags_named;
use nostr_core::{RelayPool, SubscriptionItem};
use nostr_sdk::prelude::*;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::time::Duration;
use tracing::{debug, info, warn};

use crate::error::{Error, Result};

/// Whole-operation deadline for a payment.
pub const PAYMENT_TIMEOUT: Duration = Duration::from_secs(30);
/// Deadline for publishing the request itself.
pub const PUBLISH_TIMEOUT: Duration = Duration::from_secs(15);

const DEFAULT_REJECTION: &str = "Error from the wallet";

/// Where and to whom payment requests go.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WalletInfo {
    pub relay: String,
    pub public_key: PublicKey,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PaymentReceipt {
    pub preimage: String,
}

/// Pay `invoice` through the wallet, waiting at most [`PAYMENT_TIMEOUT`].
pub async fn send_payment<S>(
    pool: &dyn RelayPool,
    signer: &S,
    wallet: &WalletInfo,
    invoice: &str,
) -> Result<PaymentReceipt>
where
    S: NostrSigner,
{
    send_payment_within(pool, signer, wallet, invoice, PAYMENT_TIMEOUT).await
}

pub async fn send_payment_within<S>(
    pool: &dyn RelayPool,
    signer: &S,
    wallet: &WalletInfo,
    invoice: &str,
    deadline: Duration,
) -> Result<PaymentReceipt>
where
    S: NostrSigner,
{
    pool.ensure_relay(&wallet.relay).await?;

    let body = json!({
        "method": "pay_invoice",
        "params": { "invoice": invoice },
    });
    let content = signer
        .nip04_encrypt(&wallet.public_key, &body.to_string())
        .await?;
    let request = EventBuilder::new(Kind::from(KIND_WALLET_REQUEST), content)
        .tag(Tag::public_key(wallet.public_key))
        .sign(signer)
        .await?;
    debug!("payment request {}", request.id);

    let relays = vec![wallet.relay.clone()];
    let filter = Filter::new()
        .kind(Kind::from(KIND_WALLET_REPLY))
        .author(wallet.public_key)
        .event(request.id);
    let mut replies = pool.subscribe(filter, &relays).await?;

    let outcome = tokio::time::timeout(deadline, async {
        let mut published = false;
        while let Some(item) = replies.next().await {
            match item {
                SubscriptionItem::EndOfStoredEvents => {
                    if published {
                        continue;
                    }
                    published = true;
                    match pool.publish(&request, &relays, PUBLISH_TIMEOUT).await {
                        Ok(()) => info!("published payment request {}", request.id),
                        Err(e) => warn!("failed to publish payment request: {e:#}"),
                    }
                }
                SubscriptionItem::Event(reply) => {
                    if is_reply_to(&reply, wallet, &request.id) {
                        return Some(reply);
                    }
                    debug!("ignoring unrelated wallet event {}", reply.id);
                }
            }
        }
        None
    })
    .await;
    replies.stop().await;

    let reply = match outcome {
        Ok(Some(reply)) => reply,
        Ok(None) => {
            return Err(Error::Relay(anyhow::anyhow!(
                "wallet reply subscription closed"
            )))
        }
        Err(_) => {
            warn!("no wallet reply within {deadline:?}");
            return Err(Error::PaymentTimeout);
        }
    };

    let plain = signer
        .nip04_decrypt(&wallet.public_key, &reply.content)
        .await?;
    interpret_reply(&plain)
}

fn is_reply_to(reply: &Event, wallet: &WalletInfo, request: &EventId) -> bool {
    let request = request.to_hex();
    reply.pubkey == wallet.public_key
        && tags_named(reply, "e").any(|t| t.get(1).is_some_and(|id| *id == request))
}

/// Map a decrypted wallet reply to a receipt or an error.
pub fn interpret_reply(plain: &str) -> Result<PaymentReceipt> {
    let reply: Value = serde_json::from_str(plain)?;
    if reply.get("result_type").and_then(Value::as_str) != Some("pay_invoice") {
        return Err(Error::InvalidPaymentReply);
    }

    if let Some(error) = reply.get("error").filter(|e| !e.is_null()) {
        let message = error
            .get("message")
            .and_then(Value::as_str)
            .filter(|m| !m.is_empty())
            .unwrap_or(DEFAULT_REJECTION);
        return Err(Error::PaymentRejected(message.to_string()));
    }

    reply
        .get("result")
        .and_then(|r| r.get("preimage"))
        .and_then(Value::as_str)
        .map(|preimage| PaymentReceipt {
            preimage: preimage.to_string(),
        })
        .ok_or(Error::InvalidPaymentReply)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reply_with_preimage() {
        let receipt = interpret_reply(
            r#"{"result_type":"pay_invoice","result":{"preimage":"abc123"}}"#,
        )
        .unwrap();
        assert_eq!(receipt.preimage, "abc123");
    }

    #[test]
    fn reply_with_error_message() {
        let err = interpret_reply(
            r#"{"result_type":"pay_invoice","error":{"code":"INSUFFICIENT_BALANCE","message":"no funds"}}"#,
        )
        .unwrap_err();
        assert!(matches!(err, Error::PaymentRejected(m) if m == "no funds"));
    }

    #[test]
    fn reply_error_without_message_uses_default() {
        let err =
            interpret_reply(r#"{"result_type":"pay_invoice","error":{"code":"OTHER"}}"#).unwrap_err();
        assert!(matches!(err, Error::PaymentRejected(m) if m == DEFAULT_REJECTION));
    }

    #[test]
    fn other_replies_are_invalid() {
        assert!(matches!(
            interpret_reply(r#"{"result_type":"get_balance","result":{"balance":1}}"#),
            Err(Error::InvalidPaymentReply)
        ));
        assert!(matches!(
            interpret_reply(r#"{"result_type":"pay_invoice","result":{}}"#),
            Err(Error::InvalidPaymentReply)
        ));
        assert!(matches!(interpret_reply("not json"), Err(Error::Json(_))));
    }

    #[test]
    fn reply_must_come_from_wallet_and_reference_request() {
        let wallet_keys = Keys::generate();
        let wallet = WalletInfo {
            relay: "wss://wallet.example".into(),
            public_key: wallet_keys.public_key(),
        };
        let request = EventBuilder::new(Kind::from(KIND_WALLET_REQUEST), "x")
            .sign_with_keys(&Keys::generate())
            .unwrap();

        let reply = EventBuilder::new(Kind::from(KIND_WALLET_REPLY), "y")
            .tag(Tag::event(request.id))
            .sign_with_keys(&wallet_keys)
            .unwrap();
        assert!(is_reply_to(&reply, &wallet, &request.id));

        let stranger = EventBuilder::new(Kind::from(KIND_WALLET_REPLY), "y")
            .tag(Tag::event(request.id))
            .sign_with_keys(&Keys::generate())
            .unwrap();
        assert!(!is_reply_to(&stranger, &wallet, &request.id));

        let untagged = EventBuilder::new(Kind::from(KIND_WALLET_REPLY), "y")
            .sign_with_keys(&wallet_keys)
            .unwrap();
        assert!(!is_reply_to(&untagged, &wallet, &request.id));
    }
}
