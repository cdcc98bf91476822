use thiserror::Error;

/// Failures surfaced to callers of the engine.
///
/// Partial relay failure is not here: it is logged and the fetch proceeds
/// with whatever succeeded.
#[derive(Debug, Error)]
pub enum Error {
    #[error("malformed identifier: {0}")]
    MalformedIdentifier(String),
    #[error("no event found for {0}")]
    UnresolvedAddress(String),
    #[error("Timeout error, payment might have failed")]
    PaymentTimeout,
    #[error("wallet rejected payment: {0}")]
    PaymentRejected(String),
    #[error("Invalid payment reply")]
    InvalidPaymentReply,
    #[error("relay error: {0}")]
    Relay(#[from] anyhow::Error),
    #[error("signer error: {0}")]
    Signer(#[from] nostr_sdk::prelude::SignerError),
    #[error("serde json error: {0}")]
    Json(#[from] serde_json::Error),
}

pub type Result<T> = std::result::Result<T, Error>;
