//! Shared Nostr protocol functionality for the app resolver
//!
//! This crate provides the protocol-level building blocks: kind ranges,
//! tag lookups, logical addresses, the bech32 identifier codec and the
//! relay pool boundary.

pub mod address;
pub mod identifier;
pub mod kinds;
pub mod relay;
pub mod tags;

// Re-export commonly used types
pub use address::{coordinate_key, logical_address, CoordinateRef};
pub use identifier::{
    decode, encode_for_event, encode_naddr, encode_nevent, encode_note, encode_nprofile,
    encode_npub, identifier_type, scan, IdentifierType, StructuredAddress,
};
pub use relay::{RelayClient, RelayPool, RelaySubscription, SubscriptionItem};

// Re-export nostr-sdk for convenience
pub use nostr_sdk;
