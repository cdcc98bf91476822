//! Logical addresses: the identity an event is merged and cached under.

use nostr_sdk::prelude::*;

use crate::kinds::{is_addressable, is_replaceable};
use crate::tags;

/// `kind:author:d` for replaceable and addressable kinds, the event id otherwise.
///
/// Replaceable kinds (0, 3, 10000..20000) always have an empty discriminator.
pub fn logical_address(event: &Event) -> String {
    let kind = event.kind.as_u16();
    if is_replaceable(kind) {
        coordinate_key(kind, &event.pubkey, "")
    } else if is_addressable(kind) {
        coordinate_key(kind, &event.pubkey, tags::identifier(event))
    } else {
        event.id.to_hex()
    }
}

/// Build the `kind:author:d` key.
pub fn coordinate_key(kind: u16, pubkey: &PublicKey, identifier: &str) -> String {
    format!("{}:{}:{}", kind, pubkey.to_hex(), identifier)
}

/// A parsed `a` tag value (`kind:author:d`).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CoordinateRef {
    pub kind: u16,
    pub pubkey: PublicKey,
    pub identifier: String,
}

impl CoordinateRef {
    /// Parse `kind:author:d`; anything without exactly three parts is rejected.
    pub fn parse(value: &str) -> Option<Self> {
        let parts: Vec<&str> = value.split(':').collect();
        if parts.len() != 3 {
            return None;
        }
        let kind = parts[0].parse::<u16>().ok()?;
        let pubkey = PublicKey::from_hex(parts[1]).ok()?;
        Some(Self {
            kind,
            pubkey,
            identifier: parts[2].to_string(),
        })
    }
}
