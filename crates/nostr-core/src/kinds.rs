//! Event kinds used by the resolver and their reserved ranges.

pub const KIND_METADATA: u16 = 0;
pub const KIND_NOTE: u16 = 1;
pub const KIND_CONTACT_LIST: u16 = 3;
pub const KIND_COMMUNITY_APPROVAL: u16 = 4550;
pub const KIND_ZAP_RECEIPT: u16 = 9735;
pub const KIND_HIGHLIGHT: u16 = 9802;
pub const KIND_WALLET_REQUEST: u16 = 23194;
pub const KIND_WALLET_REPLY: u16 = 23195;
pub const KIND_BOOKMARK_LIST: u16 = 30001;
pub const KIND_LONG_FORM: u16 = 30023;
pub const KIND_LIVE_EVENT: u16 = 30311;
pub const KIND_HANDLER: u16 = 31990;
pub const KIND_COMMUNITY: u16 = 34550;

/// Kinds whose identity is `kind:author` (only the newest one counts).
pub fn is_replaceable(kind: u16) -> bool {
    kind == KIND_METADATA || kind == KIND_CONTACT_LIST || (10_000..20_000).contains(&kind)
}

/// Kinds whose identity is `kind:author:d-tag`.
pub fn is_addressable(kind: u16) -> bool {
    (30_000..40_000).contains(&kind)
}

/// Kinds in the dedicated replaceable range, excluding the legacy 0 and 3.
pub fn is_replaceable_range(kind: u16) -> bool {
    (10_000..20_000).contains(&kind)
}
