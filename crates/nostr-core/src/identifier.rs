//! Identifier codec: human-shareable bech32 identifiers to structured addresses and back.
//!
//! Five identifier types are recognized: `npub`, `nprofile`, `note`, `nevent`
//! and `naddr`. A bare 64-character hex string is accepted as an event id in
//! "hex mode"; it may equally be an author key, so resolution has to check
//! both interpretations against the network.

use anyhow::{anyhow, bail, Context, Result};
use nostr_sdk::prelude::*;
use regex::Regex;
use std::fmt;
use std::sync::LazyLock;

use crate::kinds::{is_addressable, is_replaceable_range, KIND_METADATA};
use crate::tags;

/// Candidate bech32 tokens inside free text. Shape only; each match is decoded to validate.
static BECH32_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"[a-z]{1,83}1[023456789acdefghjklmnpqrstuvwxyz]{6,}").unwrap()
});
static HEX64_RE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"^[0-9a-fA-F]{64}$").unwrap());

/// The recognized identifier encodings.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum IdentifierType {
    Npub,
    Nprofile,
    Note,
    Nevent,
    Naddr,
}

impl IdentifierType {
    pub const ALL: [IdentifierType; 5] = [
        IdentifierType::Npub,
        IdentifierType::Nprofile,
        IdentifierType::Note,
        IdentifierType::Nevent,
        IdentifierType::Naddr,
    ];

    pub fn prefix(&self) -> &'static str {
        match self {
            IdentifierType::Npub => "npub",
            IdentifierType::Nprofile => "nprofile",
            IdentifierType::Note => "note",
            IdentifierType::Nevent => "nevent",
            IdentifierType::Naddr => "naddr",
        }
    }

    pub fn from_prefix(prefix: &str) -> Option<Self> {
        Self::ALL.iter().copied().find(|t| t.prefix() == prefix)
    }
}

impl fmt::Display for IdentifierType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.prefix())
    }
}

/// A decoded identifier. Lives for one resolution call.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct StructuredAddress {
    pub kind: Option<u16>,
    pub pubkey: Option<PublicKey>,
    pub event_id: Option<EventId>,
    /// The `d` tag of an addressable record.
    pub identifier: Option<String>,
    pub relays: Vec<String>,
    /// Decoded from a raw 64-hex string: event id or author key, unknown until fetched.
    pub hex: bool,
    /// Which encoding this was decoded from (`None` in hex mode).
    pub source: Option<IdentifierType>,
}

impl StructuredAddress {
    /// Fill in the fields learned from a fetched event.
    pub fn complete_from(&mut self, event: &Event) {
        let kind = event.kind.as_u16();
        self.kind = Some(kind);
        self.event_id = Some(event.id);
        self.pubkey = Some(event.pubkey);
        if is_addressable(kind) {
            self.identifier = Some(tags::identifier(event).to_string());
        }
    }
}

fn relay_strings(relays: &[RelayUrl]) -> Vec<String> {
    relays.iter().map(|r| r.to_string()).collect()
}

fn relay_urls(relays: &[String]) -> Vec<RelayUrl> {
    relays
        .iter()
        .filter_map(|r| RelayUrl::parse(r).ok())
        .collect()
}

fn strip_uri(input: &str) -> &str {
    let trimmed = input.trim();
    trimmed.strip_prefix("nostr:").unwrap_or(trimmed)
}

fn decode_bech32(input: &str) -> Result<StructuredAddress> {
    let entity = Nip19::from_bech32(input).map_err(|e| anyhow!("bad bech32 identifier: {e}"))?;
    let mut addr = StructuredAddress::default();
    match entity {
        Nip19::Pubkey(pubkey) => {
            addr.kind = Some(KIND_METADATA);
            addr.pubkey = Some(pubkey);
            addr.source = Some(IdentifierType::Npub);
        }
        Nip19::Profile(profile) => {
            addr.kind = Some(KIND_METADATA);
            addr.pubkey = Some(profile.public_key);
            addr.relays = relay_strings(&profile.relays);
            addr.source = Some(IdentifierType::Nprofile);
        }
        Nip19::EventId(id) => {
            addr.event_id = Some(id);
            addr.source = Some(IdentifierType::Note);
        }
        Nip19::Event(event) => {
            addr.event_id = Some(event.event_id);
            addr.pubkey = event.author;
            addr.kind = event.kind.map(|k| k.as_u16());
            addr.relays = relay_strings(&event.relays);
            addr.source = Some(IdentifierType::Nevent);
        }
        Nip19::Coordinate(coordinate) => {
            addr.kind = Some(coordinate.coordinate.kind.as_u16());
            addr.pubkey = Some(coordinate.coordinate.public_key);
            addr.identifier = Some(coordinate.coordinate.identifier.clone());
            addr.relays = relay_strings(&coordinate.relays);
            addr.source = Some(IdentifierType::Naddr);
        }
        _ => bail!("unsupported identifier type"),
    }
    Ok(addr)
}

/// Decode an identifier, falling back to hex mode for 64-hex input.
pub fn decode(input: &str) -> Result<StructuredAddress> {
    let input = strip_uri(input);
    match decode_bech32(input) {
        Ok(addr) => Ok(addr),
        Err(e) if HEX64_RE.is_match(input) => {
            tracing::debug!("treating {input} as hex id ({e})");
            let event_id = EventId::from_hex(input).context("bad hex event id")?;
            Ok(StructuredAddress {
                event_id: Some(event_id),
                hex: true,
                ..Default::default()
            })
        }
        Err(e) => Err(e.context(format!("failed to parse identifier '{input}'"))),
    }
}

/// The type of a bech32 identifier, by decoding it.
pub fn identifier_type(input: &str) -> Option<IdentifierType> {
    decode_bech32(strip_uri(input)).ok().and_then(|a| a.source)
}

/// Find the first embedded identifier in free text that decodes as one of the five types.
///
/// With `allow_hex`, a bare 64-hex input is returned when no bech32 token validates.
pub fn scan(text: &str, allow_hex: bool) -> Option<String> {
    for candidate in BECH32_RE.find_iter(text) {
        if let Some(found) = scan_candidate(candidate.as_str()) {
            return Some(found.to_string());
        }
    }

    let trimmed = text.trim();
    if allow_hex && HEX64_RE.is_match(trimmed) {
        return Some(trimmed.to_string());
    }
    None
}

/// Decode `token`, or failing that, the part starting at each later `n`.
/// Letters glued in front of an identifier end up in the matched prefix.
fn scan_candidate(token: &str) -> Option<&str> {
    let starts = std::iter::once(0).chain(
        token
            .char_indices()
            .skip(1)
            .filter(|(_, c)| *c == 'n')
            .map(|(i, _)| i),
    );
    for start in starts {
        let sub = &token[start..];
        if !sub.contains('1') {
            break;
        }
        match decode_bech32(sub) {
            Ok(_) => return Some(sub),
            Err(e) => tracing::debug!("skipping bech32 candidate {sub}: {e}"),
        }
    }
    None
}

// ── Encoders ─────────────────────────────────────────────────────

pub fn encode_npub(pubkey: &PublicKey) -> Result<String> {
    Ok(pubkey.to_bech32()?)
}

pub fn encode_nprofile(pubkey: &PublicKey, relays: &[String]) -> Result<String> {
    Ok(Nip19Profile::new(*pubkey, relay_urls(relays)).to_bech32()?)
}

pub fn encode_note(event_id: &EventId) -> Result<String> {
    Ok(event_id.to_bech32()?)
}

pub fn encode_nevent(
    event_id: &EventId,
    author: Option<&PublicKey>,
    relays: &[String],
) -> Result<String> {
    let mut nevent = Nip19Event::new(*event_id).relays(relay_urls(relays));
    if let Some(author) = author {
        nevent = nevent.author(*author);
    }
    Ok(nevent.to_bech32()?)
}

pub fn encode_naddr(
    kind: u16,
    pubkey: &PublicKey,
    identifier: &str,
    relays: &[String],
) -> Result<String> {
    let coordinate = Coordinate::new(Kind::from(kind), *pubkey).identifier(identifier);
    Ok(Nip19Coordinate::new(coordinate, relay_urls(relays)).to_bech32()?)
}

/// Canonical identifier for an event.
///
/// Profiles encode as `npub`; replaceable-range and addressable kinds as
/// `naddr`; everything else as `nevent`. The relay hint is attached where the
/// encoding carries relays.
pub fn encode_for_event(event: &Event, relay_hint: Option<&str>) -> Result<String> {
    let relays: Vec<String> = relay_hint.into_iter().map(str::to_string).collect();
    let kind = event.kind.as_u16();
    if kind == KIND_METADATA {
        encode_npub(&event.pubkey)
    } else if is_replaceable_range(kind) || is_addressable(kind) {
        encode_naddr(kind, &event.pubkey, tags::identifier(event), &relays)
    } else {
        encode_nevent(&event.id, None, &relays)
    }
}
