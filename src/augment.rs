//! Derived fields per event class.
//!
//! Everything here is a pure function of the event (and, for live events,
//! the current time). Metadata lookups happen in [`crate::feeds`].

use nostr_core::kinds::KIND_COMMUNITY;
use nostr_core::tags::{identifier, tag_value, tags_named};
use nostr_core::CoordinateRef;
use nostr_sdk::prelude::*;
use serde_json::Value;
use tracing::{debug, warn};

use crate::profile::ProfileEvent;

/// A live event with no update for this long is considered ended.
pub const MAX_LIVE_TTL: u64 = 3600;

const BECH32_CHARSET: &str = "qpzry9x8gf2tvdw0s3jn54khce6mua7l";

// ── Bolt11 ───────────────────────────────────────────────────────

/// Amount in millisatoshis from a bolt11 invoice's human-readable part.
///
/// `None` when the invoice is malformed or carries no amount.
pub fn bolt11_amount_msat(invoice: &str) -> Option<u64> {
    let invoice = invoice.trim().to_ascii_lowercase();
    let invoice = invoice.strip_prefix("lightning:").unwrap_or(&invoice);

    let sep = invoice.rfind('1')?;
    let (hrp, data) = (&invoice[..sep], &invoice[sep + 1..]);
    if data.len() < 7 || !data.chars().all(|c| BECH32_CHARSET.contains(c)) {
        return None;
    }

    let rest = hrp.strip_prefix("ln")?;
    let amount = ["bcrt", "tbs", "tb", "bc", "sb"]
        .iter()
        .find_map(|network| rest.strip_prefix(network))?;

    let (digits, multiplier) = match amount.chars().last()? {
        c @ ('m' | 'u' | 'n' | 'p') => (&amount[..amount.len() - 1], Some(c)),
        _ => (amount, None),
    };
    if digits.is_empty() || digits.starts_with('0') || !digits.bytes().all(|b| b.is_ascii_digit())
    {
        return None;
    }
    let value: u64 = digits.parse().ok()?;

    match multiplier {
        None => value.checked_mul(100_000_000_000),
        Some('m') => value.checked_mul(100_000_000),
        Some('u') => value.checked_mul(100_000),
        Some('n') => value.checked_mul(100),
        Some('p') if value % 10 == 0 => Some(value / 10),
        _ => None,
    }
}

fn number_tag(event: &Event, name: &str) -> Option<u64> {
    tag_value(event, name).and_then(|v| v.trim().parse().ok())
}

fn string_tag(event: &Event, name: &str) -> String {
    tag_value(event, name).unwrap_or_default().to_string()
}

// ── Long-form posts ──────────────────────────────────────────────

#[derive(Debug, Clone)]
pub struct LongNote {
    pub event: Event,
    pub title: String,
    pub summary: String,
    pub published_at: Option<u64>,
    pub author: Option<ProfileEvent>,
}

impl LongNote {
    pub fn from_event(event: Event, author: Option<ProfileEvent>) -> Self {
        Self {
            title: string_tag(&event, "title"),
            summary: string_tag(&event, "summary"),
            published_at: number_tag(&event, "published_at"),
            event,
            author,
        }
    }
}

// ── Zap receipts ─────────────────────────────────────────────────

#[derive(Debug, Clone)]
pub struct Zap {
    pub event: Event,
    /// The zap request embedded in the receipt.
    pub description: Option<Value>,
    /// Unknown when the invoice does not parse.
    pub amount_msat: Option<u64>,
    pub target_event_id: EventId,
    pub target_addr: Option<String>,
    pub target_pubkey: Option<PublicKey>,
    pub provider_pubkey: PublicKey,
    pub sender_pubkey: Option<PublicKey>,
    pub target_event: Option<Event>,
    pub target_meta: Option<ProfileEvent>,
    pub provider_meta: Option<ProfileEvent>,
    pub sender_meta: Option<ProfileEvent>,
}

impl Zap {
    pub fn amount_sats(&self) -> Option<u64> {
        self.amount_msat.map(|msat| msat / 1000)
    }

    /// Whether the amount is known and at least `min_sats`.
    pub fn meets_minimum(&self, min_sats: u64) -> bool {
        self.amount_msat
            .map(|msat| msat >= min_sats.saturating_mul(1000))
            .unwrap_or(false)
    }
}

/// Parse a zap receipt. Receipts without a resolvable `e` target are dropped.
pub fn parse_zap(event: Event) -> Option<Zap> {
    let target_event_id = match tag_value(&event, "e").map(EventId::from_hex) {
        Some(Ok(id)) => id,
        Some(Err(e)) => {
            debug!("zap {} has a bad target id: {e}", event.id);
            return None;
        }
        None => return None,
    };

    let description = tag_value(&event, "description").and_then(|raw| {
        match serde_json::from_str::<Value>(raw) {
            Ok(value) => Some(value),
            Err(e) => {
                warn!("Bad zap description json in {}: {e}", event.id);
                None
            }
        }
    });
    let sender_pubkey = description
        .as_ref()
        .and_then(|d| d.get("pubkey"))
        .and_then(Value::as_str)
        .and_then(|pk| PublicKey::from_hex(pk).ok());

    let amount_msat = tag_value(&event, "bolt11").and_then(bolt11_amount_msat);
    if amount_msat.is_none() {
        debug!("zap {} has no readable amount", event.id);
    }

    Some(Zap {
        description,
        amount_msat,
        target_event_id,
        target_addr: tag_value(&event, "a").map(str::to_string),
        target_pubkey: tag_value(&event, "p").and_then(|pk| PublicKey::from_hex(pk).ok()),
        provider_pubkey: event.pubkey,
        sender_pubkey,
        target_event: None,
        target_meta: None,
        provider_meta: None,
        sender_meta: None,
        event,
    })
}

/// Parse receipts, drop the untargeted ones and apply the minimum amount.
pub fn select_zaps(events: Vec<Event>, min_sats: Option<u64>) -> Vec<Zap> {
    events
        .into_iter()
        .filter_map(parse_zap)
        .filter(|zap| match min_sats {
            Some(min) if min > 0 => zap.meets_minimum(min),
            _ => true,
        })
        .collect()
}

// ── Live events ──────────────────────────────────────────────────

#[derive(Debug, Clone)]
pub struct LiveEvent {
    pub event: Event,
    pub title: String,
    pub summary: String,
    pub starts: u64,
    pub current_participants: Option<u64>,
    /// `live`, `planned` or `ended`; stale `live` events read as `ended`.
    pub status: String,
    pub host: Option<PublicKey>,
    pub members: Vec<PublicKey>,
    /// Live events by start time, then the rest in reverse.
    pub order: i64,
    pub author: Option<ProfileEvent>,
    pub host_meta: Option<ProfileEvent>,
    pub members_meta: Vec<ProfileEvent>,
}

impl LiveEvent {
    pub fn is_live(&self) -> bool {
        self.status == "live"
    }

    pub fn is_ended(&self) -> bool {
        self.status == "ended"
    }
}

pub fn parse_live_event(event: Event, contacts: Option<&[PublicKey]>, now: u64) -> LiveEvent {
    let mut status = string_tag(&event, "status");
    if now.saturating_sub(event.created_at.as_secs()) > MAX_LIVE_TTL {
        status = "ended".to_string();
    }

    let participants: Vec<&[String]> = tags_named(&event, "p").filter(|p| p.len() >= 4).collect();
    let host = participants
        .iter()
        .find(|p| p[3] == "host" || p[3] == "Host")
        .and_then(|p| PublicKey::from_hex(&p[1]).ok());
    let members = participants
        .iter()
        .filter_map(|p| PublicKey::from_hex(&p[1]).ok())
        .filter(|pk| contacts.map(|c| c.contains(pk)).unwrap_or(true))
        .collect();

    let starts = number_tag(&event, "starts").unwrap_or(0);
    let starts_key = i64::try_from(starts).unwrap_or(i64::MAX);
    let order = if status == "live" {
        starts_key
    } else {
        starts_key.saturating_neg()
    };

    LiveEvent {
        title: string_tag(&event, "title"),
        summary: string_tag(&event, "summary"),
        starts,
        current_participants: number_tag(&event, "current_participants"),
        status,
        host,
        members,
        order,
        author: None,
        host_meta: None,
        members_meta: Vec::new(),
        event,
    }
}

/// Parse, drop hostless (and unless `include_ended`, ended) events, and sort.
pub fn select_live_events(
    events: Vec<Event>,
    contacts: Option<&[PublicKey]>,
    now: u64,
    include_ended: bool,
) -> Vec<LiveEvent> {
    let mut live: Vec<LiveEvent> = events
        .into_iter()
        .map(|e| parse_live_event(e, contacts, now))
        .filter(|e| e.host.is_some() && (include_ended || !e.is_ended()))
        .collect();
    live.sort_by(|a, b| b.order.cmp(&a.order));
    live
}

// ── Communities ──────────────────────────────────────────────────

/// A contact's approval of a post into a community.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommunityApproval {
    pub created_at: u64,
    pub pubkey: PublicKey,
    pub identifier: String,
}

/// Community references from approval events, in the order given.
pub fn approved_communities(approvals: &[Event]) -> Vec<CommunityApproval> {
    approvals
        .iter()
        .filter_map(|event| {
            let coordinate = CoordinateRef::parse(tag_value(event, "a")?)?;
            (coordinate.kind == KIND_COMMUNITY).then(|| CommunityApproval {
                created_at: event.created_at.as_secs(),
                pubkey: coordinate.pubkey,
                identifier: coordinate.identifier,
            })
        })
        .collect()
}

#[derive(Debug, Clone)]
pub struct Community {
    pub event: Event,
    pub name: String,
    pub description: String,
    pub image: String,
    pub moderators: Vec<PublicKey>,
    pub last_post_at: Option<u64>,
    pub posts: usize,
    pub order: u64,
    pub author: Option<ProfileEvent>,
    pub moderators_meta: Vec<ProfileEvent>,
}

/// With `approvals` (newest first), the community is ranked by its latest approval.
pub fn parse_community(event: Event, approvals: Option<&[CommunityApproval]>) -> Community {
    let moderators = tags_named(&event, "p")
        .filter(|p| p.len() >= 4 && p[3] == "moderator")
        .filter_map(|p| PublicKey::from_hex(&p[1]).ok())
        .collect();

    let mut community = Community {
        name: identifier(&event).to_string(),
        description: string_tag(&event, "description"),
        image: string_tag(&event, "image"),
        moderators,
        last_post_at: None,
        posts: 0,
        order: event.created_at.as_secs(),
        author: None,
        moderators_meta: Vec::new(),
        event,
    };

    if let Some(approvals) = approvals {
        let matching: Vec<&CommunityApproval> = approvals
            .iter()
            .filter(|a| a.pubkey == community.event.pubkey && a.identifier == community.name)
            .collect();
        if let Some(latest) = matching.first() {
            community.last_post_at = Some(latest.created_at);
            community.order = latest.created_at;
        }
        community.posts = matching.len();
    }

    community
}

#[cfg(test)]
mod tests {
    use super::*;

    fn signed(keys: &Keys, kind: u16, created_at: u64, tags: Vec<Vec<String>>) -> Event {
        let tags: Vec<Tag> = tags.into_iter().map(|t| Tag::parse(t).unwrap()).collect();
        EventBuilder::new(Kind::from(kind), "")
            .tags(tags)
            .custom_created_at(Timestamp::from(created_at))
            .sign_with_keys(keys)
            .unwrap()
    }

    fn t(values: &[&str]) -> Vec<String> {
        values.iter().map(|v| v.to_string()).collect()
    }

    const INVOICE_DATA: &str = "pvjluezpp5qqqsyqcyq5rqwzqfqqqsyqcyq5rqwzqfqqqsyqcyq5rqwzqfqypq";

    #[test]
    fn bolt11_amounts() {
        assert_eq!(
            bolt11_amount_msat(&format!("lnbc2500u1{INVOICE_DATA}")),
            Some(250_000_000)
        );
        assert_eq!(bolt11_amount_msat(&format!("lnbc20m1{INVOICE_DATA}")), Some(2_000_000_000));
        assert_eq!(bolt11_amount_msat(&format!("lntb10n1{INVOICE_DATA}")), Some(1_000));
        assert_eq!(bolt11_amount_msat(&format!("lnbc10p1{INVOICE_DATA}")), Some(1));
        assert_eq!(
            bolt11_amount_msat(&format!("lnbcrt11{INVOICE_DATA}").to_uppercase()),
            Some(100_000_000_000)
        );
    }

    #[test]
    fn bolt11_without_amount_or_malformed() {
        assert_eq!(bolt11_amount_msat(&format!("lnbc1{INVOICE_DATA}")), None);
        assert_eq!(bolt11_amount_msat("not an invoice"), None);
        assert_eq!(bolt11_amount_msat(&format!("lnbc15p1{INVOICE_DATA}")), None);
        assert_eq!(bolt11_amount_msat(&format!("lnxx10u1{INVOICE_DATA}")), None);
        assert_eq!(bolt11_amount_msat(""), None);
    }

    #[test]
    fn zap_without_target_is_dropped() {
        let keys = Keys::generate();
        let invoice = format!("lnbc2500u1{INVOICE_DATA}");
        let untargeted = signed(&keys, 9735, 10, vec![t(&["bolt11", &invoice])]);
        assert!(parse_zap(untargeted.clone()).is_none());
        assert!(select_zaps(vec![untargeted], None).is_empty());
    }

    #[test]
    fn zap_fields() {
        let provider = Keys::generate();
        let sender = Keys::generate();
        let target = Keys::generate();
        let note = signed(&target, 1, 5, vec![]);
        let description = format!(r#"{{"kind":9734,"pubkey":"{}"}}"#, sender.public_key().to_hex());
        let invoice = format!("lnbc2500u1{INVOICE_DATA}");
        let receipt = signed(
            &provider,
            9735,
            10,
            vec![
                t(&["e", &note.id.to_hex()]),
                t(&["p", &target.public_key().to_hex()]),
                t(&["bolt11", &invoice]),
                t(&["description", &description]),
            ],
        );

        let zap = parse_zap(receipt).unwrap();
        assert_eq!(zap.target_event_id, note.id);
        assert_eq!(zap.target_pubkey, Some(target.public_key()));
        assert_eq!(zap.sender_pubkey, Some(sender.public_key()));
        assert_eq!(zap.provider_pubkey, provider.public_key());
        assert_eq!(zap.amount_sats(), Some(250_000));
        assert!(zap.meets_minimum(250_000));
        assert!(!zap.meets_minimum(250_001));
    }

    #[test]
    fn malformed_invoice_keeps_zap_but_fails_minimum() {
        let keys = Keys::generate();
        let note = signed(&keys, 1, 5, vec![]);
        let receipt = signed(
            &keys,
            9735,
            10,
            vec![t(&["e", &note.id.to_hex()]), t(&["bolt11", "garbage"])],
        );
        assert_eq!(select_zaps(vec![receipt.clone()], None).len(), 1);
        assert!(select_zaps(vec![receipt], Some(1)).is_empty());
    }

    #[test]
    fn long_note_fields() {
        let keys = Keys::generate();
        let event = signed(
            &keys,
            30023,
            10,
            vec![t(&["d", "post"]), t(&["title", "Hello"]), t(&["published_at", "1700000000"])],
        );
        let note = LongNote::from_event(event, None);
        assert_eq!(note.title, "Hello");
        assert_eq!(note.summary, "");
        assert_eq!(note.published_at, Some(1_700_000_000));
    }

    #[test]
    fn live_events_order_and_filtering() {
        let keys = Keys::generate();
        let host = Keys::generate().public_key().to_hex();
        let guest = Keys::generate().public_key();
        let now = 100_000;

        let live = signed(
            &keys,
            30311,
            now - 10,
            vec![
                t(&["d", "a"]),
                t(&["status", "live"]),
                t(&["starts", "500"]),
                t(&["p", &host, "", "Host"]),
                t(&["p", &guest.to_hex(), "", "Speaker"]),
            ],
        );
        let planned = signed(
            &keys,
            30311,
            now - 10,
            vec![t(&["d", "b"]), t(&["status", "planned"]), t(&["starts", "900"]), t(&["p", &host, "", "host"])],
        );
        let stale = signed(
            &keys,
            30311,
            now - MAX_LIVE_TTL - 1,
            vec![t(&["d", "c"]), t(&["status", "live"]), t(&["starts", "100"]), t(&["p", &host, "", "host"])],
        );
        let hostless = signed(&keys, 30311, now, vec![t(&["d", "d"]), t(&["status", "live"])]);

        let contacts = [guest];
        let selected = select_live_events(
            vec![planned.clone(), stale.clone(), live.clone(), hostless.clone()],
            Some(&contacts),
            now,
            false,
        );
        assert_eq!(selected.len(), 2);
        assert_eq!(selected[0].event.id, live.id);
        assert_eq!(selected[0].order, 500);
        assert_eq!(selected[0].members, vec![guest]);
        assert_eq!(selected[1].event.id, planned.id);
        assert_eq!(selected[1].order, -900);

        let with_ended = select_live_events(vec![stale, live, hostless], None, now, true);
        assert_eq!(with_ended.len(), 2);
        assert!(with_ended[1].is_ended());
        assert_eq!(with_ended[0].members.len(), 2);
    }

    #[test]
    fn huge_start_time_saturates() {
        let keys = Keys::generate();
        let host = Keys::generate().public_key().to_hex();
        let now = 100_000;
        let far = signed(
            &keys,
            30311,
            now,
            vec![
                t(&["d", "far"]),
                t(&["status", "planned"]),
                t(&["starts", "9223372036854775808"]),
                t(&["p", &host, "", "host"]),
            ],
        );
        let soon = signed(
            &keys,
            30311,
            now,
            vec![t(&["d", "soon"]), t(&["status", "planned"]), t(&["starts", "900"]), t(&["p", &host, "", "host"])],
        );
        let live = signed(
            &keys,
            30311,
            now,
            vec![
                t(&["d", "huge"]),
                t(&["status", "live"]),
                t(&["starts", "18446744073709551615"]),
                t(&["p", &host, "", "host"]),
            ],
        );

        let parsed = parse_live_event(far.clone(), None, now);
        assert_eq!(parsed.starts, 1u64 << 63);
        assert_eq!(parsed.order, -i64::MAX);

        let selected = select_live_events(vec![far.clone(), live.clone(), soon.clone()], None, now, false);
        let ids: Vec<EventId> = selected.iter().map(|e| e.event.id).collect();
        assert_eq!(ids, vec![live.id, soon.id, far.id]);
        assert_eq!(selected[0].order, i64::MAX);
    }

    #[test]
    fn community_with_approvals() {
        let owner = Keys::generate();
        let moderator = Keys::generate().public_key();
        let community_event = signed(
            &owner,
            34550,
            10,
            vec![
                t(&["d", "tech"]),
                t(&["description", "Tech talk"]),
                t(&["p", &moderator.to_hex(), "", "moderator"]),
            ],
        );
        let a = format!("34550:{}:tech", owner.public_key().to_hex());
        let contact = Keys::generate();
        let approvals = vec![
            signed(&contact, 4550, 300, vec![t(&["a", &a])]),
            signed(&contact, 4550, 200, vec![t(&["a", &a])]),
            signed(&contact, 4550, 100, vec![t(&["a", "30023:abc:x"])]),
        ];
        let refs = approved_communities(&approvals);
        assert_eq!(refs.len(), 2);

        let community = parse_community(community_event, Some(&refs));
        assert_eq!(community.name, "tech");
        assert_eq!(community.description, "Tech talk");
        assert_eq!(community.moderators, vec![moderator]);
        assert_eq!(community.posts, 2);
        assert_eq!(community.last_post_at, Some(300));
        assert_eq!(community.order, 300);
    }
}
