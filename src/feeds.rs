//! Searches and followed-key feeds.

use nostr_core::kinds::{
    KIND_COMMUNITY, KIND_COMMUNITY_APPROVAL, KIND_HANDLER, KIND_HIGHLIGHT, KIND_LIVE_EVENT,
    KIND_LONG_FORM, KIND_METADATA, KIND_NOTE, KIND_ZAP_RECEIPT,
};
use nostr_sdk::prelude::*;
use tracing::debug;

use crate::augment::{
    approved_communities, parse_community, select_live_events, select_zaps, Community, LiveEvent,
    LongNote, Zap,
};
use crate::cache::Store;
use crate::fetch::{AuthoredEvent, Fetcher, PubkeyQuery};
use crate::profile::ProfileEvent;

/// Kinds a zap can target.
pub const ZAP_TARGET_KINDS: [u16; 5] = [
    KIND_NOTE,
    KIND_LONG_FORM,
    KIND_COMMUNITY,
    KIND_LIVE_EVENT,
    KIND_HANDLER,
];

fn meta_for(metas: &[ProfileEvent], pubkey: Option<PublicKey>) -> Option<ProfileEvent> {
    let pubkey = pubkey?;
    metas.iter().find(|m| m.pubkey() == pubkey).cloned()
}

fn push_unique(keys: &mut Vec<PublicKey>, key: PublicKey) {
    if !keys.contains(&key) {
        keys.push(key);
    }
}

fn events_of(authored: Vec<AuthoredEvent>) -> Vec<Event> {
    authored.into_iter().map(|a| a.event).collect()
}

impl Fetcher {
    // ── Searches ─────────────────────────────────────────────────

    /// Profiles matching `query`, best ranked first.
    pub async fn search_profiles(&self, query: &str, limit: usize) -> Vec<ProfileEvent> {
        let filter = Filter::new()
            .kind(Kind::from(KIND_METADATA))
            .search(query)
            .limit(limit);
        let ranked = self.ranked_or_broad(filter).await;
        debug!("profile search '{query}': {} (ranked: {})", ranked.events.len(), ranked.ranked);

        let mut profiles: Vec<ProfileEvent> = ranked
            .events
            .into_iter()
            .filter(|e| e.kind.as_u16() == KIND_METADATA)
            .map(ProfileEvent::from_event)
            .collect();
        profiles.truncate(limit);
        for profile in &profiles {
            self.caches().profiles.put(profile.pubkey(), profile.clone());
        }
        profiles
    }

    /// Events of `kind` matching `query`, newest first.
    pub async fn search_events(
        &self,
        query: &str,
        kind: u16,
        limit: usize,
        with_authors: bool,
    ) -> Vec<AuthoredEvent> {
        let filter = Filter::new()
            .kind(Kind::from(kind))
            .search(query)
            .limit(limit);
        let mut events = self.ranked_or_broad(filter).await.events;
        events.retain(|e| e.kind.as_u16() == kind);
        crate::fetch::sort_newest_first(&mut events);
        events.truncate(limit);

        if with_authors {
            self.attach_authors(events).await
        } else {
            events
                .into_iter()
                .map(|event| AuthoredEvent {
                    event,
                    author: None,
                })
                .collect()
        }
    }

    pub async fn search_notes(&self, query: &str, limit: usize) -> Vec<AuthoredEvent> {
        self.search_events(query, KIND_NOTE, limit, true).await
    }

    pub async fn search_long_notes(&self, query: &str, limit: usize) -> Vec<LongNote> {
        self.search_events(query, KIND_LONG_FORM, limit, true)
            .await
            .into_iter()
            .map(|a| LongNote::from_event(a.event, a.author))
            .collect()
    }

    /// Ended events are kept in search results.
    pub async fn search_live_events(&self, query: &str, limit: usize) -> Vec<LiveEvent> {
        let events = events_of(self.search_events(query, KIND_LIVE_EVENT, limit, false).await);
        self.augment_live_events(events, None, limit, true).await
    }

    pub async fn search_communities(&self, query: &str, limit: usize) -> Vec<Community> {
        let events = events_of(self.search_events(query, KIND_COMMUNITY, limit, false).await);
        let communities = events.into_iter().map(|e| parse_community(e, None)).collect();
        self.augment_communities(communities).await
    }

    // ── Followed feeds ───────────────────────────────────────────

    pub async fn followed_long_notes(&self, contacts: &[PublicKey]) -> Vec<LongNote> {
        self.fetch_pubkey_events(PubkeyQuery::new(KIND_LONG_FORM, contacts).with_authors())
            .await
            .into_iter()
            .map(|a| LongNote::from_event(a.event, a.author))
            .collect()
    }

    pub async fn followed_highlights(&self, contacts: &[PublicKey]) -> Vec<AuthoredEvent> {
        self.fetch_pubkey_events(PubkeyQuery::new(KIND_HIGHLIGHT, contacts).with_authors())
            .await
    }

    /// Zaps received by `contacts`, optionally at least `min_sats` each.
    pub async fn followed_zaps(&self, contacts: &[PublicKey], min_sats: Option<u64>) -> Vec<Zap> {
        let receipts = self
            .fetch_pubkey_events(
                PubkeyQuery::new(KIND_ZAP_RECEIPT, contacts)
                    .tagged()
                    .limit(200),
            )
            .await;
        self.augment_zaps(events_of(receipts), min_sats).await
    }

    /// Communities the contacts approved posts into, most recent approval first.
    pub async fn followed_communities(&self, contacts: &[PublicKey]) -> Vec<Community> {
        let approvals = events_of(
            self.fetch_pubkey_events(PubkeyQuery::new(KIND_COMMUNITY_APPROVAL, contacts).limit(100))
                .await,
        );
        let refs = approved_communities(&approvals);
        if refs.is_empty() {
            return Vec::new();
        }

        let mut owners = Vec::new();
        let mut identifiers: Vec<String> = Vec::new();
        for r in &refs {
            push_unique(&mut owners, r.pubkey);
            if !identifiers.contains(&r.identifier) {
                identifiers.push(r.identifier.clone());
            }
        }

        let events = self
            .fetch_pubkey_events(
                PubkeyQuery::new(KIND_COMMUNITY, &owners)
                    .identifiers(identifiers)
                    .with_authors(),
            )
            .await;
        let communities = events
            .into_iter()
            .map(|a| {
                let mut community = parse_community(a.event, Some(&refs));
                community.author = a.author;
                community
            })
            .collect();
        self.augment_communities(communities).await
    }

    /// Ongoing and planned live events the contacts take part in.
    pub async fn followed_live_events(&self, contacts: &[PublicKey], limit: usize) -> Vec<LiveEvent> {
        let events = events_of(
            self.fetch_pubkey_events(PubkeyQuery::new(KIND_LIVE_EVENT, contacts).tagged())
                .await,
        );
        self.augment_live_events(events, Some(contacts), limit, false)
            .await
    }

    // ── Augmentation with metadata ───────────────────────────────

    pub async fn augment_zaps(&self, events: Vec<Event>, min_sats: Option<u64>) -> Vec<Zap> {
        let mut zaps = select_zaps(events, min_sats);
        if !zaps.is_empty() {
            let ids: Vec<EventId> = zaps.iter().map(|z| z.target_event_id).collect();
            let targets = self.resolve_by_ids(&ids, &ZAP_TARGET_KINDS, false).await;

            let mut pubkeys = Vec::new();
            for zap in &zaps {
                push_unique(&mut pubkeys, zap.provider_pubkey);
                if let Some(pk) = zap.target_pubkey {
                    push_unique(&mut pubkeys, pk);
                }
                if let Some(pk) = zap.sender_pubkey {
                    push_unique(&mut pubkeys, pk);
                }
            }
            debug!("zap meta pubkeys {}", pubkeys.len());
            let metas = self.fetch_metas(&pubkeys).await;

            for zap in &mut zaps {
                zap.target_event = targets
                    .iter()
                    .find(|t| t.event.id == zap.target_event_id)
                    .map(|t| t.event.clone());
                zap.target_meta = meta_for(&metas, zap.target_pubkey);
                zap.provider_meta = meta_for(&metas, Some(zap.provider_pubkey));
                zap.sender_meta = meta_for(&metas, zap.sender_pubkey);
            }
        }
        zaps.sort_by(|a, b| b.event.created_at.cmp(&a.event.created_at));
        zaps
    }

    pub async fn augment_live_events(
        &self,
        events: Vec<Event>,
        contacts: Option<&[PublicKey]>,
        limit: usize,
        include_ended: bool,
    ) -> Vec<LiveEvent> {
        let now = Timestamp::now().as_secs();
        let mut live = select_live_events(events, contacts, now, include_ended);
        if !live.is_empty() {
            let mut pubkeys = Vec::new();
            for e in &live {
                push_unique(&mut pubkeys, e.event.pubkey);
                if let Some(host) = e.host {
                    push_unique(&mut pubkeys, host);
                }
                for member in &e.members {
                    push_unique(&mut pubkeys, *member);
                }
            }
            let metas = self.fetch_metas(&pubkeys).await;
            for e in &mut live {
                e.author = meta_for(&metas, Some(e.event.pubkey));
                e.host_meta = meta_for(&metas, e.host);
                e.members_meta = metas
                    .iter()
                    .filter(|m| e.members.contains(&m.pubkey()))
                    .cloned()
                    .collect();
            }
        }
        live.truncate(limit);
        live
    }

    /// Attach owner and moderator profiles, then order by `order` descending.
    pub async fn augment_communities(&self, mut communities: Vec<Community>) -> Vec<Community> {
        let mut pubkeys = Vec::new();
        for c in &communities {
            push_unique(&mut pubkeys, c.event.pubkey);
            for m in &c.moderators {
                push_unique(&mut pubkeys, *m);
            }
        }
        debug!("communities meta pubkeys {}", pubkeys.len());
        let metas = if pubkeys.is_empty() {
            Vec::new()
        } else {
            self.fetch_metas(&pubkeys).await
        };

        for c in &mut communities {
            if c.author.is_none() {
                c.author = meta_for(&metas, Some(c.event.pubkey));
            }
            c.moderators_meta = metas
                .iter()
                .filter(|m| c.moderators.contains(&m.pubkey()))
                .cloned()
                .collect();
        }
        communities.sort_by(|a, b| b.order.cmp(&a.order));
        communities
    }
}
