//! Fetch & merge: concurrent relay queries reconciled into one view.
//!
//! Every query against the general relay set records its results in the
//! shared caches. Results from concurrent queries are joined with a
//! wait-for-all policy where a failed query contributes nothing, then
//! merged by logical address keeping the newest copy.

use futures_util::future::join_all;
use nostr_core::kinds::KIND_METADATA;
use nostr_core::{coordinate_key, decode, logical_address, RelayPool, StructuredAddress};
use nostr_sdk::prelude::*;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{debug, info, warn};

use crate::cache::{Caches, Store};
use crate::config::Config;
use crate::error::{Error, Result};
use crate::profile::ProfileEvent;

/// Maximum number of keys sent in one author or `#p` filter.
pub const MAX_FILTER_PUBKEYS: usize = 200;

/// An event with its author's profile, when one was found.
#[derive(Debug, Clone)]
pub struct AuthoredEvent {
    pub event: Event,
    pub author: Option<ProfileEvent>,
}

/// Result of a ranked-or-broad query.
#[derive(Debug, Clone, Default)]
pub struct RankedEvents {
    /// In rank order when `ranked`, merge order otherwise.
    pub events: Vec<Event>,
    pub ranked: bool,
}

/// Parameters of a key-list feed query.
#[derive(Debug, Clone)]
pub struct PubkeyQuery {
    pub kind: u16,
    pub pubkeys: Vec<PublicKey>,
    /// Match keys tagged with `p` instead of authors.
    pub tagged: bool,
    pub with_authors: bool,
    pub limit: usize,
    pub identifiers: Option<Vec<String>>,
}

impl PubkeyQuery {
    pub fn new(kind: u16, pubkeys: &[PublicKey]) -> Self {
        Self {
            kind,
            pubkeys: pubkeys.to_vec(),
            tagged: false,
            with_authors: false,
            limit: 30,
            identifiers: None,
        }
    }

    pub fn tagged(mut self) -> Self {
        self.tagged = true;
        self
    }

    pub fn with_authors(mut self) -> Self {
        self.with_authors = true;
        self
    }

    pub fn limit(mut self, limit: usize) -> Self {
        self.limit = limit;
        self
    }

    pub fn identifiers(mut self, identifiers: Vec<String>) -> Self {
        self.identifiers = Some(identifiers);
        self
    }
}

/// Group by logical address keeping the newest event of each group.
///
/// Ties keep the first seen. Groups come out in first-seen order.
pub fn merge_dedup(events: impl IntoIterator<Item = Event>) -> Vec<Event> {
    let mut slots: HashMap<String, usize> = HashMap::new();
    let mut merged: Vec<Event> = Vec::new();
    for event in events {
        let address = logical_address(&event);
        match slots.get(&address) {
            Some(&i) => {
                if merged[i].created_at < event.created_at {
                    merged[i] = event;
                }
            }
            None => {
                slots.insert(address, merged.len());
                merged.push(event);
            }
        }
    }
    merged
}

/// Newest first.
pub fn sort_newest_first(events: &mut [Event]) {
    events.sort_by(|a, b| b.created_at.cmp(&a.created_at));
}

/// Lookup key and relay filter for a structured address.
///
/// Event ids take precedence, then full coordinates, then author and kind.
pub fn address_query(addr: &StructuredAddress) -> Option<(String, Filter)> {
    if let Some(id) = addr.event_id {
        return Some((id.to_hex(), Filter::new().id(id)));
    }
    match (addr.kind, addr.pubkey, addr.identifier.as_deref()) {
        (Some(kind), Some(pubkey), Some(identifier)) => Some((
            coordinate_key(kind, &pubkey, identifier),
            Filter::new()
                .kind(Kind::from(kind))
                .author(pubkey)
                .identifier(identifier),
        )),
        (Some(kind), Some(pubkey), None) => Some((
            coordinate_key(kind, &pubkey, ""),
            Filter::new().kind(Kind::from(kind)).author(pubkey),
        )),
        _ => None,
    }
}

/// Relay reads on top of the shared caches. Cheap to clone.
#[derive(Clone)]
pub struct Fetcher {
    pool: Arc<dyn RelayPool>,
    caches: Arc<Caches>,
    config: Arc<Config>,
}

impl Fetcher {
    pub fn new(pool: Arc<dyn RelayPool>, caches: Arc<Caches>, config: Arc<Config>) -> Self {
        Self {
            pool,
            caches,
            config,
        }
    }

    pub fn pool(&self) -> &Arc<dyn RelayPool> {
        &self.pool
    }

    pub fn caches(&self) -> &Arc<Caches> {
        &self.caches
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Query the general relay set and record every result.
    pub async fn fetch_read(&self, filter: Filter) -> anyhow::Result<Vec<Event>> {
        let events = self.pool.query(filter, &self.config.relays.read).await?;
        for event in &events {
            self.caches.record(event);
        }
        Ok(events)
    }

    /// Run all queries concurrently and merge whatever succeeded.
    pub async fn collect(&self, filters: Vec<Filter>) -> Vec<Event> {
        let results = join_all(filters.into_iter().map(|f| self.fetch_read(f))).await;
        let mut events = Vec::new();
        for result in results {
            match result {
                Ok(batch) => events.extend(batch),
                Err(e) => warn!("relay query failed: {e:#}"),
            }
        }
        merge_dedup(events)
    }

    /// Resolve a decoded identifier to its newest event.
    ///
    /// Serves from the address cache when possible. In hex mode the id is
    /// also tried as an author key for a profile.
    pub async fn resolve_by_address(&self, addr: &StructuredAddress) -> Option<Event> {
        let Some((key, filter)) = address_query(addr) else {
            warn!("address has nothing to look up: {addr:?}");
            return None;
        };

        if let Some(event) = self.caches.addresses.get(&key) {
            debug!("event in address cache {key}");
            return Some(event);
        }

        debug!("loading event by filter {filter:?}");
        let mut filters = vec![filter];
        if addr.hex {
            if let Some(id) = addr.event_id {
                match PublicKey::from_hex(&id.to_hex()) {
                    Ok(pubkey) => filters.push(
                        Filter::new()
                            .kind(Kind::from(KIND_METADATA))
                            .author(pubkey),
                    ),
                    Err(e) => debug!("hex id is not a valid key: {e}"),
                }
            }
        }

        let event = self.collect(filters).await.into_iter().next()?;
        self.caches.addresses.put(key, event.clone());
        self.caches.record(&event);
        Some(event)
    }

    /// Decode `identifier` and resolve it.
    pub async fn resolve(&self, identifier: &str) -> Result<Event> {
        let addr = decode(identifier)
            .map_err(|e| Error::MalformedIdentifier(format!("{identifier}: {e:#}")))?;
        self.resolve_by_address(&addr)
            .await
            .ok_or_else(|| Error::UnresolvedAddress(identifier.to_string()))
    }

    /// Events by id restricted to `kinds`, newest first.
    ///
    /// Cached events are reused when their kind matches; only misses go to
    /// the index relay.
    pub async fn resolve_by_ids(
        &self,
        ids: &[EventId],
        kinds: &[u16],
        with_authors: bool,
    ) -> Vec<AuthoredEvent> {
        let mut results = Vec::new();
        let mut missing: Vec<EventId> = Vec::new();
        for id in ids {
            match self.caches.events.get(id) {
                Some(event) => {
                    if kinds.contains(&event.kind.as_u16()) {
                        results.push(event);
                    }
                }
                None => {
                    if !missing.contains(id) {
                        missing.push(*id);
                    }
                }
            }
        }

        if !missing.is_empty() {
            let filter = Filter::new()
                .ids(missing)
                .kinds(kinds.iter().map(|k| Kind::from(*k)));
            let relays = std::slice::from_ref(&self.config.relays.index);
            match self.pool.query(filter, relays).await {
                Ok(events) => {
                    for event in events {
                        self.caches.events.put(event.id, event.clone());
                        results.push(event);
                    }
                }
                Err(e) => warn!("id lookup failed: {e:#}"),
            }
            debug!("event cache {}", self.caches.events.len());
        }

        let mut events = merge_dedup(results);
        sort_newest_first(&mut events);
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

    /// Profiles for `pubkeys`, from cache where possible.
    pub async fn fetch_metas(&self, pubkeys: &[PublicKey]) -> Vec<ProfileEvent> {
        let mut metas = Vec::new();
        let mut missing: Vec<PublicKey> = Vec::new();
        for pubkey in pubkeys {
            match self.caches.profiles.get(pubkey) {
                Some(meta) => {
                    if !metas.iter().any(|m: &ProfileEvent| m.pubkey() == *pubkey) {
                        metas.push(meta);
                    }
                }
                None => {
                    if !missing.contains(pubkey) {
                        missing.push(*pubkey);
                    }
                }
            }
        }

        if !missing.is_empty() {
            let filter = Filter::new()
                .kind(Kind::from(KIND_METADATA))
                .authors(missing);
            match self.fetch_read(filter).await {
                Ok(events) => {
                    for event in merge_dedup(events) {
                        let meta = ProfileEvent::from_event(event);
                        self.caches.profiles.put(meta.pubkey(), meta.clone());
                        metas.push(meta);
                    }
                }
                Err(e) => warn!("profile lookup failed: {e:#}"),
            }
        }

        debug!("meta cache {}", self.caches.profiles.len());
        metas
    }

    /// Pair each event with its author's profile.
    pub async fn attach_authors(&self, events: Vec<Event>) -> Vec<AuthoredEvent> {
        if events.is_empty() {
            return Vec::new();
        }
        let pubkeys: Vec<PublicKey> = events.iter().map(|e| e.pubkey).collect();
        let metas = self.fetch_metas(&pubkeys).await;
        events
            .into_iter()
            .map(|event| {
                let author = metas.iter().find(|m| m.pubkey() == event.pubkey).cloned();
                AuthoredEvent { event, author }
            })
            .collect()
    }

    /// Events of one kind by, or tagging, a list of keys. Newest first.
    pub async fn fetch_pubkey_events(&self, query: PubkeyQuery) -> Vec<AuthoredEvent> {
        let mut pubkeys = query.pubkeys;
        if pubkeys.is_empty() {
            return Vec::new();
        }
        pubkeys.truncate(MAX_FILTER_PUBKEYS);

        let mut filter = Filter::new()
            .kind(Kind::from(query.kind))
            .limit(query.limit);
        filter = if query.tagged {
            filter.pubkeys(pubkeys)
        } else {
            filter.authors(pubkeys)
        };
        if let Some(identifiers) = query.identifiers {
            filter = filter.identifiers(identifiers);
        }

        let mut events = match self.fetch_read(filter).await {
            Ok(events) => merge_dedup(events),
            Err(e) => {
                warn!("feed query for kind {} failed: {e:#}", query.kind);
                Vec::new()
            }
        };
        sort_newest_first(&mut events);
        events.truncate(query.limit);

        if query.with_authors {
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

    /// Ask the ranking endpoint first; fall back to a broad query on the
    /// general relays when it has nothing.
    pub async fn ranked_or_broad(&self, filter: Filter) -> RankedEvents {
        let ranking = std::slice::from_ref(&self.config.relays.ranking);
        let ranked = match self.pool.query_ranked(filter.clone(), ranking).await {
            Ok(ids) => ids,
            Err(e) => {
                warn!("ranked query failed: {e:#}");
                Vec::new()
            }
        };
        debug!("ranked ids {}", ranked.len());

        if ranked.is_empty() {
            info!("ranked list empty, running broad query");
            return RankedEvents {
                events: self.collect(vec![filter]).await,
                ranked: false,
            };
        }

        let fetched = self.collect(vec![Filter::new().ids(ranked.clone())]).await;
        let mut by_id: HashMap<EventId, Event> = fetched.into_iter().map(|e| (e.id, e)).collect();
        let events = ranked.iter().filter_map(|id| by_id.remove(id)).collect();
        RankedEvents {
            events,
            ranked: true,
        }
    }
}
