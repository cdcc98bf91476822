//! In-memory relay pool for the integration tests.
#![allow(dead_code)]

use anyhow::{bail, Result};
use async_trait::async_trait;
use nostr_apps::{AppsClient, Config};
use nostr_core::{RelayPool, RelaySubscription, SubscriptionItem};
use nostr_sdk::prelude::*;
use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

type Responder = Box<dyn Fn(&Event) -> Vec<Event> + Send + Sync>;

struct MockSubscription {
    filter: Filter,
    items: mpsc::UnboundedSender<SubscriptionItem>,
    cancel: CancellationToken,
}

#[derive(Default)]
pub struct MockPool {
    stored: Mutex<Vec<Event>>,
    ranked: Mutex<Vec<EventId>>,
    queries: Mutex<Vec<(Filter, Vec<String>)>>,
    subscriptions: Mutex<Vec<MockSubscription>>,
    published: Mutex<Vec<Event>>,
    ensured: Mutex<Vec<String>>,
    responder: Mutex<Option<Responder>>,
    failing: AtomicBool,
    ranking_failing: AtomicBool,
    /// Send stored matches and an end-of-stored marker on subscribe.
    auto_eose: AtomicBool,
}

pub fn matches(filter: &Filter, event: &Event) -> bool {
    if let Some(ids) = &filter.ids {
        if !ids.contains(&event.id) {
            return false;
        }
    }
    if let Some(authors) = &filter.authors {
        if !authors.contains(&event.pubkey) {
            return false;
        }
    }
    if let Some(kinds) = &filter.kinds {
        if !kinds.contains(&event.kind) {
            return false;
        }
    }
    for (tag, values) in filter.generic_tags.iter() {
        let name = tag.as_char().to_string();
        let found = event.tags.iter().any(|t| {
            let t = t.as_slice();
            t.first() == Some(&name) && t.get(1).is_some_and(|v| values.contains(v))
        });
        if !found {
            return false;
        }
    }
    true
}

impl MockPool {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn with_events(events: Vec<Event>) -> Arc<Self> {
        let pool = Self::default();
        *pool.stored.lock() = events;
        Arc::new(pool)
    }

    pub fn store(&self, event: Event) {
        self.stored.lock().push(event);
    }

    pub fn set_ranked(&self, ids: Vec<EventId>) {
        *self.ranked.lock() = ids;
    }

    pub fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }

    pub fn set_ranking_failing(&self, failing: bool) {
        self.ranking_failing.store(failing, Ordering::SeqCst);
    }

    pub fn set_auto_eose(&self, auto: bool) {
        self.auto_eose.store(auto, Ordering::SeqCst);
    }

    pub fn respond_with(&self, responder: impl Fn(&Event) -> Vec<Event> + Send + Sync + 'static) {
        *self.responder.lock() = Some(Box::new(responder));
    }

    pub fn queries(&self) -> Vec<Filter> {
        self.queries.lock().iter().map(|(f, _)| f.clone()).collect()
    }

    pub fn queries_to(&self, relay: &str) -> usize {
        self.queries
            .lock()
            .iter()
            .filter(|(_, relays)| relays.iter().any(|r| r == relay))
            .count()
    }

    pub fn published(&self) -> Vec<Event> {
        self.published.lock().clone()
    }

    pub fn ensured(&self) -> Vec<String> {
        self.ensured.lock().clone()
    }

    pub fn subscription_count(&self) -> usize {
        self.subscriptions.lock().len()
    }

    pub fn subscription_filter(&self, index: usize) -> Option<Filter> {
        self.subscriptions.lock().get(index).map(|s| s.filter.clone())
    }

    pub fn is_stopped(&self, index: usize) -> bool {
        self.subscriptions
            .lock()
            .get(index)
            .is_some_and(|s| s.cancel.is_cancelled())
    }

    /// Deliver `event` to every open subscription it matches.
    pub fn emit(&self, event: &Event) {
        for sub in self.subscriptions.lock().iter() {
            if !sub.cancel.is_cancelled() && matches(&sub.filter, event) {
                let _ = sub.items.send(SubscriptionItem::Event(Box::new(event.clone())));
            }
        }
    }

    /// Deliver `event` to subscription `index` regardless of its filter.
    pub fn emit_to(&self, index: usize, event: &Event) {
        if let Some(sub) = self.subscriptions.lock().get(index) {
            let _ = sub.items.send(SubscriptionItem::Event(Box::new(event.clone())));
        }
    }

    pub fn end_of_stored(&self, index: usize) {
        if let Some(sub) = self.subscriptions.lock().get(index) {
            let _ = sub.items.send(SubscriptionItem::EndOfStoredEvents);
        }
    }
}

#[async_trait]
impl RelayPool for MockPool {
    async fn query(&self, filter: Filter, relays: &[String]) -> Result<Vec<Event>> {
        self.queries.lock().push((filter.clone(), relays.to_vec()));
        if self.failing.load(Ordering::SeqCst) {
            bail!("relay unavailable");
        }
        Ok(self
            .stored
            .lock()
            .iter()
            .filter(|e| matches(&filter, e))
            .cloned()
            .collect())
    }

    async fn query_ranked(&self, _filter: Filter, _relays: &[String]) -> Result<Vec<EventId>> {
        if self.ranking_failing.load(Ordering::SeqCst) {
            bail!("ranking relay unavailable");
        }
        Ok(self.ranked.lock().clone())
    }

    async fn subscribe(&self, filter: Filter, _relays: &[String]) -> Result<RelaySubscription> {
        let (tx, rx) = mpsc::unbounded_channel();
        let cancel = CancellationToken::new();
        if self.auto_eose.load(Ordering::SeqCst) {
            for event in self.stored.lock().iter().filter(|e| matches(&filter, e)) {
                let _ = tx.send(SubscriptionItem::Event(Box::new(event.clone())));
            }
            let _ = tx.send(SubscriptionItem::EndOfStoredEvents);
        }
        self.subscriptions.lock().push(MockSubscription {
            filter,
            items: tx,
            cancel: cancel.clone(),
        });
        Ok(RelaySubscription::new(rx, cancel, None))
    }

    async fn publish(&self, event: &Event, _relays: &[String], _timeout: Duration) -> Result<()> {
        self.published.lock().push(event.clone());
        let replies = match self.responder.lock().as_ref() {
            Some(respond) => respond(event),
            None => Vec::new(),
        };
        for reply in &replies {
            self.emit(reply);
        }
        Ok(())
    }

    async fn ensure_relay(&self, url: &str) -> Result<()> {
        self.ensured.lock().push(url.to_string());
        Ok(())
    }
}

pub fn client(pool: &Arc<MockPool>) -> AppsClient {
    AppsClient::new(pool.clone(), Config::default())
}

pub fn signed(keys: &Keys, kind: u16, created_at: u64, content: &str, tags: Vec<Vec<&str>>) -> Event {
    let tags: Vec<Tag> = tags.into_iter().map(|t| Tag::parse(t).unwrap()).collect();
    EventBuilder::new(Kind::from(kind), content)
        .tags(tags)
        .custom_created_at(Timestamp::from(created_at))
        .sign_with_keys(keys)
        .unwrap()
}
