//! Live subscription channels.
//!
//! A channel is two tasks joined by an unbounded queue. The reader owns the
//! relay subscription: it keeps the newest event per dedup key and enqueues
//! one unit of work per accepted event plus one for the end of the stored
//! backlog. The worker is the only consumer and runs each unit to
//! completion before taking the next, so per-event transforms never
//! interleave and the backlog marker is never handled ahead of the events
//! it follows.
//!
//! Nothing is delivered until the backlog marker; then every held event is
//! delivered once, and afterwards each new event is delivered if it is still
//! the newest for its key by the time its unit runs.

use anyhow::Result;
use async_trait::async_trait;
use nostr_core::kinds::{KIND_LONG_FORM, KIND_NOTE};
use nostr_core::tags::unique_values;
use nostr_core::{logical_address, RelaySubscription, SubscriptionItem};
use nostr_sdk::prelude::*;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_stream::wrappers::UnboundedReceiverStream;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::fetch::{AuthoredEvent, Fetcher};
use crate::profile::ProfileEvent;

/// Transformed deliveries of one channel. Ends when the channel restarts.
pub type DeliveryStream<T> = UnboundedReceiverStream<T>;

/// Per-event enrichment run by a channel's worker.
#[async_trait]
pub trait ChannelTransform: Send + Sync + 'static {
    type Output: Send + 'static;

    async fn transform(&self, event: Event) -> Self::Output;
}

enum Task {
    Event { key: String, id: EventId },
    EndOfStoredEvents,
}

/// Newest event per dedup key, in first-seen key order.
#[derive(Default)]
struct Latest {
    events: HashMap<String, Event>,
    order: Vec<String>,
}

impl Latest {
    /// Store `event` unless the held one is strictly newer or the same event.
    fn offer(&mut self, key: &str, event: &Event) -> bool {
        if let Some(held) = self.events.get(key) {
            if held.created_at > event.created_at || held.id == event.id {
                return false;
            }
        } else {
            self.order.push(key.to_string());
        }
        self.events.insert(key.to_string(), event.clone());
        true
    }

    fn current(&self, key: &str, id: &EventId) -> Option<Event> {
        self.events.get(key).filter(|e| e.id == *id).cloned()
    }

    fn snapshot(&self) -> Vec<(String, Event)> {
        self.order
            .iter()
            .filter_map(|k| self.events.get(k).map(|e| (k.clone(), e.clone())))
            .collect()
    }
}

struct Channel {
    cancel: CancellationToken,
    reader: JoinHandle<()>,
    worker: JoinHandle<()>,
}

impl Channel {
    async fn stop(self) {
        self.cancel.cancel();
        let (reader, worker) = tokio::join!(self.reader, self.worker);
        if let Err(e) = reader.and(worker) {
            warn!("channel task ended abnormally: {e}");
        }
    }
}

/// One logical subscription channel. At most one relay subscription is
/// live per channel.
pub struct Subscription<T: ChannelTransform> {
    label: &'static str,
    fetcher: Fetcher,
    transform: Arc<T>,
    active: tokio::sync::Mutex<Option<Channel>>,
}

impl<T: ChannelTransform> Subscription<T> {
    pub fn new(label: &'static str, fetcher: Fetcher, transform: T) -> Self {
        Self {
            label,
            fetcher,
            transform: Arc::new(transform),
            active: tokio::sync::Mutex::new(None),
        }
    }

    /// Replace the channel's subscription with one for `filter`.
    ///
    /// The previous relay subscription is fully stopped before the new one
    /// opens, and its delivery stream ends.
    pub async fn restart(&self, filter: Filter) -> Result<DeliveryStream<T::Output>> {
        let mut active = self.active.lock().await;
        if let Some(previous) = active.take() {
            debug!("stopping previous {} subscription", self.label);
            previous.stop().await;
        }

        let relays = &self.fetcher.config().relays.read;
        let relay_sub = self.fetcher.pool().subscribe(filter, relays).await?;
        info!("started {} subscription", self.label);

        let latest = Arc::new(Mutex::new(Latest::default()));
        let cancel = CancellationToken::new();
        let (task_tx, task_rx) = mpsc::unbounded_channel();
        let (out_tx, out_rx) = mpsc::unbounded_channel();

        let reader = tokio::spawn(read_loop(
            self.label,
            relay_sub,
            latest.clone(),
            task_tx,
            cancel.clone(),
        ));
        let worker = tokio::spawn(work_loop(
            self.label,
            self.transform.clone(),
            latest,
            task_rx,
            out_tx,
            cancel.clone(),
        ));

        *active = Some(Channel {
            cancel,
            reader,
            worker,
        });
        Ok(UnboundedReceiverStream::new(out_rx))
    }

    /// Stop the channel's subscription, if any.
    pub async fn stop(&self) {
        if let Some(channel) = self.active.lock().await.take() {
            channel.stop().await;
            info!("stopped {} subscription", self.label);
        }
    }

    pub async fn is_active(&self) -> bool {
        self.active.lock().await.is_some()
    }
}

impl<T: ChannelTransform> Drop for Subscription<T> {
    fn drop(&mut self) {
        if let Some(channel) = self.active.get_mut().take() {
            channel.cancel.cancel();
        }
    }
}

async fn read_loop(
    label: &'static str,
    mut relay_sub: RelaySubscription,
    latest: Arc<Mutex<Latest>>,
    tasks: mpsc::UnboundedSender<Task>,
    cancel: CancellationToken,
) {
    loop {
        let item = tokio::select! {
            biased;
            _ = cancel.cancelled() => break,
            item = relay_sub.next() => item,
        };
        let task = match item {
            Some(SubscriptionItem::Event(event)) => {
                let key = logical_address(&event);
                if !latest.lock().offer(&key, &event) {
                    debug!("{label}: ignoring old event {}", event.id);
                    continue;
                }
                Task::Event { key, id: event.id }
            }
            Some(SubscriptionItem::EndOfStoredEvents) => Task::EndOfStoredEvents,
            None => break,
        };
        if tasks.send(task).is_err() {
            break;
        }
    }
    relay_sub.stop().await;
}

async fn work_loop<T: ChannelTransform>(
    label: &'static str,
    transform: Arc<T>,
    latest: Arc<Mutex<Latest>>,
    mut tasks: mpsc::UnboundedReceiver<Task>,
    out: mpsc::UnboundedSender<T::Output>,
    cancel: CancellationToken,
) {
    let mut eose = false;
    let mut delivered: HashMap<String, EventId> = HashMap::new();

    loop {
        let task = tokio::select! {
            biased;
            _ = cancel.cancelled() => break,
            task = tasks.recv() => task,
        };
        let due: Vec<(String, Event)> = match task {
            None => break,
            Some(Task::Event { key, id }) => {
                if !eose {
                    continue;
                }
                match latest.lock().current(&key, &id) {
                    Some(event) => vec![(key, event)],
                    None => continue,
                }
            }
            Some(Task::EndOfStoredEvents) => {
                if eose {
                    debug!("{label}: duplicate end of stored events");
                    continue;
                }
                eose = true;
                let snapshot = latest.lock().snapshot();
                debug!("{label}: end of stored events, {} held", snapshot.len());
                snapshot
            }
        };

        for (key, event) in due {
            if delivered.get(&key) == Some(&event.id) {
                continue;
            }
            delivered.insert(key, event.id);
            let output = tokio::select! {
                biased;
                _ = cancel.cancelled() => return,
                output = transform.transform(event) => output,
            };
            if out.send(output).is_err() {
                debug!("{label}: consumer gone");
                return;
            }
        }
    }
}

// ── Channel transforms ───────────────────────────────────────────

/// Profile events with parsed metadata.
pub struct ProfileFeed;

#[async_trait]
impl ChannelTransform for ProfileFeed {
    type Output = ProfileEvent;

    async fn transform(&self, event: Event) -> ProfileEvent {
        ProfileEvent::from_event(event)
    }
}

#[derive(Debug, Clone)]
pub struct ContactList {
    pub event: Event,
    /// Deduplicated `p` tags in list order.
    pub contact_pubkeys: Vec<PublicKey>,
    /// Profiles of the contacts, in list order.
    pub contacts: Vec<ProfileEvent>,
}

pub struct ContactListFeed {
    fetcher: Fetcher,
}

impl ContactListFeed {
    pub fn new(fetcher: Fetcher) -> Self {
        Self { fetcher }
    }
}

#[async_trait]
impl ChannelTransform for ContactListFeed {
    type Output = ContactList;

    async fn transform(&self, event: Event) -> ContactList {
        let contact_pubkeys: Vec<PublicKey> = unique_values(&event, "p")
            .iter()
            .filter_map(|pk| PublicKey::from_hex(pk).ok())
            .collect();

        let mut contacts = Vec::new();
        if !contact_pubkeys.is_empty() {
            contacts = self.fetcher.fetch_metas(&contact_pubkeys).await;
            let position = |pk: &PublicKey| contact_pubkeys.iter().position(|c| c == pk);
            contacts.sort_by_key(|m| position(&m.pubkey()));
        }

        ContactList {
            event,
            contact_pubkeys,
            contacts,
        }
    }
}

#[derive(Debug, Clone)]
pub struct BookmarkList {
    pub event: Event,
    /// Deduplicated `e` tags in list order.
    pub event_ids: Vec<EventId>,
    /// Bookmarked notes and long-form posts, in list order.
    pub bookmarks: Vec<AuthoredEvent>,
}

pub struct BookmarkListFeed {
    fetcher: Fetcher,
}

impl BookmarkListFeed {
    pub fn new(fetcher: Fetcher) -> Self {
        Self { fetcher }
    }
}

#[async_trait]
impl ChannelTransform for BookmarkListFeed {
    type Output = BookmarkList;

    async fn transform(&self, event: Event) -> BookmarkList {
        let event_ids: Vec<EventId> = unique_values(&event, "e")
            .iter()
            .filter_map(|id| EventId::from_hex(id).ok())
            .collect();

        let mut bookmarks = Vec::new();
        if !event_ids.is_empty() {
            bookmarks = self
                .fetcher
                .resolve_by_ids(&event_ids, &[KIND_NOTE, KIND_LONG_FORM], true)
                .await;
            let position = |id: &EventId| event_ids.iter().position(|e| e == id);
            bookmarks.sort_by_key(|b| position(&b.event.id));
        }

        BookmarkList {
            event,
            event_ids,
            bookmarks,
        }
    }
}
