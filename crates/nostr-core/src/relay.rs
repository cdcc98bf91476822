//! Relay pool boundary and the nostr-sdk backed client.
//!
//! The engine never talks to relays directly; it goes through [`RelayPool`],
//! which covers one-shot queries, ranked queries, live subscriptions and
//! publishing. [`RelayClient`] is the production implementation.

use anyhow::{Context, Result};
use async_trait::async_trait;
use futures_util::StreamExt;
use nostr_sdk::prelude::*;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// One item yielded by a live subscription.
#[derive(Debug, Clone)]
pub enum SubscriptionItem {
    Event(Box<Event>),
    /// All stored events have been sent; the rest are live.
    EndOfStoredEvents,
}

/// Handle to an open relay subscription.
///
/// Items arrive in relay delivery order. [`RelaySubscription::stop`] cancels
/// the subscription and waits for the relay side to be closed.
pub struct RelaySubscription {
    items: mpsc::UnboundedReceiver<SubscriptionItem>,
    cancel: CancellationToken,
    task: Option<JoinHandle<()>>,
}

impl RelaySubscription {
    pub fn new(
        items: mpsc::UnboundedReceiver<SubscriptionItem>,
        cancel: CancellationToken,
        task: Option<JoinHandle<()>>,
    ) -> Self {
        Self { items, cancel, task }
    }

    /// Next item, or `None` once the subscription is stopped or closed.
    pub async fn next(&mut self) -> Option<SubscriptionItem> {
        tokio::select! {
            biased;
            _ = self.cancel.cancelled() => None,
            item = self.items.recv() => item,
        }
    }

    pub fn is_stopped(&self) -> bool {
        self.cancel.is_cancelled()
    }

    /// Token that stops this subscription when cancelled.
    pub fn cancel_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    pub async fn stop(mut self) {
        self.cancel.cancel();
        if let Some(task) = self.task.take() {
            if let Err(e) = task.await {
                warn!("Subscription task ended abnormally: {e}");
            }
        }
    }
}

/// The relay operations the engine depends on.
#[async_trait]
pub trait RelayPool: Send + Sync {
    /// One-shot fetch of stored events matching `filter`.
    async fn query(&self, filter: Filter, relays: &[String]) -> Result<Vec<Event>>;

    /// Ids of the best-ranked events matching `filter`, best first.
    async fn query_ranked(&self, filter: Filter, relays: &[String]) -> Result<Vec<EventId>>;

    /// Open a subscription that stays open after the stored backlog is sent.
    async fn subscribe(&self, filter: Filter, relays: &[String]) -> Result<RelaySubscription>;

    async fn publish(&self, event: &Event, relays: &[String], timeout: Duration) -> Result<()>;

    /// Make sure `url` is part of the pool.
    async fn ensure_relay(&self, url: &str) -> Result<()>;
}

/// nostr-sdk backed relay pool.
#[derive(Clone)]
pub struct RelayClient {
    client: Client,
    timeout: Duration,
}

impl RelayClient {
    /// Create a read-only client connected to the given relay URLs.
    pub async fn new(relay_urls: Vec<String>, timeout: Duration) -> Result<Self> {
        let client = Client::default();

        for relay_url in &relay_urls {
            client
                .add_relay(relay_url.as_str())
                .await
                .with_context(|| format!("Failed to add relay: {}", relay_url))?;
        }

        client.connect().await;
        info!("Relay client connected to {} relay(s)", relay_urls.len());

        Ok(Self { client, timeout })
    }
}

#[async_trait]
impl RelayPool for RelayClient {
    async fn query(&self, filter: Filter, relays: &[String]) -> Result<Vec<Event>> {
        debug!("query {:?} on {:?}", filter, relays);
        let events = tokio::time::timeout(
            self.timeout,
            self.client.fetch_events_from(relays, filter, self.timeout),
        )
        .await
        .context("Timeout fetching events")?
        .context("Failed to fetch events")?;
        Ok(events.into_iter().collect())
    }

    async fn query_ranked(&self, filter: Filter, relays: &[String]) -> Result<Vec<EventId>> {
        // Ranking relays send their matches best first; keep delivery order.
        let mut stream = self
            .client
            .stream_events_from(relays, filter, self.timeout)
            .await
            .context("Failed to open ranked query")?;
        let mut ids = Vec::new();
        while let Some(event) = stream.next().await {
            if !ids.contains(&event.id) {
                ids.push(event.id);
            }
        }
        Ok(ids)
    }

    async fn subscribe(&self, filter: Filter, relays: &[String]) -> Result<RelaySubscription> {
        // Listen before subscribing so nothing sent right away is missed.
        let mut notifications = self.client.notifications();
        let output = self
            .client
            .subscribe_to(relays, filter, None)
            .await
            .context("Failed to subscribe")?;
        let subscription_id = output.val;
        debug!("opened subscription {subscription_id}");

        let (tx, rx) = mpsc::unbounded_channel();
        let cancel = CancellationToken::new();
        let client = self.client.clone();
        let token = cancel.clone();
        let task = tokio::spawn(async move {
            loop {
                let notification = tokio::select! {
                    _ = token.cancelled() => break,
                    n = notifications.recv() => n,
                };
                let item = match notification {
                    Ok(RelayPoolNotification::Event {
                        subscription_id: id,
                        event,
                        ..
                    }) if id == subscription_id => SubscriptionItem::Event(event),
                    Ok(RelayPoolNotification::Message {
                        message: RelayMessage::EndOfStoredEvents(id),
                        ..
                    }) if id.as_ref() == &subscription_id => SubscriptionItem::EndOfStoredEvents,
                    Ok(RelayPoolNotification::Shutdown) => break,
                    Ok(_) => continue,
                    Err(tokio::sync::broadcast::error::RecvError::Lagged(n)) => {
                        warn!("Subscription {subscription_id} lagged by {n} notifications");
                        continue;
                    }
                    Err(tokio::sync::broadcast::error::RecvError::Closed) => break,
                };
                if tx.send(item).is_err() {
                    break;
                }
            }
            client.unsubscribe(&subscription_id).await;
            debug!("closed subscription {subscription_id}");
        });

        Ok(RelaySubscription::new(rx, cancel, Some(task)))
    }

    async fn publish(&self, event: &Event, relays: &[String], timeout: Duration) -> Result<()> {
        let output = tokio::time::timeout(timeout, self.client.send_event_to(relays, event))
            .await
            .context("Timeout publishing event")?
            .context("Failed to publish event")?;
        debug!(
            "published {} ({} ok, {} failed)",
            event.id,
            output.success.len(),
            output.failed.len()
        );
        Ok(())
    }

    async fn ensure_relay(&self, url: &str) -> Result<()> {
        let added = self
            .client
            .add_relay(url)
            .await
            .with_context(|| format!("Failed to add relay: {}", url))?;
        if added {
            self.client
                .connect_relay(url)
                .await
                .with_context(|| format!("Failed to connect relay: {}", url))?;
            info!("Added relay {url}");
        }
        Ok(())
    }
}
