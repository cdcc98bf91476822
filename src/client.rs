//! The engine facade: one relay pool, one set of caches, three live channels.

use nostr_core::kinds::{KIND_BOOKMARK_LIST, KIND_CONTACT_LIST, KIND_METADATA};
use nostr_core::{RelayClient, RelayPool, StructuredAddress};
use nostr_sdk::prelude::*;
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio_stream::wrappers::UnboundedReceiverStream;
use tracing::info;

use crate::cache::Caches;
use crate::config::Config;
use crate::error::Result;
use crate::fetch::{AuthoredEvent, Fetcher};
use crate::handlers::AppRegistry;
use crate::profile::ProfileEvent;
use crate::subscription::{
    BookmarkList, BookmarkListFeed, ContactList, ContactListFeed, DeliveryStream, ProfileFeed,
    Subscription,
};
use crate::wallet::{self, PaymentReceipt, WalletInfo};

pub fn profiles_filter(pubkeys: &[PublicKey]) -> Filter {
    Filter::new()
        .kind(Kind::from(KIND_METADATA))
        .authors(pubkeys.iter().copied())
}

pub fn contact_list_filter(pubkey: PublicKey) -> Filter {
    Filter::new()
        .kind(Kind::from(KIND_CONTACT_LIST))
        .author(pubkey)
}

pub fn bookmark_list_filter(pubkey: PublicKey) -> Filter {
    Filter::new()
        .kind(Kind::from(KIND_BOOKMARK_LIST))
        .author(pubkey)
}

fn ended<T>() -> DeliveryStream<T> {
    let (_, rx) = mpsc::unbounded_channel();
    UnboundedReceiverStream::new(rx)
}

pub struct AppsClient {
    fetcher: Fetcher,
    profiles: Subscription<ProfileFeed>,
    contacts: Subscription<ContactListFeed>,
    bookmarks: Subscription<BookmarkListFeed>,
}

impl AppsClient {
    pub fn new(pool: Arc<dyn RelayPool>, config: Config) -> Self {
        let fetcher = Fetcher::new(pool, Arc::new(Caches::new()), Arc::new(config));
        Self {
            profiles: Subscription::new("profiles", fetcher.clone(), ProfileFeed),
            contacts: Subscription::new(
                "contact list",
                fetcher.clone(),
                ContactListFeed::new(fetcher.clone()),
            ),
            bookmarks: Subscription::new(
                "bookmark list",
                fetcher.clone(),
                BookmarkListFeed::new(fetcher.clone()),
            ),
            fetcher,
        }
    }

    /// Connect to every configured relay and build the client on top.
    pub async fn connect(config: Config) -> anyhow::Result<Self> {
        config.validate()?;
        let pool = RelayClient::new(config.all_relays(), config.timeout()).await?;
        info!("engine ready with {} read relay(s)", config.relays.read.len());
        Ok(Self::new(Arc::new(pool), config))
    }

    /// Searches, feeds and handler lookups live on the fetcher.
    pub fn fetcher(&self) -> &Fetcher {
        &self.fetcher
    }

    pub fn config(&self) -> &Config {
        self.fetcher.config()
    }

    pub async fn resolve(&self, identifier: &str) -> Result<Event> {
        self.fetcher.resolve(identifier).await
    }

    pub async fn resolve_by_address(&self, addr: &StructuredAddress) -> Option<Event> {
        self.fetcher.resolve_by_address(addr).await
    }

    pub async fn resolve_by_ids(
        &self,
        ids: &[EventId],
        kinds: &[u16],
        with_authors: bool,
    ) -> Vec<AuthoredEvent> {
        self.fetcher.resolve_by_ids(ids, kinds, with_authors).await
    }

    pub async fn apps_for(&self, addr: StructuredAddress) -> Result<AppRegistry> {
        self.fetcher.apps_for(addr).await
    }

    /// Live profiles of `pubkeys`. An empty list just stops the channel.
    pub async fn subscribe_profiles(
        &self,
        pubkeys: &[PublicKey],
    ) -> Result<DeliveryStream<ProfileEvent>> {
        if pubkeys.is_empty() {
            self.profiles.stop().await;
            return Ok(ended());
        }
        Ok(self.profiles.restart(profiles_filter(pubkeys)).await?)
    }

    pub async fn subscribe_contact_list(
        &self,
        pubkey: PublicKey,
    ) -> Result<DeliveryStream<ContactList>> {
        Ok(self.contacts.restart(contact_list_filter(pubkey)).await?)
    }

    pub async fn subscribe_bookmark_list(
        &self,
        pubkey: PublicKey,
    ) -> Result<DeliveryStream<BookmarkList>> {
        Ok(self.bookmarks.restart(bookmark_list_filter(pubkey)).await?)
    }

    pub async fn send_payment<S>(
        &self,
        signer: &S,
        wallet: &WalletInfo,
        invoice: &str,
    ) -> Result<PaymentReceipt>
    where
        S: NostrSigner,
    {
        wallet::send_payment(self.fetcher.pool().as_ref(), signer, wallet, invoice).await
    }

    /// Stop every live channel.
    pub async fn shutdown(&self) {
        tokio::join!(
            self.profiles.stop(),
            self.contacts.stop(),
            self.bookmarks.stop()
        );
    }
}
