//! Session caches.
//!
//! All stores are unbounded and live as long as the [`Caches`] value. Keys
//! are never evicted; an addressable record is only ever replaced by a newer
//! one. Each store sits behind the small [`Store`] interface so an eviction
//! policy can be swapped in without touching call sites.

use nostr_core::logical_address;
use nostr_sdk::prelude::*;
use parking_lot::RwLock;
use std::collections::HashMap;
use std::hash::Hash;
use tracing::debug;

use crate::handlers::AppRegistry;
use crate::profile::ProfileEvent;

pub trait Store<K, V>: Send + Sync {
    fn get(&self, key: &K) -> Option<V>;
    fn put(&self, key: K, value: V);
    fn len(&self) -> usize;

    fn has(&self, key: &K) -> bool {
        self.get(key).is_some()
    }

    fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Plain keyed map, last write wins.
pub struct MemoryStore<K, V> {
    inner: RwLock<HashMap<K, V>>,
}

impl<K, V> MemoryStore<K, V> {
    pub fn new() -> Self {
        Self {
            inner: RwLock::new(HashMap::new()),
        }
    }
}

impl<K, V> Default for MemoryStore<K, V> {
    fn default() -> Self {
        Self::new()
    }
}

impl<K, V> Store<K, V> for MemoryStore<K, V>
where
    K: Eq + Hash + Send + Sync,
    V: Clone + Send + Sync,
{
    fn get(&self, key: &K) -> Option<V> {
        self.inner.read().get(key).cloned()
    }

    fn put(&self, key: K, value: V) {
        self.inner.write().insert(key, value);
    }

    fn len(&self) -> usize {
        self.inner.read().len()
    }

    fn has(&self, key: &K) -> bool {
        self.inner.read().contains_key(key)
    }
}

/// Records by logical address. Holds at most one event per address: the
/// newest seen, with ties keeping the incumbent.
#[derive(Default)]
pub struct AddressStore {
    inner: RwLock<HashMap<String, Event>>,
}

impl AddressStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Store `event` unless an event at least as new is already there.
    /// Returns whether `event` is now the stored one.
    pub fn insert(&self, key: String, event: Event) -> bool {
        let mut map = self.inner.write();
        match map.get(&key) {
            Some(current) if current.created_at >= event.created_at => false,
            _ => {
                map.insert(key, event);
                true
            }
        }
    }
}

impl Store<String, Event> for AddressStore {
    fn get(&self, key: &String) -> Option<Event> {
        self.inner.read().get(key).cloned()
    }

    fn put(&self, key: String, value: Event) {
        self.insert(key, value);
    }

    fn len(&self) -> usize {
        self.inner.read().len()
    }
}

/// The four caches shared by every component of one client.
#[derive(Default)]
pub struct Caches {
    pub events: MemoryStore<EventId, Event>,
    pub addresses: AddressStore,
    pub apps_by_kind: MemoryStore<u16, AppRegistry>,
    pub profiles: MemoryStore<PublicKey, ProfileEvent>,
}

impl Caches {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a fetched event under its id and its logical address.
    pub fn record(&self, event: &Event) {
        self.events.put(event.id, event.clone());
        let address = logical_address(event);
        if !self.addresses.insert(address.clone(), event.clone()) {
            debug!("kept newer record for {address}");
        }
    }
}
