//! Read-through cache keyed by reference.
//!
//! Every entry is in exactly one state: absent, loading, ready or failed.
//! The whole entry map lives in a [`StateCell`] and is replaced on every
//! change, so a reader always sees a consistent snapshot and subscribers are
//! told about each transition.

use crate::config::StoreConfig;
use futures_util::future::join_all;
use nostr_core::nostr_sdk::Event;
use nostr_core::{EventSource, ReferenceKey, StateCell, Unsubscribe};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::debug;

#[derive(Debug, Clone, PartialEq)]
pub enum CachedValue {
    Event(Event),
    Events(Vec<Event>),
}

impl CachedValue {
    pub fn into_event(self) -> Option<Event> {
        match self {
            CachedValue::Event(event) => Some(event),
            CachedValue::Events(_) => None,
        }
    }

    pub fn into_events(self) -> Option<Vec<Event>> {
        match self {
            CachedValue::Events(events) => Some(events),
            CachedValue::Event(_) => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum EntryState {
    Loading,
    Ready {
        value: CachedValue,
        fetched_at: Instant,
    },
    Failed(String),
}

/// Entry map snapshot, keyed by cache slot.
pub type Entries = HashMap<String, EntryState>;

/// Single-event and list lookups of one key use separate slots.
fn event_slot(key: &ReferenceKey) -> String {
    key.canonical()
}

fn list_slot(key: &ReferenceKey) -> String {
    format!("list:{}", key.canonical())
}

enum Begin {
    Cached(CachedValue),
    InFlight,
    Started,
}

pub struct EventStore {
    source: Arc<dyn EventSource>,
    config: StoreConfig,
    entries: StateCell<Entries>,
}

impl EventStore {
    pub fn new(source: Arc<dyn EventSource>, config: StoreConfig) -> Self {
        Self {
            source,
            config,
            entries: StateCell::default(),
        }
    }

    pub fn config(&self) -> &StoreConfig {
        &self.config
    }

    /// Cached value for `key` without touching the network: the single
    /// event if there is one, else the list.
    pub fn get(&self, key: &ReferenceKey) -> Option<CachedValue> {
        self.ready(&event_slot(key))
            .or_else(|| self.ready(&list_slot(key)))
    }

    pub fn get_event(&self, key: &ReferenceKey) -> Option<Event> {
        self.ready(&event_slot(key)).and_then(CachedValue::into_event)
    }

    pub fn get_events(&self, key: &ReferenceKey) -> Option<Vec<Event>> {
        self.ready(&list_slot(key)).and_then(CachedValue::into_events)
    }

    /// State of the single-event slot, if any.
    pub fn state(&self, key: &ReferenceKey) -> Option<EntryState> {
        self.entries.get().get(&event_slot(key)).cloned()
    }

    pub fn is_loading(&self, key: &ReferenceKey) -> bool {
        self.slot_is_loading(&event_slot(key)) || self.slot_is_loading(&list_slot(key))
    }

    fn slot_is_loading(&self, slot: &str) -> bool {
        matches!(self.entries.get().get(slot), Some(EntryState::Loading))
    }

    /// Last failure recorded for `key`, cleared by the next success.
    pub fn error(&self, key: &ReferenceKey) -> Option<String> {
        let entries = self.entries.get();
        [event_slot(key), list_slot(key)]
            .iter()
            .find_map(|slot| match entries.get(slot) {
                Some(EntryState::Failed(message)) => Some(message.clone()),
                _ => None,
            })
    }

    pub fn len(&self) -> usize {
        self.entries.get().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.get().is_empty()
    }

    /// Observe every change to the entry map.
    pub fn subscribe(
        &self,
        callback: impl Fn(&Entries) + Send + Sync + 'static,
    ) -> Unsubscribe<Entries> {
        self.entries.subscribe(callback)
    }

    /// Cached event for `key`, or fetch it.
    ///
    /// While another fetch for the same key is in flight this returns `None`
    /// at once instead of waiting for or duplicating that fetch. Failures are
    /// recorded (see [`error`](Self::error)) and also yield `None`.
    pub async fn fetch(&self, key: &ReferenceKey) -> Option<Event> {
        let slot = event_slot(key);
        match self.begin(&slot) {
            Begin::Cached(value) => return value.into_event(),
            Begin::InFlight => {
                debug!("{} is already loading", slot);
                return None;
            }
            Begin::Started => {}
        }

        let loading = LoadingGuard::new(&self.entries, slot);
        match self.source.fetch_latest(key).await {
            Ok(event) => {
                loading.finish(Ok(CachedValue::Event(event.clone())));
                Some(event)
            }
            Err(e) => {
                debug!("Fetch of {} failed: {}", key, e);
                loading.finish(Err(e.to_string()));
                None
            }
        }
    }

    /// Like [`fetch`](Self::fetch), for every replaceable group the key
    /// matches (newest per group).
    pub async fn fetch_list(&self, key: &ReferenceKey) -> Option<Vec<Event>> {
        let slot = list_slot(key);
        match self.begin(&slot) {
            Begin::Cached(value) => return value.into_events(),
            Begin::InFlight => {
                debug!("{} is already loading", slot);
                return None;
            }
            Begin::Started => {}
        }

        let loading = LoadingGuard::new(&self.entries, slot);
        match self.source.fetch_latest_each(key).await {
            Ok(events) => {
                loading.finish(Ok(CachedValue::Events(events.clone())));
                Some(events)
            }
            Err(e) => {
                debug!("List fetch of {} failed: {}", key, e);
                loading.finish(Err(e.to_string()));
                None
            }
        }
    }

    /// Fetch the single event of every key that has none cached or loading,
    /// concurrently. Individual failures only end up in the per-key error
    /// state.
    pub async fn prefetch(&self, keys: &[ReferenceKey]) {
        let pending: Vec<&ReferenceKey> = keys
            .iter()
            .filter(|key| {
                self.get_event(key).is_none() && !self.slot_is_loading(&event_slot(key))
            })
            .collect();
        if pending.is_empty() {
            return;
        }
        debug!("Prefetching {} of {} key(s)", pending.len(), keys.len());
        join_all(pending.into_iter().map(|key| self.fetch(key))).await;
    }

    /// [`prefetch`](Self::prefetch) in the background.
    pub fn spawn_prefetch(self: &Arc<Self>, keys: Vec<ReferenceKey>) -> JoinHandle<()> {
        let store = Arc::clone(self);
        tokio::spawn(async move { store.prefetch(&keys).await })
    }

    /// Drop one key (both slots) or, with `None`, everything.
    pub fn invalidate(&self, key: Option<&ReferenceKey>) {
        let Some(key) = key else {
            self.entries.set(HashMap::new());
            return;
        };
        let slots = [event_slot(key), list_slot(key)];
        self.entries.update_if(|entries| {
            if !slots.iter().any(|slot| entries.contains_key(slot)) {
                return (None, ());
            }
            let mut next = entries.clone();
            for slot in &slots {
                next.remove(slot);
            }
            (Some(next), ())
        });
    }

    /// Remove expired entries; returns how many went.
    pub fn cleanup(&self) -> usize {
        let Some(expiry) = self.config.expiry() else {
            return 0;
        };
        let now = Instant::now();
        self.entries.update_if(|entries| {
            let expired = entries
                .values()
                .filter(|state| is_expired(state, expiry, now))
                .count();
            if expired == 0 {
                return (None, 0);
            }
            let next: Entries = entries
                .iter()
                .filter(|(_, state)| !is_expired(state, expiry, now))
                .map(|(slot, state)| (slot.clone(), state.clone()))
                .collect();
            (Some(next), expired)
        })
    }

    /// Run [`cleanup`](Self::cleanup) periodically while the store is alive.
    /// Returns `None` when entries never expire.
    pub fn spawn_cleanup(self: &Arc<Self>) -> Option<JoinHandle<()>> {
        self.config.expiry()?;
        let interval = self.config.cleanup_interval();
        let store = Arc::downgrade(self);
        Some(tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.tick().await;
            loop {
                ticker.tick().await;
                let Some(store) = store.upgrade() else {
                    break;
                };
                let removed = store.cleanup();
                if removed > 0 {
                    debug!("Removed {} expired cache entries", removed);
                }
            }
        }))
    }

    fn ready(&self, slot: &str) -> Option<CachedValue> {
        let entries = self.entries.get();
        match entries.get(slot) {
            Some(state @ EntryState::Ready { value, .. })
                if !self.is_stale(state, Instant::now()) =>
            {
                Some(value.clone())
            }
            _ => None,
        }
    }

    fn is_stale(&self, state: &EntryState, now: Instant) -> bool {
        match self.config.expiry() {
            Some(expiry) => is_expired(state, expiry, now),
            None => false,
        }
    }

    /// Atomically decide whether this caller should fetch `slot`, marking it
    /// loading if so.
    fn begin(&self, slot: &str) -> Begin {
        let now = Instant::now();
        self.entries.update_if(|entries| match entries.get(slot) {
            Some(state @ EntryState::Ready { value, .. }) if !self.is_stale(state, now) => {
                (None, Begin::Cached(value.clone()))
            }
            Some(EntryState::Loading) => (None, Begin::InFlight),
            _ => {
                let mut next = entries.clone();
                next.insert(slot.to_string(), EntryState::Loading);
                (Some(next), Begin::Started)
            }
        })
    }
}

fn is_expired(state: &EntryState, expiry: Duration, now: Instant) -> bool {
    match state {
        EntryState::Ready { fetched_at, .. } => now.saturating_duration_since(*fetched_at) >= expiry,
        _ => false,
    }
}

/// Clears a loading mark if the fetch that set it is dropped before it
/// finishes.
struct LoadingGuard<'a> {
    entries: &'a StateCell<Entries>,
    slot: Option<String>,
}

impl<'a> LoadingGuard<'a> {
    fn new(entries: &'a StateCell<Entries>, slot: String) -> Self {
        Self {
            entries,
            slot: Some(slot),
        }
    }

    fn finish(mut self, result: Result<CachedValue, String>) {
        let Some(slot) = self.slot.take() else {
            return;
        };
        let state = match result {
            Ok(value) => EntryState::Ready {
                value,
                fetched_at: Instant::now(),
            },
            Err(message) => EntryState::Failed(message),
        };
        self.entries.update(|entries| {
            let mut next = entries.clone();
            next.insert(slot, state);
            next
        });
    }
}

impl Drop for LoadingGuard<'_> {
    fn drop(&mut self) {
        let Some(slot) = self.slot.take() else {
            return;
        };
        self.entries.update_if(|entries| {
            if !matches!(entries.get(&slot), Some(EntryState::Loading)) {
                return (None, ());
            }
            let mut next = entries.clone();
            next.remove(&slot);
            (Some(next), ())
        });
    }
}
