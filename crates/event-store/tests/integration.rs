use async_trait::async_trait;
use event_store::*;
use nostr_core::nostr_sdk::prelude::*;
use nostr_core::{EventSource, FetchError, ReferenceKey};
use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use tokio::sync::Notify;

/// Event source that counts calls, can be held open with a gate, and fails
/// keys it has no event for.
#[derive(Default)]
struct MockSource {
    events: Mutex<HashMap<String, Event>>,
    calls: AtomicUsize,
    gate: Option<Arc<Notify>>,
}

impl MockSource {
    fn with_event(key: &ReferenceKey, event: Event) -> Self {
        let source = Self::default();
        source.insert(key, event);
        source
    }

    fn gated(mut self, gate: Arc<Notify>) -> Self {
        self.gate = Some(gate);
        self
    }

    fn insert(&self, key: &ReferenceKey, event: Event) {
        self.events.lock().unwrap().insert(key.canonical(), event);
    }

    fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    async fn lookup(&self, key: &ReferenceKey) -> std::result::Result<Event, FetchError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if let Some(gate) = &self.gate {
            gate.notified().await;
        }
        self.events
            .lock()
            .unwrap()
            .get(&key.canonical())
            .cloned()
            .ok_or(FetchError::NotFound)
    }
}

#[async_trait]
impl EventSource for MockSource {
    async fn fetch_latest(&self, key: &ReferenceKey) -> std::result::Result<Event, FetchError> {
        self.lookup(key).await
    }

    async fn fetch_latest_each(
        &self,
        key: &ReferenceKey,
    ) -> std::result::Result<Vec<Event>, FetchError> {
        self.lookup(key).await.map(|event| vec![event])
    }
}

fn profile() -> (ReferenceKey, Event) {
    let keys = Keys::generate();
    let event = EventBuilder::new(Kind::Metadata, r#"{"name":"alice"}"#)
        .sign_with_keys(&keys)
        .unwrap();
    (ReferenceKey::profile(keys.public_key().to_hex()), event)
}

fn store_over(source: &Arc<MockSource>) -> EventStore {
    EventStore::new(source.clone(), StoreConfig::default())
}

#[tokio::test]
async fn test_fetch_is_idempotent() {
    let (key, event) = profile();
    let source = Arc::new(MockSource::with_event(&key, event.clone()));
    let store = store_over(&source);

    assert!(store.get(&key).is_none());
    assert_eq!(store.fetch(&key).await, Some(event.clone()));
    assert_eq!(store.fetch(&key).await, Some(event.clone()));
    assert_eq!(store.get_event(&key), Some(event));
    assert_eq!(source.calls(), 1);
}

#[tokio::test]
async fn test_concurrent_fetch_does_not_duplicate() {
    let (key, event) = profile();
    let gate = Arc::new(Notify::new());
    let source = Arc::new(MockSource::with_event(&key, event.clone()).gated(gate.clone()));
    let store = Arc::new(store_over(&source));

    let first = tokio::spawn({
        let store = store.clone();
        let key = key.clone();
        async move { store.fetch(&key).await }
    });
    while !store.is_loading(&key) {
        tokio::task::yield_now().await;
    }

    // Second caller sees the in-flight fetch and returns immediately.
    assert_eq!(store.fetch(&key).await, None);
    assert_eq!(store.state(&key), Some(EntryState::Loading));

    gate.notify_one();
    assert_eq!(first.await.unwrap(), Some(event));
    assert!(!store.is_loading(&key));
    assert_eq!(source.calls(), 1);
}

#[tokio::test]
async fn test_invalidate_forces_refetch() {
    let (key, event) = profile();
    let source = Arc::new(MockSource::with_event(&key, event));
    let store = store_over(&source);

    store.fetch(&key).await.unwrap();
    store.invalidate(Some(&key));
    assert!(store.get(&key).is_none());
    assert!(store.state(&key).is_none());

    store.fetch(&key).await.unwrap();
    assert_eq!(source.calls(), 2);

    store.invalidate(None);
    assert!(store.is_empty());
}

#[tokio::test]
async fn test_invalidate_leaves_other_keys() {
    let (alice, alice_event) = profile();
    let (bob, bob_event) = profile();
    let source = Arc::new(MockSource::with_event(&alice, alice_event));
    source.insert(&bob, bob_event);
    let store = store_over(&source);

    store.prefetch(&[alice.clone(), bob.clone()]).await;
    store.invalidate(Some(&alice));
    assert!(store.get(&alice).is_none());
    assert!(store.get(&bob).is_some());
}

#[tokio::test]
async fn test_failure_is_recorded_and_retryable() {
    let (key, event) = profile();
    let source = Arc::new(MockSource::default());
    let store = store_over(&source);

    assert_eq!(store.fetch(&key).await, None);
    assert_eq!(store.error(&key), Some(FetchError::NotFound.to_string()));
    assert!(store.get(&key).is_none());

    source.insert(&key, event.clone());
    assert_eq!(store.fetch(&key).await, Some(event));
    assert!(store.error(&key).is_none());
    assert_eq!(source.calls(), 2);
}

#[tokio::test]
async fn test_list_and_single_fetch_are_cached_apart() {
    let (key, event) = profile();
    let source = Arc::new(MockSource::with_event(&key, event.clone()));
    let store = store_over(&source);

    assert_eq!(store.fetch_list(&key).await, Some(vec![event.clone()]));
    assert_eq!(store.fetch_list(&key).await, Some(vec![event.clone()]));
    assert_eq!(source.calls(), 1);
    assert!(store.get_event(&key).is_none());

    assert_eq!(store.fetch(&key).await, Some(event));
    assert_eq!(source.calls(), 2);
}

#[tokio::test]
async fn test_prefetch_skips_cached_and_swallows_failures() {
    let (cached, cached_event) = profile();
    let (fresh, fresh_event) = profile();
    let (missing, _) = profile();
    let source = Arc::new(MockSource::with_event(&cached, cached_event));
    source.insert(&fresh, fresh_event.clone());
    let store = store_over(&source);

    store.fetch(&cached).await.unwrap();
    store
        .prefetch(&[cached.clone(), fresh.clone(), missing.clone()])
        .await;

    assert_eq!(source.calls(), 3);
    assert_eq!(store.get_event(&fresh), Some(fresh_event));
    assert!(store.error(&missing).is_some());

    // Everything cached: nothing to do.
    store.prefetch(&[cached, fresh]).await;
    assert_eq!(source.calls(), 3);
}

#[tokio::test]
async fn test_spawned_prefetch_fills_cache() {
    let (key, event) = profile();
    let source = Arc::new(MockSource::with_event(&key, event.clone()));
    let store = Arc::new(store_over(&source));

    store.spawn_prefetch(vec![key.clone()]).await.unwrap();
    assert_eq!(store.get_event(&key), Some(event));
}

#[tokio::test]
async fn test_subscribers_see_transitions() {
    let (key, event) = profile();
    let source = Arc::new(MockSource::with_event(&key, event));
    let store = store_over(&source);

    let seen = Arc::new(Mutex::new(Vec::new()));
    let slot = key.canonical();
    let handle = store.subscribe({
        let seen = seen.clone();
        move |entries: &Entries| {
            let state = match entries.get(&slot) {
                None => "absent",
                Some(EntryState::Loading) => "loading",
                Some(EntryState::Ready { .. }) => "ready",
                Some(EntryState::Failed(_)) => "failed",
            };
            seen.lock().unwrap().push(state);
        }
    });

    store.fetch(&key).await;
    store.invalidate(Some(&key));
    handle.unsubscribe();
    store.fetch(&key).await;

    assert_eq!(
        *seen.lock().unwrap(),
        vec!["absent", "loading", "ready", "absent"]
    );
}
