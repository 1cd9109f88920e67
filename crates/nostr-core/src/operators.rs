//! Deduplication and latest-wins reduction over event streams.
//!
//! Each operator exists twice: as a plain accumulator (`Uniq`, `Latest`,
//! `LatestEach`) and as a stream stage built on it (`uniq`, `latest`,
//! `latest_each`). Stages compose by chaining, e.g.
//! `latest(uniq(events))`. All state lives inside the stage and is dropped
//! with it.
//!
//! Replacement goes through [`event::supersedes`], so the final state does
//! not depend on the order in which relays deliver events.

use crate::event::{self, GroupKey};
use futures_util::future;
use futures_util::{Stream, StreamExt};
use nostr_sdk::prelude::*;
use std::collections::{HashMap, HashSet};
use std::hash::Hash;

/// Remembers every id seen so far.
#[derive(Debug, Default)]
pub struct Uniq {
    seen: HashSet<EventId>,
}

impl Uniq {
    /// Returns true the first time an event id is offered.
    pub fn insert(&mut self, event: &Event) -> bool {
        self.seen.insert(event.id)
    }

    pub fn len(&self) -> usize {
        self.seen.len()
    }

    pub fn is_empty(&self) -> bool {
        self.seen.is_empty()
    }
}

/// The single newest event offered so far.
#[derive(Debug, Default, Clone)]
pub struct Latest {
    current: Option<Event>,
}

impl Latest {
    /// Returns true when `event` became the new winner.
    pub fn offer(&mut self, event: Event) -> bool {
        match &self.current {
            Some(current) if !event::supersedes(&event, current) => false,
            _ => {
                self.current = Some(event);
                true
            }
        }
    }

    pub fn current(&self) -> Option<&Event> {
        self.current.as_ref()
    }

    pub fn into_inner(self) -> Option<Event> {
        self.current
    }
}

/// The newest event per distinguishing key.
pub struct LatestEach<K, F> {
    winners: HashMap<K, Event>,
    key_fn: F,
}

impl<K, F> LatestEach<K, F>
where
    K: Eq + Hash,
    F: FnMut(&Event) -> Option<K>,
{
    pub fn new(key_fn: F) -> Self {
        Self {
            winners: HashMap::new(),
            key_fn,
        }
    }

    /// Returns true when the event replaced (or created) its key's winner.
    /// Events without a key are ignored.
    pub fn offer(&mut self, event: Event) -> bool {
        let Some(key) = (self.key_fn)(&event) else {
            return false;
        };
        match self.winners.get(&key) {
            Some(current) if !event::supersedes(&event, current) => false,
            _ => {
                self.winners.insert(key, event);
                true
            }
        }
    }

    /// Current winners, newest first.
    pub fn snapshot(&self) -> Vec<Event> {
        let mut events: Vec<Event> = self.winners.values().cloned().collect();
        events.sort_by(event::recency);
        events
    }

    pub fn len(&self) -> usize {
        self.winners.len()
    }

    pub fn is_empty(&self) -> bool {
        self.winners.is_empty()
    }
}

/// Drop events whose id already passed through this stage.
pub fn uniq<S>(events: S) -> impl Stream<Item = Event>
where
    S: Stream<Item = Event>,
{
    let mut seen = Uniq::default();
    events.filter(move |event| future::ready(seen.insert(event)))
}

/// Emit the running winner each time it changes.
pub fn latest<S>(events: S) -> impl Stream<Item = Event>
where
    S: Stream<Item = Event>,
{
    let mut winner = Latest::default();
    events.filter_map(move |event| {
        let changed = winner.offer(event);
        future::ready(if changed {
            winner.current().cloned()
        } else {
            None
        })
    })
}

/// Emit the full set of per-key winners after every incoming event.
pub fn latest_each<S, K, F>(events: S, key_fn: F) -> impl Stream<Item = Vec<Event>>
where
    S: Stream<Item = Event>,
    K: Eq + Hash,
    F: FnMut(&Event) -> Option<K>,
{
    let mut winners = LatestEach::new(key_fn);
    events.map(move |event| {
        winners.offer(event);
        winners.snapshot()
    })
}

pub fn by_pubkey(event: &Event) -> Option<PublicKey> {
    Some(event.pubkey)
}

/// The `d` tag, for streams already narrowed to one kind and author.
pub fn by_identifier(event: &Event) -> Option<String> {
    Some(event::identifier(event).to_string())
}

pub fn by_group(event: &Event) -> Option<GroupKey> {
    Some(event::group_key(event))
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures_util::stream;

    fn article(keys: &Keys, d: &str, created_at: u64) -> Event {
        EventBuilder::new(Kind::from(30023), format!("{}@{}", d, created_at))
            .tag(Tag::custom(TagKind::custom("d"), vec![d.to_string()]))
            .custom_created_at(Timestamp::from(created_at))
            .sign_with_keys(keys)
            .unwrap()
    }

    fn metadata(keys: &Keys, created_at: u64) -> Event {
        EventBuilder::new(Kind::Metadata, "{}")
            .custom_created_at(Timestamp::from(created_at))
            .sign_with_keys(keys)
            .unwrap()
    }

    async fn last_latest(events: Vec<Event>) -> Option<Event> {
        latest(uniq(stream::iter(events))).collect::<Vec<_>>().await.pop()
    }

    #[tokio::test]
    async fn uniq_drops_repeats() {
        let keys = Keys::generate();
        let e = metadata(&keys, 1);
        let out: Vec<Event> = uniq(stream::iter(vec![e.clone(), e.clone(), e.clone()]))
            .collect()
            .await;
        assert_eq!(out, vec![e]);
    }

    #[tokio::test]
    async fn latest_wins_in_either_order() {
        let keys = Keys::generate();
        let e1 = metadata(&keys, 100);
        let e2 = metadata(&keys, 200);

        assert_eq!(last_latest(vec![e1.clone(), e2.clone()]).await, Some(e2.clone()));
        assert_eq!(last_latest(vec![e2.clone(), e1.clone()]).await, Some(e2));
    }

    #[tokio::test]
    async fn latest_only_emits_on_change() {
        let keys = Keys::generate();
        let e1 = metadata(&keys, 100);
        let e2 = metadata(&keys, 200);
        let out: Vec<Event> = latest(stream::iter(vec![e2.clone(), e1, e2.clone()]))
            .collect()
            .await;
        assert_eq!(out, vec![e2]);
    }

    #[tokio::test]
    async fn latest_each_keeps_distinct_identifiers() {
        let keys = Keys::generate();
        let a_old = article(&keys, "a", 100);
        let a_new = article(&keys, "a", 200);
        let b = article(&keys, "b", 150);

        let snapshots: Vec<Vec<Event>> = latest_each(
            uniq(stream::iter(vec![a_new.clone(), b.clone(), a_old, a_new.clone()])),
            by_group,
        )
        .collect()
        .await;

        assert_eq!(snapshots.len(), 3);
        assert_eq!(snapshots.last().unwrap(), &vec![a_new, b]);
    }

    #[test]
    fn latest_each_is_order_independent() {
        let keys = Keys::generate();
        let events = vec![
            article(&keys, "x", 10),
            article(&keys, "x", 30),
            article(&keys, "y", 20),
            article(&keys, "x", 20),
        ];

        let mut forward = LatestEach::new(by_identifier);
        for e in events.iter().cloned() {
            forward.offer(e);
        }
        let mut backward = LatestEach::new(by_identifier);
        for e in events.iter().rev().cloned() {
            backward.offer(e);
        }
        assert_eq!(forward.snapshot(), backward.snapshot());
        assert_eq!(forward.len(), 2);
    }

    #[test]
    fn latest_each_skips_unkeyed() {
        let keys = Keys::generate();
        let mut acc = LatestEach::new(|_: &Event| None::<String>);
        assert!(!acc.offer(metadata(&keys, 1)));
        assert!(acc.is_empty());
    }

    #[test]
    fn by_pubkey_groups_authors() {
        let alice = Keys::generate();
        let bob = Keys::generate();
        let mut acc = LatestEach::new(by_pubkey);
        acc.offer(metadata(&alice, 1));
        acc.offer(metadata(&alice, 2));
        acc.offer(metadata(&bob, 1));
        assert_eq!(acc.len(), 2);
    }
}
