//! Relay seams and the manager that fans every query out to all relays.

use crate::emoji::{self, Emoji, EMOJI_LIST_KIND};
use crate::error::{FetchError, PublishError, RelayError};
use crate::event::LONG_FORM_KIND;
use crate::filter::build_filter;
use crate::key::ReferenceKey;
use crate::operators;
use crate::publish::{PublishReport, Signer, UnsignedEvent};
use crate::resolver::normalize_relay_url;
use crate::state::StateCell;
use crate::subscription::{Subscription, SubscriptionMode};
use async_trait::async_trait;
use futures_util::future::join_all;
use futures_util::{Stream, StreamExt};
use nostr_sdk::prelude::*;
use parking_lot::{Mutex, RwLock};
use std::collections::BTreeMap;
use std::pin::pin;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

const MAX_RESUBSCRIBE_DELAY: Duration = Duration::from_secs(60);

enum FeedEnd {
    Cancelled,
    /// Every relay dropped the subscription.
    Lost { delivered: bool },
}

/// What one relay delivers for one subscription.
#[derive(Debug, Clone)]
pub enum SubscriptionEvent {
    Event(Event),
    /// Stored events are exhausted; live events may follow.
    Eose,
    /// The relay ended the subscription.
    Closed(String),
}

/// A relay's `OK` verdict on a published event.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PublishAck {
    pub accepted: bool,
    pub message: String,
}

/// A single relay connection.
#[async_trait]
pub trait Relay: Send + Sync {
    fn url(&self) -> &str;

    /// Send `REQ` and return the messages routed to `subscription_id`. The
    /// receiver ends when the relay closes the subscription or the connection
    /// drops.
    async fn subscribe(
        &self,
        subscription_id: &str,
        filter: &Filter,
    ) -> Result<mpsc::UnboundedReceiver<SubscriptionEvent>, RelayError>;

    async fn unsubscribe(&self, subscription_id: &str);

    /// Send `EVENT` and wait for the relay's `OK`.
    async fn publish(&self, event: &Event) -> Result<PublishAck, RelayError>;

    async fn shutdown(&self);
}

/// Opens relay connections by URL.
pub trait Connector: Send + Sync {
    fn connect(&self, url: &str) -> Result<Arc<dyn Relay>, RelayError>;
}

/// Where the event store gets events from.
#[async_trait]
pub trait EventSource: Send + Sync {
    /// The single canonical event a key points at.
    async fn fetch_latest(&self, key: &ReferenceKey) -> Result<Event, FetchError>;

    /// Every distinct replaceable group matching a key, newest per group.
    async fn fetch_latest_each(&self, key: &ReferenceKey) -> Result<Vec<Event>, FetchError>;
}

#[derive(Debug, Clone)]
pub struct ManagerConfig {
    /// Upper bound on a fetch; whatever arrived by then is the answer.
    pub fetch_timeout: Duration,
    /// Per-relay wait for an `OK` after publishing.
    pub publish_timeout: Duration,
    /// First wait before a standing feed resubscribes after its relays
    /// dropped it; doubles up to a minute.
    pub resubscribe_delay: Duration,
}

impl Default for ManagerConfig {
    fn default() -> Self {
        Self {
            fetch_timeout: Duration::from_millis(5000),
            publish_timeout: Duration::from_millis(5000),
            resubscribe_delay: Duration::from_secs(1),
        }
    }
}

/// Owns the relay set and runs queries, fetches and publishes across it.
pub struct RelayManager {
    config: ManagerConfig,
    connector: Arc<dyn Connector>,
    relays: RwLock<BTreeMap<String, Arc<dyn Relay>>>,
    signer: RwLock<Option<Arc<dyn Signer>>>,
    emoji_list: StateCell<Vec<Emoji>>,
    articles: StateCell<Vec<Event>>,
    article_feed: Mutex<Option<CancellationToken>>,
}

impl RelayManager {
    pub fn new(config: ManagerConfig, connector: Arc<dyn Connector>) -> Self {
        Self {
            config,
            connector,
            relays: RwLock::new(BTreeMap::new()),
            signer: RwLock::new(None),
            emoji_list: StateCell::default(),
            articles: StateCell::default(),
            article_feed: Mutex::new(None),
        }
    }

    /// Create a manager and connect to `urls`. Unusable URLs are logged and
    /// skipped.
    pub fn open(config: ManagerConfig, connector: Arc<dyn Connector>, urls: &[String]) -> Arc<Self> {
        let manager = Arc::new(Self::new(config, connector));
        for url in urls {
            if let Err(e) = manager.add_relay(url) {
                warn!("Skipping relay {}: {}", url, e);
            }
        }
        info!("Relay manager opened with {} relay(s)", manager.relay_urls().len());
        manager
    }

    /// Stop background feeds and shut every connection down.
    pub async fn close(&self) {
        if let Some(token) = self.article_feed.lock().take() {
            token.cancel();
        }
        let relays: Vec<Arc<dyn Relay>> =
            std::mem::take(&mut *self.relays.write()).into_values().collect();
        for relay in relays {
            relay.shutdown().await;
        }
        info!("Relay manager closed");
    }

    pub fn set_signer(&self, signer: Option<Arc<dyn Signer>>) {
        *self.signer.write() = signer;
    }

    pub fn config(&self) -> &ManagerConfig {
        &self.config
    }

    pub fn relay_urls(&self) -> Vec<String> {
        self.relays.read().keys().cloned().collect()
    }

    fn relays_snapshot(&self) -> Vec<Arc<dyn Relay>> {
        self.relays.read().values().cloned().collect()
    }

    /// Returns false when the relay was already present.
    pub fn add_relay(&self, url: &str) -> Result<bool, RelayError> {
        let url = normalize_relay_url(url);
        let mut relays = self.relays.write();
        if relays.contains_key(&url) {
            return Ok(false);
        }
        let relay = self.connector.connect(&url)?;
        debug!("Added relay {}", url);
        relays.insert(url, relay);
        Ok(true)
    }

    pub async fn remove_relay(&self, url: &str) -> bool {
        let removed = self.relays.write().remove(&normalize_relay_url(url));
        match removed {
            Some(relay) => {
                relay.shutdown().await;
                true
            }
            None => false,
        }
    }

    /// Make the relay set exactly `urls`, keeping connections that survive.
    pub async fn replace_relays(&self, urls: &[String]) {
        let wanted: Vec<String> = urls.iter().map(|u| normalize_relay_url(u)).collect();
        let removed: Vec<Arc<dyn Relay>> = {
            let mut relays = self.relays.write();
            let stale: Vec<String> = relays
                .keys()
                .filter(|url| !wanted.contains(url))
                .cloned()
                .collect();
            stale.iter().filter_map(|url| relays.remove(url)).collect()
        };
        for relay in removed {
            relay.shutdown().await;
        }
        for url in &wanted {
            if let Err(e) = self.add_relay(url) {
                warn!("Skipping relay {}: {}", url, e);
            }
        }
    }

    /// Switch to a user's relays, then refresh that user's custom emoji and
    /// start following their long-form articles in the background. Failures
    /// of the background work are logged only. The returned handle finishes
    /// when the emoji refresh has.
    pub async fn set_relays(
        self: &Arc<Self>,
        pubkey: PublicKey,
        urls: &[String],
    ) -> JoinHandle<()> {
        self.replace_relays(urls).await;
        info!(
            "Using {} relay(s) for {}",
            self.relay_urls().len(),
            pubkey.to_bech32().unwrap_or_else(|_| pubkey.to_hex())
        );

        let manager = Arc::clone(self);
        let emoji_refresh = tokio::spawn(async move {
            if let Err(e) = manager.refresh_emoji_list(pubkey).await {
                warn!("Failed to refresh emoji list: {}", e);
            }
        });
        self.follow_articles(pubkey);
        emoji_refresh
    }

    /// The user's custom emoji, refreshed by [`set_relays`](Self::set_relays).
    pub fn emoji_list(&self) -> &StateCell<Vec<Emoji>> {
        &self.emoji_list
    }

    /// The followed author's articles, newest first, one per `d` tag.
    pub fn articles(&self) -> &StateCell<Vec<Event>> {
        &self.articles
    }

    /// One-shot subscription on every relay; each relay's leg ends at EOSE.
    pub async fn query(&self, filter: &Filter) -> Result<Subscription, FetchError> {
        let deadline = Instant::now() + self.config.fetch_timeout;
        self.open_subscription(filter, SubscriptionMode::UntilEose, deadline)
            .await
    }

    /// Live subscription on every relay. The caller must close it.
    pub async fn subscribe(&self, filter: &Filter) -> Result<Subscription, FetchError> {
        let deadline = Instant::now() + self.config.fetch_timeout;
        self.open_subscription(filter, SubscriptionMode::Standing, deadline)
            .await
    }

    /// Relays that have not accepted the `REQ` by `deadline` count as failed.
    async fn open_subscription(
        &self,
        filter: &Filter,
        mode: SubscriptionMode,
        deadline: Instant,
    ) -> Result<Subscription, FetchError> {
        let relays = self.relays_snapshot();
        if relays.is_empty() {
            return Err(FetchError::NoRelays);
        }
        let subscription = Subscription::open(relays, filter, mode, deadline).await;
        if subscription.all_failed() {
            let reason = subscription.failure_summary();
            subscription.close_by(deadline).await;
            return Err(FetchError::AllRelaysFailed(reason));
        }
        Ok(subscription)
    }

    pub async fn fetch_latest(&self, key: &ReferenceKey) -> Result<Event, FetchError> {
        let filter = build_filter(key)?;
        debug!("Fetching {}", key);
        self.fetch_latest_by_filter(&filter).await
    }

    pub async fn fetch_latest_each(&self, key: &ReferenceKey) -> Result<Vec<Event>, FetchError> {
        let filter = build_filter(key)?;
        debug!("Fetching all of {}", key);
        self.fetch_latest_each_by_filter(&filter).await
    }

    /// The canonical event for `filter`, once every relay has answered or the
    /// fetch timeout passes, whichever comes first. The timeout covers
    /// subscribing and closing too.
    pub async fn fetch_latest_by_filter(&self, filter: &Filter) -> Result<Event, FetchError> {
        let deadline = Instant::now() + self.config.fetch_timeout;
        let mut subscription = self
            .open_subscription(filter, SubscriptionMode::UntilEose, deadline)
            .await?;

        let best = last_before(
            operators::latest(operators::uniq(&mut subscription)),
            deadline,
        )
        .await;
        let empty = empty_result(&subscription);
        subscription.close_by(deadline).await;

        best.ok_or(empty)
    }

    /// The newest event per replaceable group for `filter`.
    pub async fn fetch_latest_each_by_filter(
        &self,
        filter: &Filter,
    ) -> Result<Vec<Event>, FetchError> {
        let deadline = Instant::now() + self.config.fetch_timeout;
        let mut subscription = self
            .open_subscription(filter, SubscriptionMode::UntilEose, deadline)
            .await?;

        let snapshot = last_before(
            operators::latest_each(operators::uniq(&mut subscription), operators::by_group),
            deadline,
        )
        .await;
        let empty = empty_result(&subscription);
        subscription.close_by(deadline).await;

        match snapshot {
            Some(events) if !events.is_empty() => Ok(events),
            _ => Err(empty),
        }
    }

    /// Sign `unsigned` with the configured signer and send it everywhere.
    pub async fn publish(&self, unsigned: UnsignedEvent) -> Result<PublishReport, PublishError> {
        let signer = self.signer.read().clone().ok_or(PublishError::NoSigner)?;
        let event = signer.sign_event(unsigned).await?;
        self.send_event(event).await
    }

    /// Send an already signed event to every relay in parallel. Each relay
    /// gets `publish_timeout` to answer; silence counts as a rejection.
    pub async fn send_event(&self, event: Event) -> Result<PublishReport, PublishError> {
        let relays = self.relays_snapshot();
        if relays.is_empty() {
            return Err(PublishError::NoRelays);
        }

        let wait = self.config.publish_timeout;
        let outcomes = join_all(relays.iter().map(|relay| {
            let event = &event;
            async move {
                let outcome = tokio::time::timeout(wait, relay.publish(event)).await;
                (relay.url().to_string(), outcome)
            }
        }))
        .await;

        let mut report = PublishReport::new(event.clone());
        for (url, outcome) in outcomes {
            match outcome {
                Ok(Ok(ack)) if ack.accepted => {
                    debug!("{} accepted {}", url, event.id);
                    report.accepted.push(url);
                }
                Ok(Ok(ack)) => {
                    warn!("{} rejected {}: {}", url, event.id, ack.message);
                    report.rejected.push((url, ack.message));
                }
                Ok(Err(e)) => {
                    warn!("Failed to publish to {}: {}", url, e);
                    report.rejected.push((url, e.to_string()));
                }
                Err(_) => {
                    warn!("Timed out publishing to {}", url);
                    report.rejected.push((url, "timed out".to_string()));
                }
            }
        }

        info!(
            "Published {} (kind {}): {} accepted, {} rejected",
            event.id,
            event.kind.as_u16(),
            report.accepted.len(),
            report.rejected.len()
        );
        Ok(report)
    }

    /// Reload the custom emoji list (kind 10030) and the emoji sets it
    /// references, then publish the merged result.
    pub async fn refresh_emoji_list(&self, pubkey: PublicKey) -> Result<(), FetchError> {
        let key = ReferenceKey::address(EMOJI_LIST_KIND, &pubkey.to_hex(), "");
        let list = match self.fetch_latest(&key).await {
            Ok(event) => event,
            Err(FetchError::NotFound) => {
                debug!("No emoji list for {}", pubkey.to_hex());
                self.emoji_list.set(Vec::new());
                return Ok(());
            }
            Err(e) => return Err(e),
        };

        let mut emojis = emoji::emoji_tags(&list);
        let sets = join_all(emoji::emoji_set_addresses(&list).into_iter().map(|address| async move {
            let key = ReferenceKey::new("a", address.clone());
            (address, self.fetch_latest(&key).await)
        }))
        .await;
        for (address, result) in sets {
            match result {
                Ok(set) => emojis.extend(emoji::emoji_tags(&set)),
                Err(e) => debug!("Emoji set {} unavailable: {}", address, e),
            }
        }

        let emojis = emoji::dedup_by_shortcode(emojis);
        info!("Loaded {} custom emoji", emojis.len());
        self.emoji_list.set(emojis);
        Ok(())
    }

    /// Follow `pubkey`'s long-form articles, replacing any previous feed.
    pub fn follow_articles(self: &Arc<Self>, pubkey: PublicKey) {
        let token = CancellationToken::new();
        if let Some(previous) = self.article_feed.lock().replace(token.clone()) {
            previous.cancel();
        }
        self.articles.set(Vec::new());

        let manager = Arc::clone(self);
        tokio::spawn(async move {
            if let Err(e) = manager.run_article_feed(pubkey, token).await {
                warn!("Article feed stopped: {}", e);
            }
        });
    }

    /// Keeps a standing subscription open until `token` is cancelled,
    /// resubscribing whenever every relay has dropped it.
    async fn run_article_feed(
        &self,
        pubkey: PublicKey,
        token: CancellationToken,
    ) -> Result<(), FetchError> {
        let key = ReferenceKey::address(LONG_FORM_KIND, &pubkey.to_hex(), "");
        let filter = build_filter(&key)?;
        let mut delay = self.config.resubscribe_delay;

        while !token.is_cancelled() {
            match self.subscribe(&filter).await {
                Ok(subscription) => {
                    debug!("Following articles on subscription {}", subscription.id());
                    match self.pump_articles(subscription, &token).await {
                        FeedEnd::Cancelled => break,
                        FeedEnd::Lost { delivered } => {
                            if delivered {
                                delay = self.config.resubscribe_delay;
                            }
                            debug!("Article feed for {} lost its relays", pubkey.to_hex());
                        }
                    }
                }
                Err(e) => warn!("Failed to follow articles: {}", e),
            }

            tokio::select! {
                _ = token.cancelled() => break,
                _ = tokio::time::sleep(delay) => {}
            }
            delay = (delay * 2).min(MAX_RESUBSCRIBE_DELAY);
        }
        Ok(())
    }

    /// Publish article snapshots until the subscription ends or `token` is
    /// cancelled.
    async fn pump_articles(
        &self,
        mut subscription: Subscription,
        token: &CancellationToken,
    ) -> FeedEnd {
        let mut delivered = false;
        let end = {
            let mut snapshots = pin!(operators::latest_each(
                operators::uniq(&mut subscription),
                operators::by_identifier,
            ));
            loop {
                tokio::select! {
                    _ = token.cancelled() => break FeedEnd::Cancelled,
                    next = snapshots.next() => match next {
                        Some(articles) => {
                            delivered = true;
                            self.articles.set(articles);
                        }
                        None => break FeedEnd::Lost { delivered },
                    },
                }
            }
        };
        subscription.close().await;
        end
    }
}

#[async_trait]
impl EventSource for RelayManager {
    async fn fetch_latest(&self, key: &ReferenceKey) -> Result<Event, FetchError> {
        RelayManager::fetch_latest(self, key).await
    }

    async fn fetch_latest_each(&self, key: &ReferenceKey) -> Result<Vec<Event>, FetchError> {
        RelayManager::fetch_latest_each(self, key).await
    }
}

/// Drain `stream` until it ends or `deadline` passes, keeping the last item.
async fn last_before<S, T>(stream: S, deadline: Instant) -> Option<T>
where
    S: Stream<Item = T>,
{
    let mut stream = pin!(stream);
    let mut last = None;
    loop {
        match tokio::time::timeout_at(deadline, stream.next()).await {
            Ok(Some(item)) => last = Some(item),
            Ok(None) => break,
            Err(_) => {
                debug!("Fetch deadline reached");
                break;
            }
        }
    }
    last
}

fn empty_result(subscription: &Subscription) -> FetchError {
    if subscription.all_failed() {
        FetchError::AllRelaysFailed(subscription.failure_summary())
    } else {
        FetchError::NotFound
    }
}
