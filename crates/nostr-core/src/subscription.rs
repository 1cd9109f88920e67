//! A single logical subscription spread over several relays.

use crate::relay::{Relay, SubscriptionEvent};
use futures_util::future::join_all;
use futures_util::Stream;
use nostr_sdk::prelude::*;
use parking_lot::Mutex;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::time::Instant;
use tracing::{debug, warn};

const CLOSE_TIMEOUT: Duration = Duration::from_secs(2);

/// Generate a short random subscription id.
pub fn generate_subscription_id() -> String {
    let id = uuid::Uuid::new_v4().simple().to_string();
    id[..16].to_string()
}

/// How long each relay's leg of a subscription stays open.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SubscriptionMode {
    /// Stop listening to a relay once it signals end of stored events.
    UntilEose,
    /// Keep receiving live events until closed.
    Standing,
}

#[derive(Debug, Default)]
struct Outcome {
    relays: usize,
    failures: Vec<(String, String)>,
}

/// Events from every relay merged into one stream, in arrival order.
///
/// The stream ends when every relay leg has finished. Dropping the handle
/// stops delivery but leaves the relays subscribed; call
/// [`close`](Subscription::close) to send `CLOSE` everywhere.
pub struct Subscription {
    id: String,
    relays: Vec<Arc<dyn Relay>>,
    events: mpsc::UnboundedReceiver<Event>,
    outcome: Arc<Mutex<Outcome>>,
}

impl Subscription {
    /// Send `REQ` to every relay. Returns once one relay has accepted the
    /// subscription or every relay has failed; relays that have not answered
    /// by `deadline` count as failed.
    pub(crate) async fn open(
        relays: Vec<Arc<dyn Relay>>,
        filter: &Filter,
        mode: SubscriptionMode,
        deadline: Instant,
    ) -> Self {
        let id = generate_subscription_id();
        let (tx, events) = mpsc::unbounded_channel();
        let outcome = Arc::new(Mutex::new(Outcome {
            relays: relays.len(),
            failures: Vec::new(),
        }));

        let (opened_tx, mut opened) = mpsc::unbounded_channel();
        for relay in &relays {
            tokio::spawn(open_leg(
                Arc::clone(relay),
                id.clone(),
                filter.clone(),
                Leg {
                    mode,
                    deadline,
                    events: tx.clone(),
                    opened: opened_tx.clone(),
                    outcome: Arc::clone(&outcome),
                },
            ));
        }
        drop(opened_tx);

        while let Some(live) = opened.recv().await {
            if live {
                break;
            }
        }
        debug!("Opened subscription {} on {} relay(s)", id, relays.len());

        Self {
            id,
            relays,
            events,
            outcome,
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn relay_count(&self) -> usize {
        self.relays.len()
    }

    /// Relays whose leg ended in an error, with the reason.
    pub fn failures(&self) -> Vec<(String, String)> {
        self.outcome.lock().failures.clone()
    }

    /// Every relay failed (and there was at least one).
    pub fn all_failed(&self) -> bool {
        let outcome = self.outcome.lock();
        outcome.relays > 0 && outcome.failures.len() >= outcome.relays
    }

    pub fn failure_summary(&self) -> String {
        self.failures()
            .iter()
            .map(|(url, reason)| format!("{}: {}", url, reason))
            .collect::<Vec<_>>()
            .join("; ")
    }

    /// Send `CLOSE` to every relay.
    pub async fn close(self) {
        self.close_by(Instant::now() + CLOSE_TIMEOUT).await;
    }

    /// Send `CLOSE` to every relay in parallel, giving up on relays that have
    /// not taken it by `deadline`.
    pub(crate) async fn close_by(mut self, deadline: Instant) {
        self.events.close();
        let unsubscribed = join_all(self.relays.iter().map(|relay| relay.unsubscribe(&self.id)));
        if tokio::time::timeout_at(deadline, unsubscribed).await.is_err() {
            warn!("Timed out closing subscription {}", self.id);
        }
        debug!("Closed subscription {}", self.id);
    }
}

impl Stream for Subscription {
    type Item = Event;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Event>> {
        self.events.poll_recv(cx)
    }
}

struct Leg {
    mode: SubscriptionMode,
    deadline: Instant,
    events: mpsc::UnboundedSender<Event>,
    /// Told whether the relay accepted the `REQ`.
    opened: mpsc::UnboundedSender<bool>,
    outcome: Arc<Mutex<Outcome>>,
}

async fn open_leg(relay: Arc<dyn Relay>, id: String, filter: Filter, leg: Leg) {
    let url = relay.url().to_string();
    let subscribed = tokio::time::timeout_at(leg.deadline, relay.subscribe(&id, &filter)).await;
    let reason = match subscribed {
        Ok(Ok(rx)) => {
            // Closed while the REQ was in flight.
            if leg.events.is_closed() {
                relay.unsubscribe(&id).await;
                return;
            }
            let _ = leg.opened.send(true);
            drop(leg.opened);
            forward(url, rx, leg.events, leg.mode, leg.outcome).await;
            return;
        }
        Ok(Err(e)) => e.to_string(),
        Err(_) => "timed out".to_string(),
    };
    warn!("Failed to subscribe on {}: {}", url, reason);
    leg.outcome.lock().failures.push((url, reason));
    let _ = leg.opened.send(false);
}

async fn forward(
    url: String,
    mut rx: mpsc::UnboundedReceiver<SubscriptionEvent>,
    tx: mpsc::UnboundedSender<Event>,
    mode: SubscriptionMode,
    outcome: Arc<Mutex<Outcome>>,
) {
    while let Some(message) = rx.recv().await {
        match message {
            SubscriptionEvent::Event(event) => {
                if tx.send(event).is_err() {
                    return;
                }
            }
            SubscriptionEvent::Eose => {
                if mode == SubscriptionMode::UntilEose {
                    return;
                }
            }
            SubscriptionEvent::Closed(reason) => {
                debug!("{} closed the subscription: {}", url, reason);
                outcome.lock().failures.push((url, reason));
                return;
            }
        }
    }
    if !tx.is_closed() {
        outcome.lock().failures.push((url, "connection closed".to_string()));
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn subscription_ids_are_unique() {
        let a = generate_subscription_id();
        let b = generate_subscription_id();
        assert_eq!(a.len(), 16);
        assert_ne!(a, b);
    }
}
