//! Application wiring: one relay manager, one event store over it, and the
//! media-type cache.

use crate::config::Config;
use crate::url_type::UrlTypeCache;
use anyhow::{Context, Result};
use event_store::EventStore;
use nostr_sdk::{Keys, PublicKey};
use nostr_core::relay_list::{relay_list, urls, RELAY_LIST_KIND};
use nostr_core::{Connector, KeysSigner, ReferenceKey, RelayManager, WsConnector};
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tracing::{info, warn};

/// What [`Services::sync_user_relays`] switched to.
pub struct UserRelays {
    /// Relay URLs now in use.
    pub urls: Vec<String>,
    /// The emoji list refresh started by the switch.
    pub emoji_refresh: JoinHandle<()>,
}

pub struct Services {
    pub relays: Arc<RelayManager>,
    pub store: Arc<EventStore>,
    pub url_types: UrlTypeCache,
    cleanup: Option<JoinHandle<()>>,
}

impl Services {
    /// Connect to the configured relays over websockets.
    pub fn open(config: &Config, keys: Option<Keys>) -> Result<Self> {
        let connector = Arc::new(WsConnector::new(config.connection_config()));
        Self::with_connector(config, connector, keys)
    }

    pub fn with_connector(
        config: &Config,
        connector: Arc<dyn Connector>,
        keys: Option<Keys>,
    ) -> Result<Self> {
        let relays = RelayManager::open(config.manager_config(), connector, &config.relays.urls);
        if let Some(keys) = keys {
            relays.set_signer(Some(Arc::new(KeysSigner::new(keys))));
        }

        let store = Arc::new(EventStore::new(relays.clone(), config.cache.clone()));
        let cleanup = store.spawn_cleanup();

        let url_types = UrlTypeCache::new(
            config.media.cache_capacity,
            Duration::from_secs(config.media.probe_timeout_secs),
        )
        .context("Failed to create URL type cache")?;

        Ok(Self {
            relays,
            store,
            url_types,
            cleanup,
        })
    }

    /// Switch to the user's NIP-65 relay list if one can be found, and start
    /// the per-user feeds.
    pub async fn sync_user_relays(&self, pubkey: PublicKey) -> UserRelays {
        let key = ReferenceKey::address(RELAY_LIST_KIND, &pubkey.to_hex(), "");
        let listed = match self.store.fetch(&key).await {
            Some(event) => urls(&relay_list(&event)),
            None => Vec::new(),
        };

        let emoji_refresh = if listed.is_empty() {
            warn!("No relay list found for {}, keeping configured relays", pubkey);
            let current = self.relays.relay_urls();
            self.relays.set_relays(pubkey, &current).await
        } else {
            info!("Using {} relay(s) from the relay list of {}", listed.len(), pubkey);
            self.relays.set_relays(pubkey, &listed).await
        };
        UserRelays {
            urls: self.relays.relay_urls(),
            emoji_refresh,
        }
    }

    pub async fn close(mut self) {
        if let Some(cleanup) = self.cleanup.take() {
            cleanup.abort();
        }
        self.relays.close().await;
    }
}
