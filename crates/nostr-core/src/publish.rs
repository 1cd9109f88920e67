//! Unsigned event descriptors, the signing capability and publish results.

use crate::error::SignerError;
use async_trait::async_trait;
use nostr_sdk::prelude::*;
use serde::{Deserialize, Serialize};

/// An event as the application composes it, before signing.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UnsignedEvent {
    pub kind: u16,
    pub content: String,
    #[serde(default)]
    pub tags: Vec<Vec<String>>,
    /// Unix seconds; `None` means "now" at signing time.
    #[serde(default)]
    pub created_at: Option<u64>,
}

impl UnsignedEvent {
    pub fn new(kind: u16, content: impl Into<String>) -> Self {
        Self {
            kind,
            content: content.into(),
            tags: Vec::new(),
            created_at: None,
        }
    }

    pub fn tag(mut self, tag: Vec<String>) -> Self {
        self.tags.push(tag);
        self
    }

    pub fn tags(mut self, tags: impl IntoIterator<Item = Vec<String>>) -> Self {
        self.tags.extend(tags);
        self
    }

    pub fn created_at(mut self, secs: u64) -> Self {
        self.created_at = Some(secs);
        self
    }

    pub fn into_builder(self) -> EventBuilder {
        let tags: Vec<Tag> = self
            .tags
            .into_iter()
            .filter_map(|parts| {
                let mut parts = parts.into_iter();
                let name = parts.next()?;
                Some(Tag::custom(TagKind::custom(name), parts.collect::<Vec<_>>()))
            })
            .collect();

        let builder = EventBuilder::new(Kind::from(self.kind), self.content).tags(tags);
        match self.created_at {
            Some(secs) => builder.custom_created_at(Timestamp::from(secs)),
            None => builder,
        }
    }
}

/// Something that can turn an [`UnsignedEvent`] into a signed [`Event`].
#[async_trait]
pub trait Signer: Send + Sync {
    async fn public_key(&self) -> Result<PublicKey, SignerError>;

    async fn sign_event(&self, unsigned: UnsignedEvent) -> Result<Event, SignerError>;
}

/// Signs with a local key pair.
#[derive(Clone)]
pub struct KeysSigner {
    keys: Keys,
}

impl KeysSigner {
    pub fn new(keys: Keys) -> Self {
        Self { keys }
    }
}

#[async_trait]
impl Signer for KeysSigner {
    async fn public_key(&self) -> Result<PublicKey, SignerError> {
        Ok(self.keys.public_key())
    }

    async fn sign_event(&self, unsigned: UnsignedEvent) -> Result<Event, SignerError> {
        unsigned
            .into_builder()
            .sign_with_keys(&self.keys)
            .map_err(|e| SignerError(e.to_string()))
    }
}

/// Per-relay outcome of one publish.
#[derive(Debug, Clone)]
pub struct PublishReport {
    pub event: Event,
    /// Relays that answered `OK true`.
    pub accepted: Vec<String>,
    /// Relays that refused, failed or timed out, with the reason.
    pub rejected: Vec<(String, String)>,
}

impl PublishReport {
    pub fn new(event: Event) -> Self {
        Self {
            event,
            accepted: Vec::new(),
            rejected: Vec::new(),
        }
    }

    /// At least one relay stored the event.
    pub fn is_accepted(&self) -> bool {
        !self.accepted.is_empty()
    }
}
