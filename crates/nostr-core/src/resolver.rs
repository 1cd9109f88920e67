//! NIP-19 identifiers ↔ reference keys.

use crate::key::ReferenceKey;
use nostr_sdk::prelude::*;
use tracing::debug;

/// A decoded identifier: the key to look up plus any relay hints it carried.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedReference {
    pub key: ReferenceKey,
    pub relays: Vec<String>,
}

impl ResolvedReference {
    fn bare(key: ReferenceKey) -> Self {
        Self {
            key,
            relays: Vec::new(),
        }
    }
}

/// Decode `npub`, `nprofile`, `note`, `nevent` or `naddr`, with or without a
/// `nostr:` prefix. Anything else (including secret keys) yields `None`.
pub fn resolve(identifier: &str) -> Option<ResolvedReference> {
    let trimmed = identifier.trim();
    let bech32 = trimmed.strip_prefix("nostr:").unwrap_or(trimmed);

    let decoded = match Nip19::from_bech32(bech32) {
        Ok(decoded) => decoded,
        Err(e) => {
            debug!("Failed to decode {:?}: {}", bech32, e);
            return None;
        }
    };

    match decoded {
        Nip19::Pubkey(public_key) => Some(ResolvedReference::bare(ReferenceKey::profile(
            public_key.to_hex(),
        ))),
        Nip19::Profile(profile) => Some(ResolvedReference {
            key: ReferenceKey::profile(profile.public_key.to_hex()),
            relays: relay_strings(&profile.relays),
        }),
        Nip19::EventId(id) => Some(ResolvedReference::bare(ReferenceKey::event(id.to_hex()))),
        Nip19::Event(event) => Some(ResolvedReference {
            key: ReferenceKey::event(event.event_id.to_hex()),
            relays: relay_strings(&event.relays),
        }),
        Nip19::Coordinate(naddr) => Some(ResolvedReference {
            key: ReferenceKey::address(
                naddr.coordinate.kind.as_u16(),
                &naddr.coordinate.public_key.to_hex(),
                &naddr.coordinate.identifier,
            ),
            relays: relay_strings(&naddr.relays),
        }),
        _ => {
            debug!("Ignoring unsupported identifier type: {}", bech32);
            None
        }
    }
}

/// Encode a key back into its shareable form. Profiles and events without
/// relay hints use the short `npub`/`note` forms.
pub fn encode(key: &ReferenceKey, relays: &[String]) -> Option<String> {
    let hints: Vec<RelayUrl> = relays
        .iter()
        .filter_map(|url| RelayUrl::parse(url).ok())
        .collect();

    match key.tag() {
        "p" => {
            let public_key = PublicKey::from_hex(key.value()).ok()?;
            if hints.is_empty() {
                public_key.to_bech32().ok()
            } else {
                Nip19Profile {
                    public_key,
                    relays: hints,
                }
                .to_bech32()
                .ok()
            }
        }
        "e" => {
            let event_id = EventId::from_hex(key.value()).ok()?;
            if hints.is_empty() {
                event_id.to_bech32().ok()
            } else {
                Nip19Event {
                    event_id,
                    author: None,
                    kind: None,
                    relays: hints,
                }
                .to_bech32()
                .ok()
            }
        }
        "a" => {
            let address: crate::key::Address = key.value().parse().ok()?;
            let coordinate = Coordinate {
                kind: Kind::from(address.kind),
                public_key: PublicKey::from_hex(&address.pubkey).ok()?,
                identifier: address.identifier,
            };
            Nip19Coordinate {
                coordinate,
                relays: hints,
            }
            .to_bech32()
            .ok()
        }
        _ => None,
    }
}

/// The relay hint to write into a tag: prefer `wss://`, then anything that
/// is not plain `ws://`, then whatever is first.
pub fn pick_relay(relays: &[String]) -> String {
    relays
        .iter()
        .find(|r| r.starts_with("wss://"))
        .or_else(|| relays.iter().find(|r| !r.starts_with("ws://")))
        .or_else(|| relays.first())
        .cloned()
        .unwrap_or_default()
}

/// Trim trailing slashes so `wss://a/` and `wss://a` are one relay.
pub fn normalize_relay_url(url: &str) -> String {
    url.trim().trim_end_matches('/').to_string()
}

fn relay_strings(relays: &[RelayUrl]) -> Vec<String> {
    relays
        .iter()
        .map(|r| normalize_relay_url(&r.to_string()))
        .collect()
}
