//! Reference key → relay query filter.

use crate::error::FilterError;
use crate::key::{Address, ReferenceKey};
use nostr_sdk::prelude::*;

/// Build the relay filter that finds whatever `key` points at.
///
/// | tag | filter |
/// |-----|--------|
/// | `p` | the author's profile metadata (kind 0) |
/// | `a` | the addressed kind/author, narrowed by `#d` when an identifier is present |
/// | anything else | the event id itself, limit 1 |
pub fn build_filter(key: &ReferenceKey) -> Result<Filter, FilterError> {
    match key.tag() {
        "p" => {
            let author = parse_pubkey(key.value())?;
            Ok(Filter::new().author(author).kind(Kind::Metadata))
        }
        "a" => {
            let address: Address = key.value().parse()?;
            let author = parse_pubkey(&address.pubkey)?;
            let filter = Filter::new().kind(Kind::from(address.kind)).author(author);
            if address.identifier.is_empty() {
                Ok(filter)
            } else {
                Ok(filter.identifier(address.identifier))
            }
        }
        _ => {
            let id = EventId::from_hex(key.value())
                .map_err(|e| FilterError::EventId(format!("{}: {}", key.value(), e)))?;
            Ok(Filter::new().id(id).limit(1))
        }
    }
}

fn parse_pubkey(hex: &str) -> Result<PublicKey, FilterError> {
    PublicKey::from_hex(hex).map_err(|e| FilterError::PublicKey(format!("{}: {}", hex, e)))
}
