//! NIP-65 relay lists (kind 10002).

use crate::event;
use crate::resolver::normalize_relay_url;
use nostr_sdk::prelude::*;

pub const RELAY_LIST_KIND: u16 = 10002;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RelayUsage {
    Read,
    Write,
    Both,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RelayListEntry {
    pub url: String,
    pub usage: RelayUsage,
}

impl RelayListEntry {
    pub fn is_read(&self) -> bool {
        matches!(self.usage, RelayUsage::Read | RelayUsage::Both)
    }

    pub fn is_write(&self) -> bool {
        matches!(self.usage, RelayUsage::Write | RelayUsage::Both)
    }
}

/// `["r", url, "read"|"write"?]` tags; entries without a websocket scheme
/// are dropped and duplicates collapse to their first occurrence.
pub fn relay_list(event: &Event) -> Vec<RelayListEntry> {
    let mut entries: Vec<RelayListEntry> = Vec::new();
    for parts in event::tags_named(event, "r") {
        let Some(url) = parts.get(1) else { continue };
        if !url.starts_with("wss://") && !url.starts_with("ws://") {
            continue;
        }
        let url = normalize_relay_url(url);
        if entries.iter().any(|e| e.url == url) {
            continue;
        }
        let usage = match parts.get(2).map(String::as_str) {
            Some("read") => RelayUsage::Read,
            Some("write") => RelayUsage::Write,
            _ => RelayUsage::Both,
        };
        entries.push(RelayListEntry { url, usage });
    }
    entries
}

pub fn urls(entries: &[RelayListEntry]) -> Vec<String> {
    entries.iter().map(|e| e.url.clone()).collect()
}
