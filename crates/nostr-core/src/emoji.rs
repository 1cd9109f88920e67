//! NIP-30 custom emoji: the user's emoji list (kind 10030) and the emoji
//! sets (kind 30030) it references.

use crate::event;
use nostr_sdk::prelude::*;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;

pub const EMOJI_LIST_KIND: u16 = 10030;
pub const EMOJI_SET_KIND: u16 = 30030;

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Emoji {
    pub shortcode: String,
    pub url: String,
}

impl Emoji {
    pub fn to_tag(&self) -> Vec<String> {
        vec!["emoji".to_string(), self.shortcode.clone(), self.url.clone()]
    }
}

/// `["emoji", shortcode, url]` tags carried by an event.
pub fn emoji_tags(event: &Event) -> Vec<Emoji> {
    event::tags_named(event, "emoji")
        .filter_map(|parts| match parts {
            [_, shortcode, url, ..] if !shortcode.is_empty() && !url.is_empty() => Some(Emoji {
                shortcode: shortcode.clone(),
                url: url.clone(),
            }),
            _ => None,
        })
        .collect()
}

/// Addresses of the emoji sets an emoji list points at.
pub fn emoji_set_addresses(event: &Event) -> Vec<String> {
    let prefix = format!("{}:", EMOJI_SET_KIND);
    event::tags_named(event, "a")
        .filter_map(|parts| parts.get(1))
        .filter(|address| address.starts_with(&prefix))
        .cloned()
        .collect()
}

/// Keep the first emoji for each shortcode.
pub fn dedup_by_shortcode(emojis: Vec<Emoji>) -> Vec<Emoji> {
    let mut seen = HashSet::new();
    emojis
        .into_iter()
        .filter(|emoji| seen.insert(emoji.shortcode.clone()))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tag(parts: &[&str]) -> Tag {
        Tag::custom(
            TagKind::custom(parts[0]),
            parts[1..].iter().map(|p| p.to_string()).collect::<Vec<_>>(),
        )
    }

    #[test]
    fn parses_list_and_set_refs() {
        let keys = Keys::generate();
        let set_ref = format!("30030:{}:cats", keys.public_key().to_hex());
        let event = EventBuilder::new(Kind::from(EMOJI_LIST_KIND), "")
            .tags(vec![
                tag(&["emoji", "blob", "https://e.example/blob.png"]),
                tag(&["emoji", "broken"]),
                tag(&["a", set_ref.as_str()]),
                tag(&["a", "30023:abc:article"]),
            ])
            .sign_with_keys(&keys)
            .unwrap();

        assert_eq!(
            emoji_tags(&event),
            vec![Emoji {
                shortcode: "blob".into(),
                url: "https://e.example/blob.png".into()
            }]
        );
        assert_eq!(emoji_set_addresses(&event), vec![set_ref]);
    }

    #[test]
    fn dedup_keeps_first() {
        let a = Emoji {
            shortcode: "x".into(),
            url: "1".into(),
        };
        let b = Emoji {
            shortcode: "x".into(),
            url: "2".into(),
        };
        assert_eq!(dedup_by_shortcode(vec![a.clone(), b]), vec![a.clone()]);
        assert_eq!(a.to_tag(), vec!["emoji", "x", "1"]);
    }
}
