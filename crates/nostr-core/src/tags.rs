//! Tags derived from draft content before publishing: `nostr:` references,
//! hashtags, links and custom emoji shortcodes.

use crate::emoji::{self, Emoji};
use crate::resolver::{self, pick_relay};
use nostr_sdk::prelude::*;
use regex::Regex;
use std::collections::{HashMap, HashSet};
use std::sync::LazyLock;

static NOSTR_REFERENCE_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"nostr:((?:npub1|note1|nevent1|nprofile1|naddr1)[a-z0-9]+)")
        .expect("valid nostr reference regex")
});

static HASHTAG_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\B#([a-zA-Z0-9_]+)").expect("valid hashtag regex"));

static URL_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"https?://[^\s)]+").expect("valid url regex"));

static SHORTCODE_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r":([a-zA-Z0-9_]+):").expect("valid shortcode regex"));

/// `p`/`e`/`a` tags for every decodable `nostr:` reference, each with a
/// relay hint (possibly empty).
pub fn reference_tags(content: &str) -> Vec<Vec<String>> {
    NOSTR_REFERENCE_RE
        .captures_iter(content)
        .filter_map(|caps| resolver::resolve(&caps[1]))
        .map(|resolved| {
            vec![
                resolved.key.tag().to_string(),
                resolved.key.value().to_string(),
                pick_relay(&resolved.relays),
            ]
        })
        .collect()
}

/// Lower-cased `t` tags, first occurrence only. `#tag;` is an HTML entity,
/// not a hashtag.
pub fn hashtag_tags(content: &str) -> Vec<Vec<String>> {
    let mut seen = HashSet::new();
    HASHTAG_RE
        .captures_iter(content)
        .filter(|caps| {
            let end = caps.get(0).map(|m| m.end()).unwrap_or(0);
            !content[end..].starts_with(';')
        })
        .map(|caps| caps[1].to_lowercase())
        .filter(|tag| seen.insert(tag.clone()))
        .map(|tag| vec!["t".to_string(), tag])
        .collect()
}

/// `r` tags for http(s) links, with markdown's closing `)`/`]` trimmed.
pub fn link_tags(content: &str) -> Vec<Vec<String>> {
    let mut seen = HashSet::new();
    URL_RE
        .find_iter(content)
        .map(|m| m.as_str().trim_end_matches([')', ']']).to_string())
        .filter(|url| seen.insert(url.clone()))
        .map(|url| vec!["r".to_string(), url])
        .collect()
}

/// `emoji` tags for `:shortcode:` found in the user's emoji list, falling
/// back to the emoji carried by a previous revision of the event.
pub fn emoji_tags(content: &str, emojis: &[Emoji], previous: Option<&Event>) -> Vec<Vec<String>> {
    let known: HashMap<&str, &str> = emojis
        .iter()
        .map(|e| (e.shortcode.as_str(), e.url.as_str()))
        .collect();
    let previous: Vec<Emoji> = previous.map(emoji::emoji_tags).unwrap_or_default();
    let fallback: HashMap<&str, &str> = previous
        .iter()
        .map(|e| (e.shortcode.as_str(), e.url.as_str()))
        .collect();

    let mut seen = HashSet::new();
    SHORTCODE_RE
        .captures_iter(content)
        .filter_map(|caps| caps.get(1).map(|m| m.as_str()))
        .filter(|shortcode| seen.insert(*shortcode))
        .filter_map(|shortcode| {
            let url = known.get(shortcode).or_else(|| fallback.get(shortcode))?;
            Some(vec![
                "emoji".to_string(),
                shortcode.to_string(),
                url.to_string(),
            ])
        })
        .collect()
}

/// Every derived tag, references first.
pub fn content_tags(content: &str, emojis: &[Emoji], previous: Option<&Event>) -> Vec<Vec<String>> {
    let mut tags = reference_tags(content);
    tags.extend(emoji_tags(content, emojis, previous));
    tags.extend(hashtag_tags(content));
    tags.extend(link_tags(content));
    tags
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::key::ReferenceKey;

    #[test]
    fn references_become_tags() {
        let pk = Keys::generate().public_key();
        let npub = pk.to_bech32().unwrap();
        let naddr = resolver::encode(
            &ReferenceKey::address(30023, &pk.to_hex(), "post"),
            &["ws://plain.example".to_string(), "wss://secure.example".to_string()],
        )
        .unwrap();
        let content = format!("hi nostr:{} read nostr:{} and nostr:npub1bogus", npub, naddr);

        let tags = reference_tags(&content);
        assert_eq!(tags.len(), 2);
        assert_eq!(tags[0], vec!["p".to_string(), pk.to_hex(), String::new()]);
        assert_eq!(tags[1][0], "a");
        assert_eq!(tags[1][1], format!("30023:{}:post", pk.to_hex()));
        assert_eq!(tags[1][2], "wss://secure.example");
    }

    #[test]
    fn hashtags() {
        let tags = hashtag_tags("#Rust and #rust, #nostr_dev but not a#b or &#x27; #amp;");
        assert_eq!(tags, vec![vec!["t", "rust"], vec!["t", "nostr_dev"]]);
    }

    #[test]
    fn links_trim_markdown() {
        let tags = link_tags(
            "see [site](https://example.com/a) and https://example.com/a and http://x.example/b]",
        );
        assert_eq!(
            tags,
            vec![vec!["r", "https://example.com/a"], vec!["r", "http://x.example/b"]]
        );
    }

    #[test]
    fn emoji_from_list_then_previous() {
        let emojis = vec![Emoji {
            shortcode: "blob".into(),
            url: "https://e.example/blob.png".into(),
        }];
        let previous = EventBuilder::text_note("old")
            .tag(Tag::custom(
                TagKind::custom("emoji"),
                vec!["cat".to_string(), "https://e.example/cat.png".to_string()],
            ))
            .sign_with_keys(&Keys::generate())
            .unwrap();

        let tags = emoji_tags(":blob: :cat: :blob: :unknown:", &emojis, Some(&previous));
        assert_eq!(
            tags,
            vec![
                vec!["emoji", "blob", "https://e.example/blob.png"],
                vec!["emoji", "cat", "https://e.example/cat.png"],
            ]
        );
        assert!(emoji_tags(":cat:", &emojis, None).is_empty());
    }

    #[test]
    fn content_tags_combines_all() {
        let tags = content_tags("#hello https://example.com", &[], None);
        assert_eq!(tags, vec![vec!["t", "hello"], vec!["r", "https://example.com"]]);
    }
}
