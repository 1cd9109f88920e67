//! Helpers over signed events: kind classes, tag lookup and the
//! replaceable-event grouping rules.

use nostr_sdk::prelude::*;
use std::cmp::Ordering;

pub const METADATA_KIND: u16 = 0;
pub const CONTACTS_KIND: u16 = 3;
pub const LONG_FORM_KIND: u16 = 30023;

/// Kinds 0, 3 and 10000..20000 keep one event per author.
pub fn is_replaceable_kind(kind: u16) -> bool {
    kind == METADATA_KIND || kind == CONTACTS_KIND || (10000..20000).contains(&kind)
}

/// Kinds 30000..40000 keep one event per author and `d` tag.
pub fn is_parameterized_replaceable_kind(kind: u16) -> bool {
    (30000..40000).contains(&kind)
}

/// First value of the first tag named `name`.
pub fn tag_value<'a>(event: &'a Event, name: &str) -> Option<&'a str> {
    event.tags.iter().find_map(|tag| {
        let parts = tag.as_slice();
        if parts.first().map(String::as_str) == Some(name) {
            parts.get(1).map(String::as_str)
        } else {
            None
        }
    })
}

/// All tags named `name`, as raw string slices.
pub fn tags_named<'a>(event: &'a Event, name: &'a str) -> impl Iterator<Item = &'a [String]> {
    event
        .tags
        .iter()
        .map(|tag| tag.as_slice())
        .filter(move |parts| parts.first().map(String::as_str) == Some(name))
}

/// The `d` tag; missing counts as the empty identifier.
pub fn identifier(event: &Event) -> &str {
    tag_value(event, "d").unwrap_or("")
}

/// The unit inside which only the newest event survives.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum GroupKey {
    Replaceable {
        kind: u16,
        pubkey: String,
    },
    Parameterized {
        kind: u16,
        pubkey: String,
        identifier: String,
    },
    Id(String),
}

pub fn group_key(event: &Event) -> GroupKey {
    let kind = event.kind.as_u16();
    if is_replaceable_kind(kind) {
        GroupKey::Replaceable {
            kind,
            pubkey: event.pubkey.to_hex(),
        }
    } else if is_parameterized_replaceable_kind(kind) {
        GroupKey::Parameterized {
            kind,
            pubkey: event.pubkey.to_hex(),
            identifier: identifier(event).to_string(),
        }
    } else {
        GroupKey::Id(event.id.to_hex())
    }
}

/// Total order used for latest-wins: newer first, then smaller id first.
pub fn recency(a: &Event, b: &Event) -> Ordering {
    b.created_at
        .cmp(&a.created_at)
        .then_with(|| a.id.to_hex().cmp(&b.id.to_hex()))
}

/// Whether `candidate` should replace `current`.
pub fn supersedes(candidate: &Event, current: &Event) -> bool {
    recency(candidate, current) == Ordering::Less
}

#[cfg(test)]
mod tests {
    use super::*;

    fn signed(keys: &Keys, kind: u16, created_at: u64, tags: Vec<Tag>) -> Event {
        EventBuilder::new(Kind::from(kind), "")
            .tags(tags)
            .custom_created_at(Timestamp::from(created_at))
            .sign_with_keys(keys)
            .unwrap()
    }

    fn d(value: &str) -> Tag {
        Tag::custom(TagKind::custom("d"), vec![value.to_string()])
    }

    #[test]
    fn kind_classes() {
        assert!(is_replaceable_kind(0));
        assert!(is_replaceable_kind(3));
        assert!(is_replaceable_kind(10002));
        assert!(!is_replaceable_kind(1));
        assert!(!is_replaceable_kind(20000));
        assert!(is_parameterized_replaceable_kind(30023));
        assert!(!is_parameterized_replaceable_kind(40000));
    }

    #[test]
    fn group_keys() {
        let keys = Keys::generate();
        let note = signed(&keys, 1, 10, vec![]);
        assert_eq!(group_key(&note), GroupKey::Id(note.id.to_hex()));

        let profile = signed(&keys, 0, 10, vec![]);
        assert_eq!(
            group_key(&profile),
            GroupKey::Replaceable {
                kind: 0,
                pubkey: keys.public_key().to_hex()
            }
        );

        let with_d = signed(&keys, 30023, 10, vec![d("slug")]);
        let without_d = signed(&keys, 30023, 10, vec![]);
        assert_eq!(
            group_key(&with_d),
            GroupKey::Parameterized {
                kind: 30023,
                pubkey: keys.public_key().to_hex(),
                identifier: "slug".into()
            }
        );
        assert_eq!(
            group_key(&without_d),
            GroupKey::Parameterized {
                kind: 30023,
                pubkey: keys.public_key().to_hex(),
                identifier: String::new()
            }
        );
    }

    #[test]
    fn newer_supersedes_and_ties_pick_smaller_id() {
        let keys = Keys::generate();
        let old = signed(&keys, 0, 100, vec![]);
        let new = signed(&keys, 0, 200, vec![]);
        assert!(supersedes(&new, &old));
        assert!(!supersedes(&old, &new));

        let a = signed(&keys, 1, 300, vec![]);
        let b = EventBuilder::new(Kind::TextNote, "other")
            .custom_created_at(Timestamp::from(300))
            .sign_with_keys(&keys)
            .unwrap();
        let (small, large) = if a.id.to_hex() < b.id.to_hex() { (a, b) } else { (b, a) };
        assert!(supersedes(&small, &large));
        assert!(!supersedes(&large, &small));
        assert!(!supersedes(&small, &small));
    }

    #[test]
    fn tag_lookup() {
        let keys = Keys::generate();
        let event = signed(
            &keys,
            10030,
            1,
            vec![
                Tag::custom(TagKind::custom("emoji"), vec!["a".to_string(), "u1".to_string()]),
                Tag::custom(TagKind::custom("emoji"), vec!["b".to_string(), "u2".to_string()]),
            ],
        );
        assert_eq!(tag_value(&event, "emoji"), Some("a"));
        assert_eq!(tags_named(&event, "emoji").count(), 2);
        assert_eq!(identifier(&event), "");
    }
}
