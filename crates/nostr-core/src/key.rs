//! Reference keys: the cache identity of "the thing a reference points at".

use crate::error::AddressError;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// An ordered tuple `[tag, value, ...]` such as `["a", "30023:<pubkey>:slug"]`,
/// `["e", <id>]` or `["p", <pubkey>]`.
///
/// Keys are immutable once built. Two keys are the same cache entry exactly
/// when their [`canonical`](ReferenceKey::canonical) strings are equal.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "Vec<String>", into = "Vec<String>")]
pub struct ReferenceKey {
    parts: Vec<String>,
}

impl ReferenceKey {
    /// Build a key from a tag name and its value.
    pub fn new(tag: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            parts: vec![tag.into(), value.into()],
        }
    }

    pub fn profile(pubkey: impl Into<String>) -> Self {
        Self::new("p", pubkey)
    }

    pub fn event(id: impl Into<String>) -> Self {
        Self::new("e", id)
    }

    pub fn address(kind: u16, pubkey: &str, identifier: &str) -> Self {
        Self::new("a", format!("{}:{}:{}", kind, pubkey, identifier))
    }

    /// Tag name (`a`, `e`, `p`, ...).
    pub fn tag(&self) -> &str {
        &self.parts[0]
    }

    pub fn value(&self) -> &str {
        &self.parts[1]
    }

    pub fn as_slice(&self) -> &[String] {
        &self.parts
    }

    /// Compact JSON array form, stable across runs.
    pub fn canonical(&self) -> String {
        serde_json::to_string(&self.parts).unwrap_or_else(|_| self.parts.join("\u{0}"))
    }
}

impl fmt::Display for ReferenceKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.canonical())
    }
}

impl TryFrom<Vec<String>> for ReferenceKey {
    type Error = String;

    fn try_from(parts: Vec<String>) -> Result<Self, Self::Error> {
        if parts.len() < 2 {
            return Err(format!(
                "reference key needs a tag and a value, got {} part(s)",
                parts.len()
            ));
        }
        Ok(Self { parts })
    }
}

impl From<ReferenceKey> for Vec<String> {
    fn from(key: ReferenceKey) -> Self {
        key.parts
    }
}

/// A parsed `kind:pubkey:identifier` coordinate.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Address {
    pub kind: u16,
    pub pubkey: String,
    /// May itself contain `:`; empty when absent.
    pub identifier: String,
}

impl FromStr for Address {
    type Err = AddressError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let mut parts = s.splitn(3, ':');
        let kind = parts
            .next()
            .and_then(|k| k.parse::<u16>().ok())
            .ok_or_else(|| AddressError::InvalidKind(s.to_string()))?;
        let pubkey = parts
            .next()
            .filter(|p| !p.is_empty())
            .ok_or_else(|| AddressError::MissingPubkey(s.to_string()))?;
        let identifier = parts.next().unwrap_or("");

        Ok(Self {
            kind,
            pubkey: pubkey.to_string(),
            identifier: identifier.to_string(),
        })
    }
}

impl fmt::Display for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}:{}", self.kind, self.pubkey, self.identifier)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn canonical_is_compact_json() {
        let key = ReferenceKey::address(30023, "abc", "post");
        assert_eq!(key.canonical(), r#"["a","30023:abc:post"]"#);
        assert_eq!(ReferenceKey::event("ff").canonical(), r#"["e","ff"]"#);
    }

    #[test]
    fn serde_keeps_extra_parts() {
        let key: ReferenceKey =
            serde_json::from_str(r#"["p","abc","wss://relay.example"]"#).unwrap();
        assert_eq!(key.tag(), "p");
        assert_eq!(key.value(), "abc");
        assert_eq!(key.as_slice().len(), 3);
        assert_eq!(
            serde_json::to_string(&key).unwrap(),
            r#"["p","abc","wss://relay.example"]"#
        );
    }

    #[test]
    fn rejects_single_part() {
        assert!(serde_json::from_str::<ReferenceKey>(r#"["p"]"#).is_err());
    }

    #[test]
    fn address_splits_on_first_two_colons() {
        let addr: Address = "30023:abc:part:two:three".parse().unwrap();
        assert_eq!(addr.kind, 30023);
        assert_eq!(addr.pubkey, "abc");
        assert_eq!(addr.identifier, "part:two:three");
    }

    #[test]
    fn address_without_identifier() {
        let addr: Address = "10002:abc".parse().unwrap();
        assert_eq!(addr.identifier, "");

        let addr: Address = "10002:abc:".parse().unwrap();
        assert_eq!(addr.identifier, "");
        assert_eq!(addr.to_string(), "10002:abc:");
    }

    #[test]
    fn address_errors() {
        assert!(matches!(
            "notakind:abc:x".parse::<Address>(),
            Err(AddressError::InvalidKind(_))
        ));
        assert!(matches!(
            "1".parse::<Address>(),
            Err(AddressError::MissingPubkey(_))
        ));
    }
}
