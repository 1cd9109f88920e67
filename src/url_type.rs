//! Media-type detection for URLs found in event content.

use lru::LruCache;
use parking_lot::Mutex;
use regex::Regex;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::num::NonZeroUsize;
use std::sync::LazyLock;
use std::time::Duration;
use tracing::debug;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum UrlType {
    Text,
    Image,
    Audio,
    Movie,
    #[serde(rename = "3D")]
    Model,
    Url,
}

impl fmt::Display for UrlType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            UrlType::Text => "text",
            UrlType::Image => "image",
            UrlType::Audio => "audio",
            UrlType::Movie => "movie",
            UrlType::Model => "3D",
            UrlType::Url => "url",
        };
        f.write_str(name)
    }
}

static EXTENSIONS: LazyLock<Vec<(UrlType, Regex)>> = LazyLock::new(|| {
    [
        (UrlType::Image, r"(?i)\.(jpg|jpeg|png|gif|webp|bmp|svg|ico)$"),
        (UrlType::Audio, r"(?i)\.(mp3|wav|ogg|flac|aac|m4a)$"),
        (UrlType::Movie, r"(?i)\.(mp4|avi|mov|mkv|webm|flv|wmv)$"),
        (UrlType::Model, r"(?i)\.(obj|fbx|gltf|glb|ply|stl|3ds)$"),
    ]
    .into_iter()
    .map(|(kind, pattern)| (kind, Regex::new(pattern).expect("valid extension regex")))
    .collect()
});

static CONTENT_TYPES: LazyLock<Vec<(UrlType, Regex)>> = LazyLock::new(|| {
    [
        (UrlType::Image, r"^image/"),
        (UrlType::Audio, r"^audio/"),
        (UrlType::Movie, r"^video/"),
        (UrlType::Model, r"^model/"),
        (UrlType::Text, r"^text/|application/(json|xml|javascript|pdf)"),
    ]
    .into_iter()
    .map(|(kind, pattern)| (kind, Regex::new(pattern).expect("valid content type regex")))
    .collect()
});

/// Classify by file extension alone.
pub fn type_from_extension(url: &str) -> Option<UrlType> {
    EXTENSIONS
        .iter()
        .find(|(_, pattern)| pattern.is_match(url))
        .map(|(kind, _)| *kind)
}

pub fn type_from_content_type(content_type: &str) -> Option<UrlType> {
    let content_type = content_type.to_lowercase();
    CONTENT_TYPES
        .iter()
        .find(|(_, pattern)| pattern.is_match(&content_type))
        .map(|(kind, _)| *kind)
}

/// Detects and memoizes URL media types. Unknown or unreachable URLs are
/// classified as [`UrlType::Url`].
pub struct UrlTypeCache {
    client: Client,
    cache: Mutex<LruCache<String, UrlType>>,
}

impl UrlTypeCache {
    pub fn new(capacity: usize, probe_timeout: Duration) -> anyhow::Result<Self> {
        let capacity = NonZeroUsize::new(capacity)
            .ok_or_else(|| anyhow::anyhow!("URL type cache capacity must be non-zero"))?;
        let client = Client::builder().timeout(probe_timeout).build()?;
        Ok(Self {
            client,
            cache: Mutex::new(LruCache::new(capacity)),
        })
    }

    /// Cached type for `url`, if it was detected before.
    pub fn get(&self, url: &str) -> Option<UrlType> {
        self.cache.lock().get(url).copied()
    }

    /// Forget one URL or, with `None`, everything.
    pub fn clear(&self, url: Option<&str>) {
        let mut cache = self.cache.lock();
        match url {
            Some(url) => {
                cache.pop(url);
            }
            None => cache.clear(),
        }
    }

    pub fn len(&self) -> usize {
        self.cache.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.cache.lock().is_empty()
    }

    /// Extension first, then the `Content-Type` of a HEAD request.
    pub async fn detect(&self, url: &str) -> UrlType {
        if let Some(kind) = self.get(url) {
            return kind;
        }

        let kind = match type_from_extension(url) {
            Some(kind) => kind,
            None => self.probe(url).await.unwrap_or(UrlType::Url),
        };
        self.cache.lock().put(url.to_string(), kind);
        kind
    }

    async fn probe(&self, url: &str) -> Option<UrlType> {
        let response = match self.client.head(url).send().await {
            Ok(response) => response,
            Err(e) => {
                debug!("HEAD {} failed: {}", url, e);
                return None;
            }
        };
        let content_type = response
            .headers()
            .get(reqwest::header::CONTENT_TYPE)?
            .to_str()
            .ok()?;
        type_from_content_type(content_type)
    }
}
