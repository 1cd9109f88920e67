//! Scrollwork: fetch, deduplicate and cache Nostr events across many relays.
//!
//! The protocol work lives in `nostr-core` and the cache in `event-store`;
//! this crate adds configuration, logging, media-type probing and the
//! command-line front end.

pub mod cli;
pub mod config;
pub mod logging;
pub mod services;
pub mod url_type;

pub use config::Config;
pub use services::{Services, UserRelays};
pub use url_type::{UrlType, UrlTypeCache};
