//! Read-through cache of Nostr events for Scrollwork.
//!
//! The store sits between the application and the relay layer: lookups are
//! answered from memory when possible, and otherwise delegated to an
//! [`EventSource`](nostr_core::EventSource) with per-key loading and error
//! state that UI code can observe.

pub mod config;
pub mod store;

pub use config::StoreConfig;
pub use store::{CachedValue, Entries, EntryState, EventStore};
