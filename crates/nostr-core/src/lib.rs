//! Nostr relay querying for Scrollwork.
//!
//! This crate turns references (NIP-19 identifiers, addresses, ids) into
//! relay queries, runs them across many independent relays, and reduces the
//! unordered, duplicated results to canonical events under replaceable-event
//! rules. It also covers publishing and the small NIP helpers the
//! application needs around that: relay lists, custom emoji and content tags.

pub mod connection;
pub mod emoji;
pub mod error;
pub mod event;
pub mod filter;
pub mod key;
pub mod message;
pub mod operators;
pub mod publish;
pub mod relay;
pub mod relay_list;
pub mod resolver;
pub mod state;
pub mod subscription;
pub mod tags;

// Re-export commonly used types
pub use connection::{ConnectionConfig, ConnectionState, WsConnector, WsRelay};
pub use emoji::Emoji;
pub use error::{AddressError, FetchError, FilterError, PublishError, RelayError, SignerError};
pub use event::GroupKey;
pub use filter::build_filter;
pub use key::{Address, ReferenceKey};
pub use message::{parse_relay_message, RelayMessage};
pub use publish::{KeysSigner, PublishReport, Signer, UnsignedEvent};
pub use relay::{
    Connector, EventSource, ManagerConfig, PublishAck, Relay, RelayManager, SubscriptionEvent,
};
pub use relay_list::{RelayListEntry, RelayUsage};
pub use resolver::{resolve, ResolvedReference};
pub use state::{StateCell, Unsubscribe};
pub use subscription::Subscription;

// Re-export nostr-sdk for convenience
pub use nostr_sdk;
