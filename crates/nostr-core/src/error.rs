//! Error types shared across the relay and fetch layers.

use thiserror::Error;

/// Transport-level failures for a single relay.
#[derive(Debug, Error)]
pub enum RelayError {
    #[error("WebSocket error: {0}")]
    WebSocket(String),

    #[error("Invalid relay URL: {0}")]
    InvalidUrl(String),

    #[error("Relay disconnected: {0}")]
    Disconnected(String),

    #[error("Timeout: {0}")]
    Timeout(String),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// A reference key could not be turned into a query filter.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum FilterError {
    #[error("invalid address: {0}")]
    Address(#[from] AddressError),

    #[error("invalid public key: {0}")]
    PublicKey(String),

    #[error("invalid event id: {0}")]
    EventId(String),
}

/// A `kind:pubkey:identifier` string could not be parsed.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum AddressError {
    #[error("missing public key in {0:?}")]
    MissingPubkey(String),

    #[error("invalid kind in {0:?}")]
    InvalidKind(String),
}

/// Why a fetch produced no event.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum FetchError {
    #[error("event not found")]
    NotFound,

    #[error("all relays failed: {0}")]
    AllRelaysFailed(String),

    #[error("invalid filter: {0}")]
    InvalidFilter(#[from] FilterError),

    #[error("no relays configured")]
    NoRelays,
}

#[derive(Debug, Error, Clone, PartialEq, Eq)]
#[error("signer error: {0}")]
pub struct SignerError(pub String);

#[derive(Debug, Error)]
pub enum PublishError {
    #[error("no signer configured")]
    NoSigner,

    #[error(transparent)]
    Signer(#[from] SignerError),

    #[error("no relays configured")]
    NoRelays,
}
