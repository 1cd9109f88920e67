//! NIP-01 wire messages.
//!
//! Client → relay messages are built with `serde_json::json!` arrays; relay →
//! client messages are parsed leniently: anything malformed becomes
//! [`RelayMessage::Unknown`] instead of an error.

use nostr_sdk::prelude::*;
use serde_json::{json, Value};

/// Parsed relay → client message.
#[derive(Debug, Clone)]
pub enum RelayMessage {
    Event {
        subscription_id: String,
        event: Box<Event>,
    },
    /// End of stored events; live events may follow.
    Eose { subscription_id: String },
    /// Relay ended a subscription on its side.
    Closed {
        subscription_id: String,
        message: String,
    },
    /// Acceptance verdict for a published event.
    Ok {
        event_id: String,
        accepted: bool,
        message: String,
    },
    Notice { message: String },
    Auth { challenge: String },
    Unknown(String),
}

pub fn parse_relay_message(msg: &str) -> RelayMessage {
    let parsed: Value = match serde_json::from_str(msg) {
        Ok(v) => v,
        Err(_) => return RelayMessage::Unknown(msg.to_string()),
    };
    let Some(arr) = parsed.as_array() else {
        return RelayMessage::Unknown(msg.to_string());
    };

    let text = |i: usize| {
        arr.get(i)
            .and_then(|v| v.as_str())
            .unwrap_or("")
            .to_string()
    };

    match arr.first().and_then(|v| v.as_str()) {
        Some("EVENT") if arr.len() >= 3 => {
            match serde_json::from_value::<Event>(arr[2].clone()) {
                Ok(event) => RelayMessage::Event {
                    subscription_id: text(1),
                    event: Box::new(event),
                },
                Err(_) => RelayMessage::Unknown(msg.to_string()),
            }
        }
        Some("EOSE") => RelayMessage::Eose {
            subscription_id: text(1),
        },
        Some("CLOSED") => RelayMessage::Closed {
            subscription_id: text(1),
            message: text(2),
        },
        Some("OK") => RelayMessage::Ok {
            event_id: text(1),
            accepted: arr.get(2).and_then(|v| v.as_bool()).unwrap_or(false),
            message: text(3),
        },
        Some("NOTICE") => RelayMessage::Notice { message: text(1) },
        Some("AUTH") => RelayMessage::Auth { challenge: text(1) },
        _ => RelayMessage::Unknown(msg.to_string()),
    }
}

/// `["REQ", <id>, <filter>]`
pub fn req_message(subscription_id: &str, filter: &Filter) -> String {
    json!(["REQ", subscription_id, filter]).to_string()
}

/// `["CLOSE", <id>]`
pub fn close_message(subscription_id: &str) -> String {
    json!(["CLOSE", subscription_id]).to_string()
}

/// `["EVENT", <event>]`
pub fn event_message(event: &Event) -> String {
    json!(["EVENT", event]).to_string()
}
