//! Publish and fetch against a real relay.
//!
//! Requires the `nak` binary (available at `/run/current-system/sw/bin/nak`).
//! Run with: `cargo test -- --ignored relay_integration`

use nostr_sdk::prelude::*;
use nostr_core::{ReferenceKey, UnsignedEvent};
use scrollwork::{Config, Services};
use std::time::Duration;

const NAK_BIN: &str = "/run/current-system/sw/bin/nak";
const RELAY_PORT: u16 = 19848;
const RELAY_URL: &str = "ws://127.0.0.1:19848";

/// Start `nak serve` as a background process, returning the child handle.
fn start_nak_relay() -> std::process::Child {
    std::process::Command::new(NAK_BIN)
        .args(["serve", "--port", &RELAY_PORT.to_string(), "--quiet"])
        .stdin(std::process::Stdio::null())
        .stdout(std::process::Stdio::inherit())
        .stderr(std::process::Stdio::inherit())
        .spawn()
        .expect("Failed to start nak serve; is nak installed?")
}

/// Wait for the relay to accept TCP connections.
async fn wait_for_relay() {
    for _ in 0..50 {
        if tokio::net::TcpStream::connect(format!("127.0.0.1:{RELAY_PORT}"))
            .await
            .is_ok()
        {
            return;
        }
        tokio::time::sleep(Duration::from_millis(100)).await;
    }
    panic!("Relay did not start within 5 seconds");
}

#[tokio::test]
#[ignore] // requires nak binary
async fn relay_integration_publish_then_fetch() {
    let mut nak = start_nak_relay();
    wait_for_relay().await;

    let keys = Keys::generate();
    let mut config = Config::default();
    config.relays.urls = vec![RELAY_URL.to_string()];
    let services = Services::open(&config, Some(keys.clone())).expect("services");

    // Two versions of the same article; the newer one must win.
    for (created_at, title) in [(1_700_000_000u64, "first"), (1_700_000_100, "second")] {
        let report = services
            .relays
            .publish(
                UnsignedEvent::new(30023, format!("body of {title}"))
                    .tag(vec!["d".into(), "post".into()])
                    .tag(vec!["title".into(), title.into()])
                    .created_at(created_at),
            )
            .await
            .expect("publish");
        assert!(report.is_accepted(), "relay rejected: {:?}", report.rejected);
    }

    let key = ReferenceKey::address(30023, &keys.public_key().to_hex(), "post");
    let event = services.store.fetch(&key).await.expect("article");
    assert_eq!(event.content, "body of second");

    // Profiles: a fresh pubkey has none.
    let missing = ReferenceKey::profile(Keys::generate().public_key().to_hex());
    assert!(services.store.fetch(&missing).await.is_none());
    assert!(services.store.error(&missing).is_some());

    services.close().await;
    nak.kill().ok();
}
