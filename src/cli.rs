use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use nostr_sdk::prelude::*;
use nostr_core::resolver::{encode, resolve};
use nostr_core::tags::content_tags;
use nostr_core::{ReferenceKey, UnsignedEvent};
use std::path::PathBuf;

use crate::config::Config;
use crate::services::Services;

#[derive(Parser, Debug)]
#[command(name = "scrollwork")]
#[command(about = "Fetch, deduplicate and cache Nostr events across many relays")]
#[command(version)]
pub struct Cli {
    /// Configuration file path (defaults to the platform config directory)
    #[arg(short, long, global = true)]
    pub config: Option<String>,

    /// Log at debug level regardless of the configured level
    #[arg(short, long, global = true)]
    pub verbose: bool,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Decode an npub/nprofile/note/nevent/naddr into its reference key
    Resolve {
        /// NIP-19 identifier, with or without the `nostr:` prefix
        identifier: String,
    },
    /// Fetch the newest event a reference points at
    Fetch {
        /// NIP-19 identifier or `tag:value` key such as `a:30023:<hex>:slug`
        reference: String,
        /// Return every replaceable group the reference matches
        #[arg(long)]
        list: bool,
    },
    /// Warm the cache for several references and report what was found
    Prefetch {
        references: Vec<String>,
    },
    /// Sign and publish an event with tags derived from its content
    Publish {
        /// Event content
        content: String,
        /// Event kind
        #[arg(short, long, default_value_t = 1)]
        kind: u16,
        /// Extra tag as comma-separated values, e.g. `subject,hello`
        #[arg(short, long)]
        tag: Vec<String>,
    },
    /// Show relays in use, optionally switching to a user's relay list
    Relays {
        /// Npub or hex pubkey whose NIP-65 relay list to use
        #[arg(long)]
        user: Option<String>,
    },
    /// Detect the media type of a URL
    Probe {
        url: String,
    },
    /// Generate a new keypair
    Keygen {
        /// Store the secret key in the config file
        #[arg(long)]
        save: bool,
    },
}

pub async fn handle_command(cmd: Commands, config: &Config, config_path: Option<&str>) -> Result<()> {
    match cmd {
        Commands::Resolve { identifier } => cmd_resolve(&identifier),
        Commands::Fetch { reference, list } => cmd_fetch(&reference, list, config).await,
        Commands::Prefetch { references } => cmd_prefetch(&references, config).await,
        Commands::Publish { content, kind, tag } => cmd_publish(content, kind, tag, config).await,
        Commands::Relays { user } => cmd_relays(user, config).await,
        Commands::Probe { url } => cmd_probe(&url, config).await,
        Commands::Keygen { save } => cmd_keygen(save, config, config_path),
    }
}

/// Parse a NIP-19 identifier or a `tag:value` key. Returns the key and any
/// relay hints.
pub fn parse_reference(input: &str) -> Result<(ReferenceKey, Vec<String>)> {
    if let Some(resolved) = resolve(input) {
        return Ok((resolved.key, resolved.relays));
    }
    match input.split_once(':') {
        Some((tag, value)) if matches!(tag, "a" | "e" | "p") && !value.is_empty() => {
            Ok((ReferenceKey::new(tag, value), Vec::new()))
        }
        _ => anyhow::bail!("Not a NIP-19 identifier or tag:value key: {input}"),
    }
}

fn cmd_resolve(identifier: &str) -> Result<()> {
    let resolved =
        resolve(identifier).ok_or_else(|| anyhow::anyhow!("Could not decode {identifier}"))?;

    println!("key:    {}", resolved.key);
    if let Some(reencoded) = encode(&resolved.key, &[]) {
        println!("short:  {reencoded}");
    }
    for relay in &resolved.relays {
        println!("relay:  {relay}");
    }
    Ok(())
}

async fn cmd_fetch(reference: &str, list: bool, config: &Config) -> Result<()> {
    let (key, hints) = parse_reference(reference)?;
    let services = Services::open(config, None)?;
    for hint in &hints {
        if let Err(e) = services.relays.add_relay(hint) {
            tracing::debug!("Ignoring relay hint {}: {}", hint, e);
        }
    }

    let events = if list {
        services.store.fetch_list(&key).await
    } else {
        services.store.fetch(&key).await.map(|event| vec![event])
    };
    let error = services.store.error(&key);
    services.close().await;

    match events {
        Some(events) => {
            for event in events {
                println!("{}", event.as_json());
            }
            Ok(())
        }
        None => anyhow::bail!(
            "Nothing found for {}: {}",
            key,
            error.unwrap_or_else(|| "unknown error".to_string())
        ),
    }
}

async fn cmd_prefetch(references: &[String], config: &Config) -> Result<()> {
    let keys = references
        .iter()
        .map(|reference| parse_reference(reference).map(|(key, _)| key))
        .collect::<Result<Vec<_>>>()?;

    let services = Services::open(config, None)?;
    services.store.prefetch(&keys).await;

    for key in &keys {
        match (services.store.get_event(key), services.store.error(key)) {
            (Some(event), _) => println!("✅ {key} -> {}", event.id),
            (None, Some(error)) => println!("❌ {key}: {error}"),
            (None, None) => println!("… {key}"),
        }
    }
    services.close().await;
    Ok(())
}

async fn cmd_publish(content: String, kind: u16, tag: Vec<String>, config: &Config) -> Result<()> {
    let keys = config
        .keys()?
        .ok_or_else(|| anyhow::anyhow!("No secret key configured"))?;
    let pubkey = keys.public_key();
    let services = Services::open(config, Some(keys))?;
    let synced = services.sync_user_relays(pubkey).await;
    if let Err(e) = synced.emoji_refresh.await {
        tracing::debug!("Emoji refresh for {} did not finish: {}", pubkey, e);
    }

    let emojis = services.relays.emoji_list().get();
    let mut tags = content_tags(&content, &emojis, None);
    tags.extend(
        tag.iter()
            .map(|t| t.split(',').map(str::to_string).collect::<Vec<_>>()),
    );

    let report = services
        .relays
        .publish(UnsignedEvent::new(kind, content).tags(tags))
        .await
        .context("Failed to publish")?;
    services.close().await;

    println!("📝 {}", report.event.id.to_bech32()?);
    for relay in &report.accepted {
        println!("  ✅ {relay}");
    }
    for (relay, reason) in &report.rejected {
        println!("  ❌ {relay}: {reason}");
    }
    if !report.is_accepted() {
        anyhow::bail!("No relay accepted the event");
    }
    Ok(())
}

async fn cmd_relays(user: Option<String>, config: &Config) -> Result<()> {
    let Some(user) = user else {
        println!("📡 Configured relays:\n");
        for relay in &config.relays.urls {
            println!("  {relay}");
        }
        return Ok(());
    };

    let pubkey = PublicKey::parse(&user).with_context(|| format!("Invalid pubkey: {user}"))?;
    let services = Services::open(config, None)?;
    let synced = services.sync_user_relays(pubkey).await;
    services.close().await;

    println!("📡 Relays for {}:\n", pubkey.to_bech32()?);
    for relay in synced.urls {
        println!("  {relay}");
    }
    Ok(())
}

async fn cmd_probe(url: &str, config: &Config) -> Result<()> {
    let services = Services::open(config, None)?;
    let kind = services.url_types.detect(url).await;
    services.close().await;
    println!("{kind}");
    Ok(())
}

fn cmd_keygen(save: bool, config: &Config, config_path: Option<&str>) -> Result<()> {
    let keys = Keys::generate();
    let nsec = keys.secret_key().to_bech32()?;
    let npub = keys.public_key().to_bech32()?;

    println!("🔑 New Nostr keypair generated:\n");
    println!("  npub: {npub}");
    println!("  nsec: {nsec}");
    println!("  hex:  {}", keys.public_key().to_hex());

    if save {
        let path = match config_path {
            Some(path) => PathBuf::from(shellexpand::tilde(path).as_ref()),
            None => Config::default_path()
                .ok_or_else(|| anyhow::anyhow!("No config directory on this platform"))?,
        };
        let mut config = config.clone();
        config.identity.nsec = Some(nsec);
        config.identity.nsec_file = None;
        config.save(&path)?;
        println!("\n✅ Saved to {}", path.display());
    }
    Ok(())
}
