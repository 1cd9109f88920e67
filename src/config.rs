use anyhow::{Context, Result};
use directories::ProjectDirs;
use event_store::StoreConfig;
use nostr_sdk::Keys;
use nostr_core::{ConnectionConfig, ManagerConfig};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Environment variable consulted when no secret key is configured.
pub const NSEC_ENV: &str = "SCROLLWORK_NSEC";

#[derive(Debug, Deserialize, Serialize, Clone, Default, PartialEq)]
pub struct Config {
    #[serde(default)]
    pub relays: RelaysConfig,
    #[serde(default)]
    pub identity: IdentityConfig,
    #[serde(default)]
    pub cache: StoreConfig,
    #[serde(default)]
    pub media: MediaConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

#[derive(Debug, Deserialize, Serialize, Clone, PartialEq)]
pub struct RelaysConfig {
    /// Relays used before the user's own relay list is known.
    #[serde(default = "default_relay_urls")]
    pub urls: Vec<String>,
    #[serde(default = "default_fetch_timeout_ms")]
    pub fetch_timeout_ms: u64,
    #[serde(default = "default_publish_timeout_ms")]
    pub publish_timeout_ms: u64,
    #[serde(default = "default_connect_timeout_secs")]
    pub connect_timeout_secs: u64,
    #[serde(default = "default_true")]
    pub verify_signatures: bool,
}

#[derive(Debug, Deserialize, Serialize, Clone, Default, PartialEq)]
pub struct IdentityConfig {
    /// Secret key (nsec or hex). Prefer `nsec_file` or the environment.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub nsec: Option<String>,
    /// File holding the secret key on its first line.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub nsec_file: Option<String>,
}

#[derive(Debug, Deserialize, Serialize, Clone, PartialEq)]
pub struct MediaConfig {
    #[serde(default = "default_probe_timeout_secs")]
    pub probe_timeout_secs: u64,
    #[serde(default = "default_media_cache_capacity")]
    pub cache_capacity: usize,
}

#[derive(Debug, Deserialize, Serialize, Clone, PartialEq)]
pub struct LoggingConfig {
    #[serde(default = "default_log_level")]
    pub level: String,
}

impl Default for RelaysConfig {
    fn default() -> Self {
        Self {
            urls: default_relay_urls(),
            fetch_timeout_ms: default_fetch_timeout_ms(),
            publish_timeout_ms: default_publish_timeout_ms(),
            connect_timeout_secs: default_connect_timeout_secs(),
            verify_signatures: true,
        }
    }
}

impl Default for MediaConfig {
    fn default() -> Self {
        Self {
            probe_timeout_secs: default_probe_timeout_secs(),
            cache_capacity: default_media_cache_capacity(),
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
        }
    }
}

fn default_relay_urls() -> Vec<String> {
    [
        "wss://directory.yabu.me",
        "wss://purplepag.es",
        "wss://relay.nostr.band",
        "wss://nos.lol",
        "wss://indexer.coracle.social",
    ]
    .iter()
    .map(|url| url.to_string())
    .collect()
}

fn default_fetch_timeout_ms() -> u64 {
    5000
}

fn default_publish_timeout_ms() -> u64 {
    5000
}

fn default_connect_timeout_secs() -> u64 {
    10
}

fn default_true() -> bool {
    true
}

fn default_probe_timeout_secs() -> u64 {
    5
}

fn default_media_cache_capacity() -> usize {
    1000
}

fn default_log_level() -> String {
    "info".to_string()
}

impl Config {
    /// `<config dir>/scrollwork/config.toml` for the current platform.
    pub fn default_path() -> Option<PathBuf> {
        ProjectDirs::from("", "", "scrollwork").map(|dirs| dirs.config_dir().join("config.toml"))
    }

    pub fn load_from_file(path: &str) -> Result<Self> {
        let expanded_path = shellexpand::tilde(path);
        let content = fs::read_to_string(expanded_path.as_ref())
            .with_context(|| format!("Failed to read config file: {}", path))?;

        let mut config: Config =
            toml::from_str(&content).with_context(|| "Failed to parse TOML config")?;
        config.expand_paths();
        Ok(config)
    }

    /// Load `path` if given, else the default location if it exists, else
    /// built-in defaults.
    pub fn load(path: Option<&str>) -> Result<Self> {
        if let Some(path) = path {
            return Self::load_from_file(path);
        }
        match Self::default_path() {
            Some(default) if default.exists() => Self::load_from_file(&default.to_string_lossy()),
            _ => Ok(Self::default()),
        }
    }

    pub fn save(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)
                .with_context(|| format!("Failed to create {}", parent.display()))?;
        }
        let content = toml::to_string_pretty(self).context("Failed to serialize config")?;
        fs::write(path, content).with_context(|| format!("Failed to write {}", path.display()))
    }

    pub fn expand_paths(&mut self) {
        if let Some(file) = &self.identity.nsec_file {
            self.identity.nsec_file = Some(shellexpand::tilde(file).to_string());
        }
    }

    pub fn validate(&self) -> Result<()> {
        for url in &self.relays.urls {
            if !url.starts_with("wss://") && !url.starts_with("ws://") {
                anyhow::bail!("Relay URL must start with ws:// or wss://: {}", url);
            }
        }

        if self.relays.fetch_timeout_ms == 0 {
            anyhow::bail!("relays.fetch_timeout_ms must be greater than zero");
        }

        if self.media.cache_capacity == 0 {
            anyhow::bail!("media.cache_capacity must be greater than zero");
        }

        if self.identity.nsec.is_some() && self.identity.nsec_file.is_some() {
            anyhow::bail!("Set only one of identity.nsec and identity.nsec_file");
        }

        Ok(())
    }

    /// Signing keys from the config, the key file or `SCROLLWORK_NSEC`.
    /// `Ok(None)` when none of them is set.
    pub fn keys(&self) -> Result<Option<Keys>> {
        let secret = match (&self.identity.nsec, &self.identity.nsec_file) {
            (Some(nsec), _) => Some(nsec.clone()),
            (None, Some(file)) => {
                let content = fs::read_to_string(file)
                    .with_context(|| format!("Failed to read identity file: {}", file))?;
                content.lines().next().map(|line| line.trim().to_string())
            }
            (None, None) => std::env::var(NSEC_ENV).ok(),
        };

        match secret.filter(|s| !s.is_empty()) {
            Some(secret) => Keys::parse(&secret)
                .map(Some)
                .context("Invalid secret key"),
            None => Ok(None),
        }
    }

    pub fn manager_config(&self) -> ManagerConfig {
        ManagerConfig {
            fetch_timeout: Duration::from_millis(self.relays.fetch_timeout_ms),
            publish_timeout: Duration::from_millis(self.relays.publish_timeout_ms),
            ..ManagerConfig::default()
        }
    }

    pub fn connection_config(&self) -> ConnectionConfig {
        ConnectionConfig {
            connect_timeout: Duration::from_secs(self.relays.connect_timeout_secs),
            verify_signatures: self.relays.verify_signatures,
            ..ConnectionConfig::default()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use nostr_sdk::ToBech32;

    fn write_config(dir: &tempfile::TempDir, content: &str) -> String {
        let path = dir.path().join("config.toml");
        fs::write(&path, content).unwrap();
        path.to_string_lossy().to_string()
    }

    #[test]
    fn test_empty_file_uses_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let config = Config::load_from_file(&write_config(&dir, "")).unwrap();
        assert_eq!(config, Config::default());
        assert_eq!(config.relays.urls.len(), 5);
        assert_eq!(config.manager_config().fetch_timeout, Duration::from_millis(5000));
        assert!(config.cache.expiry().is_none());
        config.validate().unwrap();
    }

    #[test]
    fn test_partial_sections() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_config(
            &dir,
            r#"
[relays]
urls = ["wss://relay.example.com"]
fetch_timeout_ms = 2000

[cache]
expiry_secs = 600

[logging]
level = "debug"
"#,
        );
        let config = Config::load_from_file(&path).unwrap();
        assert_eq!(config.relays.urls, vec!["wss://relay.example.com"]);
        assert_eq!(config.relays.publish_timeout_ms, 5000);
        assert!(config.relays.verify_signatures);
        assert_eq!(config.cache.expiry(), Some(Duration::from_secs(600)));
        assert_eq!(config.cache.cleanup_interval_secs, 300);
        assert_eq!(config.logging.level, "debug");
    }

    #[test]
    fn test_validate_rejects_http_relay() {
        let mut config = Config::default();
        config.relays.urls.push("https://relay.example.com".into());
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_validate_rejects_two_secret_sources() {
        let mut config = Config::default();
        config.identity.nsec = Some("nsec1".into());
        config.identity.nsec_file = Some("/tmp/key".into());
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_keys_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let keys = Keys::generate();
        let key_path = dir.path().join("nsec");
        fs::write(&key_path, format!("{}\n", keys.secret_key().to_bech32().unwrap())).unwrap();

        let mut config = Config::default();
        config.identity.nsec_file = Some(key_path.to_string_lossy().to_string());
        let loaded = config.keys().unwrap().unwrap();
        assert_eq!(loaded.public_key(), keys.public_key());
    }

    #[test]
    fn test_invalid_secret_is_an_error() {
        let mut config = Config::default();
        config.identity.nsec = Some("not-a-key".into());
        assert!(config.keys().is_err());
    }

    #[test]
    fn test_save_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("config.toml");
        let mut config = Config::default();
        config.cache.expiry_secs = Some(60);
        config.relays.urls = vec!["ws://127.0.0.1:7777".into()];
        config.save(&path).unwrap();

        let loaded = Config::load_from_file(&path.to_string_lossy()).unwrap();
        assert_eq!(loaded, config);
    }
}
