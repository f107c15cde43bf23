// ABOUTME: Configuration parsing from TOML file with environment variable overrides
// ABOUTME: Validates required fields and provides sensible defaults for optional ones

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::Path;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    #[serde(default = "default_grpc_addr")]
    pub grpc_addr: String,
    #[serde(default = "default_http_addr")]
    pub http_addr: String,
    #[serde(default = "default_db_path")]
    pub db_path: String,
    #[serde(default)]
    pub auth: AuthConfig,
    #[serde(default)]
    pub heartbeat: HeartbeatConfig,
    #[serde(default)]
    pub broker: BrokerConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuthConfig {
    /// Signing secret for bearer tokens. If absent on first run, one is
    /// generated and persisted alongside the database (see `auth::token`).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub signing_secret: Option<String>,
    #[serde(default = "default_token_ttl_secs")]
    pub default_token_ttl_secs: u64,
}

impl Default for AuthConfig {
    fn default() -> Self {
        Self {
            signing_secret: None,
            default_token_ttl_secs: default_token_ttl_secs(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HeartbeatConfig {
    #[serde(default = "default_heartbeat_interval_secs")]
    pub interval_secs: u64,
    #[serde(default = "default_heartbeat_timeout_secs")]
    pub timeout_secs: u64,
    #[serde(default = "default_reconnect_grace_secs")]
    pub reconnect_grace_secs: u64,
}

impl Default for HeartbeatConfig {
    fn default() -> Self {
        Self {
            interval_secs: default_heartbeat_interval_secs(),
            timeout_secs: default_heartbeat_timeout_secs(),
            reconnect_grace_secs: default_reconnect_grace_secs(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BrokerConfig {
    #[serde(default = "default_request_timeout_secs")]
    pub request_timeout_secs: u64,
    #[serde(default = "default_dedupe_ttl_secs")]
    pub dedupe_ttl_secs: u64,
    #[serde(default = "default_pending_channel_capacity")]
    pub pending_channel_capacity: usize,
}

impl Default for BrokerConfig {
    fn default() -> Self {
        Self {
            request_timeout_secs: default_request_timeout_secs(),
            dedupe_ttl_secs: default_dedupe_ttl_secs(),
            pending_channel_capacity: default_pending_channel_capacity(),
        }
    }
}

fn default_grpc_addr() -> String {
    "0.0.0.0:9090".to_string()
}

fn default_http_addr() -> String {
    "0.0.0.0:8080".to_string()
}

fn default_db_path() -> String {
    "./data/gateway.db".to_string()
}

fn default_token_ttl_secs() -> u64 {
    30 * 24 * 3600
}

fn default_heartbeat_interval_secs() -> u64 {
    30
}

fn default_heartbeat_timeout_secs() -> u64 {
    90
}

fn default_reconnect_grace_secs() -> u64 {
    60
}

fn default_request_timeout_secs() -> u64 {
    300
}

fn default_dedupe_ttl_secs() -> u64 {
    300
}

fn default_pending_channel_capacity() -> usize {
    16
}

impl Default for Config {
    fn default() -> Self {
        Self {
            grpc_addr: default_grpc_addr(),
            http_addr: default_http_addr(),
            db_path: default_db_path(),
            auth: AuthConfig::default(),
            heartbeat: HeartbeatConfig::default(),
            broker: BrokerConfig::default(),
        }
    }
}

impl Config {
    /// Returns the configured signing secret, generating and persisting one
    /// into `path` on first run if none is set (env var or config file).
    pub fn signing_secret(&mut self, path: &str) -> Result<String> {
        if let Some(secret) = &self.auth.signing_secret {
            return Ok(secret.clone());
        }
        let secret = crate::auth::token::TokenSigner::generate_secret();
        self.auth.signing_secret = Some(secret.clone());
        self.save(path)?;
        Ok(secret)
    }

    /// Persists the current config, pretty-printed, creating parent
    /// directories as needed.
    pub fn save(&self, path: &str) -> Result<()> {
        let rendered = toml::to_string_pretty(self).context("Failed to serialize config")?;
        if let Some(parent) = Path::new(path).parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)
                    .with_context(|| format!("Failed to create {}", parent.display()))?;
            }
        }
        std::fs::write(path, rendered).with_context(|| format!("Failed to write {path}"))
    }

    /// Load configuration from `config.toml` (if present), with environment
    /// variable overrides applied on top.
    pub fn load(path: &str) -> Result<Self> {
        let mut config = if Path::new(path).exists() {
            let content = std::fs::read_to_string(path)
                .with_context(|| format!("Failed to read {path}"))?;
            toml::from_str::<Config>(&content).context("Failed to parse config file")?
        } else {
            Config::default()
        };

        if let Ok(val) = std::env::var("COVEN_GRPC_ADDR") {
            config.grpc_addr = val;
        }
        if let Ok(val) = std::env::var("COVEN_HTTP_ADDR") {
            config.http_addr = val;
        }
        if let Ok(val) = std::env::var("COVEN_DB_PATH") {
            config.db_path = val;
        }
        if let Ok(val) = std::env::var("COVEN_SIGNING_SECRET") {
            config.auth.signing_secret = Some(val);
        }

        Ok(config)
    }
}
