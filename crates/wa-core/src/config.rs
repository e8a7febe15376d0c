//! Configuration management
//!
//! Settings are resolved in this order:
//! 1. environment variables
//! 2. `wa-gateway.toml` in the working directory
//! 3. defaults
//!
//! Inside the config file, `${VAR_NAME}` is replaced with the value of the
//! environment variable (or an empty string when unset).

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::Error;

/// Default config file name
pub const CONFIG_FILE: &str = "wa-gateway.toml";

/// Main configuration for wa-gateway
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    /// HTTP API configuration
    #[serde(default)]
    pub api: ApiConfig,

    /// Reply database configuration
    #[serde(default)]
    pub database: DatabaseConfig,

    /// WhatsApp bridge configuration
    #[serde(default)]
    pub bridge: BridgeConfig,

    /// Tenant session configuration
    #[serde(default)]
    pub session: SessionConfig,

    /// Lifecycle event configuration
    #[serde(default)]
    pub events: EventsConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApiConfig {
    /// Port for HTTP API server
    #[serde(default = "default_api_port")]
    pub port: u16,

    /// Allowed CORS origins. If unset, any origin is allowed.
    #[serde(default)]
    pub allowed_origins: Option<Vec<String>>,
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            port: default_api_port(),
            allowed_origins: None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatabaseConfig {
    /// Path to SQLite database file
    #[serde(default = "default_db_path")]
    pub path: String,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            path: default_db_path(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BridgeConfig {
    /// Base URL of the WhatsApp Web bridge
    #[serde(default = "default_bridge_url")]
    pub base_url: String,

    /// Bearer token shared with the bridge (both directions)
    #[serde(default)]
    pub token: Option<String>,

    /// Public base URL the bridge uses to reach our webhook
    #[serde(default = "default_webhook_base_url")]
    pub webhook_base_url: String,
}

impl Default for BridgeConfig {
    fn default() -> Self {
        Self {
            base_url: default_bridge_url(),
            token: None,
            webhook_base_url: default_webhook_base_url(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionConfig {
    /// Directory holding one credential folder per tenant
    #[serde(default = "default_auth_dir")]
    pub auth_dir: PathBuf,

    /// Attempts at deleting a busy credential folder before giving up
    #[serde(default = "default_cleanup_max_attempts")]
    pub cleanup_max_attempts: u32,

    /// Delay between deletion attempts, in milliseconds
    #[serde(default = "default_cleanup_backoff_ms")]
    pub cleanup_backoff_ms: u64,
}

impl SessionConfig {
    pub fn cleanup_backoff(&self) -> Duration {
        Duration::from_millis(self.cleanup_backoff_ms)
    }
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            auth_dir: default_auth_dir(),
            cleanup_max_attempts: default_cleanup_max_attempts(),
            cleanup_backoff_ms: default_cleanup_backoff_ms(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EventsConfig {
    /// Per-subscriber buffer of the lifecycle event channel
    #[serde(default = "default_events_capacity")]
    pub capacity: usize,
}

impl Default for EventsConfig {
    fn default() -> Self {
        Self {
            capacity: default_events_capacity(),
        }
    }
}

fn default_api_port() -> u16 {
    3000
}

fn default_db_path() -> String {
    "data/wa-gateway.db".to_string()
}

fn default_bridge_url() -> String {
    "http://localhost:21465".to_string()
}

fn default_webhook_base_url() -> String {
    "http://localhost:3000".to_string()
}

fn default_auth_dir() -> PathBuf {
    PathBuf::from(".wa_auth")
}

fn default_cleanup_max_attempts() -> u32 {
    10
}

fn default_cleanup_backoff_ms() -> u64 {
    1000
}

fn default_events_capacity() -> usize {
    256
}

impl Config {
    /// Replace `${VAR_NAME}` occurrences with environment variable values
    ///
    /// Unset variables expand to an empty string.
    fn expand_env_vars(value: &str) -> String {
        let mut result = String::new();
        let mut chars = value.chars().peekable();

        while let Some(c) = chars.next() {
            if c == '$' && chars.peek() == Some(&'{') {
                chars.next();

                let mut var_name = String::new();
                for c in chars.by_ref() {
                    if c == '}' {
                        break;
                    }
                    var_name.push(c);
                }

                if let Ok(env_value) = std::env::var(&var_name) {
                    result.push_str(&env_value);
                }
            } else {
                result.push(c);
            }
        }

        result
    }

    /// Load configuration from a TOML file, then apply environment overrides
    pub fn from_toml_file<P: AsRef<Path>>(path: P) -> crate::Result<Self> {
        let path = path.as_ref();

        let toml_content = std::fs::read_to_string(path)
            .map_err(|e| Error::Config(format!("Failed to read config file: {}", e)))?;

        let mut cfg = Self::from_toml_str(&toml_content)?;
        cfg.apply_env_overrides();

        Ok(cfg)
    }

    /// Parse configuration from TOML text (with `${VAR}` expansion)
    pub fn from_toml_str(content: &str) -> crate::Result<Self> {
        let expanded = Self::expand_env_vars(content);
        toml::from_str(&expanded).map_err(|e| Error::Config(format!("Failed to parse TOML: {}", e)))
    }

    /// Load from `wa-gateway.toml` if present, otherwise from the environment
    pub fn load() -> crate::Result<Self> {
        if Path::new(CONFIG_FILE).exists() {
            return Self::from_toml_file(CONFIG_FILE);
        }

        Self::from_env()
    }

    /// Load configuration from environment variables over defaults
    pub fn from_env() -> crate::Result<Self> {
        let mut cfg = Self::default();
        cfg.apply_env_overrides();
        Ok(cfg)
    }

    /// Override settings with environment variables
    fn apply_env_overrides(&mut self) {
        self.apply_overrides(|key| std::env::var(key).ok());
    }

    fn apply_overrides<F>(&mut self, var: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        // API
        if let Some(port) = var("API_PORT").and_then(|p| p.parse().ok()) {
            self.api.port = port;
        }
        if let Some(origins) = var("API_ALLOWED_ORIGINS") {
            self.api.allowed_origins = Some(
                origins
                    .split(',')
                    .map(|s| s.trim().to_string())
                    .filter(|s| !s.is_empty())
                    .collect(),
            );
        }

        // Database
        if let Some(path) = var("DB_PATH").filter(|p| !p.is_empty()) {
            self.database.path = path;
        }

        // Bridge
        if let Some(url) = var("BRIDGE_URL").filter(|u| !u.is_empty()) {
            self.bridge.base_url = url;
        }
        if let Some(token) = var("BRIDGE_TOKEN").filter(|t| !t.is_empty()) {
            self.bridge.token = Some(token);
        }
        if let Some(url) = var("BRIDGE_WEBHOOK_URL").filter(|u| !u.is_empty()) {
            self.bridge.webhook_base_url = url;
        }

        // Session
        if let Some(dir) = var("AUTH_DIR").filter(|d| !d.is_empty()) {
            self.session.auth_dir = PathBuf::from(dir);
        }
        if let Some(attempts) = var("CLEANUP_MAX_ATTEMPTS").and_then(|v| v.parse().ok()) {
            self.session.cleanup_max_attempts = attempts;
        }
        if let Some(backoff) = var("CLEANUP_BACKOFF_MS").and_then(|v| v.parse().ok()) {
            self.session.cleanup_backoff_ms = backoff;
        }

        // Events
        if let Some(capacity) = var("EVENTS_CAPACITY").and_then(|v| v.parse().ok()) {
            self.events.capacity = capacity;
        }
    }
}
