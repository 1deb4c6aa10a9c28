//! Layered configuration for the docflow worker host (spec §10.3): a
//! struct of nested sub-configs, every field defaulted so a bare TOML file
//! (or none at all) is always loadable, overridable by `DOCFLOW_*`
//! environment variables layered over those defaults.
//!
//! The one field that is *not* allowed a silent default is the encryption
//! master secret (spec §7 "Configuration error": "missing master secret at
//! startup → fatal, process refuses to start") — [`Config::require_master_secret`]
//! is the explicit gate a worker host calls before it builds anything.

use std::env;
use std::path::Path;

use docflow_core::ConfigError;
use serde::{Deserialize, Serialize};

/// Default config file name.
pub const CONFIG_FILE: &str = ".docflow.toml";

/// Complete worker-host configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub database: DatabaseConfig,
    #[serde(default)]
    pub queue: QueueConfig,
    #[serde(default)]
    pub webhook: WebhookConfig,
    #[serde(default)]
    pub encryption: EncryptionConfig,
}

impl Config {
    pub fn new() -> Self {
        Self::default()
    }

    /// Overlay `DOCFLOW_*` environment variables on top of file-loaded
    /// values, in place, one field at a time.
    pub fn apply_env_overrides(&mut self) {
        if let Ok(v) = env::var("DOCFLOW_DATABASE_URI") {
            self.database.uri = v;
        }
        if let Ok(v) = env::var("DOCFLOW_DATABASE_NAME") {
            self.database.database_name = v;
        }
        if let Ok(v) = env::var("DOCFLOW_QUEUE_POLL_INTERVAL_MS").and_then(|s| parse_env(&s)) {
            self.queue.poll_interval_ms = v;
        }
        if let Ok(v) = env::var("DOCFLOW_QUEUE_VISIBILITY_TIMEOUT_SECS").and_then(|s| parse_env(&s)) {
            self.queue.visibility_timeout_secs = v;
        }
        if let Ok(v) = env::var("DOCFLOW_QUEUE_SWEEP_INTERVAL_SECS").and_then(|s| parse_env(&s)) {
            self.queue.recovery_sweep_interval_secs = v;
        }
        if let Ok(v) = env::var("DOCFLOW_WEBHOOK_MAX_ATTEMPTS").and_then(|s| parse_env(&s)) {
            self.webhook.max_attempts = v;
        }
        if let Ok(v) = env::var("DOCFLOW_WEBHOOK_BACKOFF_BASE_SECS").and_then(|s| parse_env(&s)) {
            self.webhook.backoff_base_secs = v;
        }
        if let Ok(v) = env::var("DOCFLOW_WEBHOOK_BACKOFF_CAP_SECS").and_then(|s| parse_env(&s)) {
            self.webhook.backoff_cap_secs = v;
        }
        if let Ok(v) = env::var("DOCFLOW_WEBHOOK_HTTP_TIMEOUT_SECS").and_then(|s| parse_env(&s)) {
            self.webhook.http_timeout_secs = v;
        }
        if let Ok(v) = env::var("DOCFLOW_MASTER_SECRET") {
            self.encryption.master_secret = Some(v);
        }
    }

    /// Merge this config with `other` (other takes precedence), field by
    /// field, on a "non-default wins" basis.
    pub fn merge(&self, other: &Config) -> Config {
        Config {
            database: DatabaseConfig {
                uri: if other.database.uri != default_database_uri() {
                    other.database.uri.clone()
                } else {
                    self.database.uri.clone()
                },
                database_name: if other.database.database_name != default_database_name() {
                    other.database.database_name.clone()
                } else {
                    self.database.database_name.clone()
                },
            },
            queue: QueueConfig {
                poll_interval_ms: pick(other.queue.poll_interval_ms, self.queue.poll_interval_ms, default_poll_interval_ms()),
                visibility_timeout_secs: pick(
                    other.queue.visibility_timeout_secs,
                    self.queue.visibility_timeout_secs,
                    default_visibility_timeout_secs(),
                ),
                recovery_sweep_interval_secs: pick(
                    other.queue.recovery_sweep_interval_secs,
                    self.queue.recovery_sweep_interval_secs,
                    default_sweep_interval_secs(),
                ),
            },
            webhook: WebhookConfig {
                max_attempts: pick(other.webhook.max_attempts, self.webhook.max_attempts, default_max_attempts()),
                backoff_base_secs: pick(
                    other.webhook.backoff_base_secs,
                    self.webhook.backoff_base_secs,
                    default_backoff_base_secs(),
                ),
                backoff_cap_secs: pick(
                    other.webhook.backoff_cap_secs,
                    self.webhook.backoff_cap_secs,
                    default_backoff_cap_secs(),
                ),
                http_timeout_secs: pick(
                    other.webhook.http_timeout_secs,
                    self.webhook.http_timeout_secs,
                    default_http_timeout_secs(),
                ),
            },
            encryption: EncryptionConfig {
                master_secret: other.encryption.master_secret.clone().or_else(|| self.encryption.master_secret.clone()),
            },
        }
    }

    /// The configuration-error gate (spec §7): a worker host MUST call
    /// this before constructing a `docflow-crypto`-backed delivery engine.
    /// Returns the plaintext secret or a fatal [`ConfigError`].
    pub fn require_master_secret(&self) -> Result<&str, ConfigError> {
        self.encryption
            .master_secret
            .as_deref()
            .filter(|s| !s.is_empty())
            .ok_or(ConfigError::MissingMasterSecret)
    }
}

fn pick<T: PartialEq>(other: T, mine: T, default: T) -> T {
    if other != default { other } else { mine }
}

fn parse_env<T: std::str::FromStr>(s: &str) -> Result<T, env::VarError> {
    s.parse().map_err(|_| env::VarError::NotPresent)
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatabaseConfig {
    #[serde(default = "default_database_uri")]
    pub uri: String,
    #[serde(default = "default_database_name")]
    pub database_name: String,
}

fn default_database_uri() -> String {
    "mongodb://localhost:27017".to_string()
}
fn default_database_name() -> String {
    "docflow".to_string()
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            uri: default_database_uri(),
            database_name: default_database_name(),
        }
    }
}

/// Queue-service tunables (spec §4.2, §9 open questions): the fallback
/// poll interval, the recovery-sweep visibility timeout, and how often a
/// worker host runs the sweep.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QueueConfig {
    /// Fallback poll interval when change streams are unavailable. Kept
    /// as a config knob defaulting to 500 ms (see DESIGN.md's
    /// open-question resolution) rather than hardcoded.
    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,
    /// How long a message may sit `processing` before the recovery sweep
    /// resets it to `pending` (§4.2 "At-least-once"). Defaults to 15
    /// minutes.
    #[serde(default = "default_visibility_timeout_secs")]
    pub visibility_timeout_secs: u64,
    /// How often a worker host runs the recovery sweep.
    #[serde(default = "default_sweep_interval_secs")]
    pub recovery_sweep_interval_secs: u64,
}

fn default_poll_interval_ms() -> u64 {
    500
}
fn default_visibility_timeout_secs() -> u64 {
    // Matches `docflow_queue::sweep::DEFAULT_VISIBILITY_TIMEOUT`.
    600
}
fn default_sweep_interval_secs() -> u64 {
    60
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            poll_interval_ms: default_poll_interval_ms(),
            visibility_timeout_secs: default_visibility_timeout_secs(),
            recovery_sweep_interval_secs: default_sweep_interval_secs(),
        }
    }
}

/// Webhook delivery engine tunables (spec §4.5).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WebhookConfig {
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,
    #[serde(default = "default_backoff_base_secs")]
    pub backoff_base_secs: u64,
    #[serde(default = "default_backoff_cap_secs")]
    pub backoff_cap_secs: u64,
    #[serde(default = "default_http_timeout_secs")]
    pub http_timeout_secs: u64,
}

fn default_max_attempts() -> u32 {
    8
}
fn default_backoff_base_secs() -> u64 {
    30
}
fn default_backoff_cap_secs() -> u64 {
    3600
}
fn default_http_timeout_secs() -> u64 {
    15
}

impl Default for WebhookConfig {
    fn default() -> Self {
        Self {
            max_attempts: default_max_attempts(),
            backoff_base_secs: default_backoff_base_secs(),
            backoff_cap_secs: default_backoff_cap_secs(),
            http_timeout_secs: default_http_timeout_secs(),
        }
    }
}

/// Encryption-at-rest configuration (spec §6, §I5).
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct EncryptionConfig {
    /// The master secret `docflow-crypto` derives an AES-256 key and HMAC
    /// key from. Deliberately `Option` with no default — see
    /// [`Config::require_master_secret`].
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub master_secret: Option<String>,
}

/// Load configuration from `dir/.docflow.toml`, applying `DOCFLOW_*` env
/// overrides. Missing file is not an error — returns defaults overlaid
/// with environment.
pub fn load_config(dir: &Path) -> Result<Config, ConfigError> {
    load_config_from_file(&dir.join(CONFIG_FILE))
}

/// Load configuration from a specific file path, applying `DOCFLOW_*` env
/// overrides on top (env always wins, matching a twelve-factor deploy).
pub fn load_config_from_file(path: &Path) -> Result<Config, ConfigError> {
    let mut config = if path.exists() {
        let content = std::fs::read_to_string(path)?;
        toml::from_str(&content)?
    } else {
        Config::default()
    };
    config.apply_env_overrides();
    Ok(config)
}
