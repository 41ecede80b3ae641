//! Service configuration
//!
//! Layered with the `config` crate: built-in defaults, then an optional
//! `realtime.toml`, then `REALTIME__*` environment variables (`__` separates
//! nested keys, e.g. `REALTIME__GATEWAY__AUTH_TIMEOUT_SECS`). The conventional
//! `DATABASE_URL` variable overrides `database.url`.

use auth::RateLimiterConfig;
use common::database::DatabaseConfig;
use config::{Config, ConfigError, Environment, File};
use serde::Deserialize;
use std::path::PathBuf;
use std::time::Duration;

/// Which storage implementation backs the repositories
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StorageBackend {
    Postgres,
    Memory,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ServerSettings {
    pub bind_address: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct StorageSettings {
    pub backend: StorageBackend,
}

/// Limits and timers applied by the gateway and its transport
#[derive(Debug, Clone, Deserialize)]
pub struct GatewaySettings {
    /// Seconds an unauthenticated connection may stay open
    pub auth_timeout_secs: u64,
    pub ping_interval_secs: u64,
    pub pong_timeout_secs: u64,
    /// Maximum message content length in characters
    pub max_message_len: usize,
    pub default_page_size: u32,
    pub max_page_size: u32,
}

impl GatewaySettings {
    pub fn auth_timeout(&self) -> Duration {
        Duration::from_secs(self.auth_timeout_secs)
    }

    pub fn ping_interval(&self) -> Duration {
        Duration::from_secs(self.ping_interval_secs)
    }

    pub fn pong_timeout(&self) -> Duration {
        Duration::from_secs(self.pong_timeout_secs)
    }
}

impl Default for GatewaySettings {
    fn default() -> Self {
        Self {
            auth_timeout_secs: 30,
            ping_interval_secs: 30,
            pong_timeout_secs: 10,
            max_message_len: 4000,
            default_page_size: 50,
            max_page_size: 200,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct SessionSettings {
    pub ttl_days: i64,
    /// Cron expression (with seconds) for the expired session sweep
    pub sweep_schedule: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct RateLimitSettings {
    pub max_attempts: u32,
    pub window_seconds: u64,
    pub ban_duration_seconds: u64,
}

impl From<&RateLimitSettings> for RateLimiterConfig {
    fn from(settings: &RateLimitSettings) -> Self {
        RateLimiterConfig {
            max_attempts: settings.max_attempts,
            window_seconds: settings.window_seconds,
            ban_duration_seconds: settings.ban_duration_seconds,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct CleanupSettings {
    /// Root of the per-user temporary upload directories
    pub temp_dir: PathBuf,
}

#[derive(Debug, Clone, Deserialize)]
pub struct LogSettings {
    pub filter: String,
}

/// Complete service configuration
#[derive(Debug, Clone, Deserialize)]
pub struct Settings {
    pub server: ServerSettings,
    pub database: DatabaseConfig,
    pub storage: StorageSettings,
    pub gateway: GatewaySettings,
    pub session: SessionSettings,
    pub rate_limit: RateLimitSettings,
    pub cleanup: CleanupSettings,
    pub log: LogSettings,
}

impl Settings {
    /// Load settings from defaults, `realtime.toml` and the environment
    pub fn load() -> Result<Self, ConfigError> {
        Self::load_from("realtime")
    }

    /// Load settings using `file` (without extension) as the optional file source
    pub fn load_from(file: &str) -> Result<Self, ConfigError> {
        let database = DatabaseConfig::default();
        let gateway = GatewaySettings::default();
        let rate_limit = RateLimiterConfig::default();
        let temp_dir = std::env::temp_dir().join("realtime-uploads");

        Config::builder()
            .set_default("server.bind_address", "0.0.0.0:3002")?
            .set_default("database.url", database.url)?
            .set_default("database.max_connections", database.max_connections)?
            .set_default("database.min_connections", database.min_connections)?
            .set_default(
                "database.connection_timeout_secs",
                database.connection_timeout_secs,
            )?
            .set_default("storage.backend", "postgres")?
            .set_default("gateway.auth_timeout_secs", gateway.auth_timeout_secs)?
            .set_default("gateway.ping_interval_secs", gateway.ping_interval_secs)?
            .set_default("gateway.pong_timeout_secs", gateway.pong_timeout_secs)?
            .set_default("gateway.max_message_len", gateway.max_message_len as u64)?
            .set_default("gateway.default_page_size", gateway.default_page_size)?
            .set_default("gateway.max_page_size", gateway.max_page_size)?
            .set_default("session.ttl_days", 30)?
            .set_default("session.sweep_schedule", "0 */5 * * * *")?
            .set_default("rate_limit.max_attempts", rate_limit.max_attempts)?
            .set_default("rate_limit.window_seconds", rate_limit.window_seconds)?
            .set_default(
                "rate_limit.ban_duration_seconds",
                rate_limit.ban_duration_seconds,
            )?
            .set_default("cleanup.temp_dir", temp_dir.to_string_lossy().to_string())?
            .set_default("log.filter", "info")?
            .add_source(File::with_name(file).required(false))
            .add_source(
                Environment::with_prefix("REALTIME")
                    .prefix_separator("__")
                    .separator("__")
                    .try_parsing(true),
            )
            .set_override_option("database.url", std::env::var("DATABASE_URL").ok())?
            .build()?
            .try_deserialize()
    }
}
