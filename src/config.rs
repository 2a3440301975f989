//! Configuration management
//!
//! Loads configuration from:
//! 1. Default values
//! 2. Configuration file (config/default.toml, config/local.toml)
//! 3. Environment variables (override)

use serde::Deserialize;
use std::path::PathBuf;

/// Main application configuration
#[derive(Debug, Clone, Deserialize)]
pub struct AppConfig {
    pub server: ServerConfig,
    pub database: DatabaseConfig,
    pub federation: FederationConfig,
    pub notifications: NotificationConfig,
    pub logging: LoggingConfig,
}

/// Server configuration
#[derive(Debug, Clone, Deserialize)]
pub struct ServerConfig {
    /// Bind address (e.g., "0.0.0.0")
    pub host: String,
    /// Port number (e.g., 8080)
    pub port: u16,
    /// Public domain (e.g., "social.example.com")
    pub domain: String,
    /// Protocol ("http" or "https")
    pub protocol: String,
}

impl ServerConfig {
    /// Get the base URL for the instance
    ///
    /// # Returns
    /// Full URL like "https://social.example.com"
    pub fn base_url(&self) -> String {
        format!("{}://{}", self.protocol, self.domain)
    }
}

/// Database configuration (SQLite only)
#[derive(Debug, Clone, Deserialize)]
pub struct DatabaseConfig {
    /// Path to SQLite database file
    pub path: PathBuf,
}

/// Federation settings
#[derive(Debug, Clone, Deserialize)]
pub struct FederationConfig {
    /// Key-encryption key protecting local actors' private keys
    pub user_kek: String,
    /// Timeout for remote actor/object fetches and deliveries
    pub fetch_timeout_seconds: u64,
    /// Allow fetching from loopback/private addresses (tests, local dev)
    #[serde(default)]
    pub allow_private_addresses: bool,
    /// TTL of the in-memory actor cache
    pub actor_cache_ttl: u64,
    /// Maximum number of actors kept in memory
    pub actor_cache_max_items: u64,
    /// Handles of local actors created at startup when missing
    #[serde(default)]
    pub local_actors: Vec<String>,
}

/// Notification delivery settings
#[derive(Debug, Clone, Deserialize)]
pub struct NotificationConfig {
    /// Contact address used as the push subscriber (VAPID `sub`)
    pub admin_email: String,
    /// VAPID public key (base64url)
    #[serde(default)]
    pub vapid_public_key: Option<String>,
    /// VAPID private key (base64url)
    #[serde(default)]
    pub vapid_private_key: Option<String>,
    /// Capacity of the in-process notification feed
    pub feed_capacity: usize,
}

/// Logging configuration
#[derive(Debug, Clone, Deserialize)]
pub struct LoggingConfig {
    /// Log level: trace, debug, info, warn, error
    pub level: String,
    /// Log format: "pretty" or "json"
    pub format: String,
}

impl AppConfig {
    /// Load configuration from file and environment
    ///
    /// # Loading Order
    /// 1. Default values
    /// 2. config/default.toml (if exists)
    /// 3. config/local.toml (if exists)
    /// 4. Environment variables (FEDIBOX__*)
    ///
    /// # Errors
    /// Returns error if configuration is invalid
    pub fn load() -> Result<Self, crate::error::AppError> {
        use config::{Config, Environment, File};

        let config = Config::builder()
            .set_default("server.host", "127.0.0.1")?
            .set_default("server.port", 8080)?
            .set_default("server.protocol", "https")?
            .set_default("database.path", "data/fedibox.db")?
            .set_default("federation.fetch_timeout_seconds", 30)?
            .set_default("federation.allow_private_addresses", false)?
            .set_default("federation.actor_cache_ttl", 3600)?
            .set_default("federation.actor_cache_max_items", 10_000)?
            .set_default("notifications.feed_capacity", 1024)?
            .set_default("logging.level", "info")?
            .set_default("logging.format", "pretty")?
            .add_source(File::with_name("config/default").required(false))
            .add_source(File::with_name("config/local").required(false))
            .add_source(
                Environment::with_prefix("FEDIBOX")
                    .separator("__")
                    .try_parsing(true)
                    .list_separator(",")
                    .with_list_parse_key("federation.local_actors"),
            )
            .build()
            .map_err(|e| crate::error::AppError::Config(e.to_string()))?;

        let app_config: Self = config
            .try_deserialize()
            .map_err(|e| crate::error::AppError::Config(e.to_string()))?;
        app_config.validate()?;
        Ok(app_config)
    }

    fn validate(&self) -> Result<(), crate::error::AppError> {
        const MIN_KEK_BYTES: usize = 16;

        if self.server.domain.trim().is_empty() {
            return Err(crate::error::AppError::Config(
                "server.domain must not be empty".to_string(),
            ));
        }

        if !matches!(
            self.server.protocol.to_ascii_lowercase().as_str(),
            "http" | "https"
        ) {
            return Err(crate::error::AppError::Config(format!(
                "server.protocol must be http or https, got {}",
                self.server.protocol
            )));
        }

        if self.federation.user_kek.as_bytes().len() < MIN_KEK_BYTES {
            return Err(crate::error::AppError::Config(format!(
                "federation.user_kek must be at least {} bytes",
                MIN_KEK_BYTES
            )));
        }

        if let Some(handle) = self.federation.local_actors.iter().find(|handle| {
            handle.is_empty()
                || !handle
                    .chars()
                    .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-' || c == '.')
        }) {
            return Err(crate::error::AppError::Config(format!(
                "federation.local_actors contains an invalid handle: {:?}",
                handle
            )));
        }

        if self.notifications.feed_capacity == 0 {
            return Err(crate::error::AppError::Config(
                "notifications.feed_capacity must be greater than 0".to_string(),
            ));
        }

        if self.federation.allow_private_addresses {
            tracing::warn!(
                domain = %self.server.domain,
                "Remote fetches may reach loopback/private addresses"
            );
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn valid_config() -> AppConfig {
        AppConfig {
            server: ServerConfig {
                host: "127.0.0.1".to_string(),
                port: 8080,
                domain: "social.example.com".to_string(),
                protocol: "https".to_string(),
            },
            database: DatabaseConfig {
                path: PathBuf::from("/tmp/fedibox-test.db"),
            },
            federation: FederationConfig {
                user_kek: "k".repeat(32),
                fetch_timeout_seconds: 30,
                allow_private_addresses: false,
                actor_cache_ttl: 3600,
                actor_cache_max_items: 100,
                local_actors: vec!["bob".to_string()],
            },
            notifications: NotificationConfig {
                admin_email: "admin@example.com".to_string(),
                vapid_public_key: None,
                vapid_private_key: None,
                feed_capacity: 16,
            },
            logging: LoggingConfig {
                level: "info".to_string(),
                format: "pretty".to_string(),
            },
        }
    }

    #[test]
    fn validate_accepts_complete_config() {
        assert!(valid_config().validate().is_ok());
        assert_eq!(
            valid_config().server.base_url(),
            "https://social.example.com"
        );
    }

    #[test]
    fn validate_rejects_short_user_kek() {
        let mut config = valid_config();
        config.federation.user_kek = "short".to_string();

        let error = config
            .validate()
            .expect_err("user KEK shorter than 16 bytes must fail");
        assert!(matches!(
            error,
            crate::error::AppError::Config(message)
                if message.contains("federation.user_kek")
        ));
    }

    #[test]
    fn validate_rejects_unknown_protocol() {
        let mut config = valid_config();
        config.server.protocol = "gopher".to_string();

        let error = config.validate().expect_err("gopher is not allowed");
        assert!(matches!(
            error,
            crate::error::AppError::Config(message) if message.contains("server.protocol")
        ));
    }

    #[test]
    fn validate_rejects_invalid_local_handle() {
        let mut config = valid_config();
        config.federation.local_actors.push("not/a handle".to_string());

        let error = config.validate().expect_err("slash is not allowed in handles");
        assert!(matches!(
            error,
            crate::error::AppError::Config(message) if message.contains("local_actors")
        ));
    }

    #[test]
    fn validate_rejects_empty_domain() {
        let mut config = valid_config();
        config.server.domain = "  ".to_string();

        assert!(config.validate().is_err());
    }
}
