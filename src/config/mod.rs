//! Configuration system for tenantry
//!
//! Loads configuration from TOML files and environment variables.

mod types;

pub use types::*;

use secrecy::SecretString;
use std::path::{Path, PathBuf};
use thiserror::Error;
use tokio::fs;

/// Environment variable overriding `server.bind`
pub const ENV_BIND: &str = "TENANTRY_BIND";
/// Environment variable overriding the storage location; selects SQLite
pub const ENV_DATABASE_URL: &str = "TENANTRY_DATABASE_URL";
/// Environment variable overriding `logging.level`
pub const ENV_LOG_LEVEL: &str = "TENANTRY_LOG_LEVEL";
/// Environment variable carrying the bootstrap superuser password
pub const ENV_SUPERUSER_PASSWORD: &str = "TENANTRY_SUPERUSER_PASSWORD";

/// Configuration-related errors
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Configuration file not found: {0}")]
    NotFound(PathBuf),

    #[error("Failed to read configuration: {0}")]
    ReadError(#[from] std::io::Error),

    #[error("Failed to parse configuration: {0}")]
    ParseError(String),

    #[error("Invalid configuration: {0}")]
    Invalid(String),
}

/// Main tenantry configuration
#[derive(Debug, Clone, Default)]
pub struct Config {
    pub server: ServerConfig,
    pub storage: StorageConfig,
    pub auth: AuthConfig,
    pub invitations: InvitationConfig,
    pub logging: LoggingConfig,
    pub bootstrap: BootstrapConfig,
}

impl Config {
    /// Load configuration from a file
    pub async fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();

        if !path.exists() {
            return Err(ConfigError::NotFound(path.to_path_buf()));
        }

        let content = fs::read_to_string(path).await?;
        Self::parse(&content)
    }

    /// Load configuration from a string
    pub fn parse(content: &str) -> Result<Self, ConfigError> {
        let raw: RawConfig =
            toml::from_str(content).map_err(|e| ConfigError::ParseError(e.to_string()))?;

        Self::from_raw(raw)
    }

    /// Convert from raw TOML config to validated config
    fn from_raw(raw: RawConfig) -> Result<Self, ConfigError> {
        Ok(Self {
            server: raw.server.unwrap_or_default().try_into()?,
            storage: raw.storage.unwrap_or_default().try_into()?,
            auth: raw.auth.unwrap_or_default().try_into()?,
            invitations: raw.invitations.unwrap_or_default().try_into()?,
            logging: raw.logging.unwrap_or_default().try_into()?,
            bootstrap: raw.bootstrap.unwrap_or_default().into(),
        })
    }

    /// Apply `TENANTRY_*` overrides from the process environment
    pub fn apply_env(&mut self) -> Result<(), ConfigError> {
        self.apply_overrides(|name| std::env::var(name).ok())
    }

    /// Apply overrides from an arbitrary variable lookup
    pub fn apply_overrides(
        &mut self,
        lookup: impl Fn(&str) -> Option<String>,
    ) -> Result<(), ConfigError> {
        if let Some(bind) = lookup(ENV_BIND) {
            self.server.bind = validate_bind(&bind)?;
        }
        if let Some(url) = lookup(ENV_DATABASE_URL) {
            self.storage.backend = StorageBackendType::Sqlite;
            self.storage.database_url = Some(url);
        }
        if let Some(level) = lookup(ENV_LOG_LEVEL) {
            self.logging.level = level;
        }
        if let Some(password) = lookup(ENV_SUPERUSER_PASSWORD) {
            self.bootstrap.superuser_password = Some(SecretString::from(password));
        }
        Ok(())
    }

    /// Get the default config file path
    pub fn default_path() -> PathBuf {
        dirs::config_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("tenantry")
            .join("config.toml")
    }

    /// Get the default data directory
    pub fn default_data_dir() -> PathBuf {
        dirs::data_local_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("tenantry")
    }

    /// Get the default snapshot path for file storage
    pub fn default_storage_path() -> PathBuf {
        Self::default_data_dir().join("tenantry.json")
    }

    /// Get the default SQLite URL
    pub fn default_database_url() -> String {
        format!(
            "sqlite://{}",
            Self::default_data_dir().join("tenantry.db").display()
        )
    }

    /// The commented file written by `tenantry init`
    pub fn default_toml() -> &'static str {
        DEFAULT_CONFIG_TOML
    }
}

const DEFAULT_CONFIG_TOML: &str = r#"# tenantry configuration

[server]
bind = "127.0.0.1:8000"
api_prefix = "/api/v1"

[storage]
# "file" keeps a JSON snapshot, "sqlite" uses a SQLite database
backend = "file"
path = "~/.local/share/tenantry/tenantry.json"
# database_url = "sqlite://tenantry.db"

[auth]
access_token_ttl_minutes = 30
bcrypt_cost = 12
login_max_attempts = 5
login_window_secs = 60

[invitations]
expiry_days = 7
frontend_url = "http://localhost:3000"
default_role = "viewer"

[logging]
level = "info"
# "pretty" or "json"
format = "pretty"

[bootstrap]
superuser_email = "admin@example.com"
# Prefer TENANTRY_SUPERUSER_PASSWORD over a stored hash
# superuser_password_hash = "$2b$12$..."
default_tenant = "Default"
"#;

/// Server configuration
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Address to bind to
    pub bind: String,
    /// Prefix all REST routes are nested under
    pub api_prefix: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind: "127.0.0.1:8000".to_string(),
            api_prefix: "/api/v1".to_string(),
        }
    }
}

/// Storage configuration
#[derive(Debug, Clone)]
pub struct StorageConfig {
    pub backend: StorageBackendType,
    /// Snapshot path for file storage
    pub file_path: Option<PathBuf>,
    /// Connection URL for SQLite storage
    pub database_url: Option<String>,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            backend: StorageBackendType::File,
            file_path: Some(Config::default_storage_path()),
            database_url: None,
        }
    }
}

/// Storage backend type
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StorageBackendType {
    /// JSON snapshot file
    File,
    /// SQLite database through sqlx
    Sqlite,
}

/// Authentication settings
#[derive(Debug, Clone)]
pub struct AuthConfig {
    pub access_token_ttl: chrono::Duration,
    pub bcrypt_cost: u32,
    /// Failed logins allowed per client within the window
    pub login_max_attempts: u32,
    pub login_window: std::time::Duration,
}

impl Default for AuthConfig {
    fn default() -> Self {
        Self {
            access_token_ttl: chrono::Duration::minutes(30),
            bcrypt_cost: bcrypt::DEFAULT_COST,
            login_max_attempts: 5,
            login_window: std::time::Duration::from_secs(60),
        }
    }
}

/// Invitation settings
#[derive(Debug, Clone)]
pub struct InvitationConfig {
    pub expiry: chrono::Duration,
    /// Base URL of the frontend that serves the accept page
    pub frontend_url: String,
    /// Role granted when an invitation names none
    pub default_role: String,
}

impl Default for InvitationConfig {
    fn default() -> Self {
        Self {
            expiry: chrono::Duration::days(7),
            frontend_url: "http://localhost:3000".to_string(),
            default_role: crate::permissions::ROLE_VIEWER.to_string(),
        }
    }
}

/// Logging configuration
#[derive(Debug, Clone)]
pub struct LoggingConfig {
    /// Log level or EnvFilter directive
    pub level: String,
    pub format: LogFormat,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            format: LogFormat::Pretty,
        }
    }
}

/// Log output format
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogFormat {
    /// Human-readable format
    Pretty,
    /// JSON format
    Json,
}

/// What `tenantry seed` and first start create
#[derive(Debug, Clone, Default)]
pub struct BootstrapConfig {
    pub superuser_email: Option<String>,
    /// Plaintext password, only ever taken from the environment
    pub superuser_password: Option<SecretString>,
    /// Pre-hashed bcrypt password from the config file
    pub superuser_password_hash: Option<String>,
    /// Name of a tenant to create on seed
    pub default_tenant: Option<String>,
}
