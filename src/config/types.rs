//! Raw configuration types for TOML parsing

use super::*;
use serde::Deserialize;

/// Raw configuration as parsed from TOML
#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RawConfig {
    pub server: Option<RawServerConfig>,
    pub storage: Option<RawStorageConfig>,
    pub auth: Option<RawAuthConfig>,
    pub invitations: Option<RawInvitationConfig>,
    pub logging: Option<RawLoggingConfig>,
    pub bootstrap: Option<RawBootstrapConfig>,
}

/// Expand a leading `~/` to the home directory
pub fn expand_home(path: &str) -> PathBuf {
    if let Some(rest) = path.strip_prefix("~/") {
        dirs::home_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join(rest)
    } else {
        PathBuf::from(path)
    }
}

pub(super) fn validate_bind(bind: &str) -> Result<String, ConfigError> {
    bind.parse::<std::net::SocketAddr>()
        .map_err(|e| ConfigError::Invalid(format!("Invalid bind address '{}': {}", bind, e)))?;
    Ok(bind.to_string())
}

#[derive(Debug, Deserialize, Default)]
pub struct RawServerConfig {
    pub bind: Option<String>,
    pub api_prefix: Option<String>,
}

impl TryFrom<RawServerConfig> for ServerConfig {
    type Error = ConfigError;

    fn try_from(raw: RawServerConfig) -> Result<Self, Self::Error> {
        let defaults = ServerConfig::default();
        let bind = match raw.bind {
            Some(bind) => validate_bind(&bind)?,
            None => defaults.bind,
        };

        let api_prefix = raw.api_prefix.unwrap_or(defaults.api_prefix);
        if !api_prefix.starts_with('/') || api_prefix.len() < 2 || api_prefix.ends_with('/') {
            return Err(ConfigError::Invalid(format!(
                "api_prefix must look like '/api/v1', got '{}'",
                api_prefix
            )));
        }

        Ok(Self { bind, api_prefix })
    }
}

#[derive(Debug, Deserialize, Default)]
pub struct RawStorageConfig {
    pub backend: Option<String>,
    pub path: Option<String>,
    pub database_url: Option<String>,
}

impl TryFrom<RawStorageConfig> for StorageConfig {
    type Error = ConfigError;

    fn try_from(raw: RawStorageConfig) -> Result<Self, Self::Error> {
        let backend = match raw.backend.as_deref() {
            Some("file") | None => StorageBackendType::File,
            Some("sqlite") => StorageBackendType::Sqlite,
            Some(other) => {
                return Err(ConfigError::Invalid(format!(
                    "Unknown storage backend: {}",
                    other
                )))
            }
        };

        let file_path = match raw.path {
            Some(p) => Some(expand_home(&p)),
            None if backend == StorageBackendType::File => Some(Config::default_storage_path()),
            None => None,
        };

        let database_url = match raw.database_url {
            Some(url) => Some(url),
            None if backend == StorageBackendType::Sqlite => Some(Config::default_database_url()),
            None => None,
        };

        if let Some(url) = &database_url {
            if !url.starts_with("sqlite:") {
                return Err(ConfigError::Invalid(format!(
                    "database_url must be a sqlite: URL, got '{}'",
                    url
                )));
            }
        }

        Ok(Self {
            backend,
            file_path,
            database_url,
        })
    }
}

#[derive(Debug, Deserialize, Default)]
pub struct RawAuthConfig {
    pub access_token_ttl_minutes: Option<i64>,
    pub bcrypt_cost: Option<u32>,
    pub login_max_attempts: Option<u32>,
    pub login_window_secs: Option<u64>,
}

impl TryFrom<RawAuthConfig> for AuthConfig {
    type Error = ConfigError;

    fn try_from(raw: RawAuthConfig) -> Result<Self, Self::Error> {
        let defaults = AuthConfig::default();

        let ttl_minutes = raw
            .access_token_ttl_minutes
            .unwrap_or(defaults.access_token_ttl.num_minutes());
        if ttl_minutes <= 0 {
            return Err(ConfigError::Invalid(
                "access_token_ttl_minutes must be positive".to_string(),
            ));
        }

        let bcrypt_cost = raw.bcrypt_cost.unwrap_or(defaults.bcrypt_cost);
        if !(4..=31).contains(&bcrypt_cost) {
            return Err(ConfigError::Invalid(format!(
                "bcrypt_cost must be between 4 and 31, got {}",
                bcrypt_cost
            )));
        }

        let login_max_attempts = raw.login_max_attempts.unwrap_or(defaults.login_max_attempts);
        if login_max_attempts == 0 {
            return Err(ConfigError::Invalid(
                "login_max_attempts must be at least 1".to_string(),
            ));
        }

        let login_window = raw
            .login_window_secs
            .map(std::time::Duration::from_secs)
            .unwrap_or(defaults.login_window);

        Ok(Self {
            access_token_ttl: chrono::Duration::minutes(ttl_minutes),
            bcrypt_cost,
            login_max_attempts,
            login_window,
        })
    }
}

#[derive(Debug, Deserialize, Default)]
pub struct RawInvitationConfig {
    pub expiry_days: Option<i64>,
    pub frontend_url: Option<String>,
    pub default_role: Option<String>,
}

impl TryFrom<RawInvitationConfig> for InvitationConfig {
    type Error = ConfigError;

    fn try_from(raw: RawInvitationConfig) -> Result<Self, Self::Error> {
        let defaults = InvitationConfig::default();

        let expiry_days = raw.expiry_days.unwrap_or(defaults.expiry.num_days());
        if expiry_days <= 0 {
            return Err(ConfigError::Invalid("expiry_days must be positive".to_string()));
        }

        let frontend_url = raw
            .frontend_url
            .map(|url| url.trim_end_matches('/').to_string())
            .unwrap_or(defaults.frontend_url);

        Ok(Self {
            expiry: chrono::Duration::days(expiry_days),
            frontend_url,
            default_role: raw.default_role.unwrap_or(defaults.default_role),
        })
    }
}

#[derive(Debug, Deserialize, Default)]
pub struct RawLoggingConfig {
    pub level: Option<String>,
    pub format: Option<String>,
}

impl TryFrom<RawLoggingConfig> for LoggingConfig {
    type Error = ConfigError;

    fn try_from(raw: RawLoggingConfig) -> Result<Self, Self::Error> {
        let format = match raw.format.as_deref() {
            Some("json") => LogFormat::Json,
            Some("pretty") | None => LogFormat::Pretty,
            Some(other) => {
                return Err(ConfigError::Invalid(format!("Unknown log format: {}", other)))
            }
        };

        Ok(Self {
            level: raw.level.unwrap_or_else(|| "info".to_string()),
            format,
        })
    }
}

#[derive(Debug, Deserialize, Default)]
pub struct RawBootstrapConfig {
    pub superuser_email: Option<String>,
    pub superuser_password_hash: Option<String>,
    pub default_tenant: Option<String>,
}

impl From<RawBootstrapConfig> for BootstrapConfig {
    fn from(raw: RawBootstrapConfig) -> Self {
        Self {
            superuser_email: raw.superuser_email,
            superuser_password: None,
            superuser_password_hash: raw.superuser_password_hash,
            default_tenant: raw.default_tenant,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use secrecy::ExposeSecret;
    use std::collections::HashMap;

    #[test]
    fn test_parse_config() {
        let toml = r#"
[server]
bind = "0.0.0.0:9000"
api_prefix = "/iam"

[storage]
backend = "sqlite"
database_url = "sqlite://tenantry.db"

[auth]
access_token_ttl_minutes = 15
bcrypt_cost = 10

[invitations]
expiry_days = 3
frontend_url = "https://app.example.com/"
default_role = "user"

[logging]
level = "debug"
format = "json"

[bootstrap]
superuser_email = "root@example.com"
default_tenant = "Acme"
"#;

        let config = Config::parse(toml).unwrap();
        assert_eq!(config.server.bind, "0.0.0.0:9000");
        assert_eq!(config.server.api_prefix, "/iam");
        assert_eq!(config.storage.backend, StorageBackendType::Sqlite);
        assert_eq!(config.storage.database_url.as_deref(), Some("sqlite://tenantry.db"));
        assert_eq!(config.auth.access_token_ttl, chrono::Duration::minutes(15));
        assert_eq!(config.auth.bcrypt_cost, 10);
        assert_eq!(config.auth.login_max_attempts, 5);
        assert_eq!(config.invitations.expiry, chrono::Duration::days(3));
        assert_eq!(config.invitations.frontend_url, "https://app.example.com");
        assert_eq!(config.invitations.default_role, "user");
        assert_eq!(config.logging.format, LogFormat::Json);
        assert_eq!(config.bootstrap.default_tenant.as_deref(), Some("Acme"));
    }

    #[test]
    fn test_minimal_config() {
        let config = Config::parse("").unwrap();
        assert_eq!(config.server.bind, "127.0.0.1:8000");
        assert_eq!(config.storage.backend, StorageBackendType::File);
        assert!(config.storage.file_path.is_some());
        assert_eq!(config.auth.access_token_ttl, chrono::Duration::minutes(30));
        assert_eq!(config.auth.login_window, std::time::Duration::from_secs(60));
        assert_eq!(config.invitations.expiry, chrono::Duration::days(7));
        assert_eq!(config.invitations.default_role, "viewer");
    }

    #[test]
    fn test_default_toml_parses() {
        let config = Config::parse(Config::default_toml()).unwrap();
        assert_eq!(
            config.bootstrap.superuser_email.as_deref(),
            Some("admin@example.com")
        );
    }

    #[test]
    fn test_invalid_values_rejected() {
        for toml in [
            "[server]\nbind = \"not-an-address\"",
            "[server]\napi_prefix = \"api\"",
            "[storage]\nbackend = \"vault\"",
            "[storage]\nbackend = \"sqlite\"\ndatabase_url = \"postgres://db\"",
            "[auth]\naccess_token_ttl_minutes = 0",
            "[auth]\nbcrypt_cost = 2",
            "[invitations]\nexpiry_days = -1",
            "[logging]\nformat = \"xml\"",
        ] {
            assert!(
                matches!(Config::parse(toml), Err(ConfigError::Invalid(_))),
                "accepted: {}",
                toml
            );
        }

        assert!(matches!(
            Config::parse("[nonsense]\nkey = 1"),
            Err(ConfigError::ParseError(_))
        ));
    }

    #[test]
    fn test_expand_home() {
        let expanded = expand_home("~/data/tenantry.json");
        assert!(expanded.ends_with("data/tenantry.json"));
        assert!(!expanded.to_string_lossy().starts_with('~'));
        assert_eq!(expand_home("/srv/t.json"), PathBuf::from("/srv/t.json"));
    }

    #[test]
    fn test_env_overrides() {
        let env: HashMap<&str, &str> = [
            (ENV_BIND, "127.0.0.1:9999"),
            (ENV_DATABASE_URL, "sqlite::memory:"),
            (ENV_LOG_LEVEL, "tenantry=trace"),
            (ENV_SUPERUSER_PASSWORD, "hunter22"),
        ]
        .into_iter()
        .collect();

        let mut config = Config::default();
        config
            .apply_overrides(|name| env.get(name).map(|v| v.to_string()))
            .unwrap();

        assert_eq!(config.server.bind, "127.0.0.1:9999");
        assert_eq!(config.storage.backend, StorageBackendType::Sqlite);
        assert_eq!(config.storage.database_url.as_deref(), Some("sqlite::memory:"));
        assert_eq!(config.logging.level, "tenantry=trace");
        assert_eq!(
            config
                .bootstrap
                .superuser_password
                .as_ref()
                .map(|p| p.expose_secret().to_string()),
            Some("hunter22".to_string())
        );

        let mut config = Config::default();
        let result = config.apply_overrides(|name| (name == ENV_BIND).then(|| "nope".to_string()));
        assert!(matches!(result, Err(ConfigError::Invalid(_))));
    }
}
