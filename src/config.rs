use std::env;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    pub server: ServerConfig,
    pub database: DatabaseConfig,
    pub queue: QueueConfig,
    pub gateway: GatewayConfig,
    pub delivery: DeliveryConfig,
    pub rate_limit: RateLimitConfig,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
    /// Allowed CORS origin. When unset, cross-origin requests are not allowed.
    pub cors_origin: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct DatabaseConfig {
    pub url: String,
    pub max_connections: u32,
    /// When false, tables may be missing and the queue runs from memory.
    pub run_migrations: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum QueueBackend {
    /// SQLite, falling back to memory while the schema is missing.
    Sqlite,
    Memory,
}

impl FromStr for QueueBackend {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "sqlite" | "durable" => Ok(QueueBackend::Sqlite),
            "memory" => Ok(QueueBackend::Memory),
            _ => Err(ConfigError::InvalidValue("QUEUE_BACKEND".to_string())),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct QueueConfig {
    pub backend: QueueBackend,
}

#[derive(Clone, Deserialize)]
pub struct GatewayConfig {
    pub base_url: String,
    /// Platform credentials used for tenants without their own.
    pub token: Option<String>,
    pub instance_id: Option<String>,
    pub country_code: String,
    pub timeout_seconds: u64,
}

impl std::fmt::Debug for GatewayConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GatewayConfig")
            .field("base_url", &self.base_url)
            .field("token", &self.token.as_ref().map(|_| "[redacted]"))
            .field("instance_id", &self.instance_id)
            .field("country_code", &self.country_code)
            .field("timeout_seconds", &self.timeout_seconds)
            .finish()
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct DeliveryConfig {
    /// Whether the periodic delivery poller runs.
    pub enabled: bool,
    /// How often (seconds) the poller runs every tenant.
    pub poll_interval_seconds: u64,
    /// Tenants delivered concurrently by one poll.
    pub tenant_concurrency: usize,
    /// Offset (minutes east of UTC) used for dates and times in messages.
    pub utc_offset_minutes: i32,
}

#[derive(Debug, Clone, Deserialize)]
pub struct RateLimitConfig {
    /// Allowed requests per second (per IP) for delivery trigger endpoints
    pub trigger_per_second: u32,
    /// Burst size for delivery trigger endpoints
    pub trigger_burst: u32,
}

fn parse_bool(value: &str) -> Option<bool> {
    match value.trim().to_lowercase().as_str() {
        "1" | "true" | "yes" => Some(true),
        "0" | "false" | "no" => Some(false),
        _ => None,
    }
}

fn non_empty(value: Option<String>) -> Option<String> {
    value.filter(|v| !v.trim().is_empty())
}

impl Config {
    pub fn from_env() -> Result<Self, ConfigError> {
        dotenvy::dotenv().ok();
        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Build the configuration from any key lookup (the process environment in production).
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let defaults = Config::default();
        let get = |key: &str, default: String| lookup(key).unwrap_or(default);

        let utc_offset_minutes: i32 = get(
            "DELIVERY_UTC_OFFSET_MINUTES",
            defaults.delivery.utc_offset_minutes.to_string(),
        )
        .parse()
        .map_err(|_| ConfigError::InvalidValue("DELIVERY_UTC_OFFSET_MINUTES".to_string()))?;
        if utc_offset_minutes.abs() >= 24 * 60 {
            return Err(ConfigError::InvalidValue("DELIVERY_UTC_OFFSET_MINUTES".to_string()));
        }

        Ok(Config {
            server: ServerConfig {
                host: get("HOST", defaults.server.host),
                port: get("PORT", defaults.server.port.to_string())
                    .parse()
                    .map_err(|_| ConfigError::InvalidValue("PORT".to_string()))?,
                cors_origin: non_empty(lookup("CORS_ORIGIN")),
            },
            database: DatabaseConfig {
                url: get("DATABASE_URL", defaults.database.url),
                max_connections: get("DATABASE_MAX_CONNECTIONS", "5".to_string())
                    .parse()
                    .unwrap_or(defaults.database.max_connections),
                run_migrations: lookup("DATABASE_RUN_MIGRATIONS")
                    .and_then(|v| parse_bool(&v))
                    .unwrap_or(defaults.database.run_migrations),
            },
            queue: QueueConfig {
                backend: match lookup("QUEUE_BACKEND") {
                    Some(v) => v.parse()?,
                    None => defaults.queue.backend,
                },
            },
            gateway: GatewayConfig {
                base_url: get("GATEWAY_BASE_URL", defaults.gateway.base_url),
                token: non_empty(lookup("GATEWAY_TOKEN")),
                instance_id: non_empty(lookup("GATEWAY_INSTANCE_ID")),
                country_code: get("GATEWAY_COUNTRY_CODE", defaults.gateway.country_code),
                timeout_seconds: get("GATEWAY_TIMEOUT_SECONDS", "30".to_string())
                    .parse()
                    .unwrap_or(defaults.gateway.timeout_seconds),
            },
            delivery: DeliveryConfig {
                enabled: lookup("DELIVERY_ENABLED")
                    .and_then(|v| parse_bool(&v))
                    .unwrap_or(defaults.delivery.enabled),
                poll_interval_seconds: get("DELIVERY_POLL_INTERVAL_SECONDS", "300".to_string())
                    .parse()
                    .unwrap_or(defaults.delivery.poll_interval_seconds),
                tenant_concurrency: get("DELIVERY_TENANT_CONCURRENCY", "4".to_string())
                    .parse()
                    .unwrap_or(defaults.delivery.tenant_concurrency),
                utc_offset_minutes,
            },
            rate_limit: RateLimitConfig {
                trigger_per_second: get("RATE_LIMIT_TRIGGER_PER_SECOND", "2".to_string())
                    .parse()
                    .unwrap_or(defaults.rate_limit.trigger_per_second),
                trigger_burst: get("RATE_LIMIT_TRIGGER_BURST", "10".to_string())
                    .parse()
                    .unwrap_or(defaults.rate_limit.trigger_burst),
            },
        })
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Missing required environment variable: {0}")]
    MissingEnv(String),

    #[error("Invalid value for environment variable: {0}")]
    InvalidValue(String),
}

impl Default for Config {
    fn default() -> Self {
        Config {
            server: ServerConfig {
                host: "0.0.0.0".to_string(),
                port: 8080,
                cors_origin: None,
            },
            database: DatabaseConfig {
                url: "sqlite://data/app.db".to_string(),
                max_connections: 5,
                run_migrations: true,
            },
            queue: QueueConfig {
                backend: QueueBackend::Sqlite,
            },
            gateway: GatewayConfig {
                base_url: "https://api.bitsafira.com.br".to_string(),
                token: None,
                instance_id: None,
                country_code: "55".to_string(),
                timeout_seconds: 30,
            },
            delivery: DeliveryConfig {
                enabled: true,
                poll_interval_seconds: 300,
                tenant_concurrency: 4,
                utc_offset_minutes: -180,
            },
            rate_limit: RateLimitConfig {
                trigger_per_second: 2,
                trigger_burst: 10,
            },
        }
    }
}

impl GatewayConfig {
    /// Platform credentials, when both parts are configured.
    pub fn default_credentials(&self) -> Result<Option<crate::db::models::GatewayCredentials>, ConfigError> {
        match (&self.token, &self.instance_id) {
            (Some(token), Some(instance_id)) => Ok(Some(crate::db::models::GatewayCredentials {
                token: token.clone(),
                instance_id: instance_id.clone(),
            })),
            (None, None) => Ok(None),
            (Some(_), None) => Err(ConfigError::MissingEnv("GATEWAY_INSTANCE_ID".to_string())),
            (None, Some(_)) => Err(ConfigError::MissingEnv("GATEWAY_TOKEN".to_string())),
        }
    }
}

impl DeliveryConfig {
    pub fn display_offset(&self) -> chrono::FixedOffset {
        use chrono::Offset;
        // Range is checked when the configuration is loaded.
        chrono::FixedOffset::east_opt(self.utc_offset_minutes * 60).unwrap_or_else(|| chrono::Utc.fix())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn from_pairs(pairs: &[(&str, &str)]) -> Result<Config, ConfigError> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        Config::from_lookup(|key| map.get(key).cloned())
    }

    #[test]
    fn defaults_apply_when_nothing_is_set() {
        let config = from_pairs(&[]).unwrap();
        assert_eq!(config.server.port, 8080);
        assert_eq!(config.queue.backend, QueueBackend::Sqlite);
        assert_eq!(config.gateway.country_code, "55");
        assert_eq!(config.delivery.poll_interval_seconds, 300);
        assert_eq!(config.delivery.display_offset().local_minus_utc(), -3 * 3600);
        assert!(config.gateway.default_credentials().unwrap().is_none());
    }

    #[test]
    fn reads_overrides() {
        let config = from_pairs(&[
            ("PORT", "9000"),
            ("QUEUE_BACKEND", "memory"),
            ("DELIVERY_ENABLED", "no"),
            ("DATABASE_RUN_MIGRATIONS", "0"),
            ("GATEWAY_TOKEN", "tok"),
            ("GATEWAY_INSTANCE_ID", "inst"),
            ("DELIVERY_UTC_OFFSET_MINUTES", "60"),
        ])
        .unwrap();

        assert_eq!(config.server.port, 9000);
        assert_eq!(config.queue.backend, QueueBackend::Memory);
        assert!(!config.delivery.enabled);
        assert!(!config.database.run_migrations);
        let creds = config.gateway.default_credentials().unwrap().unwrap();
        assert_eq!(creds.instance_id, "inst");
        assert_eq!(config.delivery.display_offset().local_minus_utc(), 3600);
    }

    #[test]
    fn rejects_invalid_values() {
        assert!(matches!(
            from_pairs(&[("PORT", "eighty")]),
            Err(ConfigError::InvalidValue(_))
        ));
        assert!(matches!(
            from_pairs(&[("QUEUE_BACKEND", "redis")]),
            Err(ConfigError::InvalidValue(_))
        ));
        assert!(matches!(
            from_pairs(&[("DELIVERY_UTC_OFFSET_MINUTES", "2000")]),
            Err(ConfigError::InvalidValue(_))
        ));

        let half = from_pairs(&[("GATEWAY_TOKEN", "tok")]).unwrap();
        assert!(matches!(
            half.gateway.default_credentials(),
            Err(ConfigError::MissingEnv(_))
        ));
    }
}
