use serde::Deserialize;
use std::fmt;
use std::time::Duration;

use crate::database::dispatcher::StageTimeouts;

pub const DEFAULT_MAX_CONNECTIONS: u32 = 10;
pub const DEFAULT_ACQUIRE_TIMEOUT_MS: u64 = 1_000;
pub const DEFAULT_QUERY_TIMEOUT_MS: u64 = 5_000;
pub const DEFAULT_IDLE_TIMEOUT_MS: u64 = 300_000; // 5 minutes
pub const DEFAULT_MAX_LIFETIME_MS: u64 = 1_800_000; // 30 minutes

/// Where and how to connect. Shared by both drivers.
#[derive(Clone, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConnectionParams {
    pub host: String,
    pub port: u16,
    #[serde(default)]
    pub ssl_mode: bool,
    pub username: String,
    pub password: String,
    pub database: String,
}

// Keeps the password out of logs and error messages.
impl fmt::Debug for ConnectionParams {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConnectionParams")
            .field("host", &self.host)
            .field("port", &self.port)
            .field("ssl_mode", &self.ssl_mode)
            .field("username", &self.username)
            .field("password", &"***")
            .field("database", &self.database)
            .finish()
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Rdbms {
    Postgresql(ConnectionParams),
    Mysql(ConnectionParams),
}

impl Rdbms {
    pub fn name(&self) -> &'static str {
        match self {
            Rdbms::Postgresql(_) => "postgresql",
            Rdbms::Mysql(_) => "mysql",
        }
    }
}

/// Pool sizing and timeouts, all in milliseconds on the wire.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct PoolConfig {
    pub max_connections: u32,
    pub acquire_timeout: u64,
    pub query_timeout: u64,
    pub idle_timeout: u64,
    pub max_lifetime: u64,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            max_connections: DEFAULT_MAX_CONNECTIONS,
            acquire_timeout: DEFAULT_ACQUIRE_TIMEOUT_MS,
            query_timeout: DEFAULT_QUERY_TIMEOUT_MS,
            idle_timeout: DEFAULT_IDLE_TIMEOUT_MS,
            max_lifetime: DEFAULT_MAX_LIFETIME_MS,
        }
    }
}

impl PoolConfig {
    pub fn acquire_timeout(&self) -> Duration {
        Duration::from_millis(self.acquire_timeout)
    }

    pub fn query_timeout(&self) -> Duration {
        Duration::from_millis(self.query_timeout)
    }

    pub fn idle_timeout(&self) -> Duration {
        Duration::from_millis(self.idle_timeout)
    }

    pub fn max_lifetime(&self) -> Duration {
        Duration::from_millis(self.max_lifetime)
    }

    /// Client-side bounds for each blocking stage. Acquire and release share
    /// the pool's acquire timeout.
    pub fn stage_timeouts(&self) -> StageTimeouts {
        StageTimeouts {
            acquire: self.acquire_timeout(),
            query: self.query_timeout(),
            release: self.acquire_timeout(),
        }
    }

    pub fn validate(&self) -> Vec<String> {
        let mut errors = Vec::new();
        if self.max_connections == 0 {
            errors.push("database.pool.maxConnections must be positive".to_string());
        }
        for (name, value) in [
            ("acquireTimeout", self.acquire_timeout),
            ("queryTimeout", self.query_timeout),
            ("idleTimeout", self.idle_timeout),
            ("maxLifetime", self.max_lifetime),
        ] {
            if value == 0 {
                errors.push(format!("database.pool.{name} must be positive"));
            }
        }
        errors
    }
}

/// `parameters.database` as configured: exactly one driver section plus an
/// optional pool.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct DatabaseSection {
    #[serde(default)]
    pub postgresql: Option<ConnectionParams>,
    #[serde(default)]
    pub mysql: Option<ConnectionParams>,
    #[serde(default)]
    pub pool: PoolConfig,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DatabaseSettings {
    pub rdbms: Rdbms,
    pub pool: PoolConfig,
}

impl TryFrom<DatabaseSection> for DatabaseSettings {
    type Error = Vec<String>;

    fn try_from(section: DatabaseSection) -> Result<Self, Self::Error> {
        let rdbms = match (section.postgresql, section.mysql) {
            (Some(params), None) => Rdbms::Postgresql(params),
            (None, Some(params)) => Rdbms::Mysql(params),
            (Some(_), Some(_)) => {
                return Err(vec![
                    "database must configure only one of postgresql or mysql".to_string(),
                ])
            }
            (None, None) => {
                return Err(vec![
                    "database must configure one of postgresql or mysql".to_string(),
                ])
            }
        };

        let errors = section.pool.validate();
        if !errors.is_empty() {
            return Err(errors);
        }

        Ok(DatabaseSettings {
            rdbms,
            pool: section.pool,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn params() -> serde_json::Value {
        json!({
            "host": "localhost",
            "port": 5432,
            "sslMode": false,
            "username": "enricher",
            "password": "s3cret",
            "database": "users"
        })
    }

    #[test]
    fn test_pool_defaults() {
        let section: DatabaseSection =
            serde_json::from_value(json!({"postgresql": params()})).unwrap();
        let settings = DatabaseSettings::try_from(section).unwrap();

        assert_eq!(settings.rdbms.name(), "postgresql");
        assert_eq!(settings.pool, PoolConfig::default());
        assert_eq!(settings.pool.acquire_timeout(), Duration::from_secs(1));
        assert_eq!(settings.pool.query_timeout(), Duration::from_secs(5));
    }

    #[test]
    fn test_partial_pool_overrides() {
        let section: DatabaseSection = serde_json::from_value(json!({
            "mysql": params(),
            "pool": {"maxConnections": 3, "queryTimeout": 250}
        }))
        .unwrap();
        let settings = DatabaseSettings::try_from(section).unwrap();

        assert_eq!(settings.rdbms.name(), "mysql");
        assert_eq!(settings.pool.max_connections, 3);
        assert_eq!(settings.pool.query_timeout, 250);
        assert_eq!(settings.pool.acquire_timeout, DEFAULT_ACQUIRE_TIMEOUT_MS);

        let timeouts = settings.pool.stage_timeouts();
        assert_eq!(timeouts.query, Duration::from_millis(250));
        assert_eq!(timeouts.release, timeouts.acquire);
    }

    #[test]
    fn test_exactly_one_driver() {
        let both: DatabaseSection =
            serde_json::from_value(json!({"postgresql": params(), "mysql": params()})).unwrap();
        assert!(DatabaseSettings::try_from(both).is_err());

        let neither: DatabaseSection = serde_json::from_value(json!({})).unwrap();
        assert!(DatabaseSettings::try_from(neither).is_err());
    }

    #[test]
    fn test_zero_pool_values_are_rejected() {
        let section: DatabaseSection = serde_json::from_value(json!({
            "postgresql": params(),
            "pool": {"maxConnections": 0, "acquireTimeout": 0}
        }))
        .unwrap();
        let errors = DatabaseSettings::try_from(section).unwrap_err();
        assert_eq!(errors.len(), 2);
    }

    #[test]
    fn test_debug_hides_password() {
        let params: ConnectionParams = serde_json::from_value(params()).unwrap();
        let debug = format!("{params:?}");
        assert!(!debug.contains("s3cret"));
        assert!(debug.contains("localhost"));
    }
}
