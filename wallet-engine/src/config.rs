use config::{ConfigError, Environment, File};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::env;
use std::time::Duration;

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct Config {
    pub server: ServerConfig,
    pub database: DatabaseConfig,
    pub auth: AuthConfig,
    pub ledger: LedgerConfig,
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
    pub workers: usize,
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct DatabaseConfig {
    pub url: String,
    pub max_connections: u32,
    pub min_connections: u32,
    pub acquire_timeout_secs: u64,
    /// Upper bound on waiting for a client row lock
    pub lock_timeout_ms: u64,
}

impl DatabaseConfig {
    pub fn acquire_timeout(&self) -> Duration {
        Duration::from_secs(self.acquire_timeout_secs)
    }

    pub fn lock_timeout(&self) -> Duration {
        Duration::from_millis(self.lock_timeout_ms)
    }
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct AuthConfig {
    pub jwt_secret: String,
}

#[derive(Debug, Deserialize, Serialize, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum LedgerBackend {
    Postgres,
    Memory,
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct LedgerConfig {
    pub backend: LedgerBackend,
    /// Largest magnitude accepted for a single adjustment
    #[serde(with = "rust_decimal::serde::str")]
    pub max_adjustment: Decimal,
    pub list_clients_limit: i64,
    pub list_transactions_limit: i64,
}

impl Config {
    pub fn from_env() -> Result<Self, ConfigError> {
        let environment = env::var("ENVIRONMENT").unwrap_or_else(|_| "development".to_string());

        let mut builder = config::Config::builder()
            .set_default("server.host", "0.0.0.0")?
            .set_default("server.port", 8090)?
            .set_default("server.workers", 4)?
            .set_default("database.url", "")?
            .set_default("database.max_connections", 10)?
            .set_default("database.min_connections", 2)?
            .set_default("database.acquire_timeout_secs", 5)?
            .set_default("database.lock_timeout_ms", 5000)?
            .set_default("auth.jwt_secret", "")?
            .set_default("ledger.backend", "postgres")?
            .set_default("ledger.max_adjustment", "1000000000")?
            .set_default("ledger.list_clients_limit", 200)?
            .set_default("ledger.list_transactions_limit", 100)?;

        if let Ok(config_file) = env::var("CONFIG_FILE") {
            builder = builder.add_source(File::with_name(&config_file).required(false));
        } else {
            builder = builder.add_source(
                File::with_name(&format!("config/{}", environment)).required(false),
            );
        }

        builder = builder.add_source(Environment::with_prefix("WALLET_ENGINE").separator("__"));

        if let Ok(db_url) = env::var("DATABASE_URL") {
            builder = builder.set_override("database.url", db_url)?;
        }

        if let Ok(secret) = env::var("JWT_SECRET") {
            builder = builder.set_override("auth.jwt_secret", secret)?;
        }

        if let Ok(port) = env::var("WALLET_ENGINE_PORT") {
            builder = builder.set_override("server.port", port)?;
        }

        builder.build()?.try_deserialize()
    }

    pub fn validate(&self) -> Result<(), String> {
        if self.server.port == 0 {
            return Err("Server port cannot be 0".to_string());
        }

        if self.ledger.backend == LedgerBackend::Postgres && self.database.url.is_empty() {
            return Err("Database URL is required".to_string());
        }

        if self.database.max_connections == 0 {
            return Err("Database pool needs at least one connection".to_string());
        }

        // Postgres reads a zero lock_timeout as "wait forever"
        if self.database.lock_timeout_ms == 0 {
            return Err("Row lock timeout must be positive".to_string());
        }

        if self.database.acquire_timeout_secs == 0 {
            return Err("Connection acquire timeout must be positive".to_string());
        }

        if self.auth.jwt_secret.is_empty() {
            return Err("JWT secret is required".to_string());
        }

        if self.ledger.max_adjustment <= Decimal::ZERO {
            return Err("Maximum adjustment must be positive".to_string());
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    fn sample() -> Config {
        Config {
            server: ServerConfig {
                host: "127.0.0.1".to_string(),
                port: 8090,
                workers: 1,
            },
            database: DatabaseConfig {
                url: "postgres://wallet@localhost/wallet".to_string(),
                max_connections: 4,
                min_connections: 1,
                acquire_timeout_secs: 5,
                lock_timeout_ms: 250,
            },
            auth: AuthConfig {
                jwt_secret: "secret".to_string(),
            },
            ledger: LedgerConfig {
                backend: LedgerBackend::Postgres,
                max_adjustment: dec!(1000000),
                list_clients_limit: 200,
                list_transactions_limit: 100,
            },
        }
    }

    #[test]
    fn test_valid_config() {
        let config = sample();
        assert!(config.validate().is_ok());
        assert_eq!(config.database.lock_timeout(), Duration::from_millis(250));
    }

    #[test]
    fn test_memory_backend_needs_no_url() {
        let mut config = sample();
        config.database.url.clear();
        assert!(config.validate().is_err());

        config.ledger.backend = LedgerBackend::Memory;
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_missing_secret_rejected() {
        let mut config = sample();
        config.auth.jwt_secret.clear();
        assert_eq!(config.validate().unwrap_err(), "JWT secret is required");
    }

    #[test]
    fn test_zero_timeouts_rejected() {
        let mut config = sample();
        config.database.lock_timeout_ms = 0;
        assert_eq!(config.validate().unwrap_err(), "Row lock timeout must be positive");

        let mut config = sample();
        config.database.acquire_timeout_secs = 0;
        assert_eq!(
            config.validate().unwrap_err(),
            "Connection acquire timeout must be positive"
        );

        // Applies regardless of backend
        let mut config = sample();
        config.ledger.backend = LedgerBackend::Memory;
        config.database.lock_timeout_ms = 0;
        assert!(config.validate().is_err());
    }
}
