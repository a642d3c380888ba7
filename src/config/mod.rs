//! Configuration management for the lending service
//!
//! Loads and validates configuration from environment variables (a `.env`
//! file is honored when present).

use rust_decimal::Decimal;
use std::env;
use std::str::FromStr;
use thiserror::Error;

use crate::loan::LendingPolicy;

/// Configuration errors
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Missing required environment variable: {0}")]
    MissingEnvVar(String),

    #[error("Invalid environment value: {0}")]
    InvalidValue(String),

    #[error("Invalid port number: {0}")]
    InvalidPort(String),
}

/// Application environment
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub enum Environment {
    #[default]
    Development,
    Staging,
    Production,
}

impl Environment {
    /// Parse environment from string
    pub fn parse(s: &str) -> Result<Self, ConfigError> {
        match s.to_lowercase().as_str() {
            "dev" | "development" => Ok(Environment::Development),
            "staging" => Ok(Environment::Staging),
            "prod" | "production" => Ok(Environment::Production),
            _ => Err(ConfigError::InvalidValue(format!(
                "Invalid environment: '{}'. Expected: dev, staging, or prod",
                s
            ))),
        }
    }

    pub fn is_production(&self) -> bool {
        matches!(self, Environment::Production)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Environment::Development => "development",
            Environment::Staging => "staging",
            Environment::Production => "production",
        }
    }
}

/// Which persistence backend the engine runs against
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StoreBackend {
    Postgres,
    Memory,
}

impl StoreBackend {
    pub fn parse(s: &str) -> Result<Self, ConfigError> {
        match s.to_lowercase().as_str() {
            "postgres" | "pg" => Ok(StoreBackend::Postgres),
            "memory" | "mem" => Ok(StoreBackend::Memory),
            _ => Err(ConfigError::InvalidValue(format!(
                "Invalid store backend: '{}'. Expected: postgres or memory",
                s
            ))),
        }
    }
}

/// Application configuration
#[derive(Debug, Clone)]
pub struct Config {
    /// Database connection URL
    pub database_url: String,

    /// Persistence backend
    pub store_backend: StoreBackend,

    /// Current environment
    pub environment: Environment,

    /// Server port
    pub port: u16,

    /// Maximum database connections
    pub db_max_connections: u32,

    /// CORS allowed origins
    pub cors_allowed_origins: Option<String>,

    /// Log level (RUST_LOG)
    pub log_level: String,

    /// JWT secret for bearer token verification
    pub jwt_secret: String,

    /// Access token TTL in seconds (default: 900 = 15 minutes)
    pub jwt_access_token_ttl_seconds: i64,

    /// Flat interest rate in percent applied when neither party proposes one
    pub default_interest_rate: Decimal,

    /// Days past the due date before an unpaid loan may be defaulted
    pub repayment_grace_days: i64,

    /// Six-field cron expression for the overdue sweep
    pub overdue_sweep_cron: String,
}

impl Config {
    /// Load configuration from environment variables
    pub fn from_env() -> Result<Self, ConfigError> {
        dotenvy::dotenv().ok();

        let environment = env::var("ENVIRONMENT")
            .map(|s| Environment::parse(&s))
            .unwrap_or(Ok(Environment::Development))?;

        let store_backend = env::var("STORE_BACKEND")
            .map(|s| StoreBackend::parse(&s))
            .unwrap_or(Ok(StoreBackend::Postgres))?;

        let database_url = match (env::var("DATABASE_URL"), store_backend) {
            (Ok(url), _) => url,
            (Err(_), StoreBackend::Memory) => String::new(),
            (Err(_), StoreBackend::Postgres) => {
                return Err(ConfigError::MissingEnvVar("DATABASE_URL".to_string()))
            }
        };

        let port = env::var("PORT")
            .unwrap_or_else(|_| "3001".to_string())
            .parse::<u16>()
            .map_err(|_| ConfigError::InvalidPort("PORT must be a valid number".to_string()))?;

        let db_max_connections = env::var("DB_MAX_CONNECTIONS")
            .unwrap_or_else(|_| "5".to_string())
            .parse::<u32>()
            .unwrap_or(5);

        let cors_allowed_origins = env::var("CORS_ALLOWED_ORIGINS").ok();

        let log_level = env::var("RUST_LOG").unwrap_or_else(|_| "info".to_string());

        let jwt_secret = env::var("JWT_SECRET")
            .unwrap_or_else(|_| "development-secret-change-in-production".to_string());

        if environment.is_production() && jwt_secret.starts_with("development-") {
            return Err(ConfigError::MissingEnvVar("JWT_SECRET".to_string()));
        }

        let jwt_access_token_ttl_seconds = env::var("JWT_ACCESS_TOKEN_TTL_SECONDS")
            .unwrap_or_else(|_| "900".to_string())
            .parse::<i64>()
            .unwrap_or(900);

        let default_interest_rate = parse_interest_rate(
            &env::var("DEFAULT_INTEREST_RATE").unwrap_or_else(|_| "10".to_string()),
        )?;

        let repayment_grace_days = env::var("REPAYMENT_GRACE_DAYS")
            .unwrap_or_else(|_| "7".to_string())
            .parse::<i64>()
            .map_err(|_| {
                ConfigError::InvalidValue("REPAYMENT_GRACE_DAYS must be a whole number".to_string())
            })?;

        if repayment_grace_days < 0 {
            return Err(ConfigError::InvalidValue(
                "REPAYMENT_GRACE_DAYS cannot be negative".to_string(),
            ));
        }

        let overdue_sweep_cron =
            env::var("OVERDUE_SWEEP_CRON").unwrap_or_else(|_| "0 */5 * * * *".to_string());

        Ok(Config {
            database_url,
            store_backend,
            environment,
            port,
            db_max_connections,
            cors_allowed_origins,
            log_level,
            jwt_secret,
            jwt_access_token_ttl_seconds,
            default_interest_rate,
            repayment_grace_days,
            overdue_sweep_cron,
        })
    }

    /// Lending rules handed to the engine
    pub fn lending_policy(&self) -> LendingPolicy {
        LendingPolicy {
            default_interest_rate: self.default_interest_rate,
            grace_days: self.repayment_grace_days,
        }
    }

    /// Database URL with the password masked, for logging
    pub fn database_url_masked(&self) -> String {
        if let Some(at_pos) = self.database_url.find('@') {
            if let Some(colon_pos) = self.database_url[..at_pos].rfind(':') {
                let prefix = &self.database_url[..colon_pos + 1];
                let suffix = &self.database_url[at_pos..];
                return format!("{}****{}", prefix, suffix);
            }
        }
        self.database_url.clone()
    }
}

fn parse_interest_rate(raw: &str) -> Result<Decimal, ConfigError> {
    let rate = Decimal::from_str(raw.trim()).map_err(|_| {
        ConfigError::InvalidValue(format!("DEFAULT_INTEREST_RATE is not a decimal: '{}'", raw))
    })?;
    if rate.is_sign_negative() || rate > Decimal::ONE_HUNDRED {
        return Err(ConfigError::InvalidValue(
            "DEFAULT_INTEREST_RATE must be between 0 and 100".to_string(),
        ));
    }
    Ok(rate)
}
