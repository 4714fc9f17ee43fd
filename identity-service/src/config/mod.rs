use serde::Deserialize;
use service_core::config as core_config;
use service_core::error::AppError;
use std::env;

#[derive(Debug, Clone, Deserialize)]
pub struct IdentityConfig {
    #[serde(flatten)]
    pub common: core_config::Config,
    pub environment: Environment,
    pub service_name: String,
    pub service_version: String,
    pub log_level: String,
    pub otlp_endpoint: Option<String>,
    pub database: DatabaseConfig,
    pub registration: RegistrationConfig,
    pub password: PasswordPolicy,
}

#[derive(Debug, Clone, Deserialize, PartialEq)]
#[serde(rename_all = "lowercase")]
pub enum Environment {
    Dev,
    Prod,
}

#[derive(Debug, Clone, Deserialize)]
pub struct DatabaseConfig {
    pub url: String,
    pub max_connections: u32,
    pub min_connections: u32,
    /// Schema every pooled connection is pinned to; the server default when unset.
    pub schema: Option<String>,
}

/// Schema names are interpolated into `SET search_path`, so only plain
/// lowercase identifiers are accepted.
pub fn is_valid_schema_name(name: &str) -> bool {
    let mut chars = name.chars();
    matches!(chars.next(), Some(c) if c.is_ascii_lowercase() || c == '_')
        && chars.all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '_')
        && name.len() <= 63
}

/// Upper bound on a claim PIN's lifetime.
pub const MAX_PIN_TTL_SECONDS: i64 = 86_400;

/// Claim PIN lifetime and generation retries.
#[derive(Debug, Clone, Deserialize)]
pub struct RegistrationConfig {
    pub pin_ttl_seconds: i64,
    pub pin_attempts: u32,
}

impl Default for RegistrationConfig {
    fn default() -> Self {
        Self {
            pin_ttl_seconds: 300,
            pin_attempts: 5,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct PasswordPolicy {
    pub min_length: usize,
    pub max_length: usize,
}

impl Default for PasswordPolicy {
    fn default() -> Self {
        Self {
            min_length: 12,
            max_length: 128,
        }
    }
}

impl IdentityConfig {
    pub fn from_env() -> Result<Self, AppError> {
        dotenvy::dotenv().ok();

        let common_config = core_config::Config::load()?;

        let env_str = env::var("ENVIRONMENT").unwrap_or_else(|_| "dev".to_string());
        let environment: Environment = env_str
            .parse()
            .map_err(|e: String| AppError::ConfigError(anyhow::anyhow!(e)))?;

        let is_prod = environment == Environment::Prod;

        let config = IdentityConfig {
            common: common_config.clone(),
            environment: environment.clone(),
            service_name: get_env("SERVICE_NAME", Some("identity-service"), false)?,
            service_version: get_env("SERVICE_VERSION", Some(env!("CARGO_PKG_VERSION")), false)?,
            log_level: get_env("LOG_LEVEL", Some(&common_config.log_level), false)?,
            otlp_endpoint: env::var("OTLP_ENDPOINT").ok().filter(|s| !s.trim().is_empty()),
            database: DatabaseConfig {
                url: get_env(
                    "DATABASE_URL",
                    Some("postgres://localhost/identity"),
                    is_prod,
                )?,
                max_connections: parse_env("DATABASE_MAX_CONNECTIONS", "10")?,
                min_connections: parse_env("DATABASE_MIN_CONNECTIONS", "2")?,
                schema: env::var("DATABASE_SCHEMA").ok().filter(|s| !s.trim().is_empty()),
            },
            registration: RegistrationConfig {
                pin_ttl_seconds: parse_env("REGISTRATION_PIN_TTL_SECONDS", "300")?,
                pin_attempts: parse_env("REGISTRATION_PIN_ATTEMPTS", "5")?,
            },
            password: PasswordPolicy {
                min_length: parse_env("PASSWORD_MIN_LENGTH", "12")?,
                max_length: parse_env("PASSWORD_MAX_LENGTH", "128")?,
            },
        };

        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), AppError> {
        if self.database.max_connections == 0 {
            return Err(AppError::ConfigError(anyhow::anyhow!(
                "DATABASE_MAX_CONNECTIONS must be greater than 0"
            )));
        }

        if self.database.min_connections > self.database.max_connections {
            return Err(AppError::ConfigError(anyhow::anyhow!(
                "DATABASE_MIN_CONNECTIONS must not exceed DATABASE_MAX_CONNECTIONS"
            )));
        }

        if let Some(schema) = &self.database.schema {
            if !is_valid_schema_name(schema) {
                return Err(AppError::ConfigError(anyhow::anyhow!(
                    "DATABASE_SCHEMA must be a lowercase identifier: {}",
                    schema
                )));
            }
        }

        if self.registration.pin_ttl_seconds <= 0
            || self.registration.pin_ttl_seconds > MAX_PIN_TTL_SECONDS
        {
            return Err(AppError::ConfigError(anyhow::anyhow!(
                "REGISTRATION_PIN_TTL_SECONDS must be between 1 and {}",
                MAX_PIN_TTL_SECONDS
            )));
        }

        if self.registration.pin_attempts == 0 {
            return Err(AppError::ConfigError(anyhow::anyhow!(
                "REGISTRATION_PIN_ATTEMPTS must be positive"
            )));
        }

        if self.password.min_length == 0 || self.password.min_length > self.password.max_length {
            return Err(AppError::ConfigError(anyhow::anyhow!(
                "PASSWORD_MIN_LENGTH must be positive and not exceed PASSWORD_MAX_LENGTH"
            )));
        }

        Ok(())
    }
}

fn get_env(key: &str, default: Option<&str>, is_prod: bool) -> Result<String, AppError> {
    match env::var(key) {
        Ok(val) => Ok(val),
        Err(_) => {
            if is_prod {
                Err(AppError::ConfigError(anyhow::anyhow!(format!(
                    "{} is required in production but not set",
                    key
                ))))
            } else if let Some(def) = default {
                Ok(def.to_string())
            } else {
                Err(AppError::ConfigError(anyhow::anyhow!(format!(
                    "{} is required but not set",
                    key
                ))))
            }
        }
    }
}

fn parse_env<T>(key: &str, default: &str) -> Result<T, AppError>
where
    T: std::str::FromStr,
    T::Err: std::fmt::Display,
{
    get_env(key, Some(default), false)?
        .trim()
        .parse()
        .map_err(|e: T::Err| AppError::ConfigError(anyhow::anyhow!("{} is invalid: {}", key, e)))
}

impl std::str::FromStr for Environment {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "dev" => Ok(Environment::Dev),
            "prod" => Ok(Environment::Prod),
            _ => Err(format!("Invalid environment: {}", s)),
        }
    }
}
