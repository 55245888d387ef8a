use secrecy::Secret;
use serde::Deserialize;
use service_core::config::{self as core_config, get_env, get_env_or};
use service_core::error::AppError;
use std::env;
use std::str::FromStr;
use std::time::Duration;

pub const DEFAULT_AUTHORITY_BASE_URL: &str = "https://gw.fbr.gov.pk/di_data/v1/di";

#[derive(Debug, Clone, Deserialize)]
pub struct EinvoiceConfig {
    #[serde(flatten)]
    pub common: core_config::Config,
    pub store: StoreBackend,
    pub mongodb: MongoConfig,
    pub authority: AuthorityConfig,
    pub retry: RetryConfig,
    pub otlp_endpoint: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct MongoConfig {
    pub uri: String,
    pub database: String,
}

#[derive(Debug, Clone, Copy, Deserialize, PartialEq)]
#[serde(rename_all = "lowercase")]
pub enum StoreBackend {
    Mongo,
    Memory,
}

#[derive(Debug, Clone, Copy, Deserialize, PartialEq)]
#[serde(rename_all = "lowercase")]
pub enum AuthorityEnvironment {
    Sandbox,
    Production,
}

#[derive(Debug, Clone, Deserialize)]
pub struct AuthorityConfig {
    pub enabled: bool,
    pub environment: AuthorityEnvironment,
    pub base_url: String,
    pub timeout_secs: u64,
    /// Used when a request carries no credential of its own.
    pub access_token: Option<Secret<String>>,
}

impl AuthorityConfig {
    fn endpoint(&self, name: &str) -> String {
        let suffix = match self.environment {
            AuthorityEnvironment::Sandbox => "_sb",
            AuthorityEnvironment::Production => "",
        };
        format!("{}/{}{}", self.base_url.trim_end_matches('/'), name, suffix)
    }

    pub fn validate_url(&self) -> String {
        self.endpoint("validateinvoicedata")
    }

    pub fn submit_url(&self) -> String {
        self.endpoint("postinvoicedata")
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct RetryConfig {
    pub max_attempts: u32,
    /// Linear backoff unit: attempt N waits N units.
    pub backoff_ms: u64,
}

impl EinvoiceConfig {
    pub fn load() -> Result<Self, AppError> {
        // Load common config (handles .env and APP__ prefix)
        let common = core_config::Config::load()?;
        let is_prod = core_config::Config::is_production();

        let store: StoreBackend = parse_setting("STORE_BACKEND", &get_env_or("STORE_BACKEND", "mongo"))?;
        let mongo_uri = match store {
            StoreBackend::Mongo => get_env("MONGODB_URI", Some("mongodb://localhost:27017"), is_prod)?,
            StoreBackend::Memory => get_env_or("MONGODB_URI", ""),
        };

        Ok(EinvoiceConfig {
            common,
            store,
            mongodb: MongoConfig {
                uri: mongo_uri,
                database: get_env_or("MONGODB_DATABASE", "einvoice_db"),
            },
            authority: AuthorityConfig {
                enabled: parse_setting("FBR_ENABLED", &get_env_or("FBR_ENABLED", "true"))?,
                environment: parse_setting(
                    "FBR_ENVIRONMENT",
                    &get_env("FBR_ENVIRONMENT", Some("sandbox"), is_prod)?,
                )?,
                base_url: get_env_or("FBR_BASE_URL", DEFAULT_AUTHORITY_BASE_URL),
                timeout_secs: parse_setting("FBR_TIMEOUT_SECS", &get_env_or("FBR_TIMEOUT_SECS", "30"))?,
                access_token: env::var("FBR_ACCESS_TOKEN")
                    .ok()
                    .filter(|token| !token.is_empty())
                    .map(Secret::new),
            },
            retry: RetryConfig {
                max_attempts: parse_setting(
                    "SUBMIT_MAX_ATTEMPTS",
                    &get_env_or("SUBMIT_MAX_ATTEMPTS", "3"),
                )?,
                backoff_ms: parse_setting(
                    "SUBMIT_BACKOFF_MS",
                    &get_env_or("SUBMIT_BACKOFF_MS", "1000"),
                )?,
            },
            otlp_endpoint: env::var("OTLP_ENDPOINT").ok().filter(|e| !e.is_empty()),
        })
    }
}

fn parse_setting<T>(key: &str, raw: &str) -> Result<T, AppError>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    raw.trim()
        .parse()
        .map_err(|e| AppError::ConfigError(anyhow::anyhow!("Invalid value for {}: {}", key, e)))
}

impl FromStr for StoreBackend {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "mongo" | "mongodb" => Ok(StoreBackend::Mongo),
            "memory" => Ok(StoreBackend::Memory),
            _ => Err(format!("Invalid store backend: {}", s)),
        }
    }
}

impl FromStr for AuthorityEnvironment {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "sandbox" => Ok(AuthorityEnvironment::Sandbox),
            "production" | "prod" => Ok(AuthorityEnvironment::Production),
            _ => Err(format!("Invalid authority environment: {}", s)),
        }
    }
}
