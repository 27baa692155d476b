//! services/api/src/config.rs
//!
//! Defines the application's configuration structure and loading logic.
//!
//! All configuration is loaded from environment variables at startup. The `.env`
//! file is used for local development.

use std::net::SocketAddr;
use std::str::FromStr;
use tracing::Level;

/// A custom error type for configuration loading failures.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Missing the environment variable {0}")]
    MissingVar(String),
    #[error("Invalid value for the environment variable {0}: {1}")]
    InvalidValue(String, String),
}

/// Which remote model backs the generation engine.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ModelProvider {
    Gemini,
    OpenAi,
}

impl FromStr for ModelProvider {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "gemini" => Ok(ModelProvider::Gemini),
            "openai" => Ok(ModelProvider::OpenAi),
            other => Err(format!("'{}' is not a supported provider (gemini, openai)", other)),
        }
    }
}

/// Holds all configuration loaded from the environment at startup.
#[derive(Clone, Debug)]
pub struct Config {
    pub bind_address: SocketAddr,
    pub database_url: String,
    pub log_level: Level,
    pub model_provider: ModelProvider,
    pub openai_api_key: Option<String>,
    pub gemini_api_key: Option<String>,
    pub model_id: String,
    pub assistant_name: String,
    pub daily_request_limit: u32,
    pub session_list_limit: usize,
    pub cors_origin: String,
}

impl Config {
    /// Loads configuration from environment variables.
    ///
    /// It will look for a `.env` file in the current directory for development,
    /// but this is skipped in test environments to ensure tests are hermetic.
    pub fn from_env() -> Result<Self, ConfigError> {
        // Only load from .env in non-test mode to avoid contamination.
        if !cfg!(test) {
            dotenvy::dotenv().ok();
        }
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Builds the configuration from any key lookup.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        // --- Load Server and Database Settings ---
        let bind_address_str = lookup("BIND_ADDRESS").unwrap_or_else(|| "0.0.0.0:3000".to_string());
        let bind_address = bind_address_str.parse::<SocketAddr>().map_err(|e| {
            ConfigError::InvalidValue("BIND_ADDRESS".to_string(), e.to_string())
        })?;

        let database_url =
            lookup("DATABASE_URL").ok_or_else(|| ConfigError::MissingVar("DATABASE_URL".to_string()))?;

        let log_level_str = lookup("RUST_LOG").unwrap_or_else(|| "INFO".to_string());
        let log_level = log_level_str.parse::<Level>().map_err(|_| {
            ConfigError::InvalidValue(
                "RUST_LOG".to_string(),
                format!("'{}' is not a valid log level", log_level_str),
            )
        })?;

        // --- Load Model Settings ---
        let model_provider = lookup("MODEL_PROVIDER")
            .unwrap_or_else(|| "gemini".to_string())
            .parse::<ModelProvider>()
            .map_err(|e| ConfigError::InvalidValue("MODEL_PROVIDER".to_string(), e))?;

        // The selected provider's key is required, the other one is optional.
        let openai_api_key = lookup("OPENAI_API_KEY");
        let gemini_api_key = lookup("GEMINI_API_KEY");
        match model_provider {
            ModelProvider::Gemini if gemini_api_key.is_none() => {
                return Err(ConfigError::MissingVar("GEMINI_API_KEY".to_string()))
            }
            ModelProvider::OpenAi if openai_api_key.is_none() => {
                return Err(ConfigError::MissingVar("OPENAI_API_KEY".to_string()))
            }
            _ => {}
        }

        let model_id = lookup("MODEL_ID").unwrap_or_else(|| "gemini-2.5-flash".to_string());
        let assistant_name = lookup("ASSISTANT_NAME").unwrap_or_else(|| "Aivan".to_string());

        // --- Load Limits ---
        let daily_request_limit = parse_or("DAILY_REQUEST_LIMIT", lookup("DAILY_REQUEST_LIMIT"), 20)?;
        let session_list_limit = parse_or("SESSION_LIST_LIMIT", lookup("SESSION_LIST_LIMIT"), 20)?;

        let cors_origin = lookup("CORS_ORIGIN").unwrap_or_else(|| "http://localhost:3000".to_string());

        Ok(Self {
            bind_address,
            database_url,
            log_level,
            model_provider,
            openai_api_key,
            gemini_api_key,
            model_id,
            assistant_name,
            daily_request_limit,
            session_list_limit,
            cors_origin,
        })
    }
}

fn parse_or<T: FromStr>(key: &str, value: Option<String>, default: T) -> Result<T, ConfigError>
where
    T::Err: std::fmt::Display,
{
    match value {
        None => Ok(default),
        Some(raw) => raw
            .trim()
            .parse::<T>()
            .map_err(|e| ConfigError::InvalidValue(key.to_string(), e.to_string())),
    }
}
