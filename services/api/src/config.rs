//! services/api/src/config.rs
//!
//! Defines the application's configuration structure and loading logic.
//!
//! All configuration is loaded from environment variables at startup. The `.env`
//! file is used for local development.

use std::net::SocketAddr;
use std::path::PathBuf;
use tracing::Level;

/// A custom error type for configuration loading failures.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Missing the environment variable {0}")]
    MissingVar(String),
    #[error("Invalid value for the environment variable {0}: {1}")]
    InvalidValue(String, String),
}

/// Holds all configuration loaded from the environment at startup.
#[derive(Clone, Debug)]
pub struct Config {
    pub bind_address: SocketAddr,
    pub database_url: String,
    pub log_level: Level,
    pub allowed_origin: String,
    pub photos_path: PathBuf,
    pub openai_api_key: Option<String>,
    pub sst_model: String,
    pub tts_voice: String,
    pub companion_model: String,
    pub report_model: String,
}

impl Config {
    /// Loads configuration from environment variables.
    ///
    /// It will look for a `.env` file in the current directory for development,
    /// but this is skipped in test environments to ensure tests are hermetic.
    pub fn from_env() -> Result<Self, ConfigError> {
        if !cfg!(test) {
            dotenvy::dotenv().ok();
        }
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Builds the configuration from an arbitrary key lookup.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let var_or = |key: &str, default: &str| lookup(key).unwrap_or_else(|| default.to_string());

        // --- Server and Database Settings ---
        let bind_address_str = var_or("BIND_ADDRESS", "0.0.0.0:3000");
        let bind_address = bind_address_str.parse::<SocketAddr>().map_err(|e| {
            ConfigError::InvalidValue("BIND_ADDRESS".to_string(), e.to_string())
        })?;

        let database_url = lookup("DATABASE_URL")
            .ok_or_else(|| ConfigError::MissingVar("DATABASE_URL".to_string()))?;

        let log_level_str = var_or("RUST_LOG", "INFO");
        let log_level = log_level_str.parse::<Level>().map_err(|_| {
            ConfigError::InvalidValue(
                "RUST_LOG".to_string(),
                format!("'{}' is not a valid log level", log_level_str),
            )
        })?;

        let allowed_origin = var_or("ALLOWED_ORIGIN", "http://localhost:3000");
        let photos_path = PathBuf::from(var_or("PHOTOS_PATH", "./data/photos"));

        // --- API Keys (optional) ---
        let openai_api_key = lookup("OPENAI_API_KEY");

        // --- Adapter-specific Settings ---
        let sst_model = var_or("SST_MODEL", "whisper-1");
        let tts_voice = var_or("TTS_VOICE", "nova");
        let companion_model = var_or("COMPANION_MODEL", "gpt-4o-mini");
        let report_model = var_or("REPORT_MODEL", "gpt-4o-mini");

        Ok(Self {
            bind_address,
            database_url,
            log_level,
            allowed_origin,
            photos_path,
            openai_api_key,
            sst_model,
            tts_voice,
            companion_model,
            report_model,
        })
    }
}
