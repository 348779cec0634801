use crate::{FleetError, Result};
use dotenvy::dotenv;
use serde::{Deserialize, Serialize};
use std::env;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    pub core: CoreConfig,
    pub api: ApiConfig,
}

/// Tunables for the coordination core
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CoreConfig {
    /// Root directory for durable data (event archives, workspaces)
    pub data_root: String,
    /// Hard cap on a single content chunk's token count
    pub max_chunk_tokens: usize,
    /// Chunk cache size used by the context assembler
    pub cache_size: usize,
    /// Default lock timeout in seconds when callers do not supply one
    pub default_lock_timeout_secs: u64,
    /// Upper bound on agents registered per day
    pub daily_scaling_limit: usize,
    /// Whether an embedding backend is wired in
    pub embeddings_enabled: bool,
    /// Whether approval routing may fall back to scanning the full roster
    /// when the reporting chain lacks sufficient authority
    pub allow_roster_fallback: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApiConfig {
    pub host: String,
    pub port: u16,
    pub api_key: Option<String>,
    pub allowed_origins: Vec<String>,
}

impl Config {
    pub fn load() -> Result<Self> {
        // Load environment variables from .env file
        match dotenv() {
            Ok(path) => tracing::debug!("Loaded .env file from: {:?}", path),
            Err(e) => tracing::debug!("No .env file loaded: {}", e),
        }

        let core = CoreConfig {
            data_root: env::var("FLEET_DATA_ROOT").unwrap_or_else(|_| "./fleet-data".to_string()),
            max_chunk_tokens: parse_env("FLEET_MAX_CHUNK_TOKENS", crate::constants::MAX_CHUNK_TOKENS)?,
            cache_size: parse_env("FLEET_CACHE_SIZE", 1000)?,
            default_lock_timeout_secs: parse_env(
                "FLEET_LOCK_TIMEOUT_SECS",
                crate::constants::DEFAULT_LOCK_TIMEOUT_SECS,
            )?,
            daily_scaling_limit: parse_env("FLEET_DAILY_SCALING_LIMIT", 50)?,
            embeddings_enabled: parse_env("FLEET_EMBEDDINGS_ENABLED", false)?,
            allow_roster_fallback: parse_env("FLEET_APPROVAL_ROSTER_FALLBACK", true)?,
        };

        if core.max_chunk_tokens == 0 {
            return Err(FleetError::Configuration(
                "FLEET_MAX_CHUNK_TOKENS must be greater than zero".to_string(),
            ));
        }

        // SECURITY: API key is optional in development but validated when set
        let api_key = env::var("FLEET_API_KEY").ok();
        if let Some(key) = &api_key {
            if key.trim().is_empty() {
                return Err(FleetError::Configuration(
                    "FLEET_API_KEY cannot be blank; generate one with: openssl rand -hex 32"
                        .to_string(),
                ));
            }
            if key.len() < 32 {
                return Err(FleetError::Configuration(
                    "FLEET_API_KEY must be at least 32 characters".to_string(),
                ));
            }
        }

        let allowed_origins = env::var("FLEET_ALLOWED_ORIGINS")
            .unwrap_or_else(|_| "http://localhost:3000,http://127.0.0.1:3000".to_string())
            .split(',')
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty())
            .collect();

        let api = ApiConfig {
            host: env::var("FLEET_API_HOST").unwrap_or_else(|_| "127.0.0.1".to_string()),
            port: parse_env("FLEET_API_PORT", 3000u16)?,
            api_key,
            allowed_origins,
        };

        Ok(Config { core, api })
    }
}

impl Default for CoreConfig {
    fn default() -> Self {
        Self {
            data_root: "./fleet-data".to_string(),
            max_chunk_tokens: crate::constants::MAX_CHUNK_TOKENS,
            cache_size: 1000,
            default_lock_timeout_secs: crate::constants::DEFAULT_LOCK_TIMEOUT_SECS,
            daily_scaling_limit: 50,
            embeddings_enabled: false,
            allow_roster_fallback: true,
        }
    }
}

fn parse_env<T: std::str::FromStr>(key: &str, default: T) -> Result<T> {
    match env::var(key) {
        Ok(raw) => raw
            .parse()
            .map_err(|_| FleetError::Configuration(format!("{key} has an invalid value: {raw}"))),
        Err(_) => Ok(default),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serial_test::serial;

    #[test]
    #[serial]
    fn load_uses_defaults_when_env_is_empty() {
        for key in [
            "FLEET_DATA_ROOT",
            "FLEET_MAX_CHUNK_TOKENS",
            "FLEET_API_KEY",
            "FLEET_API_PORT",
        ] {
            env::remove_var(key);
        }

        let config = Config::load().unwrap();
        assert_eq!(config.core.max_chunk_tokens, crate::constants::MAX_CHUNK_TOKENS);
        assert_eq!(config.api.port, 3000);
        assert!(config.core.allow_roster_fallback);
    }

    #[test]
    #[serial]
    fn short_api_key_is_rejected() {
        env::set_var("FLEET_API_KEY", "too-short");
        let result = Config::load();
        env::remove_var("FLEET_API_KEY");
        assert!(matches!(result, Err(FleetError::Configuration(_))));
    }

    #[test]
    #[serial]
    fn invalid_port_is_rejected() {
        env::set_var("FLEET_API_PORT", "not-a-port");
        let result = Config::load();
        env::remove_var("FLEET_API_PORT");
        assert!(matches!(result, Err(FleetError::Configuration(_))));
    }
}
