use std::time::Duration;

use secrecy::Secret;
use serde::Deserialize;

use crate::models::page::DEFAULT_PER_PAGE;

const DEFAULT_GEOLOCATION_URL: &str = "https://ipinfo.io";
const DEFAULT_GEOLOCATION_TIMEOUT_MS: u64 = 2_000;

#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    pub database_url: Secret<String>,
    pub host: String,
    pub port: u16,

    // Sessions
    pub session_secure: bool,

    // IP geolocation lookup
    pub geolocation_url: String,
    pub geolocation_token: Option<Secret<String>>,
    pub geolocation_timeout_ms: u64,

    // Requests
    pub default_page_size: u32,
    pub trust_forwarded_for: bool,
}

impl Config {
    pub fn from_env() -> Result<Self, config::ConfigError> {
        // Load .env file if it exists (for local development)
        let _ = dotenvy::dotenv();

        let config = config::Config::builder()
            .add_source(config::Environment::default().separator("__"))
            .build()?;

        Ok(Self {
            database_url: Secret::new(config.get("database_url")?),
            host: config.get("host").unwrap_or_else(|_| "127.0.0.1".to_string()),
            port: config.get("port")?,

            session_secure: config.get("session_secure").unwrap_or(true),

            geolocation_url: config
                .get("geolocation_url")
                .unwrap_or_else(|_| DEFAULT_GEOLOCATION_URL.to_string()),
            geolocation_token: config
                .get::<String>("geolocation_token")
                .ok()
                .filter(|token| !token.is_empty())
                .map(Secret::new),
            geolocation_timeout_ms: config
                .get("geolocation_timeout_ms")
                .unwrap_or(DEFAULT_GEOLOCATION_TIMEOUT_MS),

            default_page_size: config
                .get("default_page_size")
                .unwrap_or(DEFAULT_PER_PAGE),
            trust_forwarded_for: config.get("trust_forwarded_for").unwrap_or(false),
        })
    }

    pub fn geolocation_timeout(&self) -> Duration {
        Duration::from_millis(self.geolocation_timeout_ms)
    }
}

#[cfg(test)]
impl Config {
    /// Configuration for router tests; nothing here is dialed
    pub fn for_tests() -> Self {
        Self {
            database_url: Secret::new("postgres://localhost/voucherd_test".to_string()),
            host: "127.0.0.1".to_string(),
            port: 0,
            session_secure: false,
            geolocation_url: DEFAULT_GEOLOCATION_URL.to_string(),
            geolocation_token: None,
            geolocation_timeout_ms: DEFAULT_GEOLOCATION_TIMEOUT_MS,
            default_page_size: DEFAULT_PER_PAGE,
            trust_forwarded_for: false,
        }
    }
}
