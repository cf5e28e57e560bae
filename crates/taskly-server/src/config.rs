use std::fmt;
use std::time::Duration;

use thiserror::Error;

const DEFAULT_PORT: u16 = 5000;
const DEFAULT_CLIENT_URL: &str = "http://localhost:3000";

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("{0} is required")]
    Missing(&'static str),
    #[error("{key} is invalid: {value:?}")]
    Invalid { key: &'static str, value: String },
}

/// Process-wide settings, read once at startup and never mutated afterwards.
#[derive(Clone)]
pub struct Config {
    pub database_url: String,
    pub jwt_secret: String,
    pub refresh_token_secret: String,
    pub port: u16,
    /// Browser origins allowed to issue state-changing requests.
    pub allowed_origins: Vec<String>,
    /// Production mode marks session cookies `Secure`.
    pub production: bool,
    /// `None` leaves expired refresh tokens to lazy expiry.
    pub sweep_interval: Option<Duration>,
}

impl Config {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let get = |key: &str| {
            lookup(key)
                .map(|v| v.trim().to_string())
                .filter(|v| !v.is_empty())
        };
        let required = |key: &'static str| get(key).ok_or(ConfigError::Missing(key));

        let port = match get("PORT") {
            Some(v) => v
                .parse::<u16>()
                .map_err(|_| ConfigError::Invalid { key: "PORT", value: v })?,
            None => DEFAULT_PORT,
        };

        let sweep_secs = match get("REFRESH_SWEEP_INTERVAL_SECS") {
            Some(v) => v.parse::<u64>().map_err(|_| ConfigError::Invalid {
                key: "REFRESH_SWEEP_INTERVAL_SECS",
                value: v,
            })?,
            None => 0,
        };

        let allowed_origins = get("CLIENT_URL")
            .unwrap_or_else(|| DEFAULT_CLIENT_URL.to_string())
            .split(',')
            .map(|s| s.trim().trim_end_matches('/'))
            .filter(|s| !s.is_empty())
            .map(|s| s.to_string())
            .collect();

        Ok(Config {
            database_url: required("DATABASE_URL")?,
            jwt_secret: required("JWT_SECRET")?,
            refresh_token_secret: required("REFRESH_TOKEN_SECRET")?,
            port,
            allowed_origins,
            production: get("APP_ENV").is_some_and(|v| v.eq_ignore_ascii_case("production")),
            sweep_interval: (sweep_secs > 0).then(|| Duration::from_secs(sweep_secs)),
        })
    }
}

// Secrets stay out of logs.
impl fmt::Debug for Config {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Config")
            .field("port", &self.port)
            .field("allowed_origins", &self.allowed_origins)
            .field("production", &self.production)
            .field("sweep_interval", &self.sweep_interval)
            .finish_non_exhaustive()
    }
}
