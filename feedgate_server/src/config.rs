//! Server configuration loaded from environment variables

use feedgate_common::constants;
use std::env;
use std::time::Duration;

/// Deployment mode
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Environment {
    Development,
    Production,
}

/// Where rate-limit windows and anti-forgery tokens live
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StorageBackend {
    /// In-process maps (single instance only)
    Memory,
    /// Shared Redis store, by connection URL
    Redis(String),
}

impl StorageBackend {
    pub fn as_str(&self) -> &'static str {
        match self {
            StorageBackend::Memory => "memory",
            StorageBackend::Redis(_) => "redis",
        }
    }
}

#[derive(Debug, Clone)]
pub struct Config {
    /// Host to bind to
    pub host: String,

    /// Port for the HTTP API
    pub port: u16,

    /// Deployment mode (FEEDGATE_ENV)
    pub environment: Environment,

    /// Accepted bearer keys. Empty means key enforcement is disabled,
    /// which is only permitted outside production.
    pub api_keys: Vec<String>,

    /// Anti-forgery token lifetime in seconds
    pub token_ttl_secs: u64,

    /// Maximum feed URLs per batch
    pub max_feeds: usize,

    /// Maximum request body size in bytes
    pub max_body_bytes: usize,

    /// Inclusive bound for `days_back`
    pub min_days_back: u32,
    pub max_days_back: u32,

    /// Per-lookup DNS timeout in seconds
    pub dns_timeout_secs: u64,

    /// Rate limit / token backing store
    pub storage: StorageBackend,

    /// Downstream renderer endpoint
    pub render_url: String,

    /// Downstream renderer timeout in seconds
    pub render_timeout_secs: u64,

    /// Allowed CORS origins; empty means any origin
    pub cors_origins: Vec<String>,

    /// Take the client address from X-Forwarded-For / CF-Connecting-IP
    pub trust_proxy_headers: bool,
}

impl Config {
    /// Load configuration from environment variables
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Load configuration from an arbitrary key lookup
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        let environment = match get("FEEDGATE_ENV").as_deref().map(str::trim) {
            None | Some("development") | Some("dev") => Environment::Development,
            Some("production") | Some("prod") => Environment::Production,
            Some(_) => return Err(ConfigError::Invalid("FEEDGATE_ENV")),
        };

        let api_keys = parse_csv(get("API_KEYS").as_deref().unwrap_or(""));
        if api_keys.is_empty() && environment == Environment::Production {
            return Err(ConfigError::MissingApiKeys);
        }

        let storage = match get("RATELIMIT_STORAGE_URI") {
            None => StorageBackend::Memory,
            Some(uri) if uri.trim() == "memory://" => StorageBackend::Memory,
            Some(uri) if uri.starts_with("redis://") || uri.starts_with("rediss://") => {
                StorageBackend::Redis(uri.trim().to_string())
            }
            Some(_) => return Err(ConfigError::Invalid("RATELIMIT_STORAGE_URI")),
        };

        let config = Self {
            host: get("HOST").unwrap_or_else(|| "0.0.0.0".to_string()),
            port: parse_or(get("PORT"), 5002, "PORT")?,
            environment,
            api_keys,
            token_ttl_secs: parse_or(
                get("CSRF_TOKEN_TTL_SECS"),
                constants::TOKEN_TTL_SECONDS,
                "CSRF_TOKEN_TTL_SECS",
            )?,
            max_feeds: parse_or(get("MAX_FEEDS"), constants::MAX_FEEDS, "MAX_FEEDS")?,
            max_body_bytes: parse_or(
                get("MAX_BODY_BYTES"),
                constants::MAX_BODY_BYTES,
                "MAX_BODY_BYTES",
            )?,
            min_days_back: parse_or(
                get("MIN_DAYS_BACK"),
                constants::MIN_DAYS_BACK,
                "MIN_DAYS_BACK",
            )?,
            max_days_back: parse_or(
                get("MAX_DAYS_BACK"),
                constants::MAX_DAYS_BACK,
                "MAX_DAYS_BACK",
            )?,
            dns_timeout_secs: parse_or(get("DNS_TIMEOUT_SECS"), 5, "DNS_TIMEOUT_SECS")?,
            storage,
            render_url: get("RENDER_URL")
                .unwrap_or_else(|| "http://127.0.0.1:5003/render".to_string()),
            render_timeout_secs: parse_or(get("RENDER_TIMEOUT_SECS"), 120, "RENDER_TIMEOUT_SECS")?,
            cors_origins: match get("CORS_ORIGINS") {
                Some(raw) if raw.trim() != "*" => parse_csv(&raw),
                _ => Vec::new(),
            },
            trust_proxy_headers: get("TRUST_PROXY_HEADERS")
                .map(|v| matches!(v.trim().to_ascii_lowercase().as_str(), "1" | "true" | "yes" | "on"))
                .unwrap_or(false),
        };

        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<(), ConfigError> {
        if self.token_ttl_secs == 0 {
            return Err(ConfigError::Invalid("CSRF_TOKEN_TTL_SECS"));
        }
        if self.max_feeds == 0 {
            return Err(ConfigError::Invalid("MAX_FEEDS"));
        }
        if self.max_body_bytes == 0 {
            return Err(ConfigError::Invalid("MAX_BODY_BYTES"));
        }
        if self.dns_timeout_secs == 0 {
            return Err(ConfigError::Invalid("DNS_TIMEOUT_SECS"));
        }
        if self.min_days_back == 0 || self.min_days_back > self.max_days_back {
            return Err(ConfigError::DaysBackRange {
                min: self.min_days_back,
                max: self.max_days_back,
            });
        }
        if url::Url::parse(&self.render_url).is_err() {
            return Err(ConfigError::Invalid("RENDER_URL"));
        }
        Ok(())
    }

    /// Whether bearer keys are enforced
    pub fn api_keys_enforced(&self) -> bool {
        !self.api_keys.is_empty()
    }

    pub fn token_ttl(&self) -> Duration {
        Duration::from_secs(self.token_ttl_secs)
    }

    pub fn dns_timeout(&self) -> Duration {
        Duration::from_secs(self.dns_timeout_secs)
    }

    pub fn render_timeout(&self) -> Duration {
        Duration::from_secs(self.render_timeout_secs)
    }

    /// Body cap in whole kilobytes, as reported to clients
    pub fn max_body_kb(&self) -> usize {
        self.max_body_bytes / 1024
    }
}

fn parse_csv(raw: &str) -> Vec<String> {
    raw.split(',')
        .map(|s| s.trim())
        .filter(|s| !s.is_empty())
        .map(|s| s.to_string())
        .collect()
}

fn parse_or<T: std::str::FromStr>(
    value: Option<String>,
    default: T,
    key: &'static str,
) -> Result<T, ConfigError> {
    match value {
        Some(v) => v.trim().parse().map_err(|_| ConfigError::Invalid(key)),
        None => Ok(default),
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Invalid value for environment variable: {0}")]
    Invalid(&'static str),

    #[error("API_KEYS must be set when FEEDGATE_ENV=production")]
    MissingApiKeys,

    #[error("Invalid days_back range: {min}..={max}")]
    DaysBackRange { min: u32, max: u32 },
}
