//! Storefront client configuration loaded from environment variables.
//!
//! # Environment Variables
//!
//! All variables are optional:
//! - `VITRINE_API_URL` - Backend base URL (default: `https://localhost:7200/api`)
//! - `VITRINE_STATE_FILE` - Client state file (default: `.vitrine/state.json`)
//! - `VITRINE_HTTP_TIMEOUT_SECS` - Per-request timeout (default: 30)
//! - `VITRINE_CATALOG_TTL_SECS` - Product list cache lifetime (default: 300)
//! - `SENTRY_DSN` - Sentry error tracking DSN

use std::path::PathBuf;
use std::time::Duration;

use thiserror::Error;
use url::Url;

const DEFAULT_API_URL: &str = "https://localhost:7200/api";
const DEFAULT_STATE_FILE: &str = ".vitrine/state.json";
const DEFAULT_HTTP_TIMEOUT_SECS: &str = "30";
const DEFAULT_CATALOG_TTL_SECS: &str = "300";

/// Configuration errors that can occur during loading.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Invalid environment variable {0}: {1}")]
    InvalidEnvVar(String, String),
}

/// Storefront client configuration.
#[derive(Debug, Clone)]
pub struct StorefrontConfig {
    /// Backend base URL, always ending in `/`
    pub api_url: Url,
    /// File holding the persisted order id and credentials
    pub state_file: PathBuf,
    /// Per-request HTTP timeout
    pub http_timeout: Duration,
    /// How long the product list stays cached
    pub catalog_ttl: Duration,
    /// Sentry DSN for error tracking
    pub sentry_dsn: Option<String>,
}

impl StorefrontConfig {
    /// Load configuration from environment variables.
    ///
    /// Calls `dotenvy::dotenv()` to load from `.env` file if present.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError` if a variable is present but invalid.
    pub fn from_env() -> Result<Self, ConfigError> {
        // Load .env file if present (ignore errors if not found)
        let _ = dotenvy::dotenv();

        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build configuration from an arbitrary key lookup.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError` if a variable is present but invalid.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let env = Env(lookup);

        let api_url = parse_api_url(&env.get_or_default("VITRINE_API_URL", DEFAULT_API_URL))?;
        let state_file = PathBuf::from(env.get_or_default("VITRINE_STATE_FILE", DEFAULT_STATE_FILE));
        let http_timeout = env.get_secs("VITRINE_HTTP_TIMEOUT_SECS", DEFAULT_HTTP_TIMEOUT_SECS)?;
        let catalog_ttl = env.get_secs("VITRINE_CATALOG_TTL_SECS", DEFAULT_CATALOG_TTL_SECS)?;
        let sentry_dsn = env.get_optional("SENTRY_DSN");

        Ok(Self {
            api_url,
            state_file,
            http_timeout,
            catalog_ttl,
            sentry_dsn,
        })
    }

    /// Configuration pointing at `api_url` with every other value defaulted.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError` if `api_url` is not an http(s) URL.
    pub fn for_api_url(api_url: &str) -> Result<Self, ConfigError> {
        let api_url = api_url.to_string();
        Self::from_lookup(move |key| (key == "VITRINE_API_URL").then(|| api_url.clone()))
    }
}

// =============================================================================
// Helper Functions
// =============================================================================

struct Env<F>(F);

impl<F> Env<F>
where
    F: Fn(&str) -> Option<String>,
{
    /// Get an optional variable, treating blank values as unset.
    fn get_optional(&self, key: &str) -> Option<String> {
        (self.0)(key).filter(|value| !value.trim().is_empty())
    }

    /// Get a variable with a default value.
    fn get_or_default(&self, key: &str, default: &str) -> String {
        self.get_optional(key)
            .unwrap_or_else(|| default.to_string())
    }

    /// Get a positive number of seconds.
    fn get_secs(&self, key: &str, default: &str) -> Result<Duration, ConfigError> {
        let secs = self
            .get_or_default(key, default)
            .trim()
            .parse::<u64>()
            .map_err(|e| ConfigError::InvalidEnvVar(key.to_string(), e.to_string()))?;
        if secs == 0 {
            return Err(ConfigError::InvalidEnvVar(
                key.to_string(),
                "must be greater than zero".to_string(),
            ));
        }
        Ok(Duration::from_secs(secs))
    }
}

/// Parse the backend URL and make sure relative joins keep its path.
fn parse_api_url(raw: &str) -> Result<Url, ConfigError> {
    let invalid = |reason: String| ConfigError::InvalidEnvVar("VITRINE_API_URL".to_string(), reason);

    let mut url = Url::parse(raw.trim()).map_err(|e| invalid(e.to_string()))?;
    if !matches!(url.scheme(), "http" | "https") {
        return Err(invalid(format!("unsupported scheme '{}'", url.scheme())));
    }
    if !url.path().ends_with('/') {
        let path = format!("{}/", url.path());
        url.set_path(&path);
    }
    Ok(url)
}
