// Runtime configuration: built once at startup and handed to the API
// client. Nothing here is read from globals after construction.

use std::time::Duration;

use crate::error::{Error, Result};

/// Environment variable holding the OTX API key.
pub const API_KEY_ENV: &str = "OTXAPI";

/// Environment variable that overrides the API host.
pub const API_URL_ENV: &str = "OTX_API_URL";

pub const DEFAULT_BASE_URL: &str = "https://otx.alienvault.com";

/// Immutable settings for one invocation.
#[derive(Debug, Clone)]
pub struct Config {
    pub base_url: String,
    pub api_key: String,
    /// Per-request timeout. `None` keeps the HTTP client's own default.
    pub timeout: Option<Duration>,
}

impl Config {
    pub fn new(base_url: impl Into<String>, api_key: impl Into<String>) -> Self {
        Config {
            base_url: base_url.into().trim_end_matches('/').to_string(),
            api_key: api_key.into(),
            timeout: None,
        }
    }

    /// Read the API key from `OTXAPI` and the host from `OTX_API_URL`,
    /// falling back to the public OTX host.
    pub fn from_env() -> Result<Self> {
        let api_key = std::env::var(API_KEY_ENV)
            .ok()
            .filter(|key| !key.trim().is_empty())
            .ok_or(Error::MissingCredential)?;
        let base_url = std::env::var(API_URL_ENV).unwrap_or_else(|_| DEFAULT_BASE_URL.into());
        Ok(Config::new(base_url, api_key))
    }

    pub fn with_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.timeout = timeout;
        self
    }
}
