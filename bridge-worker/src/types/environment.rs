//! Environment configuration for different deployment stages

use std::env;
use std::path::PathBuf;
use std::time::Duration;

use lmstudio_client::LmStudioConfig;

/// Application environment configuration
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Environment {
    /// Production environment
    Production,
    /// Staging environment
    Staging,
    /// Development environment (local daemon and bus)
    Development,
}

impl Environment {
    /// Creates an Environment from the `APP_ENV` environment variable
    ///
    /// # Panics
    ///
    /// Panics if `APP_ENV` contains an invalid value
    #[must_use]
    pub fn from_env() -> Self {
        let env = env::var("APP_ENV")
            .unwrap_or_else(|_| "development".to_string())
            .trim()
            .to_lowercase();

        match env.as_str() {
            "production" => Self::Production,
            "staging" => Self::Staging,
            "development" => Self::Development,
            _ => panic!("Invalid environment: {env}"),
        }
    }

    /// Returns the NATS server URL with environment variable override support
    #[must_use]
    pub fn nats_url(&self) -> String {
        env::var("NATS_URL").unwrap_or_else(|_| "nats://localhost:4222".to_string())
    }

    /// Returns the LM Studio HTTP API base URL with environment variable
    /// override support
    #[must_use]
    pub fn lmstudio_base_url(&self) -> String {
        env::var("LMSTUDIO_BASE_URL").unwrap_or_else(|_| "http://localhost:1234".to_string())
    }

    /// Returns the root of the on-disk model store
    ///
    /// Defaults to `~/.lmstudio/models`, the daemon's own download location.
    #[must_use]
    pub fn models_dir(&self) -> PathBuf {
        env::var("LMSTUDIO_MODELS_DIR").map_or_else(
            |_| {
                dirs::home_dir()
                    .unwrap_or_else(|| PathBuf::from("."))
                    .join(".lmstudio")
                    .join("models")
            },
            PathBuf::from,
        )
    }

    /// Returns the transport-level timeout for daemon HTTP calls in seconds
    #[must_use]
    pub fn http_timeout_secs(&self) -> u64 {
        env::var("LMSTUDIO_HTTP_TIMEOUT_SECS")
            .ok()
            .and_then(|v| v.parse().ok())
            .unwrap_or(120)
    }

    /// Builds the LM Studio client configuration for this environment
    #[must_use]
    pub fn lmstudio_config(&self) -> LmStudioConfig {
        LmStudioConfig {
            base_url: self.lmstudio_base_url(),
            models_dir: self.models_dir(),
            request_timeout: Duration::from_secs(self.http_timeout_secs()),
        }
    }
}
