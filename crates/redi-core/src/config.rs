//! Service configuration

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::{Error, Language};

/// Service version reported on the info endpoint
pub const SERVICE_VERSION: &str = "1.0.1";

/// File name prefix of the per-language lexicons
pub const MODEL_FILE_PREFIX: &str = "wikitweetweb";

/// Requests allowed per window for one rate-limit tier
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TierLimit {
    /// Admissions allowed inside one window
    pub requests: usize,
    /// Window length in seconds
    pub window_secs: u64,
}

impl TierLimit {
    pub fn new(requests: usize, window_secs: u64) -> Self {
        Self {
            requests,
            window_secs,
        }
    }

    pub fn window(&self) -> Duration {
        Duration::from_secs(self.window_secs)
    }
}

/// Per-tier rate limits
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RateLimitConfig {
    /// Requests targeting the protected language
    #[serde(default = "default_protected_limit")]
    pub protected: TierLimit,
    /// Requests targeting any other language
    #[serde(default = "default_standard_limit")]
    pub standard: TierLimit,
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            protected: default_protected_limit(),
            standard: default_standard_limit(),
        }
    }
}

fn default_protected_limit() -> TierLimit {
    TierLimit::new(20, 60)
}

fn default_standard_limit() -> TierLimit {
    TierLimit::new(10, 60)
}

/// Configuration for the restoration service
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RediConfig {
    /// Directory holding `wikitweetweb.<lang>.tm` lexicons
    pub model_dir: PathBuf,
    /// Languages the service accepts
    #[serde(default = "default_languages")]
    pub languages: Vec<Language>,
    /// Language that is loaded at startup and never reclaimed
    #[serde(default)]
    pub protected_language: Language,
    /// Idle time after which a non-protected model is unloaded
    #[serde(default = "default_unload_timeout_secs")]
    pub unload_timeout_secs: u64,
    /// How often the reclamation loop scans the cache
    #[serde(default = "default_reclaim_interval_secs")]
    pub reclaim_interval_secs: u64,
    /// Maximum number of models constructed at the same time
    #[serde(default = "default_max_concurrent_loads")]
    pub max_concurrent_loads: usize,
    /// Per-client rate limits
    #[serde(default)]
    pub rate_limit: RateLimitConfig,
    /// Deadline for a request waiting on a model load
    #[serde(default = "default_request_timeout_secs")]
    pub request_timeout_secs: u64,
    /// Resident memory ceiling reported by the health check; `null` disables it
    #[serde(default = "default_memory_limit_mb")]
    pub memory_limit_mb: Option<u64>,
    /// Maximum number of requests processed at once
    #[serde(default = "default_max_in_flight_requests")]
    pub max_in_flight_requests: usize,
}

fn default_languages() -> Vec<Language> {
    Language::ALL.to_vec()
}

fn default_unload_timeout_secs() -> u64 {
    30
}

fn default_reclaim_interval_secs() -> u64 {
    30
}

fn default_max_concurrent_loads() -> usize {
    2
}

fn default_request_timeout_secs() -> u64 {
    30
}

fn default_memory_limit_mb() -> Option<u64> {
    Some(1900)
}

fn default_max_in_flight_requests() -> usize {
    256
}

impl RediConfig {
    /// Create a configuration with defaults for the given model directory
    pub fn from_model_dir(model_dir: impl Into<PathBuf>) -> Self {
        Self {
            model_dir: model_dir.into(),
            languages: default_languages(),
            protected_language: Language::default(),
            unload_timeout_secs: default_unload_timeout_secs(),
            reclaim_interval_secs: default_reclaim_interval_secs(),
            max_concurrent_loads: default_max_concurrent_loads(),
            rate_limit: RateLimitConfig::default(),
            request_timeout_secs: default_request_timeout_secs(),
            memory_limit_mb: default_memory_limit_mb(),
            max_in_flight_requests: default_max_in_flight_requests(),
        }
    }

    /// Set the protected language
    pub fn with_protected(mut self, language: Language) -> Self {
        self.protected_language = language;
        self
    }

    /// Set the idle unload timeout
    pub fn with_unload_timeout(mut self, timeout: Duration) -> Self {
        self.unload_timeout_secs = timeout.as_secs();
        self
    }

    /// Set the global cap on concurrent model loads
    pub fn with_max_concurrent_loads(mut self, max: usize) -> Self {
        self.max_concurrent_loads = max;
        self
    }

    /// Set the per-tier rate limits
    pub fn with_rate_limit(mut self, rate_limit: RateLimitConfig) -> Self {
        self.rate_limit = rate_limit;
        self
    }

    /// Set the resident memory ceiling for the health check
    pub fn with_memory_limit(mut self, limit_mb: Option<u64>) -> Self {
        self.memory_limit_mb = limit_mb;
        self
    }

    /// Load configuration from a JSON file
    pub fn load(path: impl AsRef<Path>) -> crate::Result<Self> {
        let content = std::fs::read_to_string(path.as_ref())?;
        let config: Self = serde_json::from_str(&content)?;
        config.validate()?;
        Ok(config)
    }

    /// Save configuration to a JSON file
    pub fn save(&self, path: impl AsRef<Path>) -> crate::Result<()> {
        let content = serde_json::to_string_pretty(self)?;
        std::fs::write(path.as_ref(), content)?;
        Ok(())
    }

    /// Reject configurations the cache cannot run with
    pub fn validate(&self) -> crate::Result<()> {
        if !self.languages.contains(&self.protected_language) {
            return Err(Error::InvalidConfig(format!(
                "protected language {} is not in the supported set",
                self.protected_language
            )));
        }
        if self.max_concurrent_loads == 0 {
            return Err(Error::InvalidConfig(
                "max_concurrent_loads must be at least 1".to_string(),
            ));
        }
        if self.reclaim_interval_secs == 0 {
            return Err(Error::InvalidConfig(
                "reclaim_interval_secs must be at least 1".to_string(),
            ));
        }
        Ok(())
    }

    /// Path of the lexicon for a language
    pub fn model_path(&self, language: Language) -> PathBuf {
        self.model_dir
            .join(format!("{}.{}.tm", MODEL_FILE_PREFIX, language.code()))
    }

    pub fn unload_timeout(&self) -> Duration {
        Duration::from_secs(self.unload_timeout_secs)
    }

    pub fn reclaim_interval(&self) -> Duration {
        Duration::from_secs(self.reclaim_interval_secs)
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }
}

impl Default for RediConfig {
    fn default() -> Self {
        Self::from_model_dir("./models")
    }
}
