//! Server state: the model cache and rate limiter shared by all handlers

use std::path::PathBuf;
use std::sync::Arc;

use metrics_exporter_prometheus::PrometheusHandle;
use redi_core::{Language, Lexicon, RediConfig};

use crate::cache::{ModelCache, ModelLoader};
use crate::rate_limit::{RateLimiter, Tier};

/// Loads `wikitweetweb.<lang>.tm` lexicons from the model directory
#[derive(Debug, Clone)]
pub struct LexiconLoader {
    config: Arc<RediConfig>,
}

impl LexiconLoader {
    pub fn new(config: Arc<RediConfig>) -> Self {
        Self { config }
    }

    pub fn model_path(&self, language: Language) -> PathBuf {
        self.config.model_path(language)
    }
}

impl ModelLoader for LexiconLoader {
    type Model = Lexicon;

    fn load(&self, language: Language) -> redi_core::Result<Lexicon> {
        let path = self.model_path(language);
        let lexicon = Lexicon::load(&path)?;

        tracing::info!(
            language = %language,
            entries = lexicon.len(),
            path = %path.display(),
            "Lexicon parsed"
        );

        Ok(lexicon)
    }
}

/// State handed to every request handler
pub struct AppState {
    pub config: Arc<RediConfig>,
    pub cache: Arc<ModelCache<LexiconLoader>>,
    pub limiter: Arc<RateLimiter>,
    /// Required `X-API-Key` value; `None` disables the check
    pub api_key: Option<String>,
    /// Prometheus handle backing `/metrics`
    pub metrics: Option<PrometheusHandle>,
}

impl AppState {
    pub fn new(config: RediConfig) -> Self {
        let config = Arc::new(config);
        let cache = ModelCache::new(LexiconLoader::new(Arc::clone(&config)), &config);
        let limiter = RateLimiter::new(config.rate_limit);

        Self {
            config,
            cache: Arc::new(cache),
            limiter: Arc::new(limiter),
            api_key: None,
            metrics: None,
        }
    }

    pub fn with_api_key(mut self, api_key: Option<String>) -> Self {
        self.api_key = api_key.filter(|key| !key.is_empty());
        self
    }

    pub fn with_metrics(mut self, handle: Option<PrometheusHandle>) -> Self {
        self.metrics = handle;
        self
    }

    /// Rate-limit tier for a request targeting `language`
    pub fn tier_for(&self, language: Language) -> Tier {
        Tier::for_language(language, self.cache.protected_language())
    }
}

/// Shared server state type
pub type SharedState = Arc<AppState>;

/// Create shared state from config
pub fn create_shared_state(config: RediConfig) -> SharedState {
    Arc::new(AppState::new(config))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_loader_reports_missing_model() {
        let dir = tempfile::tempdir().unwrap();
        let loader = LexiconLoader::new(Arc::new(RediConfig::from_model_dir(dir.path())));

        let err = loader.load(Language::Sr).unwrap_err();
        assert!(matches!(err, redi_core::Error::ModelNotFound(_)));
    }

    #[test]
    fn test_loader_reads_lexicon() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(
            dir.path().join("wikitweetweb.sl.tm"),
            r#"{"zuzelj": {"žuželj": 1.0}}"#,
        )
        .unwrap();
        let loader = LexiconLoader::new(Arc::new(RediConfig::from_model_dir(dir.path())));

        let lexicon = loader.load(Language::Sl).unwrap();
        assert_eq!(lexicon.suggest("Zuzelj"), Some("Žuželj".to_string()));
    }

    #[test]
    fn test_tier_for_follows_protected_language() {
        let state = AppState::new(RediConfig::default().with_protected(Language::Sr));
        assert_eq!(state.tier_for(Language::Sr), Tier::Protected);
        assert_eq!(state.tier_for(Language::Hr), Tier::Standard);
    }

    #[test]
    fn test_empty_api_key_disables_check() {
        let state = AppState::new(RediConfig::default()).with_api_key(Some(String::new()));
        assert!(state.api_key.is_none());
    }
}
