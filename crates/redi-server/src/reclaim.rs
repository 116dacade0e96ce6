//! Background reclamation of idle models and empty rate-limit windows

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tokio::time::{interval, MissedTickBehavior};

use crate::cache::{ModelCache, ModelLoader};
use crate::metrics;
use crate::rate_limit::RateLimiter;

/// Handle to the running reclamation task
pub struct Reclaimer {
    shutdown: Option<oneshot::Sender<()>>,
    handle: JoinHandle<()>,
}

impl Reclaimer {
    /// Spawn the reclamation loop on the current runtime
    pub fn spawn<L: ModelLoader>(
        cache: Arc<ModelCache<L>>,
        limiter: Arc<RateLimiter>,
        every: Duration,
    ) -> Self {
        let (shutdown_tx, mut shutdown_rx) = oneshot::channel();

        let handle = tokio::spawn(async move {
            tracing::info!(
                interval_secs = every.as_secs(),
                unload_timeout_secs = cache.unload_timeout().as_secs(),
                "Starting reclamation loop"
            );

            let mut ticker = interval(every);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            // First tick completes immediately; nothing can be idle yet.
            ticker.tick().await;

            loop {
                tokio::select! {
                    _ = ticker.tick() => run_once(&cache, &limiter),
                    _ = &mut shutdown_rx => break,
                }
            }

            tracing::info!("Reclamation loop stopped");
        });

        Self {
            shutdown: Some(shutdown_tx),
            handle,
        }
    }

    /// Signal the loop to stop and wait for it
    pub async fn shutdown(mut self) {
        if let Some(tx) = self.shutdown.take() {
            let _ = tx.send(());
        }
        let _ = self.handle.await;
    }

    pub fn is_finished(&self) -> bool {
        self.handle.is_finished()
    }
}

/// One reclamation pass
pub fn run_once<L: ModelLoader>(cache: &ModelCache<L>, limiter: &RateLimiter) {
    let evicted = cache.reclaim_idle();
    let pruned = limiter.prune_idle();
    metrics::set_rate_limit_clients(limiter.tracked_clients());

    if evicted.is_empty() {
        tracing::debug!(pruned_windows = pruned, "Reclamation pass: nothing idle");
    } else {
        tracing::info!(
            evicted = ?evicted,
            loaded = ?cache.loaded_languages(),
            pruned_windows = pruned,
            "Reclamation pass unloaded idle models"
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use redi_core::{Language, RateLimitConfig, RediConfig};

    struct TinyLoader;

    impl ModelLoader for TinyLoader {
        type Model = Language;

        fn load(&self, language: Language) -> redi_core::Result<Language> {
            Ok(language)
        }
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_loop_unloads_idle_models() {
        let config = RediConfig::from_model_dir("/models").with_unload_timeout(Duration::ZERO);
        let cache = Arc::new(ModelCache::new(TinyLoader, &config));
        let limiter = Arc::new(RateLimiter::new(RateLimitConfig::default()));

        cache.warm_protected().await.unwrap();
        cache.acquire(Language::Sl).await.unwrap();
        assert!(cache.is_loaded(Language::Sl));

        let reclaimer = Reclaimer::spawn(
            Arc::clone(&cache),
            Arc::clone(&limiter),
            Duration::from_millis(20),
        );

        for _ in 0..100 {
            if !cache.is_loaded(Language::Sl) {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }

        assert!(!cache.is_loaded(Language::Sl));
        assert!(cache.is_loaded(Language::Hr));

        reclaimer.shutdown().await;
    }

    #[tokio::test]
    async fn test_shutdown_stops_loop() {
        let config = RediConfig::default();
        let cache = Arc::new(ModelCache::new(TinyLoader, &config));
        let limiter = Arc::new(RateLimiter::new(RateLimitConfig::default()));

        let reclaimer = Reclaimer::spawn(cache, limiter, Duration::from_secs(3600));
        assert!(!reclaimer.is_finished());
        reclaimer.shutdown().await;
    }

    #[tokio::test]
    async fn test_run_once_prunes_limiter() {
        let config = RediConfig::default();
        let cache = ModelCache::new(TinyLoader, &config);
        let limiter = RateLimiter::new(RateLimitConfig {
            protected: redi_core::TierLimit::new(5, 0),
            standard: redi_core::TierLimit::new(5, 0),
        });

        limiter.admit("10.0.0.1", crate::rate_limit::Tier::Standard);
        assert_eq!(limiter.tracked_clients(), 1);

        run_once(&cache, &limiter);
        assert_eq!(limiter.tracked_clients(), 0);
    }
}
