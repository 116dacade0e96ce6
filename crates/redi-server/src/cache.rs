//! Model cache: keeps per-language restoration models resident
//!
//! Every configured language owns a slot created at startup. A slot holds
//! at most one model instance, built on first use and dropped again by the
//! reclamation loop once it sits idle past the unload timeout. The
//! protected language is warmed at startup and never reclaimed.
//!
//! Loads are expensive and memory-spiky, so they are throttled twice:
//! - per language: concurrent callers for the same language share one
//!   in-flight load through a watch channel instead of starting their own;
//! - globally: a semaphore caps how many languages construct at once.
//!
//! The load itself runs in a detached task. A caller that stops waiting
//! (request deadline, client disconnect) leaves the load running and the
//! next caller picks up its result.

use std::collections::BTreeMap;
use std::fmt;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};

use redi_core::{Language, RediConfig};
use serde::Serialize;
use thiserror::Error;
use tokio::sync::{watch, Semaphore};

use crate::metrics;

/// Builds the restoration model for one language
///
/// Called on the blocking thread pool; may take seconds and a lot of memory.
/// Must be safe to call again after a failure.
pub trait ModelLoader: Send + Sync + 'static {
    type Model: Send + Sync + 'static;

    fn load(&self, language: Language) -> redi_core::Result<Self::Model>;
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CacheError {
    #[error("Model unavailable for {language}: {reason}")]
    ModelUnavailable { language: Language, reason: String },

    #[error("Language {0} is not served by this cache")]
    UnsupportedLanguage(Language),
}

/// Externally visible state of a slot
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum LoadState {
    Unloaded,
    Loading,
    Loaded,
}

type LoadOutcome<M> = Option<Result<Arc<M>, CacheError>>;

struct SlotInner<M> {
    model: Option<Arc<M>>,
    /// Set while a load task exists, including while it waits for a permit
    pending: Option<watch::Receiver<LoadOutcome<M>>>,
    /// Set only while the load task holds a permit and is constructing
    constructing: bool,
    last_used: Option<Instant>,
}

struct ModelSlot<M> {
    language: Language,
    inner: Mutex<SlotInner<M>>,
    request_count: AtomicU64,
}

impl<M> ModelSlot<M> {
    fn new(language: Language) -> Self {
        Self {
            language,
            inner: Mutex::new(SlotInner {
                model: None,
                pending: None,
                constructing: false,
                last_used: None,
            }),
            request_count: AtomicU64::new(0),
        }
    }

    fn lock(&self) -> MutexGuard<'_, SlotInner<M>> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn touch(&self, inner: &mut SlotInner<M>, count_request: bool) {
        inner.last_used = Some(Instant::now());
        if count_request {
            self.request_count.fetch_add(1, Ordering::Relaxed);
        }
    }

    fn state(inner: &SlotInner<M>) -> LoadState {
        if inner.constructing {
            LoadState::Loading
        } else if inner.model.is_some() {
            LoadState::Loaded
        } else {
            LoadState::Unloaded
        }
    }
}

/// Per-language statistics
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct LanguageStats {
    pub state: LoadState,
    pub loaded: bool,
    pub request_count: u64,
    /// Seconds since last use, `None` if never used
    pub idle_secs: Option<u64>,
}

/// Point-in-time cache statistics; each slot is read independently
#[derive(Debug, Clone, Serialize)]
pub struct CacheStats {
    pub protected: Language,
    pub loaded: Vec<Language>,
    /// Requests served per language since startup
    pub request_counts: BTreeMap<Language, u64>,
    /// Seconds since last use, for resident models only
    pub last_used: BTreeMap<Language, u64>,
    pub loads_in_flight: usize,
    pub languages: BTreeMap<Language, LanguageStats>,
}

/// Lifecycle cache of per-language models
pub struct ModelCache<L: ModelLoader> {
    loader: Arc<L>,
    slots: BTreeMap<Language, Arc<ModelSlot<L::Model>>>,
    protected: Language,
    unload_timeout: Duration,
    max_concurrent_loads: usize,
    load_limiter: Arc<Semaphore>,
    loads_in_flight: Arc<AtomicUsize>,
}

impl<L: ModelLoader> fmt::Debug for ModelCache<L> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ModelCache")
            .field("languages", &self.slots.keys().collect::<Vec<_>>())
            .field("protected", &self.protected)
            .field("unload_timeout", &self.unload_timeout)
            .field("max_concurrent_loads", &self.max_concurrent_loads)
            .finish()
    }
}

impl<L: ModelLoader> ModelCache<L> {
    /// Create a cache with one empty slot per configured language
    pub fn new(loader: L, config: &RediConfig) -> Self {
        let mut slots: BTreeMap<_, _> = config
            .languages
            .iter()
            .map(|&language| (language, Arc::new(ModelSlot::new(language))))
            .collect();
        slots
            .entry(config.protected_language)
            .or_insert_with(|| Arc::new(ModelSlot::new(config.protected_language)));

        let max_concurrent_loads = config.max_concurrent_loads.max(1);

        Self {
            loader: Arc::new(loader),
            slots,
            protected: config.protected_language,
            unload_timeout: config.unload_timeout(),
            max_concurrent_loads,
            load_limiter: Arc::new(Semaphore::new(max_concurrent_loads)),
            loads_in_flight: Arc::new(AtomicUsize::new(0)),
        }
    }

    /// Get the model for a language, loading it if needed
    ///
    /// Counts as one request for statistics and refreshes recency.
    pub async fn acquire(&self, language: Language) -> Result<Arc<L::Model>, CacheError> {
        self.acquire_inner(language, true).await
    }

    /// Make sure a language is resident without counting a request
    pub async fn warm(&self, language: Language) -> Result<Arc<L::Model>, CacheError> {
        self.acquire_inner(language, false).await
    }

    /// Warm the protected language; the service must not start without it
    pub async fn warm_protected(&self) -> Result<(), CacheError> {
        self.warm(self.protected).await.map(|_| ())
    }

    async fn acquire_inner(
        &self,
        language: Language,
        count_request: bool,
    ) -> Result<Arc<L::Model>, CacheError> {
        let slot = self
            .slots
            .get(&language)
            .ok_or(CacheError::UnsupportedLanguage(language))?;

        let mut pending = {
            let mut inner = slot.lock();
            if let Some(model) = inner.model.clone() {
                slot.touch(&mut inner, count_request);
                tracing::debug!(language = %language, "Model cache hit");
                return Ok(model);
            }
            match inner.pending.clone() {
                Some(rx) => rx,
                None => self.start_load(slot, &mut inner),
            }
        };

        let outcome = match pending.wait_for(Option::is_some).await {
            Ok(outcome) => outcome.clone(),
            Err(_) => None,
        };

        let model = match outcome {
            Some(result) => result?,
            None => {
                let mut inner = slot.lock();
                if inner
                    .pending
                    .as_ref()
                    .is_some_and(|rx| rx.same_channel(&pending))
                {
                    inner.pending = None;
                    inner.constructing = false;
                }
                return Err(CacheError::ModelUnavailable {
                    language,
                    reason: "load ended without a result".to_string(),
                });
            }
        };

        let mut inner = slot.lock();
        slot.touch(&mut inner, count_request);
        Ok(model)
    }

    /// Spawn the load task for an empty slot; caller holds the slot lock
    fn start_load(
        &self,
        slot: &Arc<ModelSlot<L::Model>>,
        inner: &mut SlotInner<L::Model>,
    ) -> watch::Receiver<LoadOutcome<L::Model>> {
        let (tx, rx) = watch::channel(None);
        inner.pending = Some(rx.clone());

        let slot = Arc::clone(slot);
        let loader = Arc::clone(&self.loader);
        let limiter = Arc::clone(&self.load_limiter);
        let in_flight = Arc::clone(&self.loads_in_flight);

        tracing::debug!(language = %slot.language, "Queueing model load");
        tokio::spawn(async move {
            let result = load_slot(&slot, loader, limiter, in_flight).await;
            tx.send_replace(Some(result));
        });

        rx
    }

    /// Unload idle models using the current time
    pub fn reclaim_idle(&self) -> Vec<Language> {
        self.reclaim_idle_at(Instant::now())
    }

    /// Unload every non-protected model idle for at least the unload timeout at `now`
    ///
    /// Slots with a load in flight are skipped. Returns the evicted languages.
    pub fn reclaim_idle_at(&self, now: Instant) -> Vec<Language> {
        let mut evicted = Vec::new();

        for (&language, slot) in &self.slots {
            if language == self.protected {
                continue;
            }

            let model = {
                let mut inner = slot.lock();
                if inner.pending.is_some() || inner.constructing {
                    continue;
                }
                let idle = match inner.last_used {
                    Some(last_used) => now.saturating_duration_since(last_used),
                    None => continue,
                };
                if inner.model.is_none() || idle < self.unload_timeout {
                    continue;
                }
                tracing::info!(
                    language = %language,
                    idle_secs = idle.as_secs(),
                    "Unloading idle model"
                );
                inner.model.take()
            };

            // Last reference may be here; free it outside the slot lock.
            drop(model);
            metrics::record_eviction(language.code());
            metrics::set_model_loaded(language.code(), false);
            evicted.push(language);
        }

        evicted
    }

    /// Snapshot of per-language statistics
    pub fn stats(&self) -> CacheStats {
        let now = Instant::now();
        let mut loaded = Vec::new();
        let mut request_counts = BTreeMap::new();
        let mut last_used = BTreeMap::new();
        let mut languages = BTreeMap::new();

        for (&language, slot) in &self.slots {
            let inner = slot.lock();
            let state = ModelSlot::state(&inner);
            let is_loaded = inner.model.is_some();
            let request_count = slot.request_count.load(Ordering::Relaxed);
            let idle_secs = inner
                .last_used
                .map(|t| now.saturating_duration_since(t).as_secs());
            if is_loaded {
                loaded.push(language);
                if let Some(idle) = idle_secs {
                    last_used.insert(language, idle);
                }
            }
            request_counts.insert(language, request_count);
            languages.insert(
                language,
                LanguageStats {
                    state,
                    loaded: is_loaded,
                    request_count,
                    idle_secs,
                },
            );
        }

        CacheStats {
            protected: self.protected,
            loaded,
            request_counts,
            last_used,
            loads_in_flight: self.loads_in_flight(),
            languages,
        }
    }

    /// Languages whose model is currently resident
    pub fn loaded_languages(&self) -> Vec<Language> {
        self.slots
            .iter()
            .filter(|(_, slot)| slot.lock().model.is_some())
            .map(|(&language, _)| language)
            .collect()
    }

    pub fn load_state(&self, language: Language) -> Option<LoadState> {
        self.slots
            .get(&language)
            .map(|slot| ModelSlot::state(&slot.lock()))
    }

    pub fn is_loaded(&self, language: Language) -> bool {
        self.slots
            .get(&language)
            .is_some_and(|slot| slot.lock().model.is_some())
    }

    pub fn request_count(&self, language: Language) -> u64 {
        self.slots
            .get(&language)
            .map(|slot| slot.request_count.load(Ordering::Relaxed))
            .unwrap_or(0)
    }

    /// Healthy iff the protected language is resident
    pub fn is_healthy(&self) -> bool {
        self.is_loaded(self.protected)
    }

    pub fn protected_language(&self) -> Language {
        self.protected
    }

    pub fn languages(&self) -> Vec<Language> {
        self.slots.keys().copied().collect()
    }

    pub fn supports(&self, language: Language) -> bool {
        self.slots.contains_key(&language)
    }

    pub fn unload_timeout(&self) -> Duration {
        self.unload_timeout
    }

    pub fn max_concurrent_loads(&self) -> usize {
        self.max_concurrent_loads
    }

    /// Number of models being constructed right now
    pub fn loads_in_flight(&self) -> usize {
        self.loads_in_flight.load(Ordering::SeqCst)
    }
}

/// Body of a load task: wait for a permit, construct, publish into the slot
async fn load_slot<L: ModelLoader>(
    slot: &ModelSlot<L::Model>,
    loader: Arc<L>,
    limiter: Arc<Semaphore>,
    in_flight: Arc<AtomicUsize>,
) -> Result<Arc<L::Model>, CacheError> {
    let language = slot.language;

    let permit = match limiter.acquire_owned().await {
        Ok(permit) => permit,
        Err(_) => {
            let mut inner = slot.lock();
            inner.pending = None;
            return Err(CacheError::ModelUnavailable {
                language,
                reason: "load limiter closed".to_string(),
            });
        }
    };

    slot.lock().constructing = true;
    let loading = in_flight.fetch_add(1, Ordering::SeqCst) + 1;
    metrics::set_loads_in_flight(loading);
    tracing::info!(language = %language, loads_in_flight = loading, "Loading model");

    let start = Instant::now();
    let joined = tokio::task::spawn_blocking(move || loader.load(language)).await;
    let elapsed = start.elapsed();

    let result = match joined {
        Ok(Ok(model)) => Ok(Arc::new(model)),
        Ok(Err(e)) => Err(e.to_string()),
        Err(e) => Err(format!("loader task failed: {}", e)),
    };

    {
        let mut inner = slot.lock();
        inner.constructing = false;
        inner.pending = None;
        if let Ok(model) = &result {
            inner.model = Some(Arc::clone(model));
            inner.last_used = Some(Instant::now());
        }
    }
    let loading = in_flight.fetch_sub(1, Ordering::SeqCst) - 1;
    metrics::set_loads_in_flight(loading);
    drop(permit);

    match result {
        Ok(model) => {
            tracing::info!(
                language = %language,
                elapsed_ms = elapsed.as_millis() as u64,
                "Model loaded"
            );
            metrics::record_model_load(language.code(), metrics::STATUS_OK, elapsed);
            metrics::set_model_loaded(language.code(), true);
            Ok(model)
        }
        Err(reason) => {
            tracing::warn!(language = %language, error = %reason, "Model load failed");
            metrics::record_model_load(language.code(), metrics::STATUS_ERROR, elapsed);
            Err(CacheError::ModelUnavailable { language, reason })
        }
    }
}
