//! HTTP routes for the restoration server

use std::net::SocketAddr;
use std::time::{Duration, Instant};

use axum::{
    extract::{ConnectInfo, State},
    http::{HeaderMap, StatusCode},
    response::{IntoResponse, Json, Response},
    routing::{get, post},
    Router,
};
use redi_core::{Language, SERVICE_VERSION};
use serde::{Deserialize, Serialize};

use crate::cache::CacheStats;
use crate::error::{Result, ServerError};
use crate::metrics;
use crate::state::SharedState;

/// Service info response
#[derive(Serialize)]
pub struct InfoResponse {
    pub service: &'static str,
    pub version: &'static str,
    pub features: Vec<&'static str>,
    pub available_languages: Vec<Language>,
    pub loaded_languages: Vec<Language>,
}

/// Health check response
#[derive(Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
    pub loaded_languages: Vec<Language>,
    pub required: Language,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub memory_mb: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub stats: Option<CacheStats>,
}

/// Restoration request
#[derive(Deserialize)]
pub struct SuggestRequest {
    pub name: String,
    #[serde(default = "default_lang")]
    pub lang: String,
}

fn default_lang() -> String {
    Language::Hr.code().to_string()
}

/// Restoration response; `suggestion` is null when nothing changes
#[derive(Serialize)]
pub struct SuggestResponse {
    pub original: String,
    pub suggestion: Option<String>,
}

/// Service info endpoint
async fn info(State(state): State<SharedState>) -> Json<InfoResponse> {
    Json(InfoResponse {
        service: "REDI API",
        version: SERVICE_VERSION,
        features: vec!["smart-caching", "rate-limiting"],
        available_languages: state.cache.languages(),
        loaded_languages: state.cache.loaded_languages(),
    })
}

/// Health check: healthy only while the protected language is loaded
async fn health(State(state): State<SharedState>) -> (StatusCode, Json<HealthResponse>) {
    let loaded = state.cache.loaded_languages();
    let required = state.cache.protected_language();

    if !state.cache.is_healthy() {
        return (
            StatusCode::SERVICE_UNAVAILABLE,
            Json(HealthResponse {
                status: "unhealthy",
                reason: Some(format!("{} model not loaded", required)),
                loaded_languages: loaded,
                required,
                memory_mb: None,
                stats: None,
            }),
        );
    }

    let memory_mb = resident_memory_mb();
    if let (Some(limit), Some(used)) = (state.config.memory_limit_mb, memory_mb) {
        if used >= limit {
            return (
                StatusCode::SERVICE_UNAVAILABLE,
                Json(HealthResponse {
                    status: "unhealthy",
                    reason: Some(format!("Memory usage too high: {} MB", used)),
                    loaded_languages: loaded,
                    required,
                    memory_mb,
                    stats: None,
                }),
            );
        }
    }

    (
        StatusCode::OK,
        Json(HealthResponse {
            status: "healthy",
            reason: None,
            loaded_languages: loaded,
            required,
            memory_mb,
            stats: Some(state.cache.stats()),
        }),
    )
}

/// Cache statistics
async fn stats(State(state): State<SharedState>) -> Json<CacheStats> {
    Json(state.cache.stats())
}

/// Prometheus exposition, when a recorder is installed
async fn prometheus(State(state): State<SharedState>) -> Response {
    match &state.metrics {
        Some(handle) => handle.render().into_response(),
        None => (StatusCode::NOT_FOUND, "Metrics disabled").into_response(),
    }
}

/// Suggest a diacritic-restored form of a name
async fn suggest(
    State(state): State<SharedState>,
    connect_info: Option<ConnectInfo<SocketAddr>>,
    headers: HeaderMap,
    Json(req): Json<SuggestRequest>,
) -> Result<Json<SuggestResponse>> {
    check_api_key(&state, &headers)?;

    let language: Language = req.lang.parse()?;
    if !state.cache.supports(language) {
        return Err(ServerError::UnsupportedLanguage(req.lang));
    }
    if req.name.trim().is_empty() {
        return Err(ServerError::InvalidRequest("name must not be empty".to_string()));
    }

    let client = client_ip(&headers, connect_info.map(|ConnectInfo(addr)| addr));
    let start = Instant::now();
    let result = restore(&state, language, &client, req.name).await;

    let outcome = match &result {
        Ok(_) => metrics::OUTCOME_OK,
        Err(ServerError::RateLimited { .. }) => metrics::OUTCOME_RATE_LIMITED,
        Err(e) if e.status().is_client_error() => metrics::OUTCOME_CLIENT_ERROR,
        Err(_) => metrics::OUTCOME_SERVER_ERROR,
    };
    metrics::record_request(language.code(), outcome, start.elapsed());

    result.map(Json)
}

/// Admission, model acquisition and restoration for one request
async fn restore(
    state: &SharedState,
    language: Language,
    client: &str,
    name: String,
) -> Result<SuggestResponse> {
    let tier = state.tier_for(language);
    if !state.limiter.admit(client, tier) {
        let limit = state.limiter.limit(tier);
        metrics::record_rate_limited(tier.as_str());
        tracing::warn!(client, language = %language, tier = %tier, "Rate limit exceeded");
        return Err(ServerError::RateLimited {
            language,
            tier,
            limit: limit.requests,
            window_secs: limit.window_secs,
            retry_after_secs: ceil_secs(state.limiter.retry_after(client, tier)),
        });
    }

    let deadline = state.config.request_timeout();
    let lexicon = tokio::time::timeout(deadline, state.cache.acquire(language))
        .await
        .map_err(|_| ServerError::Timeout(deadline.as_secs(), language))??;

    let suggestion = lexicon.suggest(&name);
    Ok(SuggestResponse {
        original: name,
        suggestion,
    })
}

fn check_api_key(state: &SharedState, headers: &HeaderMap) -> Result<()> {
    let Some(expected) = &state.api_key else {
        return Ok(());
    };
    let provided = headers.get("x-api-key").and_then(|v| v.to_str().ok());
    if provided == Some(expected.as_str()) {
        Ok(())
    } else {
        Err(ServerError::Unauthorized)
    }
}

/// Client identity for rate limiting
///
/// Prefers `X-Real-IP`, then the first `X-Forwarded-For` entry, then the
/// peer address.
pub fn client_ip(headers: &HeaderMap, peer: Option<SocketAddr>) -> String {
    let header = |name: &str| {
        headers
            .get(name)
            .and_then(|v| v.to_str().ok())
            .map(str::trim)
            .filter(|v| !v.is_empty())
    };

    if let Some(ip) = header("x-real-ip") {
        return ip.to_string();
    }
    if let Some(ip) = header("x-forwarded-for")
        .and_then(|list| list.split(',').map(str::trim).find(|ip| !ip.is_empty()))
    {
        return ip.to_string();
    }
    peer.map(|addr| addr.ip().to_string())
        .unwrap_or_else(|| "unknown".to_string())
}

fn ceil_secs(d: Duration) -> u64 {
    d.as_secs() + u64::from(d.subsec_nanos() > 0)
}

/// Resident set size of this process, where `/proc` is available
fn resident_memory_mb() -> Option<u64> {
    let status = std::fs::read_to_string("/proc/self/status").ok()?;
    let line = status.lines().find(|l| l.starts_with("VmRSS:"))?;
    let kb: u64 = line.split_whitespace().nth(1)?.parse().ok()?;
    Some(kb / 1024)
}

/// Create the router with all routes
pub fn create_router(state: SharedState) -> Router {
    Router::new()
        .route("/", get(info))
        .route("/health", get(health))
        .route("/stats", get(stats))
        .route("/suggest", post(suggest))
        .route("/metrics", get(prometheus))
        .with_state(state)
}
