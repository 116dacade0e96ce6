//! End-to-end server integration tests
//!
//! Runs the full server on a local port against lexicons written to a
//! temporary directory: startup -> suggest -> rate limiting -> reclamation.

use std::net::SocketAddr;
use std::path::Path;
use std::time::Duration;

use redi_core::{Language, RateLimitConfig, RediConfig, TierLimit};
use redi_server::{ServerBuilder, ServerError, SharedState};
use reqwest::{Client, StatusCode};
use serde::Deserialize;
use tokio::net::TcpListener;

#[derive(Debug, Deserialize)]
struct SuggestResponse {
    original: String,
    suggestion: Option<String>,
}

fn write_lexicons(dir: &Path) {
    std::fs::write(
        dir.join("wikitweetweb.hr.tm"),
        r#"{"sime": {"šime": 0.8, "sime": 0.2}, "cosic": {"ćosić": 1.0}, "ivan": {"ivan": 1.0}}"#,
    )
    .unwrap();
    std::fs::write(
        dir.join("wikitweetweb.sl.tm"),
        r#"{"zuzelj": {"žuželj": 1.0}}"#,
    )
    .unwrap();
    std::fs::write(
        dir.join("wikitweetweb.sr.tm"),
        r#"{"dordevic": {"đorđević": 1.0}}"#,
    )
    .unwrap();
}

fn test_config(dir: &Path) -> RediConfig {
    RediConfig::from_model_dir(dir).with_rate_limit(RateLimitConfig {
        protected: TierLimit::new(10, 60),
        standard: TierLimit::new(5, 60),
    })
}

/// Test harness for running E2E server tests
struct TestHarness {
    server_url: String,
    state: SharedState,
    http: Client,
    _model_dir: tempfile::TempDir,
    _shutdown: Option<tokio::sync::oneshot::Sender<()>>,
}

impl TestHarness {
    async fn new() -> Self {
        let model_dir = tempfile::tempdir().unwrap();
        write_lexicons(model_dir.path());
        let config = test_config(model_dir.path());
        Self::with_config(model_dir, config).await
    }

    async fn with_config(model_dir: tempfile::TempDir, config: RediConfig) -> Self {
        let server = ServerBuilder::new(config)
            .build()
            .await
            .expect("server should build");
        let state = server.state();

        let listener = TcpListener::bind(SocketAddr::from(([127, 0, 0, 1], 0)))
            .await
            .expect("bind should succeed");
        let addr = listener.local_addr().unwrap();
        let (shutdown_tx, shutdown_rx) = tokio::sync::oneshot::channel();

        tokio::spawn(async move {
            server
                .serve(listener, async {
                    let _ = shutdown_rx.await;
                })
                .await
                .ok();
        });

        let server_url = format!("http://{}", addr);
        let http = Client::new();
        for _ in 0..20 {
            if http.get(format!("{}/health", server_url)).send().await.is_ok() {
                break;
            }
            tokio::time::sleep(Duration::from_millis(25)).await;
        }

        Self {
            server_url,
            state,
            http,
            _model_dir: model_dir,
            _shutdown: Some(shutdown_tx),
        }
    }

    async fn suggest(&self, name: &str, lang: &str, client_ip: &str) -> reqwest::Response {
        self.http
            .post(format!("{}/suggest", self.server_url))
            .header("x-real-ip", client_ip)
            .json(&serde_json::json!({ "name": name, "lang": lang }))
            .send()
            .await
            .expect("request should reach the server")
    }

    async fn get_json(&self, path: &str) -> (StatusCode, serde_json::Value) {
        let response = self
            .http
            .get(format!("{}{}", self.server_url, path))
            .send()
            .await
            .unwrap();
        let status = response.status();
        (status, response.json().await.unwrap())
    }
}

#[tokio::test]
async fn test_e2e_suggest_restores_diacritics() {
    let harness = TestHarness::new().await;

    let response = harness.suggest("SIME Cosic", "hr", "10.1.0.1").await;
    assert_eq!(response.status(), StatusCode::OK);
    let body: SuggestResponse = response.json().await.unwrap();
    assert_eq!(body.original, "SIME Cosic");
    assert_eq!(body.suggestion.as_deref(), Some("ŠIME Ćosić"));

    let response = harness.suggest("Ivan", "hr", "10.1.0.1").await;
    let body: SuggestResponse = response.json().await.unwrap();
    assert_eq!(body.suggestion, None);
}

#[tokio::test]
async fn test_e2e_default_language_is_protected() {
    let harness = TestHarness::new().await;

    let response = harness
        .http
        .post(format!("{}/suggest", harness.server_url))
        .json(&serde_json::json!({ "name": "Sime" }))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let body: SuggestResponse = response.json().await.unwrap();
    assert_eq!(body.suggestion.as_deref(), Some("Šime"));
    assert_eq!(harness.state.cache.request_count(Language::Hr), 1);
}

#[tokio::test]
async fn test_e2e_eleventh_request_is_rate_limited() {
    let harness = TestHarness::new().await;

    for i in 0..10 {
        let response = harness.suggest("Sime", "hr", "10.1.0.2").await;
        assert_eq!(response.status(), StatusCode::OK, "request {} should pass", i);
    }

    let response = harness.suggest("Sime", "hr", "10.1.0.2").await;
    assert_eq!(response.status(), StatusCode::TOO_MANY_REQUESTS);
    let retry_after: u64 = response.headers()["retry-after"]
        .to_str()
        .unwrap()
        .parse()
        .unwrap();
    assert!((1..=60).contains(&retry_after));

    // Standard tier is tracked separately for the same client
    let response = harness.suggest("Dordevic", "sr", "10.1.0.2").await;
    assert_eq!(response.status(), StatusCode::OK);

    // Another client has its own window
    let response = harness.suggest("Sime", "hr", "10.1.0.3").await;
    assert_eq!(response.status(), StatusCode::OK);
}

#[tokio::test]
async fn test_e2e_unsupported_language() {
    let harness = TestHarness::new().await;

    let response = harness.suggest("Ivan", "en", "10.1.0.4").await;
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    let text = response.text().await.unwrap();
    assert!(text.contains("en"));
}

#[tokio::test]
async fn test_e2e_health_and_stats() {
    let harness = TestHarness::new().await;

    let (status, health) = harness.get_json("/health").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(health["status"], "healthy");
    assert_eq!(health["required"], "hr");

    let (_, stats) = harness.get_json("/stats").await;
    assert_eq!(stats["protected"], "hr");
    assert_eq!(stats["loaded"], serde_json::json!(["hr"]));
    assert_eq!(stats["languages"]["sr"]["state"], "unloaded");

    let response = harness.suggest("Dordevic", "sr", "10.1.0.5").await;
    let body: SuggestResponse = response.json().await.unwrap();
    assert_eq!(body.suggestion.as_deref(), Some("Đorđević"));

    let (_, stats) = harness.get_json("/stats").await;
    assert_eq!(stats["loaded"], serde_json::json!(["hr", "sr"]));
    assert_eq!(stats["languages"]["sr"]["request_count"], 1);

    let (_, info) = harness.get_json("/").await;
    assert_eq!(info["loaded_languages"], serde_json::json!(["hr", "sr"]));
}

#[tokio::test]
async fn test_e2e_concurrent_cold_requests_share_one_load() {
    let harness = TestHarness::new().await;

    let requests = (0..8).map(|i| {
        let harness = &harness;
        async move { harness.suggest("Zuzelj", "sl", &format!("10.2.0.{}", i)).await }
    });
    let responses = futures::future::join_all(requests).await;

    for response in responses {
        assert_eq!(response.status(), StatusCode::OK);
        let body: SuggestResponse = response.json().await.unwrap();
        assert_eq!(body.suggestion.as_deref(), Some("Žuželj"));
    }
    assert!(harness.state.cache.is_loaded(Language::Sl));
    assert_eq!(harness.state.cache.request_count(Language::Sl), 8);
}

#[tokio::test]
async fn test_e2e_idle_model_is_reclaimed() {
    let model_dir = tempfile::tempdir().unwrap();
    write_lexicons(model_dir.path());
    let mut config = test_config(model_dir.path()).with_unload_timeout(Duration::from_secs(1));
    config.reclaim_interval_secs = 1;
    let harness = TestHarness::with_config(model_dir, config).await;

    let response = harness.suggest("Zuzelj", "sl", "10.1.0.6").await;
    assert_eq!(response.status(), StatusCode::OK);
    assert!(harness.state.cache.is_loaded(Language::Sl));

    for _ in 0..80 {
        if !harness.state.cache.is_loaded(Language::Sl) {
            break;
        }
        tokio::time::sleep(Duration::from_millis(100)).await;
    }

    assert!(!harness.state.cache.is_loaded(Language::Sl));
    assert!(harness.state.cache.is_loaded(Language::Hr));

    // Reloaded on the next request
    let response = harness.suggest("Zuzelj", "sl", "10.1.0.6").await;
    assert_eq!(response.status(), StatusCode::OK);
}

#[tokio::test]
async fn test_e2e_startup_requires_protected_model() {
    let model_dir = tempfile::tempdir().unwrap();
    std::fs::write(
        model_dir.path().join("wikitweetweb.sl.tm"),
        r#"{"zuzelj": {"žuželj": 1.0}}"#,
    )
    .unwrap();

    let result = ServerBuilder::new(test_config(model_dir.path())).build().await;
    assert!(matches!(result, Err(ServerError::Startup(_))));
}
