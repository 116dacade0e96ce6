//! Restoration server implementation

use std::future::Future;
use std::net::SocketAddr;

use axum::http::{HeaderValue, Method};
use axum::Router;
use metrics_exporter_prometheus::PrometheusHandle;
use redi_core::RediConfig;
use tokio::net::TcpListener;
use tower::limit::ConcurrencyLimitLayer;
use tower_http::cors::{AllowHeaders, AllowMethods, AllowOrigin, CorsLayer};

use crate::error::{Result, ServerError};
use crate::reclaim::Reclaimer;
use crate::routes::create_router;
use crate::state::{AppState, SharedState};

/// Origins allowed by default when none are configured
pub const DEFAULT_CORS_ORIGINS: &[&str] = &[
    "https://finisherka.ak-varazdin.hr",
    "https://finisherka-dev.ak-varazdin.hr",
];

/// Diacritic restoration server
pub struct RediServer {
    state: SharedState,
    addr: SocketAddr,
    cors_origins: Vec<String>,
}

impl RediServer {
    /// Router with CORS and the in-flight request cap applied
    pub fn app(&self) -> Router {
        create_router(self.state.clone())
            .layer(ConcurrencyLimitLayer::new(
                self.state.config.max_in_flight_requests.max(1),
            ))
            .layer(cors_layer(&self.cors_origins))
    }

    /// Run the server until Ctrl-C or SIGTERM
    pub async fn run(self) -> Result<()> {
        tracing::info!("Starting REDI server on {}", self.addr);
        let listener = TcpListener::bind(self.addr).await?;
        self.serve(listener, shutdown_signal()).await
    }

    /// Serve on an already-bound listener until `shutdown` resolves
    pub async fn serve<F>(self, listener: TcpListener, shutdown: F) -> Result<()>
    where
        F: Future<Output = ()> + Send + 'static,
    {
        let reclaimer = Reclaimer::spawn(
            self.state.cache.clone(),
            self.state.limiter.clone(),
            self.state.config.reclaim_interval(),
        );

        let app = self.app();
        let served = axum::serve(
            listener,
            app.into_make_service_with_connect_info::<SocketAddr>(),
        )
        .with_graceful_shutdown(shutdown)
        .await;

        reclaimer.shutdown().await;
        tracing::info!("Server stopped");

        served.map_err(|e| ServerError::Internal(e.to_string()))
    }

    pub fn addr(&self) -> SocketAddr {
        self.addr
    }

    /// Get the server state for testing
    pub fn state(&self) -> SharedState {
        self.state.clone()
    }
}

/// Builder for RediServer
pub struct ServerBuilder {
    config: RediConfig,
    addr: SocketAddr,
    cors_origins: Vec<String>,
    api_key: Option<String>,
    metrics: Option<PrometheusHandle>,
    warm_protected: bool,
}

impl ServerBuilder {
    pub fn new(config: RediConfig) -> Self {
        Self {
            config,
            addr: ([127, 0, 0, 1], 8000).into(),
            cors_origins: DEFAULT_CORS_ORIGINS.iter().map(|o| o.to_string()).collect(),
            api_key: None,
            metrics: None,
            warm_protected: true,
        }
    }

    pub fn addr(mut self, addr: SocketAddr) -> Self {
        self.addr = addr;
        self
    }

    pub fn port(mut self, port: u16) -> Self {
        self.addr.set_port(port);
        self
    }

    pub fn cors_origins(mut self, origins: Vec<String>) -> Self {
        self.cors_origins = origins;
        self
    }

    pub fn api_key(mut self, api_key: Option<String>) -> Self {
        self.api_key = api_key;
        self
    }

    pub fn metrics(mut self, handle: Option<PrometheusHandle>) -> Self {
        self.metrics = handle;
        self
    }

    /// Skip loading the protected model on build (useful for testing)
    pub fn skip_warm(mut self) -> Self {
        self.warm_protected = false;
        self
    }

    /// Build the server, loading the protected model first
    ///
    /// Fails if that model cannot be loaded.
    pub async fn build(self) -> Result<RediServer> {
        let state = AppState::new(self.config)
            .with_api_key(self.api_key)
            .with_metrics(self.metrics);
        let state = SharedState::new(state);

        if self.warm_protected {
            let protected = state.cache.protected_language();
            state.cache.warm_protected().await.map_err(|e| {
                ServerError::Startup(format!("could not load {} model: {}", protected, e))
            })?;
            tracing::info!(language = %protected, "Protected model ready");
        }

        Ok(RediServer {
            state,
            addr: self.addr,
            cors_origins: self.cors_origins,
        })
    }
}

/// CORS policy for the configured origins
///
/// Credentials are allowed, so request headers are mirrored instead of
/// using a wildcard.
pub fn cors_layer(origins: &[String]) -> CorsLayer {
    let origins: Vec<HeaderValue> = origins
        .iter()
        .filter_map(|origin| match HeaderValue::from_str(origin.trim()) {
            Ok(value) => Some(value),
            Err(_) => {
                tracing::warn!(origin, "Ignoring invalid CORS origin");
                None
            }
        })
        .collect();

    CorsLayer::new()
        .allow_origin(AllowOrigin::list(origins))
        .allow_methods(AllowMethods::list([Method::GET, Method::POST, Method::OPTIONS]))
        .allow_headers(AllowHeaders::mirror_request())
        .allow_credentials(true)
}

/// Parse a comma-separated origin list
pub fn parse_origins(raw: &str) -> Vec<String> {
    raw.split(',')
        .map(str::trim)
        .filter(|o| !o.is_empty())
        .map(str::to_string)
        .collect()
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!(error = %e, "Failed to listen for Ctrl-C");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut sig) => {
                sig.recv().await;
            }
            Err(e) => {
                tracing::error!(error = %e, "Failed to listen for SIGTERM");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }

    tracing::info!("Shutdown signal received");
}
