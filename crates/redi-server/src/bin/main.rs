//! redi-server binary: diacritic restoration service

use std::net::{IpAddr, SocketAddr};
use std::path::PathBuf;

use anyhow::Context;
use clap::Parser;
use redi_core::RediConfig;
use redi_server::metrics::init_prometheus_recorder;
use redi_server::server::{parse_origins, ServerBuilder};
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(name = "redi-server")]
#[command(about = "Diacritic restoration service for hr, sl and sr names")]
struct Args {
    /// JSON config file (defaults apply when omitted)
    #[arg(short, long, env = "REDI_CONFIG")]
    config: Option<PathBuf>,

    /// Directory holding wikitweetweb.<lang>.tm files (overrides config)
    #[arg(long, env = "REDI_MODEL_DIR")]
    model_dir: Option<PathBuf>,

    /// Address to bind
    #[arg(long, default_value = "0.0.0.0")]
    host: IpAddr,

    /// Port to listen on
    #[arg(short, long, env = "PORT", default_value = "8000")]
    port: u16,

    /// Comma-separated list of allowed CORS origins
    #[arg(long, env = "CORS_ORIGINS")]
    cors_origins: Option<String>,

    /// Require this value in the X-API-Key header
    #[arg(long, env = "REDI_API_KEY", hide_env_values = true)]
    api_key: Option<String>,

    /// Report unhealthy once resident memory reaches this many MB (overrides config)
    #[arg(long, env = "REDI_MEMORY_LIMIT_MB")]
    memory_limit_mb: Option<u64>,

    /// Expose Prometheus metrics on /metrics
    #[arg(long)]
    metrics: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("redi_server=info,tower_http=info")),
        )
        .init();

    let args = Args::parse();

    let mut config = match &args.config {
        Some(path) => RediConfig::load(path)
            .with_context(|| format!("loading config from {}", path.display()))?,
        None => RediConfig::default(),
    };
    if let Some(dir) = args.model_dir {
        config.model_dir = dir;
    }
    if let Some(limit) = args.memory_limit_mb {
        config.memory_limit_mb = Some(limit);
    }
    config.validate()?;

    tracing::info!(
        model_dir = %config.model_dir.display(),
        protected = %config.protected_language,
        unload_timeout_secs = config.unload_timeout_secs,
        max_concurrent_loads = config.max_concurrent_loads,
        "Configuration loaded"
    );

    let metrics = if args.metrics {
        Some(init_prometheus_recorder()?)
    } else {
        None
    };

    let mut builder = ServerBuilder::new(config)
        .addr(SocketAddr::new(args.host, args.port))
        .api_key(args.api_key)
        .metrics(metrics);
    if let Some(raw) = args.cors_origins {
        builder = builder.cors_origins(parse_origins(&raw));
    }

    let server = builder.build().await?;

    tracing::info!("Server ready on {}", server.addr());
    server.run().await?;

    Ok(())
}
