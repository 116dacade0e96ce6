//! Load testing binary for the REDI server
//!
//! Tests restoration throughput, cold-load latency and rate limiting
//! under concurrent clients.
//!
//! Usage:
//!   loadtest [OPTIONS] <SERVER_URL>
//!
//! Examples:
//!   loadtest http://localhost:8000                       # Default: 32 clients, 20 requests each
//!   loadtest http://localhost:8000 -c 128 -q 5           # 128 clients, 5 requests each
//!   loadtest http://localhost:8000 --languages sl,sr     # Standard tier only
//!   loadtest http://localhost:8000 --watch-stats         # Poll /stats during test

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use clap::Parser;
use reqwest::{Client, StatusCode};
use serde::{Deserialize, Serialize};
use tokio::sync::Semaphore;

#[derive(Parser, Debug)]
#[command(name = "loadtest")]
#[command(about = "Load test the REDI server")]
struct Args {
    /// Server URL (e.g., http://localhost:8000)
    server_url: String,

    /// Number of concurrent clients
    #[arg(short = 'c', long, default_value = "32")]
    clients: usize,

    /// Number of requests per client
    #[arg(short = 'q', long, default_value = "20")]
    requests: usize,

    /// Comma-separated languages to rotate through
    #[arg(short = 'l', long, default_value = "hr,sl,sr")]
    languages: String,

    /// Names to restore, rotated per request
    #[arg(long, default_value = "Sime Cosic,Dordevic,Zuzelj,Ivan Horvat")]
    names: String,

    /// Send a distinct X-Real-IP per client so each gets its own window
    #[arg(long)]
    distinct_clients: bool,

    /// Poll /stats during the test
    #[arg(long)]
    watch_stats: bool,

    /// Stats poll interval in seconds (only with --watch-stats)
    #[arg(long, default_value = "2")]
    stats_interval: u64,

    /// Maximum concurrent requests (limits parallelism)
    #[arg(long, default_value = "64")]
    max_concurrent: usize,

    /// API key sent as X-API-Key
    #[arg(long, env = "REDI_API_KEY")]
    api_key: Option<String>,
}

#[derive(Serialize)]
struct SuggestRequest<'a> {
    name: &'a str,
    lang: &'a str,
}

#[derive(Deserialize)]
struct SuggestResponse {
    #[allow(dead_code)]
    original: String,
    #[allow(dead_code)]
    suggestion: Option<String>,
}

#[derive(Deserialize)]
struct StatsResponse {
    loaded: Vec<String>,
    loads_in_flight: usize,
}

struct Stats {
    total_requests: AtomicU64,
    successful_requests: AtomicU64,
    rate_limited: AtomicU64,
    failed_requests: AtomicU64,
    total_latency_us: AtomicU64,
    min_latency_us: AtomicU64,
    max_latency_us: AtomicU64,
}

impl Stats {
    fn new() -> Self {
        Self {
            total_requests: AtomicU64::new(0),
            successful_requests: AtomicU64::new(0),
            rate_limited: AtomicU64::new(0),
            failed_requests: AtomicU64::new(0),
            total_latency_us: AtomicU64::new(0),
            min_latency_us: AtomicU64::new(u64::MAX),
            max_latency_us: AtomicU64::new(0),
        }
    }

    fn record_success(&self, latency_us: u64) {
        self.total_requests.fetch_add(1, Ordering::Relaxed);
        self.successful_requests.fetch_add(1, Ordering::Relaxed);
        self.total_latency_us.fetch_add(latency_us, Ordering::Relaxed);
        self.min_latency_us.fetch_min(latency_us, Ordering::Relaxed);
        self.max_latency_us.fetch_max(latency_us, Ordering::Relaxed);
    }

    fn record_rate_limited(&self) {
        self.total_requests.fetch_add(1, Ordering::Relaxed);
        self.rate_limited.fetch_add(1, Ordering::Relaxed);
    }

    fn record_failure(&self) {
        self.total_requests.fetch_add(1, Ordering::Relaxed);
        self.failed_requests.fetch_add(1, Ordering::Relaxed);
    }

    fn report(&self, duration: Duration) {
        let total = self.total_requests.load(Ordering::Relaxed);
        let success = self.successful_requests.load(Ordering::Relaxed);
        let limited = self.rate_limited.load(Ordering::Relaxed);
        let failed = self.failed_requests.load(Ordering::Relaxed);
        let total_latency = self.total_latency_us.load(Ordering::Relaxed);
        let min_latency = self.min_latency_us.load(Ordering::Relaxed);
        let max_latency = self.max_latency_us.load(Ordering::Relaxed);

        let avg_latency = if success > 0 { total_latency / success } else { 0 };
        let pct = |n: u64| if total > 0 { n as f64 / total as f64 * 100.0 } else { 0.0 };

        let rps = if duration.as_secs_f64() > 0.0 {
            total as f64 / duration.as_secs_f64()
        } else {
            0.0
        };

        println!("\n=== Load Test Results ===");
        println!("Duration:     {:?}", duration);
        println!("Total:        {} requests", total);
        println!("Successful:   {} ({:.1}%)", success, pct(success));
        println!("Rate limited: {} ({:.1}%)", limited, pct(limited));
        println!("Failed:       {}", failed);
        println!("Throughput:   {:.1} requests/sec", rps);
        println!("\nLatency (successful requests):");
        if min_latency != u64::MAX {
            println!("  Min:        {:.2} ms", min_latency as f64 / 1000.0);
            println!("  Avg:        {:.2} ms", avg_latency as f64 / 1000.0);
            println!("  Max:        {:.2} ms", max_latency as f64 / 1000.0);
        } else {
            println!("  (no successful requests)");
        }
    }
}

struct ClientPlan {
    client_id: usize,
    server_url: String,
    requests: usize,
    languages: Arc<Vec<String>>,
    names: Arc<Vec<String>>,
    distinct_clients: bool,
    api_key: Option<String>,
}

async fn run_client(plan: ClientPlan, http: Client, stats: Arc<Stats>, semaphore: Arc<Semaphore>) {
    for q in 0..plan.requests {
        let Ok(_permit) = semaphore.acquire().await else {
            return;
        };

        let slot = plan.client_id + q;
        let lang = &plan.languages[slot % plan.languages.len()];
        let name = &plan.names[slot % plan.names.len()];

        let mut request = http
            .post(format!("{}/suggest", plan.server_url))
            .json(&SuggestRequest { name, lang });
        if plan.distinct_clients {
            request = request.header("x-real-ip", format!("10.77.{}.{}", plan.client_id / 256, plan.client_id % 256));
        }
        if let Some(key) = &plan.api_key {
            request = request.header("x-api-key", key);
        }

        let start = Instant::now();
        let result = async {
            let resp = request.send().await?;
            if resp.status() == StatusCode::TOO_MANY_REQUESTS {
                return Ok(false);
            }
            let _body: SuggestResponse = resp.error_for_status()?.json().await?;
            Ok::<_, anyhow::Error>(true)
        }
        .await;

        let latency_us = start.elapsed().as_micros() as u64;

        match result {
            Ok(true) => stats.record_success(latency_us),
            Ok(false) => stats.record_rate_limited(),
            Err(e) => {
                stats.record_failure();
                if q == 0 {
                    eprintln!("Client {} request {} failed: {}", plan.client_id, q, e);
                }
            }
        }
    }
}

async fn watch_stats(http: Client, server_url: String, interval: Duration, stop: Arc<AtomicBool>) {
    while !stop.load(Ordering::Relaxed) {
        tokio::time::sleep(interval).await;

        if stop.load(Ordering::Relaxed) {
            break;
        }

        let polled = async {
            let stats: StatsResponse = http
                .get(format!("{}/stats", server_url))
                .send()
                .await?
                .json()
                .await?;
            Ok::<_, reqwest::Error>(stats)
        }
        .await;

        match polled {
            Ok(stats) => println!(
                "[Stats] loaded: {:?}, loads in flight: {}",
                stats.loaded, stats.loads_in_flight
            ),
            Err(e) => println!("[Stats] Error: {}", e),
        }
    }
}

fn split_list(raw: &str) -> Vec<String> {
    raw.split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
        .collect()
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    let languages = split_list(&args.languages);
    let names = split_list(&args.names);
    anyhow::ensure!(!languages.is_empty(), "at least one language is required");
    anyhow::ensure!(!names.is_empty(), "at least one name is required");

    println!("REDI Load Test");
    println!("==============");
    println!("Server:           {}", args.server_url);
    println!("Clients:          {}", args.clients);
    println!("Requests/client:  {}", args.requests);
    println!("Languages:        {}", languages.join(", "));
    println!("Max concurrent:   {}", args.max_concurrent);
    println!("Distinct clients: {}", args.distinct_clients);
    println!();

    let http = Client::builder().timeout(Duration::from_secs(60)).build()?;

    let health = http.get(format!("{}/health", args.server_url)).send().await?;
    println!("Health: {}", health.status());

    let languages = Arc::new(languages);
    let names = Arc::new(names);
    let stats = Arc::new(Stats::new());
    let semaphore = Arc::new(Semaphore::new(args.max_concurrent.max(1)));

    let stop_watcher = Arc::new(AtomicBool::new(false));
    let watch_handle = if args.watch_stats {
        let http = http.clone();
        let url = args.server_url.clone();
        let interval = Duration::from_secs(args.stats_interval.max(1));
        let stop = stop_watcher.clone();
        Some(tokio::spawn(async move {
            watch_stats(http, url, interval, stop).await;
        }))
    } else {
        None
    };

    println!(
        "\nStarting load test with {} clients x {} requests = {} total...",
        args.clients,
        args.requests,
        args.clients * args.requests
    );

    let start = Instant::now();
    let mut handles = vec![];

    for client_id in 0..args.clients {
        let plan = ClientPlan {
            client_id,
            server_url: args.server_url.clone(),
            requests: args.requests,
            languages: languages.clone(),
            names: names.clone(),
            distinct_clients: args.distinct_clients,
            api_key: args.api_key.clone(),
        };
        let http = http.clone();
        let stats = stats.clone();
        let sem = semaphore.clone();

        handles.push(tokio::spawn(async move {
            run_client(plan, http, stats, sem).await;
        }));
    }

    for h in handles {
        let _ = h.await;
    }

    let duration = start.elapsed();

    stop_watcher.store(true, Ordering::Relaxed);
    if let Some(h) = watch_handle {
        let _ = h.await;
    }

    stats.report(duration);

    Ok(())
}
