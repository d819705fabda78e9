//! Prezenta smoke harness
//!
//! Installs the offline worker against a live origin, pushes a list of
//! requests through it and prints a JSON summary of where each answer came
//! from. Run it once online to fill the cache, then again with the server
//! down to check the offline path.

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, Instant};

use anyhow::{bail, Context};
use prezenta_cache::{CacheStore, MemoryCacheStore, SqliteCacheStore};
use prezenta_common::{init_logging, LogConfig, LogFormat, WorkerConfig};
use prezenta_net::{HttpFetcher, LoaderConfig, Request};
use prezenta_sw::{FetchSource, Registration, ServiceWorkerEvent};
use serde_json::json;
use tracing::{info, warn};

/// Durations per operation.
#[derive(Default)]
struct PerfTiming {
    timings: HashMap<&'static str, Vec<Duration>>,
}

impl PerfTiming {
    fn record(&mut self, operation: &'static str, duration: Duration) {
        self.timings.entry(operation).or_default().push(duration);
    }

    fn summary(&self) -> serde_json::Value {
        let mut summary = serde_json::Map::new();

        for (op, durations) in &self.timings {
            if durations.is_empty() {
                continue;
            }

            let ms: Vec<f64> = durations.iter().map(|d| d.as_secs_f64() * 1000.0).collect();
            let total_ms: f64 = ms.iter().sum();
            let max_ms = ms.iter().copied().fold(f64::NEG_INFINITY, f64::max);

            summary.insert(
                op.to_string(),
                json!({
                    "count": ms.len(),
                    "total_ms": (total_ms * 100.0).round() / 100.0,
                    "avg_ms": (total_ms / ms.len() as f64 * 100.0).round() / 100.0,
                    "max_ms": (max_ms * 100.0).round() / 100.0,
                }),
            );
        }

        serde_json::Value::Object(summary)
    }
}

/// Parse command line arguments
struct Args {
    config: Option<PathBuf>,
    urls: Vec<String>,
    log_format: LogFormat,
    output: Option<PathBuf>,
}

impl Args {
    fn parse() -> anyhow::Result<Self> {
        let mut args = std::env::args().skip(1);
        let mut config = None;
        let mut urls = Vec::new();
        let mut log_format = LogFormat::Compact;
        let mut output = None;

        while let Some(arg) = args.next() {
            match arg.as_str() {
                "--config" => {
                    config = args.next().map(PathBuf::from);
                }
                "--url" => {
                    if let Some(val) = args.next() {
                        urls.push(val);
                    }
                }
                "--log" => {
                    log_format = match args.next().as_deref() {
                        Some("pretty") => LogFormat::Pretty,
                        Some("json") => LogFormat::Json,
                        Some("compact") | None => LogFormat::Compact,
                        Some(other) => bail!("unknown log format: {other}"),
                    };
                }
                "--output" => {
                    output = args.next().map(PathBuf::from);
                }
                other => bail!("unknown argument: {other}"),
            }
        }

        Ok(Self {
            config,
            urls,
            log_format,
            output,
        })
    }
}

fn source_name(source: FetchSource) -> &'static str {
    match source {
        FetchSource::Cache => "cache",
        FetchSource::Network => "network",
        FetchSource::Offline => "offline",
        FetchSource::Passthrough => "passthrough",
    }
}

fn open_store(config: &WorkerConfig) -> anyhow::Result<Arc<dyn CacheStore>> {
    Ok(match config.store.sqlite_path() {
        Some(path) => {
            info!(path = %path.display(), "Using SQLite cache store");
            Arc::new(
                SqliteCacheStore::open(&path)
                    .with_context(|| format!("opening cache database {}", path.display()))?,
            )
        }
        None => Arc::new(MemoryCacheStore::new()),
    })
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse()?;
    init_logging(LogConfig {
        format: args.log_format,
        ..LogConfig::default()
    })?;

    let config = match &args.config {
        Some(path) => WorkerConfig::load(path)?,
        None => WorkerConfig::default(),
    };
    info!(
        origin = %config.origin,
        version = %config.cache_version,
        urls = args.urls.len(),
        "Starting Prezenta smoke harness"
    );

    let store = open_store(&config)?;
    let fetcher = HttpFetcher::new(
        LoaderConfig::new(config.origin.clone())
            .user_agent(config.user_agent.clone())
            .timeout(config.request_timeout_secs.map(Duration::from_secs)),
    )?;
    let (registration, mut events) =
        Registration::new(config.origin.clone(), store, Arc::new(fetcher));

    let mut perf = PerfTiming::default();

    let started = Instant::now();
    let (worker, report) = registration.install(&config).await?;
    perf.record("install", started.elapsed());
    if let Some(e) = &report.error {
        warn!(error = %e, "Pre-cache incomplete");
    }

    registration.open_client(config.origin.clone()).await;

    let mut fetches = Vec::with_capacity(args.urls.len());
    for target in &args.urls {
        let url = config
            .origin
            .join(target)
            .with_context(|| format!("resolving {target}"))?;

        let started = Instant::now();
        let result = registration.handle_fetch(Request::get(url.clone())).await;
        perf.record("fetch", started.elapsed());

        fetches.push(match result {
            Ok(outcome) => json!({
                "url": url.as_str(),
                "source": source_name(outcome.source),
                "status": outcome.response.status.as_u16(),
                "status_text": outcome.response.status_text,
            }),
            Err(e) => json!({
                "url": url.as_str(),
                "error": e.to_string(),
            }),
        });
    }

    registration.settle().await;

    let mut deleted = Vec::new();
    let mut event_count = 0usize;
    while let Ok(event) = events.try_recv() {
        event_count += 1;
        if let ServiceWorkerEvent::CacheDeleted { name } = event {
            deleted.push(name);
        }
    }

    let summary = json!({
        "worker": worker.id().to_string(),
        "version": worker.version(),
        "state": worker.state().await.to_string(),
        "precached": report.cached,
        "precache_error": report.error.as_ref().map(|e| e.to_string()),
        "deleted_caches": deleted,
        "events": event_count,
        "fetches": fetches,
        "timings": perf.summary(),
    });

    let rendered = serde_json::to_string_pretty(&summary)?;
    println!("{rendered}");
    if let Some(path) = &args.output {
        std::fs::write(path, &rendered)
            .with_context(|| format!("writing summary to {}", path.display()))?;
    }

    Ok(())
}
