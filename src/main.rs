//! Resurgent demo host
//!
//! Runs two supervised units under resilient loops, serves their health over
//! HTTP, and hot-reloads health thresholds from the config file.
//!
//! # Usage
//!
//! ```bash
//! # Defaults (./resurgent.toml if present), /health on 127.0.0.1:8080
//! cargo run --release
//!
//! # Explicit config, JSON logs, noisier flaky unit
//! cargo run --release -- --config ./resurgent.toml --json-logs --failure-rate 0.6
//! ```
//!
//! # Environment Variables
//!
//! - `RESURGENT_CONFIG`: Path to the TOML config file
//! - `RUST_LOG`: Logging level (default: info)

use std::path::PathBuf;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use async_trait::async_trait;
use clap::Parser;
use rand::Rng;
use tokio::sync::mpsc;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use resurgent::config::watcher::{run_config_watcher, ConfigEvent, WatchTiming};
use resurgent::config::{self, defaults, ServiceConfig};
use resurgent::{Cancelled, HealthStatus, ResilientService, ServiceRegistry};

// ============================================================================
// CLI Arguments
// ============================================================================

#[derive(Parser, Debug)]
#[command(name = "resurgent")]
#[command(about = "Resilient background loops with watchdog health checks")]
#[command(version)]
struct CliArgs {
    /// Path to the TOML config file (overrides RESURGENT_CONFIG and ./resurgent.toml)
    #[arg(long, value_name = "PATH")]
    config: Option<PathBuf>,

    /// Address for the /health endpoint
    #[arg(short, long, default_value = defaults::HEALTH_ADDR)]
    addr: String,

    /// Do not serve /health over HTTP
    #[arg(long)]
    no_http: bool,

    /// Seconds between logged health probes (0 = never)
    #[arg(long, default_value_t = defaults::PROBE_INTERVAL_SECS)]
    probe_interval: u64,

    /// Probability (0.0-1.0) that an iteration of the `flaky` unit fails
    #[arg(long, default_value_t = 0.3)]
    failure_rate: f64,

    /// Emit logs as JSON lines
    #[arg(long)]
    json_logs: bool,
}

// ============================================================================
// Demo Units
// ============================================================================

/// Always succeeds; counts its ticks.
#[derive(Default)]
struct Ticker {
    ticks: AtomicU64,
}

#[async_trait]
impl ResilientService for Ticker {
    fn name(&self) -> &str {
        "Ticker"
    }

    async fn perform_iteration(&self, _cancel: CancellationToken) -> Result<()> {
        let n = self.ticks.fetch_add(1, Ordering::Relaxed) + 1;
        debug!(ticks = n, "tick");
        Ok(())
    }

    async fn dispose(&self) -> Result<()> {
        info!(ticks = self.ticks.load(Ordering::Relaxed), "Ticker disposed");
        Ok(())
    }
}

/// Does a little simulated work, failing at random.
struct Flaky {
    failure_rate: f64,
}

#[async_trait]
impl ResilientService for Flaky {
    fn name(&self) -> &str {
        "Flaky"
    }

    async fn perform_iteration(&self, cancel: CancellationToken) -> Result<()> {
        let (work_ms, fail) = {
            let mut rng = rand::thread_rng();
            (rng.gen_range(50..500), rng.gen_bool(self.failure_rate))
        };

        tokio::select! {
            () = cancel.cancelled() => return Err(Cancelled.into()),
            () = tokio::time::sleep(Duration::from_millis(work_ms)) => {}
        }

        if fail {
            anyhow::bail!("simulated failure after {work_ms}ms");
        }
        Ok(())
    }
}

// ============================================================================
// Host Tasks
// ============================================================================

fn init_logging(json: bool) {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info"));

    if json {
        tracing_subscriber::fmt()
            .json()
            .with_env_filter(filter)
            .with_target(false)
            .init();
    } else {
        tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_target(false)
            .init();
    }
}

/// Log the aggregate health every `interval`.
async fn run_health_probe(registry: Arc<ServiceRegistry>, interval: Duration, cancel: CancellationToken) {
    let mut ticker = tokio::time::interval(interval);
    ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            () = cancel.cancelled() => return,
            _ = ticker.tick() => {}
        }

        let report = registry.check_all();
        for (name, check) in &report.checks {
            match check.status {
                HealthStatus::Healthy => debug!(check = %name, "{}", check.description),
                HealthStatus::Degraded => warn!(check = %name, "{}", check.description),
                HealthStatus::Unhealthy => error!(check = %name, "{}", check.description),
            }
        }
        info!(status = %report.status, checks = report.checks.len(), "Health probe");
    }
}

/// Apply hot-reloaded configs to the registry.
async fn apply_config_events(registry: Arc<ServiceRegistry>, mut rx: mpsc::Receiver<ConfigEvent>) {
    while let Some(event) = rx.recv().await {
        match event {
            ConfigEvent::Reloaded { config, changes } => {
                let updated = registry.apply_config(&config);
                info!(
                    changes = changes.len(),
                    updated = updated.len(),
                    "Config reloaded"
                );
            }
            ConfigEvent::Error(e) => warn!(error = %e, "Config reload rejected"),
        }
    }
}

async fn serve_http(registry: Arc<ServiceRegistry>, addr: &str, cancel: CancellationToken) -> Result<()> {
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("Failed to bind to {addr}"))?;
    info!("Health endpoint available at: http://{}/health", addr);

    axum::serve(listener, resurgent::api::create_app(registry))
        .with_graceful_shutdown(async move {
            cancel.cancelled().await;
            info!("[HttpServer] Received shutdown signal");
        })
        .await
        .context("HTTP server error")
}

// ============================================================================
// Main Entry Point
// ============================================================================

#[tokio::main]
async fn main() -> Result<()> {
    let args = CliArgs::parse();
    init_logging(args.json_logs);

    let (service_config, config_path) = match &args.config {
        Some(path) => (
            ServiceConfig::load_from_file(path)
                .with_context(|| format!("Failed to load config from {}", path.display()))?,
            Some(path.clone()),
        ),
        None => (ServiceConfig::load(), ServiceConfig::locate()),
    };
    let shared = config::shared(service_config);

    let registry = Arc::new(ServiceRegistry::with_system_clock());
    {
        let current = shared.load();
        registry.register_configured("ticker", Arc::new(Ticker::default()), &current)?;
        registry.register_configured(
            "flaky",
            Arc::new(Flaky {
                failure_rate: args.failure_rate.clamp(0.0, 1.0),
            }),
            &current,
        )?;
    }

    let cancel = CancellationToken::new();
    let shutdown = cancel.clone();
    tokio::spawn(async move {
        tokio::signal::ctrl_c().await.ok();
        info!("Received Ctrl+C, initiating shutdown...");
        shutdown.cancel();
    });

    registry.start(&cancel);

    let mut tasks = JoinSet::new();
    if let Some(path) = config_path {
        let (tx, rx) = mpsc::channel(8);
        tasks.spawn(run_config_watcher(
            path,
            shared.clone(),
            tx,
            WatchTiming::default(),
            cancel.clone(),
        ));
        tasks.spawn(apply_config_events(registry.clone(), rx));
    }
    if args.probe_interval > 0 {
        tasks.spawn(run_health_probe(
            registry.clone(),
            Duration::from_secs(args.probe_interval),
            cancel.clone(),
        ));
    }

    if args.no_http {
        cancel.cancelled().await;
    } else if let Err(e) = serve_http(registry.clone(), &args.addr, cancel.clone()).await {
        error!(error = %e, "HTTP server failed, shutting down");
        cancel.cancel();
    }

    // Bounded shutdown: in-flight iterations get the grace period, then are aborted
    let deadline = CancellationToken::new();
    let fire = deadline.clone();
    tokio::spawn(async move {
        tokio::time::sleep(defaults::STOP_GRACE_PERIOD).await;
        fire.cancel();
    });
    let failures = registry.stop(&deadline).await;
    for f in &failures {
        warn!(error = %f, "Unclean loop shutdown");
    }

    tasks.shutdown().await;
    info!("Shutdown complete");
    Ok(())
}
