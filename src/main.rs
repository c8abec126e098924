use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use clap::Parser;
use futures::future::join_all;
use tokio::signal;
use tokio::time::Instant;
use tracing::{debug, info, warn};
use tracing_subscriber::EnvFilter;

use slidegate::config::AppConfig;
use slidegate::{CancelToken, Limiter, LimiterError};

/// Drive a sliding-window limiter with concurrent workers and report the outcome.
#[derive(Parser, Debug)]
#[command(name = "slidegate", version, about)]
struct Cli {
    /// YAML configuration file
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Maximum admissions per window
    #[arg(long)]
    max_count: Option<i64>,

    /// Window length in milliseconds
    #[arg(long)]
    interval_ms: Option<u64>,

    /// Number of concurrent workers
    #[arg(long)]
    workers: Option<usize>,

    /// Acquire calls per worker
    #[arg(long)]
    requests: Option<usize>,

    /// Per-acquire timeout in milliseconds
    #[arg(long)]
    timeout_ms: Option<u64>,

    /// Emit logs as JSON
    #[arg(long)]
    json: bool,
}

/// Outcome counts for one worker.
#[derive(Debug, Default, Clone, Copy)]
struct Tally {
    admitted: usize,
    cancelled: usize,
    stopped: usize,
    rejected: usize,
}

impl Tally {
    fn merge(mut self, other: Tally) -> Self {
        self.admitted += other.admitted;
        self.cancelled += other.cancelled;
        self.stopped += other.stopped;
        self.rejected += other.rejected;
        self
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    // Initialize tracing
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    if cli.json {
        tracing_subscriber::fmt()
            .json()
            .with_env_filter(filter)
            .with_thread_ids(true)
            .init();
    } else {
        tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_target(false)
            .with_thread_ids(true)
            .init();
    }

    info!("Starting Slidegate");
    info!("Version: {}", env!("CARGO_PKG_VERSION"));

    let mut config = match &cli.config {
        Some(path) => AppConfig::load(path)?,
        None => AppConfig::default(),
    };
    apply_overrides(&mut config, &cli);
    info!(
        max_count = config.limiter.max_count,
        interval = ?config.limiter.interval(),
        workers = config.demo.workers,
        requests_per_worker = config.demo.requests_per_worker,
        "Configuration loaded"
    );

    let limiter = Arc::new(Limiter::with_config(config.limiter.clone()));
    let root = CancelToken::new();
    let started = Instant::now();

    let handles = (0..config.demo.workers).map(|worker| {
        let limiter = Arc::clone(&limiter);
        let root = root.clone();
        let requests = config.demo.requests_per_worker;
        let timeout = config.demo.timeout_ms.map(Duration::from_millis);
        tokio::spawn(run_worker(worker, limiter, root, requests, timeout, started))
    });
    let workers = join_all(handles);
    tokio::pin!(workers);

    let mut stopped = false;
    let results = tokio::select! {
        results = &mut workers => results,
        _ = shutdown_signal() => {
            limiter.stop();
            stopped = true;
            workers.await
        }
    };
    if !stopped {
        limiter.stop();
    }

    let mut total = Tally::default();
    for result in results {
        total = total.merge(result?);
    }

    limiter.terminated().await;

    info!(
        admitted = total.admitted,
        cancelled = total.cancelled,
        stopped = total.stopped,
        rejected = total.rejected,
        elapsed_ms = started.elapsed().as_millis() as u64,
        "Slidegate finished"
    );
    Ok(())
}

/// Command-line flags win over file and environment values.
fn apply_overrides(config: &mut AppConfig, cli: &Cli) {
    if let Some(max_count) = cli.max_count {
        config.limiter.max_count = max_count;
    }
    if let Some(interval_ms) = cli.interval_ms {
        config.limiter.set_interval(Duration::from_millis(interval_ms));
    }
    if let Some(workers) = cli.workers {
        config.demo.workers = workers;
    }
    if let Some(requests) = cli.requests {
        config.demo.requests_per_worker = requests;
    }
    if cli.timeout_ms.is_some() {
        config.demo.timeout_ms = cli.timeout_ms;
    }
}

/// Issue `requests` acquires in sequence, stopping early once the limiter is gone.
async fn run_worker(
    worker: usize,
    limiter: Arc<Limiter>,
    root: CancelToken,
    requests: usize,
    timeout: Option<Duration>,
    started: Instant,
) -> Tally {
    let mut tally = Tally::default();

    for request in 0..requests {
        let token = match timeout {
            Some(timeout) => root.child_with_timeout(timeout),
            None => root.child_token(),
        };

        match limiter.acquire(&token).await {
            Ok(()) => {
                tally.admitted += 1;
                debug!(
                    worker,
                    request,
                    at_ms = started.elapsed().as_millis() as u64,
                    "Admitted"
                );
            }
            Err(LimiterError::Cancelled(reason)) => {
                tally.cancelled += 1;
                debug!(worker, request, reason = %reason, "Cancelled");
            }
            Err(LimiterError::Stopped) => {
                tally.stopped += 1;
                debug!(worker, request, "Limiter stopped");
                break;
            }
            Err(e) => {
                tally.rejected += 1;
                warn!(worker, error = %e, "Acquire rejected");
                break;
            }
        }
    }

    tally
}

/// Wait for a shutdown signal (Ctrl+C or SIGTERM).
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            warn!(error = %e, "Failed to install Ctrl+C handler");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                warn!(error = %e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            info!("Received Ctrl+C, stopping limiter");
        }
        _ = terminate => {
            info!("Received SIGTERM, stopping limiter");
        }
    }
}
