mod api;
mod error;
mod fleet;
mod metrics;
#[cfg(test)]
mod testing;

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use clap::Parser;
use tokio::net::TcpListener;
use tokio::sync::watch;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

use crate::fleet::liveness::{LivenessProbe, ProcessTableProbe};
use crate::fleet::store::{FleetStore, run_refresh_loop};

/// Dashboard for a fleet of fuzzing workers writing to a shared directory.
#[derive(Parser, Debug)]
#[command(name = "fuzzdash")]
struct Args {
    /// Directory to search for `fuzzer-config.json` files.
    #[arg(value_parser = non_empty_path)]
    root: PathBuf,
    #[arg(long, default_value = "127.0.0.1:3000")]
    addr: String,
    /// Seconds between refreshes of every worker's status.
    #[arg(long, default_value_t = 15, value_parser = clap::value_parser!(u64).range(1..))]
    poll_secs: u64,
    #[arg(long, default_value_t = false)]
    debug: bool,
}

fn non_empty_path(value: &str) -> Result<PathBuf, String> {
    if value.is_empty() {
        return Err("root directory must not be empty".to_string());
    }
    Ok(PathBuf::from(value))
}

/// How long shutdown waits for worker reads still stuck in blocking calls.
const SHUTDOWN_GRACE: Duration = Duration::from_secs(2);

fn main() -> anyhow::Result<()> {
    let runtime = tokio::runtime::Runtime::new().context("failed to start tokio runtime")?;
    let result = runtime.block_on(run());
    // a hung metrics or directory read must not keep the process alive
    runtime.shutdown_timeout(SHUTDOWN_GRACE);
    result
}

async fn run() -> anyhow::Result<()> {
    let args = Args::parse();
    init_logging(args.debug);

    let root = std::path::absolute(&args.root)
        .with_context(|| format!("failed to resolve {:?}", args.root))?;
    info!(event = "startup", root = %root.display(), "searching for fuzzers");

    let probe: Arc<dyn LivenessProbe> = Arc::new(ProcessTableProbe);
    let store = Arc::new(FleetStore::discover(root, probe).await?);
    info!(
        event = "discovery_done",
        root = %store.root().display(),
        workers = store.workers().len(),
    );

    let listener = match TcpListener::bind(&args.addr).await {
        Ok(listener) => listener,
        Err(err) => {
            error!(event = "server_error", addr = %args.addr, error = %err);
            return Err(err).with_context(|| format!("failed to bind {}", args.addr));
        }
    };

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let shutdown_tx = Arc::new(shutdown_tx);
    let refresher = tokio::spawn(run_refresh_loop(
        store.clone(),
        Duration::from_secs(args.poll_secs),
        shutdown_rx.clone(),
    ));
    tokio::spawn({
        let shutdown_tx = shutdown_tx.clone();
        async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                info!(event = "shutdown");
                let _ = shutdown_tx.send(true);
            }
        }
    });

    info!(event = "server_start", addr = %listener.local_addr()?);
    let served = api::server::serve(listener, store, shutdown_rx).await;

    let _ = shutdown_tx.send(true);
    if let Err(err) = refresher.await {
        error!(event = "refresh_task_failed", error = %err);
    }
    if let Err(err) = &served {
        error!(event = "server_error", error = %err);
    }
    served.context("dashboard server failed")
}

fn init_logging(debug: bool) {
    let level = if debug { "debug" } else { "info" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));
    tracing_subscriber::fmt().with_env_filter(filter).init();
}
