//! incidentd - incident simulation daemon
//!
//! Serves the fault-injection and incident-run API, and runs the background
//! chaos loop when enabled.

use anyhow::Result;
use clap::Parser;
use incidentd::config::Config;
use incidentd::docker::DockerCli;
use incidentd::lifecycle::CompletionWorker;
use incidentd::runtime::{probe_with_retry, ContainerRuntime};
use incidentd::server::{self, AppState};
use incidentd::shutdown::ShutdownSignal;
use incidentd::simulator::{Simulator, SimulatorSettings};
use incidentd::summarizer::{OpenAiSummarizer, Summarizer};
use std::path::PathBuf;
use std::sync::Arc;
use tokio::task::JoinHandle;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "incidentd")]
#[command(about = "Incident simulation daemon", long_about = None)]
#[command(version)]
struct Args {
    /// Config file (defaults to /etc/incidentd/config.toml)
    #[arg(long)]
    config: Option<PathBuf>,

    /// Override the listen address
    #[arg(long)]
    bind: Option<String>,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    info!("incidentd v{} starting", env!("CARGO_PKG_VERSION"));

    let mut config = Config::load(args.config.as_deref());
    if let Some(bind) = args.bind {
        config.server.bind = bind;
    }

    let runtime: Arc<dyn ContainerRuntime> = Arc::new(DockerCli::new(
        config.runtime.docker_bin.clone(),
        config.runtime.call_timeout(),
    ));
    // every call re-checks reachability, so a failed probe is not fatal
    if let Err(e) = probe_with_retry(
        runtime.as_ref(),
        config.runtime.probe_attempts,
        config.runtime.probe_backoff(),
    )
    .await
    {
        warn!("Container runtime not reachable at startup: {}", e);
    }

    let summarizer: Arc<dyn Summarizer> = Arc::new(OpenAiSummarizer::from_config(&config.summarizer));
    let (state, jobs) = AppState::build(&config, runtime, summarizer).await?;
    let state = Arc::new(state);

    let shutdown = Arc::new(ShutdownSignal::new());
    let worker = CompletionWorker::new(state.lifecycle.clone(), jobs).start(shutdown.listener());

    let simulator: Option<JoinHandle<()>> = if config.simulator.enabled {
        let sim = Simulator::new(
            state.faults.clone(),
            state.runtime.clone(),
            SimulatorSettings::from(&config.simulator),
        );
        Some(sim.start(shutdown.listener()))
    } else {
        info!("Simulator disabled");
        None
    };

    {
        let shutdown = shutdown.clone();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                info!("Shutting down gracefully");
                shutdown.trigger();
            }
        });
    }

    let served = server::run(state, &config, shutdown.listener()).await;
    shutdown.trigger();

    if let Some(handle) = simulator {
        if let Err(e) = handle.await {
            warn!("Simulator task ended abnormally: {}", e);
        }
    }
    if let Err(e) = worker.await {
        warn!("Completion worker ended abnormally: {}", e);
    }

    served
}
