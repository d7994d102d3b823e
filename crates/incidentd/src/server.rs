//! HTTP server for incidentd

use anyhow::Result;
use axum::http::{HeaderValue, Method};
use axum::Router;
use incident_shared::IncidentError;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tower_http::cors::{AllowOrigin, Any, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing::{info, warn};

use crate::config::Config;
use crate::faults::FaultController;
use crate::lifecycle::{completion_channel, CompletionJobs, LifecycleManager};
use crate::logs::LogAggregator;
use crate::registry::FleetRegistry;
use crate::reports::ReportStore;
use crate::routes;
use crate::runtime::ContainerRuntime;
use crate::shutdown::ShutdownListener;
use crate::store::RunStore;
use crate::summarizer::Summarizer;

/// Application state shared across handlers
pub struct AppState {
    pub registry: Arc<FleetRegistry>,
    pub runtime: Arc<dyn ContainerRuntime>,
    pub faults: Arc<FaultController>,
    pub lifecycle: Arc<LifecycleManager>,
    pub default_log_lines: usize,
    pub start_time: Instant,
}

impl AppState {
    /// Wire every component from `config` around the given collaborators.
    ///
    /// The returned jobs feed the `CompletionWorker`.
    pub async fn build(
        config: &Config,
        runtime: Arc<dyn ContainerRuntime>,
        summarizer: Arc<dyn Summarizer>,
    ) -> Result<(Self, CompletionJobs), IncidentError> {
        let registry = Arc::new(FleetRegistry::from_config(&config.fleet)?);
        let faults = Arc::new(FaultController::new(registry.clone(), runtime.clone()));
        let logs = Arc::new(LogAggregator::new(
            registry.clone(),
            runtime.clone(),
            config.logs.services.clone(),
        ));
        let store = Arc::new(RunStore::open(&config.storage.database_path).await?);
        let reports = ReportStore::new(&config.storage.reports_dir);

        let (queue, jobs) = completion_channel(config.lifecycle.completion_delay());
        let lifecycle = Arc::new(LifecycleManager::new(
            store,
            reports,
            logs,
            summarizer,
            config.lifecycle.clone(),
            config.summarizer.min_lines,
            queue,
        ));

        let state = Self {
            registry,
            runtime,
            faults,
            lifecycle,
            default_log_lines: config.logs.default_lines,
            start_time: Instant::now(),
        };
        Ok((state, jobs))
    }

    pub fn uptime(&self) -> Duration {
        self.start_time.elapsed()
    }
}

fn cors_layer(origins: &[String]) -> CorsLayer {
    let origins: Vec<HeaderValue> = origins
        .iter()
        .filter_map(|origin| match HeaderValue::from_str(origin) {
            Ok(value) => Some(value),
            Err(_) => {
                warn!("Ignoring invalid CORS origin '{}'", origin);
                None
            }
        })
        .collect();

    CorsLayer::new()
        .allow_origin(AllowOrigin::list(origins))
        .allow_methods([Method::GET, Method::POST, Method::DELETE, Method::OPTIONS])
        .allow_headers(Any)
}

/// Full application router
pub fn app(state: Arc<AppState>, cors_origins: &[String]) -> Router {
    Router::new()
        .merge(routes::root_routes())
        .merge(routes::service_routes())
        .merge(routes::incident_routes())
        .merge(routes::run_routes())
        .with_state(state)
        .layer(cors_layer(cors_origins))
        .layer(TraceLayer::new_for_http())
}

/// Serve until `shutdown` fires.
pub async fn run(state: Arc<AppState>, config: &Config, mut shutdown: ShutdownListener) -> Result<()> {
    let app = app(state, &config.server.cors_origins);

    let listener = tokio::net::TcpListener::bind(&config.server.bind).await?;
    info!("Listening on http://{}", config.server.bind);

    axum::serve(listener, app)
        .with_graceful_shutdown(async move { shutdown.wait().await })
        .await?;
    Ok(())
}
