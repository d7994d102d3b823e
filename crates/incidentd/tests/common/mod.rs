//! Shared fixtures: a fully wired daemon over `FakeRuntime` and `FakeSummarizer`.

#![allow(dead_code)]

use incidentd::config::Config;
use incidentd::lifecycle::CompletionJobs;
use incidentd::runtime::{ContainerState, FakeRuntime};
use incidentd::server::AppState;
use incidentd::summarizer::FakeSummarizer;
use std::sync::Arc;
use tempfile::TempDir;

pub const GOOD_IMAGE: &str = "cloud-incident-sim-user_service:good";
pub const BAD_IMAGE: &str = "cloud-incident-sim-user_service:bad";

pub struct Harness {
    pub dir: TempDir,
    pub config: Config,
    pub runtime: Arc<FakeRuntime>,
    pub summarizer: FakeSummarizer,
    pub state: Arc<AppState>,
    pub jobs: Option<CompletionJobs>,
}

pub fn test_config(dir: &TempDir) -> Config {
    let mut config = Config::default();
    config.storage.database_path = dir.path().join("incidents.db");
    config.storage.reports_dir = dir.path().join("reports");
    config.simulator.enabled = false;
    config.lifecycle.completion_delay_secs = 0;
    config
}

/// Fleet with every whitelisted service running and the victim on its good image
pub fn running_fleet() -> FakeRuntime {
    FakeRuntime::new()
        .with_container("user_service_victim", GOOD_IMAGE, ContainerState::Running)
        .with_container("health_checker", "health_checker:latest", ContainerState::Running)
        .with_container("postgres_db", "postgres:16", ContainerState::Running)
        .with_container(
            "backend_orchestrator",
            "incidentd:latest",
            ContainerState::Running,
        )
}

pub async fn harness_with(
    runtime: FakeRuntime,
    summarizer: FakeSummarizer,
    tweak: impl FnOnce(&mut Config),
) -> Harness {
    let dir = TempDir::new().unwrap();
    let mut config = test_config(&dir);
    tweak(&mut config);

    let runtime = Arc::new(runtime);
    let (state, jobs) = AppState::build(&config, runtime.clone(), Arc::new(summarizer.clone()))
        .await
        .unwrap();

    Harness {
        dir,
        config,
        runtime,
        summarizer,
        state: Arc::new(state),
        jobs: Some(jobs),
    }
}

pub async fn harness(runtime: FakeRuntime) -> Harness {
    harness_with(
        runtime,
        FakeSummarizer::new("user_service_victim failed at startup."),
        |_| {},
    )
    .await
}
