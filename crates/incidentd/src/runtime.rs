//! Container runtime abstraction.
//!
//! Production code uses `DockerCli` (see `docker.rs`). Tests use `FakeRuntime`,
//! an in-memory runtime with a call log and an availability switch.
//!
//! Every call returns a `RuntimeError` that separates "target absent" from
//! "runtime unreachable"; callers decide which one they can absorb.

use async_trait::async_trait;
use incident_shared::IncidentError;
use serde::Serialize;
use std::collections::{BTreeMap, HashMap};
use std::sync::{Mutex, MutexGuard};
use std::time::Duration;
use tracing::{info, warn};

/// Failure of a single runtime call
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum RuntimeError {
    #[error("{0} not found")]
    NotFound(String),

    #[error("container runtime unavailable: {0}")]
    Unavailable(String),

    #[error("container runtime rejected request: {0}")]
    Rejected(String),
}

pub type RuntimeResult<T> = Result<T, RuntimeError>;

impl From<RuntimeError> for IncidentError {
    fn from(err: RuntimeError) -> Self {
        match err {
            RuntimeError::NotFound(what) => IncidentError::NotFound(what),
            RuntimeError::Unavailable(detail) => IncidentError::RuntimeUnavailable(detail),
            RuntimeError::Rejected(detail) => IncidentError::Runtime(detail),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ContainerState {
    Created,
    Running,
    Restarting,
    Paused,
    Exited,
    Dead,
    Unknown,
}

impl ContainerState {
    pub fn parse(s: &str) -> Self {
        match s.trim().to_ascii_lowercase().as_str() {
            "created" => ContainerState::Created,
            "running" => ContainerState::Running,
            "restarting" => ContainerState::Restarting,
            "paused" => ContainerState::Paused,
            "exited" => ContainerState::Exited,
            "dead" => ContainerState::Dead,
            _ => ContainerState::Unknown,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            ContainerState::Created => "created",
            ContainerState::Running => "running",
            ContainerState::Restarting => "restarting",
            ContainerState::Paused => "paused",
            ContainerState::Exited => "exited",
            ContainerState::Dead => "dead",
            ContainerState::Unknown => "unknown",
        }
    }

    /// Nothing left to stop
    pub fn is_stopped(&self) -> bool {
        matches!(
            self,
            ContainerState::Created | ContainerState::Exited | ContainerState::Dead
        )
    }
}

/// What the runtime reports about one container
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ContainerInfo {
    pub id: String,
    pub name: String,
    pub image: String,
    pub state: ContainerState,
}

/// "on-failure" restart policy with a bounded retry count
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RestartPolicy {
    pub max_retries: u32,
}

impl RestartPolicy {
    pub fn on_failure(max_retries: u32) -> Self {
        Self { max_retries }
    }

    /// Docker CLI form, e.g. `on-failure:5`
    pub fn to_cli(&self) -> String {
        format!("on-failure:{}", self.max_retries)
    }
}

/// Everything needed to create and start a container
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ContainerSpec {
    pub image: String,
    pub name: String,
    pub network: String,
    /// `host:container` mappings
    pub ports: Vec<String>,
    pub env: BTreeMap<String, String>,
    pub restart_policy: RestartPolicy,
    pub labels: BTreeMap<String, String>,
}

#[derive(Debug, Clone, Default)]
pub struct ContainerFilter {
    pub name_contains: Option<String>,
    pub running_only: bool,
}

impl ContainerFilter {
    pub fn running_named(fragment: &str) -> Self {
        Self {
            name_contains: Some(fragment.to_string()),
            running_only: true,
        }
    }

    pub fn matches(&self, info: &ContainerInfo) -> bool {
        let name_ok = self
            .name_contains
            .as_deref()
            .map_or(true, |fragment| info.name.contains(fragment));
        let state_ok = !self.running_only || info.state == ContainerState::Running;
        name_ok && state_ok
    }
}

/// Primitive operations the orchestration core needs from a container runtime
#[async_trait]
pub trait ContainerRuntime: Send + Sync {
    /// Cheap reachability check
    async fn ping(&self) -> RuntimeResult<()>;

    async fn list(&self, filter: &ContainerFilter) -> RuntimeResult<Vec<ContainerInfo>>;

    async fn get(&self, name: &str) -> RuntimeResult<ContainerInfo>;

    async fn stop(&self, id: &str) -> RuntimeResult<()>;

    async fn start(&self, id: &str) -> RuntimeResult<()>;

    async fn remove(&self, id: &str) -> RuntimeResult<()>;

    /// Create and start a detached container
    async fn run(&self, spec: &ContainerSpec) -> RuntimeResult<ContainerInfo>;

    /// Last `tail` lines of combined output
    async fn logs(&self, id: &str, tail: usize, timestamps: bool) -> RuntimeResult<Vec<u8>>;
}

/// Probe the runtime a bounded number of times with a fixed backoff.
pub async fn probe_with_retry(
    runtime: &dyn ContainerRuntime,
    attempts: u32,
    backoff: Duration,
) -> RuntimeResult<()> {
    let attempts = attempts.max(1);
    let mut last_err = RuntimeError::Unavailable("not probed".to_string());

    for attempt in 1..=attempts {
        match runtime.ping().await {
            Ok(()) => {
                info!("Container runtime reachable (attempt {}/{})", attempt, attempts);
                return Ok(());
            }
            Err(e) => {
                warn!("Container runtime not ready on attempt {}/{}: {}", attempt, attempts, e);
                last_err = e;
            }
        }
        if attempt < attempts {
            tokio::time::sleep(backoff).await;
        }
    }

    Err(last_err)
}

// ============================================================================
// Fake Runtime (Testing)
// ============================================================================

/// A call observed by `FakeRuntime`
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RuntimeCall {
    Ping,
    List,
    Get(String),
    Stop(String),
    Start(String),
    Remove(String),
    Run { name: String, image: String },
    Logs(String),
}

#[derive(Debug, Clone)]
struct FakeContainer {
    info: ContainerInfo,
    spec: Option<ContainerSpec>,
}

#[derive(Debug, Default)]
struct FakeState {
    containers: BTreeMap<String, FakeContainer>,
    /// Output per container name; survives replacement so a service keeps one history
    logs: HashMap<String, Vec<String>>,
    log_failures: HashMap<String, String>,
    /// Lines a container emits when started from a given image
    image_logs: HashMap<String, Vec<String>>,
    calls: Vec<RuntimeCall>,
    unavailable: bool,
    next_id: u64,
}

/// In-memory container runtime for deterministic tests.
///
/// ```rust,ignore
/// let runtime = FakeRuntime::new()
///     .with_container("user_service_victim", "svc:good", ContainerState::Running);
/// runtime.stop("user_service_victim").await?;
/// assert_eq!(runtime.count(|c| matches!(c, RuntimeCall::Stop(_))), 1);
/// ```
#[derive(Debug, Default)]
pub struct FakeRuntime {
    state: Mutex<FakeState>,
}

impl FakeRuntime {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_container(self, name: &str, image: &str, state: ContainerState) -> Self {
        self.add_container(name, image, state);
        self
    }

    pub fn with_logs(self, name: &str, lines: &[&str]) -> Self {
        self.push_logs(name, lines);
        self
    }

    pub fn add_container(&self, name: &str, image: &str, state: ContainerState) {
        let mut inner = self.state();
        let id = inner.allocate_id();
        inner.containers.insert(
            name.to_string(),
            FakeContainer {
                info: ContainerInfo {
                    id,
                    name: name.to_string(),
                    image: image.to_string(),
                    state,
                },
                spec: None,
            },
        );
    }

    pub fn push_logs(&self, name: &str, lines: &[&str]) {
        self.state()
            .logs
            .entry(name.to_string())
            .or_default()
            .extend(lines.iter().map(|l| l.to_string()));
    }

    /// Make `logs` for this container fail with `detail`
    pub fn fail_logs(&self, name: &str, detail: &str) {
        self.state()
            .log_failures
            .insert(name.to_string(), detail.to_string());
    }

    /// Lines appended to a container's output whenever it is started from `image`
    pub fn script_image_logs(&self, image: &str, lines: &[&str]) {
        self.state()
            .image_logs
            .insert(image.to_string(), lines.iter().map(|l| l.to_string()).collect());
    }

    pub fn set_available(&self, available: bool) {
        self.state().unavailable = !available;
    }

    pub fn calls(&self) -> Vec<RuntimeCall> {
        self.state().calls.clone()
    }

    pub fn count(&self, predicate: impl Fn(&RuntimeCall) -> bool) -> usize {
        self.state().calls.iter().filter(|c| predicate(c)).count()
    }

    pub fn reset_calls(&self) {
        self.state().calls.clear();
    }

    pub fn container(&self, name: &str) -> Option<ContainerInfo> {
        self.state().containers.get(name).map(|c| c.info.clone())
    }

    /// Spec the container was last created with via `run`
    pub fn spec(&self, name: &str) -> Option<ContainerSpec> {
        self.state().containers.get(name).and_then(|c| c.spec.clone())
    }

    fn state(&self) -> MutexGuard<'_, FakeState> {
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Record the call and fail if the runtime is switched off.
    fn enter(&self, call: RuntimeCall) -> RuntimeResult<MutexGuard<'_, FakeState>> {
        let mut inner = self.state();
        inner.calls.push(call);
        if inner.unavailable {
            return Err(RuntimeError::Unavailable(
                "Cannot connect to the Docker daemon".to_string(),
            ));
        }
        Ok(inner)
    }
}

impl FakeState {
    fn allocate_id(&mut self) -> String {
        self.next_id += 1;
        format!("fake{:08x}", self.next_id)
    }

    fn find_mut(&mut self, key: &str) -> RuntimeResult<&mut FakeContainer> {
        self.containers
            .values_mut()
            .find(|c| c.info.name == key || c.info.id == key)
            .ok_or_else(|| RuntimeError::NotFound(format!("Container '{}'", key)))
    }
}

#[async_trait]
impl ContainerRuntime for FakeRuntime {
    async fn ping(&self) -> RuntimeResult<()> {
        self.enter(RuntimeCall::Ping).map(|_| ())
    }

    async fn list(&self, filter: &ContainerFilter) -> RuntimeResult<Vec<ContainerInfo>> {
        let inner = self.enter(RuntimeCall::List)?;
        Ok(inner
            .containers
            .values()
            .map(|c| c.info.clone())
            .filter(|info| filter.matches(info))
            .collect())
    }

    async fn get(&self, name: &str) -> RuntimeResult<ContainerInfo> {
        let mut inner = self.enter(RuntimeCall::Get(name.to_string()))?;
        inner.find_mut(name).map(|c| c.info.clone())
    }

    async fn stop(&self, id: &str) -> RuntimeResult<()> {
        let mut inner = self.enter(RuntimeCall::Stop(id.to_string()))?;
        inner.find_mut(id)?.info.state = ContainerState::Exited;
        Ok(())
    }

    async fn start(&self, id: &str) -> RuntimeResult<()> {
        let mut inner = self.enter(RuntimeCall::Start(id.to_string()))?;
        inner.find_mut(id)?.info.state = ContainerState::Running;
        Ok(())
    }

    async fn remove(&self, id: &str) -> RuntimeResult<()> {
        let mut inner = self.enter(RuntimeCall::Remove(id.to_string()))?;
        let container = inner.find_mut(id)?;
        if !container.info.state.is_stopped() {
            return Err(RuntimeError::Rejected(format!(
                "cannot remove running container '{}'",
                container.info.name
            )));
        }
        let name = container.info.name.clone();
        inner.containers.remove(&name);
        Ok(())
    }

    async fn run(&self, spec: &ContainerSpec) -> RuntimeResult<ContainerInfo> {
        let mut inner = self.enter(RuntimeCall::Run {
            name: spec.name.clone(),
            image: spec.image.clone(),
        })?;
        if inner.containers.contains_key(&spec.name) {
            return Err(RuntimeError::Rejected(format!(
                "Conflict. The container name \"/{}\" is already in use",
                spec.name
            )));
        }

        let info = ContainerInfo {
            id: inner.allocate_id(),
            name: spec.name.clone(),
            image: spec.image.clone(),
            state: ContainerState::Running,
        };
        let emitted = inner.image_logs.get(&spec.image).cloned().unwrap_or_default();
        inner
            .logs
            .entry(spec.name.clone())
            .or_default()
            .extend(emitted);
        inner.containers.insert(
            spec.name.clone(),
            FakeContainer {
                info: info.clone(),
                spec: Some(spec.clone()),
            },
        );
        Ok(info)
    }

    async fn logs(&self, id: &str, tail: usize, _timestamps: bool) -> RuntimeResult<Vec<u8>> {
        let mut inner = self.enter(RuntimeCall::Logs(id.to_string()))?;
        let name = inner.find_mut(id)?.info.name.clone();
        if let Some(detail) = inner.log_failures.get(&name) {
            return Err(RuntimeError::Rejected(detail.clone()));
        }

        let lines = inner.logs.get(&name).cloned().unwrap_or_default();
        let start = lines.len().saturating_sub(tail);
        let mut out = lines[start..].join("\n");
        if !out.is_empty() {
            out.push('\n');
        }
        Ok(out.into_bytes())
    }
}
