//! Fault controller: stop/start a service, swap it to a known-bad image, or
//! remediate back to the known-good one.
//!
//! Each operation is idempotent with respect to its desired end state. The
//! controller keeps no state of its own beyond the registry lookup, so
//! concurrent callers only ever race at the runtime boundary.

use incident_shared::{IncidentError, Result};
use serde::Serialize;
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::{info, warn};

use crate::config::DeploymentConfig;
use crate::registry::{FleetRegistry, ServiceDescriptor};
use crate::runtime::{ContainerInfo, ContainerRuntime, ContainerSpec, RestartPolicy, RuntimeError};

/// What an operation did to reach its end state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum FaultOutcome {
    Applied,
    AlreadyInState,
}

/// Which image a replacement deploys
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeploymentKind {
    Good,
    Bad,
}

impl DeploymentKind {
    pub fn image<'a>(&self, deployment: &'a DeploymentConfig) -> &'a str {
        match self {
            DeploymentKind::Good => &deployment.good_image,
            DeploymentKind::Bad => &deployment.bad_image,
        }
    }
}

/// Container spec for redeploying `descriptor` from one of its images.
///
/// Passthrough variables missing from the daemon's environment are sent empty.
pub fn container_spec(
    descriptor: &ServiceDescriptor,
    deployment: &DeploymentConfig,
    kind: DeploymentKind,
) -> ContainerSpec {
    let env: BTreeMap<String, String> = deployment
        .env_passthrough
        .iter()
        .map(|key| (key.clone(), std::env::var(key).unwrap_or_default()))
        .collect();

    ContainerSpec {
        image: kind.image(deployment).to_string(),
        name: descriptor.runtime_identity.clone(),
        network: deployment.network.clone(),
        ports: deployment.ports.clone(),
        env,
        restart_policy: RestartPolicy::on_failure(deployment.max_retries),
        labels: deployment.labels.clone(),
    }
}

pub struct FaultController {
    registry: Arc<FleetRegistry>,
    runtime: Arc<dyn ContainerRuntime>,
}

impl FaultController {
    pub fn new(registry: Arc<FleetRegistry>, runtime: Arc<dyn ContainerRuntime>) -> Self {
        Self { registry, runtime }
    }

    pub fn registry(&self) -> &FleetRegistry {
        &self.registry
    }

    /// Stop a registered service. Already stopped is not an error.
    pub async fn stop(&self, service: &str) -> Result<FaultOutcome> {
        let container = self.registry.resolve(self.runtime.as_ref(), service).await?;
        self.stop_container(&container).await
    }

    /// Stop a container the caller already resolved (the simulator lists victims directly).
    pub async fn stop_container(&self, container: &ContainerInfo) -> Result<FaultOutcome> {
        if container.state.is_stopped() {
            info!("{} already stopped", container.name);
            return Ok(FaultOutcome::AlreadyInState);
        }

        match self.runtime.stop(&container.id).await {
            Ok(()) => {
                info!("Stopped {}", container.name);
                Ok(FaultOutcome::Applied)
            }
            // vanished in between: the desired end state holds
            Err(RuntimeError::NotFound(_)) => Ok(FaultOutcome::AlreadyInState),
            Err(e) => Err(e.into()),
        }
    }

    /// Start a registered service. Already running is not an error.
    pub async fn start(&self, service: &str) -> Result<FaultOutcome> {
        let container = self.registry.resolve(self.runtime.as_ref(), service).await?;
        if !container.state.is_stopped() {
            info!("{} already running", container.name);
            return Ok(FaultOutcome::AlreadyInState);
        }

        self.runtime.start(&container.id).await?;
        info!("Started {}", container.name);
        Ok(FaultOutcome::Applied)
    }

    /// Replace the service with its known-faulty image.
    pub async fn deploy_bad(&self, service: &str) -> Result<ContainerInfo> {
        self.replace(service, DeploymentKind::Bad).await
    }

    /// Replace the service with its known-good image. Safe with no bad deployment active.
    pub async fn remediate(&self, service: &str) -> Result<ContainerInfo> {
        self.replace(service, DeploymentKind::Good).await
    }

    async fn replace(&self, service: &str, kind: DeploymentKind) -> Result<ContainerInfo> {
        let descriptor = self.registry.describe(service)?;
        let deployment = descriptor.deployment.as_ref().ok_or_else(|| {
            IncidentError::Misconfiguration(format!(
                "service '{}' has no deployment profile",
                service
            ))
        })?;

        self.clear(&descriptor.runtime_identity).await?;

        let spec = container_spec(descriptor, deployment, kind);
        let info = self.runtime.run(&spec).await?;
        match kind {
            DeploymentKind::Bad => warn!("Deployed faulty image {} as {}", spec.image, spec.name),
            DeploymentKind::Good => info!("Remediated {} with {}", spec.name, spec.image),
        }
        Ok(info)
    }

    /// Stop-if-running then remove. An absent container counts as cleared.
    async fn clear(&self, identity: &str) -> Result<()> {
        let container = match self.runtime.get(identity).await {
            Ok(container) => container,
            Err(RuntimeError::NotFound(_)) => return Ok(()),
            Err(e) => return Err(e.into()),
        };

        if !container.state.is_stopped() {
            match self.runtime.stop(&container.id).await {
                Ok(()) | Err(RuntimeError::NotFound(_)) => {}
                Err(e) => return Err(e.into()),
            }
        }

        match self.runtime.remove(&container.id).await {
            Ok(()) | Err(RuntimeError::NotFound(_)) => Ok(()),
            Err(e) => Err(e.into()),
        }
    }
}
