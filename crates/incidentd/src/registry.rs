//! Fleet registry: logical service names mapped to runtime containers.
//!
//! Membership comes from configuration only; nothing is discovered at run time.

use incident_shared::{IncidentError, Result, ServiceStatus, STATUS_OFFLINE};
use std::collections::HashSet;

use crate::config::{DeploymentConfig, ServiceConfig};
use crate::runtime::{ContainerInfo, ContainerRuntime, RuntimeError};

#[derive(Debug, Clone, PartialEq)]
pub struct ServiceDescriptor {
    pub logical_name: String,
    pub display_name: String,
    pub runtime_identity: String,
    /// Reported by the services status listing
    pub tracked: bool,
    /// Present when the service can be swapped between good and bad images
    pub deployment: Option<DeploymentConfig>,
}

impl ServiceDescriptor {
    pub fn new(logical_name: &str) -> Self {
        Self {
            logical_name: logical_name.to_string(),
            display_name: logical_name.to_string(),
            runtime_identity: logical_name.to_string(),
            tracked: false,
            deployment: None,
        }
    }
}

impl From<&ServiceConfig> for ServiceDescriptor {
    fn from(config: &ServiceConfig) -> Self {
        Self {
            logical_name: config.id.clone(),
            display_name: config.name.clone().unwrap_or_else(|| config.id.clone()),
            runtime_identity: config.container.clone().unwrap_or_else(|| config.id.clone()),
            tracked: config.tracked,
            deployment: config.deployment.clone(),
        }
    }
}

#[derive(Debug, Clone)]
pub struct FleetRegistry {
    services: Vec<ServiceDescriptor>,
}

impl FleetRegistry {
    pub fn new(services: Vec<ServiceDescriptor>) -> Result<Self> {
        let mut seen = HashSet::new();
        for service in &services {
            if !seen.insert(service.logical_name.as_str()) {
                return Err(IncidentError::Misconfiguration(format!(
                    "service '{}' registered twice",
                    service.logical_name
                )));
            }
        }
        Ok(Self { services })
    }

    pub fn from_config(fleet: &[ServiceConfig]) -> Result<Self> {
        Self::new(fleet.iter().map(ServiceDescriptor::from).collect())
    }

    pub fn services(&self) -> &[ServiceDescriptor] {
        &self.services
    }

    pub fn describe(&self, logical_name: &str) -> Result<&ServiceDescriptor> {
        self.services
            .iter()
            .find(|s| s.logical_name == logical_name)
            .ok_or_else(|| IncidentError::not_found(format!("Service '{}'", logical_name)))
    }

    /// First service with a deployment profile; the default bad-deployment target.
    pub fn deployable(&self) -> Option<&ServiceDescriptor> {
        self.services.iter().find(|s| s.deployment.is_some())
    }

    /// Resolve a logical name to its live container.
    ///
    /// `NotFound` when the name is unregistered or the runtime has no such container.
    pub async fn resolve(
        &self,
        runtime: &dyn ContainerRuntime,
        logical_name: &str,
    ) -> Result<ContainerInfo> {
        let descriptor = self.describe(logical_name)?;
        runtime
            .get(&descriptor.runtime_identity)
            .await
            .map_err(IncidentError::from)
    }

    /// Status of every tracked service; absent containers read as `OFFLINE`.
    pub async fn statuses(&self, runtime: &dyn ContainerRuntime) -> Result<Vec<ServiceStatus>> {
        let mut out = Vec::new();
        for service in self.services.iter().filter(|s| s.tracked) {
            let status = match runtime.get(&service.runtime_identity).await {
                Ok(info) => info.state.as_str().to_ascii_uppercase(),
                Err(RuntimeError::NotFound(_)) => STATUS_OFFLINE.to_string(),
                Err(e) => return Err(e.into()),
            };
            out.push(ServiceStatus {
                id: service.logical_name.clone(),
                name: service.display_name.clone(),
                status,
            });
        }
        Ok(out)
    }
}
