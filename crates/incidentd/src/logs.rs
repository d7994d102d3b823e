//! Log aggregation across the fixed service whitelist.
//!
//! A fetch failure for one service never aborts the others: an absent
//! container yields no lines, any other failure yields one synthetic
//! `[ERROR]` line tagged to that service.

use chrono::Utc;
use incident_shared::{LogLine, LogTimeline};
use std::sync::Arc;
use tracing::{debug, warn};

use crate::registry::FleetRegistry;
use crate::runtime::{ContainerRuntime, RuntimeError};

pub struct LogAggregator {
    registry: Arc<FleetRegistry>,
    runtime: Arc<dyn ContainerRuntime>,
    whitelist: Vec<String>,
}

impl LogAggregator {
    pub fn new(
        registry: Arc<FleetRegistry>,
        runtime: Arc<dyn ContainerRuntime>,
        whitelist: Vec<String>,
    ) -> Self {
        Self {
            registry,
            runtime,
            whitelist,
        }
    }

    /// Collect the whitelist's latest logs.
    pub async fn collect_latest(&self, max_lines: usize) -> LogTimeline {
        self.collect(&self.whitelist, max_lines).await
    }

    /// Fetch up to `max_lines` recent, timestamped lines per service, in the order given.
    pub async fn collect(&self, services: &[String], max_lines: usize) -> LogTimeline {
        let mut timeline = LogTimeline::new(Utc::now());
        for service in services {
            let lines = self.fetch(service, max_lines).await;
            timeline.push(service, lines);
        }
        debug!(
            "Collected {} log lines from {} services",
            timeline.line_count(),
            services.len()
        );
        timeline
    }

    async fn fetch(&self, service: &str, max_lines: usize) -> Vec<LogLine> {
        // registered services may run under a different container name
        let identity = self
            .registry
            .describe(service)
            .ok()
            .map(|d| d.runtime_identity.as_str())
            .unwrap_or(service);

        match self.runtime.logs(identity, max_lines, true).await {
            Ok(bytes) => String::from_utf8_lossy(&bytes)
                .lines()
                .filter(|line| !line.trim().is_empty())
                .map(|line| LogLine::parse(service, line))
                .collect(),
            Err(RuntimeError::NotFound(_)) => Vec::new(),
            Err(e) => {
                warn!("Log fetch for {} failed: {}", service, e);
                vec![LogLine::fetch_error(service, &e.to_string())]
            }
        }
    }

    /// Labeled lines, service by service, without re-sorting.
    pub fn flatten(timeline: &LogTimeline) -> Vec<String> {
        timeline.flatten()
    }
}
