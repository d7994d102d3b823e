//! Report artifact written when a run completes.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::run::{IncidentRun, RunLogs, RunStatus};

/// Flat record persisted as one file per run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IncidentReport {
    pub id: Uuid,
    pub scenario: String,
    pub started_at: DateTime<Utc>,
    pub ended_at: Option<DateTime<Utc>>,
    pub status: RunStatus,
    pub logs: RunLogs,
}

impl From<&IncidentRun> for IncidentReport {
    fn from(run: &IncidentRun) -> Self {
        Self {
            id: run.id,
            scenario: run.scenario_name.clone(),
            started_at: run.started_at,
            ended_at: run.ended_at,
            status: run.status,
            logs: run.logs.clone(),
        }
    }
}
