//! Incident run records and their lifecycle states.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

use crate::error::IncidentError;
use crate::logs::LogTimeline;

/// Lifecycle state of an incident run.
///
/// `Pending -> Triggered -> Succeeded`, with `Triggered -> Failed` on error paths.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum RunStatus {
    Pending,
    Triggered,
    Succeeded,
    Failed,
}

impl RunStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            RunStatus::Pending => "Pending",
            RunStatus::Triggered => "Triggered",
            RunStatus::Succeeded => "Succeeded",
            RunStatus::Failed => "Failed",
        }
    }
}

impl fmt::Display for RunStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for RunStatus {
    type Err = IncidentError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "Pending" => Ok(RunStatus::Pending),
            "Triggered" => Ok(RunStatus::Triggered),
            "Succeeded" => Ok(RunStatus::Succeeded),
            "Failed" => Ok(RunStatus::Failed),
            other => Err(IncidentError::Storage(format!("unknown run status '{}'", other))),
        }
    }
}

/// Structured snapshot kept on a run.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RunLogs {
    /// Cosmetic label picked at trigger time
    pub impacted_service: String,
    /// Aggregated timeline captured at completion
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timeline: Option<LogTimeline>,
    /// Why the run ended in Failed
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub failure_reason: Option<String>,
}

impl RunLogs {
    pub fn impacted(service: impl Into<String>) -> Self {
        Self {
            impacted_service: service.into(),
            timeline: None,
            failure_reason: None,
        }
    }
}

/// One record of a simulated-incident lifecycle from trigger to report.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IncidentRun {
    pub id: Uuid,
    pub scenario_name: String,
    pub status: RunStatus,
    pub started_at: DateTime<Utc>,
    pub ended_at: Option<DateTime<Utc>>,
    pub logs: RunLogs,
    pub report_path: Option<String>,
}

impl IncidentRun {
    /// New run in `Triggered`, stamped now.
    pub fn triggered(scenario_name: impl Into<String>, impacted_service: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4(),
            scenario_name: scenario_name.into(),
            status: RunStatus::Triggered,
            started_at: Utc::now(),
            ended_at: None,
            logs: RunLogs::impacted(impacted_service),
            report_path: None,
        }
    }

    pub fn has_report(&self) -> bool {
        self.report_path.is_some()
    }
}
