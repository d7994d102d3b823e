//! Response types for the exposed surface.

use serde::{Deserialize, Serialize};

/// Live status of one tracked fleet service.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServiceStatus {
    pub id: String,
    pub name: String,
    /// Upper-cased runtime state, or `OFFLINE` when the container is absent
    pub status: String,
}

pub const STATUS_OFFLINE: &str = "OFFLINE";

/// Result of a root-cause summarization request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Summary {
    pub summary: String,
    pub lines_considered: usize,
    pub insufficient_data: bool,
}

pub const INSUFFICIENT_DATA_SUMMARY: &str =
    "Not enough log data to analyze. Please wait for an incident.";

impl Summary {
    pub fn insufficient(lines_considered: usize) -> Self {
        Self {
            summary: INSUFFICIENT_DATA_SUMMARY.to_string(),
            lines_considered,
            insufficient_data: true,
        }
    }

    pub fn generated(summary: String, lines_considered: usize) -> Self {
        Self {
            summary,
            lines_considered,
            insufficient_data: false,
        }
    }
}

/// Plain acknowledgement for fault operations.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Message {
    pub message: String,
}

impl Message {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }
}
