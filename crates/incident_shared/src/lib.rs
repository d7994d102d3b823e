//! Types shared between the incident daemon and its clients.

pub mod error;
pub mod logs;
pub mod report;
pub mod run;
pub mod status;

pub use error::{IncidentError, Result};
pub use logs::{LatestLogs, LogLine, LogTimeline, ServiceLogs};
pub use report::IncidentReport;
pub use run::{IncidentRun, RunLogs, RunStatus};
pub use status::{Message, ServiceStatus, Summary, INSUFFICIENT_DATA_SUMMARY, STATUS_OFFLINE};

pub const VERSION: &str = env!("CARGO_PKG_VERSION");
