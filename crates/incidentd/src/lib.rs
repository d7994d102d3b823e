//! incidentd library
//!
//! Incident orchestration core: fault injection and remediation against a
//! container fleet, a background chaos loop, log aggregation, and incident
//! runs with persisted reports. The binary in `main.rs` wires these behind
//! an HTTP API.

pub mod config;
pub mod docker;
pub mod faults;
pub mod lifecycle;
pub mod logs;
pub mod registry;
pub mod reports;
pub mod routes;
pub mod runtime;
pub mod server;
pub mod shutdown;
pub mod simulator;
pub mod store;
pub mod summarizer;

pub use config::Config;
pub use faults::{FaultController, FaultOutcome};
pub use lifecycle::{CompletionWorker, LifecycleManager};
pub use logs::LogAggregator;
pub use registry::{FleetRegistry, ServiceDescriptor};
pub use runtime::{ContainerRuntime, FakeRuntime, RuntimeError};
pub use server::AppState;
pub use shutdown::{ShutdownListener, ShutdownSignal};
pub use simulator::Simulator;
pub use store::RunStore;
pub use summarizer::{FakeSummarizer, OpenAiSummarizer, Summarizer};
