//! Configuration management for incidentd.
//!
//! Loads settings from /etc/incidentd/config.toml (or `--config`) or uses defaults.
//! `AUTO_SIMULATE` overrides `simulator.enabled`.

use anyhow::{bail, Result};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashSet};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::{info, warn};

/// Config file path
pub const CONFIG_PATH: &str = "/etc/incidentd/config.toml";

/// Environment switch for the background simulator
pub const AUTO_SIMULATE_ENV: &str = "AUTO_SIMULATE";

/// HTTP server configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    #[serde(default = "default_bind")]
    pub bind: String,

    /// Origins allowed to call the API from a browser
    #[serde(default = "default_cors_origins")]
    pub cors_origins: Vec<String>,
}

fn default_bind() -> String {
    "0.0.0.0:8000".to_string()
}

fn default_cors_origins() -> Vec<String> {
    vec![
        "http://localhost".to_string(),
        "http://localhost:4200".to_string(),
    ]
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind: default_bind(),
            cors_origins: default_cors_origins(),
        }
    }
}

/// Where runs and report artifacts are persisted
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StorageConfig {
    #[serde(default = "default_database_path")]
    pub database_path: PathBuf,

    #[serde(default = "default_reports_dir")]
    pub reports_dir: PathBuf,
}

fn default_database_path() -> PathBuf {
    PathBuf::from("/var/lib/incidentd/incidents.db")
}

fn default_reports_dir() -> PathBuf {
    PathBuf::from("/var/lib/incidentd/reports")
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            database_path: default_database_path(),
            reports_dir: default_reports_dir(),
        }
    }
}

/// Container runtime access
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RuntimeConfig {
    /// Docker CLI binary
    #[serde(default = "default_docker_bin")]
    pub docker_bin: String,

    /// Upper bound for any single runtime call
    #[serde(default = "default_call_timeout")]
    pub call_timeout_secs: u64,

    /// Startup connectivity probe attempts
    #[serde(default = "default_probe_attempts")]
    pub probe_attempts: u32,

    /// Fixed pause between probe attempts
    #[serde(default = "default_probe_backoff")]
    pub probe_backoff_ms: u64,
}

fn default_docker_bin() -> String {
    "docker".to_string()
}

fn default_call_timeout() -> u64 {
    15
}

fn default_probe_attempts() -> u32 {
    5
}

fn default_probe_backoff() -> u64 {
    1_000
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            docker_bin: default_docker_bin(),
            call_timeout_secs: default_call_timeout(),
            probe_attempts: default_probe_attempts(),
            probe_backoff_ms: default_probe_backoff(),
        }
    }
}

impl RuntimeConfig {
    pub fn call_timeout(&self) -> Duration {
        Duration::from_secs(self.call_timeout_secs)
    }

    pub fn probe_backoff(&self) -> Duration {
        Duration::from_millis(self.probe_backoff_ms)
    }
}

/// Background fault-injection loop
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SimulatorConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,

    #[serde(default = "default_min_delay")]
    pub min_delay_secs: u64,

    #[serde(default = "default_max_delay")]
    pub max_delay_secs: u64,

    /// Substring marking a container as a victim
    #[serde(default = "default_victim_tag")]
    pub victim_tag: String,

    /// Fixed seed for reproducible victim selection
    #[serde(default)]
    pub seed: Option<u64>,
}

fn default_true() -> bool {
    true
}

fn default_min_delay() -> u64 {
    30
}

fn default_max_delay() -> u64 {
    60
}

fn default_victim_tag() -> String {
    "victim".to_string()
}

impl Default for SimulatorConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            min_delay_secs: default_min_delay(),
            max_delay_secs: default_max_delay(),
            victim_tag: default_victim_tag(),
            seed: None,
        }
    }
}

/// Incident run lifecycle
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LifecycleConfig {
    /// Complete runs in the background after `completion_delay_secs`
    #[serde(default)]
    pub auto_complete: bool,

    #[serde(default = "default_completion_delay")]
    pub completion_delay_secs: u64,

    /// Lines per service captured into the report
    #[serde(default = "default_report_log_lines")]
    pub report_log_lines: usize,

    /// Labels a new run may be tagged with as its impacted service
    #[serde(default = "default_impacted_services")]
    pub impacted_services: Vec<String>,
}

fn default_completion_delay() -> u64 {
    30
}

fn default_report_log_lines() -> usize {
    200
}

fn default_impacted_services() -> Vec<String> {
    vec![
        "user_service_victim".to_string(),
        "health_checker".to_string(),
        "postgres_db".to_string(),
    ]
}

impl Default for LifecycleConfig {
    fn default() -> Self {
        Self {
            auto_complete: false,
            completion_delay_secs: default_completion_delay(),
            report_log_lines: default_report_log_lines(),
            impacted_services: default_impacted_services(),
        }
    }
}

impl LifecycleConfig {
    pub fn completion_delay(&self) -> Duration {
        Duration::from_secs(self.completion_delay_secs)
    }
}

/// Log aggregation
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LogsConfig {
    /// Services whose logs make up the incident timeline, in output order
    #[serde(default = "default_log_services")]
    pub services: Vec<String>,

    #[serde(default = "default_log_lines")]
    pub default_lines: usize,
}

fn default_log_services() -> Vec<String> {
    vec![
        "user_service_victim".to_string(),
        "health_checker".to_string(),
        "postgres_db".to_string(),
        "backend_orchestrator".to_string(),
    ]
}

fn default_log_lines() -> usize {
    500
}

impl Default for LogsConfig {
    fn default() -> Self {
        Self {
            services: default_log_services(),
            default_lines: default_log_lines(),
        }
    }
}

/// Root-cause summarization backend (OpenAI-compatible)
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SummarizerConfig {
    #[serde(default = "default_endpoint")]
    pub endpoint: String,

    #[serde(default = "default_model")]
    pub model: String,

    /// Environment variable holding the API key
    #[serde(default = "default_api_key_env")]
    pub api_key_env: String,

    #[serde(default = "default_summarizer_timeout")]
    pub timeout_secs: u64,

    /// Fewer non-empty lines than this and the summarizer is not called
    #[serde(default = "default_min_lines")]
    pub min_lines: usize,
}

fn default_endpoint() -> String {
    "https://api.openai.com/v1".to_string()
}

fn default_model() -> String {
    "gpt-3.5-turbo".to_string()
}

fn default_api_key_env() -> String {
    "OPENAI_API_KEY".to_string()
}

fn default_summarizer_timeout() -> u64 {
    30
}

fn default_min_lines() -> usize {
    5
}

impl Default for SummarizerConfig {
    fn default() -> Self {
        Self {
            endpoint: default_endpoint(),
            model: default_model(),
            api_key_env: default_api_key_env(),
            timeout_secs: default_summarizer_timeout(),
            min_lines: default_min_lines(),
        }
    }
}

/// How a service is redeployed by fault injection and remediation
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeploymentConfig {
    pub good_image: String,
    pub bad_image: String,

    #[serde(default = "default_network")]
    pub network: String,

    /// `host:container` port mappings
    #[serde(default)]
    pub ports: Vec<String>,

    /// Restart policy "on-failure" retry count
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,

    #[serde(default)]
    pub labels: BTreeMap<String, String>,

    /// Variables copied from the daemon's environment into the container
    #[serde(default)]
    pub env_passthrough: Vec<String>,
}

fn default_network() -> String {
    "incident-sim-net".to_string()
}

fn default_max_retries() -> u32 {
    5
}

/// One fleet member
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ServiceConfig {
    /// Logical name
    pub id: String,

    /// Display name
    #[serde(default)]
    pub name: Option<String>,

    /// Runtime container name, defaults to `id`
    #[serde(default)]
    pub container: Option<String>,

    /// Listed by the services status endpoint
    #[serde(default)]
    pub tracked: bool,

    #[serde(default)]
    pub deployment: Option<DeploymentConfig>,
}

fn default_fleet() -> Vec<ServiceConfig> {
    let labels = BTreeMap::from([
        (
            "com.docker.compose.project".to_string(),
            "cloud-incident-sim".to_string(),
        ),
        (
            "com.docker.compose.service".to_string(),
            "user_service".to_string(),
        ),
        ("com.docker.compose.oneoff".to_string(), "False".to_string()),
    ]);

    let plain = |id: &str| ServiceConfig {
        id: id.to_string(),
        name: None,
        container: None,
        tracked: false,
        deployment: None,
    };

    vec![
        ServiceConfig {
            id: "user_service_victim".to_string(),
            name: Some("User Service".to_string()),
            container: None,
            tracked: true,
            deployment: Some(DeploymentConfig {
                good_image: "cloud-incident-sim-user_service:good".to_string(),
                bad_image: "cloud-incident-sim-user_service:bad".to_string(),
                network: default_network(),
                ports: vec!["5001:5001".to_string()],
                max_retries: default_max_retries(),
                labels,
                env_passthrough: vec!["POSTGRES_PASSWORD".to_string()],
            }),
        },
        plain("health_checker"),
        plain("postgres_db"),
        plain("backend_orchestrator"),
    ]
}

/// Main configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub server: ServerConfig,

    #[serde(default)]
    pub storage: StorageConfig,

    #[serde(default)]
    pub runtime: RuntimeConfig,

    #[serde(default)]
    pub simulator: SimulatorConfig,

    #[serde(default)]
    pub lifecycle: LifecycleConfig,

    #[serde(default)]
    pub logs: LogsConfig,

    #[serde(default)]
    pub summarizer: SummarizerConfig,

    #[serde(default = "default_fleet")]
    pub fleet: Vec<ServiceConfig>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            server: ServerConfig::default(),
            storage: StorageConfig::default(),
            runtime: RuntimeConfig::default(),
            simulator: SimulatorConfig::default(),
            lifecycle: LifecycleConfig::default(),
            logs: LogsConfig::default(),
            summarizer: SummarizerConfig::default(),
            fleet: default_fleet(),
        }
    }
}

impl Config {
    /// Load config from `path` (or the system path), falling back to defaults.
    pub fn load(path: Option<&Path>) -> Self {
        let path = path.unwrap_or_else(|| Path::new(CONFIG_PATH));
        let mut config = Self::load_from_path(path).unwrap_or_else(|e| {
            warn!("Config not loaded from {}, using defaults: {}", path.display(), e);
            Config::default()
        });
        config.apply_env_overrides();
        config
    }

    /// Load config from specific path
    pub fn load_from_path(path: &Path) -> Result<Self> {
        let content = fs::read_to_string(path)?;
        let config: Config = toml::from_str(&content)?;
        config.validate()?;
        info!("Loaded config from {}", path.display());
        Ok(config)
    }

    pub fn apply_env_overrides(&mut self) {
        if let Ok(value) = std::env::var(AUTO_SIMULATE_ENV) {
            self.simulator.enabled = value.trim().eq_ignore_ascii_case("true");
        }
    }

    pub fn validate(&self) -> Result<()> {
        if self.simulator.min_delay_secs > self.simulator.max_delay_secs {
            bail!(
                "simulator.min_delay_secs ({}) exceeds max_delay_secs ({})",
                self.simulator.min_delay_secs,
                self.simulator.max_delay_secs
            );
        }
        if self.logs.services.is_empty() {
            bail!("logs.services must name at least one service");
        }
        if self.lifecycle.impacted_services.is_empty() {
            bail!("lifecycle.impacted_services must not be empty");
        }

        let mut seen = HashSet::new();
        for service in &self.fleet {
            if !seen.insert(service.id.as_str()) {
                bail!("duplicate fleet service id '{}'", service.id);
            }
        }
        Ok(())
    }
}
