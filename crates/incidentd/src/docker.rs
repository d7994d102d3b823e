//! Docker CLI backed container runtime.
//!
//! Every call shells out to `docker` under a timeout so a wedged daemon fails
//! fast instead of hanging a request or the simulator.

use async_trait::async_trait;
use std::process::Output;
use std::time::Duration;
use tokio::process::Command;
use tracing::debug;

use crate::runtime::{
    ContainerFilter, ContainerInfo, ContainerRuntime, ContainerSpec, ContainerState, RuntimeError,
    RuntimeResult,
};

/// `docker inspect`/`docker ps` row format: id, name, image, state
const INSPECT_FORMAT: &str = "{{.Id}}\t{{.Name}}\t{{.Config.Image}}\t{{.State.Status}}";
const PS_FORMAT: &str = "{{.ID}}\t{{.Names}}\t{{.Image}}\t{{.State}}";

/// Stderr fragments meaning the target does not exist
const ABSENT_MARKERS: &[&str] = &["No such container", "No such object"];

/// Stderr fragments meaning the daemon itself is unreachable
const UNREACHABLE_MARKERS: &[&str] = &[
    "Cannot connect to the Docker daemon",
    "error during connect",
    "Is the docker daemon running",
];

pub struct DockerCli {
    binary: String,
    timeout: Duration,
}

impl DockerCli {
    pub fn new(binary: impl Into<String>, timeout: Duration) -> Self {
        Self {
            binary: binary.into(),
            timeout,
        }
    }

    /// Run `docker <args>` and return its output on success.
    async fn exec(&self, args: &[String], target: &str) -> RuntimeResult<Output> {
        debug!("Executing: {} {}", self.binary, args.join(" "));

        let mut cmd = Command::new(&self.binary);
        cmd.args(args).kill_on_drop(true);

        let output = match tokio::time::timeout(self.timeout, cmd.output()).await {
            Ok(Ok(output)) => output,
            Ok(Err(e)) => {
                return Err(RuntimeError::Unavailable(format!(
                    "failed to run {}: {}",
                    self.binary, e
                )))
            }
            Err(_) => {
                return Err(RuntimeError::Unavailable(format!(
                    "{} {} timed out after {:?}",
                    self.binary,
                    args.first().map(String::as_str).unwrap_or(""),
                    self.timeout
                )))
            }
        };

        if output.status.success() {
            Ok(output)
        } else {
            Err(classify_failure(
                &String::from_utf8_lossy(&output.stderr),
                target,
            ))
        }
    }
}

/// Map a failed invocation's stderr onto the runtime error taxonomy.
fn classify_failure(stderr: &str, target: &str) -> RuntimeError {
    let stderr = stderr.trim();
    if ABSENT_MARKERS.iter().any(|m| stderr.contains(m)) {
        RuntimeError::NotFound(format!("Container '{}'", target))
    } else if UNREACHABLE_MARKERS.iter().any(|m| stderr.contains(m)) {
        RuntimeError::Unavailable(stderr.to_string())
    } else {
        RuntimeError::Rejected(stderr.to_string())
    }
}

fn parse_row(row: &str) -> Option<ContainerInfo> {
    let mut fields = row.trim().split('\t');
    let id = fields.next()?.to_string();
    let name = fields.next()?.trim_start_matches('/').to_string();
    let image = fields.next()?.to_string();
    let state = ContainerState::parse(fields.next()?);
    if id.is_empty() || name.is_empty() {
        return None;
    }
    Some(ContainerInfo {
        id,
        name,
        image,
        state,
    })
}

fn args<const N: usize>(parts: [&str; N]) -> Vec<String> {
    parts.iter().map(|s| s.to_string()).collect()
}

/// `docker run` arguments for a detached container.
pub fn run_args(spec: &ContainerSpec) -> Vec<String> {
    let mut out = args(["run", "--detach", "--name", spec.name.as_str()]);
    out.push("--network".to_string());
    out.push(spec.network.clone());
    for port in &spec.ports {
        out.push("--publish".to_string());
        out.push(port.clone());
    }
    for (key, value) in &spec.env {
        out.push("--env".to_string());
        out.push(format!("{}={}", key, value));
    }
    out.push("--restart".to_string());
    out.push(spec.restart_policy.to_cli());
    for (key, value) in &spec.labels {
        out.push("--label".to_string());
        out.push(format!("{}={}", key, value));
    }
    out.push(spec.image.clone());
    out
}

#[async_trait]
impl ContainerRuntime for DockerCli {
    async fn ping(&self) -> RuntimeResult<()> {
        self.exec(&args(["version", "--format", "{{.Server.Version}}"]), "daemon")
            .await
            .map(|_| ())
            .map_err(|e| match e {
                // a failing `version` can only mean the server side is missing
                RuntimeError::Rejected(detail) => RuntimeError::Unavailable(detail),
                other => other,
            })
    }

    async fn list(&self, filter: &ContainerFilter) -> RuntimeResult<Vec<ContainerInfo>> {
        let mut argv = args(["ps", "--no-trunc", "--format", PS_FORMAT]);
        if !filter.running_only {
            argv.push("--all".to_string());
        }
        if let Some(fragment) = &filter.name_contains {
            argv.push("--filter".to_string());
            argv.push(format!("name={}", fragment));
        }

        let output = self.exec(&argv, "containers").await?;
        Ok(String::from_utf8_lossy(&output.stdout)
            .lines()
            .filter_map(parse_row)
            .filter(|info| filter.matches(info))
            .collect())
    }

    async fn get(&self, name: &str) -> RuntimeResult<ContainerInfo> {
        let output = self
            .exec(
                &args(["container", "inspect", "--format", INSPECT_FORMAT, name]),
                name,
            )
            .await?;
        String::from_utf8_lossy(&output.stdout)
            .lines()
            .find_map(parse_row)
            .ok_or_else(|| RuntimeError::Rejected(format!("unreadable inspect output for '{}'", name)))
    }

    async fn stop(&self, id: &str) -> RuntimeResult<()> {
        self.exec(&args(["stop", id]), id).await.map(|_| ())
    }

    async fn start(&self, id: &str) -> RuntimeResult<()> {
        self.exec(&args(["start", id]), id).await.map(|_| ())
    }

    async fn remove(&self, id: &str) -> RuntimeResult<()> {
        self.exec(&args(["rm", id]), id).await.map(|_| ())
    }

    async fn run(&self, spec: &ContainerSpec) -> RuntimeResult<ContainerInfo> {
        let output = self.exec(&run_args(spec), &spec.name).await?;
        let id = String::from_utf8_lossy(&output.stdout).trim().to_string();
        Ok(ContainerInfo {
            id,
            name: spec.name.clone(),
            image: spec.image.clone(),
            state: ContainerState::Running,
        })
    }

    async fn logs(&self, id: &str, tail: usize, timestamps: bool) -> RuntimeResult<Vec<u8>> {
        let tail = tail.to_string();
        let mut argv = args(["logs", "--tail", tail.as_str()]);
        if timestamps {
            argv.push("--timestamps".to_string());
        }
        argv.push(id.to_string());

        // container stderr arrives on our stderr; keep both streams
        let output = self.exec(&argv, id).await?;
        let mut combined = output.stdout;
        combined.extend_from_slice(&output.stderr);
        Ok(combined)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::runtime::RestartPolicy;
    use std::collections::BTreeMap;

    #[test]
    fn test_classify_failure() {
        assert_eq!(
            classify_failure("Error response from daemon: No such container: svc", "svc"),
            RuntimeError::NotFound("Container 'svc'".to_string())
        );
        assert!(matches!(
            classify_failure(
                "Cannot connect to the Docker daemon at unix:///var/run/docker.sock.",
                "svc"
            ),
            RuntimeError::Unavailable(_)
        ));
        assert!(matches!(
            classify_failure("Unable to find image 'svc:bad' locally", "svc"),
            RuntimeError::Rejected(_)
        ));
    }

    #[test]
    fn test_parse_row_strips_inspect_slash() {
        let info = parse_row("abc123\t/user_service_victim\tsvc:good\trunning").unwrap();
        assert_eq!(info.name, "user_service_victim");
        assert_eq!(info.state, ContainerState::Running);
        assert!(parse_row("garbage").is_none());
    }

    #[test]
    fn test_run_args() {
        let spec = ContainerSpec {
            image: "svc:bad".to_string(),
            name: "user_service_victim".to_string(),
            network: "incident-sim-net".to_string(),
            ports: vec!["5001:5001".to_string()],
            env: BTreeMap::from([("POSTGRES_PASSWORD".to_string(), "pw".to_string())]),
            restart_policy: RestartPolicy::on_failure(5),
            labels: BTreeMap::from([(
                "com.docker.compose.service".to_string(),
                "user_service".to_string(),
            )]),
        };

        let argv = run_args(&spec);
        assert_eq!(argv[0], "run");
        assert!(argv.windows(2).any(|w| w == ["--restart", "on-failure:5"]));
        assert!(argv.windows(2).any(|w| w == ["--publish", "5001:5001"]));
        assert!(argv
            .windows(2)
            .any(|w| w == ["--label", "com.docker.compose.service=user_service"]));
        assert_eq!(argv.last().unwrap(), "svc:bad");
    }
}
