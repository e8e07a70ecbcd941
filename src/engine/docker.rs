use super::{ContainerEngine, LogStream, OutputStream};
use crate::config::NetworkConfig;
use crate::error::EngineError;
use crate::types::{
    BuildRequest, ContainerDetails, ContainerSpec, LogRecord, NetworkSummary, PublishedPort,
};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use futures::stream::{self, StreamExt};
use serde::Deserialize;
use std::collections::BTreeMap;
use std::process::Stdio;
use tokio::io::{AsyncBufReadExt, AsyncReadExt, AsyncWriteExt, BufReader, Lines};
use tokio::process::{Child, ChildStdout, Command as AsyncCommand};
use tokio::task::JoinHandle;
use tracing::{debug, info};

/// Statuses whose trailing text is a progress detail rather than part of the status
const PROGRESS_STATUSES: [&str; 3] = ["Downloading", "Extracting", "Verifying Checksum"];

/// Drives the `docker` command-line client
#[derive(Debug, Clone)]
pub struct DockerCli {
    binary: String,
}

impl DockerCli {
    pub fn new() -> Self {
        Self::with_binary("docker")
    }

    /// Uses another docker-compatible client, e.g. `podman`
    pub fn with_binary(binary: impl Into<String>) -> Self {
        Self {
            binary: binary.into(),
        }
    }

    fn describe(&self, args: &[String]) -> String {
        format!("{} {}", self.binary, args.join(" "))
    }

    /// Runs a short engine command and returns its trimmed stdout
    async fn run(&self, args: Vec<String>) -> Result<String, EngineError> {
        debug!("Running: {}", self.describe(&args));

        let output = AsyncCommand::new(&self.binary)
            .args(&args)
            .stdin(Stdio::null())
            .output()
            .await
            .map_err(EngineError::Spawn)?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr).trim().to_string();
            return Err(EngineError::CommandFailed {
                command: self.describe(&args),
                code: output.status.code(),
                stderr,
            });
        }

        Ok(String::from_utf8_lossy(&output.stdout).trim().to_string())
    }

    /// Spawns a long-running engine command and streams its stdout line by line
    async fn stream_lines(
        &self,
        args: Vec<String>,
        envs: &[(&str, &str)],
        stdin: Option<&str>,
    ) -> Result<stream::BoxStream<'static, Result<String, EngineError>>, EngineError> {
        let command = self.describe(&args);
        debug!("Streaming: {}", command);

        let mut cmd = AsyncCommand::new(&self.binary);
        cmd.args(&args)
            .envs(envs.iter().copied())
            .stdin(if stdin.is_some() {
                Stdio::piped()
            } else {
                Stdio::null()
            })
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        let mut child = cmd.spawn().map_err(EngineError::Spawn)?;

        if let Some(input) = stdin {
            let mut pipe = child.stdin.take().ok_or_else(|| EngineError::Decode {
                reason: format!("stdin of `{}` is not available", command),
            })?;
            pipe.write_all(input.as_bytes())
                .await
                .map_err(EngineError::Spawn)?;
            // closing stdin tells the engine the input is complete
            drop(pipe);
        }

        let stdout = child.stdout.take().ok_or_else(|| EngineError::Decode {
            reason: format!("stdout of `{}` is not available", command),
        })?;
        let mut stderr = child.stderr.take().ok_or_else(|| EngineError::Decode {
            reason: format!("stderr of `{}` is not available", command),
        })?;

        let stderr_task = tokio::spawn(async move {
            let mut buf = String::new();
            let _ = stderr.read_to_string(&mut buf).await;
            buf
        });

        let state = LineStream {
            lines: BufReader::new(stdout).lines(),
            child,
            stderr: stderr_task,
            command,
            finished: false,
        };

        Ok(stream::unfold(state, next_line).boxed())
    }
}

impl Default for DockerCli {
    fn default() -> Self {
        Self::new()
    }
}

struct LineStream {
    lines: Lines<BufReader<ChildStdout>>,
    child: Child,
    stderr: JoinHandle<String>,
    command: String,
    finished: bool,
}

async fn next_line(mut state: LineStream) -> Option<(Result<String, EngineError>, LineStream)> {
    if state.finished {
        return None;
    }

    match state.lines.next_line().await {
        Ok(Some(line)) => Some((Ok(line), state)),
        Ok(None) => {
            state.finished = true;
            match state.child.wait().await {
                Ok(status) if status.success() => None,
                Ok(status) => {
                    let stderr = (&mut state.stderr).await.unwrap_or_default();
                    let err = EngineError::CommandFailed {
                        command: state.command.clone(),
                        code: status.code(),
                        stderr: stderr.trim().to_string(),
                    };
                    Some((Err(err), state))
                }
                Err(e) => Some((Err(EngineError::Spawn(e)), state)),
            }
        }
        Err(e) => {
            state.finished = true;
            let err = EngineError::Decode {
                reason: format!("reading output of `{}`: {}", state.command, e),
            };
            Some((Err(err), state))
        }
    }
}

#[async_trait]
impl ContainerEngine for DockerCli {
    async fn list_networks(&self) -> Result<Vec<NetworkSummary>, EngineError> {
        let out = self
            .run(strings(&["network", "ls", "--format", "{{.ID}}\t{{.Name}}"]))
            .await?;
        Ok(parse_network_list(&out))
    }

    async fn remove_network(&self, id: &str) -> Result<(), EngineError> {
        info!("🗑️  Removing network: {}", id);
        self.run(strings(&["network", "rm", id])).await?;
        Ok(())
    }

    async fn create_network(&self, network: &NetworkConfig) -> Result<String, EngineError> {
        info!("🌐 Creating network: {} ({})", network.name, network.subnet);
        self.run(network_create_args(network)).await
    }

    async fn pull_image(&self, reference: &str) -> Result<LogStream, EngineError> {
        info!("⬇️  Pulling image: {}", reference);
        let lines = self
            .stream_lines(strings(&["pull", reference]), &[], None)
            .await?;
        Ok(lines
            .map(|line| line.map(|l| parse_pull_line(&l)))
            .boxed())
    }

    async fn build_image(&self, request: &BuildRequest) -> Result<LogStream, EngineError> {
        info!("🔨 Building image {} from {}", request.tag, request.recipe_name);
        // the classic builder keeps --rm semantics and writes its log to stdout
        let lines = self
            .stream_lines(
                build_args(request),
                &[("DOCKER_BUILDKIT", "0")],
                Some(&request.recipe),
            )
            .await?;
        Ok(lines.map(|line| line.map(LogRecord::stream)).boxed())
    }

    async fn create_container(&self, spec: &ContainerSpec) -> Result<String, EngineError> {
        info!("📦 Creating container {} from {}", spec.name, spec.image);
        self.run(create_args(spec)).await
    }

    async fn start_container(&self, name: &str) -> Result<(), EngineError> {
        info!("▶️  Starting container: {}", name);
        self.run(strings(&["start", name])).await?;
        Ok(())
    }

    async fn inspect_container(&self, name: &str) -> Result<ContainerDetails, EngineError> {
        let out = self
            .run(strings(&["inspect", "--type", "container", name]))
            .await
            .map_err(|e| match e {
                EngineError::CommandFailed { ref stderr, .. } if stderr.contains("No such") => {
                    EngineError::ContainerNotFound {
                        name: name.to_string(),
                    }
                }
                other => other,
            })?;
        decode_inspect(name, &out)
    }

    async fn exec(&self, container: &str, command: &str) -> Result<OutputStream, EngineError> {
        debug!("⚡ Executing in {}: {}", container, command);
        self.stream_lines(exec_args(container, command), &[], None)
            .await
    }
}

fn strings(args: &[&str]) -> Vec<String> {
    args.iter().map(|a| a.to_string()).collect()
}

fn parse_network_list(out: &str) -> Vec<NetworkSummary> {
    out.lines()
        .filter_map(|line| {
            let (id, name) = line.split_once('\t')?;
            Some(NetworkSummary {
                id: id.trim().to_string(),
                name: name.trim().to_string(),
            })
        })
        .collect()
}

fn network_create_args(network: &NetworkConfig) -> Vec<String> {
    vec![
        "network".to_string(),
        "create".to_string(),
        "--driver".to_string(),
        "bridge".to_string(),
        "--subnet".to_string(),
        network.subnet.clone(),
        "--gateway".to_string(),
        network.gateway.to_string(),
        network.name.clone(),
    ]
}

/// Decodes one line of `docker pull` output.
///
/// JSON records are taken as-is; plain lines look like `<id>: <status>`.
fn parse_pull_line(line: &str) -> LogRecord {
    let line = line.trim();

    if line.starts_with('{') {
        if let Ok(record) = serde_json::from_str::<LogRecord>(line) {
            return record;
        }
    }

    let (id, status) = match line.split_once(": ") {
        Some((id, rest)) if !id.contains(' ') => (Some(id.to_string()), rest),
        _ => (None, line),
    };

    for verb in PROGRESS_STATUSES {
        if let Some(detail) = status.strip_prefix(verb) {
            let detail = detail.trim();
            if !detail.is_empty() {
                return LogRecord {
                    id,
                    status: Some(verb.to_string()),
                    progress: Some(detail.to_string()),
                    stream: None,
                };
            }
        }
    }

    LogRecord {
        id,
        status: Some(status.to_string()),
        progress: None,
        stream: None,
    }
}

fn build_args(request: &BuildRequest) -> Vec<String> {
    let mut args = vec!["build".to_string()];
    if request.no_cache {
        args.push("--no-cache".to_string());
    }
    if request.remove_intermediate {
        args.push("--rm".to_string());
    }
    args.push("-t".to_string());
    args.push(request.tag.clone());
    // recipe arrives on stdin, without a build context
    args.push("-".to_string());
    args
}

fn create_args(spec: &ContainerSpec) -> Vec<String> {
    let mut args = vec!["create".to_string(), "--name".to_string(), spec.name.clone()];

    if let Some(ref hostname) = spec.hostname {
        args.push("--hostname".to_string());
        args.push(hostname.clone());
    }
    if spec.interactive {
        args.push("--interactive".to_string());
        args.push("--tty".to_string());
    }
    if spec.privileged {
        args.push("--privileged".to_string());
    }
    for port in &spec.ports {
        args.push("--publish".to_string());
        args.push(format!("{}:{}", port.localhost_port, port.docker_port));
    }
    for bind in &spec.binds {
        args.push("--volume".to_string());
        args.push(format!(
            "{}:{}:rw",
            bind.host_path.display(),
            bind.container_path
        ));
    }
    for (key, value) in &spec.env {
        args.push("--env".to_string());
        args.push(format!("{}={}", key, value));
    }

    let endpoint = &spec.endpoint;
    args.push("--network".to_string());
    args.push(endpoint.network.clone());
    args.push("--ip".to_string());
    args.push(endpoint.ipv4_address.to_string());
    for alias in &endpoint.aliases {
        args.push("--network-alias".to_string());
        args.push(alias.clone());
    }
    for (peer, alias) in &endpoint.links {
        args.push("--link".to_string());
        args.push(format!("{}:{}", peer, alias));
    }

    args.push(spec.image.clone());
    args
}

fn exec_args(container: &str, command: &str) -> Vec<String> {
    vec![
        "exec".to_string(),
        container.to_string(),
        "sh".to_string(),
        "-c".to_string(),
        // group so stderr of every command in the line is merged
        format!("{{ {}\n}} 2>&1", command),
    ]
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct InspectedContainer {
    id: String,
    name: String,
    created: DateTime<Utc>,
    network_settings: InspectedNetworkSettings,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct InspectedNetworkSettings {
    #[serde(default)]
    networks: Option<BTreeMap<String, InspectedEndpoint>>,
    #[serde(default)]
    ports: Option<BTreeMap<String, Option<Vec<InspectedBinding>>>>,
}

#[derive(Debug, Deserialize)]
struct InspectedEndpoint {
    #[serde(rename = "IPAddress", default)]
    ip_address: String,
}

#[derive(Debug, Deserialize)]
struct InspectedBinding {
    #[serde(rename = "HostIp", default)]
    host_ip: String,
    #[serde(rename = "HostPort")]
    host_port: String,
}

fn decode_inspect(name: &str, out: &str) -> Result<ContainerDetails, EngineError> {
    let containers: Vec<InspectedContainer> =
        serde_json::from_str(out).map_err(|e| EngineError::Decode {
            reason: format!("inspect output for {}: {}", name, e),
        })?;

    let container = containers
        .into_iter()
        .next()
        .ok_or_else(|| EngineError::ContainerNotFound {
            name: name.to_string(),
        })?;

    let networks = container
        .network_settings
        .networks
        .unwrap_or_default()
        .into_iter()
        .map(|(network, endpoint)| (network, endpoint.ip_address))
        .collect();

    let ports = container
        .network_settings
        .ports
        .unwrap_or_default()
        .into_iter()
        .flat_map(|(container_port, bindings)| {
            bindings
                .unwrap_or_default()
                .into_iter()
                .map(move |binding| PublishedPort {
                    container_port: container_port.clone(),
                    host_ip: binding.host_ip,
                    host_port: binding.host_port,
                })
        })
        .collect();

    Ok(ContainerDetails {
        id: container.id,
        name: container.name.trim_start_matches('/').to_string(),
        created: container.created,
        networks,
        ports,
    })
}
