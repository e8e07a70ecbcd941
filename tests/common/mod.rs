#![allow(dead_code)]

use async_trait::async_trait;
use chrono::{TimeZone, Utc};
use deployer::composite::DeploymentComposite;
use deployer::config::{DeployerConfig, NetworkConfig};
use deployer::console::MemoryConsole;
use deployer::engine::{ContainerEngine, LogStream, OutputStream};
use deployer::error::EngineError;
use deployer::types::{
    BuildRequest, ContainerDetails, ContainerSpec, LogRecord, NetworkSummary, PublishedPort,
};
use futures::StreamExt;
use std::collections::{BTreeMap, HashSet};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

/// One engine call, as recorded by [`FakeEngine`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Call {
    ListNetworks,
    RemoveNetwork(String),
    CreateNetwork(String),
    Pull(String),
    Build(String),
    Create(String),
    Start(String),
    Inspect(String),
    Exec { container: String, command: String },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FakeNetwork {
    pub id: String,
    pub name: String,
    pub subnet: String,
    pub gateway: String,
}

/// In-memory engine that records every call in order
#[derive(Default)]
pub struct FakeEngine {
    calls: Mutex<Vec<Call>>,
    networks: Mutex<Vec<FakeNetwork>>,
    containers: Mutex<BTreeMap<String, ContainerSpec>>,
    started: Mutex<HashSet<String>>,
    failing_creates: HashSet<String>,
    failing_exec: Option<String>,
    silent_exec: Option<String>,
    failing_pulls: HashSet<String>,
    failing_build: bool,
    watched: Option<PathBuf>,
    watched_at_build: Mutex<Vec<Option<String>>>,
}

impl FakeEngine {
    pub fn new() -> Self {
        Self::default()
    }

    /// A network that already exists before the run
    pub fn with_network(self, name: &str) -> Self {
        {
            let mut networks = self.networks.lock().unwrap();
            let id = format!("pre{}-{}", networks.len() + 1, name);
            networks.push(FakeNetwork {
                id,
                name: name.to_string(),
                subnet: "10.0.0.0/24".to_string(),
                gateway: "10.0.0.1".to_string(),
            });
        }
        self
    }

    pub fn failing_create(mut self, container: &str) -> Self {
        self.failing_creates.insert(container.to_string());
        self
    }

    /// Exec commands containing `needle` exit non-zero
    pub fn failing_exec(mut self, needle: &str) -> Self {
        self.failing_exec = Some(needle.to_string());
        self
    }

    /// Exec commands containing `needle` succeed without output
    pub fn silent_exec(mut self, needle: &str) -> Self {
        self.silent_exec = Some(needle.to_string());
        self
    }

    pub fn failing_pull(mut self, reference: &str) -> Self {
        self.failing_pulls.insert(reference.to_string());
        self
    }

    pub fn failing_build(mut self) -> Self {
        self.failing_build = true;
        self
    }

    /// Captures the content of `path` whenever a build starts
    pub fn watching(mut self, path: PathBuf) -> Self {
        self.watched = Some(path);
        self
    }

    pub fn calls(&self) -> Vec<Call> {
        self.calls.lock().unwrap().clone()
    }

    pub fn position(&self, call: &Call) -> Option<usize> {
        self.calls().iter().position(|c| c == call)
    }

    pub fn networks(&self) -> Vec<FakeNetwork> {
        self.networks.lock().unwrap().clone()
    }

    pub fn container(&self, name: &str) -> Option<ContainerSpec> {
        self.containers.lock().unwrap().get(name).cloned()
    }

    pub fn is_started(&self, name: &str) -> bool {
        self.started.lock().unwrap().contains(name)
    }

    pub fn watched_at_build(&self) -> Vec<Option<String>> {
        self.watched_at_build.lock().unwrap().clone()
    }

    pub fn exec_commands(&self, container: &str) -> Vec<String> {
        self.calls()
            .into_iter()
            .filter_map(|c| match c {
                Call::Exec { container: c, command } if c == container => Some(command),
                _ => None,
            })
            .collect()
    }

    fn record(&self, call: Call) {
        self.calls.lock().unwrap().push(call);
    }
}

fn failed(command: &str, stderr: &str) -> EngineError {
    EngineError::CommandFailed {
        command: command.to_string(),
        code: Some(1),
        stderr: stderr.to_string(),
    }
}

#[async_trait]
impl ContainerEngine for FakeEngine {
    async fn list_networks(&self) -> Result<Vec<NetworkSummary>, EngineError> {
        self.record(Call::ListNetworks);
        Ok(self
            .networks()
            .into_iter()
            .map(|n| NetworkSummary {
                id: n.id,
                name: n.name,
            })
            .collect())
    }

    async fn remove_network(&self, id: &str) -> Result<(), EngineError> {
        self.record(Call::RemoveNetwork(id.to_string()));
        let mut networks = self.networks.lock().unwrap();
        let before = networks.len();
        networks.retain(|n| n.id != id);
        if networks.len() == before {
            return Err(failed("network rm", "No such network"));
        }
        Ok(())
    }

    async fn create_network(&self, network: &NetworkConfig) -> Result<String, EngineError> {
        self.record(Call::CreateNetwork(network.name.clone()));
        if !network.subnet.contains('/') {
            return Err(failed(
                "network create",
                &format!("invalid CIDR address: {}", network.subnet),
            ));
        }
        let mut networks = self.networks.lock().unwrap();
        if networks.iter().any(|n| n.name == network.name) {
            return Err(failed("network create", "network with name already exists"));
        }
        let id = format!("net-{}", networks.len() + 1);
        networks.push(FakeNetwork {
            id: id.clone(),
            name: network.name.clone(),
            subnet: network.subnet.clone(),
            gateway: network.gateway.to_string(),
        });
        Ok(id)
    }

    async fn pull_image(&self, reference: &str) -> Result<LogStream, EngineError> {
        self.record(Call::Pull(reference.to_string()));
        if self.failing_pulls.contains(reference) {
            return Err(failed("pull", "manifest unknown"));
        }
        let records = vec![
            Ok(LogRecord::status(format!("Pulling from {}", reference))),
            Ok(LogRecord {
                id: Some("a1b2".to_string()),
                status: Some("Downloading".to_string()),
                progress: Some("1MB/2MB".to_string()),
                stream: None,
            }),
            Ok(LogRecord::status("Pull complete")),
        ];
        Ok(futures::stream::iter(records).boxed())
    }

    async fn build_image(&self, request: &BuildRequest) -> Result<LogStream, EngineError> {
        self.record(Call::Build(request.tag.clone()));
        if let Some(path) = &self.watched {
            self.watched_at_build
                .lock()
                .unwrap()
                .push(std::fs::read_to_string(path).ok());
        }

        let mut records = vec![Ok(LogRecord::stream("Step 1/2 : FROM python:3.6\n"))];
        if self.failing_build {
            records.push(Err(failed("build", "pull access denied")));
        } else {
            records.push(Ok(LogRecord::stream(format!(
                "Successfully tagged {}:latest\n",
                request.tag
            ))));
        }
        Ok(futures::stream::iter(records).boxed())
    }

    async fn create_container(&self, spec: &ContainerSpec) -> Result<String, EngineError> {
        self.record(Call::Create(spec.name.clone()));
        if self.failing_creates.contains(&spec.name) {
            return Err(failed("create", "Conflict. The container name is already in use"));
        }
        self.containers
            .lock()
            .unwrap()
            .insert(spec.name.clone(), spec.clone());
        Ok(format!("id-{}", spec.name))
    }

    async fn start_container(&self, name: &str) -> Result<(), EngineError> {
        self.record(Call::Start(name.to_string()));
        if !self.containers.lock().unwrap().contains_key(name) {
            return Err(EngineError::ContainerNotFound {
                name: name.to_string(),
            });
        }
        self.started.lock().unwrap().insert(name.to_string());
        Ok(())
    }

    async fn inspect_container(&self, name: &str) -> Result<ContainerDetails, EngineError> {
        self.record(Call::Inspect(name.to_string()));
        let spec = self
            .container(name)
            .filter(|_| self.is_started(name))
            .ok_or_else(|| EngineError::ContainerNotFound {
                name: name.to_string(),
            })?;

        let mut networks = BTreeMap::new();
        networks.insert(
            spec.endpoint.network.clone(),
            spec.endpoint.ipv4_address.to_string(),
        );

        Ok(ContainerDetails {
            id: format!("id-{}", name),
            name: name.to_string(),
            created: Utc.with_ymd_and_hms(2024, 3, 1, 10, 15, 30).unwrap(),
            networks,
            ports: spec
                .ports
                .iter()
                .map(|p| PublishedPort {
                    container_port: format!("{}/tcp", p.docker_port),
                    host_ip: "0.0.0.0".to_string(),
                    host_port: p.localhost_port.to_string(),
                })
                .collect(),
        })
    }

    async fn exec(&self, container: &str, command: &str) -> Result<OutputStream, EngineError> {
        self.record(Call::Exec {
            container: container.to_string(),
            command: command.to_string(),
        });

        if let Some(needle) = &self.silent_exec {
            if command.contains(needle.as_str()) {
                return Ok(futures::stream::empty().boxed());
            }
        }

        let mut chunks = vec![Ok(format!("ran in {}", container))];
        if let Some(needle) = &self.failing_exec {
            if command.contains(needle.as_str()) {
                chunks.push(Err(failed("exec", "command exited with status 1")));
            }
        }
        Ok(futures::stream::iter(chunks).boxed())
    }
}

pub const RECIPES: [&str; 3] = [
    "sso_local_Dockerfile",
    "feedback_api_local_Dockerfile",
    "xircl_ui_local_Dockerfile",
];

/// Default configuration rooted in `dir`, with every build recipe present
pub fn config_in(dir: &Path) -> DeployerConfig {
    let recipes = dir.join("docker_files");
    std::fs::create_dir_all(&recipes).unwrap();
    for recipe in RECIPES {
        std::fs::write(recipes.join(recipe), "FROM python:3.6\nWORKDIR /app\n").unwrap();
    }

    let mut config = DeployerConfig::default();
    config.deployment.base_dir = dir.to_path_buf();
    config.deployment.recipes_dir = recipes;
    config
}

pub fn composite(
    engine: &Arc<FakeEngine>,
    console: &Arc<MemoryConsole>,
    config: &DeployerConfig,
) -> DeploymentComposite {
    DeploymentComposite::new(
        engine.clone(),
        console.clone(),
        config.network.clone(),
        config.deployment.recipes_dir.clone(),
    )
    .with_divider(config.deployment.report_divider.clone())
}
