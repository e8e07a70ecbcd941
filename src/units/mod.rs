//! Deployment units.
//!
//! Each service type implements [`DeploymentUnit::create`]. The behaviour all
//! variants share (link table, container spec, start, provisioning, report)
//! lives on [`UnitContext`], which the composite hands to every unit.

use crate::config::{NetworkConfig, ServiceSettings};
use crate::console::Console;
use crate::engine::{ContainerEngine, OutputStream};
use crate::error::{ConfigError, Result};
use crate::images::ImageResolver;
use crate::provisioning::{self, ProvisioningBatch, ShellCommand};
use crate::report::Report;
use crate::types::{BindMount, ContainerSpec, EndpointConfig, ImageSource, NetworkIdentity, PortPair};
use async_trait::async_trait;
use std::collections::BTreeMap;
use std::fmt;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info};

pub mod api;
pub mod broker;
pub mod database;
pub mod identity;
pub mod log_collector;
pub mod ui_bundle;

pub use api::{ApiUnit, TokenExchange};
pub use broker::BrokerUnit;
pub use database::{DatabaseAccess, DatabaseUnit};
pub use identity::IdentityUnit;
pub use log_collector::LogCollectorUnit;
pub use ui_bundle::UiBundleUnit;

/// Where bind-mounted source trees appear inside containers
pub const SOURCE_MOUNT: &str = "/app";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UnitKind {
    Database,
    Broker,
    Identity,
    Api,
    UiBundle,
    LogCollector,
}

impl fmt::Display for UnitKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            UnitKind::Database => "database",
            UnitKind::Broker => "message broker",
            UnitKind::Identity => "identity service",
            UnitKind::Api => "application API",
            UnitKind::UiBundle => "UI bundle",
            UnitKind::LogCollector => "log collector",
        };
        f.write_str(name)
    }
}

/// Lifecycle of one unit; only moves forward
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum UnitState {
    Pending,
    ImageReady,
    ContainerCreated,
    Started,
    Provisioned,
    Reported,
}

/// Configuration and run state every unit carries
#[derive(Debug, Clone)]
pub struct UnitProfile {
    pub container_name: String,
    pub image: ImageSource,
    pub ports: PortPair,
    pub identity: NetworkIdentity,
    pub binds: Vec<BindMount>,
    pub env: BTreeMap<String, String>,
    pub privileged: bool,
    pub interactive: bool,
    pub batches: Vec<ProvisioningBatch>,
    state: UnitState,
    image_ref: Option<String>,
    report: Option<Report>,
}

impl UnitProfile {
    pub fn from_settings(key: &str, settings: &ServiceSettings) -> Result<Self, ConfigError> {
        let image = settings
            .image_source()
            .ok_or_else(|| ConfigError::MissingRecipe {
                service: key.to_string(),
            })?;

        Ok(Self {
            container_name: settings.container_name.clone(),
            image,
            ports: settings.ports(),
            identity: settings.network_identity(),
            binds: Vec::new(),
            env: BTreeMap::new(),
            privileged: false,
            interactive: false,
            batches: Vec::new(),
            state: UnitState::Pending,
            image_ref: None,
            report: None,
        })
    }

    /// Mounts a host source tree read-write at [`SOURCE_MOUNT`]
    pub fn with_source(mut self, source_dir: Option<PathBuf>) -> Self {
        if let Some(host_path) = source_dir {
            self.binds.push(BindMount {
                host_path,
                container_path: SOURCE_MOUNT.to_string(),
            });
        }
        self
    }

    pub fn state(&self) -> UnitState {
        self.state
    }

    /// Present once the unit has been inspected after start
    pub fn report(&self) -> Option<&Report> {
        self.report.as_ref()
    }

    /// Image the container is created from, once resolved
    pub fn image_ref(&self) -> Option<&str> {
        self.image_ref.as_deref()
    }

    fn advance(&mut self, state: UnitState) {
        debug!("{}: {:?} -> {:?}", self.container_name, self.state, state);
        self.state = state;
    }
}

#[async_trait]
pub trait DeploymentUnit: Send + Sync {
    fn kind(&self) -> UnitKind;

    fn profile(&self) -> &UnitProfile;

    fn profile_mut(&mut self) -> &mut UnitProfile;

    /// Brings the unit from `Pending` to `Provisioned`.
    /// The first failing step stops the unit and is returned.
    async fn create(&mut self, ctx: &UnitContext) -> Result<()>;

    fn container_name(&self) -> &str {
        &self.profile().container_name
    }

    /// Reference to pull ahead of time, if the image is not built here
    fn registry_image(&self) -> Option<&str> {
        self.profile().image.registry_reference()
    }
}

/// Shared delegate handed to every unit by the composite
#[derive(Clone)]
pub struct UnitContext {
    engine: Arc<dyn ContainerEngine>,
    console: Arc<dyn Console>,
    network: NetworkConfig,
    images: ImageResolver,
    roster: Vec<String>,
    poll_interval: Duration,
}

impl UnitContext {
    pub fn new(
        engine: Arc<dyn ContainerEngine>,
        console: Arc<dyn Console>,
        network: NetworkConfig,
        images: ImageResolver,
    ) -> Self {
        Self {
            engine,
            console,
            network,
            images,
            roster: Vec::new(),
            poll_interval: crate::readiness::DEFAULT_POLL_INTERVAL,
        }
    }

    /// Container names of every unit in this deployment
    pub fn with_roster(mut self, roster: Vec<String>) -> Self {
        self.roster = roster;
        self
    }

    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self
    }

    pub fn engine(&self) -> &Arc<dyn ContainerEngine> {
        &self.engine
    }

    pub fn console(&self) -> &dyn Console {
        self.console.as_ref()
    }

    pub fn network(&self) -> &NetworkConfig {
        &self.network
    }

    pub fn poll_interval(&self) -> Duration {
        self.poll_interval
    }

    /// Every other known unit, keyed and aliased by its container name
    pub fn build_links(&self, exclude: &str) -> BTreeMap<String, String> {
        self.roster
            .iter()
            .filter(|name| name.as_str() != exclude)
            .map(|name| (name.clone(), name.clone()))
            .collect()
    }

    /// Pulled reference or freshly built tag
    pub async fn resolve_image(&self, profile: &mut UnitProfile) -> Result<()> {
        let image = match &profile.image {
            ImageSource::Registry(reference) => reference.clone(),
            ImageSource::BuildFromSource { recipe } => {
                self.images
                    .build_image_from_dockerfile(&profile.container_name, recipe)
                    .await?
            }
        };
        profile.image_ref = Some(image);
        profile.advance(UnitState::ImageReady);
        Ok(())
    }

    pub fn container_spec(&self, profile: &UnitProfile) -> ContainerSpec {
        let image = profile
            .image_ref
            .clone()
            .unwrap_or_else(|| profile.image.to_string());

        ContainerSpec {
            name: profile.container_name.clone(),
            image,
            hostname: profile.identity.hostname().map(str::to_string),
            ports: vec![profile.ports],
            binds: profile.binds.clone(),
            env: profile.env.clone(),
            privileged: profile.privileged,
            interactive: profile.interactive,
            endpoint: EndpointConfig {
                network: self.network.name.clone(),
                ipv4_address: profile.identity.ipv4_address,
                aliases: profile.identity.aliases.clone(),
                links: self.build_links(&profile.container_name),
            },
        }
    }

    /// Creates the container on the deployment network and starts it
    pub async fn create_and_start(&self, profile: &mut UnitProfile) -> Result<()> {
        let spec = self.container_spec(profile);
        let id = self.engine.create_container(&spec).await?;
        debug!("Created {} ({})", profile.container_name, id);
        profile.advance(UnitState::ContainerCreated);

        self.engine.start_container(&profile.container_name).await?;
        profile.advance(UnitState::Started);
        self.console
            .success(&format!("{} started.", profile.container_name));
        Ok(())
    }

    /// Image, container, start and provisioning batches, in that order
    pub async fn deploy(&self, profile: &mut UnitProfile) -> Result<()> {
        self.resolve_image(profile).await?;
        self.create_and_start(profile).await?;
        self.run_batches(profile).await
    }

    pub async fn run_batches(&self, profile: &mut UnitProfile) -> Result<()> {
        provisioning::run_batches(
            self.engine.as_ref(),
            self.console.as_ref(),
            &profile.container_name,
            &profile.batches,
        )
        .await?;
        profile.advance(UnitState::Provisioned);
        Ok(())
    }

    pub async fn exec_cmd(&self, container: &str, cmd: &ShellCommand) -> Result<OutputStream> {
        provisioning::exec_cmd(self.engine.as_ref(), container, cmd).await
    }

    /// Runs one command to completion and returns its combined output
    pub async fn run_command(&self, container: &str, cmd: &ShellCommand) -> Result<String> {
        provisioning::run_command(self.engine.as_ref(), self.console.as_ref(), container, cmd).await
    }

    /// Inspects the started container and stores its report on the profile
    pub async fn inspect_after_start(&self, profile: &mut UnitProfile) -> Result<Report> {
        let details = self
            .engine
            .inspect_container(&profile.container_name)
            .await?;
        let report = Report::from_details(&profile.container_name, &details, &self.network.name)?;

        info!("📋 {} reported", profile.container_name);
        profile.report = Some(report.clone());
        profile.advance(UnitState::Reported);
        Ok(report)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::DeployerConfig;
    use crate::console::MemoryConsole;
    use crate::engine::LogStream;
    use crate::error::EngineError;
    use crate::types::{BuildRequest, ContainerDetails, NetworkSummary};
    use proptest::prelude::*;
    use std::collections::BTreeSet;

    struct InertEngine;

    #[async_trait]
    impl ContainerEngine for InertEngine {
        async fn list_networks(&self) -> Result<Vec<NetworkSummary>, EngineError> {
            Ok(Vec::new())
        }
        async fn remove_network(&self, _: &str) -> Result<(), EngineError> {
            Ok(())
        }
        async fn create_network(&self, _: &NetworkConfig) -> Result<String, EngineError> {
            Ok(String::new())
        }
        async fn pull_image(&self, _: &str) -> Result<LogStream, EngineError> {
            Ok(Box::pin(futures::stream::empty()))
        }
        async fn build_image(&self, _: &BuildRequest) -> Result<LogStream, EngineError> {
            Ok(Box::pin(futures::stream::empty()))
        }
        async fn create_container(&self, _: &ContainerSpec) -> Result<String, EngineError> {
            Ok(String::new())
        }
        async fn start_container(&self, _: &str) -> Result<(), EngineError> {
            Ok(())
        }
        async fn inspect_container(&self, name: &str) -> Result<ContainerDetails, EngineError> {
            Err(EngineError::ContainerNotFound {
                name: name.to_string(),
            })
        }
        async fn exec(&self, _: &str, _: &str) -> Result<OutputStream, EngineError> {
            Ok(Box::pin(futures::stream::empty()))
        }
    }

    fn context(roster: Vec<String>) -> UnitContext {
        let engine: Arc<dyn ContainerEngine> = Arc::new(InertEngine);
        let console: Arc<dyn Console> = Arc::new(MemoryConsole::new());
        let images = ImageResolver::new(engine.clone(), console.clone(), "docker_files");
        UnitContext::new(engine, console, DeployerConfig::default().network, images)
            .with_roster(roster)
    }

    #[test]
    fn container_spec_carries_identity_and_peer_links() {
        let config = DeployerConfig::default();
        let profile =
            UnitProfile::from_settings("rabbitmq", &config.services.rabbitmq).unwrap();
        let ctx = context(vec![
            "dep_mysql57".to_string(),
            "dep_rabbitmq".to_string(),
            "dep_sso".to_string(),
        ]);

        let spec = ctx.container_spec(&profile);
        assert_eq!(spec.image, "rabbitmq:3-management");
        assert_eq!(spec.hostname.as_deref(), Some("rabbitmqhost"));
        assert_eq!(spec.endpoint.network, "dep_network");
        assert_eq!(spec.endpoint.ipv4_address.to_string(), "172.16.1.3");
        assert_eq!(
            spec.endpoint.links.keys().collect::<Vec<_>>(),
            vec!["dep_mysql57", "dep_sso"]
        );
    }

    #[tokio::test]
    async fn inspecting_before_start_fails() {
        let config = DeployerConfig::default();
        let mut profile =
            UnitProfile::from_settings("rabbitmq", &config.services.rabbitmq).unwrap();
        let ctx = context(vec!["dep_rabbitmq".to_string()]);

        assert!(ctx.inspect_after_start(&mut profile).await.is_err());
        assert_eq!(profile.state(), UnitState::Pending);
        assert!(profile.report().is_none());
    }

    proptest! {
        #[test]
        fn links_exclude_self_and_cover_every_peer(
            names in prop::collection::btree_set("[a-z_]{1,12}", 1..8),
            pick in any::<prop::sample::Index>(),
        ) {
            let roster: Vec<String> = names.iter().cloned().collect();
            let own = pick.get(&roster).clone();
            let links = context(roster.clone()).build_links(&own);

            prop_assert!(!links.contains_key(&own));
            let expected: BTreeSet<String> = names.into_iter().filter(|n| *n != own).collect();
            let actual: BTreeSet<String> = links.keys().cloned().collect();
            prop_assert_eq!(links.len(), expected.len());
            prop_assert_eq!(actual, expected);
        }
    }
}
